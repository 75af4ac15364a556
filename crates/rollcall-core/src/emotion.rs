//! FER+ facial expression classifier via ONNX Runtime.
//!
//! Classifies a centered 64x64 grayscale crop into one of eight
//! expressions. The model takes raw pixel values (no normalization).

use crate::crop;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FERPLUS_INPUT_SIZE: usize = 64;

/// Output order of the FER+ model.
pub const FERPLUS_LABELS: [&str; 8] = [
    "neutral", "happy", "surprise", "sad", "angry", "disgust", "fear", "contempt",
];

#[derive(Error, Debug)]
pub enum EmotionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid input image: {0}")]
    InvalidInput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps a grayscale image to an expression label.
pub trait EmotionClassifier: Send {
    fn classify(&mut self, gray: &[u8], width: u32, height: u32) -> Result<String, EmotionError>;
}

/// FER+ (emotion-ferplus-8) classifier.
pub struct FerPlusClassifier {
    session: Session,
}

impl FerPlusClassifier {
    pub fn load(model_path: &str) -> Result<Self, EmotionError> {
        if !Path::new(model_path).exists() {
            return Err(EmotionError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded FER+ emotion model");
        Ok(Self { session })
    }

    fn preprocess(face: &[u8]) -> Array4<f32> {
        let size = FERPLUS_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
        for y in 0..size {
            for x in 0..size {
                tensor[[0, 0, y, x]] = face.get(y * size + x).copied().unwrap_or(0) as f32;
            }
        }
        tensor
    }
}

impl EmotionClassifier for FerPlusClassifier {
    fn classify(&mut self, gray: &[u8], width: u32, height: u32) -> Result<String, EmotionError> {
        let face = crop::center_square(gray, width, height, FERPLUS_INPUT_SIZE as u32)
            .ok_or_else(|| EmotionError::InvalidInput(format!("{width}x{height} frame")))?;
        let input = Self::preprocess(&face);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmotionError::InferenceFailed(format!("scores: {e}")))?;

        let probs = softmax(scores);
        let (idx, p) = argmax(&probs).ok_or_else(|| {
            EmotionError::InferenceFailed(format!(
                "expected {} scores, got none",
                FERPLUS_LABELS.len()
            ))
        })?;
        let label = FERPLUS_LABELS.get(idx).ok_or_else(|| {
            EmotionError::InferenceFailed(format!("class index {idx} out of range"))
        })?;

        tracing::trace!(label, probability = p, "emotion classified");
        Ok((*label).to_string())
    }
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|e| e / sum).collect()
    } else {
        exps
    }
}

fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn test_argmax_first_of_ties() {
        assert_eq!(argmax(&[0.2, 0.5, 0.5]), Some((1, 0.5)));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_preprocess_raw_pixels() {
        let face = vec![200u8; FERPLUS_INPUT_SIZE * FERPLUS_INPUT_SIZE];
        let t = FerPlusClassifier::preprocess(&face);
        assert_eq!(t.shape(), &[1, 1, FERPLUS_INPUT_SIZE, FERPLUS_INPUT_SIZE]);
        assert_eq!(t[[0, 0, 5, 5]], 200.0);
    }

    #[test]
    fn test_load_missing_model() {
        assert!(matches!(
            FerPlusClassifier::load("/nonexistent/emotion-ferplus-8.onnx"),
            Err(EmotionError::ModelNotFound(_))
        ));
    }
}
