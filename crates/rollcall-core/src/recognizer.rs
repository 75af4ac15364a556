//! ArcFace face embedder via ONNX Runtime.
//!
//! Extracts 512-dimensional face embeddings from a centered square crop of
//! the frame using the w600k_r50 ArcFace model. No face detection or
//! landmark alignment is enforced: the kiosk expects the person to stand
//! in front of the camera.

use crate::crop;
use crate::types::Embedding;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIDE: usize = 112;
/// Pixel value mapped to 0.0; also the divisor.
const PIXEL_CENTER: f32 = 127.5;
const EMBEDDING_LEN: usize = 512;
const MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid input image: {0}")]
    InvalidInput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a grayscale image into a face embedding.
pub trait Embedder: Send {
    fn embed(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Embedding, EmbedderError>;
}

/// ArcFace-based embedder.
pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Scale a 112x112 grayscale crop to [-1, 1] and repeat it across the
    /// three input planes.
    fn to_tensor(face: &[u8]) -> Array4<f32> {
        let side = INPUT_SIDE;
        Array4::from_shape_fn((1, 3, side, side), |(_, _, y, x)| {
            let luma = face.get(y * side + x).copied().unwrap_or_default();
            (f32::from(luma) - PIXEL_CENTER) / PIXEL_CENTER
        })
    }
}

impl Embedder for ArcFaceEmbedder {
    fn embed(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Embedding, EmbedderError> {
        let face = crop::center_square(gray, width, height, INPUT_SIDE as u32).ok_or_else(|| {
            EmbedderError::InvalidInput(format!("{}-byte buffer for {width}x{height}", gray.len()))
        })?;
        let input = Self::to_tensor(&face);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("read output tensor: {e}")))?;

        if values.len() != EMBEDDING_LEN {
            return Err(EmbedderError::InferenceFailed(format!(
                "model produced {} values, wanted {EMBEDDING_LEN}",
                values.len()
            )));
        }

        let mut values = values.to_vec();
        normalize(&mut values);
        Ok(Embedding {
            values,
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }
}

/// Scale to unit length in place. Zero vectors are left alone.
fn normalize(values: &mut [f32]) {
    let length = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if length > 0.0 {
        values.iter_mut().for_each(|v| *v /= length);
    }
}
