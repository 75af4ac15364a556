//! Identity + expression in one blocking call.

use crate::emotion::EmotionClassifier;
use crate::gallery::Gallery;
use crate::recognizer::{Embedder, EmbedderError};
use crate::types::{CosineMatcher, InferenceResult, Matcher, EMOTION_UNKNOWN};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("embedding failed: {0}")]
    Embedder(#[from] EmbedderError),
}

/// Identifies a face against the gallery and classifies its expression.
///
/// Confidence is the best cosine similarity clamped to [0, 1]. An identity
/// is only reported when that similarity reaches `match_threshold`.
/// Emotion failures never fail the analysis; they report "unknown".
pub struct FaceAnalyzer {
    embedder: Box<dyn Embedder>,
    emotion: Option<Box<dyn EmotionClassifier>>,
    gallery: Gallery,
    match_threshold: f32,
}

impl FaceAnalyzer {
    pub fn new(
        embedder: Box<dyn Embedder>,
        emotion: Option<Box<dyn EmotionClassifier>>,
        gallery: Gallery,
        match_threshold: f32,
    ) -> Self {
        if gallery.is_empty() {
            tracing::warn!("face gallery is empty; nobody will be identified");
        }
        Self {
            embedder,
            emotion,
            gallery,
            match_threshold,
        }
    }

    pub fn analyze(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<InferenceResult, AnalyzerError> {
        let emotion = match self.emotion.as_mut() {
            Some(classifier) => match classifier.classify(gray, width, height) {
                Ok(label) => label,
                Err(e) => {
                    tracing::warn!(error = %e, "emotion detection failed");
                    EMOTION_UNKNOWN.to_string()
                }
            },
            None => EMOTION_UNKNOWN.to_string(),
        };

        if self.gallery.is_empty() {
            return Ok(InferenceResult::unrecognized(emotion));
        }

        let probe = self.embedder.embed(gray, width, height)?;
        let result = CosineMatcher.compare(&probe, self.gallery.faces(), self.match_threshold);

        tracing::debug!(
            matched = result.matched,
            similarity = result.similarity,
            label = ?result.label,
            emotion = %emotion,
            "face analyzed"
        );

        Ok(InferenceResult::new(result.label, emotion, result.similarity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::EmotionError;
    use crate::types::{Embedding, GalleryFace};
    use std::path::PathBuf;

    /// Returns a fixed embedding regardless of input.
    struct FixedEmbedder(Vec<f32>);

    impl Embedder for FixedEmbedder {
        fn embed(&mut self, _g: &[u8], _w: u32, _h: u32) -> Result<Embedding, EmbedderError> {
            Ok(Embedding {
                values: self.0.clone(),
                model_version: None,
            })
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&mut self, _g: &[u8], _w: u32, _h: u32) -> Result<Embedding, EmbedderError> {
            Err(EmbedderError::InferenceFailed("boom".into()))
        }
    }

    struct FixedEmotion(Result<&'static str, ()>);

    impl EmotionClassifier for FixedEmotion {
        fn classify(&mut self, _g: &[u8], _w: u32, _h: u32) -> Result<String, EmotionError> {
            self.0
                .map(str::to_string)
                .map_err(|_| EmotionError::InferenceFailed("no face".into()))
        }
    }

    fn gallery() -> Gallery {
        Gallery::new(vec![
            GalleryFace {
                label: "alice".into(),
                embedding: Embedding { values: vec![1.0, 0.0], model_version: None },
                source: PathBuf::from("alice/1.jpg"),
            },
            GalleryFace {
                label: "bob".into(),
                embedding: Embedding { values: vec![0.0, 1.0], model_version: None },
                source: PathBuf::from("bob/1.jpg"),
            },
        ])
    }

    #[test]
    fn test_analyze_identifies_best_match() {
        let mut analyzer = FaceAnalyzer::new(
            Box::new(FixedEmbedder(vec![0.9, 0.1])),
            Some(Box::new(FixedEmotion(Ok("happy")))),
            gallery(),
            0.4,
        );
        let r = analyzer.analyze(&[0; 4], 2, 2).unwrap();
        assert_eq!(r.identity(), Some("alice"));
        assert_eq!(r.emotion, "happy");
        assert!(r.confidence > 0.9);
    }

    #[test]
    fn test_analyze_below_threshold_has_no_identity() {
        let mut analyzer = FaceAnalyzer::new(
            Box::new(FixedEmbedder(vec![1.0, 1.0])),
            None,
            gallery(),
            0.9,
        );
        let r = analyzer.analyze(&[0; 4], 2, 2).unwrap();
        assert_eq!(r.identity(), None);
        assert_eq!(r.emotion, EMOTION_UNKNOWN);
        assert!((r.confidence - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
    }

    #[test]
    fn test_emotion_failure_degrades_to_unknown() {
        let mut analyzer = FaceAnalyzer::new(
            Box::new(FixedEmbedder(vec![0.0, 1.0])),
            Some(Box::new(FixedEmotion(Err(())))),
            gallery(),
            0.4,
        );
        let r = analyzer.analyze(&[0; 4], 2, 2).unwrap();
        assert_eq!(r.identity(), Some("bob"));
        assert_eq!(r.emotion, EMOTION_UNKNOWN);
    }

    #[test]
    fn test_embedder_failure_propagates() {
        let mut analyzer = FaceAnalyzer::new(Box::new(FailingEmbedder), None, gallery(), 0.4);
        assert!(analyzer.analyze(&[0; 4], 2, 2).is_err());
    }

    #[test]
    fn test_empty_gallery_skips_embedding() {
        let mut analyzer =
            FaceAnalyzer::new(Box::new(FailingEmbedder), None, Gallery::default(), 0.4);
        let r = analyzer.analyze(&[0; 4], 2, 2).unwrap();
        assert_eq!(r.identity(), None);
        assert_eq!(r.confidence, 0.0);
    }
}
