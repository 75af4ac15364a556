use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Emotion label reported when no classification is available.
pub const EMOTION_UNKNOWN: &str = "unknown";

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine of the angle between two embeddings, in [-1, 1].
    ///
    /// A zero vector on either side scores 0. Extra trailing values in the
    /// longer vector are ignored.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let (dot, lhs, rhs) = self
            .values
            .iter()
            .zip(&other.values)
            .fold((0.0f32, 0.0f32, 0.0f32), |(d, l, r), (&x, &y)| {
                (d + x * y, l + x * x, r + y * y)
            });
        let magnitude = (lhs * rhs).sqrt();
        if magnitude > 0.0 {
            dot / magnitude
        } else {
            0.0
        }
    }
}

/// One enrolled reference image of a known person.
#[derive(Debug, Clone)]
pub struct GalleryFace {
    /// Person the image belongs to (the enrollment folder name).
    pub label: String,
    pub embedding: Embedding,
    pub source: PathBuf,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Cosine similarity of the best match [-1, 1].
    pub similarity: f32,
    /// Label of the matched person (if any).
    pub label: Option<String>,
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryFace], threshold: f32) -> MatchResult;
}

/// Picks the enrolled face with the highest cosine similarity.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryFace], threshold: f32) -> MatchResult {
        let best = gallery
            .iter()
            .map(|face| (face, probe.similarity(&face.embedding)))
            .max_by(|(_, a), (_, b)| a.total_cmp(b));

        match best {
            Some((face, similarity)) if similarity >= threshold => MatchResult {
                matched: true,
                similarity,
                label: Some(face.label.clone()),
            },
            Some((_, similarity)) => MatchResult {
                matched: false,
                similarity,
                label: None,
            },
            None => MatchResult {
                matched: false,
                similarity: 0.0,
                label: None,
            },
        }
    }
}

/// Outcome of one recognition pass over a frame.
///
/// `confidence` is in [0, 1]. `identity` is `None` when nobody in the
/// gallery matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub identity: Option<String>,
    pub emotion: String,
    pub confidence: f32,
}

impl InferenceResult {
    pub fn new(identity: Option<String>, emotion: impl Into<String>, confidence: f32) -> Self {
        Self {
            identity,
            emotion: emotion.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// "Nothing recognized", keeping a previously seen emotion label.
    pub fn unrecognized(emotion: impl Into<String>) -> Self {
        Self::new(None, emotion, 0.0)
    }

    /// Identity label, treating an empty string as no identity.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref().filter(|s| !s.is_empty())
    }
}
