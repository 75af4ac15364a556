//! rollcall-core — Face identification and expression classification.
//!
//! Uses ArcFace embeddings matched against an enrolled face gallery for
//! identity, and FER+ for emotion, both running via ONNX Runtime on CPU.

pub mod analyzer;
pub mod crop;
pub mod emotion;
pub mod gallery;
pub mod recognizer;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer};
pub use emotion::{EmotionClassifier, EmotionError, FerPlusClassifier};
pub use gallery::{Gallery, GalleryError};
pub use recognizer::{ArcFaceEmbedder, Embedder, EmbedderError};
pub use types::{CosineMatcher, Embedding, GalleryFace, InferenceResult, Matcher, EMOTION_UNKNOWN};

/// File name of the ArcFace recognition model inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// File name of the FER+ emotion model inside the model directory.
pub const EMOTION_MODEL_FILE: &str = "emotion-ferplus-8.onnx";

/// System-wide model directory used when none is configured.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/rollcall/models")
}
