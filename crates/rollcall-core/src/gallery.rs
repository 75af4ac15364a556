//! Enrolled faces, loaded from a directory tree.
//!
//! Layout is one folder per person, holding any number of reference
//! images:
//!
//! ```text
//! faces/
//!   alice/  front.jpg  glasses.png
//!   bob/    1.jpeg
//! ```
//!
//! The folder name is the identity label that ends up in the ledger.

use crate::recognizer::{Embedder, EmbedderError};
use crate::types::GalleryFace;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("faces directory not found: {0}")]
    NotFound(String),
    #[error("failed to read faces directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-image enrollment failure; the image is skipped.
#[derive(Error, Debug)]
enum EnrollError {
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("embedding: {0}")]
    Embedder(#[from] EmbedderError),
}

/// The set of enrolled faces the identifier matches against.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    faces: Vec<GalleryFace>,
}

impl Gallery {
    pub fn new(faces: Vec<GalleryFace>) -> Self {
        Self { faces }
    }

    /// Embed every image under `dir/<person>/`.
    ///
    /// Images that cannot be decoded or embedded are skipped with a warning.
    /// Files directly under `dir` are ignored.
    pub fn enroll_dir(dir: &Path, embedder: &mut dyn Embedder) -> Result<Self, GalleryError> {
        if !dir.is_dir() {
            return Err(GalleryError::NotFound(dir.display().to_string()));
        }

        let mut faces = Vec::new();
        for (label, path) in scan_dir(dir)? {
            match enroll_image(&path, embedder) {
                Ok(embedding) => {
                    tracing::debug!(label = %label, path = %path.display(), "enrolled face");
                    faces.push(GalleryFace {
                        label,
                        embedding,
                        source: path,
                    });
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping face image");
                }
            }
        }

        let gallery = Self { faces };
        tracing::info!(
            dir = %dir.display(),
            faces = gallery.len(),
            people = gallery.labels().len(),
            "face gallery loaded"
        );
        Ok(gallery)
    }

    pub fn faces(&self) -> &[GalleryFace] {
        &self.faces
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Distinct identity labels, sorted.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.faces.iter().map(|f| f.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }
}

/// List `(label, image path)` pairs under `dir`, sorted for stable enrollment order.
pub fn scan_dir(dir: &Path) -> Result<Vec<(String, PathBuf)>, GalleryError> {
    let mut found = Vec::new();
    for person in std::fs::read_dir(dir)? {
        let person = person?;
        if !person.file_type()?.is_dir() {
            continue;
        }
        let Some(label) = person.file_name().to_str().map(str::to_string) else {
            tracing::warn!(path = %person.path().display(), "skipping non-UTF-8 folder name");
            continue;
        };
        for entry in std::fs::read_dir(person.path())? {
            let path = entry?.path();
            if is_image(&path) {
                found.push((label.clone(), path));
            }
        }
    }
    found.sort();
    Ok(found)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn enroll_image(
    path: &Path,
    embedder: &mut dyn Embedder,
) -> Result<crate::types::Embedding, EnrollError> {
    let gray = image::open(path)?.to_luma8();
    let (width, height) = gray.dimensions();
    Ok(embedder.embed(gray.as_raw(), width, height)?)
}
