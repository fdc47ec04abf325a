//! rollcall-core: face gallery, matching and interactive enrollment.
//!
//! The [`pipeline::FramePipeline`] owns the [`Gallery`] and, for every face in
//! every frame, asks the [`Matcher`] for a known identity or runs the
//! [`EnrollmentFlow`] to name a new one. Detection and embedding use SCRFD and
//! ArcFace via ONNX Runtime.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod enrollment;
pub mod gallery;
pub mod matcher;
pub mod overlay;
pub mod pipeline;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use analyzer::OnnxAnalyzer;
pub use detector::FaceDetector;
pub use enrollment::{Enrollment, EnrollmentFlow, LabelPrompt, SnapshotArchive};
pub use gallery::{Gallery, GalleryError, GalleryStore};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher, DEFAULT_TOLERANCE};
pub use pipeline::{FaceAnalyzer, FramePipeline, FrameSource, Renderer, RunSummary};
pub use recognizer::FaceRecognizer;
pub use types::{Annotation, BoundingBox, Detection, Embedding, IdentityRecord};

/// Per-user data directory: `$XDG_DATA_HOME/rollcall`, else `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

/// Where `det_10g.onnx` and `w600k_r50.onnx` are looked up by default.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}
