//! ONNX-backed [`FaceAnalyzer`]: SCRFD for detection, ArcFace for embeddings.

use crate::detector::{DetectorError, FaceDetector};
use crate::pipeline::FaceAnalyzer;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self {
            detector,
            recognizer,
        }
    }

    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let scrfd_path = model_dir.join(SCRFD_MODEL_FILE);
        let arcface_path = model_dir.join(ARCFACE_MODEL_FILE);

        let detector = FaceDetector::load(&scrfd_path)?;
        tracing::info!(path = %scrfd_path.display(), "SCRFD detector loaded");

        let recognizer = FaceRecognizer::load(&arcface_path)?;
        tracing::info!(path = %arcface_path.display(), "ArcFace recognizer loaded");

        Ok(Self::new(detector, recognizer))
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    type Error = AnalyzerError;

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        Ok(self.detector.detect(frame)?)
    }

    fn embed(
        &mut self,
        frame: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, AnalyzerError> {
        faces
            .iter()
            .map(|face| Ok(self.recognizer.extract(frame, face)?))
            .collect()
    }
}
