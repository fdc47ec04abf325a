//! Per-frame orchestration: capture → detect → embed → match-or-enroll → render.
//!
//! Everything runs on the caller's thread. Frame N+1 is not requested until
//! frame N has been fully processed, including any enrollment prompt.

use crate::enrollment::{EnrollError, Enrollment, EnrollmentFlow, LabelPrompt};
use crate::gallery::Gallery;
use crate::matcher::Matcher;
use crate::types::{Annotation, BoundingBox, Detection, Embedding};
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

/// Label shown for faces that are neither matched nor enrolled.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Linear downscale applied before detection.
pub const DEFAULT_DETECTION_SCALE: f32 = 0.25;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("frame capture failed: {0}")]
    Capture(#[source] BoxedError),
    #[error("face analysis failed: {0}")]
    Analysis(#[source] BoxedError),
    #[error("render failed: {0}")]
    Render(#[source] BoxedError),
    #[error("enrollment failed: {0}")]
    Enrollment(#[from] EnrollError),
}

/// Delivers frames; `Ok(None)` means the stream has ended.
pub trait FrameSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn next_frame(&mut self) -> Result<Option<RgbImage>, Self::Error>;
}

/// Face detection and embedding collaborators.
pub trait FaceAnalyzer {
    type Error: std::error::Error + Send + Sync + 'static;

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, Self::Error>;

    /// One embedding per face, in the same order as `faces`.
    fn embed(
        &mut self,
        frame: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, Self::Error>;
}

/// Live output surface and the operator's quit key.
pub trait Renderer {
    type Error: std::error::Error + Send + Sync + 'static;

    fn render(&mut self, frame: &RgbImage, annotations: &[Annotation]) -> Result<(), Self::Error>;

    /// Non-blocking check for a quit request.
    fn cancel_requested(&mut self) -> bool;
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub enrolled: u64,
}

/// Owns the gallery and drives matcher and enrollment for every face in every frame.
pub struct FramePipeline<M, P> {
    gallery: Gallery,
    matcher: M,
    enrollment: EnrollmentFlow<P>,
    detection_scale: f32,
    enrolled: u64,
}

impl<M: Matcher, P: LabelPrompt> FramePipeline<M, P> {
    pub fn new(gallery: Gallery, matcher: M, enrollment: EnrollmentFlow<P>) -> Self {
        Self {
            gallery,
            matcher,
            enrollment,
            detection_scale: DEFAULT_DETECTION_SCALE,
            enrolled: 0,
        }
    }

    /// Set the linear downscale used for detection.
    ///
    /// Values outside `(0, 1]` (including NaN) fall back to
    /// [`DEFAULT_DETECTION_SCALE`].
    pub fn with_detection_scale(mut self, scale: f32) -> Self {
        self.detection_scale = if scale > 0.0 && scale <= 1.0 {
            scale
        } else {
            tracing::warn!(scale, fallback = DEFAULT_DETECTION_SCALE, "detection scale out of range");
            DEFAULT_DETECTION_SCALE
        };
        self
    }

    pub fn detection_scale(&self) -> f32 {
        self.detection_scale
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn into_gallery(self) -> Gallery {
        self.gallery
    }

    /// Run until the operator quits, the source ends, or a fatal error occurs.
    pub fn run<S, A, D>(
        &mut self,
        source: &mut S,
        analyzer: &mut A,
        renderer: &mut D,
    ) -> Result<RunSummary, PipelineError>
    where
        S: FrameSource,
        A: FaceAnalyzer,
        D: Renderer,
    {
        let mut summary = RunSummary::default();
        let enrolled_before = self.enrolled;

        loop {
            let Some(frame) = source
                .next_frame()
                .map_err(|e| PipelineError::Capture(Box::new(e)))?
            else {
                tracing::info!("frame source ended");
                break;
            };
            summary.frames += 1;

            let annotations = self.process_frame(&frame, analyzer)?;
            renderer
                .render(&frame, &annotations)
                .map_err(|e| PipelineError::Render(Box::new(e)))?;

            if renderer.cancel_requested() {
                tracing::info!(frames = summary.frames, "quit requested");
                break;
            }
        }

        summary.enrolled = self.enrolled - enrolled_before;
        Ok(summary)
    }

    /// Resolve a display label for every face in `frame`.
    ///
    /// May block on the operator when a face is unknown.
    pub fn process_frame<A: FaceAnalyzer>(
        &mut self,
        frame: &RgbImage,
        analyzer: &mut A,
    ) -> Result<Vec<Annotation>, PipelineError> {
        let detections = self.detect(frame, analyzer)?;
        tracing::debug!(faces = detections.len(), "frame analyzed");

        let mut annotations = Vec::with_capacity(detections.len());
        for Detection { bbox, embedding } in detections {
            let label = self.identify(frame, embedding)?;
            annotations.push(Annotation {
                bbox: bbox.scaled(1.0 / self.detection_scale),
                label,
            });
        }
        Ok(annotations)
    }

    /// Detect and embed on the downscaled frame. Boxes stay in downscaled coordinates.
    fn detect<A: FaceAnalyzer>(
        &self,
        frame: &RgbImage,
        analyzer: &mut A,
    ) -> Result<Vec<Detection>, PipelineError> {
        let small = downscale(frame, self.detection_scale);
        let analysis = |e: A::Error| PipelineError::Analysis(Box::new(e));

        let faces = analyzer.detect(&small).map_err(analysis)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = analyzer.embed(&small, &faces).map_err(analysis)?;

        if embeddings.len() != faces.len() {
            tracing::warn!(
                faces = faces.len(),
                embeddings = embeddings.len(),
                "detection/embedding count mismatch; extra entries ignored"
            );
        }

        Ok(faces
            .into_iter()
            .zip(embeddings)
            .map(|(bbox, embedding)| Detection { bbox, embedding })
            .collect())
    }

    fn identify(&mut self, frame: &RgbImage, embedding: Embedding) -> Result<String, PipelineError> {
        if let Some(found) = self.matcher.find(&embedding, &self.gallery) {
            tracing::debug!(name = %found.name, distance = found.distance, "face matched");
            return Ok(found.name);
        }

        match self.enrollment.enroll(&mut self.gallery, frame, embedding)? {
            Enrollment::Enrolled { name, .. } => {
                self.enrolled += 1;
                Ok(name)
            }
            Enrollment::Skipped | Enrollment::Rejected => Ok(UNKNOWN_LABEL.to_string()),
        }
    }
}

/// Resize both axes by `scale` with bilinear filtering. At least 1×1.
pub fn downscale(frame: &RgbImage, scale: f32) -> RgbImage {
    if (scale - 1.0).abs() < f32::EPSILON {
        return frame.clone();
    }
    let w = ((frame.width() as f32 * scale).round() as u32).max(1);
    let h = ((frame.height() as f32 * scale).round() as u32).max(1);
    imageops::resize(frame, w, h, FilterType::Triangle)
}
