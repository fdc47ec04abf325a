//! SCRFD face detector via ONNX Runtime.
//!
//! The model sees a 640×640 letterboxed copy of the frame and predicts, per
//! anchor on three stride grids, a score, box edge distances and five landmark
//! offsets. Boxes are mapped back to frame pixels and merged with NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection model not found: {} (expected det_10g.onnx from insightface buffalo_l)", .0.display())]
    ModelNotFound(PathBuf),
    #[error("detection model: {0}")]
    BadModel(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Output tensor positions for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideHeads {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Raw head outputs for one stride, flattened in anchor order.
struct StrideOutputs<'a> {
    scores: &'a [f32],
    boxes: &'a [f32],
    kps: &'a [f32],
}

/// Maps model-input coordinates back onto the source frame.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

pub struct FaceDetector {
    session: Session,
    heads: [StrideHeads; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::BadModel(format!(
                "expected 9 outputs (score/bbox/kps for 3 strides), got {}",
                names.len()
            )));
        }
        let heads = heads_for(&names);
        tracing::debug!(?names, ?heads, "SCRFD outputs mapped");

        Ok(Self { session, heads })
    }

    /// Faces in `frame`, highest confidence first, in frame pixel coordinates.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = letterbox(frame, INPUT_SIZE);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, heads) in STRIDES.iter().zip(self.heads) {
            let tensor = |index: usize, what: &str| {
                outputs[index]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::BadModel(format!("{what} head, stride {stride}: {e}")))
            };
            let raw = StrideOutputs {
                scores: tensor(heads.score, "score")?,
                boxes: tensor(heads.bbox, "bbox")?,
                kps: tensor(heads.kps, "kps")?,
            };
            candidates.extend(decode(&raw, stride, INPUT_SIZE, letterbox, SCORE_THRESHOLD));
        }

        let faces = nms(candidates, NMS_IOU);
        tracing::trace!(faces = faces.len(), "SCRFD detections");
        Ok(faces)
    }
}

/// Fit `frame` into a `size`×`size` NCHW tensor, centered, aspect preserved.
///
/// Padding is left at zero, which is what a mid-grey pixel normalizes to.
fn letterbox(frame: &RgbImage, size: usize) -> (Array4<f32>, Letterbox) {
    let (w, h) = (frame.width() as f32, frame.height() as f32);
    let scale = (size as f32 / w).min(size as f32 / h);
    let new_w = ((w * scale).round() as usize).clamp(1, size);
    let new_h = ((h * scale).round() as usize).clamp(1, size);
    let left = (size - new_w) / 2;
    let top = (size - new_h) / 2;

    let resized = imageops::resize(frame, new_w as u32, new_h as u32, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (left + x as usize, top + y as usize);
        for (c, &value) in pixel.0.iter().enumerate() {
            tensor[[0, c, ty, tx]] = (value as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    let info = Letterbox {
        scale,
        pad_x: (size - new_w) as f32 / 2.0,
        pad_y: (size - new_h) as f32 / 2.0,
    };
    (tensor, info)
}

/// Locate each stride's heads by name (`score_8`, `bbox_16`, ...), else by position.
fn heads_for(names: &[String]) -> [StrideHeads; 3] {
    let position = |head: &str, stride: usize| {
        let name = format!("{head}_{stride}");
        names.iter().position(|n| *n == name)
    };
    let named = |stride: usize| {
        Some(StrideHeads {
            score: position("score", stride)?,
            bbox: position("bbox", stride)?,
            kps: position("kps", stride)?,
        })
    };

    if let (Some(a), Some(b), Some(c)) = (named(STRIDES[0]), named(STRIDES[1]), named(STRIDES[2])) {
        return [a, b, c];
    }
    // insightface export order: scores, then boxes, then landmarks.
    [0, 1, 2].map(|i| StrideHeads {
        score: i,
        bbox: i + 3,
        kps: i + 6,
    })
}

/// Anchors above `threshold` for one stride, mapped onto the source frame.
fn decode(
    raw: &StrideOutputs<'_>,
    stride: usize,
    input_size: usize,
    letterbox: Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let cells = input_size / stride;
    let step = stride as f32;

    (0..cells * cells * ANCHORS_PER_CELL)
        .filter_map(|anchor| {
            let score = *raw.scores.get(anchor)?;
            if score <= threshold {
                return None;
            }
            let cell = anchor / ANCHORS_PER_CELL;
            let cx = (cell % cells) as f32 * step;
            let cy = (cell / cells) as f32 * step;

            let d = raw.boxes.get(anchor * 4..anchor * 4 + 4)?;
            let (x1, y1) = letterbox.to_frame(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.to_frame(cx + d[2] * step, cy + d[3] * step);

            let landmarks = raw.kps.get(anchor * 10..anchor * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.to_frame(cx + k[2 * i] * step, cy + k[2 * i + 1] * step))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy NMS. Output is sorted by descending confidence.
fn nms(mut candidates: Vec<BoundingBox>, max_iou: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= max_iou) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let overlap_w = (a.right().min(b.right()) - a.left().max(b.left())).max(0.0);
    let overlap_h = (a.bottom().min(b.bottom()) - a.top().max(b.top())).max(0.0);
    let intersection = overlap_w * overlap_h;
    let union = a.width * a.height + b.width * b.height - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, size: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: size, height: size, confidence, landmarks: None,
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_iou() {
        let a = face(0.0, 0.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &face(20.0, 20.0, 10.0, 1.0)), 0.0);
        // 5×10 overlap over a 150 union.
        let b = BoundingBox { x: 5.0, ..a.clone() };
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping_and_sorts() {
        let kept = nms(
            vec![
                face(200.0, 200.0, 50.0, 0.7),
                face(5.0, 5.0, 100.0, 0.8),
                face(0.0, 0.0, 100.0, 0.9),
            ],
            NMS_IOU,
        );
        let confidences: Vec<f32> = kept.iter().map(|f| f.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
        assert!(nms(Vec::new(), NMS_IOU).is_empty());
    }

    #[test]
    fn test_heads_found_by_name_in_any_order() {
        let heads = heads_for(&names(&[
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ]));
        assert_eq!(heads[0], StrideHeads { score: 2, bbox: 0, kps: 1 });
        assert_eq!(heads[2], StrideHeads { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_heads_fall_back_to_position() {
        let numeric: Vec<String> = (440..449).map(|i: usize| i.to_string()).collect();
        let heads = heads_for(&numeric);
        assert_eq!(heads[1], StrideHeads { score: 1, bbox: 4, kps: 7 });

        // A partial naming is not trusted either.
        let partial = heads_for(&names(&[
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32", "a", "b", "c",
        ]));
        assert_eq!(partial[0], StrideHeads { score: 0, bbox: 3, kps: 6 });
    }

    #[test]
    fn test_letterbox_centers_and_normalizes() {
        let frame = RgbImage::from_pixel(160, 120, image::Rgb([255, 0, 128]));
        let (tensor, info) = letterbox(&frame, 640);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((info.scale - 4.0).abs() < 1e-6);
        assert_eq!((info.pad_x, info.pad_y), (0.0, 80.0));

        for c in 0..3 {
            assert_eq!(tensor[[0, c, 10, 320]], 0.0);
            assert_eq!(tensor[[0, c, 630, 320]], 0.0);
        }
        let expect = |v: f32| (v - PIXEL_MEAN) / PIXEL_STD;
        assert!((tensor[[0, 0, 320, 320]] - expect(255.0)).abs() < 1e-3);
        assert!((tensor[[0, 1, 320, 320]] - expect(0.0)).abs() < 1e-3);
        assert!((tensor[[0, 2, 320, 320]] - expect(128.0)).abs() < 1e-3);
    }

    #[test]
    fn test_letterbox_mapping_inverts_resize() {
        let frame = RgbImage::new(320, 240);
        let (_, info) = letterbox(&frame, 640);
        let (x, y) = info.to_frame(100.0 * info.scale + info.pad_x, 50.0 * info.scale + info.pad_y);
        assert!((x - 100.0).abs() < 0.1 && (y - 50.0).abs() < 0.1, "{x}, {y}");
    }

    #[test]
    fn test_decode_maps_anchor_back_to_frame() {
        // One confident anchor at cell (1, 1) of stride 32 on a 64×64 input.
        let anchors = 2 * 2 * ANCHORS_PER_CELL;
        let hit = 3 * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        scores[hit] = 0.9;
        let mut boxes = vec![0.0f32; anchors * 4];
        boxes[hit * 4..hit * 4 + 4].copy_from_slice(&[0.5; 4]);
        let kps = vec![0.0f32; anchors * 10];
        let raw = StrideOutputs { scores: &scores, boxes: &boxes, kps: &kps };

        let letterbox = Letterbox { scale: 2.0, pad_x: 0.0, pad_y: 0.0 };
        let faces = decode(&raw, 32, 64, letterbox, SCORE_THRESHOLD);

        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        // Anchor at (32, 32), 16 px each side, halved by the letterbox scale.
        assert!((f.x - 8.0).abs() < 1e-4 && (f.y - 8.0).abs() < 1e-4, "{f:?}");
        assert!((f.width - 16.0).abs() < 1e-4 && (f.height - 16.0).abs() < 1e-4, "{f:?}");
        assert_eq!(f.landmarks.unwrap()[0], (16.0, 16.0));
    }

    #[test]
    fn test_decode_tolerates_short_outputs() {
        let scores = [0.9f32, 0.9];
        let boxes = [0.5f32; 4];
        let raw = StrideOutputs { scores: &scores, boxes: &boxes, kps: &[] };
        let letterbox = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };

        let faces = decode(&raw, 32, 64, letterbox, SCORE_THRESHOLD);
        assert_eq!(faces.len(), 1);
        assert!(faces[0].landmarks.is_none());
    }

    #[test]
    fn test_load_missing_model() {
        let err = FaceDetector::load(Path::new("/nonexistent/det_10g.onnx")).err();
        assert!(matches!(err, Some(DetectorError::ModelNotFound(_))));
    }
}
