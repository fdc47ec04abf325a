use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn left(&self) -> f32 {
        self.x
    }

    /// Map the box (and its landmarks) into a frame resized by `factor` on both axes.
    ///
    /// Detection runs on a downscaled frame; `scaled(1.0 / detection_scale)` brings
    /// the result back into source-frame coordinates.
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * factor, ly * factor))),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// False if any component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two embeddings of equal dimension.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// A named face enrolled in the gallery. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub name: String,
    pub embedding: Embedding,
}

impl IdentityRecord {
    pub fn new(name: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            name: name.into(),
            embedding,
        }
    }
}

/// One detected face in one frame. Consumed immediately, never persisted.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Box and display name handed to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub bbox: BoundingBox,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.5, -0.25, 1.0]);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_euclidean_distance_3_4_5() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert!((b.euclidean_distance(&a) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_is_finite() {
        assert!(Embedding::new(vec![0.1, -2.0]).is_finite());
        assert!(Embedding::new(vec![]).is_finite());
        assert!(!Embedding::new(vec![0.1, f32::NAN]).is_finite());
        assert!(!Embedding::new(vec![f32::NEG_INFINITY]).is_finite());
    }

    #[test]
    fn test_bbox_edges() {
        let b = BoundingBox {
            x: 10.0, y: 20.0, width: 30.0, height: 40.0,
            confidence: 0.9, landmarks: None,
        };
        assert_eq!((b.top(), b.right(), b.bottom(), b.left()), (20.0, 40.0, 60.0, 10.0));
    }

    #[test]
    fn test_bbox_scaled_inverse_of_quarter() {
        let b = BoundingBox {
            x: 10.0, y: 5.0, width: 20.0, height: 25.0,
            confidence: 0.8, landmarks: Some([(12.0, 8.0); 5]),
        };
        let up = b.scaled(1.0 / 0.25);
        assert_eq!((up.top(), up.right(), up.bottom(), up.left()), (20.0, 120.0, 120.0, 40.0));
        assert_eq!(up.confidence, 0.8);
        assert_eq!(up.landmarks.unwrap()[0], (48.0, 32.0));
    }
}
