//! Nearest-identity lookup over the gallery.

use crate::gallery::Gallery;
use crate::types::Embedding;

/// Euclidean tolerance for a positive match.
///
/// ArcFace embeddings are L2-normalized, so `d = sqrt(2 - 2·cos)`; 1.10 sits at
/// cosine similarity ≈ 0.40.
pub const DEFAULT_TOLERANCE: f32 = 1.10;

/// A gallery entry that matched a probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Position of the record in enrollment order.
    pub index: usize,
    pub name: String,
    pub distance: f32,
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    /// Returns the matching identity, or `None` when the face is unknown.
    fn find(&self, probe: &Embedding, gallery: &Gallery) -> Option<MatchResult>;
}

/// Euclidean-distance matcher gated by a fixed tolerance.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    tolerance: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl EuclideanMatcher {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    pub fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        a.euclidean_distance(b)
    }

    /// Same dimension and within tolerance. NaN distances never match.
    pub fn is_match(&self, a: &Embedding, b: &Embedding) -> bool {
        self.gate(a, b).is_some()
    }

    /// Distance from `probe` to `candidate` if the candidate passes the match gate.
    fn gate(&self, probe: &Embedding, candidate: &Embedding) -> Option<f32> {
        if probe.dim() != candidate.dim() {
            return None;
        }
        let distance = self.distance(probe, candidate);
        (distance <= self.tolerance).then_some(distance)
    }
}

impl Matcher for EuclideanMatcher {
    fn find(&self, probe: &Embedding, gallery: &Gallery) -> Option<MatchResult> {
        let mut best: Option<(usize, f32)> = None;

        for (i, record) in gallery.iter().enumerate() {
            // Closest is not enough: the tolerance gate comes first.
            let Some(distance) = self.gate(probe, &record.embedding) else {
                continue;
            };
            // Strict `<` keeps the earliest-enrolled record on ties.
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }

        best.map(|(index, distance)| MatchResult {
            index,
            name: gallery.records()[index].name.clone(),
            distance,
        })
    }
}
