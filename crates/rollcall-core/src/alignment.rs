//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to a canonical 112×112 position using the five
//! InsightFace reference landmarks and least-squares estimation.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

const ALIGNED_SIZE: u32 = 112;

/// Rotation, uniform scale and translation: `p' = [a -b; b a]·p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` points onto `dst`.
    ///
    /// `None` when the source points are coincident.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let centroid = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / 5.0, sy / 5.0)
        };
        let (mx, my) = centroid(src);
        let (nx, ny) = centroid(dst);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy, dx, dy) = (sx - mx, sy - my, dx - nx, dy - ny);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }
        if norm < 1e-6 {
            return None;
        }

        let (a, b) = (dot / norm, cross / norm);
        Some(Self {
            a,
            b,
            tx: nx - (a * mx - b * my),
            ty: ny - (b * mx + a * my),
        })
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    fn invert(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (a, b) = (self.a / det, -self.b / det);
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Resample `frame` so that output pixel `p` shows source pixel `to_source(p)`.
///
/// Bilinear; samples outside the source are black.
fn warp(frame: &RgbImage, to_source: &Similarity, out_size: u32) -> RgbImage {
    let (w, h) = (frame.width() as i32, frame.height() as i32);
    let sample = |x: i32, y: i32| -> [f32; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            frame.get_pixel(x as u32, y as u32).0.map(f32::from)
        } else {
            [0.0; 3]
        }
    };

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let (sx, sy) = to_source.apply((ox as f32, oy as f32));
        let (x0, y0) = (sx.floor() as i32, sy.floor() as i32);
        let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);

        let (tl, tr) = (sample(x0, y0), sample(x0 + 1, y0));
        let (bl, br) = (sample(x0, y0 + 1), sample(x0 + 1, y0 + 1));

        Rgb(std::array::from_fn(|c| {
            let top = tl[c] + (tr[c] - tl[c]) * fx;
            let bottom = bl[c] + (br[c] - bl[c]) * fx;
            (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8
        }))
    })
}

/// Align a detected face to the canonical 112×112 ArcFace crop.
///
/// Degenerate landmarks (all in one spot) give a black crop.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    match Similarity::fit(landmarks, &REFERENCE_LANDMARKS_112).and_then(|m| m.invert()) {
        Some(to_source) => warp(frame, &to_source, ALIGNED_SIZE),
        None => RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE),
    }
}
