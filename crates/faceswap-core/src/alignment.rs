//! Face alignment via 4-DOF similarity transform.
//!
//! Maps detected landmarks onto a canonical template (ArcFace 112, InSwapper
//! 128, FFHQ 512), warps RGB crops out of a frame, and blends processed crops
//! back into it with a feathered edge.

use crate::types::Landmarks;
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 crop.
pub const ARCFACE_TEMPLATE_112: Landmarks = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// FFHQ reference landmarks for a 512×512 crop (CodeFormer input space).
pub const FFHQ_TEMPLATE_512: Landmarks = [
    (192.98138, 239.94708),
    (318.90277, 240.1936),
    (256.63416, 314.01935),
    (201.26117, 371.41043),
    (313.08905, 371.15118),
];

/// ArcFace template resampled for a square crop of `size` pixels.
///
/// Sizes that are multiples of 112 scale uniformly; anything else is scaled
/// against 128 and shifted right by 8 units, matching how insightface builds
/// the InSwapper crop.
pub fn arcface_template(size: u32) -> Landmarks {
    let (ratio, diff_x) = if size % 112 == 0 {
        (size as f32 / 112.0, 0.0)
    } else {
        let ratio = size as f32 / 128.0;
        (ratio, 8.0 * ratio)
    };
    ARCFACE_TEMPLATE_112.map(|(x, y)| (x * ratio + diff_x, y * ratio))
}

/// 2×3 similarity transform:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares estimate of the transform taking `src` onto `dst`.
    pub fn estimate(src: &Landmarks, dst: &Landmarks) -> Self {
        // Each point pair contributes two rows of A·[a, b, tx, ty]ᵀ = B:
        //   [sx, -sy, 1, 0] -> dx
        //   [sy,  sx, 0, 1] -> dy
        let mut ata = [[0.0f32; 4]; 4];
        let mut atb = [0.0f32; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let r1 = [sx, -sy, 1.0, 0.0];
            let r2 = [sy, sx, 0.0, 1.0];
            for j in 0..4 {
                for k in 0..4 {
                    ata[j][k] += r1[j] * r1[k] + r2[j] * r2[k];
                }
                atb[j] += r1[j] * dx + r2[j] * dy;
            }
        }

        match solve_normal_equations(ata, atb) {
            Some([a, b, tx, ty]) => Self { a, b, tx, ty },
            None => Self::identity(),
        }
    }

    pub fn identity() -> Self {
        Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 }
    }

    /// Uniform scale factor of the transform.
    pub fn scale(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse transform, or `None` when the transform is degenerate.
    pub fn invert(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return None;
        }
        let ia = self.a / det;
        let ib = -self.b / det;
        Some(Self {
            a: ia,
            b: ib,
            tx: -(ia * self.tx - ib * self.ty),
            ty: -(ib * self.tx + ia * self.ty),
        })
    }

    /// Transform for inputs given at `factor`× the original coordinate scale.
    pub fn with_input_scale(&self, factor: f32) -> Self {
        Self {
            a: self.a / factor,
            b: self.b / factor,
            tx: self.tx,
            ty: self.ty,
        }
    }

    /// Compose: apply `self` first, then scale the result by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            a: self.a * factor,
            b: self.b * factor,
            tx: self.tx * factor,
            ty: self.ty * factor,
        }
    }
}

/// Solve the 4×4 normal equations via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_normal_equations(ata: [[f32; 4]; 4], atb: [f32; 4]) -> Option<[f32; 4]> {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    Some(x)
}

/// Bilinear RGB sample; out-of-bounds taps read as black.
fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let tap = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && px < w && py >= 0 && py < h {
            let p = image.get_pixel(px as u32, py as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (tap(x0, y0), tap(x0 + 1, y0), tap(x0, y0 + 1), tap(x0 + 1, y0 + 1));
    let mut out = [0.0f32; 3];
    for c in 0..3 {
        out[c] = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
    }
    out
}

/// Warp the region of `frame` selected by `to_crop` (frame → crop coordinates)
/// into a square `size`×`size` crop.
pub fn warp_crop(frame: &RgbImage, to_crop: &Similarity, size: u32) -> RgbImage {
    let Some(to_frame) = to_crop.invert() else {
        return RgbImage::new(size, size);
    };

    RgbImage::from_fn(size, size, |cx, cy| {
        let (sx, sy) = to_frame.apply((cx as f32, cy as f32));
        let v = sample_bilinear(frame, sx, sy);
        Rgb(v.map(|c| c.round().clamp(0.0, 255.0) as u8))
    })
}

/// Align the face described by `landmarks` onto `template` and crop `size`×`size`.
///
/// Returns the crop together with the frame → crop transform used, which the
/// caller needs to paste a processed crop back.
pub fn align_face(
    frame: &RgbImage,
    landmarks: &Landmarks,
    template: &Landmarks,
    size: u32,
) -> (RgbImage, Similarity) {
    let to_crop = Similarity::estimate(landmarks, template);
    (warp_crop(frame, &to_crop, size), to_crop)
}

/// Blend a processed square crop back into `canvas`.
///
/// `to_crop` maps canvas coordinates to crop coordinates. The blend weight
/// ramps linearly from 0 at the crop border to 1 at `feather` (a fraction of
/// the crop size) inside it. Only the canvas pixels covered by the crop are
/// visited.
pub fn paste_back(canvas: &mut RgbImage, crop: &RgbImage, to_crop: &Similarity, feather: f32) {
    let Some(to_canvas) = to_crop.invert() else {
        return;
    };
    let size = crop.width().min(crop.height()) as f32;
    let margin = (size * feather).max(1.0);

    // Axis-aligned canvas bounds of the crop square.
    let corners = [(0.0, 0.0), (size, 0.0), (0.0, size), (size, size)].map(|p| to_canvas.apply(p));
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = (corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
        .clamp(0, canvas.width() as i64) as u32;
    let max_y = (corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max).ceil() as i64)
        .clamp(0, canvas.height() as i64) as u32;

    for y in min_y..max_y {
        for x in min_x..max_x {
            let (cx, cy) = to_crop.apply((x as f32, y as f32));
            if cx < 0.0 || cy < 0.0 || cx > size - 1.0 || cy > size - 1.0 {
                continue;
            }
            let edge = cx.min(cy).min(size - 1.0 - cx).min(size - 1.0 - cy);
            let alpha = (edge / margin).clamp(0.0, 1.0);
            if alpha <= 0.0 {
                continue;
            }

            let src = sample_bilinear(crop, cx, cy);
            let dst = canvas.get_pixel_mut(x, y);
            for c in 0..3 {
                let blended = src[c] * alpha + dst.0[c] as f32 * (1.0 - alpha);
                dst.0[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = ARCFACE_TEMPLATE_112;
        let m = Similarity::estimate(&pts, &pts);
        assert!((m.a - 1.0).abs() < 1e-4, "a = {}", m.a);
        assert!(m.b.abs() < 1e-4, "b = {}", m.b);
        assert!(m.tx.abs() < 1e-3, "tx = {}", m.tx);
        assert!(m.ty.abs() < 1e-3, "ty = {}", m.ty);
    }

    #[test]
    fn test_scaled_transform() {
        let src = ARCFACE_TEMPLATE_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = Similarity::estimate(&src, &ARCFACE_TEMPLATE_112);
        assert!((m.scale() - 0.5).abs() < 0.01, "scale = {}", m.scale());
    }

    #[test]
    fn test_invert_roundtrip_point() {
        let m = Similarity { a: 0.8, b: 0.3, tx: 12.0, ty: -4.0 };
        let inv = m.invert().unwrap();
        let p = (37.0, 91.0);
        let q = inv.apply(m.apply(p));
        assert!((q.0 - p.0).abs() < 1e-3 && (q.1 - p.1).abs() < 1e-3, "{q:?}");
    }

    #[test]
    fn test_input_and_output_scaling() {
        let m = Similarity { a: 0.5, b: 0.25, tx: 3.0, ty: 1.0 };
        let p = (10.0, 20.0);
        let q = m.with_input_scale(2.0).apply((p.0 * 2.0, p.1 * 2.0));
        let r = m.apply(p);
        assert!((q.0 - r.0).abs() < 1e-4 && (q.1 - r.1).abs() < 1e-4);

        let s = m.scaled(4.0).apply(p);
        assert!((s.0 - r.0 * 4.0).abs() < 1e-4 && (s.1 - r.1 * 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_invert_degenerate() {
        let m = Similarity { a: 0.0, b: 0.0, tx: 1.0, ty: 1.0 };
        assert!(m.invert().is_none());
    }

    #[test]
    fn test_arcface_template_sizes() {
        assert_eq!(arcface_template(112), ARCFACE_TEMPLATE_112);
        let t128 = arcface_template(128);
        assert!((t128[0].0 - (ARCFACE_TEMPLATE_112[0].0 + 8.0)).abs() < 1e-4);
        assert!((t128[0].1 - ARCFACE_TEMPLATE_112[0].1).abs() < 1e-4);
        let t224 = arcface_template(224);
        assert!((t224[2].0 - ARCFACE_TEMPLATE_112[2].0 * 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let (crop, _) = align_face(&frame, &ARCFACE_TEMPLATE_112, &arcface_template(128), 128);
        assert_eq!(crop.dimensions(), (128, 128));
    }

    #[test]
    fn test_warp_identity_copies_pixels() {
        let frame = RgbImage::from_fn(32, 32, |x, y| Rgb([x as u8, y as u8, 7]));
        let crop = warp_crop(&frame, &Similarity::identity(), 16);
        assert_eq!(crop.get_pixel(5, 9).0, [5, 9, 7]);
    }

    #[test]
    fn test_landmark_lands_on_template() {
        // A bright patch at the source left eye ends up near the template's left eye.
        let mut frame = RgbImage::new(200, 200);
        let src: Landmarks = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for dy in 0..5 {
            for dx in 0..5 {
                frame.put_pixel(78 + dx, 58 + dy, Rgb([255, 255, 255]));
            }
        }

        let (crop, _) = align_face(&frame, &src, &ARCFACE_TEMPLATE_112, 112);
        let (rx, ry) = (
            ARCFACE_TEMPLATE_112[0].0.round() as u32,
            ARCFACE_TEMPLATE_112[0].1.round() as u32,
        );
        let mut max_val = 0u8;
        for y in ry - 1..=ry + 1 {
            for x in rx - 1..=rx + 1 {
                max_val = max_val.max(crop.get_pixel(x, y).0[0]);
            }
        }
        assert!(max_val > 100, "expected bright patch near ({rx}, {ry}), max={max_val}");
    }

    #[test]
    fn test_paste_back_only_touches_face_region() {
        let mut canvas = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
        let crop = RgbImage::from_pixel(20, 20, Rgb([200, 200, 200]));
        // Canvas → crop: shift by (-40, -40), crop covers canvas 40..60.
        let to_crop = Similarity { a: 1.0, b: 0.0, tx: -40.0, ty: -40.0 };

        paste_back(&mut canvas, &crop, &to_crop, 0.1);

        assert_eq!(canvas.get_pixel(10, 10).0, [0, 0, 0]);
        assert_eq!(canvas.get_pixel(80, 50).0, [0, 0, 0]);
        assert_eq!(canvas.get_pixel(50, 50).0, [200, 200, 200]);
        // Feathered edge sits between the two.
        let edge = canvas.get_pixel(40, 50).0[0];
        assert!(edge < 200, "edge = {edge}");
    }
}
