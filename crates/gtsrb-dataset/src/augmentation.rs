//! Randomized geometric and photometric transforms for `(H, W, 3)` images.
//!
//! Rotation, translation and zoom are affine warps sharing [`warp_affine`]:
//! inverse mapping, bilinear sampling and replicated borders, so no black
//! corners appear. Every op keeps the shape and element type of its input
//! and returns the input unchanged when its range is degenerate.

use gtsrb_core::{AugmentationConfig, Pixel, ZoomRange};
use ndarray::{Array3, ArrayView3};
use rand::Rng;

/// Forward 2x3 affine matrix mapping source to destination coordinates
pub type AffineMatrix = [[f32; 3]; 2];

/// Rotation by `angle_deg` (counter-clockwise) and uniform `scale` about `center`.
pub fn rotation_matrix(center: (f32, f32), angle_deg: f32, scale: f32) -> AffineMatrix {
    let (cx, cy) = center;
    let theta = angle_deg.to_radians();
    let alpha = scale * theta.cos();
    let beta = scale * theta.sin();
    [
        [alpha, beta, (1.0 - alpha) * cx - beta * cy],
        [-beta, alpha, beta * cx + (1.0 - alpha) * cy],
    ]
}

/// Inverse of an affine matrix, `None` if singular
pub fn invert_affine(m: &AffineMatrix) -> Option<AffineMatrix> {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if det.abs() < f32::EPSILON {
        return None;
    }
    let a = m[1][1] / det;
    let b = -m[0][1] / det;
    let c = -m[1][0] / det;
    let d = m[0][0] / det;
    Some([
        [a, b, -(a * m[0][2] + b * m[1][2])],
        [c, d, -(c * m[0][2] + d * m[1][2])],
    ])
}

/// Image center in pixel coordinates, `(W / 2, H / 2)`
fn center_of<P: Pixel>(image: &ArrayView3<'_, P>) -> (f32, f32) {
    let (h, w, _) = image.dim();
    (w as f32 / 2.0, h as f32 / 2.0)
}

/// Warps an image with a forward affine matrix.
///
/// Each destination pixel is sampled bilinearly at the inverse-mapped
/// source position. Positions outside the image are clamped to the nearest
/// edge pixel.
pub fn warp_affine<P: Pixel>(image: ArrayView3<'_, P>, matrix: &AffineMatrix) -> Array3<P> {
    let Some(inv) = invert_affine(matrix) else {
        return image.to_owned();
    };
    let (h, w, c) = image.dim();
    if h == 0 || w == 0 {
        return image.to_owned();
    }
    let max_x = (w - 1) as f32;
    let max_y = (h - 1) as f32;

    let mut out = Array3::<P>::from_elem((h, w, c), P::default());
    for y in 0..h {
        for x in 0..w {
            let (xf, yf) = (x as f32, y as f32);
            let sx = (inv[0][0] * xf + inv[0][1] * yf + inv[0][2]).clamp(0.0, max_x);
            let sy = (inv[1][0] * xf + inv[1][1] * yf + inv[1][2]).clamp(0.0, max_y);

            let x0 = sx.floor() as usize;
            let y0 = sy.floor() as usize;
            let x1 = (x0 + 1).min(w - 1);
            let y1 = (y0 + 1).min(h - 1);
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            for ch in 0..c {
                let top = image[[y0, x0, ch]].to_f32() * (1.0 - fx) + image[[y0, x1, ch]].to_f32() * fx;
                let bottom =
                    image[[y1, x0, ch]].to_f32() * (1.0 - fx) + image[[y1, x1, ch]].to_f32() * fx;
                out[[y, x, ch]] = P::from_f32(top * (1.0 - fy) + bottom * fy);
            }
        }
    }
    out
}

/// Rotates by a fixed angle in degrees about the center
pub fn rotate_by<P: Pixel>(image: ArrayView3<'_, P>, angle_deg: f32) -> Array3<P> {
    let matrix = rotation_matrix(center_of(&image), angle_deg, 1.0);
    warp_affine(image, &matrix)
}

/// Shifts by `(dx, dy)` pixels
pub fn translate_by<P: Pixel>(image: ArrayView3<'_, P>, dx: f32, dy: f32) -> Array3<P> {
    warp_affine(image, &[[1.0, 0.0, dx], [0.0, 1.0, dy]])
}

/// Scales by `factor` about the center
pub fn zoom_by<P: Pixel>(image: ArrayView3<'_, P>, factor: f32) -> Array3<P> {
    let matrix = rotation_matrix(center_of(&image), 0.0, factor);
    warp_affine(image, &matrix)
}

/// Multiplies every value by `factor`, clipped to the pixel type's range
pub fn scale_brightness<P: Pixel>(image: ArrayView3<'_, P>, factor: f32) -> Array3<P> {
    image.mapv(|v| P::from_f32((v.to_f32() * factor).clamp(0.0, P::MAX)))
}

/// Random rotation with angle drawn from `[-max_degrees, max_degrees]`
pub fn rotate<P: Pixel, R: Rng + ?Sized>(
    image: ArrayView3<'_, P>,
    max_degrees: f32,
    rng: &mut R,
) -> Array3<P> {
    if max_degrees <= 0.0 {
        return image.to_owned();
    }
    let angle = rng.gen_range(-max_degrees..=max_degrees);
    rotate_by(image, angle)
}

/// Random shift of up to `width_shift * W` and `height_shift * H` pixels
pub fn translate<P: Pixel, R: Rng + ?Sized>(
    image: ArrayView3<'_, P>,
    width_shift: f32,
    height_shift: f32,
    rng: &mut R,
) -> Array3<P> {
    if width_shift <= 0.0 && height_shift <= 0.0 {
        return image.to_owned();
    }
    let (h, w, _) = image.dim();
    let max_dx = width_shift.max(0.0) * w as f32;
    let max_dy = height_shift.max(0.0) * h as f32;
    let dx = rng.gen_range(-max_dx..=max_dx);
    let dy = rng.gen_range(-max_dy..=max_dy);
    translate_by(image, dx, dy)
}

/// Random zoom about the center; degenerate ranges return the input
pub fn zoom<P: Pixel, R: Rng + ?Sized>(
    image: ArrayView3<'_, P>,
    range: ZoomRange,
    rng: &mut R,
) -> Array3<P> {
    let Some((min, max)) = range.bounds() else {
        return image.to_owned();
    };
    let factor = match range {
        ZoomRange::Symmetric(_) => rng.gen_range(min..=max),
        ZoomRange::Range(_, _) => rng.gen_range(min..max),
    };
    zoom_by(image, factor)
}

/// Random brightness factor drawn from `[min, max)`.
///
/// Returns the input unchanged when `min >= max` or `min < 0`.
pub fn brightness<P: Pixel, R: Rng + ?Sized>(
    image: ArrayView3<'_, P>,
    range: (f32, f32),
    rng: &mut R,
) -> Array3<P> {
    let (min, max) = range;
    if min >= max || min < 0.0 {
        return image.to_owned();
    }
    let factor = rng.gen_range(min..max);
    scale_brightness(image, factor)
}

/// Rotation, then translation, then zoom, then brightness
pub fn augment<P: Pixel, R: Rng + ?Sized>(
    image: ArrayView3<'_, P>,
    params: &AugmentationConfig,
    rng: &mut R,
) -> Array3<P> {
    let working = rotate(image, params.rotation_degrees, rng);
    let working = translate(working.view(), params.width_shift, params.height_shift, rng);
    let working = zoom(working.view(), params.zoom, rng);
    brightness(working.view(), params.brightness_range, rng)
}

/// Augmentation step bound to one set of parameters
#[derive(Debug, Clone, Copy)]
pub struct AugmentationOps {
    params: AugmentationConfig,
}

impl AugmentationOps {
    pub fn new(params: AugmentationConfig) -> Self {
        Self { params }
    }

    /// Applies [`augment`] with the bound parameters
    pub fn augment<P: Pixel, R: Rng + ?Sized>(&self, image: ArrayView3<'_, P>, rng: &mut R) -> Array3<P> {
        augment(image, &self.params, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gtsrb_core::AugmentationPresets;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// 32x32 image whose values encode their position
    fn create_test_image() -> Array3<u8> {
        Array3::from_shape_fn((32, 32, 3), |(y, x, c)| (x * 7 + y * 3 + c * 50) as u8)
    }

    #[test]
    fn test_identity_params_are_bit_identical() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let ops = AugmentationOps::new(AugmentationPresets::none());

        let image = create_test_image();
        assert_eq!(ops.augment(image.view(), &mut rng), image);

        let floats = image.mapv(|v| v as f32 / 255.0);
        assert_eq!(ops.augment(floats.view(), &mut rng), floats);
    }

    #[test]
    fn test_augment_preserves_shape() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let image = create_test_image();
        for _ in 0..5 {
            let out = augment(image.view(), &AugmentationPresets::strong(), &mut rng);
            assert_eq!(out.dim(), image.dim());
        }
    }

    #[test]
    fn test_augment_is_reproducible() {
        let image = create_test_image();
        let params = AugmentationPresets::gentle();
        let a = augment(image.view(), &params, &mut ChaCha8Rng::seed_from_u64(5));
        let b = augment(image.view(), &params, &mut ChaCha8Rng::seed_from_u64(5));
        assert_eq!(a, b);
    }

    #[test]
    fn test_translate_replicates_border() {
        let image = Array3::from_shape_fn((4, 6, 3), |(_, x, _)| (x * 10) as u8);
        let shifted = translate_by(image.view(), 1.0, 0.0);
        assert_eq!(shifted[[2, 3, 0]], 20);
        assert_eq!(shifted[[2, 0, 0]], 0);
        assert_eq!(shifted[[2, 5, 1]], 40);
    }

    #[test]
    fn test_zoom_keeps_center_fixed() {
        let image = create_test_image();
        let zoomed = zoom_by(image.view(), 2.0);
        assert_eq!(zoomed[[16, 16, 0]], image[[16, 16, 0]]);
        assert_eq!(zoomed[[16, 18, 0]], image[[16, 17, 0]]);
    }

    #[test]
    fn test_rotation_of_uniform_image_has_no_black_corners() {
        let image = Array3::<u8>::from_elem((32, 32, 3), 7);
        let rotated = rotate_by(image.view(), 30.0);
        assert!(rotated.iter().all(|&v| v == 7));
    }

    #[test]
    fn test_brightness_clips_to_range() {
        let bright = scale_brightness(Array3::<u8>::from_elem((2, 2, 3), 200).view(), 1.5);
        assert!(bright.iter().all(|&v| v == 255));

        let bright = scale_brightness(Array3::<f32>::from_elem((2, 2, 3), 0.8).view(), 1.5);
        assert!(bright.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_degenerate_ranges_are_identity() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let image = create_test_image();
        assert_eq!(brightness(image.view(), (1.1, 0.9), &mut rng), image);
        assert_eq!(brightness(image.view(), (-0.5, 1.0), &mut rng), image);
        assert_eq!(zoom(image.view(), ZoomRange::Range(1.2, 1.2), &mut rng), image);
        assert_eq!(zoom(image.view(), ZoomRange::Symmetric(0.0), &mut rng), image);
        assert_eq!(rotate(image.view(), 0.0, &mut rng), image);
        assert_eq!(translate(image.view(), 0.0, 0.0, &mut rng), image);
    }

    #[test]
    fn test_invert_affine() {
        let m = rotation_matrix((16.0, 16.0), 0.0, 2.0);
        let inv = invert_affine(&m).unwrap();
        assert_eq!(inv, [[0.5, 0.0, 8.0], [0.0, 0.5, 8.0]]);
        assert!(invert_affine(&[[0.0, 0.0, 1.0], [0.0, 0.0, 1.0]]).is_none());
    }
}
