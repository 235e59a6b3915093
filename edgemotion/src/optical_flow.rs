//! # Dense Lucas-Kanade optical flow
//!
//! Every interior pixel gets its own motion vector, solved from the 2x2 structure tensor of
//! smoothed gradients over a 5x5 Gaussian-weighted window. Sub-pixel flow truncates to zero, so
//! the integer field only reports whole-sample motion.

use crate::convolution::{conv_h, conv_v, convolve_2d_separable};
use crate::prelude::v1::*;
use nalgebra::{Matrix2, Vector2};

/// Five-point central difference kernel.
pub const DERIVATIVE_KERNEL: [f32; 5] = [-1.0 / 12.0, 8.0 / 12.0, 0.0, -8.0 / 12.0, 1.0 / 12.0];

/// Separable binomial approximation of a Gaussian.
pub const SMOOTHING_KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Default lower bound on the smaller structure tensor eigenvalue.
pub const DEFAULT_NOISE_THRESHOLD: f32 = 0.01;

const WINDOW: usize = 5;
const HALF_WINDOW: usize = WINDOW / 2;

/// Smoothed spatial and temporal derivatives of a frame pair.
struct Gradients {
    ix: FloatPlane,
    iy: FloatPlane,
    it: FloatPlane,
}

impl Gradients {
    fn compute(previous: &GrayPlane, current: &GrayPlane) -> Result<Self> {
        previous.check_same_dim(current)?;
        let (w, h) = previous.dim();

        let prev = previous.to_float()?;
        let mut diff = current.to_float()?;
        for (d, &p) in diff.as_mut_slice().iter_mut().zip(prev.as_slice()) {
            *d -= p;
        }

        let mut dx = FloatPlane::try_new(w, h)?;
        let mut dy = FloatPlane::try_new(w, h)?;
        conv_h(&prev, &mut dx, &DERIVATIVE_KERNEL)?;
        conv_v(&prev, &mut dy, &DERIVATIVE_KERNEL)?;

        // The input plane doubles as output of the first smoothing pass.
        let mut ix = prev;
        let mut iy = FloatPlane::try_new(w, h)?;
        let mut it = FloatPlane::try_new(w, h)?;
        convolve_2d_separable(&dx, &mut ix, &SMOOTHING_KERNEL, &SMOOTHING_KERNEL)?;
        convolve_2d_separable(&dy, &mut iy, &SMOOTHING_KERNEL, &SMOOTHING_KERNEL)?;
        convolve_2d_separable(&diff, &mut it, &SMOOTHING_KERNEL, &SMOOTHING_KERNEL)?;

        Ok(Self { ix, iy, it })
    }
}

/// Dense Lucas-Kanade estimator.
#[derive(Clone, Debug)]
pub struct LucasKanade {
    noise_threshold: f32,
    weights: [[f32; WINDOW]; WINDOW],
}

impl Default for LucasKanade {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_THRESHOLD)
    }
}

impl LucasKanade {
    /// Create a new estimator.
    ///
    /// # Arguments
    ///
    /// * `noise_threshold` - pixels whose smaller tensor eigenvalue is below this keep zero
    /// motion.
    pub fn new(noise_threshold: f32) -> Self {
        let mut weights = [[0f32; WINDOW]; WINDOW];
        for (i, row) in weights.iter_mut().enumerate() {
            for (j, w) in row.iter_mut().enumerate() {
                *w = SMOOTHING_KERNEL[i] * SMOOTHING_KERNEL[j];
            }
        }

        Self {
            noise_threshold,
            weights,
        }
    }

    /// Solve the flow at interior pixel `(x, y)`.
    ///
    /// Returns `None` when the structure tensor is too weak to trust.
    fn solve(&self, g: &Gradients, x: usize, y: usize) -> Option<Vector2<f32>> {
        let mut tensor = Matrix2::<f32>::zeros();
        let mut atb = Vector2::<f32>::zeros();

        for (wy, row) in self.weights.iter().enumerate() {
            let sy = y + wy - HALF_WINDOW;
            let (rx, ry, rt) = (g.ix.row(sy), g.iy.row(sy), g.it.row(sy));

            for (wx, &w) in row.iter().enumerate() {
                let sx = x + wx - HALF_WINDOW;
                // Gradients are weighted before the products, giving W² per term.
                let (ix, iy, it) = (rx[sx] * w, ry[sx] * w, rt[sx] * w);

                tensor[(0, 0)] += ix * ix;
                tensor[(0, 1)] += ix * iy;
                tensor[(1, 1)] += iy * iy;
                atb[0] -= ix * it;
                atb[1] -= iy * it;
            }
        }

        let (a, b, c) = (tensor[(0, 0)], tensor[(0, 1)], tensor[(1, 1)]);
        let min_eigenvalue = ((a + c) - (2.0 * b).hypot(a - c)) * 0.5;

        if min_eigenvalue < self.noise_threshold {
            return None;
        }

        let det = a * c - b * b;
        if det == 0.0 {
            return None;
        }

        // Cramer's rule on the symmetric tensor.
        let adjugate = Matrix2::new(c, -b, -b, a);
        Some(adjugate * atb / det)
    }

    /// Run `f` for every interior pixel that produced a usable flow vector.
    fn for_each_flow(
        &self,
        previous: &GrayPlane,
        current: &GrayPlane,
        mut f: impl FnMut(usize, usize, Vector2<f32>),
    ) -> Result<()> {
        let g = Gradients::compute(previous, current)?;
        let (w, h) = previous.dim();

        if w <= 2 * HALF_WINDOW || h <= 2 * HALF_WINDOW {
            return Ok(());
        }

        for y in HALF_WINDOW..h - HALF_WINDOW {
            for x in HALF_WINDOW..w - HALF_WINDOW {
                if let Some(v) = self.solve(&g, x, y) {
                    f(x, y, v);
                }
            }
        }

        Ok(())
    }

    /// Compute per-pixel motion into `field`.
    ///
    /// Vectors are truncated toward zero and saturated to `i16`. Border pixels and
    /// pixels failing the eigenvalue test hold zero motion.
    pub fn compute(
        &self,
        previous: &GrayPlane,
        current: &GrayPlane,
        field: &mut MotionField,
    ) -> Result<()> {
        if field.dim() != previous.dim() {
            return Err(Error::Dimension {
                expected: previous.dim(),
                found: field.dim(),
            });
        }

        field.clear();

        self.for_each_flow(previous, current, |x, y, v| {
            field.set(x, y, MotionVector::new(v.x.trunc() as i16, v.y.trunc() as i16));
        })
    }

    /// Compute an 8-bit image of per-pixel squared flow magnitude.
    ///
    /// Magnitudes are scaled so that the largest one in the frame maps to 255. A frame with no
    /// motion at all yields an all-zero image.
    pub fn magnitude_image(&self, previous: &GrayPlane, current: &GrayPlane) -> Result<GrayPlane> {
        let (w, h) = previous.dim();
        let mut magnitudes = FloatPlane::try_new(w, h)?;
        let mut max = 0f32;

        self.for_each_flow(previous, current, |x, y, v| {
            let mag = v.norm_squared();
            max = max.max(mag);
            magnitudes.set(x, y, mag);
        })?;

        let mut out = GrayPlane::try_new(w, h)?;

        if max > 0.0 {
            for (o, &m) in out.as_mut_slice().iter_mut().zip(magnitudes.as_slice()) {
                *o = (m * 255.0 / max) as u8;
            }
        }

        Ok(out)
    }
}

impl Estimator for LucasKanade {
    fn name(&self) -> &'static str {
        "lucas-kanade"
    }

    fn generations(&self) -> usize {
        1
    }

    fn field_dim(&self, width: usize, height: usize) -> (usize, usize) {
        (width, height)
    }

    fn estimate(
        &mut self,
        previous: &GrayPlane,
        current: &GrayPlane,
        history: &mut VectorHistory,
    ) -> Result<()> {
        let (field, _) = history
            .split_mut()
            .ok_or_else(|| Error::Configuration("motion vector history is empty".into()))?;

        self.compute(previous, current, field)?;

        log::trace!(
            "lucas-kanade: max magnitude {}",
            field.max_magnitude_squared()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(x: f32, y: f32) -> u8 {
        (128.0 + 60.0 * (x / 4.0).sin() + 60.0 * (y / 5.0).sin()).round() as u8
    }

    fn shifted_pair(w: usize, h: usize) -> (GrayPlane, GrayPlane) {
        let prev = GrayPlane::from_fn(w, h, |x, y| texture(x as f32, y as f32)).unwrap();
        let cur = GrayPlane::from_fn(w, h, |x, y| texture(x as f32 - 1.0, y as f32)).unwrap();
        (prev, cur)
    }

    #[test]
    fn window_weights_sum_to_one() {
        let lk = LucasKanade::default();
        let sum: f32 = lk.weights.iter().flatten().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(lk.weights[2][2], 36.0 / 256.0);
    }

    #[test]
    fn identical_frames_have_no_motion() {
        let (prev, _) = shifted_pair(32, 24);
        let mut field = MotionField::try_new(32, 24).unwrap();
        LucasKanade::default()
            .compute(&prev, &prev, &mut field)
            .unwrap();
        assert!(field.as_slice().iter().all(MotionVector::is_zero));
    }

    #[test]
    fn flat_frames_fail_eigenvalue_gate() {
        let a = GrayPlane::from_fn(20, 20, |_, _| 50).unwrap();
        let b = GrayPlane::from_fn(20, 20, |_, _| 90).unwrap();
        let mut field = MotionField::try_new(20, 20).unwrap();
        LucasKanade::default().compute(&a, &b, &mut field).unwrap();

        // Truncated kernels produce gradients near the border, the middle stays flat.
        for y in 6..14 {
            for x in 6..14 {
                assert!(field.get(x, y).is_zero());
            }
        }
    }

    #[test]
    fn recovers_horizontal_shift() {
        let (w, h) = (48, 40);
        let (prev, cur) = shifted_pair(w, h);
        let mut field = MotionField::try_new(w, h).unwrap();
        LucasKanade::default().compute(&prev, &cur, &mut field).unwrap();

        let mut total = 0;
        let mut matching = 0;
        for y in 8..h - 8 {
            for x in 8..w - 8 {
                let v = field.get(x, y);
                total += 1;
                // Estimates just under one sample truncate to zero, none overshoot.
                assert!(v.dy == 0 && (v.dx == 0 || v.dx == 1), "{x},{y}: {v:?}");
                if v.dx == 1 {
                    matching += 1;
                }
            }
        }

        assert!(matching * 3 > total, "{matching} of {total}");

        // Border pixels are never solved.
        for x in 0..w {
            assert!(field.get(x, 0).is_zero());
            assert!(field.get(x, h - 1).is_zero());
        }
    }

    #[test]
    fn sensor_noise_on_static_scene_is_still() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let (prev, _) = shifted_pair(32, 24);
        let cur =
            GrayPlane::from_fn(32, 24, |x, y| prev.get(x, y) + rng.gen_range(0..=3u8)).unwrap();

        let mut field = MotionField::try_new(32, 24).unwrap();
        LucasKanade::default().compute(&prev, &cur, &mut field).unwrap();
        assert!(field.as_slice().iter().all(MotionVector::is_zero));
    }

    #[test]
    fn noise_on_flat_scene_is_gated() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let prev = GrayPlane::from_fn(32, 24, |_, _| 100 + rng.gen_range(0..=3u8)).unwrap();
        let cur = GrayPlane::from_fn(32, 24, |_, _| 100 + rng.gen_range(0..=3u8)).unwrap();

        let mut field = MotionField::try_new(32, 24).unwrap();
        LucasKanade::default().compute(&prev, &cur, &mut field).unwrap();

        let moving = field.as_slice().iter().filter(|v| !v.is_zero()).count();
        let solved = (32 - 4) * (24 - 4);
        assert!(moving * 20 < solved, "{moving} of {solved}");
    }

    #[test]
    fn magnitude_image_is_normalised() {
        let (prev, cur) = shifted_pair(48, 40);
        let lk = LucasKanade::default();

        let img = lk.magnitude_image(&prev, &cur).unwrap();
        assert_eq!(img.as_slice().iter().copied().max(), Some(255));

        let still = lk.magnitude_image(&prev, &prev).unwrap();
        assert!(still.as_slice().iter().all(|&v| v == 0));
    }

    #[test]
    fn rejects_mismatched_field() {
        let (prev, cur) = shifted_pair(16, 16);
        let mut field = MotionField::try_new(8, 8).unwrap();
        assert!(matches!(
            LucasKanade::default().compute(&prev, &cur, &mut field),
            Err(Error::Dimension { .. })
        ));
    }
}
