//! # Block matching
//!
//! Shared macroblock geometry, the SAD cost metric, and the diagnostic helpers used to judge a
//! block matching result (motion compensation and PSNR).

use crate::prelude::v1::*;

pub mod arps;
pub mod epzs;

/// Derived macroblock grid of a plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct BlockGeometry {
    /// Plane width in samples.
    pub width: usize,
    /// Plane height in samples.
    pub height: usize,
    /// Macroblock side, always a power of two.
    pub mb_size: usize,
    /// `log2(mb_size)`.
    pub log2_mb: u32,
    /// Number of macroblock columns.
    pub blocks_x: usize,
    /// Number of macroblock rows.
    pub blocks_y: usize,
}

impl BlockGeometry {
    /// Derive block geometry for a plane.
    ///
    /// The requested macroblock size is rounded up to a power of two. The plane must be wider
    /// than 4 macroblocks and taller than 3 macroblocks.
    ///
    /// # Arguments
    ///
    /// * `width` - plane width.
    /// * `height` - plane height.
    /// * `mb_size` - requested macroblock side.
    pub fn new(width: usize, height: usize, mb_size: usize) -> Result<Self> {
        if mb_size == 0 {
            return Err(Error::Configuration("macroblock size is zero".into()));
        }

        let mb_size = mb_size
            .checked_next_power_of_two()
            .ok_or_else(|| Error::Configuration(format!("macroblock size {mb_size} too large")))?;
        let log2_mb = mb_size.trailing_zeros();

        if width <= mb_size.saturating_mul(4) || height <= mb_size.saturating_mul(3) {
            return Err(Error::Configuration(format!(
                "{width}x{height} plane is too small for {mb_size}px macroblocks"
            )));
        }

        Ok(Self {
            width,
            height,
            mb_size,
            log2_mb,
            blocks_x: width >> log2_mb,
            blocks_y: height >> log2_mb,
        })
    }

    /// Total number of macroblocks.
    pub fn block_count(&self) -> usize {
        self.blocks_x * self.blocks_y
    }

    /// Candidate window for the block at `(bx, by)`.
    ///
    /// The window spans `radius` samples around the block origin and is clipped so that every
    /// candidate block stays inside the block-aligned part of the plane.
    pub fn window(&self, bx: usize, by: usize, radius: usize) -> SearchWindow {
        let (ox, oy) = self.origin(bx, by);
        let r = radius as isize;
        let x_limit = ((self.blocks_x - 1) << self.log2_mb) as isize;
        let y_limit = ((self.blocks_y - 1) << self.log2_mb) as isize;

        SearchWindow {
            x_min: (ox - r).max(0),
            x_max: (ox + r).min(x_limit),
            y_min: (oy - r).max(0),
            y_max: (oy + r).min(y_limit),
        }
    }

    /// Top-left sample of the block at `(bx, by)`.
    pub fn origin(&self, bx: usize, by: usize) -> (isize, isize) {
        ((bx << self.log2_mb) as isize, (by << self.log2_mb) as isize)
    }
}

/// Inclusive range of candidate block positions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchWindow {
    pub x_min: isize,
    pub x_max: isize,
    pub y_min: isize,
    pub y_max: isize,
}

impl SearchWindow {
    pub fn contains(&self, x: isize, y: isize) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    pub fn width(&self) -> usize {
        (self.x_max - self.x_min + 1).max(0) as usize
    }

    pub fn height(&self) -> usize {
        (self.y_max - self.y_min + 1).max(0) as usize
    }
}

/// Sum of absolute differences between two square blocks.
///
/// Both blocks must lie fully inside their planes.
///
/// # Arguments
///
/// * `current` - plane holding the block being matched.
/// * `cur_pos` - top-left corner of the block in `current`.
/// * `reference` - plane searched for a match.
/// * `ref_pos` - top-left corner of the candidate in `reference`.
/// * `size` - block side.
pub fn sad(
    current: &GrayPlane,
    cur_pos: (usize, usize),
    reference: &GrayPlane,
    ref_pos: (usize, usize),
    size: usize,
) -> u32 {
    let mut sum = 0u32;

    for row in 0..size {
        let a = &current.row(cur_pos.1 + row)[cur_pos.0..cur_pos.0 + size];
        let b = &reference.row(ref_pos.1 + row)[ref_pos.0..ref_pos.0 + size];
        sum += a
            .iter()
            .zip(b)
            .map(|(&a, &b)| (a as i32 - b as i32).unsigned_abs())
            .sum::<u32>();
    }

    sum
}

/// Cost evaluator for one macroblock.
///
/// Positions are checked against the search window before the cost is computed, so callers may
/// probe freely around the current best.
pub(crate) struct BlockCost<'a> {
    pub previous: &'a GrayPlane,
    pub current: &'a GrayPlane,
    pub origin: (isize, isize),
    pub window: SearchWindow,
    pub mb_size: usize,
}

impl BlockCost<'_> {
    /// Cost of matching against `(x, y)` in the previous plane, `None` outside the window.
    pub fn at(&self, x: isize, y: isize) -> Option<u32> {
        if !self.window.contains(x, y) {
            return None;
        }

        Some(sad(
            self.current,
            (self.origin.0 as usize, self.origin.1 as usize),
            self.previous,
            (x as usize, y as usize),
            self.mb_size,
        ))
    }

    /// Motion vector pointing from the block origin to `(x, y)`.
    pub fn vector(&self, x: isize, y: isize) -> MotionVector {
        MotionVector::new((x - self.origin.0) as i16, (y - self.origin.1) as i16)
    }
}

/// Ensure both planes match the geometry the estimator was built for.
pub(crate) fn check_planes(
    geometry: &BlockGeometry,
    previous: &GrayPlane,
    current: &GrayPlane,
) -> Result<()> {
    for plane in [previous, current] {
        if plane.dim() != (geometry.width, geometry.height) {
            return Err(Error::Dimension {
                expected: (geometry.width, geometry.height),
                found: plane.dim(),
            });
        }
    }
    Ok(())
}

/// Rebuild a frame from a reference and its block motion vectors.
///
/// Every macroblock is copied from the reference at its displaced position, clamped to the
/// plane. Samples outside the block grid are copied through unchanged.
///
/// # Arguments
///
/// * `reference` - plane the vectors point into.
/// * `field` - one vector per macroblock.
/// * `mb_size` - macroblock side used to compute `field`.
pub fn motion_compensate(
    reference: &GrayPlane,
    field: &MotionField,
    mb_size: usize,
) -> Result<GrayPlane> {
    let (w, h) = reference.dim();

    if mb_size == 0 || mb_size > w || mb_size > h {
        return Err(Error::Configuration(format!(
            "cannot compensate {w}x{h} plane with {mb_size}px macroblocks"
        )));
    }

    let expected = (w / mb_size, h / mb_size);
    if field.dim() != expected {
        return Err(Error::Dimension {
            expected,
            found: field.dim(),
        });
    }

    let mut out = reference.clone();
    let max_x = (w - mb_size) as isize;
    let max_y = (h - mb_size) as isize;

    for (bx, by, v) in field.iter() {
        let (ox, oy) = (bx * mb_size, by * mb_size);
        let sx = (ox as isize + v.dx as isize).clamp(0, max_x) as usize;
        let sy = (oy as isize + v.dy as isize).clamp(0, max_y) as usize;

        for row in 0..mb_size {
            let src = &reference.row(sy + row)[sx..sx + mb_size];
            let start = (oy + row) * w + ox;
            out.as_mut_slice()[start..start + mb_size].copy_from_slice(src);
        }
    }

    Ok(out)
}

/// Peak signal to noise ratio between two planes, in decibels.
///
/// Returns infinity when the planes are identical.
///
/// # Arguments
///
/// * `original` - ground truth plane.
/// * `compensated` - approximation of `original`.
/// * `peak` - maximum sample value, 255 for 8-bit planes.
pub fn psnr(original: &GrayPlane, compensated: &GrayPlane, peak: f32) -> Result<f32> {
    original.check_same_dim(compensated)?;

    let sse: u64 = original
        .as_slice()
        .iter()
        .zip(compensated.as_slice())
        .map(|(&a, &b)| {
            let d = a as i64 - b as i64;
            (d * d) as u64
        })
        .sum();

    if sse == 0 {
        return Ok(f32::INFINITY);
    }

    let mse = sse as f64 / original.len() as f64;
    Ok((10.0 * (peak as f64 * peak as f64 / mse).log10()) as f32)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    /// Previous/current pair where the current frame is the previous one moved by `(-dx, -dy)`,
    /// so that block vectors come out as `(dx, dy)`.
    pub fn translated_pair(w: usize, h: usize, dx: usize, dy: usize) -> (GrayPlane, GrayPlane) {
        let f = |x: usize, y: usize| (x + 6 * y + 4) as u8;
        let prev = GrayPlane::from_fn(w, h, f).unwrap();
        let cur = GrayPlane::from_fn(w, h, |x, y| f(x + dx, y + dy)).unwrap();
        (prev, cur)
    }

    /// Translated pair over a sinusoid texture, which has local SAD minima away from the true
    /// match. Block vectors come out as `(dx, dy)`.
    pub fn textured_pair(w: usize, h: usize, dx: isize, dy: isize) -> (GrayPlane, GrayPlane) {
        let f = |x: isize, y: isize| {
            (128.0 + 50.0 * (x as f64 / 5.0).sin() + 50.0 * (y as f64 / 4.0).sin()) as u8
        };
        let prev = GrayPlane::from_fn(w, h, |x, y| f(x as isize, y as isize)).unwrap();
        let cur = GrayPlane::from_fn(w, h, |x, y| f(x as isize + dx, y as isize + dy)).unwrap();
        (prev, cur)
    }

    /// Macroblocks off the plane border, where every shift stays inside the search window.
    pub fn interior_blocks(geometry: &BlockGeometry) -> impl Iterator<Item = (usize, usize)> {
        let (bw, bh) = (geometry.blocks_x, geometry.blocks_y);
        (1..bh - 1).flat_map(move |by| (1..bw - 1).map(move |bx| (bx, by)))
    }

    #[test]
    fn geometry_rounds_macroblock() {
        let g = BlockGeometry::new(100, 75, 6).unwrap();
        assert_eq!(g.mb_size, 8);
        assert_eq!(g.log2_mb, 3);
        assert_eq!((g.blocks_x, g.blocks_y), (12, 9));
        assert_eq!(g.block_count(), 108);

        let g = BlockGeometry::new(100, 75, 8).unwrap();
        assert_eq!(g.mb_size, 8);
    }

    #[test]
    fn geometry_rejects_small_planes() {
        assert!(matches!(
            BlockGeometry::new(32, 75, 8),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            BlockGeometry::new(100, 24, 8),
            Err(Error::Configuration(_))
        ));
        assert!(BlockGeometry::new(33, 25, 8).is_ok());
        assert!(BlockGeometry::new(100, 75, 0).is_err());
    }

    #[test]
    fn window_is_clipped() {
        let g = BlockGeometry::new(48, 32, 8).unwrap();
        let w = g.window(0, 0, 4);
        assert_eq!((w.x_min, w.x_max, w.y_min, w.y_max), (0, 4, 0, 4));

        let w = g.window(5, 3, 4);
        assert_eq!((w.x_min, w.x_max, w.y_min, w.y_max), (36, 40, 20, 24));
        assert_eq!((w.width(), w.height()), (5, 5));
    }

    #[test]
    fn sad_of_shifted_ramp() {
        let a = GrayPlane::from_fn(16, 16, |x, _| x as u8).unwrap();
        assert_eq!(sad(&a, (0, 0), &a, (0, 0), 8), 0);
        assert_eq!(sad(&a, (0, 0), &a, (1, 0), 8), 64);
        assert_eq!(sad(&a, (2, 0), &a, (0, 3), 4), 32);
    }

    #[test]
    fn compensation_restores_translation() {
        let (prev, cur) = translated_pair(48, 32, 2, 1);
        let g = BlockGeometry::new(48, 32, 8).unwrap();
        let mut field = MotionField::try_new(g.blocks_x, g.blocks_y).unwrap();

        for by in 0..g.blocks_y {
            for bx in 0..g.blocks_x {
                field.set(bx, by, MotionVector::new(2, 1));
            }
        }

        let comp = motion_compensate(&prev, &field, 8).unwrap();
        // Blocks on the right and bottom edges are clamped, everything else is exact.
        for y in 0..24 {
            for x in 0..40 {
                assert_eq!(comp.get(x, y), cur.get(x, y));
            }
        }
    }

    #[test]
    fn psnr_values() {
        let a = GrayPlane::from_fn(8, 8, |x, y| (x * y) as u8).unwrap();
        assert_eq!(psnr(&a, &a, 255.0).unwrap(), f32::INFINITY);

        let b = GrayPlane::from_fn(8, 8, |x, y| (x * y) as u8 + 1).unwrap();
        assert_approx_eq!(psnr(&a, &b, 255.0).unwrap(), 48.1308, 1e-3);

        let c = GrayPlane::try_new(4, 8).unwrap();
        assert!(psnr(&a, &c, 255.0).is_err());
    }
}
