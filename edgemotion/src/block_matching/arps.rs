//! # Adaptive Rood Pattern Search
//!
//! Step-adaptive block matching. Blocks whose collocated cost is already low are declared
//! static. The rest are searched with a rood whose arm length follows the previous block's
//! motion, then refined with a unit rood. Costs are cached per block so no point is evaluated
//! twice.

use super::{check_planes, BlockCost, BlockGeometry, SearchWindow};
use crate::plane::try_alloc;
use crate::prelude::v1::*;

const UNIT_ROOD: [(isize, isize); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

/// Default zero-motion threshold for a macroblock side: `2 * mb_size²`.
pub fn default_zero_motion_threshold(mb_size: usize) -> u32 {
    (mb_size * mb_size * 2) as u32
}

/// Per-block cache of evaluated candidate costs.
///
/// Slots cover the clipped search window of the current block, so the buffer never outgrows
/// the block-aligned part of the plane regardless of the search radius.
struct CostCache {
    costs: Vec<Option<u32>>,
    window: SearchWindow,
    stride: usize,
}

impl CostCache {
    fn new(geometry: &BlockGeometry, radius: usize) -> Result<Self> {
        let side = radius.saturating_mul(2).saturating_add(1);
        let span_x = ((geometry.blocks_x - 1) << geometry.log2_mb) + 1;
        let span_y = ((geometry.blocks_y - 1) << geometry.log2_mb) + 1;

        Ok(Self {
            costs: try_alloc(side.min(span_x) * side.min(span_y), None)?,
            window: geometry.window(0, 0, 0),
            stride: 0,
        })
    }

    /// Clear the slots used by `window`.
    fn reset(&mut self, window: SearchWindow) {
        self.window = window;
        self.stride = window.width();
        self.costs[..window.width() * window.height()].fill(None);
    }

    fn used(&self) -> &[Option<u32>] {
        &self.costs[..self.window.width() * self.window.height()]
    }

    /// Cost at absolute `(x, y)`, evaluated at most once per block.
    fn get(&mut self, cost: &BlockCost, x: isize, y: isize) -> Option<u32> {
        if !self.window.contains(x, y) {
            return None;
        }

        let (rx, ry) = (
            (x - self.window.x_min) as usize,
            (y - self.window.y_min) as usize,
        );
        let slot = &mut self.costs[ry * self.stride + rx];
        if slot.is_none() {
            *slot = cost.at(x, y);
        }
        *slot
    }
}

/// ARPS block matching estimator.
pub struct Arps {
    geometry: BlockGeometry,
    search_radius: usize,
    zero_motion_threshold: u32,
    cache: CostCache,
    points_checked: usize,
}

impl Arps {
    /// Create a new ARPS estimator.
    ///
    /// # Arguments
    ///
    /// * `geometry` - macroblock grid of the planes that will be compared.
    /// * `search_radius` - maximum displacement searched on each axis.
    /// * `zero_motion_threshold` - collocated cost below which a block is declared static.
    pub fn new(
        geometry: BlockGeometry,
        search_radius: usize,
        zero_motion_threshold: u32,
    ) -> Result<Self> {
        Ok(Self {
            geometry,
            search_radius,
            zero_motion_threshold,
            cache: CostCache::new(&geometry, search_radius)?,
            points_checked: 0,
        })
    }

    pub fn geometry(&self) -> &BlockGeometry {
        &self.geometry
    }

    /// Average number of candidates evaluated per block during the last estimation.
    pub fn average_points_checked(&self) -> f32 {
        match self.geometry.block_count() {
            0 => 0.0,
            n => self.points_checked as f32 / n as f32,
        }
    }

    /// Search a single macroblock.
    ///
    /// # Arguments
    ///
    /// * `cost` - cost evaluator of the block.
    /// * `predicted` - vector of the preceding block in raster order, `None` in the first column.
    fn search(&mut self, cost: &BlockCost, predicted: Option<MotionVector>) -> MotionVector {
        let (ox, oy) = cost.origin;
        self.cache.reset(cost.window);

        let center_cost = match self.cache.get(cost, ox, oy) {
            Some(c) => c,
            None => return MotionVector::ZERO,
        };

        if center_cost < self.zero_motion_threshold {
            return MotionVector::ZERO;
        }

        let mut candidates = [(0isize, 0isize); 5];
        let mut count = 4;

        let step = match predicted {
            None => 2,
            Some(p) => {
                let (px, py) = (p.dx as isize, p.dy as isize);
                let step = px.abs().max(py.abs());
                if !(px == 0 || py == 0) {
                    candidates[4] = (px, py);
                    count = 5;
                }
                step
            }
        };

        let mut best = (cost.origin, center_cost);

        if step > 0 {
            candidates[..4].copy_from_slice(&[(0, -step), (-step, 0), (step, 0), (0, step)]);

            for &(dx, dy) in &candidates[..count] {
                let (x, y) = (ox + dx, oy + dy);
                if let Some(c) = self.cache.get(cost, x, y) {
                    if c < best.1 {
                        best = ((x, y), c);
                    }
                }
            }
        }

        loop {
            let (x, y) = best.0;
            for (dx, dy) in UNIT_ROOD {
                if let Some(c) = self.cache.get(cost, x + dx, y + dy) {
                    if c < best.1 {
                        best = ((x + dx, y + dy), c);
                    }
                }
            }
            if best.0 == (x, y) {
                break;
            }
        }

        self.points_checked += self.cache.used().iter().filter(|c| c.is_some()).count();

        cost.vector(best.0 .0, best.0 .1)
    }
}

impl Estimator for Arps {
    fn name(&self) -> &'static str {
        "arps"
    }

    fn generations(&self) -> usize {
        1
    }

    fn field_dim(&self, _: usize, _: usize) -> (usize, usize) {
        (self.geometry.blocks_x, self.geometry.blocks_y)
    }

    fn estimate(
        &mut self,
        previous: &GrayPlane,
        current: &GrayPlane,
        history: &mut VectorHistory,
    ) -> Result<()> {
        check_planes(&self.geometry, previous, current)?;

        let expected = (self.geometry.blocks_x, self.geometry.blocks_y);
        if history.dim() != expected {
            return Err(Error::Dimension {
                expected,
                found: history.dim(),
            });
        }

        let (field, _) = history
            .split_mut()
            .ok_or_else(|| Error::Configuration("motion vector history is empty".into()))?;

        self.points_checked = 0;

        for by in 0..self.geometry.blocks_y {
            for bx in 0..self.geometry.blocks_x {
                let cost = BlockCost {
                    previous,
                    current,
                    origin: self.geometry.origin(bx, by),
                    window: self.geometry.window(bx, by, self.search_radius),
                    mb_size: self.geometry.mb_size,
                };

                let predicted = (bx > 0).then(|| field.get(bx - 1, by));
                let v = self.search(&cost, predicted);
                field.set(bx, by, v);
            }
        }

        log::trace!(
            "arps: {:.2} points per block, max magnitude {}",
            self.average_points_checked(),
            field.max_magnitude_squared()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_matching::sad;
    use crate::block_matching::tests::{interior_blocks, textured_pair, translated_pair};

    fn run(prev: &GrayPlane, cur: &GrayPlane, radius: usize) -> (Arps, MotionField) {
        let (w, h) = prev.dim();
        let geometry = BlockGeometry::new(w, h, 8).unwrap();
        let mut arps = Arps::new(geometry, radius, default_zero_motion_threshold(8)).unwrap();
        let (fw, fh) = arps.field_dim(w, h);
        let mut history = VectorHistory::try_new(arps.generations(), fw, fh).unwrap();
        arps.estimate(prev, cur, &mut history).unwrap();
        let field = history.current().unwrap().clone();
        (arps, field)
    }

    #[test]
    fn threshold_default() {
        assert_eq!(default_zero_motion_threshold(8), 128);
        assert_eq!(default_zero_motion_threshold(16), 512);
    }

    #[test]
    fn identical_frames_have_no_motion() {
        let (prev, _) = translated_pair(48, 32, 0, 0);
        let (arps, field) = run(&prev, &prev, 4);
        assert!(field.as_slice().iter().all(MotionVector::is_zero));
        // Every block is settled by the zero-motion test alone.
        assert_eq!(arps.average_points_checked(), 0.0);
    }

    #[test]
    fn recovers_translation() {
        let (prev, cur) = translated_pair(48, 32, 2, 1);
        let (_, field) = run(&prev, &cur, 2);

        for by in 1..=2 {
            for bx in 1..=4 {
                assert_eq!(field.get(bx, by), MotionVector::new(2, 1), "block {bx},{by}");
            }
        }
    }

    #[test]
    fn vectors_stay_within_radius() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let prev = GrayPlane::from_fn(48, 32, |_, _| rng.gen()).unwrap();
        let cur = GrayPlane::from_fn(48, 32, |_, _| rng.gen()).unwrap();
        let (_, field) = run(&prev, &cur, 3);

        for (bx, by, v) in field.iter() {
            assert!(v.dx.abs() <= 3 && v.dy.abs() <= 3);
            assert!(bx as isize * 8 + v.dx as isize >= 0);
            assert!(by as isize * 8 + v.dy as isize >= 0);
            assert!(bx as isize * 8 + v.dx as isize <= 40);
            assert!(by as isize * 8 + v.dy as isize <= 24);
        }
    }

    #[test]
    fn textured_translation_settles_in_local_minima() {
        let geometry = BlockGeometry::new(96, 72, 8).unwrap();

        // The greedy descent may stop in a local minimum of the texture. Shift, radius and the
        // number of blocks expected to miss.
        for (dx, dy, radius, misses) in [(3, 2, 4, 2), (-3, 1, 4, 4), (2, -2, 6, 0), (1, 3, 5, 0)] {
            let (prev, cur) = textured_pair(96, 72, dx, dy);
            let (_, field) = run(&prev, &cur, radius);
            let truth = MotionVector::new(dx as i16, dy as i16);

            let mut missed = 0;
            for (bx, by) in interior_blocks(&geometry) {
                let v = field.get(bx, by);
                if v != truth {
                    missed += 1;
                }

                let (ox, oy) = geometry.origin(bx, by);
                let window = geometry.window(bx, by, radius);
                let cost_at = |x: isize, y: isize| {
                    window.contains(x, y).then(|| {
                        sad(&cur, (ox as usize, oy as usize), &prev, (x as usize, y as usize), 8)
                    })
                };

                let (x, y) = (ox + v.dx as isize, oy + v.dy as isize);
                let found = cost_at(x, y).unwrap();
                for (ux, uy) in UNIT_ROOD {
                    if let Some(c) = cost_at(x + ux, y + uy) {
                        assert!(c >= found, "shift {dx},{dy} block {bx},{by}");
                    }
                }
            }

            assert_eq!(missed, misses, "shift {dx},{dy}");
        }
    }

    #[test]
    fn huge_radius_is_bounded_by_plane() {
        let (prev, cur) = translated_pair(48, 32, 2, 1);
        let (arps, field) = run(&prev, &cur, i16::MAX as usize);

        assert_eq!(arps.cache.costs.len(), 41 * 25);
        for (bx, by, v) in field.iter() {
            assert!(bx as isize * 8 + v.dx as isize <= 40);
            assert!(by as isize * 8 + v.dy as isize <= 24);
        }
    }
}
