//! # Enhanced Predictive Zonal Search
//!
//! Predictive block matching. Each macroblock starts from the median of its already computed
//! spatial neighbours, then tries two predictor sets gathered from the current and previous
//! frames, and finally refines the best position with a unit diamond until it settles.

use super::{check_planes, BlockCost, BlockGeometry};
use crate::prelude::v1::*;

/// Default cost below which a candidate is accepted without further search.
pub const DEFAULT_EARLY_EXIT: u32 = 256;

/// Maximum number of predictors gathered into a single set.
const PREDICTOR_CAPACITY: usize = 10;

const DIAMOND: [(isize, isize); 4] = [(-1, 0), (0, -1), (1, 0), (0, 1)];

/// Fixed capacity list of candidate offsets.
#[derive(Clone, Copy, Debug, Default)]
struct Predictors {
    mvs: [(isize, isize); PREDICTOR_CAPACITY],
    len: usize,
}

impl Predictors {
    fn clear(&mut self) {
        self.len = 0;
    }

    fn push(&mut self, mv: (isize, isize)) {
        if self.len < PREDICTOR_CAPACITY {
            self.mvs[self.len] = mv;
            self.len += 1;
        }
    }

    fn push_vector(&mut self, v: MotionVector) {
        self.push((v.dx as isize, v.dy as isize));
    }

    fn as_slice(&self) -> &[(isize, isize)] {
        &self.mvs[..self.len]
    }
}

/// Median of three values.
fn mid_pred(a: isize, b: isize, c: isize) -> isize {
    a.max(b).min(a.min(b).max(c))
}

/// Running minimum of a single macroblock search.
struct Best {
    pos: (isize, isize),
    cost: u32,
}

impl Best {
    /// Evaluate `(x, y)` and keep it if strictly cheaper than the current best.
    fn probe(&mut self, cost: &BlockCost, x: isize, y: isize) {
        if let Some(c) = cost.at(x, y) {
            if c < self.cost {
                self.cost = c;
                self.pos = (x, y);
            }
        }
    }
}

/// EPZS block matching estimator.
pub struct Epzs {
    geometry: BlockGeometry,
    search_radius: usize,
    early_exit: u32,
    preds: [Predictors; 2],
}

impl Epzs {
    /// Create a new EPZS estimator.
    ///
    /// # Arguments
    ///
    /// * `geometry` - macroblock grid of the planes that will be compared.
    /// * `search_radius` - maximum displacement searched on each axis.
    /// * `early_exit` - cost below which a predictor is accepted immediately.
    pub fn new(geometry: BlockGeometry, search_radius: usize, early_exit: u32) -> Self {
        Self {
            geometry,
            search_radius,
            early_exit,
            preds: Default::default(),
        }
    }

    pub fn geometry(&self) -> &BlockGeometry {
        &self.geometry
    }

    /// Gather both predictor sets for block `(bx, by)` and return the median predictor.
    fn gather(
        &mut self,
        bx: usize,
        by: usize,
        current: &MotionField,
        previous: Option<&MotionField>,
        older: Option<&MotionField>,
    ) -> (isize, isize) {
        let (bw, bh) = (self.geometry.blocks_x, self.geometry.blocks_y);
        let [set_a, set_b] = &mut self.preds;
        set_a.clear();
        set_b.clear();

        set_a.push((0, 0));
        if bx > 0 {
            set_a.push_vector(current.get(bx - 1, by));
        }
        if by > 0 {
            set_a.push_vector(current.get(bx, by - 1));
        }
        if by > 0 && bx + 1 < bw {
            set_a.push_vector(current.get(bx + 1, by - 1));
        }

        let n = set_a.as_slice();
        let pred = match n.len() {
            4 => (mid_pred(n[1].0, n[2].0, n[3].0), mid_pred(n[1].1, n[2].1, n[3].1)),
            3 => (mid_pred(0, n[1].0, n[2].0), mid_pred(0, n[1].1, n[2].1)),
            2 => n[1],
            _ => (0, 0),
        };

        if let Some(prev) = previous {
            let col = prev.get(bx, by);
            set_a.push_vector(col);

            let old = older.map(|o| o.get(bx, by)).unwrap_or_default();
            set_b.push((
                2 * col.dx as isize - old.dx as isize,
                2 * col.dy as isize - old.dy as isize,
            ));

            if bx > 0 {
                set_b.push_vector(prev.get(bx - 1, by));
            }
            if by > 0 {
                set_b.push_vector(prev.get(bx, by - 1));
            }
            if bx + 1 < bw {
                set_b.push_vector(prev.get(bx + 1, by));
            }
            if by + 1 < bh {
                set_b.push_vector(prev.get(bx, by + 1));
            }
        }

        pred
    }

    /// Search a single macroblock, returning the best absolute position.
    fn search(&self, cost: &BlockCost, pred: (isize, isize)) -> (isize, isize) {
        let (ox, oy) = cost.origin;
        let mut best = Best {
            pos: cost.origin,
            cost: u32::MAX,
        };

        best.probe(cost, ox + pred.0, oy + pred.1);
        if best.cost < self.early_exit {
            return best.pos;
        }

        for set in &self.preds {
            for &(dx, dy) in set.as_slice() {
                best.probe(cost, ox + dx, oy + dy);
            }
            if best.cost < self.early_exit {
                return best.pos;
            }
        }

        loop {
            let (x, y) = best.pos;
            for (dx, dy) in DIAMOND {
                best.probe(cost, x + dx, y + dy);
            }
            if best.pos == (x, y) {
                break;
            }
        }

        best.pos
    }
}

impl Estimator for Epzs {
    fn name(&self) -> &'static str {
        "epzs"
    }

    fn generations(&self) -> usize {
        3
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

        let (field, older) = history
            .split_mut()
            .ok_or_else(|| Error::Configuration("motion vector history is empty".into()))?;

        for by in 0..self.geometry.blocks_y {
            for bx in 0..self.geometry.blocks_x {
                let pred = self.gather(bx, by, field, older.get(0), older.get(1));

                let cost = BlockCost {
                    previous,
                    current,
                    origin: self.geometry.origin(bx, by),
                    window: self.geometry.window(bx, by, self.search_radius),
                    mb_size: self.geometry.mb_size,
                };

                let (x, y) = self.search(&cost, pred);
                field.set(bx, by, cost.vector(x, y));
            }
        }

        log::trace!(
            "epzs: {} blocks, max magnitude {}",
            field.len(),
            field.max_magnitude_squared()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_matching::tests::{interior_blocks, textured_pair, translated_pair};

    fn run(prev: &GrayPlane, cur: &GrayPlane, radius: usize) -> VectorHistory {
        let (w, h) = prev.dim();
        let geometry = BlockGeometry::new(w, h, 8).unwrap();
        let mut epzs = Epzs::new(geometry, radius, DEFAULT_EARLY_EXIT);
        let (fw, fh) = epzs.field_dim(w, h);
        let mut history = VectorHistory::try_new(epzs.generations(), fw, fh).unwrap();
        history.rotate();
        epzs.estimate(prev, cur, &mut history).unwrap();
        history
    }

    #[test]
    fn median_of_three() {
        assert_eq!(mid_pred(1, 2, 3), 2);
        assert_eq!(mid_pred(3, 1, 2), 2);
        assert_eq!(mid_pred(2, 3, 1), 2);
        assert_eq!(mid_pred(0, -4, 4), 0);
        assert_eq!(mid_pred(5, 5, -1), 5);
    }

    #[test]
    fn predictor_capacity() {
        let mut p = Predictors::default();
        for i in 0..12 {
            p.push((i, i));
        }
        assert_eq!(p.as_slice().len(), PREDICTOR_CAPACITY);
    }

    #[test]
    fn identical_frames_have_no_motion() {
        let (prev, _) = translated_pair(48, 32, 0, 0);
        let history = run(&prev, &prev, 4);
        let field = history.current().unwrap();
        assert!(field.as_slice().iter().all(MotionVector::is_zero));
        assert_eq!(field.total_displacement(), 0);
    }

    #[test]
    fn recovers_translation() {
        let (prev, cur) = translated_pair(48, 32, 2, 1);
        let history = run(&prev, &cur, 2);
        let field = history.current().unwrap();

        for by in 1..=2 {
            for bx in 1..=4 {
                assert_eq!(field.get(bx, by), MotionVector::new(2, 1), "block {bx},{by}");
            }
        }
    }

    #[test]
    fn recovers_textured_translation() {
        let geometry = BlockGeometry::new(96, 72, 8).unwrap();

        for (dx, dy, radius) in [(3, 2, 4), (-3, 1, 4), (2, -2, 6), (1, 3, 5)] {
            let (prev, cur) = textured_pair(96, 72, dx, dy);
            let history = run(&prev, &cur, radius);
            let field = history.current().unwrap();

            for (bx, by) in interior_blocks(&geometry) {
                assert_eq!(
                    field.get(bx, by),
                    MotionVector::new(dx as i16, dy as i16),
                    "shift {dx},{dy} block {bx},{by}"
                );
            }
        }
    }

    #[test]
    fn rejects_wrong_planes() {
        let (prev, _) = translated_pair(48, 32, 0, 0);
        let other = GrayPlane::try_new(40, 32).unwrap();
        let geometry = BlockGeometry::new(48, 32, 8).unwrap();
        let mut epzs = Epzs::new(geometry, 4, DEFAULT_EARLY_EXIT);
        let mut history = VectorHistory::try_new(3, 6, 4).unwrap();
        assert!(matches!(
            epzs.estimate(&prev, &other, &mut history),
            Err(Error::Dimension { .. })
        ));
    }
}
