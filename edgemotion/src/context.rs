//! # Motion estimation context
//!
//! Owns the configured estimator and its motion vector generations. The context is rebuilt
//! whenever frame geometry or algorithm changes, and reused for every frame otherwise.

use crate::block_matching::arps::{default_zero_motion_threshold, Arps};
use crate::block_matching::{epzs::Epzs, BlockGeometry};
use crate::prelude::v1::*;

/// Requested context parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionContextConfig {
    pub algorithm: Algorithm,
    /// Width of the planes that will be compared.
    pub width: usize,
    /// Height of the planes that will be compared.
    pub height: usize,
    /// Requested macroblock side. Ignored by optical flow.
    pub macroblock_size: usize,
    /// Maximum displacement searched by block matching.
    pub search_radius: usize,
    pub early_exit_cost: u32,
    pub zero_motion_threshold: Option<u32>,
    pub noise_threshold: f32,
}

impl MotionContextConfig {
    /// Create a config with default tuning parameters.
    pub fn new(
        algorithm: Algorithm,
        width: usize,
        height: usize,
        macroblock_size: usize,
        search_radius: usize,
    ) -> Self {
        let defaults = DetectorConfig::default();

        Self {
            algorithm,
            width,
            height,
            macroblock_size,
            search_radius,
            early_exit_cost: defaults.early_exit_cost,
            zero_motion_threshold: defaults.zero_motion_threshold,
            noise_threshold: defaults.noise_threshold,
        }
    }

    /// Build a config for a grid of given size from detector settings.
    pub fn from_detector(config: &DetectorConfig, width: usize, height: usize) -> Self {
        Self {
            algorithm: config.algorithm,
            width,
            height,
            macroblock_size: config.macroblock_size,
            search_radius: config.search_radius,
            early_exit_cost: config.early_exit_cost,
            zero_motion_threshold: config.zero_motion_threshold,
            noise_threshold: config.noise_threshold,
        }
    }
}

/// Parameters actually in effect after initialisation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectiveConfig {
    pub algorithm: Algorithm,
    pub width: usize,
    pub height: usize,
    /// Macroblock grid, `None` for optical flow.
    pub geometry: Option<BlockGeometry>,
    pub search_radius: usize,
    /// Dimensions of every vector generation.
    pub field_dim: (usize, usize),
    /// Number of vector generations kept.
    pub generations: usize,
}

impl EffectiveConfig {
    /// Effective macroblock side, 1 for optical flow.
    pub fn macroblock_size(&self) -> usize {
        self.geometry.map(|g| g.mb_size).unwrap_or(1)
    }

    /// Number of vectors produced per frame.
    pub fn vector_count(&self) -> usize {
        self.field_dim.0 * self.field_dim.1
    }
}

struct Initialized {
    effective: EffectiveConfig,
    estimator: Box<dyn Estimator + Send>,
    history: VectorHistory,
}

/// Motion estimation state of a single frame stream.
#[derive(Default)]
pub struct MotionContext {
    state: Option<Initialized>,
}

impl MotionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the estimator and vector generations for `config`.
    ///
    /// Any previous allocation is released first. The returned configuration holds the rounded
    /// macroblock size and derived grid, `config` itself is left untouched.
    pub fn initialize(&mut self, config: &MotionContextConfig) -> Result<EffectiveConfig> {
        self.release();

        let (w, h) = (config.width, config.height);

        if w == 0 || h == 0 {
            return Err(Error::Configuration(format!("cannot estimate motion on {w}x{h}")));
        }

        let mut geometry = None;
        let estimator: Box<dyn Estimator + Send> = match config.algorithm {
            Algorithm::Epzs => {
                let g = BlockGeometry::new(w, h, config.macroblock_size)?;
                geometry = Some(g);
                Box::new(Epzs::new(g, config.search_radius, config.early_exit_cost))
            }
            Algorithm::Arps => {
                let g = BlockGeometry::new(w, h, config.macroblock_size)?;
                geometry = Some(g);
                let threshold = config
                    .zero_motion_threshold
                    .unwrap_or_else(|| default_zero_motion_threshold(g.mb_size));
                Box::new(Arps::new(g, config.search_radius, threshold)?)
            }
            Algorithm::LucasKanade => Box::new(LucasKanade::new(config.noise_threshold)),
        };

        let field_dim = estimator.field_dim(w, h);
        let generations = estimator.generations();
        let history = VectorHistory::try_new(generations, field_dim.0, field_dim.1)?;

        let effective = EffectiveConfig {
            algorithm: config.algorithm,
            width: w,
            height: h,
            geometry,
            search_radius: config.search_radius,
            field_dim,
            generations,
        };

        log::debug!(
            "initialized {} context for {w}x{h}: {}x{} vectors, {} generations",
            estimator.name(),
            field_dim.0,
            field_dim.1,
            generations
        );

        self.state = Some(Initialized {
            effective,
            estimator,
            history,
        });

        Ok(effective)
    }

    /// Free the estimator and vector generations.
    ///
    /// Calling this on a released context does nothing.
    pub fn release(&mut self) {
        if self.state.take().is_some() {
            log::trace!("released motion context");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn effective(&self) -> Option<&EffectiveConfig> {
        self.state.as_ref().map(|s| &s.effective)
    }

    /// Whether the context is set up for `algorithm` on planes of `width x height`.
    pub fn matches(&self, algorithm: Algorithm, width: usize, height: usize) -> bool {
        self.effective()
            .map(|e| e.algorithm == algorithm && e.width == width && e.height == height)
            .unwrap_or(false)
    }

    /// Vector generations, newest first.
    pub fn history(&self) -> Option<&VectorHistory> {
        self.state.as_ref().map(|s| &s.history)
    }

    /// Vectors of the most recent estimation.
    pub fn vectors(&self) -> Option<&MotionField> {
        self.history().and_then(VectorHistory::current)
    }

    /// Estimate motion between two planes with the configured algorithm.
    ///
    /// Generations are rotated before the estimator runs, so the returned field is the newest
    /// one and the previous results remain available for prediction.
    ///
    /// # Arguments
    ///
    /// * `previous` - previous grayscale plane.
    /// * `current` - current grayscale plane.
    pub fn run_motion_estimation(
        &mut self,
        previous: &GrayPlane,
        current: &GrayPlane,
    ) -> Result<&MotionField> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| Error::Configuration("motion context is not initialized".into()))?;

        let expected = (state.effective.width, state.effective.height);
        for plane in [previous, current] {
            if plane.dim() != expected {
                return Err(Error::Dimension {
                    expected,
                    found: plane.dim(),
                });
            }
        }

        state.history.rotate();
        state
            .estimator
            .estimate(previous, current, &mut state.history)?;

        state
            .history
            .current()
            .ok_or_else(|| Error::Configuration("motion vector history is empty".into()))
    }
}
