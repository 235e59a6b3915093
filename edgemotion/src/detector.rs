//! # Frame-to-frame motion detector
//!
//! Drives the whole pipeline for a single camera stream: decode and sample each frame into a
//! grayscale grid, estimate motion against the previous grid, aggregate the vectors into a mean
//! displacement and debounce it into a stable motion flag. A second debouncer turns the ambient
//! light level into a day and night flag.
//!
//! One detector is owned per stream. It is not meant to be shared between threads while a frame
//! is being processed.

use crate::context::MotionContextConfig;
use crate::grayscale::{centre_of_mass_shift, sample_frame};
use crate::prelude::v1::*;

/// Per-frame statistics produced by [`MotionDetector::process_frame`].
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct MotionReport {
    /// Size of the grayscale grid.
    pub grid: (usize, usize),
    /// The context was (re)initialised on this frame and no motion was computed.
    pub initialized: bool,
    /// Number of motion vectors produced.
    pub vector_count: usize,
    /// Sum of truncated vector lengths.
    pub total_displacement: u64,
    /// Integer mean vector length, the motion decision metric.
    pub mean_displacement: u32,
    pub max_magnitude_squared: u16,
    /// Light level of the sampled pixels, in percent.
    pub light_level: u8,
    /// Centre of mass shift against the previous grid, in percent.
    pub com_shift: f32,
}

/// Motion and night detector of a single frame stream.
pub struct MotionDetector {
    config: DetectorConfig,
    context: MotionContext,
    previous: Option<GrayPlane>,
    motion: Debouncer,
    night: NightDetector,
    deflicker: Deflicker,
    frame_light: Option<u8>,
    external_light: Option<u8>,
}

impl MotionDetector {
    /// Create a new detector.
    ///
    /// No buffers are allocated until the first frame arrives.
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            motion: Debouncer::new(config.motion_run_length),
            night: NightDetector::new(config.night_threshold, config.night_run_length),
            context: MotionContext::new(),
            previous: None,
            deflicker: Deflicker::new(),
            frame_light: None,
            external_light: None,
            config,
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn context(&self) -> &MotionContext {
        &self.context
    }

    /// Grid retained for comparison with the next frame.
    pub fn previous_grid(&self) -> Option<&GrayPlane> {
        self.previous.as_ref()
    }

    /// Supply an ambient light level from an external sensor, in percent.
    ///
    /// Without one the light level of the last sampled frame is used.
    pub fn set_light_level(&mut self, level: Option<u8>) {
        self.external_light = level;
    }

    /// Light level the night detector will be fed with.
    pub fn light_level(&self) -> Option<u8> {
        self.external_light.or(self.frame_light)
    }

    /// Drop all per-stream state. The next frame starts a new context.
    pub fn reset(&mut self) {
        self.context.release();
        self.previous = None;
        self.motion.reset();
        self.deflicker.reset();
        self.frame_light = None;
    }

    /// Decode a frame and estimate its motion against the previous one.
    ///
    /// The first frame, and any frame whose grid size differs from the previous one, only
    /// initialises the motion context. On failure the retained grid is left untouched.
    ///
    /// # Arguments
    ///
    /// * `frame` - compressed frame bytes.
    /// * `decoder` - decoder able to expand `frame` into scanlines.
    pub fn process_frame(
        &mut self,
        frame: &[u8],
        decoder: &mut dyn FrameDecoder,
    ) -> Result<MotionReport> {
        let geometry = self.config.frame_size.geometry();
        let (mut grid, light_level) = sample_frame(decoder, frame, &geometry)?;

        let (w, h) = grid.dim();
        let (max_w, max_h) = self.config.max_grid;
        if w > max_w || h > max_h {
            return Err(Error::Configuration(format!(
                "{w}x{h} grid exceeds the {max_w}x{max_h} limit"
            )));
        }

        if self.config.deflicker {
            self.deflicker.deflicker(&mut grid);
        }

        let mut report = MotionReport {
            grid: (w, h),
            light_level,
            ..Default::default()
        };

        let reinit = match &self.previous {
            Some(prev) => {
                prev.dim() != (w, h) || !self.context.matches(self.config.algorithm, w, h)
            }
            None => true,
        };

        match &self.previous {
            Some(previous) if !reinit => {
                let field = self.context.run_motion_estimation(previous, &grid)?;
                report.vector_count = field.len();
                report.total_displacement = field.total_displacement();
                report.mean_displacement = field.mean_displacement();
                report.max_magnitude_squared = field.max_magnitude_squared();
                report.com_shift = centre_of_mass_shift(previous, &grid)?;
            }
            _ => {
                let config = MotionContextConfig::from_detector(&self.config, w, h);
                let effective = self.context.initialize(&config)?;
                log::debug!(
                    "{} context set up for {w}x{h} grid, macroblock {}",
                    effective.algorithm,
                    effective.macroblock_size()
                );
                report.initialized = true;
            }
        }

        match &mut self.previous {
            Some(previous) if previous.dim() == grid.dim() => previous.copy_from(&grid)?,
            slot => *slot = Some(grid),
        }
        self.frame_light = Some(light_level);

        log::debug!(
            "frame {w}x{h}: mean displacement {}, max magnitude² {}, light {}%",
            report.mean_displacement,
            report.max_magnitude_squared,
            report.light_level
        );

        Ok(report)
    }

    /// Process a frame and return the debounced motion flag.
    ///
    /// Any failure is logged and leaves the flag as `previous_stable`.
    ///
    /// # Arguments
    ///
    /// * `frame` - compressed frame bytes.
    /// * `decoder` - decoder able to expand `frame` into scanlines.
    /// * `previous_stable` - flag returned for the previous frame.
    pub fn evaluate_motion(
        &mut self,
        frame: &[u8],
        decoder: &mut dyn FrameDecoder,
        previous_stable: bool,
    ) -> bool {
        match self.process_frame(frame, decoder) {
            Ok(report) => self.update_motion(&report, previous_stable),
            Err(e) => {
                log::error!("motion evaluation failed: {e}");
                previous_stable
            }
        }
    }

    /// Debounce the motion metric of an already processed frame.
    ///
    /// Frames that only initialised the context hold the flag.
    pub fn update_motion(&mut self, report: &MotionReport, previous_stable: bool) -> bool {
        self.motion.set_stable(previous_stable);

        if report.initialized {
            return previous_stable;
        }

        let active = report.mean_displacement as i64 > self.config.motion_threshold() as i64;
        let stable = self.motion.update(active);

        if stable != previous_stable {
            log::info!(
                "motion {} (mean displacement {})",
                if stable { "start" } else { "stop" },
                report.mean_displacement
            );
        }

        stable
    }

    /// Feed the current light level into the night debouncer and return the night flag.
    ///
    /// Without any light sample yet the flag is returned unchanged.
    pub fn evaluate_night(&mut self, current_stable: bool) -> bool {
        self.night.set_stable(current_stable);

        let level = match self.light_level() {
            Some(level) => level,
            None => return current_stable,
        };

        let night = self.night.update(level);

        if night != current_stable {
            log::info!(
                "switched to {} at light level {level}%",
                if night { "night" } else { "day" }
            );
        }

        night
    }
}
