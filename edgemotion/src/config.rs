//! # Detector configuration
//!
//! Camera frame geometry table and the tunables of the motion and night detectors.

use crate::block_matching::arps::default_zero_motion_threshold;
use crate::block_matching::epzs::DEFAULT_EARLY_EXIT;
use crate::error::{Error, Result};
use crate::optical_flow::DEFAULT_NOISE_THRESHOLD;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Motion estimation algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Algorithm {
    /// Enhanced predictive zonal search block matching.
    Epzs,
    /// Adaptive rood pattern search block matching.
    Arps,
    /// Dense Lucas-Kanade optical flow.
    LucasKanade,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [Algorithm::Epzs, Algorithm::Arps, Algorithm::LucasKanade];

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Epzs => "epzs",
            Algorithm::Arps => "arps",
            Algorithm::LucasKanade => "lucas-kanade",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s))
            .or_else(|| match s.to_ascii_lowercase().as_str() {
                "lk" | "lucas_kanade" | "lucaskanade" => Some(Algorithm::LucasKanade),
                _ => None,
            })
            .ok_or_else(|| Error::Configuration(format!("unknown algorithm {s}")))
    }
}

/// Camera resolution identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum FrameSize {
    Qqvga,
    Hqvga,
    Qvga,
    Cif,
    Vga,
    Svga,
    Xga,
    Sxga,
    Uxga,
}

/// Geometry and sampling parameters of a camera resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameGeometry {
    pub width: usize,
    pub height: usize,
    /// Default capture frame rate.
    pub frame_rate: u32,
    /// Decoder decimation as a power of two.
    pub scale_factor: u8,
    /// Point sampling stride applied after decoding.
    pub sample_rate: u8,
}

impl FrameGeometry {
    pub const fn new(
        width: usize,
        height: usize,
        frame_rate: u32,
        scale_factor: u8,
        sample_rate: u8,
    ) -> Self {
        Self {
            width,
            height,
            frame_rate,
            scale_factor,
            sample_rate,
        }
    }

    /// Total downsampling between the captured frame and the grayscale grid.
    pub fn downsize(&self) -> usize {
        (1usize << self.scale_factor) * self.sample_rate.max(1) as usize
    }

    /// Dimensions of the grayscale grid the detector works on.
    pub fn grid_dim(&self) -> (usize, usize) {
        let d = self.downsize();
        (self.width / d, self.height / d)
    }
}

impl FrameSize {
    pub const ALL: [FrameSize; 9] = [
        FrameSize::Qqvga,
        FrameSize::Hqvga,
        FrameSize::Qvga,
        FrameSize::Cif,
        FrameSize::Vga,
        FrameSize::Svga,
        FrameSize::Xga,
        FrameSize::Sxga,
        FrameSize::Uxga,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FrameSize::Qqvga => "QQVGA",
            FrameSize::Hqvga => "HQVGA",
            FrameSize::Qvga => "QVGA",
            FrameSize::Cif => "CIF",
            FrameSize::Vga => "VGA",
            FrameSize::Svga => "SVGA",
            FrameSize::Xga => "XGA",
            FrameSize::Sxga => "SXGA",
            FrameSize::Uxga => "UXGA",
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        match self {
            FrameSize::Qqvga => FrameGeometry::new(160, 120, 25, 0, 1),
            FrameSize::Hqvga => FrameGeometry::new(240, 176, 25, 0, 1),
            FrameSize::Qvga => FrameGeometry::new(320, 240, 25, 1, 1),
            FrameSize::Cif => FrameGeometry::new(400, 296, 25, 1, 1),
            FrameSize::Vga => FrameGeometry::new(640, 480, 15, 2, 1),
            FrameSize::Svga => FrameGeometry::new(800, 600, 15, 2, 1),
            FrameSize::Xga => FrameGeometry::new(1024, 768, 15, 3, 1),
            FrameSize::Sxga => FrameGeometry::new(1280, 1024, 15, 3, 1),
            FrameSize::Uxga => FrameGeometry::new(1600, 1200, 15, 3, 1),
        }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FrameSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Configuration(format!("unknown frame size {s}")))
    }
}

/// Configuration of a [`MotionDetector`](crate::detector::MotionDetector).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DetectorConfig {
    /// Motion estimation algorithm.
    pub algorithm: Algorithm,
    /// Requested macroblock side, rounded up to a power of two.
    pub macroblock_size: usize,
    /// Maximum block displacement searched on each axis.
    pub search_radius: usize,
    /// Motion sensitivity, higher values trigger on smaller displacements.
    pub sensitivity: i32,
    /// Light level, in percent of full scale, below which it is considered dark.
    pub night_threshold: u8,
    /// Consecutive frames with motion needed to report motion.
    pub motion_run_length: u32,
    /// Consecutive dark frames needed to report night.
    pub night_run_length: u32,
    /// EPZS cost below which a predictor is accepted without further search.
    pub early_exit_cost: u32,
    /// ARPS zero-motion threshold, derived from the macroblock size when unset.
    pub zero_motion_threshold: Option<u32>,
    /// Lucas-Kanade minimum structure tensor eigenvalue.
    pub noise_threshold: f32,
    /// Rescale grids towards the recent mean brightness before estimation.
    pub deflicker: bool,
    /// Largest grayscale grid accepted.
    pub max_grid: (usize, usize),
    /// Camera resolution the frames are captured at.
    pub frame_size: FrameSize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Epzs,
            macroblock_size: 6,
            search_radius: 9,
            sensitivity: 9,
            night_threshold: 20,
            motion_run_length: 5,
            night_run_length: 10,
            early_exit_cost: DEFAULT_EARLY_EXIT,
            zero_motion_threshold: None,
            noise_threshold: DEFAULT_NOISE_THRESHOLD,
            deflicker: false,
            max_grid: (400, 300),
            frame_size: FrameSize::Qvga,
        }
    }
}

impl DetectorConfig {
    /// Mean displacement a frame must exceed to count as motion.
    pub fn motion_threshold(&self) -> i32 {
        10 - self.sensitivity
    }

    /// ARPS zero-motion threshold for an effective macroblock side.
    pub fn zero_motion_threshold_for(&self, mb_size: usize) -> u32 {
        self.zero_motion_threshold
            .unwrap_or_else(|| default_zero_motion_threshold(mb_size))
    }

    /// Check values that can be validated without a frame.
    pub fn validate(&self) -> Result<()> {
        if self.macroblock_size == 0 {
            return Err(Error::Configuration("macroblock size is zero".into()));
        }
        if self.search_radius == 0 {
            return Err(Error::Configuration("search radius is zero".into()));
        }
        if self.search_radius > i16::MAX as usize {
            return Err(Error::Configuration(format!(
                "search radius {} too large",
                self.search_radius
            )));
        }
        if self.motion_run_length == 0 || self.night_run_length == 0 {
            return Err(Error::Configuration("run lengths must be positive".into()));
        }
        if self.max_grid.0 == 0 || self.max_grid.1 == 0 {
            return Err(Error::Configuration("maximum grid is empty".into()));
        }
        Ok(())
    }
}
