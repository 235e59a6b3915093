//! # Embedded Motion Detection Library
//!
//! This library turns a stream of camera frames into a stable "motion in progress" signal. Frames
//! are reduced to small grayscale grids, compared against the previous grid with a block matching
//! search (EPZS or ARPS) or Lucas-Kanade optical flow, and the resulting motion vectors are
//! aggregated into a single displacement metric that is debounced over several frames.
//!
//! The easiest way to use the library is to import its prelude:
//!
//! ```
//! use edgemotion::prelude::v1::*;
//! ```

pub mod block_matching;
pub mod config;
pub mod context;
pub mod convolution;
pub mod debounce;
pub mod deflicker;
pub mod detector;
pub mod error;
pub mod estimator;
pub mod grayscale;
pub mod motion_field;
pub mod optical_flow;
pub mod plane;

pub mod prelude {
    pub mod v1 {
        pub use crate::{
            block_matching::{arps::Arps, epzs::Epzs, BlockGeometry},
            config::{Algorithm, DetectorConfig, FrameGeometry, FrameSize},
            context::{EffectiveConfig, MotionContext, MotionContextConfig},
            debounce::{Debouncer, NightDetector},
            deflicker::Deflicker,
            detector::{MotionDetector, MotionReport},
            error::{Error, Result},
            estimator::Estimator,
            grayscale::{FrameDecoder, GrayscaleSampler, ScanlineSink},
            motion_field::{MotionField, MotionVector, VectorHistory},
            optical_flow::LucasKanade,
            plane::{FloatPlane, GrayPlane, Plane},
        };
    }
}
