//! # Frame-to-frame motion estimator

use crate::prelude::v1::*;

/// Generic motion estimator.
///
/// Implementations compare two equally sized grayscale planes and fill the current generation of
/// a [`VectorHistory`]. Older generations are available for temporal prediction. Not all
/// estimators are stateless, thus `estimate` expects sequential frames.
pub trait Estimator {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Number of vector generations the estimator needs.
    fn generations(&self) -> usize;

    /// Dimensions of the vector grid produced for planes of given size.
    fn field_dim(&self, width: usize, height: usize) -> (usize, usize);

    /// Estimate motion from `previous` to `current`.
    ///
    /// The history has already been rotated by the caller, so its current generation is zeroed
    /// and ready to be written.
    ///
    /// # Arguments
    ///
    /// * `previous` - previous grayscale plane.
    /// * `current` - current grayscale plane.
    /// * `history` - vector generations, sized according to `field_dim` and `generations`.
    fn estimate(
        &mut self,
        previous: &GrayPlane,
        current: &GrayPlane,
        history: &mut VectorHistory,
    ) -> Result<()>;
}
