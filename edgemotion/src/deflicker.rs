//! # Brightness deflicker
//!
//! Keeps a short history of frame brightness and rescales each new frame towards the recent
//! mean, cancelling sudden global illumination changes.

use crate::plane::GrayPlane;
use std::collections::VecDeque;

/// Number of brightness samples averaged.
pub const QUEUE_SIZE: usize = 10;

/// Rolling brightness equaliser.
#[derive(Clone, Debug)]
pub struct Deflicker {
    queue: VecDeque<f32>,
    observed: usize,
}

impl Default for Deflicker {
    fn default() -> Self {
        Self {
            queue: VecDeque::with_capacity(QUEUE_SIZE),
            observed: 0,
        }
    }
}

impl Deflicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a brightness sample, evicting the oldest one when full.
    ///
    /// Returns `true` once enough history exists to rescale frames. The first
    /// [`QUEUE_SIZE`] samples only fill the queue.
    pub fn observe_brightness(&mut self, brightness: f32) -> bool {
        if self.queue.len() == QUEUE_SIZE {
            self.queue.pop_front();
        }
        self.queue.push_back(brightness);
        self.observed = self.observed.saturating_add(1);

        self.is_ready()
    }

    pub fn is_ready(&self) -> bool {
        self.observed > QUEUE_SIZE
    }

    /// Ratio of the mean queued brightness to the most recent sample.
    ///
    /// Returns 1 when there is no usable recent sample.
    pub fn compute_factor(&self) -> f32 {
        let last = match self.queue.back() {
            Some(&b) if b > 0.0 => b,
            _ => return 1.0,
        };

        let mean = self.queue.iter().sum::<f32>() / self.queue.len() as f32;
        mean / last
    }

    /// Observe the brightness of `plane` and rescale it once ready.
    ///
    /// Returns whether the plane was modified. Scaled samples are truncated and clamped to the
    /// 8-bit range.
    pub fn deflicker(&mut self, plane: &mut GrayPlane) -> bool {
        if !self.observe_brightness(plane.mean()) {
            return false;
        }

        let factor = self.compute_factor();
        log::trace!("deflicker factor {factor:.3}");

        for v in plane.as_mut_slice() {
            *v = (*v as f32 * factor).clamp(0.0, 255.0) as u8;
        }

        true
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.observed = 0;
    }
}
