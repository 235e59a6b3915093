//! # Hysteresis debouncing
//!
//! Turns a noisy per-frame condition into a stable flag. The flag is raised only after a run of
//! consecutive active samples, and dropped on the first inactive one.

/// Run-length debouncer.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct Debouncer {
    run_length: u32,
    run_count: u32,
    stable: bool,
}

impl Debouncer {
    /// Create a new debouncer.
    ///
    /// # Arguments
    ///
    /// * `run_length` - consecutive active samples needed to raise the flag.
    pub fn new(run_length: u32) -> Self {
        Self {
            run_length,
            run_count: 0,
            stable: false,
        }
    }

    /// Feed a raw sample and return the stable flag.
    pub fn update(&mut self, active: bool) -> bool {
        if active {
            if !self.stable {
                self.run_count = self.run_count.saturating_add(1);
                if self.run_count >= self.run_length {
                    self.stable = true;
                }
            }
        } else {
            self.run_count = 0;
            self.stable = false;
        }

        self.stable
    }

    /// Override the stable flag with one held by the caller.
    ///
    /// Changing the flag restarts the run count.
    pub fn set_stable(&mut self, stable: bool) {
        if self.stable != stable {
            self.stable = stable;
            self.run_count = 0;
        }
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    /// Length of the current active run.
    pub fn run_count(&self) -> u32 {
        self.run_count
    }

    pub fn run_length(&self) -> u32 {
        self.run_length
    }

    pub fn reset(&mut self) {
        self.run_count = 0;
        self.stable = false;
    }
}

/// Day and night switch driven by ambient light level.
///
/// Darkness must persist for a run of samples before night is reported, while any sample
/// brighter than the threshold switches back to day at once. A sample exactly at the threshold
/// leaves the state unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct NightDetector {
    threshold: u8,
    debouncer: Debouncer,
}

impl NightDetector {
    /// Create a new night detector.
    ///
    /// # Arguments
    ///
    /// * `threshold` - light level below which a sample is dark.
    /// * `run_length` - consecutive dark samples needed to switch to night.
    pub fn new(threshold: u8, run_length: u32) -> Self {
        Self {
            threshold,
            debouncer: Debouncer::new(run_length),
        }
    }

    /// Feed an ambient light sample and return whether it is night.
    pub fn update(&mut self, light_level: u8) -> bool {
        use std::cmp::Ordering::*;

        match light_level.cmp(&self.threshold) {
            Less => self.debouncer.update(true),
            Greater => self.debouncer.update(false),
            Equal => self.debouncer.is_stable(),
        }
    }

    pub fn set_stable(&mut self, night: bool) {
        self.debouncer.set_stable(night);
    }

    pub fn is_night(&self) -> bool {
        self.debouncer.is_stable()
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_run_never_fires() {
        let mut d = Debouncer::new(5);
        for _ in 0..4 {
            assert!(!d.update(true));
        }
        assert!(!d.update(false));
        for _ in 0..4 {
            assert!(!d.update(true));
        }
        assert!(!d.is_stable());
    }

    #[test]
    fn fires_on_nth_sample() {
        let mut d = Debouncer::new(5);
        for i in 1..=5 {
            assert_eq!(d.update(true), i == 5);
        }
        assert!(d.update(true));
        assert!(!d.update(false));
        assert_eq!(d.run_count(), 0);
    }

    #[test]
    fn count_frozen_while_stable() {
        let mut d = Debouncer::new(2);
        d.update(true);
        d.update(true);
        d.update(true);
        d.update(true);
        assert_eq!(d.run_count(), 2);
    }

    #[test]
    fn external_flag() {
        let mut d = Debouncer::new(3);
        d.update(true);
        d.update(true);
        d.set_stable(true);
        assert_eq!(d.run_count(), 0);
        assert!(d.update(true));
        d.set_stable(false);
        assert!(!d.update(true));
    }

    #[test]
    fn night_is_slow_day_is_fast() {
        let mut n = NightDetector::new(20, 10);
        for _ in 0..9 {
            assert!(!n.update(5));
        }
        // At the threshold nothing changes.
        assert!(!n.update(20));
        assert!(n.update(5));
        assert!(n.update(20));
        assert!(!n.update(21));
    }

    #[test]
    fn bright_sample_restarts_darkness_run() {
        let mut n = NightDetector::new(20, 3);
        n.update(0);
        n.update(0);
        n.update(100);
        n.update(0);
        assert!(!n.update(0));
        assert!(n.update(0));
    }
}
