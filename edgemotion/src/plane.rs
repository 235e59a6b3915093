//! # Sample planes
//!
//! Row-major grids of samples passed between the pipeline stages.

use crate::error::{Error, Result};

/// Allocate a vector of `len` copies of `value`, reporting failure instead of aborting.
pub(crate) fn try_alloc<T: Clone>(len: usize, value: T) -> Result<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::Allocation { len })?;
    buf.resize(len, value);
    Ok(buf)
}

/// Fixed size row-major plane of samples.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Plane<T> {
    data: Vec<T>,
    width: usize,
    height: usize,
}

/// 8-bit grayscale plane.
pub type GrayPlane = Plane<u8>;
/// Floating point plane used as convolution scratch.
pub type FloatPlane = Plane<f32>;

impl<T: Copy + Default> Plane<T> {
    /// Allocate a new zeroed plane.
    ///
    /// # Arguments
    ///
    /// * `width` - number of samples per row.
    /// * `height` - number of rows.
    pub fn try_new(width: usize, height: usize) -> Result<Self> {
        let len = width
            .checked_mul(height)
            .ok_or_else(|| Error::Configuration(format!("plane {width}x{height} overflows")))?;

        Ok(Self {
            data: try_alloc(len, T::default())?,
            width,
            height,
        })
    }

    /// Wrap existing row-major samples.
    ///
    /// Fails if `data` does not hold exactly `width * height` samples.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Result<Self> {
        if width.checked_mul(height) != Some(data.len()) {
            return Err(Error::Dimension {
                expected: (width, height),
                found: (data.len(), 1),
            });
        }

        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Build a plane by evaluating `f(x, y)` for every sample.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Result<Self> {
        let mut plane = Self::try_new(width, height)?;
        for y in 0..height {
            for x in 0..width {
                plane.data[y * width + x] = f(x, y);
            }
        }
        Ok(plane)
    }

    /// Get the sample at given coordinates.
    pub fn get(&self, x: usize, y: usize) -> T {
        self.data[y * self.width + x]
    }

    /// Set the sample at given coordinates.
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.data[y * self.width + x] = value;
    }
}

impl<T> Plane<T> {
    /// Get width and height of the plane.
    pub fn dim(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of samples in the plane.
    ///
    /// This is the same as `width * height`
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Get a single row of samples.
    pub fn row(&self, y: usize) -> &[T] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    /// Ensure another plane has the same dimensions as this one.
    pub(crate) fn check_same_dim<U>(&self, other: &Plane<U>) -> Result<()> {
        if self.dim() != other.dim() {
            Err(Error::Dimension {
                expected: self.dim(),
                found: other.dim(),
            })
        } else {
            Ok(())
        }
    }
}

impl GrayPlane {
    /// Mean sample value of the plane.
    ///
    /// Returns 0 for an empty plane.
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.data.iter().map(|&v| v as u64).sum();
        (sum as f64 / self.data.len() as f64) as f32
    }

    /// Convert samples into a floating point plane.
    pub fn to_float(&self) -> Result<FloatPlane> {
        let mut data = try_alloc(self.data.len(), 0f32)?;
        for (o, &i) in data.iter_mut().zip(&self.data) {
            *o = i as f32;
        }
        FloatPlane::from_vec(self.width, self.height, data)
    }

    /// Copy `other` into this plane, reusing the allocation when sizes match.
    pub fn copy_from(&mut self, other: &GrayPlane) -> Result<()> {
        if self.data.len() != other.data.len() {
            self.data = try_alloc(other.data.len(), 0u8)?;
        }
        self.data.copy_from_slice(&other.data);
        self.width = other.width;
        self.height = other.height;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_checks_len() {
        assert!(GrayPlane::from_vec(3, 2, vec![0; 6]).is_ok());
        assert!(matches!(
            GrayPlane::from_vec(3, 2, vec![0; 5]),
            Err(Error::Dimension { .. })
        ));
    }

    #[test]
    fn row_major_access() {
        let plane = GrayPlane::from_fn(4, 3, |x, y| (y * 4 + x) as u8).unwrap();
        assert_eq!(plane.get(1, 2), 9);
        assert_eq!(plane.row(1), &[4, 5, 6, 7]);
    }

    #[test]
    fn mean_of_constant_plane() {
        let plane = GrayPlane::from_fn(8, 8, |_, _| 42).unwrap();
        assert_eq!(plane.mean(), 42.0);
    }

    #[test]
    fn copy_from_resizes() {
        let mut a = GrayPlane::try_new(2, 2).unwrap();
        let b = GrayPlane::from_fn(3, 3, |x, _| x as u8).unwrap();
        a.copy_from(&b).unwrap();
        assert_eq!(a, b);
    }
}
