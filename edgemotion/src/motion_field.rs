//! # Motion vector tables

use crate::error::Result;
use crate::plane::try_alloc;
use bytemuck::{Pod, Zeroable};
use nalgebra::{Point2, Vector2};

/// Single motion vector with its squared magnitude.
///
/// The layout is fixed so that whole tables can be dumped as raw bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct MotionVector {
    pub dx: i16,
    pub dy: i16,
    pub magnitude_squared: u16,
}

impl MotionVector {
    pub const ZERO: Self = Self {
        dx: 0,
        dy: 0,
        magnitude_squared: 0,
    };

    /// Create a new motion vector, computing its squared magnitude.
    ///
    /// The magnitude is computed in 32 bits and saturated to `u16::MAX` when it does not fit.
    ///
    /// # Arguments
    ///
    /// * `dx` - horizontal displacement.
    /// * `dy` - vertical displacement.
    pub fn new(dx: i16, dy: i16) -> Self {
        let (x, y) = (dx as i32, dy as i32);
        let mag = (x * x) as u32 + (y * y) as u32;

        Self {
            dx,
            dy,
            magnitude_squared: u16::try_from(mag).unwrap_or(u16::MAX),
        }
    }

    /// Integer displacement length, truncated.
    pub fn displacement(&self) -> u32 {
        (self.magnitude_squared as f32).sqrt() as u32
    }

    pub fn is_zero(&self) -> bool {
        self.dx == 0 && self.dy == 0
    }
}

/// Row-major table of motion vectors over a block or pixel grid.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionField {
    vectors: Vec<MotionVector>,
    width: usize,
    height: usize,
}

impl MotionField {
    /// Allocate a zeroed motion field.
    ///
    /// # Arguments
    ///
    /// * `width` - width of the field.
    /// * `height` - height of the field.
    pub fn try_new(width: usize, height: usize) -> Result<Self> {
        let len = width.saturating_mul(height);

        Ok(Self {
            vectors: try_alloc(len, MotionVector::ZERO)?,
            width,
            height,
        })
    }

    /// Get width and height of the motion field.
    pub fn dim(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Get size of the motion field.
    ///
    /// This is the same as `width * height`
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Get motion at coordinates.
    pub fn get(&self, x: usize, y: usize) -> MotionVector {
        self.vectors[y * self.width + x]
    }

    /// Set motion at given position.
    pub fn set(&mut self, x: usize, y: usize, motion: MotionVector) {
        self.vectors[y * self.width + x] = motion;
    }

    /// Reset every vector to zero motion.
    pub fn clear(&mut self) {
        self.vectors.fill(MotionVector::ZERO);
    }

    pub fn as_slice(&self) -> &[MotionVector] {
        &self.vectors
    }

    pub fn as_mut_slice(&mut self) -> &mut [MotionVector] {
        &mut self.vectors
    }

    /// Raw bytes of the table in native endianness.
    ///
    /// Every vector occupies 6 bytes: `dx`, `dy`, then `magnitude_squared`.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vectors)
    }

    /// Sum of truncated displacement lengths over the whole field.
    pub fn total_displacement(&self) -> u64 {
        self.vectors.iter().map(|v| v.displacement() as u64).sum()
    }

    /// Mean truncated displacement length.
    ///
    /// Returns 0 for an empty field.
    pub fn mean_displacement(&self) -> u32 {
        match self.vectors.len() {
            0 => 0,
            n => (self.total_displacement() / n as u64) as u32,
        }
    }

    /// Largest squared magnitude in the field.
    pub fn max_magnitude_squared(&self) -> u16 {
        self.vectors
            .iter()
            .map(|v| v.magnitude_squared)
            .max()
            .unwrap_or(0)
    }

    /// Iterate every element of the motion field.
    ///
    /// The resulting iterator yields `(x, y, motion)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, MotionVector)> + '_ {
        let width = self.width.max(1);
        self.vectors
            .iter()
            .enumerate()
            .map(move |(i, v)| (i % width, i / width, *v))
    }

    /// Iterate every element as a position and motion pair.
    ///
    /// Positions are normalised to 0-1 range, motion stays in grid units.
    pub fn motion_iter(&self) -> impl Iterator<Item = (Point2<f32>, Vector2<f32>)> + '_ {
        let (width, height) = (self.width as f32, self.height as f32);
        self.iter().map(move |(x, y, v)| {
            (
                Point2::new(x as f32 / width, y as f32 / height),
                Vector2::new(v.dx as f32, v.dy as f32),
            )
        })
    }
}

/// Fixed length ring of motion field generations.
///
/// Index 0 is the field being computed, index 1 the previous frame's field, index 2 the one
/// before it. Rotation moves buffer ownership around, it never copies vectors.
#[derive(Clone, Debug)]
pub struct VectorHistory {
    fields: Vec<MotionField>,
}

impl VectorHistory {
    /// Allocate `generations` zeroed fields of given dimensions.
    pub fn try_new(generations: usize, width: usize, height: usize) -> Result<Self> {
        let mut fields = Vec::new();
        fields
            .try_reserve_exact(generations)
            .map_err(|_| crate::error::Error::Allocation { len: generations })?;

        for _ in 0..generations {
            fields.push(MotionField::try_new(width, height)?);
        }

        Ok(Self { fields })
    }

    /// Number of generations kept.
    pub fn generations(&self) -> usize {
        self.fields.len()
    }

    /// Dimensions shared by all generations.
    pub fn dim(&self) -> (usize, usize) {
        self.fields.first().map(MotionField::dim).unwrap_or((0, 0))
    }

    /// Discard the oldest generation and make it the new, zeroed, current one.
    pub fn rotate(&mut self) {
        self.fields.rotate_right(1);
        if let Some(current) = self.fields.first_mut() {
            current.clear();
        }
    }

    /// Get generation `age`, 0 being the current one.
    pub fn generation(&self, age: usize) -> Option<&MotionField> {
        self.fields.get(age)
    }

    pub fn current(&self) -> Option<&MotionField> {
        self.fields.first()
    }

    /// Borrow the current generation mutably alongside the older ones.
    pub fn split_mut(&mut self) -> Option<(&mut MotionField, &[MotionField])> {
        self.fields
            .split_first_mut()
            .map(|(current, older)| (current, &*older))
    }
}
