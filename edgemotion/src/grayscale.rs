//! # Frame to grayscale grid conversion
//!
//! Decoders push RGB888 scanlines into a [`ScanlineSink`]. The [`GrayscaleSampler`] sink keeps
//! every n-th pixel of every n-th row as luma and measures the frame's light level on the way.

use crate::plane::try_alloc;
use crate::prelude::v1::*;

/// Receiver of decoded pixel rows.
pub trait ScanlineSink {
    /// Announce the decoded frame size. Called once, before any rows.
    fn start(&mut self, width: usize, height: usize) -> Result<()>;

    /// Deliver a chunk of whole RGB888 rows.
    ///
    /// # Arguments
    ///
    /// * `y` - index of the first row in the chunk.
    /// * `width` - pixels per row.
    /// * `rgb` - `3 * width` bytes per row, rows back to back.
    fn rows(&mut self, y: usize, width: usize, rgb: &[u8]) -> Result<()>;
}

/// Compressed frame decoder.
pub trait FrameDecoder {
    /// Decode a frame into `sink`.
    ///
    /// # Arguments
    ///
    /// * `frame` - compressed frame bytes.
    /// * `scale` - decimate the frame by `2^scale` on both axes while decoding.
    /// * `sink` - receiver of the decoded rows.
    fn decode(&mut self, frame: &[u8], scale: u8, sink: &mut dyn ScanlineSink) -> Result<()>;
}

/// Fixed point BT.601 luma.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((19595 * r as u32 + 38469 * g as u32 + 7472 * b as u32) >> 16) as u8
}

/// Point-sampling grayscale converter.
#[derive(Clone, Debug)]
pub struct GrayscaleSampler {
    stride: usize,
    frame_dim: Option<(usize, usize)>,
    grid: GrayPlane,
    light_sum: u64,
    samples: u64,
}

impl GrayscaleSampler {
    /// Create a new sampler.
    ///
    /// # Arguments
    ///
    /// * `stride` - keep every `stride`-th pixel and row. Zero is treated as 1.
    pub fn new(stride: usize) -> Self {
        Self {
            stride: stride.max(1),
            frame_dim: None,
            grid: GrayPlane::default(),
            light_sum: 0,
            samples: 0,
        }
    }

    /// Dimensions of the decoded frame, once started.
    pub fn frame_dim(&self) -> Option<(usize, usize)> {
        self.frame_dim
    }

    /// Sampled grid so far.
    pub fn grid(&self) -> &GrayPlane {
        &self.grid
    }

    /// Take the sampled grid, failing if the decoder never started a frame.
    pub fn into_grid(self) -> Result<GrayPlane> {
        match self.frame_dim {
            Some(_) => Ok(self.grid),
            None => Err(Error::Decode("decoder produced no frame".into())),
        }
    }

    /// Mean RGB value of the sampled pixels, in percent of full scale.
    pub fn light_level(&self) -> u8 {
        if self.samples == 0 {
            return 0;
        }
        (self.light_sum * 100 / (self.samples * 3 * 255)) as u8
    }
}

impl ScanlineSink for GrayscaleSampler {
    fn start(&mut self, width: usize, height: usize) -> Result<()> {
        let (gw, gh) = (width / self.stride, height / self.stride);

        if gw == 0 || gh == 0 {
            return Err(Error::Decode(format!(
                "{width}x{height} frame is smaller than sample stride {}",
                self.stride
            )));
        }

        self.grid = GrayPlane::try_new(gw, gh)?;
        self.frame_dim = Some((width, height));
        self.light_sum = 0;
        self.samples = 0;

        Ok(())
    }

    fn rows(&mut self, y: usize, width: usize, rgb: &[u8]) -> Result<()> {
        let frame_w = match self.frame_dim {
            Some((w, _)) => w,
            None => return Err(Error::Decode("rows delivered before start".into())),
        };

        let line = width * 3;
        if width != frame_w || rgb.len() % line != 0 {
            return Err(Error::Decode(format!(
                "bad scanline chunk: {} bytes of {width} pixel rows",
                rgb.len()
            )));
        }

        let (gw, gh) = self.grid.dim();

        for (i, row) in rgb.chunks_exact(line).enumerate() {
            let fy = y + i;
            if fy % self.stride != 0 || fy / self.stride >= gh {
                continue;
            }
            let gy = fy / self.stride;

            for gx in 0..gw {
                let px = &row[gx * self.stride * 3..][..3];
                self.grid.set(gx, gy, luma(px[0], px[1], px[2]));
                self.light_sum += px.iter().map(|&v| v as u64).sum::<u64>();
                self.samples += 1;
            }
        }

        Ok(())
    }
}

/// Decode a frame into a grayscale grid.
///
/// Returns the grid and the light level of the sampled pixels.
///
/// # Arguments
///
/// * `decoder` - decoder of the compressed frame.
/// * `frame` - compressed frame bytes.
/// * `geometry` - frame geometry providing the decoder scale and sampling stride.
pub fn sample_frame(
    decoder: &mut dyn FrameDecoder,
    frame: &[u8],
    geometry: &FrameGeometry,
) -> Result<(GrayPlane, u8)> {
    let mut sampler = GrayscaleSampler::new(geometry.sample_rate as usize);
    decoder.decode(frame, geometry.scale_factor, &mut sampler)?;
    let light = sampler.light_level();
    Ok((sampler.into_grid()?, light))
}

/// Intensity weighted centre of an axis profile, 1-based.
fn centre(profile: &[u64]) -> f32 {
    let sum: u64 = profile.iter().sum();
    if sum == 0 {
        return 0.0;
    }
    let mass: f64 = profile
        .iter()
        .enumerate()
        .map(|(i, &v)| v as f64 * (i + 1) as f64)
        .sum();
    (mass / sum as f64) as f32
}

fn centres(plane: &GrayPlane) -> Result<(f32, f32)> {
    let (w, h) = plane.dim();
    let mut cols = try_alloc(w, 0u64)?;
    let mut rows = try_alloc(h, 0u64)?;

    for y in 0..h {
        for (x, &v) in plane.row(y).iter().enumerate() {
            cols[x] += v as u64;
            rows[y] += v as u64;
        }
    }

    Ok((centre(&cols), centre(&rows)))
}

/// Shift of the intensity centre of mass between two grids.
///
/// The result is the summed absolute shift on both axes, in percent of the summed centre
/// coordinates of `current`. Returns 0 for a black frame.
pub fn centre_of_mass_shift(previous: &GrayPlane, current: &GrayPlane) -> Result<f32> {
    previous.check_same_dim(current)?;

    let (px, py) = centres(previous)?;
    let (cx, cy) = centres(current)?;

    let total = cx.abs() + cy.abs();
    if total == 0.0 {
        return Ok(0.0);
    }

    Ok(((cx - px).abs() + (cy - py).abs()) * 100.0 / total)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    /// Decoder of raw RGB888 frames prefixed with little-endian u16 width and height.
    pub struct RawDecoder;

    impl RawDecoder {
        pub fn encode(
            width: usize,
            height: usize,
            mut f: impl FnMut(usize, usize) -> [u8; 3],
        ) -> Vec<u8> {
            let mut out = Vec::with_capacity(4 + width * height * 3);
            out.extend_from_slice(&(width as u16).to_le_bytes());
            out.extend_from_slice(&(height as u16).to_le_bytes());
            for y in 0..height {
                for x in 0..width {
                    out.extend_from_slice(&f(x, y));
                }
            }
            out
        }
    }

    impl FrameDecoder for RawDecoder {
        fn decode(&mut self, frame: &[u8], scale: u8, sink: &mut dyn ScanlineSink) -> Result<()> {
            if frame.len() < 4 {
                return Err(Error::Decode("truncated header".into()));
            }
            let w = u16::from_le_bytes([frame[0], frame[1]]) as usize;
            let h = u16::from_le_bytes([frame[2], frame[3]]) as usize;
            let data = &frame[4..];
            if data.len() != w * h * 3 {
                return Err(Error::Decode("truncated pixels".into()));
            }

            let step = 1 << scale;
            let (ow, oh) = (w / step, h / step);
            sink.start(ow, oh)?;

            for oy in 0..oh {
                let src = &data[oy * step * w * 3..];
                let row: Vec<u8> = (0..ow)
                    .flat_map(|ox| src[ox * step * 3..][..3].to_vec())
                    .collect();
                sink.rows(oy, ow, &row)?;
            }

            Ok(())
        }
    }

    #[test]
    fn luma_weights() {
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 0, 0), 76);
        assert_eq!(luma(0, 255, 0), 149);
        assert_eq!(luma(0, 0, 255), 29);
    }

    #[test]
    fn point_sampling() {
        let mut s = GrayscaleSampler::new(2);
        s.start(8, 6).unwrap();
        let rgb: Vec<u8> = (0..6)
            .flat_map(|y| (0..8).flat_map(move |x| [(x * 10 + y) as u8; 3]))
            .collect();
        // Deliver in two uneven chunks.
        s.rows(0, 8, &rgb[..24 * 4]).unwrap();
        s.rows(4, 8, &rgb[24 * 4..]).unwrap();

        let grid = s.into_grid().unwrap();
        assert_eq!(grid.dim(), (4, 3));
        assert_eq!(grid.row(0), &[0, 20, 40, 60]);
        assert_eq!(grid.row(2), &[4, 24, 44, 64]);
    }

    #[test]
    fn light_level_percent() {
        let mut s = GrayscaleSampler::new(1);
        s.start(2, 1).unwrap();
        s.rows(0, 2, &[255, 255, 255, 0, 0, 0]).unwrap();
        assert_eq!(s.light_level(), 50);
    }

    #[test]
    fn rows_before_start_fail() {
        let mut s = GrayscaleSampler::new(1);
        assert!(matches!(s.rows(0, 1, &[0, 0, 0]), Err(Error::Decode(_))));
        assert!(GrayscaleSampler::new(1).into_grid().is_err());
    }

    #[test]
    fn bad_chunk_fails() {
        let mut s = GrayscaleSampler::new(1);
        s.start(4, 4).unwrap();
        assert!(s.rows(0, 4, &[0; 13]).is_err());
        assert!(s.rows(0, 3, &[0; 9]).is_err());
    }

    #[test]
    fn sample_through_decoder() {
        let frame = RawDecoder::encode(64, 48, |x, _| [x as u8 * 4; 3]);
        let geometry = FrameGeometry::new(64, 48, 25, 1, 2);
        let (grid, light) = sample_frame(&mut RawDecoder, &frame, &geometry).unwrap();
        assert_eq!(grid.dim(), (16, 12));
        assert_eq!(grid.get(3, 0), 48);
        assert!(light > 0);
    }

    #[test]
    fn centre_of_mass() {
        let a = GrayPlane::from_fn(10, 10, |x, _| if x == 2 { 100 } else { 0 }).unwrap();
        let b = GrayPlane::from_fn(10, 10, |x, _| if x == 7 { 100 } else { 0 }).unwrap();

        assert_eq!(centre_of_mass_shift(&a, &a).unwrap(), 0.0);
        // Centres: x 3 -> 8, y 5.5 both.
        assert_approx_eq!(
            centre_of_mass_shift(&a, &b).unwrap(),
            5.0 * 100.0 / 13.5,
            1e-4
        );

        let black = GrayPlane::try_new(10, 10).unwrap();
        assert_eq!(centre_of_mass_shift(&a, &black).unwrap(), 0.0);
    }

    #[test]
    fn centre_of_mass_needs_equal_grids() {
        let a = GrayPlane::from_fn(10, 10, |x, y| (x + y) as u8).unwrap();
        let b = GrayPlane::from_fn(12, 10, |x, y| (x + y) as u8).unwrap();
        assert!(matches!(
            centre_of_mass_shift(&a, &b),
            Err(Error::Dimension { .. })
        ));
        assert!(matches!(centres(&a), Ok((cx, cy)) if cx > 5.0 && cy > 5.0));
    }
}
