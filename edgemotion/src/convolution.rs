//! # Separable convolution
//!
//! Horizontal and vertical 1D passes, and 2D separable convolution built from them. Kernels are
//! applied as true convolutions (flipped) and must have odd length. At the plane border the kernel
//! is truncated to the taps that remain inside the plane: missing samples contribute nothing, and
//! the remaining taps are not renormalised.

use crate::error::{Error, Result};
use crate::plane::{try_alloc, FloatPlane, GrayPlane};

fn check_kernel(kernel: &[f32]) -> Result<()> {
    if kernel.is_empty() {
        Err(Error::Kernel("kernel is empty".into()))
    } else if kernel.len() % 2 == 0 {
        Err(Error::Kernel(format!(
            "kernel length {} is not odd",
            kernel.len()
        )))
    } else {
        Ok(())
    }
}

fn check_dim(width: usize, height: usize) -> Result<()> {
    if width == 0 || height == 0 {
        Err(Error::Configuration(format!(
            "cannot convolve {width}x{height} plane"
        )))
    } else {
        Ok(())
    }
}

/// Convolve every row of `input` with `kernel`.
fn pass_h(input: &[f32], output: &mut [f32], width: usize, kernel: &[f32]) {
    let center = (kernel.len() / 2) as isize;

    for (src, dst) in input.chunks_exact(width).zip(output.chunks_exact_mut(width)) {
        for (x, out) in dst.iter_mut().enumerate() {
            let mut sum = 0f32;
            for (i, &k) in kernel.iter().rev().enumerate() {
                let sx = x as isize + i as isize - center;
                if sx >= 0 && (sx as usize) < width {
                    sum += src[sx as usize] * k;
                }
            }
            *out = sum;
        }
    }
}

/// Convolve every column of `input` with `kernel`.
///
/// Rows are accumulated whole so that the inner loop walks memory linearly.
fn pass_v(input: &[f32], output: &mut [f32], width: usize, height: usize, kernel: &[f32]) {
    let center = (kernel.len() / 2) as isize;

    for (y, dst) in output.chunks_exact_mut(width).enumerate() {
        dst.iter_mut().for_each(|v| *v = 0.0);

        for (i, &k) in kernel.iter().rev().enumerate() {
            let sy = y as isize + i as isize - center;
            if sy < 0 || sy as usize >= height {
                continue;
            }
            let src = &input[sy as usize * width..(sy as usize + 1) * width];
            for (o, &s) in dst.iter_mut().zip(src) {
                *o += s * k;
            }
        }
    }
}

/// Horizontal 1D convolution.
///
/// # Arguments
///
/// * `input` - plane to convolve.
/// * `output` - plane receiving the result, same size as `input`.
/// * `kernel` - odd-length kernel.
pub fn conv_h(input: &FloatPlane, output: &mut FloatPlane, kernel: &[f32]) -> Result<()> {
    check_kernel(kernel)?;
    check_dim(input.width(), input.height())?;
    input.check_same_dim(output)?;

    pass_h(input.as_slice(), output.as_mut_slice(), input.width(), kernel);

    Ok(())
}

/// Vertical 1D convolution.
///
/// # Arguments
///
/// * `input` - plane to convolve.
/// * `output` - plane receiving the result, same size as `input`.
/// * `kernel` - odd-length kernel.
pub fn conv_v(input: &FloatPlane, output: &mut FloatPlane, kernel: &[f32]) -> Result<()> {
    check_kernel(kernel)?;
    check_dim(input.width(), input.height())?;
    input.check_same_dim(output)?;

    let (w, h) = input.dim();
    pass_v(input.as_slice(), output.as_mut_slice(), w, h, kernel);

    Ok(())
}

/// 2D separable convolution over a floating point plane.
///
/// Runs a horizontal pass with `kernel_x` followed by a vertical pass with `kernel_y`. The output
/// keeps the sign of the sums, so derivative planes can be smoothed with it.
pub fn convolve_2d_separable(
    input: &FloatPlane,
    output: &mut FloatPlane,
    kernel_x: &[f32],
    kernel_y: &[f32],
) -> Result<()> {
    check_kernel(kernel_x)?;
    check_kernel(kernel_y)?;
    check_dim(input.width(), input.height())?;
    input.check_same_dim(output)?;

    let (w, h) = input.dim();
    let mut tmp = try_alloc(input.len(), 0f32)?;

    pass_h(input.as_slice(), &mut tmp, w, kernel_x);
    pass_v(&tmp, output.as_mut_slice(), w, h, kernel_y);

    Ok(())
}

/// 2D separable convolution over an 8-bit plane.
///
/// Intermediate sums are kept in floating point. Each output sample is the absolute value of the
/// sum, rounded to nearest and clamped to 255.
pub fn convolve_2d_separable_u8(
    input: &GrayPlane,
    output: &mut GrayPlane,
    kernel_x: &[f32],
    kernel_y: &[f32],
) -> Result<()> {
    check_kernel(kernel_x)?;
    check_kernel(kernel_y)?;
    check_dim(input.width(), input.height())?;
    input.check_same_dim(output)?;

    let (w, h) = input.dim();
    let src = input.to_float()?;
    let mut tmp = try_alloc(input.len(), 0f32)?;
    let mut sum = try_alloc(input.len(), 0f32)?;

    pass_h(src.as_slice(), &mut tmp, w, kernel_x);
    pass_v(&tmp, &mut sum, w, h, kernel_y);

    for (o, s) in output.as_mut_slice().iter_mut().zip(sum) {
        *o = (s.abs() + 0.5).min(255.0) as u8;
    }

    Ok(())
}
