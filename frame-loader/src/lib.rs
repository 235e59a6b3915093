//! Frame sources and decoders for the motion detector.
//!
//! Frames come either from a directory of still images, played back in file name order, or from
//! a Motion-JPEG file, which is just JPEG images stored back to back.

use anyhow::{anyhow, Result};
use edgemotion::prelude::v1::{Error, FrameDecoder, ScanlineSink};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Number of output rows handed to the sink at once.
const CHUNK_ROWS: usize = 8;

/// File extensions picked up from frame directories.
pub const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "ppm", "pgm", "bmp"];

/// Decoder of still image frames through the `image` crate.
///
/// Decimation by `2^scale` is done by keeping the top-left pixel of every cell, matching the
/// camera's scaled JPEG output closely enough for motion detection.
#[derive(Default)]
pub struct ImageDecoder {
    row_buf: Vec<u8>,
}

impl ImageDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameDecoder for ImageDecoder {
    fn decode(
        &mut self,
        frame: &[u8],
        scale: u8,
        sink: &mut dyn ScanlineSink,
    ) -> edgemotion::error::Result<()> {
        let image = image::load_from_memory(frame)
            .map_err(|e| Error::Decode(e.to_string()))?
            .into_rgb8();

        let step = 1usize
            .checked_shl(scale as u32)
            .ok_or_else(|| Error::Decode(format!("scale {scale} out of range")))?;
        let (w, h) = (image.width() as usize, image.height() as usize);
        let (ow, oh) = (w / step, h / step);

        sink.start(ow, oh)?;

        let raw = image.as_raw();
        let line = ow * 3;

        for y in (0..oh).step_by(CHUNK_ROWS) {
            let rows = CHUNK_ROWS.min(oh - y);
            self.row_buf.clear();

            for oy in y..y + rows {
                let src = &raw[oy * step * w * 3..];
                for ox in 0..ow {
                    self.row_buf
                        .extend_from_slice(&src[ox * step * 3..ox * step * 3 + 3]);
                }
            }

            debug_assert_eq!(self.row_buf.len(), rows * line);
            sink.rows(y, ow, &self.row_buf)?;
        }

        Ok(())
    }
}

/// Byte ranges of the JPEG images in a Motion-JPEG stream.
///
/// Every image starts with an SOI marker and ends with the first EOI marker after it. Bytes
/// between images are skipped, and a trailing image without EOI is dropped.
pub fn mjpeg_ranges(data: &[u8]) -> Vec<Range<usize>> {
    const SOI: [u8; 2] = [0xff, 0xd8];
    const EOI: [u8; 2] = [0xff, 0xd9];

    let find = |from: usize, marker: [u8; 2]| {
        data.get(from..)?
            .windows(2)
            .position(|w| w == marker)
            .map(|p| p + from)
    };

    let mut ranges = vec![];
    let mut pos = 0;

    while let Some(start) = find(pos, SOI) {
        match find(start + 2, EOI) {
            Some(end) => {
                ranges.push(start..end + 2);
                pos = end + 2;
            }
            None => {
                log::warn!("dropping truncated JPEG at offset {start}");
                break;
            }
        }
    }

    ranges
}

/// Split a Motion-JPEG stream into individual JPEG images.
pub fn split_mjpeg(data: &[u8]) -> Vec<&[u8]> {
    mjpeg_ranges(data)
        .into_iter()
        .map(|r| &data[r])
        .collect()
}

/// List frame images in `dir`, sorted by file name.
pub fn list_frames(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut frames = fs::read_dir(dir.as_ref())?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    frames.sort();

    Ok(frames)
}

/// Sequence of compressed frames.
pub enum FrameSource {
    /// Still images read one by one.
    Files { paths: Vec<PathBuf>, next: usize },
    /// Motion-JPEG file held in memory.
    Mjpeg {
        data: Vec<u8>,
        frames: Vec<Range<usize>>,
        next: usize,
    },
}

impl FrameSource {
    /// Open a frame source.
    ///
    /// Directories are read as image sequences, `.mjpeg` and `.mjpg` files as Motion-JPEG, and
    /// any other file as a single frame.
    pub fn open(input: impl AsRef<Path>) -> Result<Self> {
        let input = input.as_ref();

        if input.is_dir() {
            let paths = list_frames(input)?;
            if paths.is_empty() {
                return Err(anyhow!("no frames found in {}", input.display()));
            }
            return Ok(Self::Files { paths, next: 0 });
        }

        let is_mjpeg = input
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("mjpeg") || e.eq_ignore_ascii_case("mjpg"))
            .unwrap_or(false);

        if is_mjpeg {
            let data = fs::read(input)?;
            let frames = mjpeg_ranges(&data);
            log::debug!("{} frames in {}", frames.len(), input.display());
            Ok(Self::Mjpeg {
                data,
                frames,
                next: 0,
            })
        } else {
            Ok(Self::Files {
                paths: vec![input.to_path_buf()],
                next: 0,
            })
        }
    }

    /// Total number of frames.
    pub fn len(&self) -> usize {
        match self {
            Self::Files { paths, .. } => paths.len(),
            Self::Mjpeg { frames, .. } => frames.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the next frame, `None` at the end of the sequence.
    pub fn next_frame(&mut self) -> Option<Result<Vec<u8>>> {
        match self {
            Self::Files { paths, next } => {
                let path = paths.get(*next)?;
                *next += 1;
                Some(fs::read(path).map_err(|e| anyhow!("{}: {e}", path.display())))
            }
            Self::Mjpeg { data, frames, next } => {
                let range = frames.get(*next)?.clone();
                *next += 1;
                Some(Ok(data[range].to_vec()))
            }
        }
    }
}
