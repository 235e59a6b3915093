//! Run motion and night detection over recorded frames.

use anyhow::{anyhow, Result};
use clap::{crate_authors, crate_version, Arg, ArgMatches, Command};
use edgemotion::prelude::v1::*;
use frame_loader::{FrameSource, ImageDecoder};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Single CSV output row.
#[derive(Serialize)]
struct FrameRow {
    frame: usize,
    width: usize,
    height: usize,
    initialized: bool,
    mean_displacement: u32,
    total_displacement: u64,
    max_magnitude_squared: u16,
    light_level: u8,
    com_shift: f32,
    motion: bool,
    night: bool,
}

fn command() -> Command<'static> {
    Command::new("motion-watch")
        .version(crate_version!())
        .author(crate_authors!())
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .takes_value(true)
                .help("JSON detector configuration"),
        )
        .arg(
            Arg::new("algorithm")
                .long("algorithm")
                .short('a')
                .takes_value(true)
                .help("epzs, arps or lucas-kanade"),
        )
        .arg(
            Arg::new("frame-size")
                .long("frame-size")
                .short('f')
                .takes_value(true)
                .help("Camera resolution the frames were captured at, e.g. QVGA"),
        )
        .arg(
            Arg::new("sensitivity")
                .long("sensitivity")
                .short('s')
                .takes_value(true),
        )
        .arg(
            Arg::new("night-threshold")
                .long("night-threshold")
                .takes_value(true),
        )
        .arg(
            Arg::new("light")
                .long("light")
                .takes_value(true)
                .help("Fixed ambient light level in percent instead of measuring frames"),
        )
        .arg(Arg::new("deflicker").long("deflicker").required(false))
        .arg(
            Arg::new("csv")
                .long("csv")
                .takes_value(true)
                .help("Write per-frame statistics to a CSV file"),
        )
        .arg(
            Arg::new("dump")
                .long("dump")
                .short('d')
                .takes_value(true)
                .help("Write raw motion vectors of every frame into a directory"),
        )
        .arg(
            Arg::new("max-frames")
                .long("max-frames")
                .short('n')
                .takes_value(true),
        )
        .arg(
            Arg::new("input")
                .takes_value(true)
                .required(true)
                .help("Frame directory, MJPEG file or single image"),
        )
}

/// Default configuration file location.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("edgemotion").join("config.json"))
}

/// Load the detector configuration.
///
/// An explicitly given file must exist. The default location is optional.
fn load_config(path: Option<&Path>) -> Result<DetectorConfig> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(DetectorConfig::default()),
        },
    };

    if !required && !path.exists() {
        return Ok(DetectorConfig::default());
    }

    log::debug!("loading configuration from {}", path.display());

    let file = File::open(&path).map_err(|e| anyhow!("{}: {e}", path.display()))?;
    Ok(serde_json::from_reader(file)?)
}

/// Apply command line overrides on top of a loaded configuration.
fn apply_overrides(config: &mut DetectorConfig, matches: &ArgMatches) -> Result<()> {
    if let Some(algorithm) = matches.value_of("algorithm") {
        config.algorithm = algorithm.parse()?;
    }
    if let Some(size) = matches.value_of("frame-size") {
        config.frame_size = size.parse()?;
    }
    if let Some(sensitivity) = matches.value_of("sensitivity") {
        config.sensitivity = sensitivity.parse()?;
    }
    if let Some(threshold) = matches.value_of("night-threshold") {
        config.night_threshold = threshold.parse()?;
    }
    if matches.is_present("deflicker") {
        config.deflicker = true;
    }

    config.validate()?;

    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let matches = command().get_matches();

    let mut config = load_config(matches.value_of("config").map(Path::new))?;
    apply_overrides(&mut config, &matches)?;

    let input = matches
        .value_of("input")
        .ok_or_else(|| anyhow!("Please supply an input!"))?;
    let max_frames = matches
        .value_of("max-frames")
        .map(str::parse::<usize>)
        .transpose()?;
    let light = matches
        .value_of("light")
        .map(str::parse::<u8>)
        .transpose()?;
    let dump = matches.value_of("dump");

    if let Some(dump) = dump {
        std::fs::create_dir_all(dump)?;
    }

    let mut csv = matches
        .value_of("csv")
        .map(|path| File::create(path).map(csv::Writer::from_writer))
        .transpose()?;

    let mut source = FrameSource::open(input)?;
    let mut decoder = ImageDecoder::new();
    let mut detector = MotionDetector::new(config)?;
    detector.set_light_level(light);

    log::info!(
        "{} frames, {} at {}",
        source.len(),
        detector.config().algorithm,
        detector.config().frame_size
    );

    let (mut motion, mut night) = (false, false);
    let (mut processed, mut motion_frames) = (0usize, 0usize);

    let mut frame_idx = 0usize;

    while let Some(frame) = source.next_frame() {
        if max_frames.map(|m| frame_idx >= m).unwrap_or(false) {
            break;
        }

        let idx = frame_idx;
        frame_idx += 1;

        let frame = frame?;

        let report = match detector.process_frame(&frame, &mut decoder) {
            Ok(report) => report,
            Err(e) => {
                log::warn!("skipping frame {idx}: {e}");
                continue;
            }
        };

        let was_moving = motion;
        motion = detector.update_motion(&report, motion);
        night = detector.evaluate_night(night);

        processed += 1;
        if motion {
            motion_frames += 1;
        }

        if motion != was_moving {
            println!(
                "{idx:06}: motion {}",
                if motion { "started" } else { "stopped" }
            );
        }

        if let (Some(dump), false) = (dump, report.initialized) {
            if let Some(vectors) = detector.context().vectors() {
                std::fs::write(format!("{dump}/{idx:06}.mvt"), vectors.as_bytes())?;
            }
        }

        if let Some(csv) = &mut csv {
            csv.serialize(FrameRow {
                frame: idx,
                width: report.grid.0,
                height: report.grid.1,
                initialized: report.initialized,
                mean_displacement: report.mean_displacement,
                total_displacement: report.total_displacement,
                max_magnitude_squared: report.max_magnitude_squared,
                light_level: report.light_level,
                com_shift: report.com_shift,
                motion,
                night,
            })?;
        }
    }

    if let Some(csv) = &mut csv {
        csv.flush()?;
    }

    println!("{processed} frames processed, {motion_frames} with motion, night: {night}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_loaded_values() {
        let matches = command()
            .try_get_matches_from([
                "motion-watch",
                "-a",
                "arps",
                "--frame-size",
                "vga",
                "-s",
                "7",
                "--deflicker",
                "frames",
            ])
            .unwrap();

        let mut config = DetectorConfig::default();
        apply_overrides(&mut config, &matches).unwrap();

        assert_eq!(config.algorithm, Algorithm::Arps);
        assert_eq!(config.frame_size, FrameSize::Vga);
        assert_eq!(config.motion_threshold(), 3);
        assert!(config.deflicker);
        assert_eq!(config.night_threshold, 20);
    }

    #[test]
    fn bad_override_fails() {
        let matches = command()
            .try_get_matches_from(["motion-watch", "-a", "sad", "frames"])
            .unwrap();
        assert!(apply_overrides(&mut DetectorConfig::default(), &matches).is_err());
    }

    #[test]
    fn explicit_config_must_exist() {
        assert!(load_config(Some(Path::new("/nonexistent/edgemotion.json"))).is_err());
    }

    #[test]
    fn config_file_is_loaded() {
        let path = std::env::temp_dir().join(format!("motion-watch-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "sensitivity": 5, "deflicker": true }"#).unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.sensitivity, 5);
        assert!(config.deflicker);
        assert_eq!(config.algorithm, Algorithm::Epzs);

        std::fs::remove_file(&path).unwrap();
    }
}
