// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Test fixtures: deterministic WAV files, registered samples and
//! single-region instruments.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::instrument::{DimensionRegion, Instrument, Region};
use crate::sample::{Sample, SampleId};

/// Wait for the given predicate to return true or fail.
#[inline]
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let mut tick = Duration::from_millis(2);
    let timeout = Duration::from_secs(10);
    let max_tick = Duration::from_millis(50);

    loop {
        let elapsed = start.elapsed().expect("System time error");
        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }

        // Exponential backoff to reduce CPU contention
        thread::sleep(tick);
        tick = std::cmp::min(tick * 2, max_tick);
    }
}

/// Wait for the given producer to return Some or fail.
#[inline]
pub fn eventually_some<T, F>(producer: F, error_msg: &str) -> T
where
    F: Fn() -> Option<T>,
{
    let start = SystemTime::now();
    let mut tick = Duration::from_millis(2);
    let timeout = Duration::from_secs(10);
    let max_tick = Duration::from_millis(50);

    loop {
        let elapsed = start.elapsed().expect("System time error");
        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if let Some(value) = producer() {
            return value;
        }

        thread::sleep(tick);
        tick = std::cmp::min(tick * 2, max_tick);
    }
}

/// The normalized value frame `i` of a ramp WAV holds.
pub fn ramp_value(i: usize) -> f32 {
    i as f32 / 32768.0
}

/// Writes a 16-bit mono/stereo WAV whose frame `i` holds the raw value `i`
/// on every channel (so playback positions are recoverable from sample
/// values). Frame counts must stay below i16::MAX.
pub fn write_ramp_wav(
    dir: &Path,
    name: &str,
    channels: u16,
    sample_rate: u32,
    frames: usize,
) -> PathBuf {
    assert!(frames < i16::MAX as usize, "ramp would overflow i16");
    let path = dir.join(name);
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec).expect("create wav");
    for i in 0..frames {
        for _ in 0..channels {
            writer.write_sample(i as i16).expect("write sample");
        }
    }
    writer.finalize().expect("finalize wav");
    path
}

/// Writes a 16-bit WAV with explicit per-channel sample data.
pub fn write_wav_i16(
    dir: &Path,
    name: &str,
    channels: Vec<Vec<i16>>,
    sample_rate: u32,
) -> PathBuf {
    let path = dir.join(name);
    let num_channels = channels.len() as u16;
    let frames = channels[0].len();
    let spec = WavSpec {
        channels: num_channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(&path, spec).expect("create wav");
    for frame in 0..frames {
        for channel in &channels {
            writer.write_sample(channel[frame]).expect("write sample");
        }
    }
    writer.finalize().expect("finalize wav");
    path
}

/// Writes a mono 16-bit sine WAV.
pub fn write_sine_wav(
    dir: &Path,
    name: &str,
    frequency: f32,
    sample_rate: u32,
    frames: usize,
) -> PathBuf {
    let samples: Vec<i16> = (0..frames)
        .map(|i| {
            let x = (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32).sin();
            (x * 16384.0) as i16
        })
        .collect();
    write_wav_i16(dir, name, vec![samples], sample_rate)
}

/// Registers a ramp sample with a generous preload (fully cached for small
/// frame counts).
pub fn ramp_sample(dir: &Path, name: &str, frames: usize) -> Arc<Sample> {
    let path = write_ramp_wav(dir, name, 1, 44100, frames);
    Arc::new(Sample::register(SampleId::whole_file(path), None, 1 << 16, 64).unwrap())
}

/// A single-region instrument covering the whole keyboard, built from one
/// dimension region.
pub fn single_region_instrument(dimension: DimensionRegion) -> Arc<Instrument> {
    single_region_instrument_with(dimension, 0..=127, 0)
}

/// Like [`single_region_instrument`] with an explicit key range and key
/// group.
pub fn single_region_instrument_with(
    dimension: DimensionRegion,
    key_range: std::ops::RangeInclusive<u8>,
    key_group: u32,
) -> Arc<Instrument> {
    Arc::new(Instrument::new(
        "test",
        vec![Arc::new(Region {
            key_range,
            velocity_range: 0..=127,
            key_group,
            dimensions: vec![dimension],
        })],
    ))
}
