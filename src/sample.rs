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

//! Immutable sample assets.
//!
//! A sample is registered once, caches a prefix of its frames in RAM, and is
//! then shared by reference count across channels and voices. The cached
//! prefix always ends in a zero-padded trailer sized for the worst-case
//! interpolator lookahead, so a voice can read a full interpolation window
//! past any valid playback position without bounds checks.
//!
//! The disk thread uses [`WavFrameReader`] for positioned chunk reads of the
//! sample tail.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader};
use tracing::{debug, info};

use crate::error::SampleError;

/// Identity of a sample: source path plus the sub-range played from it.
/// The resource manager guarantees at most one cache entry per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleId {
    /// Path of the source file.
    pub path: PathBuf,
    /// First frame of the sub-range.
    pub offset: u64,
    /// One past the last frame of the sub-range; `None` plays to the file end.
    pub end: Option<u64>,
}

impl SampleId {
    /// Identity covering the whole file.
    pub fn whole_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            end: None,
        }
    }
}

/// Loop region of a sample, in frames relative to the sample start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSpec {
    /// First frame of the loop.
    pub start: u64,
    /// One past the last frame of the loop.
    pub end: u64,
    /// Number of passes through the loop; `None` loops until release.
    pub play_count: Option<u32>,
}

impl LoopSpec {
    /// Length of the loop in frames.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// True for degenerate loops that must be ignored.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// The RAM-cached prefix of a sample.
pub struct SampleCache {
    /// Interleaved samples: `cached_frames` real frames followed by
    /// `trailer_frames` frames of silence.
    data: Vec<f32>,
    cached_frames: usize,
    trailer_frames: usize,
}

impl SampleCache {
    /// Interleaved cache data including the silence trailer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Number of real (non-trailer) frames held in RAM.
    pub fn cached_frames(&self) -> usize {
        self.cached_frames
    }

    /// Number of silence frames appended after the cached prefix.
    pub fn trailer_frames(&self) -> usize {
        self.trailer_frames
    }
}

/// An immutable sample asset: metadata plus the RAM-cached prefix.
pub struct Sample {
    id: SampleId,
    sample_rate: u32,
    channels: u16,
    total_frames: u64,
    frame_size: usize,
    loop_spec: Option<LoopSpec>,
    cache: SampleCache,
}

impl Sample {
    /// Registers a sample: opens the source file, caches `preload_frames`
    /// frames (or the whole sample if shorter) and appends a
    /// `trailer_frames` silence trailer.
    ///
    /// `loop_spec` comes from the instrument provider; WAV files carry no
    /// loop metadata this reader understands.
    pub fn register(
        id: SampleId,
        loop_spec: Option<LoopSpec>,
        preload_frames: usize,
        trailer_frames: usize,
    ) -> Result<Self, SampleError> {
        let mut reader = WavFrameReader::open(&id.path)?;
        let channels = reader.channels();
        if channels == 0 || channels > 2 {
            return Err(SampleError::UnsupportedFormat(
                channels,
                reader.bits_per_sample(),
            ));
        }

        let file_frames = reader.total_frames();
        if id.offset > file_frames {
            return Err(SampleError::ReadShort {
                wanted: id.offset as usize,
                got: file_frames as usize,
            });
        }
        let end = id.end.unwrap_or(file_frames).min(file_frames);
        let total_frames = end.saturating_sub(id.offset);

        if let Some(spec) = loop_spec {
            if spec.is_empty() || spec.end > total_frames {
                return Err(SampleError::BadLoop {
                    start: spec.start,
                    end: spec.end,
                    total: total_frames,
                });
            }
        }

        let cached_frames = preload_frames.min(total_frames as usize);
        let samples_per_frame = channels as usize;
        let mut data = vec![0.0f32; (cached_frames + trailer_frames) * samples_per_frame];
        if cached_frames > 0 {
            reader.seek_to_frame(id.offset)?;
            let got = reader.read_frames(&mut data[..cached_frames * samples_per_frame])?;
            if got < cached_frames {
                return Err(SampleError::ReadShort {
                    wanted: cached_frames,
                    got,
                });
            }
        }

        info!(
            path = ?id.path,
            total_frames,
            cached_frames,
            trailer_frames,
            channels,
            "Sample registered"
        );

        Ok(Self {
            sample_rate: reader.sample_rate(),
            frame_size: samples_per_frame * (reader.bits_per_sample() as usize / 8),
            id,
            channels,
            total_frames,
            loop_spec,
            cache: SampleCache {
                data,
                cached_frames,
                trailer_frames,
            },
        })
    }

    /// Identity of this sample.
    pub fn id(&self) -> &SampleId {
        &self.id
    }

    /// Source sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count (1 or 2).
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Total number of frames in the playable sub-range.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Size of one frame in the source file, in bytes.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// The loop, if one is defined.
    pub fn loop_spec(&self) -> Option<LoopSpec> {
        self.loop_spec
    }

    /// The RAM cache.
    pub fn cache(&self) -> &SampleCache {
        &self.cache
    }

    /// True if every frame of the sample sits in the RAM cache.
    pub fn is_fully_cached(&self) -> bool {
        self.cache.cached_frames as u64 >= self.total_frames
    }

    /// Memory held by the cache, in bytes.
    pub fn memory_size(&self) -> usize {
        self.cache.data.len() * std::mem::size_of::<f32>()
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("id", &self.id)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("total_frames", &self.total_frames)
            .field("cached_frames", &self.cache.cached_frames)
            .finish()
    }
}

/// Frame-granular WAV reader used for both the preload pass and the disk
/// thread's positioned chunk reads. Output is normalized f32 in -1.0..1.0.
pub struct WavFrameReader {
    reader: WavReader<BufReader<File>>,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    format: SampleFormat,
    total_frames: u64,
}

impl WavFrameReader {
    /// Opens the WAV file at `path`.
    pub fn open(path: &Path) -> Result<Self, SampleError> {
        let reader = WavReader::open(path)
            .map_err(|e| SampleError::OpenFailed(path.display().to_string(), e))?;
        let spec = reader.spec();
        match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) | (SampleFormat::Float, 32) => {}
            (format, bits) => {
                debug!(?format, bits, "Rejecting unsupported WAV format");
                return Err(SampleError::UnsupportedFormat(spec.channels, bits));
            }
        }
        let total_frames = u64::from(reader.duration());
        Ok(Self {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            format: spec.sample_format,
            total_frames,
            reader,
        })
    }

    /// Channel count of the source.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate of the source in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Bits per sample of the source.
    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    /// Total frames in the source.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Seeks so the next read starts at `frame`.
    pub fn seek_to_frame(&mut self, frame: u64) -> Result<(), SampleError> {
        self.reader
            .seek(frame as u32)
            .map_err(|e| SampleError::SeekFailed(frame, hound::Error::IoError(e)))
    }

    /// Reads interleaved samples into `out`, returning the number of whole
    /// frames read. Short reads at EOF are not an error.
    pub fn read_frames(&mut self, out: &mut [f32]) -> Result<usize, SampleError> {
        let samples_per_frame = self.channels as usize;
        let mut filled = 0;

        match self.format {
            SampleFormat::Int => {
                let mut samples = self.reader.samples::<i16>();
                for slot in out.iter_mut() {
                    match samples.next() {
                        Some(sample) => {
                            *slot = f32::from(sample.map_err(hound_to_sample_error)?) / 32768.0;
                            filled += 1;
                        }
                        None => break,
                    }
                }
            }
            SampleFormat::Float => {
                let mut samples = self.reader.samples::<f32>();
                for slot in out.iter_mut() {
                    match samples.next() {
                        Some(sample) => {
                            *slot = sample.map_err(hound_to_sample_error)?;
                            filled += 1;
                        }
                        None => break,
                    }
                }
            }
        }

        Ok(filled / samples_per_frame)
    }
}

fn hound_to_sample_error(e: hound::Error) -> SampleError {
    match e {
        hound::Error::IoError(io) => SampleError::Io(io),
        other => SampleError::OpenFailed("<stream>".into(), other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn test_register_caches_prefix_and_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let path = testutil::write_ramp_wav(dir.path(), "ramp.wav", 1, 44100, 1000);

        let sample =
            Sample::register(SampleId::whole_file(&path), None, 100, 16).unwrap();

        assert_eq!(sample.total_frames(), 1000);
        assert_eq!(sample.cache().cached_frames(), 100);
        assert_eq!(sample.cache().trailer_frames(), 16);
        assert_eq!(sample.cache().data().len(), 116);
        assert!(!sample.is_fully_cached());

        // The trailer must be silence.
        for &v in &sample.cache().data()[100..] {
            assert_eq!(v, 0.0);
        }
    }

    #[test]
    fn test_short_sample_is_fully_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = testutil::write_ramp_wav(dir.path(), "short.wav", 1, 44100, 50);

        let sample =
            Sample::register(SampleId::whole_file(&path), None, 1000, 8).unwrap();
        assert_eq!(sample.cache().cached_frames(), 50);
        assert!(sample.is_fully_cached());
    }

    #[test]
    fn test_sub_range_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = testutil::write_ramp_wav(dir.path(), "range.wav", 1, 44100, 1000);

        let id = SampleId {
            path: path.clone(),
            offset: 100,
            end: Some(300),
        };
        let sample = Sample::register(id, None, 1000, 4).unwrap();
        assert_eq!(sample.total_frames(), 200);
        assert!(sample.is_fully_cached());

        // The first cached frame must be the file's frame 100.
        let expected = testutil::ramp_value(100);
        assert!((sample.cache().data()[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_bad_loop_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = testutil::write_ramp_wav(dir.path(), "loop.wav", 1, 44100, 100);

        let result = Sample::register(
            SampleId::whole_file(&path),
            Some(LoopSpec {
                start: 50,
                end: 200,
                play_count: None,
            }),
            100,
            4,
        );
        assert!(matches!(result, Err(SampleError::BadLoop { .. })));
    }

    #[test]
    fn test_positioned_chunk_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = testutil::write_ramp_wav(dir.path(), "chunks.wav", 1, 44100, 500);

        let mut reader = WavFrameReader::open(&path).unwrap();
        reader.seek_to_frame(250).unwrap();
        let mut out = [0.0f32; 10];
        assert_eq!(reader.read_frames(&mut out).unwrap(), 10);
        assert!((out[0] - testutil::ramp_value(250)).abs() < 1e-6);

        // Short read at EOF.
        reader.seek_to_frame(495).unwrap();
        let mut out = [0.0f32; 10];
        assert_eq!(reader.read_frames(&mut out).unwrap(), 5);
    }
}
