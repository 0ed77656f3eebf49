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

//! Error types, grouped by layer.
//!
//! Control-plane operations (loading, configuration) return these as tagged
//! values. The audio path never returns errors: per-voice failures downgrade
//! the voice to its end state and bump a diagnostics counter instead.

/// Errors raised while reading or registering sample data.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("failed to open sample file {0}: {1}")]
    OpenFailed(String, hound::Error),

    #[error("failed to seek to frame {0}: {1}")]
    SeekFailed(u64, hound::Error),

    #[error("short read from sample file: wanted {wanted} frames, got {got}")]
    ReadShort { wanted: usize, got: usize },

    #[error("unsupported sample format: {0} channels, {1} bits per sample")]
    UnsupportedFormat(u16, u16),

    #[error("sample loop [{start}, {end}) is outside the sample ({total} frames)")]
    BadLoop { start: u64, end: u64, total: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the streaming subsystem's control surface.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("no free stream slot available")]
    NoFreeSlot,

    #[error("stream order queue is full")]
    OrderQueueFull,

    #[error("disk thread is not running")]
    DiskThreadDown,
}

/// Errors raised by control-plane operations on the engine.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("instrument load failed: {0}")]
    InstrumentLoadFailed(#[from] SampleError),

    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("channel {0} does not exist")]
    NoSuchChannel(usize),
}
