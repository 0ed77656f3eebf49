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

//! A polyphonic, streaming-capable sampler engine.
//!
//! The engine converts timestamped MIDI events into a fixed-latency audio
//! signal by playing back and modulating sampled instruments. Samples keep a
//! short prefix cached in RAM; the tail streams from disk on a background
//! thread. Each voice runs a full DSP chain (pitch, amplitude/filter/pitch
//! envelopes, three LFOs, optional biquad filter, interpolating resampler)
//! with sample-accurate event timing.
//!
//! Audio and MIDI transport drivers, instrument file parsers and any
//! persistence are collaborators: the engine consumes an abstract
//! region/sample model and per-channel event queues, and writes into
//! caller-provided buffers.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//! use polysampler::config::EngineConfig;
//! use polysampler::engine::Engine;
//! use polysampler::instrument::{DimensionRegion, Instrument, Region};
//! use polysampler::sample::{Sample, SampleId};
//!
//! let (mut engine, mut controller) = Engine::new(EngineConfig::default()).unwrap();
//!
//! let sample = Arc::new(Sample::register(
//!     SampleId::whole_file("piano-c4.wav"),
//!     None,
//!     32768,
//!     engine.config().cache_trailer_frames(),
//! ).unwrap());
//! let region = Arc::new(Region {
//!     key_range: 0..=127,
//!     velocity_range: 0..=127,
//!     key_group: 0,
//!     dimensions: vec![DimensionRegion::new(sample)],
//! });
//! controller.set_instrument(0, Some(Arc::new(Instrument::new("piano", vec![region]))));
//!
//! let mut input = engine.take_midi_input(0).unwrap();
//! // ... hand `input` to the MIDI thread, then once per audio cycle:
//! let (mut left, mut right) = (vec![0.0f32; 256], vec![0.0f32; 256]);
//! engine.render(Instant::now(), &mut left, &mut right);
//! ```

pub mod channel;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod event;
pub mod instrument;
pub mod pool;
pub mod resource;
pub mod rt;
pub mod sample;
pub mod streaming;
pub mod sync;
#[cfg(test)]
mod testutil;
pub mod voice;

pub use config::{EngineConfig, VoiceStealPolicy};
pub use engine::{Engine, EngineController};
pub use error::{ControlError, SampleError, StreamError};
pub use event::{EventKind, MidiInput};
pub use instrument::{DimensionRegion, Instrument, Region};
pub use sample::{LoopSpec, Sample, SampleId};
