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

//! The sample streaming subsystem.
//!
//! Samples larger than the RAM preload are streamed from disk by a dedicated
//! background thread into per-voice ring buffers. Voices place stream orders
//! from the audio thread through a lock-free queue and pick the created
//! stream up one cycle later; until then the RAM cache carries them.

pub mod disk;
pub mod stream;

pub use disk::DiskThread;
pub use stream::{StreamClient, StreamHandle, StreamReader, StreamState};
