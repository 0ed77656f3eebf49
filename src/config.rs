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

//! Engine configuration.
//!
//! Everything that the engine reads once at construction lives here. There is
//! deliberately no way to change these values while the engine is running;
//! routing state that must change at runtime goes through the config handoff
//! instead.

use serde::{Deserialize, Serialize};

/// Number of frames over which modulator outputs are held constant within a
/// render cycle.
pub const SUBFRAGMENT_SIZE: usize = 32;

/// Extra frames the interpolator may read beyond the current playback
/// position.
pub const INTERPOLATOR_WINDOW: usize = 3;

/// Pitch bend wheel range in cents (+- two semitones).
pub const PITCH_BEND_RANGE_CENTS: f64 = 200.0;

/// Policy used to pick a victim voice when the voice pool is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceStealPolicy {
    /// Steal the oldest voice on the key of the incoming note.
    OldestVoiceOnKey,
    /// Steal the oldest active key's oldest voice.
    #[default]
    OldestKey,
    /// Steal the voice with the lowest trigger velocity.
    LowestVelocity,
}

/// Static engine configuration, read once at engine construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// The largest number of frames a single render call will ever ask for.
    pub max_samples_per_cycle: usize,
    /// Number of MIDI channels served by the engine.
    pub channels: usize,
    /// Voice pool capacity per channel.
    pub max_voices: usize,
    /// Number of disk streams (equals the number of simultaneous disk voices).
    pub max_streams: usize,
    /// Frames of every sample cached in RAM.
    pub preload_frames: usize,
    /// Maximum upward transposition in octaves the interpolator must survive.
    pub max_pitch_octaves: u32,
    /// Capacity of each stream's ring buffer, in frames.
    pub stream_ring_frames: usize,
    /// Granule size for disk refills, in frames.
    pub stream_refill_frames: usize,
    /// Victim selection when the voice pool is exhausted.
    pub voice_steal_policy: VoiceStealPolicy,
    /// Per-channel incoming MIDI event queue capacity.
    pub event_queue_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            max_samples_per_cycle: 1024,
            channels: 16,
            max_voices: 64,
            max_streams: 64,
            preload_frames: 32768,
            max_pitch_octaves: 4,
            stream_ring_frames: 65536,
            stream_refill_frames: 16384,
            voice_steal_policy: VoiceStealPolicy::default(),
            event_queue_size: 1024,
        }
    }
}

impl EngineConfig {
    /// The number of frames the interpolator may consume per cycle in the
    /// worst case (full cycle at maximum pitch).
    pub fn max_frames_consumed_per_cycle(&self) -> usize {
        self.max_samples_per_cycle << self.max_pitch_octaves
    }

    /// The zero-padded trailer every sample cache carries so the interpolator
    /// can always read a full window past the last valid frame.
    pub fn cache_trailer_frames(&self) -> usize {
        self.max_frames_consumed_per_cycle() + INTERPOLATOR_WINDOW
    }

    /// Validates the configuration, returning a human-readable complaint for
    /// the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample_rate must be non-zero".into());
        }
        if self.max_samples_per_cycle == 0 {
            return Err("max_samples_per_cycle must be non-zero".into());
        }
        if self.channels == 0 || self.channels > 16 {
            return Err(format!("channels must be 1..=16, got {}", self.channels));
        }
        if self.max_voices == 0 {
            return Err("max_voices must be non-zero".into());
        }
        if self.preload_frames < self.max_frames_consumed_per_cycle() {
            return Err(format!(
                "preload_frames ({}) must cover at least one worst-case cycle ({})",
                self.preload_frames,
                self.max_frames_consumed_per_cycle()
            ));
        }
        if self.stream_ring_frames < 2 * self.max_frames_consumed_per_cycle() {
            return Err(format!(
                "stream_ring_frames ({}) must be at least twice the worst-case cycle ({})",
                self.stream_ring_frames,
                self.max_frames_consumed_per_cycle()
            ));
        }
        if self.stream_refill_frames == 0 || self.stream_refill_frames > self.stream_ring_frames {
            return Err("stream_refill_frames must be in 1..=stream_ring_frames".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_preload_must_cover_a_cycle() {
        let config = EngineConfig {
            preload_frames: 16,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trailer_includes_interpolator_window() {
        let config = EngineConfig::default();
        assert_eq!(
            config.cache_trailer_frames(),
            (1024 << 4) + INTERPOLATOR_WINDOW
        );
    }
}
