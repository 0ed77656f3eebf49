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

//! Per-MIDI-channel state.
//!
//! Holds the controller table, the key map from MIDI key to sounding voices,
//! per-key pending transition events, the channel's voice pool and its
//! left/right mix bus. All of this is written and read only on the audio
//! thread; the MIDI collaborator reaches it exclusively through the SPSC
//! event queue.

use ringbuf::traits::Consumer;
use ringbuf::HeapCons;

use crate::config::EngineConfig;
use crate::event::{event_queue, Event, EventGenerator, MidiInput, RawEvent, SchedTime};
use crate::pool::{Pool, PoolIndex};
use crate::voice::Voice;

/// Controller-table slot holding channel pressure (aftertouch), one past the
/// 128 MIDI CC slots.
pub const CTRL_TABLE_IDX_AFTERTOUCH: u8 = 128;

/// Power-on value for CC#7 so an untouched channel plays at unity gain.
const DEFAULT_CHANNEL_VOLUME_CC: u8 = 127;

/// Per-key bookkeeping.
pub(crate) struct KeyState {
    /// Voices sounding on this key (indices into the channel's voice pool).
    pub voices: Vec<PoolIndex>,
    /// Transition events (release / cancel-release) delivered to the key's
    /// voices this cycle.
    pub pending: Vec<Event>,
    /// True between note-on and note-off.
    pub held: bool,
    /// Note-off arrived while the sustain pedal was down; release fires when
    /// the pedal lifts.
    pub sustained: bool,
    /// Velocity of the note-on holding this key.
    pub velocity: u8,
    /// Scheduler time of the note-on, for release-trigger decay.
    pub down_since: Option<SchedTime>,
}

impl KeyState {
    fn new(max_voices: usize) -> Self {
        Self {
            voices: Vec::with_capacity(max_voices),
            pending: Vec::with_capacity(8),
            held: false,
            sustained: false,
            velocity: 0,
            down_since: None,
        }
    }
}

/// One MIDI channel of the engine.
pub struct EngineChannel {
    index: u8,
    pub(crate) controller_table: [u8; 129],
    pub(crate) keys: Vec<KeyState>,
    pub(crate) voices: Pool<Voice>,
    pub(crate) out_left: Vec<f32>,
    pub(crate) out_right: Vec<f32>,
    pub(crate) pitch_bend: i16,
    pub(crate) sustain_down: bool,
    pub(crate) program: u8,
    /// Resolved events of the current cycle, in fragment order.
    pub(crate) events: Vec<Event>,
    /// CC / pitch-bend / pressure events of the current cycle, consumed by
    /// voices during their sub-fragment scan.
    pub(crate) cc_events: Vec<Event>,
    consumer: HeapCons<RawEvent>,
    /// Events dropped because a per-cycle list was full.
    pub(crate) dropped_events: u64,
}

impl EngineChannel {
    /// Creates the channel and the producer handle for its MIDI event
    /// queue.
    pub(crate) fn new(index: u8, config: &EngineConfig) -> (Self, MidiInput) {
        let (input, consumer) = event_queue(index, config.event_queue_size);
        let mut controller_table = [0u8; 129];
        controller_table[7] = DEFAULT_CHANNEL_VOLUME_CC;

        let channel = Self {
            index,
            controller_table,
            keys: (0..128).map(|_| KeyState::new(config.max_voices)).collect(),
            voices: Pool::new(config.max_voices),
            out_left: vec![0.0; config.max_samples_per_cycle],
            out_right: vec![0.0; config.max_samples_per_cycle],
            pitch_bend: 0,
            sustain_down: false,
            program: 0,
            events: Vec::with_capacity(config.event_queue_size),
            cc_events: Vec::with_capacity(config.event_queue_size),
            consumer,
            dropped_events: 0,
        };
        (channel, input)
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    /// Current value of a controller (index 128 is channel pressure).
    pub fn controller(&self, controller: u8) -> u8 {
        self.controller_table[usize::from(controller).min(128)]
    }

    /// Channel volume derived from CC#7.
    pub fn cc_volume(&self) -> f32 {
        f32::from(self.controller_table[7]) / 127.0
    }

    /// Number of sounding voices.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Clears per-cycle state and zeroes the mix bus.
    pub(crate) fn begin_cycle(&mut self, frames: usize) {
        for sample in self.out_left.iter_mut().take(frames) {
            *sample = 0.0;
        }
        for sample in self.out_right.iter_mut().take(frames) {
            *sample = 0.0;
        }
        self.events.clear();
        self.cc_events.clear();
        for key in &mut self.keys {
            key.pending.clear();
        }
    }

    /// Drains the incoming queue, resolving each event's fragment offset and
    /// keeping the per-cycle list sorted. Events arrive mostly in order, so
    /// a backwards insertion scan stays cheap.
    pub(crate) fn drain_incoming(&mut self, generator: &EventGenerator) {
        while let Some(raw) = self.consumer.try_pop() {
            if self.events.len() == self.events.capacity() {
                self.dropped_events += 1;
                continue;
            }
            let event = Event {
                kind: raw.kind,
                channel: raw.channel,
                fragment_pos: generator.resolve_fragment_pos(raw.timestamp),
            };
            let insert_at = self
                .events
                .iter()
                .rposition(|e| e.fragment_pos <= event.fragment_pos)
                .map(|i| i + 1)
                .unwrap_or(0);
            self.events.insert(insert_at, event);
        }
    }

    /// Appends an already-resolved event (postponed note-ons, scheduled
    /// events) keeping fragment order.
    pub(crate) fn push_resolved(&mut self, event: Event) -> bool {
        if self.events.len() == self.events.capacity() {
            self.dropped_events += 1;
            return false;
        }
        let insert_at = self
            .events
            .iter()
            .rposition(|e| e.fragment_pos <= event.fragment_pos)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.events.insert(insert_at, event);
        true
    }

    /// Queues a CC-class event for voice consumption.
    pub(crate) fn push_cc_event(&mut self, event: Event) {
        if self.cc_events.len() < self.cc_events.capacity() {
            self.cc_events.push(event);
        } else {
            self.dropped_events += 1;
        }
    }

    /// Queues a transition event onto every voice sounding on `key`.
    pub(crate) fn push_transition(&mut self, key: u8, event: Event) {
        let state = &mut self.keys[usize::from(key)];
        if state.pending.len() < state.pending.capacity() {
            state.pending.push(event);
        } else {
            self.dropped_events += 1;
        }
    }

    /// Note-on bookkeeping.
    pub(crate) fn key_down(&mut self, key: u8, velocity: u8, time: SchedTime) {
        let state = &mut self.keys[usize::from(key)];
        state.held = true;
        state.sustained = false;
        state.velocity = velocity;
        state.down_since = Some(time);
    }

    /// Note-off bookkeeping. Returns true when the release must fire now
    /// (sustain pedal up), false when it is deferred.
    pub(crate) fn key_up(&mut self, key: u8) -> bool {
        let state = &mut self.keys[usize::from(key)];
        state.held = false;
        if self.sustain_down {
            state.sustained = true;
            false
        } else {
            true
        }
    }

    /// Seconds `key` has been held as of `now`, for release-trigger decay.
    pub(crate) fn key_held_seconds(&self, key: u8, now: SchedTime, sample_rate: u32) -> f32 {
        match self.keys[usize::from(key)].down_since {
            Some(since) => (now.saturating_sub(since)) as f32 / sample_rate as f32,
            None => 0.0,
        }
    }

    /// Resets the controller table to power-on defaults (CC#121).
    pub(crate) fn reset_controllers(&mut self) {
        self.controller_table = [0u8; 129];
        self.controller_table[7] = DEFAULT_CHANNEL_VOLUME_CC;
        self.pitch_bend = 0;
        self.sustain_down = false;
    }

    /// Removes a freed voice index from its key's voice list.
    pub(crate) fn forget_voice(&mut self, key: u8, index: PoolIndex) {
        self.keys[usize::from(key)].voices.retain(|&v| v != index);
    }

    /// Split borrows for the render loop: voice pool, bus halves, CC events
    /// and key states.
    #[allow(clippy::type_complexity)]
    pub(crate) fn render_parts(
        &mut self,
    ) -> (
        &mut Pool<Voice>,
        &mut [f32],
        &mut [f32],
        &[Event],
        &[KeyState],
    ) {
        (
            &mut self.voices,
            &mut self.out_left,
            &mut self.out_right,
            &self.cc_events,
            &self.keys,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn test_channel() -> (EngineChannel, MidiInput) {
        EngineChannel::new(
            0,
            &EngineConfig {
                max_voices: 4,
                event_queue_size: 8,
                max_samples_per_cycle: 64,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_drain_sorts_by_fragment_pos() {
        let (mut channel, mut input) = test_channel();
        let mut generator = EventGenerator::new(44100);
        let begin = Instant::now();
        generator.update_fragment_time(begin, 441);

        use crate::event::EventKind;
        use std::time::Duration;
        // Push slightly out of order.
        input.push(
            EventKind::NoteOn {
                key: 60,
                velocity: 100,
            },
            begin + Duration::from_millis(5),
        );
        input.push(
            EventKind::NoteOn {
                key: 61,
                velocity: 100,
            },
            begin + Duration::from_millis(2),
        );
        input.push(
            EventKind::NoteOn {
                key: 62,
                velocity: 100,
            },
            begin + Duration::from_millis(8),
        );

        channel.drain_incoming(&generator);
        assert_eq!(channel.events.len(), 3);
        assert!(channel.events.windows(2).all(|w| w[0].fragment_pos <= w[1].fragment_pos));
    }

    #[test]
    fn test_sustain_defers_release() {
        let (mut channel, _input) = test_channel();
        channel.key_down(60, 100, 0);

        channel.sustain_down = true;
        assert!(!channel.key_up(60));
        assert!(channel.keys[60].sustained);

        channel.key_down(61, 100, 0);
        channel.sustain_down = false;
        assert!(channel.key_up(61));
    }

    #[test]
    fn test_reset_controllers() {
        let (mut channel, _input) = test_channel();
        channel.controller_table[1] = 90;
        channel.pitch_bend = 1000;
        channel.sustain_down = true;

        channel.reset_controllers();
        assert_eq!(channel.controller(1), 0);
        assert_eq!(channel.controller(7), DEFAULT_CHANNEL_VOLUME_CC);
        assert_eq!(channel.pitch_bend, 0);
        assert!(!channel.sustain_down);
    }

    #[test]
    fn test_key_held_seconds() {
        let (mut channel, _input) = test_channel();
        channel.key_down(60, 100, 44100);
        let held = channel.key_held_seconds(60, 44100 * 3, 44100);
        assert!((held - 2.0).abs() < 1e-6);
    }
}
