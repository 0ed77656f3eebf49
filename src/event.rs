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

//! Events, the event generator and the future-event scheduler.
//!
//! MIDI collaborators enqueue wall-clock-stamped raw events into a
//! per-channel SPSC queue. Once per audio cycle the engine resolves every
//! stamp to a fragment-relative sample offset; events that arrived shortly
//! before the fragment began clamp to offset 0.
//!
//! The scheduler clock counts sample frames since engine start in a 64-bit
//! counter. Even at 96 kHz it will not wrap for millions of years, so
//! scheduler times are effectively unique and strictly non-decreasing.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use midly::live::{LiveEvent, SystemCommon};
use midly::MidiMessage;
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Absolute scheduler time: sample frames since engine start.
pub type SchedTime = u64;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8, velocity: u8 },
    /// Transformed from a note-off or sustain-pedal-up transition.
    Release { key: u8 },
    /// Transformed from a note-on or sustain-pedal-down transition.
    CancelRelease { key: u8 },
    ControlChange { controller: u8, value: u8 },
    PitchBend { value: i16 },
    ChannelPressure { value: u8 },
    PolyPressure { key: u8, value: u8 },
    /// System exclusive; the payload stays off the audio path.
    Sysex,
}

/// An event as enqueued by a MIDI collaborator, stamped with wall-clock
/// time.
#[derive(Debug, Clone, Copy)]
pub struct RawEvent {
    pub kind: EventKind,
    pub channel: u8,
    pub timestamp: Instant,
}

/// An event after fragment-time resolution, as walked by the engine.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: EventKind,
    pub channel: u8,
    /// Sample offset within the current fragment; always less than the
    /// fragment's frame count.
    pub fragment_pos: u32,
}

/// Converts a parsed MIDI message into an event. Note-on with velocity zero
/// becomes note-off. Returns `None` for messages the engine has no use for.
pub fn event_kind_from_live(live: &LiveEvent) -> Option<(u8, EventKind)> {
    match live {
        LiveEvent::Midi { channel, message } => {
            let channel = u8::from(*channel);
            let kind = match message {
                MidiMessage::NoteOn { key, vel } if u8::from(*vel) == 0 => EventKind::NoteOff {
                    key: u8::from(*key),
                    velocity: 64,
                },
                MidiMessage::NoteOn { key, vel } => EventKind::NoteOn {
                    key: u8::from(*key),
                    velocity: u8::from(*vel),
                },
                MidiMessage::NoteOff { key, vel } => EventKind::NoteOff {
                    key: u8::from(*key),
                    velocity: u8::from(*vel),
                },
                MidiMessage::Controller { controller, value } => EventKind::ControlChange {
                    controller: u8::from(*controller),
                    value: u8::from(*value),
                },
                MidiMessage::PitchBend { bend } => EventKind::PitchBend {
                    value: bend.0.as_int() as i16 - 8192,
                },
                MidiMessage::ChannelAftertouch { vel } => EventKind::ChannelPressure {
                    value: u8::from(*vel),
                },
                MidiMessage::Aftertouch { key, vel } => EventKind::PolyPressure {
                    key: u8::from(*key),
                    value: u8::from(*vel),
                },
                MidiMessage::ProgramChange { .. } => return None,
            };
            Some((channel, kind))
        }
        LiveEvent::Common(SystemCommon::SysEx(_)) => Some((0, EventKind::Sysex)),
        _ => None,
    }
}

/// Producer half of a channel's incoming event queue, handed to the MIDI
/// collaborator.
pub struct MidiInput {
    channel: u8,
    producer: HeapProd<RawEvent>,
}

impl MidiInput {
    /// Enqueues an event. Returns false when the queue is full (the event is
    /// dropped).
    pub fn push(&mut self, kind: EventKind, timestamp: Instant) -> bool {
        self.producer
            .try_push(RawEvent {
                kind,
                channel: self.channel,
                timestamp,
            })
            .is_ok()
    }

    /// Parses and enqueues a live MIDI event. The channel nibble of the
    /// message is ignored; this queue's channel wins.
    pub fn push_live(&mut self, live: &LiveEvent, timestamp: Instant) -> bool {
        match event_kind_from_live(live) {
            Some((_, kind)) => self.push(kind, timestamp),
            None => true,
        }
    }
}

/// Creates a channel event queue, returning the collaborator-facing producer
/// and the engine-facing consumer.
pub fn event_queue(channel: u8, capacity: usize) -> (MidiInput, HeapCons<RawEvent>) {
    let (producer, consumer) = HeapRb::new(capacity.max(1)).split();
    (MidiInput { channel, producer }, consumer)
}

/// Resolves wall-clock stamps to fragment-relative sample offsets and keeps
/// the monotonic scheduler clock.
pub struct EventGenerator {
    sample_rate: u32,
    /// Frames in the current fragment.
    fragment_frames: u32,
    /// Wall-clock stamp of the current fragment's first sample.
    fragment_begin: Option<Instant>,
    /// Frames processed before the current fragment began.
    total_frames: SchedTime,
}

impl EventGenerator {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            fragment_frames: 0,
            fragment_begin: None,
            total_frames: 0,
        }
    }

    /// Opens a new fragment of `frames` frames beginning at `now`. Called
    /// once at the top of every audio cycle; rolls the previous fragment's
    /// frames into the scheduler clock.
    pub fn update_fragment_time(&mut self, now: Instant, frames: u32) {
        self.total_frames += SchedTime::from(self.fragment_frames);
        self.fragment_frames = frames;
        self.fragment_begin = Some(now);
    }

    /// Frames in the current fragment.
    pub fn fragment_frames(&self) -> u32 {
        self.fragment_frames
    }

    /// Scheduler time of the current fragment's first sample.
    pub fn fragment_start_time(&self) -> SchedTime {
        self.total_frames
    }

    /// Scheduler time of the first sample of the next fragment.
    pub fn fragment_end_time(&self) -> SchedTime {
        self.total_frames + SchedTime::from(self.fragment_frames)
    }

    /// Maps a wall-clock stamp into the current fragment. Stamps before the
    /// fragment begin clamp to 0; stamps past its end clamp to the last
    /// sample.
    pub fn resolve_fragment_pos(&self, timestamp: Instant) -> u32 {
        let Some(begin) = self.fragment_begin else {
            return 0;
        };
        if self.fragment_frames == 0 {
            return 0;
        }
        let elapsed = timestamp.saturating_duration_since(begin);
        let pos = (elapsed.as_secs_f64() * f64::from(self.sample_rate)) as u64;
        pos.min(u64::from(self.fragment_frames) - 1) as u32
    }

    /// Inserts `event` into `queue`, scheduled `microseconds` ahead of the
    /// sample `fragment_pos_base` of the current fragment.
    pub fn schedule_ahead_micros(
        &self,
        queue: &mut ScheduledQueue,
        event: Event,
        fragment_pos_base: u32,
        microseconds: u64,
    ) -> bool {
        let ahead =
            (f64::from(self.sample_rate) * (microseconds as f64 / 1_000_000.0)) as SchedTime;
        let time = self.total_frames + SchedTime::from(fragment_pos_base) + ahead;
        queue.insert(time, event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScheduledEvent {
    /// Scheduler time this event fires at.
    time: SchedTime,
    /// Insertion order; breaks ties.
    seq: u64,
    event_index: usize,
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered queue of events scheduled into the future, keyed by scheduler
/// time with ties broken by insertion order. Storage is preallocated; an
/// insert beyond capacity is refused rather than allocating on the audio
/// path.
pub struct ScheduledQueue {
    heap: BinaryHeap<Reverse<ScheduledEvent>>,
    events: Vec<Option<Event>>,
    free: Vec<usize>,
    seq: u64,
}

impl ScheduledQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            events: vec![None; capacity],
            free: (0..capacity).rev().collect(),
            seq: 0,
        }
    }

    /// Number of scheduled events.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Schedules `event` for `time`. Returns false when the queue is full.
    pub fn insert(&mut self, time: SchedTime, event: Event) -> bool {
        let Some(event_index) = self.free.pop() else {
            return false;
        };
        self.events[event_index] = Some(event);
        self.heap.push(Reverse(ScheduledEvent {
            time,
            seq: self.seq,
            event_index,
        }));
        self.seq += 1;
        true
    }

    /// Removes and returns the earliest event with time <= `end`, with its
    /// scheduler time. Repeated calls drain all due events in increasing
    /// time order.
    pub fn pop_next_scheduled_before(&mut self, end: SchedTime) -> Option<(SchedTime, Event)> {
        let Reverse(head) = *self.heap.peek()?;
        if head.time > end {
            return None;
        }
        let Reverse(node) = self.heap.pop()?;
        let event = self.events[node.event_index].take()?;
        self.free.push(node.event_index);
        Some((node.time, event))
    }
}
