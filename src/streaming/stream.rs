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

//! Stream slots and the audio-thread-facing stream API.
//!
//! A stream slot is claimed on the audio thread when a voice orders a
//! stream, then fully initialized by the disk thread. The voice polls
//! [`StreamClient::ask_for_created_stream`] on its next cycles to take the
//! reader half once the disk thread has primed the ring.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::error::StreamError;
use crate::sample::Sample;
use crate::sync::ring::RingReader;

/// Lifecycle of a stream slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// Free for allocation.
    Unused = 0,
    /// Claimed by a voice; the disk thread has not picked the order up yet.
    Ordered = 1,
    /// The disk thread primed the ring and keeps refilling it.
    Active = 2,
    /// The source is exhausted; the ring holds the final tail.
    End = 3,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::Ordered,
            2 => StreamState::Active,
            3 => StreamState::End,
            _ => StreamState::Unused,
        }
    }
}

pub(crate) struct StreamSlot {
    pub(crate) state: AtomicU8,
    pub(crate) order_id: AtomicU64,
    /// Consumer half and channel count parked by the disk thread for the
    /// voice to take.
    pub(crate) reader: Mutex<Option<(RingReader, usize)>>,
}

pub(crate) struct StreamTable {
    pub(crate) slots: Vec<StreamSlot>,
}

impl StreamTable {
    pub(crate) fn new(slots: usize) -> Self {
        Self {
            slots: (0..slots)
                .map(|_| StreamSlot {
                    state: AtomicU8::new(StreamState::Unused as u8),
                    order_id: AtomicU64::new(0),
                    reader: Mutex::new(None),
                })
                .collect(),
        }
    }

    pub(crate) fn state(&self, slot: usize) -> StreamState {
        StreamState::from_u8(self.slots[slot].state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, slot: usize, state: StreamState) {
        self.slots[slot].state.store(state as u8, Ordering::Release);
    }
}

/// Orders travelling from the audio thread to the disk thread.
pub(crate) enum DiskOrder {
    Create {
        slot: usize,
        order_id: u64,
        sample: Arc<Sample>,
        /// First frame (relative to the sample) the stream starts at.
        start_frame: u64,
        /// Whether the disk thread wraps reads at the loop boundaries.
        do_loop: bool,
    },
    Delete {
        slot: usize,
    },
    Shutdown,
}

/// Handle returned by a stream order; identifies the slot until the created
/// stream is picked up.
#[derive(Debug)]
pub struct StreamHandle {
    pub(crate) slot: usize,
    pub(crate) order_id: u64,
}

/// The voice-side view of a created stream: the ring consumer plus slot
/// state.
pub struct StreamReader {
    pub(crate) ring: RingReader,
    pub(crate) slot: usize,
    pub(crate) channels: usize,
    pub(crate) table: Arc<StreamTable>,
}

impl StreamReader {
    /// Committed whole frames available for reading.
    pub fn read_space_frames(&self) -> usize {
        self.ring.occupied_len() / self.channels
    }

    /// Copies `out.len() / channels` frames starting at the read position
    /// without consuming them; frames past the committed region read as
    /// silence (so the interpolator window is always satisfiable).
    pub fn peek_window(&self, out: &mut [f32]) {
        self.ring.peek_padded(0, out);
    }

    /// Consumes up to `frames` whole frames. Returns the number consumed.
    pub fn advance_frames(&mut self, frames: usize) -> usize {
        let available = self.read_space_frames().min(frames);
        self.ring.advance(available * self.channels);
        available
    }

    /// Current state of the producing slot.
    pub fn state(&self) -> StreamState {
        self.table.state(self.slot)
    }

    /// True once the source hit its end and the ring is fully drained.
    pub fn is_exhausted(&self) -> bool {
        self.state() == StreamState::End && self.ring.occupied_len() < self.channels
    }
}

/// Shared, audio-thread-safe surface for ordering and releasing streams.
#[derive(Clone)]
pub struct StreamClient {
    pub(crate) table: Arc<StreamTable>,
    pub(crate) orders: Sender<DiskOrder>,
    pub(crate) next_order_id: Arc<AtomicU64>,
}

impl StreamClient {
    /// Allocates a stream slot and records the order for the disk thread.
    /// Returns immediately; the stream is not usable until
    /// [`ask_for_created_stream`](Self::ask_for_created_stream) yields it.
    pub fn order_new_stream(
        &self,
        sample: &Arc<Sample>,
        start_frame: u64,
        do_loop: bool,
    ) -> Result<StreamHandle, StreamError> {
        let slot = self
            .table
            .slots
            .iter()
            .position(|s| {
                s.state
                    .compare_exchange(
                        StreamState::Unused as u8,
                        StreamState::Ordered as u8,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            })
            .ok_or(StreamError::NoFreeSlot)?;

        let order_id = self.next_order_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.table.slots[slot].order_id.store(order_id, Ordering::Release);

        let order = DiskOrder::Create {
            slot,
            order_id,
            sample: sample.clone(),
            start_frame,
            do_loop,
        };
        if self.orders.try_send(order).is_err() {
            self.table.set_state(slot, StreamState::Unused);
            return Err(StreamError::OrderQueueFull);
        }
        Ok(StreamHandle { slot, order_id })
    }

    /// Picks up the stream for `handle` once the disk thread initialized it.
    /// Returns `None` while the order is still pending.
    pub fn ask_for_created_stream(&self, handle: &StreamHandle) -> Option<StreamReader> {
        let slot = &self.table.slots[handle.slot];
        if slot.order_id.load(Ordering::Acquire) != handle.order_id {
            return None;
        }
        match self.table.state(handle.slot) {
            StreamState::Active | StreamState::End => {}
            _ => return None,
        }
        // Uncontended in practice; the disk thread only touches this lock
        // once per order.
        let mut parked = slot.reader.try_lock()?;
        parked.take().map(|(ring, channels)| StreamReader {
            ring,
            slot: handle.slot,
            channels,
            table: self.table.clone(),
        })
    }

    /// Marks a stream the voice never picked up for release.
    pub fn order_deletion(&self, handle: StreamHandle) {
        let _ = self.orders.try_send(DiskOrder::Delete { slot: handle.slot });
    }

    /// Releases a stream the voice holds the reader of.
    pub fn release_stream(&self, reader: StreamReader) {
        let slot = reader.slot;
        drop(reader);
        let _ = self.orders.try_send(DiskOrder::Delete { slot });
    }
}
