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

//! Single-producer/single-consumer ring buffer of audio samples.
//!
//! One half lives on the disk thread (writer), the other on the audio thread
//! (reader). All operations are wait-free; the producer-only and consumer-only
//! monotonic counters are the sole synchronization. Writes that hit the wrap
//! point are split into two contiguous copies internally.
//!
//! Samples are stored as `f32` bit patterns in atomic cells so both halves can
//! address the storage without locks. The reader side supports non-consuming
//! window reads (`peek_padded`), which is what the interpolator needs: it
//! looks a few samples past the current playback position without committing
//! the read.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

struct RingShared {
    /// Sample storage as f32 bit patterns.
    slots: Box<[AtomicU32]>,
    /// Total samples ever written. Only the writer stores this.
    write: AtomicUsize,
    /// Total samples ever read. Only the reader stores this.
    read: AtomicUsize,
}

impl RingShared {
    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Creates a ring with room for `capacity` samples and splits it into its
/// writer and reader halves.
pub fn audio_ring(capacity: usize) -> (RingWriter, RingReader) {
    assert!(capacity > 0, "ring capacity must be non-zero");
    let slots = (0..capacity).map(|_| AtomicU32::new(0)).collect();
    let shared = Arc::new(RingShared {
        slots,
        write: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
    });
    (
        RingWriter {
            shared: shared.clone(),
        },
        RingReader { shared },
    )
}

/// The producer half of the ring.
pub struct RingWriter {
    shared: Arc<RingShared>,
}

impl RingWriter {
    /// Number of samples that can currently be written.
    pub fn vacant_len(&self) -> usize {
        let read = self.shared.read.load(Ordering::Acquire);
        let write = self.shared.write.load(Ordering::Relaxed);
        self.shared.capacity() - write.wrapping_sub(read)
    }

    /// Total capacity in samples.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Writes as much of `data` as fits and commits it. Returns the number of
    /// samples written.
    pub fn write_slice(&mut self, data: &[f32]) -> usize {
        self.fill(data.len(), |slot, i| slot.store(data[i].to_bits(), Ordering::Relaxed))
    }

    /// Writes `count` samples of silence. Returns the number of samples
    /// actually written.
    pub fn write_silence(&mut self, count: usize) -> usize {
        self.fill(count, |slot, _| slot.store(0, Ordering::Relaxed))
    }

    fn fill(&mut self, count: usize, store: impl Fn(&AtomicU32, usize)) -> usize {
        let read = self.shared.read.load(Ordering::Acquire);
        let write = self.shared.write.load(Ordering::Relaxed);
        let vacant = self.shared.capacity() - write.wrapping_sub(read);
        let count = count.min(vacant);

        let capacity = self.shared.capacity();
        for i in 0..count {
            let index = write.wrapping_add(i) % capacity;
            store(&self.shared.slots[index], i);
        }

        self.shared
            .write
            .store(write.wrapping_add(count), Ordering::Release);
        count
    }
}

/// The consumer half of the ring.
pub struct RingReader {
    shared: Arc<RingShared>,
}

impl RingReader {
    /// Number of committed samples available for reading.
    pub fn occupied_len(&self) -> usize {
        let write = self.shared.write.load(Ordering::Acquire);
        let read = self.shared.read.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    /// Total capacity in samples.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Copies samples starting `offset` past the read position into `out`
    /// without consuming them. Positions beyond the committed region are
    /// filled with silence. Returns the number of real (non-silence) samples
    /// copied.
    pub fn peek_padded(&self, offset: usize, out: &mut [f32]) -> usize {
        let write = self.shared.write.load(Ordering::Acquire);
        let read = self.shared.read.load(Ordering::Relaxed);
        let occupied = write.wrapping_sub(read);

        let capacity = self.shared.capacity();
        let mut real = 0;
        for (i, sample) in out.iter_mut().enumerate() {
            let logical = offset + i;
            if logical < occupied {
                let index = read.wrapping_add(logical) % capacity;
                *sample = f32::from_bits(self.shared.slots[index].load(Ordering::Relaxed));
                real += 1;
            } else {
                *sample = 0.0;
            }
        }
        real
    }

    /// Consumes up to `count` samples. Returns the number actually consumed.
    pub fn advance(&mut self, count: usize) -> usize {
        let write = self.shared.write.load(Ordering::Acquire);
        let read = self.shared.read.load(Ordering::Relaxed);
        let count = count.min(write.wrapping_sub(read));
        self.shared
            .read
            .store(read.wrapping_add(count), Ordering::Release);
        count
    }

    /// Copies and consumes up to `out.len()` samples. Short reads leave the
    /// tail of `out` untouched. Returns the number of samples read.
    pub fn pop_slice(&mut self, out: &mut [f32]) -> usize {
        let available = self.occupied_len().min(out.len());
        self.peek_padded(0, &mut out[..available]);
        self.advance(available)
    }
}
