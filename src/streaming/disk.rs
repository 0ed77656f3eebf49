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

//! The disk thread.
//!
//! Consumes stream orders, opens and seeks source files, and keeps every
//! active stream's ring topped up. Reads happen in whole granules to
//! amortize seeks; a stream is only refilled once the ring has at least a
//! granule of space. When a source is exhausted (and not looping) the slot
//! is marked [`StreamState::End`] and the voice drains the ring to its real
//! tail.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::SampleError;
use crate::sample::{LoopSpec, Sample, WavFrameReader};
use crate::streaming::stream::{DiskOrder, StreamClient, StreamState, StreamTable};
use crate::sync::ring::{audio_ring, RingWriter};

/// How long the disk thread sleeps waiting for orders between refill scans.
const ORDER_POLL_INTERVAL: Duration = Duration::from_millis(2);

struct ActiveStream {
    slot: usize,
    reader: WavFrameReader,
    writer: RingWriter,
    sample: Arc<Sample>,
    /// Next frame to read, relative to the sample's sub-range.
    position: u64,
    loop_spec: Option<LoopSpec>,
    loops_left: Option<u32>,
    /// Source exhausted; no further reads.
    finished: bool,
}

/// Owns the background streaming thread and hands out [`StreamClient`]s.
pub struct DiskThread {
    join_handle: Option<JoinHandle<()>>,
    client: StreamClient,
}

impl DiskThread {
    /// Spawns the disk thread with slots and ring sizes from `config`.
    pub fn spawn(config: &EngineConfig) -> Self {
        let table = Arc::new(StreamTable::new(config.max_streams));
        // Sized so a full table of voices can order and delete in one cycle.
        let (orders_tx, orders_rx) = bounded(config.max_streams * 2 + 8);

        let client = StreamClient {
            table: table.clone(),
            orders: orders_tx,
            next_order_id: Arc::new(AtomicU64::new(0)),
        };

        let ring_samples = config.stream_ring_frames * 2;
        let refill_frames = config.stream_refill_frames;
        let join_handle = thread::Builder::new()
            .name("polysampler-disk".into())
            .spawn(move || {
                crate::rt::demote_disk_thread();
                disk_loop(table, orders_rx, ring_samples, refill_frames);
            })
            .expect("failed to spawn disk thread");

        info!(
            streams = config.max_streams,
            ring_frames = config.stream_ring_frames,
            "Disk thread started"
        );

        Self {
            join_handle: Some(join_handle),
            client,
        }
    }

    /// A clonable client for ordering streams from the audio thread.
    pub fn client(&self) -> StreamClient {
        self.client.clone()
    }
}

impl Drop for DiskThread {
    fn drop(&mut self) {
        // Blocking send: the queue may be momentarily full, but the thread
        // keeps draining it, so the shutdown always lands.
        let _ = self.client.orders.send(DiskOrder::Shutdown);
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

fn disk_loop(
    table: Arc<StreamTable>,
    orders: Receiver<DiskOrder>,
    ring_samples: usize,
    refill_frames: usize,
) {
    let mut streams: Vec<Option<ActiveStream>> = (0..table.slots.len()).map(|_| None).collect();
    let mut scratch = vec![0.0f32; refill_frames * 2];

    loop {
        // Wait briefly for orders, then drain everything pending before the
        // refill pass.
        let first = match orders.recv_timeout(ORDER_POLL_INTERVAL) {
            Ok(order) => Some(order),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => return,
        };

        let mut next = first;
        loop {
            match next {
                Some(DiskOrder::Create {
                    slot,
                    order_id,
                    sample,
                    start_frame,
                    do_loop,
                }) => match create_stream(&table, slot, sample, start_frame, do_loop, ring_samples)
                {
                    Ok(stream) => {
                        debug!(slot, order_id, "Stream created");
                        streams[slot] = Some(stream);
                    }
                    Err(e) => {
                        // The voice sees a stream that immediately ended and
                        // terminates at its RAM tail.
                        error!(slot, error = %e, "Stream creation failed");
                        table.set_state(slot, StreamState::End);
                        park_empty_reader(&table, slot);
                    }
                },
                Some(DiskOrder::Delete { slot }) => {
                    streams[slot] = None;
                    *table.slots[slot].reader.lock() = None;
                    table.set_state(slot, StreamState::Unused);
                    debug!(slot, "Stream released");
                }
                Some(DiskOrder::Shutdown) => return,
                None => break,
            }
            next = orders.try_recv().ok();
        }

        // Refill passes: keep going while any stream accepts a granule, so
        // rings are topped up before the next order wait.
        loop {
            let mut progress = false;
            for stream in streams.iter_mut().flatten() {
                if stream.finished {
                    continue;
                }
                match refill(stream, &table, refill_frames, &mut scratch) {
                    Ok(wrote) => progress |= wrote,
                    Err(e) => {
                        warn!(slot = stream.slot, error = %e, "Stream read failed, ending stream");
                        stream.finished = true;
                        table.set_state(stream.slot, StreamState::End);
                    }
                }
            }
            if !progress {
                break;
            }
        }
    }
}

/// Parks an empty reader so a voice polling for a failed stream still gets
/// a (finished) stream instead of waiting forever.
fn park_empty_reader(table: &StreamTable, slot: usize) {
    let (_, reader) = audio_ring(1);
    *table.slots[slot].reader.lock() = Some((reader, 1));
}

fn create_stream(
    table: &StreamTable,
    slot: usize,
    sample: Arc<Sample>,
    start_frame: u64,
    do_loop: bool,
    ring_samples: usize,
) -> Result<ActiveStream, SampleError> {
    let mut reader = WavFrameReader::open(&sample.id().path)?;
    reader.seek_to_frame(sample.id().offset + start_frame)?;

    let (writer, ring_reader) = audio_ring(ring_samples);
    let channels = sample.channels() as usize;
    *table.slots[slot].reader.lock() = Some((ring_reader, channels));

    let loop_spec = if do_loop { sample.loop_spec() } else { None };
    let mut stream = ActiveStream {
        slot,
        reader,
        writer,
        position: start_frame,
        loops_left: loop_spec.and_then(|l| l.play_count),
        loop_spec,
        sample,
        finished: false,
    };

    // Prime the ring before publishing so the voice's first disk cycle
    // always finds data.
    let mut scratch = vec![0.0f32; 8192 * channels];
    loop {
        let chunk = (stream.writer.vacant_len() / channels).min(8192);
        if chunk == 0 || stream.finished {
            break;
        }
        refill_chunk(&mut stream, chunk, &mut scratch)?;
    }

    table.set_state(
        slot,
        if stream.finished {
            StreamState::End
        } else {
            StreamState::Active
        },
    );
    Ok(stream)
}

fn refill(
    stream: &mut ActiveStream,
    table: &StreamTable,
    refill_frames: usize,
    scratch: &mut Vec<f32>,
) -> Result<bool, SampleError> {
    let channels = stream.sample.channels() as usize;
    let vacant_frames = stream.writer.vacant_len() / channels;
    // Hysteresis: only touch the file once a whole granule fits.
    if vacant_frames < refill_frames {
        return Ok(false);
    }

    scratch.resize(refill_frames * channels, 0.0);
    let before = stream.position;
    refill_chunk(stream, refill_frames, scratch)?;

    if stream.finished {
        table.set_state(stream.slot, StreamState::End);
    }
    Ok(stream.position != before && !stream.finished)
}

/// Reads up to `max_frames` into the ring, honoring loop wraps. Sets
/// `finished` when the source is exhausted.
fn refill_chunk(
    stream: &mut ActiveStream,
    max_frames: usize,
    scratch: &mut [f32],
) -> Result<(), SampleError> {
    let channels = stream.sample.channels() as usize;
    let total = stream.sample.total_frames();

    // How far we may read contiguously from the current position.
    let read_end = match stream.loop_spec {
        Some(spec) if stream.loops_left != Some(0) => spec.end,
        _ => total,
    };
    if stream.position >= read_end {
        if stream.position >= total {
            stream.finished = true;
            return Ok(());
        }
        // Loop play count ran out; fall through reading toward the tail.
    }

    let vacant_frames = stream.writer.vacant_len() / channels;
    let contiguous = (read_end.saturating_sub(stream.position) as usize)
        .min(max_frames)
        .min(vacant_frames);
    if contiguous == 0 {
        stream.finished = stream.position >= total;
        return Ok(());
    }

    let want = contiguous * channels;
    let got = stream.reader.read_frames(&mut scratch[..want])?;
    if got == 0 {
        stream.finished = true;
        return Ok(());
    }
    stream.writer.write_slice(&scratch[..got * channels]);
    stream.position += got as u64;

    // Wrap at the loop end.
    if let Some(spec) = stream.loop_spec {
        if stream.position >= spec.end && stream.loops_left != Some(0) {
            if let Some(left) = stream.loops_left.as_mut() {
                *left -= 1;
            }
            if stream.loops_left != Some(0) {
                stream.position = spec.start;
                stream
                    .reader
                    .seek_to_frame(stream.sample.id().offset + spec.start)?;
            }
        }
    }

    if stream.position >= total && stream.loop_spec.map_or(true, |_| stream.loops_left == Some(0))
    {
        stream.finished = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleId;
    use crate::testutil;

    fn config() -> EngineConfig {
        EngineConfig {
            max_streams: 4,
            stream_ring_frames: 4096,
            stream_refill_frames: 512,
            max_samples_per_cycle: 64,
            max_pitch_octaves: 1,
            preload_frames: 256,
            ..Default::default()
        }
    }

    fn registered_sample(dir: &std::path::Path, frames: usize) -> Arc<Sample> {
        let path = testutil::write_ramp_wav(dir, "stream.wav", 1, 44100, frames);
        Arc::new(Sample::register(SampleId::whole_file(path), None, 256, 16).unwrap())
    }

    #[test]
    fn test_stream_order_and_pickup() {
        let dir = tempfile::tempdir().unwrap();
        let sample = registered_sample(dir.path(), 8192);

        let disk = DiskThread::spawn(&config());
        let client = disk.client();

        let handle = client.order_new_stream(&sample, 256, false).unwrap();
        let reader = testutil::eventually_some(
            || client.ask_for_created_stream(&handle),
            "stream was never created",
        );

        // The ring must hold the sample tail starting at frame 256.
        testutil::eventually(
            || reader.read_space_frames() >= 1024,
            "ring was never refilled",
        );
        let mut window = [0.0f32; 4];
        reader.peek_window(&mut window);
        assert!((window[0] - testutil::ramp_value(256)).abs() < 1e-6);

        client.release_stream(reader);
        testutil::eventually(
            || client.table.state(handle.slot) == StreamState::Unused,
            "slot was never reclaimed",
        );
    }

    #[test]
    fn test_stream_reaches_end_on_eof() {
        let dir = tempfile::tempdir().unwrap();
        let sample = registered_sample(dir.path(), 1024);

        let disk = DiskThread::spawn(&config());
        let client = disk.client();

        let handle = client.order_new_stream(&sample, 256, false).unwrap();
        let mut reader = testutil::eventually_some(
            || client.ask_for_created_stream(&handle),
            "stream was never created",
        );

        testutil::eventually(
            || reader.state() == StreamState::End,
            "stream never reached end",
        );
        // Exactly the tail (1024 - 256 frames) must be readable.
        assert_eq!(reader.read_space_frames(), 768);
        reader.advance_frames(768);
        assert!(reader.is_exhausted());

        client.release_stream(reader);
    }

    #[test]
    fn test_looping_stream_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let path = testutil::write_ramp_wav(dir.path(), "loop.wav", 1, 44100, 2048);
        let sample = Arc::new(
            Sample::register(
                SampleId::whole_file(path),
                Some(LoopSpec {
                    start: 512,
                    end: 1024,
                    play_count: None,
                }),
                256,
                16,
            )
            .unwrap(),
        );

        let disk = DiskThread::spawn(&config());
        let client = disk.client();

        let handle = client.order_new_stream(&sample, 256, true).unwrap();
        let mut reader = testutil::eventually_some(
            || client.ask_for_created_stream(&handle),
            "stream was never created",
        );

        // Drain more than two loop lengths; the stream must keep producing.
        let mut drained = 0usize;
        let mut last = Vec::new();
        while drained < 4096 {
            let space = reader.read_space_frames();
            if space == 0 {
                std::thread::sleep(std::time::Duration::from_millis(1));
                continue;
            }
            let take = space.min(256);
            let mut buf = vec![0.0f32; take];
            reader.peek_window(&mut buf);
            reader.advance_frames(take);
            drained += take;
            last = buf;
        }
        assert!(reader.state() != StreamState::End);
        // After wrapping, values must come from within the loop region.
        let frame = (last[last.len() - 1] * 32768.0).round() as i64;
        assert!(
            (512..1024).contains(&frame),
            "frame {frame} outside loop region"
        );

        client.release_stream(reader);
    }

    #[test]
    fn test_cancel_right_after_order() {
        let dir = tempfile::tempdir().unwrap();
        let sample = registered_sample(dir.path(), 8192);

        let disk = DiskThread::spawn(&config());
        let client = disk.client();

        let handle = client.order_new_stream(&sample, 256, false).unwrap();
        let slot = handle.slot;
        client.order_deletion(handle);

        testutil::eventually(
            || client.table.state(slot) == StreamState::Unused,
            "cancelled slot was never reclaimed",
        );
    }

    #[test]
    fn test_open_failure_marks_stream_end() {
        let dir = tempfile::tempdir().unwrap();
        let sample = registered_sample(dir.path(), 8192);
        drop(dir); // Remove the backing file before the disk thread opens it.

        let disk = DiskThread::spawn(&config());
        let client = disk.client();

        let handle = client.order_new_stream(&sample, 256, false).unwrap();
        let reader = testutil::eventually_some(
            || client.ask_for_created_stream(&handle),
            "failed stream never surfaced",
        );
        assert_eq!(reader.state(), StreamState::End);
        assert_eq!(reader.read_space_frames(), 0);
        assert!(reader.is_exhausted());

        client.release_stream(reader);
    }
}
