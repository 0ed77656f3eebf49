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

//! The engine: the per-cycle tick.
//!
//! Once per audio cycle the engine snapshots routing state through the
//! config handoff, resolves and orders incoming MIDI events, triggers,
//! releases and steals voices, renders every live voice into its channel
//! bus, and mixes the buses into the caller's output buffers. The whole
//! tick runs on the audio thread and never allocates, blocks or fails; all
//! real-time anomalies are reported through [`Diagnostics`] counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::channel::EngineChannel;
use crate::config::{EngineConfig, VoiceStealPolicy, INTERPOLATOR_WINDOW, SUBFRAGMENT_SIZE};
use crate::dsp::synth::{default_synthesis, SynthesisRoutine};
use crate::error::ControlError;
use crate::event::{
    Event, EventGenerator, EventKind, MidiInput, SchedTime, ScheduledQueue,
};
use crate::instrument::Instrument;
use crate::pool::PoolIndex;
use crate::streaming::{DiskThread, StreamClient};
use crate::sync::handoff::{config_handoff, ConfigReader, ConfigUpdater};
use crate::voice::{RenderContext, RenderOutcome, TriggerParams, Voice, VoiceType};

/// RT-safe counters for anomalies on the audio path. Logging happens off
/// the audio thread by whoever polls these.
#[derive(Debug, Default)]
pub struct Diagnostics {
    stream_starved: AtomicU64,
    pool_exhausted: AtomicU64,
    voices_stolen: AtomicU64,
    trigger_failures: AtomicU64,
}

impl Diagnostics {
    pub(crate) fn count_stream_starved(&self) {
        self.stream_starved.fetch_add(1, Ordering::Relaxed);
    }

    fn count_pool_exhausted(&self) {
        self.pool_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    fn count_voice_stolen(&self) {
        self.voices_stolen.fetch_add(1, Ordering::Relaxed);
    }

    fn count_trigger_failure(&self) {
        self.trigger_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Times a voice found its stream starved or missing.
    pub fn stream_starved(&self) -> u64 {
        self.stream_starved.load(Ordering::Relaxed)
    }

    /// Times a trigger found the voice pool exhausted.
    pub fn pool_exhausted(&self) -> u64 {
        self.pool_exhausted.load(Ordering::Relaxed)
    }

    /// Voices killed to make room for new ones.
    pub fn voices_stolen(&self) -> u64 {
        self.voices_stolen.load(Ordering::Relaxed)
    }

    /// Triggers that produced no voice (decayed release trigger, stream
    /// order failure).
    pub fn trigger_failures(&self) -> u64 {
        self.trigger_failures.load(Ordering::Relaxed)
    }
}

/// Per-channel routing state published through the config handoff.
#[derive(Clone, Default)]
pub struct ChannelRouting {
    pub instrument: Option<Arc<Instrument>>,
    pub mute: bool,
    pub volume: f32,
}

/// Routing state mutated by the control thread and snapshotted by the audio
/// thread each cycle.
#[derive(Clone)]
pub struct Routing {
    pub channels: Vec<ChannelRouting>,
    /// Per-pitch-class tuning offset in cents, mixed into every voice's
    /// pitch base.
    pub scale_tuning: [i8; 12],
    pub global_volume: f32,
}

impl Routing {
    fn new(channels: usize) -> Self {
        Self {
            channels: (0..channels)
                .map(|_| ChannelRouting {
                    instrument: None,
                    mute: false,
                    volume: 1.0,
                })
                .collect(),
            scale_tuning: [0; 12],
            global_volume: 1.0,
        }
    }
}

/// Control-thread handle for mutating routing state. Every mutation is
/// applied to both handoff instances with a switch in between, so the audio
/// thread sees it within two cycle boundaries.
pub struct EngineController {
    updater: ConfigUpdater<Routing>,
}

impl EngineController {
    /// Assigns (or clears) the instrument of a channel.
    pub fn set_instrument(&mut self, channel: usize, instrument: Option<Arc<Instrument>>) {
        info!(channel, instrument = ?instrument.as_ref().map(|i| i.name().to_string()), "Routing instrument");
        self.updater
            .update_with(|routing| routing.channels[channel].instrument = instrument.clone());
    }

    pub fn set_mute(&mut self, channel: usize, mute: bool) {
        self.updater
            .update_with(|routing| routing.channels[channel].mute = mute);
    }

    pub fn set_channel_volume(&mut self, channel: usize, volume: f32) {
        self.updater
            .update_with(|routing| routing.channels[channel].volume = volume);
    }

    pub fn set_global_volume(&mut self, volume: f32) {
        self.updater
            .update_with(|routing| routing.global_volume = volume);
    }

    pub fn set_scale_tuning(&mut self, tuning: [i8; 12]) {
        self.updater
            .update_with(|routing| routing.scale_tuning = tuning);
    }

    /// Applies an arbitrary routing mutation through the handoff protocol.
    pub fn update_with(&mut self, mutate: impl Fn(&mut Routing)) {
        self.updater.update_with(mutate);
    }
}

/// The real-time voice rendering engine.
pub struct Engine {
    config: EngineConfig,
    channels: Vec<EngineChannel>,
    midi_inputs: Vec<Option<MidiInput>>,
    event_generator: EventGenerator,
    scheduled: ScheduledQueue,
    disk: DiskThread,
    stream_client: StreamClient,
    synthesis: Box<dyn SynthesisRoutine>,
    routing_reader: ConfigReader<Routing>,
    diagnostics: Arc<Diagnostics>,
    /// Scratch for disk-stream interpolation windows.
    window_scratch: Vec<f32>,
    /// Scratch for voice index snapshots.
    voice_scratch: Vec<PoolIndex>,
    /// Note-ons postponed by voice stealing, replayed next cycle.
    postponed: Vec<Event>,
}

impl Engine {
    /// Builds an engine and its control handle from a validated config,
    /// using the default scalar synthesis routine.
    pub fn new(config: EngineConfig) -> Result<(Engine, EngineController), ControlError> {
        Self::with_synthesis(config, default_synthesis())
    }

    /// Builds an engine with an explicit synthesis routine.
    pub fn with_synthesis(
        config: EngineConfig,
        synthesis: Box<dyn SynthesisRoutine>,
    ) -> Result<(Engine, EngineController), ControlError> {
        config.validate().map_err(ControlError::BadParameter)?;

        let mut channels = Vec::with_capacity(config.channels);
        let mut midi_inputs = Vec::with_capacity(config.channels);
        for index in 0..config.channels {
            let (channel, input) = EngineChannel::new(index as u8, &config);
            channels.push(channel);
            midi_inputs.push(Some(input));
        }

        let disk = DiskThread::spawn(&config);
        let stream_client = disk.client();

        let (updater, routing_reader) = config_handoff(Routing::new(config.channels));

        let window_samples =
            ((SUBFRAGMENT_SIZE << config.max_pitch_octaves) + INTERPOLATOR_WINDOW + 2) * 2;

        info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            max_voices = config.max_voices,
            "Engine created"
        );

        let engine = Engine {
            event_generator: EventGenerator::new(config.sample_rate),
            scheduled: ScheduledQueue::with_capacity(config.event_queue_size),
            stream_client,
            disk,
            synthesis,
            routing_reader,
            diagnostics: Arc::new(Diagnostics::default()),
            window_scratch: Vec::with_capacity(window_samples),
            voice_scratch: Vec::with_capacity(config.max_voices),
            postponed: Vec::with_capacity(config.max_voices),
            midi_inputs,
            channels,
            config,
        };
        Ok((engine, EngineController { updater }))
    }

    /// Takes the MIDI input producer for a channel. Each can be taken once
    /// and handed to the MIDI collaborator thread.
    pub fn take_midi_input(&mut self, channel: usize) -> Option<MidiInput> {
        self.midi_inputs.get_mut(channel)?.take()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        self.diagnostics.clone()
    }

    /// A client for the streaming subsystem (exposed for collaborators that
    /// pre-warm streams).
    pub fn stream_client(&self) -> StreamClient {
        self.disk.client()
    }

    /// Voices currently sounding on a channel.
    pub fn active_voices(&self, channel: usize) -> usize {
        self.channels.get(channel).map_or(0, |c| c.active_voices())
    }

    /// Total events dropped because per-cycle lists were full.
    pub fn dropped_events(&self) -> u64 {
        self.channels.iter().map(|c| c.dropped_events).sum()
    }

    /// Schedules `event` for `microseconds` after sample `fragment_pos_base`
    /// of the current fragment. The event is delivered, in scheduler-time
    /// order, in the cycle its time falls into. Returns false when the
    /// scheduling queue is full.
    pub fn schedule_event_ahead(
        &mut self,
        event: Event,
        fragment_pos_base: u32,
        microseconds: u64,
    ) -> bool {
        self.event_generator.schedule_ahead_micros(
            &mut self.scheduled,
            event,
            fragment_pos_base,
            microseconds,
        )
    }

    /// Renders one fragment into per-channel output buffers. `now` is the
    /// wall-clock stamp of the fragment's first sample; both buffers must be
    /// the same length, at most `max_samples_per_cycle`.
    pub fn render(&mut self, now: Instant, out_left: &mut [f32], out_right: &mut [f32]) {
        let frames = out_left
            .len()
            .min(out_right.len())
            .min(self.config.max_samples_per_cycle);
        if frames == 0 {
            return;
        }
        for sample in out_left[..frames].iter_mut() {
            *sample = 0.0;
        }
        for sample in out_right[..frames].iter_mut() {
            *sample = 0.0;
        }

        let config = &self.config;
        let channels = &mut self.channels;
        let event_generator = &mut self.event_generator;
        let scheduled = &mut self.scheduled;
        let stream_client = &self.stream_client;
        let synthesis = self.synthesis.as_ref();
        let diagnostics = self.diagnostics.as_ref();
        let window_scratch = &mut self.window_scratch;
        let voice_scratch = &mut self.voice_scratch;
        let postponed = &mut self.postponed;

        // 1. Snapshot routing for the whole cycle.
        let routing = self.routing_reader.lock();

        // 2. Open the fragment.
        event_generator.update_fragment_time(now, frames as u32);
        let fragment_start = event_generator.fragment_start_time();

        // 3. Resolve and order this cycle's events.
        for channel in channels.iter_mut() {
            channel.begin_cycle(frames);
            channel.drain_incoming(event_generator);
        }
        for event in postponed.drain(..) {
            if let Some(channel) = channels.get_mut(usize::from(event.channel)) {
                channel.push_resolved(Event {
                    fragment_pos: 0,
                    ..event
                });
            }
        }
        let due_until = event_generator.fragment_end_time().saturating_sub(1);
        while let Some((time, event)) = scheduled.pop_next_scheduled_before(due_until) {
            if let Some(channel) = channels.get_mut(usize::from(event.channel)) {
                channel.push_resolved(Event {
                    fragment_pos: time.saturating_sub(fragment_start).min(frames as u64 - 1)
                        as u32,
                    ..event
                });
            }
        }

        let ctx = CycleCtx {
            config,
            routing: &routing,
            stream_client,
            diagnostics,
            fragment_start,
        };

        // 4. Walk events in fragment order.
        for ci in 0..channels.len() {
            let mut index = 0;
            while index < channels[ci].events.len() {
                let event = channels[ci].events[index];
                index += 1;
                process_event(&ctx, channels, postponed, ci, event);
            }
        }

        // 5. Render all live voices into the channel buses, then 6. mix the
        // buses into the device output.
        for ci in 0..channels.len() {
            let muted = ctx.routing.channels[ci].mute;
            let channel_gain = ctx.routing.channels[ci].volume
                * ctx.routing.global_volume
                * channels[ci].cc_volume();

            channels[ci].voices.collect_indices(voice_scratch);
            for &vi in voice_scratch.iter() {
                let (voices, bus_left, bus_right, cc_events, keys) = channels[ci].render_parts();
                let Some(voice) = voices.get_mut(vi) else {
                    continue;
                };
                let key = voice.key();

                let outcome = voice.render(&mut RenderContext {
                    frames,
                    cc_events,
                    transition_events: &keys[usize::from(key)].pending,
                    global_volume: channel_gain,
                    muted,
                    out_left: &mut bus_left[..frames],
                    out_right: &mut bus_right[..frames],
                    synthesis,
                    stream_client,
                    window: &mut *window_scratch,
                    sample_rate: config.sample_rate,
                    diagnostics,
                });

                if outcome == RenderOutcome::Finished {
                    if let Some(mut voice) = voices.free(vi) {
                        voice.cleanup(stream_client);
                    }
                    channels[ci].forget_voice(key, vi);
                }
            }

            let channel = &channels[ci];
            for i in 0..frames {
                out_left[i] += channel.out_left[i];
                out_right[i] += channel.out_right[i];
            }
        }

        // 7. The routing guard drops here, releasing the reader lock.
    }
}

struct CycleCtx<'a> {
    config: &'a EngineConfig,
    routing: &'a Routing,
    stream_client: &'a StreamClient,
    diagnostics: &'a Diagnostics,
    fragment_start: SchedTime,
}

fn process_event(
    ctx: &CycleCtx<'_>,
    channels: &mut [EngineChannel],
    postponed: &mut Vec<Event>,
    ci: usize,
    event: Event,
) {
    match event.kind {
        EventKind::NoteOn { key, velocity } => {
            let time = ctx.fragment_start + SchedTime::from(event.fragment_pos);
            let channel = &mut channels[ci];
            // Re-pressing a releasing key cancels the release in flight.
            let key_state = &channel.keys[usize::from(key)];
            if !key_state.held && !key_state.voices.is_empty() {
                channel.push_transition(
                    key,
                    Event {
                        kind: EventKind::CancelRelease { key },
                        ..event
                    },
                );
            }
            channel.key_down(key, velocity, time);
            trigger_voices(ctx, channel, postponed, event, key, velocity, false);
        }
        EventKind::NoteOff { key, .. } => {
            let channel = &mut channels[ci];
            if channel.key_up(key) {
                release_key(ctx, channel, postponed, event, key);
            }
        }
        EventKind::Release { key } => {
            channels[ci].push_transition(key, event);
        }
        EventKind::CancelRelease { key } => {
            channels[ci].push_transition(key, event);
        }
        EventKind::ControlChange { controller, value } => {
            handle_control_change(ctx, channels, postponed, ci, event, controller, value);
        }
        EventKind::PitchBend { value } => {
            let channel = &mut channels[ci];
            channel.pitch_bend = value;
            channel.push_cc_event(event);
        }
        EventKind::ChannelPressure { value } => {
            let channel = &mut channels[ci];
            channel.controller_table[128] = value;
            channel.push_cc_event(event);
        }
        EventKind::PolyPressure { .. } => {
            // Accepted but not routed anywhere yet.
        }
        EventKind::Sysex => {
            // Engine-global; nothing the render path acts on.
        }
    }
}

fn handle_control_change(
    ctx: &CycleCtx<'_>,
    channels: &mut [EngineChannel],
    postponed: &mut Vec<Event>,
    ci: usize,
    event: Event,
    controller: u8,
    value: u8,
) {
    let channel = &mut channels[ci];
    match controller {
        // Sustain pedal: transitions synthesize release / cancel-release.
        64 => {
            let was_down = channel.sustain_down;
            let down = value >= 64;
            channel.sustain_down = down;
            if down && !was_down {
                for key in 0..128u8 {
                    let state = &channel.keys[usize::from(key)];
                    if !state.held && !state.voices.is_empty() {
                        channel.keys[usize::from(key)].sustained = true;
                        channel.push_transition(
                            key,
                            Event {
                                kind: EventKind::CancelRelease { key },
                                ..event
                            },
                        );
                    }
                }
            } else if !down && was_down {
                for key in 0..128u8 {
                    if channel.keys[usize::from(key)].sustained {
                        channel.keys[usize::from(key)].sustained = false;
                        release_key(ctx, channel, postponed, event, key);
                    }
                }
            }
        }
        // All sound off: kill everything at the event offset.
        120 => {
            let mut index = channel.voices.first_index();
            while let Some(vi) = index {
                index = channel.voices.next_index(vi);
                if let Some(voice) = channel.voices.get_mut(vi) {
                    voice.kill(event.fragment_pos);
                }
            }
        }
        // Reset all controllers.
        121 => channel.reset_controllers(),
        // All notes off: release every held or sustained key.
        123 => {
            for key in 0..128u8 {
                let state = &mut channel.keys[usize::from(key)];
                if state.held || state.sustained {
                    state.held = false;
                    state.sustained = false;
                    release_key(ctx, channel, postponed, event, key);
                }
            }
        }
        _ => {}
    }
    channel.controller_table[usize::from(controller)] = value;
    channel.push_cc_event(event);
}

/// Queues the release transition for a key and spawns its release-trigger
/// voices, if the instrument defines any.
fn release_key(
    ctx: &CycleCtx<'_>,
    channel: &mut EngineChannel,
    postponed: &mut Vec<Event>,
    event: Event,
    key: u8,
) {
    channel.push_transition(
        key,
        Event {
            kind: EventKind::Release { key },
            ..event
        },
    );
    let velocity = channel.keys[usize::from(key)].velocity;
    trigger_voices(ctx, channel, postponed, event, key, velocity, true);
}

/// The trigger path: region lookup, dimension selection, key-group
/// exclusion, voice allocation and stealing.
fn trigger_voices(
    ctx: &CycleCtx<'_>,
    channel: &mut EngineChannel,
    postponed: &mut Vec<Event>,
    event: Event,
    key: u8,
    velocity: u8,
    release_trigger: bool,
) {
    let ci = usize::from(channel.index());
    let Some(instrument) = ctx.routing.channels[ci].instrument.clone() else {
        return;
    };

    let trigger_time = ctx.fragment_start + SchedTime::from(event.fragment_pos);
    let key_held_seconds =
        channel.key_held_seconds(key, trigger_time, ctx.config.sample_rate);

    let mut layer: u8 = 0;
    for region in instrument.regions_on_key(key, velocity) {
        let Some(dimension_index) = region
            .dimensions
            .iter()
            .position(|d| d.release_trigger == release_trigger && d.velocity_range.contains(&velocity))
        else {
            continue;
        };
        let dimension = &region.dimensions[dimension_index];
        // A silent sample never produces a voice.
        if dimension.sample.total_frames() == 0 {
            continue;
        }

        let has_release_dimensions = region.dimensions.iter().any(|d| d.release_trigger);
        let voice_type = if release_trigger {
            VoiceType::ReleaseTrigger
        } else if has_release_dimensions {
            VoiceType::ReleaseTriggerRequired
        } else {
            VoiceType::Normal
        };

        // Only the first layer joins the key group, so layered voices of
        // the same note-on do not kill each other.
        let key_group = if layer == 0 && !release_trigger {
            region.key_group
        } else {
            0
        };
        if key_group != 0 {
            kill_key_group(channel, key_group, event.fragment_pos);
        }

        // Steal before constructing the voice so a refused trigger never
        // orders a stream.
        if channel.voices.len() == channel.voices.capacity() {
            ctx.diagnostics.count_pool_exhausted();
            if let Some(victim) = pick_victim(channel, ctx.config.voice_steal_policy, key) {
                if let Some(voice) = channel.voices.get_mut(victim) {
                    voice.kill(event.fragment_pos);
                }
                ctx.diagnostics.count_voice_stolen();
            }
            // Retry after the kill completes, one cycle later.
            if postponed.len() < postponed.capacity() {
                postponed.push(event);
            }
            return;
        }

        let voice = Voice::trigger(TriggerParams {
            fragment_pos: event.fragment_pos,
            key,
            velocity,
            layer,
            voice_type,
            key_group,
            region,
            dimension_index,
            pitch_bend: channel.pitch_bend,
            controller_table: &channel.controller_table,
            scale_tuning: &ctx.routing.scale_tuning,
            key_held_seconds,
            trigger_time,
            config: ctx.config,
            stream_client: ctx.stream_client,
        });
        match voice {
            Some(voice) => {
                // Cannot fail: capacity was checked above.
                if let Some(index) = channel.voices.alloc(voice) {
                    channel.keys[usize::from(key)].voices.push(index);
                }
            }
            None => ctx.diagnostics.count_trigger_failure(),
        }
        layer = layer.saturating_add(1);
    }
}

/// Key-group exclusion: a trigger in a non-zero group kills every other
/// voice of that group on the channel.
fn kill_key_group(channel: &mut EngineChannel, key_group: u32, fragment_pos: u32) {
    let mut index = channel.voices.first_index();
    while let Some(vi) = index {
        index = channel.voices.next_index(vi);
        if let Some(voice) = channel.voices.get_mut(vi) {
            if voice.key_group() == key_group {
                voice.kill(fragment_pos);
            }
        }
    }
}

/// Victim selection for voice stealing.
fn pick_victim(
    channel: &EngineChannel,
    policy: VoiceStealPolicy,
    incoming_key: u8,
) -> Option<PoolIndex> {
    match policy {
        VoiceStealPolicy::OldestVoiceOnKey => channel
            .voices
            .iter()
            .filter(|(_, v)| v.key() == incoming_key)
            .min_by_key(|(_, v)| v.trigger_time())
            .map(|(i, _)| i)
            .or_else(|| pick_victim(channel, VoiceStealPolicy::OldestKey, incoming_key)),
        VoiceStealPolicy::OldestKey => channel
            .voices
            .iter()
            .min_by_key(|(_, v)| {
                (
                    channel.keys[usize::from(v.key())].down_since.unwrap_or(0),
                    v.trigger_time(),
                )
            })
            .map(|(i, _)| i),
        VoiceStealPolicy::LowestVelocity => channel
            .voices
            .iter()
            .min_by_key(|(_, v)| (v.velocity(), v.trigger_time()))
            .map(|(i, _)| i),
    }
}
