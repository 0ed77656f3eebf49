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

//! The per-note voice.
//!
//! A voice is a state machine over {init, ram, disk, end}: playback starts
//! from the RAM cache, switches to the disk stream once it crosses the safe
//! cache limit, and ends when the amplitude envelope finishes, the sample
//! runs out, or a kill lands. Rendering is divided into sub-fragments;
//! modulator outputs are held constant across each one, and events route to
//! the modulators at sub-fragment granularity.
//!
//! Voices are pool-allocated and must not touch the heap: the interpolation
//! window scratch buffer is owned by the engine and lent per render call.

use std::sync::Arc;

use crate::config::{EngineConfig, INTERPOLATOR_WINDOW, PITCH_BEND_RANGE_CENTS, SUBFRAGMENT_SIZE};
use crate::dsp::envelope::{AdsrEnvelope, DecayEnvelope, EgExtensions};
use crate::dsp::filter::{StereoFilter, FILTER_CUTOFF_MAX, FILTER_CUTOFF_MIN};
use crate::dsp::lfo::Lfo;
use crate::dsp::synth::{LoopWrap, SynthParams, SynthesisRoutine};
use crate::dsp::cents_to_freq_ratio;
use crate::engine::Diagnostics;
use crate::event::{Event, EventKind, SchedTime};
use crate::instrument::{
    ControllerSource, DimensionRegion, EnvelopeController, FilterKind, Region,
};
use crate::sample::Sample;
use crate::streaming::{StreamClient, StreamHandle, StreamReader, StreamState};

/// Pitch ratios within one cent of unity skip the resampler.
const UNITY_PITCH_TOLERANCE: f64 = 0.000578;

/// Playback state of a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Init,
    Ram,
    Disk,
    End,
}

/// What kind of trigger created this voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceType {
    Normal,
    /// Sounds on note-off.
    ReleaseTrigger,
    /// A normal voice whose region also defines release dimensions; its
    /// note-off must spawn the release-trigger voice.
    ReleaseTriggerRequired,
}

/// Result of one render call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Keep the voice for the next cycle.
    Continue,
    /// The voice ended; the engine frees it and releases its stream.
    Finished,
}

/// Inputs resolved by the engine for a voice trigger.
pub struct TriggerParams<'a> {
    pub fragment_pos: u32,
    pub key: u8,
    pub velocity: u8,
    pub layer: u8,
    pub voice_type: VoiceType,
    pub key_group: u32,
    pub region: &'a Arc<Region>,
    pub dimension_index: usize,
    pub pitch_bend: i16,
    pub controller_table: &'a [u8; 129],
    pub scale_tuning: &'a [i8; 12],
    /// Seconds the key was held; scales release-trigger volume decay.
    pub key_held_seconds: f32,
    pub trigger_time: SchedTime,
    pub config: &'a EngineConfig,
    pub stream_client: &'a StreamClient,
}

/// Per-cycle inputs a voice renders against.
pub struct RenderContext<'a> {
    pub frames: usize,
    /// Channel CC / pitch-bend / pressure events this cycle, in fragment
    /// order.
    pub cc_events: &'a [Event],
    /// Release / cancel-release events for this voice's key, in fragment
    /// order.
    pub transition_events: &'a [Event],
    pub global_volume: f32,
    pub muted: bool,
    pub out_left: &'a mut [f32],
    pub out_right: &'a mut [f32],
    pub synthesis: &'a dyn SynthesisRoutine,
    pub stream_client: &'a StreamClient,
    /// Engine-owned scratch for disk-stream interpolation windows.
    pub window: &'a mut Vec<f32>,
    pub sample_rate: u32,
    pub diagnostics: &'a Diagnostics,
}

/// A sounding note.
pub struct Voice {
    state: PlaybackState,
    voice_type: VoiceType,
    key: u8,
    velocity: u8,
    layer: u8,
    key_group: u32,
    trigger_time: SchedTime,

    region: Arc<Region>,
    dimension_index: usize,
    sample: Arc<Sample>,

    /// Fractional playback position. In `ram` state this is in cache
    /// coordinates; in `disk` state, relative to the stream read position.
    pos: f64,
    pitch_base: f64,
    pitch_bend: f64,
    volume: f32,
    crossfade_volume: f32,
    pan_left: f32,
    pan_right: f32,

    /// Highest cache position the interpolator may safely read from.
    max_ram_pos: usize,
    disk_voice: bool,
    ram_loop: Option<LoopWrap>,
    loop_cycles_left: Option<u32>,
    stream_handle: Option<StreamHandle>,
    stream: Option<StreamReader>,
    max_pitch_ratio: f64,

    eg1: AdsrEnvelope,
    eg2: AdsrEnvelope,
    eg3: DecayEnvelope,
    lfo1: Lfo,
    lfo2: Lfo,
    lfo3: Lfo,

    filter: StereoFilter,
    filter_enabled: bool,
    cutoff_controller: Option<u8>,
    cutoff_invert: bool,
    resonance_controller: Option<u8>,
    cutoff: f32,
    resonance: f32,
    resonance_tracking: f32,

    /// Fragment offset to start at on the first render cycle.
    delay: u32,
    /// Pending regular-kill offset.
    kill_pos: Option<u32>,
}

/// Gains for a pan position in -64..=63; center is unity on both sides.
fn pan_gains(pan: i8) -> (f32, f32) {
    let pan = i32::from(pan);
    let left = ((63 - pan) as f32 / 63.0).clamp(0.0, 1.0);
    let right = ((64 + pan) as f32 / 64.0).clamp(0.0, 1.0);
    (left, right)
}

impl Voice {
    /// Initializes and triggers a voice; orders a disk stream if the sample
    /// exceeds its RAM cache. Returns `None` when the voice cannot sound
    /// (decayed release trigger, failed stream order).
    pub fn trigger(params: TriggerParams<'_>) -> Option<Voice> {
        let dimension = &params.region.dimensions[params.dimension_index];
        let sample = dimension.sample.clone();
        let table = params.controller_table;

        // Volume: velocity curve, region attenuation, release decay.
        let mut volume = dimension.velocity_gain(params.velocity) * dimension.attenuation;
        if params.voice_type == VoiceType::ReleaseTrigger && dimension.release_trigger_decay > 0.0
        {
            let decay = 1.0 - dimension.release_trigger_decay * params.key_held_seconds;
            if decay <= 0.0 {
                return None;
            }
            volume *= decay;
        }

        let crossfade_volume = match dimension.attenuation_controller {
            ControllerSource::None => 1.0,
            ControllerSource::Velocity => crossfade_gain(dimension, params.velocity),
            ControllerSource::ControlChange(cc) => {
                crossfade_gain(dimension, table[cc as usize])
            }
            ControllerSource::ChannelPressure => crossfade_gain(dimension, table[128]),
        };

        let (pan_left, pan_right) = pan_gains(dimension.pan);

        let pos = f64::from(dimension.sample_start_offset);

        // Disk classification and RAM-loop bookkeeping.
        let cached = sample.cache().cached_frames();
        let lookahead = params.config.max_frames_consumed_per_cycle();
        let disk_voice = (cached as u64) < sample.total_frames();
        let max_ram_pos = if disk_voice {
            cached.saturating_sub(lookahead)
        } else {
            cached
        };

        let mut ram_loop = None;
        let mut loop_cycles_left = None;
        if let Some(spec) = sample.loop_spec() {
            if !disk_voice || spec.end <= max_ram_pos as u64 {
                ram_loop = Some(LoopWrap {
                    start: spec.start as f64,
                    end: spec.end as f64,
                });
                loop_cycles_left = spec.play_count;
            }
        }

        let stream_handle = if disk_voice {
            match params.stream_client.order_new_stream(
                &sample,
                max_ram_pos as u64,
                ram_loop.is_none(),
            ) {
                Ok(handle) => Some(handle),
                Err(_) => return None,
            }
        } else {
            None
        };

        // Initial pitch.
        let mut pitch_cents = f64::from(dimension.fine_tune_cents)
            + f64::from(params.scale_tuning[usize::from(params.key) % 12]);
        if dimension.pitch_track {
            pitch_cents +=
                f64::from(i16::from(params.key) - i16::from(dimension.unity_note)) * 100.0;
        }
        let pitch_base = cents_to_freq_ratio(pitch_cents)
            * (f64::from(sample.sample_rate()) / f64::from(params.config.sample_rate));
        let pitch_bend =
            cents_to_freq_ratio(f64::from(params.pitch_bend) / 8192.0 * PITCH_BEND_RANGE_CENTS);

        let control_rate = params.config.sample_rate as f32 / SUBFRAGMENT_SIZE as f32;

        // Envelopes, with controller-scaled stage times.
        let eg_extensions = |ctrl: &EnvelopeController| {
            let value = ctrl.value(params.velocity, table);
            EgExtensions {
                attack: EnvelopeController::stage_extension(ctrl.attack_influence, value),
                decay: EnvelopeController::stage_extension(ctrl.decay_influence, value),
                release: EnvelopeController::stage_extension(ctrl.release_influence, value),
            }
        };
        let mut eg1 = AdsrEnvelope::new();
        eg1.trigger(
            &dimension.eg1,
            eg_extensions(&dimension.eg1_controller),
            control_rate,
        );
        let mut eg2 = AdsrEnvelope::new();
        eg2.trigger(
            &dimension.eg2,
            eg_extensions(&dimension.eg2_controller),
            control_rate,
        );
        let mut eg3 = DecayEnvelope::new();
        eg3.trigger(
            cents_to_freq_ratio(f64::from(dimension.eg3.depth_cents)) as f32,
            dimension.eg3.attack,
            control_rate,
        );

        // LFOs: volume and cutoff dip (unsigned), pitch swings +-1200 cents
        // (signed).
        let mut lfo1 = Lfo::unsigned(1.0);
        let mut lfo2 = Lfo::unsigned(1.0);
        let mut lfo3 = Lfo::signed(1200.0);
        for (lfo, spec) in [
            (&mut lfo1, &dimension.lfo1),
            (&mut lfo2, &dimension.lfo2),
            (&mut lfo3, &dimension.lfo3),
        ] {
            let controller = spec.controller.controller_number();
            let value = controller.map_or(0, |cc| table[cc as usize]);
            let internal_depth = if spec.controller.uses_internal_depth() {
                spec.internal_depth
            } else {
                0
            };
            lfo.trigger(
                spec.frequency,
                spec.start_level,
                internal_depth,
                spec.control_depth,
                controller,
                value,
                spec.flip_phase,
                control_rate,
            );
        }

        // Filter.
        let mut filter = StereoFilter::new(FilterKind::Lowpass);
        let mut filter_enabled = false;
        let mut cutoff_controller = None;
        let mut cutoff_invert = false;
        let mut resonance_controller = None;
        let mut cutoff = FILTER_CUTOFF_MAX;
        let mut resonance = 0.0;
        let mut resonance_tracking = 0.0;
        if let Some(fp) = &dimension.filter {
            filter_enabled = true;
            cutoff_controller = fp.cutoff_controller;
            cutoff_invert = fp.cutoff_controller_invert;
            resonance_controller = fp.resonance_controller;

            let ctrl_value = match fp.cutoff_controller {
                Some(cc) => {
                    let v = table[cc as usize];
                    f32::from(if fp.cutoff_controller_invert { 127 - v } else { v })
                }
                None => f32::from(params.velocity) * f32::from(fp.velocity_scale) / 127.0,
            };
            cutoff = cutoff_from_controller(ctrl_value);

            if fp.keyboard_tracking {
                resonance_tracking = f32::from(
                    i16::from(params.key) - i16::from(fp.keyboard_tracking_breakpoint),
                ) * 0.00787;
            }
            let res_value = fp
                .resonance_controller
                .map_or(0, |cc| table[cc as usize]);
            resonance = (f32::from(res_value) * 0.00787 + resonance_tracking).clamp(0.0, 1.0);

            filter.reset(fp.kind, cutoff, resonance, params.config.sample_rate as f32);
        }

        Some(Voice {
            state: PlaybackState::Init,
            voice_type: params.voice_type,
            key: params.key,
            velocity: params.velocity,
            layer: params.layer,
            key_group: params.key_group,
            trigger_time: params.trigger_time,
            region: params.region.clone(),
            dimension_index: params.dimension_index,
            sample,
            pos,
            pitch_base,
            pitch_bend,
            volume,
            crossfade_volume,
            pan_left,
            pan_right,
            max_ram_pos,
            disk_voice,
            ram_loop,
            loop_cycles_left,
            stream_handle,
            stream: None,
            max_pitch_ratio: (1u32 << params.config.max_pitch_octaves) as f64,
            eg1,
            eg2,
            eg3,
            lfo1,
            lfo2,
            lfo3,
            filter,
            filter_enabled,
            cutoff_controller,
            cutoff_invert,
            resonance_controller,
            cutoff,
            resonance,
            resonance_tracking,
            delay: params.fragment_pos,
            kill_pos: None,
        })
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn layer(&self) -> u8 {
        self.layer
    }

    pub fn key_group(&self) -> u32 {
        self.key_group
    }

    pub fn voice_type(&self) -> VoiceType {
        self.voice_type
    }

    pub fn trigger_time(&self) -> SchedTime {
        self.trigger_time
    }

    pub fn dimension(&self) -> &DimensionRegion {
        &self.region.dimensions[self.dimension_index]
    }

    /// Schedules a regular kill: render until `fragment_pos`, then fade down
    /// fast and end. Used for voice stealing and key-group exclusion.
    pub fn kill(&mut self, fragment_pos: u32) {
        if self.state == PlaybackState::End {
            return;
        }
        self.kill_pos = Some(match self.kill_pos {
            Some(existing) => existing.min(fragment_pos),
            None => fragment_pos,
        });
    }

    /// Immediately marks the voice dead without rendering a fade. Only valid
    /// when no audio of this voice is in flight.
    pub fn kill_immediately(&mut self) {
        self.state = PlaybackState::End;
    }

    /// Releases streaming resources when the engine frees the voice.
    pub fn cleanup(&mut self, client: &StreamClient) {
        if let Some(reader) = self.stream.take() {
            client.release_stream(reader);
        } else if let Some(handle) = self.stream_handle.take() {
            client.order_deletion(handle);
        }
    }

    /// Renders `ctx.frames` frames into the channel bus. A voice in state
    /// `end` writes nothing.
    pub fn render(&mut self, ctx: &mut RenderContext<'_>) -> RenderOutcome {
        if self.state == PlaybackState::Init {
            self.state = PlaybackState::Ram;
        }
        if self.state == PlaybackState::End {
            return RenderOutcome::Finished;
        }

        let delay = std::mem::take(&mut self.delay) as usize;
        let mut cursor = delay.min(ctx.frames);

        // Event cursors; events at or before the trigger offset were already
        // reflected in the controller table at trigger time.
        let mut cc_index = 0;
        let mut transition_index = 0;
        if delay > 0 {
            while cc_index < ctx.cc_events.len()
                && ctx.cc_events[cc_index].fragment_pos as usize <= delay
            {
                cc_index += 1;
            }
            while transition_index < ctx.transition_events.len()
                && ctx.transition_events[transition_index].fragment_pos as usize <= delay
            {
                transition_index += 1;
            }
        }

        let mut tail_cycle = false;

        while cursor < ctx.frames && self.state != PlaybackState::End {
            let sub_end = ctx
                .frames
                .min((cursor / SUBFRAGMENT_SIZE + 1) * SUBFRAGMENT_SIZE);

            // Route events landing in this sub-fragment.
            while cc_index < ctx.cc_events.len()
                && (ctx.cc_events[cc_index].fragment_pos as usize) < sub_end
            {
                self.apply_parameter_event(&ctx.cc_events[cc_index]);
                cc_index += 1;
            }
            while transition_index < ctx.transition_events.len()
                && (ctx.transition_events[transition_index].fragment_pos as usize) < sub_end
            {
                match ctx.transition_events[transition_index].kind {
                    EventKind::Release { .. } => {
                        self.eg1.release();
                        self.eg2.release();
                    }
                    EventKind::CancelRelease { .. } => {
                        self.eg1.cancel_release();
                        self.eg2.cancel_release();
                    }
                    _ => {}
                }
                transition_index += 1;
            }
            if let Some(kill_pos) = self.kill_pos {
                if (kill_pos as usize) < sub_end {
                    self.eg1.enter_fade_out();
                    self.kill_pos = None;
                }
            }

            // Advance modulators one sub-fragment.
            let eg1_level = self.eg1.next();
            let eg2_level = self.eg2.next();
            let eg3_pitch = f64::from(self.eg3.next());

            let mut final_volume = self.volume
                * self.crossfade_volume
                * if ctx.muted { 0.0 } else { ctx.global_volume }
                * eg1_level;
            if self.lfo1.is_enabled() {
                final_volume *= 1.0 - self.lfo1.render();
            }

            let mut final_pitch = self.pitch_base * self.pitch_bend * eg3_pitch;
            if self.lfo3.is_enabled() {
                final_pitch *= cents_to_freq_ratio(f64::from(self.lfo3.render()));
            }
            final_pitch = final_pitch.clamp(1.0 / self.max_pitch_ratio, self.max_pitch_ratio);

            if self.filter_enabled {
                let mut final_cutoff = self.cutoff * eg2_level;
                if self.lfo2.is_enabled() {
                    final_cutoff *= 1.0 - self.lfo2.render();
                }
                final_cutoff = final_cutoff.clamp(FILTER_CUTOFF_MIN, FILTER_CUTOFF_MAX);
                self.filter
                    .set_params(final_cutoff, self.resonance, ctx.sample_rate as f32);
            }

            let resample = (final_pitch - 1.0).abs() > UNITY_PITCH_TOLERANCE;

            match self.state {
                PlaybackState::Ram => {
                    let cache = self.sample.cache();
                    let loop_wrap = if self.loop_cycles_left == Some(0) {
                        None
                    } else {
                        self.ram_loop
                    };
                    let wraps = ctx.synthesis.render(&mut SynthParams {
                        src: cache.data(),
                        src_channels: self.sample.channels() as usize,
                        pos: &mut self.pos,
                        pitch: final_pitch,
                        resample,
                        volume_left: final_volume * self.pan_left,
                        volume_right: final_volume * self.pan_right,
                        out_left: &mut ctx.out_left[cursor..sub_end],
                        out_right: &mut ctx.out_right[cursor..sub_end],
                        filter: self.filter_enabled.then_some(&mut self.filter),
                        loop_wrap,
                    });
                    if wraps > 0 {
                        if let Some(left) = self.loop_cycles_left.as_mut() {
                            *left = left.saturating_sub(wraps);
                        }
                    }

                    if self.disk_voice {
                        if self.pos > self.max_ram_pos as f64 {
                            self.state = PlaybackState::Disk;
                        }
                    } else if self.pos >= cache.cached_frames() as f64 {
                        self.state = PlaybackState::End;
                    }
                }
                PlaybackState::Disk => {
                    if self.stream.is_none() && !self.take_created_stream(ctx) {
                        // The disk thread never delivered; silence the rest
                        // of the cycle and die at the cache tail.
                        self.state = PlaybackState::End;
                        break;
                    }
                    let channels = self.sample.channels() as usize;
                    let sub_len = sub_end - cursor;
                    let stream = self.stream.as_mut().expect("stream present");

                    let needed =
                        (sub_len as f64 * final_pitch).ceil() as usize + INTERPOLATOR_WINDOW + 1;
                    let available = stream.read_space_frames();
                    if available < needed {
                        match stream.state() {
                            StreamState::End => tail_cycle = true,
                            _ => {
                                ctx.diagnostics.count_stream_starved();
                            }
                        }
                    }

                    let window_samples = needed * channels;
                    ctx.window.resize(window_samples, 0.0);
                    stream.peek_window(&mut ctx.window[..window_samples]);

                    ctx.synthesis.render(&mut SynthParams {
                        src: &ctx.window[..window_samples],
                        src_channels: channels,
                        pos: &mut self.pos,
                        pitch: final_pitch,
                        resample,
                        volume_left: final_volume * self.pan_left,
                        volume_right: final_volume * self.pan_right,
                        out_left: &mut ctx.out_left[cursor..sub_end],
                        out_right: &mut ctx.out_right[cursor..sub_end],
                        filter: self.filter_enabled.then_some(&mut self.filter),
                        loop_wrap: None,
                    });

                    let consumed = self.pos.floor() as usize;
                    stream.advance_frames(consumed);
                    self.pos -= consumed as f64;

                    if stream.is_exhausted() {
                        self.state = PlaybackState::End;
                    }
                }
                PlaybackState::Init | PlaybackState::End => {}
            }

            if self.eg1.is_finished() {
                self.state = PlaybackState::End;
            }
            cursor = sub_end;
        }

        if tail_cycle {
            self.state = PlaybackState::End;
        }
        match self.state {
            PlaybackState::End => RenderOutcome::Finished,
            _ => RenderOutcome::Continue,
        }
    }

    /// Picks up the ordered stream and rebases the playback position from
    /// cache coordinates into stream coordinates. Returns false when the
    /// stream is still not available.
    fn take_created_stream(&mut self, ctx: &RenderContext<'_>) -> bool {
        let Some(handle) = self.stream_handle.as_ref() else {
            return false;
        };
        match ctx.stream_client.ask_for_created_stream(handle) {
            Some(mut reader) => {
                let int_pos = self.pos.floor();
                let skip = (int_pos as i64 - self.max_ram_pos as i64).max(0) as usize;
                reader.advance_frames(skip);
                self.pos -= int_pos;
                self.stream = Some(reader);
                self.stream_handle = None;
                true
            }
            None => {
                ctx.diagnostics.count_stream_starved();
                false
            }
        }
    }

    /// Routes one CC / pitch-bend / pressure event into this voice's
    /// parameters.
    fn apply_parameter_event(&mut self, event: &Event) {
        match event.kind {
            EventKind::ControlChange { controller, value } => {
                self.apply_controller(controller, value)
            }
            EventKind::ChannelPressure { value } => self.apply_controller(128, value),
            EventKind::PitchBend { value } => {
                self.pitch_bend =
                    cents_to_freq_ratio(f64::from(value) / 8192.0 * PITCH_BEND_RANGE_CENTS);
            }
            _ => {}
        }
    }

    fn apply_controller(&mut self, controller: u8, value: u8) {
        if self.cutoff_controller == Some(controller) {
            let v = if self.cutoff_invert { 127 - value } else { value };
            self.cutoff = cutoff_from_controller(f32::from(v));
        }
        if self.resonance_controller == Some(controller) {
            self.resonance =
                (f32::from(value) * 0.00787 + self.resonance_tracking).clamp(0.0, 1.0);
        }
        if self.lfo1.controller() == Some(controller) {
            self.lfo1.update(value);
        }
        if self.lfo2.controller() == Some(controller) {
            self.lfo2.update(value);
        }
        if self.lfo3.controller() == Some(controller) {
            self.lfo3.update(value);
        }

        let dimension = &self.region.dimensions[self.dimension_index];
        let crossfade_hit = match dimension.attenuation_controller {
            ControllerSource::ControlChange(cc) => cc == controller,
            ControllerSource::ChannelPressure => controller == 128,
            _ => false,
        };
        if crossfade_hit {
            self.crossfade_volume = crossfade_gain(dimension, value);
        }
    }
}

/// Crossfade gain for a controller value, honoring an undefined crossfade.
fn crossfade_gain(dimension: &DimensionRegion, value: u8) -> f32 {
    match &dimension.crossfade {
        Some(curve) => curve.gain(value),
        None => f32::from(value) / 127.0,
    }
}

/// Maps a 0..127 controller value onto the exponential cutoff range.
fn cutoff_from_controller(value: f32) -> f32 {
    let norm = (value / 127.0).min(1.0);
    FILTER_CUTOFF_MIN * (norm * (FILTER_CUTOFF_MAX / FILTER_CUTOFF_MIN).ln()).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pan_gains() {
        assert_eq!(pan_gains(0), (1.0, 1.0));
        let (l, r) = pan_gains(63);
        assert_eq!(l, 0.0);
        assert_eq!(r, 1.0);
        let (l, r) = pan_gains(-64);
        assert_eq!(l, 1.0);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn test_cutoff_controller_map_spans_range() {
        assert!((cutoff_from_controller(0.0) - FILTER_CUTOFF_MIN).abs() < 0.01);
        assert!((cutoff_from_controller(127.0) - FILTER_CUTOFF_MAX).abs() < 1.0);
        let mid = cutoff_from_controller(64.0);
        assert!(mid > FILTER_CUTOFF_MIN && mid < FILTER_CUTOFF_MAX);
    }
}
