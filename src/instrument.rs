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

//! The articulation data model.
//!
//! An instrument is an ordered collection of regions with a keyboard lookup.
//! A region covers a key/velocity range and holds one or more dimension
//! regions, selected at trigger time by velocity and voice type. A dimension
//! region is the full bundle of DSP parameters a voice needs: sample
//! reference, envelopes, LFOs, filter, attenuation, pan and tuning.
//!
//! Everything here is immutable once published and shared by reference count.

use std::ops::RangeInclusive;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dsp::lfo::LfoStartLevel;
use crate::sample::Sample;

/// Where a modulation input takes its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerSource {
    /// Fixed at full scale; no modulation.
    #[default]
    None,
    /// The trigger velocity.
    Velocity,
    /// A MIDI control change number.
    ControlChange(u8),
    /// Channel pressure (aftertouch).
    ChannelPressure,
}

/// Shape of an envelope segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentShape {
    Linear,
    #[default]
    Exponential,
}

/// Per-stage curve shapes for an ADSR envelope. Formats disagree on the
/// curves, so each region supplies its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeShape {
    pub attack: SegmentShape,
    pub decay: SegmentShape,
    pub release: SegmentShape,
}

impl Default for EnvelopeShape {
    fn default() -> Self {
        Self {
            attack: SegmentShape::Linear,
            decay: SegmentShape::Exponential,
            release: SegmentShape::Exponential,
        }
    }
}

/// ADSR envelope parameters (amplitude and filter-cutoff envelopes).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeParams {
    /// Level the envelope starts from, 0.0..1.0.
    pub pre_attack: f32,
    /// Attack time in seconds.
    pub attack: f32,
    /// Hold time at peak in seconds.
    pub hold: f32,
    /// First decay slope time in seconds.
    pub decay1: f32,
    /// Second decay slope time in seconds.
    pub decay2: f32,
    /// Hold the sustain level until release instead of decaying through it.
    pub infinite_sustain: bool,
    /// Sustain level, 0.0..1.0.
    pub sustain: f32,
    /// Release time in seconds.
    pub release: f32,
    /// Segment curve shapes.
    pub shape: EnvelopeShape,
}

impl EnvelopeParams {
    /// An envelope that passes the signal through unmodified: instant attack
    /// to full level, infinite sustain at 1.0, instant release.
    pub fn neutral() -> Self {
        Self {
            pre_attack: 0.0,
            attack: 0.0,
            hold: 0.0,
            decay1: 0.0,
            decay2: 0.0,
            infinite_sustain: true,
            sustain: 1.0,
            release: 0.0,
            shape: EnvelopeShape::default(),
        }
    }
}

/// How a MIDI controller bends an envelope's timing.
///
/// Each influence field is a power-of-two exponent: the affected stage time
/// is extended by `0.0001 * (1 << influence) * controller_value` seconds,
/// matching the way instrument files encode it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EnvelopeController {
    pub source: ControllerSource,
    pub invert: bool,
    pub attack_influence: u8,
    pub decay_influence: u8,
    pub release_influence: u8,
}

impl EnvelopeController {
    /// Resolves the raw 0..127 controller value for this descriptor.
    pub fn value(&self, velocity: u8, controller_table: &[u8]) -> u8 {
        let raw = match self.source {
            ControllerSource::None => 0,
            ControllerSource::Velocity => velocity,
            ControllerSource::ControlChange(cc) => {
                controller_table.get(cc as usize).copied().unwrap_or(0)
            }
            ControllerSource::ChannelPressure => {
                controller_table.last().copied().unwrap_or(0)
            }
        };
        if self.invert {
            127 - raw
        } else {
            raw
        }
    }

    /// Seconds added to a stage with the given influence exponent.
    pub fn stage_extension(influence: u8, value: u8) -> f32 {
        if influence == 0 {
            0.0
        } else {
            0.0001 * (1u32 << influence) as f32 * f32::from(value)
        }
    }
}

/// Single-stage decay envelope parameters for pitch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PitchEnvelopeParams {
    /// Initial detune in cents; decays toward zero.
    pub depth_cents: f32,
    /// Decay time in seconds.
    pub attack: f32,
}

/// Which MIDI controller (if any) feeds an LFO's external depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LfoController {
    /// Internal depth only.
    #[default]
    Internal,
    ModWheel,
    Breath,
    Foot,
    Aftertouch,
    InternalModWheel,
    InternalBreath,
    InternalFoot,
    InternalAftertouch,
}

impl LfoController {
    /// The MIDI CC number routed to the LFO, if any. Aftertouch routes
    /// through the channel-pressure controller slot.
    pub fn controller_number(&self) -> Option<u8> {
        match self {
            LfoController::Internal => None,
            LfoController::ModWheel | LfoController::InternalModWheel => Some(1),
            LfoController::Breath | LfoController::InternalBreath => Some(2),
            LfoController::Foot | LfoController::InternalFoot => Some(4),
            LfoController::Aftertouch | LfoController::InternalAftertouch => {
                Some(crate::channel::CTRL_TABLE_IDX_AFTERTOUCH)
            }
        }
    }

    /// True when the region's internal depth applies in addition to (or
    /// instead of) the external controller.
    pub fn uses_internal_depth(&self) -> bool {
        matches!(
            self,
            LfoController::Internal
                | LfoController::InternalModWheel
                | LfoController::InternalBreath
                | LfoController::InternalFoot
                | LfoController::InternalAftertouch
        )
    }
}

/// Low-frequency oscillator parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LfoParams {
    /// Oscillator frequency in Hz.
    pub frequency: f32,
    /// Firm internal depth, 0..=1200 (interpreted per destination).
    pub internal_depth: u16,
    /// How strongly the external controller scales the depth, 0..=1200.
    pub control_depth: u16,
    /// External controller routing.
    pub controller: LfoController,
    /// Inverts the wave.
    pub flip_phase: bool,
    /// Where in the wave the oscillator starts.
    pub start_level: LfoStartLevel,
}

impl LfoParams {
    /// An LFO that contributes nothing.
    pub fn disabled() -> Self {
        Self {
            frequency: 3.0,
            internal_depth: 0,
            control_depth: 0,
            controller: LfoController::Internal,
            flip_phase: false,
            start_level: LfoStartLevel::Max,
        }
    }
}

/// Filter response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    #[default]
    Lowpass,
    Bandpass,
    Highpass,
}

/// Voltage-controlled-filter parameters of a region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FilterParams {
    pub kind: FilterKind,
    /// CC number driving cutoff; `None` derives cutoff from velocity.
    pub cutoff_controller: Option<u8>,
    /// Inverts the cutoff controller value.
    pub cutoff_controller_invert: bool,
    /// CC number driving resonance; `None` leaves resonance at its base.
    pub resonance_controller: Option<u8>,
    /// Velocity-to-cutoff scale, 0..=127.
    pub velocity_scale: u8,
    /// Adds key distance from the breakpoint into resonance.
    pub keyboard_tracking: bool,
    pub keyboard_tracking_breakpoint: u8,
}

/// Crossfade attenuation curve over a 0..127 controller domain: fades in
/// between `in_start..in_end` and out between `out_start..out_end`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Crossfade {
    pub in_start: u8,
    pub in_end: u8,
    pub out_start: u8,
    pub out_end: u8,
}

impl Crossfade {
    /// Gain for a controller value, 0.0..=1.0. Degenerate or unordered
    /// fade points collapse to a one-step ramp instead of wrapping.
    pub fn gain(&self, value: u8) -> f32 {
        let v = f32::from(value);
        if value < self.in_start {
            0.0
        } else if value < self.in_end {
            (v - f32::from(self.in_start))
                / (f32::from(self.in_end) - f32::from(self.in_start)).max(1.0)
        } else if value <= self.out_start {
            1.0
        } else if value < self.out_end {
            1.0 - (v - f32::from(self.out_start))
                / (f32::from(self.out_end) - f32::from(self.out_start)).max(1.0)
        } else {
            0.0
        }
    }
}

/// How trigger velocity maps to gain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "curve")]
pub enum VelocityResponse {
    /// gain = (velocity / 127) ^ depth
    Linear { depth: f32 },
    /// gain = (velocity / 127)^2, scaled by depth toward linear.
    NonLinear { depth: f32 },
}

impl Default for VelocityResponse {
    fn default() -> Self {
        VelocityResponse::NonLinear { depth: 1.0 }
    }
}

impl VelocityResponse {
    /// Gain in 0.0..=1.0 for a trigger velocity.
    pub fn gain(&self, velocity: u8) -> f32 {
        let x = f32::from(velocity.min(127)) / 127.0;
        match *self {
            VelocityResponse::Linear { depth } => x.powf(depth.max(0.01)),
            VelocityResponse::NonLinear { depth } => {
                let quadratic = x * x;
                quadratic + (x - quadratic) * (1.0 - depth.clamp(0.0, 1.0))
            }
        }
    }
}

/// The full articulation bundle a voice is triggered with.
pub struct DimensionRegion {
    /// The sample this dimension plays.
    pub sample: Arc<Sample>,
    /// Velocity range this dimension is selected for.
    pub velocity_range: RangeInclusive<u8>,
    /// True if this dimension sounds on note-off instead of note-on.
    pub release_trigger: bool,
    /// Volume decay applied to release-trigger voices, per second the key
    /// was held. Zero disables the decay.
    pub release_trigger_decay: f32,

    /// Playback start offset into the sample, in frames.
    pub sample_start_offset: u32,
    /// Static gain of this dimension.
    pub attenuation: f32,
    /// What drives the crossfade attenuation.
    pub attenuation_controller: ControllerSource,
    /// Crossfade curve; `None` means no crossfade is defined.
    pub crossfade: Option<Crossfade>,
    /// Pan, -64 (hard left) ..= 63 (hard right).
    pub pan: i8,

    /// Static tuning in cents.
    pub fine_tune_cents: i16,
    /// Whether pitch follows the played key.
    pub pitch_track: bool,
    /// The key at which the sample plays untransposed.
    pub unity_note: u8,
    /// Velocity-to-gain mapping.
    pub velocity_response: VelocityResponse,

    /// Amplitude envelope.
    pub eg1: EnvelopeParams,
    pub eg1_controller: EnvelopeController,
    /// Filter cutoff envelope.
    pub eg2: EnvelopeParams,
    pub eg2_controller: EnvelopeController,
    /// Pitch envelope.
    pub eg3: PitchEnvelopeParams,

    pub lfo1: LfoParams,
    pub lfo2: LfoParams,
    pub lfo3: LfoParams,

    /// Filter parameters; `None` disables the filter.
    pub filter: Option<FilterParams>,
}

impl DimensionRegion {
    /// A dimension region with neutral articulation: full velocity range,
    /// pass-through envelopes, disabled LFOs, no filter, centered pan.
    pub fn new(sample: Arc<Sample>) -> Self {
        Self {
            sample,
            velocity_range: 0..=127,
            release_trigger: false,
            release_trigger_decay: 0.0,
            sample_start_offset: 0,
            attenuation: 1.0,
            attenuation_controller: ControllerSource::None,
            crossfade: None,
            pan: 0,
            fine_tune_cents: 0,
            pitch_track: true,
            unity_note: 60,
            velocity_response: VelocityResponse::default(),
            eg1: EnvelopeParams::neutral(),
            eg1_controller: EnvelopeController::default(),
            eg2: EnvelopeParams::neutral(),
            eg2_controller: EnvelopeController::default(),
            eg3: PitchEnvelopeParams::default(),
            lfo1: LfoParams::disabled(),
            lfo2: LfoParams::disabled(),
            lfo3: LfoParams::disabled(),
            filter: None,
        }
    }

    /// Velocity gain for this dimension.
    pub fn velocity_gain(&self, velocity: u8) -> f32 {
        self.velocity_response.gain(velocity)
    }
}

/// A key/velocity range mapping to a set of dimension regions.
pub struct Region {
    /// Keys this region sounds on.
    pub key_range: RangeInclusive<u8>,
    /// Velocities this region sounds on.
    pub velocity_range: RangeInclusive<u8>,
    /// Exclusion class; non-zero key groups kill each other on trigger.
    pub key_group: u32,
    /// Candidate dimension regions, selected at trigger time.
    pub dimensions: Vec<DimensionRegion>,
}

impl Region {
    /// Selects the dimension region for a trigger. Release-trigger lookups
    /// only match release dimensions and vice versa; within that, the first
    /// dimension whose velocity range contains the trigger velocity wins.
    pub fn select_dimension(
        &self,
        velocity: u8,
        release_trigger: bool,
    ) -> Option<&DimensionRegion> {
        self.dimensions
            .iter()
            .find(|d| d.release_trigger == release_trigger && d.velocity_range.contains(&velocity))
    }

    /// True when the region sounds for this key and velocity.
    pub fn matches(&self, key: u8, velocity: u8) -> bool {
        self.key_range.contains(&key) && self.velocity_range.contains(&velocity)
    }
}

/// An ordered collection of regions with a keyboard lookup.
pub struct Instrument {
    name: String,
    regions: Vec<Arc<Region>>,
    /// key -> indices into `regions` of candidates for that key.
    key_index: Vec<Vec<u16>>,
}

impl Instrument {
    /// Builds an instrument and its keyboard lookup from an ordered region
    /// list.
    pub fn new(name: impl Into<String>, regions: Vec<Arc<Region>>) -> Self {
        let mut key_index = vec![Vec::new(); 128];
        for (i, region) in regions.iter().enumerate() {
            for key in region.key_range.clone() {
                if let Some(slot) = key_index.get_mut(key as usize) {
                    slot.push(i as u16);
                }
            }
        }
        Self {
            name: name.into(),
            regions,
            key_index,
        }
    }

    /// Instrument name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All regions in order.
    pub fn regions(&self) -> &[Arc<Region>] {
        &self.regions
    }

    /// Regions that sound for this key and velocity, in region order.
    pub fn regions_on_key(
        &self,
        key: u8,
        velocity: u8,
    ) -> impl Iterator<Item = &Arc<Region>> + '_ {
        self.key_index
            .get(key as usize)
            .into_iter()
            .flatten()
            .map(move |&i| &self.regions[i as usize])
            .filter(move |r| r.velocity_range.contains(&velocity))
    }
}

impl std::fmt::Debug for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("name", &self.name)
            .field("regions", &self.regions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn test_keyboard_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let sample = testutil::ramp_sample(dir.path(), "a.wav", 100);

        let low = Arc::new(Region {
            key_range: 0..=59,
            velocity_range: 0..=127,
            key_group: 0,
            dimensions: vec![DimensionRegion::new(sample.clone())],
        });
        let high = Arc::new(Region {
            key_range: 60..=127,
            velocity_range: 0..=127,
            key_group: 0,
            dimensions: vec![DimensionRegion::new(sample)],
        });
        let instrument = Instrument::new("split", vec![low, high]);

        let on_59: Vec<_> = instrument.regions_on_key(59, 100).collect();
        assert_eq!(on_59.len(), 1);
        assert_eq!(*on_59[0].key_range.end(), 59);

        let on_60: Vec<_> = instrument.regions_on_key(60, 100).collect();
        assert_eq!(on_60.len(), 1);
        assert_eq!(*on_60[0].key_range.start(), 60);
    }

    #[test]
    fn test_velocity_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let sample = testutil::ramp_sample(dir.path(), "a.wav", 100);

        let soft = Arc::new(Region {
            key_range: 0..=127,
            velocity_range: 0..=63,
            key_group: 0,
            dimensions: vec![DimensionRegion::new(sample)],
        });
        let instrument = Instrument::new("soft-only", vec![soft]);

        assert_eq!(instrument.regions_on_key(60, 40).count(), 1);
        assert_eq!(instrument.regions_on_key(60, 100).count(), 0);
    }

    #[test]
    fn test_dimension_selection_by_release_and_velocity() {
        let dir = tempfile::tempdir().unwrap();
        let sample = testutil::ramp_sample(dir.path(), "a.wav", 100);

        let mut soft = DimensionRegion::new(sample.clone());
        soft.velocity_range = 0..=63;
        let mut loud = DimensionRegion::new(sample.clone());
        loud.velocity_range = 64..=127;
        let mut release = DimensionRegion::new(sample);
        release.release_trigger = true;

        let region = Region {
            key_range: 0..=127,
            velocity_range: 0..=127,
            key_group: 0,
            dimensions: vec![soft, loud, release],
        };

        let d = region.select_dimension(100, false).unwrap();
        assert_eq!(*d.velocity_range.start(), 64);
        assert!(!d.release_trigger);

        let d = region.select_dimension(100, true).unwrap();
        assert!(d.release_trigger);
    }

    #[test]
    fn test_crossfade_gain() {
        let fade = Crossfade {
            in_start: 20,
            in_end: 40,
            out_start: 80,
            out_end: 100,
        };
        assert_eq!(fade.gain(0), 0.0);
        assert_eq!(fade.gain(30), 0.5);
        assert_eq!(fade.gain(60), 1.0);
        assert_eq!(fade.gain(90), 0.5);
        assert_eq!(fade.gain(120), 0.0);
    }

    #[test]
    fn test_crossfade_gain_with_unordered_points() {
        // Fade points out of order must not wrap; the gain stays bounded.
        let fade = Crossfade {
            in_start: 40,
            in_end: 20,
            out_start: 100,
            out_end: 80,
        };
        for value in 0..=127u8 {
            let gain = fade.gain(value);
            assert!((0.0..=1.0).contains(&gain), "value {value} gain {gain}");
        }
    }

    #[test]
    fn test_velocity_response_bounds() {
        let response = VelocityResponse::default();
        assert_eq!(response.gain(0), 0.0);
        assert_eq!(response.gain(127), 1.0);
        assert!(response.gain(64) > 0.0 && response.gain(64) < 1.0);
    }
}
