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

//! Envelope generators.
//!
//! The ADSR envelope drives amplitude and filter cutoff; the single-stage
//! decay envelope drives pitch. Both run at control rate (one value per
//! sub-fragment).

use crate::instrument::{EnvelopeParams, SegmentShape};

/// Exponential segments approach their target asymptotically; once the level
/// is within this distance the segment is considered finished.
const EXP_FLOOR: f32 = 1e-4;

/// Additional seconds added per stage by a routed MIDI controller.
#[derive(Debug, Clone, Copy, Default)]
pub struct EgExtensions {
    pub attack: f32,
    pub decay: f32,
    pub release: f32,
}

/// The kind of segment the envelope is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgSegment {
    /// Linear slope.
    Lin,
    /// Exponential slope.
    Exp,
    /// Constant level (sustain plateau or finished).
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Attack,
    Hold,
    Decay1,
    Decay2,
    Sustain,
    Release,
    FadeOut,
    Done,
}

/// ADSR-style envelope with a two-slope decay, optional infinite sustain and
/// a forced fade-out for voice kills.
pub struct AdsrEnvelope {
    stage: Stage,
    segment: EgSegment,
    level: f32,
    /// Linear increment or exponential factor, depending on the segment.
    coeff: f32,
    /// Target level an exponential segment approaches.
    target: f32,
    steps_left: u32,

    control_rate: f32,
    sustain: f32,
    infinite_sustain: bool,
    release_time: f32,
    release_shape: SegmentShape,

    hold_time: f32,
    decay1_time: f32,
    decay2_time: f32,
    decay_shape: SegmentShape,
    decay_extension: f32,
}

impl Default for AdsrEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

impl AdsrEnvelope {
    pub fn new() -> Self {
        Self {
            stage: Stage::Idle,
            segment: EgSegment::End,
            level: 0.0,
            coeff: 0.0,
            target: 0.0,
            steps_left: 0,
            control_rate: 1.0,
            sustain: 1.0,
            infinite_sustain: true,
            release_time: 0.0,
            release_shape: SegmentShape::Exponential,
            hold_time: 0.0,
            decay1_time: 0.0,
            decay2_time: 0.0,
            decay_shape: SegmentShape::Exponential,
            decay_extension: 0.0,
        }
    }

    /// Arms the envelope for a new note. `control_rate` is the engine's
    /// sub-fragment rate in Hz; `extensions` are the controller-dependent
    /// stage stretches resolved at trigger time.
    pub fn trigger(
        &mut self,
        params: &EnvelopeParams,
        extensions: EgExtensions,
        control_rate: f32,
    ) {
        self.control_rate = control_rate.max(1.0);
        self.sustain = params.sustain.clamp(0.0, 1.0);
        self.infinite_sustain = params.infinite_sustain;
        self.release_time = (params.release + extensions.release).max(0.0);
        self.release_shape = params.shape.release;
        self.level = params.pre_attack.clamp(0.0, 1.0);

        // Later stages read these when the attack auto-advances, so they must
        // be in place before the first ramp is entered.
        self.decay_extension = extensions.decay;
        self.decay1_time = params.decay1;
        self.decay2_time = params.decay2;
        self.decay_shape = params.shape.decay;
        self.hold_time = params.hold;

        let attack = (params.attack + extensions.attack).max(0.0);
        self.enter_ramp(Stage::Attack, params.shape.attack, 1.0, attack);
    }

    /// The note was released: slope from the current level to zero over the
    /// release time, preserving smoothness.
    pub fn release(&mut self) {
        match self.stage {
            Stage::Idle | Stage::Done | Stage::FadeOut | Stage::Release => {}
            _ => {
                let time = self.release_time;
                self.enter_ramp(Stage::Release, self.release_shape, 0.0, time);
            }
        }
    }

    /// A cancel-release arrived (sustain pedal pressed again before the
    /// release finished): return to the sustain plateau from the current
    /// level.
    pub fn cancel_release(&mut self) {
        if self.stage == Stage::Release {
            self.stage = Stage::Sustain;
            self.segment = EgSegment::End;
        }
    }

    /// Forces a fast fade-down to zero, used for voice kills. Completes
    /// within one control step.
    pub fn enter_fade_out(&mut self) {
        if self.stage != Stage::Done {
            self.enter_ramp(Stage::FadeOut, SegmentShape::Linear, 0.0, 0.0);
        }
    }

    /// The kind of segment currently being processed.
    pub fn segment(&self) -> EgSegment {
        self.segment
    }

    /// Current output level without advancing.
    pub fn level(&self) -> f32 {
        self.level
    }

    /// True once the envelope has decayed to silence and will stay there.
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Advances one control step and returns the level for the coming
    /// sub-fragment.
    pub fn next(&mut self) -> f32 {
        match self.stage {
            Stage::Idle => 0.0,
            Stage::Sustain => {
                self.level = self.sustain;
                self.level
            }
            Stage::Done => 0.0,
            _ => {
                self.advance_ramp();
                self.level
            }
        }
    }

    fn advance_ramp(&mut self) {
        if self.steps_left == 0 {
            self.finish_segment();
            return;
        }

        match self.segment {
            EgSegment::Lin => self.level += self.coeff,
            EgSegment::Exp => {
                self.level = self.target + (self.level - self.target) * self.coeff;
            }
            EgSegment::End => {}
        }
        self.steps_left -= 1;

        let done = self.steps_left == 0
            || (self.segment == EgSegment::Exp && (self.level - self.target).abs() < EXP_FLOOR);
        if done {
            self.finish_segment();
        }
    }

    /// Auto-advance on stage end.
    fn finish_segment(&mut self) {
        match self.stage {
            Stage::Attack => {
                self.level = 1.0;
                self.enter_ramp(Stage::Hold, SegmentShape::Linear, 1.0, self.hold_time);
            }
            Stage::Hold => {
                let time = (self.decay1_time + self.decay_extension).max(0.0);
                self.enter_ramp(Stage::Decay1, self.decay_shape, self.sustain, time);
            }
            Stage::Decay1 => {
                self.level = self.sustain;
                if self.infinite_sustain {
                    self.stage = Stage::Sustain;
                    self.segment = EgSegment::End;
                } else {
                    let time = (self.decay2_time + self.decay_extension).max(0.0);
                    self.enter_ramp(Stage::Decay2, self.decay_shape, 0.0, time);
                }
            }
            Stage::Decay2 | Stage::Release | Stage::FadeOut => {
                self.level = 0.0;
                self.stage = Stage::Done;
                self.segment = EgSegment::End;
            }
            Stage::Idle | Stage::Sustain | Stage::Done => {}
        }
    }

    fn enter_ramp(&mut self, stage: Stage, shape: SegmentShape, target: f32, seconds: f32) {
        let steps = (seconds * self.control_rate).round() as u32;
        self.stage = stage;
        self.target = target;

        if steps == 0 || (self.level - target).abs() < f32::EPSILON {
            // Degenerate ramp: jump to the target and let the next advance
            // move on.
            self.level = target;
            self.steps_left = 0;
            self.segment = match shape {
                SegmentShape::Linear => EgSegment::Lin,
                SegmentShape::Exponential => EgSegment::Exp,
            };
            self.finish_segment();
            return;
        }

        self.steps_left = steps;
        match shape {
            SegmentShape::Linear => {
                self.segment = EgSegment::Lin;
                self.coeff = (target - self.level) / steps as f32;
            }
            SegmentShape::Exponential => {
                self.segment = EgSegment::Exp;
                // Approach so the remaining distance shrinks to EXP_FLOOR
                // over the configured number of steps.
                let distance = (self.level - target).abs().max(EXP_FLOOR);
                self.coeff = (EXP_FLOOR / distance).powf(1.0 / steps as f32);
            }
        }
    }
}

/// Single-stage decay envelope for pitch: starts at a detune ratio and
/// decays toward 1.0.
pub struct DecayEnvelope {
    value: f32,
    coeff: f32,
    steps_left: u32,
}

impl Default for DecayEnvelope {
    fn default() -> Self {
        Self::new()
    }
}

impl DecayEnvelope {
    pub fn new() -> Self {
        Self {
            value: 1.0,
            coeff: 1.0,
            steps_left: 0,
        }
    }

    /// Arms the envelope with an initial pitch ratio (from cents depth) that
    /// decays to 1.0 over `seconds`.
    pub fn trigger(&mut self, depth_ratio: f32, seconds: f32, control_rate: f32) {
        let steps = (seconds * control_rate.max(1.0)).round() as u32;
        if steps == 0 || (depth_ratio - 1.0).abs() < f32::EPSILON {
            self.value = 1.0;
            self.steps_left = 0;
            return;
        }
        self.value = depth_ratio;
        self.steps_left = steps;
        let distance = (depth_ratio - 1.0).abs().max(EXP_FLOOR);
        self.coeff = (EXP_FLOOR / distance).powf(1.0 / steps as f32);
    }

    /// Advances one control step and returns the pitch factor for the coming
    /// sub-fragment.
    pub fn next(&mut self) -> f32 {
        if self.steps_left == 0 {
            return 1.0;
        }
        let out = self.value;
        self.value = 1.0 + (self.value - 1.0) * self.coeff;
        self.steps_left -= 1;
        if (self.value - 1.0).abs() < EXP_FLOOR {
            self.steps_left = 0;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::EnvelopeShape;

    fn params() -> EnvelopeParams {
        EnvelopeParams {
            pre_attack: 0.0,
            attack: 0.1,
            hold: 0.0,
            decay1: 0.1,
            decay2: 0.0,
            infinite_sustain: true,
            sustain: 0.5,
            release: 0.1,
            shape: EnvelopeShape::default(),
        }
    }

    // 100 control steps per second keeps the arithmetic easy to follow.
    const RATE: f32 = 100.0;

    #[test]
    fn test_attack_reaches_peak_then_decays_to_sustain() {
        let mut eg = AdsrEnvelope::new();
        eg.trigger(&params(), EgExtensions::default(), RATE);

        let mut peak = 0.0f32;
        for _ in 0..10 {
            peak = peak.max(eg.next());
        }
        assert!((peak - 1.0).abs() < 0.02, "peak was {peak}");

        for _ in 0..200 {
            eg.next();
        }
        assert!((eg.level() - 0.5).abs() < 0.01);
        assert_eq!(eg.segment(), EgSegment::End);
        assert!(!eg.is_finished());
    }

    #[test]
    fn test_neutral_envelope_passes_through() {
        let mut eg = AdsrEnvelope::new();
        eg.trigger(&EnvelopeParams::neutral(), EgExtensions::default(), RATE);
        for _ in 0..10 {
            assert_eq!(eg.next(), 1.0);
        }
    }

    #[test]
    fn test_release_decays_to_zero_and_finishes() {
        let mut eg = AdsrEnvelope::new();
        eg.trigger(&params(), EgExtensions::default(), RATE);
        for _ in 0..50 {
            eg.next();
        }

        eg.release();
        let mut steps = 0;
        while !eg.is_finished() && steps < 1000 {
            eg.next();
            steps += 1;
        }
        assert!(eg.is_finished());
        assert_eq!(eg.next(), 0.0);
        // 0.1 s release at 100 steps/s is about 10 steps.
        assert!(steps <= 20, "release took {steps} steps");
    }

    #[test]
    fn test_cancel_release_returns_to_sustain() {
        let mut eg = AdsrEnvelope::new();
        eg.trigger(&params(), EgExtensions::default(), RATE);
        for _ in 0..50 {
            eg.next();
        }

        eg.release();
        eg.next();
        eg.cancel_release();
        for _ in 0..20 {
            eg.next();
        }
        assert!((eg.level() - 0.5).abs() < 0.01);
        assert!(!eg.is_finished());
    }

    #[test]
    fn test_fade_out_is_immediate() {
        let mut eg = AdsrEnvelope::new();
        eg.trigger(&params(), EgExtensions::default(), RATE);
        for _ in 0..5 {
            eg.next();
        }
        assert!(eg.level() > 0.0);

        eg.enter_fade_out();
        assert_eq!(eg.next(), 0.0);
        assert!(eg.is_finished());
    }

    #[test]
    fn test_finite_sustain_decays_to_done() {
        let mut p = params();
        p.infinite_sustain = false;
        p.decay2 = 0.1;

        let mut eg = AdsrEnvelope::new();
        eg.trigger(&p, EgExtensions::default(), RATE);
        let mut steps = 0;
        while !eg.is_finished() && steps < 10_000 {
            eg.next();
            steps += 1;
        }
        assert!(eg.is_finished());
    }

    #[test]
    fn test_decay_envelope_approaches_unity() {
        let mut eg = DecayEnvelope::new();
        eg.trigger(1.5, 0.1, RATE);

        let first = eg.next();
        assert!((first - 1.5).abs() < 1e-6);
        for _ in 0..100 {
            eg.next();
        }
        assert_eq!(eg.next(), 1.0);
    }

    #[test]
    fn test_decay_envelope_without_depth_is_unity() {
        let mut eg = DecayEnvelope::new();
        eg.trigger(1.0, 1.0, RATE);
        assert_eq!(eg.next(), 1.0);
    }
}
