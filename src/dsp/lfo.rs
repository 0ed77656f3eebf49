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

//! Low-frequency oscillator.
//!
//! A triangle oscillator running at control rate. Depth is the sum of a firm
//! internal contribution and an external contribution scaled by a routed MIDI
//! controller; the LFO is only enabled when either is non-zero after routing.

use serde::{Deserialize, Serialize};

/// Depth inputs are expressed in 0..=1200 units (cents for pitch, 1/1200th
/// of full scale otherwise).
const DEPTH_SCALE: f32 = 1200.0;

/// Where in the wave the oscillator starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LfoStartLevel {
    #[default]
    Max,
    Mid,
    Min,
}

/// Whether the wave spans a signed or unsigned range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfoRange {
    /// Output waves between `-max` and `+max`.
    Signed,
    /// Output waves between `0` and `+max`.
    Unsigned,
}

/// Triangle LFO.
pub struct Lfo {
    range: LfoRange,
    max: f32,

    /// Phase in 0.0..1.0.
    phase: f32,
    /// Phase increment per control step.
    step: f32,
    /// 1.0 or -1.0 (flip-phase inverts the wave).
    polarity: f32,

    internal_depth: f32,
    /// External depth per controller unit (0..=127).
    ext_depth_coeff: f32,
    ext_depth: f32,
    controller: Option<u8>,
    enabled: bool,
}

impl Lfo {
    /// An LFO waving between `-max` and `+max`.
    pub fn signed(max: f32) -> Self {
        Self::new(LfoRange::Signed, max)
    }

    /// An LFO waving between `0` and `+max`.
    pub fn unsigned(max: f32) -> Self {
        Self::new(LfoRange::Unsigned, max)
    }

    fn new(range: LfoRange, max: f32) -> Self {
        Self {
            range,
            max,
            phase: 0.0,
            step: 0.0,
            polarity: 1.0,
            internal_depth: 0.0,
            ext_depth_coeff: 0.0,
            ext_depth: 0.0,
            controller: None,
            enabled: false,
        }
    }

    /// Arms the oscillator for a new voice.
    ///
    /// `internal_depth` and `ext_control_depth` are in 0..=1200 units;
    /// `controller_value` is the routed controller's current value (ignored
    /// when `controller` is `None`). The LFO is enabled only if either depth
    /// contribution is non-zero after routing.
    #[allow(clippy::too_many_arguments)]
    pub fn trigger(
        &mut self,
        frequency: f32,
        start_level: LfoStartLevel,
        internal_depth: u16,
        ext_control_depth: u16,
        controller: Option<u8>,
        controller_value: u8,
        flip_phase: bool,
        control_rate: f32,
    ) {
        self.step = frequency.max(0.0) / control_rate.max(1.0);
        self.polarity = if flip_phase { -1.0 } else { 1.0 };
        self.internal_depth = f32::from(internal_depth) / DEPTH_SCALE;
        self.ext_depth_coeff = f32::from(ext_control_depth) / DEPTH_SCALE / 127.0;
        self.controller = controller;
        self.ext_depth = if controller.is_some() {
            self.ext_depth_coeff * f32::from(controller_value)
        } else {
            0.0
        };
        self.phase = match start_level {
            LfoStartLevel::Max => 0.0,
            LfoStartLevel::Mid => 0.25,
            LfoStartLevel::Min => 0.5,
        };
        self.enabled = self.internal_depth > 0.0
            || (controller.is_some() && self.ext_depth_coeff > 0.0);
    }

    /// Updates the external depth when the routed controller changes.
    pub fn update(&mut self, controller_value: u8) {
        if self.controller.is_some() {
            self.ext_depth = self.ext_depth_coeff * f32::from(controller_value);
        }
    }

    /// Whether this LFO contributes at all for the current voice.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The routed MIDI controller, if any.
    pub fn controller(&self) -> Option<u8> {
        self.controller
    }

    /// Next control-rate sample of the wave, scaled by depth and `max`.
    pub fn render(&mut self) -> f32 {
        // Triangle from phase: +1 at 0, -1 at 0.5, back to +1 at 1.0.
        let tri = if self.phase < 0.5 {
            1.0 - 4.0 * self.phase
        } else {
            4.0 * self.phase - 3.0
        };
        self.phase += self.step;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }

        let depth = (self.internal_depth + self.ext_depth).min(1.0);
        let wave = tri * self.polarity;
        match self.range {
            LfoRange::Signed => wave * depth * self.max,
            LfoRange::Unsigned => (wave + 1.0) * 0.5 * depth * self.max,
        }
    }
}
