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

//! Biquad voice filter.
//!
//! One coefficient set shared by independent left/right state, recomputed at
//! sub-fragment granularity when cutoff or resonance moved.

use crate::instrument::FilterKind;

/// Lowest cutoff frequency the filter will be driven to, in Hz.
pub const FILTER_CUTOFF_MIN: f32 = 100.0;

/// Highest cutoff frequency the filter will be driven to, in Hz.
pub const FILTER_CUTOFF_MAX: f32 = 10000.0;

/// Biquad coefficients in direct form 1.
#[derive(Debug, Clone, Copy, Default)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefficients {
    /// RBJ cookbook coefficients. `resonance` is 0.0..=1.0 and maps onto the
    /// filter Q.
    fn compute(kind: FilterKind, cutoff: f32, resonance: f32, sample_rate: f32) -> Self {
        let cutoff = cutoff.clamp(FILTER_CUTOFF_MIN, (sample_rate * 0.45).min(FILTER_CUTOFF_MAX));
        let q = 0.707 + resonance.clamp(0.0, 1.0) * 6.0;

        let omega = 2.0 * std::f32::consts::PI * cutoff / sample_rate;
        let (sin, cos) = omega.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;

        let (b0, b1, b2) = match kind {
            FilterKind::Lowpass => {
                let b1 = 1.0 - cos;
                (b1 / 2.0, b1, b1 / 2.0)
            }
            FilterKind::Highpass => {
                let b1 = -(1.0 + cos);
                (-b1 / 2.0, b1, -b1 / 2.0)
            }
            FilterKind::Bandpass => (alpha, 0.0, -alpha),
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: (-2.0 * cos) / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, c: &Coefficients, x: f32) -> f32 {
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// Stereo biquad with shared coefficients and per-channel state.
pub struct StereoFilter {
    kind: FilterKind,
    coefficients: Coefficients,
    left: BiquadState,
    right: BiquadState,
    last_cutoff: f32,
    last_resonance: f32,
}

impl StereoFilter {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            coefficients: Coefficients::default(),
            left: BiquadState::default(),
            right: BiquadState::default(),
            last_cutoff: 0.0,
            last_resonance: -1.0,
        }
    }

    /// Resets state and retargets the filter type for a re-triggered voice.
    pub fn reset(&mut self, kind: FilterKind, cutoff: f32, resonance: f32, sample_rate: f32) {
        self.kind = kind;
        self.left = BiquadState::default();
        self.right = BiquadState::default();
        self.last_cutoff = 0.0;
        self.last_resonance = -1.0;
        self.set_params(cutoff, resonance, sample_rate);
    }

    /// Recomputes coefficients when cutoff or resonance moved since the last
    /// call. Cheap to call once per sub-fragment.
    pub fn set_params(&mut self, cutoff: f32, resonance: f32, sample_rate: f32) {
        if cutoff == self.last_cutoff && resonance == self.last_resonance {
            return;
        }
        self.coefficients = Coefficients::compute(self.kind, cutoff, resonance, sample_rate);
        self.last_cutoff = cutoff;
        self.last_resonance = resonance;
    }

    /// Filters one frame.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        (
            self.left.process(&self.coefficients, left),
            self.right.process(&self.coefficients, right),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn energy(filter: &mut StereoFilter, frequency: f32, sample_rate: f32) -> f32 {
        let mut sum = 0.0;
        for i in 0..4096 {
            let x = (2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate).sin();
            let (l, _) = filter.process(x, x);
            if i >= 1024 {
                // Skip the transient.
                sum += l * l;
            }
        }
        sum
    }

    #[test]
    fn test_lowpass_attenuates_high_frequencies() {
        let mut filter = StereoFilter::new(FilterKind::Lowpass);
        filter.reset(FilterKind::Lowpass, 500.0, 0.0, 44100.0);

        let low = energy(&mut filter, 100.0, 44100.0);
        filter.reset(FilterKind::Lowpass, 500.0, 0.0, 44100.0);
        let high = energy(&mut filter, 8000.0, 44100.0);

        assert!(low > high * 10.0, "low={low} high={high}");
    }

    #[test]
    fn test_highpass_attenuates_low_frequencies() {
        let mut filter = StereoFilter::new(FilterKind::Highpass);
        filter.reset(FilterKind::Highpass, 2000.0, 0.0, 44100.0);

        let low = energy(&mut filter, 100.0, 44100.0);
        filter.reset(FilterKind::Highpass, 2000.0, 0.0, 44100.0);
        let high = energy(&mut filter, 8000.0, 44100.0);

        assert!(high > low * 10.0, "low={low} high={high}");
    }

    #[test]
    fn test_coefficients_cached_until_params_move() {
        let mut filter = StereoFilter::new(FilterKind::Lowpass);
        filter.set_params(1000.0, 0.5, 44100.0);
        let before = filter.coefficients.b0;
        filter.set_params(1000.0, 0.5, 44100.0);
        assert_eq!(filter.coefficients.b0, before);
        filter.set_params(2000.0, 0.5, 44100.0);
        assert_ne!(filter.coefficients.b0, before);
    }
}
