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

//! The synthesis routine: interpolating resampler, loop wrap, pan and filter
//! application.
//!
//! The routine is a trait so a platform-specialized implementation can slot
//! in behind the same seam; the portable scalar path is the reference and
//! the test oracle. Reads past the end of `src` yield silence, which is what
//! the cache trailer and ring padding guarantee anyway.

use crate::dsp::filter::StereoFilter;

/// Loop endpoints in source-frame coordinates, for loops handled directly
/// from the RAM cache.
#[derive(Debug, Clone, Copy)]
pub struct LoopWrap {
    pub start: f64,
    pub end: f64,
}

/// One sub-fragment of synthesis work.
pub struct SynthParams<'a> {
    /// Interleaved source window (RAM cache or ring peek).
    pub src: &'a [f32],
    /// 1 (mono) or 2 (stereo).
    pub src_channels: usize,
    /// Fractional playback position in frames, relative to `src`. Advanced
    /// by the routine.
    pub pos: &'a mut f64,
    /// Frame increment per output frame.
    pub pitch: f64,
    /// False when the final pitch is within a cent of unity; the routine
    /// then copies frames without interpolating.
    pub resample: bool,
    /// Per-side gains (pan and volume premultiplied).
    pub volume_left: f32,
    pub volume_right: f32,
    /// Output slices for this sub-fragment; the routine accumulates.
    pub out_left: &'a mut [f32],
    pub out_right: &'a mut [f32],
    /// Filter to run each frame through, when the region enables one.
    pub filter: Option<&'a mut StereoFilter>,
    /// RAM-loop endpoints, when the voice loops from cache.
    pub loop_wrap: Option<LoopWrap>,
}

/// A synthesis implementation. Exactly one is selected at engine
/// construction.
pub trait SynthesisRoutine: Send + Sync {
    /// Renders one sub-fragment, advancing `params.pos` and accumulating
    /// into the output slices. Returns the number of loop wraps taken.
    fn render(&self, params: &mut SynthParams<'_>) -> u32;
}

/// The portable scalar implementation (linear interpolation).
pub struct ScalarSynthesis;

#[inline]
fn at(src: &[f32], index: usize) -> f32 {
    src.get(index).copied().unwrap_or(0.0)
}

impl SynthesisRoutine for ScalarSynthesis {
    fn render(&self, params: &mut SynthParams<'_>) -> u32 {
        let mut wraps = 0;
        let stereo = params.src_channels == 2;

        for i in 0..params.out_left.len() {
            if let Some(wrap) = params.loop_wrap {
                while *params.pos >= wrap.end {
                    *params.pos -= wrap.end - wrap.start;
                    wraps += 1;
                }
            }

            let index = *params.pos as usize;
            let frac = (*params.pos - index as f64) as f32;

            let (mut left, mut right) = if stereo {
                let base = index * 2;
                if params.resample {
                    let l0 = at(params.src, base);
                    let r0 = at(params.src, base + 1);
                    (
                        l0 + (at(params.src, base + 2) - l0) * frac,
                        r0 + (at(params.src, base + 3) - r0) * frac,
                    )
                } else {
                    (at(params.src, base), at(params.src, base + 1))
                }
            } else {
                let v = if params.resample {
                    let s0 = at(params.src, index);
                    s0 + (at(params.src, index + 1) - s0) * frac
                } else {
                    at(params.src, index)
                };
                (v, v)
            };

            if let Some(filter) = params.filter.as_deref_mut() {
                (left, right) = filter.process(left, right);
            }

            params.out_left[i] += left * params.volume_left;
            params.out_right[i] += right * params.volume_right;

            *params.pos += params.pitch;
        }

        wraps
    }
}

/// The synthesis routine used unless the caller installs another one.
pub fn default_synthesis() -> Box<dyn SynthesisRoutine> {
    Box::new(ScalarSynthesis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(
        src: &[f32],
        channels: usize,
        pos: &mut f64,
        pitch: f64,
        frames: usize,
        loop_wrap: Option<LoopWrap>,
    ) -> (Vec<f32>, Vec<f32>, u32) {
        let mut left = vec![0.0; frames];
        let mut right = vec![0.0; frames];
        let wraps = ScalarSynthesis.render(&mut SynthParams {
            src,
            src_channels: channels,
            pos,
            pitch,
            resample: (pitch - 1.0).abs() > 1e-9,
            volume_left: 1.0,
            volume_right: 1.0,
            out_left: &mut left,
            out_right: &mut right,
            filter: None,
            loop_wrap,
        });
        (left, right, wraps)
    }

    #[test]
    fn test_unity_pitch_copies_exactly() {
        let src = [0.1, 0.2, 0.3, 0.4];
        let mut pos = 0.0;
        let (left, right, _) = render(&src, 1, &mut pos, 1.0, 4, None);
        assert_eq!(left, src.to_vec());
        assert_eq!(right, src.to_vec());
        assert_eq!(pos, 4.0);
    }

    #[test]
    fn test_octave_up_consumes_two_frames_per_output() {
        let src: Vec<f32> = (0..32).map(|i| i as f32).collect();
        let mut pos = 0.0;
        let (left, _, _) = render(&src, 1, &mut pos, 2.0, 8, None);
        assert_eq!(pos, 16.0);
        // Linear interpolation at integral positions returns the source.
        assert_eq!(left[1], 2.0);
        assert_eq!(left[4], 8.0);
    }

    #[test]
    fn test_stereo_channels_stay_separate() {
        let src = [1.0, -1.0, 0.5, -0.5];
        let mut pos = 0.0;
        let (left, right, _) = render(&src, 2, &mut pos, 1.0, 2, None);
        assert_eq!(left, vec![1.0, 0.5]);
        assert_eq!(right, vec![-1.0, -0.5]);
    }

    #[test]
    fn test_loop_wraps_and_counts() {
        let src = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let mut pos = 0.0;
        // Loop frames [1, 4): 1,2,3,1,2,3,...
        let (left, _, wraps) = render(
            &src,
            1,
            &mut pos,
            1.0,
            8,
            Some(LoopWrap {
                start: 1.0,
                end: 4.0,
            }),
        );
        assert_eq!(left, vec![0.0, 1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0]);
        assert_eq!(wraps, 2);
    }

    #[test]
    fn test_reads_past_end_are_silent() {
        let src = [1.0, 1.0];
        let mut pos = 0.0;
        let (left, _, _) = render(&src, 1, &mut pos, 1.0, 4, None);
        assert_eq!(left, vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_accumulates_into_output() {
        let src = [0.25, 0.25];
        let mut left = vec![0.5; 2];
        let mut right = vec![0.5; 2];
        let mut pos = 0.0;
        ScalarSynthesis.render(&mut SynthParams {
            src: &src,
            src_channels: 1,
            pos: &mut pos,
            pitch: 1.0,
            resample: false,
            volume_left: 1.0,
            volume_right: 0.5,
            out_left: &mut left,
            out_right: &mut right,
            filter: None,
            loop_wrap: None,
        });
        assert_eq!(left, vec![0.75, 0.75]);
        assert_eq!(right, vec![0.625, 0.625]);
    }
}
