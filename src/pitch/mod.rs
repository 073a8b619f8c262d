//! Pitch curve processing
//!
//! Owns the three-layer pitch decomposition: a smooth base curve derived
//! from the note list, a per-frame delta where expression lives, and the
//! composed F0 handed to the vocoder. After any mutation the composition
//! identity holds: `compose(base, delta) == f0` on voiced frames.

use crate::notes::Note;
use crate::{HOP_SIZE, SAMPLE_RATE};
use std::ops::Range;

/// Half-support of the base smoothing kernel, in seconds.
///
/// The cosine kernel over this support keeps note transitions C1-smooth
/// with a single parameter; a linear ramp here would break the
/// composition identity under note drags.
pub const SMOOTH_WINDOW: f64 = 0.12;

/// Resolution of the intermediate smoothing grid, in seconds
const STEP_RESOLUTION: f64 = 0.001;

/// Convert semitones to Hz (A4 = MIDI 69 = 440 Hz)
pub fn midi_to_freq(midi: f32) -> f32 {
    440.0 * ((midi - 69.0) / 12.0).exp2()
}

/// Convert Hz to semitones
pub fn freq_to_midi(freq: f32) -> f32 {
    12.0 * (freq / 440.0).log2() + 69.0
}

/// The base/delta decomposition over a fixed frame count
#[derive(Debug, Clone, PartialEq)]
pub struct PitchModel {
    /// Smoothed note pitch per frame, semitones; 0 when no notes exist
    pub base: Vec<f32>,
    /// Per-frame semitone deviation from base
    pub delta: Vec<f32>,
}

impl PitchModel {
    /// Create an all-zero model over `num_frames` frames
    pub fn new(num_frames: usize) -> Self {
        Self {
            base: vec![0.0; num_frames],
            delta: vec![0.0; num_frames],
        }
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.base.len()
    }

    /// True when the model covers no frames
    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// Recompute the base curve from the note list, preserving delta.
    pub fn rebuild_base_from_notes(&mut self, notes: &[Note]) {
        let num_frames = self.base.len();
        self.base = smooth_base_curve(notes, num_frames);
    }

    /// Rebuild both curves from a source F0 trajectory: base from the
    /// notes, delta as the source's deviation from base on voiced frames.
    pub fn rebuild_from_source(&mut self, notes: &[Note], src_f0: &[f32], voiced: &[bool]) {
        let num_frames = src_f0.len();
        self.base = smooth_base_curve(notes, num_frames);
        self.delta = vec![0.0; num_frames];
        for i in 0..num_frames {
            if voiced.get(i).copied().unwrap_or(false) && src_f0[i] > 0.0 {
                self.delta[i] = freq_to_midi(src_f0[i]) - self.base[i];
            }
        }
    }

    /// Cached Hz rendering of the base curve
    pub fn base_f0(&self) -> Vec<f32> {
        self.base.iter().map(|&m| midi_to_freq(m)).collect()
    }

    /// Compose F0 over a frame range without mutating base or delta.
    ///
    /// Vibrato is applied per covering note and the global offset is
    /// added inside the composition; neither is ever baked into the
    /// stored curves. With `apply_uv_mask` set, unvoiced frames become 0.
    pub fn compose_range(
        &self,
        notes: &[Note],
        voiced: &[bool],
        range: Range<usize>,
        apply_uv_mask: bool,
        global_offset: f32,
    ) -> Vec<f32> {
        let start = range.start.min(self.len());
        let end = range.end.min(self.len());
        let mut out = Vec::with_capacity(end.saturating_sub(start));

        // Notes are ordered; walk a cursor instead of searching per frame.
        let mut note_idx = 0usize;

        for frame in start..end {
            while note_idx < notes.len() && notes[note_idx].end_frame <= frame {
                note_idx += 1;
            }

            let mut midi = self.base[frame] + self.delta[frame] + global_offset;

            if let Some(note) = notes.get(note_idx) {
                if note.contains(frame) && !note.rest && note.vibrato.enabled {
                    let t = (frame - note.start_frame) as f64 * HOP_SIZE as f64
                        / SAMPLE_RATE as f64;
                    let phase = 2.0 * std::f64::consts::PI * note.vibrato.rate_hz as f64 * t
                        + note.vibrato.phase_radians as f64;
                    midi += note.vibrato.depth_semitones * phase.sin() as f32;
                }
            }

            let hz = midi_to_freq(midi);
            if apply_uv_mask && !voiced.get(frame).copied().unwrap_or(false) {
                out.push(0.0);
            } else {
                out.push(hz);
            }
        }

        out
    }

    /// Compose the full F0 trajectory
    pub fn compose(
        &self,
        notes: &[Note],
        voiced: &[bool],
        apply_uv_mask: bool,
        global_offset: f32,
    ) -> Vec<f32> {
        self.compose_range(notes, voiced, 0..self.len(), apply_uv_mask, global_offset)
    }
}

/// Build the smoothed base curve over `num_frames` frames.
///
/// The raw step holds, at every millisecond, the pitch of the covering
/// note; inside a gap the switch happens at the midpoint between the
/// adjacent notes, and the outermost notes extend flat past the edges so
/// dragging a note shifts its whole neighborhood rigidly. The step is
/// convolved with a normalized cosine kernel of support
/// [-SMOOTH_WINDOW, +SMOOTH_WINDOW] and resampled to frame time.
pub fn smooth_base_curve(notes: &[Note], num_frames: usize) -> Vec<f32> {
    let pitched: Vec<&Note> = notes.iter().filter(|n| !n.rest).collect();
    if pitched.is_empty() || num_frames == 0 {
        return vec![0.0; num_frames];
    }

    let frame_seconds = HOP_SIZE as f64 / SAMPLE_RATE as f64;
    let total_seconds = num_frames as f64 * frame_seconds;
    let grid_len = (total_seconds / STEP_RESOLUTION).ceil() as usize + 1;

    // Raw step on the millisecond grid
    let mut step = vec![0.0f32; grid_len];
    let mut cursor = 0usize;
    for (i, slot) in step.iter_mut().enumerate() {
        let t = i as f64 * STEP_RESOLUTION;
        let frame = t / frame_seconds;

        while cursor + 1 < pitched.len() && (pitched[cursor].end_frame as f64) <= frame {
            // Switch to the next note once past the gap midpoint
            let midpoint =
                (pitched[cursor].end_frame + pitched[cursor + 1].start_frame) as f64 / 2.0;
            if frame >= midpoint {
                cursor += 1;
            } else {
                break;
            }
        }

        *slot = pitched[cursor].effective_midi();
    }

    // Normalized cosine kernel over +/- SMOOTH_WINDOW
    let half_taps = (SMOOTH_WINDOW / STEP_RESOLUTION).round() as isize;
    let mut kernel = Vec::with_capacity((2 * half_taps + 1) as usize);
    let mut kernel_sum = 0.0f64;
    for k in -half_taps..=half_taps {
        let x = k as f64 / half_taps as f64;
        let w = 0.5 * (1.0 + (std::f64::consts::PI * x).cos());
        kernel.push(w);
        kernel_sum += w;
    }
    for w in kernel.iter_mut() {
        *w /= kernel_sum;
    }

    // Convolve with edge replication
    let smoothed: Vec<f32> = (0..grid_len)
        .map(|i| {
            let mut acc = 0.0f64;
            for (j, &w) in kernel.iter().enumerate() {
                let offset = j as isize - half_taps;
                let idx = (i as isize + offset).clamp(0, grid_len as isize - 1) as usize;
                acc += step[idx] as f64 * w;
            }
            acc as f32
        })
        .collect();

    // Resample to frame time
    (0..num_frames)
        .map(|f| {
            let t = f as f64 * frame_seconds;
            let pos = t / STEP_RESOLUTION;
            let idx = (pos.floor() as usize).min(grid_len - 1);
            let next = (idx + 1).min(grid_len - 1);
            let frac = (pos - idx as f64) as f32;
            smoothed[idx] + (smoothed[next] - smoothed[idx]) * frac
        })
        .collect()
}

/// Log-linearly interpolate a pitch curve across unvoiced runs.
///
/// Interior runs blend geometrically between their voiced endpoints;
/// leading and trailing runs copy the nearest voiced value. An
/// all-unvoiced curve comes back unchanged.
pub fn interpolate_through_uv(pitch: &[f32], voiced: &[bool]) -> Vec<f32> {
    let mut out = pitch.to_vec();
    let n = pitch.len();

    let first_voiced = (0..n).find(|&i| voiced[i] && pitch[i] > 0.0);
    let first_voiced = match first_voiced {
        Some(i) => i,
        None => return out,
    };
    let last_voiced = (0..n)
        .rev()
        .find(|&i| voiced[i] && pitch[i] > 0.0)
        .unwrap_or(first_voiced);

    for i in 0..first_voiced {
        out[i] = pitch[first_voiced];
    }
    for i in (last_voiced + 1)..n {
        out[i] = pitch[last_voiced];
    }

    let mut i = first_voiced;
    while i < last_voiced {
        if voiced[i + 1] && pitch[i + 1] > 0.0 {
            i += 1;
            continue;
        }

        // Unvoiced run (i, j) with voiced endpoints at i and j
        let mut j = i + 1;
        while j <= last_voiced && !(voiced[j] && pitch[j] > 0.0) {
            j += 1;
        }

        let ln_a = out[i].ln();
        let ln_b = out[j].ln();
        let span = (j - i) as f32;
        for k in (i + 1)..j {
            let t = (k - i) as f32 / span;
            out[k] = (ln_a + (ln_b - ln_a) * t).exp();
        }

        i = j;
    }

    out
}
