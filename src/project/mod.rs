//! Project data model
//!
//! A project owns the analyzed track: the waveform, the feature arrays,
//! the note list, and the base/delta pitch decomposition. All edits go
//! through methods here so the length and composition invariants hold
//! after every mutation and dirty state is tracked for the incremental
//! synthesizer.

pub mod serialize;

pub use serialize::{load_project, save_project};

use crate::notes::{self, Note};
use crate::pitch::{freq_to_midi, PitchModel};
use crate::playback::WaveformBuffer;
use crate::{Error, Result, N_MELS, SAMPLE_RATE};
use ndarray::Array2;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

/// Loop region in seconds, serialized with the project
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoopRegion {
    pub enabled: bool,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

/// One frame's worth of a free-hand edit, with enough state to reverse it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEdit {
    pub frame: usize,
    pub old_f0: f32,
    pub new_f0: f32,
    pub old_voiced: bool,
    pub new_voiced: bool,
    pub old_delta: f32,
    pub new_delta: f32,
}

/// The editing session state for one vocal track
pub struct Project {
    pub name: String,
    pub audio_path: PathBuf,
    /// Source-file sample rate, informational; audio is stored at the
    /// internal rate
    pub source_sample_rate: u32,

    /// Waveform at the internal rate, shared with playback and splicing
    pub waveform: Arc<WaveformBuffer>,
    /// Log-mel features (N_MELS, T)
    pub mel: Array2<f32>,
    /// Composed F0 in Hz; 0 = unvoiced
    pub f0: Vec<f32>,
    /// Voicing mask; voiced implies f0 > 0
    pub voiced: Vec<bool>,
    /// Cached Hz rendering of the base curve
    pub base_f0: Vec<f32>,
    /// Base/delta decomposition
    pub pitch: PitchModel,
    /// Ordered, non-overlapping note list
    pub notes: Vec<Note>,

    /// Semitone offset applied inside composition, never baked
    pub global_pitch_offset: f32,
    /// Reserved
    pub formant_shift: f32,
    pub volume_db: f32,
    pub loop_region: LoopRegion,

    /// Explicit dirty frame interval from free-hand draws
    f0_dirty: Option<(usize, usize)>,
}

impl Project {
    /// Create an empty project
    pub fn new() -> Self {
        Self {
            name: String::new(),
            audio_path: PathBuf::new(),
            source_sample_rate: SAMPLE_RATE,
            waveform: Arc::new(WaveformBuffer::new()),
            mel: Array2::zeros((N_MELS, 0)),
            f0: Vec::new(),
            voiced: Vec::new(),
            base_f0: Vec::new(),
            pitch: PitchModel::new(0),
            notes: Vec::new(),
            global_pitch_offset: 0.0,
            formant_shift: 0.0,
            volume_db: 0.0,
            loop_region: LoopRegion::default(),
            f0_dirty: None,
        }
    }

    /// Number of feature frames
    pub fn num_frames(&self) -> usize {
        self.f0.len()
    }

    /// Whether the project holds an analyzed track
    pub fn is_loaded(&self) -> bool {
        !self.f0.is_empty()
    }

    /// Check the length-alignment invariant across all feature arrays
    pub fn check_alignment(&self) -> Result<()> {
        let t = self.f0.len();
        let ok = self.voiced.len() == t
            && self.pitch.base.len() == t
            && self.pitch.delta.len() == t
            && self.base_f0.len() == t
            && self.mel.ncols() == t;
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "feature arrays misaligned: f0={} voiced={} base={} delta={} baseF0={} mel={}",
                t,
                self.voiced.len(),
                self.pitch.base.len(),
                self.pitch.delta.len(),
                self.base_f0.len(),
                self.mel.ncols()
            )))
        }
    }

    /// Install analysis results and build the initial curves.
    ///
    /// The detected trajectory becomes the composition source: base from
    /// the notes, delta as the source's deviation, f0 recomposed.
    pub fn apply_analysis(
        &mut self,
        mel: Array2<f32>,
        f0: Vec<f32>,
        voiced: Vec<bool>,
        notes: Vec<Note>,
    ) -> Result<()> {
        if mel.ncols() != f0.len() || f0.len() != voiced.len() {
            return Err(Error::ShapeMismatch {
                expected: format!("{} frames", mel.ncols()),
                actual: format!("f0={} voiced={}", f0.len(), voiced.len()),
            });
        }

        self.mel = mel;
        self.voiced = voiced;
        self.notes = notes;
        self.pitch = PitchModel::new(f0.len());
        self.rebuild_curves_from_source(&f0);
        self.f0_dirty = None;
        Ok(())
    }

    /// Rebuild base and delta from a source trajectory, then recompose
    pub fn rebuild_curves_from_source(&mut self, src_f0: &[f32]) {
        self.pitch
            .rebuild_from_source(&self.notes, src_f0, &self.voiced);
        self.base_f0 = self.pitch.base_f0();
        self.compose_f0_in_place();
    }

    /// Rebuild the base curve after a note change, preserving delta
    pub fn rebuild_base_from_notes(&mut self) {
        self.pitch.rebuild_base_from_notes(&self.notes);
        self.base_f0 = self.pitch.base_f0();
    }

    /// Compose F0 over a range without touching stored state
    pub fn compose_f0_range(
        &self,
        range: Range<usize>,
        apply_uv_mask: bool,
        global_offset: f32,
    ) -> Vec<f32> {
        self.pitch
            .compose_range(&self.notes, &self.voiced, range, apply_uv_mask, global_offset)
    }

    /// Compose the full F0 trajectory without touching stored state
    pub fn compose_f0(&self, apply_uv_mask: bool, global_offset: f32) -> Vec<f32> {
        self.compose_f0_range(0..self.num_frames(), apply_uv_mask, global_offset)
    }

    /// Write the composed trajectory into the stored f0 array
    pub fn compose_f0_in_place(&mut self) {
        self.f0 = self.compose_f0(true, self.global_pitch_offset);
    }

    // ------------------------------------------------------------------
    // Note drags
    // ------------------------------------------------------------------

    /// Start a drag: snapshot each dragged note's delta slice so local
    /// expression survives the base rebuild on commit.
    pub fn begin_note_drag(&mut self, indices: &[usize]) {
        for &i in indices {
            if let Some(note) = self.notes.get_mut(i) {
                let start = note.start_frame.min(self.pitch.delta.len());
                let end = note.end_frame.min(self.pitch.delta.len());
                note.delta_snapshot = Some(self.pitch.delta[start..end].to_vec());
            }
        }
    }

    /// Live drag update: the transient offset moves, nothing is rebuilt
    pub fn update_note_drag(&mut self, indices: &[usize], semitones: f32) {
        for &i in indices {
            if let Some(note) = self.notes.get_mut(i) {
                note.pitch_offset = semitones;
            }
        }
    }

    /// Commit a drag: fold the offset into the note pitch, restore the
    /// captured delta, rebuild base, recompose, and mark dirty.
    ///
    /// Returns the per-note pre-drag pitches for the undo record.
    pub fn end_note_drag(&mut self, indices: &[usize]) -> Vec<(usize, f32)> {
        let mut old_pitches = Vec::with_capacity(indices.len());

        for &i in indices {
            if let Some(note) = self.notes.get_mut(i) {
                old_pitches.push((i, note.midi_note));
                note.midi_note += note.pitch_offset;
                note.pitch_offset = 0.0;
                note.dirty = true;

                if let Some(snapshot) = note.delta_snapshot.take() {
                    let start = note.start_frame.min(self.pitch.delta.len());
                    for (k, &d) in snapshot.iter().enumerate() {
                        if start + k < self.pitch.delta.len() {
                            self.pitch.delta[start + k] = d;
                        }
                    }
                }
            }
        }

        self.rebuild_base_from_notes();
        self.compose_f0_in_place();
        old_pitches
    }

    /// Set note pitches directly (undo/redo path); rebuilds and marks
    /// the affected notes dirty.
    pub fn set_note_pitches(&mut self, pitches: &[(usize, f32)]) {
        for &(i, midi) in pitches {
            if let Some(note) = self.notes.get_mut(i) {
                note.midi_note = midi;
                note.pitch_offset = 0.0;
                note.dirty = true;
            }
        }
        self.rebuild_base_from_notes();
        self.compose_f0_in_place();
    }

    /// Convenience for non-interactive pitch shifts: a full drag cycle
    pub fn drag_notes_by(&mut self, indices: &[usize], semitones: f32) -> Vec<(usize, f32)> {
        self.begin_note_drag(indices);
        self.update_note_drag(indices, semitones);
        self.end_note_drag(indices)
    }

    // ------------------------------------------------------------------
    // Free-hand pitch drawing
    // ------------------------------------------------------------------

    /// Paint target pitches from `start_frame`.
    ///
    /// Each touched frame gets its delta set so the composed pitch equals
    /// the target, is forced voiced, and joins the explicit dirty range.
    /// Note-local delta snapshots over the range are cleared. Returns the
    /// reversible per-frame edits.
    pub fn draw_pitch(&mut self, start_frame: usize, target_hz: &[f32]) -> Vec<FrameEdit> {
        let mut edits = Vec::with_capacity(target_hz.len());
        let t = self.num_frames();

        for (k, &hz) in target_hz.iter().enumerate() {
            let frame = start_frame + k;
            if frame >= t || hz <= 0.0 {
                continue;
            }

            let new_delta =
                freq_to_midi(hz) - self.pitch.base[frame] - self.global_pitch_offset;

            let edit = FrameEdit {
                frame,
                old_f0: self.f0[frame],
                new_f0: hz,
                old_voiced: self.voiced[frame],
                new_voiced: true,
                old_delta: self.pitch.delta[frame],
                new_delta,
            };

            self.f0[frame] = hz;
            self.voiced[frame] = true;
            self.pitch.delta[frame] = new_delta;
            edits.push(edit);
        }

        if !edits.is_empty() {
            let end_frame = (start_frame + target_hz.len()).min(t);
            for note in self.notes.iter_mut() {
                if note.overlaps_range(start_frame, end_frame) {
                    note.delta_snapshot = None;
                }
            }
            self.mark_range_dirty(start_frame, end_frame);
        }

        edits
    }

    /// Apply recorded frame edits in the given direction (undo/redo)
    pub fn apply_frame_edits(&mut self, edits: &[FrameEdit], forward: bool) {
        let mut lo = usize::MAX;
        let mut hi = 0usize;

        for edit in edits {
            if edit.frame >= self.num_frames() {
                continue;
            }
            if forward {
                self.f0[edit.frame] = edit.new_f0;
                self.voiced[edit.frame] = edit.new_voiced;
                self.pitch.delta[edit.frame] = edit.new_delta;
            } else {
                self.f0[edit.frame] = edit.old_f0;
                self.voiced[edit.frame] = edit.old_voiced;
                self.pitch.delta[edit.frame] = edit.old_delta;
            }
            lo = lo.min(edit.frame);
            hi = hi.max(edit.frame + 1);
        }

        if lo < hi {
            self.mark_range_dirty(lo, hi);
        }
    }

    // ------------------------------------------------------------------
    // Note structure edits
    // ------------------------------------------------------------------

    /// Split the note at `index` at `frame`; both halves keep the pitch
    /// and vibrato settings, and the right half restarts vibrato phase.
    ///
    /// Returns (original, left, right) for the undo record.
    pub fn split_note(&mut self, index: usize, frame: usize) -> Result<(Note, Note, Note)> {
        let note = self
            .notes
            .get(index)
            .ok_or_else(|| Error::InvalidState(format!("no note at index {}", index)))?
            .clone();

        if frame <= note.start_frame || frame >= note.end_frame {
            return Err(Error::InvalidState(format!(
                "split frame {} outside note ({}, {})",
                frame, note.start_frame, note.end_frame
            )));
        }

        let mut left = note.clone();
        left.end_frame = frame;
        left.delta_snapshot = None;
        left.dirty = true;

        let mut right = note.clone();
        right.start_frame = frame;
        right.delta_snapshot = None;
        right.dirty = true;

        self.notes[index] = left.clone();
        self.notes.insert(index + 1, right.clone());

        self.rebuild_base_from_notes();
        self.compose_f0_in_place();
        Ok((note, left, right))
    }

    /// Replace the two notes at `index` with the original (undo of split)
    pub fn unsplit_note(&mut self, index: usize, original: Note) {
        if index + 1 < self.notes.len() {
            self.notes.remove(index + 1);
        }
        if index < self.notes.len() {
            let mut restored = original;
            restored.dirty = true;
            self.notes[index] = restored;
        }
        self.rebuild_base_from_notes();
        self.compose_f0_in_place();
    }

    /// Re-apply a split from its undo record
    pub fn resplit_note(&mut self, index: usize, left: Note, right: Note) {
        if index < self.notes.len() {
            self.notes[index] = left;
            self.notes.insert(index + 1, right);
            self.rebuild_base_from_notes();
            self.compose_f0_in_place();
        }
    }

    /// Set the global offset; recomposes but never bakes
    pub fn set_global_pitch_offset(&mut self, semitones: f32) {
        self.global_pitch_offset = semitones;
        self.compose_f0_in_place();
        let t = self.num_frames();
        if t > 0 {
            self.mark_range_dirty(0, t);
        }
    }

    // ------------------------------------------------------------------
    // Dirty tracking
    // ------------------------------------------------------------------

    /// Whether any note is dirty
    pub fn has_dirty_notes(&self) -> bool {
        self.notes.iter().any(|n| n.dirty)
    }

    /// Whether a free-hand dirty interval is set
    pub fn has_f0_dirty_range(&self) -> bool {
        self.f0_dirty.is_some()
    }

    /// The explicit f0 dirty interval
    pub fn f0_dirty_range(&self) -> Option<(usize, usize)> {
        self.f0_dirty
    }

    /// Extend the explicit dirty interval to cover `[start, end)`
    pub fn mark_range_dirty(&mut self, start: usize, end: usize) {
        let t = self.num_frames();
        let start = start.min(t);
        let end = end.min(t);
        if start >= end {
            return;
        }
        self.f0_dirty = Some(match self.f0_dirty {
            None => (start, end),
            Some((s, e)) => (s.min(start), e.max(end)),
        });
    }

    /// Union of dirty note spans and the explicit interval
    pub fn dirty_range(&self) -> Option<(usize, usize)> {
        let note_span = notes::dirty_span(&self.notes);
        match (note_span, self.f0_dirty) {
            (None, None) => None,
            (Some(span), None) => Some(span),
            (None, Some(span)) => Some(span),
            (Some((a, b)), Some((c, d))) => Some((a.min(c), b.max(d))),
        }
    }

    /// Clear all dirty state in one call, after a successful synthesis
    pub fn clear_dirty(&mut self) {
        for note in self.notes.iter_mut() {
            note.dirty = false;
        }
        self.f0_dirty = None;
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::midi_to_freq;
    use approx::assert_abs_diff_eq;

    /// A project with one note over a constant 440 Hz trajectory
    fn project_with_tone(frames: usize) -> Project {
        let mut project = Project::new();
        let mel = Array2::from_elem((N_MELS, frames), -2.0f32);
        let f0 = vec![440.0f32; frames];
        let voiced = vec![true; frames];
        let notes = vec![Note::new(0, frames, 69.0)];
        project.apply_analysis(mel, f0, voiced, notes).unwrap();
        project.waveform.replace(vec![0.0f32; frames * crate::HOP_SIZE]);
        project
    }

    #[test]
    fn test_apply_analysis_alignment() {
        let project = project_with_tone(100);
        project.check_alignment().unwrap();
        assert_eq!(project.num_frames(), 100);
    }

    #[test]
    fn test_composition_identity_after_analysis() {
        let project = project_with_tone(100);
        let composed = project.compose_f0(false, 0.0);
        for i in 0..100 {
            let rel = (composed[i] - 440.0).abs() / 440.0;
            assert!(rel < 1e-4, "frame {}: {}", i, composed[i]);
        }
    }

    #[test]
    fn test_drag_note_up_octave() {
        let mut project = project_with_tone(100);
        project.drag_notes_by(&[0], 12.0);

        assert_abs_diff_eq!(project.notes[0].midi_note, 81.0, epsilon = 1e-4);
        assert_eq!(project.notes[0].pitch_offset, 0.0);
        assert!(project.notes[0].dirty);

        let composed = project.compose_f0(false, 0.0);
        for i in 10..90 {
            assert!((composed[i] - 880.0).abs() < 1.0, "frame {}: {}", i, composed[i]);
        }
        // Delta stays what it was: essentially zero
        for &d in &project.pitch.delta {
            assert!(d.abs() < 1e-3);
        }
    }

    #[test]
    fn test_drag_idempotence() {
        let mut project = project_with_tone(100);
        let midi_before = project.notes[0].midi_note;
        let base_before = project.pitch.base.clone();
        let delta_before = project.pitch.delta.clone();
        let f0_before = project.f0.clone();

        project.drag_notes_by(&[0], 12.0);
        project.drag_notes_by(&[0], -12.0);

        assert_eq!(project.notes[0].midi_note, midi_before);
        assert_eq!(project.pitch.base, base_before);
        assert_eq!(project.pitch.delta, delta_before);
        assert_eq!(project.f0, f0_before);
    }

    #[test]
    fn test_draw_pitch_ramp() {
        let mut project = project_with_tone(300);
        let target: Vec<f32> = (0..100)
            .map(|i| 440.0 + (660.0 - 440.0) * i as f32 / 99.0)
            .collect();

        let edits = project.draw_pitch(100, &target);
        assert_eq!(edits.len(), 100);

        for i in 100..200 {
            assert!(project.voiced[i]);
            assert!((project.f0[i] - target[i - 100]).abs() < 1.0);
        }

        let (ds, de) = project.f0_dirty_range().unwrap();
        assert!(ds <= 100 && de >= 200);
    }

    #[test]
    fn test_draw_pitch_survives_drag() {
        // Free-hand expression is relative to base, so a later note drag
        // carries the drawn shape with it.
        let mut project = project_with_tone(300);
        let target: Vec<f32> = (0..50).map(|i| 500.0 + i as f32).collect();
        project.draw_pitch(100, &target);
        project.clear_dirty();

        project.drag_notes_by(&[0], 2.0);

        let composed = project.compose_f0(false, 0.0);
        for i in 0..50 {
            let expected = midi_to_freq(freq_to_midi(target[i]) + 2.0);
            let rel = (composed[100 + i] - expected).abs() / expected;
            assert!(rel < 1e-3, "frame {}: {} vs {}", 100 + i, composed[100 + i], expected);
        }
    }

    #[test]
    fn test_global_offset_not_baked() {
        let mut project = project_with_tone(100);
        let delta_before = project.pitch.delta.clone();
        let base_before = project.pitch.base.clone();

        project.set_global_pitch_offset(12.0);

        assert_eq!(project.pitch.delta, delta_before);
        assert_eq!(project.pitch.base, base_before);
        for i in 10..90 {
            assert!((project.f0[i] - 880.0).abs() < 1.0);
        }
    }

    #[test]
    fn test_split_note_round_trip() {
        let mut project = project_with_tone(100);
        let f0_before = project.f0.clone();

        let (original, left, right) = project.split_note(0, 50).unwrap();
        assert_eq!(project.notes.len(), 2);
        assert_eq!(left.end_frame, 50);
        assert_eq!(right.start_frame, 50);

        project.unsplit_note(0, original.clone());
        assert_eq!(project.notes.len(), 1);
        assert_eq!(project.notes[0].start_frame, original.start_frame);
        assert_eq!(project.notes[0].end_frame, original.end_frame);
        assert_eq!(project.f0, f0_before);
    }

    #[test]
    fn test_split_rejects_out_of_range() {
        let mut project = project_with_tone(100);
        assert!(project.split_note(0, 0).is_err());
        assert!(project.split_note(0, 100).is_err());
        assert!(project.split_note(5, 50).is_err());
    }

    #[test]
    fn test_dirty_union() {
        let mut project = project_with_tone(100);
        assert_eq!(project.dirty_range(), None);

        project.mark_range_dirty(80, 90);
        project.notes[0].dirty = true;
        assert_eq!(project.dirty_range(), Some((0, 100)));

        project.clear_dirty();
        assert_eq!(project.dirty_range(), None);
        assert!(!project.has_dirty_notes());
    }

    #[test]
    fn test_multi_note_drag_preserves_local_delta() {
        let mut project = Project::new();
        let frames = 300;
        let mel = Array2::from_elem((N_MELS, frames), -2.0f32);

        // Three notes with slightly scooped pitch inside each
        let notes = vec![
            Note::new(0, 100, 60.0),
            Note::new(100, 200, 64.0),
            Note::new(200, 300, 67.0),
        ];
        let mut f0 = vec![0.0f32; frames];
        for (i, hz) in f0.iter_mut().enumerate() {
            let note = &notes[i / 100];
            let local = (i % 100) as f32 / 100.0;
            let scoop = 0.3 * (std::f32::consts::PI * local).sin();
            *hz = midi_to_freq(note.midi_note + scoop);
        }
        let voiced = vec![true; frames];
        project.apply_analysis(mel, f0, voiced, notes).unwrap();

        let delta_before = project.pitch.delta.clone();
        project.drag_notes_by(&[0, 1, 2], -2.0);

        for i in 0..3 {
            assert_abs_diff_eq!(
                project.notes[i].midi_note,
                [58.0f32, 62.0, 65.0][i],
                epsilon = 1e-4
            );
        }
        // Local expression is untouched by the drag
        assert_eq!(project.pitch.delta, delta_before);
    }
}
