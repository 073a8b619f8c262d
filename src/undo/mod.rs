//! Undo stack
//!
//! A bounded LIFO of reversible edit actions. Each action carries the
//! minimum state to reverse itself; undo and redo re-route through the
//! project's edit methods so curves rebuild and the affected range is
//! marked dirty for the incremental synthesizer.

use crate::notes::Note;
use crate::project::{FrameEdit, Project};

/// Default depth of the undo history
const DEFAULT_CAPACITY: usize = 100;

/// A reversible edit
#[derive(Debug, Clone)]
pub enum EditAction {
    /// Note pitch change: per-note pre-edit pitch and the applied offset
    NotePitch {
        pitches: Vec<(usize, f32)>,
        semitones: f32,
    },
    /// Free-hand draw: per-frame old and new state
    FreehandDraw { edits: Vec<FrameEdit> },
    /// Note split: the original plus both halves and their position
    NoteSplit {
        index: usize,
        original: Note,
        left: Note,
        right: Note,
    },
    /// Global pitch offset change
    GlobalOffset { old: f32, new: f32 },
}

impl EditAction {
    /// Re-apply the edit (redo direction)
    pub fn apply(&self, project: &mut Project) {
        match self {
            EditAction::NotePitch { pitches, semitones } => {
                let new_pitches: Vec<(usize, f32)> = pitches
                    .iter()
                    .map(|&(i, old)| (i, old + semitones))
                    .collect();
                project.set_note_pitches(&new_pitches);
            }
            EditAction::FreehandDraw { edits } => {
                project.apply_frame_edits(edits, true);
            }
            EditAction::NoteSplit { index, left, right, .. } => {
                project.resplit_note(*index, left.clone(), right.clone());
            }
            EditAction::GlobalOffset { new, .. } => {
                project.set_global_pitch_offset(*new);
            }
        }
    }

    /// Reverse the edit (undo direction)
    pub fn revert(&self, project: &mut Project) {
        match self {
            EditAction::NotePitch { pitches, .. } => {
                // Restore the recorded pitches exactly rather than
                // subtracting, so round-trips are bit-identical.
                project.set_note_pitches(pitches);
            }
            EditAction::FreehandDraw { edits } => {
                project.apply_frame_edits(edits, false);
            }
            EditAction::NoteSplit { index, original, .. } => {
                project.unsplit_note(*index, original.clone());
            }
            EditAction::GlobalOffset { old, .. } => {
                project.set_global_pitch_offset(*old);
            }
        }
    }
}

/// Bounded LIFO of edit actions with a redo stack
pub struct UndoStack {
    undo: Vec<EditAction>,
    redo: Vec<EditAction>,
    capacity: usize,
}

impl UndoStack {
    /// Create a stack with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a stack holding at most `capacity` actions
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record an edit that has already been applied. Clears redo history.
    pub fn push(&mut self, action: EditAction) {
        if self.undo.len() >= self.capacity {
            self.undo.remove(0);
        }
        self.undo.push(action);
        self.redo.clear();
    }

    /// Reverse the most recent edit. Returns false when there is nothing
    /// to undo.
    pub fn undo(&mut self, project: &mut Project) -> bool {
        match self.undo.pop() {
            Some(action) => {
                action.revert(project);
                self.redo.push(action);
                true
            }
            None => false,
        }
    }

    /// Re-apply the most recently undone edit
    pub fn redo(&mut self, project: &mut Project) -> bool {
        match self.redo.pop() {
            Some(action) => {
                action.apply(project);
                self.undo.push(action);
                true
            }
            None => false,
        }
    }

    /// Whether undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Whether redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Drop all history
    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}
