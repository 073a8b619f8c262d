//! Note segmentation
//!
//! Groups an F0 trajectory into discrete notes. The model-based path
//! slices the input at silence so the sequence model only sees voiced
//! islands; the rule-based path walks the trajectory directly and is the
//! fallback when no model is available.

use crate::audio::frame_rms;
use crate::model::ModelCache;
use crate::pitch::freq_to_midi;
use crate::{Error, Result};
use ndarray::{Array, IxDyn};
use std::collections::HashMap;

use super::{sort_notes, Note};

/// Minimum note length in frames; shorter detections are discarded
const MIN_NOTE_FRAMES: usize = 5;

/// Semitone distance that opens a new note when sustained
const SPLIT_SEMITONES: f32 = 0.5;

/// Frames the distance must persist before splitting
const SPLIT_SUSTAIN_FRAMES: usize = 3;

/// RMS below this gates a frame as silence when slicing for the model
const RMS_GATE: f32 = 1e-3;

/// Consecutive gated frames that end a voiced island
const GATE_RUN_FRAMES: usize = 8;

/// Segmentation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterChoice {
    /// Sequence model over silence-sliced islands, rule-based fallback
    Model,
    /// Rule-based trajectory walk only
    RuleBased,
}

/// Segment an F0 trajectory into notes.
///
/// `samples` is the waveform the trajectory was extracted from, used for
/// RMS slicing on the model path. Output is in canonical order.
pub fn segment_notes(
    choice: SegmenterChoice,
    samples: &[f32],
    hop: usize,
    f0: &[f32],
    voiced: &[bool],
    cache: &ModelCache,
) -> Result<Vec<Note>> {
    let mut notes = match choice {
        SegmenterChoice::Model => match segment_with_model(samples, hop, f0, voiced, cache) {
            Ok(notes) => notes,
            Err(Error::ModelMissing(name)) => {
                log::warn!("Note model unavailable ({}); using rule-based segmenter", name);
                segment_rule_based(f0, voiced)
            }
            Err(e) => return Err(e),
        },
        SegmenterChoice::RuleBased => segment_rule_based(f0, voiced),
    };

    sort_notes(&mut notes);
    Ok(notes)
}

/// Rule-based segmentation: open a note on the first voiced frame, close
/// on voicing drop or a sustained half-semitone departure.
pub fn segment_rule_based(f0: &[f32], voiced: &[bool]) -> Vec<Note> {
    let mut notes = Vec::new();

    let mut start: Option<usize> = None;
    let mut departure_run = 0usize;

    let mut i = 0;
    while i < f0.len() {
        let is_voiced = voiced.get(i).copied().unwrap_or(false) && f0[i] > 0.0;

        match start {
            None => {
                if is_voiced {
                    start = Some(i);
                    departure_run = 0;
                }
            }
            Some(s) => {
                if !is_voiced {
                    finalize_note(&mut notes, s, i, f0, voiced);
                    start = None;
                } else {
                    let current = mean_midi(&f0[s..i + 1], &voiced[s..i + 1]);
                    let here = freq_to_midi(f0[i]);
                    if (here - current).abs() >= SPLIT_SEMITONES {
                        departure_run += 1;
                        if departure_run >= SPLIT_SUSTAIN_FRAMES {
                            // The departing frames belong to the next note
                            let split = i + 1 - departure_run;
                            if split > s {
                                finalize_note(&mut notes, s, split, f0, voiced);
                                start = Some(split);
                            }
                            departure_run = 0;
                        }
                    } else {
                        departure_run = 0;
                    }
                }
            }
        }
        i += 1;
    }

    if let Some(s) = start {
        finalize_note(&mut notes, s, f0.len(), f0, voiced);
    }

    notes
}

fn finalize_note(notes: &mut Vec<Note>, start: usize, end: usize, f0: &[f32], voiced: &[bool]) {
    if end - start < MIN_NOTE_FRAMES {
        return;
    }
    let midi = mean_midi(&f0[start..end], &voiced[start..end]);
    if midi <= 0.0 {
        return;
    }
    notes.push(Note::new(start, end, midi));
}

/// Mean pitch over voiced frames, in semitone space
fn mean_midi(f0: &[f32], voiced: &[bool]) -> f32 {
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for (i, &hz) in f0.iter().enumerate() {
        if hz > 0.0 && voiced.get(i).copied().unwrap_or(false) {
            sum += freq_to_midi(hz);
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Model-based segmentation over silence-sliced voiced islands.
///
/// Each island is passed to the sequence model with its frame offset;
/// per-island events are stitched back in track time.
fn segment_with_model(
    samples: &[f32],
    hop: usize,
    f0: &[f32],
    voiced: &[bool],
    cache: &ModelCache,
) -> Result<Vec<Note>> {
    let session = cache.get_or_load("note_seg")?;
    if !session.is_real() {
        return Err(Error::ModelMissing("note_seg runtime not available".into()));
    }

    let mut notes = Vec::new();

    for (island_start, island_end) in voiced_islands(samples, hop) {
        let sample_start = island_start * hop;
        let sample_end = (island_end * hop).min(samples.len());
        if sample_end <= sample_start {
            continue;
        }

        let slice = &samples[sample_start..sample_end];
        let input = Array::from_shape_vec(IxDyn(&[1, slice.len()]), slice.to_vec())?;

        let mut inputs = HashMap::new();
        inputs.insert("waveform".to_string(), input);
        let outputs = session.run(inputs)?;

        // Events arrive as rows of (start, end, midi, is_rest) relative
        // to the island.
        let events = outputs
            .get("notes")
            .ok_or_else(|| Error::SynthesisFailure("note model output missing".into()))?;

        let shape = events.shape().to_vec();
        if shape.len() != 2 || shape[1] != 4 {
            return Err(Error::ShapeMismatch {
                expected: "(n, 4)".into(),
                actual: format!("{:?}", shape),
            });
        }

        for row in 0..shape[0] {
            let rel_start = events[[row, 0]].round().max(0.0) as usize;
            let rel_end = events[[row, 1]].round().max(0.0) as usize;
            let midi = events[[row, 2]];
            let is_rest = events[[row, 3]] > 0.5;

            if rel_end <= rel_start {
                continue;
            }

            let start = island_start + rel_start;
            let end = (island_start + rel_end).min(f0.len());
            if end <= start || end - start < MIN_NOTE_FRAMES {
                continue;
            }

            if is_rest {
                notes.push(Note::rest(start, end));
            } else {
                notes.push(Note::new(start, end, midi));
            }
        }
    }

    Ok(notes)
}

/// Frame ranges of voiced islands, split on runs of gated frames.
///
/// The gate is RMS-based so breaths and room tone end an island even when
/// the detector briefly reports voicing.
pub fn voiced_islands(samples: &[f32], hop: usize) -> Vec<(usize, usize)> {
    let energy = frame_rms(samples, hop);
    let mut islands = Vec::new();

    let mut start: Option<usize> = None;
    let mut quiet_run = 0usize;

    for (i, &e) in energy.iter().enumerate() {
        if e > RMS_GATE {
            if start.is_none() {
                start = Some(i);
            }
            quiet_run = 0;
        } else if let Some(s) = start {
            quiet_run += 1;
            if quiet_run >= GATE_RUN_FRAMES {
                islands.push((s, i + 1 - quiet_run));
                start = None;
                quiet_run = 0;
            }
        }
    }

    if let Some(s) = start {
        islands.push((s, energy.len()));
    }

    islands
}
