//! Engine integration tests
//!
//! Exercise the full analysis -> edit -> resynthesis flow on synthetic
//! vocal material: round-trip analysis of a tone, note drags, free-hand
//! drawing, incremental synthesis with job supersession, and the
//! containment guarantees of the splicing path.

use retune::analysis::{run_pipeline, AnalysisConfig};
use retune::f0::F0Detector;
use retune::notes::SegmenterChoice;
use retune::project::Project;
use retune::synth::{IncrementalSynthesizer, SpliceOutcome};
use retune::vocoder::{Vocoder, VocoderConfig};
use retune::{HOP_SIZE, SAMPLE_RATE};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn sine(freq: f32, seconds: f32) -> Vec<f32> {
    let n = (seconds * SAMPLE_RATE as f32) as usize;
    (0..n)
        .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE as f32).sin() * 0.6)
        .collect()
}

fn test_analysis_config() -> AnalysisConfig {
    AnalysisConfig {
        detector: F0Detector::Yin,
        segmenter: SegmenterChoice::RuleBased,
        model_dir: PathBuf::from("/nonexistent/models"),
        ..Default::default()
    }
}

/// Analyze samples into a fresh project
fn analyze(samples: Vec<f32>) -> Project {
    let cancel = AtomicBool::new(false);
    let output = run_pipeline(
        &test_analysis_config(),
        &samples,
        SAMPLE_RATE,
        &cancel,
        &|_| {},
    )
    .unwrap();

    let mut project = Project::new();
    output.install(&mut project).unwrap();
    project.waveform.replace(samples);
    project
}

/// A take with distinct voiced phrases separated by real silence
fn phrased_take() -> Vec<f32> {
    let mut samples = sine(440.0, 1.0);
    samples.extend(vec![0.0f32; (0.3 * SAMPLE_RATE as f32) as usize]);
    samples.extend(sine(550.0, 1.0));
    samples.extend(vec![0.0f32; (0.3 * SAMPLE_RATE as f32) as usize]);
    samples.extend(sine(660.0, 1.0));
    samples
}

// ============================================================================
// Round-trip analysis
// ============================================================================

/// A 2 s 440 Hz tone analyzes to one A4 note spanning the take
#[test]
fn test_round_trip_analysis_of_tone() {
    let samples = sine(440.0, 2.0);
    let project = analyze(samples);

    project.check_alignment().unwrap();
    let t = project.num_frames();
    assert!(t > 0);

    // Voicing covers at least 95% of frames
    let voiced_count = project.voiced.iter().filter(|&&v| v).count();
    assert!(
        voiced_count * 100 >= t * 95,
        "voiced {}/{} frames",
        voiced_count,
        t
    );

    // Every voiced frame is within 2 Hz of the tone
    for i in 0..t {
        if project.voiced[i] {
            assert!(
                (project.f0[i] - 440.0).abs() < 2.0,
                "frame {}: {} Hz",
                i,
                project.f0[i]
            );
        }
    }

    // Exactly one non-rest note at A4 spanning essentially the whole take
    let pitched: Vec<_> = project.notes.iter().filter(|n| !n.rest).collect();
    assert_eq!(pitched.len(), 1);
    assert_eq!(pitched[0].midi_note.round(), 69.0);
    assert!(pitched[0].start_frame <= 2);
    assert!(pitched[0].end_frame >= t - 4);
}

// ============================================================================
// Note drags
// ============================================================================

/// Dragging the single note up an octave doubles the composed pitch
#[test]
fn test_pitch_up_drag() {
    let mut project = analyze(sine(440.0, 2.0));

    project.drag_notes_by(&[0], 12.0);

    let note = &project.notes[0];
    assert!((note.midi_note - 81.0).abs() < 0.2, "midi {}", note.midi_note);
    assert_eq!(note.pitch_offset, 0.0);

    let composed = project.compose_f0(false, 0.0);
    for i in note.start_frame + 5..note.end_frame - 5 {
        if project.voiced[i] {
            assert!(
                (composed[i] - 880.0).abs() < 6.0,
                "frame {}: {} Hz",
                i,
                composed[i]
            );
        }
    }

    // Delta holds only the detector's tiny deviation from the note mean
    for &d in &project.pitch.delta {
        assert!(d.abs() < 0.2, "delta {}", d);
    }
}

/// Drag up then down restores note, curves, and f0 bit-identically
#[test]
fn test_drag_idempotence() {
    let mut project = analyze(sine(440.0, 1.0));

    let midi_before = project.notes[0].midi_note;
    let base_before = project.pitch.base.clone();
    let delta_before = project.pitch.delta.clone();
    let f0_before = project.f0.clone();

    project.drag_notes_by(&[0], 7.0);
    project.drag_notes_by(&[0], -7.0);

    assert_eq!(project.notes[0].midi_note, midi_before);
    assert_eq!(project.pitch.base, base_before);
    assert_eq!(project.pitch.delta, delta_before);
    assert_eq!(project.f0, f0_before);
}

/// Multi-note drag moves every selected note and keeps local expression
#[test]
fn test_multi_note_drag() {
    let mut project = analyze(phrased_take());
    let pitched: Vec<usize> = (0..project.notes.len())
        .filter(|&i| !project.notes[i].rest)
        .collect();
    assert_eq!(pitched.len(), 3);

    let before: Vec<f32> = pitched.iter().map(|&i| project.notes[i].midi_note).collect();
    let delta_before = project.pitch.delta.clone();

    project.drag_notes_by(&pitched, -2.0);

    for (k, &i) in pitched.iter().enumerate() {
        assert!(
            (project.notes[i].midi_note - (before[k] - 2.0)).abs() < 1e-4,
            "note {}",
            i
        );
    }
    // Local deviation from base is untouched by the drag
    assert_eq!(project.pitch.delta, delta_before);
}

// ============================================================================
// Free-hand drawing
// ============================================================================

/// Drawing a ramp overrides f0, forces voicing, and marks the range dirty
#[test]
fn test_freehand_draw_ramp() {
    let mut project = analyze(sine(440.0, 2.0));

    let target: Vec<f32> = (0..100)
        .map(|i| 440.0 + (660.0 - 440.0) * i as f32 / 99.0)
        .collect();
    project.draw_pitch(100, &target);

    for i in 100..200 {
        assert!(project.voiced[i], "frame {} must be voiced", i);
        assert!(
            (project.f0[i] - target[i - 100]).abs() < 1.0,
            "frame {}: {} vs {}",
            i,
            project.f0[i],
            target[i - 100]
        );
    }

    let (ds, de) = project.f0_dirty_range().unwrap();
    assert!(ds <= 100 && de >= 200, "dirty range ({}, {})", ds, de);
}

// ============================================================================
// Incremental synthesis
// ============================================================================

fn synthesizer() -> IncrementalSynthesizer {
    let vocoder = Arc::new(Vocoder::fallback(VocoderConfig::default()));
    IncrementalSynthesizer::new(vocoder)
}

/// Synthesis replaces samples only inside the silence-expanded window
#[test]
fn test_silence_boundary_containment() {
    let mut project = analyze(phrased_take());
    let synth = synthesizer();

    let before = project.waveform.snapshot();

    // Edit confined to the middle phrase
    let middle = project
        .notes
        .iter()
        .position(|n| !n.rest && n.midi_note.round() as i32 != 69 && n.midi_note < 75.0)
        .expect("middle phrase note");
    project.drag_notes_by(&[middle], 1.0);

    let job = synth.trigger(&project).unwrap().expect("job dispatched");
    let outcome = synth.wait_for(&mut project, job).unwrap();
    assert_eq!(outcome, SpliceOutcome::Applied);
    assert!(project.dirty_range().is_none());

    let after = project.waveform.snapshot();
    assert_eq!(before.len(), after.len());

    // The first phrase ends before 1.0 s and the last starts after 2.3 s;
    // samples there must be bit-identical.
    let first_phrase_end = (0.9 * SAMPLE_RATE as f32) as usize;
    for i in 0..first_phrase_end {
        assert!(before[i] == after[i], "sample {} changed", i);
    }
    let last_phrase_start = (2.45 * SAMPLE_RATE as f32) as usize;
    for i in last_phrase_start..before.len() {
        assert!(before[i] == after[i], "sample {} changed", i);
    }

    // And the middle phrase did change
    let mid = (1.8 * SAMPLE_RATE as f32) as usize;
    let changed = (mid..mid + 4096).any(|i| before[i] != after[i]);
    assert!(changed, "edited region must be rewritten");
}

/// Nothing dirty, nothing dispatched
#[test]
fn test_trigger_without_dirty_is_noop() {
    let project = analyze(sine(440.0, 0.5));
    let synth = synthesizer();
    assert_eq!(synth.trigger(&project).unwrap(), None);
}

/// A superseded job never lands; the newest one does
#[test]
fn test_stale_job_discarded() {
    let mut project = analyze(sine(440.0, 2.0));
    let synth = synthesizer();

    // First edit and dispatch
    project.drag_notes_by(&[0], 2.0);
    let first_job = synth.trigger(&project).unwrap().expect("first job");

    // Second edit before the first completion is drained
    project.drag_notes_by(&[0], 1.0);
    let second_job = synth.trigger(&project).unwrap().expect("second job");
    assert!(second_job > first_job);

    // The first completion is stale; the second applies
    let first_outcome = synth.wait_for(&mut project, first_job).unwrap();
    assert_eq!(first_outcome, SpliceOutcome::Stale);

    let second_outcome = synth.wait_for(&mut project, second_job).unwrap();
    assert_eq!(second_outcome, SpliceOutcome::Applied);
    assert!(project.dirty_range().is_none());
}

/// The stale completion is a no-op on the waveform
#[test]
fn test_stale_completion_leaves_waveform() {
    let mut project = analyze(sine(440.0, 1.0));
    let synth = synthesizer();

    project.drag_notes_by(&[0], 2.0);
    let first_job = synth.trigger(&project).unwrap().expect("first job");

    project.drag_notes_by(&[0], 1.0);
    let _second_job = synth.trigger(&project).unwrap().expect("second job");

    let before_first = project.waveform.snapshot();
    let outcome = synth.wait_for(&mut project, first_job).unwrap();
    assert_eq!(outcome, SpliceOutcome::Stale);
    let after_first = project.waveform.snapshot();
    assert_eq!(before_first, after_first);
    // Dirty state survives until the live job lands
    assert!(project.dirty_range().is_some());
}

/// Full-range synthesis writes frames*hop samples into the waveform
#[test]
fn test_synthesis_output_alignment() {
    let mut project = analyze(sine(440.0, 1.0));
    let synth = synthesizer();

    let t = project.num_frames();
    project.drag_notes_by(&[0], 2.0);

    let job = synth.trigger(&project).unwrap().expect("job");
    let outcome = synth.wait_for(&mut project, job).unwrap();
    assert_eq!(outcome, SpliceOutcome::Applied);

    // The tone is voiced throughout, so the expanded region clamps to the
    // full take and the rewritten region covers every full frame.
    let expected_samples = (t * HOP_SIZE).min(project.waveform.len());
    let after = project.waveform.snapshot();
    let nonzero_tail = after[..expected_samples]
        .iter()
        .rev()
        .take(HOP_SIZE)
        .any(|&s| s != 0.0);
    assert!(nonzero_tail, "synthesized audio missing at region tail");
}

// ============================================================================
// Composition identity
// ============================================================================

/// After analysis, compose reproduces the detected trajectory on voiced
/// frames to within 1e-4 relative error, and is finite elsewhere
#[test]
fn test_composition_identity() {
    let samples = phrased_take();
    let cancel = AtomicBool::new(false);
    let output = run_pipeline(
        &test_analysis_config(),
        &samples,
        SAMPLE_RATE,
        &cancel,
        &|_| {},
    )
    .unwrap();

    let src_f0 = output.f0.clone();
    let src_voiced = output.voiced.clone();

    let mut project = Project::new();
    output.install(&mut project).unwrap();

    let composed = project.compose_f0(false, 0.0);
    for i in 0..src_f0.len() {
        if src_voiced[i] && src_f0[i] > 0.0 {
            let rel = (composed[i] - src_f0[i]).abs() / src_f0[i];
            assert!(
                rel < 1e-4,
                "frame {}: composed {} vs source {}",
                i,
                composed[i],
                src_f0[i]
            );
        } else {
            assert!(composed[i].is_finite());
        }
    }
}
