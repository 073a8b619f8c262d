//! Project file format
//!
//! `.htpx` files are JSON documents, format version 1. Pitch arrays are
//! serialized as space-separated decimal strings: base and delta at four
//! decimals, F0 at two, the voiced mask as a '0'/'1' string. The legacy
//! XML variant is not parsed; loading one reports a clear error.

use crate::notes::{Note, Vibrato};
use crate::pitch::PitchModel;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{LoopRegion, Project};

/// Current format version
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ProjectDocument {
    #[serde(rename = "formatVersion")]
    format_version: u32,
    name: String,
    #[serde(rename = "audioPath")]
    audio_path: String,
    #[serde(rename = "sampleRate")]
    sample_rate: u32,
    #[serde(rename = "globalPitchOffset")]
    global_pitch_offset: f32,
    #[serde(rename = "formantShift")]
    formant_shift: f32,
    /// dB
    volume: f32,
    #[serde(rename = "loop")]
    loop_region: LoopDocument,
    notes: Vec<NoteDocument>,
    #[serde(rename = "pitchData")]
    pitch_data: PitchDataDocument,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoopDocument {
    enabled: bool,
    /// seconds
    start: f64,
    /// seconds
    end: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct NoteDocument {
    #[serde(rename = "startFrame")]
    start_frame: usize,
    #[serde(rename = "endFrame")]
    end_frame: usize,
    #[serde(rename = "midiNote")]
    midi_note: f32,
    #[serde(rename = "pitchOffset")]
    pitch_offset: f32,
    rest: bool,
    vibrato: VibratoDocument,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    lyric: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    phoneme: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VibratoDocument {
    enabled: bool,
    #[serde(rename = "rateHz")]
    rate_hz: f32,
    #[serde(rename = "depthSemitones")]
    depth_semitones: f32,
    #[serde(rename = "phaseRadians")]
    phase_radians: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PitchDataDocument {
    /// Space-separated Hz values, two decimals
    f0: String,
    /// Space-separated semitones, four decimals
    #[serde(rename = "basePitch")]
    base_pitch: String,
    /// Space-separated semitones, four decimals
    #[serde(rename = "deltaPitch")]
    delta_pitch: String,
    /// One character per frame, '0' or '1'
    #[serde(rename = "voicedMask")]
    voiced_mask: String,
}

fn join_floats(values: &[f32], decimals: usize) -> String {
    values
        .iter()
        .map(|v| format!("{:.*}", decimals, v))
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_floats(text: &str) -> Result<Vec<f32>> {
    text.split_whitespace()
        .map(|tok| {
            tok.parse::<f32>()
                .map_err(|e| Error::InvalidFormat(format!("bad float '{}': {}", tok, e)))
        })
        .collect()
}

fn parse_mask(text: &str) -> Result<Vec<bool>> {
    text.chars()
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            other => Err(Error::InvalidFormat(format!(
                "bad voiced mask char '{}'",
                other
            ))),
        })
        .collect()
}

/// Save a project to a `.htpx` JSON document
pub fn save_project<P: AsRef<Path>>(project: &Project, path: P) -> Result<()> {
    let doc = ProjectDocument {
        format_version: FORMAT_VERSION,
        name: project.name.clone(),
        audio_path: project.audio_path.display().to_string(),
        sample_rate: project.source_sample_rate,
        global_pitch_offset: project.global_pitch_offset,
        formant_shift: project.formant_shift,
        volume: project.volume_db,
        loop_region: LoopDocument {
            enabled: project.loop_region.enabled,
            start: project.loop_region.start_seconds,
            end: project.loop_region.end_seconds,
        },
        notes: project
            .notes
            .iter()
            .map(|n| NoteDocument {
                start_frame: n.start_frame,
                end_frame: n.end_frame,
                midi_note: n.midi_note,
                pitch_offset: n.pitch_offset,
                rest: n.rest,
                vibrato: VibratoDocument {
                    enabled: n.vibrato.enabled,
                    rate_hz: n.vibrato.rate_hz,
                    depth_semitones: n.vibrato.depth_semitones,
                    phase_radians: n.vibrato.phase_radians,
                },
                lyric: n.lyric.clone(),
                phoneme: n.phoneme.clone(),
            })
            .collect(),
        pitch_data: PitchDataDocument {
            f0: join_floats(&project.f0, 2),
            base_pitch: join_floats(&project.pitch.base, 4),
            delta_pitch: join_floats(&project.pitch.delta, 4),
            voiced_mask: project
                .voiced
                .iter()
                .map(|&v| if v { '1' } else { '0' })
                .collect(),
        },
    };

    let json = serde_json::to_string_pretty(&doc)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Load a project from a `.htpx` JSON document.
///
/// The waveform and mel features are not part of the file; callers
/// re-run analysis features from `audio_path` to fill them in.
pub fn load_project<P: AsRef<Path>>(path: P) -> Result<Project> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound(path.display().to_string()));
    }

    let text = std::fs::read_to_string(path)?;
    let trimmed = text.trim_start();
    if trimmed.starts_with('<') {
        return Err(Error::Load(
            "XML project files are no longer supported; resave as JSON".into(),
        ));
    }

    let doc: ProjectDocument = serde_json::from_str(&text)?;
    if doc.format_version != FORMAT_VERSION {
        return Err(Error::InvalidFormat(format!(
            "unsupported project format version {}",
            doc.format_version
        )));
    }

    let f0 = parse_floats(&doc.pitch_data.f0)?;
    let base = parse_floats(&doc.pitch_data.base_pitch)?;
    let delta = parse_floats(&doc.pitch_data.delta_pitch)?;
    let voiced = parse_mask(&doc.pitch_data.voiced_mask)?;

    let t = f0.len();
    if base.len() != t || delta.len() != t || voiced.len() != t {
        return Err(Error::ShapeMismatch {
            expected: format!("{} frames in every pitch array", t),
            actual: format!(
                "base={} delta={} voiced={}",
                base.len(),
                delta.len(),
                voiced.len()
            ),
        });
    }

    let mut project = Project::new();
    project.name = doc.name;
    project.audio_path = doc.audio_path.into();
    project.source_sample_rate = doc.sample_rate;
    project.global_pitch_offset = doc.global_pitch_offset;
    project.formant_shift = doc.formant_shift;
    project.volume_db = doc.volume;
    project.loop_region = LoopRegion {
        enabled: doc.loop_region.enabled,
        start_seconds: doc.loop_region.start,
        end_seconds: doc.loop_region.end,
    };
    project.notes = doc
        .notes
        .into_iter()
        .map(|n| {
            let mut note = Note::new(n.start_frame, n.end_frame.max(n.start_frame + 1), n.midi_note);
            note.pitch_offset = n.pitch_offset;
            note.rest = n.rest;
            note.vibrato = Vibrato {
                enabled: n.vibrato.enabled,
                rate_hz: n.vibrato.rate_hz,
                depth_semitones: n.vibrato.depth_semitones,
                phase_radians: n.vibrato.phase_radians,
            };
            note.lyric = n.lyric;
            note.phoneme = n.phoneme;
            note
        })
        .collect();

    project.f0 = f0;
    project.voiced = voiced;
    project.pitch = PitchModel { base, delta };
    project.base_f0 = project.pitch.base_f0();
    project.mel = ndarray::Array2::zeros((crate::N_MELS, 0));

    Ok(project)
}
