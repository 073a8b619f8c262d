//! MIDI export
//!
//! Writes the note list as a single-track Standard MIDI File. Each
//! non-rest note becomes a NoteOn/NoteOff pair at its rounded semitone;
//! frame times convert to ticks through the tempo and PPQ.

use crate::notes::Note;
use crate::{frames_to_seconds, Result};
use midly::{
    num::{u15, u24, u28, u4, u7},
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
};
use std::path::Path;

/// Export options
#[derive(Debug, Clone)]
pub struct MidiExportOptions {
    pub tempo_bpm: f64,
    pub ppq: u16,
    pub channel: u8,
    pub velocity: u8,
}

impl Default for MidiExportOptions {
    fn default() -> Self {
        Self {
            tempo_bpm: 120.0,
            ppq: 480,
            channel: 0,
            velocity: 100,
        }
    }
}

/// Convert seconds to MIDI ticks
fn seconds_to_ticks(seconds: f64, tempo_bpm: f64, ppq: u16) -> u32 {
    (seconds * (tempo_bpm / 60.0) * ppq as f64).round() as u32
}

/// MIDI note number for a note, drag offset included
fn midi_key(note: &Note) -> u8 {
    (note.midi_note + note.pitch_offset).round().clamp(0.0, 127.0) as u8
}

/// Export notes to a Standard MIDI File
pub fn export_midi<P: AsRef<Path>>(
    notes: &[Note],
    options: &MidiExportOptions,
    path: P,
) -> Result<()> {
    // (absolute tick, is_on, key) sorted; offs before ons at equal ticks
    let mut events: Vec<(u32, bool, u8)> = Vec::new();

    for note in notes.iter().filter(|n| !n.rest) {
        let on = seconds_to_ticks(
            frames_to_seconds(note.start_frame),
            options.tempo_bpm,
            options.ppq,
        );
        let off = seconds_to_ticks(
            frames_to_seconds(note.end_frame),
            options.tempo_bpm,
            options.ppq,
        );
        if off <= on {
            continue;
        }
        let key = midi_key(note);
        events.push((on, true, key));
        events.push((off, false, key));
    }

    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut track: Vec<TrackEvent> = Vec::with_capacity(events.len() + 2);

    let tempo_us = (60_000_000.0 / options.tempo_bpm).round() as u32;
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_us))),
    });

    let channel = u4::new(options.channel.min(15));
    let velocity = u7::new(options.velocity.min(127));

    let mut last_tick = 0u32;
    for (tick, is_on, key) in events {
        let delta = tick - last_tick;
        last_tick = tick;

        let message = if is_on {
            MidiMessage::NoteOn {
                key: u7::new(key),
                vel: velocity,
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            }
        };

        track.push(TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi { channel, message },
        });
    }

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let smf = Smf {
        header: Header {
            format: Format::SingleTrack,
            timing: Timing::Metrical(u15::new(options.ppq)),
        },
        tracks: vec![track],
    };

    smf.save(path)?;
    Ok(())
}
