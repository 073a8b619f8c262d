//! Retune - Monophonic Vocal Pitch Editing Engine
//!
//! Retune ingests a recorded vocal track, extracts its fundamental
//! frequency trajectory and mel spectrogram, segments the trajectory into
//! discrete notes, and re-synthesizes audio through a neural vocoder after
//! the pitch has been edited.
//!
//! # Architecture
//! - Analysis: waveform -> mel + F0 + voicing + note segmentation
//! - Pitch model: base/delta decomposition with per-note vibrato
//! - Resynthesis: dirty-region tracking with silence-boundary expansion
//! - Playback: lock-free-leaning buffer serving a block pull callback
//!
//! # Example
//! ```no_run
//! use retune::analysis::AnalysisCoordinator;
//! use retune::audio::load_audio;
//! use retune::SAMPLE_RATE;
//!
//! let audio = load_audio("take.wav", Some(SAMPLE_RATE)).unwrap();
//! let coordinator = AnalysisCoordinator::with_defaults();
//! let events = coordinator.start(audio.samples, SAMPLE_RATE);
//! ```

// Allow traditional for loops - often clearer for audio DSP code
#![allow(clippy::needless_range_loop)]

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod f0;
pub mod midi;
pub mod model;
pub mod notes;
pub mod pitch;
pub mod playback;
pub mod project;
pub mod synth;
pub mod undo;
pub mod vocoder;

pub use error::{Error, Result};
pub use project::Project;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Internal sample rate. The vocoder was trained at this rate; all audio
/// is resampled to it at the I/O boundary.
pub const SAMPLE_RATE: u32 = 44100;

/// Samples per analysis frame. One frame of mel/F0 covers this many
/// samples of waveform.
pub const HOP_SIZE: usize = 512;

/// FFT size for the mel spectrogram
pub const N_FFT: usize = 2048;

/// Analysis window size
pub const WIN_SIZE: usize = 2048;

/// Number of mel filterbank bands
pub const N_MELS: usize = 128;

/// Mel filterbank lower edge in Hz
pub const FMIN: f32 = 40.0;

/// Mel filterbank upper edge in Hz
pub const FMAX: f32 = 16000.0;

/// Convert a frame index to seconds at the internal rate
pub fn frames_to_seconds(frame: usize) -> f64 {
    frame as f64 * HOP_SIZE as f64 / SAMPLE_RATE as f64
}

/// Convert seconds to the nearest frame index
pub fn seconds_to_frames(seconds: f64) -> usize {
    (seconds * SAMPLE_RATE as f64 / HOP_SIZE as f64).round().max(0.0) as usize
}

/// Number of frames covering `num_samples` samples
pub fn frames_for_samples(num_samples: usize) -> usize {
    num_samples.div_ceil(HOP_SIZE)
}
