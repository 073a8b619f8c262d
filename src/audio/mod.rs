//! Audio processing module
//!
//! Provides mel-spectrogram computation, the decode/encode boundary, and
//! DSP helpers used by segmentation and splicing.

mod dsp;
mod io;
pub mod mel;
mod resample;

pub use dsp::{
    apply_fade, equal_power_crossfade, frame_rms, normalize_audio, normalize_audio_peak, rms,
    rms_match,
};
pub use io::{load_audio, save_audio, save_samples, AudioClip};
pub use mel::{mel_spectrogram, MelFilterbank};
pub use resample::{linear_resample, resample};

use crate::{FMAX, FMIN, HOP_SIZE, N_FFT, N_MELS, SAMPLE_RATE, WIN_SIZE};

/// Analysis front-end configuration.
///
/// The vocoder was trained on these exact parameters; the defaults are the
/// compile-time contracts and the struct exists for tests that exercise
/// smaller shapes.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate
    pub sample_rate: u32,
    /// FFT size
    pub n_fft: usize,
    /// Hop length for STFT
    pub hop_length: usize,
    /// Window length
    pub win_length: usize,
    /// Number of mel bands
    pub n_mels: usize,
    /// Minimum frequency
    pub fmin: f32,
    /// Maximum frequency
    pub fmax: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            n_fft: N_FFT,
            hop_length: HOP_SIZE,
            win_length: WIN_SIZE,
            n_mels: N_MELS,
            fmin: FMIN,
            fmax: FMAX,
        }
    }
}
