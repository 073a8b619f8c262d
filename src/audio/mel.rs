//! Mel-spectrogram computation
//!
//! Implements the reflection-padded STFT and mel filterbank that condition
//! the vocoder. Frame count is always `ceil(len / hop)` so the feature
//! stream lines up one-to-one with the F0 trajectory.

use crate::Result;
use ndarray::Array2;
use num_complex::Complex;
use rayon::prelude::*;
use realfft::RealFftPlanner;
use std::f32::consts::PI;

use super::AudioConfig;

/// Log floor applied after the filterbank
const LOG_EPS: f32 = 1e-5;

/// Mel filterbank for converting linear spectra to mel scale
#[derive(Debug, Clone)]
pub struct MelFilterbank {
    /// Filterbank matrix (n_mels x n_fft/2+1)
    pub filters: Array2<f32>,
    /// Sample rate
    pub sample_rate: u32,
    /// Number of mel bands
    pub n_mels: usize,
    /// FFT size
    pub n_fft: usize,
}

impl MelFilterbank {
    /// Create mel filterbank
    pub fn new(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: f32) -> Self {
        let filters = create_mel_filterbank(sample_rate, n_fft, n_mels, fmin, fmax);
        Self {
            filters,
            sample_rate,
            n_mels,
            n_fft,
        }
    }

    /// Apply filterbank to a magnitude spectrogram
    pub fn apply(&self, spectrogram: &Array2<f32>) -> Array2<f32> {
        // spectrogram: (n_fft/2+1, time_frames)
        // filters: (n_mels, n_fft/2+1)
        // output: (n_mels, time_frames)
        self.filters.dot(spectrogram)
    }
}

/// Convert frequency to mel scale
pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Convert mel to frequency
pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Create mel filterbank matrix
fn create_mel_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Array2<f32> {
    let n_freqs = n_fft / 2 + 1;

    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);

    let mel_points: Vec<f32> = (0..=n_mels + 1)
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32)
        .collect();

    let hz_points: Vec<f32> = mel_points.iter().map(|&m| mel_to_hz(m)).collect();

    let bin_points: Vec<usize> = hz_points
        .iter()
        .map(|&hz| ((n_fft as f32 + 1.0) * hz / sample_rate as f32).floor() as usize)
        .collect();

    let mut filters = Array2::zeros((n_mels, n_freqs));

    for m in 0..n_mels {
        let f_left = bin_points[m];
        let f_center = bin_points[m + 1];
        let f_right = bin_points[m + 2];

        for k in f_left..f_center {
            if k < n_freqs {
                filters[[m, k]] = (k - f_left) as f32 / (f_center - f_left).max(1) as f32;
            }
        }

        for k in f_center..f_right {
            if k < n_freqs {
                filters[[m, k]] = (f_right - k) as f32 / (f_right - f_center).max(1) as f32;
            }
        }
    }

    filters
}

/// Compute Hann window
fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f32 / size as f32).cos()))
        .collect()
}

/// Reflect-pad a signal by `pad` samples on each side.
///
/// Short inputs reflect repeatedly rather than running off the edge.
fn reflect_pad(signal: &[f32], pad: usize) -> Vec<f32> {
    let n = signal.len();
    let mut padded = Vec::with_capacity(n + 2 * pad);
    for i in 0..pad {
        padded.push(signal[reflect_index(pad - i, n)]);
    }
    padded.extend_from_slice(signal);
    for i in 0..pad {
        padded.push(signal[reflect_index(n + i, n)]);
    }
    padded
}

/// Map an out-of-range index back into [0, n) by reflection about the edges
fn reflect_index(idx: usize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let mut i = idx % period;
    if i >= n {
        i = period - i;
    }
    i
}

/// Compute the magnitude Short-Time Fourier Transform
///
/// Frames are centered on multiples of `hop_length` over a
/// reflection-padded copy of the signal, producing exactly
/// `ceil(len / hop_length)` frames.
///
/// # Returns
/// Magnitude matrix (n_fft/2+1, time_frames)
pub fn stft_magnitude(signal: &[f32], config: &AudioConfig) -> Result<Array2<f32>> {
    let n_fft = config.n_fft;
    let hop = config.hop_length;
    let win_length = config.win_length.min(n_fft);
    let n_freqs = n_fft / 2 + 1;

    let num_frames = signal.len().div_ceil(hop);
    if num_frames == 0 {
        return Ok(Array2::zeros((n_freqs, 0)));
    }

    let window = hann_window(win_length);
    let padded = reflect_pad(signal, n_fft / 2);

    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);

    // Each frame is independent; fan the FFTs out.
    let columns: Vec<Vec<f32>> = (0..num_frames)
        .into_par_iter()
        .map(|frame_idx| {
            let start = frame_idx * hop;
            let mut input = vec![0.0f32; n_fft];
            let mut output = vec![Complex::new(0.0f32, 0.0f32); n_freqs];

            let offset = (n_fft - win_length) / 2;
            for i in 0..win_length {
                let p = start + offset + i;
                if p < padded.len() {
                    input[offset + i] = padded[p] * window[i];
                }
            }

            // realfft only fails on mismatched buffer lengths, which are
            // fixed here
            let _ = fft.process(&mut input, &mut output);

            output.iter().map(|c| c.norm()).collect()
        })
        .collect();

    let mut magnitude = Array2::zeros((n_freqs, num_frames));
    for (frame_idx, column) in columns.iter().enumerate() {
        for (freq_idx, &v) in column.iter().enumerate() {
            magnitude[[freq_idx, frame_idx]] = v;
        }
    }

    Ok(magnitude)
}

/// Compute a log-mel spectrogram from an audio signal
///
/// # Arguments
/// * `signal` - Audio samples at the configured rate
/// * `config` - Analysis configuration
///
/// # Returns
/// Log-mel spectrogram (n_mels, ceil(len/hop)); empty input yields an
/// empty (n_mels, 0) matrix.
pub fn mel_spectrogram(signal: &[f32], config: &AudioConfig) -> Result<Array2<f32>> {
    if signal.is_empty() {
        return Ok(Array2::zeros((config.n_mels, 0)));
    }

    let magnitude = stft_magnitude(signal, config)?;

    let mel_fb = MelFilterbank::new(
        config.sample_rate,
        config.n_fft,
        config.n_mels,
        config.fmin,
        config.fmax,
    );

    let mel_spec = mel_fb.apply(&magnitude);

    Ok(mel_spec.mapv(|x| x.max(LOG_EPS).ln()))
}
