//! F0 extraction
//!
//! Three interchangeable detectors produce a per-frame fundamental
//! frequency and voicing mask aligned to the vocoder frame rate. The
//! neural detectors run at their own native rates and are resampled onto
//! the vocoder grid with voiced-pair interpolation so phantom pitches
//! never bridge syllable boundaries.

mod fcpe;
mod rmvpe;
mod yin;

pub use fcpe::extract_fcpe;
pub use rmvpe::{extract_rmvpe, RmvpeDecoder};
pub use yin::{extract_yin, YinConfig};

use crate::model::ModelCache;
use crate::Result;
use crate::{HOP_SIZE, SAMPLE_RATE};
use serde::{Deserialize, Serialize};

/// Detector selection, stored in the app config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum F0Detector {
    /// Autocorrelation fallback; always available
    Yin,
    /// Neural detector, 100 fps native at 16 kHz
    Fcpe,
    /// Neural detector decoding a 360-bin cent posteriorgram
    Rmvpe,
}

impl Default for F0Detector {
    fn default() -> Self {
        F0Detector::Rmvpe
    }
}

impl std::fmt::Display for F0Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            F0Detector::Yin => write!(f, "yin"),
            F0Detector::Fcpe => write!(f, "fcpe"),
            F0Detector::Rmvpe => write!(f, "rmvpe"),
        }
    }
}

/// Paired F0 trajectory and voicing mask
#[derive(Debug, Clone, PartialEq)]
pub struct F0Estimate {
    /// Hz per frame; 0 means unvoiced
    pub f0: Vec<f32>,
    /// Voicing mask; `voiced[i]` implies `f0[i] > 0`
    pub voiced: Vec<bool>,
}

impl F0Estimate {
    /// Build an estimate from an F0 series, deriving the mask
    pub fn from_f0(f0: Vec<f32>) -> Self {
        let voiced = f0.iter().map(|&hz| hz > 0.0).collect();
        Self { f0, voiced }
    }

    /// All-unvoiced estimate of a given length
    pub fn unvoiced(len: usize) -> Self {
        Self {
            f0: vec![0.0; len],
            voiced: vec![false; len],
        }
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.f0.len()
    }

    /// True when the estimate covers no frames
    pub fn is_empty(&self) -> bool {
        self.f0.is_empty()
    }

    /// Enforce the mask invariant: voiced frames must carry pitch
    pub fn sanitize(&mut self) {
        for i in 0..self.f0.len() {
            if self.f0[i] <= 0.0 {
                self.f0[i] = 0.0;
                self.voiced[i] = false;
            }
        }
    }
}

/// Extract F0 with the selected detector, aligned to `target_frames`
/// vocoder frames.
///
/// Neural detectors return `ModelMissing` when their model cannot be
/// loaded; the analysis coordinator treats that as a signal to fall back
/// to YIN, not as silence.
pub fn extract_f0(
    detector: F0Detector,
    samples: &[f32],
    sample_rate: u32,
    target_frames: usize,
    cache: &ModelCache,
) -> Result<F0Estimate> {
    let mut estimate = match detector {
        F0Detector::Yin => extract_yin(samples, sample_rate, target_frames, &YinConfig::default()),
        F0Detector::Fcpe => extract_fcpe(samples, sample_rate, target_frames, cache)?,
        F0Detector::Rmvpe => extract_rmvpe(samples, sample_rate, target_frames, cache)?,
    };

    estimate.sanitize();
    debug_assert_eq!(estimate.len(), target_frames);
    Ok(estimate)
}

/// Resample a native-rate F0 series onto the vocoder frame grid.
///
/// Interpolation only happens between two voiced neighbors; a voiced/
/// unvoiced pair yields the voiced endpoint and an unvoiced pair yields
/// 0, so no pitch is invented across silence.
pub fn resample_to_frames(native_f0: &[f32], native_fps: f64, target_frames: usize) -> Vec<f32> {
    let frame_seconds = HOP_SIZE as f64 / SAMPLE_RATE as f64;
    let mut out = Vec::with_capacity(target_frames);

    for frame in 0..target_frames {
        let t = frame as f64 * frame_seconds;
        let pos = t * native_fps;
        let i0 = pos.floor() as usize;
        let frac = (pos - i0 as f64) as f32;

        let a = native_f0.get(i0).copied().unwrap_or(0.0);
        let b = native_f0.get(i0 + 1).copied().unwrap_or(0.0);

        let value = match (a > 0.0, b > 0.0) {
            (true, true) => a + (b - a) * frac,
            (true, false) => a,
            (false, true) => b,
            (false, false) => 0.0,
        };
        out.push(value);
    }

    out
}
