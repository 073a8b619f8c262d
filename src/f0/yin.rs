//! YIN pitch detection
//!
//! CPU fallback detector: cumulative mean normalized difference over a
//! sliding window, absolute threshold with parabolic refinement. Always
//! available, no model file required.

use crate::{HOP_SIZE, SAMPLE_RATE};

use super::F0Estimate;

/// YIN detector parameters
#[derive(Debug, Clone)]
pub struct YinConfig {
    /// Analysis window in samples at the internal rate
    pub window_size: usize,
    /// Aperiodicity below this counts as voiced
    pub threshold: f32,
    /// Lowest detectable pitch
    pub fmin: f32,
    /// Highest detectable pitch
    pub fmax: f32,
}

impl Default for YinConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            threshold: 0.15,
            fmin: 50.0,
            fmax: 1100.0,
        }
    }
}

/// Extract F0 with YIN over the vocoder frame grid.
///
/// Input at any rate is resampled to the internal rate first. Output has
/// exactly `target_frames` frames.
pub fn extract_yin(
    samples: &[f32],
    sample_rate: u32,
    target_frames: usize,
    config: &YinConfig,
) -> F0Estimate {
    let internal;
    let samples = if sample_rate == SAMPLE_RATE {
        samples
    } else {
        internal = crate::audio::linear_resample(samples, sample_rate, SAMPLE_RATE);
        &internal
    };

    let sr = SAMPLE_RATE as f32;
    let tau_min = (sr / config.fmax).floor().max(2.0) as usize;
    let tau_max = ((sr / config.fmin).ceil() as usize).min(config.window_size / 2);

    let mut f0 = Vec::with_capacity(target_frames);
    let mut voiced = Vec::with_capacity(target_frames);

    let half_window = config.window_size / 2;

    for frame in 0..target_frames {
        let center = frame * HOP_SIZE + HOP_SIZE / 2;
        let start = center.saturating_sub(half_window);
        let end = (start + config.window_size).min(samples.len());

        if end <= start || end - start < tau_max * 2 {
            f0.push(0.0);
            voiced.push(false);
            continue;
        }

        let window = &samples[start..end];
        match yin_frame(window, tau_min, tau_max, config.threshold) {
            Some(period) => {
                f0.push(sr / period);
                voiced.push(true);
            }
            None => {
                f0.push(0.0);
                voiced.push(false);
            }
        }
    }

    F0Estimate { f0, voiced }
}

/// Run YIN over one window; returns the period in samples if voiced
fn yin_frame(window: &[f32], tau_min: usize, tau_max: usize, threshold: f32) -> Option<f32> {
    let half = window.len() / 2;
    let tau_max = tau_max.min(half);
    if tau_max <= tau_min {
        return None;
    }

    // Difference function d(tau)
    let mut diff = vec![0.0f32; tau_max];
    for tau in 1..tau_max {
        let mut sum = 0.0f32;
        for j in 0..half {
            let d = window[j] - window[j + tau];
            sum += d * d;
        }
        diff[tau] = sum;
    }

    // Cumulative mean normalized difference d'(tau)
    let mut cmndf = vec![1.0f32; tau_max];
    let mut running = 0.0f32;
    for tau in 1..tau_max {
        running += diff[tau];
        cmndf[tau] = if running > 0.0 {
            diff[tau] * tau as f32 / running
        } else {
            1.0
        };
    }

    // First dip under threshold, extended to its local minimum
    let mut tau = tau_min;
    while tau < tau_max {
        if cmndf[tau] < threshold {
            while tau + 1 < tau_max && cmndf[tau + 1] < cmndf[tau] {
                tau += 1;
            }
            return Some(refine_parabolic(&cmndf, tau));
        }
        tau += 1;
    }

    None
}

/// Parabolic interpolation around a CMNDF minimum for sub-sample period
fn refine_parabolic(cmndf: &[f32], tau: usize) -> f32 {
    if tau == 0 || tau + 1 >= cmndf.len() {
        return tau as f32;
    }

    let a = cmndf[tau - 1];
    let b = cmndf[tau];
    let c = cmndf[tau + 1];
    let denom = a - 2.0 * b + c;
    if denom.abs() < 1e-12 {
        return tau as f32;
    }

    let offset = 0.5 * (a - c) / denom;
    tau as f32 + offset.clamp(-1.0, 1.0)
}
