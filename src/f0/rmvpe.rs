//! RMVPE neural pitch detection
//!
//! The model consumes 16 kHz audio and emits a 360-bin cent posteriorgram
//! per frame. Decoding takes a confidence-weighted average of the cents
//! around the argmax; frames whose peak confidence falls under the
//! voicing threshold are unvoiced.

use crate::audio::linear_resample;
use crate::model::{ModelCache, RMVPE_BINS, RMVPE_HOP};
use crate::{Error, Result};
use ndarray::{Array, ArrayD, IxDyn};
use std::collections::HashMap;

use super::{resample_to_frames, F0Estimate};

/// Sample rate the model was exported against
const RMVPE_SR: u32 = 16000;

/// Voicing confidence threshold
const VOICING_THRESHOLD: f32 = 0.03;

/// Bins on each side of the argmax included in the weighted average
const DECODE_WINDOW: usize = 4;

/// Cent values for each posteriorgram bin.
///
/// Bin i sits at `20 * i + 1997.379` cents above 10 Hz, spanning roughly
/// 32 Hz to 1975 Hz in 20-cent steps.
#[derive(Debug, Clone)]
pub struct RmvpeDecoder {
    cents: Vec<f32>,
    threshold: f32,
}

impl Default for RmvpeDecoder {
    fn default() -> Self {
        Self::new(VOICING_THRESHOLD)
    }
}

impl RmvpeDecoder {
    /// Create a decoder with an explicit voicing threshold
    pub fn new(threshold: f32) -> Self {
        let cents = (0..RMVPE_BINS)
            .map(|i| 20.0 * i as f32 + 1997.379)
            .collect();
        Self { cents, threshold }
    }

    /// Decode one posteriorgram frame to Hz; 0 means unvoiced
    pub fn decode_frame(&self, posterior: &[f32]) -> f32 {
        debug_assert_eq!(posterior.len(), RMVPE_BINS);

        let (argmax, &peak) = match posterior
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        {
            Some(m) => m,
            None => return 0.0,
        };

        if peak < self.threshold {
            return 0.0;
        }

        let lo = argmax.saturating_sub(DECODE_WINDOW);
        let hi = (argmax + DECODE_WINDOW + 1).min(RMVPE_BINS);

        let mut weighted = 0.0f32;
        let mut total = 0.0f32;
        for i in lo..hi {
            weighted += self.cents[i] * posterior[i];
            total += posterior[i];
        }

        if total <= 0.0 {
            return 0.0;
        }

        let cents = weighted / total;
        10.0 * (cents / 1200.0).exp2()
    }

    /// Decode a (frames, bins) posteriorgram to an F0 series
    pub fn decode(&self, hidden: &ArrayD<f32>) -> Result<Vec<f32>> {
        let shape = hidden.shape().to_vec();
        let (frames, bins) = match shape.len() {
            2 => (shape[0], shape[1]),
            3 => (shape[1], shape[2]),
            _ => {
                return Err(Error::ShapeMismatch {
                    expected: "(frames, 360) or (1, frames, 360)".into(),
                    actual: format!("{:?}", shape),
                })
            }
        };

        if bins != RMVPE_BINS {
            return Err(Error::ShapeMismatch {
                expected: format!("{} bins", RMVPE_BINS),
                actual: format!("{} bins", bins),
            });
        }

        let flat: Vec<f32> = hidden.iter().copied().collect();
        Ok((0..frames)
            .map(|f| self.decode_frame(&flat[f * bins..(f + 1) * bins]))
            .collect())
    }
}

/// Extract F0 with the rmvpe model.
///
/// Returns `ModelMissing` when the model file or runtime is unavailable.
pub fn extract_rmvpe(
    samples: &[f32],
    sample_rate: u32,
    target_frames: usize,
    cache: &ModelCache,
) -> Result<F0Estimate> {
    let session = cache.get_or_load("rmvpe")?;
    if !session.is_real() {
        return Err(Error::ModelMissing("rmvpe runtime not available".into()));
    }

    let wave16k = linear_resample(samples, sample_rate, RMVPE_SR);
    if wave16k.is_empty() {
        return Ok(F0Estimate::unvoiced(target_frames));
    }

    let input = Array::from_shape_vec(IxDyn(&[1, wave16k.len()]), wave16k)?;
    let mut inputs = HashMap::new();
    inputs.insert("waveform".to_string(), input);

    let outputs = session.run(inputs)?;
    let hidden = outputs
        .get("hidden")
        .ok_or_else(|| Error::ModelMissing("rmvpe output missing".into()))?;

    let decoder = RmvpeDecoder::default();
    let native_f0 = decoder.decode(hidden)?;

    let native_fps = RMVPE_SR as f64 / RMVPE_HOP as f64;
    let f0 = resample_to_frames(&native_f0, native_fps, target_frames);

    Ok(F0Estimate::from_f0(f0))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cents for a frequency over the 10 Hz reference
    fn hz_to_cents(hz: f32) -> f32 {
        1200.0 * (hz / 10.0).log2()
    }

    fn posterior_peaked_at(hz: f32, confidence: f32) -> Vec<f32> {
        let decoder = RmvpeDecoder::default();
        let cents = hz_to_cents(hz);
        let mut posterior = vec![0.0f32; RMVPE_BINS];
        // Gaussian bump around the matching bin
        for i in 0..RMVPE_BINS {
            let d = (decoder.cents[i] - cents) / 20.0;
            posterior[i] = confidence * (-0.5 * d * d).exp();
        }
        posterior
    }

    #[test]
    fn test_decode_peak_recovers_frequency() {
        let decoder = RmvpeDecoder::default();
        for hz in [110.0f32, 220.0, 440.0, 880.0] {
            let posterior = posterior_peaked_at(hz, 0.9);
            let decoded = decoder.decode_frame(&posterior);
            let cents_err = (hz_to_cents(decoded) - hz_to_cents(hz)).abs();
            assert!(cents_err < 10.0, "{} Hz decoded as {} Hz", hz, decoded);
        }
    }

    #[test]
    fn test_decode_below_threshold_unvoiced() {
        let decoder = RmvpeDecoder::default();
        let posterior = posterior_peaked_at(440.0, 0.02);
        assert_eq!(decoder.decode_frame(&posterior), 0.0);
    }

    #[test]
    fn test_decode_batch_shapes() {
        let decoder = RmvpeDecoder::default();
        let frames = 5usize;
        let mut data = Vec::new();
        for _ in 0..frames {
            data.extend(posterior_peaked_at(440.0, 0.8));
        }

        let hidden = Array::from_shape_vec(IxDyn(&[1, frames, RMVPE_BINS]), data).unwrap();
        let f0 = decoder.decode(&hidden).unwrap();
        assert_eq!(f0.len(), frames);
        assert!(f0.iter().all(|&hz| (hz - 440.0).abs() < 5.0));
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        let decoder = RmvpeDecoder::default();
        let hidden = Array::from_shape_vec(IxDyn(&[1, 5, 100]), vec![0.0; 500]).unwrap();
        assert!(decoder.decode(&hidden).is_err());
    }

    #[test]
    fn test_missing_model_reports() {
        let cache = ModelCache::new(std::env::temp_dir().join("retune_no_models"));
        let samples = vec![0.1f32; 16000];
        let result = extract_rmvpe(&samples, 16000, 100, &cache);
        assert!(matches!(result, Err(Error::ModelMissing(_))));
    }
}
