//! Sample-rate conversion
//!
//! The I/O boundary uses rubato; detector front-ends use plain linear
//! interpolation, which is what their models were exported against.

use crate::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use super::AudioClip;

/// Resample a clip to a target sample rate
pub fn resample(clip: &AudioClip, target_sr: u32) -> Result<AudioClip> {
    if clip.sample_rate == target_sr {
        return Ok(clip.clone());
    }
    if clip.samples.is_empty() {
        return Ok(AudioClip::new(vec![], target_sr));
    }

    let resample_ratio = target_sr as f64 / clip.sample_rate as f64;

    let mut resampler = FastFixedIn::<f32>::new(
        resample_ratio,
        1.0,
        PolynomialDegree::Cubic,
        1024,
        1,
    )
    .map_err(|e| Error::Audio(format!("Failed to create resampler: {}", e)))?;

    let input_frames_needed = resampler.input_frames_next();
    let mut input_buffer = vec![vec![0.0f32; input_frames_needed]];
    let mut output_samples = Vec::new();

    let mut pos = 0;
    while pos < clip.samples.len() {
        let end = (pos + input_frames_needed).min(clip.samples.len());
        let chunk_size = end - pos;

        input_buffer[0][..chunk_size].copy_from_slice(&clip.samples[pos..end]);
        if chunk_size < input_frames_needed {
            input_buffer[0][chunk_size..].fill(0.0);
        }

        let output = resampler
            .process(&input_buffer, None)
            .map_err(|e| Error::Audio(format!("Resampling failed: {}", e)))?;

        output_samples.extend_from_slice(&output[0]);
        pos += chunk_size;

        if chunk_size < input_frames_needed {
            break;
        }
    }

    let expected_len = (clip.samples.len() as f64 * resample_ratio).ceil() as usize;
    output_samples.truncate(expected_len);

    Ok(AudioClip::new(output_samples, target_sr))
}

/// Linear-interpolation resample of a raw sample buffer.
///
/// Detector front-ends expect this exact interpolation; do not swap in a
/// windowed-sinc here.
pub fn linear_resample(samples: &[f32], source_sr: u32, target_sr: u32) -> Vec<f32> {
    if source_sr == target_sr || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = source_sr as f64 / target_sr as f64;
    let out_len = ((samples.len() as f64) / ratio).ceil() as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src = i as f64 * ratio;
        let idx = src.floor() as usize;
        let frac = (src - idx as f64) as f32;

        let a = samples.get(idx).copied().unwrap_or(0.0);
        let b = samples.get(idx + 1).copied().unwrap_or(a);
        output.push(a + (b - a) * frac);
    }

    output
}
