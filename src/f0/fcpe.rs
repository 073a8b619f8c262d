//! FCPE neural pitch detection
//!
//! The model consumes 16 kHz audio and emits F0 at 100 frames per second
//! with 0 marking unvoiced frames. Output is mapped onto the vocoder
//! frame grid with voiced-pair interpolation.

use crate::audio::linear_resample;
use crate::model::{ModelCache, FCPE_FPS};
use crate::{Error, Result};
use ndarray::{Array, IxDyn};
use std::collections::HashMap;

use super::{resample_to_frames, F0Estimate};

/// Sample rate the model was exported against
const FCPE_SR: u32 = 16000;

/// Extract F0 with the fcpe model.
///
/// Returns `ModelMissing` when the model file or runtime is unavailable;
/// the caller decides whether to fall back.
pub fn extract_fcpe(
    samples: &[f32],
    sample_rate: u32,
    target_frames: usize,
    cache: &ModelCache,
) -> Result<F0Estimate> {
    let session = cache.get_or_load("fcpe")?;
    if !session.is_real() {
        return Err(Error::ModelMissing("fcpe runtime not available".into()));
    }

    let wave16k = linear_resample(samples, sample_rate, FCPE_SR);
    if wave16k.is_empty() {
        return Ok(F0Estimate::unvoiced(target_frames));
    }

    let input = Array::from_shape_vec(IxDyn(&[1, wave16k.len()]), wave16k)?;
    let mut inputs = HashMap::new();
    inputs.insert("waveform".to_string(), input);

    let outputs = session.run(inputs)?;
    let native = outputs
        .get("f0")
        .ok_or_else(|| Error::ModelMissing("fcpe output missing".into()))?;

    let native_f0: Vec<f32> = native.iter().copied().collect();
    let f0 = resample_to_frames(&native_f0, FCPE_FPS as f64, target_frames);

    Ok(F0Estimate::from_f0(f0))
}
