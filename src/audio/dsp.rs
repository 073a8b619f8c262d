//! DSP helpers shared by segmentation, splicing, and playback

use std::f32::consts::PI;

/// RMS of a sample slice
pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    let sum: f32 = signal.iter().map(|x| x * x).sum();
    (sum / signal.len() as f32).sqrt()
}

/// Per-frame RMS over a fixed hop grid.
///
/// Frame `i` covers samples `[i*hop, (i+1)*hop)`; the trailing partial
/// frame is measured over what remains.
pub fn frame_rms(signal: &[f32], hop: usize) -> Vec<f32> {
    if signal.is_empty() || hop == 0 {
        return vec![];
    }
    let num_frames = signal.len().div_ceil(hop);
    (0..num_frames)
        .map(|i| {
            let start = i * hop;
            let end = ((i + 1) * hop).min(signal.len());
            rms(&signal[start..end])
        })
        .collect()
}

/// Normalize audio to [-1, 1] range
pub fn normalize_audio(signal: &[f32]) -> Vec<f32> {
    if signal.is_empty() {
        return vec![];
    }

    let max_abs = signal.iter().map(|x| x.abs()).fold(0.0f32, f32::max);
    if max_abs < 1e-8 {
        return signal.to_vec();
    }

    signal.iter().map(|x| x / max_abs).collect()
}

/// Normalize audio to a specific peak value
pub fn normalize_audio_peak(signal: &[f32], peak: f32) -> Vec<f32> {
    if signal.is_empty() {
        return vec![];
    }

    let max_abs = signal.iter().map(|x| x.abs()).fold(0.0f32, f32::max);
    if max_abs < 1e-8 {
        return signal.to_vec();
    }

    let scale = peak / max_abs;
    signal.iter().map(|x| x * scale).collect()
}

/// Apply linear fade-in and fade-out
pub fn apply_fade(signal: &[f32], fade_in: usize, fade_out: usize) -> Vec<f32> {
    let mut output = signal.to_vec();
    let len = output.len();

    for i in 0..fade_in.min(len) {
        output[i] *= i as f32 / fade_in as f32;
    }

    for i in 0..fade_out.min(len) {
        output[len - 1 - i] *= i as f32 / fade_out as f32;
    }

    output
}

/// Scale `replacement` so its RMS matches `original`.
///
/// Near-silent originals are left alone; matching against silence would
/// null the replacement.
pub fn rms_match(replacement: &mut [f32], original: &[f32]) {
    let target = rms(original);
    let current = rms(replacement);
    if target < 1e-6 || current < 1e-6 {
        return;
    }
    let scale = target / current;
    for v in replacement.iter_mut() {
        *v *= scale;
    }
}

/// Equal-power crossfade of `incoming` over `existing`, in place on
/// `existing`, across `fade_len` samples starting at each slice's head.
///
/// The pair is sin^2/cos^2 so summed power stays flat across the seam.
pub fn equal_power_crossfade(existing: &mut [f32], incoming: &[f32], fade_len: usize) {
    let n = fade_len.min(existing.len()).min(incoming.len());
    for i in 0..n {
        let t = (i as f32 + 0.5) / n as f32;
        let gain_in = (0.5 * PI * t).sin();
        let gain_out = (0.5 * PI * t).cos();
        existing[i] = existing[i] * gain_out * gain_out + incoming[i] * gain_in * gain_in;
    }
    let m = existing.len().min(incoming.len());
    existing[n..m].copy_from_slice(&incoming[n..m]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rms_constant() {
        let signal = vec![0.5f32; 100];
        assert_abs_diff_eq!(rms(&signal), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_frame_rms_grid() {
        let mut signal = vec![0.0f32; 1024];
        for v in signal[512..].iter_mut() {
            *v = 1.0;
        }
        let frames = frame_rms(&signal, 512);
        assert_eq!(frames.len(), 2);
        assert_abs_diff_eq!(frames[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(frames[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_normalize() {
        let signal = vec![0.25, -0.5, 0.1];
        let normalized = normalize_audio(&signal);
        let max = normalized.iter().map(|x| x.abs()).fold(0.0f32, f32::max);
        assert_abs_diff_eq!(max, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fade_endpoints() {
        let signal = vec![1.0f32; 100];
        let faded = apply_fade(&signal, 10, 10);
        assert!(faded[0].abs() < 1e-6);
        assert!(faded[99].abs() < 1e-6);
        assert_abs_diff_eq!(faded[50], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rms_match_scales() {
        let original = vec![0.5f32; 64];
        let mut replacement = vec![0.1f32; 64];
        rms_match(&mut replacement, &original);
        assert_abs_diff_eq!(rms(&replacement), 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_rms_match_leaves_silence_alone() {
        let original = vec![0.0f32; 64];
        let mut replacement = vec![0.1f32; 64];
        rms_match(&mut replacement, &original);
        assert_abs_diff_eq!(rms(&replacement), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_crossfade_converges_to_incoming() {
        let mut existing = vec![1.0f32; 512];
        let incoming = vec![-1.0f32; 512];
        equal_power_crossfade(&mut existing, &incoming, 256);
        // Past the fade region the incoming signal owns the buffer.
        assert_abs_diff_eq!(existing[300], -1.0, epsilon = 1e-6);
        // Start of the fade still leans toward the existing signal.
        assert!(existing[0] > 0.9);
    }
}
