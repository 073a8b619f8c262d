//! Audio decode/encode boundary
//!
//! Decoding goes through symphonia so WAV, MP3, FLAC, and AIFF takes all
//! arrive as mono f32; the core only ever sees PCM at the internal rate.
//! Writing uses hound.

use crate::{Error, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decoded audio clip
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Audio samples (mono, normalized to [-1, 1])
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioClip {
    /// Create new audio data
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Get duration in seconds
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Get number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Load an audio file as mono PCM
///
/// # Arguments
/// * `path` - Path to an audio file (WAV, MP3, FLAC, AIFF)
/// * `target_sr` - Optional target sample rate (resampled if different)
///
/// # Returns
/// Mono audio with samples in [-1, 1]
pub fn load_audio<P: AsRef<Path>>(path: P, target_sr: Option<u32>) -> Result<AudioClip> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound(path.display().to_string()));
    }

    log::info!("Loading audio from {}", path.display());

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Load("no supported audio track".into()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::Load("source has no sample rate".into()))?;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::ResetRequired) => continue,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let duration = decoded.capacity() as u64;
                if duration == 0 {
                    continue;
                }

                let channels = spec.channels.count();
                let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
                sample_buf.copy_interleaved_ref(decoded);

                if channels > 1 {
                    samples.extend(
                        sample_buf
                            .samples()
                            .chunks(channels)
                            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32),
                    );
                } else {
                    samples.extend_from_slice(sample_buf.samples());
                }
            }
            // Corrupt packets are skipped, not fatal
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(symphonia::core::errors::Error::ResetRequired) => continue,
            Err(e) => return Err(e.into()),
        }
    }

    if samples.is_empty() {
        return Err(Error::Load(format!(
            "no audio decoded from {}",
            path.display()
        )));
    }

    log::info!("Decoded {} samples at {} Hz", samples.len(), sample_rate);

    let mut clip = AudioClip::new(samples, sample_rate);

    if let Some(target) = target_sr {
        if target != clip.sample_rate {
            clip = super::resample::resample(&clip, target)?;
        }
    }

    Ok(clip)
}

/// Save audio to a WAV file
pub fn save_audio<P: AsRef<Path>>(path: P, clip: &AudioClip) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: clip.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for &sample in &clip.samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    Ok(())
}

/// Save raw samples with the given sample rate
pub fn save_samples<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let clip = AudioClip::new(samples.to_vec(), sample_rate);
    save_audio(path, &clip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_duration() {
        let clip = AudioClip::new(vec![0.0; 44100], 44100);
        assert!((clip.duration() - 1.0).abs() < 1e-6);
        assert_eq!(clip.len(), 44100);
        assert!(!clip.is_empty());
    }

    #[test]
    fn test_missing_file() {
        let result = load_audio("/nonexistent/take.wav", None);
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }

    #[test]
    fn test_wav_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join("retune_io_roundtrip.wav");

        let samples: Vec<f32> = (0..4410)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin() * 0.5)
            .collect();
        save_samples(&path, &samples, 44100).unwrap();

        let loaded = load_audio(&path, None).unwrap();
        assert_eq!(loaded.sample_rate, 44100);
        assert_eq!(loaded.len(), samples.len());
        for (a, b) in loaded.samples.iter().zip(samples.iter()) {
            assert!((a - b).abs() < 1e-6);
        }

        std::fs::remove_file(&path).ok();
    }
}
