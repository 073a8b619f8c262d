//! Neural vocoder
//!
//! Turns (mel, F0) into a waveform through the pc_nsf_hifigan model. When
//! the model or runtime is absent a deterministic harmonic-plus-noise
//! synthesizer stands in, so editing keeps working end to end. One
//! inference runs at a time; additional requests queue on a single worker
//! and teardown drains the queue before the session is released.

use crate::audio::mel::{hz_to_mel, mel_to_hz};
use crate::model::{ModelCache, OnnxSession};
use crate::{Error, Result, FMAX, FMIN, HOP_SIZE, N_MELS, SAMPLE_RATE};
use crossbeam_channel::{unbounded, Sender};
use ndarray::{Array, Array2, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Execution backend for the inference session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Cuda { device_id: i32 },
    DirectMl { device_id: i32 },
}

impl Default for ExecutionProvider {
    fn default() -> Self {
        ExecutionProvider::Cpu
    }
}

/// Vocoder parameters. Sample rate, hop, and mel count are the training
/// contracts; they exist as fields for tests that exercise small shapes.
#[derive(Debug, Clone)]
pub struct VocoderConfig {
    pub sample_rate: u32,
    pub hop_size: usize,
    pub n_mels: usize,
    pub provider: ExecutionProvider,
}

impl Default for VocoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            hop_size: HOP_SIZE,
            n_mels: N_MELS,
            provider: ExecutionProvider::Cpu,
        }
    }
}

/// Completion callback for asynchronous inference. Receives the waveform,
/// or an empty buffer when the job was cancelled or failed.
pub type InferDone = Box<dyn FnOnce(Vec<f32>) + Send + 'static>;

struct InferJob {
    mel: Array2<f32>,
    f0: Vec<f32>,
    done: InferDone,
    cancel: Arc<AtomicBool>,
}

/// Mel + F0 conditioned vocoder with a single-worker async queue
pub struct Vocoder {
    core: Arc<VocoderCore>,
    tx: Option<Sender<InferJob>>,
    worker: Option<JoinHandle<()>>,
}

struct VocoderCore {
    session: Option<Arc<OnnxSession>>,
    config: VocoderConfig,
}

impl Vocoder {
    /// Load the neural vocoder from the model cache.
    ///
    /// A missing model file is an error the caller surfaces; a present
    /// file without a usable runtime degrades to the DSP fallback with a
    /// warning, matching the session wrapper's placeholder behavior.
    pub fn load(cache: &ModelCache, config: VocoderConfig) -> Result<Self> {
        let session = cache.get_or_load("pc_nsf_hifigan")?;
        if !session.is_real() {
            log::warn!("pc_nsf_hifigan runtime not available; using DSP fallback synthesis");
        }
        Ok(Self::from_core(VocoderCore {
            session: Some(session),
            config,
        }))
    }

    /// Create a vocoder that only uses the deterministic DSP fallback
    pub fn fallback(config: VocoderConfig) -> Self {
        Self::from_core(VocoderCore {
            session: None,
            config,
        })
    }

    fn from_core(core: VocoderCore) -> Self {
        let core = Arc::new(core);
        let (tx, rx) = unbounded::<InferJob>();

        let worker_core = Arc::clone(&core);
        let worker = std::thread::Builder::new()
            .name("retune-vocoder".into())
            .spawn(move || {
                // Jobs still queued at teardown are drained here, each
                // completing exactly once.
                for job in rx.iter() {
                    if job.cancel.load(Ordering::Acquire) {
                        (job.done)(Vec::new());
                        continue;
                    }
                    let pcm = worker_core.infer(&job.mel, &job.f0).unwrap_or_default();
                    (job.done)(pcm);
                }
            })
            .expect("failed to spawn vocoder worker");

        Self {
            core,
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Whether a real neural session is behind this vocoder
    pub fn is_neural(&self) -> bool {
        self.core
            .session
            .as_ref()
            .map(|s| s.is_real())
            .unwrap_or(false)
    }

    /// Vocoder configuration
    pub fn config(&self) -> &VocoderConfig {
        &self.core.config
    }

    /// Synchronous inference: (mel, f0) -> pcm of `f0.len() * hop` samples
    pub fn infer(&self, mel: &Array2<f32>, f0: &[f32]) -> Result<Vec<f32>> {
        self.core.infer(mel, f0)
    }

    /// Asynchronous inference.
    ///
    /// The completion is invoked exactly once, with the waveform or an
    /// empty buffer if `cancel` was set before the job ran.
    pub fn infer_async(
        &self,
        mel: Array2<f32>,
        f0: Vec<f32>,
        done: InferDone,
        cancel: Arc<AtomicBool>,
    ) {
        let job = InferJob {
            mel,
            f0,
            done,
            cancel,
        };
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.send(job) {
                // Worker already gone; complete the job as cancelled.
                (e.into_inner().done)(Vec::new());
            }
        }
    }
}

impl Drop for Vocoder {
    fn drop(&mut self) {
        // Close the queue, then join so every outstanding inference has
        // completed before the session handle is released.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl VocoderCore {
    fn infer(&self, mel: &Array2<f32>, f0: &[f32]) -> Result<Vec<f32>> {
        let frames = f0.len();
        if mel.ncols() != frames {
            return Err(Error::ShapeMismatch {
                expected: format!("mel with {} frames", frames),
                actual: format!("mel with {} frames", mel.ncols()),
            });
        }
        if frames == 0 {
            return Ok(Vec::new());
        }

        match &self.session {
            Some(session) if session.is_real() => self.infer_session(session, mel, f0),
            _ => Ok(self.synthesize_fallback(mel, f0)),
        }
    }

    fn infer_session(
        &self,
        session: &OnnxSession,
        mel: &Array2<f32>,
        f0: &[f32],
    ) -> Result<Vec<f32>> {
        let frames = f0.len();
        let mel_input = Array::from_shape_vec(
            IxDyn(&[1, self.config.n_mels, frames]),
            mel.iter().copied().collect(),
        )?;
        let f0_input = Array::from_shape_vec(IxDyn(&[1, frames]), f0.to_vec())?;

        let mut inputs = HashMap::new();
        inputs.insert("mel".to_string(), mel_input);
        inputs.insert("f0".to_string(), f0_input);

        let outputs = session.run(inputs)?;
        let wave = outputs
            .get("waveform")
            .ok_or_else(|| Error::SynthesisFailure("vocoder output missing".into()))?;

        let pcm: Vec<f32> = wave.iter().copied().collect();
        if pcm.len() != frames * self.config.hop_size {
            return Err(Error::SynthesisFailure(format!(
                "vocoder returned {} samples for {} frames",
                pcm.len(),
                frames
            )));
        }
        Ok(pcm)
    }

    /// Deterministic harmonic-plus-noise synthesis.
    ///
    /// Voiced frames sum phase-continuous harmonics with amplitudes read
    /// from the mel band each harmonic lands in; unvoiced frames emit
    /// band-shaped noise from a fixed-seed generator, so identical inputs
    /// always produce identical output.
    fn synthesize_fallback(&self, mel: &Array2<f32>, f0: &[f32]) -> Vec<f32> {
        let hop = self.config.hop_size;
        let sr = self.config.sample_rate as f32;
        let n_mels = self.config.n_mels.min(mel.nrows());
        let mut out = vec![0.0f32; f0.len() * hop];

        let mel_min = hz_to_mel(FMIN);
        let mel_max = hz_to_mel(FMAX);
        let band_for_hz = |hz: f32| -> Option<usize> {
            if hz < FMIN || hz > FMAX {
                return None;
            }
            let pos = (hz_to_mel(hz) - mel_min) / (mel_max - mel_min);
            Some(((pos * n_mels as f32) as usize).min(n_mels - 1))
        };

        let mut rng = StdRng::seed_from_u64(0x7e7a_11ed);
        let mut phases = vec![0.0f32; 24];

        for (frame, &hz) in f0.iter().enumerate() {
            let start = frame * hop;

            if hz > 0.0 {
                let max_harmonic = ((sr / 2.0 / hz) as usize).clamp(1, phases.len());
                for h in 1..=max_harmonic {
                    let harmonic_hz = hz * h as f32;
                    let amp = match band_for_hz(harmonic_hz) {
                        Some(band) => mel[[band, frame]].exp().sqrt() * 0.05,
                        None => continue,
                    };
                    if amp < 1e-6 {
                        continue;
                    }

                    let step = 2.0 * std::f32::consts::PI * harmonic_hz / sr;
                    let phase = &mut phases[h - 1];
                    for i in 0..hop {
                        out[start + i] += amp * (*phase + step * i as f32).sin();
                    }
                    *phase = (*phase + step * hop as f32) % (2.0 * std::f32::consts::PI);
                }
            } else {
                // Reset harmonic phases across silence so note onsets are
                // reproducible in isolation.
                phases.fill(0.0);

                let energy: f32 =
                    (0..n_mels).map(|b| mel[[b, frame]].exp()).sum::<f32>() / n_mels as f32;
                let amp = energy.sqrt() * 0.02;
                if amp > 1e-6 {
                    for i in 0..hop {
                        out[start + i] = rng.gen_range(-1.0f32..1.0) * amp;
                    }
                }
            }
        }

        // Keep headroom without altering spectral shape
        let peak = out.iter().map(|x| x.abs()).fold(0.0f32, f32::max);
        if peak > 0.99 {
            let scale = 0.99 / peak;
            for v in out.iter_mut() {
                *v *= scale;
            }
        }

        out
    }
}

/// Mel band center frequency, exposed for fallback diagnostics
pub fn band_center_hz(band: usize, n_mels: usize) -> f32 {
    let mel_min = hz_to_mel(FMIN);
    let mel_max = hz_to_mel(FMAX);
    let mel = mel_min + (mel_max - mel_min) * (band as f32 + 0.5) / n_mels as f32;
    mel_to_hz(mel)
}
