//! Analysis pipeline coordination
//!
//! Drives mel extraction, F0 detection, and note segmentation on a worker
//! thread, reporting progress over a channel. The pipeline checks a
//! shared cancel flag at every stage boundary, and a missing neural
//! detector silently falls back to YIN.

use crate::audio::{mel_spectrogram, AudioConfig};
use crate::f0::{extract_f0, F0Detector, F0Estimate};
use crate::model::ModelCache;
use crate::notes::{segment_notes, Note, SegmenterChoice};
use crate::project::Project;
use crate::{frames_for_samples, Error, Result, HOP_SIZE};
use crossbeam_channel::{unbounded, Receiver, Sender};
use ndarray::Array2;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Pipeline stage identifiers. The strings are localization keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    Mel,
    F0,
    Notes,
    Curves,
}

impl AnalysisStage {
    /// Localization key for this stage
    pub fn key(&self) -> &'static str {
        match self {
            AnalysisStage::Mel => "analysis.stage.mel",
            AnalysisStage::F0 => "analysis.stage.f0",
            AnalysisStage::Notes => "analysis.stage.notes",
            AnalysisStage::Curves => "analysis.stage.curves",
        }
    }

    /// Advisory progress fraction entering this stage
    pub fn fraction(&self) -> f32 {
        match self {
            AnalysisStage::Mel => 0.0,
            AnalysisStage::F0 => 0.25,
            AnalysisStage::Notes => 0.75,
            AnalysisStage::Curves => 0.9,
        }
    }
}

/// Messages published by the worker
pub enum AnalysisEvent {
    /// Entering a stage; fraction is advisory
    Progress { fraction: f32, stage: &'static str },
    /// Pipeline output, ready to install into a project
    Finished(Box<AnalysisOutput>),
    /// Pipeline failed or was cancelled
    Failed(Error),
}

/// Everything the pipeline produces
pub struct AnalysisOutput {
    pub mel: Array2<f32>,
    pub f0: Vec<f32>,
    pub voiced: Vec<bool>,
    pub notes: Vec<Note>,
}

impl AnalysisOutput {
    /// Install this output into a project
    pub fn install(self, project: &mut Project) -> Result<()> {
        project.apply_analysis(self.mel, self.f0, self.voiced, self.notes)
    }
}

/// Analysis configuration
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub audio: AudioConfig,
    pub detector: F0Detector,
    pub segmenter: SegmenterChoice,
    pub model_dir: PathBuf,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            detector: F0Detector::default(),
            segmenter: SegmenterChoice::Model,
            model_dir: PathBuf::from("models"),
        }
    }
}

/// Coordinates the analysis pipeline on a worker thread
pub struct AnalysisCoordinator {
    config: AnalysisConfig,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AnalysisCoordinator {
    /// Create a coordinator with the given configuration
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Create a coordinator with default configuration
    pub fn with_defaults() -> Self {
        Self::new(AnalysisConfig::default())
    }

    /// The shared cancel flag
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Request cancellation; takes effect at the next stage boundary
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Start the pipeline on a worker thread.
    ///
    /// `samples` must be at the internal rate. Events arrive on the
    /// returned receiver; the final event is `Finished` or `Failed`.
    pub fn start(&self, samples: Vec<f32>, sample_rate: u32) -> Receiver<AnalysisEvent> {
        let (handle, rx) = spawn_worker(
            self.config.clone(),
            Arc::clone(&self.cancel),
            samples,
            sample_rate,
        );
        // Detached worker; the event channel closing signals completion.
        drop(handle);
        rx
    }

    /// Start the pipeline and keep the handle for joining on close
    pub fn start_tracked(
        &mut self,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Receiver<AnalysisEvent> {
        let (handle, rx) = spawn_worker(
            self.config.clone(),
            Arc::clone(&self.cancel),
            samples,
            sample_rate,
        );
        self.worker = Some(handle);
        rx
    }

    /// Set the cancel flag and join the worker (project close path)
    pub fn shutdown(&mut self) {
        self.cancel();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AnalysisCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(
    config: AnalysisConfig,
    cancel: Arc<AtomicBool>,
    samples: Vec<f32>,
    sample_rate: u32,
) -> (JoinHandle<()>, Receiver<AnalysisEvent>) {
    let (tx, rx) = unbounded();

    let handle = std::thread::Builder::new()
        .name("retune-analysis".into())
        .spawn(move || {
            let progress_tx: Sender<AnalysisEvent> = tx.clone();
            let progress = move |stage: AnalysisStage| {
                let _ = progress_tx.send(AnalysisEvent::Progress {
                    fraction: stage.fraction(),
                    stage: stage.key(),
                });
            };

            match run_pipeline(&config, &samples, sample_rate, &cancel, &progress) {
                Ok(output) => {
                    let _ = tx.send(AnalysisEvent::Finished(Box::new(output)));
                }
                Err(e) => {
                    let _ = tx.send(AnalysisEvent::Failed(e));
                }
            }
        })
        .expect("failed to spawn analysis worker");

    (handle, rx)
}

/// Run the full pipeline synchronously.
///
/// Used by the worker thread and directly by non-interactive callers.
pub fn run_pipeline(
    config: &AnalysisConfig,
    samples: &[f32],
    sample_rate: u32,
    cancel: &AtomicBool,
    progress: &dyn Fn(AnalysisStage),
) -> Result<AnalysisOutput> {
    let cache = ModelCache::new(&config.model_dir);

    let check = |label: &str| -> Result<()> {
        if cancel.load(Ordering::Acquire) {
            log::debug!("analysis cancelled before {}", label);
            Err(Error::AnalysisCancelled)
        } else {
            Ok(())
        }
    };

    // Stage 1: mel
    check("mel")?;
    progress(AnalysisStage::Mel);
    let mel = mel_spectrogram(samples, &config.audio)?;
    let t = mel.ncols();
    debug_assert_eq!(t, frames_for_samples(samples.len()));

    // Stage 2: F0, with YIN fallback on a missing neural model
    check("f0")?;
    progress(AnalysisStage::F0);
    let estimate = extract_with_fallback(config.detector, samples, sample_rate, t, &cache)?;

    // Stage 3: note segmentation
    check("notes")?;
    progress(AnalysisStage::Notes);
    let notes = segment_notes(
        config.segmenter,
        samples,
        HOP_SIZE,
        &estimate.f0,
        &estimate.voiced,
        &cache,
    )?;

    check("curves")?;
    progress(AnalysisStage::Curves);

    Ok(AnalysisOutput {
        mel,
        f0: estimate.f0,
        voiced: estimate.voiced,
        notes,
    })
}

/// Run the configured detector, dropping to YIN when its model is missing
fn extract_with_fallback(
    detector: F0Detector,
    samples: &[f32],
    sample_rate: u32,
    target_frames: usize,
    cache: &ModelCache,
) -> Result<F0Estimate> {
    match extract_f0(detector, samples, sample_rate, target_frames, cache) {
        Ok(estimate) => Ok(estimate),
        Err(Error::ModelMissing(name)) if detector != F0Detector::Yin => {
            log::warn!("{} unavailable ({}); falling back to YIN", detector, name);
            extract_f0(F0Detector::Yin, samples, sample_rate, target_frames, cache)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SAMPLE_RATE;

    fn sine(freq: f32, seconds: f32) -> Vec<f32> {
        let n = (seconds * SAMPLE_RATE as f32) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE as f32).sin() * 0.6)
            .collect()
    }

    #[test]
    fn test_pipeline_on_sine() {
        let samples = sine(440.0, 1.0);
        let config = AnalysisConfig {
            detector: F0Detector::Yin,
            segmenter: SegmenterChoice::RuleBased,
            model_dir: std::env::temp_dir().join("retune_no_models"),
            ..Default::default()
        };

        let cancel = AtomicBool::new(false);
        let output = run_pipeline(&config, &samples, SAMPLE_RATE, &cancel, &|_| {}).unwrap();

        assert_eq!(output.mel.ncols(), output.f0.len());
        assert_eq!(output.f0.len(), output.voiced.len());
        assert_eq!(output.notes.len(), 1);
        assert!((output.notes[0].midi_note - 69.0).abs() < 0.2);
    }

    #[test]
    fn test_neural_detector_falls_back_to_yin() {
        let samples = sine(440.0, 0.5);
        let config = AnalysisConfig {
            detector: F0Detector::Rmvpe,
            segmenter: SegmenterChoice::RuleBased,
            model_dir: std::env::temp_dir().join("retune_no_models"),
            ..Default::default()
        };

        let cancel = AtomicBool::new(false);
        let output = run_pipeline(&config, &samples, SAMPLE_RATE, &cancel, &|_| {}).unwrap();

        // YIN fallback still finds the tone
        let voiced_count = output.voiced.iter().filter(|&&v| v).count();
        assert!(voiced_count > output.voiced.len() / 2);
    }

    #[test]
    fn test_cancel_before_start() {
        let samples = sine(440.0, 0.5);
        let config = AnalysisConfig::default();
        let cancel = AtomicBool::new(true);

        let result = run_pipeline(&config, &samples, SAMPLE_RATE, &cancel, &|_| {});
        assert!(matches!(result, Err(Error::AnalysisCancelled)));
    }

    #[test]
    fn test_worker_reports_progress_and_finishes() {
        let samples = sine(440.0, 0.5);
        let coordinator = AnalysisCoordinator::new(AnalysisConfig {
            detector: F0Detector::Yin,
            segmenter: SegmenterChoice::RuleBased,
            model_dir: std::env::temp_dir().join("retune_no_models"),
            ..Default::default()
        });

        let rx = coordinator.start(samples, SAMPLE_RATE);

        let mut saw_progress = false;
        let mut finished = false;
        for event in rx.iter() {
            match event {
                AnalysisEvent::Progress { fraction, stage } => {
                    assert!((0.0..=1.0).contains(&fraction));
                    assert!(stage.starts_with("analysis.stage."));
                    saw_progress = true;
                }
                AnalysisEvent::Finished(output) => {
                    assert!(!output.f0.is_empty());
                    finished = true;
                }
                AnalysisEvent::Failed(e) => panic!("analysis failed: {}", e),
            }
        }
        assert!(saw_progress);
        assert!(finished);
    }

    #[test]
    fn test_stage_fractions_ordered() {
        let stages = [
            AnalysisStage::Mel,
            AnalysisStage::F0,
            AnalysisStage::Notes,
            AnalysisStage::Curves,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].fraction() < pair[1].fraction());
        }
    }
}
