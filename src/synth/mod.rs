//! Incremental resynthesis
//!
//! Watches the project's dirty state, expands the dirty frame interval to
//! silence boundaries, snapshots the conditioning slices, and runs the
//! vocoder asynchronously. Completions are marshaled back to the edit
//! thread, where the newest job splices its waveform into the shared
//! buffer and clears the dirty flags; anything older is discarded.

use crate::audio::{equal_power_crossfade, rms_match};
use crate::project::Project;
use crate::vocoder::Vocoder;
use crate::{Error, Result, HOP_SIZE};
use crossbeam_channel::{unbounded, Receiver, Sender};
use ndarray::s;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Unvoiced run length that counts as a silence boundary
pub const MIN_SILENCE: usize = 5;

/// Crossfade length when a boundary could not reach silence
pub const CROSSFADE_SAMPLES: usize = 256;

/// Expanded dirty interval plus how each edge was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthRegion {
    pub start_frame: usize,
    pub end_frame: usize,
    /// The left edge landed just after a silence run
    pub start_at_silence: bool,
    /// The right edge landed just before a silence run
    pub end_at_silence: bool,
}

/// A finished synthesis job, ready to splice
struct Completion {
    job_id: u64,
    region: SynthRegion,
    pcm: Vec<f32>,
}

/// Outcome of draining one completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpliceOutcome {
    /// The waveform was updated and dirty state cleared
    Applied,
    /// A newer job had started; nothing was written
    Stale,
    /// The vocoder returned nothing; dirty state is left set
    Failed,
}

/// Expand a dirty frame interval outward to silence boundaries.
///
/// Walking out from each edge, the first run of at least `MIN_SILENCE`
/// consecutive unvoiced frames becomes the boundary; the region snaps to
/// just inside it. A search that reaches the buffer edge clamps there.
pub fn expand_to_silence(voiced: &[bool], start: usize, end: usize) -> SynthRegion {
    let t = voiced.len();
    let start = start.min(t);
    let end = end.min(t);

    // Leftward: find a silence run ending at or before `start`
    let mut run = 0usize;
    let mut new_start = 0usize;
    let mut start_at_silence = false;
    let mut i = start;
    while i > 0 {
        i -= 1;
        if voiced[i] {
            run = 0;
        } else {
            run += 1;
            if run >= MIN_SILENCE {
                // The run occupies [i, i + run); resume just after it
                new_start = i + run;
                start_at_silence = true;
                break;
            }
        }
    }

    // Rightward: find a silence run starting at or after `end`
    run = 0;
    let mut new_end = t;
    let mut end_at_silence = false;
    for (j, &v) in voiced.iter().enumerate().skip(end) {
        if v {
            run = 0;
        } else {
            run += 1;
            if run >= MIN_SILENCE {
                // The run occupies [j + 1 - run, j + 1); stop just before
                new_end = j + 1 - run;
                end_at_silence = true;
                break;
            }
        }
    }

    SynthRegion {
        start_frame: new_start.min(start),
        end_frame: new_end.max(end).min(t),
        start_at_silence,
        end_at_silence,
    }
}

/// Incremental synthesizer driving one vocoder
pub struct IncrementalSynthesizer {
    vocoder: Arc<Vocoder>,
    job_counter: Arc<AtomicU64>,
    cancel: Arc<AtomicBool>,
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
}

impl IncrementalSynthesizer {
    /// Create a synthesizer over a shared vocoder
    pub fn new(vocoder: Arc<Vocoder>) -> Self {
        let (completion_tx, completion_rx) = unbounded();
        Self {
            vocoder,
            job_counter: Arc::new(AtomicU64::new(0)),
            cancel: Arc::new(AtomicBool::new(false)),
            completion_tx,
            completion_rx,
        }
    }

    /// The shared cancel flag; set on project close
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Id of the most recently dispatched job
    pub fn latest_job_id(&self) -> u64 {
        self.job_counter.load(Ordering::Acquire)
    }

    /// Dispatch a synthesis pass for the current dirty region.
    ///
    /// Does nothing when no dirty state exists. The mel and F0 slices are
    /// snapshotted here, on the edit thread, so the worker never reads
    /// live project state. Returns the job id when a job was dispatched.
    pub fn trigger(&self, project: &Project) -> Result<Option<u64>> {
        let (ds, de) = match project.dirty_range() {
            Some(range) => range,
            None => return Ok(None),
        };

        let t = project.num_frames();
        if t == 0 {
            return Err(Error::InvalidState("no analysis loaded".into()));
        }

        let region = expand_to_silence(&project.voiced, ds, de);
        if region.start_frame >= region.end_frame {
            return Ok(None);
        }

        // Job-scoped snapshots
        let mel_slice = project
            .mel
            .slice(s![.., region.start_frame..region.end_frame])
            .to_owned();
        let f0_slice = project.compose_f0_range(
            region.start_frame..region.end_frame,
            false,
            project.global_pitch_offset,
        );

        let job_id = self.job_counter.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!(
            "synthesis job {} over frames [{}, {})",
            job_id,
            region.start_frame,
            region.end_frame
        );

        let tx = self.completion_tx.clone();
        let done = Box::new(move |pcm: Vec<f32>| {
            // Stale results are filtered at drain time; this only moves
            // the result back to the edit thread.
            let _ = tx.send(Completion {
                job_id,
                region,
                pcm,
            });
        });

        self.vocoder
            .infer_async(mel_slice, f0_slice, done, Arc::clone(&self.cancel));

        Ok(Some(job_id))
    }

    /// Apply pending completions on the edit thread.
    ///
    /// Only the most recent job may land; stale completions are
    /// discarded whole. Returns the outcome of each drained completion.
    pub fn drain_completions(&self, project: &mut Project) -> Vec<SpliceOutcome> {
        let mut outcomes = Vec::new();

        while let Ok(completion) = self.completion_rx.try_recv() {
            let latest = self.latest_job_id();
            if completion.job_id != latest {
                log::debug!(
                    "discarding stale synthesis job {} (latest {})",
                    completion.job_id,
                    latest
                );
                outcomes.push(SpliceOutcome::Stale);
                continue;
            }

            if completion.pcm.is_empty() {
                // Failure or cancellation: waveform untouched, dirty
                // flags stay set so the next edit re-triggers.
                outcomes.push(SpliceOutcome::Failed);
                continue;
            }

            self.splice(project, &completion);
            project.clear_dirty();
            outcomes.push(SpliceOutcome::Applied);
        }

        outcomes
    }

    /// Block until a completion for `job_id` arrives, then apply it.
    ///
    /// For non-interactive callers (CLI, tests); the interactive path
    /// polls `drain_completions`.
    pub fn wait_for(&self, project: &mut Project, job_id: u64) -> Result<SpliceOutcome> {
        loop {
            let completion = self
                .completion_rx
                .recv()
                .map_err(|_| Error::SynthesisFailure("vocoder worker gone".into()))?;

            let is_target = completion.job_id == job_id;
            let latest = self.latest_job_id();

            if completion.job_id != latest {
                if is_target {
                    return Ok(SpliceOutcome::Stale);
                }
                continue;
            }

            if completion.pcm.is_empty() {
                if self.cancel.load(Ordering::Acquire) {
                    return Err(Error::SynthesisCancelled);
                }
                return Ok(SpliceOutcome::Failed);
            }

            self.splice(project, &completion);
            project.clear_dirty();
            return Ok(SpliceOutcome::Applied);
        }
    }

    /// Write a completed job into the waveform.
    ///
    /// Silence-bounded edges butt-join; edges that could not reach
    /// silence get an equal-power crossfade, RMS-matched to the segment
    /// they replace. Nothing outside the expanded region changes.
    fn splice(&self, project: &Project, completion: &Completion) {
        let region = completion.region;
        let start_sample = region.start_frame * HOP_SIZE;
        let end_sample = region.end_frame * HOP_SIZE;

        project.waveform.with_samples_mut(|samples| {
            let len = samples.len();
            if start_sample >= len {
                return;
            }
            let end_sample = end_sample.min(len);
            let span = end_sample - start_sample;
            let mut pcm = completion.pcm.clone();
            pcm.truncate(span);

            let crossfade_head = !region.start_at_silence && start_sample > 0;
            let crossfade_tail = !region.end_at_silence && end_sample < len;

            if crossfade_head || crossfade_tail {
                let pcm_len = pcm.len();
                rms_match(&mut pcm, &samples[start_sample..start_sample + pcm_len]);
            }

            // The tail of the replaced span must be captured before the
            // new pcm lands over it.
            let tail_n = CROSSFADE_SAMPLES.min(pcm.len());
            let original_tail: Option<Vec<f32>> = if crossfade_tail {
                let tail_start = start_sample + pcm.len() - tail_n;
                Some(samples[tail_start..tail_start + tail_n].to_vec())
            } else {
                None
            };

            if crossfade_head {
                let n = CROSSFADE_SAMPLES.min(pcm.len());
                equal_power_crossfade(
                    &mut samples[start_sample..start_sample + n],
                    &pcm[..n],
                    n,
                );
                samples[start_sample + n..start_sample + pcm.len()]
                    .copy_from_slice(&pcm[n..]);
            } else {
                samples[start_sample..start_sample + pcm.len()].copy_from_slice(&pcm);
            }

            if let Some(outgoing) = original_tail {
                // Fade from the new pcm back into the original signal
                // across the last samples of the replaced span.
                let tail_start = start_sample + pcm.len() - tail_n;
                for i in 0..tail_n {
                    let t = (i as f32 + 0.5) / tail_n as f32;
                    let gain_in = (0.5 * std::f32::consts::PI * t).cos();
                    let gain_out = (0.5 * std::f32::consts::PI * t).sin();
                    let incoming = pcm[pcm.len() - tail_n + i];
                    samples[tail_start + i] = incoming * gain_in * gain_in
                        + outgoing[i] * gain_out * gain_out;
                }
            }
        });
    }
}
