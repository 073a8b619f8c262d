//! Audio buffer and playback
//!
//! Owns the waveform the editor plays and splices into. The real-time
//! path is wait-free in the common case: the callback try-locks the
//! sample storage and outputs silence when a writer holds it, and every
//! piece of per-sample state lives in atomics.

use crate::SAMPLE_RATE;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

/// Shared waveform storage.
///
/// Writers (UI thread, synthesis completions) lock; the audio callback
/// only ever try-locks.
pub struct WaveformBuffer {
    samples: Mutex<Vec<f32>>,
    len: AtomicUsize,
    generation: AtomicU64,
}

impl WaveformBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            len: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Create a buffer holding `samples`
    pub fn from_samples(samples: Vec<f32>) -> Self {
        let len = samples.len();
        Self {
            samples: Mutex::new(samples),
            len: AtomicUsize::new(len),
            generation: AtomicU64::new(0),
        }
    }

    /// Replace the entire waveform
    pub fn replace(&self, samples: Vec<f32>) {
        let mut guard = self.samples.lock().unwrap();
        self.len.store(samples.len(), Ordering::Release);
        *guard = samples;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Write `pcm` at `start`, clamped to the current length.
    ///
    /// Returns how many samples were written.
    pub fn splice(&self, start: usize, pcm: &[f32]) -> usize {
        let mut guard = self.samples.lock().unwrap();
        let len = guard.len();
        if start >= len {
            return 0;
        }
        let n = pcm.len().min(len - start);
        guard[start..start + n].copy_from_slice(&pcm[..n]);
        self.generation.fetch_add(1, Ordering::AcqRel);
        n
    }

    /// Run `f` over the samples under the lock (UI-thread readers)
    pub fn with_samples<R>(&self, f: impl FnOnce(&[f32]) -> R) -> R {
        let guard = self.samples.lock().unwrap();
        f(&guard)
    }

    /// Mutate the samples under the lock (UI-thread writers)
    pub fn with_samples_mut<R>(&self, f: impl FnOnce(&mut Vec<f32>) -> R) -> R {
        let mut guard = self.samples.lock().unwrap();
        let r = f(&mut guard);
        self.len.store(guard.len(), Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        r
    }

    /// Copy the samples out
    pub fn snapshot(&self) -> Vec<f32> {
        self.samples.lock().unwrap().clone()
    }

    /// Current length without taking the lock
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// True when no samples are loaded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bumped on every mutation; readers use it to detect staleness
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Default for WaveformBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

impl TransportState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => TransportState::Playing,
            2 => TransportState::Paused,
            _ => TransportState::Stopped,
        }
    }
}

/// Playback position report, coalesced to one per audio block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionUpdate {
    /// Source-sample position
    pub sample: usize,
    /// Position in seconds at the internal rate
    pub seconds: f64,
}

/// 4-point Lagrange interpolator for device-rate conversion.
///
/// History is callback-local state; a reset clears it so a seek or loop
/// jump does not smear stale samples into the new region.
#[derive(Debug, Clone)]
struct LagrangeInterpolator {
    history: [f32; 4],
}

impl LagrangeInterpolator {
    fn new() -> Self {
        Self { history: [0.0; 4] }
    }

    fn reset(&mut self) {
        self.history = [0.0; 4];
    }

    /// Third-order Lagrange interpolation at fractional position `t`
    /// within the last four pushed samples.
    fn interpolate(&self, t: f32) -> f32 {
        let [y0, y1, y2, y3] = self.history;
        let c0 = y1;
        let c1 = y2 - y0 * (1.0 / 3.0) - y1 * 0.5 - y3 * (1.0 / 6.0);
        let c2 = 0.5 * (y0 + y2) - y1;
        let c3 = (1.0 / 6.0) * (y3 - y0) + 0.5 * (y1 - y2);
        ((c3 * t + c2) * t + c1) * t + c0
    }

    fn push(&mut self, sample: f32) {
        self.history = [self.history[1], self.history[2], self.history[3], sample];
    }
}

/// Playback engine serving the block pull callback
pub struct PlaybackEngine {
    buffer: Arc<WaveformBuffer>,

    state: AtomicU8,
    /// Fractional source position, stored as f64 bits
    position: AtomicU64,
    /// Linear gain, stored as f32 bits
    gain: AtomicU32,
    loop_enabled: AtomicBool,
    loop_start: AtomicUsize,
    loop_end: AtomicUsize,
    /// SR / device rate, stored as f64 bits
    ratio: AtomicU64,
    reset_pending: AtomicBool,

    interpolator: LagrangeInterpolator,
    /// Source index the interpolator history is filled up to
    history_pos: usize,

    notify_pending: Arc<AtomicBool>,
    notify_tx: Sender<PositionUpdate>,
    notify_rx: Receiver<PositionUpdate>,
}

impl PlaybackEngine {
    /// Create an engine over a shared waveform
    pub fn new(buffer: Arc<WaveformBuffer>) -> Self {
        let (notify_tx, notify_rx) = bounded(64);
        Self {
            buffer,
            state: AtomicU8::new(TransportState::Stopped as u8),
            position: AtomicU64::new(0f64.to_bits()),
            gain: AtomicU32::new(1.0f32.to_bits()),
            loop_enabled: AtomicBool::new(false),
            loop_start: AtomicUsize::new(0),
            loop_end: AtomicUsize::new(0),
            ratio: AtomicU64::new(1f64.to_bits()),
            reset_pending: AtomicBool::new(true),
            interpolator: LagrangeInterpolator::new(),
            history_pos: 0,
            notify_pending: Arc::new(AtomicBool::new(false)),
            notify_tx,
            notify_rx,
        }
    }

    /// The waveform this engine reads
    pub fn buffer(&self) -> &Arc<WaveformBuffer> {
        &self.buffer
    }

    /// Called when the device opens or its rate changes
    pub fn prepare_to_play(&self, device_rate: f64, _block_size: usize) {
        let ratio = SAMPLE_RATE as f64 / device_rate.max(1.0);
        self.ratio.store(ratio.to_bits(), Ordering::Release);
        self.reset_pending.store(true, Ordering::Release);
    }

    /// Transport state
    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Start playing. From `Stopped` the interpolator is reset.
    pub fn play(&self) {
        if self.state() == TransportState::Stopped {
            self.reset_pending.store(true, Ordering::Release);
        }
        self.state
            .store(TransportState::Playing as u8, Ordering::Release);
    }

    /// Hold the current position
    pub fn pause(&self) {
        self.state
            .store(TransportState::Paused as u8, Ordering::Release);
    }

    /// Stop and rewind to zero
    pub fn stop(&self) {
        self.state
            .store(TransportState::Stopped as u8, Ordering::Release);
        self.position.store(0f64.to_bits(), Ordering::Release);
        self.reset_pending.store(true, Ordering::Release);
    }

    /// Seek to a source-sample position
    pub fn seek(&self, sample: usize) {
        self.position
            .store((sample as f64).to_bits(), Ordering::Release);
        self.reset_pending.store(true, Ordering::Release);
    }

    /// Current source-sample position
    pub fn position(&self) -> usize {
        f64::from_bits(self.position.load(Ordering::Acquire)) as usize
    }

    /// Set linear gain
    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.max(0.0).to_bits(), Ordering::Release);
    }

    /// Set gain from decibels
    pub fn set_gain_db(&self, db: f32) {
        self.set_gain(10f32.powf(db / 20.0));
    }

    /// Linear gain
    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Acquire))
    }

    /// Configure the loop region in source samples
    pub fn set_loop(&self, enabled: bool, start: usize, end: usize) {
        self.loop_start.store(start, Ordering::Release);
        self.loop_end.store(end.max(start), Ordering::Release);
        self.loop_enabled.store(enabled, Ordering::Release);
    }

    /// Receiver for coalesced position updates (message thread side)
    pub fn position_updates(&self) -> Receiver<PositionUpdate> {
        self.notify_rx.clone()
    }

    /// Acknowledge a received position update, re-arming the coalescing
    /// flag. Call once per update drained from `position_updates`.
    pub fn acknowledge_position_update(&self) {
        self.notify_pending.store(false, Ordering::Release);
    }

    /// Real-time block callback.
    ///
    /// `out` is interleaved with `channels` channels; every channel gets
    /// a copy of the mono signal. Never blocks: if a writer holds the
    /// waveform lock, the block is silence.
    pub fn process(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        if channels == 0 {
            return;
        }
        let num_samples = out.len() / channels;

        if self.state() != TransportState::Playing {
            return;
        }

        let guard = match self.buffer.samples.try_lock() {
            Ok(guard) => guard,
            // Writer active: silence, no blocking on the audio thread
            Err(TryLockError::WouldBlock) => return,
            Err(TryLockError::Poisoned(_)) => return,
        };
        let samples: &[f32] = &guard;
        if samples.is_empty() {
            return;
        }

        let ratio = f64::from_bits(self.ratio.load(Ordering::Acquire));
        let gain = self.gain();
        let loop_enabled = self.loop_enabled.load(Ordering::Acquire);
        let loop_start = self.loop_start.load(Ordering::Acquire);
        let loop_end = self.loop_end.load(Ordering::Acquire).min(samples.len());
        let mut pos = f64::from_bits(self.position.load(Ordering::Acquire));

        if self.reset_pending.swap(false, Ordering::AcqRel) {
            self.interpolator.reset();
            self.history_pos = pos as usize;
        }

        let mut stopped = false;

        for frame in 0..num_samples {
            if loop_enabled && loop_end > loop_start && pos >= loop_end as f64 {
                pos = loop_start as f64;
                self.interpolator.reset();
                self.history_pos = loop_start;
            }

            let idx = pos as usize;
            if idx >= samples.len() {
                stopped = true;
                break;
            }

            // Keep the interpolator history filled through idx + 1 so the
            // cubic has a point on each side of the read position.
            while self.history_pos <= idx + 2 {
                let s = samples.get(self.history_pos).copied().unwrap_or(0.0);
                self.interpolator.push(s);
                self.history_pos += 1;
            }

            let frac = (pos - idx as f64) as f32;
            let value = self.interpolator.interpolate(frac) * gain;

            let base = frame * channels;
            for ch in 0..channels {
                out[base + ch] = value;
            }

            pos += ratio;
        }

        drop(guard);

        if stopped {
            self.state
                .store(TransportState::Stopped as u8, Ordering::Release);
            pos = 0.0;
            self.reset_pending.store(true, Ordering::Release);
        }

        self.position.store(pos.to_bits(), Ordering::Release);

        // One pending notification at a time; further blocks are silent
        // on the message thread until this one is acknowledged.
        if self
            .notify_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let sample = pos as usize;
            let update = PositionUpdate {
                sample,
                seconds: sample as f64 / SAMPLE_RATE as f64,
            };
            if self.notify_tx.try_send(update).is_err() {
                self.notify_pending.store(false, Ordering::Release);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_buffer(len: usize) -> Arc<WaveformBuffer> {
        let samples: Vec<f32> = (0..len).map(|i| i as f32 / len as f32).collect();
        Arc::new(WaveformBuffer::from_samples(samples))
    }

    #[test]
    fn test_stopped_outputs_silence() {
        let mut engine = PlaybackEngine::new(ramp_buffer(4096));
        let mut out = vec![1.0f32; 512];
        engine.process(&mut out, 1);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_play_advances_position() {
        let mut engine = PlaybackEngine::new(ramp_buffer(8192));
        engine.prepare_to_play(SAMPLE_RATE as f64, 512);
        engine.play();

        let mut out = vec![0.0f32; 512];
        engine.process(&mut out, 1);
        assert_eq!(engine.position(), 512);
        assert_eq!(engine.state(), TransportState::Playing);
    }

    #[test]
    fn test_pause_holds_stop_rewinds() {
        let mut engine = PlaybackEngine::new(ramp_buffer(8192));
        engine.prepare_to_play(SAMPLE_RATE as f64, 512);
        engine.play();

        let mut out = vec![0.0f32; 512];
        engine.process(&mut out, 1);

        engine.pause();
        let held = engine.position();
        engine.process(&mut out, 1);
        assert_eq!(engine.position(), held);

        engine.stop();
        assert_eq!(engine.position(), 0);
        assert_eq!(engine.state(), TransportState::Stopped);
    }

    #[test]
    fn test_end_of_buffer_stops() {
        let mut engine = PlaybackEngine::new(ramp_buffer(256));
        engine.prepare_to_play(SAMPLE_RATE as f64, 512);
        engine.play();

        let mut out = vec![0.0f32; 512];
        engine.process(&mut out, 1);
        assert_eq!(engine.state(), TransportState::Stopped);
        assert_eq!(engine.position(), 0);
    }

    #[test]
    fn test_loop_wraps() {
        let mut engine = PlaybackEngine::new(ramp_buffer(8192));
        engine.prepare_to_play(SAMPLE_RATE as f64, 512);
        engine.set_loop(true, 1000, 1500);
        engine.seek(1000);
        engine.play();

        let mut out = vec![0.0f32; 2048];
        engine.process(&mut out, 1);

        let pos = engine.position();
        assert!(pos >= 1000 && pos < 1500, "pos = {}", pos);
        assert_eq!(engine.state(), TransportState::Playing);
    }

    #[test]
    fn test_mono_fans_out_to_channels() {
        let mut engine = PlaybackEngine::new(ramp_buffer(8192));
        engine.prepare_to_play(SAMPLE_RATE as f64, 256);
        engine.seek(4000);
        engine.play();

        let mut out = vec![0.0f32; 256 * 2];
        engine.process(&mut out, 2);

        for frame in out.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
        // Interior of the ramp is non-zero
        assert!(out[100] != 0.0);
    }

    #[test]
    fn test_gain_applied() {
        let buffer = Arc::new(WaveformBuffer::from_samples(vec![0.5f32; 8192]));
        let mut engine = PlaybackEngine::new(buffer);
        engine.prepare_to_play(SAMPLE_RATE as f64, 256);
        engine.set_gain(0.5);
        engine.seek(100);
        engine.play();

        let mut out = vec![0.0f32; 256];
        engine.process(&mut out, 1);
        // After the interpolator settles the value is 0.5 * 0.5
        assert!((out[100] - 0.25).abs() < 1e-3, "out[100] = {}", out[100]);
    }

    #[test]
    fn test_rate_conversion_ratio() {
        let mut engine = PlaybackEngine::new(ramp_buffer(50000));
        // Device runs at twice the internal rate: half a source sample
        // per device sample.
        engine.prepare_to_play(SAMPLE_RATE as f64 * 2.0, 512);
        engine.play();

        let mut out = vec![0.0f32; 512];
        engine.process(&mut out, 1);
        assert_eq!(engine.position(), 256);
    }

    #[test]
    fn test_position_updates_coalesce() {
        let mut engine = PlaybackEngine::new(ramp_buffer(50000));
        engine.prepare_to_play(SAMPLE_RATE as f64, 512);
        engine.play();

        let rx = engine.position_updates();
        let mut out = vec![0.0f32; 512];

        // Three blocks without acknowledgement: exactly one update
        engine.process(&mut out, 1);
        engine.process(&mut out, 1);
        engine.process(&mut out, 1);
        assert_eq!(rx.try_iter().count(), 1);

        engine.acknowledge_position_update();
        engine.process(&mut out, 1);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_splice_clamps_and_counts() {
        let buffer = WaveformBuffer::from_samples(vec![0.0f32; 100]);
        let written = buffer.splice(90, &[1.0f32; 20]);
        assert_eq!(written, 10);
        buffer.with_samples(|s| {
            assert_eq!(s[89], 0.0);
            assert_eq!(s[90], 1.0);
            assert_eq!(s[99], 1.0);
        });
    }

    #[test]
    fn test_generation_bumps() {
        let buffer = WaveformBuffer::from_samples(vec![0.0f32; 10]);
        let g0 = buffer.generation();
        buffer.splice(0, &[1.0]);
        assert!(buffer.generation() > g0);
    }

    #[test]
    fn test_interpolator_exact_on_integer_positions() {
        let mut interp = LagrangeInterpolator::new();
        for s in [1.0f32, 2.0, 3.0, 4.0] {
            interp.push(s);
        }
        // t = 0 lands exactly on the second history sample
        assert!((interp.interpolate(0.0) - 2.0).abs() < 1e-6);
        // Linear data interpolates linearly
        assert!((interp.interpolate(0.5) - 2.5).abs() < 1e-5);
    }
}
