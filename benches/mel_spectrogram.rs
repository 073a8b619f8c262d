//! Benchmark for mel-spectrogram computation

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use retune::audio::{mel_spectrogram, AudioConfig};

fn bench_mel_spectrogram(c: &mut Criterion) {
    let config = AudioConfig::default();

    // 1 second of audio
    let num_samples = config.sample_rate as usize;
    let signal: Vec<f32> = (0..num_samples).map(|i| (i as f32 * 0.01).sin()).collect();

    c.bench_function("mel_spectrogram_1s", |b| {
        b.iter(|| mel_spectrogram(black_box(&signal), black_box(&config)))
    });

    // 10 seconds of audio
    let long_signal: Vec<f32> = (0..num_samples * 10)
        .map(|i| (i as f32 * 0.01).sin())
        .collect();

    c.bench_function("mel_spectrogram_10s", |b| {
        b.iter(|| mel_spectrogram(black_box(&long_signal), black_box(&config)))
    });
}

fn bench_f0_yin(c: &mut Criterion) {
    use retune::f0::{extract_yin, YinConfig};
    use retune::{frames_for_samples, SAMPLE_RATE};

    let num_samples = SAMPLE_RATE as usize;
    let signal: Vec<f32> = (0..num_samples)
        .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / SAMPLE_RATE as f32).sin())
        .collect();
    let frames = frames_for_samples(signal.len());
    let config = YinConfig::default();

    c.bench_function("yin_1s", |b| {
        b.iter(|| extract_yin(black_box(&signal), SAMPLE_RATE, frames, &config))
    });
}

criterion_group!(benches, bench_mel_spectrogram, bench_f0_yin);
criterion_main!(benches);
