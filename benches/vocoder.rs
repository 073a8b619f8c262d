//! Benchmark for vocoder synthesis

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array2;
use retune::vocoder::{Vocoder, VocoderConfig};
use retune::N_MELS;

fn bench_fallback_synthesis(c: &mut Criterion) {
    let vocoder = Vocoder::fallback(VocoderConfig::default());

    // ~1.2 seconds of frames
    let frames = 100;
    let mel = Array2::from_elem((N_MELS, frames), -2.0f32);
    let f0 = vec![220.0f32; frames];

    c.bench_function("vocoder_fallback_100_frames", |b| {
        b.iter(|| vocoder.infer(black_box(&mel), black_box(&f0)))
    });

    // Short incremental-synthesis sized slice
    let short_frames = 20;
    let short_mel = Array2::from_elem((N_MELS, short_frames), -2.0f32);
    let short_f0 = vec![220.0f32; short_frames];

    c.bench_function("vocoder_fallback_20_frames", |b| {
        b.iter(|| vocoder.infer(black_box(&short_mel), black_box(&short_f0)))
    });
}

criterion_group!(benches, bench_fallback_synthesis);
criterion_main!(benches);
