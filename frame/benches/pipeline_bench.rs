use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use stk_frame::{
    FastAcf, FrameSource, PipelineConfig, SimpleAcf, VecFrames, VecSource, collect_frames, pipeline,
};

fn noise(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 0.1).unwrap();
    (0..n).map(|_| normal.sample(&mut rng)).collect()
}

fn bench_mfcc(c: &mut Criterion) {
    let samples = noise(16000, 1);
    let cfg = PipelineConfig::mfcc();
    c.bench_function("mfcc_1s_16k", |b| {
        b.iter(|| {
            let mut p = pipeline::build(VecSource::new(samples.clone(), 16000), &cfg).unwrap();
            black_box(collect_frames(&mut p).unwrap())
        });
    });
}

fn bench_acf(c: &mut Criterion) {
    let frame = noise(400, 2);
    let mut out = vec![0.0; 400];
    c.bench_function("acf_simple_400", |b| {
        b.iter(|| {
            let src = VecFrames::new(400, vec![frame.clone()]).unwrap();
            let mut acf = SimpleAcf::new(src, false).unwrap();
            black_box(acf.read(&mut out).unwrap())
        });
    });
    c.bench_function("acf_fast_400", |b| {
        b.iter(|| {
            let src = VecFrames::new(400, vec![frame.clone()]).unwrap();
            let mut acf = FastAcf::new(src).unwrap();
            black_box(acf.read(&mut out).unwrap())
        });
    });
}

criterion_group!(benches, bench_mfcc, bench_acf);
criterion_main!(benches);
