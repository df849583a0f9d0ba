// benches/separator_benchmarks.rs — host reference vs GPU separator.
//
//   cargo bench --bench separator_benchmarks
//
// CRITERION + GPU CAVEATS
// ────────────────────────
// Criterion measures wall time including upload, submit, poll and readback.
// That is the number that matters to callers: a filtered frame is only
// useful once it is back on the host. The first iterations pay pipeline
// compilation on some drivers, so warm-up is set explicitly.
//
// GPU benchmarks are skipped when no Vulkan adapter can be acquired.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use gpu_separator::image::Image;
use gpu_separator::sort::HostSeparator;
use gpu_separator::stack::stack_frames;
use gpu_separator::Separator;

fn random_image(rows: usize, cols: usize, seed: u64) -> Image<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Image::from_fn(rows, cols, |_, _| rng.gen::<f32>())
}

// ============================================================
// Single array: sort and filter, both axes
// ============================================================

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");
    group.warm_up_time(Duration::from_secs(2));

    for &(rows, cols) in &[(128usize, 256usize), (100, 1000), (512, 512)] {
        let img = random_image(rows, cols, 1);
        let label = format!("{rows}x{cols}");

        let host = HostSeparator::new(rows, cols).expect("valid shape");
        group.bench_with_input(BenchmarkId::new("cpu_vertical", &label), &img, |b, img| {
            b.iter(|| host.filter_vertical(img).expect("shape"))
        });

        let Ok(mut sep) = Separator::new(rows, cols, false) else {
            eprintln!("no Vulkan adapter; skipping GPU benchmarks for {label}");
            continue;
        };
        group.bench_with_input(BenchmarkId::new("gpu_vertical", &label), &img, |b, img| {
            b.iter(|| sep.filter_vertical(img).expect("shape").get().expect("readback"))
        });
        group.bench_with_input(BenchmarkId::new("gpu_horizontal", &label), &img, |b, img| {
            b.iter(|| sep.filter_horizontal(img).expect("shape").get().expect("readback"))
        });
        group.bench_with_input(BenchmarkId::new("gpu_sort_vertical", &label), &img, |b, img| {
            b.iter(|| sep.sort_vertical(img).expect("shape").get().expect("readback"))
        });
    }

    group.finish();
}

// ============================================================
// Frame stack: per-pixel median of N detector frames
// ============================================================

fn bench_frame_stack(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_stack");
    group.warm_up_time(Duration::from_secs(2));
    group.sample_size(20);

    let (h, w) = (256usize, 256usize);
    for &n in &[9usize, 32] {
        let mut rng = StdRng::seed_from_u64(n as u64);
        let frames: Vec<Image<u16>> = (0..n)
            .map(|_| Image::from_fn(h, w, |_, _| rng.gen_range(900u16..1100)))
            .collect();
        let stacked = stack_frames(&frames).expect("same shape");

        let host = HostSeparator::new(n, h * w).expect("valid shape");
        group.bench_function(BenchmarkId::new("cpu", n), |b| {
            b.iter(|| host.filter_vertical(&stacked).expect("shape"))
        });

        let Ok(mut sep) = Separator::new(n, h * w, false) else {
            continue;
        };
        group.bench_function(BenchmarkId::new("gpu", n), |b| {
            b.iter(|| sep.filter_vertical(&stacked).expect("shape").get().expect("readback"))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_filter, bench_frame_stack);
criterion_main!(benches);
