use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use pcbalign::affine::{fit_affine_ransac, AffineTransform, RansacAffineConfig};
use pcbalign::vias::{match_points, refine_affine, MatcherConfig, RefinerConfig};

fn make_via_sets(cols: usize, rows: usize, outliers: usize) -> (Vec<[f64; 2]>, Vec<[f64; 2]>, AffineTransform) {
    let mut rng = StdRng::seed_from_u64(12345);
    let mut front = Vec::with_capacity(cols * rows);
    for j in 0..rows {
        for i in 0..cols {
            front.push([
                80.0 + 70.0 * i as f64 + rng.gen_range(-12.0..12.0),
                80.0 + 70.0 * j as f64 + rng.gen_range(-12.0..12.0),
            ]);
        }
    }
    let truth = AffineTransform::translation(14.0, -6.0)
        .compose(&AffineTransform::scaling(1.002, 0.998))
        .compose(&AffineTransform::rotation_deg(1.2));
    let mut back = truth.apply_all(&front);
    for _ in 0..outliers {
        back.push([rng.gen_range(0.0..2000.0), rng.gen_range(0.0..1500.0)]);
    }
    (front, back, truth)
}

fn bench_ransac(c: &mut Criterion) {
    let (front, back, _) = make_via_sets(20, 12, 0);
    let mut src = back.clone();
    let mut dst = front.clone();
    let mut rng = StdRng::seed_from_u64(7);
    // 15% corrupted pairs.
    for _ in 0..36 {
        let i = rng.gen_range(0..src.len());
        dst[i] = [rng.gen_range(0.0..1500.0), rng.gen_range(0.0..900.0)];
    }
    src.truncate(dst.len());
    let cfg = RansacAffineConfig::default();

    c.bench_function("ransac_affine_240pairs", |b| {
        b.iter(|| {
            let fit = fit_affine_ransac(black_box(&src), black_box(&dst), black_box(&cfg))
                .expect("deterministic fixture should always fit");
            black_box(fit.n_inliers())
        })
    });
}

fn bench_corner_voting(c: &mut Criterion) {
    let (front, back, _) = make_via_sets(20, 12, 30);
    let cfg = MatcherConfig::default();
    c.bench_function("corner_voting_240vias", |b| {
        b.iter(|| {
            let pairs = match_points(black_box(&front), black_box(&back), None, black_box(&cfg));
            black_box(pairs.len())
        })
    });
}

fn bench_refine(c: &mut Criterion) {
    let (front, back, truth) = make_via_sets(20, 12, 0);
    let init = truth
        .invert()
        .expect("fixture transform is invertible")
        .compose(&AffineTransform::translation(1.5, -1.0));
    let cfg = RefinerConfig::default();
    c.bench_function("refine_affine_240vias", |b| {
        b.iter(|| {
            let out = refine_affine(black_box(&front), black_box(&back), black_box(&init), black_box(&cfg));
            black_box(out.value().passes)
        })
    });
}

criterion_group!(hotpaths, bench_ransac, bench_corner_voting, bench_refine);
criterion_main!(hotpaths);
