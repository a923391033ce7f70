//! Benchmarks for detection fusion and the geometry path of a capture

use arc_core::{rigid_transform, PointCloud};
use arc_objdetect::{fuse_detections, BoundingBox, DetectionCandidate, DetectionSource};
use arc_point_cloud::voxel_down_sample;
use arc_registration::{registration_icp, IcpConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::{Matrix4, Point3, Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

fn random_candidates(rng: &mut StdRng, n: usize, source: DetectionSource) -> Vec<DetectionCandidate> {
    (0..n)
        .map(|_| {
            let x = rng.gen_range(0.0..600.0);
            let y = rng.gen_range(0.0..440.0);
            let w = rng.gen_range(10.0..120.0);
            let h = rng.gen_range(10.0..120.0);
            DetectionCandidate::new(
                "obj",
                rng.gen_range(0.5..1.0),
                BoundingBox::new(x, y, x + w, y + h),
                source,
            )
        })
        .collect()
}

/// Noisy planar wall with a ledge, `side × side` samples, 20 units apart.
fn wall(rng: &mut StdRng, side: usize) -> PointCloud {
    let mut points = Vec::with_capacity(side * side);
    for i in 0..side {
        for j in 0..side {
            let ledge = if i > side / 2 { 60.0 } else { 0.0 };
            points.push(Point3::new(
                i as f32 * 20.0,
                j as f32 * 20.0,
                1500.0 + ledge + rng.gen_range(-2.0..2.0),
            ));
        }
    }
    PointCloud::new(points)
}

fn benchmark_fusion(c: &mut Criterion) {
    let mut group = c.benchmark_group("detection_fusion");
    let mut rng = StdRng::seed_from_u64(7);

    for n in [10usize, 100, 1000] {
        let wall = random_candidates(&mut rng, n / 2, DetectionSource::WallElement);
        let general = random_candidates(&mut rng, n - n / 2, DetectionSource::GeneralObject);

        group.bench_with_input(BenchmarkId::new("greedy_iou", n), &(wall, general), |b, (w, g)| {
            b.iter(|| fuse_detections(black_box(w.clone()), black_box(g.clone())));
        });
    }

    group.finish();
}

fn benchmark_icp(c: &mut Criterion) {
    let mut group = c.benchmark_group("pairwise_icp");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(20);
    let mut rng = StdRng::seed_from_u64(11);

    let motion = rigid_transform(
        &Rotation3::from_euler_angles(0.01, -0.02, 0.015).into_inner(),
        &Vector3::new(8.0, -5.0, 3.0),
    );

    for side in [30usize, 60, 100] {
        let target = wall(&mut rng, side);
        let source = target.transformed(&motion);

        group.bench_with_input(
            BenchmarkId::new("point_to_point", side * side),
            &(source, target),
            |b, (s, t)| {
                b.iter(|| {
                    registration_icp(black_box(s), black_box(t), &Matrix4::identity(), &IcpConfig::default())
                });
            },
        );
    }

    group.finish();
}

fn benchmark_voxel_down_sample(c: &mut Criterion) {
    let mut group = c.benchmark_group("voxel_down_sample");
    let mut rng = StdRng::seed_from_u64(3);

    for side in [100usize, 300] {
        let cloud = wall(&mut rng, side);
        group.bench_with_input(BenchmarkId::new("voxel_50", side * side), &cloud, |b, pc| {
            b.iter(|| voxel_down_sample(black_box(pc), 50.0));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_fusion,
    benchmark_icp,
    benchmark_voxel_down_sample
);
criterion_main!(benches);
