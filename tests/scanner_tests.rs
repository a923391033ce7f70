use arc_3d::RoomMeshOutcome;
use arc_core::{DepthMap, PointCloud};
use arc_objdetect::{BoundingBox, DetectionError, Detector, NoDetector, RawDetection};
use arc_scan::{
    ArcScanner, CaptureOutcome, DepthEstimator, RegistrationOutcome, SamplingPolicy, ScanError,
    ScannerConfig,
};
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const W: u32 = 160;
const H: u32 = 120;
const FX: f32 = 525.0;

/// Alternates between a fronto-parallel wall at 0.8 and one turned 45°.
struct AlternatingWalls {
    calls: AtomicUsize,
}

impl AlternatingWalls {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl DepthEstimator for AlternatingWalls {
    fn estimate(&self, image: &RgbImage) -> arc_core::Result<DepthMap> {
        let slope = if self.calls.fetch_add(1, Ordering::Relaxed) % 2 == 0 { 0.0 } else { 1.0 };
        let cx = image.width() as f32 / 2.0;
        // Plane z - slope * x = 0.8 seen through the pinhole.
        Ok(DepthMap::from_fn(image.width(), image.height(), |u, _| {
            0.8 / (1.0 - slope * (u as f32 - cx) / FX)
        }))
    }
}

/// Depth with nothing in range.
struct EmptyDepth;

impl DepthEstimator for EmptyDepth {
    fn estimate(&self, image: &RgbImage) -> arc_core::Result<DepthMap> {
        Ok(DepthMap::from_fn(image.width(), image.height(), |_, _| 0.0))
    }
}

struct OneBox(&'static str, f32);

impl Detector for OneBox {
    fn detect(&self, _image: &RgbImage, threshold: f32) -> arc_objdetect::Result<Vec<RawDetection>> {
        let det = RawDetection::new(self.0, self.1, BoundingBox::new(20.0, 20.0, 60.0, 50.0));
        Ok(if det.confidence >= threshold { vec![det] } else { Vec::new() })
    }
}

struct Broken;

impl Detector for Broken {
    fn detect(&self, _image: &RgbImage, _threshold: f32) -> arc_objdetect::Result<Vec<RawDetection>> {
        Err(DetectionError::InferenceError("device lost".into()))
    }
}

fn frame() -> RgbImage {
    RgbImage::from_pixel(W, H, Rgb([200, 150, 100]))
}

fn test_config() -> ScannerConfig {
    let mut config = ScannerConfig::default();
    config.plane.seed = Some(42);
    config.reconstruction.voxel_size = 20.0;
    config.reconstruction.octree_depth = 5;
    config.reconstruction.normal_neighbors = 12;
    // Keep the two test walls in their own camera frames.
    config.stitcher.min_registration_points = usize::MAX;
    config
}

fn scanner(config: ScannerConfig) -> ArcScanner {
    ArcScanner::new(
        config,
        Arc::new(AlternatingWalls::new()),
        Arc::new(OneBox("chair", 0.8)),
        Some(Arc::new(OneBox("wall_socket", 0.6))),
    )
}

#[test]
fn test_sampling_policy_gates_depth() {
    let scanner = scanner(test_config());
    let results: Vec<_> = (0..6).map(|_| scanner.process_frame(&frame()).unwrap()).collect();

    let with_depth: Vec<u64> = results
        .iter()
        .filter(|r| r.depth_map.is_some())
        .map(|r| r.frame_id)
        .collect();
    assert_eq!(with_depth, [3, 6]);

    // Detection runs on every frame.
    assert!(results.iter().all(|r| r.detections.total == 1));
    assert!(results.iter().all(|r| r.detections.all[0].class_label == "chair"));
    assert_eq!(scanner.frame_count(), 6);
}

#[test]
fn test_sampled_frame_finds_wall() {
    let mut config = test_config();
    config.sampling = SamplingPolicy::EveryFrame;
    let scanner = scanner(config);
    let result = scanner.process_frame(&frame()).unwrap();

    let cloud = result.point_cloud.as_ref().unwrap();
    assert!(cloud.len() > 100);
    assert!(cloud.has_colors());
    let plane = result.plane.unwrap();
    assert!(plane.c.abs() > 0.99);
    assert!(cloud.points.iter().all(|p| (p.z - 800.0).abs() < 1.0));
}

#[test]
fn test_capture_without_point_cloud_is_ignored() {
    let scanner = scanner(test_config());
    let first = scanner.process_frame(&frame()).unwrap();
    assert!(first.point_cloud.is_none());

    assert_eq!(scanner.capture_wall(&first), CaptureOutcome::NoPointCloud);
    assert_eq!(scanner.wall_count(), 0);
    assert_eq!(scanner.global_point_count(), 0);
}

#[test]
fn test_capture_with_empty_point_cloud_is_ignored() {
    let scanner = scanner(test_config());
    let mut result = scanner.process_frame(&frame()).unwrap();
    result.point_cloud = Some(PointCloud::new(Vec::new()));

    assert_eq!(scanner.capture_wall(&result), CaptureOutcome::NoPointCloud);
    assert_eq!(scanner.wall_count(), 0);
    assert_eq!(scanner.global_point_count(), 0);
}

#[test]
fn test_no_valid_depth_means_no_wall() {
    let mut config = test_config();
    config.sampling = SamplingPolicy::EveryFrame;
    let scanner = ArcScanner::new(config, Arc::new(EmptyDepth), Arc::new(NoDetector), None);

    let result = scanner.process_frame(&frame()).unwrap();
    assert!(result.depth_map.is_some());
    assert!(result.point_cloud.is_none());
    assert!(result.plane.is_none());
    assert_eq!(result.detections.total, 0);
}

#[test]
fn test_detector_failure_skips_frame() {
    let scanner = ArcScanner::new(
        test_config(),
        Arc::new(AlternatingWalls::new()),
        Arc::new(Broken),
        None,
    );
    assert!(matches!(
        scanner.process_frame(&frame()),
        Err(ScanError::Detection(DetectionError::InferenceError(_)))
    ));
    assert_eq!(scanner.frame_count(), 1);
}

#[test]
fn test_capture_and_room_model_export() {
    let mut config = test_config();
    config.sampling = SamplingPolicy::EveryFrame;
    let scanner = scanner(config);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("room_model.ply");

    let first = scanner.process_frame(&frame()).unwrap();
    match scanner.capture_wall(&first) {
        CaptureOutcome::Added { wall_index, registration } => {
            assert_eq!(wall_index, 0);
            assert_eq!(registration, RegistrationOutcome::Origin);
        }
        other => panic!("unexpected {other:?}"),
    }
    scanner.with_stitcher(|s| {
        assert_eq!(s.walls()[0].detections().total, 1);
        assert_eq!(s.walls()[0].frame_id(), 1);
    });

    let outcome = scanner.export_room_model(&path).unwrap();
    assert!(matches!(outcome, RoomMeshOutcome::InsufficientData(_)));
    assert!(!path.exists());

    let second = scanner.process_frame(&frame()).unwrap();
    assert!(matches!(
        scanner.capture_wall(&second),
        CaptureOutcome::Added { wall_index: 1, .. }
    ));

    let mesh = scanner.export_room_model(&path).unwrap().into_mesh().unwrap();
    assert!(mesh.num_faces() > 0);

    let loaded = arc_io::load_ply_mesh(&path).unwrap();
    assert_eq!(loaded.num_faces(), mesh.num_faces());
    assert_eq!(loaded.num_vertices(), mesh.num_vertices());
    assert!(loaded.colors.is_some());
}

#[test]
fn test_global_cloud_export() {
    let mut config = test_config();
    config.sampling = SamplingPolicy::EveryFrame;
    let scanner = scanner(config);
    let result = scanner.process_frame(&frame()).unwrap();
    scanner.capture_wall(&result);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("global.ply");
    scanner.export_global_cloud(&path).unwrap();

    let cloud = arc_io::load_ply(&path).unwrap();
    assert_eq!(cloud.len(), scanner.global_point_count());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_background_room_mesh() {
    let mut config = test_config();
    config.sampling = SamplingPolicy::EveryFrame;
    let scanner = scanner(config);
    for _ in 0..2 {
        let result = scanner.process_frame(&frame()).unwrap();
        scanner.capture_wall(&result);
    }

    let job = scanner.spawn_room_mesh().unwrap();
    // Captures may continue while the job runs on its own snapshot.
    let third = scanner.process_frame(&frame()).unwrap();
    scanner.capture_wall(&third);

    let outcome = job.wait().await.unwrap();
    assert!(outcome.mesh().is_some_and(|m| m.num_faces() > 0));
    assert_eq!(scanner.wall_count(), 3);
}

#[test]
fn test_config_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scanner.json");
    let config = test_config();
    config.save(&path).unwrap();

    let loaded = ScannerConfig::load(&path).unwrap();
    assert_eq!(loaded.plane.seed, Some(42));
    assert_eq!(loaded.reconstruction.voxel_size, 20.0);
    assert_eq!(loaded.sampling, SamplingPolicy::EveryNth(3));

    assert!(matches!(
        ScannerConfig::load(dir.path().join("missing.json")),
        Err(ScanError::Io(_))
    ));
}

#[test]
fn test_thread_pool_init_reports_first_outcome() {
    let first = arc_scan::init_thread_pool(Some(2)).map_err(|e| e.to_string());
    let second = arc_scan::init_thread_pool(None).map_err(|e| e.to_string());
    assert_eq!(first, second);
}
