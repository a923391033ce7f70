//! Scanning session.
//!
//! Ties the collaborators together: every frame is run through the dual
//! detector; sampled frames additionally get depth, back-projection and wall
//! plane extraction. Captures are serialized through the stitcher lock, and
//! room meshes are built from a snapshot of the global cloud so they never
//! observe a half-merged wall.

use crate::config::ScannerConfig;
use crate::stitching::{RegistrationOutcome, WallScan, WallStitcher};
use crate::Result;
use arc_3d::{ReconstructionJob, ReconstructionWorker, RoomMeshOutcome};
use arc_core::{back_project, DepthMap, Plane, PointCloud};
use arc_objdetect::{Detector, DualDetectionService, FusedDetections};
use arc_point_cloud::{extract_wall_plane, PlaneExtraction};
use image::RgbImage;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Monocular depth model.
///
/// Returns depth with the image's dimensions, normalized to `[0, 1]`
/// (see [`DepthMap::normalized`]).
pub trait DepthEstimator: Send + Sync {
    fn estimate(&self, image: &RgbImage) -> arc_core::Result<DepthMap>;
}

/// Everything computed for one frame.
#[derive(Debug, Clone)]
pub struct FrameResult {
    pub frame_id: u64,
    pub image: RgbImage,
    pub detections: FusedDetections,
    pub depth_map: Option<DepthMap>,
    /// Wall inliers, present only when a plane was found.
    pub point_cloud: Option<PointCloud>,
    pub plane: Option<Plane>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// The frame carried no (or an empty) wall point cloud; nothing was added.
    NoPointCloud,
    Added {
        wall_index: usize,
        registration: RegistrationOutcome,
    },
}

pub struct ArcScanner {
    config: ScannerConfig,
    detection: DualDetectionService,
    depth: Arc<dyn DepthEstimator>,
    frame_count: AtomicU64,
    stitcher: Mutex<WallStitcher>,
    reconstruction: ReconstructionWorker,
}

impl ArcScanner {
    pub fn new(
        config: ScannerConfig,
        depth: Arc<dyn DepthEstimator>,
        general_detector: Arc<dyn Detector>,
        wall_detector: Option<Arc<dyn Detector>>,
    ) -> Self {
        let mut detection = DualDetectionService::new(general_detector);
        if let Some(wall) = wall_detector {
            detection = detection.with_wall_detector(wall);
        }
        let detection = detection.with_config(config.detector.clone(), config.fusion.clone());

        info!(
            wall_detector = detection.has_wall_detector(),
            sampling = ?config.sampling,
            "Scanner initialized"
        );
        Self {
            detection,
            depth,
            frame_count: AtomicU64::new(0),
            stitcher: Mutex::new(WallStitcher::new(config.stitcher.clone())),
            reconstruction: ReconstructionWorker::new(config.reconstruction.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub fn wall_count(&self) -> usize {
        self.stitcher.lock().wall_count()
    }

    pub fn global_point_count(&self) -> usize {
        self.stitcher.lock().global_cloud().len()
    }

    /// Read access to the wall history and global cloud.
    pub fn with_stitcher<R>(&self, f: impl FnOnce(&WallStitcher) -> R) -> R {
        f(&self.stitcher.lock())
    }

    /// Run detection on `image` and, on sampled frames, the geometry path.
    ///
    /// A collaborator failure is logged and returned; the caller drops the
    /// frame and carries on.
    pub fn process_frame(&self, image: &RgbImage) -> Result<FrameResult> {
        let frame_id = self.frame_count.fetch_add(1, Ordering::Relaxed) + 1;

        let detections = self.detection.detect(image).map_err(|e| {
            warn!(frame = frame_id, error = %e, "Detection failed, skipping frame");
            e
        })?;

        let mut result = FrameResult {
            frame_id,
            image: image.clone(),
            detections,
            depth_map: None,
            point_cloud: None,
            plane: None,
        };

        if !self.config.sampling.should_process(frame_id) {
            debug!(frame = frame_id, "Depth skipped by sampling policy");
            return Ok(result);
        }

        let depth = self.depth.estimate(image).map_err(|e| {
            warn!(frame = frame_id, error = %e, "Depth estimation failed, skipping frame");
            e
        })?;
        let cloud = back_project(&depth, Some(image), &self.config.back_projection)?;
        result.depth_map = Some(depth);

        match extract_wall_plane(&cloud, &self.config.plane) {
            PlaneExtraction::Found { inliers, plane, .. } => {
                debug!(frame = frame_id, points = inliers.len(), "Wall candidate");
                result.point_cloud = Some(inliers);
                result.plane = Some(plane);
            }
            PlaneExtraction::NoPlane(reason) => {
                debug!(frame = frame_id, ?reason, "No wall in frame");
            }
        }
        Ok(result)
    }

    /// Store the frame's wall and stitch it into the room.
    pub fn capture_wall(&self, frame: &FrameResult) -> CaptureOutcome {
        let Some(cloud) = frame.point_cloud.as_ref().filter(|c| !c.is_empty()) else {
            info!(frame = frame.frame_id, "No point cloud available, capture ignored");
            return CaptureOutcome::NoPointCloud;
        };

        let scan = WallScan::new(
            frame.frame_id,
            frame.image.clone(),
            frame.depth_map.clone(),
            cloud.clone(),
            frame.detections.clone(),
            frame.plane,
        );

        let mut stitcher = self.stitcher.lock();
        let registration = stitcher.add_wall(scan);
        let wall_index = stitcher.wall_count() - 1;
        info!(walls = stitcher.wall_count(), "Wall saved");
        CaptureOutcome::Added {
            wall_index,
            registration,
        }
    }

    fn snapshot(&self) -> (usize, PointCloud) {
        let stitcher = self.stitcher.lock();
        (stitcher.wall_count(), stitcher.global_cloud().snapshot())
    }

    /// Reconstruct the room on the calling thread.
    pub fn generate_room_mesh(&self) -> Result<RoomMeshOutcome> {
        let (walls, cloud) = self.snapshot();
        Ok(self
            .reconstruction
            .reconstructor()
            .reconstruct_room(walls, &cloud, None)?)
    }

    /// Reconstruct on tokio's blocking pool, cancelling any earlier request.
    pub fn spawn_room_mesh(&self) -> Result<ReconstructionJob> {
        let (walls, cloud) = self.snapshot();
        Ok(self.reconstruction.submit(walls, cloud)?)
    }

    /// Generate the room mesh and write it as PLY when one was produced.
    pub fn export_room_model<P: AsRef<Path>>(&self, path: P) -> Result<RoomMeshOutcome> {
        let outcome = self.generate_room_mesh()?;
        match &outcome {
            RoomMeshOutcome::Mesh(mesh) => {
                arc_io::save_ply_mesh(path.as_ref(), mesh)?;
                info!(path = %path.as_ref().display(), faces = mesh.num_faces(), "Room model saved");
            }
            RoomMeshOutcome::InsufficientData(reason) => {
                info!(%reason, "Room model not generated");
            }
        }
        Ok(outcome)
    }

    /// Write the accumulated global cloud as PLY.
    pub fn export_global_cloud<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let (_, cloud) = self.snapshot();
        arc_io::save_ply(path, &cloud)?;
        Ok(())
    }
}
