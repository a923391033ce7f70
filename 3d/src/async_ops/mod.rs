//! Async Reconstruction
//!
//! Room reconstruction runs on tokio's blocking pool so captures are never
//! held up by it. Each job works on its own snapshot of the global cloud;
//! submitting a new job cancels the one still in flight.

use crate::mesh::reconstruction::{ReconstructionConfig, RoomMeshOutcome, SurfaceReconstructor};
use arc_core::{Error, PointCloud, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Handle to a submitted reconstruction.
pub struct ReconstructionJob {
    handle: JoinHandle<Result<RoomMeshOutcome>>,
    cancel: Arc<AtomicBool>,
}

impl ReconstructionJob {
    /// Request cancellation; the solver stops at its next iteration.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Wait for the job. A cancelled job resolves to `Error::Cancelled`.
    pub async fn wait(self) -> Result<RoomMeshOutcome> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(Error::RuntimeError(format!("Async task error: {}", e))),
        }
    }
}

/// Background room reconstruction with latest-request-wins semantics.
pub struct ReconstructionWorker {
    reconstructor: Arc<SurfaceReconstructor>,
    in_flight: Mutex<Option<Arc<AtomicBool>>>,
}

impl ReconstructionWorker {
    pub fn new(config: ReconstructionConfig) -> Self {
        Self {
            reconstructor: Arc::new(SurfaceReconstructor::new(config)),
            in_flight: Mutex::new(None),
        }
    }

    /// The reconstructor jobs run; also usable synchronously.
    pub fn reconstructor(&self) -> &SurfaceReconstructor {
        &self.reconstructor
    }

    /// Start reconstructing `snapshot` on the blocking pool.
    ///
    /// Must be called from within a tokio runtime. Any earlier job that has
    /// not finished is cancelled.
    pub fn submit(&self, wall_count: usize, snapshot: PointCloud) -> Result<ReconstructionJob> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::RuntimeError(format!("No tokio runtime: {}", e)))?;

        let cancel = Arc::new(AtomicBool::new(false));
        if let Some(previous) = self.in_flight.lock().replace(cancel.clone()) {
            if !previous.swap(true, Ordering::Relaxed) {
                debug!("Cancelled previous reconstruction");
            }
        }

        info!(walls = wall_count, points = snapshot.len(), "Starting background reconstruction");
        let reconstructor = self.reconstructor.clone();
        let flag = cancel.clone();
        let handle = runtime.spawn_blocking(move || {
            reconstructor.reconstruct_room(wall_count, &snapshot, Some(&flag))
        });

        Ok(ReconstructionJob { handle, cancel })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn walls() -> PointCloud {
        let mut points = Vec::new();
        for a in 0..30 {
            for b in 0..30 {
                let (u, v) = (a as f32 * 20.0, b as f32 * 20.0);
                points.push(Point3::new(u, v, 600.0));
                points.push(Point3::new(0.0, v, u));
            }
        }
        PointCloud::new(points)
    }

    fn config() -> ReconstructionConfig {
        ReconstructionConfig {
            octree_depth: 5,
            normal_neighbors: 12,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_background_reconstruction() {
        let worker = ReconstructionWorker::new(config());
        let job = worker.submit(2, walls()).unwrap();
        let outcome = job.wait().await.unwrap();
        assert!(outcome.mesh().is_some_and(|m| m.num_faces() > 0));
    }

    #[tokio::test]
    async fn test_new_request_cancels_previous() {
        let worker = ReconstructionWorker::new(config());
        let first = worker.submit(2, walls()).unwrap();
        let second = worker.submit(2, walls()).unwrap();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        // the first job either finished before noticing or was cancelled
        match first.wait().await {
            Ok(outcome) => assert!(outcome.mesh().is_some()),
            Err(e) => assert!(matches!(e, Error::Cancelled)),
        }
        assert!(second.wait().await.unwrap().mesh().is_some());
    }

    #[tokio::test]
    async fn test_insufficient_walls_in_background() {
        let worker = ReconstructionWorker::new(config());
        let outcome = worker.submit(1, walls()).unwrap().wait().await.unwrap();
        assert!(matches!(outcome, RoomMeshOutcome::InsufficientData(_)));
    }

    #[test]
    fn test_submit_without_runtime() {
        let worker = ReconstructionWorker::new(config());
        assert!(worker.submit(2, walls()).is_err());
    }
}
