mod state;
#[cfg(test)]
mod tests;

pub use state::{CameraId, CameraPhase, CameraState};

use crate::camera::{CameraSpec, FrameSourceFactory};
use crate::config::WildwatchConfig;
use crate::error::{RegistryError, Result};
use crate::pipeline::{CameraWorker, PipelineContext, WorkerHandle, WorkerStatus};
use crate::recorder::{RecordingInfo, RecordingSummary};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

/// One table entry. The worker mutex serializes lifecycle operations on the
/// camera; status reads never take it.
struct CameraEntry {
    spec: CameraSpec,
    status: Arc<watch::Sender<WorkerStatus>>,
    worker: Mutex<Option<WorkerHandle>>,
    removed: AtomicBool,
}

impl CameraEntry {
    fn new(spec: CameraSpec) -> Self {
        let (status, _) = watch::channel(WorkerStatus::default());
        Self {
            spec,
            status: Arc::new(status),
            worker: Mutex::new(None),
            removed: AtomicBool::new(false),
        }
    }

    fn state(&self) -> CameraState {
        CameraState::from_status(&self.spec, &self.status.borrow())
    }
}

/// Process-wide table of cameras and their workers
pub struct CameraRegistry {
    config: Arc<WildwatchConfig>,
    context: Arc<PipelineContext>,
    sources: Arc<dyn FrameSourceFactory>,
    cameras: RwLock<HashMap<CameraId, Arc<CameraEntry>>>,
    stop_timeout: Duration,
}

impl CameraRegistry {
    pub fn new(
        config: Arc<WildwatchConfig>,
        context: Arc<PipelineContext>,
        sources: Arc<dyn FrameSourceFactory>,
    ) -> Self {
        let stop_timeout = Duration::from_secs(config.system.stop_timeout_seconds);
        Self {
            config,
            context,
            sources,
            cameras: RwLock::new(HashMap::new()),
            stop_timeout,
        }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    /// Register a camera without starting it
    pub async fn add(&self, id: CameraId) -> std::result::Result<CameraState, RegistryError> {
        let mut cameras = self.cameras.write().await;
        if cameras.contains_key(&id) {
            return Err(RegistryError::AlreadyExists(id));
        }

        let entry = Arc::new(CameraEntry::new(CameraSpec::resolve(&self.config, id)));
        let state = entry.state();
        cameras.insert(id, entry);

        info!("Registered camera {} ({})", id, state.display_name);
        Ok(state)
    }

    /// Detach a camera, stopping it first
    pub async fn remove(&self, id: CameraId) -> Result<()> {
        let entry = self.entry(id).await?;
        let mut worker = entry.worker.lock().await;

        if let Some(handle) = worker.take() {
            self.stop_worker(&entry, handle).await;
        }

        entry.removed.store(true, Ordering::Release);
        self.cameras.write().await.remove(&id);

        info!("Removed camera {}", id);
        Ok(())
    }

    /// Open the camera's source and spawn its worker. Unknown ids are added
    /// first; a running camera is left as is.
    pub async fn start(&self, id: CameraId) -> Result<CameraState> {
        loop {
            let entry = self.entry_or_add(id).await;
            let mut worker = entry.worker.lock().await;

            if entry.removed.load(Ordering::Acquire) {
                debug!("Camera {} was removed during start; re-registering", id);
                continue;
            }

            if let Some(handle) = worker.as_ref() {
                if !handle.is_finished() {
                    debug!("Camera {} is already running", id);
                    return Ok(entry.state());
                }
                warn!("Camera {} worker exited unexpectedly; restarting", id);
                worker.take();
            }

            let mut source = self.sources.create(&entry.spec)?;
            source.open().await?;

            entry.status.send_modify(|status| {
                *status = WorkerStatus {
                    phase: CameraPhase::Running,
                    live: true,
                    ..WorkerStatus::default()
                };
            });

            *worker = Some(CameraWorker::spawn(
                entry.spec.clone(),
                source,
                Arc::clone(&self.context),
                Arc::clone(&entry.status),
            ));

            info!("Started camera {} ({})", id, entry.spec.source);
            return Ok(entry.state());
        }
    }

    /// Stop the camera's worker, closing any recording. Idle cameras are a
    /// no-op.
    pub async fn stop(&self, id: CameraId) -> Result<CameraState> {
        let entry = self.entry(id).await?;
        let mut worker = entry.worker.lock().await;

        match worker.take() {
            Some(handle) => {
                self.stop_worker(&entry, handle).await;
                info!("Stopped camera {}", id);
            }
            None => debug!("Camera {} is not running", id),
        }

        Ok(entry.state())
    }

    pub async fn list(&self) -> Vec<CameraState> {
        let entries: Vec<Arc<CameraEntry>> = self.cameras.read().await.values().cloned().collect();
        let mut states: Vec<CameraState> = entries.iter().map(|entry| entry.state()).collect();
        states.sort_by_key(|state| state.id);
        states
    }

    pub async fn status(&self, id: CameraId) -> std::result::Result<CameraState, RegistryError> {
        Ok(self.entry(id).await?.state())
    }

    /// Watch a camera's status as its worker updates it
    pub async fn watch_status(
        &self,
        id: CameraId,
    ) -> std::result::Result<watch::Receiver<WorkerStatus>, RegistryError> {
        Ok(self.entry(id).await?.status.subscribe())
    }

    /// Fails with `CameraNotActive` unless the camera is running
    pub async fn start_recording(&self, id: CameraId) -> Result<RecordingInfo> {
        let entry = self.entry(id).await?;
        let worker = entry.worker.lock().await;

        match worker.as_ref() {
            Some(handle) => handle.start_recording().await,
            None => Err(RegistryError::CameraNotActive(id).into()),
        }
    }

    /// `None` when nothing was recording, including on idle cameras
    pub async fn stop_recording(&self, id: CameraId) -> Result<Option<RecordingSummary>> {
        let entry = self.entry(id).await?;
        let worker = entry.worker.lock().await;

        match worker.as_ref() {
            Some(handle) => handle.stop_recording().await,
            None => Ok(None),
        }
    }

    /// Stop every camera
    pub async fn shutdown(&self) {
        let entries: Vec<Arc<CameraEntry>> = self.cameras.read().await.values().cloned().collect();

        let stops = entries.iter().map(|entry| async move {
            let mut worker = entry.worker.lock().await;
            if let Some(handle) = worker.take() {
                self.stop_worker(entry, handle).await;
            }
        });
        futures::future::join_all(stops).await;

        info!("All cameras stopped");
    }

    pub async fn len(&self) -> usize {
        self.cameras.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cameras.read().await.is_empty()
    }

    async fn stop_worker(&self, entry: &CameraEntry, handle: WorkerHandle) {
        entry
            .status
            .send_modify(|status| status.phase = CameraPhase::Stopping);

        handle.stop(self.stop_timeout).await;

        entry.status.send_modify(|status| {
            status.phase = CameraPhase::Idle;
            status.live = false;
            status.recording = None;
        });
    }

    async fn entry(&self, id: CameraId) -> std::result::Result<Arc<CameraEntry>, RegistryError> {
        self.cameras
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnknownCamera(id))
    }

    async fn entry_or_add(&self, id: CameraId) -> Arc<CameraEntry> {
        let mut cameras = self.cameras.write().await;
        Arc::clone(cameras.entry(id).or_insert_with(|| {
            info!("Registering camera {} on start", id);
            Arc::new(CameraEntry::new(CameraSpec::resolve(&self.config, id)))
        }))
    }
}
