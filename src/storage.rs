use crate::{
    alert::AlertEvent,
    config::StorageConfig,
    detection::{AssessedDetection, BoundingBox, DangerTier},
    error::{Result, WildwatchError},
    registry::CameraId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DETECTIONS_FILE: &str = "detections.jsonl";
const ALERTS_FILE: &str = "alerts.jsonl";
const TOP_LABELS: usize = 10;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// One persisted detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub camera_id: CameraId,
    pub frame_id: u64,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub tier: DangerTier,
    pub distance_cm: u32,
    pub recorded_at: DateTime<Utc>,
}

impl DetectionRecord {
    pub fn new(camera_id: CameraId, frame_id: u64, entry: &AssessedDetection) -> Self {
        Self {
            camera_id,
            frame_id,
            label: entry.detection.label.clone(),
            confidence: entry.detection.confidence,
            bbox: entry.detection.bbox,
            tier: entry.assessment.tier,
            distance_cm: entry.assessment.distance_cm,
            recorded_at: Utc::now(),
        }
    }
}

/// Aggregate counts, either over everything the store holds or over the
/// records at or after `since`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionStats {
    pub since: Option<DateTime<Utc>>,
    pub total_detections: u64,
    pub detections_by_tier: HashMap<DangerTier, u64>,
    pub total_alerts: u64,
    /// Most frequent labels, most frequent first
    pub top_labels: Vec<(String, u64)>,
}

/// Outcome of a retention pass over the logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub records_removed: usize,
    pub bytes_freed: u64,
}

/// Persistence collaborator for detections and alerts
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn record_detection(
        &self,
        camera_id: CameraId,
        frame_id: u64,
        detection: &AssessedDetection,
    ) -> Result<()>;

    async fn record_alert(&self, alert: &AlertEvent) -> Result<()>;

    /// Most recent first
    async fn list_recent_alerts(&self, limit: usize) -> Vec<AlertEvent>;

    /// Most recent first, optionally restricted to one camera
    async fn recent_detections(
        &self,
        camera_id: Option<CameraId>,
        limit: usize,
    ) -> Vec<DetectionRecord>;

    /// All-time counters with `None`, otherwise counts from `since` onwards
    async fn statistics(&self, since: Option<DateTime<Utc>>) -> DetectionStats;

    async fn clear_alerts(&self) -> Result<()>;
}

trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for DetectionRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}

impl Timestamped for AlertEvent {
    fn timestamp(&self) -> DateTime<Utc> {
        self.fired_at
    }
}

#[derive(Debug, Default)]
struct Tally {
    total_detections: u64,
    total_alerts: u64,
    by_tier: HashMap<DangerTier, u64>,
    by_label: HashMap<String, u64>,
}

impl Tally {
    fn add_detection(&mut self, record: &DetectionRecord) {
        self.total_detections += 1;
        *self.by_tier.entry(record.tier).or_insert(0) += 1;
        *self.by_label.entry(record.label.to_lowercase()).or_insert(0) += 1;
    }

    fn add_alert(&mut self) {
        self.total_alerts += 1;
    }

    fn to_stats(&self, since: Option<DateTime<Utc>>) -> DetectionStats {
        let mut labels: Vec<(String, u64)> = self
            .by_label
            .iter()
            .map(|(label, count)| (label.clone(), *count))
            .collect();
        labels.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        labels.truncate(TOP_LABELS);

        DetectionStats {
            since,
            total_detections: self.total_detections,
            detections_by_tier: self.by_tier.clone(),
            total_alerts: self.total_alerts,
            top_labels: labels,
        }
    }
}

/// Bounded history plus running counters shared by both stores
#[derive(Debug)]
struct History {
    max_history: usize,
    detections: VecDeque<DetectionRecord>,
    alerts: VecDeque<AlertEvent>,
    tally: Tally,
}

impl History {
    fn new(max_history: usize) -> Self {
        Self {
            max_history: max_history.max(1),
            detections: VecDeque::new(),
            alerts: VecDeque::new(),
            tally: Tally::default(),
        }
    }

    fn push_detection(&mut self, record: DetectionRecord) {
        self.tally.add_detection(&record);
        self.detections.push_back(record);
        while self.detections.len() > self.max_history {
            self.detections.pop_front();
        }
    }

    fn push_alert(&mut self, alert: AlertEvent) {
        self.tally.add_alert();
        self.alerts.push_back(alert);
        while self.alerts.len() > self.max_history {
            self.alerts.pop_front();
        }
    }

    fn recent_alerts(&self, limit: usize) -> Vec<AlertEvent> {
        self.alerts.iter().rev().take(limit).cloned().collect()
    }

    fn recent_detections(&self, camera_id: Option<CameraId>, limit: usize) -> Vec<DetectionRecord> {
        self.detections
            .iter()
            .rev()
            .filter(|record| camera_id.map_or(true, |id| record.camera_id == id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Windowed counts only see the in-memory history
    fn statistics(&self, since: Option<DateTime<Utc>>) -> DetectionStats {
        let Some(since) = since else {
            return self.tally.to_stats(None);
        };

        let mut tally = Tally::default();
        self.detections
            .iter()
            .filter(|record| record.recorded_at >= since)
            .for_each(|record| tally.add_detection(record));
        self.alerts
            .iter()
            .filter(|alert| alert.fired_at >= since)
            .for_each(|_| tally.add_alert());
        tally.to_stats(Some(since))
    }

    fn clear_alerts(&mut self) {
        self.alerts.clear();
        self.tally.total_alerts = 0;
    }
}

/// In-memory store; nothing survives the process
pub struct MemoryEventStore {
    history: RwLock<History>,
}

impl MemoryEventStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: RwLock::new(History::new(max_history)),
        }
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn record_detection(
        &self,
        camera_id: CameraId,
        frame_id: u64,
        detection: &AssessedDetection,
    ) -> Result<()> {
        self.history
            .write()
            .push_detection(DetectionRecord::new(camera_id, frame_id, detection));
        Ok(())
    }

    async fn record_alert(&self, alert: &AlertEvent) -> Result<()> {
        self.history.write().push_alert(alert.clone());
        Ok(())
    }

    async fn list_recent_alerts(&self, limit: usize) -> Vec<AlertEvent> {
        self.history.read().recent_alerts(limit)
    }

    async fn recent_detections(
        &self,
        camera_id: Option<CameraId>,
        limit: usize,
    ) -> Vec<DetectionRecord> {
        self.history.read().recent_detections(camera_id, limit)
    }

    async fn statistics(&self, since: Option<DateTime<Utc>>) -> DetectionStats {
        self.history.read().statistics(since)
    }

    async fn clear_alerts(&self) -> Result<()> {
        self.history.write().clear_alerts();
        Ok(())
    }
}

/// Append-only JSON-lines store under `storage.path`.
///
/// `detections.jsonl` and `alerts.jsonl` each hold one record per line. On
/// open both files are streamed back so that counters and recent history
/// survive a restart; malformed lines are skipped. With `retention_days` set,
/// records older than the window are compacted out of the files on open and
/// then at most once an hour while appending.
pub struct JsonlEventStore {
    directory: PathBuf,
    retention: Option<chrono::Duration>,
    history: RwLock<History>,
    /// Serializes file access; holds the time of the last retention pass
    write_lock: Mutex<Instant>,
}

impl JsonlEventStore {
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let directory = PathBuf::from(&config.path);
        fs::create_dir_all(&directory).await.map_err(|e| {
            WildwatchError::component(
                "event_store",
                &format!("Failed to create {}: {}", directory.display(), e),
            )
        })?;

        let retention = retention_window(config.retention_days);
        let cutoff = retention_cutoff(retention);
        let mut history = History::new(config.max_history);

        let detections = replay_log::<DetectionRecord, _>(
            &directory.join(DETECTIONS_FILE),
            cutoff,
            |record| history.push_detection(record),
        )
        .await?;
        let alerts =
            replay_log::<AlertEvent, _>(&directory.join(ALERTS_FILE), cutoff, |alert| {
                history.push_alert(alert)
            })
            .await?;

        info!(
            "Opened event store at {} ({} detections, {} alerts, {} expired records removed)",
            directory.display(),
            detections.kept,
            alerts.kept,
            detections.discarded + alerts.discarded
        );

        Ok(Self {
            directory,
            retention,
            history: RwLock::new(history),
            write_lock: Mutex::new(Instant::now()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Compact both logs down to the retention window now
    pub async fn run_cleanup(&self) -> Result<CleanupResult> {
        let mut last_cleanup = self.write_lock.lock().await;
        let result = self.compact_locked().await;
        *last_cleanup = Instant::now();
        result
    }

    /// Caller holds `write_lock`
    async fn compact_locked(&self) -> Result<CleanupResult> {
        let Some(cutoff) = retention_cutoff(self.retention) else {
            return Ok(CleanupResult::default());
        };
        debug!("Event log cleanup cutoff: {}", cutoff);

        let detections = replay_log::<DetectionRecord, _>(
            &self.directory.join(DETECTIONS_FILE),
            Some(cutoff),
            |_| {},
        )
        .await?;
        let alerts =
            replay_log::<AlertEvent, _>(&self.directory.join(ALERTS_FILE), Some(cutoff), |_| {})
                .await?;

        Ok(CleanupResult {
            records_removed: detections.discarded + alerts.discarded,
            bytes_freed: detections.bytes_freed + alerts.bytes_freed,
        })
    }

    async fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut last_cleanup = self.write_lock.lock().await;
        if self.retention.is_some() && last_cleanup.elapsed() >= CLEANUP_INTERVAL {
            match self.compact_locked().await {
                Ok(result) => info!(
                    "Scheduled cleanup completed: {} records removed, {} bytes freed",
                    result.records_removed, result.bytes_freed
                ),
                Err(e) => warn!("Scheduled cleanup failed: {}", e),
            }
            *last_cleanup = Instant::now();
        }

        let mut handle = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.directory.join(file))
            .await?;
        handle.write_all(line.as_bytes()).await?;
        handle.flush().await?;
        Ok(())
    }

    /// Stream both logs and count the records from `since` onwards
    async fn window_statistics(&self, since: DateTime<Utc>) -> Result<DetectionStats> {
        let _guard = self.write_lock.lock().await;
        let mut tally = Tally::default();

        replay_log::<DetectionRecord, _>(&self.directory.join(DETECTIONS_FILE), None, |record| {
            if record.recorded_at >= since {
                tally.add_detection(&record);
            }
        })
        .await?;
        replay_log::<AlertEvent, _>(&self.directory.join(ALERTS_FILE), None, |alert| {
            if alert.fired_at >= since {
                tally.add_alert();
            }
        })
        .await?;

        Ok(tally.to_stats(Some(since)))
    }
}

fn retention_window(days: u32) -> Option<chrono::Duration> {
    match days {
        0 => None,
        days => Some(chrono::Duration::days(i64::from(days))),
    }
}

fn retention_cutoff(window: Option<chrono::Duration>) -> Option<DateTime<Utc>> {
    window.and_then(|window| Utc::now().checked_sub_signed(window))
}

#[derive(Debug, Default)]
struct ReplayOutcome {
    kept: usize,
    discarded: usize,
    bytes_freed: u64,
}

/// Stream a log line by line, handing each live record to `visit`.
///
/// With a `cutoff`, records older than it (and malformed lines) are dropped
/// from the file by rewriting it next to the original and renaming it over.
async fn replay_log<T, F>(
    path: &Path,
    cutoff: Option<DateTime<Utc>>,
    mut visit: F,
) -> Result<ReplayOutcome>
where
    T: DeserializeOwned + Timestamped,
    F: FnMut(T),
{
    let file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ReplayOutcome::default()),
        Err(e) => return Err(e.into()),
    };
    let mut lines = BufReader::new(file).lines();

    let compact_path = path.with_extension("jsonl.compact");
    let mut compacted = match cutoff {
        Some(_) => Some(BufWriter::new(fs::File::create(&compact_path).await?)),
        None => None,
    };

    let mut outcome = ReplayOutcome::default();
    let mut line_number = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let line_bytes = line.len() as u64 + 1;

        if line.trim().is_empty() {
            outcome.bytes_freed += line_bytes;
            continue;
        }

        let record: T = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "Skipping malformed line {} in {}: {}",
                    line_number,
                    path.display(),
                    e
                );
                outcome.discarded += 1;
                outcome.bytes_freed += line_bytes;
                continue;
            }
        };

        if cutoff.map_or(false, |cutoff| record.timestamp() < cutoff) {
            outcome.discarded += 1;
            outcome.bytes_freed += line_bytes;
            continue;
        }

        if let Some(writer) = compacted.as_mut() {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        outcome.kept += 1;
        visit(record);
    }

    if let Some(mut writer) = compacted {
        writer.flush().await?;
        drop(writer);
        if outcome.bytes_freed > 0 {
            fs::rename(&compact_path, path).await?;
        } else {
            fs::remove_file(&compact_path).await?;
        }
    }

    debug!(
        "Replayed {} records from {} ({} discarded)",
        outcome.kept,
        path.display(),
        outcome.discarded
    );
    Ok(outcome)
}

#[async_trait]
impl EventStore for JsonlEventStore {
    async fn record_detection(
        &self,
        camera_id: CameraId,
        frame_id: u64,
        detection: &AssessedDetection,
    ) -> Result<()> {
        let record = DetectionRecord::new(camera_id, frame_id, detection);
        self.append(DETECTIONS_FILE, &record).await?;
        self.history.write().push_detection(record);
        Ok(())
    }

    async fn record_alert(&self, alert: &AlertEvent) -> Result<()> {
        self.append(ALERTS_FILE, alert).await?;
        self.history.write().push_alert(alert.clone());
        Ok(())
    }

    async fn list_recent_alerts(&self, limit: usize) -> Vec<AlertEvent> {
        self.history.read().recent_alerts(limit)
    }

    async fn recent_detections(
        &self,
        camera_id: Option<CameraId>,
        limit: usize,
    ) -> Vec<DetectionRecord> {
        self.history.read().recent_detections(camera_id, limit)
    }

    async fn statistics(&self, since: Option<DateTime<Utc>>) -> DetectionStats {
        let Some(since) = since else {
            return self.history.read().statistics(None);
        };

        match self.window_statistics(since).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Failed to scan event logs for statistics: {}", e);
                self.history.read().statistics(Some(since))
            }
        }
    }

    async fn clear_alerts(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        fs::write(self.directory.join(ALERTS_FILE), b"").await?;
        self.history.write().clear_alerts();
        info!("Alert history cleared");
        Ok(())
    }
}
