//! Scan job queue.
//!
//! Jobs are queued on two channels and drained by a single worker task, high
//! priority first, so at most one scan runs at any time. Every run shares one
//! broadcast channel for progress events.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc, RwLock},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ScanConfig;
use crate::metrics::Metrics;
use crate::providers::ProviderKind;
use crate::scanner::{ScanError, Scanner};
use crate::types::{FailureReason, ScanEvent, ScanFailure, ScanMode, ScanRequest, ScanStatistics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// Snapshot of a queued, running or past scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanJob {
    pub id: Uuid,
    pub request: ScanRequest,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub enqueued_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub stats: Option<ScanStatistics>,
    pub error: Option<ScanFailure>,
}

struct Entry {
    job: ScanJob,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Jobs {
    entries: HashMap<Uuid, Entry>,
    /// Submission order, oldest first.
    order: VecDeque<Uuid>,
}

impl Jobs {
    /// Drops the oldest finished jobs beyond `limit`. Live jobs are never dropped.
    fn prune(&mut self, limit: usize) {
        while self.entries.len() > limit {
            let entries = &self.entries;
            let Some(pos) = self.order.iter().position(|id| entries.get(id).is_some_and(|e| e.job.status.is_final()))
            else {
                break;
            };
            if let Some(id) = self.order.remove(pos) {
                self.entries.remove(&id);
            }
        }
    }
}

struct Inner {
    scanner: Scanner,
    jobs: RwLock<Jobs>,
    events: broadcast::Sender<ScanEvent>,
    high: mpsc::UnboundedSender<Uuid>,
    low: mpsc::UnboundedSender<Uuid>,
    metrics: Metrics,
    timeout: Duration,
    history: usize,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<Inner>,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl JobRunner {
    /// Spawns the worker task. Cancelling `shutdown` stops the worker and the
    /// scan it is running.
    pub fn start(scanner: Scanner, cfg: &ScanConfig, metrics: Metrics, shutdown: CancellationToken) -> Self {
        let (events, _) = broadcast::channel(cfg.event_buffer);
        let (high, high_rx) = mpsc::unbounded_channel();
        let (low, low_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            scanner,
            jobs: RwLock::new(Jobs::default()),
            events,
            high,
            low,
            metrics,
            timeout: Duration::from_secs(cfg.timeout_secs),
            history: cfg.job_history,
            shutdown,
        });
        tokio::spawn(work(inner.clone(), high_rx, low_rx));
        Self { inner }
    }

    /// Queues a user scan.
    pub async fn submit(&self, request: ScanRequest) -> anyhow::Result<ScanJob> {
        self.submit_with_priority(request, JobPriority::High).await
    }

    pub async fn submit_with_priority(&self, request: ScanRequest, priority: JobPriority) -> anyhow::Result<ScanJob> {
        let id = Uuid::new_v4();
        let job = ScanJob {
            id,
            request,
            priority,
            status: JobStatus::Queued,
            enqueued_at: now(),
            started_at: None,
            finished_at: None,
            stats: None,
            error: None,
        };
        {
            let mut jobs = self.inner.jobs.write().await;
            jobs.entries.insert(id, Entry { job: job.clone(), cancel: self.inner.shutdown.child_token() });
            jobs.order.push_back(id);
            jobs.prune(self.inner.history);
        }
        let queue = match priority {
            JobPriority::High => &self.inner.high,
            JobPriority::Low => &self.inner.low,
        };
        queue.send(id).map_err(|_| anyhow::anyhow!("scan worker is not running"))?;
        info!("Queued {} scan job {} ({:?} priority)", job.request.mode, id, priority);
        Ok(job)
    }

    /// Stops the running scan, if any, and returns its id.
    pub async fn cancel(&self) -> Option<Uuid> {
        let jobs = self.inner.jobs.read().await;
        match jobs.entries.values().find(|e| e.job.status == JobStatus::Started) {
            Some(entry) => {
                info!("Stopping scan job {}", entry.job.id);
                entry.cancel.cancel();
                Some(entry.job.id)
            }
            None => {
                info!("No running scan to stop");
                None
            }
        }
    }

    /// Cancels one job. A queued job never starts; a running one stops at its
    /// next checkpoint.
    pub async fn cancel_job(&self, id: Uuid) -> Option<ScanJob> {
        let mut jobs = self.inner.jobs.write().await;
        let entry = jobs.entries.get_mut(&id)?;
        match entry.job.status {
            JobStatus::Queued => {
                entry.job.status = JobStatus::Cancelled;
                entry.job.finished_at = Some(now());
                entry.job.error = Some(ScanError::Cancelled.failure());
                entry.cancel.cancel();
                self.inner.metrics.inc_scans_cancelled();
                info!("Cancelled queued scan job {}", id);
            }
            JobStatus::Started => {
                info!("Stopping scan job {}", id);
                entry.cancel.cancel();
            }
            _ => debug!("Scan job {} already finished", id),
        }
        Some(entry.job.clone())
    }

    pub async fn get(&self, id: Uuid) -> Option<ScanJob> {
        self.inner.jobs.read().await.entries.get(&id).map(|e| e.job.clone())
    }

    /// All known jobs, newest first.
    pub async fn list(&self) -> Vec<ScanJob> {
        let jobs = self.inner.jobs.read().await;
        jobs.order.iter().rev().filter_map(|id| jobs.entries.get(id)).map(|e| e.job.clone()).collect()
    }

    pub async fn running(&self) -> Option<ScanJob> {
        let jobs = self.inner.jobs.read().await;
        jobs.entries.values().find(|e| e.job.status == JobStatus::Started).map(|e| e.job.clone())
    }

    async fn has_pending(&self) -> bool {
        self.inner.jobs.read().await.entries.values().any(|e| !e.job.status.is_final())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.inner.events.subscribe()
    }

    /// Cancelled once the process is shutting down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Providers the worker's scanner was built with.
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.inner.scanner.providers().kinds()
    }
}

async fn work(inner: Arc<Inner>, mut high: mpsc::UnboundedReceiver<Uuid>, mut low: mpsc::UnboundedReceiver<Uuid>) {
    loop {
        let id = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            Some(id) = high.recv() => id,
            Some(id) = low.recv() => id,
            else => break,
        };
        inner.execute(id).await;
    }
    debug!("Scan worker stopped");
}

impl Inner {
    async fn execute(&self, id: Uuid) {
        let (request, cancel) = {
            let mut jobs = self.jobs.write().await;
            let Some(entry) = jobs.entries.get_mut(&id) else {
                return;
            };
            if entry.job.status != JobStatus::Queued {
                debug!("Skipping scan job {} ({:?})", id, entry.job.status);
                return;
            }
            entry.job.status = JobStatus::Started;
            entry.job.started_at = Some(now());
            (entry.job.request.clone(), entry.cancel.clone())
        };

        self.metrics.inc_scans_started();
        info!("Starting scan job {} ({})", id, request.mode);

        let outcome = time::timeout(self.timeout, self.scanner.run(&request, &self.events, &cancel)).await;
        let (status, stats, failure) = match outcome {
            Ok(Ok(stats)) => {
                self.metrics.inc_scans_completed();
                self.metrics.add_statistics(&stats);
                (JobStatus::Finished, Some(stats), None)
            }
            Ok(Err(e @ ScanError::Cancelled)) => {
                self.metrics.inc_scans_cancelled();
                (JobStatus::Cancelled, None, Some(e.failure()))
            }
            Ok(Err(e)) => {
                self.metrics.inc_scans_failed();
                (JobStatus::Failed, None, Some(e.failure()))
            }
            Err(_) => {
                cancel.cancel();
                let failure = ScanFailure {
                    reason: FailureReason::Timeout,
                    message: format!("scan timed out after {}s", self.timeout.as_secs()),
                };
                error!("Scan job {} timed out", id);
                let _ = self.events.send(ScanEvent::DoneKo(failure.clone()));
                self.metrics.inc_scans_failed();
                (JobStatus::Failed, None, Some(failure))
            }
        };

        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.entries.get_mut(&id) {
            entry.job.status = status;
            entry.job.finished_at = Some(now());
            entry.job.stats = stats;
            entry.job.error = failure;
        }
        jobs.prune(self.history);
    }
}

/// Queues a low priority QUICK scan every `every`, unless a scan is already
/// queued or running.
pub fn spawn_scheduled_rescan(runner: JobRunner, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        // first tick fires immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = runner.inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if runner.has_pending().await {
                        debug!("Scan already pending, skipping scheduled rescan");
                        continue;
                    }
                    if let Err(e) = runner.submit_with_priority(ScanRequest::new(ScanMode::Quick), JobPriority::Low).await {
                        warn!("Scheduled rescan not queued: {}", e);
                    }
                }
            }
        }
    })
}
