//! Sequential preprocessing jobs with live progress.
//!
//! One job per item type at a time. The job task owns all mutable job state
//! and publishes immutable [`Progress`] snapshots through a `watch` channel;
//! readers (the progress endpoint, tests) only ever see a complete snapshot,
//! never a half-updated struct.

use crate::catalog::{ArtifactState, Catalog, ItemType, SourceItem};
use crate::error::{ErrorKind, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// Wall-clock gap between items, so a long job stays polite to everything
/// else sharing the disk and the object store.
pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_millis(500);

/// What a worker did with one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Artifacts were produced (or topped up).
    Done { units: u32 },
    /// The cache was already complete; nothing to do.
    Skipped,
}

/// Processes one item end to end: fetch the source, render, cache.
///
/// Implemented by the binary, which wires the renderers to its stores. An
/// error return is recorded against the item and the job moves on.
#[async_trait::async_trait]
pub trait Worker: Send + Sync {
    async fn process(&self, item_type: ItemType, item: &SourceItem) -> Result<WorkOutcome>;
}

/// One failed item, kept in the snapshot for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub title: String,
    pub message: String,
}

/// Immutable snapshot of a job's progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub running: bool,
    pub paused: bool,
    pub total: u32,
    pub processed: u32,
    pub success: u32,
    pub failed: u32,
    pub skipped: u32,
    /// Title of the item currently being processed.
    pub current: Option<String>,
    pub errors: Vec<ItemError>,
}

struct Job {
    progress: watch::Receiver<Progress>,
    pause: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Job {
    fn is_active(&self) -> bool {
        !self.task.is_finished() && self.progress.borrow().running
    }
}

/// Starts and tracks preprocessing jobs, one slot per item type.
pub struct Scheduler {
    catalog: Arc<dyn Catalog>,
    worker: Arc<dyn Worker>,
    item_delay: Duration,
    jobs: Mutex<HashMap<ItemType, Job>>,
}

impl Scheduler {
    pub fn new(catalog: Arc<dyn Catalog>, worker: Arc<dyn Worker>) -> Self {
        Self::with_item_delay(catalog, worker, DEFAULT_ITEM_DELAY)
    }

    pub fn with_item_delay(catalog: Arc<dyn Catalog>, worker: Arc<dyn Worker>, item_delay: Duration) -> Self {
        Self { catalog, worker, item_delay, jobs: Mutex::new(HashMap::new()) }
    }

    /// Queue every item needing artifacts and start the job task.
    ///
    /// Returns how many items were queued. Raises
    /// [`AlreadyRunning`](ErrorKind::AlreadyRunning) while a previous job
    /// for the same item type is still active; a finished job's slot is
    /// reused freely.
    pub async fn start(&self, item_type: ItemType, force: bool) -> Result<u32> {
        let mut jobs = self.jobs.lock().await;
        if jobs.get(&item_type).is_some_and(Job::is_active) {
            exn::bail!(ErrorKind::AlreadyRunning);
        }
        let items = self.catalog.list_items_needing_artifacts(item_type, force).await?;
        let total = items.len() as u32;
        tracing::info!(%item_type, total, force, "starting preprocessing job");

        let (progress_tx, progress_rx) = watch::channel(Progress {
            running: true,
            total,
            ..Progress::default()
        });
        let (pause_tx, pause_rx) = watch::channel(false);
        let task = tokio::spawn(run_job(
            item_type,
            items,
            Arc::clone(&self.catalog),
            Arc::clone(&self.worker),
            progress_tx,
            pause_rx,
            self.item_delay,
        ));
        jobs.insert(item_type, Job { progress: progress_rx, pause: pause_tx, task });
        Ok(total)
    }

    /// Latest progress snapshot, if a job was ever started.
    pub async fn status(&self, item_type: ItemType) -> Option<Progress> {
        let jobs = self.jobs.lock().await;
        jobs.get(&item_type).map(|job| job.progress.borrow().clone())
    }

    /// Subscribe to progress updates for a started job.
    pub async fn subscribe(&self, item_type: ItemType) -> Option<watch::Receiver<Progress>> {
        let jobs = self.jobs.lock().await;
        jobs.get(&item_type).map(|job| job.progress.clone())
    }

    /// Ask the active job to hold before its next item. Returns `false`
    /// when no job is active.
    pub async fn pause(&self, item_type: ItemType) -> bool {
        self.set_paused(item_type, true).await
    }

    pub async fn resume(&self, item_type: ItemType) -> bool {
        self.set_paused(item_type, false).await
    }

    async fn set_paused(&self, item_type: ItemType, paused: bool) -> bool {
        let jobs = self.jobs.lock().await;
        match jobs.get(&item_type) {
            Some(job) if job.is_active() => {
                job.pause.send_replace(paused);
                true
            },
            _ => false,
        }
    }
}

async fn run_job(
    item_type: ItemType,
    items: Vec<SourceItem>,
    catalog: Arc<dyn Catalog>,
    worker: Arc<dyn Worker>,
    progress_tx: watch::Sender<Progress>,
    mut pause_rx: watch::Receiver<bool>,
    item_delay: Duration,
) {
    let total = items.len();
    let mut progress = progress_tx.borrow().clone();
    for (index, item) in items.iter().enumerate() {
        pause_gate(&mut pause_rx, &progress_tx, &mut progress).await;

        progress.current = Some(item.title.clone());
        progress_tx.send_replace(progress.clone());

        match worker.process(item_type, item).await {
            Ok(WorkOutcome::Done { units }) => {
                tracing::info!(%item_type, id = item.id, title = %item.title, units, "item processed");
                progress.success += 1;
                record_state(&*catalog, item_type, item, ArtifactState::Complete).await;
            },
            Ok(WorkOutcome::Skipped) => {
                tracing::debug!(%item_type, id = item.id, title = %item.title, "item already cached");
                progress.skipped += 1;
                record_state(&*catalog, item_type, item, ArtifactState::Complete).await;
            },
            Err(err) => {
                tracing::warn!(%item_type, id = item.id, title = %item.title, error = %err, "item failed");
                progress.failed += 1;
                progress.errors.push(ItemError { title: item.title.clone(), message: err.to_string() });
                record_state(&*catalog, item_type, item, ArtifactState::Partial).await;
            },
        }
        progress.processed += 1;
        progress.current = None;
        progress_tx.send_replace(progress.clone());

        if index + 1 < total {
            tokio::time::sleep(item_delay).await;
        }
    }
    progress.running = false;
    progress_tx.send_replace(progress.clone());
    tracing::info!(
        %item_type,
        processed = progress.processed,
        success = progress.success,
        failed = progress.failed,
        skipped = progress.skipped,
        "preprocessing job finished"
    );
}

/// Hold here while paused. Pause state is only consulted between items, so
/// the in-flight item always finishes cleanly.
async fn pause_gate(pause_rx: &mut watch::Receiver<bool>, progress_tx: &watch::Sender<Progress>, progress: &mut Progress) {
    if !*pause_rx.borrow() {
        return;
    }
    progress.paused = true;
    progress_tx.send_replace(progress.clone());
    // An Err means the scheduler (and its pause sender) is gone; keep going
    // so the job can finish on its own.
    let _ = pause_rx.wait_for(|paused| !*paused).await;
    progress.paused = false;
    progress_tx.send_replace(progress.clone());
}

async fn record_state(catalog: &dyn Catalog, item_type: ItemType, item: &SourceItem, state: ArtifactState) {
    if let Err(err) = catalog.mark_artifact_state(item_type, item.id, state).await {
        tracing::warn!(%item_type, id = item.id, error = %err, "failed to record artifact state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use tokio::sync::Semaphore;

    fn item(id: i64, title: &str) -> SourceItem {
        SourceItem {
            id,
            source_path: format!("/library/item-{id}.pdf"),
            title: title.to_string(),
            artifact_state: ArtifactState::Absent,
        }
    }

    /// Scripted worker: each item id maps to a fixed outcome, and each call
    /// must acquire a permit so tests can hold the job mid-run.
    struct ScriptedWorker {
        failures: Vec<i64>,
        skips: Vec<i64>,
        gate: Semaphore,
    }

    impl ScriptedWorker {
        fn ungated() -> Self {
            Self { failures: Vec::new(), skips: Vec::new(), gate: Semaphore::new(Semaphore::MAX_PERMITS) }
        }

        fn gated() -> Self {
            Self { failures: Vec::new(), skips: Vec::new(), gate: Semaphore::new(0) }
        }
    }

    #[async_trait::async_trait]
    impl Worker for ScriptedWorker {
        async fn process(&self, _item_type: ItemType, item: &SourceItem) -> Result<WorkOutcome> {
            let permit = self.gate.acquire().await.unwrap();
            permit.forget();
            if self.failures.contains(&item.id) {
                exn::bail!(ErrorKind::Worker("render tool exited with code: Some(1)".to_string()));
            }
            if self.skips.contains(&item.id) {
                return Ok(WorkOutcome::Skipped);
            }
            Ok(WorkOutcome::Done { units: 12 })
        }
    }

    fn scheduler_with(catalog: MemoryCatalog, worker: ScriptedWorker) -> Scheduler {
        Scheduler::with_item_delay(Arc::new(catalog), Arc::new(worker), Duration::ZERO)
    }

    async fn finished(scheduler: &Scheduler, item_type: ItemType) -> Progress {
        let mut rx = scheduler.subscribe(item_type).await.unwrap();
        rx.wait_for(|progress| !progress.running).await.unwrap().clone()
    }

    #[tokio::test]
    async fn test_job_processes_all_items() {
        let catalog = MemoryCatalog::with_items(ItemType::Magazine, [item(1, "One"), item(2, "Two")]);
        let scheduler = scheduler_with(catalog, ScriptedWorker::ungated());
        let total = scheduler.start(ItemType::Magazine, false).await.unwrap();
        assert_eq!(total, 2);
        let progress = finished(&scheduler, ItemType::Magazine).await;
        assert_eq!(progress.processed, 2);
        assert_eq!(progress.success, 2);
        assert_eq!(progress.failed, 0);
        assert!(progress.current.is_none());
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_recorded() {
        let catalog = MemoryCatalog::with_items(
            ItemType::Magazine,
            [item(1, "One"), item(2, "Broken"), item(3, "Three")],
        );
        let mut worker = ScriptedWorker::ungated();
        worker.failures = vec![2];
        let scheduler = scheduler_with(catalog, worker);
        scheduler.start(ItemType::Magazine, false).await.unwrap();
        let progress = finished(&scheduler, ItemType::Magazine).await;
        assert_eq!(progress.processed, 3);
        assert_eq!(progress.success, 2);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.errors.len(), 1);
        assert_eq!(progress.errors[0].title, "Broken");
    }

    #[tokio::test]
    async fn test_skipped_items_counted_separately() {
        let catalog = MemoryCatalog::with_items(ItemType::Ebook, [item(1, "Cached"), item(2, "Fresh")]);
        let mut worker = ScriptedWorker::ungated();
        worker.skips = vec![1];
        let scheduler = scheduler_with(catalog, worker);
        scheduler.start(ItemType::Ebook, false).await.unwrap();
        let progress = finished(&scheduler, ItemType::Ebook).await;
        assert_eq!(progress.skipped, 1);
        assert_eq!(progress.success, 1);
    }

    #[tokio::test]
    async fn test_outcome_updates_catalog_state() {
        let catalog = Arc::new(MemoryCatalog::with_items(
            ItemType::Magazine,
            [item(1, "Good"), item(2, "Bad")],
        ));
        let mut worker = ScriptedWorker::ungated();
        worker.failures = vec![2];
        let scheduler = Scheduler::with_item_delay(Arc::clone(&catalog) as Arc<dyn Catalog>, Arc::new(worker), Duration::ZERO);
        scheduler.start(ItemType::Magazine, false).await.unwrap();
        finished(&scheduler, ItemType::Magazine).await;
        assert_eq!(catalog.state_of(ItemType::Magazine, 1).await, Some(ArtifactState::Complete));
        assert_eq!(catalog.state_of(ItemType::Magazine, 2).await, Some(ArtifactState::Partial));
    }

    #[tokio::test]
    async fn test_second_start_while_running_is_rejected() {
        let catalog = MemoryCatalog::with_items(ItemType::Magazine, [item(1, "One")]);
        let scheduler = scheduler_with(catalog, ScriptedWorker::gated());
        scheduler.start(ItemType::Magazine, false).await.unwrap();
        let err = scheduler.start(ItemType::Magazine, false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyRunning));
    }

    #[tokio::test]
    async fn test_jobs_for_different_item_types_coexist() {
        let catalog = MemoryCatalog::with_items(ItemType::Magazine, [item(1, "One")]);
        let scheduler = scheduler_with(catalog, ScriptedWorker::gated());
        scheduler.start(ItemType::Magazine, false).await.unwrap();
        // Ebook slot is free even while the magazine job is held.
        assert_eq!(scheduler.start(ItemType::Ebook, false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_restart_after_completion() {
        let catalog = MemoryCatalog::with_items(ItemType::Magazine, [item(1, "One")]);
        let scheduler = scheduler_with(catalog, ScriptedWorker::ungated());
        scheduler.start(ItemType::Magazine, false).await.unwrap();
        finished(&scheduler, ItemType::Magazine).await;
        // The first pass marked everything complete; a forced restart still
        // queues the item.
        let total = scheduler.start(ItemType::Magazine, true).await.unwrap();
        assert_eq!(total, 1);
        finished(&scheduler, ItemType::Magazine).await;
    }

    #[tokio::test]
    async fn test_pause_holds_between_items() {
        let catalog = MemoryCatalog::with_items(ItemType::Magazine, [item(1, "One"), item(2, "Two")]);
        let worker = Arc::new(ScriptedWorker::gated());
        let scheduler = Scheduler::with_item_delay(
            Arc::new(catalog),
            Arc::clone(&worker) as Arc<dyn Worker>,
            Duration::ZERO,
        );
        scheduler.start(ItemType::Magazine, false).await.unwrap();
        let mut rx = scheduler.subscribe(ItemType::Magazine).await.unwrap();

        // Pause once item one is in flight, then release it; the job must
        // hold at the gate instead of starting item two.
        rx.wait_for(|p| p.current.is_some()).await.unwrap();
        assert!(scheduler.pause(ItemType::Magazine).await);
        worker.gate.add_permits(1);
        let progress = rx.wait_for(|p| p.paused).await.unwrap().clone();
        assert_eq!(progress.processed, 1);
        assert!(progress.running);

        assert!(scheduler.resume(ItemType::Magazine).await);
        worker.gate.add_permits(1);
        let progress = rx.wait_for(|p| !p.running).await.unwrap().clone();
        assert_eq!(progress.processed, 2);
        assert!(!progress.paused);
    }

    #[tokio::test]
    async fn test_status_before_any_job() {
        let catalog = MemoryCatalog::default();
        let scheduler = scheduler_with(catalog, ScriptedWorker::ungated());
        assert!(scheduler.status(ItemType::Magazine).await.is_none());
        assert!(!scheduler.pause(ItemType::Magazine).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_are_paced() {
        let catalog = MemoryCatalog::with_items(
            ItemType::Magazine,
            [item(1, "One"), item(2, "Two"), item(3, "Three")],
        );
        let scheduler = Scheduler::with_item_delay(
            Arc::new(catalog),
            Arc::new(ScriptedWorker::ungated()),
            Duration::from_millis(500),
        );
        let started = tokio::time::Instant::now();
        scheduler.start(ItemType::Magazine, false).await.unwrap();
        finished(&scheduler, ItemType::Magazine).await;
        // Two gaps between three items; no trailing delay.
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }
}
