//! Priority task queue and bounded worker pool.
//!
//! Tasks are ordered by priority tier, then submission order. At most one
//! task per source runs at a time; a source with a queued or running task
//! rejects further submissions. Cancel and pause act immediately on
//! pending tasks and cooperatively, at the next page boundary, on running
//! ones.

use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::source::SourceConfig;
use crate::models::task::{ScrapeTask, TaskPriority, TaskStatus};
use crate::monitor::Monitor;
use crate::scrape::orchestrator::{Orchestrator, StopFlag};
use crate::store::Store;

pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopKind {
    Cancel,
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueuedTask {
    priority: TaskPriority,
    seq: u64,
    task_id: Uuid,
    source_id: Uuid,
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first, earlier submission breaks ties.
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningTaskInfo {
    pub task_id: Uuid,
    pub source_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingTaskInfo {
    pub task_id: Uuid,
    pub source_id: Uuid,
    pub priority: TaskPriority,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub running: usize,
    pub workers: usize,
    pub completed: i64,
    pub failed: i64,
    pub paused: i64,
    pub pending_tasks: Vec<PendingTaskInfo>,
    pub running_tasks: Vec<RunningTaskInfo>,
}

#[derive(Default)]
struct QueueState {
    pending: BinaryHeap<QueuedTask>,
    /// Sources with a queued task; prevents same-source pileups.
    queued_sources: HashSet<Uuid>,
    /// source_id -> task_id for tasks currently executing.
    running: HashMap<Uuid, Uuid>,
    stop_flags: HashMap<Uuid, StopFlag>,
    stop_kinds: HashMap<Uuid, StopKind>,
    /// Pending tasks withdrawn before a worker picked them up.
    withdrawn: HashSet<Uuid>,
    seq: u64,
    completed: i64,
    failed: i64,
    paused: i64,
}

pub struct TaskQueue {
    store: Arc<dyn Store>,
    orchestrator: Arc<Orchestrator>,
    monitor: Arc<Monitor>,
    state: Mutex<QueueState>,
    notify: Notify,
    shutdown: AtomicBool,
    workers: usize,
}

impl TaskQueue {
    pub fn new(
        store: Arc<dyn Store>,
        orchestrator: Arc<Orchestrator>,
        monitor: Arc<Monitor>,
        workers: usize,
    ) -> Self {
        TaskQueue {
            store,
            orchestrator,
            monitor,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
            workers: workers.max(1),
        }
    }

    /// Spawn the worker pool. Idempotent use is not supported; call once.
    pub fn start(self: &Arc<Self>) {
        for worker_id in 0..self.workers {
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.worker_loop(worker_id).await;
            });
        }
        tracing::info!("Started {} queue workers", self.workers);
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    /// Enqueue a scrape task for a source. Rejected while the source
    /// already has a queued or running task.
    pub async fn submit(
        &self,
        source: &SourceConfig,
        priority: TaskPriority,
        mode: &str,
    ) -> Result<Uuid, AppError> {
        let task = ScrapeTask::new(source.id, priority, mode);

        // Reserve the source slot before persisting so a concurrent submit
        // cannot slip in between.
        {
            let mut state = self.lock_state()?;
            if state.running.contains_key(&source.id) || state.queued_sources.contains(&source.id)
            {
                return Err(AppError::SourceBusy(source.name.clone()));
            }
            state.queued_sources.insert(source.id);
        }

        if let Err(e) = self.store.create_task(&task).await {
            self.lock_state()?.queued_sources.remove(&source.id);
            return Err(e);
        }

        // The task row exists; now make it visible to workers.
        {
            let mut state = self.lock_state()?;
            state.seq += 1;
            let entry = QueuedTask {
                priority,
                seq: state.seq,
                task_id: task.id,
                source_id: source.id,
            };
            state.pending.push(entry);
        }

        tracing::info!(
            "Queued task {} for source '{}' at {} priority",
            task.id,
            source.name,
            priority.as_str()
        );
        self.notify.notify_one();
        Ok(task.id)
    }

    /// Cancel a task. Pending tasks fail immediately; running tasks stop
    /// at the next page boundary and finish as failed.
    pub async fn cancel(&self, task_id: Uuid) -> Result<TaskStatus, AppError> {
        self.request_stop(task_id, StopKind::Cancel).await
    }

    /// Pause a task. Items already persisted stay; the task finishes as
    /// paused.
    pub async fn pause(&self, task_id: Uuid) -> Result<TaskStatus, AppError> {
        self.request_stop(task_id, StopKind::Pause).await
    }

    async fn request_stop(&self, task_id: Uuid, kind: StopKind) -> Result<TaskStatus, AppError> {
        enum Disposition {
            Running,
            Withdrawn,
            Unknown,
        }

        let disposition = {
            let mut state = self.lock_state()?;
            if let Some(flag) = state.stop_flags.get(&task_id) {
                flag.store(true, Ordering::Relaxed);
                state.stop_kinds.insert(task_id, kind);
                Disposition::Running
            } else if state.pending.iter().any(|q| q.task_id == task_id)
                && !state.withdrawn.contains(&task_id)
            {
                state.withdrawn.insert(task_id);
                if let Some(entry) = state
                    .pending
                    .iter()
                    .find(|q| q.task_id == task_id)
                    .copied()
                {
                    state.queued_sources.remove(&entry.source_id);
                }
                match kind {
                    StopKind::Cancel => state.failed += 1,
                    StopKind::Pause => state.paused += 1,
                }
                Disposition::Withdrawn
            } else {
                Disposition::Unknown
            }
        };

        match disposition {
            Disposition::Running => Ok(TaskStatus::Running),
            Disposition::Withdrawn => {
                let mut task = self
                    .store
                    .get_task(task_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))?;
                task.status = match kind {
                    StopKind::Cancel => TaskStatus::Failed,
                    StopKind::Pause => TaskStatus::Paused,
                };
                if kind == StopKind::Cancel {
                    task.error = Some("cancelled before start".to_string());
                }
                task.completed_at = Some(Utc::now());
                self.store.update_task(&task).await?;
                Ok(task.status)
            }
            Disposition::Unknown => {
                let task = self
                    .store
                    .get_task(task_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))?;
                Err(AppError::BadRequest(format!(
                    "task {task_id} is already {}",
                    task.status.as_str()
                )))
            }
        }
    }

    pub fn status(&self) -> QueueStatus {
        let Ok(state) = self.state.lock() else {
            return QueueStatus {
                pending: 0,
                running: 0,
                workers: self.workers,
                completed: 0,
                failed: 0,
                paused: 0,
                pending_tasks: Vec::new(),
                running_tasks: Vec::new(),
            };
        };
        // Snapshot in dequeue order, withdrawn entries excluded.
        let mut pending_tasks: Vec<QueuedTask> = state
            .pending
            .iter()
            .filter(|q| !state.withdrawn.contains(&q.task_id))
            .copied()
            .collect();
        pending_tasks.sort_by(|a, b| b.cmp(a));
        QueueStatus {
            pending: pending_tasks.len(),
            running: state.running.len(),
            workers: self.workers,
            completed: state.completed,
            failed: state.failed,
            paused: state.paused,
            pending_tasks: pending_tasks
                .into_iter()
                .map(|q| PendingTaskInfo {
                    task_id: q.task_id,
                    source_id: q.source_id,
                    priority: q.priority,
                })
                .collect(),
            running_tasks: state
                .running
                .iter()
                .map(|(source_id, task_id)| RunningTaskInfo {
                    task_id: *task_id,
                    source_id: *source_id,
                })
                .collect(),
        }
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, QueueState>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("queue state poisoned".to_string()))
    }

    async fn worker_loop(&self, worker_id: usize) {
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.next_queued() {
                Some(entry) => {
                    if let Err(e) = self.execute(entry).await {
                        tracing::error!("Worker {worker_id}: task {} failed to finalize: {e}", entry.task_id);
                    }
                }
                None => {
                    // Bounded wait so shutdown is observed even without a
                    // wakeup.
                    let _ = tokio::time::timeout(
                        Duration::from_millis(250),
                        self.notify.notified(),
                    )
                    .await;
                }
            }
        }
        tracing::debug!("Worker {worker_id} stopped");
    }

    /// Pop the highest-priority task whose source is idle. Entries whose
    /// source is busy are pushed back; withdrawn entries are dropped.
    fn next_queued(&self) -> Option<QueuedTask> {
        let mut state = self.state.lock().ok()?;
        let mut deferred = Vec::new();
        let mut picked = None;

        while let Some(entry) = state.pending.pop() {
            if state.withdrawn.remove(&entry.task_id) {
                continue;
            }
            if state.running.contains_key(&entry.source_id) {
                deferred.push(entry);
                continue;
            }
            state.running.insert(entry.source_id, entry.task_id);
            state.queued_sources.remove(&entry.source_id);
            state
                .stop_flags
                .insert(entry.task_id, Arc::new(AtomicBool::new(false)));
            picked = Some(entry);
            break;
        }

        for entry in deferred {
            state.pending.push(entry);
        }
        picked
    }

    async fn execute(&self, entry: QueuedTask) -> Result<(), AppError> {
        let result = self.execute_inner(entry).await;
        // The source lock is released no matter how the run ended.
        {
            let mut state = self.lock_state()?;
            state.running.remove(&entry.source_id);
            state.stop_flags.remove(&entry.task_id);
            state.stop_kinds.remove(&entry.task_id);
        }
        self.notify.notify_one();
        result
    }

    async fn execute_inner(&self, entry: QueuedTask) -> Result<(), AppError> {
        let stop = {
            let state = self.lock_state()?;
            state
                .stop_flags
                .get(&entry.task_id)
                .cloned()
                .unwrap_or_default()
        };

        let Some(mut task) = self.store.get_task(entry.task_id).await? else {
            tracing::error!("Queued task {} missing from store", entry.task_id);
            return Ok(());
        };
        let Some(mut source) = self.store.get_source(entry.source_id).await? else {
            task.status = TaskStatus::Failed;
            task.error = Some("source no longer exists".to_string());
            task.completed_at = Some(Utc::now());
            self.store.update_task(&task).await?;
            return Ok(());
        };

        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        self.store.update_task(&task).await?;
        self.monitor.start_session(task.id, &source.name);
        tracing::info!("Task {} running for source '{}'", task.id, source.name);

        let run = self.orchestrator.run(&mut task, &source, &stop).await;

        let stop_kind = {
            let state = self.lock_state()?;
            state.stop_kinds.get(&entry.task_id).copied()
        };

        match run {
            Ok(outcome) => {
                task.items_found = outcome.items_found;
                task.items_processed = outcome.items_processed;
                task.items_saved = outcome.items_saved;
                task.duplicates = outcome.duplicates;
                if outcome.stopped {
                    match stop_kind {
                        Some(StopKind::Pause) => {
                            task.status = TaskStatus::Paused;
                        }
                        _ => {
                            task.status = TaskStatus::Failed;
                            task.error = Some("cancelled".to_string());
                        }
                    }
                } else {
                    task.status = TaskStatus::Completed;
                    if !outcome.errors.is_empty() {
                        task.error = Some(outcome.errors.join("; "));
                    }
                }
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                task.error = Some(e.to_string());
                self.monitor.record_error(&source.name, &e.to_string(), "task");
            }
        }

        task.completed_at = Some(Utc::now());
        self.store.update_task(&task).await?;

        match task.status {
            TaskStatus::Completed => {
                source.stats.success_count += 1;
                source.stats.total_items_scraped += task.items_saved;
                source.stats.last_success_at = Some(Utc::now());
            }
            TaskStatus::Failed => {
                source.stats.failure_count += 1;
            }
            // Paused runs count toward neither outcome.
            _ => {}
        }
        if matches!(task.status, TaskStatus::Completed | TaskStatus::Failed) {
            self.store
                .update_source_stats(source.id, &source.stats)
                .await?;
        }

        {
            let mut state = self.lock_state()?;
            match task.status {
                TaskStatus::Completed => state.completed += 1,
                TaskStatus::Failed => state.failed += 1,
                TaskStatus::Paused => state.paused += 1,
                _ => {}
            }
        }

        self.monitor.stop_session(
            task.id,
            task.status == TaskStatus::Completed,
            task.items_saved,
        );
        tracing::info!(
            "Task {} finished as {} ({} saved, {} duplicates)",
            task.id,
            task.status.as_str(),
            task.items_saved,
            task.duplicates
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::models::source::StrategyKind;
    use crate::scrape::{ExtractedItem, Fetcher, PageResult, Scraper, ScraperRegistry};
    use crate::store::MemoryStore;

    struct StubScraper {
        pages: u32,
        delay: Duration,
    }

    #[async_trait]
    impl Scraper for StubScraper {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch_page(
            &self,
            source: &SourceConfig,
            page: u32,
        ) -> Result<PageResult, AppError> {
            tokio::time::sleep(self.delay).await;
            if page > self.pages {
                return Ok(PageResult::EndOfResults);
            }
            Ok(PageResult::Items(vec![ExtractedItem {
                source_url: format!("https://example.com/{}/{}", source.name, page),
                title: Some(format!("Job {page}")),
                description: Some("stub description".to_string()),
                ..Default::default()
            }]))
        }
    }

    async fn queue_with(
        store: Arc<MemoryStore>,
        sources: &[&SourceConfig],
        pages: u32,
        delay: Duration,
        workers: usize,
    ) -> Arc<TaskQueue> {
        let mut registry = ScraperRegistry::new();
        for source in sources {
            store.create_source(source).await.unwrap();
            registry.register(&source.name, Arc::new(StubScraper { pages, delay }));
        }
        let monitor = Arc::new(Monitor::new());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone() as Arc<dyn Store>,
            registry,
            Fetcher::new().unwrap(),
            monitor.clone(),
        ));
        Arc::new(TaskQueue::new(store, orchestrator, monitor, workers))
    }

    async fn wait_for_terminal(store: &MemoryStore, task_id: Uuid) -> ScrapeTask {
        for _ in 0..800 {
            let task = store.get_task(task_id).await.unwrap().unwrap();
            if task.status.is_terminal() {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never reached a terminal status");
    }

    fn source(name: &str) -> SourceConfig {
        let mut s = SourceConfig::new(name, StrategyKind::Markup);
        s.rate_limit_delay = 0.0;
        s.max_pages = 2;
        s
    }

    #[tokio::test]
    async fn task_runs_to_completion_and_updates_stats() {
        let store = Arc::new(MemoryStore::new());
        let src = source("board-a");
        let queue = queue_with(store.clone(), &[&src], 2, Duration::ZERO, 1).await;
        queue.start();

        let task_id = queue.submit(&src, TaskPriority::Normal, "manual").await.unwrap();
        let task = wait_for_terminal(&store, task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.items_saved, 2);
        assert!(task.started_at.is_some() && task.completed_at.is_some());

        let updated = store.get_source(src.id).await.unwrap().unwrap();
        assert_eq!(updated.stats.success_count, 1);
        assert_eq!(updated.stats.total_items_scraped, 2);
        queue.shutdown();
    }

    #[tokio::test]
    async fn second_submission_for_busy_source_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let src = source("board-a");
        let queue = queue_with(store.clone(), &[&src], 2, Duration::from_secs(5), 1).await;
        queue.start();

        let first = queue.submit(&src, TaskPriority::Normal, "manual").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = queue.submit(&src, TaskPriority::Normal, "manual").await.unwrap_err();
        assert!(matches!(err, AppError::SourceBusy(_)));

        queue.cancel(first).await.unwrap();
        let task = wait_for_terminal(&store, first).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("cancelled"));
        queue.shutdown();
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let store = Arc::new(MemoryStore::new());
        let a = source("board-a");
        let b = source("board-b");
        let c = source("board-c");
        // No workers started; inspect dequeue order directly.
        let queue = queue_with(store.clone(), &[&a, &b, &c], 1, Duration::ZERO, 1).await;

        queue.submit(&a, TaskPriority::Low, "manual").await.unwrap();
        let urgent = queue.submit(&b, TaskPriority::Urgent, "manual").await.unwrap();
        let normal = queue.submit(&c, TaskPriority::Normal, "manual").await.unwrap();

        assert_eq!(queue.next_queued().unwrap().task_id, urgent);
        assert_eq!(queue.next_queued().unwrap().task_id, normal);
    }

    #[tokio::test]
    async fn same_priority_preserves_submission_order() {
        let store = Arc::new(MemoryStore::new());
        let a = source("board-a");
        let b = source("board-b");
        let queue = queue_with(store.clone(), &[&a, &b], 1, Duration::ZERO, 1).await;

        let first = queue.submit(&a, TaskPriority::Normal, "manual").await.unwrap();
        let second = queue.submit(&b, TaskPriority::Normal, "manual").await.unwrap();

        assert_eq!(queue.next_queued().unwrap().task_id, first);
        assert_eq!(queue.next_queued().unwrap().task_id, second);
    }

    #[tokio::test]
    async fn busy_source_entries_are_deferred_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let a = source("board-a");
        let queue = queue_with(store.clone(), &[&a], 1, Duration::ZERO, 1).await;

        let first = queue.submit(&a, TaskPriority::Normal, "manual").await.unwrap();
        let picked = queue.next_queued().unwrap();
        assert_eq!(picked.task_id, first);

        // Source is now locked; nothing else is eligible but the heap
        // still holds no stray entries.
        assert!(queue.next_queued().is_none());
        assert_eq!(queue.status().running, 1);
    }

    #[tokio::test]
    async fn cancelling_pending_task_fails_it_without_running() {
        let store = Arc::new(MemoryStore::new());
        let a = source("board-a");
        let queue = queue_with(store.clone(), &[&a], 1, Duration::ZERO, 1).await;

        let task_id = queue.submit(&a, TaskPriority::Normal, "manual").await.unwrap();
        let status = queue.cancel(task_id).await.unwrap();
        assert_eq!(status, TaskStatus::Failed);

        let task = store.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("cancelled before start"));
        assert!(queue.next_queued().is_none());

        // The source slot is free again.
        queue.submit(&a, TaskPriority::Normal, "manual").await.unwrap();
    }

    #[tokio::test]
    async fn pausing_running_task_preserves_progress() {
        let store = Arc::new(MemoryStore::new());
        let mut src = source("board-a");
        src.max_pages = 20;
        let queue = queue_with(store.clone(), &[&src], 20, Duration::from_millis(100), 1).await;
        queue.start();

        let task_id = queue.submit(&src, TaskPriority::High, "manual").await.unwrap();
        // Let a few pages land, then pause mid-run.
        tokio::time::sleep(Duration::from_millis(350)).await;
        queue.pause(task_id).await.unwrap();

        let task = wait_for_terminal(&store, task_id).await;
        assert_eq!(task.status, TaskStatus::Paused);
        assert!(task.error.is_none());
        assert!(task.items_saved >= 1);
        assert_eq!(
            store.count_raw_items(Some(src.id)).await.unwrap(),
            task.items_saved
        );
        queue.shutdown();
    }

    #[tokio::test]
    async fn stopping_an_already_finished_task_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let src = source("board-a");
        let queue = queue_with(store.clone(), &[&src], 1, Duration::ZERO, 1).await;
        queue.start();

        let task_id = queue.submit(&src, TaskPriority::Normal, "manual").await.unwrap();
        wait_for_terminal(&store, task_id).await;

        let err = queue.cancel(task_id).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        queue.shutdown();
    }
}
