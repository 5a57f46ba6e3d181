use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::{LocalBooksError, Result};
use crate::domain::{ChapterEntry, NovelKey, Rule};
use crate::retrieval::{Freshness, Orchestrator, RetrievalSettings};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_CHAPTER_TIMEOUT: Duration = Duration::from_secs(60);

/// Final outcome of a batch download.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub already_cached: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub failures: Vec<ChapterFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterFailure {
    pub chapter_id: String,
    pub title: String,
    pub reason: String,
}

/// Counters of a running batch, for polling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub succeeded: usize,
    pub already_cached: usize,
    pub failed: usize,
    pub cancelled: bool,
}

impl BatchProgress {
    pub fn completed(&self) -> usize {
        self.succeeded + self.already_cached + self.failed
    }
}

#[derive(Debug)]
enum ChapterOutcome {
    Succeeded,
    AlreadyCached,
    Failed(String),
}

#[derive(Debug, Default)]
struct JobState {
    total: AtomicUsize,
    succeeded: AtomicUsize,
    already_cached: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicBool,
}

impl JobState {
    fn record(&self, outcome: &ChapterOutcome) {
        let counter = match outcome {
            ChapterOutcome::Succeeded => &self.succeeded,
            ChapterOutcome::AlreadyCached => &self.already_cached,
            ChapterOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn progress(&self) -> BatchProgress {
        BatchProgress {
            total: self.total.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            already_cached: self.already_cached.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
        }
    }
}

type Registry = Arc<Mutex<HashMap<NovelKey, Arc<JobState>>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<NovelKey, Arc<JobState>>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registry entry for a job that has not spawned its workers yet. Removes
/// the entry on drop unless disarmed, so an abandoned `start` frees the key.
struct Registration {
    jobs: Registry,
    key: NovelKey,
    armed: bool,
}

impl Registration {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.armed {
            lock(&self.jobs).remove(&self.key);
        }
    }
}

/// `delay` scaled by a random factor in [0.5, 1.5).
fn jittered(delay: Duration) -> Duration {
    delay.mul_f64(rand::random_range(0.5..1.5))
}

/// Downloads every chapter of a novel into the cache with a fixed number
/// of workers. At most one job runs per novel.
#[derive(Clone)]
pub struct BatchScheduler {
    orchestrator: Orchestrator,
    workers: usize,
    chapter_timeout: Duration,
    request_delay: Duration,
    jobs: Registry,
}

impl BatchScheduler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self::with_workers(orchestrator, DEFAULT_WORKERS, DEFAULT_CHAPTER_TIMEOUT)
    }

    pub fn with_workers(
        orchestrator: Orchestrator,
        workers: usize,
        chapter_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            workers: workers.max(1),
            chapter_timeout,
            request_delay: Duration::ZERO,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Pause each worker between chapters it had to fetch.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Start downloading and wait for the report.
    pub async fn download_all(
        &self,
        settings: RetrievalSettings,
        rule_id: i64,
        novel_url: &str,
    ) -> Result<BatchReport> {
        let handle = self.start(settings, rule_id, novel_url).await?;
        handle.wait().await
    }

    /// Resolve the chapter list (cache-first) and spawn the workers.
    pub async fn start(
        &self,
        settings: RetrievalSettings,
        rule_id: i64,
        novel_url: &str,
    ) -> Result<BatchHandle> {
        if !settings.cache_enabled {
            return Err(LocalBooksError::Validation(
                "Batch download requires the cache to be enabled".into(),
            ));
        }

        let rule = self.orchestrator.rule(rule_id)?;
        let key = NovelKey::new(rule.id, novel_url);
        let state = Arc::new(JobState::default());
        {
            let mut jobs = lock(&self.jobs);
            if jobs.contains_key(&key) {
                return Err(LocalBooksError::Validation(format!(
                    "A download is already running for {}",
                    key
                )));
            }
            jobs.insert(key.clone(), state.clone());
        }
        let registration = Registration {
            jobs: self.jobs.clone(),
            key: key.clone(),
            armed: true,
        };

        let novel = self
            .orchestrator
            .novel_with_rule(settings, &rule, &key, false)
            .await?
            .value;

        let chapters = novel.chapters;
        let total = chapters.len();
        state.total.store(total, Ordering::SeqCst);
        let queue = Arc::new(Mutex::new(chapters.into_iter().collect::<VecDeque<_>>()));
        let rule = Arc::new(rule);

        let worker_count = self.workers.min(total);
        info!(%key, chapters = total, workers = worker_count, "Starting batch download");

        let workers: Vec<JoinHandle<Vec<ChapterFailure>>> = (0..worker_count)
            .map(|_| {
                let worker = Worker {
                    orchestrator: self.orchestrator.clone(),
                    settings,
                    rule: rule.clone(),
                    key: key.clone(),
                    queue: queue.clone(),
                    state: state.clone(),
                    chapter_timeout: self.chapter_timeout,
                    request_delay: self.request_delay,
                };
                tokio::spawn(worker.run())
            })
            .collect();
        registration.disarm();

        let (report_tx, report_rx) = oneshot::channel();
        let jobs = self.jobs.clone();
        let supervisor_key = key.clone();
        let supervisor_state = state.clone();
        tokio::spawn(async move {
            let mut failures = Vec::new();
            for result in futures::future::join_all(workers).await {
                match result {
                    Ok(worker_failures) => failures.extend(worker_failures),
                    Err(e) => error!("Batch worker join error: {}", e),
                }
            }

            let undispatched = match queue.lock() {
                Ok(mut queue) => queue.drain(..).count(),
                Err(poisoned) => poisoned.into_inner().drain(..).count(),
            };
            let progress = supervisor_state.progress();
            let report = BatchReport {
                total,
                succeeded: progress.succeeded,
                already_cached: progress.already_cached,
                failed: progress.failed,
                cancelled: undispatched,
                failures,
            };

            lock(&jobs).remove(&supervisor_key);
            info!(
                key = %supervisor_key,
                succeeded = report.succeeded,
                already_cached = report.already_cached,
                failed = report.failed,
                cancelled = report.cancelled,
                "Batch download finished"
            );
            let _ = report_tx.send(report);
        });

        Ok(BatchHandle {
            key,
            state,
            report: report_rx,
        })
    }

    /// Progress of the running job for `key`, if any.
    pub fn status(&self, key: &NovelKey) -> Option<BatchProgress> {
        lock(&self.jobs).get(key).map(|state| state.progress())
    }

    /// Stop dispatching chapters for `key`. Returns false when no job runs.
    pub fn cancel(&self, key: &NovelKey) -> bool {
        match lock(&self.jobs).get(key) {
            Some(state) => {
                state.cancelled.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

/// A running batch download.
pub struct BatchHandle {
    key: NovelKey,
    state: Arc<JobState>,
    report: oneshot::Receiver<BatchReport>,
}

impl BatchHandle {
    pub fn key(&self) -> &NovelKey {
        &self.key
    }

    pub fn progress(&self) -> BatchProgress {
        self.state.progress()
    }

    /// Chapters already in flight still finish.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    pub async fn wait(self) -> Result<BatchReport> {
        self.report.await.map_err(|_| {
            LocalBooksError::Io(std::io::Error::other(format!(
                "Batch download for {} was aborted",
                self.key
            )))
        })
    }
}

struct Worker {
    orchestrator: Orchestrator,
    settings: RetrievalSettings,
    rule: Arc<Rule>,
    key: NovelKey,
    queue: Arc<Mutex<VecDeque<ChapterEntry>>>,
    state: Arc<JobState>,
    chapter_timeout: Duration,
    request_delay: Duration,
}

impl Worker {
    fn next(&self) -> Option<ChapterEntry> {
        if self.state.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        match self.queue.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }

    async fn run(self) -> Vec<ChapterFailure> {
        let mut failures = Vec::new();
        while let Some(entry) = self.next() {
            let outcome = self.download(&entry).await;
            self.state.record(&outcome);
            let hit_network = !matches!(outcome, ChapterOutcome::AlreadyCached);
            if let ChapterOutcome::Failed(reason) = outcome {
                warn!(key = %self.key, chapter_id = %entry.id, %reason, "Chapter download failed");
                failures.push(ChapterFailure {
                    chapter_id: entry.id,
                    title: entry.title,
                    reason,
                });
            }
            if hit_network && !self.request_delay.is_zero() {
                tokio::time::sleep(jittered(self.request_delay)).await;
            }
        }
        failures
    }

    async fn download(&self, entry: &ChapterEntry) -> ChapterOutcome {
        let read = self
            .orchestrator
            .chapter_for_entry(self.settings, &self.rule, &self.key, entry);
        match tokio::time::timeout(self.chapter_timeout, read).await {
            Ok(Ok(chapter)) => match chapter.freshness {
                Freshness::Fetched => ChapterOutcome::Succeeded,
                Freshness::Cached | Freshness::Stale { .. } => ChapterOutcome::AlreadyCached,
            },
            Ok(Err(e)) => ChapterOutcome::Failed(e.to_string()),
            Err(_) => ChapterOutcome::Failed(format!(
                "Timed out after {}s",
                self.chapter_timeout.as_secs()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_stays_within_half_either_side() {
        let delay = Duration::from_millis(200);
        for _ in 0..100 {
            let d = jittered(delay);
            assert!(d >= Duration::from_millis(100), "{:?}", d);
            assert!(d < Duration::from_millis(300), "{:?}", d);
        }
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_registration_frees_key_unless_disarmed() {
        let jobs: Registry = Arc::new(Mutex::new(HashMap::new()));
        let key = NovelKey::new(1, "https://example.com/book/1");

        lock(&jobs).insert(key.clone(), Arc::new(JobState::default()));
        drop(Registration {
            jobs: jobs.clone(),
            key: key.clone(),
            armed: true,
        });
        assert!(lock(&jobs).is_empty());

        lock(&jobs).insert(key.clone(), Arc::new(JobState::default()));
        Registration {
            jobs: jobs.clone(),
            key: key.clone(),
            armed: true,
        }
        .disarm();
        assert!(lock(&jobs).contains_key(&key));
    }
}
