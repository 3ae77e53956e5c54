//! # Source scheduler
//!
//! One periodic task per enabled source, keyed by source name. Each tick runs
//! a crawl with a fixed-delay retry (`1 + max_retries` attempts); errors that
//! survive every attempt go to the [`CrawlErrorHandler`] and the loop carries
//! on at the next tick. A tick that finds its source still crawling is
//! skipped, not queued.
//!
//! The source list and the task map live behind one lock. `stop` cancels a
//! shared token that every task (and the health check) listens on; retry
//! sleeps listen on it as well.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{CrawlBackend, CrawlErrorHandler, LogErrorHandler};
use crate::metrics as m;
use crate::model::NewsSource;

/// Source name reported to the error handler for full crawls.
pub const ALL_SOURCES: &str = "all";

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("source {0:?} already exists")]
    DuplicateSource(String),
    #[error("source {0:?} not found")]
    SourceNotFound(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("crawl of {name:?} failed")]
    Crawl {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub health_check_interval_secs: u64,
    /// Period for sources without an update frequency.
    pub default_frequency_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 5,
            health_check_interval_secs: 300,
            default_frequency_secs: 1800,
        }
    }
}

impl SchedulerConfig {
    pub fn sanitize(&mut self) {
        let d = Self::default();
        if self.health_check_interval_secs == 0 {
            self.health_check_interval_secs = d.health_check_interval_secs;
        }
        if self.default_frequency_secs == 0 {
            self.default_frequency_secs = d.default_frequency_secs;
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn default_frequency(&self) -> Duration {
        Duration::from_secs(self.default_frequency_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    #[default]
    Idle,
    Crawling,
}

#[derive(Debug, Clone, Default)]
struct SourceRuntime {
    state: SourceState,
    /// Ticket of the crawl that owns `Crawling`.
    crawl_ticket: u64,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
    consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub enabled: bool,
    pub category: String,
    pub update_frequency_secs: u64,
    pub active_task: bool,
    pub state: SourceState,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub active_tasks: usize,
    pub enabled_sources: usize,
    pub sources: Vec<SourceStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub active_tasks: usize,
    pub enabled_sources: usize,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.active_tasks == self.enabled_sources
    }
}

enum CrawlOutcome {
    Success,
    Failed(anyhow::Error),
    Cancelled,
}

struct SourceTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct State {
    sources: Vec<NewsSource>,
    tasks: HashMap<String, SourceTask>,
    running: bool,
    shutdown: CancellationToken,
}

impl State {
    fn enabled_count(&self) -> usize {
        self.sources.iter().filter(|s| s.enabled).count()
    }

    fn active_count(&self) -> usize {
        self.tasks.values().filter(|t| !t.handle.is_finished()).count()
    }
}

struct Inner {
    backend: Arc<dyn CrawlBackend>,
    errors: Arc<dyn CrawlErrorHandler>,
    cfg: SchedulerConfig,
    state: RwLock<State>,
    runtime: Mutex<HashMap<String, SourceRuntime>>,
    next_ticket: AtomicU64,
    last_health: Mutex<Option<HealthReport>>,
}

/// Cheap to clone; clones share the same scheduler.
#[derive(Clone)]
pub struct SourceScheduler {
    inner: Arc<Inner>,
}

impl SourceScheduler {
    pub fn new(sources: Vec<NewsSource>, backend: Arc<dyn CrawlBackend>, cfg: SchedulerConfig) -> Self {
        Self::with_error_handler(sources, backend, Arc::new(LogErrorHandler), cfg)
    }

    pub fn with_error_handler(
        sources: Vec<NewsSource>,
        backend: Arc<dyn CrawlBackend>,
        errors: Arc<dyn CrawlErrorHandler>,
        cfg: SchedulerConfig,
    ) -> Self {
        m::ensure_described();
        let mut unique: Vec<NewsSource> = Vec::with_capacity(sources.len());
        for s in sources {
            if unique.iter().any(|u| u.name == s.name) {
                warn!(target: "scheduler", source = %s.name, "duplicate source name in configuration; ignoring");
                continue;
            }
            unique.push(s);
        }
        Self {
            inner: Arc::new(Inner {
                backend,
                errors,
                cfg,
                state: RwLock::new(State {
                    sources: unique,
                    tasks: HashMap::new(),
                    running: false,
                    shutdown: CancellationToken::new(),
                }),
                runtime: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(1),
                last_health: Mutex::new(None),
            }),
        }
    }

    /// Spawn one task per enabled source, the health check and an immediate
    /// full crawl (not awaited). Cancelling `parent` stops the tasks too.
    pub fn start(&self, parent: &CancellationToken) -> Result<(), SchedulerError> {
        let inner = &self.inner;
        let mut st = inner.state.write();
        if st.running {
            return Err(SchedulerError::InvalidOperation("scheduler already running".into()));
        }
        let shutdown = parent.child_token();
        st.shutdown = shutdown.clone();
        st.running = true;

        let enabled: Vec<NewsSource> = st.sources.iter().filter(|s| s.enabled).cloned().collect();
        for source in &enabled {
            let task = spawn_source_task(inner, &shutdown, source.clone());
            st.tasks.insert(source.name.clone(), task);
        }
        gauge!(m::ACTIVE_TASKS).set(st.tasks.len() as f64);

        let initial = Arc::clone(inner);
        let token = shutdown.clone();
        let sources = enabled.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                res = initial.backend.crawl_sources(&token, &sources) => {
                    if let Err(e) = res {
                        initial.errors.handle_error(ALL_SOURCES, &e);
                    }
                }
            }
        });

        let health = Arc::clone(inner);
        let token = shutdown;
        tokio::spawn(async move {
            let period = health.cfg.health_check_interval();
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => { health.check_health(); }
                }
            }
        });

        info!(target: "scheduler", sources = enabled.len(), "scheduler started");
        Ok(())
    }

    /// Cancel every task and stop the backend. No-op when not running.
    pub async fn stop(&self) {
        {
            let mut st = self.inner.state.write();
            if !st.running {
                return;
            }
            st.running = false;
            st.shutdown.cancel();
            for (_, task) in st.tasks.drain() {
                task.cancel.cancel();
            }
        }
        gauge!(m::ACTIVE_TASKS).set(0.0);
        self.inner.backend.stop().await;
        info!(target: "scheduler", "scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.read().running
    }

    /// Crawl one source now, with retries, from the caller's task.
    pub async fn trigger_crawl(&self, name: &str) -> Result<(), SchedulerError> {
        let (source, token) = {
            let st = self.inner.state.read();
            if !st.running {
                return Err(SchedulerError::InvalidOperation("scheduler is not running".into()));
            }
            let source = st
                .sources
                .iter()
                .find(|s| s.name == name)
                .cloned()
                .ok_or_else(|| SchedulerError::SourceNotFound(name.to_string()))?;
            if !source.enabled {
                return Err(SchedulerError::InvalidOperation(format!(
                    "source {name:?} is disabled"
                )));
            }
            (source, st.shutdown.clone())
        };

        let ticket = self.inner.begin_crawl(name);
        let outcome = self.inner.crawl_with_retry(&token, &source).await;
        self.inner.finish_crawl(name, &outcome, ticket);
        match outcome {
            CrawlOutcome::Success => Ok(()),
            CrawlOutcome::Failed(e) => Err(SchedulerError::Crawl {
                name: name.to_string(),
                source: e.into(),
            }),
            CrawlOutcome::Cancelled => Err(SchedulerError::InvalidOperation(
                "scheduler stopped during crawl".into(),
            )),
        }
    }

    /// Crawl every enabled source once through the backend.
    pub async fn trigger_crawl_all(&self) -> Result<(), SchedulerError> {
        let (sources, token) = {
            let st = self.inner.state.read();
            if !st.running {
                return Err(SchedulerError::InvalidOperation("scheduler is not running".into()));
            }
            let sources: Vec<NewsSource> = st.sources.iter().filter(|s| s.enabled).cloned().collect();
            (sources, st.shutdown.clone())
        };
        self.inner
            .backend
            .crawl_sources(&token, &sources)
            .await
            .map_err(|e| SchedulerError::Crawl {
                name: ALL_SOURCES.to_string(),
                source: e.into(),
            })
    }

    pub fn add_source(&self, source: NewsSource) -> Result<(), SchedulerError> {
        let mut st = self.inner.state.write();
        if st.sources.iter().any(|s| s.name == source.name) {
            return Err(SchedulerError::DuplicateSource(source.name));
        }
        if st.running && source.enabled {
            let shutdown = st.shutdown.clone();
            let task = spawn_source_task(&self.inner, &shutdown, source.clone());
            st.tasks.insert(source.name.clone(), task);
        }
        info!(target: "scheduler", source = %source.name, enabled = source.enabled, "source added");
        st.sources.push(source);
        gauge!(m::ACTIVE_TASKS).set(st.tasks.len() as f64);
        Ok(())
    }

    /// Replace the source stored under `name` (which may rename it) and
    /// restart its task.
    pub fn update_source(&self, name: &str, source: NewsSource) -> Result<(), SchedulerError> {
        let mut st = self.inner.state.write();
        let idx = st
            .sources
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| SchedulerError::SourceNotFound(name.to_string()))?;
        if source.name != name && st.sources.iter().any(|s| s.name == source.name) {
            return Err(SchedulerError::DuplicateSource(source.name));
        }

        if let Some(old) = st.tasks.remove(name) {
            old.cancel.cancel();
        }
        if source.name != name {
            // A crawl still running under the old name belongs to the
            // cancelled task; the renamed source starts idle.
            let mut rt = self.inner.runtime.lock();
            if let Some(mut prev) = rt.remove(name) {
                prev.state = SourceState::Idle;
                prev.crawl_ticket = 0;
                rt.insert(source.name.clone(), prev);
            }
        }
        if st.running && source.enabled {
            let shutdown = st.shutdown.clone();
            let task = spawn_source_task(&self.inner, &shutdown, source.clone());
            st.tasks.insert(source.name.clone(), task);
        }
        info!(target: "scheduler", source = %name, new_name = %source.name, enabled = source.enabled, "source updated");
        st.sources[idx] = source;
        gauge!(m::ACTIVE_TASKS).set(st.tasks.len() as f64);
        Ok(())
    }

    pub fn remove_source(&self, name: &str) -> Result<(), SchedulerError> {
        let mut st = self.inner.state.write();
        let idx = st
            .sources
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| SchedulerError::SourceNotFound(name.to_string()))?;
        st.sources.remove(idx);
        if let Some(task) = st.tasks.remove(name) {
            task.cancel.cancel();
        }
        self.inner.runtime.lock().remove(name);
        gauge!(m::ACTIVE_TASKS).set(st.tasks.len() as f64);
        info!(target: "scheduler", source = %name, "source removed");
        Ok(())
    }

    pub fn sources(&self) -> Vec<NewsSource> {
        self.inner.state.read().sources.clone()
    }

    pub fn active_task_count(&self) -> usize {
        self.inner.state.read().active_count()
    }

    pub fn status(&self) -> SchedulerStatus {
        let st = self.inner.state.read();
        let rt = self.inner.runtime.lock();
        let default_freq = self.inner.cfg.default_frequency();
        let sources = st
            .sources
            .iter()
            .map(|s| {
                let r = rt.get(&s.name).cloned().unwrap_or_default();
                SourceStatus {
                    name: s.name.clone(),
                    enabled: s.enabled,
                    category: s.category.clone(),
                    update_frequency_secs: s.update_frequency_or(default_freq).as_secs(),
                    active_task: st.tasks.get(&s.name).is_some_and(|t| !t.handle.is_finished()),
                    state: r.state,
                    last_success: r.last_success,
                    last_error: r.last_error,
                    consecutive_failures: r.consecutive_failures,
                }
            })
            .collect();
        SchedulerStatus {
            running: st.running,
            active_tasks: st.active_count(),
            enabled_sources: st.enabled_count(),
            sources,
        }
    }

    /// Active task count vs enabled source count, as the health check sees it.
    pub fn health_report(&self) -> HealthReport {
        self.inner.health_report()
    }

    /// Report from the most recent periodic health check.
    pub fn last_health_check(&self) -> Option<HealthReport> {
        *self.inner.last_health.lock()
    }
}

impl Inner {
    fn health_report(&self) -> HealthReport {
        let st = self.state.read();
        HealthReport {
            active_tasks: st.active_count(),
            enabled_sources: st.enabled_count(),
        }
    }

    /// Observational only; never restarts tasks.
    fn check_health(&self) -> HealthReport {
        let report = self.health_report();
        *self.last_health.lock() = Some(report);
        gauge!(m::ACTIVE_TASKS).set(report.active_tasks as f64);
        gauge!(m::HEALTH_MISMATCH)
            .set(report.enabled_sources as f64 - report.active_tasks as f64);
        if report.is_healthy() {
            debug!(target: "scheduler", active = report.active_tasks, "health check ok");
        } else {
            warn!(
                target: "scheduler",
                active = report.active_tasks,
                enabled = report.enabled_sources,
                "active task count does not match enabled sources"
            );
        }
        report
    }

    /// Mark `name` as crawling and return the crawl's ticket, or `None` if
    /// another crawl of it is running.
    fn begin_crawl(&self, name: &str) -> Option<u64> {
        let mut rt = self.runtime.lock();
        let entry = rt.entry(name.to_string()).or_default();
        if entry.state == SourceState::Crawling {
            return None;
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        entry.state = SourceState::Crawling;
        entry.crawl_ticket = ticket;
        Some(ticket)
    }

    /// Record the outcome. Only the ticket holder resets the state; a name
    /// removed or renamed meanwhile is left alone.
    fn finish_crawl(&self, name: &str, outcome: &CrawlOutcome, ticket: Option<u64>) {
        let mut rt = self.runtime.lock();
        let Some(entry) = rt.get_mut(name) else {
            debug!(target: "scheduler", source = %name, "crawl finished for a source no longer scheduled");
            return;
        };
        if ticket.is_some_and(|t| t == entry.crawl_ticket) {
            entry.state = SourceState::Idle;
        }
        match outcome {
            CrawlOutcome::Success => {
                entry.last_success = Some(Utc::now());
                entry.last_error = None;
                entry.consecutive_failures = 0;
            }
            CrawlOutcome::Failed(e) => {
                entry.last_error = Some(format!("{e:#}"));
                entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
            }
            CrawlOutcome::Cancelled => {}
        }
    }

    /// `1 + max_retries` attempts with a fixed delay; the delay ends early on
    /// cancellation.
    async fn crawl_with_retry(&self, cancel: &CancellationToken, source: &NewsSource) -> CrawlOutcome {
        let attempts = self.cfg.max_retries.saturating_add(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                counter!(m::CRAWL_RETRIES).increment(1);
                tokio::select! {
                    _ = cancel.cancelled() => return CrawlOutcome::Cancelled,
                    _ = tokio::time::sleep(self.cfg.retry_delay()) => {}
                }
            }
            if cancel.is_cancelled() {
                return CrawlOutcome::Cancelled;
            }
            counter!(m::CRAWL_ATTEMPTS).increment(1);
            match self.backend.crawl_source(cancel, source).await {
                Ok(()) => {
                    debug!(target: "scheduler", source = %source.name, attempt, "crawl ok");
                    return CrawlOutcome::Success;
                }
                Err(e) => {
                    warn!(target: "scheduler", source = %source.name, attempt, max_attempts = attempts, error = ?e, "crawl attempt failed");
                    last_err = Some(e);
                }
            }
        }
        counter!(m::CRAWL_FAILURES).increment(1);
        CrawlOutcome::Failed(last_err.unwrap_or_else(|| anyhow!("no crawl attempt was made")))
    }
}

fn spawn_source_task(inner: &Arc<Inner>, shutdown: &CancellationToken, source: NewsSource) -> SourceTask {
    let cancel = shutdown.child_token();
    let handle = tokio::spawn(run_source_loop(Arc::clone(inner), source, cancel.clone()));
    SourceTask { cancel, handle }
}

async fn run_source_loop(inner: Arc<Inner>, source: NewsSource, cancel: CancellationToken) {
    let period = source.update_frequency_or(inner.cfg.default_frequency());
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(target: "scheduler", source = %source.name, period = ?period, "source task started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(ticket) = inner.begin_crawl(&source.name) else {
                    counter!(m::CRAWL_TICKS_SKIPPED).increment(1);
                    debug!(target: "scheduler", source = %source.name, "previous crawl still running; tick skipped");
                    continue;
                };
                let outcome = inner.crawl_with_retry(&cancel, &source).await;
                inner.finish_crawl(&source.name, &outcome, Some(ticket));
                if let CrawlOutcome::Failed(e) = &outcome {
                    inner.errors.handle_error(&source.name, e);
                }
            }
        }
    }
    debug!(target: "scheduler", source = %source.name, "source task stopped");
}
