// tests/scheduler.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use news_pipeline::ingest::{CrawlBackend, CrawlErrorHandler, SchedulerConfig, SchedulerError, SourceScheduler, SourceState};
use news_pipeline::model::NewsSource;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MockBackend {
    fail: bool,
    /// Time each crawl takes; cancellation is not observed.
    delay: Option<Duration>,
    attempts: Mutex<Vec<(String, Instant)>>,
    full_crawls: AtomicUsize,
    stops: AtomicUsize,
}

impl MockBackend {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    fn attempts_for(&self, name: &str) -> Vec<Instant> {
        self.attempts
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, t)| *t)
            .collect()
    }
}

#[async_trait]
impl CrawlBackend for MockBackend {
    async fn crawl_source(&self, _cancel: &CancellationToken, source: &NewsSource) -> anyhow::Result<()> {
        self.attempts.lock().push((source.name.clone(), Instant::now()));
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        if self.fail {
            anyhow::bail!("feed unreachable");
        }
        Ok(())
    }

    async fn crawl_sources(&self, _cancel: &CancellationToken, _sources: &[NewsSource]) -> anyhow::Result<()> {
        self.full_crawls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("feeds unreachable");
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingHandler {
    calls: Mutex<Vec<String>>,
}

impl CrawlErrorHandler for RecordingHandler {
    fn handle_error(&self, source: &str, _err: &anyhow::Error) {
        self.calls.lock().push(source.to_string());
    }
}

impl RecordingHandler {
    fn count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|n| *n == name).count()
    }
}

fn minute_source(name: &str) -> NewsSource {
    NewsSource::new(name).with_frequency(Duration::from_secs(60))
}

fn scheduler(
    sources: Vec<NewsSource>,
    backend: Arc<MockBackend>,
    handler: Arc<RecordingHandler>,
) -> SourceScheduler {
    SourceScheduler::with_error_handler(sources, backend, handler, SchedulerConfig::default())
}

#[tokio::test(start_paused = true)]
async fn failing_crawl_is_attempted_four_times_then_reported() {
    let backend = Arc::new(MockBackend::failing());
    let handler = Arc::new(RecordingHandler::default());
    let s = scheduler(vec![minute_source("flaky")], backend.clone(), handler.clone());

    s.start(&CancellationToken::new()).unwrap();
    sleep(Duration::from_secs(90)).await;

    let attempts = backend.attempts_for("flaky");
    assert_eq!(attempts.len(), 4);
    for pair in attempts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(5));
    }
    assert_eq!(handler.count("flaky"), 1);
    // The immediate full crawl failed as well and was reported under "all".
    assert_eq!(backend.full_crawls.load(Ordering::SeqCst), 1);
    assert_eq!(handler.count("all"), 1);

    let st = s.status();
    let flaky = st.sources.iter().find(|x| x.name == "flaky").unwrap();
    assert_eq!(flaky.consecutive_failures, 1);
    assert_eq!(flaky.state, SourceState::Idle);
    assert!(flaky.last_error.as_deref().unwrap_or_default().contains("feed unreachable"));

    s.stop().await;
}

#[tokio::test(start_paused = true)]
async fn scheduling_continues_after_exhausted_retries() {
    let backend = Arc::new(MockBackend::failing());
    let handler = Arc::new(RecordingHandler::default());
    let s = scheduler(vec![minute_source("flaky")], backend.clone(), handler.clone());

    s.start(&CancellationToken::new()).unwrap();
    sleep(Duration::from_secs(150)).await;

    assert_eq!(backend.attempts_for("flaky").len(), 8);
    assert_eq!(handler.count("flaky"), 2);
    s.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_retry_wait() {
    let backend = Arc::new(MockBackend::failing());
    let handler = Arc::new(RecordingHandler::default());
    let s = scheduler(vec![minute_source("flaky")], backend.clone(), handler.clone());

    s.start(&CancellationToken::new()).unwrap();
    sleep(Duration::from_secs(62)).await;
    assert_eq!(backend.attempts_for("flaky").len(), 1);

    s.stop().await;
    sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.attempts_for("flaky").len(), 1);
    assert_eq!(handler.count("flaky"), 0);
}

#[tokio::test(start_paused = true)]
async fn task_count_tracks_enabled_sources() {
    let backend = Arc::new(MockBackend::default());
    let handler = Arc::new(RecordingHandler::default());
    let s = scheduler(
        vec![
            minute_source("a"),
            minute_source("b"),
            minute_source("c").disabled(),
        ],
        backend.clone(),
        handler,
    );

    assert_eq!(s.active_task_count(), 0);
    s.start(&CancellationToken::new()).unwrap();
    assert_eq!(s.active_task_count(), 2);
    assert!(s.health_report().is_healthy());

    s.add_source(minute_source("d")).unwrap();
    assert_eq!(s.active_task_count(), 3);

    s.add_source(minute_source("e").disabled()).unwrap();
    assert_eq!(s.active_task_count(), 3);

    s.remove_source("a").unwrap();
    assert_eq!(s.active_task_count(), 2);

    s.update_source("b", minute_source("b").disabled()).unwrap();
    assert_eq!(s.active_task_count(), 1);

    s.update_source("c", minute_source("c")).unwrap();
    assert_eq!(s.active_task_count(), 2);

    let report = s.health_report();
    assert_eq!(report.active_tasks, report.enabled_sources);

    s.stop().await;
    assert_eq!(s.active_task_count(), 0);
    assert!(!s.is_running());
}

#[tokio::test(start_paused = true)]
async fn zero_frequency_source_runs_every_thirty_minutes() {
    let backend = Arc::new(MockBackend::default());
    let handler = Arc::new(RecordingHandler::default());
    let s = scheduler(vec![], backend.clone(), handler);
    s.start(&CancellationToken::new()).unwrap();

    s.add_source(NewsSource::new("Reuters-CN")).unwrap();
    let st = s.status();
    assert_eq!(st.sources[0].update_frequency_secs, 1800);

    sleep(Duration::from_secs(1799)).await;
    assert!(backend.attempts_for("Reuters-CN").is_empty());
    sleep(Duration::from_secs(2)).await;
    assert_eq!(backend.attempts_for("Reuters-CN").len(), 1);

    s.stop().await;
}

#[tokio::test(start_paused = true)]
async fn manual_trigger_rules() {
    let backend = Arc::new(MockBackend::default());
    let handler = Arc::new(RecordingHandler::default());
    let s = scheduler(
        vec![minute_source("on"), minute_source("off").disabled()],
        backend.clone(),
        handler,
    );

    assert!(matches!(s.trigger_crawl("on").await, Err(SchedulerError::InvalidOperation(_))));
    assert!(matches!(s.trigger_crawl_all().await, Err(SchedulerError::InvalidOperation(_))));

    s.start(&CancellationToken::new()).unwrap();
    assert!(matches!(s.trigger_crawl("off").await, Err(SchedulerError::InvalidOperation(_))));
    assert!(matches!(s.trigger_crawl("nope").await, Err(SchedulerError::SourceNotFound(_))));

    s.trigger_crawl("on").await.unwrap();
    assert_eq!(backend.attempts_for("on").len(), 1);
    assert!(s.status().sources[0].last_success.is_some());

    s.trigger_crawl_all().await.unwrap();
    s.stop().await;
    assert!(matches!(s.trigger_crawl("on").await, Err(SchedulerError::InvalidOperation(_))));
}

#[tokio::test(start_paused = true)]
async fn manual_trigger_returns_crawl_error_after_retries() {
    let backend = Arc::new(MockBackend::failing());
    let handler = Arc::new(RecordingHandler::default());
    let s = scheduler(vec![minute_source("flaky")], backend.clone(), handler.clone());
    s.start(&CancellationToken::new()).unwrap();

    let err = s.trigger_crawl("flaky").await.unwrap_err();
    assert!(matches!(err, SchedulerError::Crawl { ref name, .. } if name == "flaky"));
    assert_eq!(backend.attempts_for("flaky").len(), 4);
    // Manual failures go to the caller, not to the handler.
    assert_eq!(handler.count("flaky"), 0);
    s.stop().await;
}

#[tokio::test]
async fn source_mutations_validate_names() {
    let backend = Arc::new(MockBackend::default());
    let handler = Arc::new(RecordingHandler::default());
    let s = scheduler(vec![minute_source("a"), minute_source("b")], backend, handler);

    assert!(matches!(s.add_source(minute_source("a")), Err(SchedulerError::DuplicateSource(_))));
    assert!(matches!(s.remove_source("zz"), Err(SchedulerError::SourceNotFound(_))));
    assert!(matches!(
        s.update_source("zz", minute_source("zz")),
        Err(SchedulerError::SourceNotFound(_))
    ));
    assert!(matches!(
        s.update_source("a", minute_source("b")),
        Err(SchedulerError::DuplicateSource(_))
    ));
    s.update_source("a", minute_source("a2")).unwrap();
    let names: Vec<String> = s.sources().into_iter().map(|x| x.name).collect();
    assert_eq!(names, vec!["a2".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let backend = Arc::new(MockBackend::default());
    let handler = Arc::new(RecordingHandler::default());
    let s = scheduler(vec![minute_source("a")], backend.clone(), handler);

    s.stop().await;
    assert_eq!(backend.stops.load(Ordering::SeqCst), 0);

    s.start(&CancellationToken::new()).unwrap();
    s.stop().await;
    s.stop().await;
    assert_eq!(backend.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn parent_cancellation_stops_tasks() {
    let backend = Arc::new(MockBackend::default());
    let handler = Arc::new(RecordingHandler::default());
    let s = scheduler(vec![minute_source("a")], backend.clone(), handler);
    let root = CancellationToken::new();
    s.start(&root).unwrap();

    root.cancel();
    sleep(Duration::from_secs(300)).await;
    assert!(backend.attempts_for("a").is_empty());
    // Handles finished, so the health check no longer counts them.
    assert_eq!(s.active_task_count(), 0);
    s.stop().await;
}

fn state_of(s: &SourceScheduler, name: &str) -> SourceState {
    s.status()
        .sources
        .into_iter()
        .find(|x| x.name == name)
        .map(|x| x.state)
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn tick_during_running_crawl_is_skipped_not_queued() {
    let backend = Arc::new(MockBackend::slow(Duration::from_secs(30)));
    let handler = Arc::new(RecordingHandler::default());
    let s = scheduler(vec![minute_source("a")], backend.clone(), handler);
    let t0 = Instant::now();
    s.start(&CancellationToken::new()).unwrap();

    // A manual crawl from t=55 to t=85 overlaps the tick at t=60.
    sleep(Duration::from_secs(55)).await;
    let manual = {
        let s = s.clone();
        tokio::spawn(async move { s.trigger_crawl("a").await })
    };
    sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.attempts_for("a").len(), 1);
    assert_eq!(state_of(&s, "a"), SourceState::Crawling);

    manual.await.unwrap().unwrap();
    assert_eq!(state_of(&s, "a"), SourceState::Idle);

    // Nothing runs until the next regular tick at t=120.
    sleep(Duration::from_secs(40)).await;
    let attempts = backend.attempts_for("a");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0] - t0, Duration::from_secs(55));
    assert_eq!(attempts[1] - t0, Duration::from_secs(120));

    sleep(Duration::from_secs(30)).await;
    assert_eq!(state_of(&s, "a"), SourceState::Idle);
    assert!(s.status().sources[0].last_success.is_some());
    s.stop().await;
}

#[tokio::test(start_paused = true)]
async fn renaming_a_source_mid_crawl_keeps_it_scheduled() {
    let backend = Arc::new(MockBackend::slow(Duration::from_secs(10)));
    let handler = Arc::new(RecordingHandler::default());
    let s = scheduler(vec![minute_source("a")], backend.clone(), handler);
    s.start(&CancellationToken::new()).unwrap();

    // The crawl that began at t=60 is still running at t=62.
    sleep(Duration::from_secs(62)).await;
    assert_eq!(state_of(&s, "a"), SourceState::Crawling);
    s.update_source("a", minute_source("a2")).unwrap();
    assert_eq!(state_of(&s, "a2"), SourceState::Idle);

    // Ticks for a2 at t=122, 182, ..., 662.
    sleep(Duration::from_secs(618)).await;
    assert_eq!(backend.attempts_for("a").len(), 1);
    assert_eq!(backend.attempts_for("a2").len(), 10);
    assert_eq!(state_of(&s, "a2"), SourceState::Idle);
    let names: Vec<String> = s.status().sources.into_iter().map(|x| x.name).collect();
    assert_eq!(names, vec!["a2".to_string()]);
    s.stop().await;
}

#[tokio::test(start_paused = true)]
async fn removing_a_source_mid_crawl_does_not_bring_it_back() {
    let backend = Arc::new(MockBackend::slow(Duration::from_secs(10)));
    let handler = Arc::new(RecordingHandler::default());
    let s = scheduler(vec![minute_source("a"), minute_source("b")], backend.clone(), handler);
    s.start(&CancellationToken::new()).unwrap();

    sleep(Duration::from_secs(62)).await;
    s.remove_source("a").unwrap();
    s.add_source(minute_source("a")).unwrap();
    // The re-added source is idle even though the old crawl is still running.
    assert_eq!(state_of(&s, "a"), SourceState::Idle);

    sleep(Duration::from_secs(75)).await;
    // Old crawl at t=60, new task's first tick at t=122.
    assert_eq!(backend.attempts_for("a").len(), 2);
    assert_eq!(state_of(&s, "a"), SourceState::Idle);
    s.stop().await;
}
