//! Integration tests for whole jobs
//!
//! These tests drive the orchestrator against a scripted in-memory fetcher
//! and check what ends up in the sink and the checkpoint.

use async_trait::async_trait;
use serde_json::json;
use shelfscan::catalog::IdentityKey;
use shelfscan::config::{parse_config, Config};
use shelfscan::crawler::{
    FetchRequest, FetchResponse, Fetcher, JobContext, TransportError,
};
use shelfscan::extract::Strategy;
use shelfscan::output::{MemorySink, SqliteSink};
use shelfscan::state::TargetState;
use shelfscan::storage::{
    CheckpointState, CheckpointStore, FileCheckpointStore, StorageError, StorageResult,
};
use shelfscan::{resume_job, run_job, ShelfError};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

type Responder = Box<dyn Fn(&FetchRequest) -> Result<FetchResponse, TransportError> + Send + Sync>;

/// Fetcher that answers from a closure and remembers every request
struct ScriptedFetcher {
    respond: Responder,
    requests: Mutex<Vec<FetchRequest>>,
}

impl ScriptedFetcher {
    fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&FetchRequest) -> Result<FetchResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }

    fn user_agents_for(&self, needle: &str) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.contains(needle))
            .map(|r| r.identity.user_agent.clone())
            .collect()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.respond)(request)
    }
}

/// Checkpoint store whose saves always fail
struct FailingStore;

impl CheckpointStore for FailingStore {
    fn load(&self, _job_id: &str) -> StorageResult<Option<CheckpointState>> {
        Ok(None)
    }

    fn save(&self, _state: &CheckpointState) -> StorageResult<()> {
        Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }

    fn clear(&self, _job_id: &str) -> StorageResult<bool> {
        Ok(false)
    }
}

/// Fetcher that takes `delay` to answer each request
struct SlowFetcher {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowFetcher {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for SlowFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(FetchResponse::ok(&request.url, product_page(2.99)))
    }
}

/// Creates a job with fast throttling and the given sites and targets
fn create_test_config(checkpoint_dir: &Path, sites_and_targets: &str) -> Config {
    create_tuned_config(checkpoint_dir, "", "", sites_and_targets)
}

/// Like `create_test_config`, with extra `[job]` and `[retry]` lines
fn create_tuned_config(
    checkpoint_dir: &Path,
    job_extra: &str,
    retry_extra: &str,
    sites_and_targets: &str,
) -> Config {
    let content = format!(
        r#"
[job]
id = "test-job"
checkpoint-dir = "{}"
max-pages = 5
{}

[throttle]
min-delay-ms = 1
max-delay-ms = 2
jitter-ms = 0

[retry]
base-backoff-ms = 1
max-backoff-ms = 5
{}

[[identity.profile]]
name = "desktop"
user-agent = "TestBrowser/1.0 (desktop)"

[[identity.profile]]
name = "laptop"
user-agent = "TestBrowser/1.0 (laptop)"

[output]
database-path = ":memory:"

{}
"#,
        checkpoint_dir.display(),
        job_extra,
        retry_extra,
        sites_and_targets
    );
    parse_config(&content).expect("test config should be valid")
}

const FRESHMART: &str = r#"
[[site]]
key = "freshmart"
store = "1077"
endpoint-url = "https://api.freshmart.test/search?q={query}&page={page}"
page-url = "https://freshmart.test/search?q={query}&page={page}"
"#;

/// 24 products P1..P24 at $2.99, with P6 at the given price
fn product_page(p6_price: f64) -> String {
    let products: Vec<_> = (1..=24)
        .map(|i| {
            let price = if i == 6 { p6_price } else { 2.99 };
            json!({"id": format!("P{}", i), "name": format!("Product {}", i), "price": price})
        })
        .collect();
    json!({ "products": products }).to_string()
}

fn context(
    config: Config,
    fetcher: Arc<ScriptedFetcher>,
    store: Arc<dyn CheckpointStore>,
    sink: &MemorySink,
) -> JobContext {
    JobContext::new(config, "hash-1", fetcher, store, Box::new(sink.clone()))
}

#[tokio::test]
async fn test_two_pages_with_price_change() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        dir.path(),
        &format!(
            "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"snacks\"\nmax-pages = 2\n",
            FRESHMART
        ),
    );
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let sink = MemorySink::new();

    let fetcher = ScriptedFetcher::new(|request| {
        if request.url.contains("page=1") {
            Ok(FetchResponse::ok(&request.url, product_page(2.99)))
        } else {
            Ok(FetchResponse::ok(&request.url, product_page(3.29)))
        }
    });

    let result = run_job(context(config, fetcher.clone(), store.clone(), &sink))
        .await
        .unwrap();

    assert_eq!(result.scraped, 24);
    assert_eq!(result.duplicates, 24);
    assert_eq!(result.errors, 0);
    assert_eq!(result.price_changes, 1);
    assert_eq!(result.exhausted_targets, vec!["freshmart:snacks".to_string()]);
    assert!(!result.cancelled);

    assert_eq!(sink.len(), 24);
    let changes = sink.price_changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].key, IdentityKey::from_raw("freshmart#id:P6"));
    assert_eq!(changes[0].old_price, 2.99);
    assert_eq!(changes[0].new_price, 3.29);

    let p6 = sink.get(&IdentityKey::from_raw("freshmart#id:P6")).unwrap();
    assert_eq!(p6.price, Some(3.29));
    assert_eq!(p6.strategy, Strategy::StructuredEndpoint);
    assert_eq!(p6.source.store, "1077");

    let checkpoint = store.load("test-job").unwrap().unwrap();
    assert_eq!(checkpoint.seen.len(), 24);
    assert_eq!(checkpoint.counters.price_changes, 1);
    let progress = &checkpoint.targets["freshmart:snacks"];
    assert_eq!(progress.state, TargetState::Exhausted);
    assert_eq!(progress.next_page, 2);
    assert_eq!(progress.pages_done, 2);
    assert!(checkpoint.saved_at.is_some());

    // Only the endpoint was needed
    assert_eq!(fetcher.urls().len(), 2);
}

#[tokio::test]
async fn test_interrupted_job_resumes_where_it_stopped() {
    let dir = TempDir::new().unwrap();
    let targets = format!(
        "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"snacks\"\nmax-pages = 2\n",
        FRESHMART
    );
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());

    // First run: cancel while page 1 is in flight
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let first_fetcher = ScriptedFetcher::new(move |request| {
        trigger.cancel();
        Ok(FetchResponse::ok(&request.url, product_page(2.99)))
    });
    let first_sink = MemorySink::new();
    let mut ctx = context(
        create_test_config(dir.path(), &targets),
        first_fetcher.clone(),
        store.clone(),
        &first_sink,
    );
    ctx.cancel = cancel;

    let first = run_job(ctx).await.unwrap();
    assert!(first.cancelled);
    assert_eq!(first.scraped, 24);
    assert_eq!(first_fetcher.urls().len(), 1);

    let saved = store.load("test-job").unwrap().unwrap();
    assert_eq!(saved.seen.len(), 24);
    assert_eq!(saved.targets["freshmart:snacks"].next_page, 1);
    assert!(!saved.targets["freshmart:snacks"].state.is_terminal());

    // Second run picks up at page 2
    let second_fetcher = ScriptedFetcher::new(|request| {
        Ok(FetchResponse::ok(&request.url, product_page(3.29)))
    });
    let second_sink = MemorySink::new();
    let second = resume_job(context(
        create_test_config(dir.path(), &targets),
        second_fetcher.clone(),
        store.clone(),
        &second_sink,
    ))
    .await
    .unwrap();

    assert!(second.resumed);
    assert!(!second.cancelled);
    assert_eq!(second.scraped, 0);
    assert_eq!(second.duplicates, 24);
    assert_eq!(second.price_changes, 1);
    assert!(second_fetcher.urls().iter().all(|u| !u.contains("page=1")));

    let finished = store.load("test-job").unwrap().unwrap();
    assert_eq!(finished.seen.len(), 24);
    assert_eq!(finished.counters.scraped, 24);
    assert_eq!(
        finished.targets["freshmart:snacks"].state,
        TargetState::Exhausted
    );
}

#[tokio::test]
async fn test_finished_targets_are_skipped_on_rerun() {
    let dir = TempDir::new().unwrap();
    let targets = format!(
        "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"snacks\"\nmax-pages = 1\n",
        FRESHMART
    );
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());

    let fetcher = ScriptedFetcher::new(|request| {
        Ok(FetchResponse::ok(&request.url, product_page(2.99)))
    });
    let sink = MemorySink::new();
    run_job(context(
        create_test_config(dir.path(), &targets),
        fetcher.clone(),
        store.clone(),
        &sink,
    ))
    .await
    .unwrap();

    let rerun_fetcher = ScriptedFetcher::new(|request| {
        Ok(FetchResponse::ok(&request.url, product_page(2.99)))
    });
    let rerun = run_job(context(
        create_test_config(dir.path(), &targets),
        rerun_fetcher.clone(),
        store.clone(),
        &sink,
    ))
    .await
    .unwrap();

    assert!(rerun.resumed);
    assert!(rerun_fetcher.urls().is_empty());
    assert_eq!(rerun.exhausted_targets.len(), 1);
}

#[tokio::test]
async fn test_challenged_target_is_aborted_while_others_continue() {
    let dir = TempDir::new().unwrap();
    let targets = format!(
        "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"walled\"\n\n\
         [[target]]\nsite = \"freshmart\"\nquery = \"open\"\nmax-pages = 1\n",
        FRESHMART
    );
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let sink = MemorySink::new();

    let fetcher = ScriptedFetcher::new(|request| {
        if request.url.contains("q=walled") {
            Ok(FetchResponse::with_status(403, &request.url, "Access denied"))
        } else {
            Ok(FetchResponse::ok(&request.url, product_page(2.99)))
        }
    });

    let result = run_job(context(
        create_test_config(dir.path(), &targets),
        fetcher.clone(),
        store.clone(),
        &sink,
    ))
    .await
    .unwrap();

    assert_eq!(result.aborted_targets, vec!["freshmart:walled".to_string()]);
    assert_eq!(result.exhausted_targets, vec!["freshmart:open".to_string()]);
    assert_eq!(result.blocked, 3);
    assert_eq!(result.scraped, 24);

    // The blocked target rotated through identities
    let mut agents = fetcher.user_agents_for("q=walled");
    agents.sort();
    agents.dedup();
    assert!(agents.len() >= 2);

    let checkpoint = store.load("test-job").unwrap().unwrap();
    let walled = &checkpoint.targets["freshmart:walled"];
    assert_eq!(walled.state, TargetState::Aborted);
    assert!(walled.last_error.is_some());
    assert!(checkpoint.throttle["freshmart:walled"].escalation > 1.0);
}

#[tokio::test]
async fn test_strategy_fallback_to_embedded_data() {
    let dir = TempDir::new().unwrap();
    let targets = format!(
        "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"cereal\"\nmax-pages = 1\n",
        FRESHMART
    );
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let sink = MemorySink::new();

    let fetcher = ScriptedFetcher::new(|request| {
        if request.url.starts_with("https://api.") {
            Ok(FetchResponse::ok(&request.url, r#"{"products": []}"#))
        } else {
            Ok(FetchResponse::ok(
                &request.url,
                r#"<html><body><script id="__NEXT_DATA__">
                {"props": {"pageProps": {"products": [
                    {"id": "C1", "name": "Oats", "price": 4.0},
                    {"id": "C2", "name": "Bran", "price": 3.5},
                    {"id": "C3", "name": "Rye", "price": 5.25}
                ]}}}
                </script></body></html>"#,
            ))
        }
    });

    let result = run_job(context(
        create_test_config(dir.path(), &targets),
        fetcher,
        store,
        &sink,
    ))
    .await
    .unwrap();

    assert_eq!(result.scraped, 3);
    assert!(result.flagged_targets.is_empty());
    let records = sink.records();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.strategy == Strategy::EmbeddedData));
}

#[tokio::test]
async fn test_all_strategies_empty_flags_target() {
    let dir = TempDir::new().unwrap();
    let targets = format!(
        "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"unicorns\"\n",
        FRESHMART
    );
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let sink = MemorySink::new();

    let fetcher = ScriptedFetcher::new(|request| {
        if request.url.starts_with("https://api.") {
            Ok(FetchResponse::ok(&request.url, r#"{"products": []}"#))
        } else {
            Ok(FetchResponse::ok(&request.url, "<html><body>No results</body></html>"))
        }
    });

    let result = run_job(context(
        create_test_config(dir.path(), &targets),
        fetcher,
        store.clone(),
        &sink,
    ))
    .await
    .unwrap();

    assert_eq!(result.flagged_targets, vec!["freshmart:unicorns".to_string()]);
    assert_eq!(result.exhausted_targets, vec!["freshmart:unicorns".to_string()]);
    assert!(sink.is_empty());
    assert!(store.load("test-job").unwrap().unwrap().targets["freshmart:unicorns"].needs_review);
}

#[tokio::test]
async fn test_network_failures_exhaust_retry_budget() {
    let dir = TempDir::new().unwrap();
    let targets = format!(
        "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"milk\"\n",
        FRESHMART
    );
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let sink = MemorySink::new();

    let fetcher = ScriptedFetcher::new(|request| {
        Err(TransportError::Connect {
            url: request.url.clone(),
            message: "connection refused".to_string(),
        })
    });

    let result = run_job(context(
        create_test_config(dir.path(), &targets),
        fetcher.clone(),
        store.clone(),
        &sink,
    ))
    .await
    .unwrap();

    assert_eq!(result.failed_targets, vec!["freshmart:milk".to_string()]);
    assert_eq!(result.errors, 3);
    assert_eq!(fetcher.urls().len(), 3);

    let checkpoint = store.load("test-job").unwrap().unwrap();
    assert_eq!(checkpoint.targets["freshmart:milk"].state, TargetState::Failed);
}

#[tokio::test]
async fn test_checkpoint_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let targets = format!(
        "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"milk\"\nmax-pages = 1\n",
        FRESHMART
    );
    let sink = MemorySink::new();
    let fetcher = ScriptedFetcher::new(|request| {
        Ok(FetchResponse::ok(&request.url, product_page(2.99)))
    });

    let result = run_job(context(
        create_test_config(dir.path(), &targets),
        fetcher,
        Arc::new(FailingStore),
        &sink,
    ))
    .await;

    match result {
        Err(e) => {
            assert!(e.is_fatal());
            assert!(matches!(e, ShelfError::CheckpointIo(_)));
        }
        Ok(_) => panic!("expected the checkpoint failure to stop the job"),
    }
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let dir = TempDir::new().unwrap();
    let targets = format!(
        "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"milk\"\n",
        FRESHMART
    );
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let sink = MemorySink::new();
    let fetcher = ScriptedFetcher::new(|request| {
        Ok(FetchResponse::ok(&request.url, product_page(2.99)))
    });

    let ctx = context(
        create_test_config(dir.path(), &targets),
        fetcher.clone(),
        store.clone(),
        &sink,
    );
    ctx.cancel.cancel();

    let result = run_job(ctx).await.unwrap();
    assert!(result.cancelled);
    assert_eq!(result.scraped, 0);
    assert!(fetcher.urls().is_empty());

    // The final flush still happened
    let checkpoint = store.load("test-job").unwrap().unwrap();
    assert_eq!(checkpoint.targets["freshmart:milk"].state, TargetState::Pending);
}

#[tokio::test]
async fn test_resume_without_checkpoint() {
    let dir = TempDir::new().unwrap();
    let targets = format!(
        "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"milk\"\n",
        FRESHMART
    );
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let sink = MemorySink::new();
    let fetcher = ScriptedFetcher::new(|request| {
        Ok(FetchResponse::ok(&request.url, "{}"))
    });

    let result = resume_job(context(
        create_test_config(dir.path(), &targets),
        fetcher,
        store,
        &sink,
    ))
    .await;

    assert!(matches!(result, Err(ShelfError::NoCheckpoint(id)) if id == "test-job"));
}

#[tokio::test]
async fn test_sqlite_sink_end_to_end() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("catalog.db");
    let targets = format!(
        "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"snacks\"\nmax-pages = 2\n",
        FRESHMART
    );
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let fetcher = ScriptedFetcher::new(|request| {
        if request.url.contains("page=1") {
            Ok(FetchResponse::ok(&request.url, product_page(2.99)))
        } else {
            Ok(FetchResponse::ok(&request.url, product_page(3.29)))
        }
    });

    let ctx = JobContext::new(
        create_test_config(dir.path(), &targets),
        "hash-1",
        fetcher,
        store,
        Box::new(SqliteSink::new(&db_path).unwrap()),
    );
    run_job(ctx).await.unwrap();

    let sink = SqliteSink::new(&db_path).unwrap();
    assert_eq!(sink.count_records().unwrap(), 24);
    assert_eq!(sink.count_price_changes().unwrap(), 1);
    assert_eq!(
        sink.record_price(&IdentityKey::from_raw("freshmart#id:P6")).unwrap(),
        Some(3.29)
    );
}

#[tokio::test]
async fn test_slow_fetches_time_out_and_fail_target() {
    let dir = TempDir::new().unwrap();
    let config = create_tuned_config(
        dir.path(),
        "fetch-timeout-secs = 1",
        "max-attempts = 2",
        &format!(
            "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"milk\"\n",
            FRESHMART
        ),
    );
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let sink = MemorySink::new();
    let fetcher = SlowFetcher::new(Duration::from_secs(3));

    let ctx = JobContext::new(
        config,
        "hash-1",
        fetcher.clone(),
        store.clone(),
        Box::new(sink.clone()),
    );
    let result = run_job(ctx).await.unwrap();

    assert_eq!(result.failed_targets, vec!["freshmart:milk".to_string()]);
    assert_eq!(result.errors, 2);
    assert_eq!(fetcher.calls(), 2);
    assert!(sink.is_empty());

    let checkpoint = store.load("test-job").unwrap().unwrap();
    let milk = &checkpoint.targets["freshmart:milk"];
    assert_eq!(milk.state, TargetState::Failed);
    assert!(milk.last_error.as_deref().unwrap().contains("timeout"));
}

#[tokio::test]
async fn test_target_timeout_aborts_for_good() {
    let dir = TempDir::new().unwrap();
    let targets = format!(
        "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"milk\"\n",
        FRESHMART
    );
    let job = "fetch-timeout-secs = 5\ntarget-timeout-secs = 1";
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let sink = MemorySink::new();
    let fetcher = SlowFetcher::new(Duration::from_secs(10));

    let ctx = JobContext::new(
        create_tuned_config(dir.path(), job, "", &targets),
        "hash-1",
        fetcher.clone(),
        store.clone(),
        Box::new(sink.clone()),
    );
    let result = tokio::time::timeout(Duration::from_secs(5), run_job(ctx))
        .await
        .expect("the target budget should end the job")
        .unwrap();

    assert_eq!(result.aborted_targets, vec!["freshmart:milk".to_string()]);
    assert_eq!(fetcher.calls(), 1);

    let checkpoint = store.load("test-job").unwrap().unwrap();
    let milk = &checkpoint.targets["freshmart:milk"];
    assert_eq!(milk.state, TargetState::Aborted);
    assert_eq!(milk.last_error.as_deref(), Some("target timeout"));

    // An aborted target stays aborted on the next run
    let rerun_fetcher = SlowFetcher::new(Duration::from_millis(1));
    let rerun = run_job(JobContext::new(
        create_tuned_config(dir.path(), job, "", &targets),
        "hash-1",
        rerun_fetcher.clone(),
        store.clone(),
        Box::new(sink.clone()),
    ))
    .await
    .unwrap();

    assert!(rerun.resumed);
    assert_eq!(rerun_fetcher.calls(), 0);
    assert_eq!(rerun.aborted_targets, vec!["freshmart:milk".to_string()]);
}

#[tokio::test]
async fn test_huge_retry_after_is_capped() {
    let dir = TempDir::new().unwrap();
    let targets = format!(
        "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"milk\"\nmax-pages = 1\n",
        FRESHMART
    );
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let sink = MemorySink::new();

    let calls = AtomicUsize::new(0);
    let fetcher = ScriptedFetcher::new(move |request| {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            let mut response = FetchResponse::with_status(429, &request.url, "slow down");
            response.retry_after = Some(Duration::MAX);
            Ok(response)
        } else {
            Ok(FetchResponse::ok(&request.url, product_page(2.99)))
        }
    });

    let job = run_job(context(
        create_test_config(dir.path(), &targets),
        fetcher.clone(),
        store,
        &sink,
    ));
    let result = tokio::time::timeout(Duration::from_secs(10), job)
        .await
        .expect("the retry delay should be capped")
        .unwrap();

    assert_eq!(result.blocked, 1);
    assert_eq!(result.scraped, 24);
    assert_eq!(result.exhausted_targets, vec!["freshmart:milk".to_string()]);
    assert_eq!(fetcher.urls().len(), 2);
}

#[tokio::test]
async fn test_blocked_retries_are_budgeted_per_target() {
    let dir = TempDir::new().unwrap();
    let targets = format!(
        "{}\n[[target]]\nsite = \"freshmart\"\nquery = \"milk\"\nmax-pages = 10\n",
        FRESHMART
    );
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let sink = MemorySink::new();

    // Every page is blocked once before it succeeds
    let calls = AtomicUsize::new(0);
    let fetcher = ScriptedFetcher::new(move |request| {
        if calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            Ok(FetchResponse::with_status(429, &request.url, "slow down"))
        } else {
            Ok(FetchResponse::ok(&request.url, product_page(2.99)))
        }
    });

    let result = run_job(context(
        create_tuned_config(dir.path(), "", "max-blocked-retries = 3", &targets),
        fetcher.clone(),
        store.clone(),
        &sink,
    ))
    .await
    .unwrap();

    assert_eq!(result.aborted_targets, vec!["freshmart:milk".to_string()]);
    assert_eq!(result.blocked, 4);
    assert_eq!(result.pages, 3);
    assert_eq!(fetcher.urls().len(), 7);

    let checkpoint = store.load("test-job").unwrap().unwrap();
    let milk = &checkpoint.targets["freshmart:milk"];
    assert_eq!(milk.state, TargetState::Aborted);
    assert_eq!(milk.next_page, 3);
    assert!(milk.last_error.as_deref().unwrap().contains("blocked retries"));
}
