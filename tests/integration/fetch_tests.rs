//! Integration tests for the HTTP fetcher
//!
//! These tests use wiremock to stand in for storefronts and check what the
//! fetcher sends and how its responses classify.

use serde_json::json;
use shelfscan::config::parse_config;
use shelfscan::crawler::{
    run_job, Classifier, FailureKind, FetchMode, FetchRequest, Fetcher, HttpFetcher, Identity,
    JobContext, TransportError,
};
use shelfscan::output::MemorySink;
use shelfscan::storage::FileCheckpointStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(url: String, mode: FetchMode) -> FetchRequest {
    FetchRequest {
        url,
        identity: Identity::fallback(),
        mode,
        timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_fetch_sends_identity_headers() {
    let mock_server = MockServer::start().await;
    // Header matching splits on commas, so the profile keeps both values comma-free
    let identity = Identity {
        name: "test-desktop".to_string(),
        user_agent: "ShelfscanTest/1.0 (X11; Linux x86_64)".to_string(),
        viewport: (1280, 800),
        locale: "fr".to_string(),
        timezone: "America/Montreal".to_string(),
    };

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(header("user-agent", "ShelfscanTest/1.0 (X11; Linux x86_64)"))
        .and(header("accept-language", "fr"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(r#"{"products": []}"#, "application/json"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = HttpFetcher::new().expect("Failed to build fetcher");
    let response = fetcher
        .fetch(&FetchRequest {
            url: format!("{}/search?q=milk", mock_server.uri()),
            identity,
            mode: FetchMode::Plain,
            timeout: Duration::from_secs(5),
        })
        .await
        .expect("Fetch should succeed");

    assert_eq!(response.status, 200);
    assert!(response
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("application/json")));
    assert_eq!(response.body, r#"{"products": []}"#);
    assert_eq!(
        Classifier::new(&[]).classify(&Ok(response)),
        FailureKind::Ok
    );
}

#[tokio::test]
async fn test_rate_limit_with_retry_after() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&mock_server)
        .await;

    let fetcher = HttpFetcher::new().expect("Failed to build fetcher");
    let outcome = fetcher
        .fetch(&request(
            format!("{}/search", mock_server.uri()),
            FetchMode::Plain,
        ))
        .await;

    let response = outcome.as_ref().expect("A 429 is still a response");
    assert_eq!(response.status, 429);
    assert_eq!(response.retry_after, Some(Duration::from_secs(7)));
    assert_eq!(
        Classifier::new(&[]).classify(&outcome),
        FailureKind::RateLimited
    );
}

#[tokio::test]
async fn test_challenge_page_with_site_marker() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body>Please hold while we verify your visit</body></html>"),
        )
        .mount(&mock_server)
        .await;

    let fetcher = HttpFetcher::new().expect("Failed to build fetcher");
    let outcome = fetcher
        .fetch(&request(mock_server.uri(), FetchMode::Plain))
        .await;

    assert_eq!(Classifier::new(&[]).classify(&outcome), FailureKind::Ok);
    assert_eq!(
        Classifier::new(&["verify your visit".to_string()]).classify(&outcome),
        FailureKind::BotChallenge
    );
}

#[tokio::test]
async fn test_connection_refused() {
    // Grab a free port and release it so nothing is listening
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
        listener.local_addr().expect("No local address").port()
    };

    let fetcher = HttpFetcher::new().expect("Failed to build fetcher");
    let outcome = fetcher
        .fetch(&request(
            format!("http://127.0.0.1:{}/search", port),
            FetchMode::Plain,
        ))
        .await;

    assert!(matches!(
        outcome,
        Err(TransportError::Connect { .. }) | Err(TransportError::Other(_))
    ));
    assert_eq!(
        Classifier::new(&[]).classify(&outcome),
        FailureKind::NetworkError
    );
}

#[tokio::test]
async fn test_rendered_mode_is_unavailable() {
    let fetcher = HttpFetcher::new().expect("Failed to build fetcher");
    let outcome = fetcher
        .fetch(&request(
            "https://freshmart.test/search".to_string(),
            FetchMode::Rendered,
        ))
        .await;

    assert!(matches!(outcome, Err(TransportError::RenderingUnavailable)));
    assert_eq!(
        Classifier::new(&[]).classify(&outcome),
        FailureKind::UnknownError
    );
}

#[tokio::test]
async fn test_warm_up_visits_home_page() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Welcome</html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = parse_config(&format!(
        r#"
[job]
id = "warmup"

[[site]]
key = "freshmart"
store = "1077"
page-url = "{}/search?q={{query}}&page={{page}}"
warmup = true
"#,
        mock_server.uri()
    ))
    .expect("Failed to parse config");

    let fetcher = HttpFetcher::new().expect("Failed to build fetcher");
    let succeeded = fetcher
        .warm_up(&Identity::fallback(), &config.sites[0])
        .await;

    assert_eq!(succeeded, 1);
}

#[tokio::test]
async fn test_job_against_mock_storefront() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().expect("Failed to create temp dir");

    let page = |ids: std::ops::RangeInclusive<u32>| {
        let products: Vec<_> = ids
            .map(|i| json!({"id": format!("M{}", i), "name": format!("Milk {}", i), "price": 1.5}))
            .collect();
        json!({"products": products, "hasMore": true}).to_string()
    };

    Mock::given(method("GET"))
        .and(path("/api/search"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(1..=10)))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/search"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(11..=15)))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/search"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"products": []}"#))
        .mount(&mock_server)
        .await;

    let config = parse_config(&format!(
        r#"
[job]
id = "mock-job"
checkpoint-dir = "{dir}"

[throttle]
min-delay-ms = 1
max-delay-ms = 2
jitter-ms = 0

[output]
database-path = ":memory:"

[[site]]
key = "freshmart"
store = "1077"
endpoint-url = "{uri}/api/search?q={{query}}&page={{page}}"
embedded-data = false

[[target]]
site = "freshmart"
query = "milk"
"#,
        dir = dir.path().display(),
        uri = mock_server.uri()
    ))
    .expect("Failed to parse config");

    let store = Arc::new(FileCheckpointStore::new(dir.path()).expect("Failed to open store"));
    let sink = MemorySink::new();
    let ctx = JobContext::new(
        config,
        "hash",
        Arc::new(HttpFetcher::new().expect("Failed to build fetcher")),
        store,
        Box::new(sink.clone()),
    );

    let result = run_job(ctx).await.expect("Job should complete");

    assert_eq!(result.scraped, 15);
    assert_eq!(result.pages, 2);
    assert_eq!(result.exhausted_targets, vec!["freshmart:milk".to_string()]);
    assert!(result.flagged_targets.is_empty());
    assert_eq!(sink.len(), 15);
}
