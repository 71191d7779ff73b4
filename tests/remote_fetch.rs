use chrono::NaiveDate;
use serde_json::{json, Value};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use usage_tracker::config::Config;
use usage_tracker::error::RemoteError;
use usage_tracker::usage::{
    DataSource, LocalScanner, PricingTable, RateCard, ReconcileState, Reconciler, RemoteClient,
};

const KEY: &str = "sk-test-key";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 20).unwrap()
}

fn activity_day(date: &str, spend: f64, model: &str) -> Value {
    let metrics = json!({
        "spend": spend,
        "prompt_tokens": 1_000_000,
        "completion_tokens": 100_000,
        "cache_read_input_tokens": 500_000,
        "cache_creation_input_tokens": 20_000,
        "total_tokens": 1_620_000,
        "successful_requests": 12,
        "failed_requests": 0
    });
    let mut models = serde_json::Map::new();
    models.insert(model.to_string(), json!({ "metrics": metrics }));
    json!({
        "date": date,
        "metrics": metrics,
        "breakdown": { "models": models }
    })
}

fn page(results: Vec<Value>, page: u32, has_more: bool) -> Value {
    json!({
        "results": results,
        "metadata": { "page": page, "total_pages": 3, "has_more": has_more }
    })
}

/// With `exactly_once`, the server fails the test unless each page is requested once.
async fn mount_window_pages(server: &MockServer, exactly_once: bool) {
    let pages = [
        (1, activity_day("2025-01-15", 2.0, "vertex_ai/claude-sonnet-4@20250514"), true),
        (2, activity_day("2025-02-10", 3.0, "claude-sonnet-4"), true),
        (3, activity_day("2025-03-05", 4.0, "anthropic/claude-opus-4"), false),
    ];

    for (number, day, has_more) in pages {
        let mock = Mock::given(method("GET"))
            .and(path("/user/daily/activity"))
            .and(query_param("start_date", "2024-03-20"))
            .and(query_param("end_date", "2025-03-20"))
            .and(query_param("page", number.to_string()))
            .and(header("Authorization", format!("Bearer {}", KEY)))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![day], number, has_more)));
        let mock = if exactly_once { mock.expect(1) } else { mock };
        mock.mount(server).await;
    }
}

async fn mount_today(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/user/daily/activity"))
        .and(query_param("start_date", "2025-03-20"))
        .and(query_param("end_date", "2025-03-20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![activity_day("2025-03-20", 0.75, "claude-sonnet-4")],
            1,
            false,
        )))
        .mount(server)
        .await;
}

async fn mount_user_info(server: &MockServer, status: u16) {
    let body = json!({
        "user_id": "alice",
        "user_info": {
            "user_id": "alice",
            "spend": 42.5,
            "max_budget": 100.0,
            "budget_duration": "30d",
            "budget_reset_at": "2025-04-01T00:00:00Z"
        }
    });
    Mock::given(method("GET"))
        .and(path("/user/info"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

fn client(server: &MockServer) -> RemoteClient {
    RemoteClient::new(&server.uri(), KEY, Duration::from_secs(5)).unwrap()
}

fn local_tree() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("-Users-alice-Documents-PERSONAL-myapp");
    fs::create_dir_all(&dir).unwrap();
    let line = json!({
        "timestamp": "2025-03-01T10:00:00.000Z",
        "message": {
            "role": "assistant",
            "model": "claude-local",
            "usage": { "input_tokens": 1_000_000, "output_tokens": 0 }
        }
    });
    fs::write(dir.join("s.jsonl"), line.to_string()).unwrap();
    tmp
}

fn reconciler(root: &std::path::Path, remote: Option<RemoteClient>) -> Reconciler {
    Reconciler::new(
        LocalScanner::new(root, PricingTable::default()),
        remote,
        &Config::default(),
    )
}

#[tokio::test]
async fn test_pages_are_concatenated_until_has_more_is_false() {
    let server = MockServer::start().await;
    mount_window_pages(&server, true).await;

    let days = client(&server)
        .fetch_daily_activity(NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(), today())
        .await
        .unwrap();

    let dates: Vec<&str> = days.iter().map(|d| d.date.as_str()).collect();
    assert_eq!(dates, vec!["2025-01-15", "2025-02-10", "2025-03-05"]);
}

#[tokio::test]
async fn test_fetch_usage_aggregates_with_exact_estimates() {
    let server = MockServer::start().await;
    mount_window_pages(&server, true).await;

    let usage = client(&server)
        .fetch_usage(today(), 12, &RateCard::STANDARD)
        .await
        .unwrap();

    assert_eq!(usage.monthly.len(), 3);
    for breakdown in usage.monthly.values() {
        let estimated = breakdown.estimated.unwrap();
        assert!((estimated.total() - breakdown.accumulated_cost).abs() < 1e-9);
    }

    // Vendor prefix and @-suffix stripped, so two days share one model key.
    assert!((usage.models["claude-sonnet-4"].accumulated_cost - 5.0).abs() < 1e-9);
    assert!((usage.models["claude-opus-4"].accumulated_cost - 4.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_non_200_is_a_status_error() {
    let server = MockServer::start().await;
    mount_user_info(&server, 401).await;

    let err = client(&server).fetch_account_info().await.unwrap_err();
    assert!(matches!(err, RemoteError::Status(401)));
}

#[tokio::test]
async fn test_garbage_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/info"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let err = client(&server).fetch_account_info().await.unwrap_err();
    assert!(matches!(err, RemoteError::Decode(_)));
}

#[tokio::test]
async fn test_account_info_and_today_spend() {
    let server = MockServer::start().await;
    mount_user_info(&server, 200).await;
    mount_today(&server).await;

    let c = client(&server);
    let account = c.fetch_account_info().await.unwrap();
    assert_eq!(account.user_id.as_deref(), Some("alice"));
    assert_eq!(account.max_budget, Some(100.0));
    assert!(account.budget_reset_at.is_some());

    let spend = c.fetch_today_spend(today()).await.unwrap();
    assert!((spend - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn test_reconciler_prefers_remote_and_keeps_local_projects() {
    let server = MockServer::start().await;
    mount_window_pages(&server, true).await;
    mount_today(&server).await;
    mount_user_info(&server, 200).await;
    let tmp = local_tree();

    let snapshot = reconciler(tmp.path(), Some(client(&server)))
        .run_on(today())
        .await;

    assert_eq!(snapshot.state, ReconcileState::RemoteOk);
    assert_eq!(
        snapshot.transitions,
        vec![ReconcileState::Fetching, ReconcileState::RemoteOk]
    );
    assert_eq!(snapshot.source, DataSource::Api);

    let months: Vec<&str> = snapshot.monthly.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(months, vec!["2025-03", "2025-02", "2025-01"]);
    assert!((snapshot.current_month_cost - 4.0).abs() < 1e-9);
    assert!((snapshot.total_cost - 9.0).abs() < 1e-9);
    assert_eq!(snapshot.today_spend, Some(0.75));
    assert_eq!(snapshot.account.as_ref().unwrap().spend, 42.5);

    assert_eq!(snapshot.models[0].key, "claude-sonnet-4");
    assert!(snapshot.models.iter().all(|m| m.key != "claude-local"));
    assert_eq!(snapshot.projects.len(), 1);
    assert_eq!(snapshot.projects[0].key, "myapp");
}

#[tokio::test]
async fn test_reconciler_falls_back_when_any_remote_read_fails() {
    let server = MockServer::start().await;
    mount_window_pages(&server, false).await;
    mount_today(&server).await;
    mount_user_info(&server, 500).await;
    let tmp = local_tree();

    let snapshot = reconciler(tmp.path(), Some(client(&server)))
        .run_on(today())
        .await;

    assert_eq!(snapshot.state, ReconcileState::RemoteFailed);
    assert_eq!(snapshot.source, DataSource::Local);
    assert!(snapshot.account.is_none());
    assert!(snapshot.today_spend.is_none());

    let months: Vec<&str> = snapshot.monthly.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(months, vec!["2025-03"]);
    assert!((snapshot.total_cost - 6.0).abs() < 1e-9);
    assert_eq!(snapshot.models[0].key, "claude-local");
}

#[tokio::test]
async fn test_failed_later_page_discards_earlier_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/daily/activity"))
        .and(query_param("start_date", "2024-03-20"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(
            vec![activity_day("2025-01-15", 2.0, "claude-sonnet-4")],
            1,
            true,
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/daily/activity"))
        .and(query_param("start_date", "2024-03-20"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_today(&server).await;
    mount_user_info(&server, 200).await;
    let tmp = local_tree();

    let err = client(&server)
        .fetch_daily_activity(NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(), today())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Status(500)));

    let snapshot = reconciler(tmp.path(), Some(client(&server)))
        .run_on(today())
        .await;

    assert_eq!(snapshot.state, ReconcileState::RemoteFailed);
    assert_eq!(snapshot.source, DataSource::Local);
    let months: Vec<&str> = snapshot.monthly.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(months, vec!["2025-03"]);
    assert!(snapshot.models.iter().all(|m| m.key != "claude-sonnet-4"));
    assert!((snapshot.total_cost - 6.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_unreachable_server_falls_back() {
    let tmp = local_tree();
    let unreachable = RemoteClient::new("http://127.0.0.1:9", KEY, Duration::from_secs(2)).unwrap();

    let snapshot = reconciler(tmp.path(), Some(unreachable)).run_on(today()).await;
    assert_eq!(snapshot.state, ReconcileState::RemoteFailed);
    assert_eq!(snapshot.projects[0].key, "myapp");
}

#[test]
fn test_invalid_credentials_are_rejected_before_any_request() {
    for key in ["", "   ", "abc-123", "pk-live"] {
        let err = RemoteClient::new("http://localhost:4000", key, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, RemoteError::MissingCredential));
    }
}
