//! Refresh orchestration against a mocked OSRS Wiki API.

use std::sync::Arc;
use std::time::Duration;

use ge_tracker::directory::ItemDirectory;
use ge_tracker::{CatalogItem, RefreshOrchestrator, RefreshOutcome, Store, TrackerConfig, WikiClient};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn catalog_item(id: i64, name: &str) -> CatalogItem {
    CatalogItem {
        id,
        name: name.to_string(),
        examine: None,
        members: false,
        limit: None,
        value: Some(1),
        lowalch: None,
        highalch: None,
        icon: Some(format!("{name}.png")),
    }
}

fn test_config(server: &MockServer) -> TrackerConfig {
    TrackerConfig {
        latest_url: format!("{}/latest", server.uri()),
        mapping_url: format!("{}/mapping", server.uri()),
        request_timeout: Duration::from_secs(2),
        retry_backoff: Duration::from_millis(10),
        ..TrackerConfig::default()
    }
}

fn seeded_store() -> Store {
    let store = Store::open_in_memory().unwrap();
    store
        .upsert_items(&[
            catalog_item(4151, "Abyssal whip"),
            catalog_item(4587, "Dragon scimitar"),
            catalog_item(1513, "Magic logs"),
        ])
        .unwrap();
    store
}

fn orchestrator(config: &TrackerConfig, store: &Store) -> RefreshOrchestrator {
    let directory = Arc::new(ItemDirectory::new(store.clone(), config.item_ttl));
    let client = WikiClient::new(config).unwrap();
    RefreshOrchestrator::new(client, store.clone(), directory, config)
}

fn latest_body() -> serde_json::Value {
    serde_json::json!({
        "data": {
            "4151": {"high": 1500000, "highTime": 1700000000, "low": 1450000, "lowTime": 1700000000},
            "4587": {"high": 101, "highTime": 1700000000, "low": 50, "lowTime": 1700000000},
            "1513": {"high": 1200, "highTime": null, "low": 1150, "lowTime": null}
        }
    })
}

fn latest_ok() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(latest_body())
}

// ── singleflight and gate ────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_share_one_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(latest_ok().set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let store = seeded_store();
    let orchestrator = orchestrator(&config, &store);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.refresh(false).await })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    let ran = outcomes.iter().filter(|o| **o == RefreshOutcome::Ran).count();
    assert_eq!(ran, 1);
    assert_eq!(store.count_price_points().unwrap(), 3);
    assert!(!orchestrator.status().is_refreshing);
    server.verify().await;
}

#[tokio::test]
async fn forced_callers_join_running_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(latest_ok().set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let store = seeded_store();
    let orchestrator = orchestrator(&config, &store);

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.refresh(true).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(orchestrator.status().is_refreshing);

    assert_eq!(orchestrator.refresh(true).await, RefreshOutcome::Joined);
    assert_eq!(first.await.unwrap(), RefreshOutcome::Ran);
    server.verify().await;
}

#[tokio::test]
async fn second_refresh_within_interval_is_noop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(latest_ok())
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let orchestrator = orchestrator(&config, &seeded_store());

    assert_eq!(orchestrator.refresh(false).await, RefreshOutcome::Ran);
    assert_eq!(orchestrator.refresh(false).await, RefreshOutcome::Skipped);

    let status = orchestrator.status();
    assert!(status.last_success_at.is_some());
    assert!(status.next_eligible_in.unwrap() > Duration::from_secs(55));
    server.verify().await;
}

#[tokio::test]
async fn forced_refresh_bypasses_gate() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(latest_ok())
        .expect(2)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let orchestrator = orchestrator(&config, &seeded_store());

    assert_eq!(orchestrator.refresh(false).await, RefreshOutcome::Ran);
    assert_eq!(orchestrator.refresh(true).await, RefreshOutcome::Ran);
    assert_eq!(orchestrator.status().runs, 2);
    server.verify().await;
}

// ── filtering and persistence ────────────────────────────────────────

#[tokio::test]
async fn refresh_filters_invalid_and_unknown_prices() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "4151": {"high": 1500000, "low": 1450000},
                "4587": {"high": 0, "low": 50},
                "1513": {"high": 1200, "low": null},
                "99999": {"high": 10, "low": 5}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let store = seeded_store();
    let orchestrator = orchestrator(&config, &store);
    orchestrator.refresh(true).await;

    let report = orchestrator.status().last_report.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.unknown_items, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.errors, 0);

    assert!(store.latest_price(4151).unwrap().is_some());
    assert!(store.latest_price(4587).unwrap().is_none());
    assert!(store.latest_price(1513).unwrap().is_none());
    assert_eq!(store.count_price_points().unwrap(), 1);
}

#[tokio::test]
async fn refresh_survives_store_errors_for_single_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(latest_ok())
        .mount(&server)
        .await;

    let config = test_config(&server);
    let store = seeded_store();
    store
        .execute_batch(
            "CREATE TRIGGER reject_whip BEFORE INSERT ON price_points
             WHEN NEW.item_id = 4151
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();

    let orchestrator = orchestrator(&config, &store);
    orchestrator.refresh(true).await;

    let status = orchestrator.status();
    let report = status.last_report.unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.errors, 1);
    assert!(status.last_success_at.is_some());
}

// ── failure policy ───────────────────────────────────────────────────

#[tokio::test]
async fn unavailable_upstream_is_retried_then_absorbed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let store = seeded_store();
    let orchestrator = orchestrator(&config, &store);

    assert_eq!(orchestrator.refresh(false).await, RefreshOutcome::Ran);

    let status = orchestrator.status();
    assert_eq!(status.failures, 1);
    assert!(status.last_success_at.is_none());
    assert!(!status.is_refreshing);
    assert_eq!(store.count_price_points().unwrap(), 0);
    server.verify().await;
}

#[tokio::test]
async fn cold_failure_schedules_retry_after_thirty_seconds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let orchestrator = orchestrator(&config, &seeded_store());
    orchestrator.refresh(false).await;

    let wait = orchestrator.status().next_eligible_in.unwrap();
    assert!(wait <= Duration::from_secs(30));
    assert!(wait > Duration::from_secs(25));
    assert!(orchestrator.next_attempt_delay() <= Duration::from_secs(30));

    // Gate is closed until then, so no further upstream calls
    assert_eq!(orchestrator.refresh(false).await, RefreshOutcome::Skipped);
    server.verify().await;
}

#[tokio::test]
async fn cold_retry_is_clamped_to_short_interval() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = TrackerConfig {
        refresh_interval: Duration::from_secs(10),
        ..test_config(&server)
    };
    let orchestrator = orchestrator(&config, &seeded_store());
    orchestrator.refresh(false).await;

    let wait = orchestrator.status().next_eligible_in.unwrap();
    assert!(wait <= Duration::from_secs(10));
}

#[tokio::test]
async fn invalid_shape_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"prices": []})))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let orchestrator = orchestrator(&config, &seeded_store());
    orchestrator.refresh(true).await;

    let status = orchestrator.status();
    assert_eq!(status.failures, 1);
    assert!(status.next_eligible_in.is_some());
    server.verify().await;
}

#[tokio::test]
async fn transient_failure_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(latest_ok())
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let store = seeded_store();
    let orchestrator = orchestrator(&config, &store);
    orchestrator.refresh(false).await;

    let status = orchestrator.status();
    assert_eq!(status.failures, 0);
    assert!(status.last_success_at.is_some());
    assert_eq!(store.count_price_points().unwrap(), 3);
    server.verify().await;
}

#[tokio::test]
async fn warm_failure_keeps_last_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(latest_ok())
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/latest"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = test_config(&server);
    let orchestrator = orchestrator(&config, &seeded_store());

    orchestrator.refresh(false).await;
    let first_success = orchestrator.status().last_success_at;
    assert!(first_success.is_some());

    orchestrator.refresh(true).await;
    let status = orchestrator.status();
    assert_eq!(status.last_success_at, first_success);
    assert_eq!(status.failures, 1);
    // Gate still follows the earlier success, not the cold-retry delay
    assert!(status.next_eligible_in.unwrap() > Duration::from_secs(30));
}
