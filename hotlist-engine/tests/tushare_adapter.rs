//! Tushare adapter tests against a mock HTTP server
//!
//! Verifies request shape, envelope decoding, retry policy and the
//! trading calendar without touching the real API.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hotlist_common::TushareConfig;
use hotlist_engine::calendar::{Clock, FixedClock, TradingCalendar, TushareCalendar};
use hotlist_engine::{
    Category, FetchFilters, SnapshotStore, SourceAdapter, SourceError, SourceId, TushareAdapter,
    TushareClient,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn client(server: &MockServer) -> Arc<TushareClient> {
    let config = TushareConfig {
        base_url: server.uri(),
        requests_per_minute: 6000,
        max_retries: 2,
        ..Default::default()
    };
    Arc::new(TushareClient::new("test-token", &config).with_retry_backoff(Duration::from_millis(5)))
}

fn envelope(fields: &[&str], items: Value) -> Value {
    json!({
        "request_id": "test",
        "code": 0,
        "msg": "",
        "data": { "fields": fields, "items": items, "has_more": false }
    })
}

// ============================================================================
// Request Shape and Decoding
// ============================================================================

#[tokio::test]
async fn test_fetch_sends_endpoint_params() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "api_name": "kpl_list",
            "token": "test-token",
            "params": { "tag": "涨停", "trade_date": "20240930" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            &["ts_code", "name", "trade_date"],
            json!([["600001.SH", "甲", "20240930"], ["000003.SZ", "丙", "20240930"]]),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = TushareAdapter::new(client(&server));
    let table = adapter
        .fetch(SourceId::Kpl, Category::LimitUp, d(2024, 9, 30), &FetchFilters::default())
        .await
        .unwrap();

    assert_eq!(table.len(), 2);
    assert_eq!(table.fields, vec!["ts_code", "name", "trade_date"]);
}

#[tokio::test]
async fn test_unsupported_category_never_calls_vendor() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let adapter = TushareAdapter::new(client(&server));
    let err = adapter
        .fetch(SourceId::Eastmoney, Category::Auction, d(2024, 9, 30), &FetchFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Unsupported { .. }));
}

#[tokio::test]
async fn test_mismatched_rows_are_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            &["ts_code", "name"],
            json!([["600001.SH"]]),
        )))
        .mount(&server)
        .await;

    let adapter = TushareAdapter::new(client(&server));
    let err = adapter
        .fetch(SourceId::Ths, Category::LimitUp, d(2024, 9, 30), &FetchFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Malformed(_)));
}

// ============================================================================
// Retry Policy
// ============================================================================

#[tokio::test]
async fn test_credit_refusal_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 40203,
            "msg": "抱歉，您没有访问该接口的权限",
            "data": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = TushareAdapter::new(client(&server));
    let err = adapter
        .fetch(SourceId::Kpl, Category::Concept, d(2024, 9, 30), &FetchFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Credits(_)));
}

#[tokio::test]
async fn test_body_error_code_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 40101,
            "msg": "抱歉，您的token不对，请确认",
            "data": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = TushareAdapter::new(client(&server));
    let err = adapter
        .fetch(SourceId::Ths, Category::LimitUp, d(2024, 9, 30), &FetchFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Vendor { code: 40101, .. }));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            &["ts_code", "name"],
            json!([["600001.SH", "甲"]]),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = TushareAdapter::new(client(&server));
    let table = adapter
        .fetch(SourceId::Ths, Category::Exploded, d(2024, 9, 30), &FetchFilters::default())
        .await
        .unwrap();
    assert_eq!(table.len(), 1);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let adapter = TushareAdapter::new(client(&server));
    let err = adapter
        .fetch(SourceId::Ths, Category::LimitUp, d(2024, 9, 30), &FetchFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Http { status: 500, .. }));
}

// ============================================================================
// End to End
// ============================================================================

#[tokio::test]
async fn test_store_normalizes_vendor_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "api_name": "ths_hot" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            &["trade_date", "data_type", "ts_code", "ts_name", "rank", "pct_change", "hot"],
            json!([
                ["20240930", "热股", "300059.SZ", "东方财富", 2, 3.2, 80000.0],
                ["20240930", "热股", "600519.SH", "贵州茅台", 1, 1.1, 120000.0]
            ]),
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "api_name": "trade_cal" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            &["cal_date", "is_open"],
            json!([["20240930", 1], ["20241001", 0]]),
        )))
        .mount(&server)
        .await;

    let client = client(&server);
    let store = SnapshotStore::builder(
        Arc::new(TushareAdapter::new(Arc::clone(&client))),
        Arc::new(TushareCalendar::new(client)),
    )
    .clock(Arc::new(FixedClock::at_market(d(2024, 10, 8), 20, 0)) as Arc<dyn Clock>)
    .build();

    let snapshot = store
        .get_or_fetch(SourceId::Ths, Category::HotStock, d(2024, 9, 30))
        .await
        .unwrap();

    assert_eq!(snapshot.len(), 2);
    let top = &snapshot.entities[0];
    assert_eq!(top.canonical_code, "600519.SH");
    assert_eq!(top.entity.entity_name, "贵州茅台");
    assert_eq!(top.entity.rank_position, 1);
    assert_eq!(top.entity.rank_metric, Some(120000.0));
    assert_eq!(top.normalized_strength, 1.0);
    assert_eq!(snapshot.entities[1].normalized_strength, 0.0);
    assert_eq!(top.entity.extra.get("data_type").map(String::as_str), Some("热股"));

    // The vendor calendar closes 20241001
    let err = store
        .get_or_fetch(SourceId::Ths, Category::HotStock, d(2024, 10, 1))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not a trading day"));
}

#[tokio::test]
async fn test_calendar_loads_year_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "api_name": "trade_cal",
            "params": { "start_date": "20240101", "end_date": "20241231" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            &["cal_date", "is_open"],
            json!([["20240102", 1], ["20240103", "1"], ["20240104", 0]]),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let calendar = TushareCalendar::new(client(&server));
    assert!(calendar.is_trading_day(d(2024, 1, 2)).await.unwrap());
    assert!(calendar.is_trading_day(d(2024, 1, 3)).await.unwrap());
    assert!(!calendar.is_trading_day(d(2024, 1, 4)).await.unwrap());
    assert!(!calendar.is_trading_day(d(2024, 1, 6)).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_calendar_misses_share_one_load() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "api_name": "trade_cal" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope(&["cal_date", "is_open"], json!([["20240102", 1]])))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let calendar = Arc::new(TushareCalendar::new(client(&server)));
    let lookups = (0..4).map(|day| {
        let calendar = Arc::clone(&calendar);
        tokio::spawn(async move { calendar.is_trading_day(d(2024, 1, 2 + day)).await })
    });
    let answers: Vec<bool> = futures::future::join_all(lookups)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(answers, vec![true, false, false, false]);
}
