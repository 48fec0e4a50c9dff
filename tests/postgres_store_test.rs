//! PostgreSQL store integration tests.
//!
//! These need a reachable database and are skipped unless `DATABASE_URL`
//! is set. Run with: `DATABASE_URL=postgres://... cargo test -- --ignored`

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

use streampulse::api;
use streampulse::event::ClickEvent;
use streampulse::store::{ClickStore, PgStore};

async fn connect_store() -> Option<PgStore> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .ok()?;
    let store = PgStore::new(pool);
    store.ensure_schema().await.ok()?;
    Some(store)
}

fn unique_code(prefix: &str) -> String {
    format!("{prefix}-{}", Utc::now().timestamp_nanos_opt().unwrap())
}

fn click(short_code: &str, occurred_at: DateTime<Utc>) -> ClickEvent {
    ClickEvent {
        short_code: short_code.to_string(),
        user_id: Some(7),
        occurred_at,
        referrer: Some("https://example.com/".to_string()),
        user_agent: Some("Mozilla/5.0".to_string()),
        ip: Some("203.0.113.9".to_string()),
    }
}

async fn aggregate_of(store: &PgStore, short_code: &str) -> Option<(i64, DateTime<Utc>)> {
    store
        .code_stats(short_code)
        .await
        .unwrap()
        .map(|stats| (stats.total_clicks, stats.last_seen))
}

#[tokio::test]
#[ignore]
async fn provisioning_is_idempotent() {
    let Some(store) = connect_store().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    store.ensure_schema().await.unwrap();
    store.ensure_schema().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn append_assigns_increasing_ids() {
    let Some(store) = connect_store().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    let code = unique_code("ids");
    let first = store.append_event(&click(&code, Utc::now())).await.unwrap();
    let second = store.append_event(&click(&code, Utc::now())).await.unwrap();
    assert!(second > first);
}

#[tokio::test]
#[ignore]
async fn upsert_creates_then_increments_one_row() {
    let Some(store) = connect_store().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    let code = unique_code("upsert");
    let first_seen = "2024-01-01T00:00:00Z".parse().unwrap();
    let second_seen = "2024-01-01T00:00:05Z".parse().unwrap();

    store.upsert_aggregate(&code, first_seen).await.unwrap();
    assert_eq!(aggregate_of(&store, &code).await, Some((1, first_seen)));

    store.upsert_aggregate(&code, second_seen).await.unwrap();
    assert_eq!(aggregate_of(&store, &code).await, Some((2, second_seen)));
}

#[tokio::test]
#[ignore]
async fn last_seen_follows_ingestion_order_not_event_time() {
    let Some(store) = connect_store().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    let code = unique_code("order");
    let newer = "2024-06-01T12:00:00Z".parse().unwrap();
    let older = "2024-06-01T00:00:00Z".parse().unwrap();

    store.upsert_aggregate(&code, newer).await.unwrap();
    store.upsert_aggregate(&code, older).await.unwrap();

    // the late-arriving older event wins
    assert_eq!(aggregate_of(&store, &code).await, Some((2, older)));
}

#[tokio::test]
#[ignore]
async fn two_clicks_end_to_end() {
    let Some(store) = connect_store().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    let code = unique_code("e2e");
    let timestamps: [DateTime<Utc>; 2] = [
        "2024-01-01T00:00:00Z".parse().unwrap(),
        "2024-01-01T00:00:05Z".parse().unwrap(),
    ];

    for occurred_at in timestamps {
        let event = click(&code, occurred_at);
        store.append_event(&event).await.unwrap();
        store
            .upsert_aggregate(&event.short_code, event.occurred_at)
            .await
            .unwrap();
    }

    let stats = store.code_stats(&code).await.unwrap().unwrap();
    assert_eq!(stats.total_clicks, 2);
    assert_eq!(stats.last_seen, timestamps[1]);
}

#[tokio::test]
#[ignore]
async fn stats_queries_see_ingested_events() {
    let Some(store) = connect_store().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    let code = unique_code("stats");
    for referrer in ["https://a.example/", "https://a.example/", "https://b.example/"] {
        let mut event = click(&code, Utc::now());
        event.referrer = Some(referrer.to_string());
        store.append_event(&event).await.unwrap();
        store
            .upsert_aggregate(&event.short_code, event.occurred_at)
            .await
            .unwrap();
    }
    // empty referrers are excluded from the ranking
    let mut direct = click(&code, Utc::now());
    direct.referrer = Some(String::new());
    store.append_event(&direct).await.unwrap();
    store
        .upsert_aggregate(&direct.short_code, direct.occurred_at)
        .await
        .unwrap();

    let stats = store.code_stats(&code).await.unwrap().unwrap();
    assert_eq!(stats.total_clicks, 4);
    assert_eq!(stats.last_24_hours, 4);
    assert_eq!(stats.top_referrers.len(), 2);
    assert_eq!(stats.top_referrers[0].referrer, "https://a.example/");
    assert_eq!(stats.top_referrers[0].clicks, 2);

    assert!(store
        .top_aggregates(i64::MAX)
        .await
        .unwrap()
        .iter()
        .any(|row| row.short_code == code));
    assert!(store
        .trending(24, i64::MAX)
        .await
        .unwrap()
        .iter()
        .any(|row| row.short_code == code));
    assert!(store.code_stats("never-clicked").await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn router_serves_stats_over_http() {
    let Some(store) = connect_store().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    let code = unique_code("http");
    let event = click(&code, Utc::now());
    store.append_event(&event).await.unwrap();
    store
        .upsert_aggregate(&event.short_code, event.occurred_at)
        .await
        .unwrap();

    let response = api::router(store.clone())
        .oneshot(
            Request::builder()
                .uri(format!("/stats/{code}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["shortCode"], code.as_str());
    assert_eq!(value["totalClicks"], 1);

    let response = api::router(store)
        .oneshot(
            Request::builder()
                .uri("/stats/never-clicked")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"]["code"], "NOT_FOUND");
}
