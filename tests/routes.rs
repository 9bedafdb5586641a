use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use geomatch::AppState;
use geomatch::cache::{MemoryPresenceCache, PresenceCache};
use geomatch::config::Config;
use geomatch::database::{LocationStore, MemoryLocationStore};
use geomatch::fanout::{LocationFanOut, MemoryFanOut};
use geomatch::models::{Coordinates, LocationRecord, PresenceEntry};
use geomatch::routes::create_router;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    router: Router,
    store: Arc<MemoryLocationStore>,
    presence: Arc<MemoryPresenceCache>,
    fanout: Arc<MemoryFanOut>,
}

fn app() -> TestApp {
    let store = Arc::new(MemoryLocationStore::new());
    let presence = Arc::new(MemoryPresenceCache::new());
    let fanout = Arc::new(MemoryFanOut::new());
    let state = AppState::new(
        Config::default(),
        store.clone(),
        presence.clone(),
        fanout.clone(),
    );
    TestApp {
        router: create_router(state),
        store,
        presence,
        fanout,
    }
}

async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn record(user_id: Uuid, current: (f64, f64), destination: (f64, f64)) -> LocationRecord {
    LocationRecord::new(
        user_id,
        Coordinates::new(current.0, current.1),
        Coordinates::new(destination.0, destination.1),
    )
}

async fn seed_presence(app: &TestApp, record: &LocationRecord) {
    app.presence
        .put(&PresenceEntry::from(record), Duration::from_secs(60))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = call(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["resp_data"], "ok");
}

#[tokio::test]
async fn test_matches_only_include_same_destination() {
    let app = app();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    let nyc = (40.7128, -74.006);

    seed_presence(&app, &record(a, (37.7749, -122.4194), nyc)).await;
    seed_presence(&app, &record(b, (37.7800, -122.4194), (40.7130, -74.0065))).await;
    seed_presence(&app, &record(c, (37.7760, -122.4194), (34.0522, -118.2437))).await;

    let (status, body) = call(&app.router, get(&format!("/matches?user_id={}&radius_km=5", a))).await;
    assert_eq!(status, StatusCode::OK);

    let matches = body["resp_data"]["matches"].as_array().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["user_id"], b.to_string());
    assert!(matches[0]["distance_km"].as_f64().unwrap() < 1.0);
}

#[tokio::test]
async fn test_matches_errors() {
    let app = app();

    let (status, body) = call(
        &app.router,
        get(&format!("/matches?user_id={}", Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 1004);

    let (status, _) = call(&app.router, get("/matches?user_id=nope")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let a = Uuid::new_v4();
    seed_presence(&app, &record(a, (1.0, 1.0), (2.0, 2.0))).await;
    let (status, _) = call(
        &app.router,
        get(&format!("/matches?user_id={}&radius_km=-3", a)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_nan_radius_is_rejected() {
    let app = app();
    let a = Uuid::new_v4();
    seed_presence(&app, &record(a, (1.0, 1.0), (2.0, 2.0))).await;

    let (status, body) = call(
        &app.router,
        get(&format!("/matches?user_id={}&radius_km=NaN", a)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1000);
}

#[tokio::test]
async fn test_friend_routes() {
    let app = app();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let (status, _) = call(
        &app.router,
        post_json("/friends/add", json!({"user_id": a, "friend_id": b})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(app.fanout.friends(b).await.unwrap(), vec![a]);

    let (status, body) = call(&app.router, get(&format!("/friends?user_id={}", a))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["friends"], json!([b.to_string()]));

    let (status, _) = call(
        &app.router,
        post_json("/friends/add", json!({"user_id": a, "friend_id": a})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app.router,
        post_json("/friends/remove", json!({"user_id": b, "friend_id": a})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.fanout.friends(a).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_presence_sync_rebuilds_cache() {
    let app = app();
    for i in 0..3 {
        let r = record(Uuid::new_v4(), (10.0 + i as f64, 10.0), (20.0, 20.0));
        app.store.create(&r).await.unwrap();
    }

    let (status, body) = call(&app.router, post_json("/presence/sync", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resp_data"]["synced"], 3);
    assert_eq!(app.presence.live_count().await, 3);

    app.store.set_unavailable(true);
    let (status, body) = call(&app.router, post_json("/presence/sync", json!({}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], 5000);
}
