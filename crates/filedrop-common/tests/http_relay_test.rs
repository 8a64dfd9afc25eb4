//! HttpRelay against a local axum relay.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use filedrop_common::{HttpRelay, RelayApi, Secret, SessionDescription, TransportError};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct RelayState {
    renew_bodies: Arc<Mutex<Vec<Value>>>,
    answer_bodies: Arc<Mutex<Vec<Value>>>,
}

async fn create() -> Json<Value> {
    Json(json!({"secret": "s1", "longSlug": "abcdef123456", "shortSlug": "ab12"}))
}

async fn renew(State(state): State<RelayState>, Json(body): Json<Value>) -> Json<Value> {
    state.renew_bodies.lock().unwrap().push(body);
    Json(json!({"offers": {"o1": {"type": "offer", "sdp": "v=0"}}}))
}

async fn answer(State(state): State<RelayState>, Json(body): Json<Value>) -> Json<Value> {
    state.answer_bodies.lock().unwrap().push(body);
    Json(json!({"success": true}))
}

async fn spawn_relay(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base: &str) -> HttpRelay {
    HttpRelay::new(base, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_full_relay_round() {
    let state = RelayState::default();
    let app = Router::new()
        .route("/api/create", post(create))
        .route("/api/renew", post(renew))
        .route("/api/answer", post(answer))
        .with_state(state.clone());
    let relay = client(&spawn_relay(app).await);

    let created = relay.create().await.unwrap();
    assert_eq!(created.secret.expose(), "s1");
    assert_eq!(created.short_slug, "ab12");

    let renewed = relay.renew("ab12", &created.secret).await.unwrap();
    assert_eq!(renewed.offers.len(), 1);
    assert_eq!(renewed.offers["o1"], SessionDescription::offer("v=0"));
    assert_eq!(
        state.renew_bodies.lock().unwrap()[0],
        json!({"slug": "ab12", "secret": "s1"})
    );

    relay
        .answer("ab12", "o1", &SessionDescription::answer("v=0 answer"))
        .await
        .unwrap();
    assert_eq!(
        state.answer_bodies.lock().unwrap()[0],
        json!({
            "slug": "ab12",
            "offerID": "o1",
            "answer": {"type": "answer", "sdp": "v=0 answer"}
        })
    );
}

#[tokio::test]
async fn test_non_success_status_is_transport_error() {
    let app = Router::new()
        .route(
            "/api/create",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "relay down") }),
        )
        .route(
            "/api/renew",
            post(|| async { (StatusCode::NOT_FOUND, "no such session") }),
        );
    let relay = client(&spawn_relay(app).await);

    match relay.create().await {
        Err(TransportError::Status { status, body, .. }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "relay down");
        }
        other => panic!("expected status error, got {:?}", other),
    }

    let err = relay.renew("ab12", &Secret::new("s1")).await.unwrap_err();
    assert!(matches!(err, TransportError::Status { status: 404, .. }));
}

#[tokio::test]
async fn test_malformed_bodies_are_rejected() {
    let app = Router::new()
        .route(
            "/api/create",
            post(|| async { Json(json!({"secret": "s1", "longSlug": "abc"})) }),
        )
        .route(
            "/api/renew",
            post(|| async { Json(json!({"offers": {"o1": "not a description"}})) }),
        );
    let relay = client(&spawn_relay(app).await);

    assert!(matches!(
        relay.create().await,
        Err(TransportError::Malformed { .. })
    ));
    assert!(matches!(
        relay.renew("ab12", &Secret::new("s1")).await,
        Err(TransportError::Malformed { .. })
    ));
}

#[tokio::test]
async fn test_unreachable_relay() {
    // Bind and immediately drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let relay = client(&format!("http://{}", addr));
    assert!(matches!(
        relay.create().await,
        Err(TransportError::Unreachable { .. })
    ));
}

#[tokio::test]
async fn test_slow_relay_times_out() {
    let app = Router::new().route(
        "/api/renew",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Json(json!({"offers": {}}))
        }),
    );
    let base = spawn_relay(app).await;
    let relay = HttpRelay::new(&base, Duration::from_millis(200)).unwrap();

    assert!(matches!(
        relay.renew("ab12", &Secret::new("s1")).await,
        Err(TransportError::Timeout { .. })
    ));
}
