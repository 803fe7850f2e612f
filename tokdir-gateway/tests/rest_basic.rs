use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokdir_directory::{DirectoryConfig, TokenDirectory};
use tokdir_docstore::MemoryDocumentStore;
use tokdir_gateway::{HandlerSettings, build_router};
use tower::util::ServiceExt;

fn app() -> (Router, MemoryDocumentStore) {
    let store = MemoryDocumentStore::default();
    let directory = TokenDirectory::new(
        Arc::new(store.clone()),
        DirectoryConfig::default().with_shard_capacity(2),
    )
    .unwrap();
    let router = build_router(
        Arc::new(directory),
        HandlerSettings {
            default_scan_batch: 2,
        },
    );
    (router, store)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let req = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => req
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => req.body(Body::empty()),
    }
    .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_endpoints_work() {
    let (app, store) = app();
    let (status, _) = send(&app, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::GET, "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);

    store.set_available(false);
    let (status, body) = send(&app, Method::GET, "/readyz", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "STORE_UNAVAILABLE");
}

#[tokio::test]
async fn register_lookup_unregister() {
    let (app, _store) = app();
    let uri = "/api/devices/d1/token";

    let (status, _) =
        send(&app, Method::PUT, uri, Some(json!({"token": "t1"}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = send(&app, Method::GET, uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"device_id": "d1", "token": "t1"}));

    let (status, _) =
        send(&app, Method::PUT, uri, Some(json!({"token": "t2"}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = send(&app, Method::GET, uri, None).await;
    assert_eq!(body["token"], "t2");

    let (status, _) = send(&app, Method::DELETE, uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = send(&app, Method::GET, uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "DEVICE_NOT_FOUND");
}

#[tokio::test]
async fn unknown_device_delete_is_404() {
    let (app, _store) = app();
    let (status, body) =
        send(&app, Method::DELETE, "/api/devices/ghost/token", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "DEVICE_NOT_FOUND");
}

#[tokio::test]
async fn bad_bodies_are_rejected() {
    let (app, _store) = app();
    let uri = "/api/devices/d1/token";
    let (status, body) =
        send(&app, Method::PUT, uri, Some(json!({"nope": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, body) =
        send(&app, Method::PUT, uri, Some(json!({"token": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn list_tokens_returns_every_entry() {
    let (app, _store) = app();
    for i in 0..5 {
        let uri = format!("/api/devices/d{i}/token");
        let (status, _) =
            send(&app, Method::PUT, &uri, Some(json!({"token": format!("t{i}")})))
                .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let (status, body) = send(&app, Method::GET, "/api/tokens", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 5);

    let (status, body) =
        send(&app, Method::GET, "/api/tokens?batch_size=3", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 5);

    let (status, body) =
        send(&app, Method::GET, "/api/tokens?batch_size=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (app, _store) = app();
    let (status, body) = send(&app, Method::GET, "/api/nothing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NO_ROUTE");
}

#[tokio::test]
async fn oversized_token_is_rejected() {
    let (app, _store) = app();
    let token = "t".repeat(300);
    let (status, body) = send(
        &app,
        Method::PUT,
        "/api/devices/d1/token",
        Some(json!({ "token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");
    let (status, _) = send(&app, Method::GET, "/api/devices/d1/token", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
