use axum::{
    Json,
    body::{Body, to_bytes},
    extract::State,
    http::{Request, StatusCode, header},
    response::IntoResponse,
};
use msserver::{ServerBuilder, rest_headers};
use serde_json::{Value, json};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tower::ServiceExt;

fn static_dir() -> String {
    format!("{}/tests/static", env!("CARGO_MANIFEST_DIR"))
}

async fn count(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
    let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
    (rest_headers(), Json(json!({ "hits": n })))
}

async fn echo(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

#[tokio::test]
async fn test_json_route_gets_common_headers() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = ServerBuilder::new("test", "http://localhost", 0).build();
    server
        .add_route("/status", || async { json!({"status": "ok"}) })
        .await;

    let response = server
        .router()
        .await
        .oneshot(Request::get("/status").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    let cookie = headers[header::SET_COOKIE].to_str()?;
    assert!(cookie.starts_with("sessionId="), "cookie: {cookie}");

    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let value: Value = serde_json::from_slice(&body)?;
    assert_eq!(value["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn test_existing_session_is_kept() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = ServerBuilder::new("test", "http://localhost", 0).build();
    server.add_route("/ping", || async { "pong" }).await;

    let response = server
        .router()
        .await
        .oneshot(
            Request::get("/ping")
                .header(header::COOKIE, "sessionId=Known42")
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    Ok(())
}

#[tokio::test]
async fn test_handler_cache_control_is_not_overridden() -> Result<(), Box<dyn std::error::Error>> {
    let hits = Arc::new(AtomicUsize::new(0));
    let mut server = ServerBuilder::new("test", "http://localhost", 0).build();
    server
        .add_handler_with_state("/hits", count, hits.clone())
        .await;
    let router = server.router().await;

    for expected in 1..=2 {
        let response = router
            .clone()
            .oneshot(Request::get("/hits").body(Body::empty())?)
            .await?;
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "no-cache, no-store, must-revalidate, public, max-age=0"
        );
        assert_eq!(response.headers()[header::PRAGMA], "no-cache");
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let value: Value = serde_json::from_slice(&body)?;
        assert_eq!(value["hits"], expected);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_post_handler() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = ServerBuilder::new("test", "http://localhost", 0).build();
    server.add_post_handler_with_state("/echo", echo, ()).await;

    let response = server
        .router()
        .await
        .oneshot(
            Request::post("/echo")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"query":"abc"}"#))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(serde_json::from_slice::<Value>(&body)?["query"], "abc");
    Ok(())
}

#[tokio::test]
async fn test_static_dir_is_the_fallback() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = ServerBuilder::new("test", "http://localhost", 0)
        .static_dir(static_dir())
        .build();
    server.add_route("/playing", || async { json!({}) }).await;
    let router = server.router().await;

    let index = router
        .clone()
        .oneshot(Request::get("/").body(Body::empty())?)
        .await?;
    assert_eq!(index.status(), StatusCode::OK);
    let body = to_bytes(index.into_body(), usize::MAX).await?;
    assert!(String::from_utf8_lossy(&body).contains("<audio"));

    let missing = router
        .oneshot(Request::get("/nope.js").body(Body::empty())?)
        .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_start_and_stop() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = ServerBuilder::new("test", "http://localhost", 0).build();
    server.add_route("/ping", || async { "pong" }).await;
    let addr = server.start().await?;
    assert_ne!(addr.port(), 0);

    let token = server.shutdown_token();
    server.stop();
    assert!(token.is_cancelled());
    tokio::time::timeout(std::time::Duration::from_secs(5), server.wait()).await?;
    Ok(())
}
