//! End-to-end tests over real sockets: a fake upstream, the dispatcher in
//! front of it, and a reqwest client.

use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::{Json, Router};
use devdispatch::{server, Dispatcher, DispatcherConfig};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

async fn echo_upstream(method: Method, uri: Uri, headers: HeaderMap, body: String) -> impl IntoResponse {
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    (
        StatusCode::CREATED,
        [("x-upstream", "echo")],
        Json(json!({
            "method": method.as_str(),
            "uri": uri.to_string(),
            "host": host,
            "body": body,
        })),
    )
}

async fn spawn_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(echo_upstream);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_dispatcher(config: DispatcherConfig) -> (SocketAddr, Arc<Dispatcher>) {
    let dispatcher = Arc::new(Dispatcher::new(&config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::app(dispatcher.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, dispatcher)
}

fn config_for(upstream: SocketAddr, mock_dir: Option<std::path::PathBuf>) -> DispatcherConfig {
    let mut config = DispatcherConfig {
        mock: false,
        latency_ms: 0,
        mock_dir,
        routes: vec!["/api/{type}".to_string()],
        ..DispatcherConfig::default()
    };
    config
        .targets
        .insert("local".to_string(), format!("http://{upstream}"));
    config.active_target = "local".to_string();
    config
}

#[tokio::test]
async fn test_proxy_preserves_host_and_streams_response() {
    let upstream = spawn_upstream().await;
    let (addr, dispatcher) = spawn_dispatcher(config_for(upstream, None)).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/users/42?x=1"))
        .body("payload")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers().get("x-upstream").unwrap(), "echo");

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["method"], "POST");
    assert_eq!(body["uri"], "/api/users/42?x=1");
    assert_eq!(body["host"], addr.to_string());
    assert_eq!(body["body"], "payload");

    assert_eq!(dispatcher.stats().proxied, 1);
    assert_eq!(dispatcher.registry().attempts(), 0);
}

#[tokio::test]
async fn test_mode_flip_switches_branch_on_next_request() {
    let upstream = spawn_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("api/products")).unwrap();
    std::fs::write(
        dir.path().join("api/products/0.yaml"),
        "result|3:\n  - id|+1: 1\n",
    )
    .unwrap();

    let (addr, _dispatcher) =
        spawn_dispatcher(config_for(upstream, Some(dir.path().to_path_buf()))).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/products/123?x=1");

    let proxied = client.get(&url).send().await.unwrap();
    assert_eq!(proxied.status(), StatusCode::CREATED);

    let mode: Value = client
        .put(format!("http://{addr}/__dispatcher/mode"))
        .json(&json!({"mock": true}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(mode["mode"], "mock");
    assert_eq!(mode["targets"], json!(["dev", "local", "online", "test"]));

    let mocked = client.get(&url).send().await.unwrap();
    assert_eq!(mocked.status(), StatusCode::OK);
    assert_eq!(mocked.headers().get("x-mock-outcome").unwrap(), "found");
    assert_eq!(
        mocked.text().await.unwrap(),
        r#"{"returnCode":0,"returnMsg":"OK","result":[{"id":1},{"id":2},{"id":3}]}"#
    );
}

#[tokio::test]
async fn test_parameterized_route_uses_zero_key_file() {
    let upstream = spawn_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("api")).unwrap();
    std::fs::write(
        dir.path().join("api/0.json"),
        r#"{"result": {"type": "{{path.type}}"}}"#,
    )
    .unwrap();

    let mut config = config_for(upstream, Some(dir.path().to_path_buf()));
    config.mock = true;
    let (addr, dispatcher) = spawn_dispatcher(config).await;

    let body: Value = reqwest::get(format!("http://{addr}/api/orders"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"returnCode": 0, "returnMsg": "OK", "result": {"type": "orders"}}));

    let body: Value = reqwest::get(format!("http://{addr}/api/9"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["result"]["type"], "9");
    assert_eq!(dispatcher.registry().attempts(), 1);
}

#[tokio::test]
async fn test_non_api_requests_reach_host_routes() {
    let upstream = spawn_upstream().await;
    let (addr, dispatcher) = spawn_dispatcher(config_for(upstream, None)).await;

    let health = reqwest::get(format!("http://{addr}/__dispatcher/health"))
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let missing = reqwest::get(format!("http://{addr}/index.html")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let stats: Value = reqwest::get(format!("http://{addr}/__dispatcher/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["requests_total"], 0);
    assert!(stats["passed_through"].as_u64().unwrap() >= 2);
    assert_eq!(dispatcher.registry().cached_keys().await, 0);
}
