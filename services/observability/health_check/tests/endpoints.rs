//! Endpoint behaviour over real HTTP

use health_check::{HealthCheckServer, HealthSource};
use hyper::{Body, Client, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

struct FakeService {
    ready: AtomicBool,
}

impl HealthSource for FakeService {
    fn service_name(&self) -> &str {
        "fake"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn metrics(&self) -> serde_json::Value {
        serde_json::json!({ "rows_processed": 42 })
    }
}

async fn get(url: String) -> (StatusCode, serde_json::Value) {
    let response = Client::new().get(url.parse().unwrap()).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_endpoints_follow_service_state() {
    let service = Arc::new(FakeService {
        ready: AtomicBool::new(false),
    });
    let server = HealthCheckServer::bind(service.clone(), "127.0.0.1:0".parse().unwrap()).unwrap();
    let base = format!("http://{}", server.local_addr());

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(async {
        let _ = stop_rx.await;
    }));

    let (status, body) = get(format!("{}/health", base)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "fake");

    let (status, _) = get(format!("{}/ready", base)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    service.ready.store(true, Ordering::Release);
    let (status, body) = get(format!("{}/ready", base)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    let (status, body) = get(format!("{}/metrics", base)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows_processed"], 42);

    let (status, _) = get(format!("{}/nope", base)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    stop_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_non_get_rejected() {
    let service = Arc::new(FakeService {
        ready: AtomicBool::new(true),
    });
    let server = HealthCheckServer::bind(service, "127.0.0.1:0".parse().unwrap()).unwrap();
    let url = format!("http://{}/health", server.local_addr());
    tokio::spawn(server.serve(std::future::pending()));

    let request = hyper::Request::post(url).body(Body::empty()).unwrap();
    let response = Client::new().request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
