//! # Health Check Server
//!
//! Embedded HTTP endpoint exposing the state of a running service:
//! - `/health` - liveness, 200 while the process is serving
//! - `/ready` - 200 once the service reports ready, 503 before
//! - `/metrics` - JSON snapshot of the service's runtime metrics
//!
//! The server reads everything through a [`HealthSource`] so it stays independent of the
//! service that embeds it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use health_check::{HealthCheckServer, HealthSource};
//! use std::sync::Arc;
//!
//! # async fn run(source: Arc<dyn HealthSource>) -> anyhow::Result<()> {
//! let server = HealthCheckServer::bind(source, "127.0.0.1:8001".parse()?)?;
//! server.serve(std::future::pending()).await?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Read-only view of the embedding service
pub trait HealthSource: Send + Sync + 'static {
    fn service_name(&self) -> &str;

    fn is_alive(&self) -> bool {
        true
    }

    fn is_ready(&self) -> bool;

    fn metrics(&self) -> serde_json::Value;
}

#[derive(Debug, Serialize)]
struct HealthBody<'a> {
    status: &'a str,
    service: &'a str,
    uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_usage_bytes: Option<u64>,
}

/// HTTP health check server bound to a socket, not yet serving
pub struct HealthCheckServer {
    source: Arc<dyn HealthSource>,
    builder: hyper::server::Builder<AddrIncoming>,
    local_addr: SocketAddr,
}

impl HealthCheckServer {
    /// Bind `addr`; must be called inside a tokio runtime
    pub fn bind(source: Arc<dyn HealthSource>, addr: SocketAddr) -> Result<Self> {
        let listener = std::net::TcpListener::bind(addr)
            .with_context(|| format!("Failed to bind health check server on {}", addr))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let builder = Server::from_tcp(listener)?;
        Ok(Self {
            source,
            builder,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until `shutdown` resolves
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let started = Instant::now();
        let source = self.source;

        let make_svc = make_service_fn(move |_conn| {
            let source = Arc::clone(&source);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let source = Arc::clone(&source);
                    handle_request(req, source, started)
                }))
            }
        });

        info!("🩺 Health check server listening on http://{}", self.local_addr);
        info!("Endpoints: /health, /ready, /metrics");

        let server = self.builder.serve(make_svc).with_graceful_shutdown(shutdown);
        if let Err(e) = server.await {
            error!("Health check server error: {}", e);
            return Err(e.into());
        }

        info!("Health check server stopped");
        Ok(())
    }
}

async fn handle_request(
    req: Request<Body>,
    source: Arc<dyn HealthSource>,
    started: Instant,
) -> Result<Response<Body>, Infallible> {
    debug!("Health check request: {} {}", req.method(), req.uri().path());

    if req.method() != Method::GET {
        return Ok(text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"));
    }

    let response = match req.uri().path() {
        "/health" => {
            let alive = source.is_alive();
            let body = HealthBody {
                status: if alive { "healthy" } else { "unhealthy" },
                service: source.service_name(),
                uptime_seconds: started.elapsed().as_secs(),
                memory_usage_bytes: memory_usage_bytes(),
            };
            let status = if alive {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            json_response(status, &body)
        }
        "/ready" => {
            let ready = source.is_ready();
            let body = serde_json::json!({
                "status": if ready { "ready" } else { "not ready" },
                "service": source.service_name(),
            });
            let status = if ready {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            json_response(status, &body)
        }
        "/metrics" => json_response(StatusCode::OK, &source.metrics()),
        _ => text_response(StatusCode::NOT_FOUND, "Not found"),
    };
    Ok(response)
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_string(body) {
        Ok(json) => {
            let mut response = Response::new(Body::from(json));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

fn text_response(status: StatusCode, text: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(text.to_string()));
    *response.status_mut() = status;
    response
}

/// Resident set size of this process
#[cfg(target_os = "linux")]
fn memory_usage_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

#[cfg(not(target_os = "linux"))]
fn memory_usage_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memory_usage_reported() {
        let bytes = memory_usage_bytes().unwrap();
        assert!(bytes > 0);
    }

    #[test]
    fn test_json_response_headers() {
        let response = json_response(StatusCode::OK, &serde_json::json!({"a": 1}));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
