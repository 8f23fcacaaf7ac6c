//! In-process stand-in for the upstream order API, shared by the test modules.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::config::{Credentials, SourceConfig};
use crate::source::OrderSource;

/// Request counters of the stub upstream.
#[derive(Clone, Default)]
pub struct Upstream {
    pub customer_calls: Arc<AtomicUsize>,
}

async fn customers(State(upstream): State<Upstream>, headers: HeaderMap) -> Response {
    upstream.customer_calls.fetch_add(1, Ordering::SeqCst);
    // "user:secret" in base64
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Basic dXNlcjpzZWNyZXQ=");
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!([
        { "id": 1, "name": "ACME" },
        { "id": 2, "name": "Globex" }
    ]))
    .into_response()
}

async fn orders(Path(customer_no): Path<u64>) -> Response {
    if customer_no == 500 {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!([{ "order_no": "A-1", "customer": customer_no }])).into_response()
}

async fn components(Path(order_no): Path<String>) -> Response {
    match order_no.as_str() {
        "A-1" => Json(json!([
            { "id": 1, "weight": 5.0, "max_weight_capacity": 10.0, "unit_price": 2.0, "quantity_in_box": 3 },
            { "id": 2, "weight": 8.0, "max_weight_capacity": 1.0, "unit_price": 1.5, "quantity_in_box": 2 }
        ]))
        .into_response(),
        "no-price" => Json(json!([
            { "id": 1, "weight": 2.0, "max_weight_capacity": 4.0, "quantity_in_box": 1 }
        ]))
        .into_response(),
        "broken" => Json(json!([{ "id": 1, "weight": 5.0 }])).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Serves the stub upstream on an ephemeral loopback port and returns its base URL.
///
/// Known orders: `A-1` (two boxes with prices), `no-price` (no `unit_price`)
/// and `broken` (no capacity). Customer 500 makes the orders endpoint fail.
pub async fn spawn_upstream(upstream: Upstream) -> String {
    let app = Router::new()
        .route("/customers", get(customers))
        .route("/customer_orders/{customer_no}", get(orders))
        .route("/order_components/{order_no}", get(components))
        .with_state(upstream);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

/// HTTP client for loopback tests; ignores any proxy configured in the environment.
pub fn local_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()
        .unwrap()
}

pub fn local_source(config: SourceConfig) -> OrderSource {
    OrderSource::with_client(local_client(config.timeout()), config)
}

/// Source talking to `base_url` with the credentials the stub accepts.
pub fn source(base_url: String, cache_ttl: Duration) -> OrderSource {
    let credentials = Credentials {
        user: "user".to_string(),
        password: Some("secret".to_string()),
    };
    local_source(SourceConfig::new(
        base_url,
        Some(credentials),
        Duration::from_secs(5),
        cache_ttl,
    ))
}
