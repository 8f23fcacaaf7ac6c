//! REST API for the order stacking service.
//!
//! Provides HTTP endpoints for customers, orders, invoices and box stacks.
//! Uses Axum as the web framework and supports CORS.

use std::sync::{Arc, OnceLock};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};

use crate::config::ApiConfig;
use crate::model::{Customer, Order, Payload, StackBox, ValidationError, invoice_total};
use crate::source::{OrderSource, SourceError};
use crate::stacker::{Stack, StackEvent, stack_boxes, stack_boxes_with_progress};

#[derive(Clone)]
struct ApiState {
    source: Arc<OrderSource>,
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

// SRI hashes verified against https://unpkg.com/swagger-ui-dist@5.17.14/ on 2025-10-29.
const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>order-stacker API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                window.ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                    presets: [SwaggerUIBundle.presets.apis],
                });
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

/// One box in an ad-hoc stacking request.
#[derive(Deserialize, Clone, ToSchema)]
pub struct BoxRequest {
    pub weight: f64,
    pub max_weight_capacity: f64,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub attributes: Payload,
}

impl BoxRequest {
    fn into_box(self) -> Result<StackBox, ValidationError> {
        StackBox::new(self.weight, self.max_weight_capacity, self.attributes)
    }
}

#[derive(Deserialize, ToSchema)]
#[schema(
    example = json!({
        "boxes": [
            { "weight": 5.0, "max_weight_capacity": 10.0, "attributes": { "id": 1 } },
            { "weight": 3.0, "max_weight_capacity": 2.0, "attributes": { "id": 2 } },
            { "weight": 8.0, "max_weight_capacity": 1.0, "attributes": { "id": 3 } }
        ]
    })
)]
pub struct StackRequest {
    pub boxes: Vec<BoxRequest>,
}

impl StackRequest {
    fn into_boxes(self) -> Result<Vec<StackBox>, ValidationError> {
        self.boxes.into_iter().map(BoxRequest::into_box).collect()
    }
}

/// A box as placed in a stack.
#[derive(Serialize, ToSchema)]
pub struct StackedBox {
    pub weight: f64,
    /// Capacity after placement (capped to what the box below can still bear).
    pub capacity: f64,
    #[schema(value_type = Object)]
    pub attributes: Payload,
}

/// A single stack, boxes listed bottom to top.
///
/// # Fields
/// * `id` - Stack number (1-based, creation order)
/// * `total_weight` - Sum of all box weights in the stack
/// * `top_capacity` - Weight the topmost box can still bear
#[derive(Serialize, ToSchema)]
pub struct StackView {
    pub id: usize,
    pub total_weight: f64,
    pub top_capacity: f64,
    pub boxes: Vec<StackedBox>,
}

/// Response of the ad-hoc stacking endpoint.
#[derive(Serialize, ToSchema)]
pub struct StackResponse {
    pub stack_count: usize,
    pub box_count: usize,
    pub stacks: Vec<StackView>,
}

impl StackResponse {
    /// Converts stacker output into the response shape.
    pub fn from_stacks(stacks: Vec<Stack>) -> Self {
        let box_count = stacks.iter().map(Stack::len).sum();
        let stacks = stacks
            .into_iter()
            .enumerate()
            .map(|(i, stack)| {
                let total_weight = stack.total_weight();
                let top_capacity = stack.top_capacity().unwrap_or_default();
                StackView {
                    id: i + 1,
                    total_weight,
                    top_capacity,
                    boxes: stack
                        .into_boxes()
                        .into_iter()
                        .map(|b| StackedBox {
                            weight: b.weight,
                            capacity: b.capacity,
                            attributes: b.payload,
                        })
                        .collect(),
                }
            })
            .collect::<Vec<_>>();

        Self {
            stack_count: stacks.len(),
            box_count,
            stacks,
        }
    }
}

/// Stacks of one order together with the customer it belongs to.
#[derive(Serialize, ToSchema)]
pub struct OrderStacksResponse {
    pub order_no: String,
    #[schema(value_type = Object)]
    pub customer: Customer,
    #[serde(flatten)]
    pub stacking: StackResponse,
}

#[derive(Serialize, ToSchema)]
pub struct CustomerOrdersResponse {
    #[schema(value_type = Object)]
    pub customer: Customer,
    #[schema(value_type = Vec<Object>)]
    pub orders: Vec<Order>,
}

#[derive(Serialize, ToSchema)]
pub struct InvoiceResponse {
    pub order_no: String,
    #[schema(value_type = Object)]
    pub customer: Customer,
    #[schema(value_type = Vec<Object>)]
    pub components: Vec<StackBox>,
    pub total_price: f64,
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.to_string(),
    )
}

fn validation_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid input data",
        details,
    )
}

fn source_error(err: SourceError) -> Response {
    match err {
        SourceError::NotFound { .. } | SourceError::CustomerNotFound(_) => {
            error_response(StatusCode::NOT_FOUND, "Not found", err.to_string())
        }
        SourceError::Http(_)
        | SourceError::UnexpectedStatus { .. }
        | SourceError::InvalidUrl(_) => {
            warn!("⚠️ Upstream request failed: {err}");
            error_response(
                StatusCode::BAD_GATEWAY,
                "Failed to fetch upstream data",
                err.to_string(),
            )
        }
    }
}

fn parse_stack_request(
    payload: Result<Json<StackRequest>, JsonRejection>,
) -> Result<Vec<StackBox>, Response> {
    let Json(payload) = payload.map_err(json_deserialize_error)?;
    payload
        .into_boxes()
        .map_err(|err| validation_error(err.to_string()))
}

/// Fetches the components of an order and the customer it belongs to.
async fn load_order(
    source: &OrderSource,
    customer_no: u64,
    order_no: &str,
) -> Result<(Customer, Vec<StackBox>), Response> {
    let components = source
        .order_components(order_no)
        .await
        .map_err(source_error)?;
    let customer = source.customer(customer_no).await.map_err(source_error)?;
    Ok((customer, components))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handle_customers,
        handle_customer_orders,
        handle_invoice,
        handle_stacks,
        handle_stacks_stream,
        handle_stack
    ),
    components(
        schemas(
            StackRequest,
            BoxRequest,
            StackResponse,
            StackView,
            StackedBox,
            OrderStacksResponse,
            CustomerOrdersResponse,
            InvoiceResponse,
            ErrorResponse,
            StackEvent
        )
    ),
    tags(
        (name = "customers", description = "Customer and order data from the upstream API"),
        (name = "stacking", description = "Endpoints for box stacking")
    )
)]
struct ApiDoc;

fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/customers", get(handle_customers))
        .route("/customer_orders/{customer_no}", get(handle_customer_orders))
        .route("/invoice/{customer_no}/{order_no}", get(handle_invoice))
        .route("/stacks/{customer_no}/{order_no}", get(handle_stacks))
        .route(
            "/stacks_stream/{customer_no}/{order_no}",
            get(handle_stacks_stream),
        )
        .route("/stack", post(handle_stack))
        // API documentation
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        .layer(cors)
        .with_state(state)
}

/// Starts the API server.
///
/// Configures CORS for cross-origin requests from the frontend.
/// Blocks until the server is terminated.
pub async fn start_api_server(
    config: ApiConfig,
    source: Arc<OrderSource>,
) -> Result<(), std::io::Error> {
    let app = router(ApiState { source });

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|err| {
        error!("❌ Could not bind API server to {}: {}", addr, err);
        err
    })?;

    let display_host = config.display_host().to_string();
    info!(
        "🚀 Server running on http://{}:{}",
        display_host,
        config.port()
    );
    if config.binds_to_all_interfaces() && config.uses_default_host() {
        info!("💡 Local access: http://localhost:{}", config.port());
    }
    info!("📦 API Endpoints:");
    info!("   - GET /customers");
    info!("   - GET /customer_orders/{{customer_no}}");
    info!("   - GET /invoice/{{customer_no}}/{{order_no}}");
    info!("   - GET /stacks/{{customer_no}}/{{order_no}}");
    info!("   - GET /stacks_stream/{{customer_no}}/{{order_no}}");
    info!("   - POST /stack");
    info!("📑 Documentation: GET /docs, GET /docs/openapi.json");

    axum::serve(listener, app).await
}

/// Handler for GET /customers.
#[utoipa::path(
    get,
    path = "/customers",
    responses(
        (status = 200, description = "All customers, ordered by id", body = [Object]),
        (status = BAD_GATEWAY, description = "Upstream API failed", body = ErrorResponse)
    ),
    tag = "customers"
)]
async fn handle_customers(State(state): State<ApiState>) -> Response {
    match state.source.customers().await {
        Ok(customers) => {
            let list: Vec<&Customer> = customers.values().collect();
            (StatusCode::OK, Json(list)).into_response()
        }
        Err(err) => source_error(err),
    }
}

/// Handler for GET /customer_orders/{customer_no}.
#[utoipa::path(
    get,
    path = "/customer_orders/{customer_no}",
    params(("customer_no" = u64, Path, description = "Customer number")),
    responses(
        (status = 200, description = "Customer with their orders", body = CustomerOrdersResponse),
        (status = NOT_FOUND, description = "Unknown customer", body = ErrorResponse),
        (status = BAD_GATEWAY, description = "Upstream API failed", body = ErrorResponse)
    ),
    tag = "customers"
)]
async fn handle_customer_orders(
    State(state): State<ApiState>,
    Path(customer_no): Path<u64>,
) -> Response {
    let orders = match state.source.customer_orders(customer_no).await {
        Ok(orders) => orders,
        Err(err) => return source_error(err),
    };
    let customer = match state.source.customer(customer_no).await {
        Ok(customer) => customer,
        Err(err) => return source_error(err),
    };

    (
        StatusCode::OK,
        Json(CustomerOrdersResponse { customer, orders }),
    )
        .into_response()
}

/// Handler for GET /invoice/{customer_no}/{order_no}.
///
/// Returns the order components together with the invoice total
/// (sum of `unit_price × quantity_in_box`).
#[utoipa::path(
    get,
    path = "/invoice/{customer_no}/{order_no}",
    params(
        ("customer_no" = u64, Path, description = "Customer number"),
        ("order_no" = String, Path, description = "Order number")
    ),
    responses(
        (status = 200, description = "Invoice for the order", body = InvoiceResponse),
        (status = NOT_FOUND, description = "Unknown customer or order", body = ErrorResponse),
        (status = UNPROCESSABLE_ENTITY, description = "Components lack price data", body = ErrorResponse),
        (status = BAD_GATEWAY, description = "Upstream API failed", body = ErrorResponse)
    ),
    tag = "customers"
)]
async fn handle_invoice(
    State(state): State<ApiState>,
    Path((customer_no, order_no)): Path<(u64, String)>,
) -> Response {
    let (customer, components) = match load_order(&state.source, customer_no, &order_no).await {
        Ok(loaded) => loaded,
        Err(response) => return response,
    };

    let total_price = match invoice_total(&components) {
        Ok(total) => total,
        Err(err) => return validation_error(err.to_string()),
    };

    (
        StatusCode::OK,
        Json(InvoiceResponse {
            order_no,
            customer,
            components,
            total_price,
        }),
    )
        .into_response()
}

/// Handler for GET /stacks/{customer_no}/{order_no}.
///
/// Fetches the order components and partitions them into stacks.
#[utoipa::path(
    get,
    path = "/stacks/{customer_no}/{order_no}",
    params(
        ("customer_no" = u64, Path, description = "Customer number"),
        ("order_no" = String, Path, description = "Order number")
    ),
    responses(
        (status = 200, description = "Stacks for the order", body = OrderStacksResponse),
        (status = NOT_FOUND, description = "Unknown customer or order", body = ErrorResponse),
        (status = BAD_GATEWAY, description = "Upstream API failed", body = ErrorResponse)
    ),
    tag = "stacking"
)]
async fn handle_stacks(
    State(state): State<ApiState>,
    Path((customer_no, order_no)): Path<(u64, String)>,
) -> Response {
    let (customer, components) = match load_order(&state.source, customer_no, &order_no).await {
        Ok(loaded) => loaded,
        Err(response) => return response,
    };

    info!(
        "📥 Stacking order {}: {} components",
        order_no,
        components.len()
    );
    let stacking = StackResponse::from_stacks(stack_boxes(components));
    info!("📦 Result: {} stacks", stacking.stack_count);

    (
        StatusCode::OK,
        Json(OrderStacksResponse {
            order_no,
            customer,
            stacking,
        }),
    )
        .into_response()
}

/// Handler for GET /stacks_stream/{customer_no}/{order_no} (SSE).
///
/// Streams stacking events in real-time as Server-Sent Events (text/event-stream).
#[utoipa::path(
    get,
    path = "/stacks_stream/{customer_no}/{order_no}",
    params(
        ("customer_no" = u64, Path, description = "Customer number"),
        ("order_no" = String, Path, description = "Order number")
    ),
    responses(
        (
            status = 200,
            description = "Streams stacking events in real-time",
            content_type = "text/event-stream",
            body = String
        ),
        (status = NOT_FOUND, description = "Unknown customer or order", body = ErrorResponse),
        (status = BAD_GATEWAY, description = "Upstream API failed", body = ErrorResponse)
    ),
    tag = "stacking"
)]
async fn handle_stacks_stream(
    State(state): State<ApiState>,
    Path((customer_no, order_no)): Path<(u64, String)>,
) -> Response {
    let (_customer, components) = match load_order(&state.source, customer_no, &order_no).await
    {
        Ok(loaded) => loaded,
        Err(response) => return response,
    };

    let (tx, rx) = mpsc::channel::<String>(32);

    tokio::task::spawn_blocking(move || {
        stack_boxes_with_progress(components, |evt| {
            if let Ok(json) = serde_json::to_string(evt) {
                // A send error means the client went away; remaining events are discarded.
                let _ = tx.blocking_send(json);
            }
        });
    });

    let stream = ReceiverStream::new(rx)
        .map(|msg| Ok::<_, std::convert::Infallible>(Event::default().data(msg)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

/// Handler for POST /stack.
///
/// Stacks the boxes given in the request body without contacting the upstream API.
#[utoipa::path(
    post,
    path = "/stack",
    request_body = StackRequest,
    responses(
        (status = 200, description = "Successfully stacked boxes", body = StackResponse),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request",
            body = ErrorResponse
        )
    ),
    tag = "stacking"
)]
async fn handle_stack(payload: Result<Json<StackRequest>, JsonRejection>) -> Response {
    let boxes = match parse_stack_request(payload) {
        Ok(boxes) => boxes,
        Err(response) => return response,
    };

    info!("📥 New stack request: {} boxes", boxes.len());
    let response = StackResponse::from_stacks(stack_boxes(boxes));
    info!("📦 Result: {} stacks", response.stack_count);

    (StatusCode::OK, Json(response)).into_response()
}

async fn serve_openapi_json() -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui() -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}
