use std::{collections::BTreeMap, net::SocketAddr, sync::Arc, time::Instant};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use server_api::{
    auth::password_digest, complete_order, create_customer, create_order, get_order, list_customers,
    list_orders, login, order_statistics, update_order_status, ApiContext, AuthConfig,
    SessionClaims,
};
use shared::{
    domain::OrderId,
    error::{ApiError, ErrorCode},
    protocol::{
        CreateCustomerRequest, CreateOrderRequest, CustomerListQuery, CustomerPayload,
        HealthResponse, ListQuery, ListResponse, LoginRequest, LoginResponse, OrderPayload,
        OrderStatistics, ServiceInfo, UpdateOrderStatusRequest,
    },
};
use storage::Storage;
use tracing::{error, info, warn};

mod config;

use config::{load_settings, prepare_database_url};

const SERVICE_NAME: &str = "order-board-api";
const SERVICE_DESCRIPTION: &str =
    "order management service for the door manufacturing dashboard";

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    environment: String,
    started_at: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    if storage.user_count().await? == 0 {
        storage
            .upsert_user(
                &settings.admin_username,
                "Administrator",
                &password_digest(&settings.admin_password),
            )
            .await?;
        warn!(
            username = %settings.admin_username,
            "seeded initial admin user; change the password before exposing this service"
        );
    }

    let api = ApiContext {
        storage,
        auth: AuthConfig {
            secret: settings.auth_secret,
            token_ttl_seconds: settings.auth_token_ttl_seconds,
        },
    };
    let state = AppState {
        api,
        environment: settings.environment,
        started_at: Instant::now(),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api", get(service_info))
        .route("/api/auth/login", post(http_login))
        .route("/api/orders", get(http_list_orders).post(http_create_order))
        .route("/api/orders/statistics", get(http_order_statistics))
        .route("/api/orders/:order_id", get(http_get_order))
        .route("/api/orders/:order_id/status", patch(http_update_order_status))
        .route("/api/orders/:order_id/complete", post(http_complete_order))
        .route(
            "/api/customers",
            get(http_list_customers).post(http_create_customer),
        )
        .with_state(state)
}

fn error_response(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

fn require_session(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<SessionClaims, (StatusCode, Json<ApiError>)> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            error_response(ApiError::new(
                ErrorCode::Unauthorized,
                "missing bearer token",
            ))
        })?;
    server_api::authorize(&state.api, token).map_err(error_response)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        environment: state.environment.clone(),
    })
}

async fn service_info() -> Json<ServiceInfo> {
    let mut endpoints = BTreeMap::new();
    endpoints.insert("GET /api/health".to_string(), "service health".to_string());
    endpoints.insert(
        "POST /api/auth/login".to_string(),
        "exchange credentials for a session token".to_string(),
    );
    endpoints.insert(
        "GET /api/orders".to_string(),
        "list orders (limit, sort_by, sort_order, search, status, priority)".to_string(),
    );
    endpoints.insert("POST /api/orders".to_string(), "create an order".to_string());
    endpoints.insert(
        "GET /api/orders/statistics".to_string(),
        "order counts by status and overdue total".to_string(),
    );
    endpoints.insert(
        "GET /api/orders/:order_id".to_string(),
        "fetch one order".to_string(),
    );
    endpoints.insert(
        "PATCH /api/orders/:order_id/status".to_string(),
        "move an order along the status graph".to_string(),
    );
    endpoints.insert(
        "POST /api/orders/:order_id/complete".to_string(),
        "mark an order completed".to_string(),
    );
    endpoints.insert(
        "GET /api/customers".to_string(),
        "list customers (limit, search, status)".to_string(),
    );
    endpoints.insert(
        "POST /api/customers".to_string(),
        "create a customer".to_string(),
    );

    Json(ServiceInfo {
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: SERVICE_DESCRIPTION.to_string(),
        endpoints,
    })
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ApiError>)> {
    let response = login(&state.api, &req.username, &req.password)
        .await
        .map_err(error_response)?;
    Ok(Json(response))
}

async fn http_list_orders(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse<OrderPayload>>, (StatusCode, Json<ApiError>)> {
    require_session(&state, &headers)?;
    let orders = list_orders(&state.api, &query).await.map_err(error_response)?;
    Ok(Json(orders))
}

async fn http_create_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderPayload>), (StatusCode, Json<ApiError>)> {
    require_session(&state, &headers)?;
    let order = create_order(&state.api, req).await.map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn http_get_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
) -> Result<Json<OrderPayload>, (StatusCode, Json<ApiError>)> {
    require_session(&state, &headers)?;
    let order = get_order(&state.api, OrderId(order_id))
        .await
        .map_err(error_response)?;
    Ok(Json(order))
}

async fn http_update_order_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
    Json(req): Json<UpdateOrderStatusRequest>,
) -> Result<Json<OrderPayload>, (StatusCode, Json<ApiError>)> {
    require_session(&state, &headers)?;
    let order = update_order_status(&state.api, OrderId(order_id), req.status)
        .await
        .map_err(error_response)?;
    Ok(Json(order))
}

async fn http_complete_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
) -> Result<Json<OrderPayload>, (StatusCode, Json<ApiError>)> {
    require_session(&state, &headers)?;
    let order = complete_order(&state.api, OrderId(order_id))
        .await
        .map_err(error_response)?;
    Ok(Json(order))
}

async fn http_order_statistics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<OrderStatistics>, (StatusCode, Json<ApiError>)> {
    require_session(&state, &headers)?;
    let stats = order_statistics(&state.api).await.map_err(error_response)?;
    Ok(Json(stats))
}

async fn http_list_customers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CustomerListQuery>,
) -> Result<Json<ListResponse<CustomerPayload>>, (StatusCode, Json<ApiError>)> {
    require_session(&state, &headers)?;
    let customers = list_customers(&state.api, &query)
        .await
        .map_err(error_response)?;
    Ok(Json(customers))
}

async fn http_create_customer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<CustomerPayload>), (StatusCode, Json<ApiError>)> {
    require_session(&state, &headers)?;
    let customer = create_customer(&state.api, req)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(customer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use shared::domain::{OrderPriority, OrderStatus};
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        storage
            .upsert_user("alice", "Alice", &password_digest("secret"))
            .await
            .expect("user");
        let api = ApiContext {
            storage,
            auth: AuthConfig {
                secret: "test-secret".to_string(),
                token_ttl_seconds: 3600,
            },
        };
        build_router(Arc::new(AppState {
            api,
            environment: "test".to_string(),
            started_at: Instant::now(),
        }))
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    async fn login_token(app: &Router) -> String {
        let request = Request::post("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({"username": "alice", "password": "secret"}).to_string(),
            ))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let login: LoginResponse = json_body(response).await;
        login.token
    }

    #[tokio::test]
    async fn health_and_service_info_are_public() {
        let app = test_app().await;

        let response = app
            .clone()
            .oneshot(Request::get("/api/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = json_body(response).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.environment, "test");

        let response = app
            .oneshot(Request::get("/api").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let info: ServiceInfo = json_body(response).await;
        assert_eq!(info.service, SERVICE_NAME);
        assert!(info.endpoints.contains_key("GET /api/orders"));
    }

    #[tokio::test]
    async fn order_routes_require_a_session_token() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::get("/api/orders").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bad_credentials_are_rejected() {
        let app = test_app().await;
        let request = Request::post("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::json!({"username": "alice", "password": "nope"}).to_string(),
            ))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn order_lifecycle_over_http() {
        let app = test_app().await;
        let token = login_token(&app).await;

        let request = Request::post("/api/orders")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(
                serde_json::json!({"title": "oak entry door", "priority": "high"}).to_string(),
            ))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let order: OrderPayload = json_body(response).await;
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.priority, OrderPriority::High);

        let request = Request::patch(format!("/api/orders/{}/status", order.order_id.0))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(
                serde_json::json!({"status": "in_progress"}).to_string(),
            ))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let order: OrderPayload = json_body(response).await;
        assert_eq!(order.status, OrderStatus::InProgress);

        let request = Request::post(format!("/api/orders/{}/complete", order.order_id.0))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let order: OrderPayload = json_body(response).await;
        assert_eq!(order.status, OrderStatus::Completed);

        let request = Request::get("/api/orders/statistics")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let stats: OrderStatistics = json_body(response).await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.by_status.completed, 1);
    }

    #[tokio::test]
    async fn rejected_transition_maps_to_bad_request() {
        let app = test_app().await;
        let token = login_token(&app).await;

        let request = Request::post("/api/orders")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(
                serde_json::json!({"title": "door", "priority": "low"}).to_string(),
            ))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let order: OrderPayload = json_body(response).await;

        // NEW orders cannot jump straight to PAUSED
        let request = Request::patch(format!("/api/orders/{}/status", order.order_id.0))
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(serde_json::json!({"status": "paused"}).to_string()))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: ApiError = json_body(response).await;
        assert!(matches!(err.code, ErrorCode::Validation));
    }

    #[tokio::test]
    async fn unknown_order_maps_to_not_found() {
        let app = test_app().await;
        let token = login_token(&app).await;
        let request = Request::get("/api/orders/999")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
