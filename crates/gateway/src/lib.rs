//! LexDesk API Gateway
//!
//! The entry point for all external API requests.
//! Handles:
//! - Authentication (bearer tokens resolved to stored profiles)
//! - Rate limiting
//! - Request routing onto the domain services
//! - Observability (logging, metrics, tracing)

pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod telemetry;

use axum::{
    error_handling::HandleErrorLayer,
    extract::{DefaultBodyLimit, Request},
    http::Uri,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use lexdesk_common::{config::AppConfig, errors::AppError, ratelimit::RateLimiter, Services};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower::{limit::ConcurrencyLimitLayer, timeout::TimeoutLayer, BoxError, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Services,
    pub limiter: Arc<dyn RateLimiter>,
    /// Present when the Prometheus recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

/// Create the main application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let auth_routes = Router::new()
        .route("/register", post(handlers::auth::register))
        .route("/login", post(handlers::auth::login))
        .route("/verify-token", post(handlers::auth::verify_token))
        .route("/reset-password", post(handlers::auth::reset_password));

    let document_routes = Router::new()
        .route("/", get(handlers::documents::list))
        .route("/upload", post(handlers::documents::init_upload))
        .route(
            "/{id}",
            get(handlers::documents::get)
                .put(handlers::documents::update)
                .delete(handlers::documents::delete),
        )
        .route("/{id}/upload-complete", post(handlers::documents::upload_complete))
        .route("/{id}/download", get(handlers::documents::download))
        .route("/{id}/status", get(handlers::documents::status))
        .route("/{id}/analysis", get(handlers::documents::latest_analysis))
        .route("/{id}/analyses", get(handlers::documents::analyses));

    let process_routes = Router::new()
        .route("/document", post(handlers::process::process_document))
        .route("/status/{document_id}", get(handlers::process::status))
        .route("/reanalyze", post(handlers::process::reanalyze))
        .route("/batch", post(handlers::process::create_batch))
        .route("/batch/{batch_id}", get(handlers::process::get_batch));

    let analyze_routes = Router::new()
        .route("/risk-assessment", post(handlers::analyze::risk_assessment))
        .route("/compare", post(handlers::analyze::compare));

    let qa_routes = Router::new()
        .route("/ask", post(handlers::qa::ask))
        .route("/follow-up", post(handlers::qa::follow_up))
        .route("/feedback", post(handlers::qa::feedback))
        .route("/conversations/{id}", get(handlers::qa::conversation));

    let user_routes = Router::new()
        .route("/profile", get(handlers::users::profile).put(handlers::users::update_profile))
        .route("/stats", get(handlers::users::stats))
        .route("/account", axum::routing::delete(handlers::users::delete_account))
        .route("/notifications", get(handlers::users::notifications));

    let admin_routes = Router::new()
        .route("/stats", get(handlers::admin::stats))
        .route("/users", get(handlers::admin::list_users))
        .route("/users/{id}", put(handlers::admin::update_user))
        .route("/documents", get(handlers::admin::list_documents))
        .route("/documents/{id}", axum::routing::delete(handlers::admin::delete_document))
        .route("/analytics", get(handlers::admin::analytics))
        .route("/broadcast", post(handlers::admin::broadcast));

    // Raw object bodies for the signed-URL endpoint
    let storage_routes = Router::new()
        .route(
            "/{*path}",
            put(handlers::storage::put_object).get(handlers::storage::get_object),
        )
        .layer(DefaultBodyLimit::max(state.config.server.body_limit_bytes));

    let api_routes = Router::new()
        // Health endpoints (no auth, not rate limited)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/metrics", get(handlers::health::metrics))
        .nest("/auth", auth_routes)
        .nest("/documents", document_routes)
        .nest("/process", process_routes)
        .nest("/analyze", analyze_routes)
        .nest("/qa", qa_routes)
        .nest("/users", user_routes)
        .nest("/admin", admin_routes)
        .nest("/storage", storage_routes)
        .fallback(route_not_found);

    let request_timeout = state.config.request_timeout();
    let timeout_secs = request_timeout.as_secs();

    // Compose the app; the last layer added runs first
    api_routes
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit::enforce))
        .layer(axum::middleware::from_fn(middleware::metrics::track))
        .layer(ConcurrencyLimitLayer::new(state.config.server.max_concurrent_requests.max(1)))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(move |err: BoxError| async move {
                    middleware_error(err, timeout_secs)
                }))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .layer(cors)
        .layer(propagate_id)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default(),
                user_id = tracing::field::Empty,
            )
        }))
        .layer(request_id)
        .with_state(state)
}

/// Map errors raised by the tower middleware into the envelope
fn middleware_error(err: BoxError, timeout_secs: u64) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        AppError::RequestTimeout { timeout_secs }
    } else {
        AppError::internal(format!("unhandled middleware error: {}", err))
    }
}

async fn route_not_found(uri: Uri) -> AppError {
    AppError::RouteNotFound {
        path: uri.path().to_string(),
    }
}
