use std::sync::Arc;

use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;

use groupnom_session::SessionService;

pub mod rest;

pub struct AppState {
    pub sessions: SessionService,
}

impl AppState {
    pub fn new(sessions: SessionService) -> Self {
        Self { sessions }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Session lifecycle
        .route("/api/session/create", post(rest::api_create_session))
        .route("/api/session/init", post(rest::api_init_session))
        .route("/api/session/{code}", get(rest::api_session))
        .route("/api/session/{code}/activate", post(rest::api_activate))
        .route("/api/session/{code}/status", get(rest::api_status))
        .route("/api/session/{code}/vote", post(rest::api_vote))
        .route("/api/session/{code}/close-voting", post(rest::api_close_voting))
        .route(
            "/api/session/{code}/set-reconfiguring",
            post(rest::api_set_reconfiguring),
        )
        .route("/api/session/{code}/reconfigure", post(rest::api_reconfigure))
        .route("/api/session/{code}/results", get(rest::api_results))
        .route(
            "/api/session/{code}/food-method",
            get(rest::api_food_method).post(rest::api_food_method_vote),
        )
        .with_state(state)
        // CORS
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Session state changes on every vote; never cache it
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Method + path only; user ids travel in the query string
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}
