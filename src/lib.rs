//! Storefront checkout engine
//!
//! Order building, hosted payment sessions, payment webhook reconciliation
//! and expiry reaping for the storefront, served over axum.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod request_context;
pub mod services;

use axum::{
    extract::FromRef,
    routing::{get, patch, post},
    Router,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::auth::AuthService;
use crate::services::payment_gateway::PaymentGateway;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let services = handlers::AppServices::new(db.clone(), &config, event_sender.clone(), gateway);
        let auth = Arc::new(AuthService::new(
            config.jwt_secret.clone(),
            config.jwt_issuer.clone(),
        ));
        Self {
            db,
            config: Arc::new(config),
            event_sender,
            services,
            auth,
        }
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Routes mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route(
            "/orders/:id",
            get(handlers::orders::get_order).delete(handlers::orders::cancel_order),
        )
        .route(
            "/orders/:id/status",
            patch(handlers::orders::update_order_status),
        )
        .route(
            "/orders/:id/payment-session",
            post(handlers::orders::create_payment_session),
        )
        .route("/checkout", post(handlers::checkout::checkout))
        .route("/coupons/validate", post(handlers::coupons::validate_coupon))
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
}

/// Full application router without CORS, which `main` adds from configuration.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .nest("/api/v1", api_v1_routes())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(
            request_context::request_id_middleware,
        ))
        .with_state(state)
}
