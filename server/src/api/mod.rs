//! HTTP/WS surface.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

mod http;
mod ws;

pub struct Api {
    state: Arc<AppState>,
}

impl Api {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(http::healthz))
            .route("/metrics", get(http::metrics))
            .route("/account", post(http::create_account))
            .route("/account/:id", get(http::get_account))
            .route("/account/:id/deposit", post(http::deposit))
            .route("/account/:id/withdraw", post(http::withdraw))
            .route("/account/:id/kyc", post(http::set_kyc))
            .route("/account/:id/history", get(http::history))
            .route("/lobby", post(http::create_lobby))
            .route("/lobbies", get(http::list_lobbies))
            .route("/lobby/:id", get(http::get_lobby))
            .route("/lobby/:id/join", post(http::join_lobby))
            .route("/lobby/:id/leave", post(http::leave_lobby))
            .route("/match/:id", get(http::get_match))
            .route("/match/:id/verify", get(http::verify_match))
            .route("/match/:id/ws", get(ws::match_ws))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }
}
