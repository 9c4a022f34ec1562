use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use std::sync::Arc;

use petri_types::MatchId;

use crate::session;
use crate::AppState;

pub(super) async fn match_ws(
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(match_id) = MatchId::from_hex(&match_id) else {
        return (StatusCode::BAD_REQUEST, "invalid match id").into_response();
    };
    ws.on_upgrade(move |socket| session::serve(socket, state, match_id))
        .into_response()
}
