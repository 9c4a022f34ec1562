//! Ingress session: one duplex WebSocket per player.
//!
//! The session authenticates, binds the account to its cell in the named
//! match, then bridges frames both ways: validated inputs into the match
//! owner's bounded queue, broadcast snapshots/events out through a writer
//! task with a send timeout. A session holds only channel endpoints; it never
//! touches match state.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use petri_types::constants::SESSION_OUTBOUND_DEPTH;
use petri_types::protocol::{ClientMessage, RejectCode, ServerMessage};
use petri_types::{AccountId, MatchId};

use crate::auth::verify_token;
use crate::controller::PlayerInput;
use crate::AppState;

const SEND_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn serve(socket: WebSocket, state: Arc<AppState>, match_id: MatchId) {
    state.metrics.inc_ws_connections();
    let (mut sink, mut stream) = socket.split();

    let (out_tx, mut out_rx) = mpsc::channel::<Message>(SESSION_OUTBOUND_DEPTH);
    let writer_metrics = Arc::clone(&state.metrics);
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            match timeout(SEND_TIMEOUT, sink.send(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    writer_metrics.inc_ws_send_errors();
                    warn!("session send failed; client gone");
                    break;
                }
                Err(_) => {
                    writer_metrics.inc_ws_send_errors();
                    warn!("session send timed out");
                    break;
                }
            }
        }
        let _ = sink.close().await;
    });

    if let Some((account, inputs, updates)) =
        authenticate(&mut stream, &out_tx, &state, match_id).await
    {
        info!(%match_id, %account, "session authenticated");
        pump(&mut stream, &out_tx, &state, account, inputs.clone(), updates).await;
        // A disconnected cell stays in place under zero input; it does not
        // keep steering on its last frame.
        let _ = inputs.try_send(PlayerInput {
            account,
            axes: petri_types::protocol::Axes::ZERO,
            boost: false,
            seq: 0,
            ts: 0,
        });
    }

    drop(out_tx);
    let _ = writer.await;
    state.metrics.inc_ws_disconnects();
}

/// Pre-auth phase: everything except a valid AUTH frame is dropped.
async fn authenticate(
    stream: &mut SplitStream<WebSocket>,
    out: &mpsc::Sender<Message>,
    state: &Arc<AppState>,
    match_id: MatchId,
) -> Option<(
    AccountId,
    mpsc::Sender<PlayerInput>,
    broadcast::Receiver<crate::controller::Frame>,
)> {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = out.try_send(Message::Pong(data));
                continue;
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        };
        let Ok(ClientMessage::Auth { token }) = serde_json::from_str::<ClientMessage>(&text)
        else {
            // Non-AUTH traffic before authentication is dropped.
            continue;
        };

        let Some(account) = verify_token(&state.config.jwt_secret, &token) else {
            reject(out, RejectCode::InvalidToken, "token verification failed");
            return None;
        };

        // The account must be a confirmed member of the named match.
        let is_member = state
            .registry
            .match_record(match_id)
            .and_then(|record| state.registry.members(record.lobby_id))
            .map(|members| members.iter().any(|member| member.account == account))
            .unwrap_or(false);
        if !is_member {
            reject(out, RejectCode::NotAMember, "not a member of this match");
            return None;
        }

        let Some((inputs, updates)) = state.directory.attach(match_id).await else {
            reject(out, RejectCode::NotAMember, "match is not live");
            return None;
        };
        return Some((account, inputs, updates));
    }
    None
}

/// Post-auth phase: inputs in, frames out, until either side ends.
async fn pump(
    stream: &mut SplitStream<WebSocket>,
    out: &mpsc::Sender<Message>,
    state: &Arc<AppState>,
    account: AccountId,
    inputs: mpsc::Sender<PlayerInput>,
    mut updates: broadcast::Receiver<crate::controller::Frame>,
) {
    // One warning per session for malformed or invalid input; the second
    // violation closes the connection.
    let mut warned = false;
    loop {
        tokio::select! {
            inbound = stream.next() => {
                let text = match inbound {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = out.try_send(Message::Pong(data));
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Input { seq, axes, boost, ts }) => {
                        let axes = match axes.validated() {
                            Ok(axes) => axes,
                            Err(err) => {
                                state.metrics.inc_inputs_rejected();
                                if violation(out, &mut warned, RejectCode::InvalidAxes, &err.to_string()) {
                                    break;
                                }
                                continue;
                            }
                        };
                        let input = PlayerInput { account, axes, boost, seq, ts };
                        // Bounded queue: under pressure the frame is dropped
                        // and the next one wins (inputs coalesce anyway).
                        if inputs.try_send(input).is_err() {
                            state.metrics.inc_inputs_dropped();
                            debug!(%account, seq, "input queue full; dropped");
                        }
                    }
                    Ok(ClientMessage::Auth { .. }) => {
                        // Re-auth on a bound session is ignored.
                    }
                    Err(_) => {
                        state.metrics.inc_inputs_rejected();
                        if violation(out, &mut warned, RejectCode::MalformedFrame, "unparseable frame") {
                            break;
                        }
                    }
                }
            }
            update = updates.recv() => {
                match update {
                    Ok(frame) => {
                        if out.try_send(Message::Text(frame.to_string())).is_err() {
                            warn!(%account, "outbound queue full; closing session");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        state.metrics.add_ws_lagged(skipped);
                        warn!(%account, skipped, "session lagged behind updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Match owner is gone; the RESULT frame (if any) was
                        // already queued.
                        break;
                    }
                }
            }
        }
    }
}

fn reject(out: &mpsc::Sender<Message>, code: RejectCode, message: &str) {
    let frame = ServerMessage::Reject {
        code,
        message: message.to_string(),
    };
    if let Ok(encoded) = serde_json::to_string(&frame) {
        let _ = out.try_send(Message::Text(encoded));
    }
}

/// Returns true when the session must close (second violation).
fn violation(
    out: &mpsc::Sender<Message>,
    warned: &mut bool,
    code: RejectCode,
    message: &str,
) -> bool {
    if *warned {
        return true;
    }
    *warned = true;
    reject(out, code, message);
    false
}
