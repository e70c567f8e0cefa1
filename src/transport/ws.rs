// SPDX-License-Identifier: Apache-2.0

//! Operator WebSocket handler: one push-only subscriber per connection onto
//! the [`crate::channel::OperatorChannel`] (spec §4.11, §6 — "push channel
//! at `/fingerprint/ws`, text frames").

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::state::AppState;
use crate::transport::auth;

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorWsQuery {
    pub token: Option<String>,
}

/// `GET /fingerprint/ws` — operator push-channel upgrade.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OperatorWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let query_str = query.token.as_ref().map(|t| format!("token={t}")).unwrap_or_default();
    if auth::validate_ws_query(&query_str, state.credential_checker.as_ref()).is_err() {
        return axum::http::Response::builder()
            .status(401)
            .body(axum::body::Body::from("unauthorized"))
            .unwrap_or_default()
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_ws(socket, state)).into_response()
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let (subscriber_id, mut rx) = state.channel.subscribe().await;

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,

            line = rx.recv() => {
                match line {
                    Some(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // The channel is push-only; we still drain inbound frames so a
            // client's Close handshake completes and dead sockets are
            // detected promptly.
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.channel.unsubscribe(subscriber_id).await;
}
