// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Log Stream WebSocket
//!
//! `WS /logs` fans out every captured monitor line as
//! `{runtime_id, line, is_verbose}` JSON frames. Subscribers that fall
//! behind the broadcast buffer skip lines rather than stall the fleet; the
//! per-monitor log files remain the durable record.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::presentation::api::AppState;

pub async fn logs_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let receiver = state.logs.subscribe();
    ws.on_upgrade(move |socket| pump(socket, receiver))
}

async fn pump(
    mut socket: WebSocket,
    mut receiver: tokio::sync::broadcast::Receiver<crate::infrastructure::log_stream::LogLine>,
) {
    loop {
        tokio::select! {
            line = receiver.recv() => {
                match line {
                    Ok(line) => {
                        let frame = match serde_json::to_string(&line) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(error = %e, "log line did not serialize");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "log subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // pings and client chatter are ignored
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}
