// Copyright (C) 2026 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Per-connection transport: WebSocket upgrade handler and the
//! read/write loop behind it. Grounded on the teacher's
//! `web_host::ws_connect_attach_handler` (query-string driven upgrade) and
//! `WebSocketConnection::handle`'s `tokio::select!` loop over socket reads
//! and an outbound queue, generalized from the teacher's narrative/broadcast
//! channel pair to this crate's single per-connection `OutboundQueue`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use mudcore_chat::{ChannelDescriptor, ChatMessage, RouteOutcome};
use mudcore_common::ids::{PlayerId, RoomId};
use mudcore_common::wire::CommandFrame;
use mudcore_presence::ConnectionState;

use crate::supervisor::Supervisor;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: String,
    pub room_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Upgrade handler (spec §6 "WebSocket transport"): resolves the token via
/// the `Auth` port before accepting the upgrade, mirroring the teacher's
/// `ws_connect_attach_handler` resolving a player from the path/query before
/// calling `ws.on_upgrade`.
pub async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(supervisor): State<Arc<Supervisor>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<ConnectParams>,
) -> impl IntoResponse {
    if !supervisor.is_accepting() {
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let claims = match supervisor.auth.validate_token(&params.token).await {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "websocket upgrade rejected, invalid token");
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let display_name = params.display_name.clone().unwrap_or_else(|| claims.player_id.as_str().to_string());
    let room_id = RoomId::new(params.room_id.clone());
    let token = params.token.clone();
    let is_admin = claims.is_admin;

    ws.on_upgrade(move |socket| async move {
        handle_socket(socket, supervisor, claims.player_id, display_name, room_id, token, is_admin, peer).await;
    })
}

async fn handle_socket(
    socket: WebSocket,
    supervisor: Arc<Supervisor>,
    player_id: PlayerId,
    display_name: String,
    room_id: RoomId,
    token: String,
    is_admin: bool,
    peer: SocketAddr,
) {
    let record = supervisor
        .registry
        .attach(player_id.clone(), display_name, room_id, token, supervisor.config.connection.outbound_queue_size)
        .await;
    supervisor.metrics.record_connection_opened();
    tracing::info!(%peer, %player_id, connection_id = %record.connection_id, "connection attached");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let connections_cancel = supervisor.connections_cancel_token();

    loop {
        tokio::select! {
            _ = connections_cancel.cancelled() => {
                break;
            }
            frame = record.outbound.dequeue() => {
                match frame {
                    Some(bytes) => {
                        if ws_sender.send(Message::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        record.record_activity();
                        handle_command_text(&supervisor, &player_id, text.as_str(), is_admin).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        record.record_activity();
                        if let Ok(text) = String::from_utf8(bytes) {
                            handle_command_text(&supervisor, &player_id, &text, is_admin).await;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        record.record_pong();
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Close(_))) => {}
                    Some(Err(e)) => {
                        tracing::warn!(%peer, error = %e, "websocket receive error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    record.set_state(ConnectionState::Draining);
    if let Err(e) = supervisor.registry.detach(record.connection_id).await {
        tracing::warn!(%peer, error = %e, "detach failed for already-removed connection");
    }
    supervisor.metrics.record_connection_closed();
    tracing::info!(%peer, %player_id, connection_id = %record.connection_id, "connection detached");
}

/// Parses one command frame and dispatches it. Malformed frames and
/// commands this core doesn't own (movement, combat, ...) are logged and
/// dropped — the gateway only owns the chat/presence/delivery surface
/// named in spec §1-§4.
async fn handle_command_text(supervisor: &Arc<Supervisor>, player_id: &PlayerId, text: &str, is_admin: bool) {
    if !CommandFrame::fits_budget(text.as_bytes()) {
        tracing::warn!(%player_id, "command frame exceeds size budget, dropping");
        return;
    }
    let frame: CommandFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(%player_id, error = %e, "malformed command frame, dropping");
            return;
        }
    };

    let outcome = match frame.command.as_str() {
        "say" => route_chat(supervisor, player_id, ChannelDescriptor::room("say"), frame.args, None, is_admin).await,
        "local" | "subzone" => {
            route_chat(supervisor, player_id, ChannelDescriptor::subzone("local"), frame.args, None, is_admin).await
        }
        "global" => route_chat(supervisor, player_id, ChannelDescriptor::global("global"), frame.args, None, is_admin).await,
        "system" => route_chat(supervisor, player_id, ChannelDescriptor::system("system"), frame.args, None, is_admin).await,
        "whisper" => {
            let mut args = frame.args.into_iter();
            let target = args.next();
            let body: Vec<String> = args.collect();
            route_chat(supervisor, player_id, ChannelDescriptor::whisper("whisper"), body, target, is_admin).await
        }
        "pong" => None,
        other => {
            tracing::debug!(%player_id, command = other, "command not handled by this core");
            None
        }
    };

    if let Some(outcome) = outcome {
        match outcome {
            Ok(RouteOutcome::Routed { .. }) => {}
            Ok(RouteOutcome::RateLimited { retry_after_ms }) => {
                tracing::debug!(%player_id, retry_after_ms, "chat message rate limited");
            }
            Ok(RouteOutcome::TargetNotFound) => {
                tracing::debug!(%player_id, "whisper target not found");
            }
            Ok(RouteOutcome::AccessDenied) => {
                tracing::debug!(%player_id, "chat channel access denied");
            }
            Err(e) => {
                tracing::warn!(%player_id, error = %e, "chat routing failed");
            }
        }
    }
}

async fn route_chat(
    supervisor: &Arc<Supervisor>,
    player_id: &PlayerId,
    channel: ChannelDescriptor,
    body_words: Vec<String>,
    whisper_target_name: Option<String>,
    is_admin: bool,
) -> Option<Result<RouteOutcome, mudcore_common::error::ChatError>> {
    let body = body_words.join(" ");
    let msg = ChatMessage { sender: player_id.clone(), channel, body, whisper_target_name };
    Some(supervisor.chat_router.route(msg, is_admin).await)
}
