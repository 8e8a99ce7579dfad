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

//! Error taxonomy (spec §7), layered the way `rpc_common::RpcError` /
//! `RpcMessageError` layer transport errors under message errors.

use thiserror::Error;

/// Errors surfaced by the transport (WebSocket) layer. Local recovery: close
/// the connection and detach it from the registry.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("receive failed: {0}")]
    RecvFailed(String),
    #[error("connection closed")]
    Closed,
}

/// Errors from the external pub/sub broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("not connected")]
    NotConnected,
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("circuit open")]
    CircuitOpen,
    #[error("operation timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token invalid")]
    Invalid,
    #[error("token revoked")]
    Revoked,
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Error)]
pub enum SubjectError {
    #[error("unknown subject kind: {0}")]
    UnknownKind(String),
    #[error("missing parameter: {0}")]
    MissingParam(String),
    #[error("subject failed validation: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message body too long: {len} > {max}")]
    BodyTooLong { len: usize, max: usize },
    #[error("message body empty")]
    BodyEmpty,
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("whisper target not found")]
    TargetNotFound,
    #[error("channel access denied")]
    AccessDenied,
    #[error(transparent)]
    Subject(#[from] SubjectError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),
    #[error("player not online: {0}")]
    PlayerOffline(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("outbound queue full, dropped")]
    BackpressureDrop,
    #[error("send timed out")]
    Timeout,
    #[error("frame exceeds maximum size: {len} > {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Top-level error composing every layer, the way `RpcError` sits above
/// `RpcMessageError` in the teacher's rpc-common crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Subject(#[from] SubjectError),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Presence(#[from] PresenceError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("fatal: {0}")]
    Fatal(String),
}
