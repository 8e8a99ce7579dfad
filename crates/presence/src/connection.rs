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

//! Connection entity (spec §3, §4.2 "Connection" state machine).

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use mudcore_common::ids::{ConnectionId, PlayerId, SequenceNumber};

use crate::queue::OutboundQueue;

/// `handshaking -> authenticating -> active -> draining -> closed`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Handshaking,
    Authenticating,
    Active,
    Draining,
    Closed,
}

pub struct ConnectionRecord {
    pub connection_id: ConnectionId,
    pub player_id: PlayerId,
    /// Bearer token supplied at connect. Kept so the Health Monitor's
    /// periodic revalidation (spec §4.8) can re-check the actual
    /// credential instead of just the player id.
    pub token: String,
    pub established_at: chrono::DateTime<Utc>,
    last_activity_ms: AtomicI64,
    last_pong_ms: AtomicI64,
    stale_strikes: AtomicU32,
    sequence_counter: AtomicU64,
    pub outbound: Arc<OutboundQueue>,
    state: std::sync::Mutex<ConnectionState>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl ConnectionRecord {
    pub fn new(player_id: PlayerId, token: String, outbound_capacity: usize) -> Self {
        Self {
            connection_id: ConnectionId::new_v4(),
            player_id,
            token,
            established_at: Utc::now(),
            last_activity_ms: AtomicI64::new(now_ms()),
            last_pong_ms: AtomicI64::new(now_ms()),
            stale_strikes: AtomicU32::new(0),
            sequence_counter: AtomicU64::new(0),
            outbound: Arc::new(OutboundQueue::new(outbound_capacity)),
            state: std::sync::Mutex::new(ConnectionState::Handshaking),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn next_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn record_activity(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::SeqCst);
    }

    pub fn record_pong(&self) {
        self.last_pong_ms.store(now_ms(), Ordering::SeqCst);
        self.stale_strikes.store(0, Ordering::SeqCst);
    }

    pub fn last_activity_at(&self) -> chrono::DateTime<Utc> {
        chrono::DateTime::from_timestamp_millis(self.last_activity_ms.load(Ordering::SeqCst))
            .unwrap_or_else(Utc::now)
    }

    /// Called by the Health Monitor after a ping round with no pong.
    /// Returns the new strike count.
    pub fn record_missed_pong(&self) -> u32 {
        self.stale_strikes.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn last_pong_age_ms(&self) -> i64 {
        now_ms() - self.last_pong_ms.load(Ordering::SeqCst)
    }
}
