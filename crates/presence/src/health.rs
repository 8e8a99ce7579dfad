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

//! Health Monitor (spec §4.8, C8): single background task that pings every
//! connection each `ping_interval`, detaches stale ones, and periodically
//! revalidates tokens. Grounded on the teacher's `TaskMonitor` — a single
//! long-lived task iterating a concurrent map and reacting to timeouts.

use std::sync::Arc;
use std::time::Duration;

use mudcore_common::error::AuthError;
use mudcore_common::ports::Auth;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionState;
use crate::registry::ConnectionRegistry;

pub struct HealthMonitorConfig {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub stale_strikes: u32,
    pub token_revalidation_interval: Duration,
}

pub struct HealthMonitor {
    registry: Arc<ConnectionRegistry>,
    auth: Arc<dyn Auth>,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, auth: Arc<dyn Auth>, config: HealthMonitorConfig) -> Self {
        Self { registry, auth, config }
    }

    /// Runs until `cancel` fires. Intended to be spawned once by the
    /// supervisor and tracked in its `JoinSet` (spec §5 cancellation).
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ping_ticker = tokio::time::interval(self.config.ping_interval);
        let mut revalidate_ticker = tokio::time::interval(self.config.token_revalidation_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("health monitor cancelled");
                    return;
                }
                _ = ping_ticker.tick() => {
                    self.ping_round().await;
                }
                _ = revalidate_ticker.tick() => {
                    self.revalidate_round().await;
                }
            }
        }
    }

    async fn ping_round(&self) {
        for connection_id in self.registry.connection_ids_snapshot() {
            let Some(record) = self.registry.connection(connection_id) else { continue };
            if record.state() != ConnectionState::Active {
                continue;
            }
            let ping_frame = br#"{"event_type":"ping"}"#.to_vec();
            let _ = record
                .outbound
                .enqueue(ping_frame, false, Duration::from_millis(0))
                .await;

            if record.last_pong_age_ms() as u64 > self.config.pong_timeout.as_millis() as u64 {
                let strikes = record.record_missed_pong();
                if strikes >= self.config.stale_strikes {
                    tracing::warn!(?connection_id, strikes, "connection stale, detaching");
                    record.set_state(ConnectionState::Draining);
                    let _ = self.registry.detach(connection_id).await;
                }
            }
        }
    }

    async fn revalidate_round(&self) {
        for connection_id in self.registry.connection_ids_snapshot() {
            let Some(record) = self.registry.connection(connection_id) else { continue };
            match self.auth.validate_token(&record.token).await {
                Ok(_) => {}
                Err(AuthError::Revoked) | Err(AuthError::Invalid) | Err(AuthError::Expired) => {
                    tracing::warn!(?connection_id, "token revalidation failed, detaching (auth_revoked)");
                    let _ = self.registry.detach(connection_id).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mudcore_common::ids::{PlayerId, RoomId};
    use mudcore_common::ports::fake::FakeAuth;
    use mudcore_eventbus::EventBus;

    use super::*;

    fn monitor(auth: Arc<FakeAuth>, registry: Arc<ConnectionRegistry>) -> HealthMonitor {
        HealthMonitor::new(
            registry,
            auth,
            HealthMonitorConfig {
                ping_interval: Duration::from_secs(60),
                pong_timeout: Duration::from_secs(5),
                stale_strikes: 3,
                token_revalidation_interval: Duration::from_secs(60),
            },
        )
    }

    #[tokio::test]
    async fn revalidate_round_checks_the_connection_token_not_the_player_id() {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ConnectionRegistry::new(bus, Duration::from_secs(30)));
        let auth = Arc::new(FakeAuth::default());
        // the token is deliberately not equal to the player id, so a
        // revalidation that accidentally checks the player id would fail
        auth.valid_tokens.lock().unwrap().insert("secret-token".to_string(), PlayerId::new("alice"));

        let conn = registry
            .attach(PlayerId::new("alice"), "Alice".into(), RoomId::new("arkham.001"), "secret-token".into(), 16)
            .await;

        let hm = monitor(auth, Arc::clone(&registry));
        hm.revalidate_round().await;

        assert!(registry.connection(conn.connection_id).is_some());
    }

    #[tokio::test]
    async fn revalidate_round_detaches_on_an_unrecognized_token() {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ConnectionRegistry::new(bus, Duration::from_secs(30)));
        let auth = Arc::new(FakeAuth::default());

        let conn = registry
            .attach(PlayerId::new("alice"), "Alice".into(), RoomId::new("arkham.001"), "not-registered".into(), 16)
            .await;

        let hm = monitor(auth, Arc::clone(&registry));
        hm.revalidate_round().await;

        assert!(registry.connection(conn.connection_id).is_none());
    }
}
