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

//! Cleaner (spec §4.16, C16): the four periodic/on-demand sweeps the
//! registry can't keep itself honest with alone — ghost players, orphaned
//! room occupants, dead transports, and an optional DLQ replay. Grounded
//! on the teacher's periodic `task_monitor` sweep.

use std::sync::Arc;
use std::time::Duration;

use mudcore_broker::{BrokerClient, DeadLetterQueue};
use tokio_util::sync::CancellationToken;

use crate::registry::ConnectionRegistry;

pub struct Cleaner {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    dlq: Arc<DeadLetterQueue>,
    broker: Arc<dyn BrokerClient>,
    dlq_replay_batch: usize,
}

impl Cleaner {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        interval: Duration,
        dlq: Arc<DeadLetterQueue>,
        broker: Arc<dyn BrokerClient>,
        dlq_replay_batch: usize,
    ) -> Self {
        Self { registry, interval, dlq, broker, dlq_replay_batch }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("cleaner cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    pub async fn sweep(&self) {
        self.reap_ghosts().await;
        self.reap_orphaned_room_occupants().await;
        self.reap_dead_transports().await;
        self.replay_dlq().await;
    }

    /// Presence records with no live connections and expired grace.
    async fn reap_ghosts(&self) {
        let ghosts = self.registry.ghost_players().await;
        for player_id in ghosts {
            tracing::debug!(%player_id, "reaping ghost presence record");
            self.registry.reap_ghost(&player_id).await;
        }
    }

    /// Players in a room set with no presence record at all.
    async fn reap_orphaned_room_occupants(&self) {
        for (room_id, player_id) in self.registry.orphaned_room_occupants() {
            tracing::debug!(%room_id, %player_id, "removing orphaned room occupant");
            self.registry.remove_room_occupant(&room_id, &player_id);
        }
    }

    /// Connections whose transport reports closed but are still registered.
    async fn reap_dead_transports(&self) {
        for connection_id in self.registry.dead_transport_connections() {
            tracing::debug!(%connection_id, "detaching dead transport");
            if let Err(e) = self.registry.detach(connection_id).await {
                tracing::warn!(%connection_id, error = %e, "dead transport already detached");
            }
        }
    }

    /// Replays up to `dlq_replay_batch` dead-lettered frames through the
    /// broker. `drain`'s handler is synchronous, so it only collects the
    /// popped records; the actual publish (and the circuit-breaker check
    /// that gates it, spec §4.16 "respecting breaker state") happens
    /// afterward, and a record that still fails is pushed back onto the
    /// queue instead of being lost.
    async fn replay_dlq(&self) {
        let mut popped = Vec::new();
        self.dlq
            .drain(
                |record| {
                    popped.push(record.clone());
                    true
                },
                self.dlq_replay_batch,
            )
            .await;
        if popped.is_empty() {
            return;
        }
        tracing::debug!(count = popped.len(), "replaying dead-lettered frames through the broker");
        for record in popped {
            match self.broker.publish(&record.original_subject, record.payload.clone()).await {
                Ok(()) => {
                    tracing::debug!(subject = %record.original_subject, "dead-lettered frame replayed");
                }
                Err(e) => {
                    tracing::debug!(subject = %record.original_subject, error = %e, "dead-letter replay failed, re-enqueuing");
                    self.dlq.enqueue(record).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use mudcore_broker::{BrokerClientState, BrokerHandle, DeadLetterRecord, Handler};
    use mudcore_common::error::BrokerError;
    use mudcore_common::ids::{PlayerId, RoomId};
    use mudcore_eventbus::EventBus;

    use super::*;

    struct StubBroker {
        fail: bool,
        published: tokio::sync::Mutex<Vec<String>>,
    }

    impl StubBroker {
        fn new(fail: bool) -> Self {
            Self { fail, published: tokio::sync::Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl BrokerClient for StubBroker {
        async fn connect(&self) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn publish(&self, subject: &str, _bytes: Vec<u8>) -> Result<(), BrokerError> {
            if self.fail {
                return Err(BrokerError::CircuitOpen);
            }
            self.published.lock().await.push(subject.to_string());
            Ok(())
        }
        async fn subscribe(&self, _subject: &str, _handler: Handler) -> Result<BrokerHandle, BrokerError> {
            unimplemented!("not exercised by cleaner tests")
        }
        fn is_healthy(&self) -> bool {
            true
        }
        fn state(&self) -> BrokerClientState {
            BrokerClientState::Connected
        }
        async fn close(&self) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    fn dlq_record(subject: &str) -> DeadLetterRecord {
        DeadLetterRecord {
            original_subject: subject.to_string(),
            payload: b"hi".to_vec(),
            first_attempt_at: chrono::Utc::now(),
            last_error: "boom".to_string(),
            attempt_count: 1,
        }
    }

    fn cleaner(broker: Arc<dyn BrokerClient>) -> (Cleaner, Arc<ConnectionRegistry>, Arc<DeadLetterQueue>) {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ConnectionRegistry::new(bus, Duration::from_millis(10)));
        let dlq = Arc::new(DeadLetterQueue::new(None));
        let cleaner = Cleaner::new(Arc::clone(&registry), Duration::from_secs(60), Arc::clone(&dlq), broker, 10);
        (cleaner, registry, dlq)
    }

    #[tokio::test]
    async fn sweep_reaps_ghost_players() {
        let (cleaner, registry, _dlq) = cleaner(Arc::new(StubBroker::new(false)));
        let room = RoomId::new("arkham.001");
        let conn = registry.attach(PlayerId::new("alice"), "Alice".into(), room, "tok".into(), 16).await;
        registry.detach(conn.connection_id).await.unwrap();
        // grace period is 10ms; wait for it to lapse.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.ghost_players().await, vec![PlayerId::new("alice")]);
        cleaner.sweep().await;
        assert!(registry.ghost_players().await.is_empty());
    }

    #[tokio::test]
    async fn sweep_removes_orphaned_room_occupants() {
        let (cleaner, registry, _dlq) = cleaner(Arc::new(StubBroker::new(false)));
        let room = RoomId::new("arkham.001");
        registry.insert_room_occupant_for_test(&room, &PlayerId::new("ghost-occupant"));
        assert!(!registry.orphaned_room_occupants().is_empty());
        cleaner.sweep().await;
        assert!(registry.orphaned_room_occupants().is_empty());
    }

    #[tokio::test]
    async fn sweep_detaches_dead_transports() {
        let (cleaner, registry, _dlq) = cleaner(Arc::new(StubBroker::new(false)));
        let room = RoomId::new("arkham.001");
        let conn = registry.attach(PlayerId::new("bob"), "Bob".into(), room, "tok".into(), 16).await;
        conn.outbound.close();
        cleaner.sweep().await;
        assert!(registry.connection(conn.connection_id).is_none());
    }

    #[tokio::test]
    async fn sweep_replays_dlq_and_drains_it_on_success() {
        let (cleaner, _registry, dlq) = cleaner(Arc::new(StubBroker::new(false)));
        dlq.enqueue(dlq_record("chat.say.arkham.001")).await;
        cleaner.sweep().await;
        assert_eq!(dlq.size().await, 0);
    }

    #[tokio::test]
    async fn sweep_re_enqueues_dlq_record_on_publish_failure() {
        let (cleaner, _registry, dlq) = cleaner(Arc::new(StubBroker::new(true)));
        dlq.enqueue(dlq_record("chat.say.arkham.001")).await;
        cleaner.sweep().await;
        assert_eq!(dlq.size().await, 1);
    }
}
