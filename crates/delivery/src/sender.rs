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

//! Personal Sender (spec §4.9, C9): deliver one event to one player.
//! Mirrors the serialize-then-send shape of `WebSocketConnection::emit_event`
//! in the teacher's web-host, generalized to enqueue onto the connection's
//! own bounded outbound queue rather than writing a websocket frame
//! directly — the per-connection writer task (owned by the gateway) drains
//! that queue to the real transport.

use std::sync::Arc;
use std::time::Duration;

use mudcore_common::event::DomainEvent;
use mudcore_common::ids::PlayerId;
use mudcore_presence::ConnectionRegistry;

use crate::translator::translate;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeliveryOutcome {
    Delivered,
    Dropped,
    PlayerOffline,
    Errored,
}

#[derive(Debug)]
pub struct DeliveryResult {
    pub outcome: DeliveryOutcome,
}

/// Block-with-timeout budget for critical events on a full queue (spec
/// §4.9); chosen generously since the alternative is losing an
/// hp/combat frame.
const CRITICAL_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

pub struct PersonalSender {
    registry: Arc<ConnectionRegistry>,
}

impl PersonalSender {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Delivers `event` to every live connection of `player_id`. If the
    /// player is offline, the event is dropped and reported as such.
    pub async fn send(&self, player_id: &PlayerId, event: &DomainEvent) -> DeliveryResult {
        let connection_ids = self.registry.lookup_by_player(player_id).await;
        if connection_ids.is_empty() {
            return DeliveryResult { outcome: DeliveryOutcome::PlayerOffline };
        }

        let mut any_delivered = false;
        let mut any_dropped = false;
        for connection_id in connection_ids {
            let Some(record) = self.registry.connection(connection_id) else { continue };
            let viewer_seq = record.next_sequence();
            let Some(frame) = translate(event, player_id, viewer_seq) else { continue };
            let Ok(bytes) = frame.try_serialize() else {
                any_dropped = true;
                continue;
            };

            let critical = event.kind.is_critical();
            let timeout = if critical { CRITICAL_ENQUEUE_TIMEOUT } else { Duration::ZERO };
            match record.outbound.enqueue(bytes, critical, timeout).await {
                Ok(()) => any_delivered = true,
                Err(_) => {
                    any_dropped = true;
                    if critical {
                        tracing::warn!(?connection_id, "critical frame timed out, detaching");
                        let _ = self.registry.detach(connection_id).await;
                    }
                }
            }
        }

        let outcome = if any_delivered {
            DeliveryOutcome::Delivered
        } else if any_dropped {
            DeliveryOutcome::Dropped
        } else {
            DeliveryOutcome::Errored
        };
        DeliveryResult { outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudcore_common::event::DomainEventKind;
    use mudcore_common::ids::{RoomId, SequenceNumber};
    use mudcore_eventbus::EventBus;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn offline_player_reports_offline() {
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(EventBus::new()),
            StdDuration::from_secs(30),
        ));
        let sender = PersonalSender::new(Arc::clone(&registry));
        let event = DomainEvent::new(SequenceNumber::ZERO, DomainEventKind::Heartbeat);
        let result = sender.send(&PlayerId::new("ghost"), &event).await;
        assert_eq!(result.outcome, DeliveryOutcome::PlayerOffline);
    }

    #[tokio::test]
    async fn online_player_receives_frame() {
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(EventBus::new()),
            StdDuration::from_secs(30),
        ));
        registry
            .attach(PlayerId::new("alice"), "Alice".into(), RoomId::new("arkham.001"), "tok".into(), 16)
            .await;
        let sender = PersonalSender::new(Arc::clone(&registry));
        let event = DomainEvent::new(SequenceNumber::ZERO, DomainEventKind::Heartbeat);
        let result = sender.send(&PlayerId::new("alice"), &event).await;
        assert_eq!(result.outcome, DeliveryOutcome::Delivered);
    }
}
