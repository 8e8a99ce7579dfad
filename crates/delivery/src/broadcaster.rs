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

//! Broadcaster (spec §4.10, C10): room- and global-scoped fan-out with
//! exclusions, bounded concurrency, and per-recipient order preservation.

use std::sync::Arc;

use mudcore_common::event::DomainEvent;
use mudcore_common::ids::{PlayerId, RoomId};
use mudcore_presence::ConnectionRegistry;
use tokio::sync::Semaphore;

use crate::sender::{DeliveryOutcome, PersonalSender};

#[derive(Debug, Default, Clone, Copy)]
pub struct BroadcastStats {
    pub attempted: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub errored: usize,
}

pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    sender: Arc<PersonalSender>,
    fanout_concurrency: usize,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, sender: Arc<PersonalSender>, fanout_concurrency: usize) -> Self {
        Self { registry, sender, fanout_concurrency }
    }

    pub async fn broadcast_to_room(
        &self,
        room_id: &RoomId,
        event: &DomainEvent,
        exclude: Option<&PlayerId>,
    ) -> BroadcastStats {
        let recipients = self.registry.room_occupants(room_id);
        self.fan_out(recipients, event, exclude).await
    }

    pub async fn broadcast_global(&self, event: &DomainEvent, exclude: Option<&PlayerId>) -> BroadcastStats {
        let recipients = self.registry.iter_online().await;
        self.fan_out(recipients, event, exclude).await
    }

    /// Concurrent fan-out bounded by `fanout_concurrency` (spec §4.10); one
    /// recipient's exception does not abort the others. Events to the same
    /// recipient from this call preserve order because each recipient is
    /// handled by exactly one task issuing one `send` call.
    async fn fan_out(
        &self,
        recipients: Vec<PlayerId>,
        event: &DomainEvent,
        exclude: Option<&PlayerId>,
    ) -> BroadcastStats {
        let semaphore = Arc::new(Semaphore::new(self.fanout_concurrency));
        let mut tasks = Vec::new();
        let mut attempted = 0usize;

        for player_id in recipients {
            if Some(&player_id) == exclude {
                continue;
            }
            attempted += 1;
            let semaphore = Arc::clone(&semaphore);
            let sender = Arc::clone(&self.sender);
            let event = event.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                sender.send(&player_id, &event).await.outcome
            }));
        }

        let mut stats = BroadcastStats { attempted, ..Default::default() };
        for task in tasks {
            match task.await {
                Ok(DeliveryOutcome::Delivered) => stats.delivered += 1,
                Ok(DeliveryOutcome::Dropped) | Ok(DeliveryOutcome::PlayerOffline) => stats.dropped += 1,
                Ok(DeliveryOutcome::Errored) | Err(_) => stats.errored += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudcore_common::event::DomainEventKind;
    use mudcore_common::ids::SequenceNumber;
    use mudcore_eventbus::EventBus;
    use std::time::Duration;

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(EventBus::new()), Duration::from_secs(30)));
        let room = RoomId::new("arkham.001");
        registry.attach(PlayerId::new("alice"), "Alice".into(), room.clone(), "tok".into(), 16).await;
        registry.attach(PlayerId::new("bob"), "Bob".into(), room.clone(), "tok".into(), 16).await;

        let sender = Arc::new(PersonalSender::new(Arc::clone(&registry)));
        let broadcaster = Broadcaster::new(Arc::clone(&registry), sender, 64);

        let event = DomainEvent::new(SequenceNumber::ZERO, DomainEventKind::Heartbeat);
        let stats = broadcaster
            .broadcast_to_room(&room, &event, Some(&PlayerId::new("alice")))
            .await;
        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.delivered, 1);
    }
}
