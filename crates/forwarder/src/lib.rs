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

//! Broker → Wire Forwarder (spec §4.15, C15): the receiving half of the
//! chat/combat fan-out, mirroring the outgoing half built in
//! `mudcore-chat`'s router. Subscribes to the subjects relevant to this
//! node, decodes and validates frames, resolves local recipients, applies
//! mutes, and hands off to the Personal Sender (C9).

pub mod inbound;
pub mod subject_scope;

use std::sync::Arc;

use mudcore_broker::{BrokerClient, DeadLetterQueue, DeadLetterRecord};
use mudcore_chat::MuteStore;
use mudcore_common::event::DomainEvent;
use mudcore_common::ids::ChannelId;
use mudcore_delivery::PersonalSender;
use mudcore_presence::ConnectionRegistry;
use tokio_util::sync::CancellationToken;

use inbound::InboundBuffer;
use mudcore_subjects::wildcard_matches;
use subject_scope::{classify, is_critical_subject, zmq_prefix, RecipientScope};

const DEFAULT_INBOUND_CAPACITY: usize = 256;

pub struct ForwarderConfig {
    pub subjects: Vec<String>,
    pub inbound_capacity: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            subjects: vec!["chat.say.>".into(), "chat.global".into(), "chat.system".into(), "combat.>".into()],
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }
}

pub struct Forwarder {
    registry: Arc<ConnectionRegistry>,
    mute_store: Arc<MuteStore>,
    sender: Arc<PersonalSender>,
    broker: Arc<dyn BrokerClient>,
    dlq: Arc<DeadLetterQueue>,
    config: ForwarderConfig,
}

impl Forwarder {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        mute_store: Arc<MuteStore>,
        sender: Arc<PersonalSender>,
        broker: Arc<dyn BrokerClient>,
        dlq: Arc<DeadLetterQueue>,
        config: ForwarderConfig,
    ) -> Self {
        Self { registry, mute_store, sender, broker, dlq, config }
    }

    /// Subscribes to every configured subject, spawning one inbound worker
    /// per subscription. Runs until `cancel` fires.
    ///
    /// Real ZeroMQ SUB filtering is pure byte-prefix matching (it has no
    /// `*`/`>` wildcard syntax of its own), so each pattern in
    /// `self.config.subjects` is translated to its literal byte prefix via
    /// `subject_scope::zmq_prefix` before being handed to the broker, and
    /// `wildcard_matches` is then applied in the handler against the
    /// concrete topic of every frame the broker actually delivers — the
    /// prefix alone is a superset match (e.g. `"chat.global"` is a byte
    /// prefix of `"chat.globalfoo"` too), so the second check is required.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut handles = Vec::new();
        for subject in &self.config.subjects {
            let buffer = Arc::new(InboundBuffer::new(self.config.inbound_capacity));
            let buffer_for_handler = Arc::clone(&buffer);
            let critical = is_critical_subject(subject);
            let pattern = subject.clone();
            let handler: mudcore_broker::Handler = Box::new(move |topic, bytes| {
                if !wildcard_matches(&pattern, topic) {
                    return;
                }
                let topic = topic.to_string();
                let bytes = bytes.to_vec();
                if critical {
                    buffer_for_handler.push_critical(topic, bytes);
                } else {
                    buffer_for_handler.push(topic, bytes);
                }
            });

            let prefix = zmq_prefix(subject);
            match self.broker.subscribe(&prefix, handler).await {
                Ok(sub_handle) => {
                    let worker = self.spawn_worker(Arc::clone(&buffer), cancel.clone());
                    handles.push((sub_handle, worker));
                }
                Err(e) => {
                    tracing::error!(subject = %subject, prefix = %prefix, error = %e, "failed to subscribe, forwarder will not receive this subject");
                }
            }
        }

        cancel.cancelled().await;
        for (sub_handle, worker) in handles {
            sub_handle.unsubscribe();
            worker.abort();
        }
    }

    fn spawn_worker(&self, buffer: Arc<InboundBuffer>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let mute_store = Arc::clone(&self.mute_store);
        let sender = Arc::clone(&self.sender);
        let dlq = Arc::clone(&self.dlq);
        tokio::spawn(async move {
            loop {
                let (topic, bytes) = tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = buffer.pop() => frame,
                };
                process_frame(&topic, bytes, &registry, &mute_store, &sender, &dlq).await;
            }
        })
    }
}

async fn process_frame(
    subject: &str,
    bytes: Vec<u8>,
    registry: &Arc<ConnectionRegistry>,
    mute_store: &Arc<MuteStore>,
    sender: &Arc<PersonalSender>,
    dlq: &Arc<DeadLetterQueue>,
) {
    let event: DomainEvent = match serde_json::from_slice(&bytes) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(subject = %subject, error = %e, "malformed frame, routing to dead-letter queue");
            dlq.enqueue(DeadLetterRecord {
                original_subject: subject.to_string(),
                payload: bytes,
                first_attempt_at: chrono::Utc::now(),
                last_error: e.to_string(),
                attempt_count: 1,
            })
            .await;
            return;
        }
    };

    let Some(scope) = classify(subject) else {
        tracing::warn!(subject = %subject, "no recipient rule for subject, dropping");
        return;
    };

    let recipients = match scope {
        RecipientScope::Room(room_id) => registry.room_occupants(&room_id),
        RecipientScope::Subzone(subzone_id) => registry.subzone_occupants(&subzone_id).await,
        RecipientScope::Global | RecipientScope::System => registry.iter_online().await,
        RecipientScope::Whisper(target) => {
            if registry.lookup_by_player(&target).await.is_empty() {
                Vec::new()
            } else {
                vec![target]
            }
        }
    };

    if recipients.is_empty() {
        return;
    }

    mute_store.load_batch(&recipients).await;
    let channel_id = event_channel(&event);
    for recipient in recipients {
        if let Some(channel_id) = &channel_id {
            if mute_store.channel_muted(&recipient, channel_id).await {
                continue;
            }
        }
        if let Some(sender_player) = event.player_id.as_ref() {
            if mute_store.is_muted(&recipient, sender_player).await {
                continue;
            }
        }
        sender.send(&recipient, &event).await;
    }
}

fn event_channel(event: &DomainEvent) -> Option<ChannelId> {
    match &event.kind {
        mudcore_common::event::DomainEventKind::ChatMessage { channel, .. } => Some(channel.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use mudcore_common::event::DomainEventKind;
    use mudcore_common::ids::{PlayerId, RoomId, SequenceNumber};
    use mudcore_common::ports::fake::FakePersistence;
    use mudcore_common::ports::MuteEntry;
    use mudcore_eventbus::EventBus;

    fn fixtures() -> (Arc<ConnectionRegistry>, Arc<FakePersistence>, Arc<MuteStore>, Arc<PersonalSender>, Arc<DeadLetterQueue>) {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ConnectionRegistry::new(bus, Duration::from_secs(60)));
        let persistence = Arc::new(FakePersistence::default());
        let mute_store = Arc::new(MuteStore::new(Arc::clone(&persistence) as _, Duration::from_secs(60)));
        let sender = Arc::new(PersonalSender::new(Arc::clone(&registry)));
        let dlq = Arc::new(DeadLetterQueue::new(None));
        (registry, persistence, mute_store, sender, dlq)
    }

    fn room_chat_event(room: &RoomId) -> DomainEvent {
        DomainEvent::new(
            SequenceNumber(1),
            DomainEventKind::ChatMessage {
                sender: PlayerId::new("alice"),
                channel: ChannelId::new("say"),
                body: "hi".into(),
                room_id: Some(room.clone()),
            },
        )
    }

    #[tokio::test]
    async fn malformed_frame_goes_to_the_dead_letter_queue() {
        let (registry, _persistence, mute_store, sender, dlq) = fixtures();
        process_frame("chat.say.arkham.001", b"not json".to_vec(), &registry, &mute_store, &sender, &dlq).await;
        assert_eq!(dlq.size().await, 1);
    }

    #[tokio::test]
    async fn room_frame_is_delivered_to_local_occupant() {
        let (registry, _persistence, mute_store, sender, dlq) = fixtures();
        let room = RoomId::new("arkham.001");
        registry.attach(PlayerId::new("bob"), "Bob".into(), room.clone(), "tok".into(), 16).await;

        let bytes = serde_json::to_vec(&room_chat_event(&room)).unwrap();
        process_frame("chat.say.arkham.001", bytes, &registry, &mute_store, &sender, &dlq).await;

        let bob_conn = registry.connection(registry.lookup_by_player(&PlayerId::new("bob")).await[0]).unwrap();
        assert_eq!(bob_conn.outbound.len().await, 1);
    }

    #[tokio::test]
    async fn muted_sender_is_skipped_on_delivery() {
        let (registry, persistence, mute_store, sender, dlq) = fixtures();
        let room = RoomId::new("arkham.001");
        registry.attach(PlayerId::new("bob"), "Bob".into(), room.clone(), "tok".into(), 16).await;
        persistence.mutes.lock().unwrap().insert(
            PlayerId::new("bob"),
            vec![MuteEntry { muted_player_id: Some(PlayerId::new("alice")), muted_channel_id: None, expires_at: None }],
        );

        let bytes = serde_json::to_vec(&room_chat_event(&room)).unwrap();
        process_frame("chat.say.arkham.001", bytes, &registry, &mute_store, &sender, &dlq).await;

        let bob_conn = registry.connection(registry.lookup_by_player(&PlayerId::new("bob")).await[0]).unwrap();
        assert_eq!(bob_conn.outbound.len().await, 0);
    }
}
