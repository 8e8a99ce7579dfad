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

//! Chat Router (spec §4.13, C13): the integration point for all
//! player-authored messages.

use std::sync::Arc;

use mudcore_common::error::ChatError;
use mudcore_common::event::{DomainEvent, DomainEventKind};
use mudcore_common::ids::{ChannelId, PlayerId, SequenceNumber, SubzoneId};
use mudcore_broker::BrokerClient;
use mudcore_eventbus::EventBus;
use mudcore_presence::ConnectionRegistry;
use mudcore_subjects::{SubjectRegistry, KIND_CHAT_GLOBAL, KIND_CHAT_SAY, KIND_CHAT_SYSTEM, KIND_CHAT_WHISPER};

use crate::rate_limiter::{RateLimitDecision, RateLimiter};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelScope {
    Room,
    Subzone,
    Global,
    Whisper,
    System,
}

/// `{channel_id, scope, access_policy, rate_limit, log_stream}` (spec §3).
/// `self_echo` resolves Open Question 3 from spec §9 (see SPEC_FULL.md).
#[derive(Clone, Debug)]
pub struct ChannelDescriptor {
    pub channel_id: ChannelId,
    pub scope: ChannelScope,
    pub max_length: usize,
    pub admin_only: bool,
    pub self_echo: bool,
}

impl ChannelDescriptor {
    pub fn room(channel_id: impl Into<ChannelId>) -> Self {
        Self { channel_id: channel_id.into(), scope: ChannelScope::Room, max_length: 1000, admin_only: false, self_echo: false }
    }

    pub fn subzone(channel_id: impl Into<ChannelId>) -> Self {
        Self { channel_id: channel_id.into(), scope: ChannelScope::Subzone, max_length: 1000, admin_only: false, self_echo: true }
    }

    pub fn global(channel_id: impl Into<ChannelId>) -> Self {
        Self { channel_id: channel_id.into(), scope: ChannelScope::Global, max_length: 1000, admin_only: false, self_echo: true }
    }

    pub fn whisper(channel_id: impl Into<ChannelId>) -> Self {
        Self { channel_id: channel_id.into(), scope: ChannelScope::Whisper, max_length: 1000, admin_only: false, self_echo: true }
    }

    pub fn system(channel_id: impl Into<ChannelId>) -> Self {
        Self { channel_id: channel_id.into(), scope: ChannelScope::System, max_length: 2000, admin_only: true, self_echo: true }
    }
}

pub struct ChatMessage {
    pub sender: PlayerId,
    pub channel: ChannelDescriptor,
    pub body: String,
    pub whisper_target_name: Option<String>,
}

pub enum RouteOutcome {
    Routed { recipients: usize },
    RateLimited { retry_after_ms: u64 },
    TargetNotFound,
    AccessDenied,
}

pub struct ChatRouter {
    registry: Arc<ConnectionRegistry>,
    bus: Arc<EventBus>,
    broker: Arc<dyn BrokerClient>,
    subjects: Arc<SubjectRegistry>,
    rate_limiter: Arc<RateLimiter>,
    seq: std::sync::atomic::AtomicU64,
}

impl ChatRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        bus: Arc<EventBus>,
        broker: Arc<dyn BrokerClient>,
        subjects: Arc<SubjectRegistry>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self { registry, bus, broker, subjects, rate_limiter, seq: std::sync::atomic::AtomicU64::new(0) }
    }

    fn next_seq(&self) -> SequenceNumber {
        SequenceNumber(self.seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1)
    }

    pub async fn route(&self, msg: ChatMessage, is_admin: bool) -> Result<RouteOutcome, ChatError> {
        let trimmed = msg.body.trim();
        if trimmed.is_empty() {
            return Err(ChatError::BodyEmpty);
        }
        if trimmed.len() > msg.channel.max_length {
            return Err(ChatError::BodyTooLong { len: trimmed.len(), max: msg.channel.max_length });
        }
        if msg.channel.admin_only && !is_admin {
            return Ok(RouteOutcome::AccessDenied);
        }

        match self.rate_limiter.check(&msg.sender, &msg.channel.channel_id).await {
            RateLimitDecision::Deny { retry_after } => {
                return Ok(RouteOutcome::RateLimited { retry_after_ms: retry_after.as_millis() as u64 });
            }
            RateLimitDecision::Allow => {}
        }

        let (subject, room_id, recipients_hint) = match msg.channel.scope {
            ChannelScope::Room => {
                let Some(room_id) = self.registry.current_room(&msg.sender).await else {
                    return Ok(RouteOutcome::AccessDenied);
                };
                let subject = self
                    .subjects
                    .build(KIND_CHAT_SAY, &[("room_id", room_id.as_str())])
                    .map_err(ChatError::from)?;
                (subject, Some(room_id.clone()), self.registry.room_occupants(&room_id).len())
            }
            ChannelScope::Subzone => {
                let subzone = self
                    .registry
                    .current_subzone(&msg.sender)
                    .await
                    .unwrap_or_else(|| SubzoneId::new("default"));
                let subject = self
                    .subjects
                    .build(mudcore_subjects::KIND_CHAT_LOCAL, &[("subzone_id", subzone.as_str())])
                    .map_err(ChatError::from)?;
                (subject, None, 0)
            }
            ChannelScope::Global => {
                let subject = self.subjects.build(KIND_CHAT_GLOBAL, &[]).map_err(ChatError::from)?;
                (subject, None, self.registry.iter_online().await.len())
            }
            ChannelScope::System => {
                let subject = self.subjects.build(KIND_CHAT_SYSTEM, &[]).map_err(ChatError::from)?;
                (subject, None, self.registry.iter_online().await.len())
            }
            ChannelScope::Whisper => {
                let name = msg.whisper_target_name.clone().unwrap_or_default();
                let Some(target) = self.registry.find_online_by_display_name(&name).await else {
                    return Ok(RouteOutcome::TargetNotFound);
                };
                let subject = self
                    .subjects
                    .build(KIND_CHAT_WHISPER, &[("player_id", target.as_str())])
                    .map_err(ChatError::from)?;
                let kind = DomainEventKind::Whisper { sender: msg.sender.clone(), target, body: trimmed.to_string() };
                let event = DomainEvent::new(self.next_seq(), kind);
                self.broker.publish(&subject, serde_json::to_vec(&event).unwrap_or_default()).await?;
                self.bus.publish(event).await;
                return Ok(RouteOutcome::Routed { recipients: 1 });
            }
        };

        let kind = DomainEventKind::ChatMessage {
            sender: msg.sender.clone(),
            channel: msg.channel.channel_id.clone(),
            body: trimmed.to_string(),
            room_id: room_id.clone(),
        };
        let event = DomainEvent::new(self.next_seq(), kind);

        self.broker
            .publish(&subject, serde_json::to_vec(&event).unwrap_or_default())
            .await?;
        self.bus.publish(event).await;

        Ok(RouteOutcome::Routed { recipients: recipients_hint })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use mudcore_broker::{BrokerClientState, BrokerHandle, Handler};
    use mudcore_common::error::BrokerError;
    use mudcore_common::ids::RoomId;
    use mudcore_subjects::SubjectRegistry;

    use crate::rate_limiter::RateLimitConfig;

    struct RecordingBroker {
        published: tokio::sync::Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl RecordingBroker {
        fn new() -> Self {
            Self { published: tokio::sync::Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl BrokerClient for RecordingBroker {
        async fn connect(&self) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn publish(&self, subject: &str, bytes: Vec<u8>) -> Result<(), BrokerError> {
            self.published.lock().await.push((subject.to_string(), bytes));
            Ok(())
        }
        async fn subscribe(&self, _subject: &str, _handler: Handler) -> Result<BrokerHandle, BrokerError> {
            unimplemented!("not exercised by router tests")
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

    fn router(broker: Arc<RecordingBroker>) -> (ChatRouter, Arc<ConnectionRegistry>) {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&bus), Duration::from_secs(60)));
        let subjects = Arc::new(SubjectRegistry::new());
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(10),
            max_events: 20,
            burst: 0,
        }));
        let chat_router = ChatRouter::new(Arc::clone(&registry), bus, broker, subjects, rate_limiter);
        (chat_router, registry)
    }

    #[tokio::test]
    async fn room_message_publishes_to_the_senders_room_subject() {
        let broker = Arc::new(RecordingBroker::new());
        let (chat_router, registry) = router(Arc::clone(&broker));
        let room = RoomId::new("arkham.001");
        registry.attach(PlayerId::new("alice"), "Alice".into(), room.clone(), "tok".into(), 16).await;

        let outcome = chat_router
            .route(
                ChatMessage {
                    sender: PlayerId::new("alice"),
                    channel: ChannelDescriptor::room(ChannelId::new("say")),
                    body: "hello".into(),
                    whisper_target_name: None,
                },
                false,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, RouteOutcome::Routed { .. }));
        let published = broker.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "chat.say.arkham.001");
    }

    #[tokio::test]
    async fn empty_body_is_rejected_before_touching_the_broker() {
        let broker = Arc::new(RecordingBroker::new());
        let (chat_router, _registry) = router(Arc::clone(&broker));

        let result = chat_router
            .route(
                ChatMessage {
                    sender: PlayerId::new("alice"),
                    channel: ChannelDescriptor::global(ChannelId::new("global")),
                    body: "   ".into(),
                    whisper_target_name: None,
                },
                false,
            )
            .await;

        assert!(matches!(result, Err(ChatError::BodyEmpty)));
        assert!(broker.published.lock().await.is_empty());
    }

    #[tokio::test]
    async fn whisper_to_unknown_name_reports_target_not_found() {
        let broker = Arc::new(RecordingBroker::new());
        let (chat_router, _registry) = router(Arc::clone(&broker));

        let outcome = chat_router
            .route(
                ChatMessage {
                    sender: PlayerId::new("alice"),
                    channel: ChannelDescriptor::whisper(ChannelId::new("whisper")),
                    body: "psst".into(),
                    whisper_target_name: Some("nobody".into()),
                },
                false,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, RouteOutcome::TargetNotFound));
    }

    #[tokio::test]
    async fn system_channel_denies_non_admin_senders() {
        let broker = Arc::new(RecordingBroker::new());
        let (chat_router, _registry) = router(Arc::clone(&broker));

        let outcome = chat_router
            .route(
                ChatMessage {
                    sender: PlayerId::new("alice"),
                    channel: ChannelDescriptor::system(ChannelId::new("system")),
                    body: "hi".into(),
                    whisper_target_name: None,
                },
                false,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, RouteOutcome::AccessDenied));
    }
}
