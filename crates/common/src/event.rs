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

//! Domain events as a closed tagged variant (spec §9: "replacing dynamic
//! message dict payloads" — a closed variant per event type with typed
//! fields, translated to the wire JSON shape at the boundary by
//! `mudcore-delivery`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, PlayerId, RoomId, SequenceNumber};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum DomainEventKind {
    PlayerEntered { player_id: PlayerId, room_id: RoomId },
    PlayerLeft { player_id: PlayerId, room_id: Option<RoomId> },
    RoomUpdated { room_id: RoomId },
    ChatMessage {
        sender: PlayerId,
        channel: ChannelId,
        body: String,
        room_id: Option<RoomId>,
    },
    Whisper { sender: PlayerId, target: PlayerId, body: String },
    CombatEvent { room_id: RoomId, payload: serde_json::Value },
    NpcEvent { room_id: RoomId, payload: serde_json::Value },
    PlayerHpUpdated { player_id: PlayerId, hp: i64, max_hp: i64 },
    GameTick { tick: u64 },
    Heartbeat,
    Error { kind: String, message: String },
    SystemNotice { message: String },
}

impl DomainEventKind {
    /// Classification used by the outbound-queue backpressure policy
    /// (spec §4.9 / §9 Open Question 2): critical events block-with-timeout
    /// on a full queue, non-critical events drop-oldest.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            DomainEventKind::PlayerHpUpdated { .. } | DomainEventKind::CombatEvent { .. }
        )
    }

    pub fn tag(&self) -> &'static str {
        match self {
            DomainEventKind::PlayerEntered { .. } => "player_entered",
            DomainEventKind::PlayerLeft { .. } => "player_left",
            DomainEventKind::RoomUpdated { .. } => "room_updated",
            DomainEventKind::ChatMessage { .. } => "chat_message",
            DomainEventKind::Whisper { .. } => "whisper",
            DomainEventKind::CombatEvent { .. } => "combat_event",
            DomainEventKind::NpcEvent { .. } => "npc_event",
            DomainEventKind::PlayerHpUpdated { .. } => "player_hp_updated",
            DomainEventKind::GameTick { .. } => "game_tick",
            DomainEventKind::Heartbeat => "heartbeat",
            DomainEventKind::Error { .. } => "error",
            DomainEventKind::SystemNotice { .. } => "system_notice",
        }
    }
}

/// Immutable once published (spec §3: "Domain events are owned by their
/// publisher until handed to the Event Bus, then shared immutably").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainEvent {
    pub sequence_number: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub player_id: Option<PlayerId>,
    pub room_id: Option<RoomId>,
    pub kind: DomainEventKind,
}

impl DomainEvent {
    pub fn new(sequence_number: SequenceNumber, kind: DomainEventKind) -> Self {
        let (player_id, room_id) = Self::derive_scope(&kind);
        Self {
            sequence_number,
            timestamp: Utc::now(),
            player_id,
            room_id,
            kind,
        }
    }

    fn derive_scope(kind: &DomainEventKind) -> (Option<PlayerId>, Option<RoomId>) {
        match kind {
            DomainEventKind::PlayerEntered { player_id, room_id } => {
                (Some(player_id.clone()), Some(room_id.clone()))
            }
            DomainEventKind::PlayerLeft { player_id, room_id } => {
                (Some(player_id.clone()), room_id.clone())
            }
            DomainEventKind::RoomUpdated { room_id } => (None, Some(room_id.clone())),
            DomainEventKind::ChatMessage { sender, room_id, .. } => {
                (Some(sender.clone()), room_id.clone())
            }
            DomainEventKind::Whisper { sender, .. } => (Some(sender.clone()), None),
            DomainEventKind::CombatEvent { room_id, .. } => (None, Some(room_id.clone())),
            DomainEventKind::NpcEvent { room_id, .. } => (None, Some(room_id.clone())),
            DomainEventKind::PlayerHpUpdated { player_id, .. } => {
                (Some(player_id.clone()), None)
            }
            _ => (None, None),
        }
    }
}
