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

//! Event → Wire Translator (spec §4.14, C14): pure function from a domain
//! event plus a viewer to a wire frame, or `None` to drop.

use mudcore_common::event::{DomainEvent, DomainEventKind};
use mudcore_common::ids::{PlayerId, SequenceNumber};
use mudcore_common::wire::{WireFrame, MAX_FRAME_BYTES};

/// `None` means the delivery path should skip this viewer for this event
/// (spec: "used for events with no viewer-relevant content").
pub fn translate(event: &DomainEvent, viewer: &PlayerId, viewer_seq: SequenceNumber) -> Option<WireFrame> {
    let data = match &event.kind {
        DomainEventKind::CombatEvent { payload, .. } => strip_hidden_rolls(payload, viewer),
        DomainEventKind::PlayerEntered { player_id, room_id } => {
            serde_json::json!({ "player_id": player_id, "room_id": room_id })
        }
        DomainEventKind::PlayerLeft { player_id, room_id } => {
            serde_json::json!({ "player_id": player_id, "room_id": room_id })
        }
        DomainEventKind::RoomUpdated { room_id } => serde_json::json!({ "room_id": room_id }),
        DomainEventKind::ChatMessage { sender, channel, body, .. } => {
            serde_json::json!({ "sender": sender, "channel": channel, "body": body })
        }
        DomainEventKind::Whisper { sender, target, body } => {
            if target != viewer && sender != viewer {
                return None;
            }
            serde_json::json!({ "sender": sender, "target": target, "body": body })
        }
        DomainEventKind::NpcEvent { payload, .. } => payload.clone(),
        DomainEventKind::PlayerHpUpdated { player_id, hp, max_hp } => {
            serde_json::json!({ "player_id": player_id, "hp": hp, "max_hp": max_hp })
        }
        DomainEventKind::GameTick { tick } => serde_json::json!({ "tick": tick }),
        DomainEventKind::Heartbeat => serde_json::json!({}),
        DomainEventKind::Error { kind, message } => {
            serde_json::json!({ "kind": kind, "message": message })
        }
        DomainEventKind::SystemNotice { message } => serde_json::json!({ "message": message }),
    };

    let mut frame = WireFrame {
        event_type: event.kind.tag().to_string(),
        timestamp: event.timestamp,
        sequence_number: viewer_seq,
        player_id: event.player_id.clone(),
        room_id: event.room_id.clone(),
        data,
    };

    if let Ok(bytes) = frame.try_serialize() {
        if bytes.len() > MAX_FRAME_BYTES {
            frame.data = serde_json::json!({ "truncated": true });
        }
    }
    Some(frame)
}

/// Combat rolls are hidden from everyone except the payload's own
/// `visible_to` allowlist, if present (spec §4.14 "Strip fields the viewer
/// must not see").
fn strip_hidden_rolls(payload: &serde_json::Value, viewer: &PlayerId) -> serde_json::Value {
    let mut payload = payload.clone();
    if let Some(obj) = payload.as_object_mut() {
        let visible = obj
            .get("visible_to")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().any(|v| v.as_str() == Some(viewer.as_str())))
            .unwrap_or(true);
        if !visible {
            obj.remove("hidden_roll");
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudcore_common::ids::RoomId;

    #[test]
    fn whisper_is_dropped_for_third_party_viewer() {
        let event = DomainEvent::new(
            SequenceNumber::ZERO,
            DomainEventKind::Whisper {
                sender: PlayerId::new("alice"),
                target: PlayerId::new("bob"),
                body: "hi".into(),
            },
        );
        let frame = translate(&event, &PlayerId::new("carol"), SequenceNumber::ZERO);
        assert!(frame.is_none());
    }

    #[test]
    fn whisper_reaches_sender_and_target() {
        let event = DomainEvent::new(
            SequenceNumber::ZERO,
            DomainEventKind::Whisper {
                sender: PlayerId::new("alice"),
                target: PlayerId::new("bob"),
                body: "hi".into(),
            },
        );
        assert!(translate(&event, &PlayerId::new("alice"), SequenceNumber::ZERO).is_some());
        assert!(translate(&event, &PlayerId::new("bob"), SequenceNumber::ZERO).is_some());
    }

    #[test]
    fn room_updated_carries_room_id() {
        let event = DomainEvent::new(
            SequenceNumber::ZERO,
            DomainEventKind::RoomUpdated { room_id: RoomId::new("arkham.001") },
        );
        let frame = translate(&event, &PlayerId::new("alice"), SequenceNumber::ZERO).unwrap();
        assert_eq!(frame.event_type, "room_updated");
    }
}
