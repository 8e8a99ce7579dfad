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

//! Wire-visible frame shapes (spec §6). `WireFrame` is the server → client
//! shape; `CommandFrame` is client → server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PlayerId, RoomId, SequenceNumber};

/// Maximum serialized frame size pushed to a client.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Maximum serialized command frame accepted from a client.
pub const MAX_COMMAND_BYTES: usize = 10 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireFrame {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub sequence_number: SequenceNumber,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    pub data: serde_json::Value,
}

impl WireFrame {
    /// Serializes and checks the 64 KiB limit from spec §6. Returns the
    /// serialized bytes, or `None` if over budget (caller decides whether
    /// to truncate or drop per event-type policy, spec §4.14).
    pub fn try_serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn fits_budget(bytes: &[u8]) -> bool {
        bytes.len() <= MAX_FRAME_BYTES
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandFrame {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl CommandFrame {
    pub fn fits_budget(bytes: &[u8]) -> bool {
        bytes.len() <= MAX_COMMAND_BYTES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequenceNumber;

    #[test]
    fn frame_at_budget_is_accepted() {
        let padding = "x".repeat(MAX_FRAME_BYTES - 200);
        let frame = WireFrame {
            event_type: "system_notice".into(),
            timestamp: Utc::now(),
            sequence_number: SequenceNumber::ZERO,
            player_id: None,
            room_id: None,
            data: serde_json::json!({ "message": padding }),
        };
        let bytes = frame.try_serialize().unwrap();
        assert!(bytes.len() <= MAX_FRAME_BYTES);
    }
}
