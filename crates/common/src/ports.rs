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

//! Narrow interfaces the core depends on instead of a full persistence/auth
//! manager (spec §9: "replacing cyclic references" — `PresenceReader`,
//! `MessageEmitter`-style seams). Concrete implementations live outside this
//! workspace; `mudcore-common::ports::fake` ships in-memory test doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AuthError;
use crate::ids::{PlayerId, RoomId};

#[derive(Clone, Debug)]
pub struct PlayerRecord {
    pub player_id: PlayerId,
    pub display_name: String,
}

#[derive(Clone, Debug)]
pub struct RoomRecord {
    pub room_id: RoomId,
    pub subzone_id: Option<crate::ids::SubzoneId>,
}

#[derive(Clone, Debug)]
pub struct TokenClaims {
    pub player_id: PlayerId,
    pub expires_at: DateTime<Utc>,
    /// Whether this token carries the admin role, the only authorization
    /// check this core performs (spec §4.13 "system channel is admin-only").
    pub is_admin: bool,
}

/// Read-only access to the persistence layer (spec §6 "Consumed external
/// interfaces"). All methods are async so a real implementation can hit a
/// database without ever blocking a scheduler task (spec §5 "no blocking in
/// scheduler tasks").
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn get_player(&self, id: &PlayerId) -> Option<PlayerRecord>;
    async fn get_room(&self, id: &RoomId) -> Option<RoomRecord>;
    async fn list_players_by_room(&self, id: &RoomId) -> Vec<PlayerId>;
    async fn get_player_mutes(&self, id: &PlayerId) -> Vec<MuteEntry>;
}

#[derive(Clone, Debug)]
pub struct MuteEntry {
    pub muted_player_id: Option<PlayerId>,
    pub muted_channel_id: Option<crate::ids::ChannelId>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Token validation interface (spec §6). A concrete implementation is out of
/// scope; this core only consumes it.
#[async_trait]
pub trait Auth: Send + Sync {
    async fn validate_token(&self, token: &str) -> Result<TokenClaims, AuthError>;
}

pub mod fake {
    //! In-memory doubles. Exercised by this workspace's own tests, and also
    //! the only `Persistence`/`Auth` wiring the gateway binary has available
    //! since concrete implementations live outside this workspace (spec §6).
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;

    #[derive(Default)]
    pub struct FakePersistence {
        pub players: Mutex<HashMap<PlayerId, PlayerRecord>>,
        pub rooms: Mutex<HashMap<RoomId, RoomRecord>>,
        pub room_members: Mutex<HashMap<RoomId, Vec<PlayerId>>>,
        pub mutes: Mutex<HashMap<PlayerId, Vec<MuteEntry>>>,
    }

    #[async_trait]
    impl Persistence for FakePersistence {
        async fn get_player(&self, id: &PlayerId) -> Option<PlayerRecord> {
            self.players.lock().unwrap().get(id).cloned()
        }

        async fn get_room(&self, id: &RoomId) -> Option<RoomRecord> {
            self.rooms.lock().unwrap().get(id).cloned()
        }

        async fn list_players_by_room(&self, id: &RoomId) -> Vec<PlayerId> {
            self.room_members.lock().unwrap().get(id).cloned().unwrap_or_default()
        }

        async fn get_player_mutes(&self, id: &PlayerId) -> Vec<MuteEntry> {
            self.mutes.lock().unwrap().get(id).cloned().unwrap_or_default()
        }
    }

    pub struct FakeAuth {
        pub valid_tokens: Mutex<HashMap<String, PlayerId>>,
        pub admin_tokens: Mutex<std::collections::HashSet<String>>,
    }

    impl Default for FakeAuth {
        fn default() -> Self {
            Self {
                valid_tokens: Mutex::new(HashMap::new()),
                admin_tokens: Mutex::new(std::collections::HashSet::new()),
            }
        }
    }

    #[async_trait]
    impl Auth for FakeAuth {
        async fn validate_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
            let guard = self.valid_tokens.lock().unwrap();
            match guard.get(token) {
                Some(player_id) => Ok(TokenClaims {
                    player_id: player_id.clone(),
                    expires_at: Utc::now() + chrono::Duration::hours(1),
                    is_admin: self.admin_tokens.lock().unwrap().contains(token),
                }),
                None => Err(AuthError::Invalid),
            }
        }
    }
}
