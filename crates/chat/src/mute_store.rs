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

//! Mute Store (spec §4.12, C12): per-player mute lists cached with TTL,
//! batch loading, and coalesced concurrent misses. Evaluated at delivery
//! time so mute changes take effect without resubscription (spec §3).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mudcore_common::ids::{ChannelId, PlayerId};
use mudcore_common::ports::Persistence;
use tokio::time::Instant;

struct CacheEntry {
    loaded_at: Instant,
    muted_players: Vec<PlayerId>,
    muted_channels: Vec<ChannelId>,
}

/// One mutex per player serializes concurrent misses for that player into a
/// single fetch: the first caller to acquire the lock performs the fetch
/// and populates the entry; every other concurrent caller simply observes
/// the populated entry once it gets the lock (spec: "concurrent misses for
/// the same key coalesce to one fetch").
pub struct MuteStore {
    cache: papaya::HashMap<PlayerId, Arc<tokio::sync::Mutex<Option<CacheEntry>>>>,
    persistence: Arc<dyn Persistence>,
    ttl: Duration,
}

impl MuteStore {
    pub fn new(persistence: Arc<dyn Persistence>, ttl: Duration) -> Self {
        Self {
            cache: papaya::HashMap::new(),
            persistence,
            ttl,
        }
    }

    fn slot(&self, player_id: &PlayerId) -> Arc<tokio::sync::Mutex<Option<CacheEntry>>> {
        let guard = self.cache.guard();
        match self.cache.get(player_id, &guard) {
            Some(slot) => Arc::clone(slot),
            None => {
                let fresh = Arc::new(tokio::sync::Mutex::new(None));
                match self.cache.try_insert(player_id.clone(), Arc::clone(&fresh), &guard) {
                    Ok(_) => fresh,
                    Err(e) => Arc::clone(e.current),
                }
            }
        }
    }

    async fn ensure_loaded<'a>(&self, player_id: &PlayerId, slot: &'a tokio::sync::Mutex<Option<CacheEntry>>) -> tokio::sync::MutexGuard<'a, Option<CacheEntry>> {
        let mut guard = slot.lock().await;
        let stale = guard.as_ref().map(|e| e.loaded_at.elapsed() > self.ttl).unwrap_or(true);
        if stale {
            let mutes = self.persistence.get_player_mutes(player_id).await;
            let now = Utc::now();
            let muted_players = mutes
                .iter()
                .filter(|m| m.expires_at.map(|e| e > now).unwrap_or(true))
                .filter_map(|m| m.muted_player_id.clone())
                .collect();
            let muted_channels = mutes
                .iter()
                .filter(|m| m.expires_at.map(|e| e > now).unwrap_or(true))
                .filter_map(|m| m.muted_channel_id.clone())
                .collect();
            *guard = Some(CacheEntry { loaded_at: Instant::now(), muted_players, muted_channels });
        }
        guard
    }

    pub async fn is_muted(&self, receiver_id: &PlayerId, sender_id: &PlayerId) -> bool {
        let slot = self.slot(receiver_id);
        let guard = self.ensure_loaded(receiver_id, &slot).await;
        guard.as_ref().map(|e| e.muted_players.contains(sender_id)).unwrap_or(false)
    }

    pub async fn channel_muted(&self, receiver_id: &PlayerId, channel_id: &ChannelId) -> bool {
        let slot = self.slot(receiver_id);
        let guard = self.ensure_loaded(receiver_id, &slot).await;
        guard.as_ref().map(|e| e.muted_channels.contains(channel_id)).unwrap_or(false)
    }

    /// Mandatory on broadcast paths to avoid N sequential lookups (spec
    /// §4.12). Loads every player concurrently.
    pub async fn load_batch(&self, player_ids: &[PlayerId]) {
        let mut tasks = Vec::new();
        for player_id in player_ids {
            let slot = self.slot(player_id);
            let player_id = player_id.clone();
            let this_ttl = self.ttl;
            let persistence = Arc::clone(&self.persistence);
            tasks.push(tokio::spawn(async move {
                let mut guard = slot.lock().await;
                let stale = guard.as_ref().map(|e| e.loaded_at.elapsed() > this_ttl).unwrap_or(true);
                if stale {
                    let mutes = persistence.get_player_mutes(&player_id).await;
                    let now = Utc::now();
                    let muted_players = mutes
                        .iter()
                        .filter(|m| m.expires_at.map(|e| e > now).unwrap_or(true))
                        .filter_map(|m| m.muted_player_id.clone())
                        .collect();
                    let muted_channels = mutes
                        .iter()
                        .filter(|m| m.expires_at.map(|e| e > now).unwrap_or(true))
                        .filter_map(|m| m.muted_channel_id.clone())
                        .collect();
                    *guard = Some(CacheEntry { loaded_at: Instant::now(), muted_players, muted_channels });
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudcore_common::ports::fake::FakePersistence;
    use mudcore_common::ports::MuteEntry;

    #[tokio::test]
    async fn is_muted_reflects_persistence() {
        let persistence = Arc::new(FakePersistence::default());
        persistence.mutes.lock().unwrap().insert(
            PlayerId::new("alice"),
            vec![MuteEntry { muted_player_id: Some(PlayerId::new("bob")), muted_channel_id: None, expires_at: None }],
        );
        let store = MuteStore::new(persistence, Duration::from_secs(300));
        assert!(store.is_muted(&PlayerId::new("alice"), &PlayerId::new("bob")).await);
        assert!(!store.is_muted(&PlayerId::new("alice"), &PlayerId::new("carol")).await);
    }

    #[tokio::test]
    async fn expired_mute_does_not_apply() {
        let persistence = Arc::new(FakePersistence::default());
        persistence.mutes.lock().unwrap().insert(
            PlayerId::new("alice"),
            vec![MuteEntry {
                muted_player_id: Some(PlayerId::new("bob")),
                muted_channel_id: None,
                expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            }],
        );
        let store = MuteStore::new(persistence, Duration::from_secs(300));
        assert!(!store.is_muted(&PlayerId::new("alice"), &PlayerId::new("bob")).await);
    }
}
