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

//! Connection Registry (spec §4.7, C7): central presence store. Reads are
//! expected to outnumber writes by orders of magnitude; `papaya::HashMap`
//! gives lock-free reads, the same crate the teacher uses for its
//! concurrent task/session maps. Writes to the same `player_id` are
//! serialized through that player's own mutex; writes to different players
//! proceed in parallel (spec §5).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mudcore_common::error::PresenceError;
use mudcore_common::event::{DomainEvent, DomainEventKind};
use mudcore_common::ids::{ConnectionId, PlayerId, RoomId, SequenceNumber, SubzoneId};
use mudcore_eventbus::EventBus;

use crate::connection::{ConnectionRecord, ConnectionState};

pub struct PresenceRecord {
    pub player_id: PlayerId,
    pub display_name: String,
    pub connection_ids: HashSet<ConnectionId>,
    pub current_room_id: Option<RoomId>,
    pub current_subzone_id: Option<SubzoneId>,
    pub last_seen_at: DateTime<Utc>,
    pub grace_expires_at: Option<DateTime<Utc>>,
}

impl PresenceRecord {
    fn new(player_id: PlayerId, display_name: String) -> Self {
        Self {
            player_id,
            display_name,
            connection_ids: HashSet::new(),
            current_room_id: None,
            current_subzone_id: None,
            last_seen_at: Utc::now(),
            grace_expires_at: None,
        }
    }
}

/// Source of truth for who is connected where (spec §2).
pub struct ConnectionRegistry {
    connections: papaya::HashMap<ConnectionId, Arc<ConnectionRecord>>,
    presence: papaya::HashMap<PlayerId, Arc<tokio::sync::Mutex<PresenceRecord>>>,
    rooms: papaya::HashMap<RoomId, Arc<std::sync::Mutex<HashSet<PlayerId>>>>,
    grace_period: Duration,
    bus: Arc<EventBus>,
    global_seq: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(bus: Arc<EventBus>, grace_period: Duration) -> Self {
        Self {
            connections: papaya::HashMap::new(),
            presence: papaya::HashMap::new(),
            rooms: papaya::HashMap::new(),
            grace_period,
            bus,
            global_seq: AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> SequenceNumber {
        SequenceNumber(self.global_seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn publish(&self, kind: DomainEventKind) {
        self.bus.publish(DomainEvent::new(self.next_seq(), kind)).await;
    }

    /// Validates token (caller's responsibility via the Auth port), then
    /// allocates a connection and registers it. Emits `player_entered` if
    /// this is the player's first live connection.
    pub async fn attach(
        &self,
        player_id: PlayerId,
        display_name: String,
        room_id: RoomId,
        token: String,
        outbound_capacity: usize,
    ) -> Arc<ConnectionRecord> {
        let record = Arc::new(ConnectionRecord::new(player_id.clone(), token, outbound_capacity));
        record.set_state(ConnectionState::Active);

        let presence_arc = {
            let guard = self.presence.guard();
            if let Some(existing) = self.presence.get(&player_id, &guard) {
                Arc::clone(existing)
            } else {
                let fresh = Arc::new(tokio::sync::Mutex::new(PresenceRecord::new(
                    player_id.clone(),
                    display_name.clone(),
                )));
                match self.presence.try_insert(player_id.clone(), Arc::clone(&fresh), &guard) {
                    Ok(_) => fresh,
                    Err(e) => Arc::clone(e.current),
                }
            }
        };

        let is_first_connection = {
            let mut presence = presence_arc.lock().await;
            presence.grace_expires_at = None;
            presence.last_seen_at = Utc::now();
            let was_empty = presence.connection_ids.is_empty();
            presence.connection_ids.insert(record.connection_id);
            if was_empty {
                presence.current_room_id = Some(room_id.clone());
            }
            was_empty
        };

        {
            let guard = self.rooms.guard();
            let room_set = match self.rooms.get(&room_id, &guard) {
                Some(set) => Arc::clone(set),
                None => {
                    let fresh = Arc::new(std::sync::Mutex::new(HashSet::new()));
                    match self.rooms.try_insert(room_id.clone(), Arc::clone(&fresh), &guard) {
                        Ok(_) => fresh,
                        Err(e) => Arc::clone(e.current),
                    }
                }
            };
            room_set.lock().unwrap().insert(player_id.clone());
        }

        {
            let guard = self.connections.guard();
            self.connections.insert(record.connection_id, Arc::clone(&record), &guard);
        }

        if is_first_connection {
            self.publish(DomainEventKind::PlayerEntered {
                player_id: player_id.clone(),
                room_id,
            })
            .await;
        }

        record
    }

    /// Removes the connection. If it was the player's last connection,
    /// starts the grace timer; the Cleaner (C16) removes the presence
    /// record and emits `player_left` once grace expires.
    pub async fn detach(&self, connection_id: ConnectionId) -> Result<(), PresenceError> {
        let record = {
            let guard = self.connections.guard();
            let record = self
                .connections
                .get(&connection_id, &guard)
                .cloned()
                .ok_or_else(|| PresenceError::ConnectionNotFound(connection_id.to_string()))?;
            self.connections.remove(&connection_id, &guard);
            record
        };
        record.set_state(ConnectionState::Closed);
        record.outbound.close();

        let guard = self.presence.guard();
        if let Some(presence_arc) = self.presence.get(&record.player_id, &guard) {
            let presence_arc = Arc::clone(presence_arc);
            drop(guard);
            let mut presence = presence_arc.lock().await;
            presence.connection_ids.remove(&connection_id);
            if presence.connection_ids.is_empty() {
                presence.grace_expires_at = Some(Utc::now() + self.grace_period);
            }
        }
        Ok(())
    }

    pub async fn lookup_by_player(&self, player_id: &PlayerId) -> Vec<ConnectionId> {
        let guard = self.presence.guard();
        match self.presence.get(player_id, &guard) {
            Some(presence_arc) => {
                let presence_arc = Arc::clone(presence_arc);
                drop(guard);
                presence_arc.lock().await.connection_ids.iter().cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn connection(&self, connection_id: ConnectionId) -> Option<Arc<ConnectionRecord>> {
        let guard = self.connections.guard();
        self.connections.get(&connection_id, &guard).cloned()
    }

    pub fn room_occupants(&self, room_id: &RoomId) -> Vec<PlayerId> {
        let guard = self.rooms.guard();
        match self.rooms.get(room_id, &guard) {
            Some(set) => set.lock().unwrap().iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Atomically updates the room index and emits `room_updated` for both
    /// rooms involved (spec §4.7).
    pub async fn move_player(
        &self,
        player_id: &PlayerId,
        from_room: &RoomId,
        to_room: &RoomId,
    ) -> Result<(), PresenceError> {
        {
            let guard = self.rooms.guard();
            if let Some(set) = self.rooms.get(from_room, &guard) {
                set.lock().unwrap().remove(player_id);
            }
            let to_set = match self.rooms.get(to_room, &guard) {
                Some(set) => Arc::clone(set),
                None => {
                    let fresh = Arc::new(std::sync::Mutex::new(HashSet::new()));
                    match self.rooms.try_insert(to_room.clone(), Arc::clone(&fresh), &guard) {
                        Ok(_) => fresh,
                        Err(e) => Arc::clone(e.current),
                    }
                }
            };
            to_set.lock().unwrap().insert(player_id.clone());
        }

        let guard = self.presence.guard();
        if let Some(presence_arc) = self.presence.get(player_id, &guard) {
            let presence_arc = Arc::clone(presence_arc);
            drop(guard);
            presence_arc.lock().await.current_room_id = Some(to_room.clone());
        }

        self.publish(DomainEventKind::RoomUpdated { room_id: from_room.clone() }).await;
        self.publish(DomainEventKind::RoomUpdated { room_id: to_room.clone() }).await;
        Ok(())
    }

    /// Online players: presence records with at least one live connection.
    pub async fn iter_online(&self) -> Vec<PlayerId> {
        let guard = self.presence.guard();
        let arcs: Vec<_> = self
            .presence
            .iter(&guard)
            .map(|(_, v)| Arc::clone(v))
            .collect();
        drop(guard);
        let mut online = Vec::new();
        for arc in arcs {
            let presence = arc.lock().await;
            if !presence.connection_ids.is_empty() {
                online.push(presence.player_id.clone());
            }
        }
        online
    }

    /// Ghost presence records: empty connection set with expired grace.
    /// Used by the Cleaner (C16).
    pub async fn ghost_players(&self) -> Vec<PlayerId> {
        let guard = self.presence.guard();
        let arcs: Vec<_> = self
            .presence
            .iter(&guard)
            .map(|(_, v)| Arc::clone(v))
            .collect();
        drop(guard);
        let now = Utc::now();
        let mut ghosts = Vec::new();
        for arc in arcs {
            let presence = arc.lock().await;
            if presence.connection_ids.is_empty() {
                if let Some(expires) = presence.grace_expires_at {
                    if expires <= now {
                        ghosts.push(presence.player_id.clone());
                    }
                }
            }
        }
        ghosts
    }

    /// Removes a ghost's presence record and room membership, emitting
    /// `player_left` (spec §4.16).
    pub async fn reap_ghost(&self, player_id: &PlayerId) {
        let room_id = {
            let guard = self.presence.guard();
            let room_id = self
                .presence
                .get(player_id, &guard)
                .map(|arc| Arc::clone(arc));
            self.presence.remove(player_id, &guard);
            room_id
        };
        if let Some(presence_arc) = room_id {
            let presence = presence_arc.lock().await;
            if let Some(room_id) = &presence.current_room_id {
                let guard = self.rooms.guard();
                if let Some(set) = self.rooms.get(room_id, &guard) {
                    set.lock().unwrap().remove(player_id);
                }
            }
        }
        self.publish(DomainEventKind::PlayerLeft {
            player_id: player_id.clone(),
            room_id: None,
        })
        .await;
    }

    /// Resolves a whisper target by display name, case-insensitively,
    /// among currently online players (spec §4.13 "single target by name,
    /// case-insensitive").
    pub async fn find_online_by_display_name(&self, name: &str) -> Option<PlayerId> {
        let guard = self.presence.guard();
        let arcs: Vec<_> = self.presence.iter(&guard).map(|(_, v)| Arc::clone(v)).collect();
        drop(guard);
        for arc in arcs {
            let presence = arc.lock().await;
            if !presence.connection_ids.is_empty() && presence.display_name.eq_ignore_ascii_case(name) {
                return Some(presence.player_id.clone());
            }
        }
        None
    }

    pub async fn current_room(&self, player_id: &PlayerId) -> Option<RoomId> {
        let guard = self.presence.guard();
        let presence_arc = Arc::clone(self.presence.get(player_id, &guard)?);
        drop(guard);
        presence_arc.lock().await.current_room_id.clone()
    }

    pub async fn current_subzone(&self, player_id: &PlayerId) -> Option<SubzoneId> {
        let guard = self.presence.guard();
        let presence_arc = Arc::clone(self.presence.get(player_id, &guard)?);
        drop(guard);
        presence_arc.lock().await.current_subzone_id.clone()
    }

    /// Players whose current subzone matches, among those online. There is
    /// no dedicated subzone index (spec §3 only names a Room index); a scan
    /// over online presence is acceptable since subzone chat is lower
    /// volume than room chat.
    pub async fn subzone_occupants(&self, subzone_id: &SubzoneId) -> Vec<PlayerId> {
        let guard = self.presence.guard();
        let arcs: Vec<_> = self.presence.iter(&guard).map(|(_, v)| Arc::clone(v)).collect();
        drop(guard);
        let mut occupants = Vec::new();
        for arc in arcs {
            let presence = arc.lock().await;
            if !presence.connection_ids.is_empty()
                && presence.current_subzone_id.as_ref() == Some(subzone_id)
            {
                occupants.push(presence.player_id.clone());
            }
        }
        occupants
    }

    pub fn connection_ids_snapshot(&self) -> Vec<ConnectionId> {
        let guard = self.connections.guard();
        self.connections.iter(&guard).map(|(id, _)| *id).collect()
    }

    /// Players listed in a room's occupant set with no presence record at
    /// all. Can't happen through `attach`/`detach`/`move_player` alone, but
    /// a task that panicked mid-update could leave one behind (spec §4.16
    /// "orphaned room occupants"). Used by the Cleaner (C16).
    pub fn orphaned_room_occupants(&self) -> Vec<(RoomId, PlayerId)> {
        let rooms_guard = self.rooms.guard();
        let presence_guard = self.presence.guard();
        let mut orphans = Vec::new();
        for (room_id, members) in self.rooms.iter(&rooms_guard) {
            for player_id in members.lock().unwrap().iter() {
                if self.presence.get(player_id, &presence_guard).is_none() {
                    orphans.push((room_id.clone(), player_id.clone()));
                }
            }
        }
        orphans
    }

    /// Removes one orphaned occupant from a room's set (spec §4.16).
    pub fn remove_room_occupant(&self, room_id: &RoomId, player_id: &PlayerId) {
        let guard = self.rooms.guard();
        if let Some(set) = self.rooms.get(room_id, &guard) {
            set.lock().unwrap().remove(player_id);
        }
    }

    /// Test-only seam for constructing an orphaned room occupant (a player
    /// in a room set with no presence record), which `attach` can't produce
    /// on its own since it always creates both together.
    #[cfg(test)]
    pub fn insert_room_occupant_for_test(&self, room_id: &RoomId, player_id: &PlayerId) {
        let guard = self.rooms.guard();
        let set = match self.rooms.get(room_id, &guard) {
            Some(set) => Arc::clone(set),
            None => {
                let fresh = Arc::new(std::sync::Mutex::new(HashSet::new()));
                match self.rooms.try_insert(room_id.clone(), Arc::clone(&fresh), &guard) {
                    Ok(_) => fresh,
                    Err(e) => Arc::clone(e.current),
                }
            }
        };
        set.lock().unwrap().insert(player_id.clone());
    }

    /// Connections whose transport has reported closed (outbound queue
    /// closed, or state already `Closed`) but are still present in the
    /// registry. The normal path (`ws.rs`'s per-connection loop) calls
    /// `detach` itself on exit; a task that panicked or was killed
    /// externally can leave a stale entry behind (spec §4.16 "dead
    /// transports"). Used by the Cleaner (C16).
    pub fn dead_transport_connections(&self) -> Vec<ConnectionId> {
        let guard = self.connections.guard();
        self.connections
            .iter(&guard)
            .filter(|(_, record)| record.state() == ConnectionState::Closed || record.outbound.is_closed())
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(EventBus::new()), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn attach_registers_connection_and_room_membership() {
        let reg = registry();
        let room = RoomId::new("arkham.001");
        let conn = reg.attach(PlayerId::new("alice"), "Alice".into(), room.clone(), "tok".into(), 16).await;
        assert_eq!(reg.room_occupants(&room), vec![PlayerId::new("alice")]);
        assert_eq!(reg.lookup_by_player(&PlayerId::new("alice")).await, vec![conn.connection_id]);
    }

    #[tokio::test]
    async fn detach_then_grace_expiry_makes_player_a_ghost() {
        let reg = registry();
        let room = RoomId::new("arkham.001");
        let conn = reg.attach(PlayerId::new("bob"), "Bob".into(), room, "tok".into(), 16).await;
        reg.detach(conn.connection_id).await.unwrap();
        assert!(reg.ghost_players().await.is_empty());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(reg.ghost_players().await, vec![PlayerId::new("bob")]);
    }

    #[tokio::test]
    async fn move_player_updates_both_room_sets() {
        let reg = registry();
        let room_a = RoomId::new("arkham.001");
        let room_b = RoomId::new("arkham.002");
        reg.attach(PlayerId::new("carol"), "Carol".into(), room_a.clone(), "tok".into(), 16).await;
        reg.move_player(&PlayerId::new("carol"), &room_a, &room_b).await.unwrap();
        assert!(reg.room_occupants(&room_a).is_empty());
        assert_eq!(reg.room_occupants(&room_b), vec![PlayerId::new("carol")]);
    }

    #[tokio::test]
    async fn iter_online_excludes_fully_disconnected_players() {
        let reg = registry();
        let room = RoomId::new("arkham.001");
        let conn = reg.attach(PlayerId::new("dave"), "Dave".into(), room, "tok".into(), 16).await;
        assert_eq!(reg.iter_online().await, vec![PlayerId::new("dave")]);
        reg.detach(conn.connection_id).await.unwrap();
        assert!(reg.iter_online().await.is_empty());
    }

    #[tokio::test]
    async fn orphaned_room_occupant_is_found_and_removable() {
        let reg = registry();
        let room = RoomId::new("arkham.001");
        {
            let guard = reg.rooms.guard();
            let fresh = Arc::new(std::sync::Mutex::new(HashSet::new()));
            fresh.lock().unwrap().insert(PlayerId::new("erin"));
            reg.rooms.try_insert(room.clone(), fresh, &guard).ok();
        }

        assert_eq!(reg.orphaned_room_occupants(), vec![(room.clone(), PlayerId::new("erin"))]);
        reg.remove_room_occupant(&room, &PlayerId::new("erin"));
        assert!(reg.orphaned_room_occupants().is_empty());
    }

    #[tokio::test]
    async fn dead_transport_with_closed_queue_is_found() {
        let reg = registry();
        let room = RoomId::new("arkham.001");
        let conn = reg.attach(PlayerId::new("frank"), "Frank".into(), room, "tok".into(), 16).await;
        assert!(reg.dead_transport_connections().is_empty());
        conn.outbound.close();
        assert_eq!(reg.dead_transport_connections(), vec![conn.connection_id]);
    }
}
