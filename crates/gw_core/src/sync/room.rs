//! Room pairing. Connections join rooms sized by mode; the earliest
//! connection in a room is its host and plays player 1.

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::protocol::Role;
use crate::engine::geometry::PlayerId;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoomMode {
    HumanHuman,
    HumanAi,
}

impl RoomMode {
    pub fn capacity(self) -> usize {
        match self {
            RoomMode::HumanHuman => 2,
            RoomMode::HumanAi => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub connection: ConnectionId,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub mode: RoomMode,
    members: Vec<Member>,
}

impl Room {
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.mode.capacity()
    }

    /// Full and everybody ready.
    pub fn match_ready(&self) -> bool {
        self.is_full() && self.members.iter().all(|m| m.ready)
    }

    pub fn host(&self) -> Option<ConnectionId> {
        self.members.iter().map(|m| m.connection).min()
    }

    pub fn role_of(&self, connection: ConnectionId) -> Option<Role> {
        if !self.members.iter().any(|m| m.connection == connection) {
            return None;
        }
        Some(if self.host() == Some(connection) { Role::Host } else { Role::Guest })
    }

    pub fn player_of(&self, connection: ConnectionId) -> Option<PlayerId> {
        self.role_of(connection).map(|role| match role {
            Role::Host => PlayerId::Player1,
            Role::Guest => PlayerId::Player2,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub room: Uuid,
    pub role: Role,
    pub player: PlayerId,
    /// Room reached capacity with this join.
    pub paired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room: Uuid,
    /// Member left behind, who has lost their partner.
    pub remaining: Option<ConnectionId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStats {
    pub rooms: usize,
    pub connections: usize,
    pub waiting: usize,
    pub full: usize,
}

#[derive(Debug, Default)]
pub struct RoomManager {
    rooms: FxHashMap<Uuid, Room>,
    membership: FxHashMap<ConnectionId, Uuid>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_room(&mut self, mode: RoomMode) -> Uuid {
        let id = Uuid::new_v4();
        self.rooms.insert(id, Room { id, mode, members: Vec::new() });
        debug!(room = %id, ?mode, "room created");
        id
    }

    pub fn room(&self, id: Uuid) -> Option<&Room> {
        self.rooms.get(&id)
    }

    pub fn room_of(&self, connection: ConnectionId) -> Option<&Room> {
        self.membership.get(&connection).and_then(|id| self.rooms.get(id))
    }

    /// Joins `target`, or the first room of `mode` with space (a new one if
    /// none has).
    pub fn join(&mut self, connection: ConnectionId, mode: RoomMode, target: Option<Uuid>) -> Result<JoinOutcome> {
        if let Some(existing) = self.membership.get(&connection) {
            return Err(CoreError::RoomUnavailable(format!("{connection:?} already in room {existing}")));
        }

        let room_id = match target {
            Some(id) => {
                let room = self.rooms.get(&id).ok_or_else(|| CoreError::RoomUnavailable(format!("no room {id}")))?;
                if room.mode != mode {
                    return Err(CoreError::RoomUnavailable(format!("room {id} is {:?}", room.mode)));
                }
                if room.is_full() {
                    return Err(CoreError::RoomUnavailable(format!("room {id} is full")));
                }
                id
            }
            None => {
                let open = self
                    .rooms
                    .values()
                    .filter(|r| r.mode == mode && !r.is_full())
                    .min_by_key(|r| r.host())
                    .map(|r| r.id);
                match open {
                    Some(id) => id,
                    None => self.create_room(mode),
                }
            }
        };

        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| CoreError::RoomUnavailable(format!("room {room_id} vanished")))?;
        room.members.push(Member { connection, ready: false });
        self.membership.insert(connection, room_id);

        let role = room.role_of(connection).unwrap_or(Role::Guest);
        let player = room.player_of(connection).unwrap_or(PlayerId::Player2);
        let paired = room.is_full();
        info!(room = %room_id, ?connection, ?role, paired, "joined room");
        Ok(JoinOutcome { room: room_id, role, player, paired })
    }

    /// Removes the connection; empty rooms are dropped.
    pub fn leave(&mut self, connection: ConnectionId) -> Option<LeaveOutcome> {
        let room_id = self.membership.remove(&connection)?;
        let room = self.rooms.get_mut(&room_id)?;
        room.members.retain(|m| m.connection != connection);
        for m in &mut room.members {
            m.ready = false;
        }
        let remaining = room.host();
        if room.members.is_empty() {
            self.rooms.remove(&room_id);
            debug!(room = %room_id, "room removed");
        }
        info!(room = %room_id, ?connection, "left room");
        Some(LeaveOutcome { room: room_id, remaining })
    }

    /// Returns whether the room is now ready to start.
    pub fn set_ready(&mut self, connection: ConnectionId, ready: bool) -> Result<bool> {
        let room_id = self
            .membership
            .get(&connection)
            .copied()
            .ok_or_else(|| CoreError::RoomUnavailable(format!("{connection:?} is not in a room")))?;
        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| CoreError::RoomUnavailable(format!("room {room_id} vanished")))?;
        if let Some(m) = room.members.iter_mut().find(|m| m.connection == connection) {
            m.ready = ready;
        }
        Ok(room.match_ready())
    }

    pub fn role_of(&self, connection: ConnectionId) -> Option<Role> {
        self.room_of(connection)?.role_of(connection)
    }

    pub fn stats(&self) -> RoomStats {
        let full = self.rooms.values().filter(|r| r.is_full()).count();
        RoomStats {
            rooms: self.rooms.len(),
            connections: self.membership.len(),
            waiting: self.rooms.len() - full,
            full,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_joiner_hosts() {
        let mut rooms = RoomManager::new();
        let a = rooms.join(ConnectionId(1), RoomMode::HumanHuman, None).unwrap();
        assert_eq!((a.role, a.player, a.paired), (Role::Host, PlayerId::Player1, false));

        let b = rooms.join(ConnectionId(2), RoomMode::HumanHuman, None).unwrap();
        assert_eq!(b.room, a.room);
        assert_eq!((b.role, b.player, b.paired), (Role::Guest, PlayerId::Player2, true));

        // Room full → third connection opens a new one.
        let c = rooms.join(ConnectionId(3), RoomMode::HumanHuman, None).unwrap();
        assert_ne!(c.room, a.room);
        assert_eq!(rooms.stats(), RoomStats { rooms: 2, connections: 3, waiting: 1, full: 1 });
    }

    #[test]
    fn test_human_ai_rooms_hold_one() {
        let mut rooms = RoomManager::new();
        let a = rooms.join(ConnectionId(5), RoomMode::HumanAi, None).unwrap();
        assert!(a.paired);
        let b = rooms.join(ConnectionId(6), RoomMode::HumanAi, None).unwrap();
        assert_ne!(a.room, b.room);
        assert!(rooms.join(ConnectionId(7), RoomMode::HumanAi, Some(a.room)).is_err());
    }

    #[test]
    fn test_leave_hands_host_to_remaining_member() {
        let mut rooms = RoomManager::new();
        let a = rooms.join(ConnectionId(1), RoomMode::HumanHuman, None).unwrap();
        rooms.join(ConnectionId(2), RoomMode::HumanHuman, Some(a.room)).unwrap();

        let left = rooms.leave(ConnectionId(1)).unwrap();
        assert_eq!(left.remaining, Some(ConnectionId(2)));
        assert_eq!(rooms.role_of(ConnectionId(2)), Some(Role::Host));

        rooms.leave(ConnectionId(2));
        assert!(rooms.room(a.room).is_none());
        assert_eq!(rooms.stats(), RoomStats::default());
        assert!(rooms.leave(ConnectionId(2)).is_none());
    }

    #[test]
    fn test_match_ready_needs_everyone() {
        let mut rooms = RoomManager::new();
        rooms.join(ConnectionId(1), RoomMode::HumanHuman, None).unwrap();
        assert!(!rooms.set_ready(ConnectionId(1), true).unwrap());
        rooms.join(ConnectionId(2), RoomMode::HumanHuman, None).unwrap();
        assert!(!rooms.set_ready(ConnectionId(1), true).unwrap());
        assert!(rooms.set_ready(ConnectionId(2), true).unwrap());
        assert!(rooms.set_ready(ConnectionId(9), true).is_err());
    }

    #[test]
    fn test_double_join_rejected() {
        let mut rooms = RoomManager::new();
        rooms.join(ConnectionId(1), RoomMode::HumanHuman, None).unwrap();
        let err = rooms.join(ConnectionId(1), RoomMode::HumanHuman, None).unwrap_err();
        assert!(matches!(err, CoreError::RoomUnavailable(_)));
    }
}
