use dashmap::DashMap;
use indexmap::IndexSet;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;
use uuid::Uuid;

use crate::dto::events::ServerEvent;

/// Identifier of one connected subscriber.
pub type ConnectionId = Uuid;

/// Fan-out of server events.
///
/// Every subscriber owns one bounded queue, and global, direct and room-scoped events all go
/// through it, so a subscriber sees events in the order they were emitted. When a queue is full
/// the new event is dropped for that subscriber only. Rooms are keyed by round id: created on
/// first join and closed by [`EventHub::close_room`] when the round completes.
pub struct EventHub {
    capacity: usize,
    connections: DashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    rooms: DashMap<Uuid, Room>,
}

/// Members of one round's room. A closed room stays behind as a tombstone until the next room
/// closes, so a join that raced with completion cannot resurrect it.
#[derive(Default)]
struct Room {
    members: IndexSet<ConnectionId>,
    closed: bool,
}

impl EventHub {
    /// Construct a hub whose subscribers buffer up to `capacity` undelivered events each.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            connections: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Register an identified subscriber.
    pub fn connect(&self, user_id: &str) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.capacity);
        self.connections.insert(id, tx);
        tracing::debug!(connection = %id, user_id, "subscriber registered");
        Subscription { id, rx }
    }

    /// Forget a subscriber and drop it from every room.
    pub fn disconnect(&self, id: ConnectionId) {
        self.connections.remove(&id);
        for mut room in self.rooms.iter_mut() {
            room.members.shift_remove(&id);
        }
    }

    /// Number of currently connected subscribers.
    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    /// Deliver to every connected subscriber. Returns how many queued it.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        self.send_to_many(&ids, &event)
    }

    /// Deliver to one subscriber. Returns `false` when it is gone or its queue is full.
    pub fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let Some(tx) = self.connections.get(&id).map(|entry| entry.value().clone()) else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(connection = %id, event = event.event, "subscriber queue full; event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Add a connection to the room of `round_id`, creating the room on first join.
    ///
    /// Returns `false` when the room was already closed.
    pub fn join_room(&self, round_id: Uuid, id: ConnectionId) -> bool {
        let mut room = self.rooms.entry(round_id).or_default();
        if room.closed {
            return false;
        }
        room.members.insert(id);
        true
    }

    /// Deliver to every member of an open room, optionally skipping one connection.
    pub fn send_to_room(
        &self,
        round_id: Uuid,
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let members: Vec<ConnectionId> = match self.rooms.get(&round_id) {
            Some(room) if !room.closed => room
                .members
                .iter()
                .copied()
                .filter(|id| Some(*id) != except)
                .collect(),
            _ => return 0,
        };

        self.send_to_many(&members, event)
    }

    /// Deliver to each listed connection. Returns how many accepted the event.
    pub fn send_to_many(&self, ids: &[ConnectionId], event: &ServerEvent) -> usize {
        ids.iter()
            .filter(|id| self.send_to(**id, event.clone()))
            .count()
    }

    /// Close the room of `round_id`, returning its members if it was open.
    ///
    /// Tombstones of earlier rounds are dropped.
    pub fn close_room(&self, round_id: Uuid) -> Option<Vec<ConnectionId>> {
        let members = {
            let mut room = self.rooms.entry(round_id).or_default();
            if room.closed {
                None
            } else {
                room.closed = true;
                let members = std::mem::take(&mut room.members);
                (!members.is_empty()).then(|| members.into_iter().collect())
            }
        };
        self.rooms
            .retain(|id, room| *id == round_id || !room.closed);
        members
    }
}

/// Receiving side of one connection.
pub struct Subscription {
    id: ConnectionId,
    rx: mpsc::Receiver<ServerEvent>,
}

impl Subscription {
    /// Identifier of this connection in the hub.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait for the next event. Returns `None` once the connection was removed from the hub.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    /// Take an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(name: &'static str) -> ServerEvent {
        ServerEvent {
            event: name,
            data: json!({}),
        }
    }

    #[test]
    fn global_events_reach_every_subscriber() {
        let hub = EventHub::new(8);
        let mut a = hub.connect("a");
        let mut b = hub.connect("b");
        assert_eq!(hub.connected_count(), 2);

        assert_eq!(hub.broadcast(event("sessionStarted")), 2);
        assert_eq!(a.try_recv().map(|e| e.event), Some("sessionStarted"));
        assert_eq!(b.try_recv().map(|e| e.event), Some("sessionStarted"));
        assert!(a.try_recv().is_none());
    }

    #[test]
    fn subscriber_sees_events_in_emission_order() {
        let hub = EventHub::new(8);
        let round = Uuid::new_v4();
        let mut a = hub.connect("a");
        hub.join_room(round, a.id());

        hub.broadcast(event("sessionStarted"));
        hub.send_to(a.id(), event("gameSessionJoined"));
        hub.broadcast(event("sessionEnded"));
        let members = hub.close_room(round).unwrap();
        hub.send_to_many(&members, &event("currentGameSessionEnded"));

        let received: Vec<&str> = std::iter::from_fn(|| a.try_recv()).map(|e| e.event).collect();
        assert_eq!(
            received,
            vec![
                "sessionStarted",
                "gameSessionJoined",
                "sessionEnded",
                "currentGameSessionEnded"
            ]
        );
    }

    #[test]
    fn full_queue_drops_only_for_that_subscriber() {
        let hub = EventHub::new(1);
        let mut slow = hub.connect("slow");
        let mut fast = hub.connect("fast");

        assert_eq!(hub.broadcast(event("first")), 2);
        assert_eq!(fast.try_recv().map(|e| e.event), Some("first"));
        assert_eq!(hub.broadcast(event("second")), 1);

        assert_eq!(fast.try_recv().map(|e| e.event), Some("second"));
        assert_eq!(slow.try_recv().map(|e| e.event), Some("first"));
        assert!(slow.try_recv().is_none());
    }

    #[test]
    fn room_events_skip_the_excluded_member() {
        let hub = EventHub::new(8);
        let round = Uuid::new_v4();
        let mut a = hub.connect("a");
        let mut b = hub.connect("b");
        let mut outsider = hub.connect("c");
        assert!(hub.join_room(round, a.id()));
        assert!(hub.join_room(round, b.id()));

        assert_eq!(
            hub.send_to_room(round, &event("participantEnteredGameSession"), Some(b.id())),
            1
        );
        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_none());
        assert!(outsider.try_recv().is_none());
    }

    #[test]
    fn closing_a_room_returns_members_once() {
        let hub = EventHub::new(8);
        let round = Uuid::new_v4();
        let a = hub.connect("a");
        hub.join_room(round, a.id());

        assert_eq!(hub.send_to_room(round, &event("x"), None), 1);
        assert_eq!(hub.close_room(round), Some(vec![a.id()]));
        assert_eq!(hub.close_room(round), None);
        assert_eq!(hub.send_to_room(round, &event("x"), None), 0);
    }

    #[test]
    fn closed_room_refuses_late_joins() {
        let hub = EventHub::new(8);
        let round = Uuid::new_v4();
        let late = hub.connect("late");

        assert_eq!(hub.close_room(round), None);
        assert!(!hub.join_room(round, late.id()));

        let next = Uuid::new_v4();
        assert!(hub.join_room(next, late.id()));
        assert_eq!(hub.close_room(next), Some(vec![late.id()]));
        assert!(!hub.rooms.contains_key(&round));
    }

    #[test]
    fn disconnect_removes_connection_and_memberships() {
        let hub = EventHub::new(8);
        let round = Uuid::new_v4();
        let a = hub.connect("a");
        hub.join_room(round, a.id());

        hub.disconnect(a.id());
        assert_eq!(hub.connected_count(), 0);
        assert!(!hub.send_to(a.id(), event("x")));
        assert_eq!(hub.close_room(round), None);
    }
}
