//! In-memory hub routing server messages to connected clients
//!
//! One unbounded ordered channel per subscriber: messages pushed to a
//! participant are delivered in send order, which is what preserves
//! causal order within one negotiation stream. No ordering holds
//! across different participants.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use confab_sfu::{ConnectionId, ParticipantId, RoomId};

use crate::protocol::ServerMessage;

/// Message sender for a client connection
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

#[derive(Debug, Clone)]
struct Subscriber {
    participant: ParticipantId,
    connection: ConnectionId,
    sender: MessageSender,
}

/// In-memory hub for distributing signaling messages to clients in
/// rooms (single node).
#[derive(Clone, Default)]
pub struct RoomHub {
    /// Map of room_id -> subscribers
    rooms: Arc<DashMap<RoomId, Vec<Subscriber>>>,
}

impl RoomHub {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
        }
    }

    /// Subscribe a participant's connection to a room. Returns the
    /// receiver the connection task drains. A re-subscribe replaces the
    /// previous connection's sender.
    pub fn subscribe(
        &self,
        room_id: RoomId,
        participant: ParticipantId,
        connection: ConnectionId,
    ) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.rooms.entry(room_id.clone()).or_default();
        subscribers.retain(|s| s.participant != participant);
        subscribers.push(Subscriber {
            participant: participant.clone(),
            connection: connection.clone(),
            sender: tx,
        });

        info!(
            room_id = %room_id,
            participant = %participant,
            connection = %connection,
            "Client subscribed to room"
        );
        rx
    }

    /// Remove the participant's subscription only if it still belongs
    /// to `connection`. Returns `false` when a newer connection has
    /// replaced it, meaning the caller's socket was superseded by a
    /// reconnect and must not tear the session down.
    pub fn unsubscribe(
        &self,
        room_id: &RoomId,
        participant: &ParticipantId,
        connection: &ConnectionId,
    ) -> bool {
        if let Some(mut subscribers) = self.rooms.get_mut(room_id) {
            if let Some(index) = subscribers
                .iter()
                .position(|s| s.participant == *participant)
            {
                if subscribers[index].connection != *connection {
                    debug!(
                        room_id = %room_id,
                        participant = %participant,
                        connection = %connection,
                        "Stale connection, subscription kept"
                    );
                    return false;
                }
                subscribers.remove(index);
            }
            if subscribers.is_empty() {
                drop(subscribers);
                self.rooms.remove(room_id);
                debug!(room_id = %room_id, "Room has no more subscribers, removed");
            }
        }
        info!(
            room_id = %room_id,
            participant = %participant,
            connection = %connection,
            "Client unsubscribed from room"
        );
        true
    }

    /// Broadcast a message to every subscriber in a room. Fire and
    /// forget; dead senders are swept out.
    pub fn broadcast(&self, room_id: &RoomId, message: &ServerMessage) -> usize {
        self.send_where(room_id, message, |_| true)
    }

    /// Broadcast to everyone in the room except one participant.
    pub fn broadcast_except(
        &self,
        room_id: &RoomId,
        except: &ParticipantId,
        message: &ServerMessage,
    ) -> usize {
        self.send_where(room_id, message, |p| p != except)
    }

    /// Send a message to one participant in a room.
    pub fn send_to(
        &self,
        room_id: &RoomId,
        participant: &ParticipantId,
        message: &ServerMessage,
    ) -> bool {
        self.send_where(room_id, message, |p| p == participant) > 0
    }

    fn send_where<F>(&self, room_id: &RoomId, message: &ServerMessage, filter: F) -> usize
    where
        F: Fn(&ParticipantId) -> bool,
    {
        let mut sent = 0;
        let mut dead = Vec::new();

        if let Some(subscribers) = self.rooms.get(room_id) {
            for subscriber in subscribers.iter().filter(|s| filter(&s.participant)) {
                match subscriber.sender.send(message.clone()) {
                    Ok(()) => sent += 1,
                    Err(_) => {
                        warn!(
                            room_id = %room_id,
                            participant = %subscriber.participant,
                            "Failed to send to client, marking for cleanup"
                        );
                        dead.push((subscriber.participant.clone(), subscriber.connection.clone()));
                    }
                }
            }
        }

        for (participant, connection) in dead {
            self.unsubscribe(room_id, &participant, &connection);
        }
        sent
    }

    #[must_use]
    pub fn subscriber_count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map_or(0, |s| s.len())
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
