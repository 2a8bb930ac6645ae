//! Signaling gateway
//!
//! Dispatches each client's signaling messages into the SFU manager
//! and pushes the resulting negotiation and status traffic back out
//! through the room hub. The relay terminates every negotiation: the
//! `target` on a negotiation message names the participant whose media
//! the exchange concerns, and the sender's own id marks the send side.
//!
//! Entity-not-found errors inside dispatch are benign races against
//! concurrent cleanup and are recovered as no-ops. Negotiation and
//! capacity failures are surfaced only to the offending client.

use std::sync::Arc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use confab_sfu::{
    ConnectionId, MediaPurpose, NewConsumer, ParticipantId, Result, RoomId, RoomRegistry, SdpType,
    SessionDescription, SfuError, TransportId, TransportState,
};

use crate::protocol::{
    consumer_offer, describe, parse_description, AnswerPayload, ClientMessage,
    ConsumeRequestPayload, ConsumerAnswerPayload, OfferPayload, ParticipantStatus, ServerMessage,
    StatusKind,
};

pub struct Gateway {
    registry: Arc<RoomRegistry>,
    hub: crate::hub::RoomHub,
    status: DashMap<(RoomId, ParticipantId), ParticipantStatus>,
}

impl Gateway {
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            hub: crate::hub::RoomHub::new(),
            status: DashMap::new(),
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Enter a room: resolve it, pre-create the voice transport,
    /// subscribe the connection, and broadcast the updated roster.
    /// Returns the receiver the connection task drains.
    pub async fn join(
        &self,
        room_id: RoomId,
        participant: ParticipantId,
        connection: ConnectionId,
    ) -> Result<mpsc::UnboundedReceiver<ServerMessage>> {
        let room = loop {
            let room = self.registry.resolve_room(room_id.clone())?;
            match room
                .create_transport(participant.clone(), MediaPurpose::Voice)
                .await
            {
                Ok(_) => break room,
                // A quick reconnect can find the previous transport
                // still alive; the connection simply reattaches to it.
                Err(SfuError::CapacityExceeded { .. }) => {
                    debug!(room_id = %room_id, participant = %participant, "Rejoining existing transport");
                    break room;
                }
                // Lost the race against eviction of a vacated room.
                // The entry is gone from the registry, so the next
                // resolve creates a fresh one.
                Err(SfuError::RoomNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        };

        let rx = self
            .hub
            .subscribe(room_id.clone(), participant.clone(), connection);
        let roster = room.roster().await;
        info!(
            room_id = %room_id,
            participant = %participant,
            participants = roster.len(),
            "Participant joined room"
        );
        self.hub.broadcast(
            &room_id,
            &ServerMessage::Roster {
                room_id: room_id.clone(),
                participants: roster,
            },
        );
        Ok(rx)
    }

    /// Dispatch one signaling message from a connected client. Only
    /// worker death propagates; everything else is handled in place.
    pub async fn handle_message(
        &self,
        room_id: &RoomId,
        participant: &ParticipantId,
        message: ClientMessage,
    ) -> Result<()> {
        let outcome = match message {
            ClientMessage::JoinRoom { .. } => Ok(()), // handled at connection setup
            // The connection layer drives the leave, keyed by its own
            // connection id; see `handle_disconnect`.
            ClientMessage::LeaveRoom { .. } => Ok(()),
            ClientMessage::Offer {
                target,
                purpose,
                description,
            } => self.on_offer(room_id, participant, &target, purpose, &description).await,
            ClientMessage::Answer {
                target,
                purpose,
                description,
            } => self.on_answer(room_id, participant, &target, purpose, &description).await,
            ClientMessage::IceCandidate {
                purpose, candidate, ..
            } => self.on_ice_candidate(room_id, participant, purpose, candidate).await,
            ClientMessage::Status { kind, value } => {
                self.on_status(room_id, participant, kind, value).await
            }
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(e) if e.is_benign_race() => {
                debug!(
                    room_id = %room_id,
                    participant = %participant,
                    error = %e,
                    "Ignoring stale-entity race"
                );
                Ok(())
            }
            Err(e @ SfuError::WorkerFatal(_)) => Err(e),
            Err(e) => {
                warn!(
                    room_id = %room_id,
                    participant = %participant,
                    error = %e,
                    "Rejected signaling message"
                );
                self.hub.send_to(
                    room_id,
                    participant,
                    &ServerMessage::Error {
                        message: e.to_string(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Explicit leave and abrupt connection loss take the same path:
    /// close both purpose transports (cascading), announce the
    /// departure, and release the room if it emptied. Keyed by the
    /// connection id, so the late close of a socket superseded by a
    /// reconnect leaves the rejoined session intact.
    pub async fn handle_disconnect(
        &self,
        room_id: &RoomId,
        participant: &ParticipantId,
        connection: &ConnectionId,
    ) {
        if !self.hub.unsubscribe(room_id, participant, connection) {
            debug!(
                room_id = %room_id,
                participant = %participant,
                connection = %connection,
                "Superseded connection closed, session kept"
            );
            return;
        }
        let Some(room) = self.registry.get(room_id) else {
            return;
        };

        let mut room_empty = false;
        for purpose in [MediaPurpose::Voice, MediaPurpose::Screen] {
            if let Some(tid) = room.transport_of(participant, purpose).await {
                if let Some(closed) = room.close_transport(&tid).await {
                    room_empty = closed.room_empty;
                }
            }
        }

        self.status
            .remove(&(room_id.clone(), participant.clone()));
        self.hub.broadcast(
            room_id,
            &ServerMessage::ParticipantLeft {
                participant: participant.clone(),
            },
        );
        info!(room_id = %room_id, participant = %participant, "Participant left room");

        if room_empty {
            self.registry.release_room_if_empty(room_id);
        }
    }

    async fn on_offer(
        &self,
        room_id: &RoomId,
        participant: &ParticipantId,
        target: &ParticipantId,
        purpose: MediaPurpose,
        description: &SessionDescription,
    ) -> Result<()> {
        let room = self
            .registry
            .get(room_id)
            .ok_or_else(|| SfuError::RoomNotFound(room_id.clone()))?;

        if target == participant {
            // Send side: connect the purpose transport and start (or
            // renegotiate) producing.
            let payload: OfferPayload = parse_description(description)?;
            let tid = match room.transport_of(participant, purpose).await {
                Some(tid) => tid,
                None => {
                    let (tid, _) = room.create_transport(participant.clone(), purpose).await?;
                    tid
                }
            };
            room.connect_transport(&tid, payload.credentials).await?;

            let created = match room.producer_of(participant, purpose).await {
                // Renegotiation: the track set changes in place and the
                // surviving consumers are re-offered to their receivers.
                Some((producer_id, _)) => room.update_producer(&producer_id, payload.media).await?,
                None => {
                    let (_, created) = room.produce(&tid, payload.media).await?;
                    created
                }
            };
            self.push_consumer_offers(room_id, &created);

            let connection = room.connection_parameters(&tid).await?;
            self.hub.send_to(
                room_id,
                participant,
                &ServerMessage::Answer {
                    target: participant.clone(),
                    purpose,
                    description: describe(SdpType::Answer, &AnswerPayload { connection }),
                },
            );

            // The sender's transport just became ready; pull in any
            // producers that were waiting for it.
            let deferred = room.consume_existing(&tid).await?;
            self.push_consumer_offers(room_id, &deferred);
            Ok(())
        } else {
            // Consume request: the client discovered `target` in the
            // roster and wants its media. The requester's receive
            // transport is created and connected on demand, so a
            // viewer can receive a purpose it never produces on.
            let payload: ConsumeRequestPayload = parse_description(description)?;
            let tid = match room.transport_of(participant, purpose).await {
                Some(tid) => tid,
                None => {
                    let (tid, _) = room.create_transport(participant.clone(), purpose).await?;
                    tid
                }
            };
            room.connect_transport(&tid, payload.credentials).await?;
            let created = room.consume_existing(&tid).await?;
            self.push_consumer_offers(room_id, &created);

            if let Some(consumer) = room.consumer_between(target, participant, purpose).await {
                self.hub.send_to(
                    room_id,
                    participant,
                    &ServerMessage::Answer {
                        target: target.clone(),
                        purpose,
                        description: describe(
                            SdpType::Answer,
                            &crate::protocol::ConsumerOfferPayload {
                                producer: consumer.producer,
                                producer_participant: consumer.producer_participant,
                                media: consumer.media,
                            },
                        ),
                    },
                );
            }
            Ok(())
        }
    }

    /// A client's answer to a relay-pushed consumer offer. The first
    /// answer may also complete the transport handshake for a
    /// participant that never produced (deferred-join case).
    async fn on_answer(
        &self,
        room_id: &RoomId,
        participant: &ParticipantId,
        target: &ParticipantId,
        purpose: MediaPurpose,
        description: &SessionDescription,
    ) -> Result<()> {
        let room = self
            .registry
            .get(room_id)
            .ok_or_else(|| SfuError::RoomNotFound(room_id.clone()))?;
        let tid = room
            .transport_of(participant, purpose)
            .await
            .ok_or_else(|| SfuError::TransportNotFound(TransportId::from("")))?;

        if room.transport_state(&tid).await == Some(TransportState::Created) {
            let payload: ConsumerAnswerPayload = parse_description(description)?;
            room.connect_transport(&tid, payload.credentials).await?;
            let created = room.consume_existing(&tid).await?;
            self.push_consumer_offers(room_id, &created);
        } else {
            debug!(
                room_id = %room_id,
                participant = %participant,
                target = %target,
                purpose = %purpose,
                "Consumer answer acknowledged"
            );
        }
        Ok(())
    }

    async fn on_ice_candidate(
        &self,
        room_id: &RoomId,
        participant: &ParticipantId,
        purpose: MediaPurpose,
        candidate: confab_sfu::IceCandidate,
    ) -> Result<()> {
        let room = self
            .registry
            .get(room_id)
            .ok_or_else(|| SfuError::RoomNotFound(room_id.clone()))?;
        let tid = room
            .transport_of(participant, purpose)
            .await
            .ok_or_else(|| SfuError::TransportNotFound(TransportId::from("")))?;
        room.add_ice_candidate(&tid, candidate).await
    }

    async fn on_status(
        &self,
        room_id: &RoomId,
        participant: &ParticipantId,
        kind: StatusKind,
        value: bool,
    ) -> Result<()> {
        self.status
            .entry((room_id.clone(), participant.clone()))
            .or_default()
            .apply(kind, value);

        // Absolute value, fire-and-forget: a missed broadcast is healed
        // by the next one.
        self.hub.broadcast_except(
            room_id,
            participant,
            &ServerMessage::Status {
                participant: participant.clone(),
                kind,
                value,
            },
        );

        // Screen-share stop tears down the screen media path.
        if kind == StatusKind::Screen && !value {
            if let Some(room) = self.registry.get(room_id) {
                if let Some(tid) = room.transport_of(participant, MediaPurpose::Screen).await {
                    let _ = room.close_transport(&tid).await;
                }
            }
        }
        Ok(())
    }

    /// Current presence state of a participant, if any.
    #[must_use]
    pub fn participant_status(
        &self,
        room_id: &RoomId,
        participant: &ParticipantId,
    ) -> Option<ParticipantStatus> {
        self.status
            .get(&(room_id.clone(), participant.clone()))
            .map(|s| *s)
    }

    fn push_consumer_offers(&self, room_id: &RoomId, created: &[NewConsumer]) {
        for consumer in created {
            self.hub
                .send_to(room_id, &consumer.target, &consumer_offer(consumer));
        }
    }

}
