//! Per-room transport/producer/consumer bookkeeping
//!
//! A room exclusively owns all four entity maps; participants hold
//! only ids into them. Every mutation goes through the room's write
//! lock, which is the per-room exclusivity discipline: no two
//! signaling messages for the same room interleave their effects,
//! while different rooms proceed fully in parallel.
//!
//! Fan-out is reactive and pairwise. `produce` reconciles a new
//! producer against every participant already present;
//! `consume_existing` reconciles a newly connected transport against
//! every producer already present. Both orderings converge to exactly
//! one consumer per (producer, receiving participant) pair.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, SfuError};
use crate::transport::{
    ConnectionParameters, Consumer, IceCandidate, MediaParameters, Producer, RemoteCredentials,
    Transport, TransportState,
};
use crate::types::{
    ConsumerId, MediaPurpose, ParticipantId, ProducerId, RoomId, TransportId,
};
use crate::worker::Router;

/// A participant's entry in the room. Non-owning: ids only, used for
/// lookup, never for lifetime control.
#[derive(Debug, Default)]
struct Participant {
    transports: HashMap<MediaPurpose, TransportId>,
    consumers: HashSet<ConsumerId>,
}

#[derive(Debug, Default)]
struct RoomState {
    transports: HashMap<TransportId, Transport>,
    producers: HashMap<ProducerId, Producer>,
    consumers: HashMap<ConsumerId, Consumer>,
    participants: HashMap<ParticipantId, Participant>,
}

/// A consumer created by reconciliation, returned so the caller can
/// signal the receiving participant.
#[derive(Debug, Clone)]
pub struct NewConsumer {
    pub id: ConsumerId,
    pub producer: ProducerId,
    pub producer_participant: ParticipantId,
    /// Participant the media is delivered to
    pub target: ParticipantId,
    pub purpose: MediaPurpose,
    pub media: MediaParameters,
}

/// A consumer removed by cascading cleanup.
#[derive(Debug, Clone)]
pub struct ClosedConsumer {
    pub id: ConsumerId,
    /// Participant that was receiving through it
    pub participant: ParticipantId,
}

/// Result of closing a transport, reported so the caller can broadcast
/// the side effects deterministically.
#[derive(Debug)]
pub struct TransportClosed {
    pub participant: ParticipantId,
    pub purpose: MediaPurpose,
    pub closed_producer: Option<ProducerId>,
    pub closed_consumers: Vec<ClosedConsumer>,
    /// True when this was the participant's last transport
    pub participant_removed: bool,
    /// True when the participant set became empty
    pub room_empty: bool,
}

/// Occupancy value marking a room sealed by registry eviction.
const SEALED: usize = usize::MAX;

/// One room bound to one router on one worker.
pub struct Room {
    id: RoomId,
    router: Router,
    max_participants: usize,
    created_at: DateTime<Utc>,
    /// Participant count mirrored outside the state lock, or [`SEALED`]
    /// once the registry has evicted the room. Admission and eviction
    /// race through compare-and-swap on this value, never through the
    /// async lock.
    occupancy: AtomicUsize,
    state: RwLock<RoomState>,
}

impl Room {
    #[must_use]
    pub fn new(id: RoomId, router: Router, max_participants: usize) -> Self {
        Self {
            id,
            router,
            max_participants,
            created_at: Utc::now(),
            occupancy: AtomicUsize::new(0),
            state: RwLock::new(RoomState::default()),
        }
    }

    #[must_use]
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Allocate a new transport for a participant. The participant
    /// entry is created on its first transport.
    pub async fn create_transport(
        &self,
        participant: ParticipantId,
        purpose: MediaPurpose,
    ) -> Result<(TransportId, ConnectionParameters)> {
        let mut state = self.state.write().await;

        if let Some(entry) = state.participants.get(&participant) {
            if entry.transports.contains_key(&purpose) {
                return Err(SfuError::CapacityExceeded {
                    participant,
                    purpose,
                });
            }
        } else {
            if self.max_participants > 0 && state.participants.len() >= self.max_participants {
                return Err(SfuError::RoomFull(self.id.clone()));
            }
            // Reserve the slot against concurrent eviction: fails only
            // when the registry has already sealed the room, in which
            // case the caller must resolve a fresh one.
            if self
                .occupancy
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n != SEALED).then(|| n + 1)
                })
                .is_err()
            {
                return Err(SfuError::RoomNotFound(self.id.clone()));
            }
        }

        let transport = Transport::new(participant.clone(), purpose);
        let transport_id = transport.id.clone();
        let connection = transport.connection.clone();

        state
            .participants
            .entry(participant.clone())
            .or_default()
            .transports
            .insert(purpose, transport_id.clone());
        state.transports.insert(transport_id.clone(), transport);

        debug!(
            room_id = %self.id,
            participant = %participant,
            purpose = %purpose,
            transport_id = %transport_id,
            "Created transport"
        );

        Ok((transport_id, connection))
    }

    /// Complete the secure handshake for a transport.
    pub async fn connect_transport(
        &self,
        transport_id: &TransportId,
        credentials: RemoteCredentials,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let transport = state
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| SfuError::TransportNotFound(transport_id.clone()))?;
        transport.connect(credentials)?;

        debug!(
            room_id = %self.id,
            transport_id = %transport_id,
            "Transport connected"
        );
        Ok(())
    }

    /// Store a trickled remote ICE candidate on a transport.
    pub async fn add_ice_candidate(
        &self,
        transport_id: &TransportId,
        candidate: IceCandidate,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let transport = state
            .transports
            .get_mut(transport_id)
            .ok_or_else(|| SfuError::TransportNotFound(transport_id.clone()))?;
        transport.remote_candidates.push(candidate);
        Ok(())
    }

    /// Register a new media source on a connected transport, then
    /// reconcile it against every other participant with a connected
    /// matching-purpose transport. Pairs whose transport is missing or
    /// unconnected are deferred to [`Room::consume_existing`].
    pub async fn produce(
        &self,
        transport_id: &TransportId,
        media: MediaParameters,
    ) -> Result<(ProducerId, Vec<NewConsumer>)> {
        let mut state = self.state.write().await;
        let transport = state
            .transports
            .get(transport_id)
            .ok_or_else(|| SfuError::TransportNotFound(transport_id.clone()))?;

        if !transport.is_connected() {
            return Err(SfuError::NegotiationFailed(format!(
                "transport {transport_id} is not connected"
            )));
        }
        if transport.producer.is_some() {
            return Err(SfuError::CapacityExceeded {
                participant: transport.participant.clone(),
                purpose: transport.purpose,
            });
        }

        let owner = transport.participant.clone();
        let purpose = transport.purpose;
        let producer = Producer {
            id: ProducerId::generate(),
            transport: transport_id.clone(),
            participant: owner.clone(),
            purpose,
            media,
        };
        let producer_id = producer.id.clone();
        state.producers.insert(producer_id.clone(), producer);
        if let Some(t) = state.transports.get_mut(transport_id) {
            t.producer = Some(producer_id.clone());
        }

        // New-producer reconciliation: scan all current participants.
        let targets: Vec<ParticipantId> = state
            .participants
            .keys()
            .filter(|p| **p != owner)
            .cloned()
            .collect();
        let mut created = Vec::new();
        for target in targets {
            if let Some(consumer) = link_consumer(&mut state, &producer_id, &target) {
                created.push(consumer);
            }
        }

        debug!(
            room_id = %self.id,
            participant = %owner,
            purpose = %purpose,
            producer_id = %producer_id,
            consumers_created = created.len(),
            "Producer registered"
        );

        Ok((producer_id, created))
    }

    /// Update a producer's track set in place (renegotiation, e.g.
    /// camera toggled). Returns the consumers that now carry the
    /// updated tracks so receivers can be re-offered.
    pub async fn update_producer(
        &self,
        producer_id: &ProducerId,
        media: MediaParameters,
    ) -> Result<Vec<NewConsumer>> {
        let mut state = self.state.write().await;
        let producer = state
            .producers
            .get_mut(producer_id)
            .ok_or_else(|| SfuError::ProducerNotFound(producer_id.clone()))?;
        producer.media = media;
        let owner = producer.participant.clone();
        let purpose = producer.purpose;

        let affected = state
            .consumers
            .values()
            .filter(|c| c.producer == *producer_id)
            .map(|c| NewConsumer {
                id: c.id.clone(),
                producer: producer_id.clone(),
                producer_participant: owner.clone(),
                target: c.participant.clone(),
                purpose,
                media,
            })
            .collect();
        Ok(affected)
    }

    /// New-transport reconciliation: walk every producer not owned by
    /// this transport's participant and create the consumers still
    /// missing. Idempotent; never creates a duplicate pair.
    pub async fn consume_existing(&self, transport_id: &TransportId) -> Result<Vec<NewConsumer>> {
        let mut state = self.state.write().await;
        let transport = state
            .transports
            .get(transport_id)
            .ok_or_else(|| SfuError::TransportNotFound(transport_id.clone()))?;
        if !transport.is_connected() {
            return Err(SfuError::NegotiationFailed(format!(
                "transport {transport_id} is not connected"
            )));
        }
        let receiver = transport.participant.clone();
        let purpose = transport.purpose;

        let producer_ids: Vec<ProducerId> = state
            .producers
            .values()
            .filter(|p| p.purpose == purpose && p.participant != receiver)
            .map(|p| p.id.clone())
            .collect();

        let mut created = Vec::new();
        for producer_id in producer_ids {
            if let Some(consumer) = link_consumer(&mut state, &producer_id, &receiver) {
                created.push(consumer);
            }
        }

        if !created.is_empty() {
            debug!(
                room_id = %self.id,
                participant = %receiver,
                purpose = %purpose,
                consumers_created = created.len(),
                "Reconciled pre-existing producers"
            );
        }
        Ok(created)
    }

    /// Close a producer and every consumer derived from it, across all
    /// participants. No-op on an already-closed id.
    pub async fn close_producer(&self, producer_id: &ProducerId) -> Vec<ClosedConsumer> {
        let mut state = self.state.write().await;
        close_producer_locked(&mut state, producer_id)
    }

    /// Close a transport and cascade: consumers delivered through it,
    /// its producer (and that producer's consumers elsewhere), the
    /// participant entry if this was its last transport. Returns `None`
    /// when the id is already closed.
    pub async fn close_transport(&self, transport_id: &TransportId) -> Option<TransportClosed> {
        let mut state = self.state.write().await;
        let mut transport = state.transports.remove(transport_id)?;
        transport.state = TransportState::Closed;

        let participant = transport.participant.clone();
        let purpose = transport.purpose;
        let mut closed_consumers = Vec::new();

        // Inbound consumers delivered through this transport.
        for consumer_id in transport.consumers.iter() {
            if let Some(consumer) = state.consumers.remove(consumer_id) {
                if let Some(entry) = state.participants.get_mut(&consumer.participant) {
                    entry.consumers.remove(consumer_id);
                }
                closed_consumers.push(ClosedConsumer {
                    id: consumer.id,
                    participant: consumer.participant,
                });
            }
        }

        // The outbound producer and its consumers on other transports.
        let closed_producer = transport.producer.clone();
        if let Some(producer_id) = &closed_producer {
            closed_consumers.extend(close_producer_locked(&mut state, producer_id));
        }

        let mut participant_removed = false;
        if let Some(entry) = state.participants.get_mut(&participant) {
            entry.transports.remove(&purpose);
            if entry.transports.is_empty() {
                state.participants.remove(&participant);
                self.occupancy.fetch_sub(1, Ordering::SeqCst);
                participant_removed = true;
            }
        }
        let room_empty = state.participants.is_empty();

        debug!(
            room_id = %self.id,
            participant = %participant,
            purpose = %purpose,
            transport_id = %transport_id,
            closed_consumers = closed_consumers.len(),
            participant_removed,
            room_empty,
            "Transport closed"
        );

        Some(TransportClosed {
            participant,
            purpose,
            closed_producer,
            closed_consumers,
            participant_removed,
            room_empty,
        })
    }

    /// Current participant ids, exposed to the presence/UI layer.
    pub async fn roster(&self) -> Vec<ParticipantId> {
        let state = self.state.read().await;
        let mut roster: Vec<ParticipantId> = state.participants.keys().cloned().collect();
        roster.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        roster
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.participants.is_empty()
    }

    /// Seal the room if no participant occupies it. A sealed room
    /// rejects every later [`Room::create_transport`], so a stale
    /// handle resolved just before eviction cannot join an orphan.
    /// Single compare-and-swap; either this wins or an admission does.
    #[must_use]
    pub fn seal_if_vacant(&self) -> bool {
        self.occupancy
            .compare_exchange(0, SEALED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub async fn participant_count(&self) -> usize {
        self.state.read().await.participants.len()
    }

    /// Transport id a participant holds for a purpose, if any.
    pub async fn transport_of(
        &self,
        participant: &ParticipantId,
        purpose: MediaPurpose,
    ) -> Option<TransportId> {
        let state = self.state.read().await;
        state
            .participants
            .get(participant)
            .and_then(|p| p.transports.get(&purpose))
            .cloned()
    }

    pub async fn transport_state(&self, transport_id: &TransportId) -> Option<TransportState> {
        let state = self.state.read().await;
        state.transports.get(transport_id).map(|t| t.state)
    }

    pub async fn connection_parameters(
        &self,
        transport_id: &TransportId,
    ) -> Result<ConnectionParameters> {
        let state = self.state.read().await;
        state
            .transports
            .get(transport_id)
            .map(|t| t.connection.clone())
            .ok_or_else(|| SfuError::TransportNotFound(transport_id.clone()))
    }

    /// The producer a participant currently holds for a purpose.
    pub async fn producer_of(
        &self,
        participant: &ParticipantId,
        purpose: MediaPurpose,
    ) -> Option<(ProducerId, MediaParameters)> {
        let state = self.state.read().await;
        state
            .producers
            .values()
            .find(|p| p.participant == *participant && p.purpose == purpose)
            .map(|p| (p.id.clone(), p.media))
    }

    /// The consumer routing a given participant's producer to a
    /// receiving participant, if it exists.
    pub async fn consumer_between(
        &self,
        producer_participant: &ParticipantId,
        receiver: &ParticipantId,
        purpose: MediaPurpose,
    ) -> Option<NewConsumer> {
        let state = self.state.read().await;
        state
            .consumers
            .values()
            .find(|c| {
                c.producer_participant == *producer_participant
                    && c.participant == *receiver
                    && c.purpose == purpose
            })
            .map(|c| {
                let media = state
                    .producers
                    .get(&c.producer)
                    .map(|p| p.media)
                    .unwrap_or(MediaParameters {
                        audio: false,
                        video: false,
                    });
                NewConsumer {
                    id: c.id.clone(),
                    producer: c.producer.clone(),
                    producer_participant: c.producer_participant.clone(),
                    target: c.participant.clone(),
                    purpose: c.purpose,
                    media,
                }
            })
    }

    #[cfg(test)]
    pub(crate) async fn consumer_count(&self) -> usize {
        self.state.read().await.consumers.len()
    }
}

/// Create the consumer routing `producer_id` to `target`'s
/// matching-purpose transport, unless the pair already exists or the
/// target transport is missing or unconnected (deferred case).
fn link_consumer(
    state: &mut RoomState,
    producer_id: &ProducerId,
    target: &ParticipantId,
) -> Option<NewConsumer> {
    let producer = state.producers.get(producer_id)?;
    // A participant never consumes its own producer.
    if producer.participant == *target {
        return None;
    }
    let purpose = producer.purpose;
    let owner = producer.participant.clone();
    let media = producer.media;

    let exists = state
        .consumers
        .values()
        .any(|c| c.producer == *producer_id && c.participant == *target);
    if exists {
        return None;
    }

    let transport_id = state
        .participants
        .get(target)
        .and_then(|p| p.transports.get(&purpose))
        .cloned()?;
    let transport = state.transports.get_mut(&transport_id)?;
    if !transport.is_connected() {
        return None;
    }

    let consumer = Consumer {
        id: ConsumerId::generate(),
        producer: producer_id.clone(),
        producer_participant: owner.clone(),
        transport: transport_id,
        participant: target.clone(),
        purpose,
    };
    let id = consumer.id.clone();
    transport.consumers.insert(id.clone());
    if let Some(entry) = state.participants.get_mut(target) {
        entry.consumers.insert(id.clone());
    }
    state.consumers.insert(id.clone(), consumer);

    Some(NewConsumer {
        id,
        producer: producer_id.clone(),
        producer_participant: owner,
        target: target.clone(),
        purpose,
        media,
    })
}

fn close_producer_locked(state: &mut RoomState, producer_id: &ProducerId) -> Vec<ClosedConsumer> {
    let Some(producer) = state.producers.remove(producer_id) else {
        return Vec::new();
    };
    if let Some(transport) = state.transports.get_mut(&producer.transport) {
        transport.producer = None;
    }

    let derived: Vec<ConsumerId> = state
        .consumers
        .values()
        .filter(|c| c.producer == *producer_id)
        .map(|c| c.id.clone())
        .collect();

    let mut closed = Vec::new();
    for consumer_id in derived {
        if let Some(consumer) = state.consumers.remove(&consumer_id) {
            if let Some(transport) = state.transports.get_mut(&consumer.transport) {
                transport.consumers.remove(&consumer_id);
            }
            if let Some(entry) = state.participants.get_mut(&consumer.participant) {
                entry.consumers.remove(&consumer_id);
            }
            closed.push(ClosedConsumer {
                id: consumer.id,
                participant: consumer.participant,
            });
        }
    }
    closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SfuConfig;
    use crate::worker::WorkerPool;

    fn credentials() -> RemoteCredentials {
        RemoteCredentials {
            dtls_fingerprint: "sha-256 AA:BB:CC".to_string(),
        }
    }

    async fn test_room() -> Room {
        let pool = WorkerPool::new(&SfuConfig::default());
        let worker = pool.pick().unwrap();
        Room::new(RoomId::from("general"), worker.create_router().unwrap(), 0)
    }

    /// Join a participant: create + connect the voice transport.
    async fn join_voice(room: &Room, who: &str) -> TransportId {
        let (tid, _) = room
            .create_transport(ParticipantId::from(who), MediaPurpose::Voice)
            .await
            .unwrap();
        room.connect_transport(&tid, credentials()).await.unwrap();
        tid
    }

    #[tokio::test]
    async fn test_duplicate_purpose_transport_rejected() {
        let room = test_room().await;
        room.create_transport(ParticipantId::from("alice"), MediaPurpose::Voice)
            .await
            .unwrap();
        let err = room
            .create_transport(ParticipantId::from("alice"), MediaPurpose::Voice)
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::CapacityExceeded { .. }));

        // A different purpose is fine.
        room.create_transport(ParticipantId::from("alice"), MediaPurpose::Screen)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sealed_room_rejects_admission() {
        let room = test_room().await;
        assert!(room.seal_if_vacant());
        let err = room
            .create_transport(ParticipantId::from("alice"), MediaPurpose::Voice)
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn test_seal_fails_while_occupied() {
        let room = test_room().await;
        let tid = join_voice(&room, "alice").await;
        assert!(!room.seal_if_vacant());

        // Still joinable after the failed seal.
        let (screen_tid, _) = room
            .create_transport(ParticipantId::from("alice"), MediaPurpose::Screen)
            .await
            .unwrap();
        let _ = room.close_transport(&screen_tid).await;
        let _ = room.close_transport(&tid).await;

        assert!(room.seal_if_vacant());
    }

    #[tokio::test]
    async fn test_connect_stale_transport_fails() {
        let room = test_room().await;
        let err = room
            .connect_transport(&TransportId::from("stale"), credentials())
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::TransportNotFound(_)));
        assert!(err.is_benign_race());
    }

    #[tokio::test]
    async fn test_produce_requires_connected_transport() {
        let room = test_room().await;
        let (tid, _) = room
            .create_transport(ParticipantId::from("alice"), MediaPurpose::Voice)
            .await
            .unwrap();
        let err = room
            .produce(&tid, MediaParameters::voice())
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::NegotiationFailed(_)));
    }

    #[tokio::test]
    async fn test_second_producer_on_transport_rejected() {
        let room = test_room().await;
        let tid = join_voice(&room, "alice").await;
        room.produce(&tid, MediaParameters::voice()).await.unwrap();
        let err = room
            .produce(&tid, MediaParameters::voice())
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::CapacityExceeded { .. }));
    }

    /// A joins and produces, then B joins and produces. B's produce
    /// fans out B->A, and B's transport reconciles against A's
    /// pre-existing producer for A->B. Exactly one consumer each way.
    #[tokio::test]
    async fn test_pairwise_fanout_join_then_produce() {
        let room = test_room().await;
        let alice = ParticipantId::from("alice");
        let bob = ParticipantId::from("bob");

        let alice_tid = join_voice(&room, "alice").await;
        let (_, consumers) = room
            .produce(&alice_tid, MediaParameters::voice())
            .await
            .unwrap();
        // No one else present yet.
        assert!(consumers.is_empty());

        let bob_tid = join_voice(&room, "bob").await;
        // B's produce fans out B -> A.
        let (_, consumers) = room
            .produce(&bob_tid, MediaParameters::voice())
            .await
            .unwrap();
        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].producer_participant, bob);
        assert_eq!(consumers[0].target, alice);

        // B's transport reconciles against A's pre-existing producer.
        let consumers = room.consume_existing(&bob_tid).await.unwrap();
        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].producer_participant, alice);
        assert_eq!(consumers[0].target, bob);

        // Exactly one consumer each way, and reconciliation is idempotent.
        assert_eq!(room.consumer_count().await, 2);
        assert!(room.consume_existing(&bob_tid).await.unwrap().is_empty());
        assert!(room.consume_existing(&alice_tid).await.unwrap().is_empty());
        assert_eq!(room.consumer_count().await, 2);

        assert_eq!(room.roster().await, vec![alice, bob]);
    }

    #[tokio::test]
    async fn test_no_self_consume() {
        let room = test_room().await;
        let tid = join_voice(&room, "alice").await;
        let (_, consumers) = room.produce(&tid, MediaParameters::voice()).await.unwrap();
        assert!(consumers.is_empty());
        let consumers = room.consume_existing(&tid).await.unwrap();
        assert!(consumers.is_empty());
    }

    /// Screen share leaves voice consumers untouched: the new screen
    /// producer reconciles only against screen transports.
    #[tokio::test]
    async fn test_screen_share_is_independent() {
        let room = test_room().await;
        let alice_tid = join_voice(&room, "alice").await;
        let bob_tid = join_voice(&room, "bob").await;
        room.produce(&alice_tid, MediaParameters::voice())
            .await
            .unwrap();
        room.produce(&bob_tid, MediaParameters::voice())
            .await
            .unwrap();
        room.consume_existing(&bob_tid).await.unwrap();
        assert_eq!(room.consumer_count().await, 2);

        // Screen consumers ride the screen transport, so B needs one.
        let (bob_screen, _) = room
            .create_transport(ParticipantId::from("bob"), MediaPurpose::Screen)
            .await
            .unwrap();
        room.connect_transport(&bob_screen, credentials())
            .await
            .unwrap();

        let (alice_screen, _) = room
            .create_transport(ParticipantId::from("alice"), MediaPurpose::Screen)
            .await
            .unwrap();
        room.connect_transport(&alice_screen, credentials())
            .await
            .unwrap();
        let (_, consumers) = room
            .produce(&alice_screen, MediaParameters::screen())
            .await
            .unwrap();

        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].purpose, MediaPurpose::Screen);
        assert_eq!(consumers[0].target, ParticipantId::from("bob"));
        // 2 voice + 1 screen
        assert_eq!(room.consumer_count().await, 3);
    }

    /// Closing a transport cascades to its producer, every derived
    /// consumer, and the participant entry when it was the last one.
    #[tokio::test]
    async fn test_close_transport_cascades() {
        let room = test_room().await;
        let alice_tid = join_voice(&room, "alice").await;
        let bob_tid = join_voice(&room, "bob").await;
        room.produce(&alice_tid, MediaParameters::voice())
            .await
            .unwrap();
        room.produce(&bob_tid, MediaParameters::voice())
            .await
            .unwrap();
        room.consume_existing(&bob_tid).await.unwrap();
        assert_eq!(room.consumer_count().await, 2);

        let closed = room.close_transport(&alice_tid).await.unwrap();
        assert!(closed.closed_producer.is_some());
        // Both directions die with the transport: the consumer feeding
        // alice and the consumer of alice's producer on bob's side.
        assert_eq!(closed.closed_consumers.len(), 2);
        assert!(closed.participant_removed);
        assert!(!closed.room_empty);

        assert_eq!(room.consumer_count().await, 0);
        assert_eq!(room.roster().await, vec![ParticipantId::from("bob")]);

        let closed = room.close_transport(&bob_tid).await.unwrap();
        assert!(closed.participant_removed);
        assert!(closed.room_empty);
        assert!(room.is_empty().await);
    }

    #[tokio::test]
    async fn test_participant_survives_until_last_transport() {
        let room = test_room().await;
        let voice_tid = join_voice(&room, "alice").await;
        let (screen_tid, _) = room
            .create_transport(ParticipantId::from("alice"), MediaPurpose::Screen)
            .await
            .unwrap();

        let closed = room.close_transport(&screen_tid).await.unwrap();
        assert!(!closed.participant_removed);
        assert_eq!(room.participant_count().await, 1);

        let closed = room.close_transport(&voice_tid).await.unwrap();
        assert!(closed.participant_removed);
        assert!(closed.room_empty);
    }

    #[tokio::test]
    async fn test_close_operations_are_idempotent() {
        let room = test_room().await;
        let tid = join_voice(&room, "alice").await;
        let (pid, _) = room.produce(&tid, MediaParameters::voice()).await.unwrap();

        // First close removes the producer; the second is a no-op.
        room.close_producer(&pid).await;
        assert!(room
            .producer_of(&ParticipantId::from("alice"), MediaPurpose::Voice)
            .await
            .is_none());
        assert!(room.close_producer(&pid).await.is_empty());

        assert!(room.close_transport(&tid).await.is_some());
        assert!(room.close_transport(&tid).await.is_none());
    }

    #[tokio::test]
    async fn test_close_producer_leaves_transport_open() {
        let room = test_room().await;
        let tid = join_voice(&room, "alice").await;
        let (pid, _) = room.produce(&tid, MediaParameters::voice()).await.unwrap();

        room.close_producer(&pid).await;
        assert_eq!(
            room.transport_state(&tid).await,
            Some(TransportState::Connected)
        );
        // The slot is free again.
        room.produce(&tid, MediaParameters::voice()).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_ids_do_not_disturb_state() {
        let room = test_room().await;
        let tid = join_voice(&room, "alice").await;
        room.produce(&tid, MediaParameters::voice()).await.unwrap();

        assert!(room
            .add_ice_candidate(
                &TransportId::from("stale"),
                IceCandidate {
                    candidate: "candidate:1".to_string(),
                    sdp_mid: None,
                    sdp_mline_index: None,
                },
            )
            .await
            .is_err());
        assert!(room.close_transport(&TransportId::from("stale")).await.is_none());
        assert!(room
            .close_producer(&ProducerId::from("stale"))
            .await
            .is_empty());

        // Unrelated state is untouched.
        assert_eq!(room.participant_count().await, 1);
        assert!(room
            .producer_of(&ParticipantId::from("alice"), MediaPurpose::Voice)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_update_producer_reports_consumers() {
        let room = test_room().await;
        let alice_tid = join_voice(&room, "alice").await;
        let bob_tid = join_voice(&room, "bob").await;
        let (pid, _) = room
            .produce(&alice_tid, MediaParameters::voice())
            .await
            .unwrap();
        room.consume_existing(&bob_tid).await.unwrap();

        let affected = room
            .update_producer(&pid, MediaParameters::voice_with_camera())
            .await
            .unwrap();
        assert_eq!(affected.len(), 1);
        assert_eq!(affected[0].target, ParticipantId::from("bob"));
        assert!(affected[0].media.video);

        let (_, media) = room
            .producer_of(&ParticipantId::from("alice"), MediaPurpose::Voice)
            .await
            .unwrap();
        assert!(media.audio && media.video);
    }

    #[tokio::test]
    async fn test_room_full() {
        let pool = WorkerPool::new(&SfuConfig::default());
        let worker = pool.pick().unwrap();
        let room = Room::new(RoomId::from("tiny"), worker.create_router().unwrap(), 1);

        room.create_transport(ParticipantId::from("alice"), MediaPurpose::Voice)
            .await
            .unwrap();
        let err = room
            .create_transport(ParticipantId::from("bob"), MediaPurpose::Voice)
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::RoomFull(_)));
    }
}
