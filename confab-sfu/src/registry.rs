//! Room registry
//!
//! Maps room ids to lazily created rooms. A room is created on first
//! join, bound to a router on a worker chosen by the pool's placement
//! policy, and destroyed the instant its participant set becomes
//! empty. Room placement is the only cross-worker shared state; the
//! resolve-or-create operation is atomic through the DashMap entry
//! API.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::SfuConfig;
use crate::error::{Result, SfuError};
use crate::room::Room;
use crate::types::{ParticipantId, RoomId};
use crate::worker::WorkerPool;

/// Room lifecycle events exposed to the presence/UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomLifecycleEvent {
    Created(RoomId),
    Destroyed(RoomId),
}

const LIFECYCLE_CHANNEL_CAPACITY: usize = 64;

pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
    pool: Arc<WorkerPool>,
    max_participants_per_room: usize,
    events: broadcast::Sender<RoomLifecycleEvent>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>, config: &SfuConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Arc::new(Self {
            rooms: DashMap::new(),
            pool,
            max_participants_per_room: config.max_participants_per_room,
            events,
        })
    }

    /// Return the existing room or atomically create one bound to a
    /// worker chosen by the placement policy. Idempotent.
    pub fn resolve_room(&self, room_id: RoomId) -> Result<Arc<Room>> {
        match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(entry) => {
                debug!(room_id = %room_id, "Room already exists");
                Ok(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                let worker = self.pool.pick()?;
                let router = worker.create_router()?;
                let room = Arc::new(Room::new(
                    room_id.clone(),
                    router,
                    self.max_participants_per_room,
                ));
                entry.insert(Arc::clone(&room));
                info!(
                    room_id = %room_id,
                    worker_id = worker.id(),
                    total_rooms = self.rooms.len(),
                    "Created room"
                );
                let _ = self.events.send(RoomLifecycleEvent::Created(room_id));
                Ok(room)
            }
        }
    }

    #[must_use]
    pub fn get(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|r| Arc::clone(r.value()))
    }

    /// Destroy the room and release its router once its participant
    /// set is empty. Must be checked after every removal path. Sealing
    /// and removal happen under the map shard lock, so a join racing
    /// this either lands before the seal or fails with `RoomNotFound`
    /// and resolves a fresh room.
    pub fn release_room_if_empty(&self, room_id: &RoomId) {
        let removed = self
            .rooms
            .remove_if(room_id, |_, room| room.seal_if_vacant());
        if let Some((_, room)) = removed {
            room.router().close();
            let lifetime = chrono::Utc::now() - room.created_at();
            info!(
                room_id = %room_id,
                lifetime_secs = lifetime.num_seconds(),
                remaining_rooms = self.rooms.len(),
                "Destroyed empty room"
            );
            let _ = self
                .events
                .send(RoomLifecycleEvent::Destroyed(room_id.clone()));
        }
    }

    /// Participant ids currently in a room.
    pub async fn roster(&self, room_id: &RoomId) -> Result<Vec<ParticipantId>> {
        let room = self
            .get(room_id)
            .ok_or_else(|| SfuError::RoomNotFound(room_id.clone()))?;
        Ok(room.roster().await)
    }

    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<RoomLifecycleEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RemoteCredentials;
    use crate::types::MediaPurpose;

    fn registry() -> Arc<RoomRegistry> {
        let config = SfuConfig::default();
        RoomRegistry::new(WorkerPool::new(&config), &config)
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let registry = registry();
        let room = registry.resolve_room(RoomId::from("general")).unwrap();
        let again = registry.resolve_room(RoomId::from("general")).unwrap();
        assert!(Arc::ptr_eq(&room, &again));
        assert_eq!(registry.room_count(), 1);
    }

    #[tokio::test]
    async fn test_rooms_spread_across_workers() {
        let registry = registry();
        let a = registry.resolve_room(RoomId::from("a")).unwrap();
        let b = registry.resolve_room(RoomId::from("b")).unwrap();
        // Round-robin placement: consecutive rooms land on different workers.
        assert_ne!(a.router().worker_id(), b.router().worker_id());
    }

    #[tokio::test]
    async fn test_release_only_when_empty() {
        let registry = registry();
        let room = registry.resolve_room(RoomId::from("general")).unwrap();
        let (tid, _) = room
            .create_transport(ParticipantId::from("alice"), MediaPurpose::Voice)
            .await
            .unwrap();

        registry.release_room_if_empty(&RoomId::from("general"));
        assert_eq!(registry.room_count(), 1);

        let _ = room.close_transport(&tid).await;
        registry.release_room_if_empty(&RoomId::from("general"));
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn test_evicted_room_rejects_stale_handle() {
        let registry = registry();
        let stale = registry.resolve_room(RoomId::from("general")).unwrap();
        registry.release_room_if_empty(&RoomId::from("general"));

        // A handle resolved just before eviction cannot admit anyone
        // into the sealed room.
        let err = stale
            .create_transport(ParticipantId::from("bob"), MediaPurpose::Voice)
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::RoomNotFound(_)));

        // The next resolve creates a fresh room under the same id.
        let fresh = registry.resolve_room(RoomId::from("general")).unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        fresh
            .create_transport(ParticipantId::from("bob"), MediaPurpose::Voice)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_release_frees_router_slot() {
        let registry = registry();
        let room = registry.resolve_room(RoomId::from("general")).unwrap();
        let worker_id = room.router().worker_id();
        drop(room);

        registry.release_room_if_empty(&RoomId::from("general"));
        let pool_worker = registry.pool.workers()[worker_id].clone();
        assert_eq!(pool_worker.router_count(), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let registry = registry();
        let mut events = registry.subscribe_events();

        registry.resolve_room(RoomId::from("general")).unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            RoomLifecycleEvent::Created(RoomId::from("general"))
        );

        registry.release_room_if_empty(&RoomId::from("general"));
        assert_eq!(
            events.recv().await.unwrap(),
            RoomLifecycleEvent::Destroyed(RoomId::from("general"))
        );
    }

    #[tokio::test]
    async fn test_roster_of_unknown_room() {
        let registry = registry();
        let err = registry.roster(&RoomId::from("nope")).await.unwrap_err();
        assert!(matches!(err, SfuError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn test_connected_roster() {
        let registry = registry();
        let room = registry.resolve_room(RoomId::from("general")).unwrap();
        let (tid, _) = room
            .create_transport(ParticipantId::from("alice"), MediaPurpose::Voice)
            .await
            .unwrap();
        room.connect_transport(
            &tid,
            RemoteCredentials {
                dtls_fingerprint: "sha-256 AA".to_string(),
            },
        )
        .await
        .unwrap();

        let roster = registry.roster(&RoomId::from("general")).await.unwrap();
        assert_eq!(roster, vec![ParticipantId::from("alice")]);
    }
}
