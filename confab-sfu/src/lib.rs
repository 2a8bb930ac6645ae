//! Confab SFU (Selective Forwarding Unit)
//!
//! This crate implements the media-routing core of the voice/video
//! room service. Each participant sends its media once to the relay,
//! which fans it out to every other participant in the room, avoiding
//! full-mesh peer connections.
//!
//! ## Architecture
//!
//! - **`WorkerPool`**: fixed set of isolated media workers hosting routers
//! - **`RoomRegistry`**: maps room ids to lazily created rooms, one router each
//! - **`Room`**: per-room transport/producer/consumer bookkeeping
//! - **`Transport`**: one secure endpoint per participant per media purpose
//! - **`Producer` / `Consumer`**: the fan-out edges between participants
//!
//! ## Fan-out model
//!
//! Consumer creation is reactive and pairwise: a new producer is
//! reconciled against every participant already in the room, and a
//! newly connected transport is reconciled against every producer
//! already in it. Both orderings converge to exactly one consumer per
//! (producer, receiving participant) pair.

mod config;
mod error;
mod registry;
mod room;
mod transport;
mod types;
mod worker;

pub use config::{SfuConfig, WorkerSelection};
pub use error::{Result, SfuError};
pub use registry::{RoomLifecycleEvent, RoomRegistry};
pub use room::{ClosedConsumer, NewConsumer, Room, TransportClosed};
pub use transport::{
    ConnectionParameters, Consumer, IceCandidate, MediaParameters, Producer, RemoteCredentials,
    SdpType, SessionDescription, Transport, TransportState,
};
pub use types::{
    ConnectionId, ConsumerId, MediaKind, MediaPurpose, ParticipantId, ProducerId, RoomId, RouterId,
    TransportId,
};
pub use worker::{Router, Worker, WorkerPool};
