//! Signaling layer for the media relay.
//!
//! Three pieces:
//! - [`protocol`]: the JSON wire messages exchanged with clients.
//! - [`hub`]: per-room fan-out of server messages to live connections.
//! - [`gateway`]: the dispatcher that turns client messages into relay
//!   operations and pushes negotiation traffic back out.
//!
//! The transport (WebSocket framing, authentication) lives in the
//! server binary; this crate is connection-agnostic and fully testable
//! with in-process channels.

pub mod gateway;
pub mod hub;
pub mod protocol;

pub use gateway::Gateway;
pub use hub::RoomHub;
pub use protocol::{
    consumer_offer, describe, parse_description, AnswerPayload, ClientMessage,
    ConsumeRequestPayload, ConsumerAnswerPayload, ConsumerOfferPayload, OfferPayload,
    ParticipantStatus, ServerMessage, StatusKind,
};
