//! Peer-side building blocks for a relay client.
//!
//! This crate contains the state machines a client embeds, decoupled
//! from any particular transport or media engine:
//! - [`negotiation`]: per-link offer/answer state with candidate
//!   buffering.
//! - [`orchestrator`]: the peer orchestrator that drives every link
//!   this peer holds against the relay.
//! - [`speaking`]: local voice activity detection and remote speaking
//!   indicators.

pub mod negotiation;
pub mod orchestrator;
pub mod speaking;

pub use negotiation::{LinkState, MediaLink, TransitionError};
pub use orchestrator::{ClientError, LocalMedia, PeerEvent, PeerOrchestrator, SignalSink};
pub use speaking::{SpeakingDetector, SpeakingIndicators};
