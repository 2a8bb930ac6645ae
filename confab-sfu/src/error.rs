use thiserror::Error;

use crate::types::{MediaPurpose, ParticipantId, ProducerId, RoomId, TransportId};

#[derive(Error, Debug)]
pub enum SfuError {
    /// A media worker process died. Router state cannot be rebuilt in
    /// place, so this is escalated to process shutdown, never contained.
    #[error("media worker {0} died")]
    WorkerFatal(usize),

    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("transport not found: {0}")]
    TransportNotFound(TransportId),

    #[error("producer not found: {0}")]
    ProducerNotFound(ProducerId),

    /// Secure handshake or codec negotiation failure. Affects one
    /// purpose of one participant only.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// A participant may hold at most one transport per purpose.
    #[error("participant {participant} already has a {purpose} transport")]
    CapacityExceeded {
        participant: ParticipantId,
        purpose: MediaPurpose,
    },

    #[error("room {0} is full")]
    RoomFull(RoomId),
}

impl SfuError {
    /// Stale-id errors are expected races against concurrent cleanup.
    /// Callers treat the operation as a no-op instead of propagating.
    #[must_use]
    pub fn is_benign_race(&self) -> bool {
        matches!(
            self,
            Self::RoomNotFound(_) | Self::TransportNotFound(_) | Self::ProducerNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SfuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_race_classification() {
        assert!(SfuError::RoomNotFound(RoomId::from("r")).is_benign_race());
        assert!(SfuError::TransportNotFound(TransportId::from("t")).is_benign_race());
        assert!(SfuError::ProducerNotFound(ProducerId::from("p")).is_benign_race());
        assert!(!SfuError::WorkerFatal(0).is_benign_race());
        assert!(!SfuError::NegotiationFailed("bad dtls".into()).is_benign_race());
        assert!(!SfuError::CapacityExceeded {
            participant: ParticipantId::from("alice"),
            purpose: MediaPurpose::Voice,
        }
        .is_benign_race());
    }
}
