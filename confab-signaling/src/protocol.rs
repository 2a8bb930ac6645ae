//! Signaling wire protocol
//!
//! One persistent, bidirectional, ordered message channel per client.
//! Negotiation messages are tagged with the participant whose media
//! the exchange concerns (`target`; the sender's own id on the send
//! side) and a purpose, so voice and screen-share negotiate as two
//! independent streams. Status broadcasts carry absolute values, never
//! deltas, so a missed toggle self-heals on the next broadcast.

use serde::{Deserialize, Serialize};

use confab_sfu::{
    ConnectionParameters, IceCandidate, MediaParameters, ParticipantId, ProducerId,
    MediaPurpose, NewConsumer, RemoteCredentials, RoomId, SdpType, SessionDescription, SfuError,
};

/// Presence-style state kinds carried by status broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Mute,
    Deafen,
    Video,
    Screen,
    Speaking,
}

/// Messages sent by a client over its signaling channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinRoom {
        room_id: RoomId,
        participant_id: ParticipantId,
    },
    LeaveRoom {
        room_id: RoomId,
    },
    Offer {
        target: ParticipantId,
        purpose: MediaPurpose,
        description: SessionDescription,
    },
    Answer {
        target: ParticipantId,
        purpose: MediaPurpose,
        description: SessionDescription,
    },
    IceCandidate {
        target: ParticipantId,
        purpose: MediaPurpose,
        candidate: IceCandidate,
    },
    Status {
        kind: StatusKind,
        value: bool,
    },
}

/// Messages pushed to a client over its signaling channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Roster {
        room_id: RoomId,
        participants: Vec<ParticipantId>,
    },
    Offer {
        target: ParticipantId,
        purpose: MediaPurpose,
        description: SessionDescription,
    },
    Answer {
        target: ParticipantId,
        purpose: MediaPurpose,
        description: SessionDescription,
    },
    IceCandidate {
        target: ParticipantId,
        purpose: MediaPurpose,
        candidate: IceCandidate,
    },
    Status {
        participant: ParticipantId,
        kind: StatusKind,
        value: bool,
    },
    ParticipantLeft {
        participant: ParticipantId,
    },
    Error {
        message: String,
    },
}

/// Body of a client's send-side offer: its half of the DTLS handshake
/// plus the track set it wants to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferPayload {
    pub credentials: RemoteCredentials,
    pub media: MediaParameters,
}

/// Body of the relay's answer to a send-side offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub connection: ConnectionParameters,
}

/// Body of a relay-pushed consumer offer: which producer is being
/// delivered and what tracks it carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerOfferPayload {
    pub producer: ProducerId,
    pub producer_participant: ParticipantId,
    pub media: MediaParameters,
}

/// Body of a client's answer to a consumer offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerAnswerPayload {
    pub credentials: RemoteCredentials,
}

/// Body of a client's consume request (offer targeting a remote). The
/// credentials let the relay connect the requester's receive transport
/// when it does not exist yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeRequestPayload {
    pub credentials: RemoteCredentials,
}

/// Build an sdp-like description from a negotiation payload. The body
/// is opaque JSON; the routing core never parses real SDP.
pub fn describe<T: Serialize>(sdp_type: SdpType, payload: &T) -> SessionDescription {
    SessionDescription {
        sdp_type,
        sdp: serde_json::to_string(payload).unwrap_or_default(),
    }
}

/// Parse a description body back into a negotiation payload.
pub fn parse_description<T: for<'de> Deserialize<'de>>(
    description: &SessionDescription,
) -> Result<T, SfuError> {
    serde_json::from_str(&description.sdp)
        .map_err(|e| SfuError::NegotiationFailed(format!("malformed description: {e}")))
}

pub fn consumer_offer(consumer: &NewConsumer) -> ServerMessage {
    ServerMessage::Offer {
        target: consumer.producer_participant.clone(),
        purpose: consumer.purpose,
        description: describe(
            SdpType::Offer,
            &ConsumerOfferPayload {
                producer: consumer.producer.clone(),
                producer_participant: consumer.producer_participant.clone(),
                media: consumer.media,
            },
        ),
    }
}

/// Per-participant presence state. Applying an absolute value twice
/// leaves the state identical to applying it once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantStatus {
    pub muted: bool,
    pub deafened: bool,
    pub video: bool,
    pub screen: bool,
    pub speaking: bool,
}

impl ParticipantStatus {
    /// Apply an absolute status value; returns whether it changed.
    pub fn apply(&mut self, kind: StatusKind, value: bool) -> bool {
        let slot = match kind {
            StatusKind::Mute => &mut self.muted,
            StatusKind::Deafen => &mut self.deafened,
            StatusKind::Video => &mut self.video,
            StatusKind::Screen => &mut self.screen,
            StatusKind::Speaking => &mut self.speaking,
        };
        let changed = *slot != value;
        *slot = value;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_format() {
        let msg = ClientMessage::JoinRoom {
            room_id: RoomId::from("general"),
            participant_id: ParticipantId::from("alice"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"join-room\""));

        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ClientMessage::JoinRoom { .. }));
    }

    #[test]
    fn test_status_wire_format() {
        let msg = ClientMessage::Status {
            kind: StatusKind::Mute,
            value: true,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"kind\":\"mute\""));
    }

    #[test]
    fn test_negotiation_message_tags() {
        let msg = ServerMessage::Offer {
            target: ParticipantId::from("bob"),
            purpose: MediaPurpose::Screen,
            description: SessionDescription {
                sdp_type: SdpType::Offer,
                sdp: "{}".to_string(),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"purpose\":\"screen\""));
        assert!(json.contains("\"target\":\"bob\""));
    }

    #[test]
    fn test_description_payload_roundtrip() {
        let payload = OfferPayload {
            credentials: RemoteCredentials {
                dtls_fingerprint: "sha-256 AA:BB".to_string(),
            },
            media: MediaParameters::voice(),
        };
        let description = describe(SdpType::Offer, &payload);
        let back: OfferPayload = parse_description(&description).unwrap();
        assert_eq!(back.credentials.dtls_fingerprint, "sha-256 AA:BB");
        assert!(back.media.audio);
    }

    #[test]
    fn test_malformed_description_is_negotiation_failure() {
        let description = SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "not json".to_string(),
        };
        let err = parse_description::<OfferPayload>(&description).unwrap_err();
        assert!(matches!(err, SfuError::NegotiationFailed(_)));
    }

    #[test]
    fn test_status_is_monotonic() {
        let mut status = ParticipantStatus::default();
        assert!(status.apply(StatusKind::Mute, true));
        let once = status;
        // Processing mute=true twice leaves state identical.
        assert!(!status.apply(StatusKind::Mute, true));
        assert_eq!(status, once);

        assert!(status.apply(StatusKind::Mute, false));
        assert!(!status.muted);
    }
}
