//! Transport, producer, and consumer entities
//!
//! A transport is a secure, negotiated network endpoint bound to one
//! participant, one room, and one media purpose. It owns zero or one
//! outbound producer and delivers any number of inbound consumers.
//! All lifetime control happens through the explicit close operations
//! in [`crate::Room`]; these types only carry state.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Result, SfuError};
use crate::types::{
    ConsumerId, MediaKind, MediaPurpose, ParticipantId, ProducerId, TransportId,
};

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP-like description exchanged during negotiation. The body is
/// opaque to the routing core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// ICE candidate for trickle negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Full candidate string
    pub candidate: String,
    /// SDP mid
    pub sdp_mid: Option<String>,
    /// SDP mline index
    pub sdp_mline_index: Option<u32>,
}

/// Server-side negotiation parameters handed to the client so it can
/// complete its half of the ICE/DTLS handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParameters {
    pub ice_ufrag: String,
    pub ice_pwd: String,
    pub dtls_fingerprint: String,
    /// Host candidates of the relay, sent up front rather than trickled
    pub candidates: Vec<IceCandidate>,
}

impl ConnectionParameters {
    fn generate() -> Self {
        Self {
            ice_ufrag: random_token(8),
            ice_pwd: random_token(24),
            dtls_fingerprint: random_fingerprint(),
            candidates: Vec::new(),
        }
    }
}

/// Remote half of the DTLS handshake, supplied by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCredentials {
    pub dtls_fingerprint: String,
}

/// The track set a producer carries. Voice carries audio plus an
/// optional camera track added by renegotiation; screen carries video
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaParameters {
    pub audio: bool,
    pub video: bool,
}

impl MediaParameters {
    #[must_use]
    pub fn voice() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }

    #[must_use]
    pub fn voice_with_camera() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }

    #[must_use]
    pub fn screen() -> Self {
        Self {
            audio: false,
            video: true,
        }
    }

    /// Kinds present in this track set
    #[must_use]
    pub fn kinds(&self) -> Vec<MediaKind> {
        let mut kinds = Vec::new();
        if self.audio {
            kinds.push(MediaKind::Audio);
        }
        if self.video {
            kinds.push(MediaKind::Video);
        }
        kinds
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn random_fingerprint() -> String {
    let bytes: Vec<String> = (0..32)
        .map(|_| format!("{:02X}", rand::thread_rng().gen::<u8>()))
        .collect();
    format!("sha-256 {}", bytes.join(":"))
}

/// Transport lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    /// Allocated, credentials not yet exchanged
    Created,
    /// Secure handshake completed
    Connected,
    /// Closed; the id will never be reused
    Closed,
}

/// A secure media endpoint for one participant and one purpose.
#[derive(Debug)]
pub struct Transport {
    pub id: TransportId,
    pub participant: ParticipantId,
    pub purpose: MediaPurpose,
    pub state: TransportState,
    /// Our side of the handshake, generated at creation
    pub connection: ConnectionParameters,
    /// The client's side, present once connected
    pub remote: Option<RemoteCredentials>,
    /// Remote candidates gathered via trickle
    pub remote_candidates: Vec<IceCandidate>,
    /// The outbound producer on this transport, if any
    pub producer: Option<ProducerId>,
    /// Consumers delivering remote media through this transport
    pub consumers: HashSet<ConsumerId>,
}

impl Transport {
    #[must_use]
    pub fn new(participant: ParticipantId, purpose: MediaPurpose) -> Self {
        Self {
            id: TransportId::generate(),
            participant,
            purpose,
            state: TransportState::Created,
            connection: ConnectionParameters::generate(),
            remote: None,
            remote_candidates: Vec::new(),
            producer: None,
            consumers: HashSet::new(),
        }
    }

    /// Complete the secure handshake. Idempotent once connected.
    pub fn connect(&mut self, credentials: RemoteCredentials) -> Result<()> {
        if credentials.dtls_fingerprint.is_empty() {
            return Err(SfuError::NegotiationFailed(
                "remote DTLS fingerprint is empty".to_string(),
            ));
        }
        if self.state == TransportState::Connected {
            return Ok(());
        }
        self.remote = Some(credentials);
        self.state = TransportState::Connected;
        Ok(())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }
}

/// One outbound media source on a transport.
#[derive(Debug, Clone)]
pub struct Producer {
    pub id: ProducerId,
    pub transport: TransportId,
    pub participant: ParticipantId,
    pub purpose: MediaPurpose,
    pub media: MediaParameters,
}

/// A directed edge delivering one producer to one other participant's
/// transport.
#[derive(Debug, Clone)]
pub struct Consumer {
    pub id: ConsumerId,
    pub producer: ProducerId,
    /// Participant whose media this consumer relays
    pub producer_participant: ParticipantId,
    /// Transport the media is delivered through
    pub transport: TransportId,
    /// Participant receiving the media
    pub participant: ParticipantId,
    pub purpose: MediaPurpose,
}
