//! Peer-side orchestration of media links.
//!
//! The orchestrator owns every negotiation this peer has with the
//! relay: one upstream link per local purpose (voice, screen) and one
//! downstream link per remote participant and purpose. It consumes
//! [`ServerMessage`]s from the signaling connection, drives the link
//! state machines, and emits [`PeerEvent`]s for the embedding layer
//! (UI, media engine) to act on. It never touches sockets itself; the
//! embedding layer supplies a [`SignalSink`] for outbound messages.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use confab_sfu::{
    IceCandidate, MediaParameters, MediaPurpose, ParticipantId, RemoteCredentials, SdpType,
};
use confab_signaling::protocol::{
    describe, parse_description, ClientMessage, ConsumeRequestPayload, ConsumerAnswerPayload,
    ConsumerOfferPayload, OfferPayload, ParticipantStatus, ServerMessage, StatusKind,
};

use crate::negotiation::{LinkState, MediaLink, TransitionError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("signaling channel failed: {0}")]
    Signal(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("malformed negotiation payload: {0}")]
    Negotiation(String),
}

/// Outbound signaling transport supplied by the embedding layer.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn send(&self, message: ClientMessage) -> Result<(), ClientError>;
}

/// What this peer is currently sending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalMedia {
    pub audio: bool,
    pub camera: bool,
    pub screen: bool,
}

impl LocalMedia {
    fn voice_parameters(self) -> MediaParameters {
        if self.camera {
            MediaParameters::voice_with_camera()
        } else {
            MediaParameters::voice()
        }
    }
}

/// Externally visible effect of processing a server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    RosterUpdated(Vec<ParticipantId>),
    /// A remote's media became available (or its track set changed).
    RemoteMedia {
        participant: ParticipantId,
        purpose: MediaPurpose,
        media: MediaParameters,
    },
    RemoteMediaClosed {
        participant: ParticipantId,
        purpose: MediaPurpose,
    },
    RemoteStatus {
        participant: ParticipantId,
        kind: StatusKind,
        value: bool,
    },
    /// A connected link received a candidate to apply.
    RemoteCandidate {
        participant: ParticipantId,
        purpose: MediaPurpose,
        candidate: IceCandidate,
    },
    ParticipantLeft(ParticipantId),
    /// An upstream offer/answer exchange finished.
    UpstreamReady(MediaPurpose),
    ServerError(String),
}

pub struct PeerOrchestrator<S: SignalSink> {
    sink: S,
    me: ParticipantId,
    fingerprint: String,
    local: LocalMedia,
    upstream: HashMap<MediaPurpose, MediaLink>,
    downstream: HashMap<(ParticipantId, MediaPurpose), MediaLink>,
    roster: Vec<ParticipantId>,
    remote_status: HashMap<ParticipantId, ParticipantStatus>,
    remote_media: HashMap<(ParticipantId, MediaPurpose), MediaParameters>,
}

impl<S: SignalSink> PeerOrchestrator<S> {
    /// `fingerprint` is this peer's DTLS certificate fingerprint, sent
    /// with every offer and answer.
    pub fn new(me: ParticipantId, fingerprint: String, sink: S) -> Self {
        Self {
            sink,
            me,
            fingerprint,
            local: LocalMedia::default(),
            upstream: HashMap::new(),
            downstream: HashMap::new(),
            roster: Vec::new(),
            remote_status: HashMap::new(),
            remote_media: HashMap::new(),
        }
    }

    #[must_use]
    pub fn local_media(&self) -> LocalMedia {
        self.local
    }

    #[must_use]
    pub fn roster(&self) -> &[ParticipantId] {
        &self.roster
    }

    #[must_use]
    pub fn remote_status(&self, participant: &ParticipantId) -> Option<&ParticipantStatus> {
        self.remote_status.get(participant)
    }

    #[must_use]
    pub fn remote_media(
        &self,
        participant: &ParticipantId,
        purpose: MediaPurpose,
    ) -> Option<MediaParameters> {
        self.remote_media
            .get(&(participant.clone(), purpose))
            .copied()
    }

    /// Start sending microphone audio. Idempotent.
    pub async fn publish_voice(&mut self) -> Result<(), ClientError> {
        if self.local.audio {
            return Ok(());
        }
        self.local.audio = true;
        self.offer_upstream(MediaPurpose::Voice, self.local.voice_parameters())
            .await
    }

    /// Add camera video to the voice link. Triggers an in-place
    /// renegotiation when voice is already connected.
    pub async fn enable_camera(&mut self) -> Result<(), ClientError> {
        if self.local.camera {
            return Ok(());
        }
        self.local.camera = true;
        self.send_status(StatusKind::Video, true).await?;
        if self.local.audio {
            self.offer_upstream(MediaPurpose::Voice, self.local.voice_parameters())
                .await?;
        }
        Ok(())
    }

    pub async fn disable_camera(&mut self) -> Result<(), ClientError> {
        if !self.local.camera {
            return Ok(());
        }
        self.local.camera = false;
        self.send_status(StatusKind::Video, false).await?;
        if self.local.audio {
            self.offer_upstream(MediaPurpose::Voice, self.local.voice_parameters())
                .await?;
        }
        Ok(())
    }

    /// Open the independent screen link and start producing on it.
    pub async fn start_screen_share(&mut self) -> Result<(), ClientError> {
        if self.local.screen {
            return Ok(());
        }
        self.local.screen = true;
        self.send_status(StatusKind::Screen, true).await?;
        self.offer_upstream(MediaPurpose::Screen, MediaParameters::screen())
            .await
    }

    /// The relay tears the screen transport down on the status update;
    /// no local offer is needed.
    pub async fn stop_screen_share(&mut self) -> Result<(), ClientError> {
        if !self.local.screen {
            return Ok(());
        }
        self.local.screen = false;
        if let Some(link) = self.upstream.get_mut(&MediaPurpose::Screen) {
            link.close();
        }
        self.upstream.remove(&MediaPurpose::Screen);
        self.send_status(StatusKind::Screen, false).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<(), ClientError> {
        self.send_status(StatusKind::Mute, muted).await
    }

    pub async fn set_deafened(&self, deafened: bool) -> Result<(), ClientError> {
        self.send_status(StatusKind::Deafen, deafened).await
    }

    /// Forward a speaking edge from the local voice activity detector.
    pub async fn on_speaking_edge(&self, speaking: bool) -> Result<(), ClientError> {
        self.send_status(StatusKind::Speaking, speaking).await
    }

    /// Ask the relay for a remote participant's media. The relay
    /// answers directly when the remote already produces and defers to
    /// a pushed offer otherwise.
    pub async fn request_media(
        &self,
        remote: ParticipantId,
        purpose: MediaPurpose,
    ) -> Result<(), ClientError> {
        self.sink
            .send(ClientMessage::Offer {
                target: remote,
                purpose,
                description: describe(
                    SdpType::Offer,
                    &ConsumeRequestPayload {
                        credentials: RemoteCredentials {
                            dtls_fingerprint: self.fingerprint.clone(),
                        },
                    },
                ),
            })
            .await
    }

    /// Forward a locally gathered ICE candidate for one of our links.
    pub async fn send_local_candidate(
        &self,
        target: ParticipantId,
        purpose: MediaPurpose,
        candidate: IceCandidate,
    ) -> Result<(), ClientError> {
        self.sink
            .send(ClientMessage::IceCandidate {
                target,
                purpose,
                candidate,
            })
            .await
    }

    /// Process one message from the relay and return the effects the
    /// embedding layer should apply.
    pub async fn on_server_message(
        &mut self,
        message: ServerMessage,
    ) -> Result<Vec<PeerEvent>, ClientError> {
        match message {
            ServerMessage::Roster { participants, .. } => {
                let previous = std::mem::take(&mut self.roster);
                self.roster = participants
                    .into_iter()
                    .filter(|p| *p != self.me)
                    .collect();

                // Discovering a new remote initiates a voice consume
                // request; the relay's own pushes cover the reverse
                // ordering, and duplicates reconcile to nothing.
                let newcomers: Vec<ParticipantId> = self
                    .roster
                    .iter()
                    .filter(|p| !previous.contains(p))
                    .cloned()
                    .collect();
                for remote in newcomers {
                    self.request_media(remote, MediaPurpose::Voice).await?;
                }
                Ok(vec![PeerEvent::RosterUpdated(self.roster.clone())])
            }
            ServerMessage::Offer {
                target,
                purpose,
                description,
            } => self.on_consumer_offer(target, purpose, &description).await,
            ServerMessage::Answer {
                target,
                purpose,
                description,
            } => self.on_answer(&target, purpose, &description),
            ServerMessage::IceCandidate {
                target,
                purpose,
                candidate,
            } => Ok(self.on_remote_candidate(target, purpose, candidate)),
            ServerMessage::Status {
                participant,
                kind,
                value,
            } => Ok(self.on_remote_status(participant, kind, value)),
            ServerMessage::ParticipantLeft { participant } => Ok(self.on_left(participant)),
            ServerMessage::Error { message } => {
                warn!(error = %message, "Relay rejected a message");
                Ok(vec![PeerEvent::ServerError(message)])
            }
        }
    }

    /// Relay-pushed offer for a remote participant's media. Answer it
    /// and surface the track set to the embedding layer.
    async fn on_consumer_offer(
        &mut self,
        producer_participant: ParticipantId,
        purpose: MediaPurpose,
        description: &confab_sfu::SessionDescription,
    ) -> Result<Vec<PeerEvent>, ClientError> {
        let payload: ConsumerOfferPayload =
            parse_description(description).map_err(|e| ClientError::Negotiation(e.to_string()))?;

        let key = (producer_participant.clone(), purpose);
        let link = self.downstream.entry(key.clone()).or_default();
        match link.state() {
            LinkState::Absent => link.begin(false)?,
            LinkState::Connected => link.begin_renegotiation(false)?,
            LinkState::Negotiating { .. } => {
                debug!(
                    participant = %producer_participant,
                    purpose = %purpose,
                    "Superseding in-flight downstream negotiation"
                );
            }
            LinkState::Closed => {
                *link = MediaLink::new();
                link.begin(false)?;
            }
        }

        self.sink
            .send(ClientMessage::Answer {
                target: producer_participant.clone(),
                purpose,
                description: describe(
                    SdpType::Answer,
                    &ConsumerAnswerPayload {
                        credentials: RemoteCredentials {
                            dtls_fingerprint: self.fingerprint.clone(),
                        },
                    },
                ),
            })
            .await?;

        // Answering completes the downstream exchange from our side.
        let mut events = Vec::new();
        if let Some(link) = self.downstream.get_mut(&key) {
            for candidate in link.complete()? {
                events.push(PeerEvent::RemoteCandidate {
                    participant: producer_participant.clone(),
                    purpose,
                    candidate,
                });
            }
        }
        self.remote_media.insert(key, payload.media);
        events.push(PeerEvent::RemoteMedia {
            participant: producer_participant,
            purpose,
            media: payload.media,
        });
        Ok(events)
    }

    fn on_answer(
        &mut self,
        target: &ParticipantId,
        purpose: MediaPurpose,
        description: &confab_sfu::SessionDescription,
    ) -> Result<Vec<PeerEvent>, ClientError> {
        if *target != self.me {
            // Answer to a consume request. When the remote already
            // produces it names the consumer now routing its media.
            let Ok(payload) = parse_description::<ConsumerOfferPayload>(description) else {
                return Ok(Vec::new());
            };
            let key = (target.clone(), purpose);
            let link = self.downstream.entry(key.clone()).or_default();
            let mut events = Vec::new();
            if link.state() == LinkState::Absent {
                link.begin(true)?;
                for candidate in link.complete()? {
                    events.push(PeerEvent::RemoteCandidate {
                        participant: target.clone(),
                        purpose,
                        candidate,
                    });
                }
            }
            self.remote_media.insert(key, payload.media);
            events.push(PeerEvent::RemoteMedia {
                participant: target.clone(),
                purpose,
                media: payload.media,
            });
            return Ok(events);
        }
        let link = self
            .upstream
            .get_mut(&purpose)
            .ok_or_else(|| ClientError::Negotiation(format!("no upstream link for {purpose}")))?;
        let mut events: Vec<PeerEvent> = link
            .complete()?
            .into_iter()
            .map(|candidate| PeerEvent::RemoteCandidate {
                participant: self.me.clone(),
                purpose,
                candidate,
            })
            .collect();
        events.push(PeerEvent::UpstreamReady(purpose));
        Ok(events)
    }

    fn on_remote_candidate(
        &mut self,
        target: ParticipantId,
        purpose: MediaPurpose,
        candidate: IceCandidate,
    ) -> Vec<PeerEvent> {
        let link = if target == self.me {
            self.upstream.entry(purpose).or_default()
        } else {
            self.downstream
                .entry((target.clone(), purpose))
                .or_default()
        };
        if link.buffer_candidate(candidate.clone()) {
            return Vec::new();
        }
        vec![PeerEvent::RemoteCandidate {
            participant: target,
            purpose,
            candidate,
        }]
    }

    fn on_remote_status(
        &mut self,
        participant: ParticipantId,
        kind: StatusKind,
        value: bool,
    ) -> Vec<PeerEvent> {
        self.remote_status
            .entry(participant.clone())
            .or_default()
            .apply(kind, value);

        let mut events = vec![PeerEvent::RemoteStatus {
            participant: participant.clone(),
            kind,
            value,
        }];
        if kind == StatusKind::Screen && !value {
            let key = (participant.clone(), MediaPurpose::Screen);
            if let Some(mut link) = self.downstream.remove(&key) {
                link.close();
            }
            if self.remote_media.remove(&key).is_some() {
                events.push(PeerEvent::RemoteMediaClosed {
                    participant,
                    purpose: MediaPurpose::Screen,
                });
            }
        }
        events
    }

    fn on_left(&mut self, participant: ParticipantId) -> Vec<PeerEvent> {
        self.roster.retain(|p| *p != participant);
        self.remote_status.remove(&participant);

        let mut events = Vec::new();
        for purpose in [MediaPurpose::Voice, MediaPurpose::Screen] {
            let key = (participant.clone(), purpose);
            if let Some(mut link) = self.downstream.remove(&key) {
                link.close();
            }
            if self.remote_media.remove(&key).is_some() {
                events.push(PeerEvent::RemoteMediaClosed {
                    participant: participant.clone(),
                    purpose,
                });
            }
        }
        events.push(PeerEvent::ParticipantLeft(participant));
        events
    }

    async fn offer_upstream(
        &mut self,
        purpose: MediaPurpose,
        media: MediaParameters,
    ) -> Result<(), ClientError> {
        let link = self.upstream.entry(purpose).or_default();
        match link.state() {
            LinkState::Absent | LinkState::Closed => {
                if link.state() == LinkState::Closed {
                    *link = MediaLink::new();
                }
                link.begin(true)?;
            }
            LinkState::Connected => link.begin_renegotiation(true)?,
            LinkState::Negotiating { .. } => {
                debug!(purpose = %purpose, "Superseding in-flight upstream negotiation");
            }
        }

        self.sink
            .send(ClientMessage::Offer {
                target: self.me.clone(),
                purpose,
                description: describe(
                    SdpType::Offer,
                    &OfferPayload {
                        credentials: RemoteCredentials {
                            dtls_fingerprint: self.fingerprint.clone(),
                        },
                        media,
                    },
                ),
            })
            .await
    }

    async fn send_status(&self, kind: StatusKind, value: bool) -> Result<(), ClientError> {
        self.sink.send(ClientMessage::Status { kind, value }).await
    }
}
