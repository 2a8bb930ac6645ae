//! Common identifier and media types used throughout the SFU

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id! {
    /// Identifier of a room, supplied by the channel layer
    RoomId
}

string_id! {
    /// Stable per-user identifier, supplied by the auth layer
    ParticipantId
}

string_id! {
    /// Identifier of a transport, generated on creation
    TransportId
}

string_id! {
    /// Identifier of a producer, generated on creation
    ProducerId
}

string_id! {
    /// Identifier of a consumer, generated on creation
    ConsumerId
}

string_id! {
    /// Identifier of a routing domain inside a worker
    RouterId
}

string_id! {
    /// Identifier of one client connection. A participant that
    /// reconnects gets a new one, which is what lets cleanup tell a
    /// superseded socket apart from the live session.
    ConnectionId
}

impl TransportId {
    #[must_use]
    pub fn generate() -> Self {
        Self(nanoid::nanoid!(12))
    }
}

impl ProducerId {
    #[must_use]
    pub fn generate() -> Self {
        Self(nanoid::nanoid!(12))
    }
}

impl ConsumerId {
    #[must_use]
    pub fn generate() -> Self {
        Self(nanoid::nanoid!(12))
    }
}

impl RouterId {
    #[must_use]
    pub fn generate() -> Self {
        Self(nanoid::nanoid!(12))
    }
}

impl ConnectionId {
    #[must_use]
    pub fn generate() -> Self {
        Self(nanoid::nanoid!(12))
    }
}

/// Media role of a transport. Voice and screen-share negotiate as two
/// fully independent streams per participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaPurpose {
    Voice,
    Screen,
}

impl MediaPurpose {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Voice => "voice",
            Self::Screen => "screen",
        }
    }
}

impl fmt::Display for MediaPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of an individual media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}
