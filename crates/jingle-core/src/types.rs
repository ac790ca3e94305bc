//! Core types for Jingle negotiation
//!
//! Media types, stream directions and the Jingle `senders`/`creator`
//! roles, together with the direction algebra used when building offers,
//! answering and recovering from hold.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::str::FromStr;

use crate::errors::NegotiationError;

/// Media type of a content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Audio
    Audio,
    /// Video
    Video,
}

impl MediaType {
    /// All media types, audio first
    pub const ALL: [MediaType; 2] = [MediaType::Audio, MediaType::Video];

    /// The wire name of the media type
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = NegotiationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(MediaType::Audio),
            "video" => Ok(MediaType::Video),
            other => Err(NegotiationError::illegal_argument(format!("Unknown media type: {}", other))),
        }
    }
}

/// Media direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaDirection {
    /// No media flow
    Inactive,
    /// Send only
    SendOnly,
    /// Receive only
    RecvOnly,
    /// Send and receive media
    SendRecv,
}

impl MediaDirection {
    /// Build a direction from its send and receive bits
    pub fn from_flags(send: bool, recv: bool) -> Self {
        match (send, recv) {
            (true, true) => MediaDirection::SendRecv,
            (true, false) => MediaDirection::SendOnly,
            (false, true) => MediaDirection::RecvOnly,
            (false, false) => MediaDirection::Inactive,
        }
    }

    /// Whether media may be sent
    pub fn allows_sending(&self) -> bool {
        matches!(self, MediaDirection::SendOnly | MediaDirection::SendRecv)
    }

    /// Whether media may be received
    pub fn allows_receiving(&self) -> bool {
        matches!(self, MediaDirection::RecvOnly | MediaDirection::SendRecv)
    }

    /// Intersection of both directions
    pub fn and(self, other: MediaDirection) -> MediaDirection {
        MediaDirection::from_flags(
            self.allows_sending() && other.allows_sending(),
            self.allows_receiving() && other.allows_receiving(),
        )
    }

    /// Union of both directions
    pub fn or(self, other: MediaDirection) -> MediaDirection {
        MediaDirection::from_flags(
            self.allows_sending() || other.allows_sending(),
            self.allows_receiving() || other.allows_receiving(),
        )
    }

    /// The same stream seen from the other end
    pub fn reverse(self) -> MediaDirection {
        MediaDirection::from_flags(self.allows_receiving(), self.allows_sending())
    }

    /// Direction to answer with when the remote party offered `remote`
    ///
    /// `self` is what the local device and preferences allow; `remote` is
    /// expressed from the remote party's point of view. We send only if we
    /// can send and they can receive, and receive only if we can receive
    /// and they can send.
    pub fn answer_for(self, remote: MediaDirection) -> MediaDirection {
        MediaDirection::from_flags(
            self.allows_sending() && remote.allows_receiving(),
            self.allows_receiving() && remote.allows_sending(),
        )
    }

    /// The SDP-style attribute name
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaDirection::Inactive => "inactive",
            MediaDirection::SendOnly => "sendonly",
            MediaDirection::RecvOnly => "recvonly",
            MediaDirection::SendRecv => "sendrecv",
        }
    }
}

impl Default for MediaDirection {
    fn default() -> Self {
        MediaDirection::SendRecv
    }
}

impl BitAnd for MediaDirection {
    type Output = MediaDirection;

    fn bitand(self, rhs: MediaDirection) -> MediaDirection {
        self.and(rhs)
    }
}

impl BitOr for MediaDirection {
    type Output = MediaDirection;

    fn bitor(self, rhs: MediaDirection) -> MediaDirection {
        self.or(rhs)
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Jingle `senders` attribute of a content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Senders {
    /// Nobody sends
    None,
    /// Only the session initiator sends
    Initiator,
    /// Only the session responder sends
    Responder,
    /// Both parties send
    Both,
}

impl Senders {
    /// Senders value expressing `direction` for the local party
    ///
    /// `local_is_initiator` tells whether the party owning `direction` is
    /// the session initiator.
    pub fn from_direction(direction: MediaDirection, local_is_initiator: bool) -> Senders {
        match direction {
            MediaDirection::SendRecv => Senders::Both,
            MediaDirection::Inactive => Senders::None,
            MediaDirection::SendOnly => {
                if local_is_initiator {
                    Senders::Initiator
                } else {
                    Senders::Responder
                }
            }
            MediaDirection::RecvOnly => {
                if local_is_initiator {
                    Senders::Responder
                } else {
                    Senders::Initiator
                }
            }
        }
    }

    /// Direction of the stream as seen by one party
    ///
    /// With `initiator_perspective` the result is what the initiator
    /// does; otherwise what the responder does.
    pub fn direction(self, initiator_perspective: bool) -> MediaDirection {
        match self {
            Senders::Both => MediaDirection::SendRecv,
            Senders::None => MediaDirection::Inactive,
            Senders::Initiator => {
                if initiator_perspective {
                    MediaDirection::SendOnly
                } else {
                    MediaDirection::RecvOnly
                }
            }
            Senders::Responder => {
                if initiator_perspective {
                    MediaDirection::RecvOnly
                } else {
                    MediaDirection::SendOnly
                }
            }
        }
    }

    /// Whether the party described by `is_initiator` may receive media
    pub fn allows_receiving_for(self, is_initiator: bool) -> bool {
        self.direction(is_initiator).allows_receiving()
    }
}

impl Default for Senders {
    fn default() -> Self {
        Senders::Both
    }
}

impl fmt::Display for Senders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Senders::None => "none",
            Senders::Initiator => "initiator",
            Senders::Responder => "responder",
            Senders::Both => "both",
        };
        write!(f, "{}", s)
    }
}

/// Jingle `creator` attribute of a content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Creator {
    /// Created by the session initiator
    Initiator,
    /// Created by the session responder
    Responder,
}

impl Default for Creator {
    fn default() -> Self {
        Creator::Initiator
    }
}

/// Negotiation role of the local party for the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// We sent session-initiate
    Initiator,
    /// We received session-initiate
    Responder,
}

impl Role {
    /// Whether the local party initiated the session
    pub fn is_initiator(&self) -> bool {
        matches!(self, Role::Initiator)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}
