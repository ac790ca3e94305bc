//! Per call-peer negotiation session
//!
//! [`MediaHandler`] sequences content, encryption and transport
//! negotiation for each Jingle message of one call peer and drives the
//! hold/resume state machine. [`SessionHandle`] runs a handler as an actor
//! so every mutation of the peer's state is serialized through one task.

mod actor;
mod handler;
mod hold;
mod state;

use std::sync::Arc;

use crate::content::PayloadFormat;
use crate::discovery::FeatureDiscovery;
use crate::media::{DeviceProvider, StreamFactory};
use crate::transport::{CandidateHarvester, RelayControl};
use crate::types::MediaType;

pub use actor::{SessionCommand, SessionHandle};
pub use handler::MediaHandler;
pub use state::CallPeerNegotiationState;

/// What the engine needs to know about the call a peer belongs to
pub trait CallContext: Send + Sync {
    /// Whether the local party is the focus of a conference call
    fn is_conference_focus(&self) -> bool;

    /// Whether a participant other than `peer` currently receives `media` from us
    fn other_participants_receiving(&self, peer: &str, media: MediaType) -> bool;

    /// Whether ZRTP may be signaled for this call
    fn zrtp_signaling_allowed(&self) -> bool;

    /// Whether the focus translates RTP of this media type instead of capturing it
    fn rtp_translation_enabled(&self, media: MediaType) -> bool;

    /// Whether the user turned local video transmission on
    fn local_video_transmission_enabled(&self) -> bool;
}

/// User-facing notifications raised by negotiation
pub trait UserNotifier: Send + Sync {
    /// The peer's offer shared no usable content with us
    fn notify_no_matching_format(&self, peer: &str, remote_formats: &[PayloadFormat]);
}

/// Collaborators of a negotiation session
#[derive(Clone)]
pub struct Collaborators {
    /// Local capture/playback devices
    pub devices: Arc<dyn DeviceProvider>,
    /// Media stream factory
    pub streams: Arc<dyn StreamFactory>,
    /// Peer feature discovery
    pub discovery: Arc<dyn FeatureDiscovery>,
    /// Local address harvesting
    pub harvester: Arc<dyn CandidateHarvester>,
    /// The call the peer belongs to
    pub call: Arc<dyn CallContext>,
    /// User notifications
    pub notifier: Arc<dyn UserNotifier>,
    /// Media relay, when the call is relayed through a conference bridge
    pub relay: Option<Arc<dyn RelayControl>>,
}
