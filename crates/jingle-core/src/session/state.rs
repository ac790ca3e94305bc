use std::collections::HashMap;

use crate::content::{ContentDescriptor, ContentMap};
use crate::encryption::SrtpControls;
use crate::media::{QualityControl, QualityPreset};
use crate::types::{MediaDirection, MediaType, Role};

/// Everything negotiated with one call peer
///
/// Owned by the [`MediaHandler`](super::MediaHandler); nothing else
/// mutates it.
#[derive(Debug, Clone)]
pub struct CallPeerNegotiationState {
    /// Peer address
    pub peer_id: String,
    /// Local role in the session
    pub role: Role,
    /// Contents we sent, in order
    pub local: ContentMap,
    /// Contents the peer sent, in order
    pub remote: ContentMap,
    /// SRTP keying per media type
    pub encryption: SrtpControls,
    /// We put the peer on hold
    pub locally_on_hold: bool,
    /// The peer put us on hold
    pub remotely_on_hold: bool,
    /// Master stream flag per media type
    pub master: HashMap<MediaType, bool>,
    /// rtcp-mux as negotiated with the peer
    pub rtcp_mux: bool,
    /// The peer's formats carry image attributes
    pub supports_quality_control: bool,
    /// Outgoing video offers accept remote input events
    pub local_input_evt_aware: bool,
    /// Quality presets announced by the peer
    pub quality: QualityControl,
    /// Last harvested local contents, for re-sending
    pub last_transport_snapshot: Option<Vec<ContentDescriptor>>,
    /// Stream directions before local hold
    pub(crate) pre_hold_directions: HashMap<MediaType, MediaDirection>,
    /// Relay channel directions before local hold
    pub(crate) pre_hold_channel_directions: HashMap<MediaType, MediaDirection>,
    /// A remote hold signal arrived while we held the call
    pub(crate) hold_interrupted: bool,
}

impl CallPeerNegotiationState {
    /// Fresh state for a peer
    pub fn new(peer_id: impl Into<String>, role: Role) -> Self {
        Self {
            peer_id: peer_id.into(),
            role,
            local: ContentMap::new(),
            remote: ContentMap::new(),
            encryption: SrtpControls::new(),
            locally_on_hold: false,
            remotely_on_hold: false,
            master: HashMap::new(),
            rtcp_mux: false,
            supports_quality_control: false,
            local_input_evt_aware: false,
            quality: QualityControl::default(),
            last_transport_snapshot: None,
            pre_hold_directions: HashMap::new(),
            pre_hold_channel_directions: HashMap::new(),
            hold_interrupted: false,
        }
    }

    /// Whether we initiated the session
    pub fn is_initiator(&self) -> bool {
        self.role.is_initiator()
    }

    /// Direction of a content from our side
    pub fn local_direction(&self, content: &ContentDescriptor) -> MediaDirection {
        content.direction(self.is_initiator())
    }

    /// Direction of a content from the peer's side
    pub fn remote_direction(&self, content: &ContentDescriptor) -> MediaDirection {
        content.direction(!self.is_initiator())
    }

    /// Whether a media type's stream is the master
    pub fn is_master(&self, media: MediaType) -> bool {
        self.master.get(&media).copied().unwrap_or(false)
    }

    /// Quality ceiling for formats we offer or accept
    pub fn quality_ceiling(&self) -> Option<QualityPreset> {
        self.quality.ceiling()
    }
}
