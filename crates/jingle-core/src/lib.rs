//! # Jingle-Core: Jingle RTP session negotiation
//!
//! Negotiation engine for Jingle (XEP-0166/0167) audio and video calls. For
//! each call peer it builds and answers content offers, chooses an SRTP
//! keying protocol, drives the ICE-UDP or raw UDP transport, optionally
//! through a conference relay, and runs the hold/resume state machine.
//!
//! ## Layers
//!
//! - [`negotiation`]: format and header extension intersection, offer
//!   direction, master stream selection
//! - [`encryption`]: DTLS-SRTP, SDES and ZRTP, tried in account priority order
//! - [`transport`]: once-only method selection, candidate harvesting,
//!   connectivity establishment and relay channels
//! - [`session`]: the per-peer [`MediaHandler`] and its [`SessionHandle`] actor
//!
//! Signaling, media capture and the relay protocol stay outside the crate;
//! they are reached through the traits in [`media`], [`discovery`],
//! [`transport`] and [`session`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_jingle_core::prelude::*;
//!
//! # async fn example(collaborators: Collaborators) -> Result<()> {
//! let config = Arc::new(NegotiationConfig::default());
//! let handler = MediaHandler::new("juliet@capulet.lit/balcony", Role::Initiator, config, collaborators);
//! let session = SessionHandle::spawn(handler);
//!
//! // contents for the session-initiate
//! let offer = session.create_content_list().await?;
//! # let _ = offer;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod content;
pub mod discovery;
pub mod encryption;
pub mod errors;
pub mod logging;
pub mod media;
pub mod negotiation;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

pub use config::{DirectionPreferences, EncryptionConfig, NegotiationConfig, TransportConfig};
pub use content::{ContentDescriptor, ContentMap, PayloadFormat, RtpDescription, RtpExtension, TransportBlock};
pub use encryption::{EncryptionNegotiator, EncryptionProtocol, SrtpControls};
pub use errors::{ErrorCode, NegotiationError, Result};
pub use negotiation::ContentNegotiator;
pub use session::{CallContext, CallPeerNegotiationState, Collaborators, MediaHandler, SessionHandle, UserNotifier};
pub use transport::{TransportMethod, TransportSelector};
pub use types::{Creator, MediaDirection, MediaType, Role, Senders};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Namespaces and well-known names
pub mod constants {
    /// Jingle ICE-UDP transport (XEP-0176)
    pub const NS_JINGLE_ICE_UDP: &str = "urn:xmpp:jingle:transports:ice-udp:1";

    /// Jingle raw UDP transport (XEP-0177)
    pub const NS_JINGLE_RAW_UDP: &str = "urn:xmpp:jingle:transports:raw-udp:1";

    /// DTLS-SRTP in Jingle (XEP-0320)
    pub const NS_JINGLE_DTLS: &str = "urn:xmpp:jingle:apps:dtls:0";

    /// Format parameter carrying image attributes
    pub const IMAGEATTR_PARAMETER: &str = "imageattr";
}

/// Re-export of common types and functions
pub mod prelude {
    pub use super::config::{DirectionPreferences, EncryptionConfig, NegotiationConfig, TransportConfig};
    pub use super::content::{
        Candidate, ContentDescriptor, ContentMap, Fingerprint, PayloadFormat, RtpDescription, RtpExtension,
        TransportBlock,
    };
    pub use super::discovery::{CachedFeatureDiscovery, FeatureDiscovery};
    pub use super::encryption::EncryptionProtocol;
    pub use super::errors::{ErrorCode, NegotiationError, Result};
    pub use super::media::{
        DeviceProvider, MediaDevice, MediaStream, QualityPreset, StreamConnector, StreamFactory, StreamParams,
        StreamTarget,
    };
    pub use super::session::{
        CallContext, CallPeerNegotiationState, Collaborators, MediaHandler, SessionHandle, UserNotifier,
    };
    pub use super::transport::{
        CandidateHarvester, HostCandidateHarvester, RelayControl, TransportMethod, TransportSelector,
    };
    pub use super::types::{Creator, MediaDirection, MediaType, Role, Senders};
}
