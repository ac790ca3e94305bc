//! SRTP keying protocol negotiation
//!
//! Three competing protocols can key SRTP for a content:
//!
//! - [`EncryptionProtocol::Fingerprint`]: DTLS-SRTP, fingerprints in the transport
//! - [`EncryptionProtocol::CryptoAttribute`]: SDES crypto attributes in the description
//! - [`EncryptionProtocol::HandshakeHash`]: ZRTP hello hashes in the description
//!
//! They are tried in the account's priority order and the first one that
//! configures wins for that media type; the state of every other protocol
//! is cleaned up. None of them is negotiated locally when media flows
//! through a relay.

pub mod dtls;
pub mod sdes;
pub mod zrtp;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

use crate::config::EncryptionConfig;
use crate::constants::NS_JINGLE_DTLS;
use crate::content::{ContentDescriptor, DtlsSetup, Fingerprint};
use crate::discovery::FeatureDiscovery;
use crate::errors::Result;
use crate::types::MediaType;

pub use dtls::DtlsControl;
pub use sdes::SdesControl;
pub use zrtp::ZrtpControl;

/// SRTP keying protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionProtocol {
    /// DTLS-SRTP, certificate fingerprints
    Fingerprint,
    /// SDES, crypto attributes
    CryptoAttribute,
    /// ZRTP, handshake hashes
    HandshakeHash,
}

impl fmt::Display for EncryptionProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionProtocol::Fingerprint => write!(f, "DTLS-SRTP"),
            EncryptionProtocol::CryptoAttribute => write!(f, "SDES"),
            EncryptionProtocol::HandshakeHash => write!(f, "ZRTP"),
        }
    }
}

/// Keying state of one media type
///
/// At most one protocol is active. Controls for other protocols may exist
/// while a negotiation round is trying them.
#[derive(Debug, Clone, Default)]
pub struct EncryptionState {
    active: Option<EncryptionProtocol>,
    sdes: Option<SdesControl>,
    dtls: Option<DtlsControl>,
    zrtp: Option<ZrtpControl>,
}

impl EncryptionState {
    /// The protocol that won negotiation
    pub fn active(&self) -> Option<EncryptionProtocol> {
        self.active
    }

    /// SDES control, if configured
    pub fn sdes(&self) -> Option<&SdesControl> {
        self.sdes.as_ref()
    }

    /// DTLS control, if configured
    pub fn dtls(&self) -> Option<&DtlsControl> {
        self.dtls.as_ref()
    }

    /// ZRTP control, if configured
    pub fn zrtp(&self) -> Option<&ZrtpControl> {
        self.zrtp.as_ref()
    }

    /// Whether a control exists for the protocol
    pub fn is_configured(&self, protocol: EncryptionProtocol) -> bool {
        match protocol {
            EncryptionProtocol::Fingerprint => self.dtls.is_some(),
            EncryptionProtocol::CryptoAttribute => self.sdes.is_some(),
            EncryptionProtocol::HandshakeHash => self.zrtp.is_some(),
        }
    }

    fn remove(&mut self, protocol: EncryptionProtocol) {
        match protocol {
            EncryptionProtocol::Fingerprint => {
                if let Some(mut c) = self.dtls.take() {
                    c.cleanup();
                }
            }
            EncryptionProtocol::CryptoAttribute => {
                if let Some(mut c) = self.sdes.take() {
                    c.cleanup();
                }
            }
            EncryptionProtocol::HandshakeHash => {
                if let Some(mut c) = self.zrtp.take() {
                    c.cleanup();
                }
            }
        }
        if self.active == Some(protocol) {
            self.active = None;
        }
    }
}

/// Keying state of every media type of a call peer
#[derive(Debug, Clone, Default)]
pub struct SrtpControls {
    states: HashMap<MediaType, EncryptionState>,
}

impl SrtpControls {
    /// Create empty controls
    pub fn new() -> Self {
        Self::default()
    }

    /// State of a media type, if anything was ever negotiated for it
    pub fn state(&self, media: MediaType) -> Option<&EncryptionState> {
        self.states.get(&media)
    }

    /// Active protocol of a media type
    pub fn active(&self, media: MediaType) -> Option<EncryptionProtocol> {
        self.states.get(&media).and_then(|s| s.active)
    }

    /// Whether a control exists for the protocol and media type
    pub fn is_configured(&self, media: MediaType, protocol: EncryptionProtocol) -> bool {
        self.states
            .get(&media)
            .map(|s| s.is_configured(protocol))
            .unwrap_or(false)
    }

    /// SDES control of a media type, created on first use
    pub fn get_or_create_sdes(&mut self, media: MediaType, suites: &[String]) -> &mut SdesControl {
        self.states
            .entry(media)
            .or_default()
            .sdes
            .get_or_insert_with(|| SdesControl::new(suites.to_vec()))
    }

    /// DTLS control of a media type, created on first use
    pub fn get_or_create_dtls(&mut self, media: MediaType, hash_function: &str) -> Result<&mut DtlsControl> {
        let state = self.states.entry(media).or_default();
        let control = match state.dtls.take() {
            Some(control) => control,
            None => DtlsControl::new(hash_function)?,
        };
        Ok(state.dtls.insert(control))
    }

    /// ZRTP control of a media type, created on first use
    pub fn get_or_create_zrtp(
        &mut self,
        media: MediaType,
        zid: [u8; zrtp::ZID_LENGTH],
        versions: &[String],
    ) -> &mut ZrtpControl {
        self.states
            .entry(media)
            .or_default()
            .zrtp
            .get_or_insert_with(|| ZrtpControl::new(zid, versions.to_vec()))
    }

    /// Mutable SDES control, if configured
    pub fn sdes_mut(&mut self, media: MediaType) -> Option<&mut SdesControl> {
        self.states.get_mut(&media).and_then(|s| s.sdes.as_mut())
    }

    /// Mutable DTLS control, if configured
    pub fn dtls_mut(&mut self, media: MediaType) -> Option<&mut DtlsControl> {
        self.states.get_mut(&media).and_then(|s| s.dtls.as_mut())
    }

    /// Mutable ZRTP control, if configured
    pub fn zrtp_mut(&mut self, media: MediaType) -> Option<&mut ZrtpControl> {
        self.states.get_mut(&media).and_then(|s| s.zrtp.as_mut())
    }

    /// Remove and clean up a protocol's control; no-op when absent
    pub fn remove_and_cleanup(&mut self, media: MediaType, protocol: EncryptionProtocol) {
        if let Some(state) = self.states.get_mut(&media) {
            if state.is_configured(protocol) {
                debug!("Cleaning up {} state for {}", protocol, media);
            }
            state.remove(protocol);
        }
    }

    /// Make a protocol the active one and tear every other one down
    pub fn activate(&mut self, media: MediaType, protocol: EncryptionProtocol) {
        let state = self.states.entry(media).or_default();
        for other in [
            EncryptionProtocol::Fingerprint,
            EncryptionProtocol::CryptoAttribute,
            EncryptionProtocol::HandshakeHash,
        ] {
            if other != protocol {
                state.remove(other);
            }
        }
        state.active = Some(protocol);
    }

    /// Mark the ZRTP stream that drives the session's key agreement
    pub fn set_master(&mut self, media: MediaType, master: bool) {
        if let Some(control) = self.zrtp_mut(media) {
            control.set_master(master);
        }
    }

    /// Clean up every protocol of a media type
    pub fn remove_media(&mut self, media: MediaType) {
        if let Some(mut state) = self.states.remove(&media) {
            for protocol in [
                EncryptionProtocol::Fingerprint,
                EncryptionProtocol::CryptoAttribute,
                EncryptionProtocol::HandshakeHash,
            ] {
                state.remove(protocol);
            }
        }
    }

    /// Clean up everything
    pub fn clear(&mut self) {
        for media in MediaType::ALL {
            self.remove_media(media);
        }
    }
}

/// Per-round view of what the encryption negotiation depends on
pub struct EncryptionNegotiator<'a> {
    config: &'a EncryptionConfig,
    discovery: &'a dyn FeatureDiscovery,
    peer: &'a str,
    account_id: &'a str,
    relay: bool,
    zrtp_allowed: bool,
}

impl<'a> EncryptionNegotiator<'a> {
    /// Create a negotiator for one call peer
    pub fn new(
        config: &'a EncryptionConfig,
        discovery: &'a dyn FeatureDiscovery,
        peer: &'a str,
        account_id: &'a str,
        relay: bool,
        zrtp_allowed: bool,
    ) -> Self {
        Self {
            config,
            discovery,
            peer,
            account_id,
            relay,
            zrtp_allowed,
        }
    }

    /// Pick and configure the preferred protocol for a local content
    ///
    /// `remote` is the peer's offered content when answering, `None` when
    /// building an offer. Protocols are tried in priority order; a
    /// protocol that cannot be configured is cleaned up and the next one
    /// tried. The winner is written into `local` and made active.
    pub fn negotiate(
        &self,
        controls: &mut SrtpControls,
        media: MediaType,
        local: &mut ContentDescriptor,
        remote: Option<&ContentDescriptor>,
    ) -> Result<Option<EncryptionProtocol>> {
        for protocol in &self.config.priority {
            let configured = match protocol {
                EncryptionProtocol::Fingerprint => self.negotiate_fingerprint(controls, media, local, remote)?,
                EncryptionProtocol::CryptoAttribute => self.negotiate_crypto_attribute(controls, media, local, remote)?,
                EncryptionProtocol::HandshakeHash => self.negotiate_handshake_hash(controls, media, local, remote),
            };
            if configured {
                controls.activate(media, *protocol);
                debug!("{} selected for {} with {}", protocol, media, self.peer);
                return Ok(Some(*protocol));
            }
        }
        debug!("No SRTP protocol configured for {} with {}", media, self.peer);
        Ok(None)
    }

    fn negotiate_fingerprint(
        &self,
        controls: &mut SrtpControls,
        media: MediaType,
        local: &ContentDescriptor,
        remote: Option<&ContentDescriptor>,
    ) -> Result<bool> {
        let protocol = EncryptionProtocol::Fingerprint;
        if self.relay || !self.config.is_enabled(protocol) {
            controls.remove_and_cleanup(media, protocol);
            return Ok(false);
        }

        let configured = match remote {
            None => {
                if self.discovery.supports(self.peer, NS_JINGLE_DTLS) {
                    let control = controls.get_or_create_dtls(media, &self.config.fingerprint_hash)?;
                    control.set_setup(DtlsSetup::ActPass);
                    true
                } else {
                    debug!("{} does not advertise DTLS-SRTP", self.peer);
                    false
                }
            }
            Some(remote) => {
                let fingerprints = remote_fingerprints(remote);
                if fingerprints.is_empty() {
                    false
                } else {
                    let control = controls.get_or_create_dtls(media, &self.config.fingerprint_hash)?;
                    control.set_setup(DtlsSetup::Active);
                    control.set_remote_fingerprints(fingerprints);
                    // negotiated for this round, already on our answer
                    control.set_rtcp_mux(local.description.as_ref().map(|d| d.rtcp_mux).unwrap_or(false));
                    true
                }
            }
        };

        if !configured {
            controls.remove_and_cleanup(media, protocol);
        }
        Ok(configured)
    }

    fn negotiate_crypto_attribute(
        &self,
        controls: &mut SrtpControls,
        media: MediaType,
        local: &mut ContentDescriptor,
        remote: Option<&ContentDescriptor>,
    ) -> Result<bool> {
        let protocol = EncryptionProtocol::CryptoAttribute;
        if self.relay || !self.config.is_enabled(protocol) || local.description.is_none() {
            controls.remove_and_cleanup(media, protocol);
            return Ok(false);
        }

        let control = controls.get_or_create_sdes(media, &self.config.sdes_cipher_suites);
        let attributes = match remote {
            None => control.initiator_attributes()?,
            Some(remote) => {
                let peer = remote
                    .description
                    .as_ref()
                    .and_then(|d| d.encryption.as_ref())
                    .map(|e| e.crypto.clone())
                    .unwrap_or_default();
                control.select_attribute(&peer, false)?.into_iter().collect()
            }
        };

        if attributes.is_empty() {
            controls.remove_and_cleanup(media, protocol);
            return Ok(false);
        }
        if let Some(description) = local.description.as_mut() {
            description.encryption_mut().crypto = attributes;
        }
        Ok(true)
    }

    fn negotiate_handshake_hash(
        &self,
        controls: &mut SrtpControls,
        media: MediaType,
        local: &mut ContentDescriptor,
        remote: Option<&ContentDescriptor>,
    ) -> bool {
        let protocol = EncryptionProtocol::HandshakeHash;
        if self.relay || !self.zrtp_allowed || !self.config.is_enabled(protocol) || local.description.is_none() {
            controls.remove_and_cleanup(media, protocol);
            return false;
        }

        // An offer assumes the peer is capable; an answer needs its hash.
        let peer_hash = remote.and_then(|r| {
            r.description
                .as_ref()
                .and_then(|d| d.encryption.as_ref())
                .and_then(|e| e.zrtp_hashes.first().cloned())
        });
        if remote.is_some() && peer_hash.is_none() {
            controls.remove_and_cleanup(media, protocol);
            return false;
        }

        let zid = zrtp::generate_zid(self.account_id, self.peer);
        let control = controls.get_or_create_zrtp(media, zid, &self.config.zrtp_versions);
        if let Some(hash) = peer_hash {
            control.set_peer_hash(hash.version, hash.value);
        }
        let hashes = control.hello_hashes();
        if hashes.is_empty() {
            controls.remove_and_cleanup(media, protocol);
            return false;
        }
        if let Some(description) = local.description.as_mut() {
            description.encryption_mut().zrtp_hashes = hashes;
        }
        true
    }

    /// Confirm which protocol the peer kept in its answer
    ///
    /// Run by the initiator on session-accept and by either side on a
    /// reprocessed content. Advertised peer state is recorded on every
    /// configured control; the first one in priority order the peer
    /// confirmed becomes active.
    pub fn process_answer(
        &self,
        controls: &mut SrtpControls,
        media: MediaType,
        remote: &ContentDescriptor,
        initiator: bool,
    ) -> Result<Option<EncryptionProtocol>> {
        let encryption = remote.description.as_ref().and_then(|d| d.encryption.as_ref());
        let mut confirmed = Vec::new();

        if !self.relay {
            if let Some(control) = controls.zrtp_mut(media) {
                if let Some(hash) = encryption.and_then(|e| e.zrtp_hashes.first()) {
                    control.set_peer_hash(hash.version.clone(), hash.value.clone());
                    confirmed.push(EncryptionProtocol::HandshakeHash);
                }
            }

            let crypto = encryption.map(|e| e.crypto.clone()).unwrap_or_default();
            if let Some(control) = controls.sdes_mut(media) {
                if !crypto.is_empty() && control.select_attribute(&crypto, initiator)?.is_some() {
                    confirmed.push(EncryptionProtocol::CryptoAttribute);
                } else if control.in_use().is_none() {
                    controls.remove_and_cleanup(media, EncryptionProtocol::CryptoAttribute);
                }
            }

            let fingerprints = remote_fingerprints(remote);
            if let Some(control) = controls.dtls_mut(media) {
                if let Some(first) = fingerprints.first() {
                    control.resolve_setup(first.setup);
                    control.set_remote_fingerprints(fingerprints);
                    confirmed.push(EncryptionProtocol::Fingerprint);
                }
            }
        }

        let winner = self
            .config
            .priority
            .iter()
            .copied()
            .find(|p| confirmed.contains(p));
        match winner {
            Some(protocol) => {
                controls.activate(media, protocol);
                debug!("Peer {} confirmed {} for {}", self.peer, protocol, media);
            }
            None if controls.active(media).is_some() && !self.relay => {
                warn!("Peer {} dropped SRTP for {}", self.peer, media);
            }
            None => {}
        }
        Ok(winner)
    }

    /// Put local fingerprints into the transports of harvested contents
    ///
    /// In relay mode the relay terminates DTLS, so its channel fingerprints
    /// are forwarded instead: as initiator when the peer supports DTLS, as
    /// responder when the peer offered fingerprints.
    pub fn add_fingerprints_to_transports(
        &self,
        controls: &SrtpControls,
        local: &mut [ContentDescriptor],
        remote: Option<&[ContentDescriptor]>,
        relay_fingerprints: &HashMap<MediaType, Vec<Fingerprint>>,
    ) {
        for content in local.iter_mut() {
            let Some(media) = content.media_type() else {
                continue;
            };
            let Some(transport) = content.transport.as_mut() else {
                continue;
            };

            if self.relay {
                let forward = match remote {
                    None => self.discovery.supports(self.peer, NS_JINGLE_DTLS),
                    Some(remote) => remote
                        .iter()
                        .find(|r| r.name == content.name)
                        .map(|r| !remote_fingerprints(r).is_empty())
                        .unwrap_or(false),
                };
                if forward {
                    if let Some(fingerprints) = relay_fingerprints.get(&media) {
                        transport.fingerprints = fingerprints.clone();
                    }
                }
                continue;
            }

            let dtls = controls
                .state(media)
                .filter(|s| s.active() == Some(EncryptionProtocol::Fingerprint))
                .and_then(|s| s.dtls());
            if let Some(control) = dtls {
                transport.fingerprints = vec![control.local_fingerprint()];
            }
        }
    }
}

fn remote_fingerprints(content: &ContentDescriptor) -> Vec<Fingerprint> {
    content
        .transport
        .as_ref()
        .map(|t| t.fingerprints.clone())
        .unwrap_or_default()
}
