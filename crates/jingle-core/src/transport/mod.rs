//! Transport coordination
//!
//! A call uses exactly one transport method, chosen once by the
//! [`TransportSelector`]. The chosen [`TransportManager`] harvests local
//! candidates, collects remote ones and decides where each stream sends.
//! [`TransportSession`] wraps the manager and, when media goes through a
//! relay, the per-media relay channels.

pub mod ice;
pub mod raw_udp;
pub mod relay;
pub mod selector;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::constants::{NS_JINGLE_ICE_UDP, NS_JINGLE_RAW_UDP};
use crate::content::{CandidateType, ContentDescriptor, Fingerprint, TransportBlock};
use crate::errors::{NegotiationError, Result};
use crate::media::{StreamConnector, StreamTarget};
use crate::types::MediaType;

pub use ice::IceUdpTransportManager;
pub use raw_udp::RawUdpTransportManager;
pub use relay::{RelayChannel, RelayChannelUpdate, RelayChannels, RelayConferenceUpdate, RelayControl, RelayedMedia};
pub use selector::TransportSelector;

/// Jingle transport method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMethod {
    /// ICE-UDP (XEP-0176)
    IceUdp,
    /// Raw UDP (XEP-0177)
    RawUdp,
}

impl TransportMethod {
    /// Fixed preference order used with feature discovery
    pub const PREFERENCE_ORDER: [TransportMethod; 2] = [TransportMethod::IceUdp, TransportMethod::RawUdp];

    /// Namespace of the transport element
    pub fn namespace(&self) -> &'static str {
        match self {
            TransportMethod::IceUdp => NS_JINGLE_ICE_UDP,
            TransportMethod::RawUdp => NS_JINGLE_RAW_UDP,
        }
    }

    /// Method identified by a transport namespace
    pub fn from_namespace(namespace: &str) -> Option<TransportMethod> {
        match namespace {
            NS_JINGLE_ICE_UDP => Some(TransportMethod::IceUdp),
            NS_JINGLE_RAW_UDP => Some(TransportMethod::RawUdp),
            _ => None,
        }
    }
}

impl fmt::Display for TransportMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMethod::IceUdp => write!(f, "ice-udp"),
            TransportMethod::RawUdp => write!(f, "raw-udp"),
        }
    }
}

/// A local address obtained for one stream component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestedAddress {
    /// 1 for RTP, 2 for RTCP
    pub component: u8,
    /// Local address
    pub address: SocketAddr,
    /// How the address was obtained
    pub candidate_type: CandidateType,
}

/// Source of local addresses for streams
#[async_trait]
pub trait CandidateHarvester: Send + Sync {
    /// Obtain one address per component for a stream
    async fn harvest(&self, media: MediaType, components: u8) -> Result<Vec<HarvestedAddress>>;
}

/// Hands out host addresses from a port range
///
/// RTP gets an even port and RTCP the next one.
#[derive(Debug)]
pub struct HostCandidateHarvester {
    ip: IpAddr,
    min_port: u16,
    max_port: u16,
    next_port: Mutex<u16>,
}

impl HostCandidateHarvester {
    /// Create a harvester for an interface and port range
    pub fn new(ip: IpAddr, min_port: u16, max_port: u16) -> Self {
        let start = min_port.saturating_add(min_port % 2);
        Self {
            ip,
            min_port: start,
            max_port,
            next_port: Mutex::new(start),
        }
    }
}

#[async_trait]
impl CandidateHarvester for HostCandidateHarvester {
    async fn harvest(&self, media: MediaType, components: u8) -> Result<Vec<HarvestedAddress>> {
        let mut next = self.next_port.lock();
        let needed = components.max(1) as u32;
        if *next as u32 + needed - 1 > self.max_port as u32 {
            *next = self.min_port;
        }
        if *next as u32 + needed - 1 > self.max_port as u32 {
            return Err(NegotiationError::internal(format!(
                "Port range {}-{} too small for {} components",
                self.min_port, self.max_port, components
            )));
        }

        let base = *next;
        let addresses = (0..components.max(1))
            .map(|i| HarvestedAddress {
                component: i + 1,
                address: SocketAddr::new(self.ip, base + i as u16),
                candidate_type: CandidateType::Host,
            })
            .collect();
        // keep the next RTP port even
        let step = needed as u16 + (needed as u16 % 2);
        *next = base.saturating_add(step);
        debug!("Harvested {} host addresses for {} from port {}", components, media, base);
        Ok(addresses)
    }
}

/// Local addresses per media type, harvested once and reused across rounds
pub(crate) struct LocalEndpoints {
    harvester: Arc<dyn CandidateHarvester>,
    addresses: HashMap<MediaType, Vec<HarvestedAddress>>,
}

impl LocalEndpoints {
    pub(crate) fn new(harvester: Arc<dyn CandidateHarvester>) -> Self {
        Self {
            harvester,
            addresses: HashMap::new(),
        }
    }

    pub(crate) async fn ensure(&mut self, media: MediaType, components: u8) -> Result<Vec<HarvestedAddress>> {
        if let Some(existing) = self.addresses.get(&media) {
            if existing.len() >= components as usize {
                return Ok(existing.clone());
            }
        }
        let harvested = self.harvester.harvest(media, components).await?;
        self.addresses.insert(media, harvested.clone());
        Ok(harvested)
    }

    pub(crate) fn connector(&self, media: MediaType, rtcp_mux: bool, relay_channel: Option<String>) -> Option<StreamConnector> {
        let addresses = self.addresses.get(&media)?;
        let rtp = addresses.iter().find(|a| a.component == 1)?.address;
        let rtcp = if rtcp_mux {
            Some(rtp)
        } else {
            addresses.iter().find(|a| a.component == 2).map(|a| a.address)
        };
        Some(StreamConnector {
            media,
            rtp,
            rtcp,
            relay_channel,
        })
    }

    pub(crate) fn release(&mut self, media: MediaType) {
        self.addresses.remove(&media);
    }

    pub(crate) fn clear(&mut self) {
        self.addresses.clear();
    }
}

/// Transport method implementation for one call peer
#[async_trait]
pub trait TransportManager: Send + Sync {
    /// Method implemented
    fn method(&self) -> TransportMethod;

    /// Current candidate generation
    fn generation(&self) -> u32;

    /// Whether RTP and RTCP share one transport
    fn rtcp_mux(&self) -> bool;

    /// Enable or disable rtcp-mux
    fn set_rtcp_mux(&mut self, enabled: bool) -> Result<()>;

    /// Start harvesting and fill the transport of every local content
    ///
    /// Media listed in `relayed` advertise the relay's transport instead
    /// of local candidates and send to the relay.
    async fn start_candidate_harvest(
        &mut self,
        local: &mut [ContentDescriptor],
        remote: Option<&[ContentDescriptor]>,
        relayed: &HashMap<MediaType, RelayedMedia>,
    ) -> Result<()>;

    /// Finish harvesting; `local` carries the final transports
    async fn wrapup_candidate_harvest(&mut self, local: &mut [ContentDescriptor]) -> Result<()>;

    /// Take in remote transports; true when any remote candidate is known
    async fn start_connectivity_establishment(&mut self, remote: &[ContentDescriptor]) -> Result<bool>;

    /// Conclude connectivity establishment and fix stream targets
    async fn wrapup_connectivity_establishment(&mut self) -> Result<()>;

    /// Where the stream of a media type sends, once known
    fn stream_target(&self, media: MediaType) -> Option<StreamTarget>;

    /// Local binding of the stream of a media type
    fn stream_connector(&self, media: MediaType) -> Option<StreamConnector>;

    /// Local contents with their transports, in harvest order
    fn local_contents(&self) -> Vec<ContentDescriptor>;

    /// Forget a content
    fn remove_content(&mut self, name: &str) -> Option<ContentDescriptor>;

    /// Release every resource
    async fn close(&mut self);
}

/// Create the manager for a method
pub fn create_transport_manager(
    method: TransportMethod,
    harvester: Arc<dyn CandidateHarvester>,
    controlling: bool,
) -> Box<dyn TransportManager> {
    match method {
        TransportMethod::IceUdp => Box::new(IceUdpTransportManager::new(harvester, controlling)),
        TransportMethod::RawUdp => Box::new(RawUdpTransportManager::new(harvester)),
    }
}

/// Transport state of one call peer
pub struct TransportSession {
    manager: Box<dyn TransportManager>,
    relay: Option<RelayChannels>,
    /// Remote transports received before the relay channels existed
    deferred_relay_transports: Option<Vec<ContentDescriptor>>,
}

impl TransportSession {
    /// Create a session around a manager, with relay channels in relay mode
    pub fn new(manager: Box<dyn TransportManager>, relay: Option<RelayChannels>) -> Self {
        Self {
            manager,
            relay,
            deferred_relay_transports: None,
        }
    }

    /// Method in use
    pub fn method(&self) -> TransportMethod {
        self.manager.method()
    }

    /// Current candidate generation
    pub fn generation(&self) -> u32 {
        self.manager.generation()
    }

    /// Whether media goes through a relay
    pub fn is_relayed(&self) -> bool {
        self.relay.is_some()
    }

    /// Relay channels, in relay mode
    pub fn relay(&self) -> Option<&RelayChannels> {
        self.relay.as_ref()
    }

    /// Mutable relay channels, in relay mode
    pub fn relay_mut(&mut self) -> Option<&mut RelayChannels> {
        self.relay.as_mut()
    }

    /// Whether rtcp-mux is on
    pub fn rtcp_mux(&self) -> bool {
        self.manager.rtcp_mux()
    }

    /// Apply the negotiated rtcp-mux flag
    pub fn set_rtcp_mux(&mut self, enabled: bool) -> Result<()> {
        self.manager.set_rtcp_mux(enabled)
    }

    /// Allocate missing relay channels, then start harvesting
    ///
    /// A relay allocation failure aborts the round before any candidate
    /// is harvested.
    pub async fn start_candidate_harvest(
        &mut self,
        local: &mut [ContentDescriptor],
        remote: Option<&[ContentDescriptor]>,
        peer: &str,
    ) -> Result<()> {
        let relayed = match self.relay.as_mut() {
            Some(relay) => {
                let media: Vec<MediaType> = local.iter().filter_map(|c| c.media_type()).collect();
                relay.ensure_allocated(&media, peer).await?;
                relay.relayed_media()
            }
            None => HashMap::new(),
        };
        self.manager.start_candidate_harvest(local, remote, &relayed).await
    }

    /// Fingerprints of the relay channels, for forwarding to the peer
    pub fn relay_fingerprints(&self) -> HashMap<MediaType, Vec<Fingerprint>> {
        self.relay.as_ref().map(|r| r.fingerprints()).unwrap_or_default()
    }

    /// Whether remote transports are waiting for relay channels
    pub fn has_deferred_relay_connectivity(&self) -> bool {
        self.deferred_relay_transports.is_some()
    }

    /// Forward deferred remote transports to the relay, at most once
    pub async fn flush_deferred_relay_connectivity(&mut self) -> Result<()> {
        let Some(remote) = self.deferred_relay_transports.take() else {
            return Ok(());
        };
        if let Some(relay) = self.relay.as_mut() {
            info!("Forwarding {} deferred remote transports to the relay", remote.len());
            relay.send_transport_info(&remote).await?;
        }
        Ok(())
    }

    /// Finish harvesting
    pub async fn wrapup_candidate_harvest(&mut self, local: &mut [ContentDescriptor]) -> Result<()> {
        self.manager.wrapup_candidate_harvest(local).await
    }

    /// Take in remote transports
    ///
    /// In relay mode the peer talks to the relay, so its transports go to
    /// the relay channels; if those are not allocated yet, forwarding is
    /// deferred until the next harvest.
    pub async fn start_connectivity_establishment(&mut self, remote: &[ContentDescriptor]) -> Result<bool> {
        if let Some(relay) = self.relay.as_mut() {
            let all_allocated = remote
                .iter()
                .filter_map(|c| c.media_type())
                .all(|m| relay.remote_channel(m).is_some());
            if all_allocated {
                relay.send_transport_info(remote).await?;
            } else {
                debug!("Relay channels missing, deferring remote transports");
                self.deferred_relay_transports
                    .get_or_insert_with(Vec::new)
                    .extend(remote.iter().cloned());
            }
            return Ok(true);
        }
        self.manager.start_connectivity_establishment(remote).await
    }

    /// Conclude connectivity establishment
    pub async fn wrapup_connectivity_establishment(&mut self) -> Result<()> {
        self.manager.wrapup_connectivity_establishment().await
    }

    /// Stream target of a media type
    pub fn stream_target(&self, media: MediaType) -> Option<StreamTarget> {
        self.manager.stream_target(media)
    }

    /// Stream connector of a media type
    pub fn stream_connector(&self, media: MediaType) -> Option<StreamConnector> {
        self.manager.stream_connector(media)
    }

    /// Local contents with transports
    pub fn local_contents(&self) -> Vec<ContentDescriptor> {
        self.manager.local_contents()
    }

    /// Drop a content and, in relay mode, expire its relay channels
    pub async fn remove_content(&mut self, name: &str) -> Option<ContentDescriptor> {
        let removed = self.manager.remove_content(name);
        if let (Some(relay), Some(media)) = (self.relay.as_mut(), removed.as_ref().and_then(|c| c.media_type())) {
            relay.close_stream_connector(media).await;
        }
        removed
    }

    /// Release the manager and every relay channel
    pub async fn close(&mut self) {
        self.manager.close().await;
        if let Some(relay) = self.relay.as_mut() {
            for media in MediaType::ALL {
                relay.close_stream_connector(media).await;
            }
        }
        if self.deferred_relay_transports.take().is_some() {
            warn!("Closing transport with undelivered relay transports");
        }
    }
}

/// Empty transport element for a method
pub(crate) fn empty_transport(method: TransportMethod) -> TransportBlock {
    TransportBlock::new(method.namespace())
}
