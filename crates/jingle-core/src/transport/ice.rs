//! ICE-UDP transport manager
//!
//! Advertises host candidates with RFC 8445 priorities and picks the
//! highest priority pair per component once the peer's candidates are
//! known. Candidates are re-stamped with a new generation on every
//! harvest round.

use async_trait::async_trait;
use indexmap::IndexMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{empty_transport, CandidateHarvester, LocalEndpoints, RelayedMedia, TransportManager, TransportMethod};
use crate::content::{Candidate, ContentDescriptor, TransportBlock};
use crate::errors::Result;
use crate::media::{StreamConnector, StreamTarget};
use crate::types::MediaType;

const UFRAG_LENGTH: usize = 8;
const PWD_LENGTH: usize = 24;

fn random_token(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Candidate priority (RFC 8445 section 5.1.2.1)
pub fn candidate_priority(type_preference: u32, local_preference: u32, component: u8) -> u32 {
    (type_preference << 24) + (local_preference << 8) + (256 - component as u32)
}

/// Candidate pair priority (RFC 8445 section 6.1.2.3)
///
/// `controlling` is the priority of the controlling agent's candidate.
pub fn pair_priority(controlling: u32, controlled: u32) -> u64 {
    let g = controlling as u64;
    let d = controlled as u64;
    (1 << 32) * g.min(d) + 2 * g.max(d) + u64::from(g > d)
}

/// ICE-UDP transport manager
pub struct IceUdpTransportManager {
    endpoints: LocalEndpoints,
    controlling: bool,
    rtcp_mux: bool,
    generation: u32,
    ufrag: String,
    pwd: String,
    local: IndexMap<String, ContentDescriptor>,
    remote: HashMap<MediaType, TransportBlock>,
    relayed: HashMap<MediaType, RelayedMedia>,
    selected: HashMap<MediaType, StreamTarget>,
}

impl IceUdpTransportManager {
    /// Create a manager; the initiator is the controlling agent
    pub fn new(harvester: Arc<dyn CandidateHarvester>, controlling: bool) -> Self {
        Self {
            endpoints: LocalEndpoints::new(harvester),
            controlling,
            rtcp_mux: false,
            generation: 0,
            ufrag: random_token(UFRAG_LENGTH),
            pwd: random_token(PWD_LENGTH),
            local: IndexMap::new(),
            remote: HashMap::new(),
            relayed: HashMap::new(),
            selected: HashMap::new(),
        }
    }

    /// Local username fragment
    pub fn ufrag(&self) -> &str {
        &self.ufrag
    }

    fn local_candidate_priority(&self, media: MediaType, component: u8) -> Option<u32> {
        let content = self.local.values().find(|c| c.media_type() == Some(media))?;
        content
            .transport
            .as_ref()?
            .best_candidate(component)
            .map(|c| c.priority)
    }

    fn select_pairs(&self, media: MediaType, remote: &TransportBlock) -> Option<StreamTarget> {
        let components: &[u8] = if self.rtcp_mux || remote.rtcp_mux { &[1] } else { &[1, 2] };
        let mut chosen = Vec::with_capacity(components.len());
        for component in components {
            let local_priority = self.local_candidate_priority(media, *component).unwrap_or(0);
            let best = remote
                .candidates
                .iter()
                .filter(|c| c.component == *component)
                .max_by_key(|c| {
                    if self.controlling {
                        pair_priority(local_priority, c.priority)
                    } else {
                        pair_priority(c.priority, local_priority)
                    }
                })?;
            chosen.push(best.address());
        }

        let rtp = *chosen.first()?;
        let rtcp = chosen.get(1).copied().or(Some(rtp));
        Some(StreamTarget { rtp, rtcp })
    }
}

#[async_trait]
impl TransportManager for IceUdpTransportManager {
    fn method(&self) -> TransportMethod {
        TransportMethod::IceUdp
    }

    fn generation(&self) -> u32 {
        self.generation
    }

    fn rtcp_mux(&self) -> bool {
        self.rtcp_mux
    }

    fn set_rtcp_mux(&mut self, enabled: bool) -> Result<()> {
        self.rtcp_mux = enabled;
        Ok(())
    }

    async fn start_candidate_harvest(
        &mut self,
        local: &mut [ContentDescriptor],
        _remote: Option<&[ContentDescriptor]>,
        relayed: &HashMap<MediaType, RelayedMedia>,
    ) -> Result<()> {
        self.generation += 1;
        self.relayed = relayed.clone();
        let components = if self.rtcp_mux { 1 } else { 2 };

        for content in local.iter_mut() {
            let Some(media) = content.media_type() else {
                continue;
            };

            let mut transport = match relayed.get(&media) {
                Some(relay) => {
                    let mut transport = relay.advertised.clone();
                    transport.namespace = TransportMethod::IceUdp.namespace().to_string();
                    transport
                }
                None => {
                    let addresses = self.endpoints.ensure(media, components).await?;
                    let mut transport = empty_transport(TransportMethod::IceUdp);
                    transport.ufrag = Some(self.ufrag.clone());
                    transport.pwd = Some(self.pwd.clone());
                    transport.candidates = addresses
                        .iter()
                        .filter(|a| a.component <= components)
                        .map(|a| Candidate {
                            id: format!("{}{}{}", self.ufrag, media, a.component),
                            component: a.component,
                            foundation: "1".to_string(),
                            generation: self.generation,
                            ip: a.address.ip(),
                            port: a.address.port(),
                            protocol: "udp".to_string(),
                            priority: candidate_priority(a.candidate_type.preference(), 65535, a.component),
                            candidate_type: a.candidate_type,
                            network: 0,
                        })
                        .collect();
                    transport
                }
            };
            transport.rtcp_mux = self.rtcp_mux;
            content.transport = Some(transport);
            self.local.insert(content.name.clone(), content.clone());
        }

        debug!(
            "ICE harvest generation {} for {} contents",
            self.generation,
            local.len()
        );
        Ok(())
    }

    async fn wrapup_candidate_harvest(&mut self, local: &mut [ContentDescriptor]) -> Result<()> {
        for content in local.iter() {
            self.local.insert(content.name.clone(), content.clone());
        }
        Ok(())
    }

    async fn start_connectivity_establishment(&mut self, remote: &[ContentDescriptor]) -> Result<bool> {
        let mut any = false;
        for content in remote {
            let (Some(media), Some(transport)) = (content.media_type(), content.transport.as_ref()) else {
                continue;
            };

            let same_credentials = self
                .remote
                .get(&media)
                .map(|known| transport.ufrag.is_some() && known.ufrag == transport.ufrag)
                .unwrap_or(false);

            if same_credentials {
                // trickled candidates are added
                if let Some(known) = self.remote.get_mut(&media) {
                    for candidate in &transport.candidates {
                        let duplicate = known
                            .candidates
                            .iter()
                            .any(|c| c.address() == candidate.address() && c.component == candidate.component);
                        if !duplicate {
                            known.candidates.push(candidate.clone());
                        }
                    }
                    known.rtcp_mux |= transport.rtcp_mux;
                }
            } else {
                if self.remote.contains_key(&media) {
                    info!("ICE restart by peer for {}", media);
                    self.selected.remove(&media);
                }
                self.remote.insert(media, transport.clone());
            }
            any |= self
                .remote
                .get(&media)
                .map(|t| !t.candidates.is_empty())
                .unwrap_or(false);
        }
        Ok(any)
    }

    async fn wrapup_connectivity_establishment(&mut self) -> Result<()> {
        let media_types: Vec<MediaType> = self.remote.keys().copied().collect();
        for media in media_types {
            if self.relayed.contains_key(&media) {
                continue;
            }
            let Some(remote) = self.remote.get(&media) else {
                continue;
            };
            match self.select_pairs(media, remote) {
                Some(target) => {
                    debug!("Selected ICE pair for {}: {}", media, target.rtp);
                    self.selected.insert(media, target);
                }
                None => warn!("No usable ICE candidate pair for {}", media),
            }
        }
        Ok(())
    }

    fn stream_target(&self, media: MediaType) -> Option<StreamTarget> {
        match self.relayed.get(&media) {
            Some(relay) => relay.target,
            None => self.selected.get(&media).copied(),
        }
    }

    fn stream_connector(&self, media: MediaType) -> Option<StreamConnector> {
        let relay_channel = self.relayed.get(&media).map(|r| r.channel_id.clone());
        self.endpoints.connector(media, self.rtcp_mux, relay_channel)
    }

    fn local_contents(&self) -> Vec<ContentDescriptor> {
        self.local.values().cloned().collect()
    }

    fn remove_content(&mut self, name: &str) -> Option<ContentDescriptor> {
        let removed = self.local.shift_remove(name)?;
        if let Some(media) = removed.media_type() {
            if !self.local.values().any(|c| c.media_type() == Some(media)) {
                self.remote.remove(&media);
                self.selected.remove(&media);
                self.relayed.remove(&media);
                self.endpoints.release(media);
            }
        }
        Some(removed)
    }

    async fn close(&mut self) {
        self.local.clear();
        self.remote.clear();
        self.selected.clear();
        self.relayed.clear();
        self.endpoints.clear();
    }
}
