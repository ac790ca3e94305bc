//! Raw UDP transport manager
//!
//! One RTP and one RTCP candidate per content, no connectivity checks:
//! the peer's advertised candidates are the stream target.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{empty_transport, CandidateHarvester, LocalEndpoints, RelayedMedia, TransportManager, TransportMethod};
use crate::content::{Candidate, ContentDescriptor};
use crate::errors::{NegotiationError, Result};
use crate::media::{StreamConnector, StreamTarget};
use crate::types::MediaType;

/// Raw UDP transport manager
pub struct RawUdpTransportManager {
    endpoints: LocalEndpoints,
    generation: u32,
    next_candidate_id: u32,
    local: IndexMap<String, ContentDescriptor>,
    remote: HashMap<MediaType, ContentDescriptor>,
    relayed: HashMap<MediaType, RelayedMedia>,
}

impl RawUdpTransportManager {
    /// Create a manager
    pub fn new(harvester: Arc<dyn CandidateHarvester>) -> Self {
        Self {
            endpoints: LocalEndpoints::new(harvester),
            generation: 0,
            next_candidate_id: 1,
            local: IndexMap::new(),
            remote: HashMap::new(),
            relayed: HashMap::new(),
        }
    }
}

#[async_trait]
impl TransportManager for RawUdpTransportManager {
    fn method(&self) -> TransportMethod {
        TransportMethod::RawUdp
    }

    fn generation(&self) -> u32 {
        self.generation
    }

    fn rtcp_mux(&self) -> bool {
        false
    }

    fn set_rtcp_mux(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            return Err(NegotiationError::illegal_argument("rtcp-mux is not supported by raw-udp"));
        }
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

        for content in local.iter_mut() {
            let Some(media) = content.media_type() else {
                continue;
            };

            let transport = match relayed.get(&media) {
                Some(relay) => {
                    let mut transport = relay.advertised.clone();
                    transport.namespace = TransportMethod::RawUdp.namespace().to_string();
                    transport.ufrag = None;
                    transport.pwd = None;
                    transport
                }
                None => {
                    let addresses = self.endpoints.ensure(media, 2).await?;
                    let mut transport = empty_transport(TransportMethod::RawUdp);
                    for address in addresses {
                        transport.candidates.push(Candidate {
                            id: self.next_candidate_id.to_string(),
                            component: address.component,
                            foundation: "1".to_string(),
                            generation: self.generation,
                            ip: address.address.ip(),
                            port: address.address.port(),
                            protocol: "udp".to_string(),
                            priority: 0,
                            candidate_type: address.candidate_type,
                            network: 0,
                        });
                        self.next_candidate_id += 1;
                    }
                    transport
                }
            };
            content.transport = Some(transport);
            self.local.insert(content.name.clone(), content.clone());
        }
        debug!("Raw UDP harvest generation {}", self.generation);
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
            let Some(media) = content.media_type() else {
                continue;
            };
            if content.transport.as_ref().map(|t| !t.candidates.is_empty()).unwrap_or(false) {
                self.remote.insert(media, content.clone());
                any = true;
            }
        }
        Ok(any)
    }

    async fn wrapup_connectivity_establishment(&mut self) -> Result<()> {
        Ok(())
    }

    fn stream_target(&self, media: MediaType) -> Option<StreamTarget> {
        match self.relayed.get(&media) {
            Some(relay) => relay.target,
            None => self.remote.get(&media).and_then(|c| c.default_target()),
        }
    }

    fn stream_connector(&self, media: MediaType) -> Option<StreamConnector> {
        let relay_channel = self.relayed.get(&media).map(|r| r.channel_id.clone());
        self.endpoints.connector(media, false, relay_channel)
    }

    fn local_contents(&self) -> Vec<ContentDescriptor> {
        self.local.values().cloned().collect()
    }

    fn remove_content(&mut self, name: &str) -> Option<ContentDescriptor> {
        let removed = self.local.shift_remove(name)?;
        if let Some(media) = removed.media_type() {
            if !self.local.values().any(|c| c.media_type() == Some(media)) {
                self.remote.remove(&media);
                self.relayed.remove(&media);
                self.endpoints.release(media);
            }
        }
        Some(removed)
    }

    async fn close(&mut self) {
        self.local.clear();
        self.remote.clear();
        self.relayed.clear();
        self.endpoints.clear();
    }
}
