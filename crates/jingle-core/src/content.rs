//! Jingle content descriptors
//!
//! The in-memory shape of a Jingle `<content/>` element: an RTP
//! description (formats, header extensions, encryption), a transport
//! (namespace, candidates, fingerprints) and the `senders` role. The
//! signaling layer converts stanzas to and from these types; the
//! negotiation engine never sees XML.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::constants::{IMAGEATTR_PARAMETER, NS_JINGLE_ICE_UDP, NS_JINGLE_RAW_UDP};
use crate::media::StreamTarget;
use crate::types::{Creator, MediaDirection, MediaType, Senders};

fn default_channels() -> u8 {
    1
}

/// One RTP payload type offered in a description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadFormat {
    /// RTP payload type number
    pub id: u8,
    /// Encoding name (e.g. "opus", "PCMU")
    pub name: String,
    /// RTP clock rate in Hz
    pub clock_rate: u32,
    /// Channel count
    #[serde(default = "default_channels")]
    pub channels: u8,
    /// Format parameters (fmtp)
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl PayloadFormat {
    /// Create a new single-channel payload format
    pub fn new(id: u8, name: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            id,
            name: name.into(),
            clock_rate,
            channels: 1,
            parameters: BTreeMap::new(),
        }
    }

    /// Set the channel count
    pub fn with_channels(mut self, channels: u8) -> Self {
        self.channels = channels;
        self
    }

    /// Add a format parameter
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Whether the payload type number is in the dynamic range
    pub fn is_dynamic(&self) -> bool {
        self.id >= 96
    }

    /// Whether two payload types describe the same media format
    ///
    /// Static payload types are identified by number alone. Dynamic ones
    /// by encoding name, clock rate and channel count, since each side
    /// numbers them independently.
    pub fn matches(&self, other: &PayloadFormat) -> bool {
        if !self.is_dynamic() && !other.is_dynamic() {
            return self.id == other.id;
        }
        self.name.eq_ignore_ascii_case(&other.name)
            && self.clock_rate == other.clock_rate
            && self.channels == other.channels
    }

    /// Whether a format parameter is present
    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    /// Whether the format carries image attributes for quality control
    pub fn has_imageattr(&self) -> bool {
        self.has_parameter(IMAGEATTR_PARAMETER)
    }

    /// Declared frame height, if any
    pub fn height(&self) -> Option<u32> {
        self.parameters.get("height").and_then(|h| h.parse().ok())
    }

    /// Stable identity used by the payload type registry
    pub fn format_key(&self) -> String {
        format!("{}/{}/{}", self.name.to_ascii_lowercase(), self.clock_rate, self.channels)
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.id, self.name, self.clock_rate)?;
        if self.channels > 1 {
            write!(f, "/{}", self.channels)?;
        }
        Ok(())
    }
}

/// RTP header extension descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpExtension {
    /// Local extension id
    pub id: u8,
    /// Extension URI
    pub uri: String,
    /// Optional direction restriction
    #[serde(default)]
    pub direction: Option<MediaDirection>,
    /// Extension attributes
    #[serde(default)]
    pub attributes: Option<String>,
}

impl RtpExtension {
    /// Create a new header extension
    pub fn new(id: u8, uri: impl Into<String>) -> Self {
        Self {
            id,
            uri: uri.into(),
            direction: None,
            attributes: None,
        }
    }
}

/// SDES crypto line: `tag suite key-params [session-params]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoAttribute {
    /// Crypto tag
    pub tag: u32,
    /// Crypto suite name
    pub crypto_suite: String,
    /// Keying material (`inline:<base64>`)
    pub key_params: String,
    /// Optional session parameters
    #[serde(default)]
    pub session_params: Option<String>,
}

impl fmt::Display for CryptoAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.tag, self.crypto_suite, self.key_params)?;
        if let Some(params) = &self.session_params {
            write!(f, " {}", params)?;
        }
        Ok(())
    }
}

/// ZRTP hello hash advertised in signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZrtpHash {
    /// ZRTP protocol version
    pub version: String,
    /// Hex encoded hello hash
    pub value: String,
}

/// `<encryption/>` child of an RTP description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionBlock {
    /// Whether the sender requires encryption
    #[serde(default)]
    pub required: bool,
    /// SDES crypto attributes, in preference order
    #[serde(default)]
    pub crypto: Vec<CryptoAttribute>,
    /// ZRTP hello hashes
    #[serde(default)]
    pub zrtp_hashes: Vec<ZrtpHash>,
}

impl EncryptionBlock {
    /// Whether nothing is advertised
    pub fn is_empty(&self) -> bool {
        self.crypto.is_empty() && self.zrtp_hashes.is_empty()
    }
}

/// Source announcement attached to a description when we send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Synchronization source
    pub ssrc: u32,
    /// Canonical name
    #[serde(default)]
    pub cname: Option<String>,
    /// Media stream id
    #[serde(default)]
    pub msid: Option<String>,
    /// Track label
    #[serde(default)]
    pub label: Option<String>,
}

/// `<description/>` of an RTP content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtpDescription {
    /// Media type
    pub media: MediaType,
    /// Sender SSRC
    #[serde(default)]
    pub ssrc: Option<u32>,
    /// Ordered payload types, most preferred first
    #[serde(default)]
    pub payload_types: Vec<PayloadFormat>,
    /// RTP header extensions
    #[serde(default)]
    pub extensions: Vec<RtpExtension>,
    /// rtcp-mux marker
    #[serde(default)]
    pub rtcp_mux: bool,
    /// Encryption child
    #[serde(default)]
    pub encryption: Option<EncryptionBlock>,
    /// Announced sources
    #[serde(default)]
    pub sources: Vec<SourceInfo>,
    /// Desktop-sharing input event marker
    #[serde(default)]
    pub input_events: bool,
}

impl RtpDescription {
    /// Create an empty description for a media type
    pub fn new(media: MediaType) -> Self {
        Self {
            media,
            ssrc: None,
            payload_types: Vec::new(),
            extensions: Vec::new(),
            rtcp_mux: false,
            encryption: None,
            sources: Vec::new(),
            input_events: false,
        }
    }

    /// Mutable access to the encryption child, created on demand
    pub fn encryption_mut(&mut self) -> &mut EncryptionBlock {
        self.encryption.get_or_insert_with(EncryptionBlock::default)
    }
}

/// DTLS `setup` role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsSetup {
    /// Initiates the DTLS handshake
    Active,
    /// Waits for the handshake
    Passive,
    /// Either role, decided by the answer
    ActPass,
    /// No connection for now
    HoldConn,
}

impl fmt::Display for DtlsSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DtlsSetup::Active => "active",
            DtlsSetup::Passive => "passive",
            DtlsSetup::ActPass => "actpass",
            DtlsSetup::HoldConn => "holdconn",
        };
        write!(f, "{}", s)
    }
}

/// Certificate fingerprint carried in a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Hash function name (e.g. "sha-256")
    pub hash: String,
    /// Colon separated upper-case hex digest
    pub value: String,
    /// DTLS setup role
    pub setup: DtlsSetup,
}

/// Candidate type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    /// Host candidate
    Host,
    /// Server reflexive candidate
    Srflx,
    /// Peer reflexive candidate
    Prflx,
    /// Relayed candidate
    Relay,
}

impl CandidateType {
    /// RFC 8445 type preference
    pub fn preference(&self) -> u32 {
        match self {
            CandidateType::Host => 126,
            CandidateType::Prflx => 110,
            CandidateType::Srflx => 100,
            CandidateType::Relay => 0,
        }
    }
}

/// Transport candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Candidate id, unique within the session
    pub id: String,
    /// Component: 1 for RTP, 2 for RTCP
    pub component: u8,
    /// Foundation
    pub foundation: String,
    /// Harvest generation
    pub generation: u32,
    /// Address
    pub ip: IpAddr,
    /// Port
    pub port: u16,
    /// Transport protocol ("udp")
    pub protocol: String,
    /// Priority
    pub priority: u32,
    /// Candidate type
    pub candidate_type: CandidateType,
    /// Network index
    #[serde(default)]
    pub network: u8,
}

impl Candidate {
    /// Socket address of the candidate
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// `<transport/>` of a content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportBlock {
    /// Transport namespace identifying the method
    pub namespace: String,
    /// ICE username fragment
    #[serde(default)]
    pub ufrag: Option<String>,
    /// ICE password
    #[serde(default)]
    pub pwd: Option<String>,
    /// Candidates
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// rtcp-mux marker
    #[serde(default)]
    pub rtcp_mux: bool,
    /// DTLS fingerprints
    #[serde(default)]
    pub fingerprints: Vec<Fingerprint>,
}

impl TransportBlock {
    /// Create an empty transport for a namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ufrag: None,
            pwd: None,
            candidates: Vec::new(),
            rtcp_mux: false,
            fingerprints: Vec::new(),
        }
    }

    /// Empty ICE-UDP transport
    pub fn ice_udp() -> Self {
        Self::new(NS_JINGLE_ICE_UDP)
    }

    /// Empty raw-UDP transport
    pub fn raw_udp() -> Self {
        Self::new(NS_JINGLE_RAW_UDP)
    }

    /// Highest priority candidate of a component
    pub fn best_candidate(&self, component: u8) -> Option<&Candidate> {
        self.candidates
            .iter()
            .filter(|c| c.component == component)
            .max_by_key(|c| c.priority)
    }

    /// Default media target advertised by this transport
    ///
    /// The RTP address is the best component 1 candidate; RTCP uses
    /// component 2, or the RTP address when rtcp-mux is on.
    pub fn default_target(&self) -> Option<StreamTarget> {
        let rtp = self.best_candidate(1)?.address();
        let rtcp = if self.rtcp_mux {
            Some(rtp)
        } else {
            self.best_candidate(2).map(|c| c.address())
        };
        Some(StreamTarget { rtp, rtcp })
    }
}

/// A negotiated content: one media stream of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDescriptor {
    /// Content name, unique within the session
    pub name: String,
    /// Creator role
    #[serde(default)]
    pub creator: Creator,
    /// Senders role
    #[serde(default)]
    pub senders: Senders,
    /// RTP description
    #[serde(default)]
    pub description: Option<RtpDescription>,
    /// Transport
    #[serde(default)]
    pub transport: Option<TransportBlock>,
}

impl ContentDescriptor {
    /// Create a content with an empty description for `media`
    pub fn new(name: impl Into<String>, media: MediaType) -> Self {
        Self {
            name: name.into(),
            creator: Creator::Initiator,
            senders: Senders::Both,
            description: Some(RtpDescription::new(media)),
            transport: None,
        }
    }

    /// Set the senders role
    pub fn with_senders(mut self, senders: Senders) -> Self {
        self.senders = senders;
        self
    }

    /// Set the transport
    pub fn with_transport(mut self, transport: TransportBlock) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Media type of the description, if present
    pub fn media_type(&self) -> Option<MediaType> {
        self.description.as_ref().map(|d| d.media)
    }

    /// Direction of the content from one party's point of view
    pub fn direction(&self, initiator_perspective: bool) -> MediaDirection {
        self.senders.direction(initiator_perspective)
    }

    /// Offered payload types, empty without a description
    pub fn formats(&self) -> &[PayloadFormat] {
        self.description
            .as_ref()
            .map(|d| d.payload_types.as_slice())
            .unwrap_or(&[])
    }

    /// Offered header extensions, empty without a description
    pub fn extensions(&self) -> &[RtpExtension] {
        self.description
            .as_ref()
            .map(|d| d.extensions.as_slice())
            .unwrap_or(&[])
    }

    /// Whether rtcp-mux is signaled in the description or the transport
    pub fn rtcp_mux(&self) -> bool {
        self.description.as_ref().map(|d| d.rtcp_mux).unwrap_or(false)
            || self.transport.as_ref().map(|t| t.rtcp_mux).unwrap_or(false)
    }

    /// Default media target of the content's transport
    pub fn default_target(&self) -> Option<StreamTarget> {
        self.transport.as_ref().and_then(|t| t.default_target())
    }
}

/// Insertion ordered map of contents keyed by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMap {
    contents: IndexMap<String, ContentDescriptor>,
}

impl ContentMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a content; a replaced content keeps its position
    pub fn insert(&mut self, content: ContentDescriptor) -> Option<ContentDescriptor> {
        self.contents.insert(content.name.clone(), content)
    }

    /// Content by name
    pub fn get(&self, name: &str) -> Option<&ContentDescriptor> {
        self.contents.get(name)
    }

    /// Mutable content by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ContentDescriptor> {
        self.contents.get_mut(name)
    }

    /// Remove a content, preserving the order of the others
    pub fn remove(&mut self, name: &str) -> Option<ContentDescriptor> {
        self.contents.shift_remove(name)
    }

    /// First content of a media type
    pub fn find_by_media(&self, media: MediaType) -> Option<&ContentDescriptor> {
        self.contents.values().find(|c| c.media_type() == Some(media))
    }

    /// Mutable first content of a media type
    pub fn find_by_media_mut(&mut self, media: MediaType) -> Option<&mut ContentDescriptor> {
        self.contents.values_mut().find(|c| c.media_type() == Some(media))
    }

    /// Whether a content with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.contents.contains_key(name)
    }

    /// Number of contents
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Contents in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ContentDescriptor> {
        self.contents.values()
    }

    /// Content names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.contents.keys().cloned().collect()
    }

    /// Owned copy of the contents in insertion order
    pub fn to_vec(&self) -> Vec<ContentDescriptor> {
        self.contents.values().cloned().collect()
    }

    /// Drop every content
    pub fn clear(&mut self) {
        self.contents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn candidate(component: u8, port: u16, priority: u32) -> Candidate {
        Candidate {
            id: format!("c{}", port),
            component,
            foundation: "1".to_string(),
            generation: 0,
            ip: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            port,
            protocol: "udp".to_string(),
            priority,
            candidate_type: CandidateType::Host,
            network: 0,
        }
    }

    #[test]
    fn test_format_matching() {
        let local = PayloadFormat::new(111, "opus", 48000).with_channels(2);
        let remote = PayloadFormat::new(109, "OPUS", 48000).with_channels(2);
        assert!(local.matches(&remote));

        let pcmu = PayloadFormat::new(0, "PCMU", 8000);
        let unnamed = PayloadFormat::new(0, "", 8000);
        assert!(pcmu.matches(&unnamed));
        assert!(!pcmu.matches(&PayloadFormat::new(8, "PCMA", 8000)));
    }

    #[test]
    fn test_default_target() {
        let mut transport = TransportBlock::raw_udp();
        transport.candidates.push(candidate(1, 5000, 10));
        transport.candidates.push(candidate(1, 6000, 20));
        transport.candidates.push(candidate(2, 6001, 20));

        let target = transport.default_target().expect("target from candidates");
        assert_eq!(target.rtp.port(), 6000);
        assert_eq!(target.rtcp.map(|a| a.port()), Some(6001));

        transport.rtcp_mux = true;
        let target = transport.default_target().expect("target from candidates");
        assert_eq!(target.rtcp.map(|a| a.port()), Some(6000));
    }

    #[test]
    fn test_content_map_keeps_order() {
        let mut map = ContentMap::new();
        map.insert(ContentDescriptor::new("video", MediaType::Video));
        map.insert(ContentDescriptor::new("audio", MediaType::Audio));
        map.insert(ContentDescriptor::new("video", MediaType::Video).with_senders(Senders::None));

        assert_eq!(map.names(), vec!["video".to_string(), "audio".to_string()]);
        assert_eq!(map.get("video").map(|c| c.senders), Some(Senders::None));

        map.remove("video");
        assert_eq!(map.find_by_media(MediaType::Audio).map(|c| c.name.as_str()), Some("audio"));
        assert!(map.find_by_media(MediaType::Video).is_none());
    }

    #[test]
    fn test_rtcp_mux_from_either_element() {
        let mut content = ContentDescriptor::new("audio", MediaType::Audio);
        assert!(!content.rtcp_mux());
        let mut transport = TransportBlock::ice_udp();
        transport.rtcp_mux = true;
        content.transport = Some(transport);
        assert!(content.rtcp_mux());
    }
}
