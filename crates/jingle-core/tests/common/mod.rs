//! Common Test Helpers for Jingle Negotiation
//!
//! In-memory collaborators for driving a [`MediaHandler`] without a media
//! engine, a signaling layer or a relay: devices, streams and relay
//! channels record what the engine asked of them so tests can assert on it.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use rvoip_jingle_core::constants::{NS_JINGLE_DTLS, NS_JINGLE_ICE_UDP, NS_JINGLE_RAW_UDP};
use rvoip_jingle_core::content::{CandidateType, DtlsSetup};
use rvoip_jingle_core::prelude::*;
use rvoip_jingle_core::transport::{RelayChannel, RelayControl};

/// Local party when acting as initiator
pub const JULIET: &str = "juliet@capulet.lit/balcony";

/// Local party when acting as responder
pub const ROMEO: &str = "romeo@montague.lit/orchard";

/// Global port allocator so each fixture harvests distinct addresses
static NEXT_PORT_BASE: AtomicU16 = AtomicU16::new(20000);

/// SSRCs handed out by fake streams
static NEXT_SSRC: AtomicU32 = AtomicU32::new(0x1000);

/// Get a port range of 100 ports for one fixture
pub fn get_test_ports() -> (u16, u16) {
    let base = NEXT_PORT_BASE.fetch_add(100, Ordering::SeqCst);
    (base, base + 99)
}

/// Route engine logs to the test output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn pcmu() -> PayloadFormat {
    PayloadFormat::new(0, "PCMU", 8000)
}

pub fn opus() -> PayloadFormat {
    PayloadFormat::new(111, "opus", 48000).with_channels(2)
}

pub fn vp8() -> PayloadFormat {
    PayloadFormat::new(100, "VP8", 90000)
}

pub fn h264() -> PayloadFormat {
    PayloadFormat::new(97, "H264", 90000).with_parameter("imageattr", "send [x=1280,y=720]")
}

pub fn audio_device(direction: MediaDirection) -> MediaDevice {
    MediaDevice::new(MediaType::Audio, direction, vec![opus(), pcmu()])
}

pub fn video_device(direction: MediaDirection) -> MediaDevice {
    MediaDevice::new(MediaType::Video, direction, vec![vp8()])
}

/// A host candidate on the documentation network
pub fn candidate(component: u8, port: u16) -> Candidate {
    Candidate {
        id: format!("remote{}", port),
        component,
        foundation: "1".to_string(),
        generation: 0,
        ip: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)),
        port,
        protocol: "udp".to_string(),
        priority: 2130706431 - u32::from(component),
        candidate_type: CandidateType::Host,
        network: 0,
    }
}

/// ICE-UDP transport with one RTP and one RTCP candidate
pub fn ice_transport(ufrag: &str, port: u16) -> TransportBlock {
    let mut transport = TransportBlock::ice_udp();
    transport.ufrag = Some(ufrag.to_string());
    transport.pwd = Some(format!("{}-password-0123456789", ufrag));
    transport.candidates = vec![candidate(1, port), candidate(2, port + 1)];
    transport
}

/// Raw UDP transport with one RTP and one RTCP candidate
pub fn raw_transport(port: u16) -> TransportBlock {
    let mut transport = TransportBlock::raw_udp();
    transport.candidates = vec![candidate(1, port), candidate(2, port + 1)];
    transport
}

/// A content as the remote party would offer it
pub fn remote_content(
    name: &str,
    media: MediaType,
    formats: Vec<PayloadFormat>,
    transport: Option<TransportBlock>,
) -> ContentDescriptor {
    let mut content = ContentDescriptor::new(name, media);
    if let Some(description) = content.description.as_mut() {
        description.payload_types = formats;
    }
    content.transport = transport;
    content
}

/// Device provider with a replaceable device per media type
#[derive(Debug, Default)]
pub struct FakeDevices {
    devices: Mutex<HashMap<MediaType, MediaDevice>>,
}

impl FakeDevices {
    pub fn new(devices: impl IntoIterator<Item = MediaDevice>) -> Self {
        let devices = devices.into_iter().map(|d| (d.media_type, d)).collect();
        Self {
            devices: Mutex::new(devices),
        }
    }

    pub fn set(&self, device: MediaDevice) {
        self.devices.lock().insert(device.media_type, device);
    }

    pub fn remove(&self, media: MediaType) {
        self.devices.lock().remove(&media);
    }
}

impl DeviceProvider for FakeDevices {
    fn default_device(&self, media: MediaType) -> Option<MediaDevice> {
        self.devices.lock().get(&media).cloned()
    }
}

/// Stream that only records its configuration
#[derive(Debug)]
pub struct FakeStream {
    media: MediaType,
    ssrc: u32,
    direction: Mutex<MediaDirection>,
    target: Mutex<Option<StreamTarget>>,
    connector: Mutex<Option<StreamConnector>>,
    quality_updates: Mutex<Vec<BTreeMap<String, String>>>,
    closed: AtomicBool,
}

impl FakeStream {
    fn new(params: &StreamParams) -> Self {
        Self {
            media: params.device.media_type,
            ssrc: NEXT_SSRC.fetch_add(1, Ordering::SeqCst),
            direction: Mutex::new(params.direction),
            target: Mutex::new(params.target),
            connector: Mutex::new(params.connector.clone()),
            quality_updates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn target(&self) -> Option<StreamTarget> {
        *self.target.lock()
    }

    pub fn connector(&self) -> Option<StreamConnector> {
        self.connector.lock().clone()
    }

    pub fn quality_updates(&self) -> usize {
        self.quality_updates.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl MediaStream for FakeStream {
    fn media_type(&self) -> MediaType {
        self.media
    }

    fn direction(&self) -> MediaDirection {
        *self.direction.lock()
    }

    fn set_direction(&self, direction: MediaDirection) {
        *self.direction.lock() = direction;
    }

    fn local_ssrc(&self) -> Option<u32> {
        Some(self.ssrc)
    }

    fn set_connector(&self, connector: StreamConnector) {
        *self.connector.lock() = Some(connector);
    }

    fn set_target(&self, target: Option<StreamTarget>) {
        *self.target.lock() = target;
    }

    fn update_quality_control(&self, attributes: &BTreeMap<String, String>) {
        self.quality_updates.lock().push(attributes.clone());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Stream factory keeping the last stream per media type
#[derive(Debug, Default)]
pub struct FakeStreamFactory {
    streams: Mutex<HashMap<MediaType, Arc<FakeStream>>>,
    params: Mutex<Vec<StreamParams>>,
}

impl FakeStreamFactory {
    pub fn stream(&self, media: MediaType) -> Option<Arc<FakeStream>> {
        self.streams.lock().get(&media).cloned()
    }

    /// Every parameter set the engine passed in, in order
    pub fn params(&self) -> Vec<StreamParams> {
        self.params.lock().clone()
    }

    pub fn init_count(&self) -> usize {
        self.params.lock().len()
    }
}

#[async_trait]
impl StreamFactory for FakeStreamFactory {
    async fn init_stream(
        &self,
        params: StreamParams,
        existing: Option<Arc<dyn MediaStream>>,
    ) -> Result<Arc<dyn MediaStream>> {
        let media = params.device.media_type;
        let mut streams = self.streams.lock();
        let reusable = existing
            .and_then(|_| streams.get(&media).cloned())
            .filter(|s| !s.is_closed());
        let stream = match reusable {
            Some(stream) => {
                stream.set_direction(params.direction);
                stream.set_target(params.target);
                if let Some(connector) = params.connector.clone() {
                    stream.set_connector(connector);
                }
                stream
            }
            None => {
                let stream = Arc::new(FakeStream::new(&params));
                streams.insert(media, Arc::clone(&stream));
                stream
            }
        };
        self.params.lock().push(params);
        Ok(stream)
    }
}

/// Call context with switchable flags
#[derive(Debug, Default)]
pub struct FakeCall {
    pub focus: AtomicBool,
    pub others_receiving: AtomicBool,
    pub zrtp_allowed: AtomicBool,
    pub rtp_translation: AtomicBool,
    pub local_video: AtomicBool,
}

impl FakeCall {
    pub fn conference_focus() -> Self {
        let call = Self::default();
        call.focus.store(true, Ordering::SeqCst);
        call
    }
}

impl CallContext for FakeCall {
    fn is_conference_focus(&self) -> bool {
        self.focus.load(Ordering::SeqCst)
    }

    fn other_participants_receiving(&self, _peer: &str, _media: MediaType) -> bool {
        self.others_receiving.load(Ordering::SeqCst)
    }

    fn zrtp_signaling_allowed(&self) -> bool {
        self.zrtp_allowed.load(Ordering::SeqCst)
    }

    fn rtp_translation_enabled(&self, _media: MediaType) -> bool {
        self.rtp_translation.load(Ordering::SeqCst)
    }

    fn local_video_transmission_enabled(&self) -> bool {
        self.local_video.load(Ordering::SeqCst)
    }
}

/// Notifier counting "no matching format" notifications
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<(String, Vec<PayloadFormat>)>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.notifications.lock().len()
    }

    pub fn last(&self) -> Option<(String, Vec<PayloadFormat>)> {
        self.notifications.lock().last().cloned()
    }
}

impl UserNotifier for RecordingNotifier {
    fn notify_no_matching_format(&self, peer: &str, remote_formats: &[PayloadFormat]) {
        self.notifications.lock().push((peer.to_string(), remote_formats.to_vec()));
    }
}

/// Relay that allocates a focus and a peer channel per content
#[derive(Debug, Default)]
pub struct FakeRelay {
    fail_media: Option<MediaType>,
    allocations: AtomicUsize,
    directions: Mutex<Vec<(String, MediaDirection)>>,
    transports: Mutex<Vec<(String, MediaType)>>,
    expired: Mutex<Vec<MediaType>>,
}

impl FakeRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// A relay that refuses to allocate channels for one media type
    pub fn failing_for(media: MediaType) -> Self {
        Self {
            fail_media: Some(media),
            ..Self::default()
        }
    }

    /// Id of the channel carrying the peer's stream
    pub fn peer_channel(media: MediaType) -> String {
        format!("{}-peer", media)
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn directions(&self) -> Vec<(String, MediaDirection)> {
        self.directions.lock().clone()
    }

    pub fn transports(&self) -> Vec<(String, MediaType)> {
        self.transports.lock().clone()
    }

    pub fn expired(&self) -> Vec<MediaType> {
        self.expired.lock().clone()
    }

    fn channel_transport(port: u16) -> TransportBlock {
        let mut transport = ice_transport("relay", port);
        transport.candidates.iter_mut().for_each(|c| c.ip = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1)));
        transport.fingerprints = vec![Fingerprint {
            hash: "sha-256".to_string(),
            value: "AB:CD:EF:01".to_string(),
            setup: DtlsSetup::ActPass,
        }];
        transport
    }
}

#[async_trait]
impl RelayControl for FakeRelay {
    fn supports_ice(&self) -> bool {
        true
    }

    async fn allocate_channels(&self, media: MediaType, _peer: &str) -> Result<Vec<RelayChannel>> {
        if self.fail_media == Some(media) {
            return Err(NegotiationError::internal("relay refused the allocation"));
        }
        self.allocations.fetch_add(1, Ordering::SeqCst);
        let base = match media {
            MediaType::Audio => 30000,
            MediaType::Video => 30010,
        };
        Ok(vec![
            RelayChannel {
                id: format!("{}-focus", media),
                media,
                direction: MediaDirection::SendRecv,
                ssrcs: Vec::new(),
                transport: Some(Self::channel_transport(base)),
            },
            RelayChannel {
                id: Self::peer_channel(media),
                media,
                direction: MediaDirection::SendRecv,
                ssrcs: Vec::new(),
                transport: Some(Self::channel_transport(base + 2)),
            },
        ])
    }

    async fn expire_channels(&self, media: MediaType, _channels: &[RelayChannel]) -> Result<()> {
        self.expired.lock().push(media);
        Ok(())
    }

    async fn set_channel_direction(&self, channel_id: &str, _media: MediaType, direction: MediaDirection) -> Result<()> {
        self.directions.lock().push((channel_id.to_string(), direction));
        Ok(())
    }

    async fn send_transport_info(&self, channel_id: &str, media: MediaType, _transport: &TransportBlock) -> Result<()> {
        self.transports.lock().push((channel_id.to_string(), media));
        Ok(())
    }
}

/// Collaborators of one party, kept typed for assertions
pub struct Fixture {
    pub devices: Arc<FakeDevices>,
    pub factory: Arc<FakeStreamFactory>,
    pub discovery: Arc<CachedFeatureDiscovery>,
    pub call: Arc<FakeCall>,
    pub notifier: Arc<RecordingNotifier>,
    pub relay: Option<Arc<FakeRelay>>,
    harvester: Arc<HostCandidateHarvester>,
}

impl Fixture {
    /// Audio and video devices, both peers advertising every transport and DTLS-SRTP
    pub fn new() -> Self {
        init_tracing();
        let discovery = CachedFeatureDiscovery::new();
        for peer in [JULIET, ROMEO] {
            discovery.set_features(peer, [NS_JINGLE_ICE_UDP, NS_JINGLE_RAW_UDP, NS_JINGLE_DTLS]);
        }
        let (min_port, max_port) = get_test_ports();
        Self {
            devices: Arc::new(FakeDevices::new([
                audio_device(MediaDirection::SendRecv),
                video_device(MediaDirection::SendRecv),
            ])),
            factory: Arc::new(FakeStreamFactory::default()),
            discovery: Arc::new(discovery),
            call: Arc::new(FakeCall::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            relay: None,
            harvester: Arc::new(HostCandidateHarvester::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                min_port,
                max_port,
            )),
        }
    }

    pub fn with_relay(mut self, relay: FakeRelay) -> Self {
        self.relay = Some(Arc::new(relay));
        self
    }

    pub fn with_call(mut self, call: FakeCall) -> Self {
        self.call = Arc::new(call);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            devices: self.devices.clone(),
            streams: self.factory.clone(),
            discovery: self.discovery.clone(),
            harvester: self.harvester.clone(),
            call: self.call.clone(),
            notifier: self.notifier.clone(),
            relay: self.relay.clone().map(|r| r as Arc<dyn RelayControl>),
        }
    }

    /// Handler talking to `peer` with the default configuration
    pub fn handler(&self, peer: &str, role: Role) -> MediaHandler {
        self.handler_with(peer, role, NegotiationConfig::default())
    }

    pub fn handler_with(&self, peer: &str, role: Role, config: NegotiationConfig) -> MediaHandler {
        MediaHandler::new(peer, role, Arc::new(config), self.collaborators())
    }
}

/// An initiator and a responder that completed offer, answer and accept
pub struct EstablishedCall {
    pub initiator: MediaHandler,
    pub responder: MediaHandler,
    pub initiator_side: Fixture,
    pub responder_side: Fixture,
}

/// Run a full session-initiate / session-accept exchange between two handlers
pub async fn establish_call() -> EstablishedCall {
    let initiator_side = Fixture::new();
    let responder_side = Fixture::new();
    let mut initiator = initiator_side.handler(ROMEO, Role::Initiator);
    let mut responder = responder_side.handler(JULIET, Role::Responder);

    let offer = initiator.create_content_list().await.expect("offer");
    responder.process_offer(offer).await.expect("answer");
    let accept = responder.generate_session_accept().await.expect("session-accept");
    initiator.process_session_accept(accept).await.expect("accept processed");

    EstablishedCall {
        initiator,
        responder,
        initiator_side,
        responder_side,
    }
}
