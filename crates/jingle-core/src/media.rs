//! Media collaborator seams
//!
//! The negotiation engine does not capture, encode or send media. It picks
//! a device, a format, a connector and a target, then asks a
//! [`StreamFactory`] for a [`MediaStream`] configured with them. The
//! stream handle is kept so hold/resume and renegotiation can change its
//! direction or rebind it later.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::content::{PayloadFormat, RtpExtension};
use crate::errors::Result;
use crate::types::{MediaDirection, MediaType};

/// Where a stream sends its RTP and RTCP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTarget {
    /// RTP destination
    pub rtp: SocketAddr,
    /// RTCP destination
    pub rtcp: Option<SocketAddr>,
}

/// Local binding a stream reads from and writes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConnector {
    /// Media type served by this connector
    pub media: MediaType,
    /// Local RTP address
    pub rtp: SocketAddr,
    /// Local RTCP address
    pub rtcp: Option<SocketAddr>,
    /// Relay channel the connector is bound to, in relay mode
    pub relay_channel: Option<String>,
}

/// Video resolution and frame rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityPreset {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frames per second
    pub frame_rate: u32,
}

impl QualityPreset {
    /// Create a new preset
    pub fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            width,
            height,
            frame_rate,
        }
    }
}

/// Quality limits announced by the remote party
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityControl {
    /// What the remote party would like to receive
    pub remote_receive: Option<QualityPreset>,
    /// The most the remote party will send
    pub remote_send_max: Option<QualityPreset>,
}

impl QualityControl {
    /// The tightest ceiling among the known presets
    pub fn ceiling(&self) -> Option<QualityPreset> {
        match (self.remote_receive, self.remote_send_max) {
            (Some(a), Some(b)) => Some(if a.height <= b.height { a } else { b }),
            (a, b) => a.or(b),
        }
    }
}

/// A capture/playback device for one media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDevice {
    /// Media type handled by the device
    pub media_type: MediaType,
    /// What the device can do
    pub direction: MediaDirection,
    /// Supported formats, most preferred first
    pub formats: Vec<PayloadFormat>,
    /// Supported RTP header extensions
    pub extensions: Vec<RtpExtension>,
}

impl MediaDevice {
    /// Create a new device
    pub fn new(media_type: MediaType, direction: MediaDirection, formats: Vec<PayloadFormat>) -> Self {
        Self {
            media_type,
            direction,
            formats,
            extensions: Vec::new(),
        }
    }

    /// Set the supported header extensions
    pub fn with_extensions(mut self, extensions: Vec<RtpExtension>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Whether the device can take part in a stream at all
    pub fn is_active(&self) -> bool {
        self.direction != MediaDirection::Inactive && !self.formats.is_empty()
    }

    /// Supported formats that fit under an optional quality ceiling
    pub fn supported_formats(&self, ceiling: Option<&QualityPreset>) -> Vec<PayloadFormat> {
        crate::negotiation::formats_within_ceiling(&self.formats, ceiling)
    }
}

/// Source of the default device per media type
pub trait DeviceProvider: Send + Sync {
    /// The device to use for a media type, if any
    fn default_device(&self, media: MediaType) -> Option<MediaDevice>;
}

/// Everything needed to create or reconfigure a stream
#[derive(Debug, Clone)]
pub struct StreamParams {
    /// Content the stream belongs to
    pub content_name: String,
    /// Local connector
    pub connector: Option<StreamConnector>,
    /// Device to read from and write to
    pub device: MediaDevice,
    /// Format to use
    pub format: PayloadFormat,
    /// Remote target
    pub target: Option<StreamTarget>,
    /// Direction
    pub direction: MediaDirection,
    /// Negotiated RTP header extensions
    pub extensions: Vec<RtpExtension>,
    /// Whether this stream drives the shared security handshake
    pub master: bool,
    /// Whether RTP and RTCP share one transport
    pub rtcp_mux: bool,
}

/// Handle to a configured media stream
pub trait MediaStream: Send + Sync {
    /// Media type of the stream
    fn media_type(&self) -> MediaType;

    /// Current direction
    fn direction(&self) -> MediaDirection;

    /// Change the direction
    fn set_direction(&self, direction: MediaDirection);

    /// Local SSRC, once known
    fn local_ssrc(&self) -> Option<u32>;

    /// Rebind the local connector
    fn set_connector(&self, connector: StreamConnector);

    /// Change the remote target
    fn set_target(&self, target: Option<StreamTarget>);

    /// Apply quality attributes the remote party sent with its format
    fn update_quality_control(&self, attributes: &BTreeMap<String, String>);

    /// Stop the stream and release its resources
    fn close(&self);
}

/// Creates streams, or reconfigures an existing one, from negotiated parameters
#[async_trait]
pub trait StreamFactory: Send + Sync {
    /// Create a stream, or reconfigure `existing` in place
    async fn init_stream(
        &self,
        params: StreamParams,
        existing: Option<Arc<dyn MediaStream>>,
    ) -> Result<Arc<dyn MediaStream>>;
}
