//! Content negotiation primitives
//!
//! Format and header extension intersection, the offer direction
//! combination, master stream selection, and [`ContentNegotiator`], which
//! numbers formats and extensions consistently across every offer and
//! answer of a call.

use tracing::debug;

use crate::content::{ContentDescriptor, PayloadFormat, RtpDescription, RtpExtension};
use crate::errors::Result;
use crate::media::{MediaDevice, QualityPreset};
use crate::registry::{DynamicPayloadTypeRegistry, RtpExtensionRegistry};
use crate::types::{Creator, MediaDirection, MediaType, Senders};

/// Formats both sides support, in the order of `remote`
///
/// Entries keep the remote numbering since the answer must use the
/// offerer's payload types.
pub fn intersect_formats(remote: &[PayloadFormat], local: &[PayloadFormat]) -> Vec<PayloadFormat> {
    remote
        .iter()
        .filter(|r| local.iter().any(|l| l.matches(r)))
        .cloned()
        .collect()
}

/// Header extensions both sides support, in the order of `remote`
pub fn intersect_extensions(remote: &[RtpExtension], local: &[RtpExtension]) -> Vec<RtpExtension> {
    remote
        .iter()
        .filter(|r| local.iter().any(|l| l.uri == r.uri))
        .cloned()
        .collect()
}

/// First remote format, in remote order, that the local side supports
pub fn first_matching_format(remote: &[PayloadFormat], local: &[PayloadFormat]) -> Option<PayloadFormat> {
    remote
        .iter()
        .find(|r| local.iter().any(|l| l.matches(r)))
        .cloned()
}

/// Formats that fit under a quality ceiling
///
/// Formats without a declared height always fit.
pub fn formats_within_ceiling(formats: &[PayloadFormat], ceiling: Option<&QualityPreset>) -> Vec<PayloadFormat> {
    match ceiling {
        None => formats.to_vec(),
        Some(ceiling) => formats
            .iter()
            .filter(|f| f.height().map(|h| h <= ceiling.height).unwrap_or(true))
            .cloned()
            .collect(),
    }
}

/// Inputs to the direction of an outgoing content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferDirectionFactors {
    /// What the device can do
    pub device: MediaDirection,
    /// User preference, `SendRecv` when it does not apply
    pub preference: MediaDirection,
    /// Local hold ceiling: `SendOnly` while on hold, else `SendRecv`
    pub hold: MediaDirection,
    /// Relay focus floor: `SendOnly` when another participant listens, else `Inactive`
    pub relay_floor: MediaDirection,
}

impl OfferDirectionFactors {
    /// Combine the factors
    ///
    /// The three restrictions are intersected, so their order does not
    /// matter. The relay floor is then added: a focus broadcasting to
    /// listening participants must keep sending to this peer as well.
    pub fn combine(&self) -> MediaDirection {
        (self.device & self.preference & self.hold) | self.relay_floor
    }
}

/// Index of the master stream among a round's contents
///
/// A single content is the master. With several, the first audio content
/// is; without audio there is none.
pub fn select_master(media: &[MediaType]) -> Option<usize> {
    match media.len() {
        0 => None,
        1 => Some(0),
        _ => media.iter().position(|m| *m == MediaType::Audio),
    }
}

/// Builds descriptions with session-stable payload and extension numbering
#[derive(Debug, Clone, Default)]
pub struct ContentNegotiator {
    payload_types: DynamicPayloadTypeRegistry,
    extensions: RtpExtensionRegistry,
}

impl ContentNegotiator {
    /// Create a negotiator with empty registries
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an outgoing content for a device
    ///
    /// Formats are the device's, under the quality ceiling, numbered by
    /// the payload type registry.
    pub fn build_offer_content(
        &mut self,
        device: &MediaDevice,
        direction: MediaDirection,
        local_is_initiator: bool,
        ceiling: Option<&QualityPreset>,
    ) -> Result<ContentDescriptor> {
        let media = device.media_type;
        let formats = self.payload_types.assign(&device.supported_formats(ceiling))?;
        let extensions = self.extensions.assign(&device.extensions)?;

        let mut description = RtpDescription::new(media);
        description.payload_types = formats;
        description.extensions = extensions;

        debug!(
            "Built {} offer content with {} formats, direction {}",
            media,
            description.payload_types.len(),
            direction
        );
        Ok(ContentDescriptor {
            name: media.as_str().to_string(),
            creator: if local_is_initiator {
                Creator::Initiator
            } else {
                Creator::Responder
            },
            senders: Senders::from_direction(direction, local_is_initiator),
            description: Some(description),
            transport: None,
        })
    }

    /// Build the answer to a remote content
    pub fn build_answer_content(
        &mut self,
        remote: &ContentDescriptor,
        media: MediaType,
        formats: Vec<PayloadFormat>,
        extensions: Vec<RtpExtension>,
        direction: MediaDirection,
        local_is_initiator: bool,
    ) -> ContentDescriptor {
        self.learn_remote(remote);

        let mut description = RtpDescription::new(media);
        description.payload_types = formats;
        description.extensions = extensions;
        description.input_events = remote.description.as_ref().map(|d| d.input_events).unwrap_or(false);

        ContentDescriptor {
            name: remote.name.clone(),
            creator: remote.creator,
            senders: Senders::from_direction(direction, local_is_initiator),
            description: Some(description),
            transport: None,
        }
    }

    /// Adopt the numbering a remote content uses
    pub fn learn_remote(&mut self, remote: &ContentDescriptor) {
        self.payload_types.learn_remote(remote.formats());
        for extension in remote.extensions() {
            self.extensions.add_mapping(&extension.uri, extension.id);
        }
    }

    /// The payload type registry
    pub fn payload_types(&self) -> &DynamicPayloadTypeRegistry {
        &self.payload_types
    }

    /// The header extension registry
    pub fn extensions(&self) -> &RtpExtensionRegistry {
        &self.extensions
    }
}
