//! Dynamic payload type and RTP header extension registries
//!
//! Dynamic payload type numbers (96-127) and extension ids are chosen per
//! session. The registries remember which number each format or URI got,
//! so every offer and answer of a call uses the same numbering, and record
//! when the remote party insists on a different number.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::content::{PayloadFormat, RtpExtension};
use crate::errors::{NegotiationError, Result};

/// First dynamic RTP payload type
pub const MIN_DYNAMIC_PAYLOAD_TYPE: u8 = 96;

/// Last dynamic RTP payload type
pub const MAX_DYNAMIC_PAYLOAD_TYPE: u8 = 127;

/// Per-session allocator of dynamic payload type numbers
#[derive(Debug, Clone, Default)]
pub struct DynamicPayloadTypeRegistry {
    /// Format key to payload type
    by_format: HashMap<String, u8>,
    /// Payload type to format
    by_number: HashMap<u8, PayloadFormat>,
    /// Locally chosen number to the number the remote party uses instead
    overrides: HashMap<u8, u8>,
}

impl DynamicPayloadTypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload type number to use for `format`
    ///
    /// Static formats keep their number. A dynamic format already mapped
    /// keeps its mapping; otherwise its own number is used when free, else
    /// the lowest free dynamic number.
    pub fn obtain_payload_type(&mut self, format: &PayloadFormat) -> Result<u8> {
        if !format.is_dynamic() {
            return Ok(format.id);
        }

        let key = format.format_key();
        if let Some(&pt) = self.by_format.get(&key) {
            return Ok(pt);
        }

        let pt = if self.is_free(format.id) {
            format.id
        } else {
            self.next_free().ok_or_else(|| {
                NegotiationError::internal("Dynamic payload type range 96-127 exhausted")
            })?
        };

        self.record(key, pt, format);
        debug!("Allocated dynamic payload type {} for {}", pt, format.name);
        Ok(pt)
    }

    /// Record a mapping the remote party announced
    ///
    /// If the format was already numbered differently locally, the remote
    /// number wins and the local one is remembered as overridden.
    pub fn add_mapping(&mut self, format: &PayloadFormat, pt: u8) -> Result<()> {
        if !(MIN_DYNAMIC_PAYLOAD_TYPE..=MAX_DYNAMIC_PAYLOAD_TYPE).contains(&pt) {
            return Err(NegotiationError::illegal_argument(format!(
                "Payload type {} is outside the dynamic range",
                pt
            )));
        }

        let key = format.format_key();
        if let Some(&previous) = self.by_format.get(&key) {
            if previous == pt {
                return Ok(());
            }
            debug!("Remote maps {} to {} instead of {}", format.name, pt, previous);
            self.by_number.remove(&previous);
            self.overrides.insert(previous, pt);
        }

        if let Some(displaced) = self.by_number.get(&pt) {
            let displaced_key = displaced.format_key();
            if displaced_key != key {
                warn!(
                    "Payload type {} moves from {} to {}",
                    pt, displaced.name, format.name
                );
                self.by_format.remove(&displaced_key);
            }
        }

        self.record(key, pt, format);
        Ok(())
    }

    /// Number a whole format list, keeping its order
    pub fn assign(&mut self, formats: &[PayloadFormat]) -> Result<Vec<PayloadFormat>> {
        formats
            .iter()
            .map(|f| {
                let mut f = f.clone();
                f.id = self.obtain_payload_type(&f)?;
                Ok(f)
            })
            .collect()
    }

    /// Learn the numbering of every dynamic format in a remote list
    pub fn learn_remote(&mut self, formats: &[PayloadFormat]) {
        for format in formats.iter().filter(|f| f.is_dynamic()) {
            if let Err(e) = self.add_mapping(format, format.id) {
                warn!("Ignoring remote payload type mapping {}: {}", format, e);
            }
        }
    }

    /// Payload type mapped to a format
    pub fn payload_type_for(&self, format: &PayloadFormat) -> Option<u8> {
        if !format.is_dynamic() {
            return Some(format.id);
        }
        self.by_format.get(&format.format_key()).copied()
    }

    /// Format mapped to a payload type
    pub fn format_for(&self, pt: u8) -> Option<&PayloadFormat> {
        self.by_number.get(&pt)
    }

    /// Local numbers the remote party replaced, and their replacement
    pub fn overrides(&self) -> &HashMap<u8, u8> {
        &self.overrides
    }

    fn is_free(&self, pt: u8) -> bool {
        (MIN_DYNAMIC_PAYLOAD_TYPE..=MAX_DYNAMIC_PAYLOAD_TYPE).contains(&pt) && !self.by_number.contains_key(&pt)
    }

    fn next_free(&self) -> Option<u8> {
        (MIN_DYNAMIC_PAYLOAD_TYPE..=MAX_DYNAMIC_PAYLOAD_TYPE).find(|pt| !self.by_number.contains_key(pt))
    }

    fn record(&mut self, key: String, pt: u8, format: &PayloadFormat) {
        let mut stored = format.clone();
        stored.id = pt;
        self.by_format.insert(key, pt);
        self.by_number.insert(pt, stored);
    }
}

/// Per-session allocator of RTP header extension ids
///
/// One-byte header ids (1-14) are handed out first, then two-byte ids.
#[derive(Debug, Clone, Default)]
pub struct RtpExtensionRegistry {
    by_uri: HashMap<String, u8>,
    by_id: HashMap<u8, String>,
}

impl RtpExtensionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Id to use for an extension URI
    pub fn obtain_extension_id(&mut self, uri: &str) -> Result<u8> {
        if let Some(&id) = self.by_uri.get(uri) {
            return Ok(id);
        }
        let id = (1..=14u8)
            .chain(16..=255u8)
            .find(|id| !self.by_id.contains_key(id))
            .ok_or_else(|| NegotiationError::internal("RTP extension id space exhausted"))?;
        self.by_uri.insert(uri.to_string(), id);
        self.by_id.insert(id, uri.to_string());
        debug!("Allocated RTP extension id {} for {}", id, uri);
        Ok(id)
    }

    /// Record the id the remote party uses for an extension
    pub fn add_mapping(&mut self, uri: &str, id: u8) {
        if let Some(old) = self.by_uri.insert(uri.to_string(), id) {
            self.by_id.remove(&old);
        }
        if let Some(displaced) = self.by_id.insert(id, uri.to_string()) {
            if displaced != uri {
                self.by_uri.remove(&displaced);
            }
        }
    }

    /// Number an extension list, keeping its order
    pub fn assign(&mut self, extensions: &[RtpExtension]) -> Result<Vec<RtpExtension>> {
        extensions
            .iter()
            .map(|e| {
                let mut e = e.clone();
                e.id = self.obtain_extension_id(&e.uri)?;
                Ok(e)
            })
            .collect()
    }

    /// Id mapped to a URI
    pub fn id_for(&self, uri: &str) -> Option<u8> {
        self.by_uri.get(uri).copied()
    }
}
