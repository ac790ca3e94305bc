//! Negotiation configuration
//!
//! Account-level settings that steer negotiation: encryption protocol
//! priority, SDES cipher suites, transports this side can speak, the
//! transport selection timeout and the user's per-media direction
//! preferences. Loadable from TOML or assembled with
//! [`NegotiationConfigBuilder`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::encryption::sdes::SUPPORTED_CRYPTO_SUITES;
use crate::encryption::EncryptionProtocol;
use crate::errors::{NegotiationError, Result};
use crate::transport::TransportMethod;
use crate::types::{MediaDirection, MediaType};

/// Default wait for the initiator to reveal its transport
pub const DEFAULT_TRANSPORT_SELECTION_TIMEOUT_MS: u64 = 5000;

/// Encryption settings of the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Master switch for SRTP
    pub default_encryption: bool,
    /// Enabled protocols, most preferred first
    pub priority: Vec<EncryptionProtocol>,
    /// SDES suites offered, most preferred first
    pub sdes_cipher_suites: Vec<String>,
    /// ZRTP versions advertised as hello hashes
    pub zrtp_versions: Vec<String>,
    /// Hash function for DTLS fingerprints
    pub fingerprint_hash: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            default_encryption: true,
            priority: vec![
                EncryptionProtocol::Fingerprint,
                EncryptionProtocol::CryptoAttribute,
                EncryptionProtocol::HandshakeHash,
            ],
            sdes_cipher_suites: vec![
                "AES_CM_128_HMAC_SHA1_80".to_string(),
                "AES_CM_128_HMAC_SHA1_32".to_string(),
            ],
            zrtp_versions: vec!["1.10".to_string()],
            fingerprint_hash: "sha-256".to_string(),
        }
    }
}

impl EncryptionConfig {
    /// Whether a protocol is enabled for this account
    pub fn is_enabled(&self, protocol: EncryptionProtocol) -> bool {
        self.default_encryption && self.priority.contains(&protocol)
    }
}

/// Transport settings of the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport methods this side advertises in disco
    pub locally_supported: Vec<TransportMethod>,
    /// Responder-side wait for the initiator's transport, in milliseconds
    pub selection_timeout_ms: u64,
    /// Whether rtcp-mux is offered
    pub rtcp_mux: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            locally_supported: vec![TransportMethod::IceUdp, TransportMethod::RawUdp],
            selection_timeout_ms: DEFAULT_TRANSPORT_SELECTION_TIMEOUT_MS,
            rtcp_mux: true,
        }
    }
}

impl TransportConfig {
    /// Selection timeout as a duration
    pub fn selection_timeout(&self) -> Duration {
        Duration::from_millis(self.selection_timeout_ms)
    }
}

/// The user's direction preference per media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionPreferences {
    /// Audio preference
    pub audio: MediaDirection,
    /// Video preference
    pub video: MediaDirection,
}

impl Default for DirectionPreferences {
    fn default() -> Self {
        Self {
            audio: MediaDirection::SendRecv,
            video: MediaDirection::SendRecv,
        }
    }
}

impl DirectionPreferences {
    /// Preference for a media type
    pub fn get(&self, media: MediaType) -> MediaDirection {
        match media {
            MediaType::Audio => self.audio,
            MediaType::Video => self.video,
        }
    }

    /// Change the preference for a media type
    pub fn set(&mut self, media: MediaType, direction: MediaDirection) {
        match media {
            MediaType::Audio => self.audio = direction,
            MediaType::Video => self.video = direction,
        }
    }
}

/// Configuration of one account's negotiation behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Local account identifier, used to derive the ZRTP ZID
    pub account_id: String,
    /// Encryption settings
    pub encryption: EncryptionConfig,
    /// Transport settings
    pub transport: TransportConfig,
    /// User direction preferences
    pub direction_preferences: DirectionPreferences,
    /// Whether outgoing video offers accept remote input events
    pub local_input_evt_aware: bool,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            account_id: "anonymous@localhost".to_string(),
            encryption: EncryptionConfig::default(),
            transport: TransportConfig::default(),
            direction_preferences: DirectionPreferences::default(),
            local_input_evt_aware: false,
        }
    }
}

impl NegotiationConfig {
    /// Start building a configuration
    pub fn builder() -> NegotiationConfigBuilder {
        NegotiationConfigBuilder::new()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: NegotiationConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let input = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&input)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| NegotiationError::config(e.to_string()))
    }

    /// Check the configuration for contradictions
    pub fn validate(&self) -> Result<()> {
        if self.transport.locally_supported.is_empty() {
            return Err(NegotiationError::config("At least one transport method must be supported"));
        }
        if self.transport.selection_timeout_ms == 0 {
            return Err(NegotiationError::config("Transport selection timeout must be positive"));
        }
        for suite in &self.encryption.sdes_cipher_suites {
            if !SUPPORTED_CRYPTO_SUITES.contains(&suite.as_str()) {
                return Err(NegotiationError::config(format!("Unknown SDES crypto suite: {}", suite)));
            }
        }
        let mut seen = Vec::new();
        for protocol in &self.encryption.priority {
            if seen.contains(protocol) {
                return Err(NegotiationError::config(format!(
                    "Encryption protocol {} listed twice",
                    protocol
                )));
            }
            seen.push(*protocol);
        }
        Ok(())
    }
}

/// Builder for [`NegotiationConfig`]
#[derive(Debug, Clone, Default)]
pub struct NegotiationConfigBuilder {
    config: NegotiationConfig,
}

impl NegotiationConfigBuilder {
    /// Start from the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the account identifier
    pub fn account_id(mut self, account_id: impl Into<String>) -> Self {
        self.config.account_id = account_id.into();
        self
    }

    /// Enable or disable SRTP altogether
    pub fn default_encryption(mut self, enabled: bool) -> Self {
        self.config.encryption.default_encryption = enabled;
        self
    }

    /// Set the enabled encryption protocols in priority order
    pub fn encryption_priority(mut self, priority: Vec<EncryptionProtocol>) -> Self {
        self.config.encryption.priority = priority;
        self
    }

    /// Set the SDES suites
    pub fn sdes_cipher_suites(mut self, suites: Vec<String>) -> Self {
        self.config.encryption.sdes_cipher_suites = suites;
        self
    }

    /// Set the transports this side supports
    pub fn locally_supported_transports(mut self, transports: Vec<TransportMethod>) -> Self {
        self.config.transport.locally_supported = transports;
        self
    }

    /// Set the transport selection timeout
    pub fn selection_timeout(mut self, timeout: Duration) -> Self {
        self.config.transport.selection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Offer rtcp-mux or not
    pub fn rtcp_mux(mut self, enabled: bool) -> Self {
        self.config.transport.rtcp_mux = enabled;
        self
    }

    /// Set the user preference for a media type
    pub fn direction_preference(mut self, media: MediaType, direction: MediaDirection) -> Self {
        self.config.direction_preferences.set(media, direction);
        self
    }

    /// Accept remote input events on video
    pub fn local_input_evt_aware(mut self, aware: bool) -> Self {
        self.config.local_input_evt_aware = aware;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<NegotiationConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
