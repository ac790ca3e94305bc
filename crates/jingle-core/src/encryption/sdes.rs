//! SDES crypto-attribute keying
//!
//! The initiator offers one `<crypto/>` per enabled suite, each with fresh
//! inline keying material. The responder picks the first peer attribute
//! whose suite it also supports and answers with its own key under the
//! same tag. When the answer comes back, the initiator matches it against
//! what it offered.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use tracing::debug;

use crate::content::CryptoAttribute;
use crate::errors::{NegotiationError, Result};

/// Crypto suites this implementation can key
pub const SUPPORTED_CRYPTO_SUITES: &[&str] = &[
    "AES_CM_128_HMAC_SHA1_80",
    "AES_CM_128_HMAC_SHA1_32",
    "AES_256_CM_HMAC_SHA1_80",
    "AES_256_CM_HMAC_SHA1_32",
];

/// Master key plus master salt length for a suite
fn master_key_length(suite: &str) -> Option<usize> {
    match suite {
        "AES_CM_128_HMAC_SHA1_80" | "AES_CM_128_HMAC_SHA1_32" => Some(16 + 14),
        "AES_256_CM_HMAC_SHA1_80" | "AES_256_CM_HMAC_SHA1_32" => Some(32 + 14),
        _ => None,
    }
}

/// Generate `inline:` keying material for a suite
pub fn generate_key_params(suite: &str) -> Result<String> {
    let len = master_key_length(suite)
        .ok_or_else(|| NegotiationError::encryption(format!("Unsupported crypto suite: {}", suite)))?;
    let mut key = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut key);
    Ok(format!("inline:{}", STANDARD.encode(&key)))
}

/// SDES state for one media type
#[derive(Debug, Clone)]
pub struct SdesControl {
    suites: Vec<String>,
    offered: Vec<CryptoAttribute>,
    in_use: Option<CryptoAttribute>,
    remote_in_use: Option<CryptoAttribute>,
}

impl SdesControl {
    /// Create a control for the enabled suites, most preferred first
    pub fn new(suites: Vec<String>) -> Self {
        Self {
            suites,
            offered: Vec::new(),
            in_use: None,
            remote_in_use: None,
        }
    }

    /// Attributes to put in an offer, generated once per control
    pub fn initiator_attributes(&mut self) -> Result<Vec<CryptoAttribute>> {
        if self.offered.is_empty() {
            let mut offered = Vec::with_capacity(self.suites.len());
            for (index, suite) in self.suites.iter().enumerate() {
                offered.push(CryptoAttribute {
                    tag: index as u32 + 1,
                    crypto_suite: suite.clone(),
                    key_params: generate_key_params(suite)?,
                    session_params: None,
                });
            }
            self.offered = offered;
        }
        Ok(self.offered.clone())
    }

    /// Select the attribute to use from the peer's list
    ///
    /// `peer` is in the peer's preference order. As responder the first
    /// attribute with a supported suite wins and a local attribute with
    /// the same tag is returned for the answer. As initiator the peer's
    /// answer must echo a tag and suite we offered.
    pub fn select_attribute(&mut self, peer: &[CryptoAttribute], initiator: bool) -> Result<Option<CryptoAttribute>> {
        if initiator {
            Ok(self.initiator_select(peer))
        } else {
            self.responder_select(peer)
        }
    }

    fn responder_select(&mut self, peer: &[CryptoAttribute]) -> Result<Option<CryptoAttribute>> {
        // already answered: keep our key as long as the peer keeps the tag
        if let Some(local) = self.in_use.clone() {
            let kept = peer
                .iter()
                .find(|a| a.tag == local.tag && a.crypto_suite == local.crypto_suite);
            if let Some(remote) = kept {
                self.remote_in_use = Some(remote.clone());
                return Ok(Some(local));
            }
        }

        let Some(remote) = peer.iter().find(|a| self.suites.iter().any(|s| s == &a.crypto_suite)) else {
            debug!("No mutually supported SDES suite among {} offered", peer.len());
            return Ok(None);
        };

        let local = CryptoAttribute {
            tag: remote.tag,
            crypto_suite: remote.crypto_suite.clone(),
            key_params: generate_key_params(&remote.crypto_suite)?,
            session_params: None,
        };
        debug!("Selected SDES suite {} with tag {}", local.crypto_suite, local.tag);
        self.remote_in_use = Some(remote.clone());
        self.in_use = Some(local.clone());
        Ok(Some(local))
    }

    fn initiator_select(&mut self, peer: &[CryptoAttribute]) -> Option<CryptoAttribute> {
        for remote in peer {
            let offered = self
                .offered
                .iter()
                .find(|o| o.tag == remote.tag && o.crypto_suite == remote.crypto_suite);
            if let Some(offered) = offered {
                self.in_use = Some(offered.clone());
                self.remote_in_use = Some(remote.clone());
                return Some(offered.clone());
            }
        }
        None
    }

    /// Local attribute in use once selection succeeded
    pub fn in_use(&self) -> Option<&CryptoAttribute> {
        self.in_use.as_ref()
    }

    /// Peer attribute in use once selection succeeded
    pub fn remote_in_use(&self) -> Option<&CryptoAttribute> {
        self.remote_in_use.as_ref()
    }

    /// Forget every key
    pub fn cleanup(&mut self) {
        self.offered.clear();
        self.in_use = None;
        self.remote_in_use = None;
    }
}
