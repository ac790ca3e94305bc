//! DTLS-SRTP fingerprint handling
//!
//! Certificates themselves live in the media layer; negotiation only needs
//! the local fingerprint, the setup role and the peer's fingerprints.

use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

use crate::content::{DtlsSetup, Fingerprint};
use crate::errors::{NegotiationError, Result};

/// Colon separated upper-case hex digest of `data`
pub fn compute_fingerprint(hash_function: &str, data: &[u8]) -> Result<String> {
    let digest: Vec<u8> = match hash_function.to_ascii_lowercase().as_str() {
        "sha-256" => Sha256::digest(data).to_vec(),
        "sha-512" => Sha512::digest(data).to_vec(),
        other => {
            return Err(NegotiationError::encryption(format!(
                "Unsupported fingerprint hash function: {}",
                other
            )))
        }
    };
    Ok(digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":"))
}

/// DTLS-SRTP state for one media type
#[derive(Debug, Clone)]
pub struct DtlsControl {
    hash_function: String,
    local_fingerprint: String,
    setup: DtlsSetup,
    remote_fingerprints: Vec<Fingerprint>,
    rtcp_mux: bool,
}

impl DtlsControl {
    /// Create a control with a fresh local certificate identity
    pub fn new(hash_function: &str) -> Result<Self> {
        let mut certificate = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut certificate);
        Self::with_certificate(hash_function, &certificate)
    }

    /// Create a control for a known DER certificate
    pub fn with_certificate(hash_function: &str, certificate_der: &[u8]) -> Result<Self> {
        let local_fingerprint = compute_fingerprint(hash_function, certificate_der)?;
        Ok(Self {
            hash_function: hash_function.to_ascii_lowercase(),
            local_fingerprint,
            setup: DtlsSetup::ActPass,
            remote_fingerprints: Vec::new(),
            rtcp_mux: false,
        })
    }

    /// Local fingerprint as advertised in a transport
    pub fn local_fingerprint(&self) -> Fingerprint {
        Fingerprint {
            hash: self.hash_function.clone(),
            value: self.local_fingerprint.clone(),
            setup: self.setup,
        }
    }

    /// Set the local setup role
    pub fn set_setup(&mut self, setup: DtlsSetup) {
        self.setup = setup;
    }

    /// Local setup role
    pub fn setup(&self) -> DtlsSetup {
        self.setup
    }

    /// Role actually played on the media path
    ///
    /// An initiator offering `actpass` stays passive until the answer says
    /// otherwise.
    pub fn effective_setup(&self) -> DtlsSetup {
        match self.setup {
            DtlsSetup::ActPass => DtlsSetup::Passive,
            other => other,
        }
    }

    /// Resolve our role from the peer's answered setup
    pub fn resolve_setup(&mut self, remote: DtlsSetup) {
        if self.setup != DtlsSetup::ActPass {
            return;
        }
        self.setup = match remote {
            DtlsSetup::Active => DtlsSetup::Passive,
            DtlsSetup::Passive => DtlsSetup::Active,
            _ => DtlsSetup::ActPass,
        };
        debug!("DTLS setup resolved to {} after peer answered {}", self.setup, remote);
    }

    /// Record the peer's fingerprints
    pub fn set_remote_fingerprints(&mut self, fingerprints: Vec<Fingerprint>) {
        self.remote_fingerprints = fingerprints;
    }

    /// Fingerprints the peer advertised
    pub fn remote_fingerprints(&self) -> &[Fingerprint] {
        &self.remote_fingerprints
    }

    /// Set whether RTP and RTCP share the DTLS association
    pub fn set_rtcp_mux(&mut self, rtcp_mux: bool) {
        self.rtcp_mux = rtcp_mux;
    }

    /// Whether RTP and RTCP share the DTLS association
    pub fn rtcp_mux(&self) -> bool {
        self.rtcp_mux
    }

    /// Forget the peer's state
    pub fn cleanup(&mut self) {
        self.remote_fingerprints.clear();
        self.setup = DtlsSetup::ActPass;
        self.rtcp_mux = false;
    }
}
