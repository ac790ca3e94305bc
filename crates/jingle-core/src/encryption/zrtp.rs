//! ZRTP hello-hash signaling
//!
//! The handshake itself happens on the media path. Signaling only carries
//! one `<zrtp-hash/>` per supported protocol version so the peer can bind
//! the media-path hello to this session.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::content::ZrtpHash;

type HmacSha256 = Hmac<Sha256>;

/// ZRTP identifier length in bytes
pub const ZID_LENGTH: usize = 12;

/// Bare JID of a full JID
pub fn bare_jid(jid: &str) -> &str {
    jid.split('/').next().unwrap_or(jid)
}

/// Derive the local ZID used towards a peer
///
/// Stable for an account and peer pair so the peer's cached shared
/// secrets stay valid across calls.
pub fn generate_zid(account_id: &str, peer: &str) -> [u8; ZID_LENGTH] {
    let mut mac = match HmacSha256::new_from_slice(account_id.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts any key length
        Err(_) => return [0u8; ZID_LENGTH],
    };
    mac.update(bare_jid(peer).as_bytes());
    let digest = mac.finalize().into_bytes();
    let mut zid = [0u8; ZID_LENGTH];
    zid.copy_from_slice(&digest[..ZID_LENGTH]);
    zid
}

/// ZRTP state for one media type
#[derive(Debug, Clone)]
pub struct ZrtpControl {
    zid: [u8; ZID_LENGTH],
    versions: Vec<String>,
    peer_version: Option<String>,
    peer_hash: Option<String>,
    master: bool,
}

impl ZrtpControl {
    /// Create a control for a ZID and the supported versions
    pub fn new(zid: [u8; ZID_LENGTH], versions: Vec<String>) -> Self {
        Self {
            zid,
            versions,
            peer_version: None,
            peer_hash: None,
            master: false,
        }
    }

    /// Local ZID
    pub fn zid(&self) -> &[u8; ZID_LENGTH] {
        &self.zid
    }

    /// Hello hash for one protocol version
    pub fn hello_hash(&self, version: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(version.as_bytes());
        hasher.update(self.zid);
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    /// One hello hash per supported version
    pub fn hello_hashes(&self) -> Vec<ZrtpHash> {
        self.versions
            .iter()
            .map(|v| ZrtpHash {
                version: v.clone(),
                value: self.hello_hash(v),
            })
            .collect()
    }

    /// Record the version and hash the peer signaled
    pub fn set_peer_hash(&mut self, version: impl Into<String>, hash: impl Into<String>) {
        self.peer_version = Some(version.into());
        self.peer_hash = Some(hash.into());
    }

    /// Hash the peer signaled
    pub fn peer_hash(&self) -> Option<&str> {
        self.peer_hash.as_deref()
    }

    /// Version the peer signaled
    pub fn peer_version(&self) -> Option<&str> {
        self.peer_version.as_deref()
    }

    /// Mark whether this stream runs the DH exchange for the session
    pub fn set_master(&mut self, master: bool) {
        self.master = master;
    }

    /// Whether this stream runs the DH exchange for the session
    pub fn is_master(&self) -> bool {
        self.master
    }

    /// Forget the peer's state
    pub fn cleanup(&mut self) {
        self.peer_version = None;
        self.peer_hash = None;
        self.master = false;
    }
}
