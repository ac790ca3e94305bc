//! Service discovery seam
//!
//! Capability checks against the remote peer (and the relay) go through
//! [`FeatureDiscovery`]. [`CachedFeatureDiscovery`] keeps the results of
//! disco#info queries the signaling layer already performed.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Answers whether an entity advertises a feature
pub trait FeatureDiscovery: Send + Sync {
    /// Whether `entity` advertises `feature`
    fn supports(&self, entity: &str, feature: &str) -> bool;

    /// Whether `entity` advertises every feature in `features`
    fn supports_all(&self, entity: &str, features: &[&str]) -> bool {
        features.iter().all(|f| self.supports(entity, f))
    }
}

/// Feature cache filled from disco#info results
#[derive(Debug, Default)]
pub struct CachedFeatureDiscovery {
    features: RwLock<HashMap<String, HashSet<String>>>,
}

impl CachedFeatureDiscovery {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the features advertised by an entity, replacing earlier results
    pub fn set_features<I, S>(&self, entity: impl Into<String>, features: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entity = entity.into();
        let features: HashSet<String> = features.into_iter().map(Into::into).collect();
        debug!("Cached {} disco features for {}", features.len(), entity);
        self.features.write().insert(entity, features);
    }

    /// Forget an entity
    pub fn remove(&self, entity: &str) {
        self.features.write().remove(entity);
    }
}

impl FeatureDiscovery for CachedFeatureDiscovery {
    fn supports(&self, entity: &str, feature: &str) -> bool {
        self.features
            .read()
            .get(entity)
            .map(|set| set.contains(feature))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{NS_JINGLE_DTLS, NS_JINGLE_ICE_UDP};

    #[test]
    fn test_cached_discovery() {
        let disco = CachedFeatureDiscovery::new();
        assert!(!disco.supports("romeo@example.net/orchard", NS_JINGLE_ICE_UDP));

        disco.set_features("romeo@example.net/orchard", [NS_JINGLE_ICE_UDP, NS_JINGLE_DTLS]);
        assert!(disco.supports("romeo@example.net/orchard", NS_JINGLE_ICE_UDP));
        assert!(disco.supports_all("romeo@example.net/orchard", &[NS_JINGLE_ICE_UDP, NS_JINGLE_DTLS]));

        disco.remove("romeo@example.net/orchard");
        assert!(!disco.supports("romeo@example.net/orchard", NS_JINGLE_DTLS));
    }
}
