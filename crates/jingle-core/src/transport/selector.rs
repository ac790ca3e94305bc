//! Once-only transport method selection
//!
//! The method is chosen at most once per call: by the initiator from the
//! allow-list or feature discovery, or by the responder from the first
//! offer. Responder operations that need it before the offer arrives wait
//! on the selector, bounded by the selection timeout.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::TransportMethod;
use crate::discovery::FeatureDiscovery;
use crate::errors::{NegotiationError, Result};

/// Once-only transport selection, awaitable
#[derive(Debug)]
pub struct TransportSelector {
    selected: watch::Sender<Option<TransportMethod>>,
    allow_list: Mutex<Option<Vec<TransportMethod>>>,
    timeout: Duration,
}

impl TransportSelector {
    /// Create an unresolved selector
    pub fn new(timeout: Duration) -> Self {
        let (selected, _) = watch::channel(None);
        Self {
            selected,
            allow_list: Mutex::new(None),
            timeout,
        }
    }

    /// The selected method, if any
    pub fn selected(&self) -> Option<TransportMethod> {
        *self.selected.borrow()
    }

    /// Bound on [`TransportSelector::wait_for_selection`]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record the method used by a content
    ///
    /// The first call fixes the method; later calls must agree with it.
    pub fn select(&self, method: TransportMethod, content: &str) -> Result<TransportMethod> {
        let mut existing = None;
        let changed = self.selected.send_if_modified(|current| match current {
            None => {
                *current = Some(method);
                true
            }
            Some(selected) => {
                existing = Some(*selected);
                false
            }
        });

        if changed {
            info!("Transport method {} selected by content {}", method, content);
            return Ok(method);
        }
        match existing {
            Some(selected) if selected == method => Ok(selected),
            Some(selected) => Err(NegotiationError::TransportMismatch {
                content: content.to_string(),
                selected: selected.to_string(),
                offered: method.to_string(),
            }),
            None => Err(NegotiationError::internal("Transport selection lost")),
        }
    }

    /// Wait until a method is selected or the timeout expires
    pub async fn wait_for_selection(&self) -> Result<TransportMethod> {
        if let Some(method) = self.selected() {
            return Ok(method);
        }

        let mut rx = self.selected.subscribe();
        let outcome = match tokio::time::timeout(self.timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => *value,
            Ok(Err(_)) => None,
            Err(_) => {
                warn!("No transport selected within {:?}", self.timeout);
                return Err(NegotiationError::TransportNotSpecified {
                    waited_ms: self.timeout.as_millis() as u64,
                });
            }
        };
        outcome.ok_or_else(|| NegotiationError::invalid_state("Transport selector closed"))
    }

    /// Restrict the initiator's choice to an ordered allow-list
    ///
    /// Only ICE-UDP and raw UDP are understood; ICE-UDP is kept first. An
    /// empty result clears the allow-list.
    pub fn set_supported_transports(&self, namespaces: &[String]) {
        let list: Vec<TransportMethod> = TransportMethod::PREFERENCE_ORDER
            .into_iter()
            .filter(|m| namespaces.iter().any(|ns| ns == m.namespace()))
            .collect();
        debug!("Transport allow-list set to {:?}", list);
        *self.allow_list.lock() = if list.is_empty() { None } else { Some(list) };
    }

    /// The configured allow-list
    pub fn supported_transports(&self) -> Option<Vec<TransportMethod>> {
        self.allow_list.lock().clone()
    }

    /// Choose the method as initiator
    ///
    /// The first allow-list entry wins when one is configured. Otherwise
    /// ICE-UDP then raw UDP are tried against feature discovery, skipping
    /// ICE-UDP when the relay cannot do it. A method must be locally
    /// supported either way.
    pub fn choose_as_initiator(
        &self,
        peer: &str,
        discovery: &dyn FeatureDiscovery,
        locally_supported: &[TransportMethod],
        relay_supports_ice: bool,
    ) -> Result<TransportMethod> {
        if let Some(method) = self.selected() {
            return Ok(method);
        }

        let allowed = self.supported_transports();
        let chosen = match allowed {
            Some(list) => list.into_iter().find(|m| locally_supported.contains(m)),
            None => TransportMethod::PREFERENCE_ORDER.into_iter().find(|m| {
                locally_supported.contains(m)
                    && discovery.supports(peer, m.namespace())
                    && (*m != TransportMethod::IceUdp || relay_supports_ice)
            }),
        };

        match chosen {
            Some(method) => self.select(method, "initiator"),
            None => Err(NegotiationError::unsupported_transport(format!(
                "no transport supported by {}",
                peer
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::CachedFeatureDiscovery;
    use std::sync::Arc;

    const PEER: &str = "romeo@montague.lit/orchard";

    #[test]
    fn test_selection_is_monotonic() {
        let selector = TransportSelector::new(Duration::from_secs(5));
        assert_eq!(selector.select(TransportMethod::RawUdp, "audio").expect("first"), TransportMethod::RawUdp);
        assert!(selector.select(TransportMethod::RawUdp, "video").is_ok());

        let err = selector
            .select(TransportMethod::IceUdp, "video")
            .expect_err("mismatch");
        assert!(matches!(err, NegotiationError::TransportMismatch { .. }));
        assert_eq!(selector.selected(), Some(TransportMethod::RawUdp));
    }

    #[test]
    fn test_initiator_uses_discovery_order() {
        let selector = TransportSelector::new(Duration::from_secs(5));
        let disco = CachedFeatureDiscovery::new();
        disco.set_features(PEER, [TransportMethod::RawUdp.namespace(), TransportMethod::IceUdp.namespace()]);
        let local = [TransportMethod::IceUdp, TransportMethod::RawUdp];

        let chosen = selector
            .choose_as_initiator(PEER, &disco, &local, true)
            .expect("a common transport");
        assert_eq!(chosen, TransportMethod::IceUdp);
    }

    #[test]
    fn test_relay_without_ice_falls_back() {
        let selector = TransportSelector::new(Duration::from_secs(5));
        let disco = CachedFeatureDiscovery::new();
        disco.set_features(PEER, [TransportMethod::RawUdp.namespace(), TransportMethod::IceUdp.namespace()]);
        let local = [TransportMethod::IceUdp, TransportMethod::RawUdp];

        let chosen = selector
            .choose_as_initiator(PEER, &disco, &local, false)
            .expect("raw udp");
        assert_eq!(chosen, TransportMethod::RawUdp);
    }

    #[test]
    fn test_allow_list_wins_and_ignores_unknown() {
        let selector = TransportSelector::new(Duration::from_secs(5));
        selector.set_supported_transports(&[
            "urn:xmpp:jingle:transports:s5b:1".to_string(),
            TransportMethod::RawUdp.namespace().to_string(),
        ]);
        assert_eq!(selector.supported_transports(), Some(vec![TransportMethod::RawUdp]));

        let disco = CachedFeatureDiscovery::new();
        let chosen = selector
            .choose_as_initiator(PEER, &disco, &[TransportMethod::IceUdp, TransportMethod::RawUdp], true)
            .expect("allow-list entry");
        assert_eq!(chosen, TransportMethod::RawUdp);
    }

    #[test]
    fn test_nothing_in_common() {
        let selector = TransportSelector::new(Duration::from_secs(5));
        let disco = CachedFeatureDiscovery::new();
        let err = selector
            .choose_as_initiator(PEER, &disco, &[TransportMethod::IceUdp], true)
            .expect_err("peer advertises nothing");
        assert!(matches!(err, NegotiationError::UnsupportedTransport { .. }));
        assert_eq!(selector.selected(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let selector = TransportSelector::new(Duration::from_millis(5000));
        let err = selector.wait_for_selection().await.expect_err("nothing selected");
        assert!(matches!(err, NegotiationError::TransportNotSpecified { waited_ms: 5000 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_wakes_on_selection() {
        let selector = Arc::new(TransportSelector::new(Duration::from_millis(5000)));
        let waiter = {
            let selector = Arc::clone(&selector);
            tokio::spawn(async move { selector.wait_for_selection().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        selector.select(TransportMethod::IceUdp, "audio").expect("selected");

        let method = waiter.await.expect("task joins").expect("selection seen");
        assert_eq!(method, TransportMethod::IceUdp);
    }
}
