//! Relay (conference bridge) channels
//!
//! When the local party is a conference focus backed by a media relay,
//! each content of a call peer gets a pair of relay channels: the first
//! carries the focus's own stream, the second the peer's. The peer is
//! given the relay's transport and fingerprints; relay directives set the
//! direction of the peer's channel.

use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::content::{ContentDescriptor, Fingerprint, TransportBlock};
use crate::errors::{NegotiationError, Result};
use crate::media::StreamTarget;
use crate::types::{MediaDirection, MediaType};

/// A channel allocated on the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayChannel {
    /// Relay assigned channel id
    pub id: String,
    /// Media type
    pub media: MediaType,
    /// Direction the relay uses on the channel
    pub direction: MediaDirection,
    /// SSRCs the relay has seen on the channel
    pub ssrcs: Vec<u32>,
    /// Relay side transport of the channel
    pub transport: Option<TransportBlock>,
}

/// Relay side endpoint of a relayed media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedMedia {
    /// Channel carrying the peer's stream
    pub channel_id: String,
    /// Transport the peer is given
    pub advertised: TransportBlock,
    /// Where the local stream sends
    pub target: Option<StreamTarget>,
}

/// SSRCs reported for one channel in a relay conference update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayChannelUpdate {
    /// Channel id
    pub id: String,
    /// SSRCs now seen on the channel
    pub ssrcs: Vec<u32>,
}

/// State pushed by the relay for a conference
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayConferenceUpdate {
    /// Channel updates grouped by media type
    pub contents: Vec<(MediaType, Vec<RelayChannelUpdate>)>,
}

/// Relay conference control
#[async_trait]
pub trait RelayControl: Send + Sync {
    /// Whether the relay supports ICE-UDP
    fn supports_ice(&self) -> bool;

    /// Allocate the channels of one content for a peer
    async fn allocate_channels(&self, media: MediaType, peer: &str) -> Result<Vec<RelayChannel>>;

    /// Expire the channels of one content
    async fn expire_channels(&self, media: MediaType, channels: &[RelayChannel]) -> Result<()>;

    /// Change the direction of a channel
    async fn set_channel_direction(&self, channel_id: &str, media: MediaType, direction: MediaDirection) -> Result<()>;

    /// Hand a peer's transport to a channel
    async fn send_transport_info(&self, channel_id: &str, media: MediaType, transport: &TransportBlock) -> Result<()>;
}

/// Relay channels of one call peer, grouped by media type
pub struct RelayChannels {
    control: Arc<dyn RelayControl>,
    contents: IndexMap<MediaType, Vec<RelayChannel>>,
}

impl RelayChannels {
    /// Create an empty set of channels on a relay
    pub fn new(control: Arc<dyn RelayControl>) -> Self {
        Self {
            control,
            contents: IndexMap::new(),
        }
    }

    /// Whether the relay supports ICE-UDP
    pub fn supports_ice(&self) -> bool {
        self.control.supports_ice()
    }

    /// Media types with allocated channels
    pub fn allocated_media(&self) -> Vec<MediaType> {
        self.contents.keys().copied().collect()
    }

    /// Channel carrying the local party's own stream
    pub fn local_channel(&self, media: MediaType) -> Option<&RelayChannel> {
        self.contents.get(&media).filter(|c| c.len() == 2).map(|c| &c[0])
    }

    /// Channel carrying the peer's stream
    pub fn remote_channel(&self, media: MediaType) -> Option<&RelayChannel> {
        self.contents.get(&media).filter(|c| c.len() == 2).map(|c| &c[1])
    }

    fn remote_channel_mut(&mut self, media: MediaType) -> Option<&mut RelayChannel> {
        self.contents
            .get_mut(&media)
            .filter(|c| c.len() == 2)
            .map(|c| &mut c[1])
    }

    /// Allocate the channels of every media type that has none yet
    ///
    /// Missing media types are requested concurrently. The relay must
    /// return one local and one remote channel per content; anything else
    /// is an allocation failure. Channels allocated before a failure are
    /// kept.
    pub async fn ensure_allocated(&mut self, media: &[MediaType], peer: &str) -> Result<()> {
        let mut missing: Vec<MediaType> = Vec::new();
        for m in media {
            if !self.contents.contains_key(m) && !missing.contains(m) {
                missing.push(*m);
            }
        }
        if missing.is_empty() {
            return Ok(());
        }

        let control = &self.control;
        let results = join_all(missing.iter().map(|m| async move { (*m, control.allocate_channels(*m, peer).await) })).await;

        let mut failure = None;
        for (media, result) in results {
            let channels = match result {
                Ok(channels) if channels.len() == 2 => channels,
                Ok(channels) => {
                    failure.get_or_insert(NegotiationError::relay_allocation(
                        media,
                        format!("expected 2 channels, relay returned {}", channels.len()),
                    ));
                    continue;
                }
                Err(e) => {
                    failure.get_or_insert(NegotiationError::relay_allocation(media, e.to_string()));
                    continue;
                }
            };
            info!(
                "Allocated relay channels {} and {} for {} of {}",
                channels[0].id, channels[1].id, media, peer
            );
            self.contents.insert(media, channels);
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Relay endpoints of every allocated media type
    pub fn relayed_media(&self) -> HashMap<MediaType, RelayedMedia> {
        self.contents
            .keys()
            .filter_map(|media| {
                let local = self.local_channel(*media)?;
                let remote = self.remote_channel(*media)?;
                let advertised = remote.transport.clone()?;
                Some((
                    *media,
                    RelayedMedia {
                        channel_id: remote.id.clone(),
                        advertised,
                        target: local.transport.as_ref().and_then(|t| t.default_target()),
                    },
                ))
            })
            .collect()
    }

    /// Fingerprints the relay uses towards the peer, per media type
    pub fn fingerprints(&self) -> HashMap<MediaType, Vec<Fingerprint>> {
        self.contents
            .keys()
            .filter_map(|media| {
                let transport = self.remote_channel(*media)?.transport.as_ref()?;
                if transport.fingerprints.is_empty() {
                    None
                } else {
                    Some((*media, transport.fingerprints.clone()))
                }
            })
            .collect()
    }

    /// Direction of the peer's channel
    pub fn channel_direction(&self, media: MediaType) -> Option<MediaDirection> {
        self.remote_channel(media).map(|c| c.direction)
    }

    /// Set the direction of the peer's channel
    ///
    /// Unchanged directions are not sent to the relay.
    pub async fn set_direction(&mut self, media: MediaType, direction: MediaDirection) -> Result<()> {
        let control = Arc::clone(&self.control);
        let Some(channel) = self.remote_channel_mut(media) else {
            return Err(NegotiationError::relay_directive(format!("No relay channel for {}", media)));
        };
        if channel.direction == direction {
            return Ok(());
        }
        control
            .set_channel_direction(&channel.id, media, direction)
            .await
            .map_err(|e| NegotiationError::relay_directive(e.to_string()))?;
        debug!("Relay channel {} of {} now {}", channel.id, media, direction);
        channel.direction = direction;
        Ok(())
    }

    /// Hand the peer's transports to its channels
    pub async fn send_transport_info(&self, remote: &[ContentDescriptor]) -> Result<()> {
        for content in remote {
            let (Some(media), Some(transport)) = (content.media_type(), content.transport.as_ref()) else {
                continue;
            };
            match self.remote_channel(media) {
                Some(channel) => {
                    self.control
                        .send_transport_info(&channel.id, media, transport)
                        .await
                        .map_err(|e| NegotiationError::relay_directive(e.to_string()))?;
                }
                None => warn!("No relay channel for {}, dropping transport of {}", media, content.name),
            }
        }
        Ok(())
    }

    /// Expire the channels of a media type
    ///
    /// Failures are logged; a relay that lost the channels has nothing
    /// left to expire.
    pub async fn close_stream_connector(&mut self, media: MediaType) {
        let Some(channels) = self.contents.get(&media) else {
            return;
        };
        if channels.len() == 2 {
            if let Err(e) = self.control.expire_channels(media, channels).await {
                warn!("Failed to expire relay channels for {}: {}", media, e);
            } else {
                debug!("Expired relay channels for {}", media);
            }
        }
        self.contents.shift_remove(&media);
    }

    /// Apply SSRC changes pushed by the relay
    ///
    /// Returns the media types whose peer channel SSRC changed.
    pub fn process_conference(&mut self, update: &RelayConferenceUpdate) -> Vec<MediaType> {
        let mut changed = Vec::new();
        for (media, updates) in &update.contents {
            let Some(channels) = self.contents.get_mut(media) else {
                continue;
            };
            for channel_update in updates {
                let Some(position) = channels.iter().position(|c| c.id == channel_update.id) else {
                    continue;
                };
                let channel = &mut channels[position];
                let previous = channel.ssrcs.last().copied();
                channel.ssrcs = channel_update.ssrcs.clone();
                if position == 1 && previous != channel.ssrcs.last().copied() && !changed.contains(media) {
                    changed.push(*media);
                }
            }
        }
        changed
    }

    /// Last SSRC the relay reported for the peer's stream
    pub fn remote_ssrc(&self, media: MediaType) -> Option<u32> {
        self.remote_channel(media).and_then(|c| c.ssrcs.last().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingRelay {
        channels: usize,
        directions: Mutex<Vec<(String, MediaDirection)>>,
        expired: Mutex<Vec<MediaType>>,
    }

    impl RecordingRelay {
        fn new(channels: usize) -> Arc<Self> {
            Arc::new(Self {
                channels,
                directions: Mutex::new(Vec::new()),
                expired: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RelayControl for RecordingRelay {
        fn supports_ice(&self) -> bool {
            true
        }

        async fn allocate_channels(&self, media: MediaType, _peer: &str) -> Result<Vec<RelayChannel>> {
            Ok((0..self.channels)
                .map(|i| RelayChannel {
                    id: format!("{}-{}", media, i),
                    media,
                    direction: MediaDirection::SendRecv,
                    ssrcs: Vec::new(),
                    transport: Some(TransportBlock::ice_udp()),
                })
                .collect())
        }

        async fn expire_channels(&self, media: MediaType, _channels: &[RelayChannel]) -> Result<()> {
            self.expired.lock().push(media);
            Ok(())
        }

        async fn set_channel_direction(&self, channel_id: &str, _media: MediaType, direction: MediaDirection) -> Result<()> {
            self.directions.lock().push((channel_id.to_string(), direction));
            Ok(())
        }

        async fn send_transport_info(&self, _channel_id: &str, _media: MediaType, _transport: &TransportBlock) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_allocation_needs_two_channels() {
        let mut channels = RelayChannels::new(RecordingRelay::new(1));
        let err = channels
            .ensure_allocated(&[MediaType::Audio], "romeo@montague.lit")
            .await
            .expect_err("one channel is malformed");
        assert!(matches!(err, NegotiationError::RelayAllocation { .. }));
        assert!(channels.allocated_media().is_empty());
    }

    #[tokio::test]
    async fn test_direction_targets_peer_channel() {
        let relay = RecordingRelay::new(2);
        let mut channels = RelayChannels::new(relay.clone());
        channels
            .ensure_allocated(&[MediaType::Video], "romeo@montague.lit")
            .await
            .expect("allocated");

        channels
            .set_direction(MediaType::Video, MediaDirection::SendOnly)
            .await
            .expect("directive sent");
        // unchanged, not re-sent
        channels
            .set_direction(MediaType::Video, MediaDirection::SendOnly)
            .await
            .expect("no-op");

        assert_eq!(
            *relay.directions.lock(),
            vec![("video-1".to_string(), MediaDirection::SendOnly)]
        );
        assert_eq!(channels.channel_direction(MediaType::Video), Some(MediaDirection::SendOnly));
    }

    #[tokio::test]
    async fn test_conference_update_reports_remote_ssrc() {
        let relay = RecordingRelay::new(2);
        let mut channels = RelayChannels::new(relay.clone());
        channels
            .ensure_allocated(&[MediaType::Audio], "romeo@montague.lit")
            .await
            .expect("allocated");

        let update = RelayConferenceUpdate {
            contents: vec![(
                MediaType::Audio,
                vec![
                    RelayChannelUpdate {
                        id: "audio-0".to_string(),
                        ssrcs: vec![1],
                    },
                    RelayChannelUpdate {
                        id: "audio-1".to_string(),
                        ssrcs: vec![10, 11],
                    },
                ],
            )],
        };
        assert_eq!(channels.process_conference(&update), vec![MediaType::Audio]);
        assert_eq!(channels.remote_ssrc(MediaType::Audio), Some(11));
        assert!(channels.process_conference(&update).is_empty());

        channels.close_stream_connector(MediaType::Audio).await;
        assert_eq!(*relay.expired.lock(), vec![MediaType::Audio]);
        assert_eq!(channels.remote_ssrc(MediaType::Audio), None);
    }
}
