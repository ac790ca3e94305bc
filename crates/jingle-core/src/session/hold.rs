//! Hold and resume
//!
//! In direct mode hold narrows the direction of each stream. Through a
//! relay the stream is shared by every participant, so hold is a directive
//! to the peer's relay channel instead.

use tracing::{debug, info};

use super::MediaHandler;
use crate::errors::Result;
use crate::types::{MediaDirection, MediaType};

impl MediaHandler {
    /// Put the peer on hold, or resume
    ///
    /// Hold then resume with no remote signal in between restores the
    /// exact directions from before the hold.
    pub async fn set_locally_on_hold(&mut self, on_hold: bool) -> Result<()> {
        if self.state.locally_on_hold == on_hold {
            debug!("Already {}", if on_hold { "locally on hold" } else { "locally active" });
            return Ok(());
        }
        self.state.locally_on_hold = on_hold;
        if on_hold {
            self.state.hold_interrupted = false;
        }
        info!("Local hold {}", if on_hold { "on" } else { "off" });

        if self.is_relayed() {
            return self.apply_relay_hold().await;
        }

        for media in MediaType::ALL {
            let Some(stream) = self.streams.get(&media).cloned() else {
                continue;
            };
            let current = stream.direction();
            let next = if on_hold {
                self.state.pre_hold_directions.entry(media).or_insert(current);
                current & MediaDirection::SendOnly
            } else {
                let saved = self.state.pre_hold_directions.remove(&media);
                match saved {
                    Some(saved) if !self.state.hold_interrupted => saved,
                    // the peer put us on hold meanwhile; receive again, sending is its call
                    _ => current | MediaDirection::RecvOnly,
                }
            };
            debug!("{} stream {} -> {}", media, current, next);
            stream.set_direction(next);
        }
        if !on_hold {
            self.state.hold_interrupted = false;
        }
        Ok(())
    }

    /// The peer put us on hold, or resumed
    pub async fn set_remotely_on_hold(&mut self, on_hold: bool) -> Result<()> {
        self.state.remotely_on_hold = on_hold;
        if on_hold && self.state.locally_on_hold {
            self.state.hold_interrupted = true;
        }
        info!("Remote hold {}", if on_hold { "on" } else { "off" });

        if self.is_relayed() {
            return self.apply_relay_hold().await;
        }

        let focus = self.collaborators.call.is_conference_focus();
        for media in MediaType::ALL {
            let Some(stream) = self.streams.get(&media).cloned() else {
                continue;
            };
            let current = stream.direction();
            let next = if on_hold {
                // a focus must not play the peer's hold music to everyone
                if focus {
                    MediaDirection::Inactive
                } else {
                    current & MediaDirection::RecvOnly
                }
            } else {
                self.calculate_post_hold_direction(media).unwrap_or(current)
            };
            debug!("{} stream {} -> {}", media, current, next);
            stream.set_direction(next);
        }
        Ok(())
    }

    /// Direction a stream returns to when the peer resumes
    ///
    /// A stream that can still send is left alone. Otherwise the peer's
    /// last signaled direction is narrowed by the user preference, our own
    /// hold and the device. `None` without a stream.
    pub fn calculate_post_hold_direction(&self, media: MediaType) -> Option<MediaDirection> {
        let stream = self.streams.get(&media)?;
        let current = stream.direction();
        if current.allows_sending() {
            return Some(current);
        }

        let mut direction = self
            .state
            .remote
            .find_by_media(media)
            .map(|c| self.state.local_direction(c))
            .unwrap_or(MediaDirection::SendRecv);
        direction = direction & self.config.direction_preferences.get(media);
        if self.state.locally_on_hold {
            direction = direction & MediaDirection::SendOnly;
        }
        let device = self
            .collaborators
            .devices
            .default_device(media)
            .map(|d| d.direction)
            .unwrap_or(MediaDirection::Inactive);
        Some(direction & device)
    }

    /// Drive relay channel directions from both hold flags
    ///
    /// The first hold saves each channel's direction; the last resume
    /// restores it.
    async fn apply_relay_hold(&mut self) -> Result<()> {
        let held = self.state.locally_on_hold || self.state.remotely_on_hold;
        let Some(relay) = self.transport.as_mut().and_then(|t| t.relay_mut()) else {
            return Ok(());
        };

        for media in MediaType::ALL {
            let Some(current) = relay.channel_direction(media) else {
                continue;
            };
            let next = if held {
                self.state.pre_hold_channel_directions.entry(media).or_insert(current);
                MediaDirection::Inactive
            } else {
                self.state
                    .pre_hold_channel_directions
                    .remove(&media)
                    .unwrap_or(MediaDirection::SendRecv)
            };
            relay.set_direction(media, next).await?;
        }
        Ok(())
    }
}
