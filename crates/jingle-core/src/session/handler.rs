use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Span};
use uuid::Uuid;

use super::state::CallPeerNegotiationState;
use super::Collaborators;
use crate::config::NegotiationConfig;
use crate::content::{ContentDescriptor, PayloadFormat, SourceInfo};
use crate::encryption::EncryptionNegotiator;
use crate::errors::{ErrorExt, NegotiationError, Result};
use crate::media::{MediaDevice, MediaStream, QualityControl, QualityPreset, StreamParams};
use crate::negotiation::{
    first_matching_format, intersect_extensions, intersect_formats, select_master, ContentNegotiator,
    OfferDirectionFactors,
};
use crate::transport::{
    create_transport_manager, RelayChannels, RelayConferenceUpdate, TransportMethod, TransportSelector,
    TransportSession,
};
use crate::types::{MediaDirection, MediaType, Role, Senders};

/// Negotiation orchestrator of one call peer
///
/// Sequences content, encryption and transport negotiation for every
/// Jingle message exchanged with the peer. Not shareable: wrap it in a
/// [`SessionHandle`](super::SessionHandle) to drive it from several tasks.
pub struct MediaHandler {
    pub(super) config: Arc<NegotiationConfig>,
    pub(super) collaborators: Collaborators,
    pub(super) state: CallPeerNegotiationState,
    pub(super) negotiator: ContentNegotiator,
    pub(super) selector: Arc<TransportSelector>,
    pub(super) transport: Option<TransportSession>,
    pub(super) streams: HashMap<MediaType, Arc<dyn MediaStream>>,
    cname: String,
    ms_label: String,
}

impl MediaHandler {
    /// Create a handler with its own transport selector
    pub fn new(
        peer_id: impl Into<String>,
        role: Role,
        config: Arc<NegotiationConfig>,
        collaborators: Collaborators,
    ) -> Self {
        let selector = Arc::new(TransportSelector::new(config.transport.selection_timeout()));
        Self::with_selector(peer_id, role, config, collaborators, selector)
    }

    /// Create a handler sharing the call's transport selector
    pub fn with_selector(
        peer_id: impl Into<String>,
        role: Role,
        config: Arc<NegotiationConfig>,
        collaborators: Collaborators,
        selector: Arc<TransportSelector>,
    ) -> Self {
        let mut state = CallPeerNegotiationState::new(peer_id, role);
        state.local_input_evt_aware = config.local_input_evt_aware;
        state.rtcp_mux = config.transport.rtcp_mux;
        Self {
            config,
            collaborators,
            state,
            negotiator: ContentNegotiator::new(),
            selector,
            transport: None,
            streams: HashMap::new(),
            cname: Uuid::new_v4().to_string(),
            ms_label: Uuid::new_v4().to_string(),
        }
    }

    /// Peer address
    pub fn peer_id(&self) -> &str {
        &self.state.peer_id
    }

    /// Negotiated state
    pub fn state(&self) -> &CallPeerNegotiationState {
        &self.state
    }

    /// The call's transport selector
    pub fn selector(&self) -> Arc<TransportSelector> {
        Arc::clone(&self.selector)
    }

    /// Method of the installed transport
    pub fn transport_method(&self) -> Option<TransportMethod> {
        self.transport.as_ref().map(|t| t.method())
    }

    /// Installed transport, once a method is selected
    pub fn transport(&self) -> Option<&TransportSession> {
        self.transport.as_ref()
    }

    /// Stream of a media type
    pub fn stream(&self, media: MediaType) -> Option<Arc<dyn MediaStream>> {
        self.streams.get(&media).cloned()
    }

    /// Span wrapping one entry point
    pub fn operation_span(&self, operation: &str) -> Span {
        info_span!("jingle", peer = %self.state.peer_id, operation = %operation)
    }

    /// Select the transport method without waiting
    ///
    /// The initiator decides from the allow-list or feature discovery. A
    /// responder only knows the method once the offer revealed it.
    pub fn resolve_transport_method(&self) -> Result<Option<TransportMethod>> {
        if let Some(method) = self.selector.selected() {
            return Ok(Some(method));
        }
        if !self.state.is_initiator() {
            return Ok(None);
        }
        let relay_supports_ice = self
            .collaborators
            .relay
            .as_ref()
            .map(|r| r.supports_ice())
            .unwrap_or(true);
        self.selector
            .choose_as_initiator(
                &self.state.peer_id,
                self.collaborators.discovery.as_ref(),
                &self.config.transport.locally_supported,
                relay_supports_ice,
            )
            .map(Some)
    }

    /// Make sure a transport is installed, waiting for the selection if needed
    pub(super) async fn ensure_transport(&mut self) -> Result<()> {
        if self.transport.is_some() {
            return Ok(());
        }
        let method = match self.resolve_transport_method()? {
            Some(method) => method,
            None => self.selector.wait_for_selection().await?,
        };
        self.install_transport(method);
        Ok(())
    }

    /// Install the manager for a selected method
    pub fn install_transport(&mut self, method: TransportMethod) {
        if let Some(existing) = self.transport.as_ref() {
            if existing.method() == method {
                return;
            }
            warn!("Replacing {} transport with {}", existing.method(), method);
        }
        let manager = create_transport_manager(
            method,
            Arc::clone(&self.collaborators.harvester),
            self.state.is_initiator(),
        );
        let relay = self.collaborators.relay.clone().map(RelayChannels::new);
        info!("Using {} transport with {}", method, self.state.peer_id);
        self.transport = Some(TransportSession::new(manager, relay));
    }

    fn transport_ref(&self) -> Result<&TransportSession> {
        self.transport
            .as_ref()
            .ok_or_else(|| NegotiationError::invalid_state("No transport selected"))
    }

    fn transport_mut(&mut self) -> Result<&mut TransportSession> {
        self.transport
            .as_mut()
            .ok_or_else(|| NegotiationError::invalid_state("No transport selected"))
    }

    fn active_device(&self, media: MediaType) -> Option<MediaDevice> {
        self.collaborators
            .devices
            .default_device(media)
            .filter(MediaDevice::is_active)
    }

    pub(super) fn is_relayed(&self) -> bool {
        self.collaborators.relay.is_some()
    }

    /// Build the outgoing content for a device, or nothing when inactive
    fn create_content(&mut self, device: &MediaDevice) -> Result<Option<ContentDescriptor>> {
        let media = device.media_type;
        let call = &self.collaborators.call;

        // a translating focus does not capture video itself
        let preference = if media == MediaType::Video && call.rtp_translation_enabled(media) {
            MediaDirection::SendRecv
        } else {
            self.config.direction_preferences.get(media)
        };
        let hold = if self.state.locally_on_hold {
            MediaDirection::SendOnly
        } else {
            MediaDirection::SendRecv
        };
        let relay_floor =
            if call.is_conference_focus() && call.other_participants_receiving(&self.state.peer_id, media) {
                MediaDirection::SendOnly
            } else {
                MediaDirection::Inactive
            };

        let mut direction = OfferDirectionFactors {
            device: device.direction,
            preference,
            hold,
            relay_floor,
        }
        .combine();
        if direction == MediaDirection::RecvOnly {
            direction = MediaDirection::Inactive;
        }
        if direction == MediaDirection::Inactive {
            debug!("Not offering {}: nothing to send", media);
            return Ok(None);
        }

        let ceiling = self.state.quality_ceiling();
        let mut content =
            self.negotiator
                .build_offer_content(device, direction, self.state.is_initiator(), ceiling.as_ref())?;
        if let Some(description) = content.description.as_mut() {
            description.rtcp_mux = self.state.rtcp_mux;
            if media == MediaType::Video && self.state.local_input_evt_aware {
                description.input_events = true;
            }
        }

        encryption_negotiator(&self.config, &self.collaborators, &self.state.peer_id).negotiate(
            &mut self.state.encryption,
            media,
            &mut content,
            None,
        )?;

        self.state.local.insert(content.clone());
        Ok(Some(content))
    }

    /// Content for one media type, without transport
    pub fn create_content_for_media(&mut self, media: MediaType) -> Result<Option<ContentDescriptor>> {
        match self.active_device(media) {
            Some(device) => self.create_content(&device),
            None => Ok(None),
        }
    }

    /// Contents of every active device, with harvested transports
    pub async fn create_content_list(&mut self) -> Result<Vec<ContentDescriptor>> {
        self.ensure_transport().await?;

        let mut contents = Vec::new();
        for media in MediaType::ALL {
            let Some(device) = self.active_device(media) else {
                continue;
            };
            if let Some(content) = self.create_content(&device)? {
                contents.push(content);
            }
        }
        if contents.is_empty() {
            return Err(NegotiationError::no_active_device(
                "Every media device is inactive or unwilling to send",
            ));
        }

        self.harvest_candidates(None, contents, false).await
    }

    /// Content of one media type, with harvested transport
    pub async fn create_content_list_for(&mut self, media: MediaType) -> Result<Vec<ContentDescriptor>> {
        self.ensure_transport().await?;

        let contents: Vec<ContentDescriptor> = self.create_content_for_media(media)?.into_iter().collect();
        if contents.is_empty() {
            return Err(NegotiationError::no_active_device(format!("No active {} device", media)));
        }
        self.harvest_candidates(None, contents, false).await
    }

    /// Harvest local candidates for `local` and decorate the transports
    ///
    /// `transport_info_separate` is only valid when answering: an initial
    /// offer must carry its candidates.
    pub(super) async fn harvest_candidates(
        &mut self,
        remote: Option<&[ContentDescriptor]>,
        mut local: Vec<ContentDescriptor>,
        transport_info_separate: bool,
    ) -> Result<Vec<ContentDescriptor>> {
        if remote.is_none() && transport_info_separate {
            return Err(NegotiationError::illegal_argument(
                "Transport info cannot be sent separately from a session-initiate offer",
            ));
        }

        let peer = self.state.peer_id.clone();
        let wanted_mux = self.state.rtcp_mux;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| NegotiationError::invalid_state("No transport selected"))?;

        if let Err(e) = transport.set_rtcp_mux(wanted_mux) {
            warn!("rtcp-mux unavailable on {} transport: {}", transport.method(), e);
            transport.set_rtcp_mux(false)?;
        }
        self.state.rtcp_mux = transport.rtcp_mux();
        for content in local.iter_mut() {
            if let Some(description) = content.description.as_mut() {
                description.rtcp_mux = self.state.rtcp_mux;
            }
            if let Some(dtls) = content.media_type().and_then(|m| self.state.encryption.dtls_mut(m)) {
                dtls.set_rtcp_mux(self.state.rtcp_mux);
            }
        }

        transport
            .start_candidate_harvest(&mut local, remote, &peer)
            .await
            .with_context("transport", "start_candidate_harvest")?;

        let relay_fingerprints = transport.relay_fingerprints();
        encryption_negotiator(&self.config, &self.collaborators, &peer).add_fingerprints_to_transports(
            &self.state.encryption,
            &mut local,
            remote,
            &relay_fingerprints,
        );

        transport.flush_deferred_relay_connectivity().await?;
        transport.wrapup_candidate_harvest(&mut local).await?;

        for content in &local {
            self.state.local.insert(content.clone());
        }
        self.state.last_transport_snapshot = Some(local.clone());
        debug!("Harvested candidates for {} contents", local.len());
        Ok(local)
    }

    /// Reject offers the round cannot start on
    fn validate_offer(&self, offer: &[ContentDescriptor]) -> Result<()> {
        for content in offer {
            if content.description.is_none() {
                return Err(NegotiationError::illegal_argument(format!(
                    "Content '{}' has no media description",
                    content.name
                )));
            }
            if let Some(transport) = content.transport.as_ref() {
                let supported = TransportMethod::from_namespace(&transport.namespace)
                    .map(|m| self.config.transport.locally_supported.contains(&m))
                    .unwrap_or(false);
                if !supported {
                    return Err(NegotiationError::unsupported_transport(transport.namespace.clone()));
                }
            }
        }
        Ok(())
    }

    /// Answer a session-initiate or content-add offer
    ///
    /// Contents that cannot be answered are skipped and their streams
    /// closed. When none can be, the user is notified once and the round
    /// fails with [`NegotiationError::InvalidOffer`].
    pub async fn process_offer(&mut self, offer: Vec<ContentDescriptor>) -> Result<Vec<ContentDescriptor>> {
        self.validate_offer(&offer)?;

        let is_initiator = self.state.is_initiator();
        let mut answer = Vec::with_capacity(offer.len());
        let mut remote_formats: Vec<PayloadFormat> = Vec::new();

        for content in &offer {
            self.state.remote.insert(content.clone());
            let Some(media) = content.media_type() else {
                continue;
            };
            remote_formats.extend(content.formats().iter().cloned());

            let device = self.collaborators.devices.default_device(media);
            let dev_direction = device
                .as_ref()
                .map(|d| d.direction)
                .unwrap_or(MediaDirection::Inactive)
                & self.config.direction_preferences.get(media);
            let direction = dev_direction.answer_for(self.state.remote_direction(content));

            let local_formats = device.as_ref().map(|d| d.supported_formats(None)).unwrap_or_default();
            let mutual = intersect_formats(content.formats(), &local_formats);
            let local_extensions = device.as_ref().map(|d| d.extensions.clone()).unwrap_or_default();
            let extensions = intersect_extensions(content.extensions(), &local_extensions);

            // an empty transport may be filled by transport-info later
            let target_port = match content.transport.as_ref() {
                None => 0,
                Some(_) => content.default_target().map(|t| i32::from(t.rtp.port())).unwrap_or(-1),
            };

            if let Some(transport) = content.transport.as_ref() {
                if let Some(method) = TransportMethod::from_namespace(&transport.namespace) {
                    if let Err(e) = self.selector.select(method, &content.name) {
                        warn!("Skipping content {}: {}", content.name, e);
                        self.close_stream(media);
                        continue;
                    }
                }
            }

            let rtcp_mux = content.rtcp_mux() && self.config.transport.rtcp_mux;
            self.state.rtcp_mux = rtcp_mux;

            if mutual.is_empty() || dev_direction == MediaDirection::Inactive || target_port == 0 {
                debug!(
                    "Skipping content {}: {} mutual formats, device {}, target port {}",
                    content.name,
                    mutual.len(),
                    dev_direction,
                    target_port
                );
                self.close_stream(media);
                continue;
            }

            let mut ours =
                self.negotiator
                    .build_answer_content(content, media, mutual, extensions, direction, is_initiator);
            if let Some(description) = ours.description.as_mut() {
                description.rtcp_mux = rtcp_mux;
            }

            encryption_negotiator(&self.config, &self.collaborators, &self.state.peer_id).negotiate(
                &mut self.state.encryption,
                media,
                &mut ours,
                Some(content),
            )?;

            self.state.local.insert(ours.clone());
            answer.push(ours);
        }

        if answer.is_empty() {
            self.collaborators
                .notifier
                .notify_no_matching_format(&self.state.peer_id, &remote_formats);
            return Err(NegotiationError::invalid_offer(
                "Offer contained no media formats or no valid media descriptions",
                remote_formats,
            ));
        }

        self.ensure_transport().await?;
        let harvested = self.harvest_candidates(Some(&offer), answer, true).await?;
        self.transport_mut()?.start_connectivity_establishment(&offer).await?;
        info!("Answered {} of {} offered contents", harvested.len(), offer.len());
        Ok(harvested)
    }

    /// Final answer contents, with streams initialized
    ///
    /// Called when the user accepts the call. Each stream uses the first
    /// format of the offer the device supports; a sending stream announces
    /// its SSRC.
    pub async fn generate_session_accept(&mut self) -> Result<Vec<ContentDescriptor>> {
        let mut accept = self.state.local.to_vec();
        self.transport_mut()?.wrapup_candidate_harvest(&mut accept).await?;

        let media: Vec<MediaType> = accept.iter().filter_map(|c| c.media_type()).collect();
        let master_index = select_master(&media);
        let call = Arc::clone(&self.collaborators.call);

        for (index, content) in accept.iter_mut().enumerate() {
            let Some(media) = content.media_type() else {
                continue;
            };
            let Some(device) = self.active_device(media) else {
                continue;
            };

            let (connector, target) = {
                let transport = self.transport_ref()?;
                (transport.stream_connector(media), transport.stream_target(media))
            };

            let mut direction = self.state.local_direction(content);
            if media == MediaType::Video
                && (call.local_video_transmission_enabled() || call.rtp_translation_enabled(media))
                && device.direction.allows_sending()
            {
                direction = MediaDirection::SendRecv;
                content.senders = Senders::Both;
            }

            let theirs = self.state.remote.get(&content.name).ok_or_else(|| {
                NegotiationError::invalid_state(format!("No remote content for {}", content.name))
            })?;
            let format = first_matching_format(theirs.formats(), &device.supported_formats(None))
                .ok_or_else(|| NegotiationError::no_matching_format("No matching codec"))?;
            self.state.supports_quality_control = format.has_imageattr();

            let master = master_index == Some(index);
            self.set_master(media, master);

            let stream = self
                .init_stream(StreamParams {
                    content_name: content.name.clone(),
                    connector,
                    device,
                    format,
                    target,
                    direction,
                    extensions: content.extensions().to_vec(),
                    master,
                    rtcp_mux: self.state.rtcp_mux,
                })
                .await?;

            if direction.allows_sending() {
                if let (Some(ssrc), Some(description)) = (stream.local_ssrc(), content.description.as_mut()) {
                    let label = format!("{}{}", media, ssrc);
                    description.ssrc = Some(ssrc);
                    description.sources.push(SourceInfo {
                        ssrc,
                        cname: Some(self.cname.clone()),
                        msid: Some(format!("{} {}", self.ms_label, label)),
                        label: Some(label),
                    });
                }
            }
            self.state.local.insert(content.clone());
        }

        Ok(accept)
    }

    /// Take in the peer's session-accept, as initiator
    pub async fn process_session_accept(&mut self, contents: Vec<ContentDescriptor>) -> Result<()> {
        let mut media = Vec::with_capacity(contents.len());
        for content in &contents {
            media.push(content.media_type().ok_or_else(|| {
                NegotiationError::illegal_argument(format!("Content '{}' has no media description", content.name))
            })?);
        }

        self.process_transport_info(&contents).await?;

        let master_index = select_master(&media);
        for (index, content) in contents.into_iter().enumerate() {
            self.state.remote.insert(content.clone());
            self.process_content(&content, false, master_index == Some(index)).await?;
        }
        Ok(())
    }

    /// Feed remote candidates to the transport
    ///
    /// Returns whether any remote candidate is known.
    pub async fn process_transport_info(&mut self, contents: &[ContentDescriptor]) -> Result<bool> {
        let transport = self.transport_mut()?;
        let namespace = transport.method().namespace();
        let matching: Vec<ContentDescriptor> = contents
            .iter()
            .filter(|c| match c.transport.as_ref() {
                Some(t) if t.namespace != namespace => {
                    warn!("Ignoring {} transport of content {}", t.namespace, c.name);
                    false
                }
                _ => true,
            })
            .cloned()
            .collect();
        transport.start_connectivity_establishment(&matching).await
    }

    /// (Re)configure the stream of a remote content
    ///
    /// A content without a known target or active device closes its
    /// stream. `modify` applies the peer's new quality attributes to video.
    pub(super) async fn process_content(
        &mut self,
        content: &ContentDescriptor,
        modify: bool,
        master: bool,
    ) -> Result<()> {
        let media = content.media_type().ok_or_else(|| {
            NegotiationError::illegal_argument(format!("Content '{}' has no media description", content.name))
        })?;

        let mut target = self.transport_ref()?.stream_target(media);
        if target.is_none() {
            debug!("No target for {} yet, concluding connectivity establishment", media);
            self.transport_mut()?.wrapup_connectivity_establishment().await?;
            target = self.transport_ref()?.stream_target(media);
        }
        if target.is_none() {
            debug!("No target for {}, closing its stream", media);
            self.close_stream(media);
            return Ok(());
        }

        let Some(device) = self.active_device(media) else {
            self.close_stream(media);
            return Ok(());
        };
        let dev_direction = device.direction & self.config.direction_preferences.get(media);

        let mut remote_formats = content.formats().to_vec();
        if remote_formats.is_empty() {
            return Err(NegotiationError::illegal_argument(
                "Remote party sent an invalid Jingle content",
            ));
        }

        let is_initiator = self.state.is_initiator();
        encryption_negotiator(&self.config, &self.collaborators, &self.state.peer_id).process_answer(
            &mut self.state.encryption,
            media,
            content,
            is_initiator,
        )?;

        // broadcast if any other participant listens
        let mut remote_direction = self.state.remote_direction(content);
        let call = &self.collaborators.call;
        if call.is_conference_focus() && call.other_participants_receiving(&self.state.peer_id, media) {
            remote_direction = remote_direction | MediaDirection::SendOnly;
        }
        let direction = dev_direction.answer_for(remote_direction);

        let extensions = intersect_extensions(content.extensions(), &device.extensions);
        self.state.supports_quality_control = remote_formats[0].has_imageattr();

        if media == MediaType::Video && modify {
            if let Some(stream) = self.streams.get(&MediaType::Video) {
                stream.update_quality_control(&remote_formats[0].parameters);
            }
            if let Some(ceiling) = self.state.quality_ceiling() {
                remote_formats = intersect_formats(&remote_formats, &device.supported_formats(Some(&ceiling)));
            }
        }

        let format = first_matching_format(&remote_formats, &device.supported_formats(None))
            .ok_or_else(|| NegotiationError::no_matching_format("No matching media format supported"))?;

        let connector = self.transport_ref()?.stream_connector(media);
        self.set_master(media, master);
        self.init_stream(StreamParams {
            content_name: content.name.clone(),
            connector,
            device,
            format,
            target,
            direction,
            extensions,
            master,
            rtcp_mux: self.state.rtcp_mux,
        })
        .await?;
        Ok(())
    }

    /// Apply a content-modify from the peer
    ///
    /// A plain modify only changes `senders`; with `modify` the stored
    /// content is replaced and formats renegotiated. The master flag of the
    /// media type is kept.
    pub async fn reinit_content(&mut self, name: &str, content: ContentDescriptor, modify: bool) -> Result<()> {
        let Some(stored) = self.state.remote.get(name).cloned() else {
            debug!("No remote content {} to reinitialize", name);
            return Ok(());
        };
        let master = stored.media_type().map(|m| self.state.is_master(m)).unwrap_or(false);

        let updated = if modify {
            let mut replacement = content;
            replacement.name = name.to_string();
            replacement
        } else {
            let mut merged = stored;
            merged.senders = content.senders;
            merged
        };
        self.process_content(&updated, modify, master).await?;
        self.state.remote.insert(updated);
        Ok(())
    }

    /// Reprocess every remote content, reselecting the master stream
    pub async fn reinit_all_contents(&mut self) -> Result<()> {
        let contents = self.state.remote.to_vec();
        let media: Vec<MediaType> = contents.iter().filter_map(|c| c.media_type()).collect();
        let master_index = select_master(&media);
        for (index, content) in contents.iter().enumerate() {
            self.process_content(content, false, master_index == Some(index)).await?;
        }
        Ok(())
    }

    /// Withdraw a content from the session
    pub async fn remove_content(&mut self, name: &str) -> Result<()> {
        let mut removed = Vec::new();
        for content in [self.state.local.remove(name), self.state.remote.remove(name)]
            .into_iter()
            .flatten()
        {
            if let Some(media) = content.media_type() {
                self.close_stream(media);
                removed.push(media);
            }
        }
        if let Some(transport) = self.transport.as_mut() {
            transport.remove_content(name).await;
        }

        for media in removed {
            let still_used = self.state.local.find_by_media(media).is_some()
                || self.state.remote.find_by_media(media).is_some();
            if !still_used {
                self.state.encryption.remove_media(media);
                self.state.master.remove(&media);
            }
        }
        info!("Removed content {}", name);
        Ok(())
    }

    /// Close the stream of a media type, if any
    pub fn close_stream(&mut self, media: MediaType) {
        if let Some(stream) = self.streams.remove(&media) {
            debug!("Closing {} stream", media);
            stream.close();
        }
        self.state.pre_hold_directions.remove(&media);
    }

    /// Conclude connectivity establishment and rebind every stream
    pub async fn start(&mut self) -> Result<()> {
        let transport = self.transport_mut()?;
        transport.wrapup_connectivity_establishment().await?;
        let transport = self.transport_ref()?;
        for (media, stream) in &self.streams {
            if let Some(connector) = transport.stream_connector(*media) {
                stream.set_connector(connector);
            }
            stream.set_target(transport.stream_target(*media));
        }
        info!("Started {} streams", self.streams.len());
        Ok(())
    }

    /// Release every stream, transport and keying state
    pub async fn close(&mut self) {
        for (media, stream) in self.streams.drain() {
            debug!("Closing {} stream", media);
            stream.close();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.state.encryption.clear();
        self.state.pre_hold_directions.clear();
        self.state.pre_hold_channel_directions.clear();
        info!("Closed media handler for {}", self.state.peer_id);
    }

    /// Apply SSRC updates pushed by the relay
    ///
    /// Returns the media types whose peer SSRC changed.
    pub fn process_relay_conference(&mut self, update: &RelayConferenceUpdate) -> Vec<MediaType> {
        let changed = self
            .transport
            .as_mut()
            .and_then(|t| t.relay_mut())
            .map(|r| r.process_conference(update))
            .unwrap_or_default();
        for media in &changed {
            debug!("Remote {} SSRC now {:?}", media, self.remote_ssrc(*media));
        }
        changed
    }

    /// Last SSRC the relay reported for the peer's stream of a media type
    pub fn remote_ssrc(&self, media: MediaType) -> Option<u32> {
        self.transport
            .as_ref()
            .and_then(|t| t.relay())
            .and_then(|r| r.remote_ssrc(media))
    }

    /// Restrict the initiator's transport choice to an ordered list of namespaces
    pub fn set_supported_transports(&self, namespaces: &[String]) {
        self.selector.set_supported_transports(namespaces);
    }

    /// Local content of a media type
    pub fn local_content(&self, media: MediaType) -> Option<&ContentDescriptor> {
        self.state.local.find_by_media(media)
    }

    /// Remote content of a media type
    pub fn remote_content(&self, media: MediaType) -> Option<&ContentDescriptor> {
        self.state.remote.find_by_media(media)
    }

    /// Every local content, in order
    pub fn local_contents(&self) -> Vec<ContentDescriptor> {
        self.state.local.to_vec()
    }

    /// Quality control, when the peer's formats carry image attributes
    pub fn quality_control(&self) -> Option<&QualityControl> {
        self.state.supports_quality_control.then_some(&self.state.quality)
    }

    /// Record the presets the peer announced
    pub fn set_remote_quality_presets(&mut self, receive: Option<QualityPreset>, send_max: Option<QualityPreset>) {
        self.state.quality.remote_receive = receive;
        self.state.quality.remote_send_max = send_max;
    }

    /// Override quality control support
    pub fn set_support_quality_controls(&mut self, supported: bool) {
        self.state.supports_quality_control = supported;
    }

    /// Accept remote input events on outgoing video offers
    pub fn set_local_input_evt_aware(&mut self, aware: bool) {
        self.state.local_input_evt_aware = aware;
    }

    fn set_master(&mut self, media: MediaType, master: bool) {
        self.state.master.insert(media, master);
        self.state.encryption.set_master(media, master);
    }

    async fn init_stream(&mut self, params: StreamParams) -> Result<Arc<dyn MediaStream>> {
        let media = params.device.media_type;
        let existing = self.streams.get(&media).cloned();
        let stream = self
            .collaborators
            .streams
            .init_stream(params, existing)
            .await
            .with_context("streams", format!("init {} stream", media))?;
        self.streams.insert(media, Arc::clone(&stream));
        Ok(stream)
    }
}

fn encryption_negotiator<'a>(
    config: &'a NegotiationConfig,
    collaborators: &'a Collaborators,
    peer: &'a str,
) -> EncryptionNegotiator<'a> {
    EncryptionNegotiator::new(
        &config.encryption,
        collaborators.discovery.as_ref(),
        peer,
        &config.account_id,
        collaborators.relay.is_some(),
        collaborators.call.zrtp_signaling_allowed(),
    )
}
