//! Session actor
//!
//! One task owns the [`MediaHandler`] of a call peer and applies commands
//! in arrival order. Responder operations that need the transport method
//! wait for it before queueing, so an offer that selects it can still be
//! processed while they wait.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, Instrument};

use super::{CallPeerNegotiationState, MediaHandler};
use crate::content::ContentDescriptor;
use crate::errors::{NegotiationError, Result};
use crate::media::QualityPreset;
use crate::transport::{RelayConferenceUpdate, TransportMethod, TransportSelector};
use crate::types::MediaType;

const COMMAND_BUFFER: usize = 32;

/// Commands accepted by a session task
#[derive(Debug)]
pub enum SessionCommand {
    /// Offer every active media type
    CreateContentList(oneshot::Sender<Result<Vec<ContentDescriptor>>>),
    /// Offer one media type
    CreateContentListFor(MediaType, oneshot::Sender<Result<Vec<ContentDescriptor>>>),
    /// Answer an offer
    ProcessOffer(Vec<ContentDescriptor>, oneshot::Sender<Result<Vec<ContentDescriptor>>>),
    /// Produce the session-accept contents
    GenerateSessionAccept(oneshot::Sender<Result<Vec<ContentDescriptor>>>),
    /// Take in the peer's session-accept
    ProcessSessionAccept(Vec<ContentDescriptor>, oneshot::Sender<Result<()>>),
    /// Take in remote candidates
    ProcessTransportInfo(Vec<ContentDescriptor>, oneshot::Sender<Result<bool>>),
    /// Apply a content-modify
    ReinitContent {
        name: String,
        content: ContentDescriptor,
        modify: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Reprocess every remote content
    ReinitAllContents(oneshot::Sender<Result<()>>),
    /// Withdraw a content
    RemoveContent(String, oneshot::Sender<Result<()>>),
    /// Toggle local hold
    SetLocallyOnHold(bool, oneshot::Sender<Result<()>>),
    /// Toggle remote hold
    SetRemotelyOnHold(bool, oneshot::Sender<Result<()>>),
    /// Apply relay SSRC updates
    ProcessRelayConference(RelayConferenceUpdate, oneshot::Sender<Vec<MediaType>>),
    /// Record the peer's quality presets
    SetRemoteQualityPresets {
        receive: Option<QualityPreset>,
        send_max: Option<QualityPreset>,
        reply: oneshot::Sender<()>,
    },
    /// Toggle input event support on video offers
    SetLocalInputEvtAware(bool, oneshot::Sender<()>),
    /// Start the streams
    Start(oneshot::Sender<Result<()>>),
    /// Snapshot of the negotiated state
    State(oneshot::Sender<CallPeerNegotiationState>),
    /// Release everything and stop the task
    Close(oneshot::Sender<()>),
}

impl SessionCommand {
    fn name(&self) -> &'static str {
        match self {
            SessionCommand::CreateContentList(_) => "create_content_list",
            SessionCommand::CreateContentListFor(..) => "create_content_list_for",
            SessionCommand::ProcessOffer(..) => "process_offer",
            SessionCommand::GenerateSessionAccept(_) => "generate_session_accept",
            SessionCommand::ProcessSessionAccept(..) => "process_session_accept",
            SessionCommand::ProcessTransportInfo(..) => "process_transport_info",
            SessionCommand::ReinitContent { .. } => "reinit_content",
            SessionCommand::ReinitAllContents(_) => "reinit_all_contents",
            SessionCommand::RemoveContent(..) => "remove_content",
            SessionCommand::SetLocallyOnHold(..) => "set_locally_on_hold",
            SessionCommand::SetRemotelyOnHold(..) => "set_remotely_on_hold",
            SessionCommand::ProcessRelayConference(..) => "process_relay_conference",
            SessionCommand::SetRemoteQualityPresets { .. } => "set_remote_quality_presets",
            SessionCommand::SetLocalInputEvtAware(..) => "set_local_input_evt_aware",
            SessionCommand::Start(_) => "start",
            SessionCommand::State(_) => "state",
            SessionCommand::Close(_) => "close",
        }
    }
}

/// Cloneable handle to a session task
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    selector: Arc<TransportSelector>,
    peer_id: Arc<str>,
    initiator: bool,
}

impl SessionHandle {
    /// Move a handler into its own task
    pub fn spawn(handler: MediaHandler) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = Self {
            tx,
            selector: handler.selector(),
            peer_id: Arc::from(handler.peer_id()),
            initiator: handler.state().is_initiator(),
        };
        tokio::spawn(run(handler, rx));
        handle
    }

    /// Peer address
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Selected transport method, if any
    pub fn transport_method(&self) -> Option<TransportMethod> {
        self.selector.selected()
    }

    /// Restrict the initiator's transport choice
    pub fn set_supported_transports(&self, namespaces: &[String]) {
        self.selector.set_supported_transports(namespaces);
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(command(tx)).await.map_err(|_| NegotiationError::SessionClosed {
            message: format!("session with {} is gone", self.peer_id),
        })?;
        rx.await.map_err(|_| NegotiationError::SessionClosed {
            message: format!("session with {} dropped the request", self.peer_id),
        })
    }

    /// A responder waits here, outside the task, for the offer to pick the transport
    async fn await_transport_selection(&self) -> Result<()> {
        if self.initiator || self.selector.selected().is_some() {
            return Ok(());
        }
        debug!("Waiting for {} to select the transport", self.peer_id);
        self.selector.wait_for_selection().await.map(|_| ())
    }

    /// Offer every active media type
    pub async fn create_content_list(&self) -> Result<Vec<ContentDescriptor>> {
        self.await_transport_selection().await?;
        self.request(SessionCommand::CreateContentList).await?
    }

    /// Offer one media type
    pub async fn create_content_list_for(&self, media: MediaType) -> Result<Vec<ContentDescriptor>> {
        self.await_transport_selection().await?;
        self.request(|reply| SessionCommand::CreateContentListFor(media, reply)).await?
    }

    /// Answer an offer
    pub async fn process_offer(&self, offer: Vec<ContentDescriptor>) -> Result<Vec<ContentDescriptor>> {
        self.request(|reply| SessionCommand::ProcessOffer(offer, reply)).await?
    }

    /// Produce the session-accept contents
    pub async fn generate_session_accept(&self) -> Result<Vec<ContentDescriptor>> {
        self.request(SessionCommand::GenerateSessionAccept).await?
    }

    /// Take in the peer's session-accept
    pub async fn process_session_accept(&self, contents: Vec<ContentDescriptor>) -> Result<()> {
        self.request(|reply| SessionCommand::ProcessSessionAccept(contents, reply)).await?
    }

    /// Take in remote candidates
    pub async fn process_transport_info(&self, contents: Vec<ContentDescriptor>) -> Result<bool> {
        self.request(|reply| SessionCommand::ProcessTransportInfo(contents, reply)).await?
    }

    /// Apply a content-modify
    pub async fn reinit_content(&self, name: impl Into<String>, content: ContentDescriptor, modify: bool) -> Result<()> {
        let name = name.into();
        self.request(|reply| SessionCommand::ReinitContent {
            name,
            content,
            modify,
            reply,
        })
        .await?
    }

    /// Reprocess every remote content
    pub async fn reinit_all_contents(&self) -> Result<()> {
        self.request(SessionCommand::ReinitAllContents).await?
    }

    /// Withdraw a content
    pub async fn remove_content(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.request(|reply| SessionCommand::RemoveContent(name, reply)).await?
    }

    /// Toggle local hold
    pub async fn set_locally_on_hold(&self, on_hold: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetLocallyOnHold(on_hold, reply)).await?
    }

    /// Toggle remote hold
    pub async fn set_remotely_on_hold(&self, on_hold: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetRemotelyOnHold(on_hold, reply)).await?
    }

    /// Apply relay SSRC updates; returns the media types whose peer SSRC changed
    pub async fn process_relay_conference(&self, update: RelayConferenceUpdate) -> Result<Vec<MediaType>> {
        self.request(|reply| SessionCommand::ProcessRelayConference(update, reply)).await
    }

    /// Record the peer's quality presets
    pub async fn set_remote_quality_presets(
        &self,
        receive: Option<QualityPreset>,
        send_max: Option<QualityPreset>,
    ) -> Result<()> {
        self.request(|reply| SessionCommand::SetRemoteQualityPresets {
            receive,
            send_max,
            reply,
        })
        .await
    }

    /// Toggle input event support on video offers
    pub async fn set_local_input_evt_aware(&self, aware: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetLocalInputEvtAware(aware, reply)).await
    }

    /// Start the streams
    pub async fn start(&self) -> Result<()> {
        self.request(SessionCommand::Start).await?
    }

    /// Snapshot of the negotiated state
    pub async fn state(&self) -> Result<CallPeerNegotiationState> {
        self.request(SessionCommand::State).await
    }

    /// Release everything and stop the task
    pub async fn close(&self) -> Result<()> {
        self.request(SessionCommand::Close).await
    }
}

fn reply<T>(tx: oneshot::Sender<T>, value: T) {
    if tx.send(value).is_err() {
        debug!("Caller went away before the reply");
    }
}

async fn run(mut handler: MediaHandler, mut rx: mpsc::Receiver<SessionCommand>) {
    while let Some(command) = rx.recv().await {
        let span = handler.operation_span(command.name());
        let stop = handle(&mut handler, command).instrument(span).await;
        if stop {
            return;
        }
    }
    debug!("All handles to {} dropped", handler.peer_id());
    handler.close().await;
}

async fn handle(handler: &mut MediaHandler, command: SessionCommand) -> bool {
    match command {
        SessionCommand::CreateContentList(tx) => reply(tx, handler.create_content_list().await),
        SessionCommand::CreateContentListFor(media, tx) => reply(tx, handler.create_content_list_for(media).await),
        SessionCommand::ProcessOffer(offer, tx) => reply(tx, handler.process_offer(offer).await),
        SessionCommand::GenerateSessionAccept(tx) => reply(tx, handler.generate_session_accept().await),
        SessionCommand::ProcessSessionAccept(contents, tx) => reply(tx, handler.process_session_accept(contents).await),
        SessionCommand::ProcessTransportInfo(contents, tx) => reply(tx, handler.process_transport_info(&contents).await),
        SessionCommand::ReinitContent {
            name,
            content,
            modify,
            reply: tx,
        } => reply(tx, handler.reinit_content(&name, content, modify).await),
        SessionCommand::ReinitAllContents(tx) => reply(tx, handler.reinit_all_contents().await),
        SessionCommand::RemoveContent(name, tx) => reply(tx, handler.remove_content(&name).await),
        SessionCommand::SetLocallyOnHold(on_hold, tx) => reply(tx, handler.set_locally_on_hold(on_hold).await),
        SessionCommand::SetRemotelyOnHold(on_hold, tx) => reply(tx, handler.set_remotely_on_hold(on_hold).await),
        SessionCommand::ProcessRelayConference(update, tx) => reply(tx, handler.process_relay_conference(&update)),
        SessionCommand::SetRemoteQualityPresets {
            receive,
            send_max,
            reply: tx,
        } => {
            handler.set_remote_quality_presets(receive, send_max);
            reply(tx, ());
        }
        SessionCommand::SetLocalInputEvtAware(aware, tx) => {
            handler.set_local_input_evt_aware(aware);
            reply(tx, ());
        }
        SessionCommand::Start(tx) => reply(tx, handler.start().await),
        SessionCommand::State(tx) => reply(tx, handler.state().clone()),
        SessionCommand::Close(tx) => {
            handler.close().await;
            reply(tx, ());
            return true;
        }
    }
    false
}
