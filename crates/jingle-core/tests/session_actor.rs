//! SessionHandle integration tests
//!
//! The handler runs in its own task; every operation goes through the
//! command channel.

use pretty_assertions::assert_eq;
use std::time::Duration;

use rvoip_jingle_core::prelude::*;

mod common;
use common::*;

#[tokio::test]
async fn test_call_through_handles() {
    let initiator_side = Fixture::new();
    let responder_side = Fixture::new();
    let initiator = SessionHandle::spawn(initiator_side.handler(ROMEO, Role::Initiator));
    let responder = SessionHandle::spawn(responder_side.handler(JULIET, Role::Responder));

    let offer = initiator.create_content_list().await.expect("offer");
    let answer = responder.process_offer(offer).await.expect("answer");
    assert_eq!(answer.len(), 2);
    assert_eq!(responder.transport_method(), Some(TransportMethod::IceUdp));

    let accept = responder.generate_session_accept().await.expect("session-accept");
    initiator.process_session_accept(accept).await.expect("accept processed");

    let state = initiator.state().await.expect("state");
    assert_eq!(state.peer_id, ROMEO);
    assert_eq!(state.remote.len(), 2);
    assert!(state.is_master(MediaType::Audio));

    initiator.set_locally_on_hold(true).await.expect("hold");
    let audio = initiator_side.factory.stream(MediaType::Audio).expect("audio stream");
    assert_eq!(audio.direction(), MediaDirection::SendOnly);
    assert!(initiator.state().await.expect("state").locally_on_hold);
}

#[tokio::test]
async fn test_responder_waits_for_offer() {
    let side = Fixture::new();
    let responder = SessionHandle::spawn(side.handler(JULIET, Role::Responder));

    let waiter = {
        let responder = responder.clone();
        tokio::spawn(async move { responder.create_content_list_for(MediaType::Video).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let offer = vec![remote_content(
        "audio",
        MediaType::Audio,
        vec![pcmu()],
        Some(ice_transport("juliet", 4000)),
    )];
    responder.process_offer(offer).await.expect("answer");

    let contents = waiter.await.expect("task").expect("video content");
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0].name, "video");
    assert_eq!(
        contents[0].transport.as_ref().map(|t| t.namespace.clone()),
        Some(TransportMethod::IceUdp.namespace().to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_handle_times_out_and_stays_usable() {
    let side = Fixture::new();
    let responder = SessionHandle::spawn(side.handler(JULIET, Role::Responder));

    let err = responder.create_content_list().await.expect_err("no offer arrived");
    assert!(matches!(err, NegotiationError::TransportNotSpecified { .. }));

    let state = responder.state().await.expect("task still running");
    assert!(state.local.is_empty());
    assert_eq!(responder.transport_method(), None);
}

#[tokio::test]
async fn test_quality_and_input_events() {
    let side = Fixture::new();
    let initiator = SessionHandle::spawn(side.handler(ROMEO, Role::Initiator));

    initiator
        .set_remote_quality_presets(Some(QualityPreset::new(1280, 720, 30)), None)
        .await
        .expect("presets");
    initiator.set_local_input_evt_aware(true).await.expect("input events");

    let offer = initiator.create_content_list().await.expect("offer");
    let video = offer.iter().find(|c| c.name == "video").expect("video content");
    assert!(video.description.as_ref().map(|d| d.input_events).unwrap_or(false));

    let state = initiator.state().await.expect("state");
    assert_eq!(state.quality_ceiling(), Some(QualityPreset::new(1280, 720, 30)));
}

#[tokio::test]
async fn test_closed_session_rejects_requests() {
    let side = Fixture::new();
    let initiator = SessionHandle::spawn(side.handler(ROMEO, Role::Initiator));
    initiator.create_content_list().await.expect("offer");

    initiator.close().await.expect("close");

    let err = initiator.state().await.expect_err("task is gone");
    assert!(matches!(err, NegotiationError::SessionClosed { .. }));
}
