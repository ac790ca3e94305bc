//! Offer/answer integration tests
//!
//! Drives an initiator and a responder handler through session-initiate,
//! session-accept and content-modify rounds with in-memory collaborators.

use pretty_assertions::assert_eq;

use rvoip_jingle_core::constants::NS_JINGLE_RAW_UDP;
use rvoip_jingle_core::content::DtlsSetup;
use rvoip_jingle_core::prelude::*;

mod common;
use common::*;

fn format_names(content: &ContentDescriptor) -> Vec<String> {
    content.formats().iter().map(|f| f.name.clone()).collect()
}

#[tokio::test]
async fn test_offer_round_trip() {
    let initiator_side = Fixture::new();
    let responder_side = Fixture::new();
    let mut initiator = initiator_side.handler(ROMEO, Role::Initiator);
    let mut responder = responder_side.handler(JULIET, Role::Responder);

    let offer = initiator.create_content_list().await.expect("offer");
    assert_eq!(offer.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["audio", "video"]);
    assert_eq!(initiator.transport_method(), Some(TransportMethod::IceUdp));

    let answer = responder.process_offer(offer.clone()).await.expect("answer");
    assert_eq!(answer.len(), offer.len());
    assert_eq!(responder.transport_method(), Some(TransportMethod::IceUdp));

    for (offered, answered) in offer.iter().zip(&answer) {
        assert_eq!(answered.name, offered.name);
        assert_eq!(format_names(answered), format_names(offered));
        assert_eq!(answered.senders, Senders::Both);
        assert_eq!(
            answered.transport.as_ref().map(|t| t.namespace.clone()),
            offered.transport.as_ref().map(|t| t.namespace.clone())
        );
    }
}

#[tokio::test]
async fn test_dtls_roles() {
    let initiator_side = Fixture::new();
    let responder_side = Fixture::new();
    let mut initiator = initiator_side.handler(ROMEO, Role::Initiator);
    let mut responder = responder_side.handler(JULIET, Role::Responder);

    let offer = initiator.create_content_list().await.expect("offer");
    let offered = offer[0].transport.as_ref().expect("transport");
    assert_eq!(offered.fingerprints.len(), 1);
    assert_eq!(offered.fingerprints[0].setup, DtlsSetup::ActPass);

    let answer = responder.process_offer(offer).await.expect("answer");
    let answered = answer[0].transport.as_ref().expect("transport");
    assert_eq!(answered.fingerprints[0].setup, DtlsSetup::Active);
    assert_eq!(
        responder.state().encryption.active(MediaType::Audio),
        Some(EncryptionProtocol::Fingerprint)
    );
}

#[tokio::test]
async fn test_dtls_rtcp_mux_follows_offer() {
    for offered_mux in [false, true] {
        let initiator_side = Fixture::new();
        let responder_side = Fixture::new();
        let config = NegotiationConfig::builder()
            .rtcp_mux(offered_mux)
            .build()
            .expect("valid config");
        let mut initiator = initiator_side.handler_with(ROMEO, Role::Initiator, config);
        let mut responder = responder_side.handler(JULIET, Role::Responder);

        let offer = initiator.create_content_list().await.expect("offer");
        responder.process_offer(offer).await.expect("answer");

        assert_eq!(responder.state().rtcp_mux, offered_mux);
        let dtls_mux = responder
            .state()
            .encryption
            .state(MediaType::Audio)
            .and_then(|s| s.dtls())
            .map(|d| d.rtcp_mux());
        assert_eq!(dtls_mux, Some(offered_mux));
    }
}

#[tokio::test]
async fn test_session_accept_initializes_streams() {
    let call = establish_call().await;

    let audio = call.initiator_side.factory.stream(MediaType::Audio).expect("audio stream");
    assert_eq!(audio.direction(), MediaDirection::SendRecv);
    assert!(audio.target().is_some());
    assert!(audio.connector().is_some());
    assert_eq!(
        call.initiator.state().encryption.active(MediaType::Audio),
        Some(EncryptionProtocol::Fingerprint)
    );
    assert!(call.responder_side.factory.stream(MediaType::Video).is_some());
}

#[tokio::test]
async fn test_session_accept_announces_sources() {
    let initiator_side = Fixture::new();
    let responder_side = Fixture::new();
    let mut initiator = initiator_side.handler(ROMEO, Role::Initiator);
    let mut responder = responder_side.handler(JULIET, Role::Responder);

    let offer = initiator.create_content_list().await.expect("offer");
    responder.process_offer(offer).await.expect("answer");
    let accept = responder.generate_session_accept().await.expect("session-accept");

    let stream = responder_side.factory.stream(MediaType::Audio).expect("audio stream");
    let description = accept[0].description.as_ref().expect("description");
    assert_eq!(description.ssrc, Some(stream.ssrc()));

    let source = &description.sources[0];
    let label = format!("audio{}", stream.ssrc());
    assert_eq!(source.label.as_deref(), Some(label.as_str()));
    assert!(source.cname.is_some());
    assert!(source.msid.as_deref().map(|m| m.ends_with(&label)).unwrap_or(false));
}

#[tokio::test]
async fn test_master_is_first_audio_content() {
    let call = establish_call().await;

    assert!(call.initiator.state().is_master(MediaType::Audio));
    assert!(!call.initiator.state().is_master(MediaType::Video));
    assert!(call.responder.state().is_master(MediaType::Audio));
    assert!(!call.responder.state().is_master(MediaType::Video));
}

#[tokio::test]
async fn test_single_content_is_master() {
    let initiator_side = Fixture::new();
    let responder_side = Fixture::new();
    let mut initiator = initiator_side.handler(ROMEO, Role::Initiator);
    let mut responder = responder_side.handler(JULIET, Role::Responder);

    let offer = initiator.create_content_list_for(MediaType::Video).await.expect("video offer");
    assert_eq!(offer.len(), 1);
    responder.process_offer(offer).await.expect("answer");
    let accept = responder.generate_session_accept().await.expect("session-accept");
    initiator.process_session_accept(accept).await.expect("accept processed");

    assert!(initiator.state().is_master(MediaType::Video));
}

#[tokio::test]
async fn test_invalid_offer_notifies_once() {
    let responder_side = Fixture::new();
    let mut responder = responder_side.handler(JULIET, Role::Responder);

    let offer = vec![remote_content(
        "video",
        MediaType::Video,
        vec![h264()],
        Some(ice_transport("juliet", 4000)),
    )];
    let err = responder.process_offer(offer).await.expect_err("nothing in common");

    match err {
        NegotiationError::InvalidOffer { remote_formats, .. } => assert_eq!(remote_formats, vec![h264()]),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(responder_side.notifier.count(), 1);
    let (peer, formats) = responder_side.notifier.last().expect("notification");
    assert_eq!(peer, JULIET);
    assert_eq!(formats, vec![h264()]);
    assert_eq!(responder_side.factory.init_count(), 0);
}

#[tokio::test]
async fn test_inactive_device_skips_content() {
    let responder_side = Fixture::new();
    responder_side.devices.set(video_device(MediaDirection::Inactive));
    let mut responder = responder_side.handler(JULIET, Role::Responder);

    let offer = vec![
        remote_content("audio", MediaType::Audio, vec![pcmu()], Some(ice_transport("juliet", 4000))),
        remote_content("video", MediaType::Video, vec![vp8()], Some(ice_transport("juliet", 4002))),
    ];
    let answer = responder.process_offer(offer).await.expect("answer");

    assert_eq!(answer.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["audio"]);
    assert_eq!(responder_side.notifier.count(), 0);
}

#[tokio::test]
async fn test_content_without_transport_is_skipped() {
    let responder_side = Fixture::new();
    let mut responder = responder_side.handler(JULIET, Role::Responder);

    let offer = vec![
        remote_content("audio", MediaType::Audio, vec![pcmu()], None),
        remote_content("video", MediaType::Video, vec![vp8()], Some(ice_transport("juliet", 4002))),
    ];
    let answer = responder.process_offer(offer).await.expect("answer");

    assert_eq!(answer.len(), 1);
    assert_eq!(answer[0].name, "video");
}

#[tokio::test]
async fn test_empty_transport_filled_by_transport_info() {
    let responder_side = Fixture::new();
    let mut responder = responder_side.handler(JULIET, Role::Responder);

    let mut empty = ice_transport("juliet", 4000);
    empty.candidates.clear();
    let offer = vec![remote_content("audio", MediaType::Audio, vec![pcmu()], Some(empty))];
    let answer = responder.process_offer(offer).await.expect("answer without candidates");
    assert_eq!(answer.len(), 1);

    let info = vec![remote_content(
        "audio",
        MediaType::Audio,
        vec![pcmu()],
        Some(ice_transport("juliet", 4000)),
    )];
    let known = responder.process_transport_info(&info).await.expect("transport-info");
    assert!(known);
}

#[tokio::test]
async fn test_missing_description_is_rejected_before_any_change() {
    let responder_side = Fixture::new();
    let mut responder = responder_side.handler(JULIET, Role::Responder);

    let mut broken = remote_content("audio", MediaType::Audio, vec![pcmu()], Some(ice_transport("juliet", 4000)));
    broken.description = None;
    let offer = vec![
        remote_content("video", MediaType::Video, vec![vp8()], Some(ice_transport("juliet", 4002))),
        broken,
    ];
    let err = responder.process_offer(offer).await.expect_err("invalid content");

    assert!(matches!(err, NegotiationError::IllegalArgument { .. }));
    assert_eq!(err.code(), ErrorCode::IllegalArgument);
    assert!(responder.state().remote.is_empty());
    assert_eq!(responder.selector().selected(), None);
}

#[tokio::test]
async fn test_unknown_transport_namespace() {
    let responder_side = Fixture::new();
    let mut responder = responder_side.handler(JULIET, Role::Responder);

    let offer = vec![remote_content(
        "audio",
        MediaType::Audio,
        vec![pcmu()],
        Some(TransportBlock::new("urn:xmpp:jingle:transports:s5b:1")),
    )];
    let err = responder.process_offer(offer).await.expect_err("unknown transport");

    assert!(matches!(err, NegotiationError::UnsupportedTransport { .. }));
    assert_eq!(responder.transport_method(), None);
}

#[tokio::test]
async fn test_sdes_when_dtls_undiscovered() {
    let initiator_side = Fixture::new();
    initiator_side
        .discovery
        .set_features(ROMEO, [rvoip_jingle_core::constants::NS_JINGLE_ICE_UDP]);
    let responder_side = Fixture::new();
    let mut initiator = initiator_side.handler(ROMEO, Role::Initiator);
    let mut responder = responder_side.handler(JULIET, Role::Responder);

    let offer = initiator.create_content_list().await.expect("offer");
    let description = offer[0].description.as_ref().expect("description");
    assert!(!description.encryption.as_ref().map(|e| e.crypto.is_empty()).unwrap_or(true));
    assert!(offer[0].transport.as_ref().map(|t| t.fingerprints.is_empty()).unwrap_or(false));
    assert_eq!(
        initiator.state().encryption.active(MediaType::Audio),
        Some(EncryptionProtocol::CryptoAttribute)
    );

    let answer = responder.process_offer(offer).await.expect("answer");
    let crypto = &answer[0]
        .description
        .as_ref()
        .and_then(|d| d.encryption.as_ref())
        .expect("encryption")
        .crypto;
    assert_eq!(crypto.len(), 1);
    assert_eq!(
        responder.state().encryption.active(MediaType::Audio),
        Some(EncryptionProtocol::CryptoAttribute)
    );
}

#[tokio::test]
async fn test_responder_keeps_sdes_key_on_reinit() {
    let initiator_side = Fixture::new();
    initiator_side
        .discovery
        .set_features(ROMEO, [rvoip_jingle_core::constants::NS_JINGLE_ICE_UDP]);
    let responder_side = Fixture::new();
    let mut initiator = initiator_side.handler(ROMEO, Role::Initiator);
    let mut responder = responder_side.handler(JULIET, Role::Responder);

    let offer = initiator.create_content_list().await.expect("offer");
    responder.process_offer(offer).await.expect("answer");
    let accept = responder.generate_session_accept().await.expect("session-accept");
    initiator.process_session_accept(accept).await.expect("accept processed");

    let sdes_key = |handler: &MediaHandler| {
        handler
            .state()
            .encryption
            .state(MediaType::Audio)
            .and_then(|s| s.sdes())
            .and_then(|c| c.in_use())
            .map(|a| a.key_params.clone())
    };
    let answered = sdes_key(&responder).expect("responder keyed audio");

    let modified = responder
        .remote_content(MediaType::Audio)
        .cloned()
        .expect("remote audio")
        .with_senders(Senders::Both);
    responder
        .reinit_content("audio", modified, false)
        .await
        .expect("content-modify");

    assert_eq!(sdes_key(&responder), Some(answered));
    assert_eq!(
        responder.state().encryption.active(MediaType::Audio),
        Some(EncryptionProtocol::CryptoAttribute)
    );
}

#[tokio::test]
async fn test_raw_udp_turns_rtcp_mux_off() {
    let initiator_side = Fixture::new();
    let mut initiator = initiator_side.handler(ROMEO, Role::Initiator);
    initiator.set_supported_transports(&[NS_JINGLE_RAW_UDP.to_string()]);

    let offer = initiator.create_content_list().await.expect("offer");

    assert_eq!(initiator.transport_method(), Some(TransportMethod::RawUdp));
    assert!(!initiator.state().rtcp_mux);
    for content in &offer {
        assert!(!content.description.as_ref().map(|d| d.rtcp_mux).unwrap_or(true));
        let transport = content.transport.as_ref().expect("transport");
        assert_eq!(transport.namespace, NS_JINGLE_RAW_UDP);
        assert_eq!(transport.candidates.len(), 2);
    }
}

#[tokio::test]
async fn test_content_modify_changes_senders() {
    let mut call = establish_call().await;

    let modified = call
        .initiator
        .remote_content(MediaType::Audio)
        .cloned()
        .expect("remote audio")
        .with_senders(Senders::Initiator);
    call.initiator
        .reinit_content("audio", modified, false)
        .await
        .expect("content-modify");

    let audio = call.initiator_side.factory.stream(MediaType::Audio).expect("audio stream");
    assert_eq!(audio.direction(), MediaDirection::SendOnly);
    assert!(call.initiator.state().is_master(MediaType::Audio));
    assert_eq!(
        call.initiator.remote_content(MediaType::Audio).map(|c| c.senders),
        Some(Senders::Initiator)
    );
}

#[tokio::test]
async fn test_modify_applies_quality_attributes() {
    let mut call = establish_call().await;
    call.initiator
        .set_remote_quality_presets(Some(QualityPreset::new(640, 480, 30)), None);

    let mut modified = call.initiator.remote_content(MediaType::Video).cloned().expect("remote video");
    if let Some(description) = modified.description.as_mut() {
        description.payload_types = vec![vp8().with_parameter("imageattr", "recv [x=640,y=480]")];
    }
    call.initiator
        .reinit_content("video", modified, true)
        .await
        .expect("content-modify");

    let video = call.initiator_side.factory.stream(MediaType::Video).expect("video stream");
    assert_eq!(video.quality_updates(), 1);
    assert!(call.initiator.state().supports_quality_control);
    assert_eq!(
        call.initiator.quality_control().and_then(|q| q.ceiling()),
        Some(QualityPreset::new(640, 480, 30))
    );
}

#[tokio::test]
async fn test_reinit_unknown_content_is_ignored() {
    let mut call = establish_call().await;
    let before = call.initiator_side.factory.init_count();

    let content = ContentDescriptor::new("screen", MediaType::Video);
    call.initiator
        .reinit_content("screen", content, false)
        .await
        .expect("nothing to do");

    assert_eq!(call.initiator_side.factory.init_count(), before);
}

#[tokio::test]
async fn test_reinit_all_contents_keeps_streams() {
    let mut call = establish_call().await;
    let audio = call.initiator_side.factory.stream(MediaType::Audio).expect("audio stream");

    call.initiator.reinit_all_contents().await.expect("reinit");

    let again = call.initiator_side.factory.stream(MediaType::Audio).expect("audio stream");
    assert_eq!(again.ssrc(), audio.ssrc());
    assert!(call.initiator.state().is_master(MediaType::Audio));
}

#[tokio::test]
async fn test_remove_content_closes_stream() {
    let mut call = establish_call().await;

    call.initiator.remove_content("video").await.expect("content-remove");

    let video = call.initiator_side.factory.stream(MediaType::Video).expect("video stream");
    assert!(video.is_closed());
    assert!(call.initiator.stream(MediaType::Video).is_none());
    assert!(call.initiator.local_content(MediaType::Video).is_none());
    assert!(!call.initiator.state().master.contains_key(&MediaType::Video));
    assert!(call.initiator.stream(MediaType::Audio).is_some());
}

#[tokio::test]
async fn test_close_releases_everything() {
    let mut call = establish_call().await;

    call.responder.close().await;

    assert!(call.responder.transport().is_none());
    for media in MediaType::ALL {
        let stream = call.responder_side.factory.stream(media).expect("stream");
        assert!(stream.is_closed());
        assert_eq!(call.responder.state().encryption.active(media), None);
    }
}

#[tokio::test]
async fn test_start_rebinds_targets() {
    let mut call = establish_call().await;

    call.responder.start().await.expect("start");

    let audio = call.responder_side.factory.stream(MediaType::Audio).expect("audio stream");
    assert!(audio.target().is_some());
}
