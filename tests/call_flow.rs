mod common;

use common::{settle, sorted_ids, wait_until, Harness};
use relaycall::call::{answer_fields, CallPaths};
use relaycall::relay::RelayStore;
use relaycall::{CallError, CallRecord, NegotiationState, NegotiatorConfig, Role};

async fn record(h: &Harness, call_id: &str) -> CallRecord {
    let paths = CallPaths::for_id(call_id, &NegotiatorConfig::default());
    let doc = h
        .store
        .get_document(&paths.record)
        .await
        .unwrap()
        .expect("call record exists");
    CallRecord::from_document(&doc).unwrap()
}

#[tokio::test]
async fn two_peers_connect_and_exchange_tracks() {
    let h = Harness::new();
    let alice = h.peer("alice");
    let bob = h.peer("bob");

    alice.setup_media_sources().await.unwrap();
    bob.setup_media_sources().await.unwrap();

    let call_id = alice.create_call().await.unwrap();
    assert_eq!(alice.role(), Some(Role::Caller));
    assert_eq!(alice.state(), NegotiationState::OfferSent);

    bob.answer_call(&call_id).await.unwrap();
    assert_eq!(bob.role(), Some(Role::Callee));
    assert_eq!(bob.call_id().as_deref(), Some(call_id.as_str()));

    wait_until(|| sorted_ids(&alice).len() == 2 && sorted_ids(&bob).len() == 2).await;
    assert_eq!(sorted_ids(&alice), vec!["bob-audio", "bob-video"]);
    assert_eq!(sorted_ids(&bob), vec!["alice-audio", "alice-video"]);

    wait_until(|| {
        alice.state() == NegotiationState::Connected && bob.state() == NegotiationState::Connected
    })
    .await;
}

#[tokio::test]
async fn created_record_holds_offer_only() {
    let h = Harness::new();
    let alice = h.peer("alice");
    alice.setup_media_sources().await.unwrap();

    let call_id = alice.create_call().await.unwrap();
    assert!(!call_id.is_empty());

    let record = record(&h, &call_id).await;
    assert!(record.offer.is_some());
    assert!(record.answer.is_none());
}

#[tokio::test]
async fn answer_is_written_to_the_record() {
    let h = Harness::new();
    let alice = h.peer("alice");
    let bob = h.peer("bob");
    alice.setup_media_sources().await.unwrap();
    bob.setup_media_sources().await.unwrap();

    let call_id = alice.create_call().await.unwrap();
    bob.answer_call(&call_id).await.unwrap();

    let record = record(&h, &call_id).await;
    let answer = record.answer.expect("answer stored");
    assert_eq!(answer.sdp_type, relaycall::peer::SdpType::Answer);
    assert!(record.offer.is_some());
}

#[tokio::test]
async fn call_id_is_trimmed() {
    let h = Harness::new();
    let alice = h.peer("alice");
    let bob = h.peer("bob");
    alice.setup_media_sources().await.unwrap();
    bob.setup_media_sources().await.unwrap();

    let call_id = alice.create_call().await.unwrap();
    bob.answer_call(&format!("  {call_id}\n")).await.unwrap();
    assert_eq!(bob.call_id(), Some(call_id));
}

#[tokio::test]
async fn candidates_written_before_answer_are_delivered() {
    let h = Harness::new();
    let alice = h.peer("alice");
    let bob = h.peer("bob");
    alice.setup_media_sources().await.unwrap();
    bob.setup_media_sources().await.unwrap();

    let call_id = alice.create_call().await.unwrap();
    let paths = CallPaths::for_id(&call_id, &NegotiatorConfig::default());
    wait_until(|| h.store.documents(&paths.offer_candidates).len() == 2).await;

    bob.answer_call(&call_id).await.unwrap();
    let bob_conn = bob.connection_id().unwrap();
    let transport = h.network.transport(&bob_conn).unwrap();
    wait_until(|| transport.remote_candidates().len() == 2).await;
}

#[tokio::test]
async fn repeated_answer_snapshots_apply_once() {
    let h = Harness::new();
    let alice = h.peer("alice");
    let bob = h.peer("bob");
    alice.setup_media_sources().await.unwrap();
    bob.setup_media_sources().await.unwrap();

    let call_id = alice.create_call().await.unwrap();
    bob.answer_call(&call_id).await.unwrap();
    wait_until(|| alice.state() == NegotiationState::Connected).await;

    let answer = record(&h, &call_id).await.answer.unwrap();
    let paths = CallPaths::for_id(&call_id, &NegotiatorConfig::default());
    h.store
        .update_document(&paths.record, answer_fields(&answer))
        .await
        .unwrap();
    settle().await;

    let alice_conn = h.network.transport(&alice.connection_id().unwrap()).unwrap();
    assert_eq!(alice_conn.set_remote_calls(), 1);
    assert_eq!(alice.state(), NegotiationState::Connected);
}

#[tokio::test]
async fn second_callee_is_refused() {
    let h = Harness::new();
    let alice = h.peer("alice");
    let bob = h.peer("bob");
    let carol = h.peer("carol");
    for peer in [&alice, &bob, &carol] {
        peer.setup_media_sources().await.unwrap();
    }

    let call_id = alice.create_call().await.unwrap();
    bob.answer_call(&call_id).await.unwrap();
    let before = record(&h, &call_id).await;

    let err = carol.answer_call(&call_id).await.unwrap_err();
    assert!(matches!(err, CallError::AlreadyAnswered(ref id) if *id == call_id));
    assert_eq!(record(&h, &call_id).await, before);
    assert_eq!(carol.state(), NegotiationState::MediaReady);
    assert_eq!(carol.role(), None);
}

#[tokio::test]
async fn remote_slot_notifies_subscribers() {
    let h = Harness::new();
    let alice = h.peer("alice");
    let bob = h.peer("bob");
    let mut remote = alice.remote_stream();
    assert!(remote.borrow().is_none());

    alice.setup_media_sources().await.unwrap();
    remote.changed().await.unwrap();
    assert_eq!(remote.borrow_and_update().as_ref().map(|s| s.len()), Some(0));

    bob.setup_media_sources().await.unwrap();
    let call_id = alice.create_call().await.unwrap();
    bob.answer_call(&call_id).await.unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            remote.changed().await.unwrap();
            if remote.borrow_and_update().as_ref().map(|s| s.len()) == Some(2) {
                break;
            }
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn hangup_releases_everything() {
    let h = Harness::new();
    let alice = h.peer("alice");
    let bob = h.peer("bob");
    alice.setup_media_sources().await.unwrap();
    bob.setup_media_sources().await.unwrap();

    let call_id = alice.create_call().await.unwrap();
    bob.answer_call(&call_id).await.unwrap();
    wait_until(|| alice.state() == NegotiationState::Connected).await;

    let conn = alice.connection_id().unwrap();
    let local = alice.current_local_stream().unwrap();
    alice.hangup();

    assert!(h.network.is_closed(&conn));
    assert!(local
        .tracks()
        .iter()
        .all(|t| relaycall::mock::is_stopped(t.as_ref())));
    assert!(alice.current_local_stream().is_none());
    assert!(alice.current_remote_stream().is_none());
    assert_eq!(alice.state(), NegotiationState::Idle);
    assert_eq!(alice.call_id(), None);

    let paths = CallPaths::for_id(&call_id, &NegotiatorConfig::default());
    wait_until(|| {
        h.store.subscriber_count(&paths.record.to_string()) == 0
            && h.store.subscriber_count(paths.answer_candidates.as_str()) == 0
    })
    .await;

    // hanging up again is harmless
    alice.hangup();
    assert_eq!(alice.state(), NegotiationState::Idle);
}

#[tokio::test]
async fn new_call_after_hangup_uses_fresh_handle() {
    let h = Harness::new();
    let alice = h.peer("alice");

    alice.setup_media_sources().await.unwrap();
    let first_call = alice.create_call().await.unwrap();
    let first_conn = alice.connection_id().unwrap();
    alice.hangup();

    alice.setup_media_sources().await.unwrap();
    let second_call = alice.create_call().await.unwrap();
    let second_conn = alice.connection_id().unwrap();

    assert_ne!(first_call, second_call);
    assert_ne!(first_conn, second_conn);
    assert_eq!(h.network.transport_count(), 2);
}

#[tokio::test]
async fn hangup_without_session_is_a_no_op() {
    let h = Harness::new();
    let alice = h.peer("alice");
    alice.hangup();
    alice.hangup();
    assert_eq!(alice.state(), NegotiationState::Idle);
    assert_eq!(h.store.operation_count(), 0);
}
