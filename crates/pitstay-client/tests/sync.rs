mod common;

use std::time::Duration;

use uuid::Uuid;

use common::{FakeServer, eventually};
use pitstay_client::{ClientError, ConnectionState, SendOutcome};
use pitstay_types::events::{ChangeEvent, ChangeRecord};

#[tokio::test(start_paused = true)]
async fn start_twice_is_rejected_and_stop_disconnects() {
    let server = FakeServer::new();
    let user = Uuid::new_v4();
    let broker = server.broker_for(user);

    broker.start(user).await.unwrap();
    assert!(matches!(broker.start(user).await, Err(ClientError::Lifecycle(_))));
    eventually("connected", || broker.connection_state() == ConnectionState::Connected).await;

    broker.stop().await.unwrap();
    assert_eq!(broker.connection_state(), ConnectionState::Disconnected);
    assert!(matches!(broker.stop().await, Err(ClientError::Lifecycle(_))));
}

#[tokio::test(start_paused = true)]
async fn live_changes_reach_the_caches() {
    let server = FakeServer::new();
    let (guest, host) = (Uuid::new_v4(), Uuid::new_v4());
    server.fund(guest, 100);

    let broker = server.broker_for(guest);
    broker.start(guest).await.unwrap();
    eventually("connected", || broker.connection_state() == ConnectionState::Connected).await;
    assert_eq!(broker.balance(), Some(100));

    let booking = server.request_booking(guest, host, 10);
    eventually("booking pushed", || broker.booking(booking.id).is_some()).await;
    // A new ledger row triggers a balance re-fetch.
    eventually("balance re-fetched", || broker.balance() == Some(90)).await;
    assert_eq!(broker.transactions().len(), 2);

    broker.open_conversation(booking.id).await.unwrap();
    // Let the session subscribe the feed to the new topic.
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.messaging.send_message(host, booking.id, "See you on Friday", None).unwrap();
    eventually("message pushed", || broker.messages(booking.id).len() == 1).await;

    broker.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn offline_send_is_queued_and_delivered_once_on_reconnect() {
    let server = FakeServer::new();
    let (guest, host) = (Uuid::new_v4(), Uuid::new_v4());
    server.fund(guest, 100);
    let booking = server.request_booking(guest, host, 10);

    let broker = server.broker_for(guest);
    broker.start(guest).await.unwrap();
    eventually("connected", || broker.connection_state() == ConnectionState::Connected).await;
    let conversation = broker.open_conversation(booking.id).await.unwrap();

    server.set_online(false);
    let outcome = broker.send_message(booking.id, "Running late, arriving 9pm").await.unwrap();
    let SendOutcome::Queued { client_ref } = outcome else {
        panic!("expected the send to be queued, got {outcome:?}");
    };
    assert_eq!(broker.queued_messages(), 1);
    eventually("feed lost", || broker.connection_state() != ConnectionState::Connected).await;

    let shown = broker.messages(booking.id);
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].client_ref.as_deref(), Some(client_ref.as_str()));
    assert!(server.messaging.list_messages(host, booking.id, 50).unwrap().is_empty());

    server.set_online(true);
    eventually("reconnected", || broker.connection_state() == ConnectionState::Connected).await;
    assert_eq!(broker.queued_messages(), 0);

    let stored = server.messaging.list_messages(host, booking.id, 50).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].client_ref.as_deref(), Some(client_ref.as_str()));

    let shown = broker.messages(booking.id);
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].id, stored[0].id);
    assert_eq!(conversation.borrow().len(), 1);

    // A late duplicate of the echo changes nothing.
    broker.apply(ChangeEvent::insert(ChangeRecord::Message(stored[0].clone()))).await;
    assert_eq!(broker.messages(booking.id).len(), 1);

    broker.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reconnect_reconciles_changes_missed_while_disconnected() {
    let server = FakeServer::new();
    let (guest, host) = (Uuid::new_v4(), Uuid::new_v4());
    server.fund(guest, 100);

    let broker = server.broker_for(guest);
    broker.start(guest).await.unwrap();
    eventually("connected", || broker.connection_state() == ConnectionState::Connected).await;
    assert_eq!(server.connects(), 1);

    server.set_feed_up(false);
    let missed = server.request_booking(guest, host, 25);
    assert!(broker.booking(missed.id).is_none());

    server.set_feed_up(true);
    eventually("missed booking fetched", || {
        broker.booking(missed.id).is_some() && broker.connection_state() == ConnectionState::Connected
    })
    .await;
    assert_eq!(broker.balance(), Some(75));
    assert_eq!(server.connects(), 2);

    broker.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn exhausted_reconnects_fall_back_to_polling() {
    let server = FakeServer::new();
    let (guest, host) = (Uuid::new_v4(), Uuid::new_v4());
    server.fund(guest, 100);
    server.set_feed_up(false);

    let broker = server.broker_for(guest);
    let mut states = broker.watch_connection();
    broker.start(guest).await.unwrap();

    eventually("degraded", || broker.connection_state() == ConnectionState::Degraded).await;
    assert!(states.has_changed().unwrap());
    assert_eq!(server.connects(), 0);

    let booking = server.request_booking(guest, host, 10);
    eventually("poll picked up booking", || {
        broker.booking(booking.id).is_some() && broker.balance() == Some(90)
    })
    .await;
    assert_eq!(broker.connection_state(), ConnectionState::Degraded);

    server.set_feed_up(true);
    eventually("feed restored", || broker.connection_state() == ConnectionState::Connected).await;
    states.mark_unchanged();

    broker.stop().await.unwrap();
    assert!(states.has_changed().unwrap());
}

#[tokio::test(start_paused = true)]
async fn failed_reconciliation_reconnects_until_a_refetch_succeeds() {
    let server = FakeServer::new();
    let (guest, host) = (Uuid::new_v4(), Uuid::new_v4());
    server.fund(guest, 100);

    let broker = server.broker_for(guest);
    broker.start(guest).await.unwrap();
    eventually("connected", || broker.connection_state() == ConnectionState::Connected).await;

    server.set_feed_up(false);
    server.fail_reads(true);
    let missed = server.request_booking(guest, host, 25);
    server.set_feed_up(true);

    // Each reconnect fails to re-fetch, so the feed is dropped and retried.
    eventually("repeated reconnects", || server.connects() >= 3).await;
    assert_ne!(broker.connection_state(), ConnectionState::Connected);
    assert!(broker.booking(missed.id).is_none());

    server.fail_reads(false);
    eventually("missed booking fetched", || {
        broker.booking(missed.id).is_some() && broker.connection_state() == ConnectionState::Connected
    })
    .await;
    assert_eq!(broker.balance(), Some(75));

    broker.stop().await.unwrap();
}
