mod common;

use std::sync::Arc;

use uuid::Uuid;

use common::{FakeServer, eventually};
use pitstay_client::{ClientError, ConnectionState, Intent};
use pitstay_types::models::{BookingStatus, HostResponse, Party};

#[tokio::test(start_paused = true)]
async fn losing_device_gets_conflict_and_sees_the_winner() {
    let server = FakeServer::new();
    let (guest, host) = (Uuid::new_v4(), Uuid::new_v4());
    server.fund(guest, 100);
    let booking = server.request_booking(guest, host, 10);

    let phone = server.broker_for(host);
    let laptop = server.broker_for(host);
    phone.refresh_bookings().await.unwrap();
    laptop.refresh_bookings().await.unwrap();

    let accepted = phone
        .respond(&Intent::new(booking.id), HostResponse::Accepted, None)
        .await
        .unwrap();
    assert_eq!(accepted.booking.status, BookingStatus::Accepted);

    let err = laptop
        .respond(&Intent::new(booking.id), HostResponse::Rejected, Some("Sorry, fully booked".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Conflict(_)), "got {err:?}");
    assert_eq!(laptop.booking(booking.id).unwrap().status, BookingStatus::Accepted);

    // The losing reject never refunded anything.
    assert_eq!(server.ledger.get_balance(guest).unwrap(), 90);
}

#[tokio::test(start_paused = true)]
async fn retrying_an_intent_is_replayed_not_reapplied() {
    let server = FakeServer::new();
    let (guest, host) = (Uuid::new_v4(), Uuid::new_v4());
    server.fund(guest, 100);
    let booking = server.request_booking(guest, host, 10);

    let broker = server.broker_for(host);
    broker.refresh_bookings().await.unwrap();
    broker
        .respond(&Intent::new(booking.id), HostResponse::Accepted, None)
        .await
        .unwrap();

    let intent = Intent::new(booking.id);
    let first = broker.confirm(&intent).await.unwrap();
    let again = broker.confirm(&intent).await.unwrap();

    assert!(!first.replayed);
    assert!(again.replayed);
    assert_eq!(again.booking.status, BookingStatus::Confirmed);
    assert_eq!(server.db.get_transitions(booking.id).unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn accept_and_confirm_holds_the_booking_until_done() {
    let server = FakeServer::new();
    let (guest, host) = (Uuid::new_v4(), Uuid::new_v4());
    server.fund(guest, 100);
    let booking = server.request_booking(guest, host, 10);

    let broker = Arc::new(server.broker_for(host));
    broker.refresh_bookings().await.unwrap();

    let task = {
        let broker = broker.clone();
        tokio::spawn(async move { broker.accept_and_confirm(&Intent::new(booking.id), None).await })
    };

    eventually("accepted", || {
        broker.booking(booking.id).map(|b| b.status) == Some(BookingStatus::Accepted)
    })
    .await;
    let err = broker.confirm(&Intent::new(booking.id)).await.unwrap_err();
    assert!(matches!(err, ClientError::Busy(id) if id == booking.id));

    let done = task.await.unwrap().unwrap();
    assert_eq!(done.booking.status, BookingStatus::Confirmed);
    assert_eq!(broker.booking(booking.id).unwrap().status, BookingStatus::Confirmed);
    assert!(!broker.is_busy(booking.id));
}

#[tokio::test(start_paused = true)]
async fn guest_cancel_refunds_and_the_balance_follows() {
    let server = FakeServer::new();
    let (guest, host) = (Uuid::new_v4(), Uuid::new_v4());
    server.fund(guest, 100);
    let booking = server.request_booking(guest, host, 40);

    let broker = server.broker_for(guest);
    broker.start(guest).await.unwrap();
    eventually("connected", || broker.connection_state() == ConnectionState::Connected).await;
    assert_eq!(broker.balance(), Some(60));

    let resp = broker.cancel(&Intent::new(booking.id), Party::Guest).await.unwrap();
    assert_eq!(resp.booking.status, BookingStatus::Cancelled);
    eventually("refund reflected", || broker.balance() == Some(100)).await;

    broker.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn rejected_actions_leave_the_cache_alone() {
    let server = FakeServer::new();
    let (guest, host) = (Uuid::new_v4(), Uuid::new_v4());
    server.fund(guest, 100);
    let booking = server.request_booking(guest, host, 10);

    let host_broker = server.broker_for(host);
    host_broker.refresh_bookings().await.unwrap();
    let err = host_broker.complete(&Intent::new(booking.id)).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidTransition(_)), "got {err:?}");
    assert_eq!(host_broker.booking(booking.id).unwrap().status, BookingStatus::Pending);

    let guest_broker = server.broker_for(guest);
    guest_broker.refresh_bookings().await.unwrap();
    let err = guest_broker.confirm(&Intent::new(booking.id)).await.unwrap_err();
    assert!(matches!(err, ClientError::Unauthorized(_)), "got {err:?}");
}
