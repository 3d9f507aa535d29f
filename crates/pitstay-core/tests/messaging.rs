mod common;

use uuid::Uuid;

use common::Harness;
use pitstay_core::BookingError;
use pitstay_types::events::ChangeRecord;
use pitstay_types::models::NotificationType;

#[test]
fn send_bumps_recipient_unread_and_notifies() {
    let h = Harness::new();
    let b = h.request(10);

    let (m, replayed) = h
        .messaging
        .send_message(h.guest, b.id, "  What time is check-in?  ", Some("c-1"))
        .unwrap();
    assert!(!replayed);
    assert_eq!(m.message, "What time is check-in?");

    let conv = h.db.get_conversation(b.id).unwrap().unwrap();
    assert_eq!(conv.participant_1_unread, 0);
    assert_eq!(conv.participant_2_unread, 1);
    assert!(conv.last_message_at.is_some());

    let notes = h.notifications.list(h.host, 10).unwrap();
    assert_eq!(notes[0].kind, NotificationType::NewMessage);

    let events = h.sink.take();
    assert!(events.iter().any(|e| matches!(&e.record, ChangeRecord::Message(msg) if msg.id == m.id)));
}

#[test]
fn resend_with_same_client_ref_is_a_no_op() {
    let h = Harness::new();
    let b = h.request(10);

    let (first, _) = h.messaging.send_message(h.guest, b.id, "hello", Some("c-1")).unwrap();
    h.sink.take();
    let (again, replayed) = h.messaging.send_message(h.guest, b.id, "hello", Some("c-1")).unwrap();

    assert!(replayed);
    assert_eq!(again.id, first.id);
    assert!(h.sink.take().is_empty());
    assert_eq!(h.messaging.list_messages(h.host, b.id, 50).unwrap().len(), 1);
    assert_eq!(h.db.get_conversation(b.id).unwrap().unwrap().participant_2_unread, 1);
}

#[test]
fn client_ref_reused_on_another_booking_is_rejected() {
    let h = Harness::new();
    let first = h.request(10);
    let second = h.request(10);

    h.messaging.send_message(h.guest, first.id, "hello", Some("c-1")).unwrap();
    let err = h
        .messaging
        .send_message(h.guest, second.id, "hello again", Some("c-1"))
        .unwrap_err();

    assert!(matches!(err, BookingError::Validation(_)), "got {err:?}");
    assert!(h.messaging.list_messages(h.host, second.id, 50).unwrap().is_empty());
}

#[test]
fn outsiders_cannot_read_or_write() {
    let h = Harness::new();
    let b = h.request(10);
    let stranger = Uuid::new_v4();

    let err = h.messaging.send_message(stranger, b.id, "hi", None).unwrap_err();
    assert!(matches!(err, BookingError::Unauthorized(_)));
    let err = h.messaging.list_messages(stranger, b.id, 10).unwrap_err();
    assert!(matches!(err, BookingError::Unauthorized(_)));
}

#[test]
fn blank_or_oversized_text_is_invalid() {
    let h = Harness::new();
    let b = h.request(10);

    let err = h.messaging.send_message(h.guest, b.id, "   ", None).unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));

    let long = "x".repeat(pitstay_core::messaging::MAX_MESSAGE_LEN + 1);
    let err = h.messaging.send_message(h.guest, b.id, &long, None).unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
}

#[test]
fn mark_conversation_read_only_touches_received_messages() {
    let h = Harness::new();
    let b = h.request(10);
    h.messaging.send_message(h.guest, b.id, "one", None).unwrap();
    h.messaging.send_message(h.guest, b.id, "two", None).unwrap();
    h.messaging.send_message(h.host, b.id, "reply", None).unwrap();

    assert_eq!(h.messaging.mark_conversation_read(h.host, b.id).unwrap(), 2);
    assert_eq!(h.messaging.mark_conversation_read(h.host, b.id).unwrap(), 0);

    let conv = h.db.get_conversation(b.id).unwrap().unwrap();
    assert_eq!(conv.participant_2_unread, 0);
    assert_eq!(conv.participant_1_unread, 1);

    let messages = h.messaging.list_messages(h.guest, b.id, 50).unwrap();
    let texts: Vec<_> = messages.iter().map(|m| (m.message.as_str(), m.read)).collect();
    assert_eq!(texts, vec![("one", true), ("two", true), ("reply", false)]);
}
