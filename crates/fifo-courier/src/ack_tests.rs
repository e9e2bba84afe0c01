//! Tests for the acknowledgment tracker.

use super::*;
use std::sync::Arc;

fn received(id: &str) -> Message {
    Message::new(
        id.parse().unwrap(),
        format!("body of {}", id),
        ReceiptToken::new(format!("receipt-{}", id)),
    )
}

#[test]
fn test_track_starts_pending() {
    let tracker = AckTracker::new();
    let record = tracker.track(&received("m-1"));

    assert_eq!(tracker.outcome(&record), Some(AckOutcome::Pending));
    assert_eq!(record.message_id().as_str(), "m-1");
    assert_eq!(record.receipt_token().as_str(), "receipt-m-1");
    assert_eq!(tracker.pending(), 1);
}

#[test]
fn test_pending_to_acked() {
    let tracker = AckTracker::new();
    let record = tracker.track(&received("m-1"));

    tracker.mark_acked(&record).unwrap();

    assert_eq!(tracker.outcome(&record), Some(AckOutcome::Acked));
    assert_eq!(tracker.pending(), 0);
}

#[test]
fn test_pending_to_failed() {
    let tracker = AckTracker::new();
    let record = tracker.track(&received("m-1"));

    tracker.mark_failed(&record).unwrap();

    assert_eq!(tracker.outcome(&record), Some(AckOutcome::Failed));
}

#[test]
fn test_double_ack_is_rejected() {
    let tracker = AckTracker::new();
    let record = tracker.track(&received("m-1"));
    tracker.mark_acked(&record).unwrap();

    let result = tracker.mark_acked(&record);

    match result {
        Err(InvalidStateError::AlreadyResolved { message_id, current }) => {
            assert_eq!(message_id, "m-1");
            assert_eq!(current, "Acked");
        }
        other => panic!("Expected AlreadyResolved, got: {:?}", other),
    }
    assert_eq!(tracker.outcome(&record), Some(AckOutcome::Acked));
}

#[test]
fn test_fail_after_ack_is_rejected() {
    let tracker = AckTracker::new();
    let record = tracker.track(&received("m-1"));
    tracker.mark_acked(&record).unwrap();

    assert!(tracker.mark_failed(&record).is_err());
    assert_eq!(tracker.outcome(&record), Some(AckOutcome::Acked));
}

#[test]
fn test_ack_after_fail_is_rejected() {
    let tracker = AckTracker::new();
    let record = tracker.track(&received("m-1"));
    tracker.mark_failed(&record).unwrap();

    assert!(tracker.mark_acked(&record).is_err());
    assert!(tracker.mark_failed(&record).is_err());
    assert_eq!(tracker.outcome(&record), Some(AckOutcome::Failed));
}

#[test]
fn test_unissued_record_is_unknown() {
    let tracker = AckTracker::new();
    let _ = tracker.track(&received("m-0"));
    let message = received("m-9");
    let unissued = AckRecord {
        sequence: 99,
        message_id: message.id.clone(),
        receipt_token: message.receipt_token.clone(),
    };

    assert!(matches!(
        tracker.mark_acked(&unissued),
        Err(InvalidStateError::UnknownRecord { .. })
    ));
    assert_eq!(tracker.outcome(&unissued), None);
}

#[test]
fn test_same_message_tracked_twice_gets_independent_records() {
    let tracker = AckTracker::new();
    let message = received("m-1");

    let first = tracker.track(&message);
    let second = tracker.track(&message);
    tracker.mark_failed(&first).unwrap();

    assert_eq!(tracker.outcome(&second), Some(AckOutcome::Pending));
    tracker.mark_acked(&second).unwrap();
}

#[test]
fn test_counts() {
    let tracker = AckTracker::new();
    let records: Vec<_> = (0..5)
        .map(|i| tracker.track(&received(&format!("m-{}", i))))
        .collect();

    tracker.mark_acked(&records[0]).unwrap();
    tracker.mark_acked(&records[1]).unwrap();
    tracker.mark_failed(&records[2]).unwrap();

    assert_eq!(
        tracker.counts(),
        AckCounts {
            pending: 2,
            acked: 2,
            failed: 1
        }
    );
}

#[test]
fn test_concurrent_transitions_resolve_exactly_once() {
    let tracker = Arc::new(AckTracker::new());
    let record = tracker.track(&received("m-1"));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let tracker = Arc::clone(&tracker);
            let record = record.clone();
            std::thread::spawn(move || {
                if i % 2 == 0 {
                    tracker.mark_acked(&record).is_ok()
                } else {
                    tracker.mark_failed(&record).is_ok()
                }
            })
        })
        .collect();

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(successes, 1);
    assert_ne!(tracker.outcome(&record), Some(AckOutcome::Pending));
}
