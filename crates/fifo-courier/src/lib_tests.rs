//! Tests for the crate's public surface working together.

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_send_then_consume_round() {
    let transport = Arc::new(InMemoryTransport::default());
    let sink = Arc::new(RecordingSink::new());
    let queue = Destination::new("users.fifo".to_string()).unwrap();
    let group = PartitionKey::new("user-group".to_string()).unwrap();

    let producer = Producer::new(transport.clone()).with_event_sink(sink.clone());
    for i in 0..3 {
        producer
            .send(
                &queue,
                OutboundMessage::new(format!(r#"{{"UserId":"u-{}"}}"#, i))
                    .with_partition_key(group.clone())
                    .with_business_key(format!("user-{}", i)),
            )
            .await
            .unwrap();
    }

    let seen = Arc::new(AtomicUsize::new(0));
    let handler = {
        let seen = seen.clone();
        handler_fn(move |_message: Message| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };

    let summary = PollLoop::new(transport.clone(), PollConfig::default())
        .with_backoff(BackoffPolicy::default().without_jitter())
        .with_event_sink(sink.clone())
        .run(&queue, &handler, Some(4))
        .await
        .unwrap();

    assert_eq!(summary.cycles_run, 4);
    assert_eq!(summary.messages_received, 3);
    assert_eq!(summary.messages_acked, 3);
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(transport.queue_depth(&queue), 0);
    assert_eq!(sink.count(EventKind::MessageSent), 3);
    assert_eq!(sink.count(EventKind::LoopTerminated), 1);
}

#[test]
fn test_error_classification_is_consistent() {
    let transient = TransportError::transient("Throttling", "slow down");
    let permanent = TransportError::permanent("AccessDenied", "no");

    assert!(SendError::from(transient.clone()).is_transient());
    assert!(!SendError::from(permanent).is_transient());
    assert!(transient.is_transient());
}
