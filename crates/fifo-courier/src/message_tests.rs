//! Tests for message types.

use super::*;

// ============================================================================
// Destination Tests
// ============================================================================

#[test]
fn test_destination_accepts_standard_and_fifo_names() {
    let standard = Destination::new("orders".to_string()).unwrap();
    assert!(!standard.is_fifo());
    assert_eq!(standard.queue_name(), "orders");

    let fifo = Destination::new("queue-test.fifo".to_string()).unwrap();
    assert!(fifo.is_fifo());
    assert!(!fifo.is_url());
}

#[test]
fn test_destination_accepts_queue_url() {
    let destination: Destination = "https://sqs.us-east-1.amazonaws.com/123456789123/queue-test.fifo"
        .parse()
        .unwrap();

    assert!(destination.is_url());
    assert!(destination.is_fifo());
    assert_eq!(destination.queue_name(), "queue-test.fifo");
}

#[test]
fn test_destination_rejects_empty() {
    let result = Destination::new(String::new());
    assert!(matches!(result, Err(ValidationError::Required { .. })));
}

#[test]
fn test_destination_rejects_invalid_characters() {
    assert!(Destination::new("orders queue".to_string()).is_err());
    assert!(Destination::new("orders.json".to_string()).is_err());
    assert!(Destination::new(".fifo".to_string()).is_err());
}

#[test]
fn test_destination_rejects_overlong_name() {
    let name = "a".repeat(81);
    assert!(matches!(
        Destination::new(name),
        Err(ValidationError::OutOfRange { .. })
    ));
}

#[test]
fn test_destination_rejects_url_without_queue_name() {
    assert!(Destination::new("https://sqs.us-east-1.amazonaws.com/".to_string()).is_err());
}

// ============================================================================
// Identifier Tests
// ============================================================================

#[test]
fn test_message_id_generation_is_unique() {
    assert_ne!(MessageId::new(), MessageId::new());
}

#[test]
fn test_message_id_from_empty_string_fails() {
    assert!("".parse::<MessageId>().is_err());
    assert_eq!("abc".parse::<MessageId>().unwrap().as_str(), "abc");
}

#[test]
fn test_partition_key_validation() {
    assert!(PartitionKey::new("3f4c387d-b589-4b2a-993e-380133703ba1".to_string()).is_ok());
    assert!(PartitionKey::new(String::new()).is_err());
    assert!(PartitionKey::new("has space".to_string()).is_err());
    assert!(PartitionKey::new("x".repeat(129)).is_err());
}

#[test]
fn test_receipt_token_debug_is_truncated() {
    let token = ReceiptToken::new("A".repeat(400));
    let rendered = format!("{:?}", token);

    assert!(rendered.len() < 40);
    assert!(rendered.ends_with("...)"));
}

// ============================================================================
// Message Tests
// ============================================================================

#[test]
fn test_outbound_message_builder() {
    let key = PartitionKey::new("group-1".to_string()).unwrap();
    let message = OutboundMessage::new("{\"id\":1}")
        .with_partition_key(key.clone())
        .with_business_key("order-42");

    assert_eq!(message.body, "{\"id\":1}");
    assert_eq!(message.partition_key, Some(key));
    assert_eq!(message.business_key.as_deref(), Some("order-42"));
}

#[test]
fn test_received_message_redelivery_flag() {
    let message = Message::new(MessageId::new(), "body", ReceiptToken::new("r-1"));
    assert!(!message.is_redelivery());

    let message = message.with_receive_count(3);
    assert!(message.is_redelivery());
}
