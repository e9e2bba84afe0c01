//! Common test utilities for fifo-courier integration tests
//!
//! This module provides:
//! - An SQS transport pointed at a mock server
//! - Builders for SQS query-protocol XML responses
//! - A handler that records what it sees and can fail selected messages

use async_trait::async_trait;
use fifo_courier::providers::SqsCredentials;
use fifo_courier::{HandlerError, Message, MessageHandler, SqsConfig, SqsTransport};
use std::collections::HashSet;
use std::sync::Mutex;
use wiremock::MockServer;

// ============================================================================
// SQS Fixtures
// ============================================================================

/// SQS transport that sends every call to `server`
#[allow(dead_code)]
pub fn sqs_transport(server: &MockServer) -> SqsTransport {
    let config = SqsConfig {
        endpoint: Some(server.uri()),
        ..Default::default()
    };
    let credentials = SqsCredentials {
        access_key_id: "AKIDEXAMPLE".to_string(),
        secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
        session_token: None,
    };

    SqsTransport::with_credentials(config, credentials).expect("Setup: SQS transport")
}

/// Queue URL the mock server hands out for `name`
#[allow(dead_code)]
pub fn queue_url(server: &MockServer, name: &str) -> String {
    format!("{}/123456789012/{}", server.uri(), name)
}

#[allow(dead_code)]
pub fn get_queue_url_response(url: &str) -> String {
    format!(
        "<GetQueueUrlResponse><GetQueueUrlResult><QueueUrl>{}</QueueUrl></GetQueueUrlResult>\
         <ResponseMetadata><RequestId>req-1</RequestId></ResponseMetadata></GetQueueUrlResponse>",
        url
    )
}

#[allow(dead_code)]
pub fn send_message_response(message_id: &str) -> String {
    format!(
        "<SendMessageResponse><SendMessageResult>\
         <MD5OfMessageBody>99914b932bd37a50b983c5e7c90ae93b</MD5OfMessageBody>\
         <MessageId>{}</MessageId><SequenceNumber>18849496460467696128</SequenceNumber>\
         </SendMessageResult></SendMessageResponse>",
        message_id
    )
}

/// `ReceiveMessage` response carrying `(message id, receipt handle, body)` entries
#[allow(dead_code)]
pub fn receive_message_response(messages: &[(&str, &str, &str)]) -> String {
    let entries: String = messages
        .iter()
        .map(|(id, handle, body)| {
            format!(
                "<Message><MessageId>{}</MessageId><ReceiptHandle>{}</ReceiptHandle>\
                 <Body>{}</Body>\
                 <Attribute><Name>ApproximateReceiveCount</Name><Value>1</Value></Attribute>\
                 </Message>",
                id, handle, body
            )
        })
        .collect();

    format!(
        "<ReceiveMessageResponse><ReceiveMessageResult>{}</ReceiveMessageResult>\
         <ResponseMetadata><RequestId>req-2</RequestId></ResponseMetadata></ReceiveMessageResponse>",
        entries
    )
}

#[allow(dead_code)]
pub fn delete_message_response() -> String {
    "<DeleteMessageResponse><ResponseMetadata><RequestId>req-3</RequestId></ResponseMetadata>\
     </DeleteMessageResponse>"
        .to_string()
}

#[allow(dead_code)]
pub fn error_response(code: &str, message: &str) -> String {
    format!(
        "<ErrorResponse><Error><Type>Sender</Type><Code>{}</Code><Message>{}</Message></Error>\
         <RequestId>req-4</RequestId></ErrorResponse>",
        code, message
    )
}

// ============================================================================
// Recording Handler
// ============================================================================

/// Handler that records message bodies and fails the ones it is told to
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingHandler {
    seen: Mutex<Vec<String>>,
    fail_bodies: HashSet<String>,
}

impl RecordingHandler {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn failing_on(bodies: &[&str]) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            fail_bodies: bodies.iter().map(|b| b.to_string()).collect(),
        }
    }

    #[allow(dead_code)]
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(message.body.clone());
        if self.fail_bodies.contains(&message.body) {
            return Err(HandlerError::msg(format!("refusing '{}'", message.body)));
        }
        Ok(())
    }
}
