//! Amazon SQS transport over the query protocol.
//!
//! Requests are form-encoded `POST`s to the regional endpoint (or a configured
//! override such as LocalStack), signed with AWS Signature Version 4. Calling
//! the HTTP API directly keeps the transport testable against a mock server.
//!
//! ## Queue addressing
//!
//! A destination given as an `http(s)://` URL is used as the queue URL as-is.
//! A plain queue name is resolved once with `GetQueueUrl` and cached.
//!
//! ## Failure classification
//!
//! Network failures, timeouts, HTTP 5xx and throttling codes are
//! [`TransportError::Transient`]. Everything else the service reports (missing
//! queue, bad credentials, invalid parameters, stale receipt handles) is
//! [`TransportError::Permanent`].

use crate::dedup::DedupKey;
use crate::error::{ConfigurationError, TransportError};
use crate::message::{Destination, Message, MessageId, PartitionKey, ReceiptToken};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;

#[cfg(test)]
#[path = "sqs_tests.rs"]
mod tests;

/// SQS query API version
const API_VERSION: &str = "2012-11-05";

/// Service limits
pub const SQS_MAX_BATCH_SIZE: u32 = 10;
pub const SQS_MAX_MESSAGE_SIZE: usize = 256 * 1024;
pub const SQS_MAX_WAIT_SECONDS: u64 = 20;

/// Error codes that signal throttling or a temporary service fault
const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestThrottled",
    "ServiceUnavailable",
    "InternalError",
];

// ============================================================================
// Configuration
// ============================================================================

/// SQS transport configuration
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SqsConfig {
    pub region: String,
    /// Endpoint override, e.g. `http://localhost:4566` for LocalStack
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Must exceed the long-poll wait
    pub request_timeout_seconds: u64,
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            request_timeout_seconds: 30,
        }
    }
}

impl fmt::Debug for SqsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsConfig")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// Resolved signing credentials
#[derive(Clone, PartialEq, Eq)]
pub struct SqsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl SqsCredentials {
    /// Credentials from the configuration, falling back to the standard
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`
    /// environment variables
    pub fn resolve(config: &SqsConfig) -> Result<Self, ConfigurationError> {
        Self::resolve_with(config, |name| std::env::var(name).ok())
    }

    fn resolve_with(
        config: &SqsConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let access_key_id = config
            .access_key_id
            .clone()
            .or_else(|| env("AWS_ACCESS_KEY_ID"))
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigurationError::Missing {
                key: "transport.sqs.access_key_id".to_string(),
            })?;
        let secret_access_key = config
            .secret_access_key
            .clone()
            .or_else(|| env("AWS_SECRET_ACCESS_KEY"))
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigurationError::Missing {
                key: "transport.sqs.secret_access_key".to_string(),
            })?;
        let session_token = config
            .session_token
            .clone()
            .or_else(|| env("AWS_SESSION_TOKEN"))
            .filter(|value| !value.is_empty());

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

impl fmt::Debug for SqsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer.
///
/// 1. Canonical request (method, path, empty query, signed headers, payload hash)
/// 2. String to sign (algorithm, timestamp, scope, request hash)
/// 3. Signing key from the 4-level HMAC chain
/// 4. Signature and `Authorization` header
#[derive(Clone)]
struct SigV4Signer {
    credentials: SqsCredentials,
    region: String,
    service: &'static str,
}

impl SigV4Signer {
    fn new(credentials: SqsCredentials, region: String) -> Self {
        Self {
            credentials,
            region,
            service: "sqs",
        }
    }

    /// Headers to add to a form-encoded `POST` carrying `body`
    fn sign(
        &self,
        host: &str,
        path: &str,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Vec<(&'static str, String)> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        // Canonical headers must be sorted by name.
        let mut headers: Vec<(&'static str, String)> = vec![
            ("content-type", FORM_CONTENT_TYPE.to_string()),
            ("host", host.to_string()),
            ("x-amz-date", amz_date.clone()),
        ];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token", token.clone()));
        }

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();
        let signed_headers = headers
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(";");
        let payload_hash = hex::encode(Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "POST\n{}\n\n{}\n{}\n{}",
            path, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm,
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = self.calculate_signature(&string_to_sign, &date_stamp);
        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.credentials.access_key_id, credential_scope, signed_headers, signature
        );

        // Host is set by the HTTP client from the URL.
        let mut out: Vec<(&'static str, String)> = headers
            .into_iter()
            .filter(|(name, _)| *name != "host")
            .collect();
        out.push(("authorization", authorization));
        out
    }

    /// kSecret -> kDate -> kRegion -> kService -> kSigning -> signature
    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> String {
        let k_secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

// ============================================================================
// SQS Transport
// ============================================================================

/// Amazon SQS queue transport.
///
/// Safe to share across tasks behind an `Arc`; the queue URL cache is guarded
/// by an async `RwLock`.
pub struct SqsTransport {
    http_client: HttpClient,
    signer: SigV4Signer,
    endpoint: url::Url,
    config: SqsConfig,
    queue_url_cache: RwLock<HashMap<String, String>>,
}

impl SqsTransport {
    /// Create a transport, resolving credentials from the configuration or
    /// the environment
    pub fn new(config: SqsConfig) -> Result<Self, ConfigurationError> {
        let credentials = SqsCredentials::resolve(&config)?;
        Self::with_credentials(config, credentials)
    }

    /// Create a transport with explicit credentials
    pub fn with_credentials(
        config: SqsConfig,
        credentials: SqsCredentials,
    ) -> Result<Self, ConfigurationError> {
        if config.region.is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "transport.sqs.region cannot be empty".to_string(),
            });
        }
        if config.request_timeout_seconds <= SQS_MAX_WAIT_SECONDS {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "transport.sqs.request_timeout_seconds must exceed the {} second long-poll wait",
                    SQS_MAX_WAIT_SECONDS
                ),
            });
        }

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://sqs.{}.amazonaws.com", config.region));
        let endpoint = url::Url::parse(&endpoint).map_err(|e| ConfigurationError::Invalid {
            message: format!("transport.sqs.endpoint is not a valid URL: {}", e),
        })?;
        if endpoint.host_str().is_none() {
            return Err(ConfigurationError::Invalid {
                message: "transport.sqs.endpoint has no host".to_string(),
            });
        }

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            signer: SigV4Signer::new(credentials, config.region.clone()),
            endpoint,
            config,
            queue_url_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Endpoint requests are sent to
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    /// Resolve a destination to its queue URL, with caching
    async fn queue_url(&self, destination: &Destination) -> Result<String, TransportError> {
        if destination.is_url() {
            return Ok(destination.as_str().to_string());
        }

        let name = destination.queue_name();
        {
            let cache = self.queue_url_cache.read().await;
            if let Some(url) = cache.get(name) {
                return Ok(url.clone());
            }
        }

        let mut params = BTreeMap::new();
        params.insert("Action", "GetQueueUrl".to_string());
        params.insert("QueueName", name.to_string());
        let response = self.call(&params).await?;
        let queue_url = parse_queue_url_response(&response)?;

        tracing::debug!(queue = %name, queue_url = %queue_url, "Resolved SQS queue URL");
        self.queue_url_cache
            .write()
            .await
            .insert(name.to_string(), queue_url.clone());

        Ok(queue_url)
    }

    /// Issue one signed query-protocol call and return the response body
    async fn call(&self, params: &BTreeMap<&str, String>) -> Result<String, TransportError> {
        let action = params.get("Action").map(String::as_str).unwrap_or_default();

        // The serializer is not `Send`; drop it before the first await.
        let body = {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in params {
                form.append_pair(key, value);
            }
            form.append_pair("Version", API_VERSION);
            form.finish()
        };

        let headers = self
            .signer
            .sign(&host_header(&self.endpoint), self.endpoint.path(), &body, &Utc::now());

        let mut request = self.http_client.post(self.endpoint.clone());
        for (name, value) in headers {
            request = request.header(name, value);
        }

        tracing::debug!(action = %action, endpoint = %self.endpoint, "Calling SQS");
        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::transient("RequestTimeout", format!("{} timed out: {}", action, e))
            } else {
                TransportError::transient("NetworkError", format!("{} failed: {}", action, e))
            }
        })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| {
            TransportError::transient(
                "NetworkError",
                format!("Failed to read {} response: {}", action, e),
            )
        })?;

        if !status.is_success() {
            let error = classify_error_response(&response_body, status.as_u16());
            tracing::debug!(
                action = %action,
                status = status.as_u16(),
                code = %error.code(),
                "SQS call failed"
            );
            return Err(error);
        }

        Ok(response_body)
    }
}

impl fmt::Debug for SqsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl QueueTransport for SqsTransport {
    async fn send(
        &self,
        destination: &Destination,
        partition_key: Option<&PartitionKey>,
        body: &str,
        dedup_key: &DedupKey,
    ) -> Result<MessageId, TransportError> {
        if body.len() > SQS_MAX_MESSAGE_SIZE {
            return Err(TransportError::permanent(
                "InvalidParameterValue",
                format!(
                    "Message of {} bytes exceeds the {} byte limit",
                    body.len(),
                    SQS_MAX_MESSAGE_SIZE
                ),
            ));
        }

        let mut params = BTreeMap::new();
        if destination.is_fifo() {
            let group = partition_key.ok_or_else(|| {
                TransportError::permanent(
                    "MissingParameter",
                    "The request must contain the parameter MessageGroupId.",
                )
            })?;
            params.insert("MessageGroupId", group.as_str().to_string());
            params.insert("MessageDeduplicationId", dedup_key.as_str().to_string());
        }

        let queue_url = self.queue_url(destination).await?;
        params.insert("Action", "SendMessage".to_string());
        params.insert("QueueUrl", queue_url);
        params.insert("MessageBody", body.to_string());

        let response = self.call(&params).await?;
        parse_send_message_response(&response)
    }

    async fn receive(
        &self,
        destination: &Destination,
        batch_size: u32,
        wait: Duration,
    ) -> Result<Vec<Message>, TransportError> {
        let queue_url = self.queue_url(destination).await?;

        let mut params = BTreeMap::new();
        params.insert("Action", "ReceiveMessage".to_string());
        params.insert("QueueUrl", queue_url);
        params.insert(
            "MaxNumberOfMessages",
            batch_size.clamp(1, SQS_MAX_BATCH_SIZE).to_string(),
        );
        params.insert(
            "WaitTimeSeconds",
            wait.as_secs().min(SQS_MAX_WAIT_SECONDS).to_string(),
        );
        params.insert("AttributeName.1", "All".to_string());

        let response = self.call(&params).await?;
        parse_receive_message_response(&response)
    }

    async fn delete(
        &self,
        destination: &Destination,
        receipt_token: &ReceiptToken,
    ) -> Result<(), TransportError> {
        let queue_url = self.queue_url(destination).await?;

        let mut params = BTreeMap::new();
        params.insert("Action", "DeleteMessage".to_string());
        params.insert("QueueUrl", queue_url);
        params.insert("ReceiptHandle", receipt_token.as_str().to_string());

        // DeleteMessage returns an empty result on success
        self.call(&params).await.map(|_| ())
    }

    fn max_batch_size(&self) -> u32 {
        SQS_MAX_BATCH_SIZE
    }

    fn max_message_size(&self) -> usize {
        SQS_MAX_MESSAGE_SIZE
    }

    fn name(&self) -> &'static str {
        "sqs"
    }
}

/// `host[:port]` as sent in the `Host` header
fn host_header(endpoint: &url::Url) -> String {
    let host = endpoint.host_str().unwrap_or_default();
    match endpoint.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

fn malformed(message: impl Into<String>) -> TransportError {
    TransportError::permanent("MalformedResponse", message)
}

/// Text of the first `element` in the document
fn first_element_text(xml: &str, element: &[u8]) -> Result<Option<String>, TransportError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut inside = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == element => inside = true,
            Ok(Event::Text(e)) if inside => {
                return e
                    .unescape()
                    .map(|s| Some(s.into_owned()))
                    .map_err(|e| malformed(format!("Failed to parse XML: {}", e)));
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == element => inside = false,
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(malformed(format!("XML parsing error: {}", e))),
            _ => {}
        }
        buf.clear();
    }
}

/// Parse a `GetQueueUrl` response
fn parse_queue_url_response(xml: &str) -> Result<String, TransportError> {
    first_element_text(xml, b"QueueUrl")?
        .ok_or_else(|| malformed("QueueUrl not found in response"))
}

/// Parse a `SendMessage` response
fn parse_send_message_response(xml: &str) -> Result<MessageId, TransportError> {
    let id = first_element_text(xml, b"MessageId")?
        .ok_or_else(|| malformed("MessageId not found in response"))?;
    MessageId::from_str(&id).map_err(|e| malformed(e.to_string()))
}

#[derive(Default)]
struct PartialMessage {
    id: Option<String>,
    receipt_handle: Option<String>,
    body: Option<String>,
    group_id: Option<String>,
    receive_count: Option<u32>,
}

impl PartialMessage {
    /// `None` when the service omitted the id or receipt handle
    fn build(self) -> Option<Message> {
        let receipt_handle = self.receipt_handle.filter(|h| !h.is_empty())?;
        let id = MessageId::from_str(self.id.as_deref()?).ok()?;

        let mut message = Message::new(
            id,
            self.body.unwrap_or_default(),
            ReceiptToken::new(receipt_handle),
        )
        .with_receive_count(self.receive_count.unwrap_or(1));
        if let Some(key) = self.group_id.and_then(|g| PartitionKey::new(g).ok()) {
            message = message.with_partition_key(key);
        }
        Some(message)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    MessageId,
    ReceiptHandle,
    Body,
    AttributeName,
    AttributeValue,
}

/// Parse a `ReceiveMessage` response
fn parse_receive_message_response(xml: &str) -> Result<Vec<Message>, TransportError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    // Bodies are opaque and keep their whitespace; only identifiers are trimmed.
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut messages = Vec::new();
    let mut current: Option<PartialMessage> = None;
    let mut field = Field::None;
    let mut attribute_name: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                field = match (e.name().as_ref(), current.is_some()) {
                    (b"Message", _) => {
                        current = Some(PartialMessage::default());
                        Field::None
                    }
                    (b"MessageId", true) => Field::MessageId,
                    (b"ReceiptHandle", true) => Field::ReceiptHandle,
                    (b"Body", true) => Field::Body,
                    (b"Name", true) => Field::AttributeName,
                    (b"Value", true) => Field::AttributeValue,
                    _ => Field::None,
                };
            }
            Ok(Event::Text(e)) => {
                let Some(message) = current.as_mut() else {
                    buf.clear();
                    continue;
                };
                let text = e
                    .unescape()
                    .map(|s| s.into_owned())
                    .map_err(|e| malformed(format!("Failed to parse XML: {}", e)))?;
                match field {
                    Field::Body => message.body = Some(text),
                    Field::MessageId => message.id = Some(text.trim().to_string()),
                    Field::ReceiptHandle => message.receipt_handle = Some(text.trim().to_string()),
                    Field::AttributeName => attribute_name = Some(text.trim().to_string()),
                    Field::AttributeValue => match attribute_name.take().as_deref() {
                        Some("MessageGroupId") => message.group_id = Some(text.trim().to_string()),
                        Some("ApproximateReceiveCount") => {
                            message.receive_count = text.trim().parse().ok()
                        }
                        _ => {}
                    },
                    Field::None => {}
                }
                field = Field::None;
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Message" => {
                if let Some(partial) = current.take() {
                    match partial.build() {
                        Some(message) => messages.push(message),
                        None => tracing::warn!(
                            "Skipping SQS message without a message id or receipt handle"
                        ),
                    }
                }
                field = Field::None;
            }
            Ok(Event::End(_)) => field = Field::None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(format!("XML parsing error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

/// Classify a non-success response into a transport error
fn classify_error_response(xml: &str, status_code: u16) -> TransportError {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut error_code = None;
    let mut error_message = None;
    let mut in_error = false;
    let mut in_code = false;
    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Error" => in_error = true,
                b"Code" if in_error => in_code = true,
                b"Message" if in_error => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_code {
                    error_code = e.unescape().ok().map(|s| s.into_owned());
                    in_code = false;
                } else if in_message {
                    error_message = e.unescape().ok().map(|s| s.into_owned());
                    in_message = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Error" => in_error = false,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    let code = error_code.unwrap_or_else(|| format!("Http{}", status_code));
    let message = error_message.unwrap_or_else(|| format!("HTTP status {}", status_code));

    if status_code >= 500 || status_code == 429 || TRANSIENT_CODES.contains(&code.as_str()) {
        TransportError::transient(code, message)
    } else {
        TransportError::permanent(code, message)
    }
}
