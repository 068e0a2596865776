//! Event envelopes and inbound messages
//!
//! Outbound events are serialized as
//! `{"event":{"header":{..},"payload":{..}},"context":[..]}` and sent as the
//! `metadata` part of a multipart body, optionally followed by an `audio`
//! part. Inbound messages are the JSON documents the server pushes, with the
//! binary attachment they were merged with (if any).

use crate::multipart::MultipartWriter;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boundary used for every multipart body the client sends
pub const EVENT_BOUNDARY: &str = "avs-client-message-boundary";

const METADATA_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
const AUDIO_CONTENT_TYPE: &str = "application/octet-stream";

/// Header of an outbound event
///
/// # Examples
/// ```
/// use avs_client::protocol::EventHeader;
///
/// let header = EventHeader::new("SpeechRecognizer", "Recognize")
///     .with_dialog_request_id("avs-dialog-id-1700000000-1");
/// assert_eq!(header.name, "Recognize");
/// assert!(header.message_id.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventHeader {
    pub namespace: String,
    pub name: String,
    /// Assigned by the connection when the event is sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Ties the event to a dialog turn (speech recognition only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialog_request_id: Option<String>,
}

impl EventHeader {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            message_id: None,
            dialog_request_id: None,
        }
    }

    pub fn with_dialog_request_id(mut self, dialog_request_id: impl Into<String>) -> Self {
        self.dialog_request_id = Some(dialog_request_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub header: EventHeader,
    pub payload: Value,
}

/// Header of one context entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextHeader {
    pub namespace: String,
    pub name: String,
}

/// One component's state, reported with events that include context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextEntry {
    pub header: ContextHeader,
    pub payload: Value,
}

impl ContextEntry {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self {
            header: ContextHeader {
                namespace: namespace.into(),
                name: name.into(),
            },
            payload,
        }
    }
}

/// Complete JSON document of an outbound event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub event: Event,
    /// Present only when the sender asked for state to be included
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<ContextEntry>>,
}

/// Supplies the client's current state for events sent with context
pub trait ContextProvider: Send + Sync {
    fn context(&self) -> Vec<ContextEntry>;
}

impl<F> ContextProvider for F
where
    F: Fn() -> Vec<ContextEntry> + Send + Sync,
{
    fn context(&self) -> Vec<ContextEntry> {
        self()
    }
}

/// Multipart body ready to post
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedEvent {
    pub content_type: String,
    pub body: Bytes,
}

/// Serialize an event as `metadata` (and `audio` when given) multipart body
pub fn encode_event(envelope: &EventEnvelope, audio: Option<&[u8]>) -> Result<EncodedEvent, serde_json::Error> {
    let metadata = serde_json::to_vec(envelope)?;

    let mut writer =
        MultipartWriter::new(EVENT_BOUNDARY).part("metadata", METADATA_CONTENT_TYPE, &metadata);
    if let Some(audio) = audio {
        writer = writer.part("audio", AUDIO_CONTENT_TYPE, audio);
    }

    Ok(EncodedEvent {
        content_type: writer.content_type(),
        body: writer.finish(),
    })
}

/// A message received from the server
///
/// Directives look like `{"directive":{"header":{..},"payload":{..}}}`; a few
/// system messages carry `header` and `payload` at the top level instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    body: Value,
    attachment: Option<Bytes>,
}

impl Message {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            attachment: None,
        }
    }

    pub fn with_attachment(body: Value, attachment: Bytes) -> Self {
        Self {
            body,
            attachment: Some(attachment),
        }
    }

    /// JSON document as received
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Binary part merged into this message by Content-ID
    pub fn attachment(&self) -> Option<&Bytes> {
        self.attachment.as_ref()
    }

    pub fn into_parts(self) -> (Value, Option<Bytes>) {
        (self.body, self.attachment)
    }

    pub fn is_directive(&self) -> bool {
        self.body.get("directive").is_some()
    }

    pub fn header(&self) -> Option<&Value> {
        self.body
            .pointer("/directive/header")
            .or_else(|| self.body.get("header"))
    }

    pub fn payload(&self) -> Option<&Value> {
        self.body
            .pointer("/directive/payload")
            .or_else(|| self.body.get("payload"))
    }

    pub fn namespace(&self) -> Option<&str> {
        self.header_field("namespace")
    }

    pub fn name(&self) -> Option<&str> {
        self.header_field("name")
    }

    pub fn message_id(&self) -> Option<&str> {
        self.header_field("messageId")
    }

    pub fn dialog_request_id(&self) -> Option<&str> {
        self.header_field("dialogRequestId")
    }

    fn header_field(&self, field: &str) -> Option<&str> {
        self.header()?.get(field)?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipart::MultipartParser;
    use serde_json::json;

    fn recognize_envelope(context: Option<Vec<ContextEntry>>) -> EventEnvelope {
        let mut header = EventHeader::new("SpeechRecognizer", "Recognize");
        header.message_id = Some("avs-message-id-1-1".to_string());
        EventEnvelope {
            event: Event {
                header,
                payload: json!({"profile": "CLOSE_TALK", "format": "AUDIO_L16_RATE_16000_CHANNELS_1"}),
            },
            context,
        }
    }

    #[test]
    fn test_envelope_serialization_without_context() {
        let value = serde_json::to_value(recognize_envelope(None)).unwrap();

        assert_eq!(
            value,
            json!({
                "event": {
                    "header": {
                        "namespace": "SpeechRecognizer",
                        "name": "Recognize",
                        "messageId": "avs-message-id-1-1"
                    },
                    "payload": {"profile": "CLOSE_TALK", "format": "AUDIO_L16_RATE_16000_CHANNELS_1"}
                }
            })
        );
    }

    #[test]
    fn test_envelope_serialization_with_context() {
        let context = vec![ContextEntry::new(
            "Speaker",
            "VolumeState",
            json!({"volume": 50, "muted": false}),
        )];
        let value = serde_json::to_value(recognize_envelope(Some(context))).unwrap();

        assert_eq!(
            value["context"],
            json!([{"header": {"namespace": "Speaker", "name": "VolumeState"},
                    "payload": {"volume": 50, "muted": false}}])
        );
    }

    #[test]
    fn test_encode_event_without_audio_has_single_part() {
        let encoded = encode_event(&recognize_envelope(None), None).unwrap();
        let body = String::from_utf8(encoded.body.to_vec()).unwrap();

        assert_eq!(
            encoded.content_type,
            format!("multipart/form-data; boundary={EVENT_BOUNDARY}")
        );
        assert_eq!(body.matches(&format!("--{EVENT_BOUNDARY}\r\n")).count(), 1);
        assert!(!body.contains("name=\"audio\""));
        assert!(body.ends_with(&format!("}}\r\n--{EVENT_BOUNDARY}--\r\n")));
    }

    #[test]
    fn test_encode_event_with_audio_appends_audio_part() {
        let audio = vec![1u8, 2, 3, 4];
        let encoded = encode_event(&recognize_envelope(None), Some(&audio)).unwrap();

        let parts: Vec<_> = MultipartParser::parse_all(EVENT_BOUNDARY, &encoded.body)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0].json().unwrap()["event"]["header"]["name"],
            json!("Recognize")
        );
        assert_eq!(parts[1].content_type(), Some("application/octet-stream"));
        assert_eq!(parts[1].body().as_ref(), audio.as_slice());
    }

    #[test]
    fn test_message_directive_accessors() {
        let message = Message::new(json!({
            "directive": {
                "header": {
                    "namespace": "SpeechSynthesizer",
                    "name": "Speak",
                    "messageId": "m1",
                    "dialogRequestId": "d1"
                },
                "payload": {"token": "t"}
            }
        }));

        assert!(message.is_directive());
        assert_eq!(message.namespace(), Some("SpeechSynthesizer"));
        assert_eq!(message.name(), Some("Speak"));
        assert_eq!(message.message_id(), Some("m1"));
        assert_eq!(message.dialog_request_id(), Some("d1"));
        assert_eq!(message.payload(), Some(&json!({"token": "t"})));
        assert!(message.attachment().is_none());
    }

    #[test]
    fn test_message_top_level_header() {
        let message = Message::new(json!({
            "header": {"namespace": "System", "name": "Exception", "messageId": "x"},
            "payload": {"code": "INVALID_REQUEST_EXCEPTION", "description": "bad"}
        }));

        assert!(!message.is_directive());
        assert_eq!(message.namespace(), Some("System"));
        assert_eq!(message.name(), Some("Exception"));
    }

    #[test]
    fn test_closure_context_provider() {
        let provider = || vec![ContextEntry::new("Alerts", "AlertsState", json!({"allAlerts": []}))];
        let entries = ContextProvider::context(&provider);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].header.name, "AlertsState");
    }
}
