//! Content-ID based reassembly of split directives
//!
//! A directive that references binary data (synthesized speech, for example)
//! arrives as two parts: the JSON directive and an octet-stream part. They are
//! correlated by a Content-ID taken from the binary part's `Content-ID` header
//! and from either the JSON part's own header or a `cid:` URL in its payload.
//! Whichever of the pair arrives first waits in the pending cache.

use crate::multipart::Part;
use crate::protocol::Message;
use crate::sync::lock;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Normalized identifier shared by the two halves of a split message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId(String);

impl ContentId {
    /// Trim `<>` and whitespace, lower-case
    pub fn normalize(raw: &str) -> Option<Self> {
        let id = raw
            .trim_matches(|c: char| c == '<' || c == '>' || c.is_whitespace())
            .to_lowercase();
        if id.is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    /// ContentID referenced by a `cid:` URL
    pub fn from_cid_url(url: &str) -> Option<Self> {
        let url = url.trim();
        let prefix = url.get(..4)?;
        if !prefix.eq_ignore_ascii_case("cid:") {
            return None;
        }
        Self::normalize(&url[4..])
    }

    /// ContentID of a part: its header, or for JSON parts `directive.payload.url`
    pub fn of_part(part: &Part) -> Option<Self> {
        if let Some(header) = part.header("Content-ID") {
            return Self::normalize(header.value());
        }
        if !part.is_json() {
            return None;
        }
        part.json().ok().as_ref().and_then(Self::from_directive)
    }

    fn from_directive(body: &Value) -> Option<Self> {
        body.pointer("/directive/payload/url")
            .and_then(Value::as_str)
            .and_then(Self::from_cid_url)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One half of a pair waiting for its counterpart
#[derive(Debug, Clone)]
enum PendingPart {
    Json(Value),
    Binary(Bytes),
}

/// Merges JSON and binary parts into [`Message`]s
///
/// Shared between the downstream listener and the send-event response path,
/// so the pending cache sits behind its own mutex.
#[derive(Debug, Default)]
pub struct PartReassembler {
    pending: Mutex<HashMap<ContentId, PendingPart>>,
}

impl PartReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of parts waiting for their counterpart
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Accept one complete part and return the messages it completes
    pub fn accept(&self, part: Part) -> Vec<Message> {
        let incoming = match Self::classify(part) {
            Some(incoming) => incoming,
            None => return Vec::new(),
        };

        let (id, incoming) = match incoming {
            Classified::Standalone(body) => return vec![Message::new(body)],
            Classified::Correlated(id, incoming) => (id, incoming),
        };

        let waiting = {
            let mut pending = lock(&self.pending);
            match pending.remove(&id) {
                Some(waiting) => waiting,
                None => {
                    debug!(content_id = %id, "Holding part until its counterpart arrives");
                    pending.insert(id, incoming);
                    return Vec::new();
                }
            }
        };

        Self::merge(&id, waiting, incoming)
    }

    /// Drop every pending part
    pub fn clear(&self) {
        lock(&self.pending).clear();
    }

    fn classify(part: Part) -> Option<Classified> {
        let header_id = part
            .header("Content-ID")
            .and_then(|header| ContentId::normalize(header.value()));

        if part.is_json() {
            let body = match part.json() {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "Dropping JSON part that does not decode");
                    return None;
                }
            };
            let id = header_id.or_else(|| ContentId::from_directive(&body));
            return Some(match id {
                Some(id) => Classified::Correlated(id, PendingPart::Json(body)),
                None => Classified::Standalone(body),
            });
        }

        match header_id {
            Some(id) => Some(Classified::Correlated(
                id,
                PendingPart::Binary(part.into_body()),
            )),
            None => {
                warn!(
                    content_type = part.content_type().unwrap_or("-"),
                    bytes = part.body().len(),
                    "Unhandled content: binary part without Content-ID"
                );
                None
            }
        }
    }

    fn merge(id: &ContentId, first: PendingPart, second: PendingPart) -> Vec<Message> {
        match (first, second) {
            (PendingPart::Json(body), PendingPart::Binary(data))
            | (PendingPart::Binary(data), PendingPart::Json(body)) => {
                debug!(content_id = %id, bytes = data.len(), "Merged attachment into directive");
                vec![Message::with_attachment(body, data)]
            }
            (PendingPart::Json(first), PendingPart::Json(second)) => {
                warn!(content_id = %id, "Two JSON parts share a Content-ID, emitting both");
                vec![Message::new(first), Message::new(second)]
            }
            (PendingPart::Binary(_), PendingPart::Binary(_)) => {
                warn!(content_id = %id, "Two binary parts share a Content-ID, dropping both");
                Vec::new()
            }
        }
    }
}

enum Classified {
    Standalone(Value),
    Correlated(ContentId, PendingPart),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipart::{HeaderValue, Headers};
    use serde_json::json;
    use std::sync::Arc;

    fn json_part(body: &Value, content_id: Option<&str>) -> Part {
        let mut headers = Headers::new();
        headers.insert("Content-Type", HeaderValue::parse("application/json; charset=UTF-8"));
        if let Some(id) = content_id {
            headers.insert("Content-ID", HeaderValue::parse(id));
        }
        Part::new(headers, body.to_string())
    }

    fn binary_part(data: &'static [u8], content_id: Option<&str>) -> Part {
        let mut headers = Headers::new();
        headers.insert("Content-Type", HeaderValue::parse("application/octet-stream"));
        if let Some(id) = content_id {
            headers.insert("Content-ID", HeaderValue::parse(id));
        }
        Part::new(headers, Bytes::from_static(data))
    }

    fn speak() -> Value {
        json!({"directive": {"header": {"messageId": "m1"}, "payload": {"url": "cid:abc"}}})
    }

    #[test]
    fn test_content_id_normalization() {
        assert_eq!(ContentId::normalize(" <ABC-1> ").unwrap().as_str(), "abc-1");
        assert!(ContentId::normalize("<>").is_none());
        assert_eq!(ContentId::from_cid_url("CID:Abc").unwrap().as_str(), "abc");
        assert!(ContentId::from_cid_url("https://example.com/stream").is_none());
        assert!(ContentId::from_cid_url("cid").is_none());
    }

    #[test]
    fn test_json_then_binary_merges() {
        let reassembler = PartReassembler::new();

        assert!(reassembler.accept(json_part(&speak(), None)).is_empty());
        assert_eq!(reassembler.pending_count(), 1);

        let messages = reassembler.accept(binary_part(b"DEADBEEF", Some("<abc>")));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body(), &speak());
        assert_eq!(messages[0].attachment().map(|a| a.as_ref()), Some(&b"DEADBEEF"[..]));
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_binary_then_json_merges_identically() {
        let forward = PartReassembler::new();
        forward.accept(json_part(&speak(), None));
        let expected = forward.accept(binary_part(b"DEADBEEF", Some("<abc>")));

        let reverse = PartReassembler::new();
        assert!(reverse.accept(binary_part(b"DEADBEEF", Some("<ABC>"))).is_empty());
        let actual = reverse.accept(json_part(&speak(), None));

        assert_eq!(actual, expected);
    }

    #[test]
    fn test_plain_json_bypasses_cache() {
        let reassembler = PartReassembler::new();
        let body = json!({"directive": {"header": {"name": "SetMute"}, "payload": {"mute": true}}});

        let messages = reassembler.accept(json_part(&body, None));
        assert_eq!(messages.len(), 1);
        assert!(messages[0].attachment().is_none());
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_non_cid_url_is_not_correlated() {
        let reassembler = PartReassembler::new();
        let body = json!({"directive": {"payload": {"url": "https://example.com/stream.mp3"}}});

        assert_eq!(reassembler.accept(json_part(&body, None)).len(), 1);
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_binary_without_content_id_is_dropped() {
        let reassembler = PartReassembler::new();
        assert!(reassembler.accept(binary_part(b"\x00\x01", None)).is_empty());
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_two_binary_parts_are_dropped() {
        let reassembler = PartReassembler::new();
        assert!(reassembler.accept(binary_part(b"one", Some("<x>"))).is_empty());
        assert!(reassembler.accept(binary_part(b"two", Some("<x>"))).is_empty());
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_two_json_parts_are_both_emitted() {
        let reassembler = PartReassembler::new();
        let first = json!({"n": 1});
        let second = json!({"n": 2});

        assert!(reassembler.accept(json_part(&first, Some("<dup>"))).is_empty());
        let messages = reassembler.accept(json_part(&second, Some("<dup>")));

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body(), &first);
        assert_eq!(messages[1].body(), &second);
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_undecodable_json_is_dropped() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", HeaderValue::parse("application/json"));
        let reassembler = PartReassembler::new();

        assert!(reassembler.accept(Part::new(headers, "{not json")).is_empty());
    }

    #[test]
    fn test_clear_empties_cache() {
        let reassembler = PartReassembler::new();
        reassembler.accept(binary_part(b"x", Some("<a>")));
        reassembler.accept(binary_part(b"y", Some("<b>")));
        assert_eq!(reassembler.pending_count(), 2);

        reassembler.clear();
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_accept_merges_every_pair() {
        const PAIRS: usize = 200;
        let reassembler = Arc::new(PartReassembler::new());

        let json_side = {
            let reassembler = reassembler.clone();
            tokio::spawn(async move {
                let mut merged = Vec::new();
                for i in 0..PAIRS {
                    let body = json!({"directive": {"header": {"messageId": format!("m{i}")}, "payload": {"url": format!("cid:part-{i}")}}});
                    merged.extend(reassembler.accept(json_part(&body, None)));
                    tokio::task::yield_now().await;
                }
                merged
            })
        };
        let binary_side = {
            let reassembler = reassembler.clone();
            tokio::spawn(async move {
                let mut merged = Vec::new();
                for i in 0..PAIRS {
                    let mut headers = Headers::new();
                    headers.insert("Content-Type", HeaderValue::parse("application/octet-stream"));
                    headers.insert("Content-ID", HeaderValue::parse(&format!("<part-{i}>")));
                    merged.extend(reassembler.accept(Part::new(headers, format!("audio-{i}"))));
                    tokio::task::yield_now().await;
                }
                merged
            })
        };

        let mut messages = json_side.await.unwrap();
        messages.extend(binary_side.await.unwrap());

        assert_eq!(messages.len(), PAIRS);
        assert_eq!(reassembler.pending_count(), 0);
        for message in &messages {
            let id = message.message_id().unwrap().trim_start_matches('m').to_string();
            assert_eq!(
                message.attachment().map(|bytes| bytes.as_ref()),
                Some(format!("audio-{id}").as_bytes())
            );
        }
    }
}
