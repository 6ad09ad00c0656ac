//! Classification of push packet payloads into typed deltas.
//!
//! A push packet payload is a JSON document carrying a `deltas` array. Each
//! element is dispatched on its `class` discriminator; everything the
//! pipeline does not act on is an explicit ignored variant so that promoting
//! one later (reactions, retractions, thread renames) is a localized change.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

/// Event type tag carried by every delivered event.
pub const EVENT_TYPE_MESSAGE: &str = "message";

/// One unit of change reported by the push stream, tagged by class.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// A new message in some thread.
    NewMessage(NewMessage),
    /// Recipient's client acknowledged delivery.
    DeliveryReceipt,
    /// Recipient read the thread.
    ReadReceipt,
    /// A folder was marked seen.
    MarkFolderSeen,
    /// Keep-alive with no observable effect.
    NoOp,
    /// Rendered admin text (theme changes, nicknames); ignored.
    AdminTextMessage,
    /// Message retraction; ignored.
    MessageDelete,
    /// Nested client payload (reactions, replies, unsend); decoded but not
    /// forwarded.
    ClientPayload(Value),
    /// Anything this version does not understand.
    Unknown {
        /// The unrecognized `class` discriminator ("" when absent).
        class: String,
        /// The raw delta for diagnostics.
        raw: Value,
    },
}

/// Parsed `NewMessage` delta.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    /// Canonical numeric thread id (first value of `threadKey`).
    pub thread: i64,
    /// Numeric id of the sending user.
    pub sender: i64,
    /// Message timestamp as reported by the wire.
    pub timestamp: i64,
    /// Opaque message identifier.
    pub message_id: String,
    /// Message body ("" for attachment-only messages).
    pub body: String,
    /// Attachment descriptors, passed through verbatim.
    pub attachments: Vec<Value>,
}

/// Normalized record handed to listeners.
///
/// The serialized form is the schema documented to consumers:
/// `{ "type": "message", body, thread, sender, timestamp, messageId,
/// attachments }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredEvent {
    /// Event type tag (currently always [`EVENT_TYPE_MESSAGE`]).
    #[serde(rename = "type")]
    pub kind: String,
    /// Message body.
    pub body: String,
    /// Numeric thread id.
    pub thread: i64,
    /// Numeric sender id.
    pub sender: i64,
    /// Wire timestamp.
    pub timestamp: i64,
    /// Opaque message identifier.
    pub message_id: String,
    /// Attachment descriptors.
    pub attachments: Vec<Value>,
}

impl From<NewMessage> for DeliveredEvent {
    fn from(message: NewMessage) -> Self {
        Self {
            kind: EVENT_TYPE_MESSAGE.to_string(),
            body: message.body,
            thread: message.thread,
            sender: message.sender,
            timestamp: message.timestamp,
            message_id: message.message_id,
            attachments: message.attachments,
        }
    }
}

/// Extract and classify the `deltas` array of a packet payload.
///
/// A payload that is not JSON, or has no `deltas` array, yields nothing;
/// per the wire contract that is a discard, not an error.
#[must_use]
pub fn parse_deltas(payload: &[u8]) -> Vec<Delta> {
    let Ok(document) = serde_json::from_slice::<Value>(payload) else {
        debug!(target: "push.delta", "Dropping packet with unparsable JSON payload");
        return Vec::new();
    };
    let Some(deltas) = document.get("deltas").and_then(Value::as_array) else {
        return Vec::new();
    };
    deltas.iter().map(classify_delta).collect()
}

/// Classify one delta element on its `class` discriminator.
#[must_use]
pub fn classify_delta(raw: &Value) -> Delta {
    let class = raw.get("class").and_then(Value::as_str).unwrap_or_default();
    match class {
        "NewMessage" => match parse_new_message(raw) {
            Some(message) => Delta::NewMessage(message),
            None => unknown(class, raw),
        },
        "DeliveryReceipt" => Delta::DeliveryReceipt,
        "ReadReceipt" => Delta::ReadReceipt,
        "MarkFolderSeen" => Delta::MarkFolderSeen,
        "NoOp" => Delta::NoOp,
        "AdminTextMessage" => Delta::AdminTextMessage,
        "MessageDelete" => Delta::MessageDelete,
        "ClientPayload" => match parse_client_payload(raw) {
            Some(inner) => Delta::ClientPayload(inner),
            None => unknown(class, raw),
        },
        _ => unknown(class, raw),
    }
}

fn unknown(class: &str, raw: &Value) -> Delta {
    Delta::Unknown {
        class: class.to_string(),
        raw: raw.clone(),
    }
}

/// Parse a `NewMessage` delta's metadata. `None` means a malformed delta.
fn parse_new_message(raw: &Value) -> Option<NewMessage> {
    let metadata = raw.get("messageMetadata")?;

    // The thread key object carries exactly one of threadFbId (groups) or
    // otherUserFbId (one-to-one); either way the first value is the thread.
    let thread = metadata
        .get("threadKey")?
        .as_object()?
        .values()
        .next()
        .and_then(coerce_i64)?;
    let sender = metadata.get("actorFbId").and_then(coerce_i64)?;
    let timestamp = metadata.get("timestamp").and_then(coerce_i64)?;
    let message_id = metadata.get("messageId")?.as_str()?.to_string();

    let body = raw
        .get("body")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let attachments = raw
        .get("attachments")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    Some(NewMessage {
        thread,
        sender,
        timestamp,
        message_id,
        body,
        attachments,
    })
}

/// Decode a `ClientPayload` delta: the payload is a JSON byte array that
/// itself contains a nested JSON document.
fn parse_client_payload(raw: &Value) -> Option<Value> {
    let bytes = raw
        .get("payload")?
        .as_array()?
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect::<Option<Vec<u8>>>()?;
    serde_json::from_slice(&bytes).ok()
}

/// Numeric ids arrive as JSON numbers or decimal strings.
fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Self-origin filtering and normalization of accepted deltas.
#[derive(Debug, Clone, Default)]
pub struct DeltaClassifier {
    self_user_id: Option<i64>,
    listen_self: bool,
}

impl DeltaClassifier {
    /// Create a classifier for the given authenticated user.
    ///
    /// With `listen_self` disabled, messages whose sender matches
    /// `self_user_id` are dropped.
    #[must_use]
    pub fn new(self_user_id: Option<i64>, listen_self: bool) -> Self {
        Self {
            self_user_id,
            listen_self,
        }
    }

    /// Apply the filter table to one delta.
    ///
    /// Only `NewMessage` deltas that pass the self-origin filter produce an
    /// event; every other class is ignored (logged where diagnostics help).
    #[must_use]
    pub fn accept(&self, delta: Delta) -> Option<DeliveredEvent> {
        match delta {
            Delta::NewMessage(message) => {
                if !self.listen_self && Some(message.sender) == self.self_user_id {
                    trace!(
                        target: "push.delta",
                        sender = message.sender,
                        "Dropping self-origin message"
                    );
                    return None;
                }
                Some(DeliveredEvent::from(message))
            }
            Delta::ClientPayload(inner) => {
                debug!(target: "push.delta", payload = %inner, "Ignoring client payload delta");
                None
            }
            Delta::Unknown { class, .. } => {
                debug!(target: "push.delta", class = %class, "Ignoring unknown delta class");
                None
            }
            Delta::DeliveryReceipt
            | Delta::ReadReceipt
            | Delta::MarkFolderSeen
            | Delta::NoOp
            | Delta::AdminTextMessage
            | Delta::MessageDelete => None,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_message_delta(sender: i64) -> Value {
        json!({
            "class": "NewMessage",
            "messageMetadata": {
                "threadKey": { "threadFbId": "1234567890" },
                "actorFbId": sender.to_string(),
                "timestamp": "1700000000000",
                "messageId": "mid.$abc"
            },
            "body": "hello",
            "attachments": []
        })
    }

    #[test]
    fn test_parse_deltas_missing_field_yields_nothing() {
        assert!(parse_deltas(b"{\"foo\":1}").is_empty());
        assert!(parse_deltas(b"not json at all").is_empty());
    }

    #[test]
    fn test_classify_new_message() {
        let delta = classify_delta(&new_message_delta(42));
        let Delta::NewMessage(message) = delta else {
            panic!("expected NewMessage, got {delta:?}");
        };
        assert_eq!(message.thread, 1_234_567_890);
        assert_eq!(message.sender, 42);
        assert_eq!(message.timestamp, 1_700_000_000_000);
        assert_eq!(message.message_id, "mid.$abc");
        assert_eq!(message.body, "hello");
    }

    #[test]
    fn test_classify_one_to_one_thread_key() {
        let raw = json!({
            "class": "NewMessage",
            "messageMetadata": {
                "threadKey": { "otherUserFbId": 555 },
                "actorFbId": 555,
                "timestamp": 1,
                "messageId": "mid.1"
            },
            "body": "hi"
        });
        let Delta::NewMessage(message) = classify_delta(&raw) else {
            panic!("expected NewMessage");
        };
        assert_eq!(message.thread, 555);
        assert!(message.attachments.is_empty());
    }

    #[test]
    fn test_ignored_classes() {
        for (class, expected) in [
            ("DeliveryReceipt", Delta::DeliveryReceipt),
            ("ReadReceipt", Delta::ReadReceipt),
            ("MarkFolderSeen", Delta::MarkFolderSeen),
            ("NoOp", Delta::NoOp),
            ("AdminTextMessage", Delta::AdminTextMessage),
            ("MessageDelete", Delta::MessageDelete),
        ] {
            assert_eq!(classify_delta(&json!({ "class": class })), expected);
        }
    }

    #[test]
    fn test_unknown_class_is_preserved() {
        let raw = json!({ "class": "ForcedFetch", "threadKey": {} });
        let Delta::Unknown { class, .. } = classify_delta(&raw) else {
            panic!("expected Unknown");
        };
        assert_eq!(class, "ForcedFetch");
    }

    #[test]
    fn test_missing_class_is_unknown() {
        let raw = json!({ "body": "no class" });
        assert!(matches!(classify_delta(&raw), Delta::Unknown { class, .. } if class.is_empty()));
    }

    #[test]
    fn test_malformed_new_message_is_unknown() {
        let raw = json!({ "class": "NewMessage", "body": "metadata missing" });
        assert!(matches!(classify_delta(&raw), Delta::Unknown { .. }));
    }

    #[test]
    fn test_client_payload_nested_decode() {
        let inner = json!({ "deltaMessageReaction": { "reaction": "\u{1F44D}" } });
        let bytes = serde_json::to_vec(&inner).unwrap();
        let raw = json!({
            "class": "ClientPayload",
            "payload": bytes.iter().map(|b| json!(b)).collect::<Vec<_>>()
        });
        let Delta::ClientPayload(decoded) = classify_delta(&raw) else {
            panic!("expected ClientPayload");
        };
        assert_eq!(decoded, inner);
    }

    #[test]
    fn test_self_origin_filter_disabled_drops_own_messages() {
        let classifier = DeltaClassifier::new(Some(42), false);
        let delta = classify_delta(&new_message_delta(42));
        assert!(classifier.accept(delta).is_none());

        let other = classify_delta(&new_message_delta(43));
        assert!(classifier.accept(other).is_some());
    }

    #[test]
    fn test_self_origin_filter_enabled_delivers_own_messages() {
        let classifier = DeltaClassifier::new(Some(42), true);
        let delta = classify_delta(&new_message_delta(42));
        let event = classifier.accept(delta).expect("self message delivered");
        assert_eq!(event.sender, 42);
    }

    #[test]
    fn test_only_new_message_produces_events() {
        let classifier = DeltaClassifier::new(None, false);
        for class in [
            "DeliveryReceipt",
            "ReadReceipt",
            "MarkFolderSeen",
            "NoOp",
            "AdminTextMessage",
            "MessageDelete",
            "SomethingElse",
        ] {
            let delta = classify_delta(&json!({ "class": class }));
            assert!(classifier.accept(delta).is_none(), "{class} produced an event");
        }
    }

    #[test]
    fn test_delivered_event_schema() {
        let classifier = DeltaClassifier::new(None, false);
        let delta = classify_delta(&new_message_delta(7));
        let event = classifier.accept(delta).unwrap();

        let serialized = serde_json::to_value(&event).unwrap();
        assert_eq!(serialized["type"], "message");
        assert_eq!(serialized["thread"], 1_234_567_890_i64);
        assert_eq!(serialized["sender"], 7);
        assert_eq!(serialized["messageId"], "mid.$abc");
        assert!(serialized["attachments"].is_array());
    }
}
