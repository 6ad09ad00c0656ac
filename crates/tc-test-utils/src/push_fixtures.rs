//! Wire fixtures for the push pipeline.
//!
//! Builders for delta JSON documents and the transport frames that carry
//! them, so pipeline tests feed realistic bytes instead of hand-rolled
//! structs.

use base64::Engine;
use bytes::Bytes;
use push_protocol::codec::encode_publish;
use push_protocol::frame::{RawFrame, PUSH_TOPIC};
use serde_json::{json, Value};

/// A `NewMessage` delta as the wire reports it.
#[must_use]
pub fn new_message_delta(
    thread: i64,
    sender: i64,
    timestamp: i64,
    message_id: &str,
    body: &str,
) -> Value {
    json!({
        "class": "NewMessage",
        "messageMetadata": {
            "threadKey": { "threadFbId": thread.to_string() },
            "actorFbId": sender.to_string(),
            "timestamp": timestamp.to_string(),
            "messageId": message_id
        },
        "body": body,
        "attachments": []
    })
}

/// A delta of an arbitrary class with no payload.
#[must_use]
pub fn bare_delta(class: &str) -> Value {
    json!({ "class": class })
}

/// The JSON payload wrapping a set of deltas.
#[must_use]
pub fn deltas_payload(deltas: &[Value]) -> Vec<u8> {
    serde_json::to_vec(&json!({ "deltas": deltas })).expect("fixture payload serializes")
}

/// A binary frame carrying one push-topic packet with the given deltas.
#[must_use]
pub fn push_frame(deltas: &[Value]) -> RawFrame {
    publish_frame(PUSH_TOPIC, &deltas_payload(deltas))
}

/// A binary frame carrying one packet published on `topic`.
#[must_use]
pub fn publish_frame(topic: &str, payload: &[u8]) -> RawFrame {
    RawFrame::Binary(encode_publish(topic, payload).expect("fixture packet encodes"))
}

/// A base64 text frame carrying one packet published on `topic`.
#[must_use]
pub fn text_frame(topic: &str, payload: &[u8]) -> RawFrame {
    let encoded = encode_publish(topic, payload).expect("fixture packet encodes");
    RawFrame::Text(base64::engine::general_purpose::STANDARD.encode(encoded))
}

/// Split a binary frame's bytes at `at`, yielding two partial frames.
///
/// # Panics
///
/// Panics when handed a text frame or an out-of-range split point.
#[must_use]
pub fn split_binary(frame: &RawFrame, at: usize) -> (RawFrame, RawFrame) {
    let RawFrame::Binary(bytes) = frame else {
        panic!("split_binary needs a binary frame");
    };
    let (first, second) = bytes.split_at(at);
    (
        RawFrame::Binary(Bytes::copy_from_slice(first)),
        RawFrame::Binary(Bytes::copy_from_slice(second)),
    )
}

/// A frame of bytes that are not a valid packet stream.
#[must_use]
pub fn garbage_frame() -> RawFrame {
    // A varint that never terminates: rejected and dropped by the decoder.
    RawFrame::Binary(Bytes::from_static(&[0x30, 0x80, 0x80, 0x80, 0x80, 0x80]))
}
