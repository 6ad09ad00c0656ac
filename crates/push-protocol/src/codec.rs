//! Streaming codec for the push packet stream.
//!
//! Packets arrive embedded in transport frames with no alignment guarantee:
//! a packet (including its multi-byte length prefix) may span frame
//! boundaries, and one frame may carry several packets. The decoder keeps
//! partial-packet state across [`PacketDecoder::ingest`] calls and yields
//! completed packets lazily via [`PacketDecoder::next_packet`].

use crate::frame::{
    DecodedPacket, PacketKind, PublishFlags, RawFrame, MAX_LENGTH_BYTES, MAX_PACKET_SIZE,
};
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Remaining-length varint ran past its maximum width
    #[error("Malformed length prefix")]
    MalformedLength,

    /// Declared body length above the packet size cap
    #[error("Declared packet length {0} exceeds limit")]
    Oversized(usize),

    /// Packet body inconsistent with its header
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// Topic longer than the u16 length field permits
    #[error("Topic too long: {0} bytes")]
    TopicTooLong(usize),
}

/// Encode a PUBLISH packet (QoS 0) for the given topic.
///
/// # Errors
///
/// Returns an error if the topic or the resulting body exceeds the wire
/// format's limits.
pub fn encode_publish(topic: &str, payload: &[u8]) -> Result<Bytes, CodecError> {
    let topic_len =
        u16::try_from(topic.len()).map_err(|_| CodecError::TopicTooLong(topic.len()))?;
    let remaining = 2 + topic.len() + payload.len();
    if remaining > MAX_PACKET_SIZE {
        return Err(CodecError::Oversized(remaining));
    }

    let mut buf = BytesMut::with_capacity(1 + MAX_LENGTH_BYTES + remaining);

    // Control byte: PUBLISH with default (QoS 0) flags
    buf.put_u8(0x30 | PublishFlags::default().to_nibble());

    put_varint(&mut buf, remaining);

    // Topic (u16-BE length prefix)
    buf.put_u16(topic_len);
    buf.extend_from_slice(topic.as_bytes());

    // Payload
    buf.extend_from_slice(payload);

    Ok(buf.freeze())
}

/// Append a remaining-length varint: 7 bits per byte, MSB = continuation.
fn put_varint(buf: &mut BytesMut, mut value: usize) {
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Outcome of attempting to parse the packet at the front of the buffer.
enum Parsed {
    /// Not enough buffered bytes yet.
    NeedMore,
    /// A complete non-PUBLISH (or filtered-out) packet to discard.
    Skipped { consumed: usize },
    /// A complete PUBLISH packet.
    Packet {
        consumed: usize,
        packet: DecodedPacket,
    },
}

/// Streaming decoder holding partial-packet state across transport frames.
///
/// The stream is not restartable: when corruption is detected the buffered
/// bytes are discarded and decoding resumes at the next frame boundary.
#[derive(Debug, Default)]
pub struct PacketDecoder {
    buf: BytesMut,
    topic_filter: Option<String>,
    packets_decoded: u64,
    packets_skipped: u64,
    frames_dropped: u64,
    bytes_dropped: u64,
}

impl PacketDecoder {
    /// Create a decoder that yields every PUBLISH packet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder that yields only packets published on `topic`.
    #[must_use]
    pub fn with_topic(topic: impl Into<String>) -> Self {
        Self {
            topic_filter: Some(topic.into()),
            ..Self::default()
        }
    }

    /// Feed one transport frame into the decoder.
    ///
    /// Text frames are base64-decoded first; an undecodable text frame is
    /// dropped and counted, leaving earlier buffered state untouched.
    pub fn ingest(&mut self, frame: &RawFrame) {
        match frame {
            RawFrame::Binary(bytes) => self.buf.extend_from_slice(bytes),
            RawFrame::Text(text) => {
                match base64::engine::general_purpose::STANDARD.decode(text.trim()) {
                    Ok(bytes) => self.buf.extend_from_slice(&bytes),
                    Err(e) => {
                        self.frames_dropped += 1;
                        debug!(
                            target: "push.codec",
                            error = %e,
                            "Dropping undecodable text frame"
                        );
                    }
                }
            }
        }
    }

    /// Pull the next complete packet out of the buffer, if any.
    ///
    /// Returns `None` when the buffer holds no complete packet; feeding more
    /// frames may complete one. Corrupt buffered bytes are dropped in place
    /// and `None` is returned for this call.
    pub fn next_packet(&mut self) -> Option<DecodedPacket> {
        loop {
            match self.parse_front() {
                Ok(Parsed::NeedMore) => return None,
                Ok(Parsed::Skipped { consumed }) => {
                    let _ = self.buf.split_to(consumed);
                    self.packets_skipped += 1;
                }
                Ok(Parsed::Packet { consumed, packet }) => {
                    let _ = self.buf.split_to(consumed);
                    self.packets_decoded += 1;

                    if let Some(filter) = &self.topic_filter {
                        if packet.topic != *filter {
                            trace!(
                                target: "push.codec",
                                topic = %packet.topic,
                                "Discarding packet published on another topic"
                            );
                            self.packets_skipped += 1;
                            continue;
                        }
                    }

                    return Some(packet);
                }
                Err(e) => {
                    self.bytes_dropped += self.buf.len() as u64;
                    debug!(
                        target: "push.codec",
                        error = %e,
                        dropped = self.buf.len(),
                        "Dropping corrupt packet buffer, resyncing at next frame"
                    );
                    self.buf.clear();
                    return None;
                }
            }
        }
    }

    /// Number of structurally valid packets decoded so far.
    #[must_use]
    pub fn packets_decoded(&self) -> u64 {
        self.packets_decoded
    }

    /// Number of packets skipped (non-PUBLISH or other topic).
    #[must_use]
    pub fn packets_skipped(&self) -> u64 {
        self.packets_skipped
    }

    /// Number of transport frames dropped before framing (bad base64).
    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Number of buffered bytes discarded on corruption.
    #[must_use]
    pub fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped
    }

    /// Bytes currently buffered awaiting packet completion.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Parse the packet at the front of the buffer without consuming it.
    fn parse_front(&self) -> Result<Parsed, CodecError> {
        let buf = &self.buf;
        let Some(&control) = buf.first() else {
            return Ok(Parsed::NeedMore);
        };

        // Remaining-length varint. The terminator may still be in flight.
        let mut remaining: usize = 0;
        let mut len_bytes = 0usize;
        loop {
            let Some(&byte) = buf.get(1 + len_bytes) else {
                if len_bytes >= MAX_LENGTH_BYTES {
                    return Err(CodecError::MalformedLength);
                }
                return Ok(Parsed::NeedMore);
            };
            if len_bytes >= MAX_LENGTH_BYTES {
                return Err(CodecError::MalformedLength);
            }
            remaining |= usize::from(byte & 0x7F) << (7 * len_bytes);
            len_bytes += 1;
            if byte & 0x80 == 0 {
                break;
            }
        }

        if remaining > MAX_PACKET_SIZE {
            return Err(CodecError::Oversized(remaining));
        }

        let header = 1 + len_bytes;
        let total = header + remaining;
        if buf.len() < total {
            return Ok(Parsed::NeedMore);
        }
        let body = buf
            .get(header..total)
            .ok_or_else(|| CodecError::MalformedPacket("body out of range".to_string()))?;

        match PacketKind::from_control(control) {
            PacketKind::Other(_) => Ok(Parsed::Skipped { consumed: total }),
            PacketKind::Publish => {
                let packet = parse_publish_body(control, body)?;
                Ok(Parsed::Packet {
                    consumed: total,
                    packet,
                })
            }
        }
    }
}

/// Parse the body of a PUBLISH packet: topic, optional packet id, payload.
fn parse_publish_body(control: u8, body: &[u8]) -> Result<DecodedPacket, CodecError> {
    let flags = PublishFlags::from_nibble(control & 0x0F);

    let hi = *body
        .first()
        .ok_or_else(|| CodecError::MalformedPacket("missing topic length".to_string()))?;
    let lo = *body
        .get(1)
        .ok_or_else(|| CodecError::MalformedPacket("missing topic length".to_string()))?;
    let topic_len = usize::from(u16::from_be_bytes([hi, lo]));

    let topic_end = 2 + topic_len;
    let topic_bytes = body
        .get(2..topic_end)
        .ok_or_else(|| CodecError::MalformedPacket("topic overruns body".to_string()))?;
    let topic = std::str::from_utf8(topic_bytes)
        .map_err(|_| CodecError::MalformedPacket("topic is not UTF-8".to_string()))?
        .to_string();

    // QoS levels above 0 carry a two-byte packet id before the payload.
    let payload_start = if flags.qos > 0 { topic_end + 2 } else { topic_end };
    let payload_bytes = body
        .get(payload_start..)
        .ok_or_else(|| CodecError::MalformedPacket("packet id overruns body".to_string()))?;

    Ok(DecodedPacket {
        topic,
        payload: Bytes::copy_from_slice(payload_bytes),
    })
}
