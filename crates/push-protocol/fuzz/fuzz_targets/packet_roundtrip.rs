#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use push_protocol::codec::{encode_publish, PacketDecoder};
use push_protocol::frame::RawFrame;

fuzz_target!(|data: &[u8]| {
    // Derive a topic and payload from the input, encode, then decode.
    let split = data.len() / 4;
    let topic_bytes = &data[..split];
    let payload = &data[split..];

    let Ok(topic) = std::str::from_utf8(topic_bytes) else {
        return;
    };

    if let Ok(encoded) = encode_publish(topic, payload) {
        let mut decoder = PacketDecoder::new();
        decoder.ingest(&RawFrame::Binary(Bytes::copy_from_slice(&encoded)));

        let packet = decoder
            .next_packet()
            .expect("encoded packet must decode");
        assert_eq!(packet.topic, topic);
        assert_eq!(&packet.payload[..], payload);
    }
});
