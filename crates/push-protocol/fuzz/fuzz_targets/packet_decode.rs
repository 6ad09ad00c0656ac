#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use push_protocol::codec::PacketDecoder;
use push_protocol::frame::RawFrame;

fuzz_target!(|data: &[u8]| {
    // Feed the input twice: once as a single frame, once split at an
    // input-derived point, so partial-packet buffering gets exercised.
    let mut decoder = PacketDecoder::new();
    decoder.ingest(&RawFrame::Binary(Bytes::copy_from_slice(data)));
    while decoder.next_packet().is_some() {}

    if data.len() > 1 {
        let split = usize::from(data[0]) % data.len();
        let (first, second) = data.split_at(split);

        let mut decoder = PacketDecoder::new();
        decoder.ingest(&RawFrame::Binary(Bytes::copy_from_slice(first)));
        while decoder.next_packet().is_some() {}
        decoder.ingest(&RawFrame::Binary(Bytes::copy_from_slice(second)));
        while decoder.next_packet().is_some() {}
    }
});
