//! Inbound event pipeline: raw frames -> packets -> deltas -> delivery.
//!
//! One task owns the streaming decoder and the classifier. It is fed by
//! the transport tap (whatever observes the push socket) and pushes every
//! accepted event onto the delivery queue. Decode failures drop the
//! offending bytes and the task keeps going; nothing here is fatal.

use crate::actors::delivery::DeliveryHandle;
use crate::actors::metrics::PipelineMetrics;

use push_protocol::codec::PacketDecoder;
use push_protocol::delta::{parse_deltas, DeltaClassifier};
use push_protocol::frame::{RawFrame, PUSH_TOPIC};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Buffer for the transport-tap frame channel.
pub(crate) const FRAME_CHANNEL_BUFFER: usize = 1024;

/// Spawn the ingest task. Returns the sender handed to the transport tap.
pub(crate) fn spawn_pipeline(
    classifier: DeltaClassifier,
    delivery: DeliveryHandle,
    metrics: Arc<PipelineMetrics>,
    cancel_token: CancellationToken,
) -> (mpsc::Sender<RawFrame>, JoinHandle<()>) {
    let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_BUFFER);
    let task_handle = tokio::spawn(run_pipeline(
        frames_rx,
        classifier,
        delivery,
        metrics,
        cancel_token,
    ));
    (frames_tx, task_handle)
}

/// Decode and classify frames until cancelled or the tap goes away.
#[instrument(skip_all, name = "tc.pipeline")]
async fn run_pipeline(
    mut frames: mpsc::Receiver<RawFrame>,
    classifier: DeltaClassifier,
    delivery: DeliveryHandle,
    metrics: Arc<PipelineMetrics>,
    cancel_token: CancellationToken,
) {
    let mut decoder = PacketDecoder::with_topic(PUSH_TOPIC);
    debug!(target: "tc.pipeline", "Pipeline started");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,

            frame = frames.recv() => {
                let Some(frame) = frame else {
                    // Transport tap dropped its sender.
                    break;
                };
                metrics.frame_received();
                decoder.ingest(&frame);

                while let Some(packet) = decoder.next_packet() {
                    metrics.packet_decoded();
                    for delta in parse_deltas(&packet.payload) {
                        metrics.delta_classified();
                        match classifier.accept(delta) {
                            Some(event) => {
                                if delivery.deliver(event).is_err() {
                                    debug!(
                                        target: "tc.pipeline",
                                        "Delivery queue gone, stopping pipeline"
                                    );
                                    return;
                                }
                            }
                            None => metrics.event_filtered(),
                        }
                    }
                }
            }
        }
    }

    debug!(
        target: "tc.pipeline",
        frames = metrics.frames_received_count(),
        "Pipeline stopped"
    );
}
