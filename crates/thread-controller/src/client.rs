//! High-level client facade.
//!
//! Wires the dispatcher, the delivery queue and (on demand) the push
//! pipeline together over an authenticated [`PageFactory`], and exposes the
//! messaging operations the stock automation needs: send a message, send
//! attachments, run a custom action, listen for inbound events.

use crate::actors::delivery::{DeliveryHandle, EventListener, Subscription};
use crate::actors::dispatcher::DispatcherHandle;
use crate::actors::messages::PoolStatus;
use crate::actors::metrics::{ActorMetrics, PipelineMetrics};
use crate::config::Config;
use crate::errors::TcError;
use crate::page::{keys, selectors, PageContext, PageFactory};
use crate::pipeline::spawn_pipeline;

use futures::future::BoxFuture;
use push_protocol::delta::DeltaClassifier;
use push_protocol::frame::RawFrame;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A previously attached pipeline, kept so re-attach and detach can stop it.
struct AttachedPipeline {
    cancel_token: CancellationToken,
}

/// Client over one authenticated browser session.
pub struct Client {
    config: Config,
    dispatcher: DispatcherHandle,
    delivery: DeliveryHandle,
    actor_metrics: Arc<ActorMetrics>,
    pipeline_metrics: Arc<PipelineMetrics>,
    cancel_token: CancellationToken,
    pipeline: Mutex<Option<AttachedPipeline>>,
}

impl Client {
    /// Build a client over an authenticated page factory and start its
    /// actor system.
    #[must_use]
    pub fn new(config: Config, factory: Arc<dyn PageFactory>) -> Self {
        let cancel_token = CancellationToken::new();
        let actor_metrics = ActorMetrics::new();
        let pipeline_metrics = PipelineMetrics::new();

        let dispatcher = DispatcherHandle::with_cancel_token(
            &config,
            factory,
            Arc::clone(&actor_metrics),
            cancel_token.child_token(),
        );
        let (delivery, _delivery_task) =
            DeliveryHandle::new(Arc::clone(&pipeline_metrics), cancel_token.child_token());

        info!(
            target: "tc.client",
            instance_id = %config.instance_id,
            worker_limit = config.worker_limit,
            "Client initialized"
        );

        Self {
            config,
            dispatcher,
            delivery,
            actor_metrics,
            pipeline_metrics,
            cancel_token,
            pipeline: Mutex::new(None),
        }
    }

    /// Submit a custom operation against a thread.
    ///
    /// The closure receives the page capability once the worker bound to
    /// the thread picks the action up. Per-thread submission order is
    /// execution order.
    ///
    /// # Errors
    ///
    /// See [`DispatcherHandle::submit`].
    pub async fn submit<F, Fut>(&self, thread: &str, op: F) -> Result<(), TcError>
    where
        F: FnOnce(Arc<dyn PageContext>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TcError>> + Send + 'static,
    {
        self.dispatcher
            .submit(
                thread,
                Box::new(move |page| Box::pin(op(page)) as BoxFuture<'static, _>),
            )
            .await
    }

    /// Type a message into the thread's composer and send it.
    pub async fn send_message(&self, thread: &str, body: &str) -> Result<(), TcError> {
        let body = body.to_string();
        self.submit(thread, move |page| async move {
            page.type_text(selectors::COMPOSER, &body).await?;
            page.press_key(keys::ENTER).await
        })
        .await
    }

    /// Attach files to the thread's composer and send them.
    ///
    /// An empty list is a no-op.
    pub async fn send_attachments(&self, thread: &str, paths: Vec<PathBuf>) -> Result<(), TcError> {
        if paths.is_empty() {
            return Ok(());
        }
        self.submit(thread, move |page| async move {
            for path in &paths {
                page.upload_file(selectors::FILE_INPUT, path).await?;
            }
            page.press_key(keys::ENTER).await
        })
        .await
    }

    /// Wire the push pipeline and return the sender the transport tap
    /// feeds observed socket frames into, in arrival order.
    ///
    /// Re-attaching replaces (stops) the previous pipeline.
    #[must_use]
    pub fn attach_push_source(&self) -> mpsc::Sender<RawFrame> {
        let classifier =
            DeltaClassifier::new(self.config.self_user_id, self.config.listen_self);
        let token = self.cancel_token.child_token();
        let (frames_tx, _pipeline_task) = spawn_pipeline(
            classifier,
            self.delivery.clone(),
            Arc::clone(&self.pipeline_metrics),
            token.clone(),
        );

        let previous = self
            .pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(AttachedPipeline {
                cancel_token: token,
            });
        if let Some(previous) = previous {
            previous.cancel_token.cancel();
        }

        info!(target: "tc.client", instance_id = %self.config.instance_id, "Push source attached");
        frames_tx
    }

    /// Register a listener for inbound message events.
    ///
    /// Registration is idempotent on listener identity; the returned
    /// [`Subscription`] removes exactly that registration.
    pub async fn listen(&self, callback: EventListener) -> Result<Subscription, TcError> {
        self.delivery.subscribe(callback).await
    }

    /// Remove every listener and detach from the frame source.
    pub async fn unsubscribe_all(&self) -> Result<(), TcError> {
        let previous = self
            .pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            previous.cancel_token.cancel();
        }
        self.delivery.unsubscribe_all().await
    }

    /// Snapshot of worker pool state.
    pub async fn status(&self) -> Result<PoolStatus, TcError> {
        self.dispatcher.status().await
    }

    /// Action-side metrics.
    #[must_use]
    pub fn actor_metrics(&self) -> &Arc<ActorMetrics> {
        &self.actor_metrics
    }

    /// Ingest-side metrics.
    #[must_use]
    pub fn pipeline_metrics(&self) -> &Arc<PipelineMetrics> {
        &self.pipeline_metrics
    }

    /// Gracefully stop workers, pipelines and the delivery queue.
    pub async fn shutdown(&self) -> Result<(), TcError> {
        info!(
            target: "tc.client",
            instance_id = %self.config.instance_id,
            "Shutting down client"
        );
        let result = self.dispatcher.shutdown().await;
        self.cancel_token.cancel();
        result
    }
}
