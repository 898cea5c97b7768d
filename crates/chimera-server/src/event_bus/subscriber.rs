use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chimera_protocol::Event;
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Event Subscriber
///
/// The single callback contract of the bus. Blocking work belongs on the
/// blocking pool (see [`BlockingSubscriber`]); returning `Err` or panicking
/// is logged by the bus and never reaches the publisher.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()>;
}

/// Subscriber backed by an async closure
pub struct FnSubscriber<F>(F);

/// Wrap an async closure as a [`Subscriber`].
pub fn from_fn<F, Fut>(f: F) -> FnSubscriber<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnSubscriber(f)
}

#[async_trait]
impl<F, Fut> Subscriber for FnSubscriber<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()> {
        (self.0)(event).await
    }
}

/// Subscriber backed by a synchronous closure, run on the blocking pool
pub struct BlockingSubscriber<F>(Arc<F>);

impl<F> BlockingSubscriber<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(Arc::new(f))
    }
}

#[async_trait]
impl<F> Subscriber for BlockingSubscriber<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
{
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()> {
        let f = self.0.clone();
        tokio::task::spawn_blocking(move || f(&event))
            .await
            .map_err(|e| anyhow::anyhow!("blocking subscriber task failed: {}", e))?
    }
}

// ============================================================================
// Mailbox
// ============================================================================

tokio::task_local! {
    /// Id of the subscriber whose callback is running on the current task
    static DELIVERING: String;
}

/// True when called from inside a subscriber callback
pub(crate) fn in_delivery() -> bool {
    DELIVERING.try_with(|_| ()).is_ok()
}

struct Delivery {
    event: Arc<Event>,
    ack: oneshot::Sender<()>,
}

/// Private FIFO queue in front of one subscriber callback
///
/// A dedicated task drains the queue, so a slow callback only delays its own
/// deliveries and every callback sees events in enqueue order.
pub(crate) struct Mailbox {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl Mailbox {
    /// Must be called from within a Tokio runtime.
    pub(crate) fn spawn(module_id: String, subscriber: Arc<dyn Subscriber>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(module_id, subscriber, rx));
        Self { tx }
    }

    /// Enqueue an event; the receiver resolves once the callback was attempted.
    pub(crate) fn deliver(&self, event: Arc<Event>) -> Option<oneshot::Receiver<()>> {
        let (ack, done) = oneshot::channel();
        self.tx.send(Delivery { event, ack }).ok().map(|_| done)
    }
}

async fn drain(
    module_id: String,
    subscriber: Arc<dyn Subscriber>,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
) {
    debug!(subscriber = %module_id, "mailbox started");

    while let Some(Delivery { event, ack }) = rx.recv().await {
        let callback = DELIVERING.scope(module_id.clone(), subscriber.on_event(event.clone()));

        match AssertUnwindSafe(callback).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    subscriber = %module_id,
                    event_id = %event.id(),
                    kind = %event.kind(),
                    error = %e,
                    "subscriber failed to handle event"
                );
            }
            Err(_) => {
                error!(
                    subscriber = %module_id,
                    event_id = %event.id(),
                    kind = %event.kind(),
                    "subscriber panicked while handling event"
                );
            }
        }

        // Publisher may have stopped waiting
        let _ = ack.send(());
    }

    debug!(subscriber = %module_id, "mailbox closed");
}
