//! Write-through event sinks and their drain workers.
//!
//! Sinks are fed off the broadcast hot path: the broadcast worker try-sends
//! each event into a bounded queue and a dedicated worker drains it, so a
//! slow or failing sink sheds load instead of adding latency to fan-out.

use crate::error::Result;
use async_trait::async_trait;
use metrics::counter;
use normalizer::Event;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

/// A best-effort destination for normalized events.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Write one event. Failures are counted and logged by the worker;
    /// retries, if any, are the collaborator's concern.
    async fn write(&self, event: &Event) -> Result<()>;
}

/// Non-blocking producer side of a sink queue.
#[derive(Clone)]
pub struct SinkHandle {
    name: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
}

impl SinkHandle {
    /// Create a handle and the receiver to pass to [`spawn_sink_worker`].
    pub fn new(name: &'static str, capacity: usize) -> (Self, mpsc::Receiver<Arc<Event>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { name, tx }, rx)
    }

    /// Enqueue an event, dropping it if the sink is behind.
    pub fn write(&self, event: &Arc<Event>) {
        match self.tx.try_send(Arc::clone(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("sink_events_dropped_total", "sink" => self.name).increment(1);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("sink {} queue closed, dropping event", self.name);
            }
        }
    }
}

/// Drain a sink queue, bounding each write with a deadline.
pub fn spawn_sink_worker<S: EventSink>(
    sink: Arc<S>,
    mut rx: mpsc::Receiver<Arc<Event>>,
    write_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match timeout(write_timeout, sink.write(&event)).await {
                Ok(Ok(())) => {
                    counter!("sink_events_written_total", "sink" => sink.name()).increment(1);
                }
                Ok(Err(e)) => {
                    counter!("sink_write_errors_total", "sink" => sink.name()).increment(1);
                    warn!("sink {} write failed: {}", sink.name(), e);
                }
                Err(_) => {
                    counter!("sink_write_timeouts_total", "sink" => sink.name()).increment(1);
                    warn!("sink {} write timed out after {:?}", sink.name(), write_timeout);
                }
            }
        }
        debug!("sink {} worker exiting", sink.name());
    })
}
