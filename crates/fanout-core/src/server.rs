//! Broadcast server
//!
//! One producer channel in, one bounded queue per subscriber out. The server
//! is `Ready` until [`Server::start`] is awaited, `Running` while it consumes
//! events, and `Stopped` once the producer channel closes or an event fails
//! to encode. Stopping tears down every subscriber queue, which ends every
//! open stream.

use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::FanoutConfig;
use crate::frame::encode_frame;
use crate::metrics::FanoutMetrics;
use crate::reader::ChunkReader;
use crate::registry::{SubscriberId, SubscriberRegistry};
use crate::sink::{ResponseSink, SSE_HEADERS, STREAMING_UNSUPPORTED_STATUS};
use crate::{Error, Result};

/// Bytes pulled from a subscription per write in `serve_connection`
const READ_CHUNK_SIZE: usize = 4096;

/// Status returned to connections arriving after the server stopped
const SERVER_CLOSED_STATUS: u16 = 503;

/// Status returned when the connection's id is already subscribed
const DUPLICATE_SUBSCRIBER_STATUS: u16 = 409;

/// Status returned for any other registration failure
const INTERNAL_ERROR_STATUS: u16 = 500;

/// Lifecycle state of a [`Server`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// Constructed, `start` not yet called
    Ready,
    /// Consuming the producer channel
    Running,
    /// Producer finished or failed; all subscribers torn down
    Stopped,
}

enum Lifecycle<T> {
    Ready(mpsc::Receiver<T>),
    Running,
    Stopped,
}

/// Fans a single event channel out to every connected subscriber
pub struct Server<T> {
    lifecycle: Mutex<Lifecycle<T>>,
    registry: Arc<SubscriberRegistry>,
    metrics: FanoutMetrics,
    config: FanoutConfig,
}

impl<T> Server<T>
where
    T: Serialize + Send + 'static,
{
    /// Create a server with the default configuration.
    ///
    /// The server does nothing until [`start`](Self::start) is awaited.
    pub fn new(events: mpsc::Receiver<T>) -> Self {
        Self::build(events, FanoutConfig::default())
    }

    /// Create a server with explicit options
    pub fn with_config(events: mpsc::Receiver<T>, config: FanoutConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(events, config))
    }

    fn build(events: mpsc::Receiver<T>, config: FanoutConfig) -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle::Ready(events)),
            registry: Arc::new(SubscriberRegistry::new(config.buffer_size)),
            metrics: FanoutMetrics::new(),
            config,
        }
    }

    /// Consume the event channel until it closes, broadcasting each event.
    ///
    /// Returns `Ok(())` when the channel closes and [`Error::Encoding`] if an
    /// event cannot be encoded. Either way every subscriber is torn down
    /// before this returns, and the same happens if the future is dropped.
    pub async fn start(&self) -> Result<()> {
        let mut events = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Running) {
                Lifecycle::Ready(events) => events,
                other => {
                    *lifecycle = other;
                    return Err(Error::AlreadyStarted);
                }
            }
        };
        let _stop = StopGuard { server: self };

        info!(buffer_size = self.config.buffer_size, "Broadcast loop started");

        while let Some(event) = events.recv().await {
            self.metrics.record_event();

            let frame = match encode_frame(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(error = %e, "Failed to encode event, stopping broadcast");
                    return Err(e);
                }
            };

            let delivery = self.registry.broadcast(&frame);
            self.metrics
                .record_delivery(delivery.delivered, delivery.dropped);
        }

        info!("Event source closed, stopping broadcast");
        Ok(())
    }

    /// Register a new subscriber with a generated id
    pub fn subscribe(&self) -> Result<Subscription> {
        self.subscribe_with_id(SubscriberId::new())
    }

    /// Register a new subscriber under `id`.
    ///
    /// The subscription receives every event broadcast after this returns.
    pub fn subscribe_with_id(&self, id: SubscriberId) -> Result<Subscription> {
        let queue = self.registry.register(id)?;
        self.metrics.record_registered();

        Ok(Subscription {
            id,
            reader: ChunkReader::new(queue),
            registry: Arc::clone(&self.registry),
            metrics: self.metrics.clone(),
        })
    }

    /// Stream events to one connection until it ends.
    ///
    /// Ends with `Ok(())` when the client disconnects or the server stops,
    /// and with [`Error::TransportWrite`] if the sink fails. A sink that
    /// cannot flush is rejected with a 500 before anything is registered.
    /// The subscriber is deregistered on every exit path.
    ///
    /// Disconnects are only observed between writes: a client that goes away
    /// while a write is stalled is noticed once that write returns.
    pub async fn serve_connection<S>(&self, id: SubscriberId, sink: &mut S) -> Result<()>
    where
        S: ResponseSink + ?Sized,
    {
        if !sink.supports_flush() {
            warn!(subscriber = %id, "Response sink cannot stream, rejecting");
            sink.reject(STREAMING_UNSUPPORTED_STATUS, "Streaming unsupported");
            return Err(Error::StreamingUnsupported);
        }

        let mut subscription = match self.subscribe_with_id(id) {
            Ok(subscription) => subscription,
            Err(e) => {
                sink.reject(rejection_status(&e), &e.to_string());
                return Err(e);
            }
        };

        for (name, value) in SSE_HEADERS {
            sink.set_header(name, value);
        }

        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let read = tokio::select! {
                biased;
                _ = sink.closed() => {
                    debug!(subscriber = %id, "Client disconnected");
                    return Ok(());
                }
                read = subscription.read(&mut buf) => read,
            };

            let n = match read {
                Ok(0) | Err(_) => {
                    debug!(subscriber = %id, "Subscriber queue closed");
                    return Ok(());
                }
                Ok(n) => n,
            };

            if let Err(e) = write_and_flush(sink, &buf[..n]).await {
                debug!(subscriber = %id, error = %e, "Write to subscriber failed");
                return Err(Error::TransportWrite(e));
            }
        }
    }
}

impl<T> Server<T> {
    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        match &*self.lifecycle.lock() {
            Lifecycle::Ready(_) => ServerState::Ready,
            Lifecycle::Running => ServerState::Running,
            Lifecycle::Stopped => ServerState::Stopped,
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn metrics(&self) -> &FanoutMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    fn stop(&self) {
        let removed = self.registry.teardown_all();
        self.metrics.record_deregistered(removed);
        *self.lifecycle.lock() = Lifecycle::Stopped;
        info!(subscribers = removed, "Broadcast server stopped");
    }
}

fn rejection_status(err: &Error) -> u16 {
    match err {
        Error::Closed => SERVER_CLOSED_STATUS,
        Error::DuplicateSubscriber(_) => DUPLICATE_SUBSCRIBER_STATUS,
        _ => INTERNAL_ERROR_STATUS,
    }
}

async fn write_and_flush<S>(sink: &mut S, chunk: &[u8]) -> io::Result<()>
where
    S: ResponseSink + ?Sized,
{
    sink.write_chunk(chunk).await?;
    sink.flush().await
}

struct StopGuard<'a, T> {
    server: &'a Server<T>,
}

impl<T> Drop for StopGuard<'_, T> {
    fn drop(&mut self) {
        self.server.stop();
    }
}

/// One registered subscriber's stream of encoded frames.
///
/// Reading yields the raw event-stream bytes. Dropping the subscription
/// deregisters it; if the server has already torn it down that is a no-op.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    reader: ChunkReader,
    registry: Arc<SubscriberRegistry>,
    metrics: FanoutMetrics,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the server still holds this subscriber's queue
    pub fn is_registered(&self) -> bool {
        self.registry.contains(&self.id)
    }
}

impl AsyncRead for Subscription {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.registry.deregister(&self.id) {
            self.metrics.record_deregistered(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn test_state_transitions() {
        let (tx, rx) = mpsc::channel::<Value>(4);
        let server = Server::new(rx);
        assert_eq!(server.state(), ServerState::Ready);

        drop(tx);
        server.start().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (tx, rx) = mpsc::channel::<Value>(4);
        let server = Server::new(rx);
        drop(tx);

        server.start().await.unwrap();
        assert!(matches!(server.start().await, Err(Error::AlreadyStarted)));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_subscribe_after_stop_fails() {
        let (tx, rx) = mpsc::channel::<Value>(4);
        let server = Server::new(rx);
        drop(tx);
        server.start().await.unwrap();

        assert!(matches!(server.subscribe(), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_dropped_start_still_tears_down() {
        let (tx, rx) = mpsc::channel::<Value>(4);
        let server = Server::new(rx);
        let subscription = server.subscribe().unwrap();

        {
            let start = server.start();
            tokio::pin!(start);
            let pending = futures_util::poll!(start.as_mut());
            assert!(pending.is_pending());
            assert_eq!(server.state(), ServerState::Running);
        }

        assert_eq!(server.state(), ServerState::Stopped);
        assert!(!subscription.is_registered());
        drop(tx);
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let (_tx, rx) = mpsc::channel::<Value>(1);
        let config = FanoutConfig::default().with_buffer_size(0);
        assert!(matches!(Server::with_config(rx, config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_subscription_drop_deregisters_once() {
        let (_tx, rx) = mpsc::channel::<Value>(1);
        let server = Server::new(rx);

        let subscription = server.subscribe().unwrap();
        assert_eq!(server.subscriber_count(), 1);
        drop(subscription);

        assert_eq!(server.subscriber_count(), 0);
        let snapshot = server.metrics().snapshot();
        assert_eq!(snapshot.subscribers_registered, 1);
        assert_eq!(snapshot.subscribers_deregistered, 1);

        // server state is unaffected
        assert_eq!(server.state(), ServerState::Ready);
    }
}
