//! Subscriber registry
//!
//! Maps each live connection to the sending half of its bounded delivery
//! queue. Registration, deregistration and teardown take the write lock;
//! broadcast holds the read lock for the whole snapshot-and-send pass, so a
//! queue is never closed while a broadcast can still reach it. A queue is
//! closed by dropping its sender, which only happens inside the write lock
//! that also removes the entry.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::frame::Frame;
use crate::{Error, Result};

/// Identity of one subscriber connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of broadcasting one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Queues that accepted the frame
    pub delivered: usize,
    /// Queues that were full (or whose reader had gone) and lost the frame
    pub dropped: usize,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<SubscriberId, mpsc::Sender<Frame>>,
    closed: bool,
}

/// Concurrency-safe map from subscriber id to delivery queue
pub struct SubscriberRegistry {
    inner: RwLock<Inner>,
    buffer_size: usize,
}

impl SubscriberRegistry {
    /// Create an empty registry whose queues hold `buffer_size` frames.
    ///
    /// `buffer_size` must be non-zero; see [`FanoutConfig::validate`](crate::FanoutConfig::validate).
    pub fn new(buffer_size: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Create a queue for `id` and return its receiving half
    pub fn register(&self, id: SubscriberId) -> Result<mpsc::Receiver<Frame>> {
        let mut inner = self.inner.write();

        if inner.closed {
            return Err(Error::Closed);
        }
        if inner.queues.contains_key(&id) {
            return Err(Error::DuplicateSubscriber(id));
        }

        let (tx, rx) = mpsc::channel(self.buffer_size);
        inner.queues.insert(id, tx);
        debug!(subscriber = %id, subscribers = inner.queues.len(), "Subscriber registered");

        Ok(rx)
    }

    /// Close and remove the queue for `id`.
    ///
    /// Safe to call any number of times; returns whether an entry was removed.
    pub fn deregister(&self, id: &SubscriberId) -> bool {
        let mut inner = self.inner.write();

        // dropping the sender closes the queue
        let removed = inner.queues.remove(id).is_some();
        if removed {
            debug!(subscriber = %id, subscribers = inner.queues.len(), "Subscriber deregistered");
        }
        removed
    }

    /// Close every remaining queue and refuse further registrations.
    ///
    /// Returns the number of subscribers removed.
    pub fn teardown_all(&self) -> usize {
        let mut inner = self.inner.write();

        inner.closed = true;
        let count = inner.queues.len();
        inner.queues.clear();

        debug!(subscribers = count, "Registry torn down");
        count
    }

    /// Offer `frame` to every registered queue without waiting.
    ///
    /// A full queue loses this frame; nothing else is affected.
    pub fn broadcast(&self, frame: &Frame) -> Delivery {
        let inner = self.inner.read();
        let mut delivery = Delivery::default();

        for (id, queue) in inner.queues.iter() {
            match queue.try_send(frame.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    trace!(subscriber = %id, "Queue full, frame dropped");
                    delivery.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(subscriber = %id, "Reader gone, frame dropped");
                    delivery.dropped += 1;
                }
            }
        }

        delivery
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.inner.read().queues.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().queues.is_empty()
    }

    /// Whether [`teardown_all`](Self::teardown_all) has run
    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &inner.queues.len())
            .field("closed", &inner.closed)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}
