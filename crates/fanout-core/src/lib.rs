//! Fanout Core
//!
//! In-process event fanout for Server-Sent Events.
//!
//! A single producer feeds typed events into a [`Server`]; every connected
//! subscriber receives each event published after it connected, in order,
//! through its own bounded queue. A slow subscriber loses frames instead of
//! holding anyone else up.
//!
//! This crate provides:
//! - Frame encoding (`data:<json>\n\n`)
//! - The subscriber registry with drop-on-full broadcast
//! - A pull-style reader bridging queues to streaming response bodies
//! - The broadcast loop and per-connection serving

pub mod config;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod reader;
pub mod registry;
pub mod server;
pub mod sink;

pub use config::{FanoutConfig, DEFAULT_BUFFER_SIZE};
pub use error::{Error, Result};
pub use frame::{encode_frame, Frame};
pub use metrics::{FanoutMetrics, MetricsSnapshot};
pub use reader::ChunkReader;
pub use registry::{Delivery, SubscriberId, SubscriberRegistry};
pub use server::{Server, ServerState, Subscription};
pub use sink::{ResponseSink, SSE_HEADERS};

