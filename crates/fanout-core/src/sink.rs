//! Outbound response interface
//!
//! The HTTP layer is a collaborator: any transport that can set headers,
//! write and flush chunks, and report client disconnects can be served by
//! [`Server::serve_connection`](crate::Server::serve_connection).

use async_trait::async_trait;
use std::io;

/// Headers every event-stream response carries
pub const SSE_HEADERS: [(&str, &str); 3] = [
    ("Content-Type", "text/event-stream"),
    ("Cache-Control", "no-cache"),
    ("Connection", "keep-alive"),
];

/// Status used when a sink cannot stream
pub const STREAMING_UNSUPPORTED_STATUS: u16 = 500;

/// Writable side of one client connection
#[async_trait]
pub trait ResponseSink: Send {
    /// Whether written chunks can be pushed to the client incrementally
    fn supports_flush(&self) -> bool;

    fn set_header(&mut self, name: &'static str, value: &'static str);

    /// Fail the request before any body has been written
    fn reject(&mut self, status: u16, message: &str);

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()>;

    /// Resolves once the client has gone away.
    ///
    /// Must be cancel safe: it is raced against frame delivery.
    async fn closed(&mut self);
}
