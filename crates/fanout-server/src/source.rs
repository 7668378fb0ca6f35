//! Event sources feeding the broadcaster
//!
//! A source owns the sending half of the event channel. Returning drops it,
//! which is what shuts the broadcast loop down.

use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, SourceKind};

/// Start the configured source on its own task
pub fn spawn(
    config: &AppConfig,
    events: mpsc::Sender<Value>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let kind = config.source;
    let interval = Duration::from_millis(config.ticker_interval_ms);

    tokio::spawn(async move {
        info!(source = ?kind, "Event source started");

        let forwarded = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Event source cancelled");
                None
            }
            count = run(kind, interval, &events) => Some(count),
        };

        match forwarded {
            Some(count) => info!(events = count, "Event source finished"),
            None => info!("Event source stopped by shutdown"),
        }
    })
}

async fn run(kind: SourceKind, interval: Duration, events: &mpsc::Sender<Value>) -> u64 {
    match kind {
        SourceKind::Stdin => {
            let stdin = BufReader::new(tokio::io::stdin());
            match forward_lines(stdin, events).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(error = %e, "Failed to read standard input");
                    0
                }
            }
        }
        SourceKind::Ticker => tick(interval, events).await,
    }
}

/// Forward each newline-delimited JSON value from `reader`.
///
/// Blank lines are ignored and lines that are not valid JSON are skipped
/// with a warning. Stops at end of input or once the broadcaster has gone.
pub async fn forward_lines<R>(reader: R, events: &mpsc::Sender<Value>) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    let mut line_number = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: Value = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_number, error = %e, "Skipping invalid JSON line");
                continue;
            }
        };

        if events.send(event).await.is_err() {
            debug!("Broadcaster gone, no longer reading input");
            break;
        }
        forwarded += 1;
    }

    Ok(forwarded)
}

/// Emit `{"seq": n, "ts": <unix millis>}` every `interval`
pub async fn tick(interval: Duration, events: &mpsc::Sender<Value>) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    let mut seq = 0u64;

    loop {
        ticker.tick().await;

        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        if events.send(json!({ "seq": seq, "ts": ts })).await.is_err() {
            return seq;
        }
        seq += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_lines_skips_invalid() {
        let input: &[u8] = b"{\"foo\":1}\n\nnot json\n[1,2]\n  \"text\"  \n";
        let (tx, mut rx) = mpsc::channel(8);

        let count = forward_lines(input, &tx).await.unwrap();
        drop(tx);

        assert_eq!(count, 3);
        assert_eq!(rx.recv().await, Some(json!({ "foo": 1 })));
        assert_eq!(rx.recv().await, Some(json!([1, 2])));
        assert_eq!(rx.recv().await, Some(json!("text")));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_forward_lines_stops_when_receiver_gone() {
        let input: &[u8] = b"1\n2\n3\n";
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        assert_eq!(forward_lines(input, &tx).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_sequence() {
        let (tx, mut rx) = mpsc::channel(1);

        let ticker = tokio::spawn(async move { tick(Duration::from_millis(10), &tx).await });

        for expected in 0..3u64 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event["seq"], json!(expected));
            assert!(event["ts"].is_u64());
        }
        drop(rx);

        assert!(ticker.await.unwrap() >= 3);
    }
}
