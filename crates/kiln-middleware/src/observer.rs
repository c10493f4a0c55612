//! Observer sinks: anything that can accept serialized status messages.
//!
//! The watcher only needs to push a string and to know whether the other end
//! is still there.  Transport (WebSocket, SSE, a terminal printer) lives
//! behind this trait.

use kiln_types::KilnError;
use tokio::sync::{broadcast, mpsc};

/// Destination for snapshot and backlog messages.
pub trait ObserverSink: Send + Sync {
    /// Deliver one JSON message.
    ///
    /// An `Err` tells the watcher to drop this observer.
    fn send(&self, message: &str) -> Result<(), KilnError>;

    /// `false` once the remote end has gone away.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Sink backed by an unbounded tokio channel.
///
/// ```
/// use kiln_middleware::observer::{ChannelSink, ObserverSink};
///
/// let (sink, mut rx) = ChannelSink::new();
/// sink.send("{}").unwrap();
/// assert_eq!(rx.try_recv().unwrap(), "{}");
/// ```
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ObserverSink for ChannelSink {
    fn send(&self, message: &str) -> Result<(), KilnError> {
        self.tx
            .send(message.to_string())
            .map_err(|_| KilnError::ObserverClosed)
    }

    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Fan-out to every subscriber of a broadcast channel.  Considered
/// disconnected once the last subscriber is gone.
impl ObserverSink for broadcast::Sender<String> {
    fn send(&self, message: &str) -> Result<(), KilnError> {
        broadcast::Sender::send(self, message.to_string())
            .map(|_| ())
            .map_err(|_| KilnError::ObserverClosed)
    }

    fn is_connected(&self) -> bool {
        self.receiver_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_reports_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        assert!(sink.is_connected());
        drop(rx);
        assert!(!sink.is_connected());
        assert_eq!(sink.send("x"), Err(KilnError::ObserverClosed));
    }

    #[test]
    fn broadcast_sender_is_a_sink() {
        let (tx, mut rx) = broadcast::channel::<String>(4);
        assert!(ObserverSink::is_connected(&tx));
        ObserverSink::send(&tx, "hello").unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hello");
        drop(rx);
        assert!(!ObserverSink::is_connected(&tx));
        assert!(ObserverSink::send(&tx, "late").is_err());
    }
}
