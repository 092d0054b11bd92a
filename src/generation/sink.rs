//! Outbound event channel between producers (jobs, stages) and one consumer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tracing::debug;

/// Default buffer between the producer and a slow consumer.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Ordered, closable event stream.
///
/// Once the consumer drops its receiver the sink goes quiet: later events are
/// discarded and producers keep running to completion.
pub struct EventSink<E> {
    sender: Option<Sender<E>>,
    connected: AtomicBool,
    delivered: AtomicU64,
}

impl<E: Send> EventSink<E> {
    pub fn new_pair(buffer: usize) -> (Self, Receiver<E>) {
        let (sender, receiver) = channel(buffer.max(1));
        (
            Self {
                sender: Some(sender),
                connected: AtomicBool::new(true),
                delivered: AtomicU64::new(0),
            },
            receiver,
        )
    }

    /// A sink without a consumer; every event is dropped.
    pub fn detached() -> Self {
        Self {
            sender: None,
            connected: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
        }
    }

    /// Deliver one event. Returns false once the consumer is gone.
    pub async fn emit(&self, event: impl Into<E>) -> bool {
        if !self.connected.load(Ordering::Acquire) {
            return false;
        }
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.send(event.into()).await {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                if self.connected.swap(false, Ordering::AcqRel) {
                    debug!("Event consumer disconnected; remaining events will be dropped");
                }
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut rx) = EventSink::<u32>::new_pair(8);
        for i in 0..5u32 {
            assert!(sink.emit(i).await);
        }
        drop(sink);
        let mut received = Vec::new();
        while let Some(v) = rx.recv().await {
            received.push(v);
        }
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_disconnect_goes_quiet() {
        let (sink, rx) = EventSink::<u32>::new_pair(8);
        assert!(sink.emit(1u32).await);
        drop(rx);
        assert!(!sink.emit(2u32).await);
        assert!(!sink.is_connected());
        assert!(!sink.emit(3u32).await);
        assert_eq!(sink.delivered(), 1);
    }

    #[tokio::test]
    async fn test_detached_sink_drops_everything() {
        let sink = EventSink::<u32>::detached();
        assert!(!sink.emit(1u32).await);
        assert_eq!(sink.delivered(), 0);
    }
}
