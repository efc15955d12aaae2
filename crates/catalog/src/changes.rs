//! Multicast change subject shared by all providers.
//!
//! Backed by a `tokio::sync::broadcast` channel: every subscriber owns a
//! bounded buffer, so a slow subscriber never blocks the producing thread.
//! When a subscriber's buffer overflows, the oldest events are dropped and
//! the subscriber receives [`ChangeMessage::Lagged`], the signal to treat
//! its local view as stale and re-query.

use crate::record::AssetChange;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Per-subscriber buffer capacity.
pub(crate) const CHANGE_BUFFER: usize = 256;

/// One message on a change subscription.
#[derive(Debug, Clone)]
pub enum ChangeMessage {
    Change(AssetChange),
    /// `missed` events were dropped because this subscriber fell behind.
    Lagged(u64),
}

/// Producer half of a provider's change stream.
#[derive(Clone)]
pub(crate) struct ChangeHub {
    tx: broadcast::Sender<AssetChange>,
}

impl ChangeHub {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_BUFFER);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> ChangeSubscription {
        ChangeSubscription { rx: self.tx.subscribe(), _retain: None }
    }

    /// Publish one change. A send error only means nobody is subscribed.
    pub(crate) fn publish(&self, change: AssetChange) {
        trace!(?change, "publish");
        let _ = self.tx.send(change);
    }
}

/// Consumer half of a change stream. The stream completes (recv returns
/// `None`) when the owning provider is dropped.
pub struct ChangeSubscription {
    rx: broadcast::Receiver<AssetChange>,
    /// Keeps composite upstream plumbing alive for as long as this
    /// subscription exists.
    _retain: Option<Arc<dyn Any + Send + Sync>>,
}

impl ChangeSubscription {
    pub(crate) fn with_retain(
        rx: broadcast::Receiver<AssetChange>,
        retain: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self { rx, _retain: Some(retain) }
    }

    /// A stream that is already complete.
    pub fn completed() -> Self {
        let (tx, rx) = broadcast::channel(1);
        drop(tx);
        Self { rx, _retain: None }
    }

    /// Await the next message; `None` means the stream completed.
    pub async fn recv(&mut self) -> Option<ChangeMessage> {
        match self.rx.recv().await {
            Ok(change) => Some(ChangeMessage::Change(change)),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                Some(ChangeMessage::Lagged(missed))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Blocking variant of [`recv`](Self::recv) for dedicated threads.
    pub fn blocking_recv(&mut self) -> Option<ChangeMessage> {
        match self.rx.blocking_recv() {
            Ok(change) => Some(ChangeMessage::Change(change)),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                Some(ChangeMessage::Lagged(missed))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ChangeKind;
    use crate::uri::AssetUri;

    fn change(rel: &str) -> AssetChange {
        AssetChange::added(AssetUri::new("T", rel).unwrap())
    }

    #[tokio::test]
    async fn each_subscriber_sees_the_full_sequence() {
        let hub = ChangeHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.publish(change("one"));
        hub.publish(change("two"));

        for sub in [&mut a, &mut b] {
            match sub.recv().await {
                Some(ChangeMessage::Change(c)) => assert_eq!(c.uri.relative(), "one"),
                other => panic!("unexpected {other:?}"),
            }
            match sub.recv().await {
                Some(ChangeMessage::Change(c)) => assert_eq!(c.uri.relative(), "two"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn stream_completes_when_hub_drops() {
        let hub = ChangeHub::new();
        let mut sub = hub.subscribe();
        hub.publish(change("only"));
        drop(hub);

        assert!(matches!(sub.recv().await, Some(ChangeMessage::Change(_))));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_gets_lag_signal_not_backpressure() {
        let hub = ChangeHub::new();
        let mut sub = hub.subscribe();
        for i in 0..(CHANGE_BUFFER + 10) {
            hub.publish(change(&format!("c{i}")));
        }
        match sub.recv().await {
            Some(ChangeMessage::Lagged(missed)) => assert!(missed >= 10),
            other => panic!("expected lag signal, got {other:?}"),
        }
        // After the signal, delivery resumes with the retained suffix.
        assert!(matches!(sub.recv().await, Some(ChangeMessage::Change(_))));
    }

    #[tokio::test]
    async fn completed_stream_is_empty() {
        let mut sub = ChangeSubscription::completed();
        assert!(sub.recv().await.is_none());
    }
}
