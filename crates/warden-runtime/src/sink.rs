//! Outbound side of a run: a bounded channel shared by every run of a turn.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use warden_core::events::RunEvent;

use crate::errors::RunError;

/// Sends one run's events towards the client.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::Sender<RunEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    /// Wrap a channel sender; `cancel` interrupts sends blocked on a full channel.
    pub fn new(tx: mpsc::Sender<RunEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Send an event, waiting for capacity.
    ///
    /// Fails with [`RunError::Cancelled`] once the consumer is gone or the
    /// turn is cancelled.
    pub async fn emit(&self, event: RunEvent) -> Result<(), RunError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(RunError::Cancelled),
            sent = self.tx.send(event) => sent.map_err(|_| RunError::Cancelled),
        }
    }

    /// Send a terminal event regardless of cancellation.
    ///
    /// Waits for capacity while the consumer is still attached, so a slow
    /// reader always sees the run's `end`. Returns `false` once the consumer
    /// has gone away.
    pub async fn emit_terminal(&self, event: RunEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Closed(_)) => false,
            Err(TrySendError::Full(event)) => self.tx.send(event).await.is_ok(),
        }
    }

    /// Whether the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use warden_core::events::{Node, RunEventKind, RunOutcome};
    use warden_core::ids::RunTag;

    fn end() -> RunEvent {
        RunEvent::new(
            RunTag::default_tag(),
            Node::Gate,
            RunEventKind::End {
                outcome: RunOutcome::Error,
            },
        )
    }

    #[tokio::test]
    async fn emit_fails_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        let sink = EventSink::new(tx, CancellationToken::new());
        drop(rx);
        assert!(sink.is_closed());
        assert_matches!(sink.emit(end()).await, Err(RunError::Cancelled));
    }

    #[tokio::test]
    async fn emit_on_full_channel_unblocks_on_cancel() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = EventSink::new(tx, cancel.clone());
        sink.emit(end()).await.unwrap();

        let blocked = tokio::spawn({
            let sink = sink.clone();
            async move { sink.emit(end()).await }
        });
        cancel.cancel();
        assert_matches!(blocked.await.unwrap(), Err(RunError::Cancelled));
    }

    #[tokio::test]
    async fn terminal_after_cancel_uses_spare_capacity() {
        let (tx, mut rx) = mpsc::channel(2);
        let cancel = CancellationToken::new();
        let sink = EventSink::new(tx, cancel.clone());
        cancel.cancel();
        assert!(sink.emit_terminal(end()).await);
        assert!(rx.recv().await.unwrap().is_end());
    }

    #[tokio::test]
    async fn terminal_after_cancel_waits_for_a_slow_reader() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = EventSink::new(tx, cancel.clone());
        sink.emit(end()).await.unwrap();
        cancel.cancel();

        let terminal = tokio::spawn({
            let sink = sink.clone();
            async move { sink.emit_terminal(end()).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!terminal.is_finished());

        assert!(rx.recv().await.unwrap().is_end());
        assert!(terminal.await.unwrap());
        assert!(rx.recv().await.unwrap().is_end());
    }

    #[tokio::test]
    async fn terminal_on_full_channel_gives_up_when_reader_leaves() {
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = EventSink::new(tx, cancel.clone());
        sink.emit(end()).await.unwrap();
        cancel.cancel();

        let terminal = tokio::spawn({
            let sink = sink.clone();
            async move { sink.emit_terminal(end()).await }
        });
        drop(rx);
        assert!(!terminal.await.unwrap());
    }
}
