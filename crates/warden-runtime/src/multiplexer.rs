//! Compare multiplexer: fans one turn out to one run per policy bundle and
//! fans their events back into a single stream.
//!
//! Runs execute as independent tasks in a [`JoinSet`] and share nothing but
//! the read-only history snapshot, the model clients and the turn ledger.
//! Events of one run keep their order; runs interleave freely. The stream
//! closes once every run has emitted its `end`. A run that panics is
//! reported as that run's `error` and `end`; its siblings carry on.

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{FutureExt, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{info, warn};
use warden_core::events::{Node, RunEvent, RunEventKind, RunOutcome};
use warden_core::ids::{RunTag, ThreadId, TurnId};
use warden_core::messages::{Message, NewMessage};
use warden_core::policy::RunConfig;

use crate::conversation::TurnLedger;
use crate::orchestrator::{RunContext, TurnDeps, TurnOrchestrator};
use crate::registry::TurnGuard;
use crate::sink::EventSink;

type Joined = (RunTag, std::thread::Result<RunOutcome>);

/// Everything a turn needs once its thread and config are resolved.
#[derive(Clone, Debug)]
pub struct TurnPlan {
    /// Thread the turn belongs to.
    pub thread_id: ThreadId,
    /// Turn id.
    pub turn_id: TurnId,
    /// The human message.
    pub human_content: String,
    /// Validated run config.
    pub run_config: RunConfig,
    /// Thread history read at turn start.
    pub history: Vec<Message>,
}

/// The multiplexed event stream of one turn.
///
/// Dropping it cancels every run of the turn.
pub struct TurnStream {
    inner: ReceiverStream<RunEvent>,
    turn_id: TurnId,
    thread_id: ThreadId,
    _cancel_on_drop: DropGuard,
    _registration: Option<TurnGuard>,
}

impl TurnStream {
    /// Turn id.
    pub fn turn_id(&self) -> &TurnId {
        &self.turn_id
    }

    /// Thread id.
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Keep the turn registered for as long as the stream lives.
    #[must_use]
    pub fn with_registration(self, guard: TurnGuard) -> Self {
        Self {
            _registration: Some(guard),
            ..self
        }
    }
}

impl Stream for TurnStream {
    type Item = RunEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RunEvent>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Runs one orchestrator per bundle.
pub struct CompareMultiplexer {
    deps: Arc<TurnDeps>,
}

impl CompareMultiplexer {
    /// Multiplexer over shared collaborators.
    pub fn new(deps: Arc<TurnDeps>) -> Self {
        Self { deps }
    }

    /// Spawn every run of `plan`. Must be called inside a Tokio runtime.
    pub fn start(&self, plan: TurnPlan, cancel: CancellationToken) -> TurnStream {
        let (tx, rx) = mpsc::channel(self.deps.options.channel_capacity);
        let ledger = Arc::new(TurnLedger::new(
            plan.thread_id.clone(),
            NewMessage::human(plan.human_content),
        ));
        let history = Arc::new(plan.history);
        let compare = plan.run_config.is_compare();
        let bundles = plan.run_config.policy_bundles.len();

        let mut runs: JoinSet<Joined> = JoinSet::new();
        for bundle in plan.run_config.policy_bundles {
            let tag = bundle.tag.clone();
            let ctx = RunContext {
                thread_id: plan.thread_id.clone(),
                turn_id: plan.turn_id.clone(),
                stamp: compare.then(|| tag.clone()),
                bundle,
                history: Arc::clone(&history),
                ledger: Arc::clone(&ledger),
            };
            let orchestrator = TurnOrchestrator::new(Arc::clone(&self.deps), ctx);
            let sink = EventSink::new(tx.clone(), cancel.clone());
            let token = cancel.clone();
            let _ = runs.spawn(async move {
                let outcome = AssertUnwindSafe(orchestrator.run(sink, token))
                    .catch_unwind()
                    .await;
                (tag, outcome)
            });
        }
        info!(
            thread_id = %plan.thread_id,
            turn_id = %plan.turn_id,
            bundles,
            compare,
            "turn started"
        );

        drop(tokio::spawn(supervise(runs, tx, plan.turn_id.clone())));

        TurnStream {
            inner: ReceiverStream::new(rx),
            turn_id: plan.turn_id,
            thread_id: plan.thread_id,
            _cancel_on_drop: cancel.drop_guard(),
            _registration: None,
        }
    }
}

/// Await every run, standing in for runs that panicked.
async fn supervise(mut runs: JoinSet<Joined>, tx: mpsc::Sender<RunEvent>, turn_id: TurnId) {
    let mut finished = Vec::new();
    while let Some(joined) = runs.join_next().await {
        match joined {
            Ok((tag, Ok(outcome))) => finished.push((tag, outcome)),
            Ok((tag, Err(_))) => {
                warn!(%turn_id, run_tag = %tag, "run panicked");
                for kind in [
                    RunEventKind::Error {
                        category: "internal".into(),
                        message: "run task panicked".into(),
                    },
                    RunEventKind::End {
                        outcome: RunOutcome::Error,
                    },
                ] {
                    if tx.send(RunEvent::new(tag.clone(), Node::Gate, kind)).await.is_err() {
                        break;
                    }
                }
                finished.push((tag, RunOutcome::Error));
            }
            Err(e) => warn!(%turn_id, error = %e, "run task did not complete"),
        }
    }
    info!(%turn_id, outcomes = ?finished, "turn finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panicked() -> std::thread::Result<RunOutcome> {
        Err(Box::new("boom"))
    }

    #[tokio::test]
    async fn panicked_run_is_closed_with_error_and_end() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut runs: JoinSet<Joined> = JoinSet::new();
        let _ = runs.spawn(async { (RunTag::from("strict"), panicked()) });
        let _ = runs.spawn(async { (RunTag::from("lenient"), Ok(RunOutcome::Done)) });

        supervise(runs, tx, TurnId::new()).await;

        let mut frames = Vec::new();
        while let Some(event) = rx.recv().await {
            frames.push(event);
        }
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|e| e.run_tag.as_str() == "strict"));
        assert!(frames[0].is_error());
        assert_eq!(
            frames[1].kind,
            RunEventKind::End {
                outcome: RunOutcome::Error
            }
        );
    }

    #[tokio::test]
    async fn supervisor_finishes_without_a_consumer() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut runs: JoinSet<Joined> = JoinSet::new();
        let _ = runs.spawn(async { (RunTag::from("strict"), panicked()) });
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            supervise(runs, tx, TurnId::new()),
        )
        .await
        .unwrap();
    }
}
