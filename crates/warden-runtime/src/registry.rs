//! Live turns and their cancellation tokens.

use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use warden_core::ids::TurnId;

/// Maps live turn ids to the token that cancels every run of the turn.
#[derive(Debug, Default)]
pub struct TurnRegistry {
    turns: DashMap<TurnId, CancellationToken>,
}

impl TurnRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a turn until the returned guard is dropped.
    pub fn register(self: &Arc<Self>, turn_id: TurnId, cancel: CancellationToken) -> TurnGuard {
        let _ = self.turns.insert(turn_id.clone(), cancel);
        debug!(%turn_id, active = self.turns.len(), "turn registered");
        TurnGuard {
            registry: Arc::clone(self),
            turn_id,
        }
    }

    /// Cancel every run of a live turn. Returns whether the turn was live.
    pub fn abort(&self, turn_id: &TurnId) -> bool {
        match self.turns.get(turn_id) {
            Some(entry) => {
                entry.value().cancel();
                info!(%turn_id, "turn aborted");
                true
            }
            None => false,
        }
    }

    /// Cancel every live turn; returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in &self.turns {
            entry.value().cancel();
            cancelled += 1;
        }
        if cancelled > 0 {
            info!(cancelled, "cancelled all live turns");
        }
        cancelled
    }

    /// Number of live turns.
    pub fn active_count(&self) -> usize {
        self.turns.len()
    }

    /// Whether `turn_id` is live.
    pub fn contains(&self, turn_id: &TurnId) -> bool {
        self.turns.contains_key(turn_id)
    }
}

/// Removes its turn from the registry on drop.
#[derive(Debug)]
pub struct TurnGuard {
    registry: Arc<TurnRegistry>,
    turn_id: TurnId,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let _ = self.registry.turns.remove(&self.turn_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_cancels_only_that_turn() {
        let registry = Arc::new(TurnRegistry::new());
        let (a, b) = (TurnId::new(), TurnId::new());
        let (ta, tb) = (CancellationToken::new(), CancellationToken::new());
        let _ga = registry.register(a.clone(), ta.clone());
        let _gb = registry.register(b.clone(), tb.clone());

        assert!(registry.abort(&a));
        assert!(ta.is_cancelled());
        assert!(!tb.is_cancelled());
        assert!(!registry.abort(&TurnId::new()));
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn guard_drop_unregisters() {
        let registry = Arc::new(TurnRegistry::new());
        let id = TurnId::new();
        let guard = registry.register(id.clone(), CancellationToken::new());
        assert!(registry.contains(&id));
        drop(guard);
        assert!(!registry.contains(&id));
        assert!(!registry.abort(&id));
    }

    #[test]
    fn cancel_all_reaches_every_turn() {
        let registry = Arc::new(TurnRegistry::new());
        let tokens: Vec<_> = (0..3).map(|_| CancellationToken::new()).collect();
        let _guards: Vec<_> = tokens
            .iter()
            .map(|t| registry.register(TurnId::new(), t.clone()))
            .collect();
        assert_eq!(registry.cancel_all(), 3);
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }
}
