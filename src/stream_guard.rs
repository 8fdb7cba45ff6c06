//! Process-wide registry of active conversation streams.
//!
//! Exactly one token stream may be in flight per session: streaming
//! appends assistant output incrementally, and two concurrent streams
//! would interleave it non-deterministically.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct StreamGuard {
    active: Arc<Mutex<HashSet<String>>>,
}

impl StreamGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically registers `session_id` as streaming. Returns `None` if a
    /// stream is already active for that session. The test and the insert
    /// happen under one lock, so two callers cannot both observe "absent".
    pub fn try_acquire(&self, session_id: &str) -> Option<StreamPermit> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if active.insert(session_id.to_string()) {
            Some(StreamPermit {
                guard: self.clone(),
                session_id: session_id.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(session_id)
    }

    fn release(&self, session_id: &str) {
        // Removing an absent entry is a no-op.
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(session_id);
    }
}

/// Scoped acquisition: the lock is released when the permit drops, on
/// every exit path — completion, upstream failure, or client disconnect.
pub struct StreamPermit {
    guard: StreamGuard,
    session_id: String,
}

impl StreamPermit {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for StreamPermit {
    fn drop(&mut self) {
        self.guard.release(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let guard = StreamGuard::new();
        let permit = guard.try_acquire("s1").expect("first acquire succeeds");
        assert!(guard.try_acquire("s1").is_none());
        assert!(guard.is_active("s1"));

        drop(permit);
        assert!(!guard.is_active("s1"));
        assert!(guard.try_acquire("s1").is_some());
    }

    #[test]
    fn distinct_sessions_do_not_contend() {
        let guard = StreamGuard::new();
        let _a = guard.try_acquire("s1").unwrap();
        let _b = guard.try_acquire("s2").unwrap();
        assert!(guard.is_active("s1"));
        assert!(guard.is_active("s2"));
    }

    #[test]
    fn permit_drop_releases_on_panic_path() {
        let guard = StreamGuard::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _permit = guard.try_acquire("s1").unwrap();
            panic!("simulated mid-stream failure");
        }));
        assert!(result.is_err());
        assert!(!guard.is_active("s1"));
    }

    #[tokio::test]
    async fn exactly_one_winner_among_concurrent_acquires() {
        let guard = StreamGuard::new();
        // Winning permits are parked in the channel so no task releases
        // before all acquires have been attempted.
        let (won_tx, mut won_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let guard = guard.clone();
            let won_tx = won_tx.clone();
            handles.push(tokio::spawn(async move {
                if let Some(permit) = guard.try_acquire("s1") {
                    won_tx.send(permit).unwrap();
                }
            }));
        }
        drop(won_tx);
        for h in handles {
            h.await.unwrap();
        }

        let mut winners = 0;
        while let Some(permit) = won_rx.recv().await {
            winners += 1;
            drop(permit);
        }
        assert_eq!(winners, 1);
        assert!(!guard.is_active("s1"));
        assert!(guard.try_acquire("s1").is_some());
    }

    #[tokio::test]
    async fn single_winner_while_permit_is_held() {
        let guard = StreamGuard::new();
        let _held = guard.try_acquire("s1").unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = guard.clone();
            handles.push(tokio::spawn(async move {
                guard.try_acquire("s1").is_some()
            }));
        }
        for h in handles {
            assert!(!h.await.unwrap(), "no acquire may succeed while held");
        }
    }
}
