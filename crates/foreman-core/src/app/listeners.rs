//! Completion listeners: downstream consumers of `IssueCompletionEvent`.
//!
//! Listeners are called in subscription order. A failing listener is logged
//! and skipped; it never stops the others or the sweep that fired the event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::warn;

use crate::domain::IssueCompletionEvent;

#[async_trait]
pub trait CompletionListener: Send + Sync {
    async fn on_issue_completion(&self, event: &IssueCompletionEvent) -> anyhow::Result<()>;
}

/// Returned by `subscribe`; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

#[derive(Default)]
pub struct CompletionListeners {
    next_handle: AtomicU64,
    entries: Mutex<Vec<(ListenerHandle, Arc<dyn CompletionListener>)>>,
}

impl CompletionListeners {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<(ListenerHandle, Arc<dyn CompletionListener>)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, listener: Arc<dyn CompletionListener>) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.entries().push((handle, listener));
        handle
    }

    /// Returns false when the handle was not (or no longer) registered.
    pub fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(h, _)| *h != handle);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Deliver `event` to every listener. Returns how many failed.
    pub async fn notify(&self, event: &IssueCompletionEvent) -> usize {
        // Snapshot so listeners may (un)subscribe while being called.
        let snapshot: Vec<_> = self.entries().iter().map(|(_, l)| Arc::clone(l)).collect();

        let mut failures = 0;
        for listener in snapshot {
            if let Err(err) = listener.on_issue_completion(event).await {
                failures += 1;
                warn!(
                    issue_id = %event.issue.id,
                    error = %err,
                    "completion listener failed"
                );
            }
        }
        failures
    }
}
