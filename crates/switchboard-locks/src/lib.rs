//! Per-conversation mutual exclusion with a bounded global work-in-flight cap.
//!
//! One conversation serializes strictly in arrival order; distinct
//! conversations run in parallel up to `max_concurrent`. Both the
//! per-conversation mutex and the global semaphore are tokio's fair (FIFO)
//! primitives, which is exactly the ordering contract callers rely on.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

/// Snapshot of the manager's current load.
#[derive(Debug, Clone, Serialize)]
pub struct LockStats {
    /// Tasks currently holding a global permit and running.
    pub active: usize,
    /// Tasks holding their conversation lock but waiting on the global cap.
    pub queued_global: usize,
    /// Conversations with tasks queued behind a holder, with queue depth.
    pub per_conversation_queue_depth: BTreeMap<String, usize>,
}

pub struct LockManager {
    locks: DashMap<String, Arc<Mutex<()>>>,
    global: Arc<Semaphore>,
    active: AtomicUsize,
    queued_global: AtomicUsize,
    waiting: DashMap<String, usize>,
}

impl LockManager {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            locks: DashMap::new(),
            global: Arc::new(Semaphore::new(max_concurrent.max(1))),
            active: AtomicUsize::new(0),
            queued_global: AtomicUsize::new(0),
            waiting: DashMap::new(),
        }
    }

    /// Run `task` while holding the conversation's lock and a global permit.
    ///
    /// The conversation lock is taken first so per-conversation FIFO holds
    /// even when the global cap is saturated. Both are released when the
    /// task completes, successfully or not.
    pub async fn run_exclusive<F, T>(&self, conversation_id: &str, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = self
            .locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        *self.waiting.entry(conversation_id.to_string()).or_insert(0) += 1;
        let _conv_guard = lock.lock().await;
        if let Some(mut w) = self.waiting.get_mut(conversation_id) {
            *w -= 1;
        }

        self.queued_global.fetch_add(1, Ordering::SeqCst);
        // The semaphore is never closed, so acquire can only succeed.
        let _permit = self
            .global
            .acquire()
            .await
            .unwrap_or_else(|_| unreachable!("lock manager semaphore closed"));
        self.queued_global.fetch_sub(1, Ordering::SeqCst);

        self.active.fetch_add(1, Ordering::SeqCst);
        debug!(conversation_id, "lock acquired");
        let _active_guard = Decrement(&self.active);

        task.await
    }

    pub fn stats(&self) -> LockStats {
        let per_conversation_queue_depth = self
            .waiting
            .iter()
            .filter(|e| *e.value() > 0)
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        LockStats {
            active: self.active.load(Ordering::SeqCst),
            queued_global: self.queued_global.load(Ordering::SeqCst),
            per_conversation_queue_depth,
        }
    }
}

/// Decrements the counter when dropped, so `active` stays correct even if
/// the task panics or is cancelled mid-await.
struct Decrement<'a>(&'a AtomicUsize);

impl Drop for Decrement<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
