//! Deduplicating work queue of cluster names.
//!
//! A name is handed to at most one worker at a time. Adding a name that is
//! already queued is a no-op; adding one that is being processed queues it
//! again once [`WorkQueue::done`] is called.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shut_down: bool,
}

#[derive(Default)]
pub(crate) struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, name: &str) {
        let mut state = self.lock();
        if state.shut_down || !state.dirty.insert(name.to_string()) {
            return;
        }
        if !state.processing.contains(name) {
            state.queue.push_back(name.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Waits for the next name. `None` once shut down.
    pub(crate) async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if state.shut_down {
                    return None;
                }
                if let Some(name) = state.queue.pop_front() {
                    state.dirty.remove(&name);
                    state.processing.insert(name.clone());
                    return Some(name);
                }
            }
            notified.await;
        }
    }

    pub(crate) fn done(&self, name: &str) {
        let mut state = self.lock();
        state.processing.remove(name);
        if state.dirty.contains(name) && !state.shut_down {
            state.queue.push_back(name.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub(crate) fn shut_down(&self) {
        self.lock().shut_down = true;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deduplicates_queued_names() {
        let queue = WorkQueue::default();
        queue.add("c1");
        queue.add("c1");
        queue.add("c2");
        assert_eq!(queue.get().await.as_deref(), Some("c1"));
        assert_eq!(queue.get().await.as_deref(), Some("c2"));
        queue.shut_down();
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn requeues_name_added_while_processing() {
        let queue = WorkQueue::default();
        queue.add("c1");
        assert_eq!(queue.get().await.as_deref(), Some("c1"));

        queue.add("c1");
        queue.add("c2");
        assert_eq!(queue.get().await.as_deref(), Some("c2"));

        queue.done("c1");
        assert_eq!(queue.get().await.as_deref(), Some("c1"));
    }
}
