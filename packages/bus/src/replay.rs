//! Replaying fan-out backing one published entry.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use statebus_core::Notification;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Fan-out for a single entry: late subscribers first receive the retained
/// history, then live notifications, with neither gaps nor duplicates.
///
/// Live delivery goes through one bounded channel per subscriber, so a slow
/// subscriber holds back the entry's pump instead of missing notifications.
pub(crate) struct Replay {
    capacity: usize,
    live_capacity: usize,
    inner: Mutex<ReplayInner>,
}

#[derive(Default)]
struct ReplayInner {
    history: VecDeque<Notification>,
    subscribers: Vec<mpsc::Sender<Notification>>,
    finished: bool,
}

impl Replay {
    /// `capacity` notifications are retained for replay; `live_capacity`
    /// bounds how many live notifications wait for each subscriber.
    pub(crate) fn new(capacity: usize, live_capacity: usize) -> Self {
        Self {
            capacity,
            live_capacity: live_capacity.max(1),
            inner: Mutex::new(ReplayInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReplayInner> {
        // Nothing in the critical sections can leave the history half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `notification` and hand it to every current subscriber,
    /// waiting for room in their channels. Nothing is recorded after a
    /// terminal notification.
    pub(crate) async fn push(&self, notification: Notification) {
        let terminal = notification.is_terminal();
        let subscribers = {
            let mut inner = self.lock();
            if inner.finished {
                return;
            }
            if self.capacity > 0 {
                if inner.history.len() == self.capacity {
                    inner.history.pop_front();
                }
                inner.history.push_back(notification.clone());
            }
            if terminal {
                inner.finished = true;
                std::mem::take(&mut inner.subscribers)
            } else {
                inner.subscribers.clone()
            }
        };

        let mut dropped = false;
        for subscriber in &subscribers {
            dropped |= subscriber.send(notification.clone()).await.is_err();
        }
        if dropped && !terminal {
            self.lock()
                .subscribers
                .retain(|subscriber| !subscriber.is_closed());
        }
    }

    /// Subscribe: retained history followed by live notifications. The
    /// stream ends after the terminal notification.
    pub(crate) fn subscribe(&self) -> BoxStream<'static, Notification> {
        let (tx, rx) = mpsc::channel(self.live_capacity);
        let history: Vec<Notification> = {
            let mut inner = self.lock();
            if !inner.finished {
                inner.subscribers.push(tx);
            }
            inner.history.iter().cloned().collect()
        };

        stream::iter(history)
            .chain(ReceiverStream::new(rx))
            .boxed()
    }
}
