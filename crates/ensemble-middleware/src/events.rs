//! Named condition signals shared by every controller in the process.
//!
//! A controller that receives a goal with `condition = "<event>"` blocks on
//! [`EventBoard::wait_for`] until whichever component observes `<event>`
//! calls [`EventBoard::signal`].  Each event name owns a
//! [`tokio::sync::watch`] channel, so waiters are woken by the writer
//! instead of polling a shared variable.
//!
//! At most one event is raised at a time: signalling an event lowers the
//! previously raised one, so a gate passes only while its event is the most
//! recently observed.  A raised event stays up until another event is
//! signalled or [`EventBoard::clear`] lowers it; a waiter that arrives in
//! between returns immediately.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use ensemble_middleware::EventBoard;
//!
//! #[tokio::main]
//! async fn main() {
//!     let board = EventBoard::new();
//!     board.signal("speech_finished");
//!     board
//!         .wait_for("speech_finished", Some(Duration::from_millis(10)))
//!         .await
//!         .unwrap();
//!     assert_eq!(board.last_event().as_deref(), Some("speech_finished"));
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ensemble_types::{ActionError, millis};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// Cheaply cloneable handle; all clones share the same signal table.
#[derive(Clone, Debug)]
pub struct EventBoard {
    inner: Arc<BoardInner>,
}

#[derive(Debug)]
struct BoardInner {
    signals: Mutex<HashMap<String, watch::Sender<bool>>>,
    last: watch::Sender<Option<String>>,
}

impl EventBoard {
    pub fn new() -> Self {
        let (last, _) = watch::channel(None);
        Self {
            inner: Arc::new(BoardInner {
                signals: Mutex::new(HashMap::new()),
                last,
            }),
        }
    }

    /// Raise `event`, lowering whichever event was raised before, and record
    /// it as the most recently observed event.
    pub fn signal(&self, event: &str) {
        let mut signals = self.inner.signals.lock();
        for (name, sender) in signals.iter() {
            if name != event {
                sender.send_if_modified(|raised| std::mem::take(raised));
            }
        }
        signals
            .entry(event.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .send_replace(true);
        self.inner.last.send_replace(Some(event.to_string()));
        drop(signals);
        debug!(event, "condition event signalled");
    }

    /// Lower `event` so later waiters block until it is signalled again.
    pub fn clear(&self, event: &str) {
        if let Some(sender) = self.inner.signals.lock().get(event) {
            sender.send_replace(false);
        }
    }

    pub fn is_raised(&self, event: &str) -> bool {
        self.inner
            .signals
            .lock()
            .get(event)
            .is_some_and(|sender| *sender.borrow())
    }

    /// The most recently signalled event name, if any.
    pub fn last_event(&self) -> Option<String> {
        self.inner.last.borrow().clone()
    }

    /// Block until `event` is raised.
    ///
    /// `timeout = None` waits forever.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::ConditionTimeout`] when `timeout` elapses first.
    pub async fn wait_for(&self, event: &str, timeout: Option<Duration>) -> Result<(), ActionError> {
        let mut rx = self.sender_for(event).subscribe();
        let raised = async move {
            rx.wait_for(|raised| *raised)
                .await
                .map(|_| ())
                .map_err(|e| ActionError::Transport(format!("event board closed: {e}")))
        };

        match timeout {
            None => raised.await,
            Some(limit) => tokio::time::timeout(limit, raised)
                .await
                .map_err(|_| ActionError::ConditionTimeout {
                    event: event.to_string(),
                    after_ms: millis(limit),
                })?,
        }
    }

    fn sender_for(&self, event: &str) -> watch::Sender<bool> {
        self.inner
            .signals
            .lock()
            .entry(event.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .clone()
    }
}

impl Default for EventBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiter_wakes_when_event_is_signalled() {
        let board = EventBoard::new();
        let waiter = {
            let board = board.clone();
            tokio::spawn(async move { board.wait_for("door_open", None).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        board.signal("door_open");
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn raised_event_satisfies_late_waiters() {
        let board = EventBoard::new();
        board.signal("greeting_done");
        board
            .wait_for("greeting_done", Some(Duration::from_millis(10)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_times_out_with_condition_error() {
        let board = EventBoard::new();
        let err = board
            .wait_for("never", Some(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ActionError::ConditionTimeout {
                event: "never".into(),
                after_ms: 30
            }
        );
    }

    #[tokio::test]
    async fn other_events_do_not_release_waiter() {
        let board = EventBoard::new();
        board.signal("face_detected");
        let result = board
            .wait_for("speech_detected", Some(Duration::from_millis(30)))
            .await;
        assert!(result.is_err());
        assert_eq!(board.last_event().as_deref(), Some("face_detected"));
    }

    #[tokio::test]
    async fn later_event_lowers_earlier_one() {
        let board = EventBoard::new();
        board.signal("face_seen");
        board.signal("face_lost");

        assert!(!board.is_raised("face_seen"));
        assert!(board.is_raised("face_lost"));
        assert_eq!(board.last_event().as_deref(), Some("face_lost"));
        assert!(board
            .wait_for("face_seen", Some(Duration::from_millis(30)))
            .await
            .is_err());

        board.signal("face_seen");
        board
            .wait_for("face_seen", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(!board.is_raised("face_lost"));
    }

    #[test]
    fn clear_lowers_event() {
        let board = EventBoard::new();
        board.signal("x");
        assert!(board.is_raised("x"));
        board.clear("x");
        assert!(!board.is_raised("x"));
        assert!(!board.is_raised("unknown"));
    }
}
