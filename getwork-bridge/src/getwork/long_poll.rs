//! Long-poll waiters.
//!
//! A long poll parks the HTTP exchange until the session receives new work,
//! the ceiling elapses, or the client goes away. Exactly one of those ends
//! the wait:
//!
//! ```text
//!              update_work()        +-----------+
//!           +--------------------->| Fulfilled |
//!           |                      +-----------+
//! +---------+  ceiling elapsed      +-----------+
//! | Pending |--------------------->| TimedOut  |
//! +---------+                      +-----------+
//!           |  handler dropped      +-----------+
//!           +--------------------->| Cancelled |
//!                                  +-----------+
//! ```
//!
//! Cancellation needs no signal of its own: when the client disconnects the
//! HTTP server drops the handler future, and with it the [`LongPoll`], whose
//! `Drop` deregisters the waiter. Timeout and fulfillment race through
//! [`WorkerSession::remove_waiter`]; if the timeout loses, the work that was
//! already sent is picked up instead of being dropped.

use std::sync::Arc;
use std::time::Duration;

use strum::Display;
use tokio::sync::oneshot;

use super::session::{WaiterKey, WorkerSession};
use super::work::Work;
use crate::tracing::prelude::*;

/// How a long poll ended.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum LongPollOutcome {
    /// New work arrived.
    Fulfilled(Work),
    /// The ceiling elapsed first.
    TimedOut,
    /// The session dropped its waiters without work (e.g. on eviction).
    Abandoned,
}

/// A registered, not yet resolved long poll.
pub struct LongPoll {
    session: Arc<WorkerSession>,
    username: String,
    key: WaiterKey,
    rx: oneshot::Receiver<Work>,
    resolved: bool,
}

impl LongPoll {
    /// Register a waiter on the session.
    pub fn register(session: Arc<WorkerSession>, username: impl Into<String>) -> Self {
        let (key, rx) = session.register_waiter();
        Self {
            session,
            username: username.into(),
            key,
            rx,
            resolved: false,
        }
    }

    /// Wait for new work, at most `ceiling`.
    pub async fn wait(mut self, ceiling: Duration) -> LongPollOutcome {
        let outcome = match tokio::time::timeout(ceiling, &mut self.rx).await {
            Ok(Ok(work)) => LongPollOutcome::Fulfilled(work),
            Ok(Err(_)) => LongPollOutcome::Abandoned,
            Err(_) => {
                if self.session.remove_waiter(self.key) {
                    LongPollOutcome::TimedOut
                } else {
                    // An update claimed the waiter between the timer firing
                    // and our removal; its work is already in the channel.
                    match self.rx.try_recv() {
                        Ok(work) => LongPollOutcome::Fulfilled(work),
                        Err(_) => LongPollOutcome::Abandoned,
                    }
                }
            }
        };
        self.resolved = true;

        debug!(
            client = %self.session.identity(),
            user = %self.username,
            outcome = %outcome,
            "Long-polling request over."
        );
        outcome
    }
}

impl Drop for LongPoll {
    fn drop(&mut self) {
        if !self.resolved && self.session.remove_waiter(self.key) {
            info!(
                client = %self.session.identity(),
                user = %self.username,
                "Long-polling request cancelled."
            );
        }
    }
}
