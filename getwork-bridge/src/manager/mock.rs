//! Scripted manager for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Pool, ProxyManager};
use crate::error::{Error, Result};
use crate::getwork::{Credentials, Work, WorkerSession};

/// Manager whose answers are set by the test and whose calls are counted.
#[derive(Default)]
pub struct MockManager {
    pub subscribes: AtomicUsize,
    pub authorizes: AtomicUsize,
    pub disconnections: AtomicUsize,
    /// Usernames rejected by `on_authorize`
    pub rejected_users: Mutex<HashSet<String>>,
    /// Fail `on_subscribe` when set
    pub no_pool: Mutex<bool>,
    /// Rejection reason returned by `submit_work`
    pub submit_rejection: Mutex<Option<String>>,
    /// (username, data) pairs passed to `submit_work`
    pub submissions: Mutex<Vec<(String, String)>>,
    /// Delay inside `on_subscribe`, to widen race windows
    pub subscribe_delay: Duration,
    /// Work installed on subscribe
    pub initial_work: Option<Work>,
}

impl MockManager {
    pub fn new() -> Self {
        Self {
            initial_work: Some(Work::new("initial-data", "initial-target")),
            ..Default::default()
        }
    }

    pub fn reject_user(&self, username: &str) {
        self.rejected_users.lock().insert(username.to_string());
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn disconnection_count(&self) -> usize {
        self.disconnections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxyManager for MockManager {
    async fn on_subscribe(&self, session: &Arc<WorkerSession>) -> Result<Pool> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        if !self.subscribe_delay.is_zero() {
            tokio::time::sleep(self.subscribe_delay).await;
        }
        if *self.no_pool.lock() {
            return Err(Error::NoPoolAvailable("all pools down".into()));
        }
        if let Some(work) = &self.initial_work {
            session.update_work(work.clone());
        }
        Ok(Pool::new("mock", "stratum+tcp://mock:3333"))
    }

    async fn on_authorize(
        &self,
        _session: &Arc<WorkerSession>,
        credentials: &Credentials,
    ) -> Result<()> {
        self.authorizes.fetch_add(1, Ordering::SeqCst);
        if self.rejected_users.lock().contains(&credentials.username) {
            return Err(Error::Authorization(format!(
                "user {} rejected",
                credentials.username
            )));
        }
        Ok(())
    }

    async fn on_worker_disconnection(&self, _session: &Arc<WorkerSession>, _cause: &Error) {
        self.disconnections.fetch_add(1, Ordering::SeqCst);
    }

    async fn submit_work(
        &self,
        _session: &Arc<WorkerSession>,
        username: &str,
        data: &str,
    ) -> Option<String> {
        self.submissions
            .lock()
            .push((username.to_string(), data.to_string()));
        self.submit_rejection.lock().clone()
    }
}
