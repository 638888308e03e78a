//! Backend session management.
//!
//! The bridge does not talk to pools itself. It hands every worker session to
//! a [`ProxyManager`], which binds it to a pool, decides whether credentials
//! are acceptable, forwards submitted shares, and pushes new work back into
//! the session through [`WorkerSession::update_work`].
//!
//! The manager receives an `Arc` to each session it subscribes and may keep a
//! back-reference to it, but the session's lifetime belongs to the
//! connection registry. Managers should hold `Weak` references.

pub mod local;
#[cfg(test)]
pub(crate) mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::getwork::{Credentials, WorkerSession};

/// A pool a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pool {
    /// Human-readable pool name
    pub name: String,

    /// Pool URL (stratum+tcp://...)
    pub url: String,
}

impl Pool {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Backend the bridge drives on behalf of getwork workers.
#[async_trait]
pub trait ProxyManager: Send + Sync {
    /// Bind a freshly created session to a pool.
    ///
    /// Called once per session, before it is registered. Fails with
    /// [`Error::NoPoolAvailable`], [`Error::ExtranonceChangeUnsupported`] or
    /// [`Error::TooManyWorkers`].
    async fn on_subscribe(&self, session: &Arc<WorkerSession>) -> Result<Pool>;

    /// Check credentials for a request on this session.
    ///
    /// Called on every request. Fails with [`Error::Authorization`].
    async fn on_authorize(
        &self,
        session: &Arc<WorkerSession>,
        credentials: &Credentials,
    ) -> Result<()>;

    /// The session has been evicted and will not be used again.
    async fn on_worker_disconnection(&self, session: &Arc<WorkerSession>, cause: &Error);

    /// Submit solved work for `username`.
    ///
    /// Returns `None` when the share was accepted, or the rejection reason.
    async fn submit_work(
        &self,
        session: &Arc<WorkerSession>,
        username: &str,
        data: &str,
    ) -> Option<String>;
}
