//! Worker sessions.
//!
//! A [`WorkerSession`] is the bridge's view of one miner, identified by its
//! IP address. Getwork is stateless HTTP, so every request from the same
//! address lands on the same session no matter which TCP connection carried
//! it.
//!
//! All mutable state sits behind one lock per session. That lock is also the
//! single-fire gate for long-poll waiters: whoever removes a waiter's entry
//! from the slot map (a work update, a timeout or a cancellation) owns that
//! waiter's terminal transition.

use std::net::IpAddr;
use std::time::Instant;

use parking_lot::Mutex;
use slotmap::SlotMap;
use tokio::sync::oneshot;

use super::work::Work;
use crate::manager::Pool;

slotmap::new_key_type! {
    /// Removal handle for a registered long-poll waiter.
    pub struct WaiterKey;
}

/// One logical miner bound to a backend pool.
#[derive(Debug)]
pub struct WorkerSession {
    identity: IpAddr,
    created: Instant,
    state: Mutex<SessionState>,
}

#[derive(Debug, Default)]
struct SessionState {
    /// Usernames that authorized through this session, in first-seen order
    authorized_usernames: Vec<String>,

    pool: Option<Pool>,

    work: Option<Work>,

    /// Pending long polls, each woken at most once
    waiters: SlotMap<WaiterKey, oneshot::Sender<Work>>,
}

impl WorkerSession {
    pub fn new(identity: IpAddr) -> Self {
        Self {
            identity,
            created: Instant::now(),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Client address this session multiplexes.
    pub fn identity(&self) -> IpAddr {
        self.identity
    }

    /// Name used in logs and the status API.
    pub fn connection_name(&self) -> String {
        format!("getwork-{}", self.identity)
    }

    /// Time since the session was created.
    pub fn age(&self) -> std::time::Duration {
        self.created.elapsed()
    }

    /// Bind the session to a pool.
    pub fn rebind_to_pool(&self, pool: Pool) {
        self.state.lock().pool = Some(pool);
    }

    pub fn pool(&self) -> Option<Pool> {
        self.state.lock().pool.clone()
    }

    /// Record a username that passed authorization.
    ///
    /// Returns `false` if the name was already known.
    pub fn add_authorized_username(&self, username: &str) -> bool {
        let mut state = self.state.lock();
        if state.authorized_usernames.iter().any(|u| u == username) {
            return false;
        }
        state.authorized_usernames.push(username.to_string());
        true
    }

    pub fn is_authorized(&self, username: &str) -> bool {
        self.state
            .lock()
            .authorized_usernames
            .iter()
            .any(|u| u == username)
    }

    pub fn authorized_usernames(&self) -> Vec<String> {
        self.state.lock().authorized_usernames.clone()
    }

    /// Snapshot of the current work.
    pub fn work(&self) -> Option<Work> {
        self.state.lock().work.clone()
    }

    /// Current getwork payload.
    pub fn work_payload(&self) -> Option<String> {
        self.state.lock().work.as_ref().map(|w| w.data.clone())
    }

    /// Current share target.
    pub fn target(&self) -> Option<String> {
        self.state.lock().work.as_ref().map(|w| w.target.clone())
    }

    /// Install new work and wake every pending long poll with it.
    ///
    /// Storing the work and draining the waiters happen under one lock, so a
    /// waiter registering concurrently is either woken by this update or
    /// registers after it and waits for the next one.
    ///
    /// Returns the number of waiters that received the work.
    pub fn update_work(&self, work: Work) -> usize {
        let mut state = self.state.lock();
        state.work = Some(work.clone());
        state
            .waiters
            .drain()
            .filter(|(_, tx)| !tx.is_closed())
            .filter_map(|(_, tx)| tx.send(work.clone()).ok())
            .count()
    }

    /// Register a long-poll waiter.
    pub fn register_waiter(&self) -> (WaiterKey, oneshot::Receiver<Work>) {
        let (tx, rx) = oneshot::channel();
        let key = self.state.lock().waiters.insert(tx);
        (key, rx)
    }

    /// Deregister a waiter.
    ///
    /// Returns `true` if this call removed it; `false` if it was already
    /// fired or removed. Removing twice is harmless.
    pub fn remove_waiter(&self, key: WaiterKey) -> bool {
        self.state.lock().waiters.remove(key).is_some()
    }

    /// Drop every pending waiter without work. Their long polls end as
    /// abandoned.
    pub fn cancel_waiters(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.waiters.len();
        state.waiters.clear();
        count
    }

    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn session() -> WorkerSession {
        WorkerSession::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)))
    }

    #[test]
    fn test_usernames_are_append_only_and_deduplicated() {
        let session = session();
        assert!(session.add_authorized_username("alice.1"));
        assert!(session.add_authorized_username("alice.2"));
        assert!(!session.add_authorized_username("alice.1"));

        assert_eq!(session.authorized_usernames(), vec!["alice.1", "alice.2"]);
        assert!(session.is_authorized("alice.2"));
        assert!(!session.is_authorized("bob"));
    }

    #[test]
    fn test_work_accessors() {
        let session = session();
        assert_eq!(session.work(), None);

        session.update_work(Work::new("data", "target"));
        assert_eq!(session.work_payload().as_deref(), Some("data"));
        assert_eq!(session.target().as_deref(), Some("target"));
    }

    #[test]
    fn test_update_broadcasts_to_every_waiter() {
        let session = session();
        let (_, mut rx1) = session.register_waiter();
        let (_, mut rx2) = session.register_waiter();

        assert_eq!(session.update_work(Work::new("new", "t")), 2);
        assert_eq!(session.waiter_count(), 0);
        assert_eq!(rx1.try_recv().unwrap().data, "new");
        assert_eq!(rx2.try_recv().unwrap().data, "new");
    }

    #[test]
    fn test_waiter_registered_after_update_is_not_woken() {
        let session = session();
        let (_, mut before) = session.register_waiter();
        session.update_work(Work::new("first", "t"));
        let (_, mut after) = session.register_waiter();

        assert_eq!(before.try_recv().unwrap().data, "first");
        assert!(after.try_recv().is_err());
        assert_eq!(session.waiter_count(), 1);

        session.update_work(Work::new("second", "t"));
        assert_eq!(after.try_recv().unwrap().data, "second");
    }

    #[test]
    fn test_remove_waiter_is_idempotent() {
        let session = session();
        let (key, _rx) = session.register_waiter();

        assert!(session.remove_waiter(key));
        assert!(!session.remove_waiter(key));
        assert_eq!(session.update_work(Work::new("w", "t")), 0);
    }

    #[test]
    fn test_remove_after_fire_reports_already_claimed() {
        let session = session();
        let (key, _rx) = session.register_waiter();

        session.update_work(Work::new("w", "t"));
        assert!(!session.remove_waiter(key));
    }

    #[test]
    fn test_dropped_receivers_are_not_counted() {
        let session = session();
        let (_, rx) = session.register_waiter();
        let (_, _live) = session.register_waiter();
        drop(rx);

        assert_eq!(session.update_work(Work::new("w", "t")), 1);
        assert_eq!(session.waiter_count(), 0);
    }

    #[test]
    fn test_cancel_waiters_closes_channels() {
        let session = session();
        let (_, mut rx) = session.register_waiter();

        assert_eq!(session.cancel_waiters(), 1);
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }
}
