//! Connection registry: client address to worker session.
//!
//! Each address owns a slot guarded by an async mutex. Resolving a request
//! holds that slot for the whole subscribe/authorize sequence, which gives
//! two guarantees:
//!
//! - concurrent first contacts from one address create one session and make
//!   one `on_subscribe` call;
//! - an eviction can't interleave with a creation for the same address.
//!
//! The outer map lock is only held to look up or remove a slot, never across
//! a backend call, so different addresses don't wait on each other.
//!
//! An evicted slot is removed from the map. A task that was queued on it
//! notices the slot is no longer current and starts over with a fresh one.
//!
//! Resolution and eviction run on their own task. An HTTP handler dropped
//! mid-request (client gone) therefore never leaves the backend with a
//! subscribed session the registry doesn't know about, or an eviction the
//! backend was never told of.
//!
//! Readers (`get`, `sessions`, the status API) use a separate index of live
//! sessions and never wait on a slot held across a backend call.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::credentials::Credentials;
use super::session::WorkerSession;
use crate::error::{Error, Result};
use crate::manager::ProxyManager;
use crate::tracing::prelude::*;

type Slot = tokio::sync::Mutex<Option<Arc<WorkerSession>>>;

/// Registry of live worker sessions, keyed by client address.
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    manager: Arc<dyn ProxyManager>,
    slots: Mutex<HashMap<IpAddr, Arc<Slot>>>,
    /// Sessions stored in a slot, mirrored for lock-free readers
    live: Mutex<HashMap<IpAddr, Arc<WorkerSession>>>,
}

impl ConnectionRegistry {
    pub fn new(manager: Arc<dyn ProxyManager>) -> Self {
        Self {
            inner: Arc::new(Inner {
                manager,
                slots: Mutex::new(HashMap::new()),
                live: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Find or create the session for `identity` and authorize
    /// `credentials` on it.
    ///
    /// A new session is subscribed and bound to a pool before it becomes
    /// visible. Authorization runs on every call; when it fails the session
    /// is evicted (even if it was authorized before), the manager is told,
    /// and the error is returned.
    ///
    /// Runs to completion even if the returned future is dropped.
    pub async fn resolve(
        &self,
        identity: IpAddr,
        credentials: &Credentials,
    ) -> Result<Arc<WorkerSession>> {
        let inner = self.inner.clone();
        let credentials = credentials.clone();
        tokio::spawn(async move { inner.resolve(identity, &credentials).await }).await?
    }

    /// Evict the session for `identity`, if any, telling the manager why.
    ///
    /// Pending long polls of the session end without work. Returns `false`
    /// when there was no session to evict. Runs to completion even if the
    /// returned future is dropped.
    pub async fn evict(&self, identity: IpAddr, cause: Error) -> Result<bool> {
        let inner = self.inner.clone();
        Ok(tokio::spawn(async move { inner.evict(identity, cause).await }).await?)
    }

    /// Session for `identity`, if one is live.
    pub fn get(&self, identity: IpAddr) -> Option<Arc<WorkerSession>> {
        self.inner.live.lock().get(&identity).cloned()
    }

    pub fn contains(&self, identity: IpAddr) -> bool {
        self.inner.live.lock().contains_key(&identity)
    }

    /// Snapshot of all live sessions.
    pub fn sessions(&self) -> Vec<Arc<WorkerSession>> {
        self.inner.live.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    async fn resolve(
        &self,
        identity: IpAddr,
        credentials: &Credentials,
    ) -> Result<Arc<WorkerSession>> {
        loop {
            let slot = self.slot(identity);
            let mut entry = slot.lock().await;
            if !self.is_current(identity, &slot) {
                continue;
            }

            let session = match entry.as_ref() {
                Some(session) => session.clone(),
                None => {
                    debug!(client = %identity, "No existing getwork session for address.");
                    let session = Arc::new(WorkerSession::new(identity));
                    match self.manager.on_subscribe(&session).await {
                        Ok(pool) => {
                            info!(
                                session = %session.connection_name(),
                                pool = %pool.name,
                                "New getwork session."
                            );
                            session.rebind_to_pool(pool);
                        }
                        Err(e) => {
                            self.remove_slot(identity, &slot);
                            return Err(e);
                        }
                    }
                    *entry = Some(session.clone());
                    self.live.lock().insert(identity, session.clone());
                    session
                }
            };

            if let Err(e) = self.manager.on_authorize(&session, credentials).await {
                *entry = None;
                self.forget(identity, &slot, &session);
                drop(entry);

                warn!(
                    session = %session.connection_name(),
                    user = %credentials.username,
                    "Authorization failed; evicting session."
                );
                self.disconnect(&session, &e).await;
                return Err(e);
            }

            if session.add_authorized_username(&credentials.username) {
                debug!(
                    client = %identity,
                    user = %credentials.username,
                    "Username authorized on session."
                );
            }
            return Ok(session);
        }
    }

    async fn evict(&self, identity: IpAddr, cause: Error) -> bool {
        let Some(slot) = self.slots.lock().get(&identity).cloned() else {
            return false;
        };
        let mut entry = slot.lock().await;
        let Some(session) = entry.take() else {
            return false;
        };
        self.forget(identity, &slot, &session);
        drop(entry);

        self.disconnect(&session, &cause).await;
        true
    }

    async fn disconnect(&self, session: &Arc<WorkerSession>, cause: &Error) {
        let cancelled = session.cancel_waiters();
        info!(
            session = %session.connection_name(),
            cause = %cause,
            cancelled_long_polls = cancelled,
            "Evicted getwork session."
        );
        self.manager.on_worker_disconnection(session, cause).await;
    }

    fn slot(&self, identity: IpAddr) -> Arc<Slot> {
        self.slots
            .lock()
            .entry(identity)
            .or_insert_with(|| Arc::new(Slot::new(None)))
            .clone()
    }

    fn is_current(&self, identity: IpAddr, slot: &Arc<Slot>) -> bool {
        self.slots
            .lock()
            .get(&identity)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    fn remove_slot(&self, identity: IpAddr, slot: &Arc<Slot>) {
        let mut slots = self.slots.lock();
        if slots
            .get(&identity)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(&identity);
        }
    }

    // Caller holds the slot lock.
    fn forget(&self, identity: IpAddr, slot: &Arc<Slot>, session: &Arc<WorkerSession>) {
        self.remove_slot(identity, slot);
        let mut live = self.live.lock();
        if live
            .get(&identity)
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            live.remove(&identity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::getwork::LongPoll;
    use crate::manager::mock::MockManager;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn alice() -> Credentials {
        Credentials::new("alice.1", "x")
    }

    fn has_slot(registry: &ConnectionRegistry, identity: IpAddr) -> bool {
        registry.inner.slots.lock().contains_key(&identity)
    }

    #[tokio::test]
    async fn test_first_contact_creates_and_binds_session() {
        let manager = Arc::new(MockManager::new());
        let registry = ConnectionRegistry::new(manager.clone());

        let session = registry.resolve(ip(5), &alice()).await.unwrap();
        assert_eq!(session.identity(), ip(5));
        assert_eq!(session.pool().unwrap().name, "mock");
        assert_eq!(session.authorized_usernames(), vec!["alice.1"]);
        assert_eq!(manager.subscribe_count(), 1);
        assert!(registry.contains(ip(5)));
    }

    #[tokio::test]
    async fn test_same_identity_reuses_session_and_reauthorizes() {
        let manager = Arc::new(MockManager::new());
        let registry = ConnectionRegistry::new(manager.clone());

        let first = registry.resolve(ip(5), &alice()).await.unwrap();
        let second = registry
            .resolve(ip(5), &Credentials::new("alice.2", "x"))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.subscribe_count(), 1);
        assert_eq!(manager.authorizes.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(second.authorized_usernames(), vec!["alice.1", "alice.2"]);
    }

    #[tokio::test]
    async fn test_distinct_identities_get_distinct_sessions() {
        let manager = Arc::new(MockManager::new());
        let registry = ConnectionRegistry::new(manager.clone());

        let a = registry.resolve(ip(5), &alice()).await.unwrap();
        let b = registry.resolve(ip(6), &alice()).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_contact_subscribes_once() {
        let manager = Arc::new(MockManager {
            subscribe_delay: Duration::from_millis(20),
            ..MockManager::new()
        });
        let registry = Arc::new(ConnectionRegistry::new(manager.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.resolve(ip(5), &alice()).await })
            })
            .collect();

        let sessions: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(manager.subscribe_count(), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_authorization_failure_evicts_and_notifies() {
        let manager = Arc::new(MockManager::new());
        manager.reject_user("mallory");
        let registry = ConnectionRegistry::new(manager.clone());

        let err = registry
            .resolve(ip(5), &Credentials::new("mallory", "x"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Authorization(_)));
        assert!(!registry.contains(ip(5)));
        assert!(manager.disconnection_count() >= 1);
    }

    #[tokio::test]
    async fn test_failure_evicts_previously_authorized_session() {
        let manager = Arc::new(MockManager::new());
        let registry = ConnectionRegistry::new(manager.clone());

        let session = registry.resolve(ip(5), &alice()).await.unwrap();
        let poll = LongPoll::register(session.clone(), "alice.1");

        manager.reject_user("alice.1");
        assert!(registry.resolve(ip(5), &alice()).await.is_err());
        assert!(!registry.contains(ip(5)));
        assert_eq!(session.waiter_count(), 0);
        drop(poll);

        // Next contact starts from scratch.
        manager.rejected_users.lock().clear();
        let fresh = registry.resolve(ip(5), &alice()).await.unwrap();
        assert!(!Arc::ptr_eq(&session, &fresh));
        assert_eq!(manager.subscribe_count(), 2);
    }

    #[tokio::test]
    async fn test_evict() {
        let manager = Arc::new(MockManager::new());
        let registry = ConnectionRegistry::new(manager.clone());

        let session = registry.resolve(ip(5), &alice()).await.unwrap();
        let (_, mut rx) = session.register_waiter();

        assert!(registry.evict(ip(5), Error::NoPoolAvailable("pool gone".into())).await.unwrap());
        assert!(!registry.contains(ip(5)));
        assert!(rx.try_recv().is_err());
        assert_eq!(session.waiter_count(), 0);
        assert_eq!(manager.disconnection_count(), 1);

        assert!(!registry.evict(ip(5), Error::NoPoolAvailable("again".into())).await.unwrap());
        assert!(!registry.evict(ip(6), Error::NoPoolAvailable("never".into())).await.unwrap());
        assert_eq!(manager.disconnection_count(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_failure_registers_nothing() {
        let manager = Arc::new(MockManager::new());
        *manager.no_pool.lock() = true;
        let registry = ConnectionRegistry::new(manager.clone());

        let err = registry.resolve(ip(5), &alice()).await.unwrap_err();
        assert!(matches!(err, Error::NoPoolAvailable(_)));
        assert!(!registry.contains(ip(5)));
        assert!(registry.is_empty());
        assert_eq!(manager.authorizes.load(std::sync::atomic::Ordering::SeqCst), 0);

        *manager.no_pool.lock() = false;
        registry.resolve(ip(5), &alice()).await.unwrap();
        assert_eq!(manager.subscribe_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_eviction_racing_creation_leaves_one_consistent_session() {
        let manager = Arc::new(MockManager {
            subscribe_delay: Duration::from_millis(5),
            ..MockManager::new()
        });
        manager.reject_user("mallory");
        let registry = Arc::new(ConnectionRegistry::new(manager.clone()));

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let registry = registry.clone();
                let creds = if i % 2 == 0 {
                    alice()
                } else {
                    Credentials::new("mallory", "x")
                };
                tokio::spawn(async move { registry.resolve(ip(5), &creds).await.ok() })
            })
            .collect();
        let results = futures::future::join_all(tasks).await;

        // Whatever survived is the session the registry holds.
        let live = registry.get(ip(5));
        let last_ok = results.into_iter().filter_map(|r| r.unwrap()).last();
        if let Some(live) = live {
            assert!(live.authorized_usernames().contains(&"alice.1".to_string()));
            assert!(last_ok.is_some());
        }
        assert!(registry.len() <= 1);
    }

    // The client going away mid-subscribe drops the resolve future; the
    // session must still end up either registered or reported disconnected.
    #[tokio::test(start_paused = true)]
    async fn test_dropped_resolve_during_subscribe_still_registers() {
        let manager = Arc::new(MockManager {
            subscribe_delay: Duration::from_millis(50),
            ..MockManager::new()
        });
        let registry = Arc::new(ConnectionRegistry::new(manager.clone()));

        let request = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.resolve(ip(5), &alice()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.subscribe_count(), 1);
        request.abort();
        assert!(request.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.contains(ip(5)));
        assert_eq!(has_slot(&registry, ip(5)), registry.contains(ip(5)));

        // The next request reuses the session instead of subscribing again.
        registry.resolve(ip(5), &alice()).await.unwrap();
        assert_eq!(manager.subscribe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_resolve_still_reports_rejection() {
        let manager = Arc::new(MockManager {
            subscribe_delay: Duration::from_millis(50),
            ..MockManager::new()
        });
        manager.reject_user("mallory");
        let registry = Arc::new(ConnectionRegistry::new(manager.clone()));

        let request = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .resolve(ip(5), &Credentials::new("mallory", "x"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        request.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.disconnection_count(), 1);
        assert!(!registry.contains(ip(5)));
        assert!(!has_slot(&registry, ip(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_do_not_wait_on_backend_calls() {
        let manager = Arc::new(MockManager {
            subscribe_delay: Duration::from_secs(60),
            ..MockManager::new()
        });
        let registry = Arc::new(ConnectionRegistry::new(manager.clone()));
        let first = registry.resolve(ip(5), &alice()).await.unwrap();

        // A second address parks in a minute-long subscribe, holding its slot.
        let pending = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.resolve(ip(6), &alice()).await })
        };
        while manager.subscribe_count() < 2 {
            tokio::task::yield_now().await;
        }

        let sessions = registry.sessions();
        assert_eq!(sessions.len(), 1);
        assert!(Arc::ptr_eq(&sessions[0], &first));
        assert!(registry.get(ip(6)).is_none());

        pending.await.unwrap().unwrap();
        assert_eq!(registry.len(), 2);
    }
}
