//! In-process manager serving locally generated work.
//!
//! Lets the bridge run without an upstream pool: every session is bound to
//! a single local pool, gets headers from the [`JobGenerator`], and has its
//! solutions checked against the share target here. New work is generated
//! on an interval and pushed to every live session, which is what wakes
//! pending long polls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bitcoin::hash_types::{BlockHash, TxMerkleNode};
use parking_lot::Mutex;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{Pool, ProxyManager};
use crate::config::LocalConfig;
use crate::error::{Error, Result};
use crate::getwork::{work, Credentials, Work, WorkerSession};
use crate::job_generator::{meets_target, GeneratedJob, JobGenerator};
use crate::tracing::prelude::*;

/// Jobs, including the current one, that still accept submissions.
const RECENT_JOBS: usize = 4;

pub const REJECT_MALFORMED: &str = "malformed-data";
pub const REJECT_STALE: &str = "stale-work";
pub const REJECT_HIGH_HASH: &str = "high-hash";
pub const REJECT_DUPLICATE: &str = "duplicate";
pub const REJECT_UNAUTHORIZED: &str = "unauthorized-worker";

/// Local manager.
pub struct LocalManager {
    pool: Pool,
    config: LocalConfig,
    state: Mutex<LocalState>,
}

struct LocalState {
    generator: JobGenerator,
    current: GeneratedJob,
    /// Earlier jobs, most recent first
    previous: VecDeque<GeneratedJob>,
    /// Back-references for pushing work; the registry owns the sessions
    sessions: HashMap<IpAddr, Weak<WorkerSession>>,
    /// (merkle root, nonce, time) of accepted shares for the known jobs
    accepted: HashSet<(TxMerkleNode, u32, u32)>,
}

impl LocalManager {
    pub fn new(config: LocalConfig) -> Self {
        let mut generator = JobGenerator::new(config.difficulty);
        let current = generator.next_job();

        Self {
            pool: Pool::new("local", "local://job-generator"),
            config,
            state: Mutex::new(LocalState {
                generator,
                current,
                previous: VecDeque::new(),
                sessions: HashMap::new(),
                accepted: HashSet::new(),
            }),
        }
    }

    /// Number of live sessions bound to the local pool.
    pub fn worker_count(&self) -> usize {
        let mut state = self.state.lock();
        state.sessions.retain(|_, s| s.strong_count() > 0);
        state.sessions.len()
    }

    /// Work currently handed out.
    pub fn current_work(&self) -> Work {
        let state = self.state.lock();
        Work::from_header(&state.current.header, &state.current.target)
    }

    /// Generate a new job and push it to every live session.
    ///
    /// Returns the number of long polls woken.
    pub fn publish_next_job(&self) -> usize {
        let (work, sessions) = {
            let mut state = self.state.lock();
            let job = state.generator.next_job();
            let work = Work::from_header(&job.header, &job.target);

            let replaced = std::mem::replace(&mut state.current, job);
            state.previous.push_front(replaced);
            state.previous.truncate(RECENT_JOBS - 1);
            let live: HashSet<TxMerkleNode> = state
                .known_jobs()
                .map(|j| j.header.merkle_root)
                .collect();
            state.accepted.retain(|(root, _, _)| live.contains(root));

            state.sessions.retain(|_, s| s.strong_count() > 0);
            let sessions: Vec<_> = state.sessions.values().filter_map(Weak::upgrade).collect();
            (work, sessions)
        };

        // Session locks are taken outside our own lock.
        let woken: usize = sessions.iter().map(|s| s.update_work(work.clone())).sum();
        debug!(
            sessions = sessions.len(),
            long_polls = woken,
            "Published new local work."
        );
        woken
    }

    /// Publish new work every `work_interval` until shut down.
    pub async fn run(self: Arc<Self>, running: CancellationToken) {
        trace!("Local work task started.");

        let mut ticker = time::interval(self.config.work_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the initial job already exists.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = running.cancelled() => break,
                _ = ticker.tick() => {
                    self.publish_next_job();
                }
            }
        }

        trace!("Local work task stopped.");
    }

    fn check_share(&self, data: &str) -> std::result::Result<(), &'static str> {
        let header = work::decode_data(data).map_err(|_| REJECT_MALFORMED)?;

        let mut state = self.state.lock();
        let job = state
            .known_jobs()
            .find(|job| {
                job.header.merkle_root == header.merkle_root
                    && job.header.prev_blockhash == header.prev_blockhash
            })
            .ok_or(REJECT_STALE)?;

        let (hash, valid): (BlockHash, bool) = meets_target(&header, &job.target);
        if !valid {
            return Err(REJECT_HIGH_HASH);
        }
        let job_id = job.id;

        if !state
            .accepted
            .insert((header.merkle_root, header.nonce, header.time))
        {
            return Err(REJECT_DUPLICATE);
        }

        debug!(job_id, nonce = header.nonce, hash = %hash, "Share meets target.");
        Ok(())
    }
}

impl LocalState {
    /// Current job first, then the earlier ones still accepted.
    fn known_jobs(&self) -> impl Iterator<Item = &GeneratedJob> {
        std::iter::once(&self.current).chain(self.previous.iter())
    }
}

#[async_trait]
impl ProxyManager for LocalManager {
    async fn on_subscribe(&self, session: &Arc<WorkerSession>) -> Result<Pool> {
        {
            let mut state = self.state.lock();
            state.sessions.retain(|_, s| s.strong_count() > 0);
            if let Some(limit) = self.config.max_workers {
                if state.sessions.len() >= limit {
                    return Err(Error::TooManyWorkers {
                        pool: self.pool.name.clone(),
                        limit,
                    });
                }
            }
            state
                .sessions
                .insert(session.identity(), Arc::downgrade(session));
        }

        session.update_work(self.current_work());
        Ok(self.pool.clone())
    }

    async fn on_authorize(
        &self,
        _session: &Arc<WorkerSession>,
        credentials: &Credentials,
    ) -> Result<()> {
        if self.config.users.is_empty() || self.config.users.contains(&credentials.username) {
            Ok(())
        } else {
            Err(Error::Authorization(format!(
                "unknown user {}",
                credentials.username
            )))
        }
    }

    async fn on_worker_disconnection(&self, session: &Arc<WorkerSession>, cause: &Error) {
        let mut state = self.state.lock();
        let bound = state
            .sessions
            .get(&session.identity())
            .is_some_and(|s| std::ptr::eq(s.as_ptr(), Arc::as_ptr(session)));
        if bound {
            state.sessions.remove(&session.identity());
        }
        info!(
            client = %session.identity(),
            cause = %cause,
            "Worker disconnected from local pool."
        );
    }

    async fn submit_work(
        &self,
        session: &Arc<WorkerSession>,
        username: &str,
        data: &str,
    ) -> Option<String> {
        if !session.is_authorized(username) {
            return Some(REJECT_UNAUTHORIZED.to_string());
        }

        match self.check_share(data) {
            Ok(()) => {
                info!(client = %session.identity(), user = username, "Share accepted.");
                None
            }
            Err(reason) => {
                info!(
                    client = %session.identity(),
                    user = username,
                    reason,
                    "Share rejected."
                );
                Some(reason.to_string())
            }
        }
    }
}
