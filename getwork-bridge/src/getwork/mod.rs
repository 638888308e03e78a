//! Getwork-over-HTTP bridge.
//!
//! Legacy miners speak getwork: they POST a JSON-RPC envelope over plain
//! HTTP to fetch work or submit a solution, authenticating with Basic auth
//! on every request. This module maps that onto the session-oriented
//! protocol spoken by the backend [`ProxyManager`].
//!
//! # Request flow
//!
//! ```text
//! HTTP request
//!   -> Credentials::from_headers          (401 if missing)
//!   -> ConnectionRegistry::resolve        (subscribe once, authorize always)
//!   -> classify                           (submission / long poll / fetch)
//!        fetch       -> current work of the session
//!        submission  -> ProxyManager::submit_work
//!        long poll   -> LongPoll::wait until new work, ceiling or disconnect
//! ```
//!
//! # Sessions
//!
//! Getwork has no connection state, so the bridge keys sessions by client
//! IP address. All rigs behind one address share a session, and each of
//! their usernames is added to it as it authorizes.
//!
//! # Long polling
//!
//! Every response advertises `X-Mining-Extensions: longpoll` and, outside
//! the long-poll path itself, `X-Long-Polling: /LP`. A request to that path
//! is held open until the backend pushes new work into the session, which
//! then answers every pending long poll at once.
//!
//! [`ProxyManager`]: crate::manager::ProxyManager

mod classify;
mod credentials;
mod handler;
mod long_poll;
mod messages;
mod registry;
mod session;
pub mod work;

pub use classify::{classify, RequestKind};
pub use credentials::Credentials;
pub use handler::{router, serve, Bridge, LONG_POLLING, MINING_EXTENSIONS, REJECT_REASON};
pub use long_poll::{LongPoll, LongPollOutcome};
pub use messages::{GetworkRequest, GetworkResponse, SubmitResponse, WorkResult};
pub use registry::ConnectionRegistry;
pub use session::{WaiterKey, WorkerSession};
pub use work::Work;
