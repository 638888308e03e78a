//! Configuration management for getwork-bridge.
//!
//! Settings have sensible defaults and may be overridden through `GETWORK_*`
//! environment variables. The structures are serde-friendly so they can be
//! embedded in a larger proxy configuration file.

use serde::{Deserialize, Serialize};
use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use crate::error::{Error, Result};

/// Default path clients are pointed at for long polling.
pub const DEFAULT_LONG_POLL_PATH: &str = "/LP";

/// Default long-poll ceiling.
///
/// Most getwork clients give up on a long poll after 60 seconds, so the
/// bridge's own limit only acts as a backstop.
pub const DEFAULT_LONG_POLL_TIMEOUT: Duration = Duration::from_secs(70);

/// Main configuration structure for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Getwork listen address
    pub listen: SocketAddr,

    /// Status API listen address (disabled when `None`)
    pub api_listen: Option<SocketAddr>,

    /// URI path that selects the long-poll branch
    pub long_poll_path: String,

    /// Ceiling on how long a long-poll request stays suspended
    #[serde(with = "duration_secs")]
    pub long_poll_timeout: Duration,

    /// Realm announced in the Basic authentication challenge
    pub realm: String,

    /// Response sent when the backend rejects a worker's credentials
    pub auth_failure: AuthFailurePolicy,

    /// Local manager configuration
    pub local: LocalConfig,
}

/// What the client sees when authorization fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailurePolicy {
    /// Answer 401 with a Basic challenge.
    #[default]
    Unauthorized,
    /// Answer with an empty body and default status, leaving the client to
    /// time out on its own.
    Silent,
}

impl FromStr for AuthFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unauthorized" => Ok(Self::Unauthorized),
            "silent" => Ok(Self::Silent),
            other => Err(Error::Config(format!(
                "unknown auth failure policy '{other}'"
            ))),
        }
    }
}

/// Local manager configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Interval between freshly generated jobs
    #[serde(with = "duration_secs")]
    pub work_interval: Duration,

    /// Share difficulty of generated work
    pub difficulty: f64,

    /// Maximum number of workers bound to the local pool
    pub max_workers: Option<usize>,

    /// Usernames allowed to mine; empty accepts anyone
    pub users: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8332)),
            api_listen: Some(SocketAddr::from(([127, 0, 0, 1], 7785))),
            long_poll_path: DEFAULT_LONG_POLL_PATH.to_string(),
            long_poll_timeout: DEFAULT_LONG_POLL_TIMEOUT,
            realm: "stratum-proxy".to_string(),
            auth_failure: AuthFailurePolicy::default(),
            local: LocalConfig::default(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            work_interval: Duration::from_secs(30),
            difficulty: 1.0,
            max_workers: None,
            users: Vec::new(),
        }
    }
}

impl Config {
    /// Build the configuration from defaults overlaid with `GETWORK_*`
    /// environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("GETWORK_LISTEN") {
            config.listen = parse("GETWORK_LISTEN", &v)?;
        }
        if let Some(v) = lookup("GETWORK_API_LISTEN") {
            config.api_listen = match v.as_str() {
                "" | "off" => None,
                _ => Some(parse("GETWORK_API_LISTEN", &v)?),
            };
        }
        if let Some(v) = lookup("GETWORK_LONG_POLL_PATH") {
            if !v.starts_with('/') {
                return Err(Error::Config(format!(
                    "GETWORK_LONG_POLL_PATH must start with '/', got '{v}'"
                )));
            }
            config.long_poll_path = v;
        }
        if let Some(v) = lookup("GETWORK_LONG_POLL_TIMEOUT_SECS") {
            config.long_poll_timeout =
                Duration::from_secs(parse("GETWORK_LONG_POLL_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("GETWORK_REALM") {
            config.realm = v;
        }
        if let Some(v) = lookup("GETWORK_AUTH_FAILURE") {
            config.auth_failure = v.parse()?;
        }
        if let Some(v) = lookup("GETWORK_WORK_INTERVAL_SECS") {
            config.local.work_interval =
                Duration::from_secs(parse("GETWORK_WORK_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = lookup("GETWORK_DIFFICULTY") {
            let difficulty: f64 = parse("GETWORK_DIFFICULTY", &v)?;
            if difficulty <= 0.0 {
                return Err(Error::Config("GETWORK_DIFFICULTY must be positive".into()));
            }
            config.local.difficulty = difficulty;
        }
        if let Some(v) = lookup("GETWORK_MAX_WORKERS") {
            config.local.max_workers = Some(parse("GETWORK_MAX_WORKERS", &v)?);
        }
        if let Some(v) = lookup("GETWORK_USERS") {
            config.local.users = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        Ok(config)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("{key}='{value}': {e}")))
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
