//! Getwork-over-HTTP bridge for a stratum mining proxy.
//!
//! Legacy getwork miners poll over HTTP; this crate multiplexes them onto
//! worker sessions of a backend [`manager::ProxyManager`], with long polling
//! so idle miners wait for new work instead of hammering the proxy.

pub mod api;
pub mod config;
pub mod error;
pub mod getwork;
pub mod job_generator;
pub mod manager;
pub mod tracing;
