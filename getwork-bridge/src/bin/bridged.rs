//! Getwork bridge daemon.
//!
//! Serves getwork on the configured port, backed by the local manager, and
//! the status API on its own port.

use std::process::ExitCode;
use std::sync::Arc;

use tokio::signal::unix::{self, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use getwork_bridge::api::{self, AppState};
use getwork_bridge::config::Config;
use getwork_bridge::getwork::{self, Bridge};
use getwork_bridge::manager::local::LocalManager;
use getwork_bridge::tracing::{self, prelude::*};

#[tokio::main]
async fn main() -> ExitCode {
    tracing::init_journald_or_stdout();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration.");
            return ExitCode::FAILURE;
        }
    };

    let manager = Arc::new(LocalManager::new(config.local.clone()));
    let bridge = match Bridge::new(&config, manager.clone()) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(error = %e, "Invalid configuration.");
            return ExitCode::FAILURE;
        }
    };

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();

    tracker.spawn(manager.run(running.clone()));

    let registry = bridge.registry().clone();
    let listen = config.listen;
    {
        let running = running.clone();
        tracker.spawn(async move {
            if let Err(e) = getwork::serve(listen, bridge, running.clone()).await {
                error!(error = %e, "Getwork server failed.");
                running.cancel();
            }
        });
    }

    if let Some(api_listen) = config.api_listen {
        let running = running.clone();
        let state = AppState::new(registry);
        tracker.spawn(async move {
            if let Err(e) = api::serve(api_listen, state, running.clone()).await {
                error!(error = %e, "Status API failed.");
                running.cancel();
            }
        });
    }
    tracker.close();
    info!(
        listen = %config.listen,
        long_poll_path = %config.long_poll_path,
        "Started."
    );

    let (mut sigint, mut sigterm) = match (
        unix::signal(SignalKind::interrupt()),
        unix::signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "Failed to install signal handlers.");
            return ExitCode::FAILURE;
        }
    };
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = running.cancelled() => {},
    }

    trace!("Shutting down.");
    running.cancel();

    tracker.wait().await;
    info!("Exiting.");
    ExitCode::SUCCESS
}
