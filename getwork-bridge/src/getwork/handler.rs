//! HTTP handling for getwork requests.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::classify::{classify, RequestKind};
use super::credentials::Credentials;
use super::long_poll::{LongPoll, LongPollOutcome};
use super::messages::{GetworkRequest, GetworkResponse, SubmitResponse};
use super::registry::ConnectionRegistry;
use super::session::WorkerSession;
use crate::config::{AuthFailurePolicy, Config};
use crate::error::{Error, Result};
use crate::manager::ProxyManager;
use crate::tracing::prelude::*;

/// Advertises getwork extensions; present on every response.
pub const MINING_EXTENSIONS: HeaderName = HeaderName::from_static("x-mining-extensions");

/// Points clients at the long-poll path; present on non-long-poll responses.
pub const LONG_POLLING: HeaderName = HeaderName::from_static("x-long-polling");

/// Reason a submitted share was rejected.
pub const REJECT_REASON: HeaderName = HeaderName::from_static("x-reject-reason");

const EXTENSIONS: HeaderValue = HeaderValue::from_static("longpoll");

/// Request handling settings taken from [`Config`].
#[derive(Debug, Clone)]
struct Settings {
    long_poll_path: String,
    long_poll_location: HeaderValue,
    long_poll_timeout: Duration,
    challenge: HeaderValue,
    auth_failure: AuthFailurePolicy,
}

/// The getwork bridge: registry, backend and settings shared by all
/// request tasks.
#[derive(Clone)]
pub struct Bridge {
    registry: Arc<ConnectionRegistry>,
    manager: Arc<dyn ProxyManager>,
    settings: Arc<Settings>,
    /// Ends parked long polls when the server shuts down
    shutdown: CancellationToken,
}

impl Bridge {
    pub fn new(config: &Config, manager: Arc<dyn ProxyManager>) -> Result<Self> {
        let long_poll_location = HeaderValue::from_str(&config.long_poll_path)
            .map_err(|e| Error::Config(format!("long poll path: {e}")))?;
        let challenge = HeaderValue::from_str(&format!("Basic realm=\"{}\"", config.realm))
            .map_err(|e| Error::Config(format!("realm: {e}")))?;

        Ok(Self {
            registry: Arc::new(ConnectionRegistry::new(manager.clone())),
            manager,
            settings: Arc::new(Settings {
                long_poll_path: config.long_poll_path.clone(),
                long_poll_location,
                long_poll_timeout: config.long_poll_timeout,
                challenge,
                auth_failure: config.auth_failure,
            }),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle one getwork exchange.
    pub async fn handle(
        &self,
        client: IpAddr,
        path: &str,
        headers: &HeaderMap,
        body: &str,
    ) -> Response {
        trace!(client = %client, path, body, "New request.");

        let credentials = match Credentials::from_headers(headers) {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(
                    client = %client,
                    error = %e,
                    "Request without credentials. Returning 401 Unauthorized."
                );
                return self.unauthorized();
            }
        };

        let session = match self.registry.resolve(client, &credentials).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    client = %client,
                    user = %credentials.username,
                    error = %e,
                    "Authorization failed for getwork request."
                );
                return match self.settings.auth_failure {
                    AuthFailurePolicy::Unauthorized => self.unauthorized(),
                    AuthFailurePolicy::Silent => StatusCode::OK.into_response(),
                };
            }
        };

        let request = match GetworkRequest::from_body(body) {
            Ok(request) => request,
            Err(e) => {
                error!(
                    client = %client,
                    body,
                    error = %e,
                    "Unsupported request content."
                );
                return StatusCode::BAD_REQUEST.into_response();
            }
        };

        let kind = classify(path, &request, &self.settings.long_poll_path);
        debug!(
            client = %client,
            user = %credentials.username,
            kind = %kind,
            "New getwork request."
        );

        let mut response = match kind {
            RequestKind::WorkFetch => work_fetch(&session, request.id),
            RequestKind::Submission => {
                self.submit(&session, &credentials.username, &request).await
            }
            RequestKind::LongPoll => {
                return self
                    .long_poll(session, &credentials.username, request.id)
                    .await;
            }
        };
        response
            .headers_mut()
            .insert(LONG_POLLING, self.settings.long_poll_location.clone());
        response
    }

    async fn submit(
        &self,
        session: &Arc<WorkerSession>,
        username: &str,
        request: &GetworkRequest,
    ) -> Response {
        let data = request.submitted_data().unwrap_or_default();
        let rejection = self.manager.submit_work(session, username, data).await;

        let reply = SubmitResponse::new(request.id.clone(), rejection.is_none());
        debug!(
            client = %session.identity(),
            user = username,
            accepted = reply.result,
            reason = rejection.as_deref().unwrap_or(""),
            "Returning submit response."
        );

        let mut response = Json(reply).into_response();
        if let Some(reason) = rejection.as_deref().and_then(reason_header) {
            response.headers_mut().insert(REJECT_REASON, reason);
        }
        response
    }

    async fn long_poll(&self, session: Arc<WorkerSession>, username: &str, id: Value) -> Response {
        let poll = LongPoll::register(session.clone(), username);
        let outcome = tokio::select! {
            outcome = poll.wait(self.settings.long_poll_timeout) => outcome,
            _ = self.shutdown.cancelled() => LongPollOutcome::Abandoned,
        };
        match outcome {
            LongPollOutcome::Fulfilled(work) => {
                debug!(
                    client = %session.identity(),
                    user = username,
                    "Returning long-polling response."
                );
                Json(GetworkResponse::new(id, Some(work))).into_response()
            }
            LongPollOutcome::TimedOut | LongPollOutcome::Abandoned => {
                StatusCode::NO_CONTENT.into_response()
            }
        }
    }

    fn unauthorized(&self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, self.settings.challenge.clone())],
        )
            .into_response()
    }
}

fn work_fetch(session: &WorkerSession, id: Value) -> Response {
    let work = session.work();
    if work.is_none() {
        warn!(client = %session.identity(), "No work available for session.");
    }
    Json(GetworkResponse::new(id, work)).into_response()
}

// Rejection reasons come from the backend; keep only what a header can carry.
fn reason_header(reason: &str) -> Option<HeaderValue> {
    let cleaned: String = reason
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    HeaderValue::from_str(cleaned).ok()
}

async fn serve_getwork(
    State(bridge): State<Bridge>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let mut response = bridge.handle(peer.ip(), uri.path(), &headers, &body).await;
    response.headers_mut().insert(MINING_EXTENSIONS, EXTENSIONS);
    response
}

/// Build the getwork router. Every path is served; the long-poll path is
/// told apart inside the handler.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so the
/// client address is available.
pub fn router(bridge: Bridge) -> Router {
    Router::new()
        .fallback(serve_getwork)
        .with_state(bridge)
        .layer(TraceLayer::new_for_http())
}

/// Serve getwork on `listen` until `running` is cancelled.
///
/// Parked long polls are answered with 204 as soon as shutdown starts.
pub async fn serve(
    listen: SocketAddr,
    mut bridge: Bridge,
    running: CancellationToken,
) -> Result<()> {
    bridge.shutdown = running.clone();
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(listen = %listen, "Getwork listening.");

    axum::serve(
        listener,
        router(bridge).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { running.cancelled().await })
    .await?;
    Ok(())
}
