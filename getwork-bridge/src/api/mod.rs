//! HTTP status API.
//!
//! Read-only view of the bridge for operators: health and the live getwork
//! sessions, with an OpenAPI document and Swagger UI. Served on its own
//! listener, separate from the getwork port, since getwork owns every path
//! there.

pub mod v1;

use std::net::SocketAddr;

use axum::Router;
use tokio_util::sync::CancellationToken;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::Result;
use crate::tracing::prelude::*;
pub use v1::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(v1::health, v1::list_workers),
    components(schemas(v1::WorkerStatus, v1::WorkerListResponse))
)]
pub struct ApiDoc;

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", v1::routes(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

/// Serve the API until `running` is cancelled.
pub async fn serve(listen: SocketAddr, state: AppState, running: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(listen = %listen, "Status API listening.");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { running.cancelled().await })
        .await?;
    Ok(())
}
