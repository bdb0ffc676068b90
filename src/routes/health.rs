//! Health check endpoints

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::catalog::{CatalogStats, ResourceKind};
use crate::error::Result;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    pub files: CatalogStats,
    pub links: CatalogStats,
    pub active_uploads: usize,
    pub retention_enabled: bool,
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    let catalog = state.catalog();

    Ok(Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "ephemera-server",
        files: catalog.stats(Some(ResourceKind::File)).await?,
        links: catalog.stats(Some(ResourceKind::UrlShortener)).await?,
        active_uploads: state.uploads().sessions().session_count().await,
        retention_enabled: state.config().retention.enabled,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
