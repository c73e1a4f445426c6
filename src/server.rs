use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::{self, AppState, SharedState};
use crate::config::StudyboardToml;
use crate::db::{BoardDb, DbHandle};
use crate::ws;

/// Configuration for the studyboard server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    /// Remaining settings (auth lifetimes, urgency thresholds).
    pub settings: StudyboardToml,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_toml(StudyboardToml::default())
    }
}

impl ServerConfig {
    pub fn from_toml(settings: StudyboardToml) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            db_path: settings.database.path.clone(),
            dev_mode: settings.server.dev_mode,
            settings,
        }
    }
}

/// Build the full application router: REST API, WebSocket and request tracing.
pub fn build_router(state: SharedState) -> Router {
    let dev_mode = state.config.server.dev_mode;
    let mut app = api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open (or create) the database file, creating its parent directory.
pub fn open_database(path: &std::path::Path) -> Result<BoardDb> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    BoardDb::new(path).context("Failed to initialize studyboard database")
}

/// Start the studyboard server and run until Ctrl-C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let db = open_database(&config.db_path)?;

    let mut settings = config.settings;
    settings.server.dev_mode = config.dev_mode;
    let state = Arc::new(AppState::new(DbHandle::new(db), settings));
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        db = %config.db_path.display(),
        dev_mode = config.dev_mode,
        "studyboard listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router(dev_mode: bool) -> Router {
        let db = BoardDb::new_in_memory().unwrap();
        let mut config = StudyboardToml::default();
        config.server.dev_mode = dev_mode;
        build_router(Arc::new(AppState::new(DbHandle::new(db), config)))
    }

    #[tokio::test]
    async fn test_router_serves_health() {
        let app = test_router(false);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_ws_requires_session() {
        let app = test_router(false);
        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = test_router(false);
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dev_mode_enables_cors() {
        let request = || {
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "http://localhost:5173")
                .body(Body::empty())
                .unwrap()
        };
        let response = test_router(true).oneshot(request()).await.unwrap();
        assert!(
            response
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
        let response = test_router(false).oneshot(request()).await.unwrap();
        assert!(
            !response
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }

    #[test]
    fn test_open_database_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("board.db");
        open_database(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_server_config_from_toml() {
        let mut settings = StudyboardToml::default();
        settings.server.port = 4100;
        let config = ServerConfig::from_toml(settings);
        assert_eq!(config.port, 4100);
        assert_eq!(config.host, "127.0.0.1");
        assert!(!config.dev_mode);
    }
}
