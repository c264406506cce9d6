// API server implementation using actix-web

use crate::api::{middleware, routes};
use crate::importer::pipeline::shared_resolver;
use crate::importer::ImportConfig;
use crate::media::AssetResolver;
use crate::util::db::Db;
use crate::util::env::{env_opt, env_parse};
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;

/// Everything a request handler needs to run an import.
pub struct AppState {
    pub db: Db,
    pub resolver: Arc<AssetResolver>,
    pub config: ImportConfig,
    pub started: Instant,
}

impl AppState {
    pub fn new(db: Db, resolver: Arc<AssetResolver>, config: ImportConfig) -> Self {
        Self {
            db,
            resolver,
            config,
            started: Instant::now(),
        }
    }
}

pub struct ApiServer {
    pub host: String,
    pub port: u16,
    pub allowed_origins: String,
    pub max_upload_bytes: usize,
}

impl ApiServer {
    /// Create server from environment variables
    pub fn from_env() -> Result<Self> {
        crate::util::env::init_env();

        let host = env_opt("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = env_opt("API_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .trim()
            .parse()
            .context("Invalid API_PORT")?;
        let allowed_origins = env_opt("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://localhost:8000".to_string());
        let max_upload_bytes = env_parse("MAX_UPLOAD_BYTES", 20 * 1024 * 1024usize);

        Ok(Self {
            host,
            port,
            allowed_origins,
            max_upload_bytes,
        })
    }

    /// Start the HTTP server
    pub async fn run(self, db: Db, config: ImportConfig) -> Result<()> {
        let bind_addr = format!("{}:{}", self.host, self.port);

        tracing::info!(
            host = %self.host,
            port = %self.port,
            max_upload_bytes = self.max_upload_bytes,
            "Starting import API server"
        );

        let resolver = shared_resolver(&config)?;
        let state = web::Data::new(AppState::new(db, resolver, config));
        let allowed_origins = self.allowed_origins.clone();
        let max_upload_bytes = self.max_upload_bytes;

        HttpServer::new(move || {
            let (logger, compress) = middleware::setup_middleware();
            let cors = middleware::setup_cors(&allowed_origins);

            App::new()
                .app_data(state.clone())
                .app_data(web::PayloadConfig::new(max_upload_bytes))
                .wrap(logger)
                .wrap(compress)
                .wrap(cors)
                .configure(routes::configure_routes)
        })
        .bind(&bind_addr)
        .with_context(|| format!("Failed to bind to {}", bind_addr))?
        .run()
        .await
        .context("HTTP server error")?;

        Ok(())
    }
}
