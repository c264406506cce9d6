// HTTP API server binary: accepts sheet uploads and runs imports.

use anyhow::Result;
use travel_import::api::ApiServer;
use travel_import::importer::ImportConfig;
use travel_import::util::db::Db;
use travel_import::util::env as env_util;

#[actix_web::main]
async fn main() -> Result<()> {
    travel_import::tracing::init_tracing("info,sqlx=warn,actix_web=info")?;
    env_util::bootstrap_cli("api_server");

    let server = ApiServer::from_env()?;

    let max_connections: u32 = env_util::env_parse("DB_MAX_CONNECTIONS", 10u32);
    let db = Db::connect(&env_util::db_url(), max_connections).await?;
    tracing::info!("Database connected successfully");

    server.run(db, ImportConfig::from_env()).await?;

    Ok(())
}
