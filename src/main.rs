/// Chat Server
///
/// Main server entry point. Handles:
/// - Command-line argument parsing
/// - Database initialization
/// - HTTP and WebSocket server startup
use actix_web::web;
use anyhow::Context;
use chat_server::auth::JwtDecoder;
use chat_server::config::Config;
use chat_server::db;
use chat_server::gateway::ChatGateway;
use chat_server::server;
use std::fs;
use std::process;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .init();

    let config = Config::from_args();

    log::info!("Starting Chat Server");
    log::info!("Database: {:?}", config.database);
    log::info!("Listening on: {}", config.bind_addr());

    // Write PID file if specified
    if let Some(pidfile) = &config.pidfile {
        let pid = process::id().to_string();
        fs::write(pidfile, pid)
            .with_context(|| format!("Failed to write PID file {:?}", pidfile))?;
        log::info!("PID file written to: {:?}", pidfile);
    }

    let decoder = JwtDecoder::new(&config.jwt_secret, &config.jwt_algorithm)
        .context("Invalid token configuration")?;

    let db_path = config
        .database
        .to_str()
        .context("Database path is not valid UTF-8")?;
    let pool = db::create_pool(db_path).context("Failed to create database pool")?;
    log::info!("Database initialized");

    let gateway = web::Data::new(ChatGateway::new(pool.clone()));

    let http_server = server::create_http_server(
        web::Data::new(pool),
        gateway,
        web::Data::new(decoder),
        &config.bind_addr(),
    )
    .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;
    http_server.await?;

    Ok(())
}
