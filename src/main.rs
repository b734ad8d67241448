use dotenvy::dotenv;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use reviewserver::categories::seed_default_categories;
use reviewserver::config::AppConfig;
use reviewserver::maintenance::backfill_attachments;
use reviewserver::server::run_server;
use reviewserver::shared::state::AppState;
use reviewserver::shared::utils::{create_conn, run_migrations};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };

    let pool = match create_conn(&config.database.url) {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to create database pool: {e}");
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };

    if let Err(e) = run_migrations(&pool) {
        error!("Failed to run migrations: {e}");
        return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
    }

    if let Ok(mut conn) = pool.get() {
        match seed_default_categories(&mut conn) {
            Ok(inserted) if inserted > 0 => info!("Seeded {inserted} default risk categories"),
            Ok(_) => {}
            Err(e) => error!("Failed to seed risk categories: {e}"),
        }
    }

    let args: Vec<String> = std::env::args().collect();
    if let Some(command) = args.get(1) {
        match command.as_str() {
            "backfill-attachments" => {
                return match backfill_attachments(&pool) {
                    Ok(report) => {
                        info!(
                            "Backfill complete: {} documents scanned, {} attachments copied",
                            report.documents_scanned, report.attachments_copied
                        );
                        Ok(())
                    }
                    Err(e) => {
                        error!("Backfill failed: {e}");
                        Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                    }
                };
            }
            "serve" => {}
            other => {
                eprintln!("Unknown command '{other}'. Commands: serve, backfill-attachments");
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Unknown command '{other}'"),
                ));
            }
        }
    }

    let state = Arc::new(AppState::new(pool, config));
    run_server(state)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}
