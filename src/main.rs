use std::path::Path;

use tracing::info;

use chorus_server::net::scoring;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Bind address and database path: configurable via env, sane defaults.
    let bind_addr = std::env::var("CHORUS_BIND").unwrap_or_else(|_| "0.0.0.0:8057".to_string());
    let db_path = std::env::var("CHORUS_DB_PATH").unwrap_or_else(|_| "chorus.db".to_string());

    info!("chorus — collective presence server");
    info!(%bind_addr, %db_path, "starting");
    info!(
        base_credit = scoring::BASE_CREDIT,
        bonus_threshold = scoring::HARMONY_BONUS_THRESHOLD,
        bonus_multiplier = scoring::HARMONY_BONUS_MULTIPLIER,
        "scoring constants"
    );

    chorus_server::net::server::run(&bind_addr, Path::new(&db_path)).await
}
