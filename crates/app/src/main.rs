mod data_api;
mod problem;
mod router;
mod telemetry;
mod webhook;

use std::{net::SocketAddr, sync::Arc};

use tracing::{error, info};
use repo_activity_core::store::ActivityStore;
use repo_activity_storage::Database;
use repo_activity_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    match database.ping().await {
        Ok(()) => info!(stage = "storage", "activity store connected"),
        Err(err) => {
            error!(stage = "storage", error = %err, "activity store ping failed");
            return Err(err.into());
        }
    }

    let store: Arc<dyn ActivityStore> = Arc::new(database.activities());
    let state = router::AppState::new(metrics, store, config.webhook_secret.shared());

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
