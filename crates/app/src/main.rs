mod cars;
mod expiration;
mod problem;
mod router;
mod telemetry;

use std::{net::SocketAddr, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use covtrack_storage::{seed, Database};
use covtrack_util::{load_env_file, AppConfig};

use crate::expiration::{ExpirationWorker, LogNotifier};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    if config.environment.is_development() {
        seed::ensure_seeded(&database).await?;
    }

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let worker = ExpirationWorker::new(database.clone(), config.expiry, Arc::new(LogNotifier));
    let worker_handle = worker.spawn(shutdown.clone());

    let state = router::AppState::new(metrics, database);
    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    // The server only returns once the token fired; wait for the worker to
    // finish its in-flight scan before exiting.
    shutdown.cancel();
    worker_handle.await?;
    info!(stage = "app", "shutdown complete");
    Ok(())
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!(stage = "app", "received shutdown signal");
                interrupt.cancel();
            }
            Err(err) => {
                error!(stage = "app", error = %err, "failed to install signal handler");
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
            error!(stage = "app", "failed to install SIGTERM handler");
            return;
        };
        sigterm.recv().await;
        info!(stage = "app", "received SIGTERM");
        shutdown.cancel();
    });

    #[cfg(not(unix))]
    drop(shutdown);
}
