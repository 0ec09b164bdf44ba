use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use match_lobby::lobby::hooks::LoggingHooks;
use match_lobby::metrics::{self, LobbyMetrics};
use match_lobby::{InMemoryDirectory, LobbyConfig, LobbyContext, LocalBus, SessionCoordinator};

/// Local simulation: peers join through the in-memory directory and bus,
/// ready up one by one, and run until the session activates.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Match Lobby v{}", env!("CARGO_PKG_VERSION"));

    let mut config = LobbyConfig::load_or_default();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    if config.simulated_peers == 0 || config.simulated_peers > config.capacity {
        warn!(
            "LOBBY_SIM_PEERS must be 1-{}, using {}",
            config.capacity,
            config.capacity.min(3)
        );
        config.simulated_peers = config.capacity.min(3);
    }
    info!(
        "Configuration loaded: capacity={}, bucket={}, countdown={:?}, peers={}",
        config.capacity, config.filter_bucket, config.countdown, config.simulated_peers
    );

    let metrics = Arc::new(LobbyMetrics::new());
    if let Some(port) = config.metrics_port {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics, port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let directory = InMemoryDirectory::new(config.max_sessions);
    let bus = LocalBus::new();
    let ctx = LobbyContext {
        directory: Arc::new(directory.clone()),
        hooks: Arc::new(LoggingHooks),
        metrics: metrics.clone(),
    };

    let mut handles = Vec::with_capacity(config.simulated_peers);
    for index in 0..config.simulated_peers {
        let peer_id = Uuid::new_v4();
        let mut coordinator =
            SessionCoordinator::join_or_create(config.clone(), Box::new(bus.endpoint(peer_id)), ctx.clone())
                .await?;

        // Stagger readiness so both the countdown and the shortcut get exercised
        let ready_after = config.tick_interval * (index as u32 + 1) * 5;
        handles.push(tokio::spawn(async move {
            // Activation may already happen before this peer gets ready
            if let Ok(result) = tokio::time::timeout(ready_after, coordinator.run()).await {
                return result;
            }
            coordinator.set_ready();
            coordinator.run().await
        }));
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    let all_peers = join_all(handles);

    tokio::select! {
        results = all_peers => {
            for result in results {
                match result {
                    Ok(Ok(start)) => info!(
                        "Peer {} handed off on {:?} (leader: {})",
                        start.local_peer,
                        start.local.team,
                        start.is_leader()
                    ),
                    Ok(Err(e)) => error!("Peer failed: {}", e),
                    Err(e) => error!("Peer task panicked: {}", e),
                }
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    info!("Final metrics:\n{}", metrics.render_prometheus());
    Ok(())
}

/// Await every task in order
async fn join_all<T>(handles: Vec<tokio::task::JoinHandle<T>>) -> Vec<Result<T, tokio::task::JoinError>> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await);
    }
    results
}
