//! Backend load balancer.
//!
//! ```text
//!   Client ──▶ http::server ──▶ ServerPool::acquire_next ──▶ Backend
//!                                     ▲
//!              health::HealthChecker ─┤ mark up / down
//!              admin API ─────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use backend_lb::admin::{setup_admin_router, AdminState};
use backend_lb::config::{load_config, watcher, BalancerConfig};
use backend_lb::http::HttpServer;
use backend_lb::lifecycle::{signals, Balancer, Shutdown};
use backend_lb::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "backend-lb")]
#[command(about = "Round-robin load balancer with active health checks", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload the backend list when the configuration file changes.
    #[arg(long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => BalancerConfig::default(),
    };

    logging::init_tracing(&config.observability.log_level)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "backend-lb starting");

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let balancer = Balancer::bootstrap(config)?;
    let shutdown = Arc::new(Shutdown::new());
    signals::spawn_signal_handler(shutdown.clone());

    balancer.start();

    // Dropping the watcher handle stops watching, so keep it for the whole run.
    let _watcher = match (&args.config, args.watch) {
        (Some(path), true) => {
            let (config_watcher, updates) = watcher::ConfigWatcher::new(path);
            let handle = config_watcher.run()?;
            tokio::spawn(watcher::apply_backend_updates(
                balancer.pool.clone(),
                updates,
                shutdown.subscribe(),
            ));
            Some(handle)
        }
        _ => None,
    };

    if balancer.config.admin.enabled {
        let admin_config = &balancer.config.admin;
        let listener = TcpListener::bind(&admin_config.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");

        let router = setup_admin_router(AdminState::new(
            balancer.pool.clone(),
            &admin_config.api_key,
        ));
        let admin_shutdown = shutdown.signalled();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(admin_shutdown)
                .await
            {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let listener = TcpListener::bind(&balancer.config.listener.bind_address).await?;
    let server = HttpServer::new(balancer.pool.clone(), &balancer.config.timeouts);
    server.run(listener, shutdown.signalled()).await?;

    balancer.stop().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
