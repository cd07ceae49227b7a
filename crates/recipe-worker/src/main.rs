//! Job worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use recipe_queue::QueueConfig;
use recipe_worker::{default_schedule, JobContext, JobExecutor, Scheduler, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // The mail relay client may speak TLS
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "recipe=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting recipe-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match PrometheusBuilder::new().with_http_listener(addr).install() {
            Ok(()) => info!("Prometheus metrics listening on {}", addr),
            Err(e) => warn!("Failed to start metrics listener: {}", e),
        }
    }

    let queue = match recipe_queue::connect(QueueConfig::from_env()).await {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to connect job queue: {}", e);
            std::process::exit(1);
        }
    };

    let ctx = match JobContext::from_env(config.clone()).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to create job context: {}", e);
            std::process::exit(1);
        }
    };

    let executor = Arc::new(JobExecutor::new(ctx, Arc::clone(&queue)));

    let scheduler_task = if config.scheduler_enabled {
        let scheduler = Scheduler::new(default_schedule(), queue, config.export_retention_days);
        let shutdown = executor.shutdown_signal();
        Some(tokio::spawn(async move {
            if let Err(e) = scheduler.run(shutdown).await {
                error!("Scheduler error: {}", e);
            }
        }))
    } else {
        info!("Scheduler disabled for this process");
        None
    };

    {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal");
                    executor.shutdown();
                }
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        });
    }

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    if let Some(task) = scheduler_task {
        task.await.ok();
    }

    info!("Worker shutdown complete");
}
