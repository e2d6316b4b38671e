mod config;
mod error;
mod events;
mod gmp;
mod inventory;
mod metrics_registry;
mod quantity;
mod reconciler;
mod scale;
mod shutdown;
mod slack;
mod ttl_cache;

use actix_web::{web, App, HttpServer};
use kube::Client;
use tracing::{error, info};

use crate::config::Config;
use crate::gmp::{GmpClient, MetricSource};
use crate::inventory::KubeClientInventory;
use crate::reconciler::Reconciler;
use crate::shutdown::ShutdownLatch;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match Config::from_env().await {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration, exiting");
            std::process::exit(1);
        }
    };
    config.print_header();

    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to build Kubernetes client, exiting");
            std::process::exit(1);
        }
    };

    metrics_registry::MetricsHandles::mark_release_info();

    let shutdown = ShutdownLatch::install();
    let inventory = KubeClientInventory::new(client, &config);
    let metric_source = GmpClient::new(&config);

    info!(project = %config.gcp_project_id, "testing connection to Google Managed Prometheus");
    if let Err(e) = metric_source.test_connection().await {
        error!(error = %e, "cannot reach Google Managed Prometheus, exiting");
        std::process::exit(1);
    }
    info!("successfully connected to Google Managed Prometheus");

    let mut reconciler = Reconciler::new(config.clone(), inventory, metric_source, shutdown);
    let reconciler_handle = tokio::spawn(async move {
        reconciler.run().await;
    });

    info!("Volume Autoscaler metrics server listening on 0.0.0.0:8000");
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .service(metrics_registry::metrics_handler)
            .service(metrics_registry::healthz)
    })
    .bind(("0.0.0.0", 8000))?
    .run();

    tokio::select! {
        result = server => {
            result?;
        }
        _ = reconciler_handle => {
            info!("reconciler loop exited");
        }
    }

    info!("exited gracefully");
    Ok(())
}
