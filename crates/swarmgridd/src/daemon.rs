//! `swarmgridd run`: the five timers of the control loop.
//!
//! 1. Host poll (monitor, `Poll::Hosts`)
//! 2. Service poll (monitor, `Poll::Services`)
//! 3. Container reconciler
//! 4. Node reconciler
//! 5. Cloud-host reconciler, only when a provider is wired in
//!
//! All of them stop on the shared shutdown signal raised by Ctrl-C.

use std::sync::Arc;

use swarmgrid_core::SwarmgridConfig;
use swarmgrid_monitor::Poll;
use swarmgrid_reconcile::{ContainerReconciler, NodeReconciler, Runner};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::services::Services;

pub async fn run(config: SwarmgridConfig) -> anyhow::Result<()> {
    info!("SwarmGrid daemon starting");
    let services = Services::build(&config)?;

    let host_interval = config.monitoring.host_interval()?;
    let service_interval = config.monitoring.service_interval()?;
    let containers_interval = config.reconcile.containers_interval()?;
    let nodes_interval = config.reconcile.nodes_interval()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();

    for (poll, interval) in [(Poll::Hosts, host_interval), (Poll::Services, service_interval)] {
        let monitor = services.monitor.clone();
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            monitor.run(poll, interval, shutdown).await;
        });
    }

    let containers = Runner::new(
        Arc::new(
            ContainerReconciler::new(
                services.state.clone(),
                services.orchestration.clone(),
                services.configuring.clone(),
            )
            .with_managed_label(config.orchestration.managed_label.clone()),
        ),
        services.configuring.clone(),
    );
    let nodes = Runner::new(
        Arc::new(NodeReconciler::new(
            services.state.clone(),
            services.orchestration.clone(),
            services.configuring.clone(),
        )),
        services.configuring.clone(),
    );
    for (runner, interval) in [(containers, containers_interval), (nodes, nodes_interval)] {
        let shutdown = shutdown_rx.clone();
        tasks.spawn(async move {
            runner.run(interval, shutdown).await;
        });
    }
    info!(timers = tasks.len(), "control loop running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "background task failed");
        }
    }

    info!("SwarmGrid daemon stopped");
    Ok(())
}
