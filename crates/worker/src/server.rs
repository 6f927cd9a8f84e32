use crate::config::Config;
use crate::runner::{serve_dispatches, Runner};
use crate::http;
use anyhow::Context;
use models::{TaskDispatch, TaskResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn run(cfg: Config) -> anyhow::Result<()> {
    tracing::info!(port = cfg.server.port, env = ?cfg.server.env, "starting worker");

    let connection = bus::Connection::connect(bus::ConnectConfig {
        uris: cfg.broker.uris.clone(),
        username: cfg.broker.username.clone(),
        password: cfg.broker.password.clone(),
        prefetch: cfg.broker.prefetch,
    })
    .await
    .context("failed to connect to broker")?;
    let channel = connection
        .open_channel()
        .await
        .context("failed to open broker channel")?;

    let publisher = bus::Publisher::<TaskResult>::new(
        channel.clone(),
        bus::PublisherConfig {
            exchange: cfg.broker.result.exchange.clone(),
            routing_key: cfg.broker.result.routing_key.clone(),
            mode: bus::DeliveryMode::Persistent,
        },
    );
    let runner = Arc::new(Runner::new(Arc::new(publisher), &cfg.task));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatches =
        bus::Consumer::<TaskDispatch>::new(channel.clone(), cfg.broker.dispatch.queue.clone());
    let consumer_task = tokio::spawn({
        let mut shutdown = shutdown_rx.clone();
        async move {
            let shutdown = async move { wait_shutdown(&mut shutdown).await };
            if let Err(err) = serve_dispatches(dispatches, runner, shutdown).await {
                tracing::error!(?err, "dispatch consumer failed");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.server.port))
        .await
        .with_context(|| format!("failed to bind port {}", cfg.server.port))?;
    tracing::info!(addr = %listener.local_addr()?, "worker listening");

    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(?err, "failed to listen for shutdown signal");
            return;
        }
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut shutdown = shutdown_rx.clone();
    axum::serve(listener, http::router(Some(connection.clone())))
        .with_graceful_shutdown(async move { wait_shutdown(&mut shutdown).await })
        .await
        .context("HTTP server failed")?;

    if tokio::time::timeout(SHUTDOWN_GRACE, consumer_task)
        .await
        .is_err()
    {
        tracing::warn!("graceful shutdown timed out");
    }
    let _ = channel.close().await;
    let _ = connection.close().await;

    tracing::info!("worker stopped");
    Ok(())
}

/// Resolve once the shutdown flag flips (or its sender is dropped).
async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
