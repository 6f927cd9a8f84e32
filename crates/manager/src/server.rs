use crate::clock::{ObjectIdGenerator, SystemClock};
use crate::config::Config;
use crate::jobs::{run_periodic, wait_shutdown};
use crate::service::CrackService;
use crate::store::MongoStore;
use crate::{consumer, http};
use anyhow::Context;
use models::{TaskDispatch, TaskResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn run(cfg: Config) -> anyhow::Result<()> {
    tracing::info!(port = cfg.server.port, env = ?cfg.server.env, "starting manager");

    let store = MongoStore::connect(&cfg.mongo)
        .await
        .context("failed to connect to MongoDB")?;
    store
        .ensure_indexes()
        .await
        .context("failed to ensure indexes")?;

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

    let publisher = bus::Publisher::<TaskDispatch>::new(
        channel.clone(),
        bus::PublisherConfig {
            exchange: cfg.broker.dispatch.exchange.clone(),
            routing_key: cfg.broker.dispatch.routing_key.clone(),
            mode: bus::DeliveryMode::Persistent,
        },
    );
    let service = CrackService::new(
        cfg.task.clone(),
        store.clone(),
        Arc::new(publisher),
        Arc::new(SystemClock),
        Arc::new(ObjectIdGenerator),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let results = bus::Consumer::<TaskResult>::new(channel.clone(), cfg.broker.result.queue.clone());
    let consumer_task = tokio::spawn({
        let service = service.clone();
        let mut shutdown = shutdown_rx.clone();
        async move {
            let shutdown = async move { wait_shutdown(&mut shutdown).await };
            if let Err(err) = consumer::serve_results(results, service, shutdown).await {
                tracing::error!(?err, "result consumer failed");
            }
        }
    });

    let mut background = vec![consumer_task];
    background.push(tokio::spawn(run_periodic(
        "finish-timeout-tasks",
        cfg.task.finish_delay,
        shutdown_rx.clone(),
        {
            let service = service.clone();
            move || {
                let service = service.clone();
                async move { service.finish_timeout_tasks().await }
            }
        },
    )));
    background.push(tokio::spawn(run_periodic(
        "delete-expired-tasks",
        cfg.task.max_age / 2,
        shutdown_rx.clone(),
        {
            let service = service.clone();
            move || {
                let service = service.clone();
                async move { service.delete_expired_tasks().await }
            }
        },
    )));
    background.push(tokio::spawn(run_periodic(
        "execute-pending-subtasks",
        cfg.task.restart_delay,
        shutdown_rx.clone(),
        {
            let service = service.clone();
            move || {
                let service = service.clone();
                async move { service.execute_pending_subtasks().await }
            }
        },
    )));

    let app = Arc::new(http::App {
        service,
        probes: http::HealthProbes {
            mongo: Some(store.clone()),
            broker: Some(connection.clone()),
        },
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.server.port))
        .await
        .with_context(|| format!("failed to bind port {}", cfg.server.port))?;
    tracing::info!(addr = %listener.local_addr()?, "manager listening");

    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(?err, "failed to listen for shutdown signal");
            return;
        }
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut shutdown = shutdown_rx.clone();
    axum::serve(listener, http::router(app))
        .with_graceful_shutdown(async move { wait_shutdown(&mut shutdown).await })
        .await
        .context("HTTP server failed")?;

    if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(background))
        .await
        .is_err()
    {
        tracing::warn!("graceful shutdown timed out");
    }
    let _ = channel.close().await;
    let _ = connection.close().await;

    tracing::info!("manager stopped");
    Ok(())
}
