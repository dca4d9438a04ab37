use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Error, Result};
use futures_util::future::join_all;
use tokio::{signal, sync::watch, time::timeout};
use tracing::{error, info, warn};

use crate::{
    api::run_api_server,
    clients::{health::StatusBoard, redis::RedisReplayGuard, remote::RemoteClient},
    config::{Config, ConfigError, ReplayGuardKind},
    dispatcher::Dispatcher,
    handlers::{
        ActionHandler, file_lookup::FileLookupHandler, task_add::TaskAddHandler,
        write_back::WriteBackHandler,
    },
    listener::{Listener, ListenerSettings},
    models::action::ActionCatalog,
    pipeline::Pipeline,
    reference::ReferenceTable,
    registry::HandlerRegistry,
    replay::{MemoryReplayGuard, NoReplayGuard, ReplayGuard},
};

/// Queue name the platform uses for an organisation's action destination.
pub fn destination_name(org_id: i64, queue: &str) -> String {
    format!("actions.{}.{}", org_id, queue)
}

/// Registers every handler enabled by `config`. Fails on a missing reference
/// file or a clash between action names.
pub fn build_registry(
    config: &Config,
    remote: &Arc<RemoteClient>,
) -> Result<HandlerRegistry, ConfigError> {
    let mut registry = HandlerRegistry::new();

    if let Some(path) = &config.lookup_reference_file {
        let table = Arc::new(ReferenceTable::load(
            Path::new(path),
            config.lookup_delimiter(),
        )?);

        let mut handler: Arc<dyn ActionHandler> = Arc::new(FileLookupHandler::new(
            table,
            &config.lookup_source_field,
            &config.lookup_dest_field,
        ));
        if config.lookup_write_back {
            handler = Arc::new(WriteBackHandler::new(handler, Arc::clone(remote)));
        }

        registry.register(&config.lookup_action, &config.lookup_queue, handler)?;
    }

    if config.task_enabled {
        let handler = Arc::new(TaskAddHandler::new(
            Arc::clone(remote),
            &config.task_name_template,
        ));
        registry.register(&config.task_action, &config.task_queue, handler)?;
    }

    if registry.is_empty() {
        return Err(ConfigError::NoHandlers);
    }

    Ok(registry)
}

pub async fn run(config: Config) -> Result<(), Error> {
    config.validate()?;

    let remote = Arc::new(RemoteClient::new(&config.remote_settings())?);
    let org_id = remote
        .connect()
        .await
        .context("Failed to open a Resilient API session")?;

    let definitions = remote
        .action_definitions()
        .await
        .context("Failed to read action definitions")?;
    let catalog = Arc::new(ActionCatalog::from_definitions(definitions));
    info!(actions = catalog.len(), "Action catalog loaded");

    let registry = Arc::new(build_registry(&config, &remote)?);

    let redis_guard = match (config.replay_guard, &config.redis_url) {
        (ReplayGuardKind::Redis, Some(url)) => Some(
            RedisReplayGuard::connect(url, config.replay_ttl_seconds, config.retry_config())
                .await?,
        ),
        _ => None,
    };

    let status_board = StatusBoard::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let broker = Arc::new(config.broker_settings());
    let handler_timeout = Duration::from_secs(config.handler_timeout_seconds);

    let mut listeners = Vec::new();
    for queue in registry.destinations() {
        let replay: Arc<dyn ReplayGuard> = match (&redis_guard, config.replay_guard) {
            (Some(guard), _) => Arc::new(guard.clone()),
            (None, ReplayGuardKind::Memory) => Arc::new(MemoryReplayGuard::new(
                Duration::from_secs(config.replay_ttl_seconds),
            )),
            (None, _) => Arc::new(NoReplayGuard),
        };

        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&catalog),
            Dispatcher::new(Arc::clone(&registry), handler_timeout),
            replay,
        ));

        let listener = Listener::new(
            ListenerSettings {
                destination: destination_name(org_id, &queue),
                broker: Arc::clone(&broker),
                reconnect: config.reconnect_config(),
                publish_retry: config.retry_config(),
                guarantee: config.delivery_guarantee,
            },
            pipeline,
            status_board.clone(),
            shutdown_rx.clone(),
        );

        info!(destination = %listener.destination(), "Starting listener");
        listeners.push(tokio::spawn(listener.run()));
    }

    let api = {
        let status_board = status_board.clone();
        let shutdown_rx = shutdown_rx.clone();
        let port = config.server_port;
        tokio::spawn(async move {
            if let Err(e) = run_api_server(port, status_board, shutdown_rx).await {
                error!(error = %e, "Health check server failed");
            }
        })
    };

    shutdown_signal().await;
    info!("Shutdown requested, waiting for in-flight notifications");
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_secs(config.shutdown_grace_seconds);
    if timeout(grace, join_all(listeners)).await.is_err() {
        warn!(
            grace_secs = config.shutdown_grace_seconds,
            "Grace period elapsed, abandoning unacknowledged notifications"
        );
    }
    api.abort();

    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
