//! Web server for chatrelay.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::chat::{ChatHub, HubSettings, MessageLog};
use crate::config::Config;
use crate::file::UploadStore;
use crate::{RelayError, Result};

use super::router::create_router;
use super::ws::ChatWsState;

/// The relay's HTTP/WebSocket server.
pub struct ChatServer {
    listener: TcpListener,
    router: Router,
    hub: Arc<ChatHub>,
    config: Config,
}

impl ChatServer {
    /// Prepare storage, restore history and bind the listener.
    ///
    /// Failing to create the data or upload directory is fatal. A missing or
    /// unreadable history snapshot is not: the relay starts with what it has.
    pub async fn bind(config: &Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.storage.data_dir)
            .await
            .map_err(|e| {
                RelayError::Config(format!(
                    "cannot create data directory {}: {}",
                    config.storage.data_dir, e
                ))
            })?;
        let uploads = UploadStore::new(&config.storage.uploads_dir).map_err(|e| {
            RelayError::Config(format!(
                "cannot create uploads directory {}: {}",
                config.storage.uploads_dir, e
            ))
        })?;

        let log = MessageLog::new(config.storage.history_path());
        match log.restore().await {
            Ok(0) => tracing::info!(path = %log.path().display(), "No chat history to restore"),
            Ok(count) => tracing::info!(count, "Chat history restored"),
            Err(e) => tracing::warn!(error = %e, "Failed to restore chat history"),
        }

        let (hub, _broadcaster) = ChatHub::start(log, HubSettings::from(config));
        let state = Arc::new(ChatWsState::new(
            Arc::clone(&hub),
            Arc::new(uploads),
            config.server.idle_timeout(),
        ));
        let router = create_router(state, &config.storage);

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await?;

        Ok(Self {
            listener,
            router,
            hub,
            config: config.clone(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> Arc<ChatHub> {
        Arc::clone(&self.hub)
    }

    /// Serve until `shutdown` resolves.
    ///
    /// On shutdown the history is persisted first, then the listener stops and
    /// in-flight work gets `shutdown_grace` to finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = self.listener.local_addr()?;
        let persist_task =
            Self::start_persist_task(Arc::clone(&self.hub), self.config.relay.persist_interval());
        let sweep_task =
            Self::start_sweep_task(Arc::clone(&self.hub), self.config.relay.sweep_interval());

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serve = axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        });
        let mut server = tokio::spawn(async move { serve.await });

        tracing::info!("Chat relay listening on http://{}", local_addr);

        tokio::select! {
            _ = shutdown => tracing::info!("Shutdown signal received"),
            result = &mut server => {
                persist_task.abort();
                sweep_task.abort();
                return match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(RelayError::Transport(e.to_string())),
                };
            }
        }

        persist_task.abort();
        sweep_task.abort();

        match self.hub.log().persist().await {
            Ok(count) => tracing::info!(count, "Chat history saved"),
            Err(e) => tracing::error!(error = %e, "Failed to save chat history"),
        }

        let _ = stop_tx.send(());
        let grace = self.config.server.shutdown_grace();
        match tokio::time::timeout(grace, server).await {
            Ok(Ok(Ok(()))) => tracing::info!("Server stopped"),
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Server stopped with error"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Server task failed"),
            Err(_) => tracing::warn!(
                grace_secs = grace.as_secs(),
                "Connections still open after shutdown grace"
            ),
        }

        Ok(())
    }

    /// Serve in the background until the process exits.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run_until(std::future::pending()))
    }

    /// Start the periodic history snapshot task.
    fn start_persist_task(hub: Arc<ChatHub>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            // Skip the first immediate tick
            interval.tick().await;

            loop {
                interval.tick().await;

                match hub.log().persist().await {
                    Ok(count) => tracing::debug!(count, "Chat history saved"),
                    Err(e) => tracing::warn!(error = %e, "Failed to save chat history"),
                }
            }
        })
    }

    /// Start the task that drops stale reconnect records.
    fn start_sweep_task(hub: Arc<ChatHub>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                interval.tick().await;

                let removed = hub.sweep_disconnects().await;
                if removed > 0 {
                    tracing::debug!(removed, "Swept stale disconnect records");
                }
            }
        })
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
