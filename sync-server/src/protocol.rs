//! TCP accept loop.
//!
//! [`CampaignServer`] owns the listener and the background tasks (asset
//! pump, cleanup, directory heartbeat). Each accepted socket gets its own
//! [`Session`] task.

use crate::cleanup::spawn_cleanup_task;
use crate::error::Result;
use crate::heartbeat::{spawn_heartbeat_task, Directory, HeartbeatSchedule, HttpDirectory};
use crate::server::{ServerContext, ServerMetrics};
use crate::session::Session;
use crate::transfers::spawn_pump;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Reason sent to every client on shutdown.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// Stops a running [`CampaignServer`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Ask the server to stop. Idempotent.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// A bound, not yet running campaign server.
pub struct CampaignServer {
    ctx: Arc<ServerContext>,
    listener: TcpListener,
    shutdown: Arc<watch::Sender<bool>>,
    directory: Option<Arc<dyn Directory>>,
}

impl CampaignServer {
    /// Bind the game listener from `ctx.config()`.
    pub async fn bind(ctx: Arc<ServerContext>) -> Result<Self> {
        let listener = TcpListener::bind(ctx.config().listen_address()).await?;
        let directory = ctx
            .config()
            .directory
            .register
            .then(|| Arc::new(HttpDirectory::new(&ctx.config().directory.url)) as Arc<dyn Directory>);
        let (tx, _rx) = watch::channel(false);
        Ok(Self {
            ctx,
            listener,
            shutdown: Arc::new(tx),
            directory,
        })
    }

    /// Use a custom directory for the heartbeat, regardless of config.
    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared server state.
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Handle that stops [`run`](Self::run).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    /// Run in a background task.
    pub fn spawn(self) -> (ShutdownHandle, JoinHandle<Result<()>>) {
        let handle = self.shutdown_handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Accept connections until shut down.
    pub async fn run(self) -> Result<()> {
        let addr = self.listener.local_addr()?;
        tracing::info!("Campaign server listening on {} ({})", addr, self.ctx.version());

        let mut background = vec![
            spawn_pump(Arc::clone(&self.ctx), self.shutdown.subscribe()),
            spawn_cleanup_task(Arc::clone(&self.ctx), self.ctx.config().cleanup.clone()),
        ];
        if let Some(directory) = &self.directory {
            let config = &self.ctx.config().directory;
            background.push(spawn_heartbeat_task(
                Arc::clone(directory),
                config.server_name.clone(),
                addr.port(),
                HeartbeatSchedule::from_config(config),
                self.shutdown.subscribe(),
            ));
        }

        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer),
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                },
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        tracing::info!("Shutting down, closing {} connections", self.ctx.registry().len());
        self.ctx.registry().kick_all(SHUTDOWN_REASON);
        for task in background {
            task.abort();
        }
        Ok(())
    }

    fn accept(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        ServerMetrics::add(&self.ctx.metrics().connections_total, 1);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Cannot set TCP_NODELAY for {}: {}", peer, e);
        }
        let connection = self.ctx.next_connection_id();
        let session = Session::new(Arc::clone(&self.ctx), connection, peer);
        // Spawn session handler - don't block the accept loop
        tokio::spawn(async move {
            if let Err(e) = session.run(stream).await {
                tracing::warn!("Session {} ended: {}", connection, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::CampaignStore;
    use sync_transfer::{AssetStore, MemoryAssetStore};

    fn local_config() -> Config {
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1".into();
        config.server.port = 0;
        config
    }

    #[tokio::test]
    async fn binds_ephemeral_port_and_stops() {
        let ctx = Arc::new(ServerContext::new(
            local_config(),
            Box::new(CampaignStore::default()),
            Arc::new(MemoryAssetStore::new()) as Arc<dyn AssetStore>,
        ));
        let server = CampaignServer::bind(ctx).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let (handle, task) = server.spawn();
        handle.shutdown();
        handle.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
