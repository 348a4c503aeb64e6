//! Shared server state.
//!
//! [`ServerContext`] owns the session registry, the authoritative campaign,
//! the asset store and the transfer hub. Sessions, the router and the
//! background tasks all hold an `Arc` to it.

use crate::config::Config;
use crate::handshake::Credentials;
use crate::registry::{Admission, OutboundSender, Outbound, SessionRegistry};
use crate::state::AuthoritativeState;
use crate::transfers::TransferHub;
use std::iter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use sync_transfer::AssetStore;
use sync_types::{
    Command, ConnectionId, HandshakeRequest, Identity, Message, ServerPolicy, PROTOCOL_VERSION,
};
use tokio::sync::{Mutex, MutexGuard};

/// Operational counters.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// TCP connections accepted.
    pub connections_total: AtomicU64,
    /// Handshakes answered with an error.
    pub handshakes_rejected: AtomicU64,
    /// Commands applied and forwarded.
    pub commands_applied: AtomicU64,
    /// Commands dropped with a NACK.
    pub commands_dropped: AtomicU64,
    /// Asset chunks written to clients.
    pub chunks_sent: AtomicU64,
    /// Asset bytes written to clients.
    pub bytes_sent: AtomicU64,
    /// Asset chunks received from clients.
    pub chunks_received: AtomicU64,
    /// Asset bytes received from clients.
    pub bytes_received: AtomicU64,
    /// Uploads verified and stored.
    pub transfers_completed: AtomicU64,
    /// Transfers abandoned in either direction.
    pub transfers_failed: AtomicU64,
}

impl ServerMetrics {
    /// Bump a counter by `n`.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read a counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// State shared by every connection.
pub struct ServerContext {
    config: Config,
    version: String,
    credentials: Credentials,
    policy: RwLock<ServerPolicy>,
    registry: SessionRegistry,
    state: Mutex<Box<dyn AuthoritativeState>>,
    store: Arc<dyn AssetStore>,
    transfers: TransferHub,
    metrics: Arc<ServerMetrics>,
    started_at: Instant,
    next_connection: AtomicU64,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("version", &self.version)
            .field("connections", &self.registry.len())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl ServerContext {
    /// Create the context for a server announcing [`PROTOCOL_VERSION`].
    pub fn new(
        config: Config,
        state: Box<dyn AuthoritativeState>,
        store: Arc<dyn AssetStore>,
    ) -> Self {
        Self::with_version(config, state, store, PROTOCOL_VERSION)
    }

    /// Create the context with an explicit version string.
    pub fn with_version(
        config: Config,
        state: Box<dyn AuthoritativeState>,
        store: Arc<dyn AssetStore>,
        version: impl Into<String>,
    ) -> Self {
        let transfers = TransferHub::new(&config.assets);
        Self {
            credentials: Credentials::from_config(&config.server),
            config,
            version: version.into(),
            policy: RwLock::new(ServerPolicy::default()),
            registry: SessionRegistry::new(),
            state: Mutex::new(state),
            store,
            transfers,
            metrics: Arc::new(ServerMetrics::default()),
            started_at: Instant::now(),
            next_connection: AtomicU64::new(1),
        }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Version string clients must match.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Connected identities.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Asset bytes.
    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    /// Per-connection asset transfers.
    pub fn transfers(&self) -> &TransferHub {
        &self.transfers
    }

    /// Operational counters.
    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    /// When the context was created.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Lock the authoritative campaign.
    ///
    /// Holding this guard serializes mutations with the broadcasts that
    /// follow them, so every client sees commands in one order.
    pub async fn state(&self) -> MutexGuard<'_, Box<dyn AuthoritativeState>> {
        self.state.lock().await
    }

    /// Current server policy.
    pub fn policy(&self) -> ServerPolicy {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the server policy.
    pub fn set_policy(&self, policy: ServerPolicy) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Allocate a connection id.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    /// Run a handshake for `connection`.
    ///
    /// On success the newcomer's queue receives, in order: the OK response,
    /// one `PlayerConnected` per identity (itself included) and a
    /// `SetCampaign` snapshot. Everyone else receives `PlayerConnected` for
    /// the newcomer. On rejection nothing is queued; the caller writes the
    /// returned response itself.
    pub async fn admit(
        &self,
        connection: ConnectionId,
        request: &HandshakeRequest,
        outbound: OutboundSender,
    ) -> Admission {
        let state = self.state().await;
        let admission = self.registry.admit(
            connection,
            request,
            &self.credentials,
            &self.version,
            &self.policy(),
            outbound.clone(),
        );

        let Some(identity) = &admission.identity else {
            ServerMetrics::add(&self.metrics.handshakes_rejected, 1);
            tracing::info!(
                "Handshake rejected for {} ({}): {}",
                request.name,
                connection,
                admission.response.message.as_deref().unwrap_or("")
            );
            return admission;
        };

        let mut queued = vec![Message::HelloResponse(admission.response.clone())];
        queued.extend(
            admission
                .others
                .iter()
                .chain(iter::once(identity))
                .cloned()
                .map(Message::PlayerConnected),
        );
        queued.push(Message::Command(Command::SetCampaign(state.snapshot())));
        for message in queued {
            let _ = outbound.send(Outbound::Message(message));
        }

        self.registry
            .broadcast_except(connection, &Message::PlayerConnected(identity.clone()));
        drop(state);

        tracing::info!(
            "{} joined as {} ({}), {} connected",
            identity.name,
            identity.role,
            connection,
            self.registry.len()
        );
        admission
    }

    /// Tear down a connection: forget its identity, abandon its transfers
    /// and tell everyone else it left.
    pub async fn disconnect(&self, connection: ConnectionId) -> Option<Identity> {
        let state = self.state().await;
        let identity = self.registry.unregister(connection);
        if let Some(identity) = &identity {
            self.registry
                .broadcast_except(connection, &Message::PlayerDisconnected(identity.clone()));
        }
        drop(state);

        let cancelled = self.transfers.cancel_transfers_for(connection);
        if let Some(identity) = &identity {
            tracing::info!(
                "{} left ({}), {} transfers cancelled",
                identity.name,
                connection,
                cancelled
            );
        }
        identity
    }
}
