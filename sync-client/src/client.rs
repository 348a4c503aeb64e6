//! CampaignClient - the main interface for joining a campaign.
//!
//! # Architecture
//!
//! After the handshake the connection is split into two tasks:
//!
//! ```text
//! Application → CampaignClient ─► writer task ─► socket
//!                    ▲                  ▲
//!                    │            upload manager
//!              ClientEvent ◄── reader task ◄── socket
//!                                   │
//!                            download manager → AssetStore
//! ```
//!
//! The writer always drains queued messages before producing the next
//! upload chunk, so commands are never stuck behind asset bytes.
//!
//! # Example
//!
//! ```ignore
//! use sync_client::{CampaignClient, ClientConfig};
//!
//! let config = ClientConfig::new("Alice", Role::Player, "staging").with_password("goblin");
//! let (client, mut events) = CampaignClient::connect("127.0.0.1:51234", config, store).await?;
//! client.send(Command::PutToken { zone, token })?;
//! while let Some(event) = events.recv().await { /* ... */ }
//! ```

use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use sync_transfer::{
    AssetProducer, AssetStore, AssetTransferManager, ConsumerListener, TransferError,
    TransferProgress, DEFAULT_CHUNK_SIZE,
};
use sync_types::model::AssetInfo;
use sync_types::{
    read_message, write_message, AssetHeader, AssetId, Command, HandshakeRequest,
    HandshakeResponse, Identity, Message, Nack, Role, ServerPolicy, SyncError,
    MAX_CHUNK_PAYLOAD, PROTOCOL_VERSION,
};

/// How long to wait for the server's handshake response.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Frame encode/decode or socket failure.
    #[error("wire error: {0}")]
    Wire(#[from] SyncError),

    /// Asset transfer failed locally.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(#[from] std::io::Error),

    /// The server refused the handshake.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The server sent something other than a handshake response.
    #[error("unexpected message during handshake: {0}")]
    UnexpectedMessage(&'static str),

    /// The server did not answer the handshake in time.
    #[error("handshake timeout")]
    Timeout,

    /// The connection is closed.
    #[error("not connected")]
    NotConnected,
}

/// Configuration for CampaignClient.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Player name; must be unique on the server (case-insensitive).
    pub name: String,
    /// Password for the requested role.
    pub password: Option<String>,
    /// Requested role.
    pub role: Role,
    /// Directory for partially downloaded assets.
    pub staging_dir: PathBuf,
    /// Maximum upload chunk payload.
    pub chunk_size: usize,
    /// Protocol version announced in the handshake.
    pub version: String,
}

impl ClientConfig {
    /// Create a configuration with no password and default chunk size.
    pub fn new(name: impl Into<String>, role: Role, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            password: None,
            role,
            staging_dir: staging_dir.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Set the password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the upload chunk size, clamped so a chunk always fits in a frame.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_PAYLOAD);
        self
    }

    /// Announce a different protocol version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    fn hello(&self) -> HandshakeRequest {
        let mut request = HandshakeRequest::new(self.name.clone(), self.password.clone(), self.role);
        request.version = self.version.clone();
        request
    }
}

/// Something the server told us.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A participant is connected (sent for everyone, ourselves included,
    /// right after joining).
    PlayerConnected(Identity),
    /// A participant left.
    PlayerDisconnected(Identity),
    /// A campaign command from another participant, or a query answer.
    Command(Command),
    /// A download made progress.
    AssetProgress {
        /// Asset being received.
        id: AssetId,
        /// Fraction received, 0.0 to 1.0.
        percent: f64,
    },
    /// A download finished, passed its hash check and is in the store.
    AssetReceived(AssetInfo),
    /// A transfer in either direction was abandoned.
    AssetFailed {
        /// Asset concerned.
        id: AssetId,
        /// Why.
        reason: String,
    },
    /// The server dropped one of our commands.
    Nack(Nack),
    /// The connection is closed.
    Closed {
        /// Reason from the server's `Bye`, if any.
        reason: Option<String>,
    },
}

/// Sender half of the event stream.
pub type EventSender = mpsc::UnboundedSender<ClientEvent>;

/// Receiver half of the event stream.
pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

/// Asset ids asked of the server whose download has not yet settled.
#[derive(Debug, Default)]
struct Requested(Mutex<HashSet<AssetId>>);

impl Requested {
    fn lock(&self) -> MutexGuard<'_, HashSet<AssetId>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns false when `id` is already outstanding.
    fn insert(&self, id: AssetId) -> bool {
        self.lock().insert(id)
    }

    fn settle(&self, id: &AssetId) {
        self.lock().remove(id);
    }
}

/// A connection to a campaign server.
pub struct CampaignClient {
    identity: Identity,
    policy: ServerPolicy,
    outbound: mpsc::UnboundedSender<Message>,
    uploads: Arc<AssetTransferManager>,
    upload_gate: Mutex<()>,
    downloads: Arc<AssetTransferManager>,
    requested: Arc<Requested>,
    wake: Arc<Notify>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for CampaignClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignClient")
            .field("identity", &self.identity)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl CampaignClient {
    /// Connect over TCP and complete the handshake.
    ///
    /// Completed downloads are imported into `store`.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        config: ClientConfig,
        store: Arc<dyn AssetStore>,
    ) -> Result<(Self, EventReceiver), ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::connect_stream(stream, config, store).await
    }

    /// Complete the handshake over an already connected stream.
    pub async fn connect_stream<S>(
        stream: S,
        config: ClientConfig,
        store: Arc<dyn AssetStore>,
    ) -> Result<(Self, EventReceiver), ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        write_message(&mut writer, &Message::Hello(config.hello())).await?;
        let response = match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_message(&mut reader)).await {
            Ok(Ok(Some(Message::HelloResponse(response)))) => response,
            Ok(Ok(Some(other))) => return Err(ClientError::UnexpectedMessage(other.kind())),
            Ok(Ok(None)) => return Err(ClientError::NotConnected),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ClientError::Timeout),
        };
        let policy = accept(response)?;
        let identity = Identity::new(config.name.clone(), config.role);
        tracing::info!("Joined as {} ({})", identity.name, identity.role);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let uploads = Arc::new(AssetTransferManager::new());
        let downloads = Arc::new(AssetTransferManager::new());
        let requested = Arc::new(Requested::default());
        downloads.add_consumer_listener(Arc::new(DownloadListener {
            store,
            requested: Arc::clone(&requested),
            events: events_tx.clone(),
        }));
        let wake = Arc::new(Notify::new());

        let writer = tokio::spawn(write_loop(
            writer,
            outbound_rx,
            Arc::clone(&uploads),
            Arc::clone(&wake),
            config.chunk_size,
            events_tx.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            reader,
            Arc::clone(&downloads),
            Arc::clone(&requested),
            config.staging_dir.clone(),
            events_tx,
        ));

        Ok((
            Self {
                identity,
                policy,
                outbound: outbound_tx,
                uploads,
                upload_gate: Mutex::new(()),
                downloads,
                requested,
                wake,
                writer,
                reader,
            },
            events_rx,
        ))
    }

    /// Our identity on the server.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Policy the server advertised at handshake time.
    pub fn policy(&self) -> &ServerPolicy {
        &self.policy
    }

    /// Send a campaign command.
    pub fn send(&self, command: Command) -> Result<(), ClientError> {
        self.outbound
            .send(Message::Command(command))
            .map_err(|_| ClientError::NotConnected)
    }

    /// Ask the server for an asset. Progress and the result arrive as events.
    ///
    /// Asking again while the asset is still on its way is a no-op.
    pub fn request_asset(&self, id: AssetId) -> Result<(), ClientError> {
        if !self.requested.insert(id) {
            tracing::debug!("{} already requested", id);
            return Ok(());
        }
        let sent = self.send(Command::GetAsset { id });
        if sent.is_err() {
            self.requested.settle(&id);
        }
        sent
    }

    /// Upload an asset from a local store.
    pub async fn upload(
        &self,
        store: Arc<dyn AssetStore>,
        id: AssetId,
    ) -> Result<AssetHeader, ClientError> {
        let producer = tokio::task::spawn_blocking(move || AssetProducer::from_store(&*store, &id))
            .await
            .map_err(|e| ClientError::ConnectionFailed(std::io::Error::other(e)))??;
        self.queue_upload(producer)
    }

    /// Upload in-memory bytes under their content id.
    pub fn upload_bytes(&self, name: impl Into<String>, bytes: Vec<u8>) -> Result<AssetHeader, ClientError> {
        let header = AssetHeader {
            id: AssetId::of(&bytes),
            name: name.into(),
            size: bytes.len() as u64,
        };
        self.queue_upload(AssetProducer::new(header, Box::new(Cursor::new(bytes))))
    }

    fn queue_upload(&self, producer: AssetProducer) -> Result<AssetHeader, ClientError> {
        let header = producer.header().clone();
        let _gate = self.upload_gate.lock().unwrap_or_else(PoisonError::into_inner);
        // Chunks carry no offset; a second stream of the same id would
        // interleave with the first on the server.
        if self.uploads.has_producer(&header.id) {
            tracing::debug!("{} is already uploading", header.name);
            return Ok(header);
        }
        // Header goes through the message queue first; the writer drains that
        // queue before producing any chunk.
        self.outbound
            .send(Message::AssetHeader(header.clone()))
            .map_err(|_| ClientError::NotConnected)?;
        self.uploads.add_producer(producer);
        self.wake.notify_one();
        Ok(header)
    }

    /// Downloads in progress.
    pub fn downloads(&self) -> Vec<TransferProgress> {
        self.downloads.consumers()
    }

    /// Uploads still being sent.
    pub fn pending_uploads(&self) -> usize {
        self.uploads.producer_count()
    }

    /// Say goodbye and close the connection.
    pub async fn close(self) -> Result<(), ClientError> {
        let _ = self.outbound.send(Message::Bye {
            reason: "Client closing".into(),
        });
        drop(self.outbound);
        let _ = tokio::time::timeout(Duration::from_secs(2), self.writer).await;
        self.reader.abort();
        self.downloads.cancel_all();
        self.uploads.cancel_all();
        Ok(())
    }
}

fn accept(response: HandshakeResponse) -> Result<ServerPolicy, ClientError> {
    if !response.is_ok() {
        return Err(ClientError::Rejected(response.message.unwrap_or_default()));
    }
    Ok(response.policy.unwrap_or_default())
}

/// Imports finished downloads and reports progress.
struct DownloadListener {
    store: Arc<dyn AssetStore>,
    requested: Arc<Requested>,
    events: EventSender,
}

impl ConsumerListener for DownloadListener {
    fn asset_updated(&self, id: &AssetId, percent: f64) {
        let _ = self.events.send(ClientEvent::AssetProgress { id: *id, percent });
    }

    fn asset_complete(&self, header: &AssetHeader, path: &Path) {
        self.requested.settle(&header.id);
        let event = match self.store.import(header, path) {
            Ok(info) => ClientEvent::AssetReceived(info),
            Err(e) => ClientEvent::AssetFailed {
                id: header.id,
                reason: e.to_string(),
            },
        };
        let _ = self.events.send(event);
    }

    fn asset_failed(&self, id: &AssetId, error: &TransferError) {
        self.requested.settle(id);
        let _ = self.events.send(ClientEvent::AssetFailed {
            id: *id,
            reason: error.to_string(),
        });
    }
}

async fn read_loop<S>(
    mut reader: ReadHalf<S>,
    downloads: Arc<AssetTransferManager>,
    requested: Arc<Requested>,
    staging_dir: PathBuf,
    events: EventSender,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let reason = loop {
        let message = match read_message(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => break None,
            Err(e) => {
                tracing::warn!("Connection lost: {}", e);
                break Some(e.to_string());
            }
        };

        let event = match message {
            Message::Command(command) => Some(ClientEvent::Command(command)),
            Message::PlayerConnected(identity) => Some(ClientEvent::PlayerConnected(identity)),
            Message::PlayerDisconnected(identity) => Some(ClientEvent::PlayerDisconnected(identity)),
            Message::Nack(nack) => Some(ClientEvent::Nack(nack)),
            Message::AssetFailed { id, reason } => {
                // A pending download reports through its listener.
                if downloads.cancel_consumer(&id) {
                    None
                } else {
                    requested.settle(&id);
                    Some(ClientEvent::AssetFailed { id, reason })
                }
            }
            Message::AssetHeader(header) => {
                let manager = Arc::clone(&downloads);
                let dir = staging_dir.clone();
                let id = header.id;
                let started =
                    tokio::task::spawn_blocking(move || manager.start_consumer(&dir, header)).await;
                let failure = match started {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(e) => Some(e.to_string()),
                };
                failure.map(|reason| {
                    requested.settle(&id);
                    ClientEvent::AssetFailed { id, reason }
                })
            }
            Message::AssetChunk(chunk) => {
                let manager = Arc::clone(&downloads);
                let id = chunk.id;
                match tokio::task::spawn_blocking(move || manager.update(&chunk)).await {
                    // Failures of a known download were already reported.
                    Ok(Err(TransferError::UnexpectedChunk { .. })) => {
                        tracing::debug!("Chunk for unknown asset {}", id);
                        None
                    }
                    Ok(_) => None,
                    Err(e) => {
                        tracing::error!("Download worker failed: {}", e);
                        None
                    }
                }
            }
            Message::Bye { reason } => break Some(reason),
            other => {
                tracing::debug!("Ignoring {} from server", other.kind());
                None
            }
        };
        if let Some(event) = event {
            if events.send(event).is_err() {
                break None;
            }
        }
    };

    downloads.cancel_all();
    let _ = events.send(ClientEvent::Closed { reason });
}

async fn write_loop<S>(
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    uploads: Arc<AssetTransferManager>,
    wake: Arc<Notify>,
    chunk_size: usize,
    events: EventSender,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    if let Err(e) = drain(&mut writer, &mut outbound, &uploads, &wake, chunk_size, &events).await {
        tracing::warn!("Writer stopped: {}", e);
    }
    uploads.cancel_all();
    let _ = writer.shutdown().await;
}

async fn drain<S>(
    writer: &mut WriteHalf<S>,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
    uploads: &Arc<AssetTransferManager>,
    wake: &Notify,
    chunk_size: usize,
    events: &EventSender,
) -> Result<(), SyncError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    loop {
        tokio::select! {
            biased;
            message = outbound.recv() => {
                let Some(message) = message else { return Ok(()) };
                let bye = matches!(message, Message::Bye { .. });
                write_message(writer, &message).await?;
                if bye {
                    return Ok(());
                }
            }
            _ = std::future::ready(()), if uploads.has_producers() => {
                let manager = Arc::clone(uploads);
                let produced = tokio::task::spawn_blocking(move || manager.next_chunk(chunk_size))
                    .await
                    .map_err(|e| SyncError::Io(std::io::Error::other(e)))?;
                match produced {
                    Ok(Some(chunk)) => write_message(writer, &Message::AssetChunk(chunk)).await?,
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!("Upload failed: {}", e);
                        if let Some(id) = e.asset_id() {
                            let _ = events.send(ClientEvent::AssetFailed {
                                id,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
            _ = wake.notified() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_transfer::MemoryAssetStore;
    use sync_types::{AssetChunk, ResponseCode};
    use tokio::io::{duplex, DuplexStream};

    fn store() -> Arc<dyn AssetStore> {
        Arc::new(MemoryAssetStore::new())
    }

    async fn fake_server(
        mut server: DuplexStream,
        response: HandshakeResponse,
    ) -> (DuplexStream, HandshakeRequest) {
        let hello = match read_message(&mut server).await.unwrap() {
            Some(Message::Hello(hello)) => hello,
            other => panic!("expected hello, got {other:?}"),
        };
        write_message(&mut server, &Message::HelloResponse(response))
            .await
            .unwrap();
        (server, hello)
    }

    #[tokio::test]
    async fn handshake_carries_name_role_and_version() {
        let (client_io, server_io) = duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server_io, HandshakeResponse::ok(ServerPolicy::default())));

        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::new("Alice", Role::Gm, dir.path()).with_password("dragon");
        let (client, _events) = CampaignClient::connect_stream(client_io, config, store())
            .await
            .unwrap();
        let (_server_io, hello) = server.await.unwrap();

        assert_eq!(hello.name, "Alice");
        assert_eq!(hello.role, Role::Gm);
        assert_eq!(hello.password.as_deref(), Some("dragon"));
        assert_eq!(hello.version, PROTOCOL_VERSION);
        assert!(client.identity().is_gm());
    }

    #[tokio::test]
    async fn rejection_surfaces_message() {
        let (client_io, server_io) = duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server_io, HandshakeResponse::error("Wrong password")));

        let dir = tempfile::tempdir().unwrap();
        let err = CampaignClient::connect_stream(
            client_io,
            ClientConfig::new("Bob", Role::Player, dir.path()),
            store(),
        )
        .await
        .unwrap_err();
        let _ = server.await;
        assert!(matches!(err, ClientError::Rejected(ref m) if m == "Wrong password"));
    }

    #[test]
    fn unknown_response_code_is_rejection() {
        let response = HandshakeResponse {
            code: ResponseCode::Unknown,
            message: None,
            policy: None,
        };
        assert!(matches!(accept(response), Err(ClientError::Rejected(_))));
    }

    #[tokio::test]
    async fn upload_sends_header_before_chunks() {
        let (client_io, server_io) = duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server_io, HandshakeResponse::ok(ServerPolicy::default())));
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::new("Alice", Role::Player, dir.path()).with_chunk_size(4);
        let (client, _events) = CampaignClient::connect_stream(client_io, config, store())
            .await
            .unwrap();
        let (mut server_io, _) = server.await.unwrap();

        let header = client.upload_bytes("note.txt", b"0123456789".to_vec()).unwrap();
        assert_eq!(header.size, 10);

        let mut received = Vec::new();
        match read_message(&mut server_io).await.unwrap() {
            Some(Message::AssetHeader(h)) => assert_eq!(h, header),
            other => panic!("expected header, got {other:?}"),
        }
        while received.len() < 10 {
            match read_message(&mut server_io).await.unwrap() {
                Some(Message::AssetChunk(AssetChunk { id, data })) => {
                    assert_eq!(id, header.id);
                    assert!(data.len() <= 4);
                    received.extend(data);
                }
                other => panic!("expected chunk, got {other:?}"),
            }
        }
        assert_eq!(received, b"0123456789");
    }

    /// Nothing else arrives from the client within a short window.
    async fn assert_quiet(server_io: &mut DuplexStream) {
        let next = tokio::time::timeout(Duration::from_millis(200), read_message(server_io)).await;
        assert!(next.is_err(), "unexpected frame {next:?}");
    }

    #[tokio::test]
    async fn repeated_upload_streams_once() {
        let (client_io, server_io) = duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server_io, HandshakeResponse::ok(ServerPolicy::default())));
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::new("Alice", Role::Player, dir.path()).with_chunk_size(4);
        let (client, _events) = CampaignClient::connect_stream(client_io, config, store())
            .await
            .unwrap();
        let (mut server_io, _) = server.await.unwrap();

        let first = client.upload_bytes("note.txt", b"0123456789".to_vec()).unwrap();
        let second = client.upload_bytes("note.txt", b"0123456789".to_vec()).unwrap();
        assert_eq!(first, second);
        assert_eq!(client.pending_uploads(), 1);

        match read_message(&mut server_io).await.unwrap() {
            Some(Message::AssetHeader(h)) => assert_eq!(h, first),
            other => panic!("expected header, got {other:?}"),
        }
        let mut received = Vec::new();
        while received.len() < 10 {
            match read_message(&mut server_io).await.unwrap() {
                Some(Message::AssetChunk(chunk)) => received.extend(chunk.data),
                other => panic!("expected chunk, got {other:?}"),
            }
        }
        assert_eq!(received, b"0123456789");
        assert_quiet(&mut server_io).await;
    }

    #[tokio::test]
    async fn repeated_request_is_sent_once_until_settled() {
        let (client_io, server_io) = duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server_io, HandshakeResponse::ok(ServerPolicy::default())));
        let dir = tempfile::tempdir().unwrap();
        let (client, mut events) = CampaignClient::connect_stream(
            client_io,
            ClientConfig::new("Bob", Role::Player, dir.path()),
            store(),
        )
        .await
        .unwrap();
        let (mut server_io, _) = server.await.unwrap();
        let id = AssetId::of(b"map");

        client.request_asset(id).unwrap();
        client.request_asset(id).unwrap();
        assert_eq!(
            read_message(&mut server_io).await.unwrap(),
            Some(Message::Command(Command::GetAsset { id }))
        );
        assert_quiet(&mut server_io).await;

        write_message(
            &mut server_io,
            &Message::AssetFailed {
                id,
                reason: "Asset not found".into(),
            },
        )
        .await
        .unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            ClientEvent::AssetFailed { id: failed, .. } if failed == id
        ));

        // Settled, so asking again goes out.
        client.request_asset(id).unwrap();
        assert_eq!(
            read_message(&mut server_io).await.unwrap(),
            Some(Message::Command(Command::GetAsset { id }))
        );
    }

    #[test]
    fn chunk_size_is_clamped_to_frame() {
        let config = ClientConfig::new("Bob", Role::Player, "staging");
        assert_eq!(config.clone().with_chunk_size(0).chunk_size, 1);
        assert_eq!(
            config.with_chunk_size(usize::MAX).chunk_size,
            MAX_CHUNK_PAYLOAD
        );
    }

    #[tokio::test]
    async fn download_is_imported_into_store() {
        let (client_io, server_io) = duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server_io, HandshakeResponse::ok(ServerPolicy::default())));
        let dir = tempfile::tempdir().unwrap();
        let local = Arc::new(MemoryAssetStore::new());
        let (_client, mut events) = CampaignClient::connect_stream(
            client_io,
            ClientConfig::new("Bob", Role::Player, dir.path()),
            Arc::clone(&local) as Arc<dyn AssetStore>,
        )
        .await
        .unwrap();
        let (mut server_io, _) = server.await.unwrap();

        let bytes = b"battle map".to_vec();
        let header = AssetHeader {
            id: AssetId::of(&bytes),
            name: "map.png".into(),
            size: bytes.len() as u64,
        };
        write_message(&mut server_io, &Message::AssetHeader(header.clone()))
            .await
            .unwrap();
        for piece in bytes.chunks(3) {
            write_message(
                &mut server_io,
                &Message::AssetChunk(AssetChunk {
                    id: header.id,
                    data: piece.to_vec(),
                }),
            )
            .await
            .unwrap();
        }

        let mut progress = 0;
        loop {
            match events.recv().await.unwrap() {
                ClientEvent::AssetProgress { .. } => progress += 1,
                ClientEvent::AssetReceived(info) => {
                    assert_eq!(info.id, header.id);
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(progress, 3);
        assert_eq!(local.bytes(&header.id), Some(bytes));
    }

    #[tokio::test]
    async fn server_bye_closes_event_stream() {
        let (client_io, server_io) = duplex(64 * 1024);
        let server = tokio::spawn(fake_server(server_io, HandshakeResponse::ok(ServerPolicy::default())));
        let dir = tempfile::tempdir().unwrap();
        let (_client, mut events) = CampaignClient::connect_stream(
            client_io,
            ClientConfig::new("Bob", Role::Player, dir.path()),
            store(),
        )
        .await
        .unwrap();
        let (mut server_io, _) = server.await.unwrap();

        write_message(
            &mut server_io,
            &Message::Bye {
                reason: "Booted by Dm".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::Closed {
                reason: Some("Booted by Dm".into())
            })
        );
    }
}
