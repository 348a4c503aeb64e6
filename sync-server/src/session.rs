//! Per-connection session management.
//!
//! A session reads the handshake, admits the connection, then splits into a
//! reader (this task) and a writer task. The writer drains two queues with
//! a biased select: the command queue always goes first, the chunk queue
//! only when no command is waiting. Commands therefore never wait behind
//! asset bytes. Both queues are bounded; a peer that lets its command queue
//! fill up is disconnected.

use crate::error::{ProtocolError, ProtocolResult};
use crate::registry::{outbound_queue, Outbound, OutboundReceiver};
use crate::router::CommandRouter;
use crate::server::{ServerContext, ServerMetrics};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use sync_types::{
    read_message, write_message, AssetChunk, ConnectionId, HandshakeRequest, Message, Nack,
    SyncError,
};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};

/// How long the writer gets to flush `Bye` and queued messages after the
/// reader has finished.
const WRITER_GRACE: Duration = Duration::from_secs(2);

/// A per-connection session.
pub struct Session {
    ctx: Arc<ServerContext>,
    router: CommandRouter,
    connection: ConnectionId,
    peer: SocketAddr,
}

impl Session {
    /// Create a new session for an accepted socket.
    pub fn new(ctx: Arc<ServerContext>, connection: ConnectionId, peer: SocketAddr) -> Self {
        Self {
            router: CommandRouter::new(Arc::clone(&ctx)),
            ctx,
            connection,
            peer,
        }
    }

    /// Run the session until the connection closes.
    pub async fn run(self, stream: TcpStream) -> ProtocolResult<()> {
        tracing::info!("New connection from {} ({})", self.peer, self.connection);
        let (mut reader, mut writer) = stream.into_split();

        let request = self.await_hello(&mut reader).await?;

        let (out_tx, out_rx) = outbound_queue(self.ctx.config().limits.outbound_queue_depth);
        let overflow = out_tx.overflow_signal();
        let (chunk_tx, chunk_rx) = mpsc::channel(self.ctx.config().limits.chunk_queue_depth);
        self.ctx.transfers().open(
            self.connection,
            chunk_tx,
            Arc::clone(self.ctx.store()),
            out_tx.clone(),
            Arc::clone(self.ctx.metrics()),
        );

        let admission = self.ctx.admit(self.connection, &request, out_tx).await;
        if admission.identity.is_none() {
            self.ctx.transfers().cancel_transfers_for(self.connection);
            write_message(&mut writer, &Message::HelloResponse(admission.response.clone())).await?;
            let _ = writer.shutdown().await;
            return Err(ProtocolError::Rejected(
                admission.response.message.unwrap_or_default(),
            ));
        }

        let (closed_tx, closed_rx) = watch::channel(false);
        let mut writer_task = tokio::spawn(write_loop(
            writer,
            out_rx,
            chunk_rx,
            Arc::clone(&self.ctx),
            self.connection,
            closed_tx,
        ));

        let result = self.read_loop(reader, closed_rx, &overflow).await;
        self.ctx.disconnect(self.connection).await;

        // Disconnect dropped the last queue senders; let the writer drain.
        if tokio::time::timeout(WRITER_GRACE, &mut writer_task)
            .await
            .is_err()
        {
            writer_task.abort();
        }
        result
    }

    async fn await_hello(&self, reader: &mut OwnedReadHalf) -> ProtocolResult<HandshakeRequest> {
        let timeout_secs = self.ctx.config().limits.hello_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(timeout_secs), read_message(reader)).await {
            Ok(Ok(Some(Message::Hello(request)))) => Ok(request),
            Ok(Ok(Some(other))) => Err(ProtocolError::UnexpectedMessage {
                expected: "hello".into(),
                actual: other.kind().into(),
            }),
            Ok(Ok(None)) => Err(ProtocolError::ClosedDuringHandshake),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                tracing::warn!("Hello timeout ({}s) for {}", timeout_secs, self.peer);
                Err(ProtocolError::HandshakeTimeout)
            }
        }
    }

    async fn read_loop(
        &self,
        mut reader: OwnedReadHalf,
        mut closed: watch::Receiver<bool>,
        overflow: &Notify,
    ) -> ProtocolResult<()> {
        loop {
            let frame = tokio::select! {
                frame = read_message(&mut reader) => frame,
                _ = closed.changed() => {
                    tracing::debug!("Writer closed {}", self.connection);
                    return Ok(());
                }
                _ = overflow.notified() => {
                    tracing::warn!("Dropping {}: outbound queue full", self.connection);
                    return Err(ProtocolError::SlowConsumer(self.connection));
                }
            };

            let message = match frame {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tracing::debug!("{} closed the connection", self.connection);
                    return Ok(());
                }
                // The frame was consumed whole, so the stream is still aligned.
                Err(SyncError::Deserialization(e)) => {
                    tracing::warn!("Undecodable frame from {}: {}", self.connection, e);
                    self.nack("unknown", e.to_string());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match message {
                Message::Command(command) => {
                    let kind = command.kind();
                    if let Err(e) = self.router.dispatch(self.connection, command).await {
                        tracing::warn!("Dropped {} from {}: {}", kind, self.connection, e);
                        self.nack(kind, e.to_string());
                    }
                }
                Message::AssetHeader(header) => {
                    let id = header.id;
                    if let Err(e) = self.ctx.transfers().begin_upload(self.connection, header).await {
                        tracing::warn!("Rejected upload {} from {}: {}", id, self.connection, e);
                        self.asset_failed(id, e.to_string());
                    }
                }
                Message::AssetChunk(chunk) => self.receive_chunk(chunk).await,
                Message::Hello(_) => {
                    tracing::warn!("Second hello from {}", self.connection);
                    self.nack("hello", "connection already identified");
                    self.ctx
                        .registry()
                        .kick(self.connection, "Duplicate handshake");
                    return Err(ProtocolError::DuplicateHello(self.connection));
                }
                Message::Bye { reason } => {
                    tracing::info!("{} said goodbye: {}", self.connection, reason);
                    return Ok(());
                }
                other => {
                    tracing::warn!("Unexpected {} from {}", other.kind(), self.connection);
                    self.nack(other.kind(), "not accepted from clients");
                }
            }
        }
    }

    async fn receive_chunk(&self, chunk: AssetChunk) {
        let metrics = self.ctx.metrics();
        ServerMetrics::add(&metrics.chunks_received, 1);
        ServerMetrics::add(&metrics.bytes_received, chunk.len() as u64);
        let id = chunk.id;
        // Failures of a registered upload are reported by its listener.
        if let Err(e) = self.ctx.transfers().receive_chunk(self.connection, chunk).await {
            tracing::warn!("Chunk for {} from {} dropped: {}", id, self.connection, e);
            if matches!(e, sync_transfer::TransferError::UnexpectedChunk { .. }) {
                self.asset_failed(id, e.to_string());
            }
        }
    }

    fn nack(&self, command: &str, reason: impl Into<String>) {
        ServerMetrics::add(&self.ctx.metrics().commands_dropped, 1);
        self.ctx
            .registry()
            .send_to(self.connection, Message::Nack(Nack::new(command, reason)));
    }

    fn asset_failed(&self, id: sync_types::AssetId, reason: String) {
        self.ctx
            .registry()
            .send_to(self.connection, Message::AssetFailed { id, reason });
    }
}

async fn write_loop(
    writer: OwnedWriteHalf,
    commands: OutboundReceiver,
    chunks: mpsc::Receiver<AssetChunk>,
    ctx: Arc<ServerContext>,
    connection: ConnectionId,
    closed: watch::Sender<bool>,
) {
    if let Err(e) = drain_queues(writer, commands, chunks, &ctx).await {
        tracing::debug!("Writer for {} stopped: {}", connection, e);
    }
    let _ = closed.send(true);
}

async fn drain_queues(
    mut writer: OwnedWriteHalf,
    mut commands: OutboundReceiver,
    mut chunks: mpsc::Receiver<AssetChunk>,
    ctx: &ServerContext,
) -> ProtocolResult<()> {
    let mut chunks_open = true;
    loop {
        tokio::select! {
            biased;
            item = commands.recv() => match item {
                Some(Outbound::Message(message)) => write_message(&mut writer, &message).await?,
                Some(Outbound::Close { reason }) => {
                    write_message(&mut writer, &Message::Bye { reason }).await?;
                    break;
                }
                None => break,
            },
            chunk = chunks.recv(), if chunks_open => match chunk {
                Some(chunk) => {
                    let len = chunk.len() as u64;
                    write_message(&mut writer, &Message::AssetChunk(chunk)).await?;
                    ServerMetrics::add(&ctx.metrics().chunks_sent, 1);
                    ServerMetrics::add(&ctx.metrics().bytes_sent, len);
                    ctx.transfers().wake();
                }
                None => chunks_open = false,
            },
        }
    }
    let _ = writer.shutdown().await;
    Ok(())
}
