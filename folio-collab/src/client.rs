//! WebSocket sync client for one workspace.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Update send/receive for every document of the workspace
//! - Awareness (cursor/selection) updates
//! - Offline queue for edits made while disconnected
//!
//! Sends never block: updates go through an unbounded writer channel, so the
//! client can be called from inside a Yrs observer.

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use folio_reactive::CancellationToken;

use crate::awareness::AwarenessMessage;
use crate::engine::DocTransport;
use crate::lock;
use crate::protocol::{MessageType, ProtocolError, SyncMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection closed or lost
    Disconnected,
    /// CRDT update from a remote peer
    RemoteUpdate {
        client_id: Uuid,
        doc_id: String,
        clock: u64,
        update: Vec<u8>,
    },
    /// A peer sent its state vector and wants what it is missing
    SyncRequested {
        client_id: Uuid,
        doc_id: String,
        state_vector: Vec<u8>,
    },
    /// Answer to our own sync request
    StateSynced { doc_id: String, update: Vec<u8> },
    /// Presence update from a remote peer
    RemoteAwareness(AwarenessMessage),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct SyncClientConfig {
    /// Base URL; the workspace id is appended as the last path segment
    pub server_url: String,
    /// Max updates kept while offline (default: 10,000)
    pub offline_queue_capacity: usize,
    /// Event channel capacity (default: 256)
    pub channel_capacity: usize,
}

impl Default for SyncClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090".to_string(),
            offline_queue_capacity: 10_000,
            channel_capacity: 256,
        }
    }
}

impl SyncClientConfig {
    pub fn for_testing(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            offline_queue_capacity: 100,
            channel_capacity: 64,
        }
    }
}

/// An update waiting for the connection to come back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedUpdate {
    pub doc_id: String,
    pub clock: u64,
    pub payload: Vec<u8>,
}

/// Offline queue for edits made while disconnected.
///
/// Queued updates are replayed, in order, on reconnection.
pub struct OfflineQueue {
    queue: VecDeque<QueuedUpdate>,
    max_size: usize,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Queue an update. Returns `false` when full.
    pub fn enqueue(&mut self, doc_id: impl Into<String>, clock: u64, payload: Vec<u8>) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(QueuedUpdate {
            doc_id: doc_id.into(),
            clock,
            payload,
        });
        true
    }

    pub fn drain(&mut self) -> Vec<QueuedUpdate> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Total payload bytes queued.
    pub fn total_bytes(&self) -> usize {
        self.queue.iter().map(|u| u.payload.len()).sum()
    }
}

/// The sync client.
pub struct SyncClient {
    client_id: Uuid,
    workspace_id: String,
    config: SyncClientConfig,
    state: Arc<Mutex<ConnectionState>>,
    /// Lamport clock for causal ordering
    clock: Arc<AtomicU64>,
    offline_queue: Arc<Mutex<OfflineQueue>>,
    outgoing_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<SyncEvent>>>,
    connection: Mutex<Option<CancellationToken>>,
}

impl SyncClient {
    pub fn new(client_id: Uuid, workspace_id: impl Into<String>, config: SyncClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            client_id,
            workspace_id: workspace_id.into(),
            offline_queue: Arc::new(Mutex::new(OfflineQueue::new(config.offline_queue_capacity))),
            config,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            clock: Arc::new(AtomicU64::new(0)),
            outgoing_tx: Arc::new(Mutex::new(None)),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            connection: Mutex::new(None),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&self) -> Option<mpsc::Receiver<SyncEvent>> {
        lock(&self.event_rx).take()
    }

    /// Connect to `{server_url}/{workspace_id}`.
    ///
    /// Spawns reader and writer tasks, then replays the offline queue.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        if self.connection_state() != ConnectionState::Disconnected {
            return Ok(());
        }
        *lock(&self.state) = ConnectionState::Connecting;

        let url = format!("{}/{}", self.config.server_url, self.workspace_id);
        let ws_stream = match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                log::warn!("Failed to connect to {url}: {e}");
                *lock(&self.state) = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let stop = CancellationToken::new();

        // Writer task: forward the outgoing channel to the socket
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let writer_stop = stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_stop.cancelled() => {
                        let _ = ws_writer.send(Message::Close(None)).await;
                        break;
                    }
                    data = out_rx.recv() => match data {
                        Some(data) => {
                            if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        // Replay under the queue lock so new sends cannot overtake queued ones
        {
            let mut queue = lock(&self.offline_queue);
            let queued = queue.drain();
            if !queued.is_empty() {
                log::info!("Replaying {} queued updates", queued.len());
            }
            for update in queued {
                let msg =
                    SyncMessage::update(self.client_id, update.doc_id, update.clock, update.payload);
                if let Ok(encoded) = msg.encode() {
                    let _ = out_tx.send(encoded);
                }
            }
            *lock(&self.outgoing_tx) = Some(out_tx.clone());
            *lock(&self.state) = ConnectionState::Connected;
        }
        *lock(&self.connection) = Some(stop.clone());
        log::info!("Connected to {url}");
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        // Reader task: decode inbound frames into events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let outgoing = self.outgoing_tx.clone();
        let clock = self.clock.clone();
        let client_id = self.client_id;
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = stop.cancelled() => break,
                    frame = ws_reader.next() => frame,
                };
                match frame {
                    Some(Ok(Message::Binary(data))) => {
                        let msg = match SyncMessage::decode(&data) {
                            Ok(msg) => msg,
                            Err(e) => {
                                log::warn!("Dropping malformed frame: {e}");
                                continue;
                            }
                        };
                        if msg.client_id == client_id {
                            continue;
                        }
                        clock.fetch_max(msg.clock, Ordering::SeqCst);
                        if let Some(event) = inbound_event(msg, client_id, &out_tx) {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }

            if !stop.is_cancelled() {
                log::info!("Connection lost");
                stop.cancel();
                *lock(&outgoing) = None;
                *lock(&state) = ConnectionState::Disconnected;
            }
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Close the connection. Later updates go to the offline queue.
    pub fn disconnect(&self) {
        if let Some(stop) = lock(&self.connection).take() {
            stop.cancel();
        }
        let _queue = lock(&self.offline_queue);
        *lock(&self.outgoing_tx) = None;
        *lock(&self.state) = ConnectionState::Disconnected;
    }

    /// Send a CRDT update, or queue it while disconnected.
    pub fn send_update(&self, doc_id: &str, update: Vec<u8>) -> Result<(), ProtocolError> {
        let clock = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        let mut queue = lock(&self.offline_queue);

        if self.connection_state() == ConnectionState::Connected {
            let msg = SyncMessage::update(self.client_id, doc_id, clock, update);
            if self.send_raw(msg.encode()?).is_ok() {
                return Ok(());
            }
            if !queue.enqueue(doc_id, clock, msg.payload) {
                return Err(ProtocolError::QueueFull);
            }
            return Ok(());
        }

        if !queue.enqueue(doc_id, clock, update) {
            return Err(ProtocolError::QueueFull);
        }
        Ok(())
    }

    /// Send an awareness update. Dropped silently while offline.
    pub fn send_awareness(&self, msg: &AwarenessMessage) -> Result<(), ProtocolError> {
        if self.connection_state() != ConnectionState::Connected {
            return Ok(());
        }
        let clock = self.clock.load(Ordering::SeqCst);
        let encoded = SyncMessage::awareness(self.client_id, clock, msg)?.encode()?;
        self.send_raw(encoded)
    }

    /// Ask peers for everything missing from `state_vector`.
    pub fn request_sync(&self, doc_id: &str, state_vector: Vec<u8>) -> Result<(), ProtocolError> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.send_raw(SyncMessage::sync_step1(self.client_id, doc_id, state_vector).encode()?)
    }

    /// Answer a peer's sync request.
    pub fn send_sync_step2(&self, doc_id: &str, diff: Vec<u8>) -> Result<(), ProtocolError> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.send_raw(SyncMessage::sync_step2(self.client_id, doc_id, diff).encode()?)
    }

    pub fn send_ping(&self) -> Result<(), ProtocolError> {
        self.send_raw(SyncMessage::ping(self.client_id).encode()?)
    }

    fn send_raw(&self, encoded: Vec<u8>) -> Result<(), ProtocolError> {
        match lock(&self.outgoing_tx).as_ref() {
            Some(tx) => tx.send(encoded).map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }

    /// Current Lamport clock value.
    pub fn clock(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    pub fn offline_queue_len(&self) -> usize {
        lock(&self.offline_queue).len()
    }
}

fn inbound_event(
    msg: SyncMessage,
    client_id: Uuid,
    out_tx: &mpsc::UnboundedSender<Vec<u8>>,
) -> Option<SyncEvent> {
    match msg.msg_type {
        MessageType::Update => Some(SyncEvent::RemoteUpdate {
            client_id: msg.client_id,
            doc_id: msg.doc_id,
            clock: msg.clock,
            update: msg.payload,
        }),
        MessageType::SyncStep1 => Some(SyncEvent::SyncRequested {
            client_id: msg.client_id,
            doc_id: msg.doc_id,
            state_vector: msg.payload,
        }),
        MessageType::SyncStep2 => Some(SyncEvent::StateSynced {
            doc_id: msg.doc_id,
            update: msg.payload,
        }),
        MessageType::Awareness => match msg.awareness_message() {
            Ok(awareness) => Some(SyncEvent::RemoteAwareness(awareness)),
            Err(e) => {
                log::warn!("Dropping awareness from {}: {e}", msg.client_id);
                None
            }
        },
        MessageType::Ping => {
            if let Ok(pong) = SyncMessage::pong(client_id).encode() {
                let _ = out_tx.send(pong);
            }
            None
        }
        MessageType::Pong => None,
    }
}

impl DocTransport for SyncClient {
    fn push_update(&self, doc_id: &str, update: Vec<u8>) -> Result<(), ProtocolError> {
        self.send_update(doc_id, update)
    }

    fn push_awareness(&self, msg: &AwarenessMessage) -> Result<(), ProtocolError> {
        self.send_awareness(msg)
    }

    fn request_sync(&self, doc_id: &str, state_vector: Vec<u8>) -> Result<(), ProtocolError> {
        SyncClient::request_sync(self, doc_id, state_vector)
    }

    fn respond_sync(&self, doc_id: &str, diff: Vec<u8>) -> Result<(), ProtocolError> {
        self.send_sync_step2(doc_id, diff)
    }
}
