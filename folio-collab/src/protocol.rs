//! Binary protocol for CRDT document synchronization.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────────┬──────────┬──────────┐
//! │ msg_type │ client_id │ doc_id       │ clock    │ payload  │
//! │ 1 byte   │ 16 bytes  │ len + utf-8  │ varint   │ variable │
//! └──────────┴───────────┴──────────────┴──────────┴──────────┘
//! ```
//!
//! `doc_id` is the guid of the Yrs document the message refers to; the root
//! document's guid is the workspace id. Awareness messages carry an empty
//! `doc_id` because presence is workspace-wide.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::awareness::AwarenessMessage;

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Yrs state vector, asking the peer for what we are missing
    SyncStep1 = 1,
    /// Yrs state diff answering a SyncStep1
    SyncStep2 = 2,
    /// Incremental CRDT update
    Update = 3,
    /// Presence / cursor update
    Awareness = 4,
    /// Heartbeat ping
    Ping = 5,
    /// Heartbeat pong
    Pong = 6,
}

/// Top-level protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    pub client_id: Uuid,
    pub doc_id: String,
    /// Lamport clock for causal ordering
    pub clock: u64,
    pub payload: Vec<u8>,
}

impl SyncMessage {
    /// Create an update message.
    pub fn update(client_id: Uuid, doc_id: impl Into<String>, clock: u64, yrs_update: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::Update,
            client_id,
            doc_id: doc_id.into(),
            clock,
            payload: yrs_update,
        }
    }

    /// Create a sync step 1 (state vector request).
    pub fn sync_step1(client_id: Uuid, doc_id: impl Into<String>, state_vector: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::SyncStep1,
            client_id,
            doc_id: doc_id.into(),
            clock: 0,
            payload: state_vector,
        }
    }

    /// Create a sync step 2 (state diff response).
    pub fn sync_step2(client_id: Uuid, doc_id: impl Into<String>, state_diff: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::SyncStep2,
            client_id,
            doc_id: doc_id.into(),
            clock: 0,
            payload: state_diff,
        }
    }

    /// Create an awareness message.
    pub fn awareness(client_id: Uuid, clock: u64, msg: &AwarenessMessage) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(msg, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))?;
        Ok(Self {
            msg_type: MessageType::Awareness,
            client_id,
            doc_id: String::new(),
            clock,
            payload,
        })
    }

    pub fn ping(client_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::Ping,
            client_id,
            doc_id: String::new(),
            clock: 0,
            payload: Vec::new(),
        }
    }

    pub fn pong(client_id: Uuid) -> Self {
        Self {
            msg_type: MessageType::Pong,
            client_id,
            doc_id: String::new(),
            clock: 0,
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }

    /// Parse the awareness payload.
    pub fn awareness_message(&self) -> Result<AwarenessMessage, ProtocolError> {
        if self.msg_type != MessageType::Awareness {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (msg, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(msg)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidMessageType,
    ConnectionClosed,
    QueueFull,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidMessageType => write!(f, "Invalid message type"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::QueueFull => write!(f, "Offline queue full"),
        }
    }
}

impl std::error::Error for ProtocolError {}
