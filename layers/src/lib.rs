//! Protocol Stack Layers Library
//!
//! Implements the NB-IoT eNB protocol stack (PHY + MAC), plus narrow
//! external-collaborator stubs for RLC/PDCP/RRC/S1AP, per 3GPP Release 13/14.

pub mod phy;
pub mod mac;
pub mod rlc;
pub mod pdcp;
pub mod rrc;
pub mod s1ap;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Decode failure sub-kind, mirrors spec.md's `DecodeError` taxonomy.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    #[error("CRC mismatch")]
    CrcMismatch,
    #[error("unsupported format or configuration")]
    Unsupported,
    #[error("truncated input")]
    Truncated,
}

/// Common errors for protocol layers.
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("invalid protocol data unit")]
    InvalidPdu,

    #[error("layer not initialized")]
    NotInitialized,

    #[error("resource unavailable")]
    ResourceUnavailable,

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("processing error: {0}")]
    ProcessingError(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    #[error("CRC check failed")]
    CrcFailed,

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration is structurally invalid (bad field combination,
    /// out-of-range value caught at startup rather than at config parse time).
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    /// A resource (NPDCCH candidate, NPDSCH subframe set, HARQ process) was
    /// already claimed when a new grant needed it.
    #[error("resource busy: {0}")]
    ResourceBusy(String),

    /// Two DCI candidates were scheduled to the same NPDCCH occasion.
    #[error("DCI collision at occasion {0}")]
    DciCollision(u64),

    /// Two grants were scheduled onto overlapping resource blocks.
    #[error("resource block collision: {0}")]
    RbCollision(String),

    /// Failure while decoding a received transport block or control channel.
    #[error("decode error: {kind}")]
    DecodeError { kind: DecodeErrorKind },

    /// The NPRACH sample stream ended unexpectedly or carried bad framing.
    #[error("NPRACH stream error: {0}")]
    NprachStreamError(String),

    /// The radio front end (ZMQ RF interface) is no longer reachable.
    #[error("radio link lost: {0}")]
    RadioLost(String),
}

/// Common trait for all protocol layers.
#[async_trait]
pub trait ProtocolLayer: Send + Sync {
    /// Initialize the layer.
    async fn initialize(&mut self) -> Result<(), LayerError>;

    /// Process incoming data from lower layer.
    async fn process_uplink(&mut self, data: Bytes) -> Result<Bytes, LayerError>;

    /// Process outgoing data from upper layer.
    async fn process_downlink(&mut self, data: Bytes) -> Result<Bytes, LayerError>;

    /// Shutdown the layer.
    async fn shutdown(&mut self) -> Result<(), LayerError>;
}
