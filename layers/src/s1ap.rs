//! S1 Application Protocol (S1AP) Layer — narrow external-collaborator stub.
//!
//! The MME/EPC side of the interface (3GPP TS 36.413) is explicitly out of
//! scope (spec.md's Non-goals exclude the core-network-facing side of the
//! stack); this module only carries enough of a typed surface for the NB-IoT
//! eNB's RRC layer to hand off an Initial UE Message / NAS PDU to, modeled on
//! the teacher's `NgapLayer` (same connection-state machine and
//! `ProtocolLayer` wiring, S1AP procedure codes in place of NGAP's).

use crate::{LayerError, ProtocolLayer};
use async_trait::async_trait;
use bytes::Bytes;
use interfaces::pcap::S1apPcapWriter;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// S1AP layer configuration.
pub struct S1apConfig {
    /// MME address (S1-MME, SCTP port 36412).
    pub mme_address: SocketAddr,
    pub local_address: SocketAddr,
    pub enb_id: u32,
    pub plmn_id: [u8; 3],
    /// Path to write an S1AP pcap capture to, iff `pcap.s1ap_enable`
    /// (spec.md §6). `None` disables capture.
    pub pcap_path: Option<String>,
}

/// S1AP layer implementation. The SCTP association itself is out of scope;
/// `initialized`/`s1_connected` model the state machine the RRC layer
/// observes without requiring a live MME to exercise it.
pub struct S1apLayer {
    config: S1apConfig,
    initialized: bool,
    s1_connected: bool,
    pcap: Option<Mutex<S1apPcapWriter>>,
    pcap_seq: AtomicU32,
}

impl S1apLayer {
    pub fn new(config: S1apConfig) -> Result<Self, LayerError> {
        let pcap = match &config.pcap_path {
            Some(path) => Some(Mutex::new(S1apPcapWriter::open(path).map_err(|e| {
                LayerError::InitializationFailed(format!("S1AP pcap open failed: {e}"))
            })?)),
            None => None,
        };
        Ok(Self {
            config,
            initialized: false,
            s1_connected: false,
            pcap,
            pcap_seq: AtomicU32::new(0),
        })
    }

    async fn capture(&self, pdu: &Bytes) {
        if let Some(pcap) = &self.pcap {
            let seq = self.pcap_seq.fetch_add(1, Ordering::Relaxed);
            let mut writer = pcap.lock().await;
            if let Err(e) = writer.write_pdu(seq, pdu) {
                warn!(error = %e, "S1AP pcap write failed");
            }
        }
    }

    async fn setup_s1_connection(&mut self) -> Result<(), LayerError> {
        info!("setting up S1 connection to MME at {}", self.config.mme_address);
        self.s1_connected = true;
        info!("S1 connection established");
        Ok(())
    }
}

#[async_trait]
impl ProtocolLayer for S1apLayer {
    async fn initialize(&mut self) -> Result<(), LayerError> {
        info!("initializing S1AP layer");
        debug!(enb_id = format!("{:#x}", self.config.enb_id), mme = %self.config.mme_address, "S1AP config");

        self.initialized = true;
        if let Err(e) = self.setup_s1_connection().await {
            self.initialized = false;
            return Err(e);
        }
        Ok(())
    }

    async fn process_uplink(&mut self, data: Bytes) -> Result<Bytes, LayerError> {
        if !self.initialized {
            return Err(LayerError::NotInitialized);
        }
        if !self.s1_connected {
            return Err(LayerError::ProcessingError("S1 connection not established".to_string()));
        }
        debug!(bytes = data.len(), "S1AP uplink (Initial UE Message / NAS transport)");
        self.capture(&data).await;
        Ok(data)
    }

    async fn process_downlink(&mut self, data: Bytes) -> Result<Bytes, LayerError> {
        if !self.initialized {
            return Err(LayerError::NotInitialized);
        }
        debug!(bytes = data.len(), "S1AP downlink NAS transport");
        self.capture(&data).await;
        Ok(data)
    }

    async fn shutdown(&mut self) -> Result<(), LayerError> {
        info!("shutting down S1AP layer");
        self.s1_connected = false;
        self.initialized = false;
        Ok(())
    }
}

/// S1AP procedure codes this eNB's narrow surface cares about (36.413 §9.2).
#[derive(Debug, Clone, Copy)]
pub enum S1apProcedureCode {
    S1Setup = 17,
    InitialUeMessage = 12,
    DownlinkNasTransport = 11,
    UplinkNasTransport = 13,
    UeContextReleaseRequest = 21,
    UeContextReleaseCommand = 23,
}

#[derive(Debug, Clone)]
pub struct S1apMessage {
    pub procedure_code: S1apProcedureCode,
    pub criticality: u8,
    pub payload: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_s1ap_initialization() {
        let config = S1apConfig {
            mme_address: SocketAddr::from_str("127.0.0.1:36412").unwrap(),
            local_address: SocketAddr::from_str("0.0.0.0:36412").unwrap(),
            enb_id: 0x19B,
            plmn_id: [0x02, 0xF8, 0x39],
            pcap_path: None,
        };

        let mut s1ap = S1apLayer::new(config).unwrap();
        assert!(s1ap.initialize().await.is_ok());
        assert!(s1ap.shutdown().await.is_ok());
    }
}
