//! Radio Link Control (RLC) Layer — narrow external-collaborator stub.
//!
//! RLC UM/AM framing (3GPP TS 36.322) sits above the MAC layer this crate
//! implements in full; spec.md scopes this eNB to PHY+MAC, so RLC is kept
//! as a pass-through with the mode/SN-length surface NB-IoT actually uses
//! (NB-IoT RRC only ever configures UM, never AM, but the mode enum is kept
//! so the stub's shape matches what a real RLC would expose).

use crate::{LayerError, ProtocolLayer};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

/// RLC operating modes
#[derive(Debug, Clone, Copy)]
pub enum RlcMode {
    /// Transparent Mode
    Tm,
    /// Unacknowledged Mode
    Um,
    /// Acknowledged Mode
    Am,
}

/// RLC layer configuration
pub struct RlcConfig {
    /// Operating mode
    pub mode: RlcMode,
    /// SN field length in bits
    pub sn_field_length: u8,
    /// Poll PDU trigger threshold
    pub poll_pdu: u32,
}

/// RLC layer implementation
pub struct RlcLayer {
    config: RlcConfig,
    initialized: bool,
}

impl RlcLayer {
    /// Create a new RLC layer instance
    pub fn new(config: RlcConfig) -> Self {
        Self {
            config,
            initialized: false,
        }
    }
}

#[async_trait]
impl ProtocolLayer for RlcLayer {
    async fn initialize(&mut self) -> Result<(), LayerError> {
        info!("Initializing RLC layer");
        debug!("RLC config: mode={:?}, sn_length={}", 
               self.config.mode, 
               self.config.sn_field_length);
        
        // TODO: Initialize RLC resources
        // - Setup transmission and reception buffers
        // - Initialize sequence numbering
        // - Configure timers
        
        self.initialized = true;
        info!("RLC layer initialized successfully");
        Ok(())
    }
    
    async fn process_uplink(&mut self, data: Bytes) -> Result<Bytes, LayerError> {
        if !self.initialized {
            return Err(LayerError::NotInitialized);
        }
        
        debug!("RLC processing uplink data: {} bytes", data.len());
        
        // TODO: Implement RLC uplink processing based on mode
        match self.config.mode {
            RlcMode::Tm => {
                // Transparent mode: pass through
                Ok(data)
            }
            RlcMode::Um => {
                // Unacknowledged mode: reordering, duplicate detection
                Ok(data)
            }
            RlcMode::Am => {
                // Acknowledged mode: reordering, ARQ, status reporting
                Ok(data)
            }
        }
    }
    
    async fn process_downlink(&mut self, data: Bytes) -> Result<Bytes, LayerError> {
        if !self.initialized {
            return Err(LayerError::NotInitialized);
        }
        
        debug!("RLC processing downlink data: {} bytes", data.len());
        
        // TODO: Implement RLC downlink processing based on mode
        match self.config.mode {
            RlcMode::Tm => {
                // Transparent mode: pass through
                Ok(data)
            }
            RlcMode::Um => {
                // Unacknowledged mode: segmentation, SN assignment
                Ok(data)
            }
            RlcMode::Am => {
                // Acknowledged mode: segmentation, ARQ, polling
                Ok(data)
            }
        }
    }
    
    async fn shutdown(&mut self) -> Result<(), LayerError> {
        info!("Shutting down RLC layer");
        self.initialized = false;
        Ok(())
    }
}

/// RLC PDU header
#[derive(Debug, Clone)]
pub struct RlcPduHeader {
    /// Data/Control flag
    pub dc: bool,
    /// Sequence number
    pub sn: u32,
    /// Segmentation info
    pub si: u8,
    /// Polling bit
    pub p: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[tokio::test]
    async fn test_rlc_initialization() {
        let config = RlcConfig {
            mode: RlcMode::Am,
            sn_field_length: 12,
            poll_pdu: 16,
        };
        
        let mut rlc = RlcLayer::new(config);
        assert!(rlc.initialize().await.is_ok());
    }
}