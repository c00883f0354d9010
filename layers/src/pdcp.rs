//! Packet Data Convergence Protocol (PDCP) Layer — narrow external-collaborator stub.
//!
//! Ciphering/integrity and header compression (3GPP TS 36.323) are out of
//! scope for this PHY+MAC eNB; this module only tracks PDCP SN state well
//! enough for RRC above it to reason about in-sequence delivery.

use crate::{LayerError, ProtocolLayer};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info};

/// PDCP layer configuration
pub struct PdcpConfig {
    /// SN size in bits (12 or 18)
    pub sn_size: u8,
    /// Discard timer in ms
    pub discard_timer: u32,
    /// Reordering timer in ms
    pub t_reordering: u32,
    /// Enable integrity protection
    pub integrity_protection: bool,
    /// Enable ciphering
    pub ciphering: bool,
}

/// PDCP layer implementation
pub struct PdcpLayer {
    config: PdcpConfig,
    initialized: bool,
    /// Next PDCP sequence number for transmission
    tx_next: u32,
    /// Next expected PDCP sequence number for reception
    rx_next: u32,
}

impl PdcpLayer {
    /// Create a new PDCP layer instance
    pub fn new(config: PdcpConfig) -> Self {
        Self {
            config,
            initialized: false,
            tx_next: 0,
            rx_next: 0,
        }
    }
}

#[async_trait]
impl ProtocolLayer for PdcpLayer {
    async fn initialize(&mut self) -> Result<(), LayerError> {
        info!("Initializing PDCP layer");
        debug!("PDCP config: sn_size={}, integrity={}, ciphering={}", 
               self.config.sn_size,
               self.config.integrity_protection,
               self.config.ciphering);
        
        // Validate SN size (36.323 §6.2.2: NB-IoT bearers use 7- or 12-bit SNs)
        if self.config.sn_size != 7 && self.config.sn_size != 12 {
            return Err(LayerError::ConfigurationError(
                "Invalid SN size: must be 7 or 12 bits".to_string()
            ));
        }
        
        // TODO: Initialize PDCP resources
        // - Setup security contexts
        // - Initialize timers
        // - Configure header compression
        
        self.initialized = true;
        info!("PDCP layer initialized successfully");
        Ok(())
    }
    
    async fn process_uplink(&mut self, data: Bytes) -> Result<Bytes, LayerError> {
        if !self.initialized {
            return Err(LayerError::NotInitialized);
        }
        
        debug!("PDCP processing uplink data: {} bytes", data.len());
        
        // TODO: Implement PDCP uplink processing
        // - Remove PDCP header
        // - Verify integrity (if enabled)
        // - Decipher (if enabled)
        // - Perform header decompression
        // - Reorder PDUs
        
        self.rx_next = self.rx_next.wrapping_add(1);
        
        Ok(data)
    }
    
    async fn process_downlink(&mut self, data: Bytes) -> Result<Bytes, LayerError> {
        if !self.initialized {
            return Err(LayerError::NotInitialized);
        }
        
        debug!("PDCP processing downlink data: {} bytes", data.len());
        
        // TODO: Implement PDCP downlink processing
        // - Perform header compression
        // - Assign sequence number
        // - Cipher (if enabled)
        // - Add integrity protection (if enabled)
        // - Add PDCP header
        
        self.tx_next = self.tx_next.wrapping_add(1);
        
        Ok(data)
    }
    
    async fn shutdown(&mut self) -> Result<(), LayerError> {
        info!("Shutting down PDCP layer");
        self.initialized = false;
        Ok(())
    }
}

/// PDCP PDU types
#[derive(Debug, Clone, Copy)]
pub enum PdcpPduType {
    /// Data PDU
    Data,
    /// Control PDU - PDCP status report
    StatusReport,
}

/// PDCP header structure
#[derive(Debug, Clone)]
pub struct PdcpHeader {
    /// PDU type
    pub pdu_type: PdcpPduType,
    /// Sequence number
    pub sn: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[tokio::test]
    async fn test_pdcp_initialization() {
        let config = PdcpConfig {
            sn_size: 12,
            discard_timer: 100,
            t_reordering: 35,
            integrity_protection: true,
            ciphering: true,
        };
        
        let mut pdcp = PdcpLayer::new(config);
        assert!(pdcp.initialize().await.is_ok());
    }
    
    #[tokio::test]
    async fn test_pdcp_invalid_sn_size() {
        let config = PdcpConfig {
            sn_size: 16, // Invalid
            discard_timer: 100,
            t_reordering: 35,
            integrity_protection: true,
            ciphering: true,
        };
        
        let mut pdcp = PdcpLayer::new(config);
        assert!(pdcp.initialize().await.is_err());
    }
}