//! Common Types for the NB-IoT eNB
//!
//! Defines fundamental types used throughout the protocol stack.

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// SI-RNTI, used to scramble system information (MIB/SIB) transmissions.
    pub const SI_RNTI: Rnti = Rnti(0xFFFF);
    /// P-RNTI, used for paging (external-collaborator surface, not scheduled here).
    pub const P_RNTI: Rnti = Rnti(0xFFFE);
    /// Lowest valid RA-RNTI value. RA-RNTI = 1 + floor(t_id/... ) per 36.321 §5.1.4,
    /// collapses to a single NPRACH resource here so the whole range is one value.
    pub const RA_RNTI_MIN: u16 = 1;
    pub const RA_RNTI_MAX: u16 = 60;
    /// Valid range for Cell-RNTI (temporary and assigned), per 36.321 Table 7.1-1.
    pub const C_RNTI_MIN: u16 = 0x0001;
    pub const C_RNTI_MAX: u16 = 0xFFF3;

    /// Create a new RNTI without range validation (used for SI/RA/P special values).
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value.
    pub fn value(&self) -> u16 {
        self.0
    }

    /// True if this value is a valid RA-RNTI.
    pub fn is_ra_rnti(&self) -> bool {
        (Self::RA_RNTI_MIN..=Self::RA_RNTI_MAX).contains(&self.0)
    }

    /// True if this value lies within the allocatable C-RNTI range.
    pub fn is_c_rnti(&self) -> bool {
        (Self::C_RNTI_MIN..=Self::C_RNTI_MAX).contains(&self.0)
    }
}

/// Cell Identity (E-UTRAN Cell Identifier, 28 bits but stored widened).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId(pub u32);

/// Physical Cell Identity. NB-IoT reuses the LTE PCI space: 0..=503.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-503), per 36.211 §6.11.
    pub const MAX: u16 = 503;

    /// Create a new PCI with validation.
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Physical-layer cell identity group (0..=167), per 36.211 §6.11.1.
    pub fn group(&self) -> u16 {
        self.0 / 3
    }

    /// Physical-layer identity within the group (0..=2).
    pub fn sector(&self) -> u16 {
        self.0 % 3
    }
}

/// E-UTRA operating band. NB-IoT is deployed in-band, guard-band or
/// standalone within any of these; the anchor-carrier ARFCN determines
/// the actual operation mode, not the band itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EutraBand(pub u16);

/// NB-IoT operation mode, signalled in MIB-NB `operationModeInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum OperationMode {
    /// Dedicated NB-IoT carrier (own 200 kHz allocation).
    Standalone,
    /// Carried inside an LTE carrier's PRBs.
    InBand,
    /// Carried in an LTE carrier's unused guard band.
    GuardBand,
}

/// QoS Class Identifier, carried through unchanged from bearer setup.
/// NB-IoT typically only ever uses a single default bearer QCI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qci(pub u8);

impl Qci {
    /// QCI 9: default, non-GBR bearer. The only QCI NB-IoT devices use
    /// in the vast majority of deployments.
    pub const DEFAULT: Qci = Qci(9);
}

/// Tracking Area Code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tac(pub u32);

/// PLMN Identity (Mobile Country Code + Mobile Network Code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlmnId {
    /// Mobile Country Code (3 digits).
    pub mcc: [u8; 3],
    /// Mobile Network Code (2 or 3 digits).
    pub mnc: Vec<u8>,
}

impl PlmnId {
    /// Create a test PLMN ID (001-01).
    pub fn test_plmn() -> Self {
        Self {
            mcc: [0, 0, 1],
            mnc: vec![0, 1],
        }
    }

    /// Encode PLMN ID to bytes (3 octets), per 36.331 PLMN-Identity encoding.
    pub fn encode(&self) -> [u8; 3] {
        let mut encoded = [0u8; 3];

        encoded[0] = (self.mcc[1] << 4) | self.mcc[0];

        if self.mnc.len() == 3 {
            encoded[1] = (self.mnc[2] << 4) | self.mcc[2];
        } else {
            encoded[1] = (0xF << 4) | self.mcc[2];
        }

        encoded[2] = (self.mnc[1] << 4) | self.mnc[0];

        encoded
    }
}

/// Hyper-frame / frame / subframe clock tuple. NB-IoT has no slot concept
/// below the subframe (single numerology, no mini-slots), unlike the 5G NR
/// slot/symbol clock this type replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HfnSfn {
    /// Hyper system frame number, 0..=1023, wraps every 1024 SFN periods.
    pub hfn: u16,
    /// System frame number, 0..=1023.
    pub sfn: u16,
    /// Subframe index within the frame, 0..=9.
    pub sf_idx: u8,
}

impl HfnSfn {
    pub const SFN_MAX: u16 = 1023;
    pub const SUBFRAMES_PER_FRAME: u8 = 10;

    /// Advance the clock by one subframe, rolling SFN and HFN as needed.
    pub fn advance(&mut self) {
        self.sf_idx += 1;
        if self.sf_idx >= Self::SUBFRAMES_PER_FRAME {
            self.sf_idx = 0;
            if self.sfn >= Self::SFN_MAX {
                self.sfn = 0;
                self.hfn = self.hfn.wrapping_add(1);
            } else {
                self.sfn += 1;
            }
        }
    }

    /// Absolute subframe count since HFN=0/SFN=0/sf=0, used for periodicity
    /// checks (NPDCCH search space, NPRACH occasions, SIB1 repetitions).
    pub fn absolute_subframe(&self) -> u64 {
        (self.hfn as u64) * (Self::SFN_MAX as u64 + 1) * Self::SUBFRAMES_PER_FRAME as u64
            + (self.sfn as u64) * Self::SUBFRAMES_PER_FRAME as u64
            + self.sf_idx as u64
    }

    /// Inverse of `absolute_subframe`: split a flat subframe count back into
    /// the HFN/SFN/subframe tuple.
    pub fn from_absolute_subframe(tti: u64) -> Self {
        let subframes_per_hfn = (Self::SFN_MAX as u64 + 1) * Self::SUBFRAMES_PER_FRAME as u64;
        let hfn = (tti / subframes_per_hfn) as u16;
        let rem = tti % subframes_per_hfn;
        let sfn = (rem / Self::SUBFRAMES_PER_FRAME as u64) as u16;
        let sf_idx = (rem % Self::SUBFRAMES_PER_FRAME as u64) as u8;
        Self { hfn, sfn, sf_idx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pci_range() {
        assert!(Pci::new(503).is_some());
        assert!(Pci::new(504).is_none());
        assert!(Pci::new(0).is_some());
    }

    #[test]
    fn test_pci_group_sector() {
        let pci = Pci::new(501).unwrap();
        assert_eq!(pci.group(), 167);
        assert_eq!(pci.sector(), 0);
    }

    #[test]
    fn test_rnti_ranges() {
        assert!(Rnti::new(1).is_c_rnti());
        assert!(Rnti::new(0xFFF3).is_c_rnti());
        assert!(!Rnti::new(0xFFF4).is_c_rnti());
        assert!(Rnti::new(1).is_ra_rnti());
        assert!(Rnti::new(60).is_ra_rnti());
        assert!(!Rnti::new(61).is_ra_rnti());
    }

    #[test]
    fn test_hfn_sfn_advance() {
        let mut clock = HfnSfn::default();
        for _ in 0..9 {
            clock.advance();
        }
        assert_eq!(clock.sf_idx, 9);
        assert_eq!(clock.sfn, 0);
        clock.advance();
        assert_eq!(clock.sf_idx, 0);
        assert_eq!(clock.sfn, 1);
    }

    #[test]
    fn test_hfn_sfn_wraps() {
        let mut clock = HfnSfn { hfn: 0, sfn: HfnSfn::SFN_MAX, sf_idx: 9 };
        clock.advance();
        assert_eq!(clock.sfn, 0);
        assert_eq!(clock.hfn, 1);
    }

    #[test]
    fn test_hfn_sfn_absolute_subframe_round_trips() {
        let clock = HfnSfn { hfn: 3, sfn: 5, sf_idx: 7 };
        let tti = clock.absolute_subframe();
        assert_eq!(HfnSfn::from_absolute_subframe(tti), clock);
    }

    #[test]
    fn test_plmn_encoding() {
        let plmn = PlmnId::test_plmn();
        let encoded = plmn.encode();
        assert_eq!(encoded[0], 0x00);
        assert_eq!(encoded[1], 0xF1);
        assert_eq!(encoded[2], 0x10);
    }
}
