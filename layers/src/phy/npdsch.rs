//! NPDSCH transport block codec
//!
//! Carries SIB1-NB, other system information, RAR, and per-UE downlink data.
//! The coding chain is the standard LTE downlink shared channel pipeline
//! (36.212 §5.1) narrowed to NB-IoT's single, small TBS set and QPSK-only
//! modulation (36.211 §10.2.3.2): attach a CRC24A, turbo encode, rate match
//! to the subframe's available resource elements, scramble, modulate. NPDSCH
//! has no eNB-side receive path — only a UE decodes it — so this module is
//! encode-only; `npusch.rs` is the mirror-image decode path for the uplink.

use crate::phy::gold::{calculate_dl_scrambling_cinit, scramble_bits};
use crate::phy::npbch::qpsk_modulate;
use crate::phy::ratematch::{rate_match, RedundancyVersion};
use crate::phy::turbo::turbo_encode;
use common::utils::crc24a_bits;
use num_complex::Complex32;

/// Attach a CRC24A trailer to a transport block, per 36.212 §5.1.1.
pub fn attach_crc24a(data_bits: &[u8]) -> Vec<u8> {
    let crc = crc24a_bits(data_bits);
    let mut out = Vec::with_capacity(data_bits.len() + 24);
    out.extend_from_slice(data_bits);
    for i in (0..24).rev() {
        out.push(((crc >> i) & 1) as u8);
    }
    out
}

/// Verify and strip a CRC24A trailer, returning the data bits on success.
pub fn check_and_strip_crc24a(bits_with_crc: &[u8]) -> Option<Vec<u8>> {
    if bits_with_crc.len() < 24 {
        return None;
    }
    let split = bits_with_crc.len() - 24;
    let (data, crc_bits) = bits_with_crc.split_at(split);
    let received_crc = crc_bits.iter().fold(0u32, |acc, &b| (acc << 1) | b as u32);
    let expected_crc = crc24a_bits(data);
    if received_crc == expected_crc {
        Some(data.to_vec())
    } else {
        None
    }
}

/// Turbo-encode and rate-match one transport block (already CRC-attached)
/// to `target_bits` coded bits for the current redundancy version.
pub fn channel_code(tb_bits_with_crc: &[u8], target_bits: usize, rv: RedundancyVersion) -> Vec<u8> {
    let (d0, d1, d2) = turbo_encode(tb_bits_with_crc);
    rate_match(&d0, &d1, &d2, target_bits, rv)
}

/// Scramble a coded bit stream for one NPDSCH subframe occasion, per
/// 36.211 §10.2.3.1. `rnti` is the dedicated/RA/SI-RNTI addressing this
/// occasion; `frame`/`subframe` select the subframe-dependent scrambling
/// sequence restart point.
pub fn scramble(coded_bits: &[u8], rnti: u16, frame: u32, subframe: u8, n_id_ncell: u16) -> Vec<u8> {
    let c_init = calculate_dl_scrambling_cinit(rnti, frame, subframe, n_id_ncell);
    scramble_bits(coded_bits, c_init)
}

/// Full encode pipeline for one NPDSCH subframe occasion: CRC, turbo code,
/// rate match, scramble, QPSK modulate. `data_bits` excludes the CRC (it is
/// attached internally).
pub fn encode_subframe_occasion(
    data_bits: &[u8],
    target_bits: usize,
    rv: RedundancyVersion,
    rnti: u16,
    frame: u32,
    subframe: u8,
    n_id_ncell: u16,
) -> Vec<Complex32> {
    let with_crc = attach_crc24a(data_bits);
    let coded = channel_code(&with_crc, target_bits, rv);
    let scrambled = scramble(&coded, rnti, frame, subframe, n_id_ncell);
    qpsk_modulate(&scrambled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc24a_attach_and_strip_round_trip() {
        let data: Vec<u8> = (0..56u8).map(|i| i % 2).collect();
        let with_crc = attach_crc24a(&data);
        assert_eq!(with_crc.len(), data.len() + 24);
        let stripped = check_and_strip_crc24a(&with_crc).unwrap();
        assert_eq!(stripped, data);
    }

    #[test]
    fn test_crc24a_detects_corruption() {
        let data: Vec<u8> = (0..56u8).map(|i| i % 2).collect();
        let mut with_crc = attach_crc24a(&data);
        with_crc[0] ^= 1;
        assert!(check_and_strip_crc24a(&with_crc).is_none());
    }

    #[test]
    fn test_channel_code_produces_requested_length() {
        let data: Vec<u8> = (0..56u8).map(|i| i % 2).collect();
        let with_crc = attach_crc24a(&data);
        let coded = channel_code(&with_crc, 1000, RedundancyVersion::RV0);
        assert_eq!(coded.len(), 1000);
    }

    #[test]
    fn test_scramble_differs_for_different_rnti() {
        let bits = vec![1u8, 0, 1, 1, 0, 0, 1, 0];
        let a = scramble(&bits, 10, 0, 0, 42);
        let b = scramble(&bits, 20, 0, 0, 42);
        assert_ne!(a, b);
    }

    #[test]
    fn test_encode_subframe_occasion_unit_modulus_symbols() {
        let data: Vec<u8> = (0..88u8).map(|i| i % 3 == 0).map(|b| b as u8).collect();
        let symbols = encode_subframe_occasion(&data, 176, RedundancyVersion::RV0, 0xFFFF, 5, 0, 42);
        assert_eq!(symbols.len(), 88);
        for sym in symbols {
            assert!((sym.norm() - 1.0).abs() < 1e-5);
        }
    }
}
