//! NPDCCH: DCI channel coding and NB-IoT's single-candidate search space
//!
//! NPDCCH carries the 23-bit DCI formats `dci.rs` packs. Coding mirrors
//! LTE PDCCH (36.212 §6.4.3, §5.3.3.2): attach a 16-bit CRC, XOR-mask it
//! with the addressed RNTI so a receiver blind-detects by trying candidate
//! RNTIs against the CRC, tail-bite convolutional encode, rate match,
//! scramble, QPSK modulate. Unlike LTE's many aggregation levels and CCE
//! positions, NB-IoT only defines two NPDCCH formats (36.213 §16.6): format
//! 0 (`NCCE = 0`, half the PRB, 6 subcarriers) and format 1 (`NCCE = {0,1}`,
//! the whole PRB, 12 subcarriers) — this eNB fixes its search space to
//! format 1 / aggregation level `L = 2`, `NCCE = 0`, the configuration
//! spec.md's scheduler always assumes.

use crate::phy::conv_code::{conv_decode, conv_encode};
use crate::phy::gold::{calculate_dl_scrambling_cinit, scramble_bits};
use crate::phy::npbch::qpsk_modulate;
use crate::phy::ratematch::{rate_dematch, rate_match, RedundancyVersion};
use common::utils::crc16_bits;
use num_complex::Complex32;

/// Fixed aggregation level this eNB's search space uses (format 1, whole PRB).
pub const NPDCCH_AGGREGATION_LEVEL: u8 = 2;
/// Fixed NCCE index within the aggregation (format 1 starts at NCCE 0).
pub const NPDCCH_NCCE: u8 = 0;
/// DCI CRC length, per 36.212 §6.4.3.
const DCI_CRC_LEN_BITS: usize = 16;

fn push_bits(out: &mut Vec<u8>, value: u32, width: u32) {
    for i in (0..width).rev() {
        out.push(((value >> i) & 1) as u8);
    }
}

/// Attach a 16-bit CRC masked by the addressed RNTI (`crc_bits XOR rnti`),
/// per 36.212 §6.4.3's RNTI-scrambled PDCCH CRC scheme.
fn attach_masked_crc(dci_bits: &[u8], rnti: u16) -> Vec<u8> {
    let crc = crc16_bits(dci_bits) ^ rnti;
    let mut out = Vec::with_capacity(dci_bits.len() + DCI_CRC_LEN_BITS);
    out.extend_from_slice(dci_bits);
    push_bits(&mut out, crc as u32, DCI_CRC_LEN_BITS as u32);
    out
}

/// Encode one DCI occasion's full NPDCCH pipeline: CRC (masked by `rnti`),
/// tail-biting convolutional code, rate match to `target_bits`, scramble,
/// QPSK modulate.
pub fn encode_dci_occasion(
    dci_bits: &[u8],
    rnti: u16,
    target_bits: usize,
    frame: u32,
    subframe: u8,
    n_id_ncell: u16,
) -> Vec<Complex32> {
    let with_crc = attach_masked_crc(dci_bits, rnti);
    let coded = conv_encode(&with_crc);
    let (d0, d1, d2) = split_triplet_streams(&coded);
    let rate_matched = rate_match(&d0, &d1, &d2, target_bits, RedundancyVersion::RV0);
    let c_init = calculate_dl_scrambling_cinit(rnti, frame, subframe, n_id_ncell);
    let scrambled = scramble_bits(&rate_matched, c_init);
    qpsk_modulate(&scrambled)
}

/// Blind-decode attempt: descramble, dematch, decode, and check whether the
/// CRC matches `candidate_rnti`. Returns the 23 decoded DCI bits on success.
pub fn try_decode_dci_occasion(
    received_coded_bits: &[u8],
    dci_len_bits: usize,
    candidate_rnti: u16,
    frame: u32,
    subframe: u8,
    n_id_ncell: u16,
) -> Option<Vec<u8>> {
    let c_init = calculate_dl_scrambling_cinit(candidate_rnti, frame, subframe, n_id_ncell);
    let descrambled = scramble_bits(received_coded_bits, c_init);

    let tb_len = dci_len_bits + DCI_CRC_LEN_BITS;
    let coded_len = tb_len * 3;
    let d_len = coded_len / 3;
    if descrambled.len() < d_len {
        return None;
    }
    let (d0, d1, d2) = rate_dematch(&descrambled, d_len, d_len, d_len, RedundancyVersion::RV0);

    let mut interleaved = Vec::with_capacity(coded_len);
    for i in 0..d_len {
        interleaved.push(if d0[i] == 2 { 0 } else { d0[i] });
        interleaved.push(if d1[i] == 2 { 0 } else { d1[i] });
        interleaved.push(if d2[i] == 2 { 0 } else { d2[i] });
    }

    let decoded = conv_decode(&interleaved, tb_len);
    let (info_bits, crc_bits) = decoded.split_at(dci_len_bits);
    let received_crc = crc_bits.iter().fold(0u16, |acc, &b| (acc << 1) | b as u16);
    let expected_crc = crc16_bits(info_bits) ^ candidate_rnti;

    if received_crc == expected_crc {
        Some(info_bits.to_vec())
    } else {
        None
    }
}

fn split_triplet_streams(coded: &[u8]) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let n = coded.len() / 3;
    let mut d0 = Vec::with_capacity(n);
    let mut d1 = Vec::with_capacity(n);
    let mut d2 = Vec::with_capacity(n);
    for chunk in coded.chunks(3) {
        d0.push(chunk[0]);
        d1.push(chunk[1]);
        d2.push(chunk[2]);
    }
    (d0, d1, d2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::dci::DciFormatN0;

    #[test]
    fn test_encode_decode_round_trip_no_noise() {
        let dci = DciFormatN0 {
            subcarrier_indication: 12,
            scheduling_delay: 1,
            resource_assignment: 2,
            mcs: 6,
            redundancy_version: 0,
            repetition_number: 3,
            new_data_indicator: true,
            dci_subframe_repetition: 1,
        };
        let bits = dci.pack().unwrap();
        let rnti = 0x1A2B;
        let target_bits = 400;
        let symbols = encode_dci_occasion(&bits, rnti, target_bits, 3, 0, 42);

        // Re-derive the coded bit stream from symbols for the decode path
        // (demodulation is a downlink-only concern handled by `ofdm.rs`
        // upstream; here we exercise the decode half directly on bits).
        let with_crc = attach_masked_crc(&bits, rnti);
        let coded = conv_encode(&with_crc);
        let (d0, d1, d2) = split_triplet_streams(&coded);
        let rate_matched = rate_match(&d0, &d1, &d2, target_bits, RedundancyVersion::RV0);
        let c_init = calculate_dl_scrambling_cinit(rnti, 3, 0, 42);
        let scrambled = scramble_bits(&rate_matched, c_init);

        let decoded = try_decode_dci_occasion(&scrambled, bits.len(), rnti, 3, 0, 42).unwrap();
        assert_eq!(decoded, bits);
        assert_eq!(symbols.len(), target_bits / 2);
    }

    #[test]
    fn test_decode_fails_for_wrong_rnti() {
        let dci = DciFormatN0 {
            subcarrier_indication: 1,
            scheduling_delay: 0,
            resource_assignment: 0,
            mcs: 0,
            redundancy_version: 0,
            repetition_number: 0,
            new_data_indicator: false,
            dci_subframe_repetition: 0,
        };
        let bits = dci.pack().unwrap();
        let rnti = 0x55AA;
        let target_bits = 300;

        let with_crc = attach_masked_crc(&bits, rnti);
        let coded = conv_encode(&with_crc);
        let (d0, d1, d2) = split_triplet_streams(&coded);
        let rate_matched = rate_match(&d0, &d1, &d2, target_bits, RedundancyVersion::RV0);
        let c_init = calculate_dl_scrambling_cinit(rnti, 0, 0, 42);
        let scrambled = scramble_bits(&rate_matched, c_init);

        let decoded = try_decode_dci_occasion(&scrambled, bits.len(), 0x1234, 0, 0, 42);
        assert!(decoded.is_none());
    }
}
