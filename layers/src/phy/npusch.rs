//! NPUSCH Format 1 codec
//!
//! Format 1 carries uplink user data and is this eNB's only supported
//! NPUSCH format (Format 2, carrying only HARQ-ACK, needs no transport
//! block coding and is handled separately by the scheduler as a bare
//! acknowledgement resource). Coding follows 36.212 §5.1 like NPDSCH
//! (CRC24A, turbo code, rate matching) but the resource mapping is
//! SC-FDMA: QPSK/BPSK symbols are DFT-precoded across the allocated
//! subcarriers before OFDM, per 36.211 §10.1.3.2, so a single subcarrier's
//! time-domain samples carry energy from the whole allocated symbol's data
//! rather than one frequency bin's worth. This eNB's resource grid only
//! ever allocates the full 12-subcarrier NRU_sc; narrower single/multi-tone
//! allocations are accepted from configuration but rejected here as
//! unsupported, since the teacher's pipeline downstream (frame_builder,
//! resource_grid) is built for the single wide-PRB case only.

use crate::phy::gold::calculate_ul_scrambling_cinit;
use crate::phy::npbch::qpsk_modulate;
use crate::phy::npdsch::{attach_crc24a, check_and_strip_crc24a};
use crate::phy::ratematch::{rate_dematch, rate_match, RedundancyVersion};
use crate::phy::turbo::{turbo_decode, turbo_encode};
use crate::{DecodeErrorKind, LayerError};
use num_complex::Complex32;
use rustfft::FftPlanner;

/// The only `N^RU_sc` value this eNB's pipeline supports: the whole
/// single-PRB anchor carrier.
pub const SUPPORTED_N_RU_SC: u8 = 12;

/// Reject any configured `n_ru_sc` other than the single supported value,
/// surfacing it the same way an unsupported wire format would.
pub fn validate_n_ru_sc(n_ru_sc: u8) -> Result<(), LayerError> {
    if n_ru_sc != SUPPORTED_N_RU_SC {
        return Err(LayerError::DecodeError {
            kind: DecodeErrorKind::Unsupported,
        });
    }
    Ok(())
}

/// DFT-precode a block of modulated symbols (SC-FDMA transform precoding),
/// per 36.211 §10.1.3.2: a forward DFT of size `n_ru_sc` over the symbols
/// destined for one SC-FDMA symbol period.
pub fn dft_precode(symbols: &[Complex32]) -> Vec<Complex32> {
    let n = symbols.len();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let mut buf = symbols.to_vec();
    fft.process(&mut buf);
    let scale = 1.0 / (n as f32).sqrt();
    for s in &mut buf {
        *s *= scale;
    }
    buf
}

/// Invert `dft_precode` (IDFT), used when demodulating a received NPUSCH
/// symbol back into per-subcarrier modulated data before turbo decoding.
pub fn dft_deprecode(symbols: &[Complex32]) -> Vec<Complex32> {
    let n = symbols.len();
    let mut planner = FftPlanner::new();
    let ifft = planner.plan_fft_inverse(n);
    let mut buf = symbols.to_vec();
    ifft.process(&mut buf);
    let scale = 1.0 / (n as f32).sqrt();
    for s in &mut buf {
        *s *= scale;
    }
    buf
}

/// Encode one NPUSCH Format 1 transport block occasion (used by the RF
/// loopback test harness to synthesize uplink traffic; this eNB's real
/// uplink path only ever decodes). CRC24A, turbo code, rate match,
/// scramble, QPSK modulate, DFT-precode.
pub fn encode_occasion(
    data_bits: &[u8],
    target_bits: usize,
    rnti: u16,
    frame: u32,
    subframe: u8,
    n_id_ncell: u16,
) -> Result<Vec<Complex32>, LayerError> {
    let with_crc = attach_crc24a(data_bits);
    let (d0, d1, d2) = turbo_encode(&with_crc);
    let coded = rate_match(&d0, &d1, &d2, target_bits, RedundancyVersion::RV0);

    let c_init = calculate_ul_scrambling_cinit(rnti, frame, subframe, n_id_ncell);
    let scrambled = crate::phy::gold::scramble_bits(&coded, c_init);
    let modulated = qpsk_modulate(&scrambled);
    Ok(dft_precode(&modulated))
}

/// Soft-combine LLR-free hard bit decisions across repeated transmissions
/// of the same coded bit stream by majority vote, per spec.md's
/// repetition-combining rule for NPUSCH/NPDSCH retransmissions.
pub fn combine_repetitions(repetitions: &[Vec<u8>]) -> Vec<u8> {
    assert!(!repetitions.is_empty());
    let len = repetitions[0].len();
    (0..len)
        .map(|i| {
            let ones: usize = repetitions.iter().map(|r| r[i] as usize).sum();
            if ones * 2 >= repetitions.len() {
                1
            } else {
                0
            }
        })
        .collect()
}

/// Decode one (possibly repetition-combined) NPUSCH Format 1 occasion back
/// into its data bits. `coded_bits_per_occasion` is the demodulated,
/// DFT-deprecoded hard bit stream for a single occasion, already descrambled.
pub fn decode_occasion(
    descrambled_bits: &[u8],
    tb_len_with_crc: usize,
) -> Result<Vec<u8>, LayerError> {
    let coded_len = tb_len_with_crc * 3;
    let d_len = coded_len / 3;
    if descrambled_bits.len() < d_len {
        return Err(LayerError::DecodeError {
            kind: DecodeErrorKind::Truncated,
        });
    }
    let (d0, d1, d2) = rate_dematch(descrambled_bits, d_len, d_len, d_len, RedundancyVersion::RV0);
    let d0: Vec<u8> = d0.iter().map(|&b| if b == 2 { 0 } else { b }).collect();
    let d1: Vec<u8> = d1.iter().map(|&b| if b == 2 { 0 } else { b }).collect();
    let d2: Vec<u8> = d2.iter().map(|&b| if b == 2 { 0 } else { b }).collect();

    let decoded = turbo_decode(&d0, &d1, &d2, tb_len_with_crc);
    check_and_strip_crc24a(&decoded).ok_or(LayerError::DecodeError {
        kind: DecodeErrorKind::CrcMismatch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_n_ru_sc_accepts_only_full_prb() {
        assert!(validate_n_ru_sc(12).is_ok());
        assert!(validate_n_ru_sc(6).is_err());
        assert!(validate_n_ru_sc(1).is_err());
    }

    #[test]
    fn test_dft_precode_round_trip() {
        let symbols = vec![
            Complex32::new(1.0, 0.0),
            Complex32::new(0.0, 1.0),
            Complex32::new(-1.0, 0.0),
            Complex32::new(0.0, -1.0),
        ];
        let precoded = dft_precode(&symbols);
        let restored = dft_deprecode(&precoded);
        for (a, b) in symbols.iter().zip(restored.iter()) {
            assert!((a - b).norm() < 1e-4);
        }
    }

    #[test]
    fn test_combine_repetitions_majority_vote() {
        let reps = vec![vec![1u8, 0, 1], vec![1u8, 0, 0], vec![1u8, 1, 1]];
        let combined = combine_repetitions(&reps);
        assert_eq!(combined, vec![1, 0, 1]);
    }

    #[test]
    fn test_encode_decode_round_trip_no_noise() {
        let data: Vec<u8> = (0..40u8).map(|i| (i * 3) % 5 == 0).map(|b| b as u8).collect();
        let tb_len_with_crc = data.len() + 24;
        let target_bits = 600;

        let with_crc = attach_crc24a(&data);
        let (d0, d1, d2) = turbo_encode(&with_crc);
        let coded = rate_match(&d0, &d1, &d2, target_bits, RedundancyVersion::RV0);
        let c_init = calculate_ul_scrambling_cinit(0x22, 10, 4, 42);
        let scrambled = crate::phy::gold::scramble_bits(&coded, c_init);

        // descramble (XOR is its own inverse) then decode directly on bits,
        // bypassing modulation/DFT precoding which is exercised separately.
        let descrambled = crate::phy::gold::scramble_bits(&scrambled, c_init);
        let decoded = decode_occasion(&descrambled, tb_len_with_crc).unwrap();
        assert_eq!(decoded, data);
    }
}
