//! Common Utilities
//!
//! Provides utility functions used across the eNB implementation.

use bytes::{Bytes, BytesMut, BufMut};
use tracing::trace;

/// Convert a byte slice to hex string for debugging.
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// CRC-24A polynomial, per 3GPP 36.212 §5.1.1 (transport block CRC).
pub const CRC24A_POLY: u32 = 0x1864CFB;

/// Calculate a CRC-24A checksum over a bit sequence (one bit per byte, 0/1).
/// Operating bit-wise (rather than byte-wise) matches how the transport
/// block CRC is specified and attached ahead of channel coding.
pub fn crc24a_bits(bits: &[u8]) -> u32 {
    let mut crc: u32 = 0;
    for &bit in bits {
        let msb = (crc >> 23) & 1;
        crc = (crc << 1) & 0xFFFFFF;
        if msb ^ (bit as u32 & 1) != 0 {
            crc ^= CRC24A_POLY & 0xFFFFFF;
        }
    }
    crc
}

/// Calculate CRC-24 over a byte sequence (legacy byte-wise variant, used
/// where a whole-byte CRC is convenient, e.g. MAC PDU integrity checks).
pub fn crc24(data: &[u8]) -> u32 {
    let mut crc: u32 = 0;

    for byte in data {
        crc ^= (*byte as u32) << 16;
        for _ in 0..8 {
            if crc & 0x800000 != 0 {
                crc = (crc << 1) ^ CRC24A_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc & 0xFFFFFF
}

/// Calculate CRC-16 (used by MIB-NB), per 3GPP 36.212 §5.1.1.
pub fn crc16(data: &[u8]) -> u16 {
    const CRC16_POLY: u16 = 0x1021;
    let mut crc: u16 = 0;

    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

/// Calculate CRC-16 over a bit sequence (one bit per byte, 0/1), used for
/// MIB-NB's 16-bit CRC which is computed over unpacked bits.
pub fn crc16_bits(bits: &[u8]) -> u16 {
    const CRC16_POLY: u16 = 0x1021;
    let mut crc: u16 = 0;
    for &bit in bits {
        let msb = (crc >> 15) & 1;
        crc <<= 1;
        if msb ^ (bit as u16 & 1) != 0 {
            crc ^= CRC16_POLY;
        }
    }
    crc
}

/// Pack bits into bytes (MSB first).
pub fn pack_bits(bits: &[bool]) -> Bytes {
    let mut bytes = BytesMut::with_capacity((bits.len() + 7) / 8);

    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            if bit {
                byte |= 1 << (7 - i);
            }
        }
        bytes.put_u8(byte);
    }

    bytes.freeze()
}

/// Unpack bytes into bits (MSB first).
pub fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(bytes.len() * 8);

    for &byte in bytes {
        for i in 0..8 {
            bits.push((byte & (1 << (7 - i))) != 0);
        }
    }

    bits
}

/// Round up to next power of 2.
pub fn next_power_of_2(n: u32) -> u32 {
    if n == 0 {
        return 1;
    }

    let mut v = n;
    v -= 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v + 1
}

/// Time utilities for NB-IoT's subframe-only (no slot/symbol sub-numerology) clock.
pub mod time {
    /// Subframe (TTI) duration in microseconds. NB-IoT has a single
    /// numerology: one 1ms TTI per subframe, always.
    pub const SUBFRAME_DURATION_US: u32 = 1000;

    /// Subframes per frame (always 10, per 36.211).
    pub const SUBFRAMES_PER_FRAME: u8 = 10;

    /// OFDM symbol duration for the 15 kHz downlink numerology,
    /// normal cyclic prefix, excluding CP (66.67 us nominal, rounded here
    /// to whole microseconds for display/logging purposes only).
    pub fn symbol_duration_us() -> f64 {
        1_000_000.0 / 15_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }

    #[test]
    fn test_crc24() {
        let data = b"Hello";
        let crc = crc24(data);
        assert_eq!(crc & 0xFFFFFF, crc);
    }

    #[test]
    fn test_crc24a_bits_zero_for_all_zero_input() {
        let bits = vec![0u8; 40];
        assert_eq!(crc24a_bits(&bits), 0);
    }

    #[test]
    fn test_crc16_bits_matches_byte_variant_for_aligned_input() {
        let data = [0xA5u8, 0x3C];
        let bits: Vec<u8> = unpack_bits(&data).into_iter().map(|b| b as u8).collect();
        assert_eq!(crc16_bits(&bits), crc16(&data));
    }

    #[test]
    fn test_bit_packing() {
        let bits = vec![true, false, true, false, true, false, true, false];
        let packed = pack_bits(&bits);
        assert_eq!(packed[0], 0xAA);

        let unpacked = unpack_bits(&packed);
        assert_eq!(unpacked[..8], bits);
    }

    #[test]
    fn test_next_power_of_2() {
        assert_eq!(next_power_of_2(0), 1);
        assert_eq!(next_power_of_2(1), 1);
        assert_eq!(next_power_of_2(5), 8);
        assert_eq!(next_power_of_2(16), 16);
        assert_eq!(next_power_of_2(17), 32);
    }
}
