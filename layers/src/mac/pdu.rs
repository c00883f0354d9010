//! MAC PDU assembler/parser
//!
//! Builds and parses RLC-encapsulated MAC PDUs: 2- or 3-byte SDU subheaders
//! (3 bytes iff the SDU payload exceeds 128 bytes, per 36.321 §6.1.2),
//! Contention Resolution and Buffer Status Report control elements, and the
//! NB-IoT-specific Data-volume and Power-headroom Report (DPR) that rides
//! ahead of an LCID-0 SDU (spec.md §4.K). Grounded on the teacher's
//! `MacSubheader`/`MacSdu` shapes in `mac/mod.rs`, generalized with the
//! subheader length-field logic and CE parsing the teacher never needed for
//! 5G NR's MAC PDU layout.

use bytes::{BufMut, Bytes, BytesMut};

/// Logical channel ID values relevant to this eNB's MAC PDU parsing.
/// Everything else is treated as an opaque dedicated logical channel.
pub mod lcid {
    /// Carries a BSR plus the first uplink SDU in contention-based access;
    /// NB-IoT additionally prefixes a one-byte DPR element to this LCID.
    pub const CCCH_OR_DPR_SDU: u8 = 0;
    /// Short BSR / Truncated BSR control element.
    pub const SHORT_BSR: u8 = 29;
    /// Long BSR control element.
    pub const LONG_BSR: u8 = 30;
    /// Contention Resolution Identity control element.
    pub const CON_RES_ID: u8 = 31;
    /// Padding.
    pub const PADDING: u8 = 63;
}

/// A parsed MAC subheader: logical channel id plus payload length (`None`
/// for fixed-length control elements that carry no length field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacSubheader {
    pub lcid: u8,
    pub length: Option<u16>,
}

/// One SDU or control element extracted from a MAC PDU.
#[derive(Debug, Clone)]
pub struct MacSdu {
    pub subheader: MacSubheader,
    pub data: Bytes,
}

/// Short/Truncated BSR buffer-size index, 36.321 Table 6.1.3.1-1 collapsed
/// to the handful of thresholds NB-IoT's small transport blocks ever need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStatusReport {
    pub logical_channel_group: u8,
    pub buffer_size_index: u8,
}

/// Contention Resolution MAC CE: echoes the first 48 bits of the MSG3 CCCH
/// SDU back to the UE so it can confirm this eNB resolved to it, per
/// 36.321 §6.1.3.4. Fixed 6-byte payload plus its 1-byte subheader (7 B
/// total, matching spec.md §4.K).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConRes(pub [u8; 6]);

/// The NB-IoT Data-volume and Power-headroom Report: a single byte that
/// precedes an LCID-0 SDU in the uplink, carrying a coarse buffer estimate
/// and power headroom (36.321 §6.1.3.20). This eNB only consumes the
/// presence of the byte; it is not forwarded upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dpr(pub u8);

/// The synthetic buffer-status-report value this eNB substitutes when it
/// strips a DPR byte, per spec.md §4.K ("feed a synthetic 125-byte BSR").
pub const DPR_SYNTHETIC_BSR_BYTES: u32 = 125;
/// The wait timer (subframes) applied alongside the synthetic BSR.
pub const DPR_WAIT_TIMER_SF: u32 = 30;

/// Write a MAC subheader: 1 byte (`R/R/E/LCID`) for CEs or SDUs <= 128 B,
/// 2 bytes (`R/R/E/LCID` + 1 length byte) for SDUs 1..=127 B actually
/// carried with the short form, 3 bytes (`R/R/E/LCID` + 2 length bytes,
/// big-endian 15-bit length with the `F` format bit set) for longer SDUs.
fn write_subheader(out: &mut BytesMut, lcid: u8, length: Option<u16>, has_more: bool) {
    let e_bit = if has_more { 1u8 } else { 0u8 };
    match length {
        None => {
            out.put_u8((e_bit << 5) | (lcid & 0x3F));
        }
        Some(len) if len <= 127 => {
            out.put_u8((e_bit << 5) | (lcid & 0x3F));
            out.put_u8(len as u8);
        }
        Some(len) => {
            // 3-byte subheader: format bit (F) set, 15-bit length split
            // across two bytes.
            out.put_u8((e_bit << 5) | (1 << 4) | (lcid & 0x3F));
            out.put_u8((len >> 8) as u8 & 0x7F);
            out.put_u8((len & 0xFF) as u8);
        }
    }
}

/// Assemble a MAC PDU from an ordered list of (subheader-implied) entries.
/// Each entry past the first 128 payload bytes automatically takes the
/// 3-byte subheader form; shorter ones take the 2-byte form.
pub struct MacPduBuilder {
    buf: BytesMut,
    pending: Vec<(u8, Bytes)>,
}

impl MacPduBuilder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            pending: Vec::new(),
        }
    }

    /// Queue a control element or SDU with an explicit LCID.
    pub fn push(&mut self, lcid: u8, payload: Bytes) -> &mut Self {
        self.pending.push((lcid, payload));
        self
    }

    /// Queue a Contention Resolution CE (fixed length, no length field).
    pub fn push_con_res(&mut self, con_res: ConRes) -> &mut Self {
        self.pending
            .push((lcid::CON_RES_ID, Bytes::copy_from_slice(&con_res.0)));
        self
    }

    /// Finalize the PDU, writing every queued entry's subheader followed by
    /// its payload, in order.
    pub fn build(mut self) -> Bytes {
        let n = self.pending.len();
        for (i, (lcid, payload)) in self.pending.drain(..).enumerate() {
            let has_more = i + 1 < n;
            let length = if is_fixed_length_ce(lcid) {
                None
            } else {
                Some(payload.len() as u16)
            };
            write_subheader(&mut self.buf, lcid, length, has_more);
            self.buf.extend_from_slice(&payload);
        }
        self.buf.freeze()
    }
}

impl Default for MacPduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn is_fixed_length_ce(lcid: u8) -> bool {
    matches!(lcid, lcid::SHORT_BSR | lcid::CON_RES_ID | lcid::PADDING)
}

/// Parse error for malformed MAC PDUs (truncated subheader, length field
/// pointing past the end of the buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacPduParseError;

/// Parse a MAC PDU into its component SDUs/CEs, in order.
///
/// NB-IoT specific: if the very first subheader carries `lcid::CCCH_OR_DPR_SDU`
/// the byte immediately following that subheader is the one-byte DPR
/// element rather than the start of the SDU payload (spec.md §4.K /
/// scenario S6); the caller distinguishes this case via `dpr` on the
/// returned first entry.
pub struct ParsedMacPdu {
    pub sdus: Vec<MacSdu>,
    /// Present iff the PDU began with an LCID-0 entry carrying a leading
    /// DPR byte (36.321's NB-IoT-specific framing).
    pub dpr: Option<Dpr>,
}

pub fn parse_mac_pdu(data: &[u8]) -> Result<ParsedMacPdu, MacPduParseError> {
    let mut sdus = Vec::new();
    let mut dpr = None;
    let mut pos = 0usize;
    let mut first = true;

    while pos < data.len() {
        let header_byte = data[pos];
        if header_byte == (lcid::PADDING) || (header_byte & 0x3F) == lcid::PADDING {
            break;
        }
        let e_bit = (header_byte >> 5) & 1;
        let f_bit = (header_byte >> 4) & 1;
        let lcid = header_byte & 0x3F;
        pos += 1;

        let length = if is_fixed_length_ce(lcid) {
            fixed_ce_length(lcid)
        } else if f_bit == 1 {
            if pos + 2 > data.len() {
                return Err(MacPduParseError);
            }
            let len = (((data[pos] & 0x7F) as u16) << 8) | data[pos + 1] as u16;
            pos += 2;
            Some(len)
        } else {
            if pos + 1 > data.len() {
                return Err(MacPduParseError);
            }
            let len = data[pos] as u16;
            pos += 1;
            Some(len)
        };

        let len = length.unwrap_or(0) as usize;

        if first && lcid == lcid::CCCH_OR_DPR_SDU && len > 0 {
            // NB-IoT: the first byte of this SDU's payload is actually the
            // DPR element, not SDU data. Strip it and shrink the effective
            // SDU length by one.
            if pos >= data.len() {
                return Err(MacPduParseError);
            }
            dpr = Some(Dpr(data[pos]));
            let sdu_start = pos + 1;
            let sdu_len = len.saturating_sub(1);
            if sdu_start + sdu_len > data.len() {
                return Err(MacPduParseError);
            }
            sdus.push(MacSdu {
                subheader: MacSubheader {
                    lcid,
                    length: Some(sdu_len as u16),
                },
                data: Bytes::copy_from_slice(&data[sdu_start..sdu_start + sdu_len]),
            });
            pos = sdu_start + sdu_len;
        } else {
            if pos + len > data.len() {
                return Err(MacPduParseError);
            }
            sdus.push(MacSdu {
                subheader: MacSubheader { lcid, length },
                data: Bytes::copy_from_slice(&data[pos..pos + len]),
            });
            pos += len;
        }

        first = false;
        if e_bit == 0 {
            break;
        }
    }

    Ok(ParsedMacPdu { sdus, dpr })
}

fn fixed_ce_length(lcid: u8) -> Option<u16> {
    match lcid {
        lcid::CON_RES_ID => Some(6),
        lcid::SHORT_BSR => Some(1),
        lcid::PADDING => Some(0),
        _ => None,
    }
}

/// Decode a Short/Truncated BSR CE payload (36.321 §6.1.3.1): 2 bits LCG
/// id, 6 bits buffer-size index.
pub fn decode_short_bsr(byte: u8) -> BufferStatusReport {
    BufferStatusReport {
        logical_channel_group: (byte >> 6) & 0x3,
        buffer_size_index: byte & 0x3F,
    }
}

/// Encode a Short/Truncated BSR CE payload.
pub fn encode_short_bsr(bsr: BufferStatusReport) -> u8 {
    ((bsr.logical_channel_group & 0x3) << 6) | (bsr.buffer_size_index & 0x3F)
}

/// Decode a Long BSR CE payload (36.321 §6.1.3.1): four 6-bit buffer-size
/// indices, one per logical channel group, packed into 3 bytes.
pub fn decode_long_bsr(bytes: &[u8; 3]) -> [u8; 4] {
    let combined = ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32;
    [
        ((combined >> 18) & 0x3F) as u8,
        ((combined >> 12) & 0x3F) as u8,
        ((combined >> 6) & 0x3F) as u8,
        (combined & 0x3F) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_parse_single_sdu_round_trip() {
        let mut builder = MacPduBuilder::new();
        builder.push(3, Bytes::from_static(b"hello world"));
        let pdu = builder.build();

        let parsed = parse_mac_pdu(&pdu).unwrap();
        assert_eq!(parsed.sdus.len(), 1);
        assert_eq!(parsed.sdus[0].subheader.lcid, 3);
        assert_eq!(&parsed.sdus[0].data[..], b"hello world");
        assert!(parsed.dpr.is_none());
    }

    #[test]
    fn test_long_sdu_uses_3byte_subheader() {
        let payload = vec![0xAB; 200];
        let mut builder = MacPduBuilder::new();
        builder.push(5, Bytes::from(payload.clone()));
        let pdu = builder.build();
        // 1 header byte + 2 length bytes + 200 payload bytes.
        assert_eq!(pdu.len(), 203);

        let parsed = parse_mac_pdu(&pdu).unwrap();
        assert_eq!(parsed.sdus[0].data.to_vec(), payload);
    }

    #[test]
    fn test_con_res_round_trip() {
        let mut builder = MacPduBuilder::new();
        builder.push_con_res(ConRes([1, 2, 3, 4, 5, 6]));
        let pdu = builder.build();
        assert_eq!(pdu.len(), 7); // 1-byte subheader + 6-byte fixed CE

        let parsed = parse_mac_pdu(&pdu).unwrap();
        assert_eq!(parsed.sdus[0].subheader.lcid, lcid::CON_RES_ID);
        assert_eq!(&parsed.sdus[0].data[..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_dpr_stripped_from_lcid_zero_sdu() {
        // Scenario S6: LCID 0, DPR byte 0x42, followed by an 11-byte SDU.
        let mut raw = vec![0u8; 0];
        raw.push(lcid::CCCH_OR_DPR_SDU); // 1-byte subheader, E=0
        raw.push(12); // length field: DPR byte + 11 SDU bytes
        raw.push(0x42); // DPR
        raw.extend_from_slice(&[0xAAu8; 11]);

        let parsed = parse_mac_pdu(&raw).unwrap();
        assert_eq!(parsed.dpr, Some(Dpr(0x42)));
        assert_eq!(parsed.sdus.len(), 1);
        assert_eq!(parsed.sdus[0].data.len(), 11);
        assert_eq!(&parsed.sdus[0].data[..], &[0xAAu8; 11]);
    }

    #[test]
    fn test_bsr_encode_decode_round_trip() {
        let bsr = BufferStatusReport {
            logical_channel_group: 2,
            buffer_size_index: 37,
        };
        let encoded = encode_short_bsr(bsr);
        let decoded = decode_short_bsr(encoded);
        assert_eq!(bsr, decoded);
    }

    #[test]
    fn test_long_bsr_decode() {
        // All four 6-bit fields set to 0x3F should decode as all-63.
        let bytes = [0xFFu8, 0xFF, 0xFF];
        let decoded = decode_long_bsr(&bytes);
        assert_eq!(decoded, [0x3F, 0x3F, 0x3F, 0x3F]);
    }

    #[test]
    fn test_parse_truncated_pdu_errors() {
        let raw = [0x05u8]; // SDU subheader claims a length byte that's missing
        assert!(parse_mac_pdu(&raw).is_err());
    }
}
