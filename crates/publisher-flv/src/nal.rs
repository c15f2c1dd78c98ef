//! H.264 NAL unit handling.
//!
//! Encoders hand us **Annex B** byte streams, where NAL units are separated by
//! `00 00 01` or `00 00 00 01` start codes. FLV wants **AVCC**: every NAL unit
//! prefixed with its 4-byte big-endian length, plus a one-off decoder
//! configuration record built from the SPS and PPS.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

/// NAL unit types relevant for H.264.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NalUnitType {
    /// Non-IDR slice (P/B frame).
    NonIdrSlice = 1,
    /// IDR slice (keyframe).
    IdrSlice = 5,
    /// Supplemental Enhancement Information.
    Sei = 6,
    /// Sequence Parameter Set.
    Sps = 7,
    /// Picture Parameter Set.
    Pps = 8,
    /// Access Unit Delimiter.
    Aud = 9,
    /// Anything else.
    Other = 0,
}

impl From<u8> for NalUnitType {
    fn from(header: u8) -> Self {
        match header & 0x1F {
            1 => Self::NonIdrSlice,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            _ => Self::Other,
        }
    }
}

impl NalUnitType {
    /// Slice data (as opposed to parameter sets and side information).
    pub fn is_vcl(self) -> bool {
        matches!(self, Self::NonIdrSlice | Self::IdrSlice)
    }
}

/// A NAL unit without its start code.
#[derive(Debug, Clone)]
pub struct NalUnit {
    pub nal_type: NalUnitType,
    /// Header byte plus payload.
    pub data: Bytes,
}

/// Offset and length of the first start code at or after `from`.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if data[i + 2] == 0 && i + 4 <= data.len() && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Split an Annex B byte stream into NAL units.
///
/// Bytes before the first start code are ignored, as are trailing zero
/// bytes at the end of a unit.
pub fn parse_annex_b(data: &[u8]) -> Vec<NalUnit> {
    let mut nals = Vec::new();
    let Some((mut offset, mut code_len)) = find_start_code(data, 0) else {
        return nals;
    };

    loop {
        let start = offset + code_len;
        let next = find_start_code(data, start);
        let end = next.map_or(data.len(), |(position, _)| position);

        let mut body = &data[start..end];
        while let [rest @ .., 0] = body {
            body = rest;
        }
        if let Some(&header) = body.first() {
            nals.push(NalUnit {
                nal_type: NalUnitType::from(header),
                data: Bytes::copy_from_slice(body),
            });
        }

        match next {
            Some((position, len)) => {
                offset = position;
                code_len = len;
            }
            None => break,
        }
    }

    nals
}

/// Concatenate NAL units with 4-byte big-endian length prefixes.
pub fn nals_to_avcc(nals: &[NalUnit]) -> Bytes {
    let total: usize = nals.iter().map(|nal| 4 + nal.data.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for nal in nals {
        buf.put_u32(nal.data.len() as u32);
        buf.put_slice(&nal.data);
    }
    buf.freeze()
}

/// Last SPS and PPS found among `nals`.
pub fn sps_pps_from_nals(nals: &[NalUnit]) -> Option<(Bytes, Bytes)> {
    let sps = nals.iter().rev().find(|nal| nal.nal_type == NalUnitType::Sps)?;
    let pps = nals.iter().rev().find(|nal| nal.nal_type == NalUnitType::Pps)?;
    debug!(
        sps_len = sps.data.len(),
        pps_len = pps.data.len(),
        "Found parameter sets"
    );
    Some((sps.data.clone(), pps.data.clone()))
}

/// Extract SPS and PPS from Annex B encoder headers.
pub fn extract_sps_pps(annex_b_headers: &[u8]) -> Option<(Bytes, Bytes)> {
    sps_pps_from_nals(&parse_annex_b(annex_b_headers))
}

/// Build an AVC decoder configuration record (ISO 14496-15) from SPS and PPS.
///
/// Profile, compatibility and level are copied from SPS bytes 1..4. The
/// record declares 4-byte NAL lengths, one SPS and one PPS.
pub fn build_avc_decoder_config(sps: &[u8], pps: &[u8]) -> Option<Bytes> {
    if sps.len() < 4 {
        debug!(len = sps.len(), "SPS too short for decoder configuration");
        return None;
    }

    let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());
    buf.put_u8(0x01);
    buf.put_slice(&sps[1..4]);
    // 6 reserved bits + lengthSizeMinusOne = 3
    buf.put_u8(0xFF);
    // 3 reserved bits + one SPS
    buf.put_u8(0xE1);
    buf.put_u16(sps.len() as u16);
    buf.put_slice(sps);
    buf.put_u8(0x01);
    buf.put_u16(pps.len() as u16);
    buf.put_slice(pps);

    Some(buf.freeze())
}

/// Drop SPS, PPS and AUD units; the first two travel in the sequence header.
pub fn filter_parameter_sets(nals: Vec<NalUnit>) -> Vec<NalUnit> {
    nals.into_iter()
        .filter(|nal| {
            !matches!(
                nal.nal_type,
                NalUnitType::Sps | NalUnitType::Pps | NalUnitType::Aud
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_annex_b_3byte_start_code() {
        let data = [0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E];
        let nals = parse_annex_b(&data);
        assert_eq!(nals.len(), 1);
        assert_eq!(nals[0].nal_type, NalUnitType::Sps);
        assert_eq!(nals[0].data.as_ref(), &[0x67, 0x42, 0x00, 0x1E]);
    }

    #[test]
    fn test_parse_annex_b_mixed_start_codes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, // SPS
            0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80, // PPS
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, // IDR
        ];
        let nals = parse_annex_b(&data);
        let types: Vec<_> = nals.iter().map(|nal| nal.nal_type).collect();
        assert_eq!(
            types,
            vec![NalUnitType::Sps, NalUnitType::Pps, NalUnitType::IdrSlice]
        );
        assert_eq!(nals[2].data.as_ref(), &[0x65, 0x88, 0x84]);
    }

    #[test]
    fn test_parse_annex_b_strips_trailing_zeros() {
        let data = [0x00, 0x00, 0x01, 0x41, 0x9A, 0x00, 0x00, 0x00, 0x00, 0x01, 0x41, 0x9B];
        let nals = parse_annex_b(&data);
        assert_eq!(nals.len(), 2);
        assert_eq!(nals[0].data.as_ref(), &[0x41, 0x9A]);
        assert_eq!(nals[1].nal_type, NalUnitType::NonIdrSlice);
    }

    #[test]
    fn test_parse_annex_b_without_start_code() {
        assert!(parse_annex_b(&[0x65, 0x88, 0x84]).is_empty());
        assert!(parse_annex_b(&[]).is_empty());
    }

    #[test]
    fn test_nals_to_avcc() {
        let nals = vec![NalUnit {
            nal_type: NalUnitType::IdrSlice,
            data: Bytes::from_static(&[0x65, 0x88, 0x84]),
        }];
        let avcc = nals_to_avcc(&nals);
        assert_eq!(avcc.as_ref(), &[0x00, 0x00, 0x00, 0x03, 0x65, 0x88, 0x84]);
    }

    #[test]
    fn test_extract_sps_pps() {
        let headers = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, 0x00, 0x00, 0x00, 0x01, 0x68, 0xCE,
            0x3C, 0x80,
        ];
        let (sps, pps) = extract_sps_pps(&headers).unwrap();
        assert_eq!(sps.as_ref(), &[0x67, 0x42, 0x00, 0x1E]);
        assert_eq!(pps.as_ref(), &[0x68, 0xCE, 0x3C, 0x80]);

        assert!(extract_sps_pps(&headers[..8]).is_none());
    }

    #[test]
    fn test_build_avc_decoder_config() {
        let sps = [0x67, 0x64, 0x00, 0x28, 0xAB, 0xCD];
        let pps = [0x68, 0xCE, 0x3C, 0x80];

        let config = build_avc_decoder_config(&sps, &pps).unwrap();
        assert_eq!(&config[..6], &[0x01, 0x64, 0x00, 0x28, 0xFF, 0xE1]);
        assert_eq!(&config[6..8], &[0x00, 0x06]);
        assert_eq!(&config[8..14], &sps);
        assert_eq!(config[14], 0x01);
        assert_eq!(&config[15..17], &[0x00, 0x04]);
        assert_eq!(&config[17..], &pps);
    }

    #[test]
    fn test_build_avc_decoder_config_rejects_short_sps() {
        assert!(build_avc_decoder_config(&[0x67, 0x42], &[0x68]).is_none());
    }

    #[test]
    fn test_filter_parameter_sets() {
        let nals = vec![
            NalUnit {
                nal_type: NalUnitType::Aud,
                data: Bytes::from_static(&[0x09]),
            },
            NalUnit {
                nal_type: NalUnitType::Sps,
                data: Bytes::from_static(&[0x67]),
            },
            NalUnit {
                nal_type: NalUnitType::Pps,
                data: Bytes::from_static(&[0x68]),
            },
            NalUnit {
                nal_type: NalUnitType::Sei,
                data: Bytes::from_static(&[0x06]),
            },
            NalUnit {
                nal_type: NalUnitType::IdrSlice,
                data: Bytes::from_static(&[0x65]),
            },
        ];

        let filtered = filter_parameter_sets(nals);
        let types: Vec<_> = filtered.iter().map(|nal| nal.nal_type).collect();
        assert_eq!(types, vec![NalUnitType::Sei, NalUnitType::IdrSlice]);
    }
}
