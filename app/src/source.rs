//! H.264 elementary stream input.

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info};

use publisher_flv::{parse_annex_b, NalUnit, NalUnitType};

/// Access units buffered between the reader thread and the publisher.
pub const SOURCE_CHANNEL_CAPACITY: usize = 30;

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// One coded picture with its parameter sets and side information, in
/// Annex B form.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub data: Bytes,
    pub key_frame: bool,
}

/// Split an Annex B stream into access units.
///
/// A new unit starts at an access unit delimiter, at parameter sets or SEI
/// following a slice, or at a slice whose `first_mb_in_slice` is zero.
pub fn split_access_units(stream: &[u8]) -> Vec<AccessUnit> {
    let mut units = Vec::new();
    let mut current: Vec<NalUnit> = Vec::new();
    let mut has_slice = false;

    for nal in parse_annex_b(stream) {
        let starts_unit = match nal.nal_type {
            NalUnitType::Aud => true,
            NalUnitType::Sps | NalUnitType::Pps | NalUnitType::Sei => has_slice,
            nal_type if nal_type.is_vcl() => has_slice && first_slice_of_picture(&nal),
            _ => false,
        };

        if starts_unit && !current.is_empty() {
            units.push(assemble(&current));
            current.clear();
            has_slice = false;
        }

        has_slice |= nal.nal_type.is_vcl();
        current.push(nal);
    }

    if current.iter().any(|nal| nal.nal_type.is_vcl()) {
        units.push(assemble(&current));
    }

    units
}

/// `first_mb_in_slice` is the first ue(v) field; zero is coded as a single 1 bit.
fn first_slice_of_picture(nal: &NalUnit) -> bool {
    nal.data.get(1).is_some_and(|byte| byte & 0x80 != 0)
}

fn assemble(nals: &[NalUnit]) -> AccessUnit {
    let size = nals.iter().map(|nal| START_CODE.len() + nal.data.len()).sum();
    let mut buf = BytesMut::with_capacity(size);
    for nal in nals {
        buf.put_slice(&START_CODE);
        buf.put_slice(&nal.data);
    }

    AccessUnit {
        data: buf.freeze(),
        key_frame: nals.iter().any(|nal| nal.nal_type == NalUnitType::IdrSlice),
    }
}

/// Read `path` on a background thread and send its access units, `loops`
/// times over. The thread ends when done or when the receiver is dropped,
/// returning how many units it sent.
pub fn spawn_reader(
    path: PathBuf,
    loops: u32,
) -> Result<(Receiver<AccessUnit>, JoinHandle<Result<u64>>)> {
    let (tx, rx) = crossbeam_channel::bounded(SOURCE_CHANNEL_CAPACITY);

    let handle = thread::Builder::new()
        .name("publisher-source".to_string())
        .spawn(move || read_loop(&path, loops, tx))
        .context("Failed to spawn source reader")?;

    Ok((rx, handle))
}

fn read_loop(path: &Path, loops: u32, tx: Sender<AccessUnit>) -> Result<u64> {
    let stream =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let units = split_access_units(&stream);
    info!(path = %path.display(), access_units = units.len(), "Input loaded");

    let mut sent = 0;
    for pass in 0..loops {
        debug!(pass, "Reading input");
        for unit in &units {
            if tx.send(unit.clone()).is_err() {
                debug!("Source receiver dropped");
                return Ok(sent);
            }
            sent += 1;
        }
    }

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1E, 0xAB];
    const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x21];
    const P_SLICE: &[u8] = &[0x41, 0x9A, 0x02];
    const P_SLICE_CONT: &[u8] = &[0x41, 0x4A, 0x02];

    fn annex_b(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(nal);
        }
        out
    }

    #[test]
    fn test_split_key_and_inter_frames() {
        let stream = annex_b(&[SPS, PPS, IDR, P_SLICE, P_SLICE]);
        let units = split_access_units(&stream);

        assert_eq!(units.len(), 3);
        assert!(units[0].key_frame);
        assert_eq!(units[0].data, Bytes::from(annex_b(&[SPS, PPS, IDR])));
        assert!(!units[1].key_frame);
        assert_eq!(units[2].data, Bytes::from(annex_b(&[P_SLICE])));
    }

    #[test]
    fn test_continuation_slice_stays_in_picture() {
        let stream = annex_b(&[P_SLICE, P_SLICE_CONT, P_SLICE]);
        let units = split_access_units(&stream);

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].data, Bytes::from(annex_b(&[P_SLICE, P_SLICE_CONT])));
    }

    #[test]
    fn test_delimiter_starts_unit() {
        let aud: &[u8] = &[0x09, 0xF0];
        let stream = annex_b(&[aud, P_SLICE, aud, P_SLICE_CONT]);
        let units = split_access_units(&stream);

        assert_eq!(units.len(), 2);
        assert_eq!(units[1].data, Bytes::from(annex_b(&[aud, P_SLICE_CONT])));
    }

    #[test]
    fn test_trailing_parameter_sets_are_dropped() {
        let stream = annex_b(&[IDR, SPS, PPS]);
        let units = split_access_units(&stream);
        assert_eq!(units.len(), 1);
        assert!(units[0].key_frame);
    }

    #[test]
    fn test_empty_input() {
        assert!(split_access_units(&[]).is_empty());
    }
}
