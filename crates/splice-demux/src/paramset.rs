//! Decoder configuration (`avcC`) recovery.
//!
//! Container metadata is tried first by the parser. When it is missing,
//! the record is rebuilt from SPS/PPS units found in the coded samples
//! themselves, under whichever framing those samples use.

use crate::nal::{self, NAL_PPS, NAL_SPS};

/// Prefix widths tried for length-prefixed samples, in order.
pub const PREFIX_WIDTHS: [usize; 4] = [4, 3, 2, 1];

/// SPS/PPS pair recovered from a bitstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSets {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
    /// NAL length field size the samples were framed with; 4 for
    /// start-code framed samples.
    pub length_size: u8,
}

impl ParamSets {
    pub fn to_avcc(&self) -> Option<Vec<u8>> {
        build_avcc(&self.sps, &self.pps, self.length_size)
    }
}

#[derive(Default)]
struct Found<'a> {
    sps: Option<&'a [u8]>,
    pps: Option<&'a [u8]>,
}

impl<'a> Found<'a> {
    fn offer(&mut self, unit: &'a [u8]) {
        match nal::nal_type(unit) {
            Some(NAL_SPS) if self.sps.is_none() => self.sps = Some(unit),
            Some(NAL_PPS) if self.pps.is_none() => self.pps = Some(unit),
            _ => {}
        }
    }

    fn finish(&self, length_size: u8) -> Option<ParamSets> {
        match (self.sps, self.pps) {
            (Some(sps), Some(pps)) => Some(ParamSets {
                sps: sps.to_vec(),
                pps: pps.to_vec(),
                length_size,
            }),
            _ => None,
        }
    }
}

/// Rebuild parameter sets from the leading coded samples.
///
/// Start-code framed payloads are scanned first. Length-prefixed payloads
/// are walked at each of [`PREFIX_WIDTHS`] until the payload runs out or a
/// length is invalid; units walked before a bad length still count. The
/// first width that yields both an SPS and a PPS wins.
pub fn reconstruct<'a, I>(payloads: I) -> Option<ParamSets>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let payloads: Vec<&[u8]> = payloads.into_iter().collect();

    let mut found = Found::default();
    for payload in payloads.iter().filter(|p| nal::is_annex_b(p)) {
        for unit in nal::split_annex_b(payload) {
            found.offer(unit);
        }
    }
    if let Some(sets) = found.finish(4) {
        return Some(sets);
    }

    for width in PREFIX_WIDTHS {
        let mut found = Found::default();
        for payload in payloads.iter().filter(|p| !nal::is_annex_b(p)) {
            for unit in nal::walk_length_prefixed(payload, width) {
                found.offer(unit);
            }
        }
        if let Some(sets) = found.finish(width as u8) {
            return Some(sets);
        }
    }
    None
}

/// Standard AVC decoder configuration record with one SPS and one PPS.
///
/// Returns `None` if the SPS is too short to carry profile and level.
pub fn build_avcc(sps: &[u8], pps: &[u8], length_size: u8) -> Option<Vec<u8>> {
    if sps.len() < 4 || !(1..=4).contains(&length_size) {
        return None;
    }
    let mut out = Vec::with_capacity(11 + sps.len() + pps.len());
    out.push(1);
    out.extend_from_slice(&sps[1..4]);
    out.push(0xFC | (length_size - 1));
    out.push(0xE0 | 1);
    out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    out.extend_from_slice(sps);
    out.push(1);
    out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    out.extend_from_slice(pps);
    Some(out)
}

/// Parsed decoder configuration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    pub profile: u8,
    pub compatibility: u8,
    pub level: u8,
    pub length_size: u8,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
}

impl AvcConfig {
    /// `avc1.PPCCLL` codec string.
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile, self.compatibility, self.level
        )
    }

    /// SPS and PPS as one start-code framed buffer.
    pub fn annex_b_prelude(&self) -> Vec<u8> {
        nal::to_annex_b(self.sps.iter().chain(self.pps.iter()).map(Vec::as_slice))
    }
}

pub fn parse_avcc(record: &[u8]) -> Option<AvcConfig> {
    if record.len() < 7 || record[0] != 1 {
        return None;
    }
    let mut pos = 5;
    let read_sets = |count: usize, pos: &mut usize| -> Option<Vec<Vec<u8>>> {
        let mut sets = Vec::with_capacity(count);
        for _ in 0..count {
            let len_bytes = record.get(*pos..*pos + 2)?;
            let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
            *pos += 2;
            sets.push(record.get(*pos..*pos + len)?.to_vec());
            *pos += len;
        }
        Some(sets)
    };
    let sps_count = (record[pos] & 0x1F) as usize;
    pos += 1;
    let sps = read_sets(sps_count, &mut pos)?;
    let pps_count = *record.get(pos)? as usize;
    pos += 1;
    let pps = read_sets(pps_count, &mut pos)?;
    Some(AvcConfig {
        profile: record[1],
        compatibility: record[2],
        level: record[3],
        length_size: (record[4] & 0x03) + 1,
        sps,
        pps,
    })
}

/// Find an `avcC` box anywhere in raw container bytes and slice out its
/// payload by the box's declared size, bypassing structured parsing.
pub fn scan_avcc_box(container: &[u8]) -> Option<&[u8]> {
    let tag = b"avcC";
    let mut from = 4;
    while from + 4 <= container.len() {
        let rel = container[from..].windows(4).position(|w| w == tag)?;
        let at = from + rel;
        let size_bytes = &container[at - 4..at];
        let size =
            u32::from_be_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]])
                as usize;
        let start = at + 4;
        let end = (at - 4).checked_add(size);
        if let Some(end) = end {
            if size > 8 && end <= container.len() {
                let payload = &container[start..end];
                if payload.first() == Some(&1) {
                    return Some(payload);
                }
            }
        }
        from = at + 1;
    }
    None
}
