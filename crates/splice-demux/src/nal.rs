//! H.264 NAL unit framing: Annex-B start codes and length prefixes.

pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR: u8 = 5;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;

/// Unit type tag: the low five bits of the header byte.
pub fn nal_type(unit: &[u8]) -> Option<u8> {
    unit.first().map(|b| b & 0x1F)
}

/// Length of the start code at the head of `data`, if it has one.
pub fn start_code_len(data: &[u8]) -> Option<usize> {
    if data.starts_with(&[0, 0, 0, 1]) {
        Some(4)
    } else if data.starts_with(&[0, 0, 1]) {
        Some(3)
    } else {
        None
    }
}

/// Whether a payload is start-code delimited rather than length-prefixed.
pub fn is_annex_b(data: &[u8]) -> bool {
    start_code_len(data).is_some()
}

/// Split a start-code delimited buffer into units, start codes removed.
///
/// A 4-byte start code is treated as a 3-byte one preceded by a zero, so
/// trailing zeros before the next start are trimmed from each unit.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut units = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let mut end = match starts.get(n + 1) {
            Some(&next) => next - 3,
            None => data.len(),
        };
        while end > start && data[end - 1] == 0 {
            end -= 1;
        }
        if end > start {
            units.push(&data[start..end]);
        }
    }
    units
}

/// Walk a length-prefixed buffer with the given prefix width (1 to 4),
/// stopping at the first zero or overrunning length.
///
/// Units read before the stop are kept, so trailing padding or a
/// truncated tail does not hide the leading units.
pub fn walk_length_prefixed(data: &[u8], width: usize) -> Vec<&[u8]> {
    walk(data, width).0
}

/// Strict form of [`walk_length_prefixed`]: `None` unless every byte of
/// the buffer belongs to a well-formed unit.
pub fn split_length_prefixed(data: &[u8], width: usize) -> Option<Vec<&[u8]>> {
    match walk(data, width) {
        (units, true) if (1..=4).contains(&width) => Some(units),
        _ => None,
    }
}

fn walk(data: &[u8], width: usize) -> (Vec<&[u8]>, bool) {
    let mut units = Vec::new();
    if !(1..=4).contains(&width) {
        return (units, false);
    }
    let mut pos = 0;
    while pos < data.len() {
        if pos + width > data.len() {
            return (units, false);
        }
        let len = data[pos..pos + width]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        pos += width;
        if len == 0 || len > data.len() - pos {
            return (units, false);
        }
        units.push(&data[pos..pos + len]);
        pos += len;
    }
    (units, true)
}

/// Re-frame units with 4-byte big-endian length prefixes.
pub fn to_length_prefixed<'a>(units: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in units {
        out.extend_from_slice(&(unit.len() as u32).to_be_bytes());
        out.extend_from_slice(unit);
    }
    out
}

/// Re-frame units with 4-byte start codes.
pub fn to_annex_b<'a>(units: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in units {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(unit);
    }
    out
}
