//! Access-unit recovery from an Annex-B H.264 byte stream.
//!
//! The encoder is run with access unit delimiters inserted, so every
//! picture starts with an AUD NAL. Units are only known to be complete
//! once the next start code is seen; the tail is released by `finish`.

use splice_demux::nal::{self, NAL_AUD, NAL_IDR, NAL_PPS, NAL_SPS};

/// One coded picture's NAL units, start codes and delimiter removed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccessUnit {
    pub units: Vec<Vec<u8>>,
}

impl AccessUnit {
    pub fn is_key(&self) -> bool {
        self.units.iter().any(|u| nal::nal_type(u) == Some(NAL_IDR))
    }

    /// First SPS and first PPS carried in this unit.
    pub fn param_sets(&self) -> (Option<&[u8]>, Option<&[u8]>) {
        let find = |kind| {
            self.units
                .iter()
                .find(|u| nal::nal_type(u) == Some(kind))
                .map(Vec::as_slice)
        };
        (find(NAL_SPS), find(NAL_PPS))
    }

    /// Sample payload with 4-byte length prefixes. Parameter sets travel
    /// in the `avcC` record, so they are left out unless the unit holds
    /// nothing else.
    pub fn to_sample(&self) -> Vec<u8> {
        let picture: Vec<&[u8]> = self
            .units
            .iter()
            .filter(|u| !matches!(nal::nal_type(u), Some(NAL_SPS | NAL_PPS)))
            .map(Vec::as_slice)
            .collect();
        if picture.is_empty() {
            nal::to_length_prefixed(self.units.iter().map(Vec::as_slice))
        } else {
            nal::to_length_prefixed(picture)
        }
    }
}

#[derive(Debug, Default)]
pub struct AccessUnitSplitter {
    buf: Vec<u8>,
    scan_from: usize,
    unit_start: Option<usize>,
    current: Vec<Vec<u8>>,
}

impl AccessUnitSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed stream bytes; returns every access unit completed by them.
    pub fn push(&mut self, data: &[u8]) -> Vec<AccessUnit> {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();
        let mut i = self.scan_from;
        while i + 3 <= self.buf.len() {
            if self.buf[i] == 0 && self.buf[i + 1] == 0 && self.buf[i + 2] == 1 {
                if let Some(start) = self.unit_start {
                    let unit = trim_trailing_zeros(&self.buf[start..i]).to_vec();
                    self.accept(unit, &mut out);
                }
                self.unit_start = Some(i + 3);
                i += 3;
            } else {
                i += 1;
            }
        }

        // Keep only the unfinished unit and any partial start code.
        let keep = self.unit_start.unwrap_or(i);
        self.buf.drain(..keep);
        self.scan_from = i - keep;
        if self.unit_start.is_some() {
            self.unit_start = Some(0);
        }
        out
    }

    /// End of stream: release the last unit and access unit.
    pub fn finish(&mut self) -> Option<AccessUnit> {
        let mut out = Vec::new();
        if let Some(start) = self.unit_start.take() {
            let unit = trim_trailing_zeros(&self.buf[start..]).to_vec();
            self.accept(unit, &mut out);
        }
        self.buf.clear();
        self.scan_from = 0;
        if !self.current.is_empty() {
            out.push(AccessUnit {
                units: std::mem::take(&mut self.current),
            });
        }
        out.pop()
    }

    fn accept(&mut self, unit: Vec<u8>, out: &mut Vec<AccessUnit>) {
        match nal::nal_type(&unit) {
            None => {}
            Some(NAL_AUD) => {
                if !self.current.is_empty() {
                    out.push(AccessUnit {
                        units: std::mem::take(&mut self.current),
                    });
                }
            }
            Some(_) => self.current.push(unit),
        }
    }
}

fn trim_trailing_zeros(unit: &[u8]) -> &[u8] {
    let mut end = unit.len();
    while end > 0 && unit[end - 1] == 0 {
        end -= 1;
    }
    &unit[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUD: [u8; 2] = [0x09, 0xF0];
    const SPS: [u8; 5] = [0x67, 0x42, 0xC0, 0x1F, 0xDA];
    const PPS: [u8; 3] = [0x68, 0xCE, 0x3C];
    const IDR: [u8; 3] = [0x65, 0x88, 0x84];
    const SLICE: [u8; 3] = [0x41, 0x9A, 0x02];

    fn stream() -> Vec<u8> {
        let mut out = Vec::new();
        for unit in [&AUD[..], &SPS, &PPS, &IDR, &AUD, &SLICE, &AUD, &SLICE] {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(unit);
        }
        out
    }

    fn split_in_steps(data: &[u8], step: usize) -> Vec<AccessUnit> {
        let mut splitter = AccessUnitSplitter::new();
        let mut units = Vec::new();
        for piece in data.chunks(step) {
            units.extend(splitter.push(piece));
        }
        units.extend(splitter.finish());
        units
    }

    #[test]
    fn test_split_on_delimiters() {
        let units = split_in_steps(&stream(), 1024);
        assert_eq!(units.len(), 3);
        assert!(units[0].is_key());
        assert!(!units[1].is_key());
        assert_eq!(units[0].param_sets(), (Some(&SPS[..]), Some(&PPS[..])));
        assert_eq!(units[2].units, vec![SLICE.to_vec()]);
    }

    #[test]
    fn test_split_is_independent_of_read_size() {
        let whole = split_in_steps(&stream(), 1024);
        for step in [1, 2, 3, 5, 7] {
            assert_eq!(split_in_steps(&stream(), step), whole, "step {}", step);
        }
    }

    #[test]
    fn test_sample_drops_param_sets() {
        let units = split_in_steps(&stream(), 64);
        let sample = units[0].to_sample();
        assert_eq!(sample, vec![0, 0, 0, 3, 0x65, 0x88, 0x84]);

        let only_params = AccessUnit {
            units: vec![SPS.to_vec(), PPS.to_vec()],
        };
        assert_eq!(only_params.to_sample().len(), 4 + SPS.len() + 4 + PPS.len());
    }

    #[test]
    fn test_finish_on_empty_stream() {
        let mut splitter = AccessUnitSplitter::new();
        assert!(splitter.push(&[]).is_empty());
        assert!(splitter.finish().is_none());
    }
}
