//! ADTS framing for AAC produced by `ffmpeg -f adts`.

/// AAC frames are 1024 PCM frames long.
pub const SAMPLES_PER_FRAME: u32 = 1024;

const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdtsError {
    #[error("lost ADTS sync at byte {0}")]
    LostSync(usize),

    #[error("reserved ADTS sampling frequency index {0}")]
    BadSamplingIndex(u8),

    #[error("ADTS frame length {0} shorter than its header")]
    BadFrameLength(usize),
}

impl From<AdtsError> for splice_core::SpliceError {
    fn from(e: AdtsError) -> Self {
        splice_core::SpliceError::Codec(e.to_string())
    }
}

pub fn sampling_index(sample_rate: u32) -> Option<u8> {
    SAMPLE_RATES
        .iter()
        .position(|r| *r == sample_rate)
        .map(|i| i as u8)
}

/// Two-byte AudioSpecificConfig: object type, frequency index, channels.
pub fn audio_specific_config(object_type: u8, sampling_index: u8, channels: u8) -> [u8; 2] {
    let v =
        ((object_type as u16) << 11) | ((sampling_index as u16) << 7) | ((channels as u16) << 3);
    v.to_be_bytes()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdtsFrame {
    /// Object type (profile + 1).
    pub object_type: u8,
    pub sampling_index: u8,
    pub channels: u8,
    /// Raw AAC payload, header stripped.
    pub payload: Vec<u8>,
}

impl AdtsFrame {
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[self.sampling_index as usize]
    }

    pub fn audio_specific_config(&self) -> [u8; 2] {
        audio_specific_config(self.object_type, self.sampling_index, self.channels)
    }
}

/// Incremental ADTS splitter: bytes go in as they arrive, whole frames
/// come out.
#[derive(Debug, Default)]
pub struct AdtsParser {
    buf: Vec<u8>,
    consumed: usize,
}

impl AdtsParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) -> Result<Vec<AdtsFrame>, AdtsError> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();
        let mut pos = 0;
        while self.buf.len() - pos >= 7 {
            let h = &self.buf[pos..];
            if h[0] != 0xFF || h[1] & 0xF0 != 0xF0 {
                return Err(AdtsError::LostSync(self.consumed + pos));
            }
            let protection_absent = h[1] & 0x01 == 1;
            let object_type = ((h[2] >> 6) & 0x03) + 1;
            let sampling_index = (h[2] >> 2) & 0x0F;
            if sampling_index as usize >= SAMPLE_RATES.len() {
                return Err(AdtsError::BadSamplingIndex(sampling_index));
            }
            let channels = ((h[2] & 0x01) << 2) | (h[3] >> 6);
            let frame_len =
                (((h[3] & 0x03) as usize) << 11) | ((h[4] as usize) << 3) | ((h[5] as usize) >> 5);
            let header_len = if protection_absent { 7 } else { 9 };
            if frame_len < header_len {
                return Err(AdtsError::BadFrameLength(frame_len));
            }
            if h.len() < frame_len {
                break;
            }
            frames.push(AdtsFrame {
                object_type,
                sampling_index,
                channels,
                payload: h[header_len..frame_len].to_vec(),
            });
            pos += frame_len;
        }
        self.buf.drain(..pos);
        self.consumed += pos;
        Ok(frames)
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
