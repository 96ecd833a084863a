//! Zero-copy ISO-BMFF box reader over an in-memory container.

use std::fmt;

use thiserror::Error;

use splice_core::SpliceError;

/// Malformed-container failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DemuxError {
    #[error("truncated {0} box")]
    Truncated(FourCC),

    #[error("box {kind} declares size {size} past end of parent ({available} bytes left)")]
    Overrun {
        kind: FourCC,
        size: u64,
        available: usize,
    },

    #[error("unexpected end of data reading {0}")]
    UnexpectedEof(&'static str),

    #[error("missing required box: {0}")]
    MissingBox(FourCC),

    #[error("no video track in container")]
    NoVideoTrack,

    #[error("sample table inconsistent: {0}")]
    SampleTable(String),
}

impl From<DemuxError> for SpliceError {
    fn from(err: DemuxError) -> Self {
        SpliceError::Demux(err.to_string())
    }
}

/// A four-character box type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const FTYP: FourCC = FourCC(*b"ftyp");
    pub const MOOV: FourCC = FourCC(*b"moov");
    pub const MDAT: FourCC = FourCC(*b"mdat");
    pub const TRAK: FourCC = FourCC(*b"trak");
    pub const TKHD: FourCC = FourCC(*b"tkhd");
    pub const MDIA: FourCC = FourCC(*b"mdia");
    pub const MDHD: FourCC = FourCC(*b"mdhd");
    pub const HDLR: FourCC = FourCC(*b"hdlr");
    pub const MINF: FourCC = FourCC(*b"minf");
    pub const STBL: FourCC = FourCC(*b"stbl");
    pub const STSD: FourCC = FourCC(*b"stsd");
    pub const STTS: FourCC = FourCC(*b"stts");
    pub const CTTS: FourCC = FourCC(*b"ctts");
    pub const STSS: FourCC = FourCC(*b"stss");
    pub const STSZ: FourCC = FourCC(*b"stsz");
    pub const STSC: FourCC = FourCC(*b"stsc");
    pub const STCO: FourCC = FourCC(*b"stco");
    pub const CO64: FourCC = FourCC(*b"co64");
    pub const AVC1: FourCC = FourCC(*b"avc1");
    pub const AVC3: FourCC = FourCC(*b"avc3");
    pub const AVCC: FourCC = FourCC(*b"avcC");

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.as_str())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// One box: its type, payload (header stripped), and absolute offset of
/// the payload within the container.
#[derive(Debug, Clone, Copy)]
pub struct Mp4Box<'a> {
    pub kind: FourCC,
    pub payload: &'a [u8],
    pub offset: usize,
}

impl<'a> Mp4Box<'a> {
    pub fn children(&self) -> BoxIter<'a> {
        BoxIter::new(self.payload, self.offset)
    }

    /// First direct child of the given type.
    pub fn child(&self, kind: FourCC) -> Result<Option<Mp4Box<'a>>, DemuxError> {
        for child in self.children() {
            let child = child?;
            if child.kind == kind {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    pub fn require(&self, kind: FourCC) -> Result<Mp4Box<'a>, DemuxError> {
        self.child(kind)?.ok_or(DemuxError::MissingBox(kind))
    }

    /// Reader over the payload, positioned after the full-box version/flags.
    pub fn full_box(&self) -> Result<(u8, Cursor<'a>), DemuxError> {
        let mut cursor = Cursor::new(self.payload);
        let version = cursor.u8("version")?;
        cursor.skip(3, "flags")?;
        Ok((version, cursor))
    }
}

/// Iterates sibling boxes in a byte range.
pub struct BoxIter<'a> {
    data: &'a [u8],
    base: usize,
    pos: usize,
    failed: bool,
}

impl<'a> BoxIter<'a> {
    pub fn new(data: &'a [u8], base: usize) -> Self {
        Self {
            data,
            base,
            pos: 0,
            failed: false,
        }
    }

    fn read_box(&mut self) -> Result<Mp4Box<'a>, DemuxError> {
        let rest = &self.data[self.pos..];
        if rest.len() < 8 {
            return Err(DemuxError::Truncated(FourCC(*b"????")));
        }
        let size32 = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as u64;
        let kind = FourCC([rest[4], rest[5], rest[6], rest[7]]);
        let (header, size) = match size32 {
            0 => (8usize, rest.len() as u64),
            1 => {
                if rest.len() < 16 {
                    return Err(DemuxError::Truncated(kind));
                }
                let mut large = [0u8; 8];
                large.copy_from_slice(&rest[8..16]);
                (16usize, u64::from_be_bytes(large))
            }
            n => (8usize, n),
        };
        if size < header as u64 {
            return Err(DemuxError::Truncated(kind));
        }
        if size > rest.len() as u64 {
            return Err(DemuxError::Overrun {
                kind,
                size,
                available: rest.len(),
            });
        }
        let size = size as usize;
        let found = Mp4Box {
            kind,
            payload: &rest[header..size],
            offset: self.base + self.pos + header,
        };
        self.pos += size;
        Ok(found)
    }
}

impl<'a> Iterator for BoxIter<'a> {
    type Item = Result<Mp4Box<'a>, DemuxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        let result = self.read_box();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

/// Big-endian field reader.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn bytes(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], DemuxError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(DemuxError::UnexpectedEof(what))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize, what: &'static str) -> Result<(), DemuxError> {
        self.bytes(n, what).map(|_| ())
    }

    pub fn u8(&mut self, what: &'static str) -> Result<u8, DemuxError> {
        Ok(self.bytes(1, what)?[0])
    }

    pub fn u16(&mut self, what: &'static str) -> Result<u16, DemuxError> {
        let b = self.bytes(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self, what: &'static str) -> Result<u32, DemuxError> {
        let b = self.bytes(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self, what: &'static str) -> Result<u64, DemuxError> {
        let b = self.bytes(8, what)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }
}
