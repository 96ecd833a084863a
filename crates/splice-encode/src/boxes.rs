//! Big-endian ISO BMFF box serialization.

/// Appends boxes to one growing buffer. Sizes are patched when a box is
/// closed, so nesting is expressed with [`BoxWriter::nest`].
#[derive(Debug, Default)]
pub struct BoxWriter {
    buf: Vec<u8>,
}

impl BoxWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u24(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes()[1..]);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    pub fn zeros(&mut self, n: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + n, 0);
        self
    }

    /// Write `kind` with whatever `body` emits as its payload.
    pub fn nest(&mut self, kind: &[u8; 4], body: impl FnOnce(&mut Self)) -> &mut Self {
        let start = self.buf.len();
        self.u32(0).bytes(kind);
        body(self);
        let size = (self.buf.len() - start) as u32;
        self.buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
        self
    }

    /// A full box: version and 24-bit flags precede the payload.
    pub fn full(
        &mut self,
        kind: &[u8; 4],
        version: u8,
        flags: u32,
        body: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.nest(kind, |w| {
            w.u8(version).u24(flags);
            body(w);
        })
    }

    /// The unity transformation matrix used by `mvhd` and `tkhd`.
    pub fn unity_matrix(&mut self) -> &mut Self {
        for v in [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000u32] {
            self.u32(v);
        }
        self
    }
}

/// MPEG-4 descriptor length, in the 7-bits-per-byte form.
pub fn descriptor_len(len: usize) -> Vec<u8> {
    let mut groups = vec![(len & 0x7F) as u8];
    let mut rest = len >> 7;
    while rest > 0 {
        groups.push(0x80 | (rest & 0x7F) as u8);
        rest >>= 7;
    }
    groups.reverse();
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_sizes_are_patched() {
        let mut w = BoxWriter::new();
        w.nest(b"moov", |w| {
            w.full(b"mvhd", 0, 0, |w| {
                w.u32(7);
            });
        });
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 8 + 16);
        assert_eq!(&bytes[0..8], &[0, 0, 0, 24, b'm', b'o', b'o', b'v']);
        assert_eq!(&bytes[8..16], &[0, 0, 0, 16, b'm', b'v', b'h', b'd']);
        assert_eq!(&bytes[16..24], &[0, 0, 0, 0, 0, 0, 0, 7]);
    }

    #[test]
    fn test_descriptor_len() {
        assert_eq!(descriptor_len(5), vec![5]);
        assert_eq!(descriptor_len(127), vec![127]);
        assert_eq!(descriptor_len(128), vec![0x81, 0x00]);
        assert_eq!(descriptor_len(300), vec![0x82, 0x2C]);
    }

    #[test]
    fn test_u24_and_zeros() {
        let mut w = BoxWriter::new();
        w.u24(0x010203).zeros(2);
        assert_eq!(w.into_bytes(), vec![1, 2, 3, 0, 0]);
    }
}
