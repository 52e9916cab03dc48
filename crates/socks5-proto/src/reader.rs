//! A cursor for pulling fields out of a byte slice.

use crate::{Error, Result};

/// A type for reading messages from a slice of bytes.
///
/// Every method that consumes input fails with [`Error::Truncated`] if
/// the slice runs out; none of them panic.  Multi-byte integers are
/// big-endian, as everywhere in SOCKS.
pub(crate) struct Reader<'a> {
    /// The underlying slice that we're reading from
    b: &'a [u8],
    /// The next position in the slice that we intend to read from.
    off: usize,
}

impl<'a> Reader<'a> {
    /// Construct a new Reader from a slice of bytes.
    pub(crate) fn from_slice(slice: &'a [u8]) -> Self {
        Reader { b: slice, off: 0 }
    }
    /// Return the number of bytes that have not yet been read.
    pub(crate) fn remaining(&self) -> usize {
        self.b.len() - self.off
    }
    /// Return the number of bytes that have already been read.
    pub(crate) fn consumed(&self) -> usize {
        self.off
    }
    /// Consume and return `n` bytes.
    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Truncated);
        }
        let b = &self.b[self.off..self.off + n];
        self.off += n;
        Ok(b)
    }
    /// Consume and return a single byte.
    pub(crate) fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
    /// Consume and return a big-endian u16.
    pub(crate) fn take_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_fields() {
        let msg = [0x05, 0x01, 0x00, 0x50, 0xAA, 0xBB];
        let mut r = Reader::from_slice(&msg[..]);
        assert_eq!(r.take_u8().unwrap(), 5);
        assert_eq!(r.take(2).unwrap(), &[0x01, 0x00]);
        assert_eq!(r.take_u16().unwrap(), 0x50AA);
        assert_eq!(r.consumed(), 5);
        assert_eq!(r.remaining(), 1);
        assert_eq!(r.take_u16(), Err(Error::Truncated));
        // A failed read consumes nothing.
        assert_eq!(r.remaining(), 1);
        assert_eq!(r.take(0).unwrap(), &[] as &[u8]);
    }
}
