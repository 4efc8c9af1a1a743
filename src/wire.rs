//! Bounds-checked little-endian buffer access
//!
//! Command builders write their fields through a `ByteWriter` and decoders read
//! through a `ByteReader`. Every access is checked against the buffer length and
//! fails with `KvaserError::BufferOverrun` instead of panicking.

use crate::error::{KvaserError, Result};

fn check(offset: usize, width: usize, available: usize) -> Result<()> {
    let needed = offset.checked_add(width).unwrap_or(usize::MAX);
    if needed > available {
        return Err(KvaserError::BufferOverrun { needed, available });
    }
    Ok(())
}

/// Zero-filled command buffer with positional little-endian writes
#[derive(Debug, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Create a zero-filled buffer of `len` bytes
    pub fn new(len: usize) -> Self {
        Self { buf: vec![0u8; len] }
    }

    /// Write one byte at `offset`
    pub fn put_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        self.put_bytes(offset, &[value])
    }

    /// Write a little-endian u16 at `offset`
    pub fn put_u16(&mut self, offset: usize, value: u16) -> Result<()> {
        self.put_bytes(offset, &value.to_le_bytes())
    }

    /// Write a little-endian u32 at `offset`
    pub fn put_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.put_bytes(offset, &value.to_le_bytes())
    }

    /// Copy `data` to `offset`
    pub fn put_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        check(offset, data.len(), self.buf.len())?;
        self.buf[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Consume the writer and return the command bytes
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Positional little-endian reads over a received command
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn u8(&self, offset: usize) -> Result<u8> {
        check(offset, 1, self.buf.len())?;
        Ok(self.buf[offset])
    }

    pub fn u16(&self, offset: usize) -> Result<u16> {
        let b = self.bytes(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&self, offset: usize) -> Result<u32> {
        let b = self.bytes(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&self, offset: usize) -> Result<u64> {
        let b = self.bytes(offset, 8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// 48-bit timer value stored as three little-endian u16 words
    pub fn ticks48(&self, offset: usize) -> Result<u64> {
        let lo = self.u16(offset)? as u64;
        let mid = self.u16(offset + 2)? as u64;
        let hi = self.u16(offset + 4)? as u64;
        Ok(lo | (mid << 16) | (hi << 32))
    }

    pub fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        check(offset, len, self.buf.len())?;
        Ok(&self.buf[offset..offset + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_little_endian() {
        let mut w = ByteWriter::new(8);
        w.put_u8(0, 0xAA).unwrap();
        w.put_u16(1, 0x1234).unwrap();
        w.put_u32(3, 500_000).unwrap();
        assert_eq!(w.into_vec(), vec![0xAA, 0x34, 0x12, 0x20, 0xA1, 0x07, 0x00, 0x00]);
    }

    #[test]
    fn test_writer_overrun() {
        let mut w = ByteWriter::new(4);
        match w.put_u32(2, 1) {
            Err(KvaserError::BufferOverrun { needed, available }) => {
                assert_eq!(needed, 6);
                assert_eq!(available, 4);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_reader_ticks48() {
        let data = [0, 0, 0, 0, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00];
        let r = ByteReader::new(&data);
        assert_eq!(r.ticks48(4).unwrap(), 0x0003_0002_0001);
    }

    #[test]
    fn test_reader_overrun() {
        let data = [1u8, 2, 3];
        let r = ByteReader::new(&data);
        assert_eq!(r.u16(1).unwrap(), 0x0302);
        assert!(matches!(r.u32(0), Err(KvaserError::BufferOverrun { .. })));
        assert!(matches!(r.u8(usize::MAX), Err(KvaserError::BufferOverrun { .. })));
    }
}
