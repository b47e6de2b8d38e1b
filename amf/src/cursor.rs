use byteorder::{BigEndian, ByteOrder};

use crate::errors::{AmfError, AmfResult};

/// Hard cap on the size of an encoded stream.
pub const MAX_STREAM_LENGTH: usize = 512 * 1024 * 1024;

const INITIAL_STREAM_LENGTH: usize = 1024;

/// Positioned read view over a borrowed byte slice.
///
/// Every read is bounds checked; running past the end fails with
/// [`AmfError::UnexpectedEnd`] carrying the offset of the failed read.
#[derive(Debug, Clone)]
pub struct ReadCursor<'a> {
    stream: &'a [u8],
    pos: usize,
}

impl<'a> ReadCursor<'a> {
    pub fn new(stream: &'a [u8]) -> Self {
        Self { stream, pos: 0 }
    }

    /// Byte offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.stream.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> AmfResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(AmfError::UnexpectedEnd {
                position: self.pos,
                needed: len,
            });
        }
        let bytes = &self.stream[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> AmfResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> AmfResult<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> AmfResult<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn read_f64(&mut self) -> AmfResult<f64> {
        Ok(BigEndian::read_f64(self.take(8)?))
    }

    pub fn read_bytes(&mut self, len: usize) -> AmfResult<&'a [u8]> {
        self.take(len)
    }
}

/// Growable output buffer, doubling on demand up to its limit
/// ([`MAX_STREAM_LENGTH`] by default).
#[derive(Debug)]
pub struct WriteCursor {
    stream: Vec<u8>,
    limit: usize,
}

impl Default for WriteCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteCursor {
    pub fn new() -> Self {
        Self::with_limit(MAX_STREAM_LENGTH)
    }

    /// Cap the stream below the default [`MAX_STREAM_LENGTH`].
    pub fn with_limit(limit: usize) -> Self {
        Self {
            stream: Vec::new(),
            limit: limit.min(MAX_STREAM_LENGTH),
        }
    }

    pub fn len(&self) -> usize {
        self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> AmfResult<()> {
        let needed = self.stream.len() + bytes.len();
        if needed > self.limit {
            return Err(AmfError::StreamTooLarge { size: needed });
        }
        if needed > self.stream.capacity() {
            let mut size = self.stream.capacity().max(INITIAL_STREAM_LENGTH);
            while needed > size {
                size *= 2;
            }
            self.stream.reserve_exact(size - self.stream.len());
        }
        self.stream.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> AmfResult<()> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> AmfResult<()> {
        let mut buf = [0; 2];
        BigEndian::write_u16(&mut buf, value);
        self.write_bytes(&buf)
    }

    pub fn write_u32(&mut self, value: u32) -> AmfResult<()> {
        let mut buf = [0; 4];
        BigEndian::write_u32(&mut buf, value);
        self.write_bytes(&buf)
    }

    pub fn write_f64(&mut self, value: f64) -> AmfResult<()> {
        let mut buf = [0; 8];
        BigEndian::write_f64(&mut buf, value);
        self.write_bytes(&buf)
    }

    /// Consume the cursor and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.stream
    }
}
