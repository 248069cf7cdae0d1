//! Position-tracked reader/writer over protocol byte buffers

use crate::core::errors::{ConnectorError, ConnectorResult};
use crate::utils::binary::{
    buf_recv_i16, buf_recv_i32, buf_recv_i64, buf_recv_u32, buf_recv_u64, buf_send_i64,
    buf_send_u64,
};

/// A buffer reader that manages position and provides bounds-checked reads
/// of the integer widths the replication protocol uses.
#[derive(Debug)]
pub struct BufferReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BufferReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Bytes left past the current position.
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    pub fn has_bytes(&self, count: usize) -> bool {
        self.remaining() >= count
    }

    pub fn read_u8(&mut self) -> ConnectorResult<u8> {
        if !self.has_bytes(1) {
            return Err(ConnectorError::parse("not enough bytes for u8"));
        }
        let value = self.buffer[self.position];
        self.position += 1;
        Ok(value)
    }

    pub fn read_char(&mut self) -> ConnectorResult<char> {
        Ok(self.read_u8()? as char)
    }

    pub fn read_i16(&mut self) -> ConnectorResult<i16> {
        if !self.has_bytes(2) {
            return Err(ConnectorError::parse("not enough bytes for i16"));
        }
        let value = buf_recv_i16(&self.buffer[self.position..]);
        self.position += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> ConnectorResult<u32> {
        if !self.has_bytes(4) {
            return Err(ConnectorError::parse("not enough bytes for u32"));
        }
        let value = buf_recv_u32(&self.buffer[self.position..]);
        self.position += 4;
        Ok(value)
    }

    pub fn read_i32(&mut self) -> ConnectorResult<i32> {
        if !self.has_bytes(4) {
            return Err(ConnectorError::parse("not enough bytes for i32"));
        }
        let value = buf_recv_i32(&self.buffer[self.position..]);
        self.position += 4;
        Ok(value)
    }

    pub fn read_u64(&mut self) -> ConnectorResult<u64> {
        if !self.has_bytes(8) {
            return Err(ConnectorError::parse("not enough bytes for u64"));
        }
        let value = buf_recv_u64(&self.buffer[self.position..]);
        self.position += 8;
        Ok(value)
    }

    pub fn read_i64(&mut self) -> ConnectorResult<i64> {
        if !self.has_bytes(8) {
            return Err(ConnectorError::parse("not enough bytes for i64"));
        }
        let value = buf_recv_i64(&self.buffer[self.position..]);
        self.position += 8;
        Ok(value)
    }

    /// Read a null-terminated string (pgoutput identifier encoding).
    pub fn read_cstring(&mut self) -> ConnectorResult<String> {
        let start = self.position;
        while self.position < self.buffer.len() && self.buffer[self.position] != 0 {
            self.position += 1;
        }
        if self.position >= self.buffer.len() {
            return Err(ConnectorError::parse("string not null-terminated"));
        }
        let value = String::from_utf8_lossy(&self.buffer[start..self.position]).into_owned();
        self.position += 1; // null terminator
        Ok(value)
    }

    pub fn read_bytes(&mut self, count: usize) -> ConnectorResult<Vec<u8>> {
        if !self.has_bytes(count) {
            return Err(ConnectorError::parse("not enough bytes"));
        }
        let bytes = self.buffer[self.position..self.position + count].to_vec();
        self.position += count;
        Ok(bytes)
    }
}

/// A buffer writer over a fixed-size frame, used to construct the standby
/// status update.
#[derive(Debug)]
pub struct BufferWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> BufferWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn has_space(&self, count: usize) -> bool {
        self.buffer.len().saturating_sub(self.position) >= count
    }

    pub fn write_u8(&mut self, value: u8) -> ConnectorResult<()> {
        if !self.has_space(1) {
            return Err(ConnectorError::parse("not enough space for u8"));
        }
        self.buffer[self.position] = value;
        self.position += 1;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> ConnectorResult<()> {
        if !self.has_space(8) {
            return Err(ConnectorError::parse("not enough space for u64"));
        }
        buf_send_u64(value, &mut self.buffer[self.position..]);
        self.position += 8;
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> ConnectorResult<()> {
        if !self.has_space(8) {
            return Err(ConnectorError::parse("not enough space for i64"));
        }
        buf_send_i64(value, &mut self.buffer[self.position..]);
        self.position += 8;
        Ok(())
    }

    pub fn bytes_written(&self) -> usize {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_walks_mixed_fields() {
        let mut buf = vec![b'k'];
        buf.extend_from_slice(&42u64.to_be_bytes());
        buf.extend_from_slice(&(-7i64).to_be_bytes());
        buf.push(1);

        let mut reader = BufferReader::new(&buf);
        assert_eq!(reader.read_char().unwrap(), 'k');
        assert_eq!(reader.read_u64().unwrap(), 42);
        assert_eq!(reader.read_i64().unwrap(), -7);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.remaining(), 0);
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn test_reader_cstring() {
        let buf = b"public\0outbox\0";
        let mut reader = BufferReader::new(buf);
        assert_eq!(reader.read_cstring().unwrap(), "public");
        assert_eq!(reader.read_cstring().unwrap(), "outbox");

        let mut unterminated = BufferReader::new(b"oops");
        assert!(unterminated.read_cstring().is_err());
    }

    #[test]
    fn test_reader_bounds() {
        let mut reader = BufferReader::new(&[0, 1]);
        assert!(reader.read_u32().is_err());
        assert_eq!(reader.read_i16().unwrap(), 1);
        assert!(reader.read_bytes(1).is_err());
    }

    #[test]
    fn test_writer_fills_frame_exactly() {
        let mut frame = [0u8; 17];
        let mut writer = BufferWriter::new(&mut frame);
        writer.write_u8(b'r').unwrap();
        writer.write_u64(0x120).unwrap();
        writer.write_i64(99).unwrap();
        assert_eq!(writer.bytes_written(), 17);
        assert!(writer.write_u8(0).is_err());

        let mut reader = BufferReader::new(&frame);
        assert_eq!(reader.read_char().unwrap(), 'r');
        assert_eq!(reader.read_u64().unwrap(), 0x120);
        assert_eq!(reader.read_i64().unwrap(), 99);
    }
}
