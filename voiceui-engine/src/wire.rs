/// Little-endian wire helpers
///
/// Bounds-checked cursor over borrowed bytes plus the `{key, payload_size}`
/// record walker shared by the recognition-config and detection-event codecs.

use crate::error::{VuiError, VuiResult};
use bytes::Buf;

/// Size of a `{key u32, payload_size u32}` record header
pub const PARAM_HEADER_SIZE: usize = 8;

/// Bounds-checked little-endian reader
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn ensure(&self, needed: usize) -> VuiResult<()> {
        if self.buf.len() < needed {
            return Err(VuiError::Truncated {
                what: self.what,
                needed,
                available: self.buf.len(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> VuiResult<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> VuiResult<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self) -> VuiResult<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn i32(&mut self) -> VuiResult<i32> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn u64(&mut self) -> VuiResult<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn skip(&mut self, count: usize) -> VuiResult<()> {
        self.ensure(count)?;
        self.buf.advance(count);
        Ok(())
    }

    /// Borrow the next `count` bytes and advance past them
    pub fn take(&mut self, count: usize) -> VuiResult<&'a [u8]> {
        self.ensure(count)?;
        let (head, tail) = self.buf.split_at(count);
        self.buf = tail;
        Ok(head)
    }
}

/// One `{key, payload}` record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamRecord<'a> {
    pub key: u32,
    pub payload: &'a [u8],
}

/// Walks a sequence of `{key u32, payload_size u32, payload}` records
///
/// Each step advances by exactly header plus `payload_size`; a record that
/// runs past the end of the buffer yields a truncation error.
pub struct ParamRecords<'a> {
    reader: WireReader<'a>,
    failed: bool,
}

impl<'a> ParamRecords<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self {
            reader: WireReader::new(buf, what),
            failed: false,
        }
    }

    fn read_record(&mut self) -> VuiResult<ParamRecord<'a>> {
        let key = self.reader.u32()?;
        let size = self.reader.u32()? as usize;
        let payload = self.reader.take(size)?;
        Ok(ParamRecord { key, payload })
    }
}

impl<'a> Iterator for ParamRecords<'a> {
    type Item = VuiResult<ParamRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.remaining() == 0 {
            return None;
        }

        let record = self.read_record();

        if record.is_err() {
            self.failed = true;
        }
        Some(record)
    }
}

/// Join the 32-bit halves of a DSP timestamp
pub fn join_u64(lsw: u32, msw: u32) -> u64 {
    (lsw as u64) | ((msw as u64) << 32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn test_reader_reads_little_endian() {
        let mut buf = Vec::new();
        buf.put_u16_le(0xBEEF);
        buf.put_u32_le(7);
        buf.put_u64_le(1 << 40);

        let mut reader = WireReader::new(&buf, "test");
        assert_eq!(reader.u16().unwrap(), 0xBEEF);
        assert_eq!(reader.u32().unwrap(), 7);
        assert_eq!(reader.u64().unwrap(), 1 << 40);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reader_truncation() {
        let buf = [1u8, 2, 3];
        let mut reader = WireReader::new(&buf, "short");

        match reader.u32() {
            Err(VuiError::Truncated {
                what,
                needed,
                available,
            }) => {
                assert_eq!(what, "short");
                assert_eq!(needed, 4);
                assert_eq!(available, 3);
            }
            other => panic!("Expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_param_records() {
        let mut buf = Vec::new();
        buf.put_u32_le(1);
        buf.put_u32_le(4);
        buf.put_u32_le(0xAABBCCDD);
        buf.put_u32_le(3);
        buf.put_u32_le(0);

        let records: Vec<_> = ParamRecords::new(&buf, "records")
            .collect::<VuiResult<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, 1);
        assert_eq!(records[0].payload, &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(records[1].key, 3);
        assert!(records[1].payload.is_empty());
    }

    #[test]
    fn test_param_record_overrun_stops_iteration() {
        let mut buf = Vec::new();
        buf.put_u32_le(0);
        buf.put_u32_le(64);
        buf.put_u32_le(1);

        let mut records = ParamRecords::new(&buf, "records");
        assert!(records.next().unwrap().is_err());
        assert!(records.next().is_none());
    }

    #[test]
    fn test_join_u64() {
        assert_eq!(join_u64(0x1, 0x2), 0x2_0000_0001);
        assert_eq!(join_u64(u32::MAX, 0), u32::MAX as u64);
    }
}
