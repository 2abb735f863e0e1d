//! Growable byte buffer with a read cursor that can be rewound, the same
//! "advance, and restore on incomplete input" discipline the host's HTTP
//! parser uses (`state`/`index` fields walked forward, never truncated
//! until a full unit has actually been recognised).
//!
//! Every handshake stage in this crate reads through `ReadBuffer` rather
//! than slicing `&[u8]` directly, so that a TCP read landing mid-struct
//! just reports `NeedMoreData` instead of panicking or misparsing.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedMoreData;

#[derive(Debug, Default)]
pub struct ReadBuffer {
    data: Vec<u8>,
    cursor: usize,
}

impl ReadBuffer {
    pub fn new() -> Self {
        ReadBuffer { data: Vec::new(), cursor: 0 }
    }

    /// Append freshly-read bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// Drop consumed bytes from the front of the backing buffer. Call this
    /// after a stage finishes with the buffer (e.g. before handing
    /// remaining bytes to the next stage) to avoid unbounded growth.
    pub fn compact(&mut self) {
        if self.cursor > 0 {
            self.data.drain(0..self.cursor);
            self.cursor = 0;
        }
    }

    /// Run `f` against the buffer's current read position. If `f` returns
    /// `Err(NeedMoreData)`, the cursor is restored to its position at
    /// entry so a subsequent call sees the same bytes again once more
    /// data has arrived. On `Ok`, the cursor is left wherever `f` moved it
    /// via the `Cursor` handle it was given.
    pub fn parse_unwinding<T>(
        &mut self,
        f: impl FnOnce(&mut Cursor) -> Result<T, NeedMoreData>,
    ) -> Result<T, NeedMoreData> {
        let start = self.cursor;
        let mut cur = Cursor { data: &self.data, pos: self.cursor };
        match f(&mut cur) {
            Ok(v) => {
                self.cursor = cur.pos;
                Ok(v)
            }
            Err(NeedMoreData) => {
                self.cursor = start;
                Err(NeedMoreData)
            }
        }
    }
}

/// A cursor over the buffer's bytes, handed to the closure passed to
/// `parse_unwinding`. All `read_*`/`get_*` helpers advance `pos` and return
/// `Err(NeedMoreData)` rather than panicking when the buffer runs out.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, NeedMoreData> {
        if self.remaining_len() < 1 {
            return Err(NeedMoreData);
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, NeedMoreData> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32_be(&mut self) -> Result<u32, NeedMoreData> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64_be(&mut self) -> Result<u64, NeedMoreData> {
        let bytes = self.read_slice(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], NeedMoreData> {
        if self.remaining_len() < len {
            return Err(NeedMoreData);
        }
        let s = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(s)
    }

    /// Find `needle` within the unconsumed bytes without advancing the
    /// cursor; used by line-oriented parsing (HTTP request/status lines).
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        self.remaining().windows(needle.len()).position(|w| w == needle)
    }

    pub fn advance(&mut self, n: usize) -> Result<(), NeedMoreData> {
        if self.remaining_len() < n {
            return Err(NeedMoreData);
        }
        self.pos += n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwinds_on_need_more_data() {
        let mut buf = ReadBuffer::new();
        buf.push(&[0x01, 0x02]);
        let result = buf.parse_unwinding(|cur| {
            let _ = cur.read_u8()?;
            let _ = cur.read_u32_be()?; // not enough bytes
            Ok(())
        });
        assert_eq!(result, Err(NeedMoreData));
        assert_eq!(buf.remaining(), &[0x01, 0x02]);
    }

    #[test]
    fn commits_cursor_on_success() {
        let mut buf = ReadBuffer::new();
        buf.push(&[0x01, 0x02, 0x03]);
        let first = buf.parse_unwinding(|cur| cur.read_u8()).unwrap();
        assert_eq!(first, 0x01);
        assert_eq!(buf.remaining(), &[0x02, 0x03]);
    }

    #[test]
    fn partial_delivery_across_multiple_pushes() {
        let mut buf = ReadBuffer::new();
        buf.push(&[0x00]);
        assert_eq!(buf.parse_unwinding(|cur| cur.read_u16_be()), Err(NeedMoreData));
        buf.push(&[0x05]);
        assert_eq!(buf.parse_unwinding(|cur| cur.read_u16_be()), Ok(5));
    }
}
