//! Sub-byte bit reading for packed geometry headers.

use crate::error::{DecodeError, DecodeResult};

/// Bit-level reader over a byte slice.
///
/// Bits are consumed least-significant first within each byte. Reads never
/// straddle a byte boundary; callers lay fields out so that groups of reads
/// sum to whole bytes, then switch back to byte-level reading with
/// [`round_ptr`](Self::round_ptr).
#[derive(Debug)]
pub struct BitSource<'a> {
    data: &'a [u8],
    byte: usize,
    bit: u8,
}

impl<'a> BitSource<'a> {
    /// Create a reader positioned at `offset` bytes into `data`.
    #[must_use]
    pub fn new(data: &'a [u8], offset: usize) -> Self {
        Self {
            data,
            byte: offset,
            bit: 0,
        }
    }

    /// Read `count` bits (0..=8) as an unsigned value.
    ///
    /// Reading zero bits returns 0 without advancing.
    ///
    /// # Errors
    ///
    /// Fails if the read would straddle a byte boundary or run past the
    /// end of the buffer.
    pub fn read(&mut self, count: u8) -> DecodeResult<u8> {
        if count == 0 {
            return Ok(0);
        }
        if count > 8 - self.bit {
            return Err(DecodeError::InvalidFormat {
                context: "bit reader",
                detail: format!("{count}-bit read at bit position {}", self.bit),
            });
        }
        if self.byte >= self.data.len() {
            return Err(DecodeError::UnexpectedEof {
                context: "bit reader",
            });
        }

        let mut v = self.data[self.byte] >> self.bit;
        if count < 8 {
            v &= (1 << count) - 1;
        }

        self.bit += count;
        if self.bit == 8 {
            self.byte += 1;
            self.bit = 0;
        }

        Ok(v)
    }

    /// Advance to the next byte boundary (a no-op when already aligned)
    /// and return the byte offset for byte-level reading.
    pub fn round_ptr(&mut self) -> usize {
        if self.bit > 0 {
            self.byte += 1;
            self.bit = 0;
        }
        self.byte
    }
}
