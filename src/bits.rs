//! Bit-level reader over entropy-coded JPEG scan data.
//!
//! Bits are served MSB-first from a two-byte window that is refilled a byte at a time. Stuffed
//! `0xFF 0x00` pairs are collapsed to `0xFF` while refilling. Any other byte after `0xFF` is a
//! marker: the reader stops in front of it and reports exhaustion once the window runs dry.

pub struct BitReader<'a> {
    data: &'a [u8],
    /// Offset of the next byte to load into the window.
    position: usize,
    /// Left-aligned bit window.
    cur: u16,
    /// Number of valid bits in `cur` (0-16).
    left: u32,
    /// Marker byte following the `0xFF` at `position`, once one has been reached.
    marker: Option<u8>,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            cur: 0,
            left: 0,
            marker: None,
        }
    }

    /// Number of bytes of `data` that have been loaded into the window so far.
    #[inline]
    pub fn bytes_consumed(&self) -> usize {
        self.position
    }

    /// Returns the marker the reader has stopped in front of, if any.
    #[inline]
    pub fn marker(&self) -> Option<u8> {
        self.marker
    }

    fn next_byte(&mut self) -> Option<u8> {
        if self.marker.is_some() {
            return None;
        }
        let byte = *self.data.get(self.position)?;
        if byte != 0xFF {
            self.position += 1;
            return Some(byte);
        }
        match self.data.get(self.position + 1) {
            Some(0x00) => {
                self.position += 2;
                Some(0xFF)
            }
            Some(&marker) => {
                self.marker = Some(marker);
                None
            }
            // A lone trailing `0xFF` cannot be unstuffed; treat it as the end of the data.
            None => None,
        }
    }

    /// Loads bytes until the window holds more than 8 bits or the data is exhausted.
    fn refill(&mut self) {
        while self.left <= 8 {
            let Some(byte) = self.next_byte() else {
                break;
            };
            self.cur |= u16::from(byte) << (8 - self.left);
            self.left += 8;
        }
    }

    /// Peeks at the next `n` bits, which must already be in the window.
    fn peek(&self, n: u32) -> u16 {
        debug_assert!(n > 0 && n <= self.left);
        self.cur >> (16 - n)
    }

    fn consume(&mut self, n: u32) {
        debug_assert!(n <= self.left);
        self.cur = self.cur.checked_shl(n).unwrap_or(0);
        self.left -= n;
    }

    /// Reads a single bit, or returns `None` if the data is exhausted.
    pub fn read_bit(&mut self) -> Option<u8> {
        if self.left == 0 {
            self.refill();
            if self.left == 0 {
                return None;
            }
        }
        let bit = self.peek(1) as u8;
        self.consume(1);
        Some(bit)
    }

    /// Reads `n` bits (at most 16) as an unsigned integer.
    ///
    /// Returns `None` if fewer than `n` bits remain; the bits that were available are consumed.
    pub fn read_bits(&mut self, mut n: u32) -> Option<u16> {
        debug_assert!(n <= 16);
        let mut value: u32 = 0;
        while n > 0 {
            self.refill();
            if self.left == 0 {
                return None;
            }
            let take = n.min(self.left);
            value = (value << take) | u32::from(self.peek(take));
            self.consume(take);
            n -= take;
        }
        Some(value as u16)
    }

    /// Skips to the next `RSTn` marker.
    ///
    /// The unread bits of a partially consumed byte (the padding of the previous restart
    /// interval) are discarded.
    /// Returns `n` if an `RSTn` marker was found and consumed, `None` otherwise (in which case the
    /// reader continues at its current byte position).
    pub fn restart(&mut self) -> Option<u8> {
        // Whole bytes still in the window were never used; hand them back.
        for _ in 0..self.left / 8 {
            let stuffed = self.position >= 2
                && self.data[self.position - 2..self.position] == [0xFF, 0x00];
            self.position -= if stuffed { 2 } else { 1 };
        }
        self.cur = 0;
        self.left = 0;
        self.marker = None;

        let mut pos = self.position;
        // Markers may be preceded by any number of `0xFF` fill bytes.
        while self.data.get(pos) == Some(&0xFF) && self.data.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        match (self.data.get(pos), self.data.get(pos + 1)) {
            (Some(0xFF), Some(&m @ 0xD0..=0xD7)) => {
                self.position = pos + 2;
                Some(m - 0xD0)
            }
            _ => None,
        }
    }
}
