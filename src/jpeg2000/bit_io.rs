use crate::error::J2kError;

/// Bit reader for packet headers (ISO/IEC 15444-1, B.10.1).
///
/// A byte following `0xFF` only carries 7 bits; its most significant bit is
/// a stuffed zero.
pub struct J2kBitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bit_buffer: u8,
    bits_left: u8,
}

impl<'a> J2kBitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_position(data, 0)
    }

    pub fn with_position(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos,
            bit_buffer: 0,
            bits_left: 0,
        }
    }

    pub fn read_bit(&mut self) -> Result<u8, J2kError> {
        if self.bits_left == 0 {
            let stuffed = self.bit_buffer == 0xFF;
            let b = *self
                .data
                .get(self.pos)
                .ok_or(J2kError::PacketHeaderCorrupt)?;
            self.pos += 1;
            self.bit_buffer = b;
            self.bits_left = if stuffed { 7 } else { 8 };
        }

        let bit = (self.bit_buffer >> (self.bits_left - 1)) & 1;
        self.bits_left -= 1;
        Ok(bit)
    }

    pub fn read_bits(&mut self, mut count: u32) -> Result<u32, J2kError> {
        let mut bits = 0u32;
        while count > 0 {
            let bit = self.read_bit()?;
            bits = (bits << 1) | (bit as u32);
            count -= 1;
        }
        Ok(bits)
    }

    /// Drops the remaining bits of the current byte. If that byte was `0xFF`
    /// the stuffed byte after it is consumed as well.
    pub fn align(&mut self) {
        if self.bit_buffer == 0xFF && self.pos < self.data.len() {
            self.pos += 1;
        }
        self.bit_buffer = 0;
        self.bits_left = 0;
    }

    /// Byte position of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Packet header bit writer, used to build fixtures.
#[cfg(test)]
pub struct J2kBitWriter {
    data: Vec<u8>,
    bit_buffer: u8,
    bits_count: u8,
    last_was_ff: bool,
}

#[cfg(test)]
impl J2kBitWriter {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            bit_buffer: 0,
            bits_count: 0,
            last_was_ff: false,
        }
    }

    fn capacity(&self) -> u8 {
        if self.last_was_ff { 7 } else { 8 }
    }

    pub fn write_bit(&mut self, bit: u8) {
        self.bit_buffer = (self.bit_buffer << 1) | (bit & 1);
        self.bits_count += 1;
        if self.bits_count == self.capacity() {
            self.flush_byte();
        }
    }

    pub fn write_bits(&mut self, value: u32, count: u32) {
        for i in (0..count).rev() {
            self.write_bit(((value >> i) & 1) as u8);
        }
    }

    fn flush_byte(&mut self) {
        let b = self.bit_buffer;
        self.data.push(b);
        self.last_was_ff = b == 0xFF;
        self.bit_buffer = 0;
        self.bits_count = 0;
    }

    /// Pads the last byte with zeros. A trailing `0xFF` gets a stuffed `0x00`.
    pub fn finish(mut self) -> Vec<u8> {
        if self.bits_count > 0 {
            self.bit_buffer <<= self.capacity() - self.bits_count;
            self.flush_byte();
        }
        if self.last_was_ff {
            self.data.push(0x00);
        }
        self.data
    }
}
