use crate::error::J2kError;
use crate::marker_code::MARKER_START_BYTE;

/// Sequential big-endian reader over a JPEG 2000 codestream.
///
/// Marker segments are read with [`read_marker_byte`](Self::read_marker_byte)
/// followed by [`read_segment_length`](Self::read_segment_length); the
/// returned length excludes the two length bytes themselves.
pub struct CodestreamReader<'a> {
    source: &'a [u8],
    position: usize,
}

impl<'a> CodestreamReader<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    pub fn source(&self) -> &'a [u8] {
        self.source
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn read_u8(&mut self) -> Result<u8, J2kError> {
        if self.position >= self.source.len() {
            return Err(J2kError::NeedMoreData);
        }
        let val = self.source[self.position];
        self.position += 1;
        Ok(val)
    }

    pub fn read_u16(&mut self) -> Result<u16, J2kError> {
        let b1 = self.read_u8()? as u16;
        let b2 = self.read_u8()? as u16;
        Ok((b1 << 8) | b2)
    }

    pub fn read_u32(&mut self) -> Result<u32, J2kError> {
        let b1 = self.read_u8()? as u32;
        let b2 = self.read_u8()? as u32;
        let b3 = self.read_u8()? as u32;
        let b4 = self.read_u8()? as u32;
        Ok((b1 << 24) | (b2 << 16) | (b3 << 8) | b4)
    }

    /// Reads `count` bytes as a borrowed slice.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], J2kError> {
        let end = self
            .position
            .checked_add(count)
            .ok_or(J2kError::NeedMoreData)?;
        if end > self.source.len() {
            return Err(J2kError::NeedMoreData);
        }
        let bytes = &self.source[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Reads `FF xx` and returns `xx`.
    pub fn read_marker_byte(&mut self) -> Result<u8, J2kError> {
        if self.read_u8()? != MARKER_START_BYTE {
            return Err(J2kError::MarkerStartByteNotFound);
        }
        self.read_u8()
    }

    /// Returns the second byte of the marker at the cursor without consuming it.
    pub fn peek_marker_byte(&self) -> Option<u8> {
        match self.source.get(self.position..self.position + 2) {
            Some([MARKER_START_BYTE, code]) => Some(*code),
            _ => None,
        }
    }

    /// Reads a segment length field and returns the number of payload bytes.
    pub fn read_segment_length(&mut self) -> Result<usize, J2kError> {
        let length = self.read_u16()? as usize;
        if length < 2 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let payload = length - 2;
        if payload > self.source.len() - self.position {
            return Err(J2kError::NeedMoreData);
        }
        Ok(payload)
    }

    pub fn skip_segment(&mut self) -> Result<(), J2kError> {
        let payload = self.read_segment_length()?;
        self.position += payload;
        Ok(())
    }

    pub fn seek(&mut self, position: usize) -> Result<(), J2kError> {
        if position > self.source.len() {
            return Err(J2kError::NeedMoreData);
        }
        self.position = position;
        Ok(())
    }
}
