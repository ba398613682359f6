//! JP2 Box structure implementation (ISO/IEC 15444-1 Annex I).
//!
//! Only used to locate the contiguous codestream box of a JP2 file.

use crate::error::J2kError;

const JP2_SIGNATURE: &[u8; 12] = b"\x00\x00\x00\x0CjP  \r\n\x87\n";

pub struct Jp2Box {
    pub box_type: [u8; 4],
    pub data_range: std::ops::Range<usize>,
}

pub struct Jp2Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Jp2Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn is_jp2(data: &[u8]) -> bool {
        data.starts_with(JP2_SIGNATURE)
    }

    /// Returns the payload of the first `jp2c` box, `None` when the input is
    /// not a JP2 file.
    pub fn find_codestream(&mut self) -> Result<Option<&'a [u8]>, J2kError> {
        if !Self::is_jp2(self.data) {
            return Ok(None);
        }
        self.position = 0;
        while let Some(b) = self.read_box()? {
            if b.box_type == *b"jp2c" {
                return Ok(Some(&self.data[b.data_range]));
            }
        }
        Err(J2kError::InvalidJp2Box)
    }

    pub fn read_box(&mut self) -> Result<Option<Jp2Box>, J2kError> {
        let remaining = &self.data[self.position..];
        if remaining.len() < 8 {
            return Ok(None);
        }

        let start_pos = self.position;
        let mut length =
            u32::from_be_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]) as u64;
        let box_type = [remaining[4], remaining[5], remaining[6], remaining[7]];
        let mut header_size = 8;

        if length == 1 {
            let extended = remaining.get(8..16).ok_or(J2kError::InvalidJp2Box)?;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(extended);
            length = u64::from_be_bytes(bytes);
            header_size += 8;
        } else if length == 0 {
            length = remaining.len() as u64;
        }

        if length < header_size as u64 || length > remaining.len() as u64 {
            return Err(J2kError::InvalidJp2Box);
        }
        let data_start = start_pos + header_size;
        let data_end = start_pos + length as usize;
        self.position = data_end;

        Ok(Some(Jp2Box {
            box_type,
            data_range: data_start..data_end,
        }))
    }
}
