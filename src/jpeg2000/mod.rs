//! JPEG 2000 Part 1 (ISO/IEC 15444-1) progressive decoding.
//!
//! - `parser`: codestream syntax (SIZ, COD/COC, QCD/QCC, SOT, PPT).
//! - `jp2`: JP2 box probing for a wrapped codestream.
//! - `packet` / `tag_tree` / `bit_io`: packet header decoding (Tier-2).
//! - `mq_coder` / `bit_plane_decoder`: code-block decoding (Tier-1).
//! - `quantization`, `dwt`, `color`: sample reconstruction.
//! - `decoder`: the resolution-by-resolution façade.

pub mod bit_io;
pub mod bit_plane_decoder;
pub mod color;
pub mod decoder;
pub mod dwt;
pub mod image;
pub mod jp2;
pub mod mq_coder;
pub mod packet;
pub mod parser;
pub mod quantization;
pub mod subband;
pub mod tag_tree;

#[cfg(test)]
pub mod test_support;
