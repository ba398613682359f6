pub mod codestream_reader;
pub mod error;
pub mod jpeg2000;
pub mod marker_code;

pub use error::J2kError;
pub use jpeg2000::decoder::{DecoderOptions, ProgressiveDecoder};
pub use jpeg2000::image::J2kHeader;
