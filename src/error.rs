use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum J2kError {
    // Codestream syntax errors
    #[error("Need more data")]
    NeedMoreData = 4,
    #[error("Invalid data")]
    InvalidData = 5,
    #[error("Marker start byte not found")]
    MarkerStartByteNotFound = 10,
    #[error("Start of codestream marker not found")]
    StartOfCodestreamMarkerNotFound = 11,
    #[error("Invalid marker segment size")]
    InvalidMarkerSegmentSize = 15,
    #[error("Duplicate image and tile size marker")]
    DuplicateImageAndTileSizeMarker = 17,
    #[error("Image and tile size marker not found")]
    ImageAndTileSizeMarkerNotFound = 18,
    #[error("Coding style default marker not found")]
    CodingStyleDefaultMarkerNotFound = 19,
    #[error("Quantization default marker not found")]
    QuantizationDefaultMarkerNotFound = 20,
    #[error("Start of tile-part marker not found")]
    StartOfTilePartMarkerNotFound = 21,
    #[error("Invalid tile index")]
    InvalidTileIndex = 22,
    #[error("Invalid tile-part length")]
    InvalidTilePartLength = 23,
    #[error("Invalid component index")]
    InvalidComponentIndex = 24,
    #[error("Invalid image geometry")]
    InvalidImageGeometry = 25,
    #[error("Invalid JP2 box")]
    InvalidJp2Box = 26,
    #[error("Quantization step size missing for a subband")]
    MissingQuantizationStep = 27,

    // Packet and entropy-coded data errors
    #[error("Packet header corrupt")]
    PacketHeaderCorrupt = 40,
    #[error("Codeblock data out of range")]
    CodeblockDataOutOfRange = 41,

    // Profile limits
    #[error("Multiple tiles not supported")]
    MultipleTilesNotSupported = 60,
    #[error("Component subsampling not supported")]
    SubsamplingNotSupported = 61,
    #[error("Bit depth not supported")]
    BitDepthNotSupported = 62,
    #[error("Component count not supported")]
    ComponentCountNotSupported = 63,
    #[error("Wavelet filter not supported")]
    WaveletFilterNotSupported = 64,
    #[error("Quantization style not supported")]
    QuantizationStyleNotSupported = 65,
    #[error("Progression order not supported")]
    ProgressionOrderNotSupported = 66,
    #[error("Precinct partition not supported")]
    PrecinctPartitionNotSupported = 67,
    #[error("Packed packet headers in main header not supported")]
    PackedMainHeadersNotSupported = 68,
    #[error("Selective arithmetic coding bypass not supported")]
    ArithmeticBypassNotSupported = 69,
    #[error("Coding style override not supported")]
    CodingStyleOverrideNotSupported = 70,
    #[error("Too many decomposition levels")]
    DecompositionLevelsNotSupported = 71,

    // Logic errors
    #[error("Resolution requested out of order")]
    ResolutionOutOfOrder = 100,
    #[error("Resolution out of range")]
    ResolutionOutOfRange = 101,
}
