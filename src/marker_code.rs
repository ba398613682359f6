use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Second byte of the JPEG 2000 (ISO/IEC 15444-1, Annex A) marker codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum J2kMarkerCode {
    /// SOC: Marks the start of the codestream.
    StartOfCodestream = 0x4F,
    /// CAP: Extended capabilities (Part 15).
    Capability = 0x50,
    /// SIZ: Image and tile size.
    ImageAndTileSize = 0x51,
    /// COD: Coding style default.
    CodingStyleDefault = 0x52,
    /// COC: Coding style component.
    CodingStyleComponent = 0x53,
    /// TLM: Tile-part lengths.
    TilePartLengths = 0x55,
    /// PLM: Packet lengths, main header.
    PacketLengthsMain = 0x57,
    /// PLT: Packet lengths, tile-part header.
    PacketLengthsTilePart = 0x58,
    /// QCD: Quantization default.
    QuantizationDefault = 0x5C,
    /// QCC: Quantization component.
    QuantizationComponent = 0x5D,
    /// RGN: Region of interest.
    RegionOfInterest = 0x5E,
    /// POC: Progression order change.
    ProgressionOrderChange = 0x5F,
    /// PPM: Packed packet headers, main header.
    PackedPacketHeadersMain = 0x60,
    /// PPT: Packed packet headers, tile-part header.
    PackedPacketHeadersTilePart = 0x61,
    /// CRG: Component registration.
    ComponentRegistration = 0x63,
    /// COM: Comment.
    Comment = 0x64,
    /// SOT: Start of tile-part.
    StartOfTilePart = 0x90,
    /// SOP: Start of packet.
    StartOfPacket = 0x91,
    /// EPH: End of packet header.
    EndOfPacketHeader = 0x92,
    /// SOD: Start of data.
    StartOfData = 0x93,
    /// EOC: End of codestream.
    EndOfCodestream = 0xD9,
}

pub const MARKER_START_BYTE: u8 = 0xFF;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_from_byte() {
        assert_eq!(
            J2kMarkerCode::try_from(0x51).ok(),
            Some(J2kMarkerCode::ImageAndTileSize)
        );
        assert_eq!(
            J2kMarkerCode::try_from(0x93).ok(),
            Some(J2kMarkerCode::StartOfData)
        );
        assert!(J2kMarkerCode::try_from(0x00).is_err());
        let raw: u8 = J2kMarkerCode::PackedPacketHeadersTilePart.into();
        assert_eq!(raw, 0x61);
    }
}
