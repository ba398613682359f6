//! JPEG 2000 Codestream Parser.
//!
//! Handles the Main Header (SOC, SIZ, COD, COC, QCD, QCC) and the Tile-Part
//! Headers (SOT, COD, QCD, QCC, PPT, SOD) of single-tile codestreams, and
//! gathers the tile body and packed packet headers.

use super::image::{
    J2kCod, J2kComponentInfo, J2kHeader, J2kQuantization, ProgressionOrder, CodeBlockStyle,
};
use crate::codestream_reader::CodestreamReader;
use crate::error::J2kError;
use crate::marker_code::J2kMarkerCode;
use log::{debug, warn};

const MAX_DECOMPOSITION_LEVELS: u8 = 32;
const MAX_COMPONENTS: usize = 3;
const MAX_BIT_DEPTH: u8 = 8;

/// A parsed codestream: header plus the data of tile 0.
#[derive(Debug, Clone, Default)]
pub struct J2kCodestream {
    pub header: J2kHeader,
    /// Bodies of all tile-parts of tile 0, concatenated in order.
    pub tile_data: Vec<u8>,
    /// Concatenated PPT payloads when packet headers are packed.
    pub packed_headers: Option<Vec<u8>>,
}

/// A parser that transforms raw J2K marker segments into structured metadata.
pub struct J2kParser<'a> {
    reader: CodestreamReader<'a>,
    header: J2kHeader,
    main_cod: Option<J2kCod>,
    main_qcd: Option<J2kQuantization>,
    coc_overrides: Vec<J2kCod>,
}

impl<'a> J2kParser<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self {
            reader: CodestreamReader::new(source),
            header: J2kHeader::default(),
            main_cod: None,
            main_qcd: None,
            coc_overrides: Vec::new(),
        }
    }

    /// Parses the entire codestream (Main Header + all tile-parts).
    pub fn parse_codestream(mut self) -> Result<J2kCodestream, J2kError> {
        self.parse_main_header()?;
        self.validate_profile()?;

        let mut tile_data = Vec::new();
        let mut packed: Option<Vec<u8>> = None;
        loop {
            self.parse_tile_part(&mut tile_data, &mut packed)?;
            match self.reader.peek_marker_byte() {
                Some(0x90) => {
                    self.reader.read_marker_byte()?;
                }
                Some(0xD9) | None => break,
                Some(other) => {
                    warn!("unexpected marker 0xFF{other:02X} after tile-part, stopping");
                    break;
                }
            }
        }

        debug!(
            "tile body {} bytes, packed headers {:?} bytes",
            tile_data.len(),
            packed.as_ref().map(Vec::len)
        );
        Ok(J2kCodestream {
            header: self.header,
            tile_data,
            packed_headers: packed,
        })
    }

    /// Reads the main header up to and including the first SOT marker code.
    pub fn parse_main_header(&mut self) -> Result<(), J2kError> {
        let soc = self
            .reader
            .read_marker_byte()
            .map_err(|_| J2kError::StartOfCodestreamMarkerNotFound)?;
        if soc != u8::from(J2kMarkerCode::StartOfCodestream) {
            return Err(J2kError::StartOfCodestreamMarkerNotFound);
        }

        let mut have_siz = false;
        loop {
            let code = self.reader.read_marker_byte()?;
            match J2kMarkerCode::try_from(code) {
                Ok(J2kMarkerCode::ImageAndTileSize) => {
                    if have_siz {
                        return Err(J2kError::DuplicateImageAndTileSizeMarker);
                    }
                    self.parse_siz()?;
                    have_siz = true;
                }
                Ok(J2kMarkerCode::CodingStyleDefault) => {
                    self.main_cod = Some(self.parse_cod()?);
                }
                Ok(J2kMarkerCode::CodingStyleComponent) => {
                    let coc = self.parse_coc()?;
                    self.coc_overrides.push(coc);
                }
                Ok(J2kMarkerCode::QuantizationDefault) => {
                    self.main_qcd = Some(self.parse_quantization()?);
                }
                Ok(J2kMarkerCode::QuantizationComponent) => {
                    let (c, q) = self.parse_qcc()?;
                    self.header.qcc[c] = Some(q);
                }
                Ok(J2kMarkerCode::PackedPacketHeadersMain) => {
                    return Err(J2kError::PackedMainHeadersNotSupported);
                }
                Ok(J2kMarkerCode::StartOfTilePart) => break,
                Ok(J2kMarkerCode::EndOfCodestream) => {
                    return Err(J2kError::StartOfTilePartMarkerNotFound);
                }
                _ => {
                    debug!("skipping main header segment 0xFF{code:02X}");
                    self.reader.skip_segment()?;
                }
            }
        }

        if !have_siz {
            return Err(J2kError::ImageAndTileSizeMarkerNotFound);
        }
        self.header.cod = self
            .main_cod
            .clone()
            .ok_or(J2kError::CodingStyleDefaultMarkerNotFound)?;
        self.header.qcd = self
            .main_qcd
            .clone()
            .ok_or(J2kError::QuantizationDefaultMarkerNotFound)?;
        Ok(())
    }

    pub fn parse_siz(&mut self) -> Result<(), J2kError> {
        let len = self.reader.read_segment_length()?;
        if len < 36 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let _caps = self.reader.read_u16()?; // Rsiz
        self.header.width = self.reader.read_u32()?;
        self.header.height = self.reader.read_u32()?;
        self.header.x_origin = self.reader.read_u32()?;
        self.header.y_origin = self.reader.read_u32()?;
        self.header.tile_width = self.reader.read_u32()?;
        self.header.tile_height = self.reader.read_u32()?;
        self.header.tile_x_origin = self.reader.read_u32()?;
        self.header.tile_y_origin = self.reader.read_u32()?;

        let comps = self.reader.read_u16()? as usize;
        if len != 36 + 3 * comps {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        self.header.components.clear();
        for _ in 0..comps {
            let depth_byte = self.reader.read_u8()?;
            let sub_x = self.reader.read_u8()?;
            let sub_y = self.reader.read_u8()?;
            self.header.components.push(J2kComponentInfo {
                depth: (depth_byte & 0x7F) + 1,
                is_signed: (depth_byte & 0x80) != 0,
                dx: sub_x,
                dy: sub_y,
            });
        }
        self.header.qcc = vec![None; comps];
        self.header.tile_qcc = vec![None; comps];

        let h = &self.header;
        if h.width <= h.x_origin
            || h.height <= h.y_origin
            || h.tile_width == 0
            || h.tile_height == 0
            || h.tile_x_origin > h.x_origin
            || h.tile_y_origin > h.y_origin
            || h.tile_x_origin.saturating_add(h.tile_width) <= h.x_origin
            || h.tile_y_origin.saturating_add(h.tile_height) <= h.y_origin
        {
            return Err(J2kError::InvalidImageGeometry);
        }
        debug!(
            "SIZ {}x{} origin ({}, {}), tile {}x{}, {} component(s)",
            h.width, h.height, h.x_origin, h.y_origin, h.tile_width, h.tile_height, comps
        );
        Ok(())
    }

    pub fn parse_cod(&mut self) -> Result<J2kCod, J2kError> {
        let len = self.reader.read_segment_length()?;
        if len < 10 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let end = self.reader.position() + len;
        let scod = self.reader.read_u8()?; // coding style flags
        let sprog = self.reader.read_u8()?; // progression order
        let nlayers = self.reader.read_u16()?; // number of layers
        let mct = self.reader.read_u8()?; // multi-component transform flag
        let (decomposition_levels, xcb, ycb, style, transformation, precinct_sizes) =
            self.parse_coding_parameters(scod & 0x01 != 0, end)?;
        self.reader.seek(end)?;

        let progression_order = ProgressionOrder::try_from(sprog)
            .map_err(|_| J2kError::ProgressionOrderNotSupported)?;
        if nlayers == 0 {
            return Err(J2kError::InvalidData);
        }

        let cod = J2kCod {
            coding_style: scod,
            progression_order,
            number_of_layers: nlayers,
            mct,
            decomposition_levels,
            codeblock_width_exp: xcb,
            codeblock_height_exp: ycb,
            codeblock_style: CodeBlockStyle(style),
            transformation,
            precinct_sizes,
        };
        debug!(
            "COD levels={} layers={} cblk={}x{} style={:#04x} mct={} order={:?}",
            cod.decomposition_levels,
            cod.number_of_layers,
            1u32 << cod.codeblock_width_exp,
            1u32 << cod.codeblock_height_exp,
            style,
            cod.mct,
            cod.progression_order
        );
        Ok(cod)
    }

    /// SPcod / SPcoc: levels, code-block size and style, filter, precincts.
    /// Code-block exponents are returned with the +2 offset applied.
    #[allow(clippy::type_complexity)]
    fn parse_coding_parameters(
        &mut self,
        has_precincts: bool,
        end: usize,
    ) -> Result<(u8, u8, u8, u8, u8, Vec<u8>), J2kError> {
        let levels = self.reader.read_u8()?;
        let xcb = self.reader.read_u8()? + 2;
        let ycb = self.reader.read_u8()? + 2;
        let style = self.reader.read_u8()?;
        let transformation = self.reader.read_u8()?;
        if xcb > 10 || ycb > 10 || xcb + ycb > 12 {
            return Err(J2kError::InvalidData);
        }
        if levels > MAX_DECOMPOSITION_LEVELS {
            return Err(J2kError::DecompositionLevelsNotSupported);
        }
        let mut precinct_sizes = Vec::new();
        if has_precincts {
            if self.reader.position() + levels as usize + 1 > end {
                return Err(J2kError::InvalidMarkerSegmentSize);
            }
            for _ in 0..=levels {
                precinct_sizes.push(self.reader.read_u8()?);
            }
        }
        Ok((levels, xcb, ycb, style, transformation, precinct_sizes))
    }

    /// COC is accepted only when it repeats the default coding style.
    pub fn parse_coc(&mut self) -> Result<J2kCod, J2kError> {
        let len = self.reader.read_segment_length()?;
        let end = self.reader.position() + len;
        let component = if self.header.components.len() < 257 {
            self.reader.read_u8()? as usize
        } else {
            self.reader.read_u16()? as usize
        };
        if component >= self.header.components.len() {
            return Err(J2kError::InvalidComponentIndex);
        }
        let scoc = self.reader.read_u8()?;
        let (decomposition_levels, xcb, ycb, style, transformation, precinct_sizes) =
            self.parse_coding_parameters(scoc & 0x01 != 0, end)?;
        self.reader.seek(end)?;
        Ok(J2kCod {
            coding_style: scoc & 0x01,
            decomposition_levels,
            codeblock_width_exp: xcb,
            codeblock_height_exp: ycb,
            codeblock_style: CodeBlockStyle(style),
            transformation,
            precinct_sizes,
            ..Default::default()
        })
    }

    /// QCD body (also the tail of QCC).
    fn parse_quantization_body(&mut self, len: usize) -> Result<J2kQuantization, J2kError> {
        if len < 1 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let sqcd = self.reader.read_u8()?;
        if sqcd & 0x1F != 0 {
            return Err(J2kError::QuantizationStyleNotSupported);
        }
        let exponents = self
            .reader
            .read_bytes(len - 1)?
            .iter()
            .map(|b| b >> 3)
            .collect();
        Ok(J2kQuantization {
            quant_style: sqcd,
            guard_bits: sqcd >> 5,
            exponents,
        })
    }

    pub fn parse_quantization(&mut self) -> Result<J2kQuantization, J2kError> {
        let len = self.reader.read_segment_length()?;
        self.parse_quantization_body(len)
    }

    pub fn parse_qcc(&mut self) -> Result<(usize, J2kQuantization), J2kError> {
        let len = self.reader.read_segment_length()?;
        let (component, index_len) = if self.header.components.len() < 257 {
            (self.reader.read_u8()? as usize, 1)
        } else {
            (self.reader.read_u16()? as usize, 2)
        };
        if component >= self.header.components.len() || len < index_len {
            return Err(J2kError::InvalidComponentIndex);
        }
        let q = self.parse_quantization_body(len - index_len)?;
        Ok((component, q))
    }

    fn validate_profile(&self) -> Result<(), J2kError> {
        let h = &self.header;
        if h.tile_count() != 1 {
            return Err(J2kError::MultipleTilesNotSupported);
        }
        if h.components.is_empty() || h.components.len() > MAX_COMPONENTS {
            return Err(J2kError::ComponentCountNotSupported);
        }
        for c in &h.components {
            if c.dx != 1 || c.dy != 1 {
                return Err(J2kError::SubsamplingNotSupported);
            }
            if c.is_signed || c.depth > MAX_BIT_DEPTH {
                return Err(J2kError::BitDepthNotSupported);
            }
        }

        let cod = &h.cod;
        if cod.transformation != 1 {
            return Err(J2kError::WaveletFilterNotSupported);
        }
        // A single layer makes LRCP emit packets in RLCP order.
        let rlcp_order = match cod.progression_order {
            ProgressionOrder::ResolutionLayerComponentPosition => true,
            ProgressionOrder::LayerResolutionComponentPosition => cod.number_of_layers == 1,
            _ => false,
        };
        if !rlcp_order {
            return Err(J2kError::ProgressionOrderNotSupported);
        }
        if cod.codeblock_style.bypass() {
            return Err(J2kError::ArithmeticBypassNotSupported);
        }
        for coc in &self.coc_overrides {
            if coc.decomposition_levels != cod.decomposition_levels
                || coc.codeblock_width_exp != cod.codeblock_width_exp
                || coc.codeblock_height_exp != cod.codeblock_height_exp
                || coc.codeblock_style != cod.codeblock_style
                || coc.transformation != cod.transformation
                || coc.precinct_sizes != cod.precinct_sizes
            {
                return Err(J2kError::CodingStyleOverrideNotSupported);
            }
        }

        let (x0, y0, x1, y1) = h.tile_bounds();
        let levels = cod.decomposition_levels as u32;
        for r in 0..=levels {
            let scale = levels - r;
            let (ppx, ppy) = cod.precinct_exponents(r as usize);
            if precinct_count(x0, x1, scale, ppx) > 1 || precinct_count(y0, y1, scale, ppy) > 1 {
                return Err(J2kError::PrecinctPartitionNotSupported);
            }
        }

        let bands = 3 * levels as usize + 1;
        let all_quant = std::iter::once(&h.qcd).chain(h.qcc.iter().flatten());
        for q in all_quant {
            if q.exponents.len() < bands {
                return Err(J2kError::MissingQuantizationStep);
            }
        }
        Ok(())
    }

    /// Parses one tile-part whose SOT marker code has just been read.
    fn parse_tile_part(
        &mut self,
        tile_data: &mut Vec<u8>,
        packed: &mut Option<Vec<u8>>,
    ) -> Result<(), J2kError> {
        let sot_start = self.reader.position() - 2;
        let lsot = self.reader.read_u16()?;
        if lsot != 10 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let isot = self.reader.read_u16()?;
        let psot = self.reader.read_u32()?;
        let tpsot = self.reader.read_u8()?;
        let _tnsot = self.reader.read_u8()?;

        if u32::from(isot) >= self.header.tile_count() {
            return Err(J2kError::InvalidTileIndex);
        }
        if (psot as i32) < 0 {
            return Err(J2kError::InvalidTilePartLength);
        }
        let source_len = self.reader.source().len();
        let end = if psot == 0 {
            let data = self.reader.source();
            if data.ends_with(&[0xFF, 0xD9]) {
                source_len - 2
            } else {
                source_len
            }
        } else {
            sot_start + psot as usize
        };
        if end > source_len || end < self.reader.position() {
            return Err(J2kError::InvalidTilePartLength);
        }

        let mut ppt_segments: Vec<(u8, &[u8])> = Vec::new();
        loop {
            let code = self.reader.read_marker_byte()?;
            match J2kMarkerCode::try_from(code) {
                Ok(J2kMarkerCode::StartOfData) => break,
                Ok(J2kMarkerCode::CodingStyleDefault) => {
                    let cod = self.parse_cod()?;
                    if cod != self.header.cod {
                        return Err(J2kError::CodingStyleOverrideNotSupported);
                    }
                }
                Ok(J2kMarkerCode::CodingStyleComponent) => {
                    let coc = self.parse_coc()?;
                    self.coc_overrides.push(coc);
                    self.validate_profile()?;
                }
                Ok(J2kMarkerCode::QuantizationDefault) => {
                    let q = self.parse_quantization()?;
                    self.header.tile_qcd = Some(q);
                }
                Ok(J2kMarkerCode::QuantizationComponent) => {
                    let (c, q) = self.parse_qcc()?;
                    self.header.tile_qcc[c] = Some(q);
                }
                Ok(J2kMarkerCode::PackedPacketHeadersTilePart) => {
                    let len = self.reader.read_segment_length()?;
                    if len < 1 {
                        return Err(J2kError::InvalidMarkerSegmentSize);
                    }
                    let zppt = self.reader.read_u8()?;
                    ppt_segments.push((zppt, self.reader.read_bytes(len - 1)?));
                }
                _ => {
                    debug!("skipping tile-part header segment 0xFF{code:02X}");
                    self.reader.skip_segment()?;
                }
            }
            if self.reader.position() > end {
                return Err(J2kError::InvalidTilePartLength);
            }
        }

        let body_start = self.reader.position();
        if body_start > end {
            return Err(J2kError::InvalidTilePartLength);
        }
        tile_data.extend_from_slice(&self.reader.source()[body_start..end]);
        ppt_segments.sort_by_key(|(z, _)| *z);
        for (_, bytes) in &ppt_segments {
            packed.get_or_insert_with(Vec::new).extend_from_slice(bytes);
        }
        self.reader.seek(end)?;

        if let Some(q) = &self.header.tile_qcd {
            if q.exponents.len() < 3 * self.header.cod.decomposition_levels as usize + 1 {
                return Err(J2kError::MissingQuantizationStep);
            }
        }
        debug!(
            "tile-part {} of tile {}: {} body bytes, {} PPT segment(s)",
            tpsot,
            isot,
            end - body_start,
            ppt_segments.len()
        );
        Ok(())
    }
}

/// Number of precincts spanning `[ceil(c0 / 2^scale), ceil(c1 / 2^scale))`
/// with precinct exponent `pp`.
fn precinct_count(c0: u32, c1: u32, scale: u32, pp: u8) -> u64 {
    let div = 1u64 << scale;
    let r0 = (c0 as u64).div_ceil(div);
    let r1 = (c1 as u64).div_ceil(div);
    if r1 <= r0 {
        return 0;
    }
    let p = 1u64 << pp;
    r1.div_ceil(p) - r0 / p
}
