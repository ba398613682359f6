//! Progressive JPEG 2000 decoder.
//!
//! `ProgressiveDecoder` reconstructs a single-tile codestream one resolution
//! at a time. Each call to [`ProgressiveDecoder::decode_resolution`] parses
//! the packets of the next resolution, decodes its code-blocks, and runs one
//! level of wavelet synthesis on top of the previously decoded pixels, which
//! are kept in a single-slot cache.

use super::bit_plane_decoder::{BitPlaneDecoder, BlockOutcome, CodeBlockParams, CodedSegment};
use super::color::{pixels_to_planes, planes_to_pixels};
use super::dwt::Dwt53;
use super::image::J2kHeader;
use super::jp2::Jp2Reader;
use super::packet::{
    CodeBlockRecord, PacketCursor, PacketSource, ResolutionPackets, read_resolution,
};
use super::parser::{J2kCodestream, J2kParser};
use super::quantization::{dequantize, magnitude_shift};
use super::subband::{BlockRect, CodeBlockGrid, SubbandNode};
use crate::error::J2kError;
use log::{debug, trace};

/// Decoding options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Decode at most this many quality layers. `None` decodes all of them.
    pub max_quality_layers: Option<u16>,
}

pub struct ProgressiveDecoder {
    header: J2kHeader,
    tile_data: Vec<u8>,
    packed_headers: Option<Vec<u8>>,
    tree: SubbandNode,
    depths: Vec<u8>,
    /// Quality layers whose contributions are decoded.
    layers: u16,
    cursor: PacketCursor,
    cached: Option<usize>,
    pixels: Vec<u8>,
    concealed: u32,
    // Scratch reused across resolutions.
    packets: ResolutionPackets,
    planes: Vec<Vec<i32>>,
    block_decoder: BitPlaneDecoder,
    segment_buffer: Vec<u8>,
    dwt_buffer: Vec<i32>,
}

impl ProgressiveDecoder {
    /// Parses the headers of a raw codestream or of a JP2 file wrapping one.
    pub fn new(data: &[u8], options: DecoderOptions) -> Result<Self, J2kError> {
        let codestream = Jp2Reader::new(data).find_codestream()?.unwrap_or(data);
        let J2kCodestream {
            header,
            tile_data,
            packed_headers,
        } = J2kParser::new(codestream).parse_codestream()?;

        let (x0, y0, x1, y1) = header.tile_bounds();
        let tree = SubbandNode::build_tree(x0, y0, x1, y1, &header.cod);
        let total_layers = header.cod.number_of_layers;
        let layers = options
            .max_quality_layers
            .map_or(total_layers, |l| l.min(total_layers));
        let depths = header.components.iter().map(|c| c.depth).collect();
        debug!(
            "progressive decoder: {}x{} tile, {} resolution(s), decoding {layers} of {total_layers} layer(s)",
            x1 - x0,
            y1 - y0,
            header.cod.decomposition_levels as usize + 1
        );

        Ok(Self {
            header,
            tile_data,
            packed_headers,
            tree,
            depths,
            layers,
            cursor: PacketCursor::default(),
            cached: None,
            pixels: Vec::new(),
            concealed: 0,
            packets: ResolutionPackets::default(),
            planes: Vec::new(),
            block_decoder: BitPlaneDecoder::new(),
            segment_buffer: Vec::new(),
            dwt_buffer: Vec::new(),
        })
    }

    pub fn resolution_count(&self) -> usize {
        self.header.cod.decomposition_levels as usize + 1
    }

    /// Width of resolution `r`, 0 when `r` does not exist.
    pub fn width(&self, r: usize) -> u32 {
        self.tree.resolution_node(r).map_or(0, |n| n.w)
    }

    /// Height of resolution `r`, 0 when `r` does not exist.
    pub fn height(&self, r: usize) -> u32 {
        self.tree.resolution_node(r).map_or(0, |n| n.h)
    }

    pub fn num_channels(&self) -> usize {
        self.header.component_count()
    }

    pub fn header(&self) -> &J2kHeader {
        &self.header
    }

    /// Resolution currently held in the cache.
    pub fn cached_resolution(&self) -> Option<usize> {
        self.cached
    }

    /// Pixels of the cached resolution.
    pub fn cached_pixels(&self) -> Option<&[u8]> {
        self.cached.map(|_| self.pixels.as_slice())
    }

    /// Code-blocks whose corrupted data was concealed so far.
    pub fn concealed_codeblocks(&self) -> u32 {
        self.concealed
    }

    /// Decodes resolution `r`, which must directly follow the cached one
    /// (or be 0 on a fresh decoder), and returns its interleaved 8-bit
    /// pixels. On error the cache and the packet cursors are left as they
    /// were.
    pub fn decode_resolution(&mut self, r: usize) -> Result<&[u8], J2kError> {
        if r >= self.resolution_count() {
            return Err(J2kError::ResolutionOutOfRange);
        }
        let expected = self.cached.map_or(0, |c| c + 1);
        if r != expected {
            return Err(J2kError::ResolutionOutOfOrder);
        }

        let node = self
            .tree
            .resolution_node(r)
            .ok_or(J2kError::ResolutionOutOfRange)?;
        let (w, h) = (node.w as usize, node.h as usize);
        let bands = self.tree.packet_subbands(r);
        let grids: Vec<CodeBlockGrid> = bands.iter().map(|b| b.codeblock_grid()).collect();
        let channels = self.header.component_count();

        let source = PacketSource::new(
            &self.tile_data,
            self.packed_headers.as_deref(),
            &self.header.cod,
        );
        let cursor = read_resolution(
            &source,
            self.cursor,
            &grids,
            channels,
            self.header.cod.number_of_layers,
            &mut self.packets,
        )?;
        debug!(
            "resolution {r}: {w}x{h}, {} packet(s), body {}..{}",
            cursor.packets_read - self.cursor.packets_read,
            self.cursor.body,
            cursor.body
        );

        let use_rct = self.header.uses_color_transform();
        let planes = &mut self.planes;
        planes.resize_with(channels, Vec::new);
        for plane in planes.iter_mut() {
            plane.clear();
            plane.resize(w * h, 0);
        }
        if r > 0 {
            // The LL quadrant is the previous resolution.
            let ll = node.ll().ok_or(J2kError::ResolutionOutOfRange)?;
            pixels_to_planes(
                &self.pixels,
                ll.w as usize,
                ll.h as usize,
                &self.depths,
                use_rct,
                planes,
                w,
            );
        }

        let style = self.header.cod.codeblock_style;
        let mut concealed = 0;
        for (c, precincts) in self.packets.channels.iter().enumerate() {
            let quantization = self.header.quantization(c);
            for (band, precinct) in bands.iter().zip(precincts) {
                let magnitude_bits = quantization
                    .magnitude_bits(r, band.orientation.band_index())
                    .ok_or(J2kError::MissingQuantizationStep)?;
                let shift = magnitude_shift(magnitude_bits).ok_or(J2kError::InvalidData)?;

                for row in 0..precinct.grid.rows {
                    for col in 0..precinct.grid.cols {
                        let rect = band.codeblock_rect(&precinct.grid, row, col);
                        let params = CodeBlockParams {
                            width: rect.w as usize,
                            height: rect.h as usize,
                            orientation: band.orientation,
                            style,
                            zero_bitplanes: precinct.block(row, col).zero_bitplanes,
                        };
                        let outcome = decode_codeblock(
                            &mut self.block_decoder,
                            &mut self.segment_buffer,
                            &self.tile_data,
                            precinct.block(row, col),
                            &params,
                            self.layers,
                            style.terminate_all(),
                        );
                        if outcome == BlockOutcome::Concealed {
                            concealed += 1;
                        }
                        store_codeblock(&self.block_decoder, &rect, shift, &mut planes[c], w);
                    }
                }
            }
        }

        if r > 0 {
            for plane in planes.iter_mut() {
                Dwt53::inverse_2d(plane, w, w, h, node.ulcx, node.ulcy, &mut self.dwt_buffer);
            }
        }

        let mut pixels = Vec::new();
        planes_to_pixels(planes, w, w, h, &self.depths, use_rct, &mut pixels);

        self.pixels = pixels;
        self.cursor = cursor;
        self.cached = Some(r);
        self.concealed += concealed;
        Ok(self.pixels.as_slice())
    }
}

/// Runs Tier-1 on the chunks of `record` from the first `layers` layers.
fn decode_codeblock(
    decoder: &mut BitPlaneDecoder,
    scratch: &mut Vec<u8>,
    body: &[u8],
    record: &CodeBlockRecord,
    params: &CodeBlockParams,
    layers: u16,
    terminate_all: bool,
) -> BlockOutcome {
    let chunk_data = |offset: usize, len: usize| &body[offset..offset + len];
    if terminate_all {
        let segments = record.chunks_below(layers).map(|c| CodedSegment {
            data: chunk_data(c.offset, c.len),
            passes: c.passes,
        });
        trace!(
            "code-block {}x{}: {} terminated segment(s)",
            params.width,
            params.height,
            segments.clone().count()
        );
        return decoder.decode_segments(params, segments);
    }

    scratch.clear();
    let mut passes = 0;
    for chunk in record.chunks_below(layers) {
        scratch.extend_from_slice(chunk_data(chunk.offset, chunk.len));
        passes += chunk.passes;
    }
    trace!(
        "code-block {}x{}: {passes} pass(es), {} byte(s)",
        params.width,
        params.height,
        scratch.len()
    );
    decoder.decode(
        params,
        &[CodedSegment {
            data: scratch,
            passes,
        }],
    )
}

/// Dequantizes the decoded block into its rectangle of `plane`.
fn store_codeblock(
    decoder: &BitPlaneDecoder,
    rect: &BlockRect,
    shift: u32,
    plane: &mut [i32],
    stride: usize,
) {
    for y in 0..rect.h as usize {
        let row = (rect.y as usize + y) * stride + rect.x as usize;
        for (x, out) in plane[row..row + rect.w as usize].iter_mut().enumerate() {
            *out = dequantize(decoder.value(x, y), shift);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::bit_io::J2kBitWriter;
    use crate::jpeg2000::bit_plane_decoder::encode_codeblock;
    use crate::jpeg2000::image::CodeBlockStyle;
    use crate::jpeg2000::mq_coder::{CX_SC, CX_UNIFORM, CX_ZC, MqEncoder};
    use crate::jpeg2000::packet::{BlockContribution, PrecinctWriter, write_packet_header};
    use crate::jpeg2000::subband::SubbandOrientation;
    use crate::jpeg2000::test_support::{
        CodestreamBuilder, EncodeOptions, encode_image, reference_resolution, test_pattern,
    };

    fn decode_all(data: &[u8], options: DecoderOptions) -> Vec<Vec<u8>> {
        let mut decoder = ProgressiveDecoder::new(data, options).unwrap();
        (0..decoder.resolution_count())
            .map(|r| decoder.decode_resolution(r).unwrap().to_vec())
            .collect()
    }

    fn assert_lossless(width: u32, height: u32, channels: usize, opts: &EncodeOptions) {
        let pixels = test_pattern(width, height, channels);
        let data = encode_image(&pixels, width, height, channels, opts);
        let decoded = decode_all(&data, DecoderOptions::default());
        assert_eq!(decoded.len(), opts.levels as usize + 1);
        for (r, out) in decoded.iter().enumerate() {
            assert_eq!(
                *out,
                reference_resolution(&pixels, width, height, channels, opts, r),
                "resolution {r}"
            );
        }
        assert_eq!(decoded.last().unwrap(), &pixels);
    }

    /// A 1x1 grayscale image whose only code-block holds `segments`, each a
    /// pass count with its terminated MQ data.
    fn single_block_codestream(
        zero_bitplanes: u32,
        segments: &[(u32, Vec<u8>)],
        style: u8,
    ) -> Vec<u8> {
        let grid = CodeBlockGrid {
            first_col: 0,
            first_row: 0,
            cols: 1,
            rows: 1,
        };
        let mut precincts = vec![PrecinctWriter::new(grid, &[0], &[zero_bitplanes])];
        let mut writer = J2kBitWriter::new();
        write_packet_header(
            &mut writer,
            &mut precincts,
            0,
            &[vec![Some(BlockContribution {
                passes: segments.iter().map(|(passes, _)| passes).sum(),
                lengths: segments.iter().map(|(_, data)| data.len()).collect(),
            })]],
            CodeBlockStyle(style).terminate_all(),
        );
        let mut body = writer.finish();
        for (_, data) in segments {
            body.extend_from_slice(data);
        }
        CodestreamBuilder::new(1, 1, 1, 0)
            .codeblock_style(style)
            .exponents(vec![8])
            .body(body)
            .build()
    }

    #[test]
    fn test_reference_ll_with_64x64_codeblocks() {
        let opts = EncodeOptions {
            levels: 1,
            codeblock_exp: (6, 6),
            mct: false,
            ..Default::default()
        };
        let pixels = test_pattern(64, 64, 1);
        let data = encode_image(&pixels, 64, 64, 1, &opts);
        let mut decoder = ProgressiveDecoder::new(&data, DecoderOptions::default()).unwrap();
        assert_eq!(decoder.resolution_count(), 2);
        assert_eq!((decoder.width(0), decoder.height(0)), (32, 32));
        let ll = decoder.decode_resolution(0).unwrap().to_vec();
        assert_eq!(ll, reference_resolution(&pixels, 64, 64, 1, &opts, 0));
    }

    #[test]
    fn test_grayscale_progressive() {
        let opts = EncodeOptions {
            mct: false,
            ..Default::default()
        };
        assert_lossless(9, 7, 1, &opts);
    }

    #[test]
    fn test_rgb_with_color_transform() {
        let opts = EncodeOptions {
            levels: 3,
            ..Default::default()
        };
        assert_lossless(21, 18, 3, &opts);
    }

    #[test]
    fn test_rgb_without_color_transform() {
        let opts = EncodeOptions {
            mct: false,
            ..Default::default()
        };
        assert_lossless(12, 10, 3, &opts);
    }

    #[test]
    fn test_odd_image_origin() {
        let opts = EncodeOptions {
            origin: (3, 5),
            ..Default::default()
        };
        assert_lossless(11, 9, 3, &opts);
    }

    #[test]
    fn test_codeblock_styles_and_layers() {
        let all_terminated = CodeBlockStyle::TERMINATE_ALL | CodeBlockStyle::RESET_CONTEXTS;
        let causal = CodeBlockStyle::VERTICALLY_CAUSAL | CodeBlockStyle::SEGMENTATION_SYMBOLS;
        for style in [all_terminated, causal] {
            let opts = EncodeOptions {
                style,
                layers: 3,
                codeblock_exp: (2, 3),
                ..Default::default()
            };
            assert_lossless(13, 11, 3, &opts);
        }
    }

    #[test]
    fn test_sop_eph_and_packed_headers() {
        for ppt in [false, true] {
            let opts = EncodeOptions {
                sop: true,
                eph: true,
                ppt,
                layers: 2,
                ..Default::default()
            };
            assert_lossless(10, 10, 1, &opts);
        }
    }

    #[test]
    fn test_quality_layer_limit() {
        let opts = EncodeOptions {
            style: CodeBlockStyle::TERMINATE_ALL,
            layers: 3,
            mct: false,
            ..Default::default()
        };
        let pixels = test_pattern(16, 16, 1);
        let data = encode_image(&pixels, 16, 16, 1, &opts);

        let all = decode_all(&data, DecoderOptions::default());
        let limited = decode_all(
            &data,
            DecoderOptions {
                max_quality_layers: Some(1),
            },
        );
        let beyond = decode_all(
            &data,
            DecoderOptions {
                max_quality_layers: Some(7),
            },
        );
        assert_eq!(all.last().unwrap(), &pixels);
        assert_eq!(beyond, all);
        assert_eq!(limited.len(), all.len());
        assert_ne!(limited.last().unwrap(), &pixels);
    }

    #[test]
    fn test_empty_packets_give_mid_gray() {
        let data = CodestreamBuilder::new(8, 8, 1, 1)
            .body(vec![0x00, 0x00])
            .build();
        let mut decoder = ProgressiveDecoder::new(&data, DecoderOptions::default()).unwrap();
        assert_eq!(decoder.decode_resolution(0).unwrap(), &[128u8; 16][..]);
        assert_eq!(decoder.decode_resolution(1).unwrap(), &[128u8; 64][..]);
    }

    #[test]
    fn test_resolution_sequencing() {
        let data = CodestreamBuilder::new(8, 8, 1, 2)
            .body(vec![0x00; 3])
            .build();
        let mut decoder = ProgressiveDecoder::new(&data, DecoderOptions::default()).unwrap();
        assert_eq!(decoder.cached_pixels(), None);
        assert_eq!(
            decoder.decode_resolution(1).err(),
            Some(J2kError::ResolutionOutOfOrder)
        );
        assert_eq!(decoder.cached_resolution(), None);

        decoder.decode_resolution(0).unwrap();
        assert_eq!(
            decoder.decode_resolution(2).err(),
            Some(J2kError::ResolutionOutOfOrder)
        );
        assert_eq!(
            decoder.decode_resolution(0).err(),
            Some(J2kError::ResolutionOutOfOrder)
        );
        assert_eq!(
            decoder.decode_resolution(3).err(),
            Some(J2kError::ResolutionOutOfRange)
        );
        assert_eq!(decoder.cached_resolution(), Some(0));
        assert_eq!(decoder.cached_pixels().map(<[u8]>::len), Some(4));

        decoder.decode_resolution(1).unwrap();
        decoder.decode_resolution(2).unwrap();
        assert_eq!(decoder.cached_resolution(), Some(2));
    }

    #[test]
    fn test_corrupt_packet_header_keeps_cache() {
        // Resolution 0 is an empty packet; resolution 1 includes its HL block
        // and then runs out of header bits.
        let data = CodestreamBuilder::new(8, 8, 1, 1)
            .body(vec![0x00, 0xC0])
            .build();
        let mut decoder = ProgressiveDecoder::new(&data, DecoderOptions::default()).unwrap();
        decoder.decode_resolution(0).unwrap();
        assert_eq!(
            decoder.decode_resolution(1).err(),
            Some(J2kError::PacketHeaderCorrupt)
        );
        assert_eq!(decoder.cached_resolution(), Some(0));
        assert_eq!(decoder.cached_pixels(), Some(&[128u8; 16][..]));
        // Retrying hits the same bytes again.
        assert_eq!(
            decoder.decode_resolution(1).err(),
            Some(J2kError::PacketHeaderCorrupt)
        );
    }

    #[test]
    fn test_single_coefficient_block() {
        let pixels = [133u8];
        let opts = EncodeOptions {
            levels: 0,
            mct: false,
            ..Default::default()
        };
        let data = encode_image(&pixels, 1, 1, 1, &opts);
        assert_eq!(decode_all(&data, DecoderOptions::default()), vec![vec![133]]);
    }

    #[test]
    fn test_segmentation_symbol_corruption_is_concealed() {
        // One cleanup pass at bit plane 24 making the coefficient significant,
        // followed by a segmentation symbol.
        let segment = |symbol: [u8; 4]| {
            let mut mq = MqEncoder::new();
            mq.encode(1, CX_ZC);
            mq.encode(0, CX_SC);
            for bit in symbol {
                mq.encode(bit, CX_UNIFORM);
            }
            mq.finish()
        };
        let style = CodeBlockStyle::SEGMENTATION_SYMBOLS;

        let valid = single_block_codestream(6, &[(1, segment([1, 0, 1, 0]))], style);
        let mut decoder = ProgressiveDecoder::new(&valid, DecoderOptions::default()).unwrap();
        // 4 plus the mid-point of the next plane, level shifted.
        assert_eq!(decoder.decode_resolution(0).unwrap(), &[134]);
        assert_eq!(decoder.concealed_codeblocks(), 0);

        let corrupt = single_block_codestream(6, &[(1, segment([1, 0, 1, 1]))], style);
        let mut decoder = ProgressiveDecoder::new(&corrupt, DecoderOptions::default()).unwrap();
        assert_eq!(decoder.decode_resolution(0).unwrap(), &[128]);
        assert_eq!(decoder.concealed_codeblocks(), 1);
    }

    #[test]
    fn test_predictable_termination_conceals_corruption() {
        let style = CodeBlockStyle::TERMINATE_ALL | CodeBlockStyle::PREDICTABLE_TERMINATION;
        let encoded = encode_codeblock(
            &[109],
            1,
            1,
            SubbandOrientation::LL,
            CodeBlockStyle(style),
            9,
        );
        assert_eq!(encoded.zero_bitplanes, 2);
        assert_eq!(encoded.segments.len(), 19);

        let valid = single_block_codestream(encoded.zero_bitplanes, &encoded.segments, style);
        let mut decoder = ProgressiveDecoder::new(&valid, DecoderOptions::default()).unwrap();
        assert_eq!(decoder.decode_resolution(0).unwrap(), &[237]);
        assert_eq!(decoder.concealed_codeblocks(), 0);

        // First refinement pass (plane 27) no longer ends where predicted:
        // bits below 27 are dropped and the plane is set to its mid-point.
        let mut segments = encoded.segments.clone();
        segments[2].1[0] ^= 0x80;
        let corrupt = single_block_codestream(encoded.zero_bitplanes, &segments, style);
        let mut decoder = ProgressiveDecoder::new(&corrupt, DecoderOptions::default()).unwrap();
        assert_eq!(decoder.decode_resolution(0).unwrap(), &[224]);
        assert_eq!(decoder.concealed_codeblocks(), 1);
    }

    #[test]
    fn test_jp2_wrapped_codestream() {
        let codestream = CodestreamBuilder::new(4, 4, 3, 0)
            .mct(true)
            .body(vec![0x00; 3])
            .build();
        let mut file = b"\x00\x00\x00\x0CjP  \r\n\x87\n".to_vec();
        file.extend(20u32.to_be_bytes());
        file.extend(b"ftypjp2 \0\0\0\0jp2 ");
        file.extend((codestream.len() as u32 + 8).to_be_bytes());
        file.extend(b"jp2c");
        file.extend(&codestream);

        let mut decoder = ProgressiveDecoder::new(&file, DecoderOptions::default()).unwrap();
        assert_eq!(decoder.num_channels(), 3);
        assert_eq!(decoder.decode_resolution(0).unwrap(), &[128u8; 48][..]);
    }
}
