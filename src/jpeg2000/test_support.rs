//! Codestream fixtures for unit tests: a marker-level builder and a small
//! lossless encoder producing RLCP codestreams the decoder must reproduce
//! exactly.

use super::bit_io::J2kBitWriter;
use super::bit_plane_decoder::{EncodedBlock, encode_codeblock};
use super::color::{pixels_to_planes, planes_to_pixels};
use super::dwt::Dwt53;
use super::image::{CodeBlockStyle, J2kCod, ProgressionOrder};
use super::packet::{BlockContribution, PrecinctWriter, write_packet_header};
use super::subband::SubbandNode;

/// Tag-tree value for code-blocks that never contribute.
const NEVER_INCLUDED: i32 = 1 << 16;
const PPT_CHUNK: usize = 60_000;

type PptSegments = Vec<(u8, Vec<u8>)>;

/// Assembles SOC, SIZ, COD, QCD, one or more tile-parts of tile 0 and EOC.
#[derive(Debug, Clone)]
pub struct CodestreamBuilder {
    width: u32,
    height: u32,
    components: u16,
    levels: u8,
    depth: u8,
    origin: (u32, u32),
    tile_size: Option<(u32, u32)>,
    coding_style: u8,
    progression: u8,
    layers: u16,
    mct: u8,
    codeblock_exp: (u8, u8),
    codeblock_style: u8,
    transformation: u8,
    guard_bits: u8,
    exponents: Option<Vec<u8>>,
    ppt: PptSegments,
    body: Vec<u8>,
    extra_parts: Vec<(PptSegments, Vec<u8>)>,
    psot: Option<u32>,
    lsot: Option<u16>,
    isot: Option<u16>,
}

impl CodestreamBuilder {
    /// An image area of `width` x `height` samples with `components` 8-bit
    /// channels, RLCP order, one layer and the 5/3 filter.
    pub fn new(width: u32, height: u32, components: u16, levels: u8) -> Self {
        Self {
            width,
            height,
            components,
            levels,
            depth: 8,
            origin: (0, 0),
            tile_size: None,
            coding_style: 0,
            progression: ProgressionOrder::ResolutionLayerComponentPosition as u8,
            layers: 1,
            mct: 0,
            codeblock_exp: (6, 6),
            codeblock_style: 0,
            transformation: 1,
            guard_bits: 2,
            exponents: None,
            ppt: Vec::new(),
            body: Vec::new(),
            extra_parts: Vec::new(),
            psot: None,
            lsot: None,
            isot: None,
        }
    }

    pub fn depth(mut self, depth: u8) -> Self {
        self.depth = depth;
        self
    }

    pub fn origin(mut self, x: u32, y: u32) -> Self {
        self.origin = (x, y);
        self
    }

    pub fn tile_size(mut self, w: u32, h: u32) -> Self {
        self.tile_size = Some((w, h));
        self
    }

    /// Scod flags (0x02 SOP, 0x04 EPH).
    pub fn coding_style(mut self, scod: u8) -> Self {
        self.coding_style = scod;
        self
    }

    pub fn progression(mut self, order: u8) -> Self {
        self.progression = order;
        self
    }

    pub fn layers(mut self, layers: u16) -> Self {
        self.layers = layers;
        self
    }

    pub fn mct(mut self, enabled: bool) -> Self {
        self.mct = u8::from(enabled);
        self
    }

    /// Code-block exponents including the +2 offset (6 means 64 samples).
    pub fn codeblock_exponents(mut self, xcb: u8, ycb: u8) -> Self {
        self.codeblock_exp = (xcb, ycb);
        self
    }

    pub fn codeblock_style(mut self, style: u8) -> Self {
        self.codeblock_style = style;
        self
    }

    pub fn transformation(mut self, transformation: u8) -> Self {
        self.transformation = transformation;
        self
    }

    pub fn guard_bits(mut self, guard_bits: u8) -> Self {
        self.guard_bits = guard_bits;
        self
    }

    /// One exponent per subband, LL first.
    pub fn exponents(mut self, exponents: Vec<u8>) -> Self {
        self.exponents = Some(exponents);
        self
    }

    /// PPT segments of the first tile-part as `(Zppt, payload)`.
    pub fn ppt(mut self, segments: PptSegments) -> Self {
        self.ppt = segments;
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn extra_tile_part(mut self, ppt: PptSegments, body: Vec<u8>) -> Self {
        self.extra_parts.push((ppt, body));
        self
    }

    /// Psot written for the first tile-part instead of its real length.
    pub fn psot_override(mut self, psot: u32) -> Self {
        self.psot = Some(psot);
        self
    }

    pub fn lsot_override(mut self, lsot: u16) -> Self {
        self.lsot = Some(lsot);
        self
    }

    pub fn isot_override(mut self, isot: u16) -> Self {
        self.isot = Some(isot);
        self
    }

    fn default_exponents(&self) -> Vec<u8> {
        let mut exps = vec![8];
        for _ in 0..self.levels {
            exps.extend([9, 9, 10]);
        }
        exps
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0xFF, 0x4F];
        let (ox, oy) = self.origin;
        let (x1, y1) = (ox + self.width, oy + self.height);
        let (tw, th) = self.tile_size.unwrap_or((x1, y1));

        out.extend([0xFF, 0x51]);
        push_u16(&mut out, 38 + 3 * self.components);
        push_u16(&mut out, 0);
        for v in [x1, y1, ox, oy, tw, th, 0, 0] {
            push_u32(&mut out, v);
        }
        push_u16(&mut out, self.components);
        for _ in 0..self.components {
            out.extend([self.depth - 1, 1, 1]);
        }

        out.extend([0xFF, 0x52]);
        push_u16(&mut out, 12);
        out.extend([self.coding_style, self.progression]);
        push_u16(&mut out, self.layers);
        out.extend([
            self.mct,
            self.levels,
            self.codeblock_exp.0 - 2,
            self.codeblock_exp.1 - 2,
            self.codeblock_style,
            self.transformation,
        ]);

        let exponents = self
            .exponents
            .clone()
            .unwrap_or_else(|| self.default_exponents());
        out.extend([0xFF, 0x5C]);
        push_u16(&mut out, 3 + exponents.len() as u16);
        out.push(self.guard_bits << 5);
        out.extend(exponents.iter().map(|e| e << 3));

        let parts = 1 + self.extra_parts.len() as u8;
        self.tile_part(&mut out, 0, parts, &self.ppt, &self.body, true);
        for (i, (ppt, body)) in self.extra_parts.iter().enumerate() {
            self.tile_part(&mut out, i as u8 + 1, parts, ppt, body, false);
        }
        out.extend([0xFF, 0xD9]);
        out
    }

    fn tile_part(
        &self,
        out: &mut Vec<u8>,
        index: u8,
        count: u8,
        ppt: &PptSegments,
        body: &[u8],
        first: bool,
    ) {
        let ppt_len: usize = ppt.iter().map(|(_, data)| 5 + data.len()).sum();
        let psot = (12 + ppt_len + 2 + body.len()) as u32;
        let overrides = |value: Option<u32>, default: u32| {
            if first { value.unwrap_or(default) } else { default }
        };

        out.extend([0xFF, 0x90]);
        push_u16(out, overrides(self.lsot.map(u32::from), 10) as u16);
        push_u16(out, overrides(self.isot.map(u32::from), 0) as u16);
        push_u32(out, overrides(self.psot, psot));
        out.extend([index, count]);
        for (z, data) in ppt {
            out.extend([0xFF, 0x61]);
            push_u16(out, 3 + data.len() as u16);
            out.push(*z);
            out.extend_from_slice(data);
        }
        out.extend([0xFF, 0x93]);
        out.extend_from_slice(body);
    }
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend(v.to_be_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend(v.to_be_bytes());
}

/// Coding choices for [`encode_image`].
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub levels: u8,
    pub layers: u16,
    /// Including the +2 offset.
    pub codeblock_exp: (u8, u8),
    pub style: u8,
    pub mct: bool,
    pub sop: bool,
    pub eph: bool,
    pub ppt: bool,
    pub origin: (u32, u32),
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            levels: 2,
            layers: 1,
            codeblock_exp: (4, 4),
            style: 0,
            mct: true,
            sop: false,
            eph: false,
            ppt: false,
            origin: (0, 0),
        }
    }
}

const GUARD_BITS: u8 = 2;
const EXPONENT: u8 = 10;

impl EncodeOptions {
    fn cod(&self) -> J2kCod {
        J2kCod {
            coding_style: (u8::from(self.sop) << 1) | (u8::from(self.eph) << 2),
            progression_order: ProgressionOrder::ResolutionLayerComponentPosition,
            number_of_layers: self.layers,
            mct: u8::from(self.mct),
            decomposition_levels: self.levels,
            codeblock_width_exp: self.codeblock_exp.0,
            codeblock_height_exp: self.codeblock_exp.1,
            codeblock_style: CodeBlockStyle(self.style),
            transformation: 1,
            precinct_sizes: Vec::new(),
        }
    }

    fn tree(&self, width: u32, height: u32) -> SubbandNode {
        let (x0, y0) = self.origin;
        SubbandNode::build_tree(x0, y0, x0 + width, y0 + height, &self.cod())
    }
}

/// Level-shifted (and color-transformed) planes after the forward wavelet
/// transform of every level above `resolution`.
fn analyze(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    opts: &EncodeOptions,
    resolution: usize,
) -> Vec<Vec<i32>> {
    let (w, h) = (width as usize, height as usize);
    let tree = opts.tree(width, height);
    let mut planes = vec![vec![0i32; w * h]; channels];
    let use_rct = opts.mct && channels == 3;
    pixels_to_planes(pixels, w, h, &vec![8; channels], use_rct, &mut planes, w);
    for plane in &mut planes {
        for r in (resolution + 1..=opts.levels as usize).rev() {
            let node = tree.resolution_node(r).expect("resolution in tree");
            Dwt53::forward_2d(plane, w, node.w as usize, node.h as usize, node.ulcx, node.ulcy);
        }
    }
    planes
}

/// Pixels a decoder must produce at `resolution` for an image encoded by
/// [`encode_image`]: the LL band of that level converted back to samples.
pub fn reference_resolution(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    opts: &EncodeOptions,
    resolution: usize,
) -> Vec<u8> {
    let tree = opts.tree(width, height);
    let node = tree.resolution_node(resolution).expect("resolution in tree");
    let planes = analyze(pixels, width, height, channels, opts, resolution);
    let mut out = Vec::new();
    planes_to_pixels(
        &planes,
        width as usize,
        node.w as usize,
        node.h as usize,
        &vec![8; channels],
        opts.mct && channels == 3,
        &mut out,
    );
    out
}

/// Splits a block's passes over the quality layers. Blocks coded as a
/// single segment go whole into one layer, chosen by `seq`.
fn split_layers(block: &EncodedBlock, layers: u16, terminate_all: bool, seq: usize) -> Vec<Vec<usize>> {
    let layers = layers as usize;
    let mut per_layer = vec![Vec::new(); layers];
    if block.segments.is_empty() {
        return per_layer;
    }
    if terminate_all {
        let n = block.segments.len();
        for (l, segments) in per_layer.iter_mut().enumerate() {
            *segments = (l * n / layers..(l + 1) * n / layers).collect();
        }
    } else {
        per_layer[seq % layers] = vec![0];
    }
    per_layer
}

/// Losslessly encodes interleaved 8-bit `pixels` into an RLCP codestream.
pub fn encode_image(
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: usize,
    opts: &EncodeOptions,
) -> Vec<u8> {
    let w = width as usize;
    let tree = opts.tree(width, height);
    let planes = analyze(pixels, width, height, channels, opts, 0);
    let style = CodeBlockStyle(opts.style);
    let terminate_all = style.terminate_all();
    let magnitude_bits = GUARD_BITS + EXPONENT - 1;

    let mut headers = Vec::new();
    let mut body = Vec::new();
    let mut sequence = 0u16;

    for r in 0..=opts.levels as usize {
        let bands = tree.packet_subbands(r);
        // blocks[c][band] = (encoded block, segment indices per layer)
        let mut blocks: Vec<Vec<Vec<(EncodedBlock, Vec<Vec<usize>>)>>> = Vec::new();
        let mut writers: Vec<Vec<PrecinctWriter>> = Vec::new();
        for plane in &planes {
            let mut channel_blocks = Vec::new();
            let mut channel_writers = Vec::new();
            let mut seq = 0;
            for band in &bands {
                let grid = band.codeblock_grid();
                let mut band_blocks = Vec::new();
                for row in 0..grid.rows {
                    for col in 0..grid.cols {
                        let rect = band.codeblock_rect(&grid, row, col);
                        let (bw, bh) = (rect.w as usize, rect.h as usize);
                        let mut values = Vec::with_capacity(bw * bh);
                        for y in 0..bh {
                            let start = (rect.y as usize + y) * w + rect.x as usize;
                            values.extend_from_slice(&plane[start..start + bw]);
                        }
                        let encoded =
                            encode_codeblock(&values, bw, bh, band.orientation, style, magnitude_bits);
                        let layers = split_layers(&encoded, opts.layers, terminate_all, seq);
                        seq += 1;
                        band_blocks.push((encoded, layers));
                    }
                }
                let first_layers: Vec<i32> = band_blocks
                    .iter()
                    .map(|(_, layers)| {
                        layers
                            .iter()
                            .position(|s| !s.is_empty())
                            .map_or(NEVER_INCLUDED, |l| l as i32)
                    })
                    .collect();
                let zero_bitplanes: Vec<u32> =
                    band_blocks.iter().map(|(b, _)| b.zero_bitplanes).collect();
                channel_writers.push(PrecinctWriter::new(grid, &first_layers, &zero_bitplanes));
                channel_blocks.push(band_blocks);
            }
            blocks.push(channel_blocks);
            writers.push(channel_writers);
        }

        for layer in 0..opts.layers {
            for (channel_blocks, channel_writers) in blocks.iter().zip(&mut writers) {
                let mut data = Vec::new();
                let contributions: Vec<Vec<Option<BlockContribution>>> = channel_blocks
                    .iter()
                    .map(|band_blocks| {
                        band_blocks
                            .iter()
                            .map(|(encoded, layers)| {
                                let picked = &layers[layer as usize];
                                if picked.is_empty() {
                                    return None;
                                }
                                let mut contribution = BlockContribution::default();
                                for &i in picked {
                                    let (passes, bytes) = &encoded.segments[i];
                                    contribution.passes += passes;
                                    contribution.lengths.push(bytes.len());
                                    data.extend_from_slice(bytes);
                                }
                                Some(contribution)
                            })
                            .collect()
                    })
                    .collect();

                let mut writer = J2kBitWriter::new();
                write_packet_header(&mut writer, channel_writers, layer, &contributions, terminate_all);
                let mut header = writer.finish();
                if opts.eph {
                    header.extend([0xFF, 0x92]);
                }
                if opts.sop {
                    body.extend([0xFF, 0x91, 0x00, 0x04]);
                    body.extend(sequence.to_be_bytes());
                }
                sequence = sequence.wrapping_add(1);
                if opts.ppt {
                    headers.extend(header);
                } else {
                    body.extend(header);
                }
                body.extend(data);
            }
        }
    }

    let ppt: PptSegments = headers
        .chunks(PPT_CHUNK)
        .enumerate()
        .map(|(i, chunk)| (i as u8, chunk.to_vec()))
        .collect();
    CodestreamBuilder::new(width, height, channels as u16, opts.levels)
        .origin(opts.origin.0, opts.origin.1)
        .coding_style((u8::from(opts.sop) << 1) | (u8::from(opts.eph) << 2))
        .layers(opts.layers)
        .mct(opts.mct)
        .codeblock_exponents(opts.codeblock_exp.0, opts.codeblock_exp.1)
        .codeblock_style(opts.style)
        .guard_bits(GUARD_BITS)
        .exponents(vec![EXPONENT; 3 * opts.levels as usize + 1])
        .ppt(ppt)
        .body(body)
        .build()
}

/// A smooth test pattern with values well inside the 8-bit range.
pub fn test_pattern(width: u32, height: u32, channels: usize) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height) as usize * channels);
    for y in 0..height {
        for x in 0..width {
            for c in 0..channels as u32 {
                pixels.push((100 + (x * 7 + y * 5 + c * 11) % 50) as u8);
            }
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::parser::J2kParser;

    #[test]
    fn test_builder_header_roundtrip() {
        let data = CodestreamBuilder::new(10, 6, 3, 2)
            .origin(3, 1)
            .layers(4)
            .mct(true)
            .coding_style(0x06)
            .build();
        let cs = J2kParser::new(&data).parse_codestream().unwrap();
        let h = &cs.header;
        assert_eq!((h.width, h.height, h.x_origin, h.y_origin), (13, 7, 3, 1));
        assert_eq!(h.cod.number_of_layers, 4);
        assert!(h.uses_color_transform());
        assert!(h.cod.uses_sop() && h.cod.uses_eph());
        assert_eq!(h.qcd.exponents, vec![8, 9, 9, 10, 9, 9, 10]);
    }

    #[test]
    fn test_encoded_image_parses() {
        let pixels = test_pattern(9, 7, 1);
        let opts = EncodeOptions {
            ppt: true,
            ..Default::default()
        };
        let data = encode_image(&pixels, 9, 7, 1, &opts);
        let cs = J2kParser::new(&data).parse_codestream().unwrap();
        assert!(cs.packed_headers.is_some());
        assert!(!cs.tile_data.is_empty());
    }
}
