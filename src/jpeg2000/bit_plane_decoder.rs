//! Tier-1 bit-plane decoding of code-blocks (ISO/IEC 15444-1 Annex D).
//!
//! Coefficients are reconstructed in a sign-magnitude form: bit 31 holds the
//! sign and the magnitude is aligned so that its most significant possible
//! bit sits at bit 30. Each newly decoded bit plane also adds half of the
//! plane's weight, giving a mid-point reconstruction for truncated blocks.

use super::image::CodeBlockStyle;
use super::mq_coder::{CX_MR, CX_RUN, CX_SC, CX_UNIFORM, CX_ZC, MqDecoder};
use super::subband::SubbandOrientation;
use log::{trace, warn};

const SIGNIFICANT: u8 = 1 << 0;
const VISITED: u8 = 1 << 1;
const REFINED: u8 = 1 << 2;

// Neighbour significance bits, laid out as the zero-coding table index.
const H_L: u8 = 1 << 7;
const H_R: u8 = 1 << 6;
const V_U: u8 = 1 << 5;
const V_D: u8 = 1 << 4;
const D_UL: u8 = 1 << 3;
const D_UR: u8 = 1 << 2;
const D_DL: u8 = 1 << 1;
const D_DR: u8 = 1 << 0;

// Negative sign of the horizontal and vertical neighbours.
const LEFT_NEGATIVE: u8 = 1 << 0;
const RIGHT_NEGATIVE: u8 = 1 << 1;
const UP_NEGATIVE: u8 = 1 << 2;
const DOWN_NEGATIVE: u8 = 1 << 3;

const SEGMENTATION_SYMBOL: u8 = 0b1010;

/// First bit plane a code-block can use.
const TOP_BIT_PLANE: i32 = 30;

/// Zero-coding label for LL and LH bands, driven by horizontal neighbours.
const fn zc_label_horizontal(h: u32, v: u32, d: u32) -> u8 {
    if h == 2 {
        8
    } else if h == 1 {
        if v > 0 {
            7
        } else if d > 0 {
            6
        } else {
            5
        }
    } else if v > 0 {
        2 + v as u8
    } else if d > 1 {
        2
    } else {
        d as u8
    }
}

/// Zero-coding label for HH bands, driven by diagonal neighbours.
const fn zc_label_diagonal(hv: u32, d: u32) -> u8 {
    if d >= 3 {
        8
    } else if d == 2 {
        if hv > 0 { 7 } else { 6 }
    } else if d == 1 {
        if hv >= 2 { 5 } else { 3 + hv as u8 }
    } else if hv >= 2 {
        2
    } else {
        hv as u8
    }
}

const fn build_zc_table(orientation: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let n = i as u8;
        let h = ((n & H_L) != 0) as u32 + ((n & H_R) != 0) as u32;
        let v = ((n & V_U) != 0) as u32 + ((n & V_D) != 0) as u32;
        let d = (n & 0x0F).count_ones();
        let label = match orientation {
            1 => zc_label_horizontal(v, h, d),
            3 => zc_label_diagonal(h + v, d),
            _ => zc_label_horizontal(h, v, d),
        };
        table[i] = CX_ZC as u8 + label;
        i += 1;
    }
    table
}

static ZC_LL_LH: [u8; 256] = build_zc_table(0);
static ZC_HL: [u8; 256] = build_zc_table(1);
static ZC_HH: [u8; 256] = build_zc_table(3);

/// Zero-coding context for a coefficient with the given neighbour bits.
pub fn zero_coding_context(orientation: SubbandOrientation, neighbours: u8) -> usize {
    let table = match orientation {
        SubbandOrientation::HL => &ZC_HL,
        SubbandOrientation::HH => &ZC_HH,
        SubbandOrientation::LL | SubbandOrientation::LH => &ZC_LL_LH,
    };
    table[neighbours as usize] as usize
}

/// Sign-coding context and XOR bit (Table D.3).
pub fn sign_coding_context(neighbours: u8, signs: u8) -> (usize, u8) {
    let contribution = |sig: u8, neg: u8| -> i32 {
        if neighbours & sig == 0 {
            0
        } else if signs & neg != 0 {
            -1
        } else {
            1
        }
    };
    let h = (contribution(H_L, LEFT_NEGATIVE) + contribution(H_R, RIGHT_NEGATIVE)).clamp(-1, 1);
    let v = (contribution(V_U, UP_NEGATIVE) + contribution(V_D, DOWN_NEGATIVE)).clamp(-1, 1);
    let (offset, xor) = match (h, v) {
        (1, 1) => (4, 0),
        (1, 0) => (3, 0),
        (1, _) => (2, 0),
        (0, 1) => (1, 0),
        (0, 0) => (0, 0),
        (0, _) => (1, 1),
        (_, 1) => (2, 1),
        (_, 0) => (3, 1),
        _ => (4, 1),
    };
    (CX_SC + offset, xor)
}

#[derive(Debug, Clone, Copy, Default)]
struct Coefficient {
    /// Sign in bit 31, magnitude below.
    value: u32,
    flags: u8,
    neighbours: u8,
    signs: u8,
    /// Bit plane in which the coefficient became significant.
    plane: u8,
}

/// One terminated MQ segment and the number of coding passes it holds.
#[derive(Debug, Clone, Copy)]
pub struct CodedSegment<'a> {
    pub data: &'a [u8],
    pub passes: u32,
}

/// Static description of a code-block to decode.
#[derive(Debug, Clone, Copy)]
pub struct CodeBlockParams {
    pub width: usize,
    pub height: usize,
    pub orientation: SubbandOrientation,
    pub style: CodeBlockStyle,
    /// Number of missing most significant bit planes.
    pub zero_bitplanes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Complete,
    /// Corruption was detected; the block holds the concealed coefficients.
    Concealed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassKind {
    SignificancePropagation,
    MagnitudeRefinement,
    Cleanup,
}

/// Reusable Tier-1 decoder. The coefficient grid has a one-sample border so
/// neighbour updates never need bounds checks.
#[derive(Debug, Default)]
pub struct BitPlaneDecoder {
    width: usize,
    height: usize,
    stride: usize,
    causal: bool,
    orientation: SubbandOrientation,
    coefficients: Vec<Coefficient>,
}

impl BitPlaneDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign-magnitude value of the coefficient at (`x`, `y`).
    pub fn value(&self, x: usize, y: usize) -> u32 {
        self.coefficients[self.index(x, y)].value
    }

    fn index(&self, x: usize, y: usize) -> usize {
        (y + 1) * self.stride + x + 1
    }

    fn reset(&mut self, params: &CodeBlockParams) {
        self.width = params.width;
        self.height = params.height;
        self.stride = params.width + 2;
        self.causal = params.style.vertically_causal();
        self.orientation = params.orientation;
        let size = self.stride * (params.height + 2);
        self.coefficients.clear();
        self.coefficients.resize(size, Coefficient::default());
    }

    /// Decodes all coding passes carried by `segments`. Each segment starts
    /// a fresh MQ codeword; context states carry over between segments.
    pub fn decode(&mut self, params: &CodeBlockParams, segments: &[CodedSegment]) -> BlockOutcome {
        self.decode_segments(params, segments.iter().copied())
    }

    /// [`decode`](Self::decode) over segments gathered lazily, so callers
    /// need not collect them.
    pub fn decode_segments<'a, I>(&mut self, params: &CodeBlockParams, segments: I) -> BlockOutcome
    where
        I: Iterator<Item = CodedSegment<'a>> + Clone,
    {
        self.reset(params);
        let total_passes: u32 = segments.clone().map(|s| s.passes).sum();
        if params.width == 0 || params.height == 0 || total_passes == 0 {
            return BlockOutcome::Complete;
        }
        if params.zero_bitplanes > TOP_BIT_PLANE as u32 {
            warn!(
                "code-block claims {} missing bit planes, dropping it",
                params.zero_bitplanes
            );
            return BlockOutcome::Concealed;
        }

        let style = params.style;
        let mut bit_plane = TOP_BIT_PLANE - params.zero_bitplanes as i32;
        let mut kind = PassKind::Cleanup;
        let mut mq: Option<MqDecoder> = None;

        for segment in segments.filter(|s| s.passes > 0) {
            let decoder = match mq.take() {
                Some(mut decoder) => {
                    decoder.restart(segment.data);
                    decoder
                }
                None => MqDecoder::new(segment.data),
            };
            let decoder = mq.insert(decoder);

            for _ in 0..segment.passes {
                if bit_plane < 0 {
                    warn!("code-block has more coding passes than bit planes");
                    return BlockOutcome::Complete;
                }
                trace!("{kind:?} pass at bit plane {bit_plane}");
                let intact = match kind {
                    PassKind::SignificancePropagation => {
                        self.significance_propagation(decoder, bit_plane);
                        true
                    }
                    PassKind::MagnitudeRefinement => {
                        self.magnitude_refinement(decoder, bit_plane);
                        true
                    }
                    PassKind::Cleanup => {
                        self.cleanup(decoder, bit_plane);
                        !style.segmentation_symbols() || Self::segmentation_symbol(decoder)
                    }
                };
                if !intact {
                    self.conceal(bit_plane);
                    return BlockOutcome::Concealed;
                }
                if style.reset_contexts() {
                    decoder.reset_contexts();
                }
                kind = match kind {
                    PassKind::Cleanup => {
                        bit_plane -= 1;
                        PassKind::SignificancePropagation
                    }
                    PassKind::SignificancePropagation => PassKind::MagnitudeRefinement,
                    PassKind::MagnitudeRefinement => PassKind::Cleanup,
                };
            }

            if style.terminate_all()
                && style.predictable_termination()
                && !decoder.check_predictable_termination()
            {
                // The pass just decoded belongs to the plane before any
                // pending decrement.
                let plane = if kind == PassKind::SignificancePropagation {
                    bit_plane + 1
                } else {
                    bit_plane
                };
                self.conceal(plane);
                return BlockOutcome::Concealed;
            }
        }
        BlockOutcome::Complete
    }

    fn segmentation_symbol(mq: &mut MqDecoder) -> bool {
        let mut symbol = 0u8;
        for _ in 0..4 {
            symbol = (symbol << 1) | mq.decode(CX_UNIFORM);
        }
        symbol == SEGMENTATION_SYMBOL
    }

    /// Drops everything learned in `bit_plane`: coefficients that became
    /// significant there are zeroed, older ones keep only the bits above it
    /// plus a mid-point for the rest.
    fn conceal(&mut self, bit_plane: i32) {
        warn!("code-block corrupted at bit plane {bit_plane}, concealing");
        let keep = u32::MAX.checked_shl((bit_plane + 1) as u32).unwrap_or(0);
        for c in &mut self.coefficients {
            if c.flags & SIGNIFICANT == 0 {
                continue;
            }
            if c.plane as i32 <= bit_plane {
                c.value = 0;
            } else {
                c.value = (c.value & keep) | (1 << bit_plane);
            }
        }
    }

    fn zero_coding(&self, neighbours: u8) -> usize {
        zero_coding_context(self.orientation, neighbours)
    }

    fn decode_sign(&self, mq: &mut MqDecoder, idx: usize) -> u8 {
        let c = &self.coefficients[idx];
        let (cx, xor) = sign_coding_context(c.neighbours, c.signs);
        mq.decode(cx) ^ xor
    }

    fn set_significant(&mut self, x: usize, y: usize, bit_plane: i32, sign: u8) {
        let idx = self.index(x, y);
        let stride = self.stride;
        let c = &mut self.coefficients[idx];
        c.value = ((sign as u32) << 31) | ((3u32 << bit_plane) >> 1);
        c.flags |= SIGNIFICANT;
        c.plane = bit_plane as u8;

        let negative = sign != 0;
        let sign_bit = |bit: u8| if negative { bit } else { 0 };

        let left = &mut self.coefficients[idx - 1];
        left.neighbours |= H_R;
        left.signs |= sign_bit(RIGHT_NEGATIVE);
        let right = &mut self.coefficients[idx + 1];
        right.neighbours |= H_L;
        right.signs |= sign_bit(LEFT_NEGATIVE);

        let below = &mut self.coefficients[idx + stride];
        below.neighbours |= V_U;
        below.signs |= sign_bit(UP_NEGATIVE);
        self.coefficients[idx + stride - 1].neighbours |= D_UR;
        self.coefficients[idx + stride + 1].neighbours |= D_UL;

        // In causal mode the stripe above never sees this stripe.
        if self.causal && y % 4 == 0 {
            return;
        }
        let above = &mut self.coefficients[idx - stride];
        above.neighbours |= V_D;
        above.signs |= sign_bit(DOWN_NEGATIVE);
        self.coefficients[idx - stride - 1].neighbours |= D_DR;
        self.coefficients[idx - stride + 1].neighbours |= D_DL;
    }

    fn significance_propagation(&mut self, mq: &mut MqDecoder, bit_plane: i32) {
        for y0 in (0..self.height).step_by(4) {
            let y1 = (y0 + 4).min(self.height);
            for x in 0..self.width {
                for y in y0..y1 {
                    let idx = self.index(x, y);
                    let c = self.coefficients[idx];
                    if c.flags & SIGNIFICANT != 0 || c.neighbours == 0 {
                        continue;
                    }
                    if mq.decode(self.zero_coding(c.neighbours)) == 1 {
                        let sign = self.decode_sign(mq, idx);
                        self.set_significant(x, y, bit_plane, sign);
                    }
                    self.coefficients[idx].flags |= VISITED;
                }
            }
        }
    }

    fn magnitude_refinement(&mut self, mq: &mut MqDecoder, bit_plane: i32) {
        let keep = u32::MAX << (bit_plane + 1);
        for y0 in (0..self.height).step_by(4) {
            let y1 = (y0 + 4).min(self.height);
            for x in 0..self.width {
                for y in y0..y1 {
                    let idx = self.index(x, y);
                    let c = &mut self.coefficients[idx];
                    if c.flags & (SIGNIFICANT | VISITED) != SIGNIFICANT {
                        continue;
                    }
                    let cx = if c.flags & REFINED != 0 {
                        CX_MR + 2
                    } else if c.neighbours != 0 {
                        CX_MR + 1
                    } else {
                        CX_MR
                    };
                    let bit = mq.decode(cx) as u32;
                    c.value &= keep;
                    c.value |= (bit << bit_plane) | ((1u32 << bit_plane) >> 1);
                    c.flags |= REFINED;
                }
            }
        }
    }

    fn cleanup(&mut self, mq: &mut MqDecoder, bit_plane: i32) {
        for y0 in (0..self.height).step_by(4) {
            let y1 = (y0 + 4).min(self.height);
            for x in 0..self.width {
                let mut start = y0;
                if y1 - y0 == 4 && self.run_length_eligible(x, y0) {
                    if mq.decode(CX_RUN) == 0 {
                        continue;
                    }
                    let pos = ((mq.decode(CX_UNIFORM) << 1) | mq.decode(CX_UNIFORM)) as usize;
                    let y = y0 + pos;
                    let sign = self.decode_sign(mq, self.index(x, y));
                    self.set_significant(x, y, bit_plane, sign);
                    start = y + 1;
                }
                for y in start..y1 {
                    let idx = self.index(x, y);
                    let c = self.coefficients[idx];
                    if c.flags & (SIGNIFICANT | VISITED) == 0
                        && mq.decode(self.zero_coding(c.neighbours)) == 1
                    {
                        let sign = self.decode_sign(mq, idx);
                        self.set_significant(x, y, bit_plane, sign);
                    }
                    self.coefficients[idx].flags &= !VISITED;
                }
            }
        }
    }

    fn run_length_eligible(&self, x: usize, y0: usize) -> bool {
        (y0..y0 + 4).all(|y| {
            let c = &self.coefficients[self.index(x, y)];
            c.flags & (SIGNIFICANT | VISITED) == 0 && c.neighbours == 0
        })
    }
}

/// Coded passes of one code-block as produced by [`encode_codeblock`].
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct EncodedBlock {
    pub zero_bitplanes: u32,
    /// Terminated MQ segments with the number of passes each holds.
    pub segments: Vec<(u32, Vec<u8>)>,
}

#[cfg(test)]
impl EncodedBlock {
    pub fn total_passes(&self) -> u32 {
        self.segments.iter().map(|(passes, _)| passes).sum()
    }
}

/// Tier-1 encoder mirroring [`BitPlaneDecoder`], used to build fixtures.
/// Every bit plane down to the one holding the integer LSB is coded, so the
/// block decodes losslessly. `magnitude_bits` must cover every `|value|`.
#[cfg(test)]
pub fn encode_codeblock(
    values: &[i32],
    width: usize,
    height: usize,
    orientation: SubbandOrientation,
    style: CodeBlockStyle,
    magnitude_bits: u8,
) -> EncodedBlock {
    use super::mq_coder::MqEncoder;

    let shift = 31 - magnitude_bits as u32;
    let magnitudes: Vec<u32> = values.iter().map(|v| v.unsigned_abs() << shift).collect();
    let max = magnitudes.iter().copied().max().unwrap_or(0);
    if max == 0 {
        return EncodedBlock::default();
    }
    let top = 31 - max.leading_zeros() as i32;
    let lowest = shift as i32;

    let mut grid = BitPlaneDecoder::new();
    grid.reset(&CodeBlockParams {
        width,
        height,
        orientation,
        style,
        zero_bitplanes: 0,
    });
    let bit = |x: usize, y: usize, bp: i32| ((magnitudes[y * width + x] >> bp) & 1) as u8;
    let sign = |x: usize, y: usize| (values[y * width + x] < 0) as u8;

    let encode_sign = |grid: &BitPlaneDecoder, mq: &mut MqEncoder, x: usize, y: usize| {
        let c = &grid.coefficients[grid.index(x, y)];
        let (cx, xor) = sign_coding_context(c.neighbours, c.signs);
        mq.encode(sign(x, y) ^ xor, cx);
    };

    let mut mq = MqEncoder::new();
    let mut segments = Vec::new();
    let mut pending = 0u32;
    let mut bp = top;
    let mut kind = PassKind::Cleanup;
    let total = 1 + 3 * (top - lowest);

    for _ in 0..total {
        match kind {
            PassKind::SignificancePropagation => {
                for y0 in (0..height).step_by(4) {
                    for x in 0..width {
                        for y in y0..(y0 + 4).min(height) {
                            let idx = grid.index(x, y);
                            let c = grid.coefficients[idx];
                            if c.flags & SIGNIFICANT != 0 || c.neighbours == 0 {
                                continue;
                            }
                            let b = bit(x, y, bp);
                            mq.encode(b, grid.zero_coding(c.neighbours));
                            if b == 1 {
                                encode_sign(&grid, &mut mq, x, y);
                                grid.set_significant(x, y, bp, sign(x, y));
                            }
                            grid.coefficients[idx].flags |= VISITED;
                        }
                    }
                }
            }
            PassKind::MagnitudeRefinement => {
                for y0 in (0..height).step_by(4) {
                    for x in 0..width {
                        for y in y0..(y0 + 4).min(height) {
                            let idx = grid.index(x, y);
                            let c = &mut grid.coefficients[idx];
                            if c.flags & (SIGNIFICANT | VISITED) != SIGNIFICANT {
                                continue;
                            }
                            let cx = if c.flags & REFINED != 0 {
                                CX_MR + 2
                            } else if c.neighbours != 0 {
                                CX_MR + 1
                            } else {
                                CX_MR
                            };
                            c.flags |= REFINED;
                            mq.encode(bit(x, y, bp), cx);
                        }
                    }
                }
            }
            PassKind::Cleanup => {
                for y0 in (0..height).step_by(4) {
                    let y1 = (y0 + 4).min(height);
                    for x in 0..width {
                        let mut start = y0;
                        if y1 - y0 == 4 && grid.run_length_eligible(x, y0) {
                            match (y0..y1).position(|y| bit(x, y, bp) == 1) {
                                None => {
                                    mq.encode(0, CX_RUN);
                                    continue;
                                }
                                Some(pos) => {
                                    mq.encode(1, CX_RUN);
                                    mq.encode((pos >> 1) as u8, CX_UNIFORM);
                                    mq.encode((pos & 1) as u8, CX_UNIFORM);
                                    let y = y0 + pos;
                                    encode_sign(&grid, &mut mq, x, y);
                                    grid.set_significant(x, y, bp, sign(x, y));
                                    start = y + 1;
                                }
                            }
                        }
                        for y in start..y1 {
                            let idx = grid.index(x, y);
                            let c = grid.coefficients[idx];
                            if c.flags & (SIGNIFICANT | VISITED) == 0 {
                                let b = bit(x, y, bp);
                                mq.encode(b, grid.zero_coding(c.neighbours));
                                if b == 1 {
                                    encode_sign(&grid, &mut mq, x, y);
                                    grid.set_significant(x, y, bp, sign(x, y));
                                }
                            }
                            grid.coefficients[idx].flags &= !VISITED;
                        }
                    }
                }
                if style.segmentation_symbols() {
                    for i in (0..4).rev() {
                        mq.encode((SEGMENTATION_SYMBOL >> i) & 1, CX_UNIFORM);
                    }
                }
            }
        }
        if style.reset_contexts() {
            mq.reset_contexts();
        }
        pending += 1;
        if style.terminate_all() {
            let data = if style.predictable_termination() {
                mq.terminate_predictable()
            } else {
                mq.terminate()
            };
            segments.push((pending, data));
            pending = 0;
        }
        kind = match kind {
            PassKind::Cleanup => {
                bp -= 1;
                PassKind::SignificancePropagation
            }
            PassKind::SignificancePropagation => PassKind::MagnitudeRefinement,
            PassKind::MagnitudeRefinement => PassKind::Cleanup,
        };
    }
    if pending > 0 {
        segments.push((pending, mq.finish()));
    }

    EncodedBlock {
        zero_bitplanes: (TOP_BIT_PLANE - top) as u32,
        segments,
    }
}
