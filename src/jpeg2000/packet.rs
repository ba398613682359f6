//! Packet header decoding (ISO/IEC 15444-1, B.9 and B.10).
//!
//! Packets are read lazily, one resolution at a time: all layers of a
//! resolution are parsed together (RLCP order) and yield, for every channel
//! and subband, the byte ranges each code-block contributes to the tile body.
//! Inclusion and zero bit-plane tag trees live for the duration of one
//! resolution and are shared by its layers; the next resolution resets them
//! in place.

use super::bit_io::J2kBitReader;
use super::image::J2kCod;
use super::subband::CodeBlockGrid;
use super::tag_tree::TagTree;
use crate::error::J2kError;
use crate::marker_code::{J2kMarkerCode, MARKER_START_BYTE};
use log::trace;

const INITIAL_LBLOCK: u32 = 3;
const MAX_LBLOCK: u32 = 24;
const MAX_ZERO_BITPLANES: i32 = 64;
const SOP_SEGMENT_LEN: usize = 6;
const EPH_LEN: usize = 2;

/// Bytes a code-block contributes in one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeBlockChunk {
    pub layer: u16,
    pub passes: u32,
    /// Offset into the tile body.
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlockRecord {
    pub included: bool,
    pub zero_bitplanes: u32,
    pub lblock: u32,
    pub chunks: Vec<CodeBlockChunk>,
}

impl CodeBlockRecord {
    pub fn new() -> Self {
        Self {
            included: false,
            zero_bitplanes: 0,
            lblock: INITIAL_LBLOCK,
            chunks: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.included = false;
        self.zero_bitplanes = 0;
        self.lblock = INITIAL_LBLOCK;
        self.chunks.clear();
    }

    /// Chunks belonging to the first `layers` quality layers.
    pub fn chunks_below(&self, layers: u16) -> impl Iterator<Item = &CodeBlockChunk> + Clone {
        self.chunks.iter().filter(move |c| c.layer < layers)
    }
}

impl Default for CodeBlockRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Packet header state of one subband of one channel.
#[derive(Debug, Clone)]
pub struct PrecinctState {
    pub grid: CodeBlockGrid,
    inclusion_tree: TagTree,
    zero_bp_tree: TagTree,
    /// Row-major over the code-block grid.
    pub blocks: Vec<CodeBlockRecord>,
}

impl PrecinctState {
    pub fn new(grid: CodeBlockGrid) -> Self {
        let mut state = Self {
            grid,
            inclusion_tree: TagTree::default(),
            zero_bp_tree: TagTree::default(),
            blocks: Vec::new(),
        };
        state.reset(grid);
        state
    }

    /// Starts over on `grid`, reusing the trees and block records.
    pub fn reset(&mut self, grid: CodeBlockGrid) {
        let (w, h) = (grid.cols as usize, grid.rows as usize);
        self.grid = grid;
        self.inclusion_tree.reset(w, h);
        self.zero_bp_tree.reset(w, h);
        self.blocks.truncate(w * h);
        self.blocks.iter_mut().for_each(CodeBlockRecord::reset);
        self.blocks.resize_with(w * h, CodeBlockRecord::new);
    }

    pub fn block(&self, row: u32, col: u32) -> &CodeBlockRecord {
        &self.blocks[(row * self.grid.cols + col) as usize]
    }
}

/// Where packet headers and bodies are read from.
#[derive(Debug, Clone, Copy)]
pub struct PacketSource<'a> {
    pub body: &'a [u8],
    /// PPT payload; headers are in-band when absent.
    pub packed_headers: Option<&'a [u8]>,
    pub use_sop: bool,
    pub use_eph: bool,
    pub terminate_all: bool,
}

impl<'a> PacketSource<'a> {
    pub fn new(body: &'a [u8], packed_headers: Option<&'a [u8]>, cod: &J2kCod) -> Self {
        Self {
            body,
            packed_headers,
            use_sop: cod.uses_sop(),
            use_eph: cod.uses_eph(),
            terminate_all: cod.codeblock_style.terminate_all(),
        }
    }
}

/// Read positions in the header and body streams. Only meaningful between
/// resolutions; a failed parse leaves the previous cursor untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketCursor {
    pub header: usize,
    pub body: usize,
    pub packets_read: u32,
}

/// A code-block contribution whose body offset is not known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChunk {
    pub band: usize,
    pub block: usize,
    pub passes: u32,
    pub len: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketHeader {
    pub empty: bool,
    pub chunks: Vec<PendingChunk>,
}

impl PacketHeader {
    /// Reads one packet header for `layer`, updating the tag trees and
    /// code-block state of `precincts` (one per subband, in packet order).
    pub fn read(
        reader: &mut J2kBitReader,
        precincts: &mut [PrecinctState],
        layer: u16,
        terminate_all: bool,
    ) -> Result<Self, J2kError> {
        let mut header = PacketHeader {
            empty: true,
            chunks: Vec::new(),
        };
        if reader.read_bit()? == 0 {
            return Ok(header);
        }
        header.empty = false;
        let threshold = layer as i32 + 1;

        for (band, precinct) in precincts.iter_mut().enumerate() {
            let PrecinctState {
                grid,
                inclusion_tree,
                zero_bp_tree,
                blocks,
            } = precinct;
            for row in 0..grid.rows as usize {
                for col in 0..grid.cols as usize {
                    let block = row * grid.cols as usize + col;
                    let record = &mut blocks[block];

                    if !record.included {
                        if inclusion_tree.update(reader, row, col, threshold)? > layer as i32 {
                            continue;
                        }
                        record.zero_bitplanes = read_zero_bitplanes(zero_bp_tree, reader, row, col)?;
                        record.included = true;
                    } else if reader.read_bit()? == 0 {
                        continue;
                    }

                    let passes = read_pass_count(reader)?;
                    while reader.read_bit()? == 1 {
                        record.lblock += 1;
                        if record.lblock > MAX_LBLOCK {
                            return Err(J2kError::PacketHeaderCorrupt);
                        }
                    }

                    if terminate_all {
                        for _ in 0..passes {
                            let len = reader.read_bits(record.lblock)? as usize;
                            header.chunks.push(PendingChunk {
                                band,
                                block,
                                passes: 1,
                                len,
                            });
                        }
                    } else {
                        let bits = record.lblock + passes.ilog2();
                        let len = reader.read_bits(bits)? as usize;
                        header.chunks.push(PendingChunk {
                            band,
                            block,
                            passes,
                            len,
                        });
                    }
                }
            }
        }
        Ok(header)
    }
}

fn read_zero_bitplanes(
    tree: &mut TagTree,
    reader: &mut J2kBitReader,
    row: usize,
    col: usize,
) -> Result<u32, J2kError> {
    let mut threshold = 1;
    loop {
        let value = tree.update(reader, row, col, threshold)?;
        if value < threshold {
            return Ok(value as u32);
        }
        threshold += 1;
        if threshold > MAX_ZERO_BITPLANES {
            return Err(J2kError::PacketHeaderCorrupt);
        }
    }
}

/// Number of coding passes codeword (Table B.4).
fn read_pass_count(reader: &mut J2kBitReader) -> Result<u32, J2kError> {
    if reader.read_bit()? == 0 {
        return Ok(1);
    }
    if reader.read_bit()? == 0 {
        return Ok(2);
    }
    let v = reader.read_bits(2)?;
    if v < 3 {
        return Ok(3 + v);
    }
    let v = reader.read_bits(5)?;
    if v < 31 {
        return Ok(6 + v);
    }
    Ok(37 + reader.read_bits(7)?)
}

/// Skips `len` bytes at `pos` when they start with the marker `code`.
fn skip_marker(data: &[u8], pos: usize, code: J2kMarkerCode, len: usize) -> usize {
    match data.get(pos..pos + 2) {
        Some([MARKER_START_BYTE, b]) if *b == u8::from(code) => pos + len,
        _ => {
            trace!("expected {code:?} at offset {pos}");
            pos
        }
    }
}

/// Reads the packet of one channel for `layer` and assigns body offsets to
/// its contributions.
pub fn read_packet(
    source: &PacketSource,
    cursor: PacketCursor,
    precincts: &mut [PrecinctState],
    layer: u16,
) -> Result<PacketCursor, J2kError> {
    let mut body_pos = cursor.body;
    if source.use_sop {
        body_pos = skip_marker(
            source.body,
            body_pos,
            J2kMarkerCode::StartOfPacket,
            SOP_SEGMENT_LEN,
        );
    }

    let (header_data, header_start) = match source.packed_headers {
        Some(packed) => (packed, cursor.header),
        None => (source.body, body_pos),
    };
    let mut reader = J2kBitReader::with_position(header_data, header_start);
    let header = PacketHeader::read(&mut reader, precincts, layer, source.terminate_all)?;
    reader.align();
    let mut header_end = reader.position();
    if source.use_eph {
        header_end = skip_marker(
            header_data,
            header_end,
            J2kMarkerCode::EndOfPacketHeader,
            EPH_LEN,
        );
    }

    let (next_header, mut data_pos) = match source.packed_headers {
        Some(_) => (header_end, body_pos),
        None => (cursor.header, header_end),
    };
    trace!(
        "packet {} layer {layer}: {} contributions, data at {data_pos}",
        cursor.packets_read,
        header.chunks.len()
    );

    for chunk in &header.chunks {
        let end = data_pos
            .checked_add(chunk.len)
            .filter(|&end| end <= source.body.len())
            .ok_or(J2kError::CodeblockDataOutOfRange)?;
        precincts[chunk.band].blocks[chunk.block]
            .chunks
            .push(CodeBlockChunk {
                layer,
                passes: chunk.passes,
                offset: data_pos,
                len: chunk.len,
            });
        data_pos = end;
    }

    Ok(PacketCursor {
        header: next_header,
        body: data_pos,
        packets_read: cursor.packets_read + 1,
    })
}

/// Code-block records of one resolution, indexed `[channel][band]`.
/// Reused from one resolution to the next.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPackets {
    pub channels: Vec<Vec<PrecinctState>>,
}

impl ResolutionPackets {
    fn reset(&mut self, grids: &[CodeBlockGrid], channels: usize) {
        self.channels.resize_with(channels, Vec::new);
        for precincts in &mut self.channels {
            precincts.truncate(grids.len());
            for (state, &grid) in precincts.iter_mut().zip(grids) {
                state.reset(grid);
            }
            let kept = precincts.len();
            precincts.extend(grids[kept..].iter().map(|&g| PrecinctState::new(g)));
        }
    }
}

/// Parses every packet of a resolution into `packets`: layers outer,
/// channels inner. Returns the cursor positioned after the last packet.
pub fn read_resolution(
    source: &PacketSource,
    cursor: PacketCursor,
    grids: &[CodeBlockGrid],
    channels: usize,
    layers: u16,
    packets: &mut ResolutionPackets,
) -> Result<PacketCursor, J2kError> {
    packets.reset(grids, channels);
    let mut cursor = cursor;
    for layer in 0..layers {
        for precincts in &mut packets.channels {
            cursor = read_packet(source, cursor, precincts, layer)?;
        }
    }
    Ok(cursor)
}

/// What a code-block contributes to one packet, for [`write_packet_header`].
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct BlockContribution {
    pub passes: u32,
    /// One length per segment: a single one, or one per pass when every pass
    /// is terminated.
    pub lengths: Vec<usize>,
}

/// Encoder-side state of one subband, mirroring [`PrecinctState`].
#[cfg(test)]
pub struct PrecinctWriter {
    grid: CodeBlockGrid,
    inclusion: super::tag_tree::TagTreeEncoder,
    zero_bp: super::tag_tree::TagTreeEncoder,
    zero_bitplanes: Vec<u32>,
    included: Vec<bool>,
    lblock: Vec<u32>,
}

#[cfg(test)]
impl PrecinctWriter {
    /// `first_layers` holds the first layer each block contributes to (use a
    /// large value for blocks never included).
    pub fn new(grid: CodeBlockGrid, first_layers: &[i32], zero_bitplanes: &[u32]) -> Self {
        use super::tag_tree::TagTreeEncoder;
        let (w, h) = (grid.cols as usize, grid.rows as usize);
        let zbp: Vec<i32> = zero_bitplanes.iter().map(|&z| z as i32).collect();
        Self {
            grid,
            inclusion: TagTreeEncoder::new(w, h, first_layers),
            zero_bp: TagTreeEncoder::new(w, h, &zbp),
            zero_bitplanes: zero_bitplanes.to_vec(),
            included: vec![false; w * h],
            lblock: vec![INITIAL_LBLOCK; w * h],
        }
    }
}

#[cfg(test)]
fn write_pass_count(writer: &mut super::bit_io::J2kBitWriter, passes: u32) {
    match passes {
        1 => writer.write_bit(0),
        2 => writer.write_bits(0b10, 2),
        3..=5 => writer.write_bits((0b11 << 2) | (passes - 3), 4),
        6..=36 => writer.write_bits((0b1111 << 5) | (passes - 6), 9),
        _ => writer.write_bits((0x1FF << 7) | (passes - 37), 16),
    }
}

/// Writes the packet header matching [`PacketHeader::read`].
/// `contributions[band][block]` is `None` for blocks absent from this packet.
#[cfg(test)]
pub fn write_packet_header(
    writer: &mut super::bit_io::J2kBitWriter,
    precincts: &mut [PrecinctWriter],
    layer: u16,
    contributions: &[Vec<Option<BlockContribution>>],
    terminate_all: bool,
) {
    let present = |c: &Option<BlockContribution>| c.as_ref().is_some_and(|c| c.passes > 0);
    if !contributions.iter().flatten().any(present) {
        writer.write_bit(0);
        return;
    }
    writer.write_bit(1);

    for (precinct, blocks) in precincts.iter_mut().zip(contributions) {
        for block in 0..precinct.grid.len() {
            let row = block / precinct.grid.cols as usize;
            let col = block % precinct.grid.cols as usize;
            let contribution = blocks[block].as_ref().filter(|c| c.passes > 0);

            if !precinct.included[block] {
                precinct.inclusion.encode(writer, row, col, layer as i32 + 1);
                if contribution.is_none() {
                    continue;
                }
                for t in 1..=precinct.zero_bitplanes[block] as i32 + 1 {
                    precinct.zero_bp.encode(writer, row, col, t);
                }
                precinct.included[block] = true;
            } else {
                writer.write_bit(contribution.is_some() as u8);
            }
            let Some(contribution) = contribution else {
                continue;
            };

            write_pass_count(writer, contribution.passes);
            let extra = if terminate_all {
                0
            } else {
                contribution.passes.ilog2()
            };
            let needed = contribution
                .lengths
                .iter()
                .map(|&len| u32::BITS - (len as u32).leading_zeros())
                .max()
                .unwrap_or(0);
            while precinct.lblock[block] + extra < needed {
                writer.write_bit(1);
                precinct.lblock[block] += 1;
            }
            writer.write_bit(0);
            for &len in &contribution.lengths {
                writer.write_bits(len as u32, precinct.lblock[block] + extra);
            }
        }
    }
}
