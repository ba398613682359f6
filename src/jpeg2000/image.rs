//! Codestream header data model (SIZ, COD, QCD/QCC).

use num_enum::TryFromPrimitive;

/// Parsed main and tile-part header of a single-tile codestream.
#[derive(Debug, Clone, Default)]
pub struct J2kHeader {
    /// Xsiz: right edge of the image area on the reference grid.
    pub width: u32,
    /// Ysiz: bottom edge of the image area on the reference grid.
    pub height: u32,
    /// Horizontal offset of the image area on the reference grid.
    pub x_origin: u32,
    /// Vertical offset of the image area on the reference grid.
    pub y_origin: u32,
    /// Width of an individual tile.
    pub tile_width: u32,
    /// Height of an individual tile.
    pub tile_height: u32,
    /// Horizontal offset of the first tile on the reference grid.
    pub tile_x_origin: u32,
    /// Vertical offset of the first tile on the reference grid.
    pub tile_y_origin: u32,
    /// Component information (depth, signedness, subsampling) from SIZ marker.
    pub components: Vec<J2kComponentInfo>,
    /// Coding style default.
    pub cod: J2kCod,
    /// Quantization default from the main header.
    pub qcd: J2kQuantization,
    /// Per-component quantization from the main header.
    pub qcc: Vec<Option<J2kQuantization>>,
    /// Quantization default from the tile-part headers.
    pub tile_qcd: Option<J2kQuantization>,
    /// Per-component quantization from the tile-part headers.
    pub tile_qcc: Vec<Option<J2kQuantization>>,
}

impl J2kHeader {
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Number of tiles declared by SIZ.
    pub fn tile_count(&self) -> u32 {
        if self.tile_width == 0 || self.tile_height == 0 {
            return 0;
        }
        let across = self.width.saturating_sub(self.tile_x_origin).div_ceil(self.tile_width);
        let down = self.height.saturating_sub(self.tile_y_origin).div_ceil(self.tile_height);
        across.saturating_mul(down)
    }

    /// Bounds of tile 0 on the reference grid as `(x0, y0, x1, y1)`.
    pub fn tile_bounds(&self) -> (u32, u32, u32, u32) {
        let x0 = self.tile_x_origin.max(self.x_origin);
        let y0 = self.tile_y_origin.max(self.y_origin);
        let x1 = (self.tile_x_origin.saturating_add(self.tile_width)).min(self.width);
        let y1 = (self.tile_y_origin.saturating_add(self.tile_height)).min(self.height);
        (x0, y0, x1, y1)
    }

    /// Quantization in effect for `component`: tile QCC, tile QCD, main QCC,
    /// then main QCD.
    pub fn quantization(&self, component: usize) -> &J2kQuantization {
        if let Some(Some(q)) = self.tile_qcc.get(component) {
            return q;
        }
        if let Some(q) = &self.tile_qcd {
            return q;
        }
        if let Some(Some(q)) = self.qcc.get(component) {
            return q;
        }
        &self.qcd
    }

    /// Whether the reversible color transform applies to channels 0..3.
    pub fn uses_color_transform(&self) -> bool {
        self.cod.mct == 1 && self.components.len() == 3
    }
}

/// Metadata for a single component from the SIZ marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct J2kComponentInfo {
    /// bit depth (e.g. 8, 12, 16)
    pub depth: u8,
    /// true if signed, false if unsigned
    pub is_signed: bool,
    /// Horizontal subsampling factor
    pub dx: u8,
    /// Vertical subsampling factor
    pub dy: u8,
}

/// Packet progression order (Table A.16).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum ProgressionOrder {
    #[default]
    LayerResolutionComponentPosition = 0,
    ResolutionLayerComponentPosition = 1,
    ResolutionPositionComponentLayer = 2,
    PositionComponentResolutionLayer = 3,
    ComponentPositionResolutionLayer = 4,
}

/// Code-block style flags (SPcod, Table A.19).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeBlockStyle(pub u8);

impl CodeBlockStyle {
    pub const BYPASS: u8 = 0x01;
    pub const RESET_CONTEXTS: u8 = 0x02;
    pub const TERMINATE_ALL: u8 = 0x04;
    pub const VERTICALLY_CAUSAL: u8 = 0x08;
    pub const PREDICTABLE_TERMINATION: u8 = 0x10;
    pub const SEGMENTATION_SYMBOLS: u8 = 0x20;

    pub fn bypass(self) -> bool {
        self.0 & Self::BYPASS != 0
    }

    pub fn reset_contexts(self) -> bool {
        self.0 & Self::RESET_CONTEXTS != 0
    }

    pub fn terminate_all(self) -> bool {
        self.0 & Self::TERMINATE_ALL != 0
    }

    pub fn vertically_causal(self) -> bool {
        self.0 & Self::VERTICALLY_CAUSAL != 0
    }

    pub fn predictable_termination(self) -> bool {
        self.0 & Self::PREDICTABLE_TERMINATION != 0
    }

    pub fn segmentation_symbols(self) -> bool {
        self.0 & Self::SEGMENTATION_SYMBOLS != 0
    }
}

/// Coding Style Default (COD) marker information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct J2kCod {
    pub coding_style: u8,
    pub progression_order: ProgressionOrder,
    pub number_of_layers: u16,
    pub mct: u8,
    pub decomposition_levels: u8,
    /// Code-block width exponent (xcb, already including the +2 offset).
    pub codeblock_width_exp: u8,
    /// Code-block height exponent (ycb, already including the +2 offset).
    pub codeblock_height_exp: u8,
    pub codeblock_style: CodeBlockStyle,
    /// 0 = 9-7 irreversible, 1 = 5-3 reversible.
    pub transformation: u8,
    /// Precinct sizes if defined (Scod bit 0 set).
    /// One byte per resolution level (PPx + PPy<<4).
    pub precinct_sizes: Vec<u8>,
}

impl J2kCod {
    pub fn has_precinct_sizes(&self) -> bool {
        self.coding_style & 0x01 != 0
    }

    pub fn uses_sop(&self) -> bool {
        self.coding_style & 0x02 != 0
    }

    pub fn uses_eph(&self) -> bool {
        self.coding_style & 0x04 != 0
    }

    /// (PPx, PPy) for `resolution`; 15 when no partition is signalled.
    pub fn precinct_exponents(&self, resolution: usize) -> (u8, u8) {
        match self.precinct_sizes.get(resolution) {
            Some(&b) if self.has_precinct_sizes() => (b & 0x0F, b >> 4),
            _ => (15, 15),
        }
    }

    /// Nominal code-block exponents at `resolution`, clipped to the precinct.
    pub fn codeblock_exponents(&self, resolution: usize) -> (u8, u8) {
        let (ppx, ppy) = self.precinct_exponents(resolution);
        let reduce = u8::from(resolution > 0);
        (
            self.codeblock_width_exp.min(ppx.saturating_sub(reduce)),
            self.codeblock_height_exp.min(ppy.saturating_sub(reduce)),
        )
    }
}

/// Quantization (QCD/QCC) marker information for the no-quantization style.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct J2kQuantization {
    pub quant_style: u8,
    pub guard_bits: u8,
    /// One exponent per subband: LL of resolution 0, then HL, LH, HH of each
    /// higher resolution.
    pub exponents: Vec<u8>,
}

impl J2kQuantization {
    /// Exponent of subband `band` (0 = LL, 1 = HL, 2 = LH, 3 = HH) at `resolution`.
    pub fn exponent(&self, resolution: usize, band: usize) -> Option<u8> {
        let idx = if resolution == 0 {
            0
        } else {
            1 + 3 * (resolution - 1) + band.checked_sub(1)?
        };
        self.exponents.get(idx).copied()
    }

    /// Magnitude bit count `Mb = G + exp - 1`.
    pub fn magnitude_bits(&self, resolution: usize, band: usize) -> Option<u8> {
        let exp = self.exponent(resolution, band)?;
        (self.guard_bits + exp).checked_sub(1)
    }
}
