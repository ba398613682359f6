//! Dyadic subband decomposition tree and code-block partitioning.
//!
//! The tree is built once per codestream from tile 0's bounds and shared
//! read-only by every resolution and channel. The root is the full-resolution
//! node; each split produces LL (one resolution lower), HL, LH and HH children.

use crate::jpeg2000::image::J2kCod;

/// Orientation of a wavelet subband.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubbandOrientation {
    #[default]
    /// Low-Low (base image)
    LL = 0,
    /// High-Low (horizontal details)
    HL = 1,
    /// Low-High (vertical details)
    LH = 2,
    /// High-High (diagonal details)
    HH = 3,
}

impl SubbandOrientation {
    /// Index of the band inside its resolution's quantization entries.
    pub fn band_index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubbandNode {
    pub orientation: SubbandOrientation,
    /// Resolution level this band's packets belong to.
    pub resolution: usize,
    /// Upper-left corner in the band's own coordinate grid.
    pub ulcx: u32,
    pub ulcy: u32,
    /// Upper-left corner inside the resolution buffer.
    pub ulx: u32,
    pub uly: u32,
    pub w: u32,
    pub h: u32,
    /// Nominal code-block size.
    pub nom_cb_w: u32,
    pub nom_cb_h: u32,
    /// LL, HL, LH, HH; `None` for leaves.
    pub children: Option<Box<[SubbandNode; 4]>>,
}

impl SubbandNode {
    /// Builds the decomposition tree for the tile spanning `[x0, x1) x [y0, y1)`.
    pub fn build_tree(x0: u32, y0: u32, x1: u32, y1: u32, cod: &J2kCod) -> Self {
        let levels = cod.decomposition_levels as usize;
        let mut root = SubbandNode {
            orientation: SubbandOrientation::LL,
            resolution: levels,
            ulcx: x0,
            ulcy: y0,
            ulx: 0,
            uly: 0,
            w: x1 - x0,
            h: y1 - y0,
            ..Default::default()
        };
        root.set_nominal_codeblock(cod);
        root.split_recursive(cod);
        root
    }

    fn set_nominal_codeblock(&mut self, cod: &J2kCod) {
        let (xcb, ycb) = cod.codeblock_exponents(self.resolution);
        self.nom_cb_w = 1 << xcb;
        self.nom_cb_h = 1 << ycb;
    }

    fn split_recursive(&mut self, cod: &J2kCod) {
        if self.resolution == 0 {
            return;
        }
        let r = self.resolution;

        let ll_ulcx = (self.ulcx + 1) >> 1;
        let ll_ulcy = (self.ulcy + 1) >> 1;
        let ll_w = ((self.ulcx + self.w + 1) >> 1) - ll_ulcx;
        let ll_h = ((self.ulcy + self.h + 1) >> 1) - ll_ulcy;
        let h_ulcx = self.ulcx >> 1;
        let h_ulcy = self.ulcy >> 1;
        let h_w = ((self.ulcx + self.w) >> 1) - h_ulcx;
        let h_h = ((self.ulcy + self.h) >> 1) - h_ulcy;

        let band = |orientation, resolution, ulcx, ulcy, ulx, uly, w, h| {
            let mut node = SubbandNode {
                orientation,
                resolution,
                ulcx,
                ulcy,
                ulx,
                uly,
                w,
                h,
                ..Default::default()
            };
            node.set_nominal_codeblock(cod);
            node
        };

        let mut ll = band(
            SubbandOrientation::LL,
            r - 1,
            ll_ulcx,
            ll_ulcy,
            self.ulx,
            self.uly,
            ll_w,
            ll_h,
        );
        ll.split_recursive(cod);
        let hl = band(
            SubbandOrientation::HL,
            r,
            h_ulcx,
            ll_ulcy,
            self.ulx + ll_w,
            self.uly,
            h_w,
            ll_h,
        );
        let lh = band(
            SubbandOrientation::LH,
            r,
            ll_ulcx,
            h_ulcy,
            self.ulx,
            self.uly + ll_h,
            ll_w,
            h_h,
        );
        let hh = band(
            SubbandOrientation::HH,
            r,
            h_ulcx,
            h_ulcy,
            self.ulx + ll_w,
            self.uly + ll_h,
            h_w,
            h_h,
        );
        self.children = Some(Box::new([ll, hl, lh, hh]));
    }

    pub fn ll(&self) -> Option<&SubbandNode> {
        self.children.as_deref().map(|c| &c[0])
    }

    /// The LL-path node whose reconstruction yields resolution `r`.
    pub fn resolution_node(&self, r: usize) -> Option<&SubbandNode> {
        let mut node = self;
        while node.resolution > r {
            node = node.ll()?;
        }
        (node.resolution == r).then_some(node)
    }

    /// Subbands carried by the packets of resolution `r`: the LL leaf for
    /// resolution 0, otherwise HL, LH and HH.
    pub fn packet_subbands(&self, r: usize) -> Vec<&SubbandNode> {
        let Some(node) = self.resolution_node(r) else {
            return Vec::new();
        };
        match node.children.as_deref() {
            Some(children) if r > 0 => children[1..].iter().collect(),
            _ => vec![node],
        }
    }

    pub fn codeblock_grid(&self) -> CodeBlockGrid {
        let (first_col, cols) = grid_span(self.ulcx, self.w, self.nom_cb_w);
        let (first_row, rows) = grid_span(self.ulcy, self.h, self.nom_cb_h);
        CodeBlockGrid {
            first_col,
            first_row,
            cols,
            rows,
        }
    }

    /// Position and size of code-block (`row`, `col`) inside the resolution buffer.
    pub fn codeblock_rect(&self, grid: &CodeBlockGrid, row: u32, col: u32) -> BlockRect {
        let (x, w) = block_span(
            self.ulcx,
            self.ulx,
            self.w,
            self.nom_cb_w,
            grid.first_col,
            col,
            grid.cols,
        );
        let (y, h) = block_span(
            self.ulcy,
            self.uly,
            self.h,
            self.nom_cb_h,
            grid.first_row,
            row,
            grid.rows,
        );
        BlockRect { x, y, w, h }
    }
}

/// First code-block index and number of code-blocks covering `[ulc, ulc + size)`.
fn grid_span(ulc: u32, size: u32, nominal: u32) -> (u32, u32) {
    let first = ulc / nominal;
    if size == 0 {
        return (first, 0);
    }
    (first, (ulc + size).div_ceil(nominal) - first)
}

fn block_span(
    ulc: u32,
    ul: u32,
    size: u32,
    nominal: u32,
    first: u32,
    idx: u32,
    count: u32,
) -> (u32, u32) {
    let start = if idx == 0 {
        ul
    } else {
        (first + idx) * nominal - ulc + ul
    };
    let len = if idx + 1 < count {
        (first + idx + 1) * nominal - ulc + ul - start
    } else {
        ul + size - start
    };
    (start, len)
}

/// Code-block partition of one subband.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeBlockGrid {
    pub first_col: u32,
    pub first_row: u32,
    pub cols: u32,
    pub rows: u32,
}

impl CodeBlockGrid {
    pub fn len(&self) -> usize {
        (self.cols * self.rows) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}
