use crate::error::J2kError;
use crate::jpeg2000::bit_io::J2kBitReader;

/// Tag tree decoder for packet headers (ISO/IEC 15444-1, B.10.2).
///
/// Each node keeps a lower bound (`state`) on its value and the value itself
/// once it has been resolved (`i32::MAX` until then). Queries only decode as
/// many bits as needed to tell whether a leaf is below the threshold.
#[derive(Debug, Clone, Default)]
pub struct TagTree {
    levels: Vec<TagTreeLevel>,
    leaf_width: usize,
    leaf_height: usize,
}

#[derive(Debug, Clone, Default)]
struct TagTreeLevel {
    width: usize,
    values: Vec<i32>,
    states: Vec<i32>,
}

impl TagTree {
    /// Create a new TagTree for a grid of `w` x `h` leaves.
    pub fn new(w: usize, h: usize) -> Self {
        let mut tree = Self::default();
        tree.reset(w, h);
        tree
    }

    /// Forget everything decoded so far and resize to `w` x `h` leaves,
    /// keeping the node buffers.
    pub fn reset(&mut self, w: usize, h: usize) {
        self.leaf_width = w;
        self.leaf_height = h;
        let mut count = 0;
        if w > 0 && h > 0 {
            let (mut lw, mut lh) = (w, h);
            loop {
                if count == self.levels.len() {
                    self.levels.push(TagTreeLevel::default());
                }
                let level = &mut self.levels[count];
                level.width = lw;
                level.values.clear();
                level.values.resize(lw * lh, i32::MAX);
                level.states.clear();
                level.states.resize(lw * lh, 0);
                count += 1;
                if lw == 1 && lh == 1 {
                    break;
                }
                lw = lw.div_ceil(2);
                lh = lh.div_ceil(2);
            }
        }
        self.levels.truncate(count);
    }

    /// Decodes enough bits to know whether the leaf at row `m`, column `n`
    /// is below `threshold` and returns its updated value. The result is
    /// `i32::MAX` (or at least `threshold`) while the value is still unknown
    /// and not below the threshold.
    pub fn update(
        &mut self,
        reader: &mut J2kBitReader,
        m: usize,
        n: usize,
        threshold: i32,
    ) -> Result<i32, J2kError> {
        if m >= self.leaf_height || n >= self.leaf_width || threshold < 0 {
            return Err(J2kError::PacketHeaderCorrupt);
        }

        let mut k = self.levels.len() - 1;
        let mut tmin = self.levels[k].states[0];
        loop {
            let level = &mut self.levels[k];
            let idx = (m >> k) * level.width + (n >> k);
            let mut state = level.states[idx].max(tmin);
            let mut value = level.values[idx];
            while threshold > state {
                if value >= state {
                    if reader.read_bit()? == 0 {
                        state += 1;
                    } else {
                        value = state;
                        state += 1;
                    }
                } else {
                    state = threshold;
                    break;
                }
            }
            level.states[idx] = state;
            level.values[idx] = value;

            if k == 0 {
                return Ok(value);
            }
            tmin = state.min(value);
            k -= 1;
        }
    }
}

/// Tag tree encoder mirroring [`TagTree::update`], used to build fixtures.
#[cfg(test)]
pub struct TagTreeEncoder {
    levels: Vec<TagTreeLevel>,
}

#[cfg(test)]
impl TagTreeEncoder {
    /// `values` holds the leaves in row-major order.
    pub fn new(w: usize, h: usize, values: &[i32]) -> Self {
        let mut tree = TagTree::new(w, h).levels;
        tree[0].values.copy_from_slice(values);
        let mut lh = h;
        for k in 1..tree.len() {
            let child_w = tree[k - 1].width;
            let width = tree[k].width;
            let child_h = lh;
            lh = lh.div_ceil(2);
            for y in 0..child_h {
                for x in 0..child_w {
                    let v = tree[k - 1].values[y * child_w + x];
                    let p = (y / 2) * width + x / 2;
                    tree[k].values[p] = tree[k].values[p].min(v);
                }
            }
        }
        Self { levels: tree }
    }

    pub fn encode(
        &mut self,
        writer: &mut crate::jpeg2000::bit_io::J2kBitWriter,
        m: usize,
        n: usize,
        threshold: i32,
    ) {
        let mut k = self.levels.len() - 1;
        let mut tmin = self.levels[k].states[0];
        loop {
            let level = &mut self.levels[k];
            let idx = (m >> k) * level.width + (n >> k);
            let value = level.values[idx];
            let mut state = level.states[idx].max(tmin);
            while threshold > state {
                if value > state {
                    writer.write_bit(0);
                } else if value == state {
                    writer.write_bit(1);
                } else {
                    state = threshold;
                    break;
                }
                state += 1;
            }
            level.states[idx] = state;
            if k == 0 {
                return;
            }
            tmin = state.min(value);
            k -= 1;
        }
    }
}
