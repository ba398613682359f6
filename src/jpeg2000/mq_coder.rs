//! MQ Arithmetic Decoder (ISO/IEC 15444-1 Annex C)

#[derive(Clone, Copy)]
struct MqState {
    qe: u16,
    nmps: u8,
    nlps: u8,
    switch: bool,
}

const fn st(qe: u16, nmps: u8, nlps: u8, switch: bool) -> MqState {
    MqState {
        qe,
        nmps,
        nlps,
        switch,
    }
}

// Standard Table C.2
const MQ_TABLE: [MqState; 47] = [
    st(0x5601, 1, 1, true),
    st(0x3401, 2, 6, false),
    st(0x1801, 3, 9, false),
    st(0x0AC1, 4, 12, false),
    st(0x0521, 5, 29, false),
    st(0x0221, 38, 33, false),
    st(0x5601, 7, 6, true),
    st(0x5401, 8, 14, false),
    st(0x4801, 9, 14, false),
    st(0x3801, 10, 14, false),
    st(0x3001, 11, 17, false),
    st(0x2401, 12, 18, false),
    st(0x1C01, 13, 20, false),
    st(0x1601, 29, 21, false),
    st(0x5601, 15, 14, true),
    st(0x5401, 16, 14, false),
    st(0x5101, 17, 15, false),
    st(0x4801, 18, 16, false),
    st(0x3801, 19, 17, false),
    st(0x3401, 20, 18, false),
    st(0x3001, 21, 19, false),
    st(0x2801, 22, 19, false),
    st(0x2401, 23, 20, false),
    st(0x2201, 24, 21, false),
    st(0x1C01, 25, 22, false),
    st(0x1801, 26, 23, false),
    st(0x1601, 27, 24, false),
    st(0x1401, 28, 25, false),
    st(0x1201, 29, 26, false),
    st(0x1101, 30, 27, false),
    st(0x0AC1, 31, 28, false),
    st(0x09C1, 32, 29, false),
    st(0x08A1, 33, 30, false),
    st(0x0521, 34, 31, false),
    st(0x0441, 35, 32, false),
    st(0x02A1, 36, 33, false),
    st(0x0221, 37, 34, false),
    st(0x0141, 38, 35, false),
    st(0x0111, 39, 36, false),
    st(0x0085, 40, 37, false),
    st(0x0049, 41, 38, false),
    st(0x0025, 42, 39, false),
    st(0x0015, 43, 40, false),
    st(0x0009, 44, 41, false),
    st(0x0005, 45, 42, false),
    st(0x0001, 45, 43, false),
    st(0x5601, 46, 46, false),
];

/// Number of Tier-1 contexts.
pub const NUM_CONTEXTS: usize = 19;
/// Uniform context (run-length position bits, segmentation symbol).
pub const CX_UNIFORM: usize = 0;
/// Run-length context.
pub const CX_RUN: usize = 1;
/// First of the 9 zero-coding contexts.
pub const CX_ZC: usize = 2;
/// First of the 5 sign-coding contexts.
pub const CX_SC: usize = 11;
/// First of the 3 magnitude-refinement contexts.
pub const CX_MR: usize = 16;

/// Probability state of one context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MqContext {
    pub index: u8,
    pub mps: u8,
}

const fn initial_contexts() -> [MqContext; NUM_CONTEXTS] {
    let mut ctx = [MqContext { index: 0, mps: 0 }; NUM_CONTEXTS];
    ctx[CX_UNIFORM].index = 46;
    ctx[CX_RUN].index = 3;
    ctx[CX_ZC].index = 4;
    ctx
}

/// MQ decoder over one terminated segment.
///
/// Reads past the end of the segment behave as if a marker had been found:
/// the code register is fed with 1-bits.
pub struct MqDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    a: u32,
    c: u32,
    ct: u32,
    b: u8,
    marker_found: bool,
    contexts: [MqContext; NUM_CONTEXTS],
}

impl<'a> MqDecoder<'a> {
    /// INITDEC (C.3.5) with all contexts in their initial state.
    pub fn new(data: &'a [u8]) -> Self {
        let mut dec = Self {
            data,
            pos: 0,
            a: 0x8000,
            c: 0,
            ct: 0,
            b: 0,
            marker_found: false,
            contexts: initial_contexts(),
        };
        dec.init();
        dec
    }

    /// Starts decoding a new segment, keeping the context states.
    pub fn restart(&mut self, data: &'a [u8]) {
        self.data = data;
        self.pos = 0;
        self.marker_found = false;
        self.init();
    }

    pub fn reset_contexts(&mut self) {
        self.contexts = initial_contexts();
    }

    pub fn context(&self, cx: usize) -> MqContext {
        self.contexts[cx]
    }

    fn init(&mut self) {
        self.b = self.read_byte();
        self.c = (self.b as u32) << 16;
        self.byte_in();
        self.c <<= 7;
        self.ct -= 7;
        self.a = 0x8000;
    }

    fn read_byte(&mut self) -> u8 {
        let b = self.data.get(self.pos).copied().unwrap_or(0xFF);
        self.pos += 1;
        b
    }

    // BYTEIN (C.3.4)
    fn byte_in(&mut self) {
        if self.marker_found {
            self.c += 0xFF00;
            self.ct = 8;
            return;
        }
        if self.b == 0xFF {
            self.b = self.read_byte();
            if self.b > 0x8F {
                self.marker_found = true;
                self.c += 0xFF00;
                self.ct = 8;
            } else {
                self.c += (self.b as u32) << 9;
                self.ct = 7;
            }
        } else {
            self.b = self.read_byte();
            self.c += (self.b as u32) << 8;
            self.ct = 8;
        }
    }

    // RENORMD (C.3.3)
    fn renormalize(&mut self) {
        loop {
            if self.ct == 0 {
                self.byte_in();
            }
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.a >= 0x8000 {
                break;
            }
        }
    }

    /// DECODE (C.3.2): one binary decision in context `cx`.
    pub fn decode(&mut self, cx: usize) -> u8 {
        let ctx = self.contexts[cx];
        let state = MQ_TABLE[ctx.index as usize];
        let qe = state.qe as u32;

        self.a -= qe;
        let d;
        if (self.c >> 16) < qe {
            // LPS_EXCHANGE
            if self.a < qe {
                d = ctx.mps;
                self.contexts[cx].index = state.nmps;
            } else {
                d = 1 - ctx.mps;
                if state.switch {
                    self.contexts[cx].mps = 1 - ctx.mps;
                }
                self.contexts[cx].index = state.nlps;
            }
            self.a = qe;
            self.renormalize();
        } else {
            self.c -= qe << 16;
            if self.a & 0x8000 == 0 {
                // MPS_EXCHANGE
                if self.a < qe {
                    d = 1 - ctx.mps;
                    if state.switch {
                        self.contexts[cx].mps = 1 - ctx.mps;
                    }
                    self.contexts[cx].index = state.nlps;
                } else {
                    d = ctx.mps;
                    self.contexts[cx].index = state.nmps;
                }
                self.renormalize();
            } else {
                d = ctx.mps;
            }
        }
        d
    }

    /// Checks the predictable termination of the segment (D.4.2). Returns
    /// `false` when the decoder state shows the segment was corrupted.
    pub fn check_predictable_termination(&mut self) -> bool {
        if self.b != 0xFF && !self.marker_found {
            return false;
        }
        if self.ct != 0 && !self.marker_found {
            return false;
        }
        if self.ct == 1 {
            return true;
        }
        if self.ct == 0 {
            if !self.marker_found {
                self.b = self.read_byte();
                if self.b <= 0x8F {
                    return false;
                }
            }
            self.ct = 8;
        }
        let k = self.ct - 1;
        let q = 0x8000u32 >> k;
        self.a -= q;
        // The spare bits must decode as an LPS.
        (self.c >> 16) < q
    }
}

/// MQ encoder (C.2), used to build coded fixtures.
#[cfg(test)]
pub struct MqEncoder {
    a: u32,
    c: u32,
    ct: u32,
    out: Vec<u8>,
    contexts: [MqContext; NUM_CONTEXTS],
}

#[cfg(test)]
impl MqEncoder {
    pub fn new() -> Self {
        Self {
            a: 0x8000,
            c: 0,
            ct: 12,
            out: vec![0],
            contexts: initial_contexts(),
        }
    }

    pub fn reset_contexts(&mut self) {
        self.contexts = initial_contexts();
    }

    pub fn encode(&mut self, d: u8, cx: usize) {
        let ctx = self.contexts[cx];
        let state = MQ_TABLE[ctx.index as usize];
        let qe = state.qe as u32;
        self.a -= qe;
        if d == ctx.mps {
            if self.a & 0x8000 == 0 {
                if self.a < qe {
                    self.a = qe;
                } else {
                    self.c += qe;
                }
                self.contexts[cx].index = state.nmps;
                self.renormalize();
            } else {
                self.c += qe;
            }
        } else {
            if self.a < qe {
                self.c += qe;
            } else {
                self.a = qe;
            }
            if state.switch {
                self.contexts[cx].mps = 1 - ctx.mps;
            }
            self.contexts[cx].index = state.nlps;
            self.renormalize();
        }
    }

    fn renormalize(&mut self) {
        loop {
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.ct == 0 {
                self.byte_out();
            }
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    fn byte_out(&mut self) {
        let last = self.out.len() - 1;
        if self.out[last] == 0xFF {
            self.out.push((self.c >> 20) as u8);
            self.c &= 0xFFFFF;
            self.ct = 7;
        } else if self.c < 0x800_0000 {
            self.out.push((self.c >> 19) as u8);
            self.c &= 0x7FFFF;
            self.ct = 8;
        } else {
            self.out[last] += 1;
            if self.out[last] == 0xFF {
                self.c &= 0x7FF_FFFF;
                self.out.push((self.c >> 20) as u8);
                self.c &= 0xFFFFF;
                self.ct = 7;
            } else {
                self.out.push((self.c >> 19) as u8);
                self.c &= 0x7FFFF;
                self.ct = 8;
            }
        }
    }

    /// FLUSH (C.2.9) and return the terminated segment.
    pub fn finish(mut self) -> Vec<u8> {
        self.terminate()
    }

    /// Terminates the current segment and starts a new one with the same
    /// context states.
    pub fn terminate(&mut self) -> Vec<u8> {
        let temp = self.c + self.a;
        self.c |= 0xFFFF;
        if self.c >= temp {
            self.c -= 0x8000;
        }
        self.c <<= self.ct;
        self.byte_out();
        self.c <<= self.ct;
        self.byte_out();
        self.restart()
    }

    /// Predictable termination (D.4.2): flushes only the bits needed to
    /// identify the interval, so the decoder can verify the segment end.
    pub fn terminate_predictable(&mut self) -> Vec<u8> {
        let mut k = 12 - self.ct as i32;
        while k > 0 {
            self.c <<= self.ct;
            self.ct = 0;
            self.byte_out();
            k -= self.ct as i32;
        }
        self.restart()
    }

    fn restart(&mut self) -> Vec<u8> {
        if self.out.last() == Some(&0xFF) {
            self.out.pop();
        }
        let mut segment = std::mem::replace(&mut self.out, vec![0]);
        segment.remove(0);
        self.a = 0x8000;
        self.c = 0;
        self.ct = 12;
        segment
    }
}
