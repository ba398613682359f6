//! Reversible 5/3 Discrete Wavelet Transform for JPEG 2000 (Annex F).
//!
//! Samples live in place inside a resolution plane. Before synthesis a row
//! (or column) of length `n` holds its low-pass coefficients followed by its
//! high-pass coefficients; the parity of the first sample's coordinate on the
//! reference grid decides whether the interleaved signal starts with a low
//! (even) or a high (odd) sample. Boundaries use whole-sample symmetric
//! extension.

pub struct Dwt53;

impl Dwt53 {
    /// Inverse lifting for a signal whose first sample is even.
    /// `input` holds `ceil(n/2)` low then `floor(n/2)` high coefficients.
    pub fn synthesize_lpf(input: &[i32], output: &mut [i32]) {
        let n = output.len();
        if n == 0 {
            return;
        }
        let nl = n.div_ceil(2);
        let (low, high) = input[..n].split_at(nl);
        if n == 1 {
            output[0] = low[0];
            return;
        }

        // Even samples: x[2k] = L[k] - floor((H[k-1] + H[k] + 2) / 4)
        for (k, &l) in low.iter().enumerate() {
            let left = high[k.saturating_sub(1)];
            let right = if k < high.len() { high[k] } else { high[k - 1] };
            output[2 * k] = l - ((left + right + 2) >> 2);
        }
        // Odd samples: x[2k+1] = H[k] + floor((x[2k] + x[2k+2]) / 2)
        for (k, &h) in high.iter().enumerate() {
            let left = output[2 * k];
            let right = if 2 * k + 2 < n { output[2 * k + 2] } else { left };
            output[2 * k + 1] = h + ((left + right) >> 1);
        }
    }

    /// Inverse lifting for a signal whose first sample is odd.
    /// `input` holds `floor(n/2)` low then `ceil(n/2)` high coefficients.
    pub fn synthesize_hpf(input: &[i32], output: &mut [i32]) {
        let n = output.len();
        if n == 0 {
            return;
        }
        let nl = n / 2;
        let (low, high) = input[..n].split_at(nl);
        if n == 1 {
            output[0] = high[0] >> 1;
            return;
        }

        // Low samples at odd local positions.
        for (k, &l) in low.iter().enumerate() {
            let left = high[k];
            let right = *high.get(k + 1).unwrap_or(&left);
            output[2 * k + 1] = l - ((left + right + 2) >> 2);
        }
        // High samples at even local positions.
        for (k, &h) in high.iter().enumerate() {
            let i = 2 * k;
            let right = if i + 1 < n { output[i + 1] } else { output[i - 1] };
            let left = if i > 0 { output[i - 1] } else { right };
            output[i] = h + ((left + right) >> 1);
        }
    }

    /// Forward lifting for a signal whose first sample is even; writes low
    /// then high coefficients.
    pub fn analyze_lpf(input: &[i32], output: &mut [i32]) {
        let n = input.len();
        if n == 0 {
            return;
        }
        if n == 1 {
            output[0] = input[0];
            return;
        }
        let nl = n.div_ceil(2);
        let (low, high) = output[..n].split_at_mut(nl);

        for (k, d) in high.iter_mut().enumerate() {
            let left = input[2 * k];
            let right = if 2 * k + 2 < n { input[2 * k + 2] } else { left };
            *d = input[2 * k + 1] - ((left + right) >> 1);
        }
        for (k, s) in low.iter_mut().enumerate() {
            let left = high[k.saturating_sub(1)];
            let right = if k < high.len() { high[k] } else { high[k - 1] };
            *s = input[2 * k] + ((left + right + 2) >> 2);
        }
    }

    /// Forward lifting for a signal whose first sample is odd; writes low
    /// then high coefficients.
    pub fn analyze_hpf(input: &[i32], output: &mut [i32]) {
        let n = input.len();
        if n == 0 {
            return;
        }
        if n == 1 {
            output[0] = input[0] * 2;
            return;
        }
        let nl = n / 2;
        let (low, high) = output[..n].split_at_mut(nl);

        for (k, d) in high.iter_mut().enumerate() {
            let i = 2 * k;
            let right = if i + 1 < n { input[i + 1] } else { input[i - 1] };
            let left = if i > 0 { input[i - 1] } else { right };
            *d = input[i] - ((left + right) >> 1);
        }
        for (k, s) in low.iter_mut().enumerate() {
            let left = high[k];
            let right = *high.get(k + 1).unwrap_or(&left);
            *s = input[2 * k + 1] + ((left + right + 2) >> 2);
        }
    }

    /// Inverse 2D transform of one resolution, in place.
    ///
    /// The `w` x `h` region at the top-left of `plane` (row stride `stride`)
    /// holds the four subbands laid out as LL | HL over LH | HH. Rows are
    /// synthesized first, then columns. `buf` is scratch space.
    pub fn inverse_2d(
        plane: &mut [i32],
        stride: usize,
        w: usize,
        h: usize,
        ulcx: u32,
        ulcy: u32,
        buf: &mut Vec<i32>,
    ) {
        let len = w.max(h);
        if buf.len() < 2 * len {
            buf.resize(2 * len, 0);
        }
        let (input, output) = buf.split_at_mut(len);

        for y in 0..h {
            let row = &mut plane[y * stride..y * stride + w];
            input[..w].copy_from_slice(row);
            if ulcx % 2 == 0 {
                Self::synthesize_lpf(&input[..w], row);
            } else {
                Self::synthesize_hpf(&input[..w], row);
            }
        }

        for x in 0..w {
            for y in 0..h {
                input[y] = plane[y * stride + x];
            }
            if ulcy % 2 == 0 {
                Self::synthesize_lpf(&input[..h], &mut output[..h]);
            } else {
                Self::synthesize_hpf(&input[..h], &mut output[..h]);
            }
            for y in 0..h {
                plane[y * stride + x] = output[y];
            }
        }
    }

    /// Forward 2D transform of one resolution, in place: columns first, then
    /// rows, leaving LL | HL over LH | HH.
    pub fn forward_2d(
        plane: &mut [i32],
        stride: usize,
        w: usize,
        h: usize,
        ulcx: u32,
        ulcy: u32,
    ) {
        let len = w.max(h);
        let mut input = vec![0i32; len];
        let mut output = vec![0i32; len];

        for x in 0..w {
            for y in 0..h {
                input[y] = plane[y * stride + x];
            }
            if ulcy % 2 == 0 {
                Self::analyze_lpf(&input[..h], &mut output[..h]);
            } else {
                Self::analyze_hpf(&input[..h], &mut output[..h]);
            }
            for y in 0..h {
                plane[y * stride + x] = output[y];
            }
        }

        for y in 0..h {
            let row = &mut plane[y * stride..y * stride + w];
            if ulcx % 2 == 0 {
                Self::analyze_lpf(row, &mut output[..w]);
            } else {
                Self::analyze_hpf(row, &mut output[..w]);
            }
            row.copy_from_slice(&output[..w]);
        }
    }
}
