//! Reversible component transform (Annex G.2) and conversion between
//! coefficient planes and interleaved 8-bit pixels.

/// Inverse RCT: (Y, Cb, Cr) to (R, G, B), before the DC level shift.
pub fn inverse_rct(y: i32, cb: i32, cr: i32) -> (i32, i32, i32) {
    let g = y - ((cb + cr) >> 2);
    (cr + g, g, cb + g)
}

/// Forward RCT: (R, G, B) to (Y, Cb, Cr), after removing the DC level shift.
pub fn forward_rct(r: i32, g: i32, b: i32) -> (i32, i32, i32) {
    let cb = b - g;
    let cr = r - g;
    (((cb + cr) >> 2) + g, cb, cr)
}

fn level_shift(depth: u8) -> i32 {
    1 << (depth - 1)
}

fn clamp_sample(value: i32, depth: u8) -> u8 {
    value.clamp(0, (1 << depth) - 1) as u8
}

/// Converts reconstructed planes (row stride `stride`) into interleaved
/// pixels. `depths` holds one bit depth per channel.
pub fn planes_to_pixels(
    planes: &[Vec<i32>],
    stride: usize,
    width: usize,
    height: usize,
    depths: &[u8],
    use_rct: bool,
    pixels: &mut Vec<u8>,
) {
    let channels = planes.len();
    pixels.clear();
    pixels.reserve(width * height * channels);
    for y in 0..height {
        for x in 0..width {
            let i = y * stride + x;
            if use_rct {
                let (r, g, b) = inverse_rct(planes[0][i], planes[1][i], planes[2][i]);
                for (c, v) in [r, g, b].into_iter().enumerate() {
                    pixels.push(clamp_sample(v + level_shift(depths[c]), depths[c]));
                }
            } else {
                for (plane, &depth) in planes.iter().zip(depths) {
                    pixels.push(clamp_sample(plane[i] + level_shift(depth), depth));
                }
            }
        }
    }
}

/// Re-derives coefficient planes from interleaved pixels; the inverse of
/// [`planes_to_pixels`] for samples that were not clamped.
pub fn pixels_to_planes(
    pixels: &[u8],
    width: usize,
    height: usize,
    depths: &[u8],
    use_rct: bool,
    planes: &mut [Vec<i32>],
    stride: usize,
) {
    let channels = planes.len();
    for y in 0..height {
        for x in 0..width {
            let px = &pixels[(y * width + x) * channels..][..channels];
            let i = y * stride + x;
            if use_rct {
                let u = [0, 1, 2].map(|c| px[c] as i32 - level_shift(depths[c]));
                let (yy, cb, cr) = forward_rct(u[0], u[1], u[2]);
                planes[0][i] = yy;
                planes[1][i] = cb;
                planes[2][i] = cr;
            } else {
                for (c, plane) in planes.iter_mut().enumerate() {
                    plane[i] = px[c] as i32 - level_shift(depths[c]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rct_is_reversible() {
        for (r, g, b) in [(0, 0, 0), (-128, 127, 5), (100, -3, -128), (17, 17, 17)] {
            let (y, cb, cr) = forward_rct(r, g, b);
            assert_eq!(inverse_rct(y, cb, cr), (r, g, b));
        }
    }

    #[test]
    fn test_inverse_rct_values() {
        // Y=10, Cb=4, Cr=-8: G = 10 - (-4 >> 2) = 11.
        assert_eq!(inverse_rct(10, 4, -8), (3, 11, 15));
    }

    #[test]
    fn test_planes_to_pixels_level_shift_and_clamp() {
        let planes = vec![vec![0, -128, 127, 300, -500, 0]];
        let mut pixels = Vec::new();
        planes_to_pixels(&planes, 3, 2, 2, &[8], false, &mut pixels);
        assert_eq!(pixels, vec![128, 0, 255, 0]);

        let planes = vec![vec![0, 3]];
        planes_to_pixels(&planes, 2, 2, 1, &[4], false, &mut pixels);
        assert_eq!(pixels, vec![8, 11]);
    }

    #[test]
    fn test_pixels_roundtrip_with_rct() {
        let pixels: Vec<u8> = vec![10, 200, 30, 255, 0, 128, 1, 2, 3, 90, 90, 90];
        let depths = [8, 8, 8];
        let mut planes = vec![vec![0; 4]; 3];
        pixels_to_planes(&pixels, 2, 2, &depths, true, &mut planes, 2);
        let mut out = Vec::new();
        planes_to_pixels(&planes, 2, 2, 2, &depths, true, &mut out);
        assert_eq!(out, pixels);
    }

    #[test]
    fn test_pixels_to_planes_without_rct() {
        let pixels = [128u8, 0, 255, 129];
        let mut planes = vec![vec![0; 6], vec![0; 6]];
        pixels_to_planes(&pixels, 2, 1, &[8, 8], false, &mut planes, 3);
        assert_eq!(planes[0][..2], [0, 127]);
        assert_eq!(planes[1][..2], [-128, 1]);
    }
}
