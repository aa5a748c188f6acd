//! Binary mask helpers. Masks are one byte per pixel, `0` or `1`.

use rally_cut_types::{RGB_CHANNELS, RgbFrame};

/// Marks pixels whose largest per-channel difference exceeds `threshold`.
pub fn delta_mask_into(a: &RgbFrame, b: &RgbFrame, threshold: u8, out: &mut Vec<u8>) {
    debug_assert_eq!(a.size(), b.size());
    out.clear();
    out.extend(
        a.data()
            .chunks_exact(RGB_CHANNELS)
            .zip(b.data().chunks_exact(RGB_CHANNELS))
            .map(|(pa, pb)| {
                let diff = pa[0]
                    .abs_diff(pb[0])
                    .max(pa[1].abs_diff(pb[1]))
                    .max(pa[2].abs_diff(pb[2]));
                u8::from(diff > threshold)
            }),
    );
}

pub fn and_in_place(mask: &mut [u8], other: &[u8]) {
    for (value, keep) in mask.iter_mut().zip(other) {
        *value &= *keep;
    }
}

/// Clears every pixel of `mask` that is set in `other`.
pub fn subtract_in_place(mask: &mut [u8], other: &[u8]) {
    for (value, remove) in mask.iter_mut().zip(other) {
        if *remove != 0 {
            *value = 0;
        }
    }
}

pub fn count(mask: &[u8]) -> usize {
    mask.iter().filter(|value| **value != 0).count()
}

/// 3x3 square dilation applied `iterations` times.
pub fn dilate_into(
    mask: &[u8],
    width: usize,
    height: usize,
    iterations: usize,
    out: &mut Vec<u8>,
    scratch: &mut Vec<u8>,
) {
    repeat_into(mask, width, height, iterations, out, scratch, |a, b| a | b);
}

/// 3x3 square erosion applied `iterations` times. The kernel is clipped at
/// the image border, so the border itself never erodes a blob.
pub fn erode_into(
    mask: &[u8],
    width: usize,
    height: usize,
    iterations: usize,
    out: &mut Vec<u8>,
    scratch: &mut Vec<u8>,
) {
    repeat_into(mask, width, height, iterations, out, scratch, |a, b| a & b);
}

fn repeat_into(
    mask: &[u8],
    width: usize,
    height: usize,
    iterations: usize,
    out: &mut Vec<u8>,
    scratch: &mut Vec<u8>,
    op: fn(u8, u8) -> u8,
) {
    assert_eq!(mask.len(), width * height);
    out.clear();
    out.extend_from_slice(mask);
    if width == 0 || height == 0 {
        return;
    }
    scratch.clear();
    scratch.resize(mask.len(), 0);
    for _ in 0..iterations {
        square3x3(out, width, height, scratch, op);
    }
}

/// One separable 3x3 pass over `mask` in place; `tmp` holds the horizontal result.
fn square3x3(mask: &mut [u8], width: usize, height: usize, tmp: &mut [u8], op: fn(u8, u8) -> u8) {
    debug_assert_eq!(mask.len(), width * height);
    debug_assert_eq!(tmp.len(), mask.len());
    // Horizontal pass into tmp.
    for y in 0..height {
        let row = y * width;
        if width == 1 {
            tmp[row] = mask[row];
            continue;
        }
        tmp[row] = op(mask[row], mask[row + 1]);
        for x in 1..width - 1 {
            let i = row + x;
            tmp[i] = op(op(mask[i - 1], mask[i]), mask[i + 1]);
        }
        tmp[row + width - 1] = op(mask[row + width - 2], mask[row + width - 1]);
    }
    // Vertical pass back into mask.
    for x in 0..width {
        if height == 1 {
            mask[x] = tmp[x];
            continue;
        }
        mask[x] = op(tmp[x], tmp[x + width]);
        for y in 1..height - 1 {
            let i = y * width + x;
            mask[i] = op(op(tmp[i - width], tmp[i]), tmp[i + width]);
        }
        let i = (height - 1) * width + x;
        mask[i] = op(tmp[i], tmp[i - width]);
    }
}

/// Drops set pixels that have no set 8-neighbour.
pub fn remove_isolated_into(mask: &[u8], width: usize, height: usize, out: &mut Vec<u8>) {
    assert_eq!(mask.len(), width * height);
    out.clear();
    out.resize(mask.len(), 0);
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if mask[idx] == 0 {
                continue;
            }
            let mut neighbours = false;
            'outer: for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    if (nx != x || ny != y) && mask[ny * width + nx] != 0 {
                        neighbours = true;
                        break 'outer;
                    }
                }
            }
            out[idx] = u8::from(neighbours);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_with(width: usize, height: usize, points: &[(usize, usize)]) -> Vec<u8> {
        let mut mask = vec![0; width * height];
        for &(x, y) in points {
            mask[y * width + x] = 1;
        }
        mask
    }

    #[test]
    fn dilation_grows_a_square() {
        let mask = mask_with(7, 7, &[(3, 3)]);
        let (mut out, mut scratch) = (Vec::new(), Vec::new());
        dilate_into(&mask, 7, 7, 2, &mut out, &mut scratch);
        assert_eq!(count(&out), 25);
        assert_eq!(out[7 + 1], 1);
        assert_eq!(out[0], 0);
    }

    #[test]
    fn erosion_shrinks_a_block() {
        let block: Vec<(usize, usize)> = (1..6)
            .flat_map(|y| (1..6).map(move |x| (x, y)))
            .collect();
        let mask = mask_with(7, 7, &block);
        let (mut out, mut scratch) = (Vec::new(), Vec::new());
        erode_into(&mask, 7, 7, 1, &mut out, &mut scratch);
        assert_eq!(count(&out), 9);
        erode_into(&mask, 7, 7, 2, &mut out, &mut scratch);
        assert_eq!(count(&out), 1);
        assert_eq!(out[3 * 7 + 3], 1);
    }

    #[test]
    fn image_border_does_not_erode() {
        let mask = vec![1; 20];
        let (mut out, mut scratch) = (Vec::new(), Vec::new());
        erode_into(&mask, 5, 4, 3, &mut out, &mut scratch);
        assert_eq!(out, mask);
    }

    #[test]
    fn isolated_pixels_are_removed() {
        let mask = mask_with(6, 6, &[(0, 0), (3, 3), (4, 4)]);
        let mut out = Vec::new();
        remove_isolated_into(&mask, 6, 6, &mut out);
        assert_eq!(out, mask_with(6, 6, &[(3, 3), (4, 4)]));
    }

    #[test]
    fn delta_uses_the_largest_channel() {
        let a = RgbFrame::filled(2, 1, [10, 10, 10]);
        let mut b = RgbFrame::filled(2, 1, [10, 10, 10]);
        b.set_pixel(1, 0, [12, 45, 9]);
        let mut out = Vec::new();
        delta_mask_into(&a, &b, 30, &mut out);
        assert_eq!(out, vec![0, 1]);
        delta_mask_into(&a, &b, 35, &mut out);
        assert_eq!(out, vec![0, 0]);
    }

    #[test]
    fn and_and_subtract_combine_masks() {
        let mut mask = vec![1, 1, 0, 1];
        and_in_place(&mut mask, &[1, 0, 1, 1]);
        assert_eq!(mask, vec![1, 0, 0, 1]);
        subtract_in_place(&mut mask, &[0, 0, 0, 1]);
        assert_eq!(mask, vec![1, 0, 0, 0]);
    }
}
