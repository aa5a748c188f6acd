use rally_cut_types::{FrameSize, RGB_CHANNELS, RgbFrame};

/// Box-filter resize of a packed RGB frame into `output`.
///
/// Every destination pixel averages the source pixels its footprint covers, which
/// keeps a small ball visible when downscaling instead of skipping over it.
pub fn resize_rgb_into(source: &RgbFrame, target: FrameSize, output: &mut Vec<u8>) {
    let width = source.width() as usize;
    let height = source.height() as usize;
    let new_width = target.width as usize;
    let new_height = target.height as usize;
    output.clear();
    output.resize(new_width * new_height * RGB_CHANNELS, 0);
    if width == 0 || height == 0 || new_width == 0 || new_height == 0 {
        return;
    }
    let pixels = source.data();
    if width == new_width && height == new_height {
        output.copy_from_slice(pixels);
        return;
    }

    let scale_x = width as f32 / new_width as f32;
    let scale_y = height as f32 / new_height as f32;
    for ny in 0..new_height {
        let src_y0 = (ny as f32 * scale_y).floor() as usize;
        let src_y1 = (((ny + 1) as f32 * scale_y).ceil() as usize)
            .min(height)
            .max(src_y0 + 1);
        for nx in 0..new_width {
            let src_x0 = (nx as f32 * scale_x).floor() as usize;
            let src_x1 = (((nx + 1) as f32 * scale_x).ceil() as usize)
                .min(width)
                .max(src_x0 + 1);
            let mut sum = [0u32; RGB_CHANNELS];
            let mut count = 0u32;
            for sy in src_y0..src_y1.min(height) {
                let row = sy * width;
                for sx in src_x0..src_x1.min(width) {
                    let idx = (row + sx) * RGB_CHANNELS;
                    sum[0] += pixels[idx] as u32;
                    sum[1] += pixels[idx + 1] as u32;
                    sum[2] += pixels[idx + 2] as u32;
                    count += 1;
                }
            }
            let out = (ny * new_width + nx) * RGB_CHANNELS;
            if count > 0 {
                for channel in 0..RGB_CHANNELS {
                    output[out + channel] = ((sum[channel] + count / 2) / count) as u8;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_size_is_a_copy() {
        let mut frame = RgbFrame::filled(4, 2, [1, 2, 3]);
        frame.set_pixel(3, 1, [9, 9, 9]);
        let mut out = Vec::new();
        resize_rgb_into(&frame, FrameSize::new(4, 2), &mut out);
        assert_eq!(out, frame.data());
    }

    #[test]
    fn halving_averages_blocks() {
        let mut frame = RgbFrame::filled(4, 4, [0, 0, 0]);
        frame.set_pixel(0, 0, [200, 100, 40]);
        frame.set_pixel(1, 1, [200, 100, 40]);
        let mut out = Vec::new();
        resize_rgb_into(&frame, FrameSize::new(2, 2), &mut out);
        assert_eq!(out.len(), 12);
        assert_eq!(&out[0..3], &[100, 50, 20]);
        assert_eq!(&out[3..6], &[0, 0, 0]);
    }

    #[test]
    fn upscaling_repeats_pixels() {
        let mut frame = RgbFrame::filled(2, 1, [10, 10, 10]);
        frame.set_pixel(1, 0, [50, 60, 70]);
        let mut out = Vec::new();
        resize_rgb_into(&frame, FrameSize::new(4, 2), &mut out);
        assert_eq!(&out[0..3], &[10, 10, 10]);
        assert_eq!(&out[9..12], &[50, 60, 70]);
        assert_eq!(&out[21..24], &[50, 60, 70]);
    }
}
