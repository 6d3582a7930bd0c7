//! Separable Gaussian blur for the blurred-background mode.
//!
//! Samples outside the frame are clamped to the nearest edge pixel, so the
//! result covers exactly the input extent with no transparent border.

use crate::error::FrameError;
use crate::frame::{is_empty, RgbaFrame};

/// Sigmas above this are blurred on a downscaled copy and upsampled again.
const MAX_FULL_RES_SIGMA: f32 = 6.0;

const CHANNELS: usize = 4;

/// Blur `frame` with a Gaussian of standard deviation `radius` pixels.
pub fn gaussian_blur(frame: &RgbaFrame, radius: f32) -> Result<RgbaFrame, FrameError> {
    if !radius.is_finite() || radius <= 0.0 {
        return Err(FrameError::FilterConstruction(format!(
            "blur radius must be positive and finite, got {radius}"
        )));
    }
    let (width, height) = frame.dimensions();
    if is_empty(width, height) {
        return Err(FrameError::EmptyFrame);
    }

    let w = width as usize;
    let h = height as usize;
    let scale = downscale_factor(radius, w, h);
    let mut temp = Vec::new();

    let data = if scale <= 1 {
        let mut data = frame.as_raw().clone();
        separable_blur(&mut data, w, h, &gaussian_kernel(radius, w.max(h)), &mut temp);
        data
    } else {
        let (mut small, sw, sh) = downscale(frame.as_raw(), w, h, scale);
        let kernel = gaussian_kernel(radius / scale as f32, sw.max(sh));
        separable_blur(&mut small, sw, sh, &kernel, &mut temp);
        upscale(&small, sw, sh, w, h)
    };

    RgbaFrame::from_raw(width, height, data).ok_or_else(|| {
        FrameError::FilterConstruction("blur produced a buffer of unexpected size".into())
    })
}

/// Normalized 1D Gaussian kernel covering +-3 sigma, at most `max_half`
/// taps either side of the center.
///
/// Taps past the blurred extent only re-sample clamped edge pixels, so
/// callers pass the larger image dimension as `max_half`.
pub fn gaussian_kernel(sigma: f32, max_half: usize) -> Vec<f32> {
    let sigma = sigma as f64;
    let half = (sigma * 3.0).ceil().clamp(1.0, max_half.max(1) as f64) as usize;
    let mut kernel: Vec<f64> = (0..=2 * half)
        .map(|i| {
            let x = i as f64 - half as f64;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel.into_iter().map(|v| v as f32).collect()
}

fn downscale_factor(sigma: f32, width: usize, height: usize) -> usize {
    if sigma <= MAX_FULL_RES_SIGMA {
        return 1;
    }
    let factor = (sigma / MAX_FULL_RES_SIGMA).ceil() as usize;
    // Keep at least a few pixels per axis after downscaling.
    factor.min(width / 4).min(height / 4).max(1)
}

fn separable_blur(data: &mut [u8], width: usize, height: usize, kernel: &[f32], temp: &mut Vec<f32>) {
    let half = kernel.len() / 2;
    temp.resize(width * height * CHANNELS, 0.0);

    // Horizontal: data -> temp
    for y in 0..height {
        let row = y * width;
        for x in 0..width {
            let mut sum = [0.0f32; CHANNELS];
            for (k, &weight) in kernel.iter().enumerate() {
                let sx = (x + k).saturating_sub(half).min(width - 1);
                let src = (row + sx) * CHANNELS;
                for c in 0..CHANNELS {
                    sum[c] += data[src + c] as f32 * weight;
                }
            }
            temp[(row + x) * CHANNELS..(row + x + 1) * CHANNELS].copy_from_slice(&sum);
        }
    }

    // Vertical: temp -> data
    for y in 0..height {
        for x in 0..width {
            let mut sum = [0.0f32; CHANNELS];
            for (k, &weight) in kernel.iter().enumerate() {
                let sy = (y + k).saturating_sub(half).min(height - 1);
                let src = (sy * width + x) * CHANNELS;
                for c in 0..CHANNELS {
                    sum[c] += temp[src + c] * weight;
                }
            }
            let dst = (y * width + x) * CHANNELS;
            for c in 0..CHANNELS {
                data[dst + c] = sum[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Box-average downscale by an integer factor.
fn downscale(data: &[u8], width: usize, height: usize, scale: usize) -> (Vec<u8>, usize, usize) {
    let new_w = (width / scale).max(1);
    let new_h = (height / scale).max(1);
    let mut out = vec![0u8; new_w * new_h * CHANNELS];

    for y in 0..new_h {
        for x in 0..new_w {
            let mut sum = [0u32; CHANNELS];
            let mut count = 0u32;
            for sy in (y * scale)..((y + 1) * scale).min(height) {
                for sx in (x * scale)..((x + 1) * scale).min(width) {
                    let src = (sy * width + sx) * CHANNELS;
                    for c in 0..CHANNELS {
                        sum[c] += data[src + c] as u32;
                    }
                    count += 1;
                }
            }
            let dst = (y * new_w + x) * CHANNELS;
            for c in 0..CHANNELS {
                out[dst + c] = (sum[c] / count.max(1)) as u8;
            }
        }
    }

    (out, new_w, new_h)
}

/// Bilinear upscale to an exact target size.
fn upscale(data: &[u8], width: usize, height: usize, target_w: usize, target_h: usize) -> Vec<u8> {
    let mut out = vec![0u8; target_w * target_h * CHANNELS];
    let step_x = (width as f32 - 1.0) / (target_w as f32 - 1.0).max(1.0);
    let step_y = (height as f32 - 1.0) / (target_h as f32 - 1.0).max(1.0);

    for y in 0..target_h {
        let src_y = y as f32 * step_y;
        let y0 = (src_y.floor() as usize).min(height - 1);
        let y1 = (y0 + 1).min(height - 1);
        let fy = src_y - y0 as f32;

        for x in 0..target_w {
            let src_x = x as f32 * step_x;
            let x0 = (src_x.floor() as usize).min(width - 1);
            let x1 = (x0 + 1).min(width - 1);
            let fx = src_x - x0 as f32;

            let dst = (y * target_w + x) * CHANNELS;
            for c in 0..CHANNELS {
                let v00 = data[(y0 * width + x0) * CHANNELS + c] as f32;
                let v10 = data[(y0 * width + x1) * CHANNELS + c] as f32;
                let v01 = data[(y1 * width + x0) * CHANNELS + c] as f32;
                let v11 = data[(y1 * width + x1) * CHANNELS + c] as f32;
                let value = v00 * (1.0 - fx) * (1.0 - fy)
                    + v10 * fx * (1.0 - fy)
                    + v01 * (1.0 - fx) * fy
                    + v11 * fx * fy;
                out[dst + c] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgba;
    use rstest::rstest;

    #[rstest]
    #[case(0.5)]
    #[case(2.0)]
    #[case(7.5)]
    fn test_kernel_is_normalized_and_symmetric(#[case] sigma: f32) {
        let k = gaussian_kernel(sigma, 64);
        assert_eq!(k.len() % 2, 1);
        assert_relative_eq!(k.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        for i in 0..k.len() / 2 {
            assert_relative_eq!(k[i], k[k.len() - 1 - i], epsilon = 1e-7);
        }
        let center = k[k.len() / 2];
        assert!(k.iter().all(|&v| v <= center));
    }

    #[rstest]
    #[case(3.0)]
    #[case(20.0)]
    fn test_uniform_frame_unchanged(#[case] radius: f32) {
        let frame = RgbaFrame::from_pixel(40, 30, Rgba([90, 120, 200, 255]));
        let blurred = gaussian_blur(&frame, radius).unwrap();
        assert_eq!(blurred.dimensions(), (40, 30));
        for p in blurred.pixels() {
            for (got, want) in p.0.iter().zip([90u8, 120, 200, 255]) {
                assert!((*got as i32 - want as i32).abs() <= 1);
            }
        }
    }

    #[test]
    fn test_bright_pixel_spreads() {
        let mut frame = RgbaFrame::from_pixel(11, 11, Rgba([0, 0, 0, 255]));
        frame.put_pixel(5, 5, Rgba([255, 255, 255, 255]));
        let blurred = gaussian_blur(&frame, 1.5).unwrap();
        assert!(blurred.get_pixel(5, 5)[0] < 255);
        assert!(blurred.get_pixel(6, 5)[0] > 0);
        assert!(blurred.get_pixel(5, 6)[0] > 0);
    }

    #[test]
    fn test_large_radius_keeps_extent() {
        let frame = RgbaFrame::from_fn(64, 48, |x, _| Rgba([(x * 4) as u8, 0, 0, 255]));
        let blurred = gaussian_blur(&frame, 30.0).unwrap();
        assert_eq!(blurred.dimensions(), (64, 48));
    }

    #[test]
    fn test_large_radius_on_tiny_frame() {
        let frame = RgbaFrame::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
        let blurred = gaussian_blur(&frame, 50.0).unwrap();
        assert_eq!(blurred.dimensions(), (3, 2));
    }

    #[rstest]
    #[case(0.0)]
    #[case(-1.0)]
    #[case(f32::NAN)]
    #[case(f32::INFINITY)]
    fn test_invalid_radius_is_filter_error(#[case] radius: f32) {
        let frame = RgbaFrame::new(4, 4);
        assert!(matches!(
            gaussian_blur(&frame, radius),
            Err(FrameError::FilterConstruction(_))
        ));
    }

    #[test]
    fn test_kernel_width_is_bounded() {
        assert_eq!(gaussian_kernel(1e30, 40).len(), 81);
        assert_eq!(gaussian_kernel(2.0, 40).len(), 13);
    }

    #[rstest]
    #[case(1e30)]
    #[case(f32::MAX)]
    #[case(5000.0)]
    fn test_huge_finite_radius_still_blurs(#[case] radius: f32) {
        let frame = RgbaFrame::from_fn(64, 48, |x, y| Rgba([(x * 4) as u8, (y * 5) as u8, 0, 255]));
        let blurred = gaussian_blur(&frame, radius).unwrap();
        assert_eq!(blurred.dimensions(), (64, 48));
    }

    #[test]
    fn test_empty_frame_rejected() {
        let frame = RgbaFrame::new(0, 4);
        assert!(matches!(gaussian_blur(&frame, 2.0), Err(FrameError::EmptyFrame)));
    }

    #[test]
    fn test_downscale_upscale_uniform() {
        let data = vec![100u8; 8 * 8 * CHANNELS];
        let (small, sw, sh) = downscale(&data, 8, 8, 2);
        assert_eq!((sw, sh), (4, 4));
        let big = upscale(&small, sw, sh, 8, 8);
        assert!(big.iter().all(|&v| v == 100));
    }
}
