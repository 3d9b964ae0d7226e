//! Fit-and-backdrop frame compositor.
//!
//! The foreground is scaled to fit the target canvas and pasted centred on a
//! blurred, cover-scaled copy of the background source. Blurring happens at a
//! reduced working resolution so its cost does not grow with the output size.

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::config::OutputConfig;
use crate::error::PipelineError;
use crate::video::types::Frame;

/// Extra pixels added to the cover-scaled backdrop before centre-cropping
const BACKDROP_SLACK: u32 = 4;

/// Blur radii above this are computed at 1/8 resolution instead of 1/4
const HEAVY_BLUR_THRESHOLD: u32 = 10;

/// Composites cropped frames onto blurred backdrops at a fixed target size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compositor {
    target_width: u32,
    target_height: u32,
    blur_radius: u32,
}

impl Compositor {
    pub fn new(target_width: u32, target_height: u32, blur_radius: u32) -> Self {
        Self {
            target_width,
            target_height,
            blur_radius,
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(config.width, config.height, config.blur_radius)
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Produce a `target_width x target_height` frame.
    ///
    /// `foreground` is the (already cropped) content; `background` is only
    /// used to derive the blurred backdrop and is usually the uncropped frame.
    pub fn composite(&self, foreground: &Frame, background: &Frame) -> Result<Frame, PipelineError> {
        let (tw, th) = (self.target_width, self.target_height);
        if tw == 0 || th == 0 {
            return Err(PipelineError::InvalidParameters {
                details: format!("target size {}x{}", tw, th),
            });
        }
        for (name, frame) in [("foreground", foreground), ("background", background)] {
            if frame.width() == 0 || frame.height() == 0 {
                return Err(PipelineError::InvalidParameters {
                    details: format!("empty {} frame", name),
                });
            }
        }

        let scaled = self.fit_foreground(foreground.as_image());
        let mut canvas = self.backdrop(background.as_image());

        let paste_x = (tw - scaled.width()) / 2;
        let paste_y = (th - scaled.height()) / 2;
        imageops::replace(&mut canvas, &scaled, i64::from(paste_x), i64::from(paste_y));

        Ok(Frame::new(canvas))
    }

    /// Scale to fit inside the target, preserving aspect ratio
    fn fit_foreground(&self, image: &RgbImage) -> RgbImage {
        let (fw, fh) = image.dimensions();
        let scale = fit_scale(fw, fh, self.target_width, self.target_height);
        let new_w = scaled_dim(fw, scale).clamp(1, self.target_width);
        let new_h = scaled_dim(fh, scale).clamp(1, self.target_height);

        if (new_w, new_h) == (fw, fh) {
            return image.clone();
        }
        imageops::resize(image, new_w, new_h, FilterType::Lanczos3)
    }

    /// Cover-scaled, blurred, centre-cropped backdrop of exactly the target size
    fn backdrop(&self, image: &RgbImage) -> RgbImage {
        let (tw, th) = (self.target_width, self.target_height);
        let (bw, bh) = image.dimensions();

        let scale = cover_scale(bw, bh, tw, th);
        let cover_w = scaled_dim(bw, scale) + BACKDROP_SLACK;
        let cover_h = scaled_dim(bh, scale) + BACKDROP_SLACK;

        let downscale = if self.blur_radius > HEAVY_BLUR_THRESHOLD { 8 } else { 4 };
        let work_w = (cover_w / downscale).max(1);
        let work_h = (cover_h / downscale).max(1);

        let mut small = imageops::resize(image, work_w, work_h, FilterType::Triangle);

        let small_radius = (self.blur_radius / downscale).max(1);
        let kernel_size = small_radius * 2 + 1;
        if kernel_size > 1 {
            small = gaussian_blur(&small, small_radius);
        }

        let cover = imageops::resize(&small, cover_w, cover_h, FilterType::Triangle);

        let crop_x = cover_w.saturating_sub(tw) / 2;
        let crop_y = cover_h.saturating_sub(th) / 2;
        let backdrop = imageops::crop_imm(
            &cover,
            crop_x,
            crop_y,
            tw.min(cover_w - crop_x),
            th.min(cover_h - crop_y),
        )
        .to_image();

        if backdrop.dimensions() != (tw, th) {
            return imageops::resize(&backdrop, tw, th, FilterType::Triangle);
        }
        backdrop
    }
}

/// Largest scale at which `w x h` still fits inside the target
pub fn fit_scale(w: u32, h: u32, target_w: u32, target_h: u32) -> f64 {
    (f64::from(target_h) / f64::from(h)).min(f64::from(target_w) / f64::from(w))
}

/// Smallest scale at which `w x h` covers the whole target
pub fn cover_scale(w: u32, h: u32, target_w: u32, target_h: u32) -> f64 {
    (f64::from(target_w) / f64::from(w)).max(f64::from(target_h) / f64::from(h))
}

fn scaled_dim(dim: u32, scale: f64) -> u32 {
    // epsilon keeps 3 * (640/3) from landing on 639
    (f64::from(dim) * scale + 1e-6).floor() as u32
}

/// Separable Gaussian blur with a `2 * radius + 1` tap kernel.
///
/// Sigma follows the usual "derive from kernel size" rule
/// `0.3 * ((ksize - 1) / 2 - 1) + 0.8`. Edges are clamped.
pub fn gaussian_blur(image: &RgbImage, radius: u32) -> RgbImage {
    if radius == 0 {
        return image.clone();
    }

    let sigma = 0.3 * (f64::from(radius) - 1.0) + 0.8;
    let kernel = gaussian_kernel_q16(radius, sigma);
    let (width, height) = image.dimensions();

    let mut tmp = vec![0u8; image.as_raw().len()];
    let mut out = vec![0u8; image.as_raw().len()];
    horizontal_pass(image.as_raw(), &mut tmp, width, height, &kernel);
    vertical_pass(&tmp, &mut out, width, height, &kernel);

    RgbImage::from_raw(width, height, out).unwrap_or_else(|| image.clone())
}

fn gaussian_kernel_q16(radius: u32, sigma: f64) -> Vec<u32> {
    let r = radius as i32;
    let denom = 2.0 * sigma * sigma;
    let weights_f: Vec<f64> = (-r..=r)
        .map(|i| {
            let x = f64::from(i);
            (-x * x / denom).exp()
        })
        .collect();
    let sum: f64 = weights_f.iter().sum();

    let mut weights: Vec<u32> = weights_f
        .iter()
        .map(|w| ((w / sum) * 65536.0).round().clamp(0.0, 65536.0) as u32)
        .collect();

    // Force the taps to sum to exactly 1.0 in Q16 so flat regions stay flat
    let acc: i64 = weights.iter().map(|&w| i64::from(w)).sum();
    let delta = 65536 - acc;
    if delta != 0 {
        let mid = weights.len() / 2;
        weights[mid] = (i64::from(weights[mid]) + delta).clamp(0, 65536) as u32;
    }
    weights
}

fn horizontal_pass(src: &[u8], dst: &mut [u8], width: u32, height: u32, k: &[u32]) {
    let radius = (k.len() / 2) as i32;
    let w = width as i32;
    for y in 0..height as i32 {
        for x in 0..w {
            let mut acc = [0u64; 3];
            for (ki, &kw) in k.iter().enumerate() {
                let sx = (x + ki as i32 - radius).clamp(0, w - 1);
                let idx = ((y * w + sx) as usize) * 3;
                for c in 0..3 {
                    acc[c] += u64::from(kw) * u64::from(src[idx + c]);
                }
            }
            let out_idx = ((y * w + x) as usize) * 3;
            for c in 0..3 {
                dst[out_idx + c] = q16_to_u8(acc[c]);
            }
        }
    }
}

fn vertical_pass(src: &[u8], dst: &mut [u8], width: u32, height: u32, k: &[u32]) {
    let radius = (k.len() / 2) as i32;
    let w = width as i32;
    let h = height as i32;
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0u64; 3];
            for (ki, &kw) in k.iter().enumerate() {
                let sy = (y + ki as i32 - radius).clamp(0, h - 1);
                let idx = ((sy * w + x) as usize) * 3;
                for c in 0..3 {
                    acc[c] += u64::from(kw) * u64::from(src[idx + c]);
                }
            }
            let out_idx = ((y * w + x) as usize) * 3;
            for c in 0..3 {
                dst[out_idx + c] = q16_to_u8(acc[c]);
            }
        }
    }
}

fn q16_to_u8(acc: u64) -> u8 {
    ((acc + 32768) >> 16).min(255) as u8
}
