use image::{DynamicImage, GrayImage, Luma, imageops};
use imageproc::contrast::{ThresholdType, equalize_histogram, otsu_level, threshold};
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use tracing::{debug, info};

const DENOISE_SIGMA: f32 = 0.8;
const ADAPTIVE_BLOCK_RADIUS: u32 = 5;
const ADAPTIVE_OFFSET: i64 = 2;
const MIN_DESKEW_DEGREES: f32 = 0.5;
const MAX_DESKEW_DEGREES: f32 = 45.0;
const MIN_FOREGROUND_PIXELS: usize = 10;

pub(crate) struct Variants {
    pub(crate) grayscale: GrayImage,
    pub(crate) adaptive: GrayImage,
    pub(crate) otsu: GrayImage,
    pub(crate) deskewed: bool,
}

impl Variants {
    pub(crate) fn get(&self, name: &str) -> Option<&GrayImage> {
        match name {
            "grayscale" => Some(&self.grayscale),
            "adaptive" => Some(&self.adaptive),
            "otsu" => Some(&self.otsu),
            _ => None,
        }
    }
}

/// Downscales wider-than-`max_width` images; the flag reports whether it did.
pub(crate) fn resize_to_max_width(image: &DynamicImage, max_width: u32) -> (DynamicImage, bool) {
    if image.width() <= max_width || max_width == 0 {
        return (image.clone(), false);
    }
    let ratio = max_width as f64 / image.width() as f64;
    let height = ((image.height() as f64 * ratio).round() as u32).max(1);
    info!("resized image to {}x{}", max_width, height);
    (
        image.resize_exact(max_width, height, imageops::FilterType::Lanczos3),
        true,
    )
}

pub(crate) fn to_grayscale(image: &DynamicImage) -> GrayImage {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut luma = GrayImage::new(width, height);

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let r = r as f32 * alpha + 255.0 * (1.0 - alpha);
        let g = g as f32 * alpha + 255.0 * (1.0 - alpha);
        let b = b as f32 * alpha + 255.0 * (1.0 - alpha);
        let value = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
        luma.put_pixel(x, y, Luma([value]));
    }
    luma
}

/// Grayscale, equalize, denoise, optionally deskew, then binarize two ways.
pub(crate) fn preprocess_variants(image: &DynamicImage, deskew_enabled: bool) -> Variants {
    let gray = to_grayscale(image);
    let gray = equalize_histogram(&gray);
    let gray = gaussian_blur_f32(&gray, DENOISE_SIGMA);
    let (gray, deskewed) = if deskew_enabled {
        deskew(&gray)
    } else {
        debug!("skipping deskew because text was already detected");
        (gray, false)
    };
    let adaptive = adaptive_threshold(&gray, ADAPTIVE_BLOCK_RADIUS, ADAPTIVE_OFFSET);
    let otsu = threshold(&gray, otsu_level(&gray), ThresholdType::Binary);
    Variants {
        grayscale: gray,
        adaptive,
        otsu,
        deskewed,
    }
}

pub(crate) fn invert(image: &GrayImage) -> GrayImage {
    let mut output = image.clone();
    imageops::invert(&mut output);
    output
}

/// Estimates the dominant text angle from the second moments of dark pixels.
pub(crate) fn skew_angle_degrees(image: &GrayImage) -> Option<f32> {
    let level = otsu_level(image);
    let mut count = 0usize;
    let (mut sum_x, mut sum_y) = (0.0f64, 0.0f64);
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[0] <= level {
            count += 1;
            sum_x += x as f64;
            sum_y += y as f64;
        }
    }
    if count < MIN_FOREGROUND_PIXELS {
        return None;
    }
    let mean_x = sum_x / count as f64;
    let mean_y = sum_y / count as f64;
    let (mut mu20, mut mu02, mut mu11) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[0] <= level {
            let dx = x as f64 - mean_x;
            let dy = y as f64 - mean_y;
            mu20 += dx * dx;
            mu02 += dy * dy;
            mu11 += dx * dy;
        }
    }
    if mu20 <= mu02 {
        // Taller than wide: no reliable baseline direction.
        return None;
    }
    let angle = 0.5 * (2.0 * mu11).atan2(mu20 - mu02);
    Some(angle.to_degrees() as f32)
}

pub(crate) fn deskew(image: &GrayImage) -> (GrayImage, bool) {
    let Some(angle) = skew_angle_degrees(image) else {
        return (image.clone(), false);
    };
    if angle.abs() < MIN_DESKEW_DEGREES || angle.abs() > MAX_DESKEW_DEGREES {
        return (image.clone(), false);
    }
    let rotated = rotate_about_center(
        image,
        -angle.to_radians(),
        Interpolation::Bilinear,
        Luma([255u8]),
    );
    info!("deskewed image by {:.2} degrees", -angle);
    (rotated, true)
}

/// Local-mean threshold: a pixel is white when brighter than its window mean minus `offset`.
fn adaptive_threshold(image: &GrayImage, radius: u32, offset: i64) -> GrayImage {
    let (width, height) = image.dimensions();
    let stride = width as usize + 1;
    let mut integral = vec![0u64; stride * (height as usize + 1)];
    for y in 0..height as usize {
        let mut row_sum = 0u64;
        for x in 0..width as usize {
            row_sum += image.get_pixel(x as u32, y as u32)[0] as u64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    let mut output = GrayImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let x0 = x.saturating_sub(radius) as usize;
            let y0 = y.saturating_sub(radius) as usize;
            let x1 = (x + radius + 1).min(width) as usize;
            let y1 = (y + radius + 1).min(height) as usize;
            let area = ((x1 - x0) * (y1 - y0)) as i64;
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let mean = sum as i64 / area.max(1);
            let value = image.get_pixel(x, y)[0] as i64;
            let bin = if value > mean - offset { 255 } else { 0 };
            output.put_pixel(x, y, Luma([bin]));
        }
    }
    output
}
