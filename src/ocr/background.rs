use image::RgbaImage;

use super::layout::TextBox;

const MARGIN_RATIO: f64 = 0.15;
const MIN_MARGIN: f64 = 3.0;

/// Fill and text colours for one overlay box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Palette {
    /// White translucent fill, black text.
    Light,
    /// Black translucent fill, white text.
    Dark,
}

impl Palette {
    pub(crate) fn fill(&self) -> &'static str {
        match self {
            Palette::Light => "#ffffff",
            Palette::Dark => "#000000",
        }
    }

    pub(crate) fn fill_opacity(&self) -> f32 {
        match self {
            Palette::Light => 0.85,
            Palette::Dark => 0.75,
        }
    }

    pub(crate) fn text(&self) -> &'static str {
        match self {
            Palette::Light => "#000000",
            Palette::Dark => "#ffffff",
        }
    }

    pub(crate) fn outline(&self) -> &'static str {
        self.fill()
    }
}

/// Decides the palette from the colour around `text_box`, never inside it.
pub(crate) fn classify_background(image: &RgbaImage, text_box: &TextBox) -> Palette {
    let samples = sample_points(text_box, image.width(), image.height())
        .into_iter()
        .map(|(x, y)| {
            let [r, g, b, _] = image.get_pixel(x, y).0;
            [r, g, b]
        })
        .collect::<Vec<_>>();
    if samples.is_empty() {
        return Palette::Light;
    }
    classify_color(median_color(&samples))
}

pub(crate) fn classify_color(color: [u8; 3]) -> Palette {
    let [r, g, b] = color.map(f64::from);
    let brightness = 0.299 * r + 0.587 * g + 0.114 * b;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let saturation = if max > 0.0 { (max - min) / max } else { 0.0 };

    if brightness > 140.0 || (brightness > 100.0 && saturation > 0.3) {
        Palette::Light
    } else if brightness < 100.0 {
        Palette::Dark
    } else {
        Palette::Light
    }
}

/// Corners, edge midpoints and quarter points of the box grown by a margin,
/// clamped to the image. Points that land inside the box are dropped.
fn sample_points(text_box: &TextBox, width: u32, height: u32) -> Vec<(u32, u32)> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let margin = (text_box.w.min(text_box.h) * MARGIN_RATIO).max(MIN_MARGIN);
    let left = text_box.x - margin;
    let right = text_box.x + text_box.w + margin;
    let top = text_box.y - margin;
    let bottom = text_box.y + text_box.h + margin;

    let mut points = Vec::with_capacity(16);
    for fraction in [0.0, 0.25, 0.5, 0.75] {
        let x = left + (right - left) * fraction;
        let y = top + (bottom - top) * fraction;
        points.push((x, top));
        points.push((right - (x - left), bottom));
        points.push((left, bottom - (y - top)));
        points.push((right, y));
    }

    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    points
        .into_iter()
        .map(|(x, y)| (x.clamp(0.0, max_x), y.clamp(0.0, max_y)))
        .filter(|(x, y)| !inside(text_box, *x, *y))
        .map(|(x, y)| (x.round() as u32, y.round() as u32))
        .collect()
}

fn inside(text_box: &TextBox, x: f64, y: f64) -> bool {
    x > text_box.x && x < text_box.x + text_box.w && y > text_box.y && y < text_box.y + text_box.h
}

fn median_color(samples: &[[u8; 3]]) -> [u8; 3] {
    let mut out = [0u8; 3];
    for (channel, value) in out.iter_mut().enumerate() {
        let mut values = samples.iter().map(|rgb| rgb[channel]).collect::<Vec<_>>();
        values.sort_unstable();
        *value = values[values.len() / 2];
    }
    out
}
