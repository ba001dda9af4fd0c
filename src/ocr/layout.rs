use super::font::{FontMetrics, measure_text_width_px};
use super::geom::Rect;

const MIN_BOX_SIDE: f64 = 20.0;
const MIN_PADDING: f64 = 4.0;
const PADDING_RATIO: f64 = 0.05;
const MAX_FONT_SIZE: f32 = 64.0;
const FONT_HEIGHT_RATIO: f32 = 0.9;
const FONT_STEP: f32 = 2.0;
const LINE_HEIGHT_RATIO: f32 = 1.2;
const LINE_SPACING: f32 = 2.0;

/// Where overlay text goes, in image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TextBox {
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) w: f64,
    pub(crate) h: f64,
    pub(crate) padding: f64,
}

impl TextBox {
    /// Box extrema grown to at least 20x20 around the same top-left corner.
    pub(crate) fn from_rect(rect: &Rect) -> Self {
        let w = (rect.x_max - rect.x_min).max(MIN_BOX_SIDE);
        let h = (rect.y_max - rect.y_min).max(MIN_BOX_SIDE);
        let padding = (w.min(h) * PADDING_RATIO).max(MIN_PADDING);
        Self {
            x: rect.x_min,
            y: rect.y_min,
            w,
            h,
            padding,
        }
    }

    pub(crate) fn inner_width(&self) -> f32 {
        (self.w - self.padding * 2.0).max(1.0) as f32
    }

    pub(crate) fn inner_height(&self) -> f32 {
        (self.h - self.padding * 2.0).max(1.0) as f32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FittedText {
    pub(crate) font_size: f32,
    pub(crate) line_height: f32,
    pub(crate) lines: Vec<String>,
}

impl FittedText {
    pub(crate) fn block_height(&self) -> f32 {
        block_height(self.lines.len(), self.line_height)
    }

    /// Baseline distance between consecutive wrapped lines.
    pub(crate) fn line_step(&self) -> f32 {
        self.line_height + LINE_SPACING
    }
}

fn block_height(lines: usize, line_height: f32) -> f32 {
    if lines == 0 {
        return 0.0;
    }
    line_height * lines as f32 + LINE_SPACING * (lines - 1) as f32
}

/// Largest font size, stepping down by 2, whose wrapped text fits the box.
/// Falls back to `min_font_size` and lets the text overflow.
pub(crate) fn fit_text(
    text: &str,
    text_box: &TextBox,
    min_font_size: f32,
    font: Option<&FontMetrics>,
) -> FittedText {
    let inner_w = text_box.inner_width();
    let inner_h = text_box.inner_height();
    let mut font_size = MAX_FONT_SIZE.min(FONT_HEIGHT_RATIO * text_box.h as f32);

    while font_size >= min_font_size {
        let line_height = font_size * LINE_HEIGHT_RATIO;
        let lines = wrap_text(text, font_size, inner_w, font);
        if block_height(lines.len(), line_height) <= inner_h {
            return FittedText {
                font_size,
                line_height,
                lines,
            };
        }
        font_size -= FONT_STEP;
    }

    FittedText {
        font_size: min_font_size,
        line_height: min_font_size * LINE_HEIGHT_RATIO,
        lines: wrap_text(text, min_font_size, inner_w, font),
    }
}

/// Greedy word wrap; a word wider than the line is split between characters.
/// Existing line breaks are kept.
pub(crate) fn wrap_text(
    text: &str,
    font_size: f32,
    max_width: f32,
    font: Option<&FontMetrics>,
) -> Vec<String> {
    let width = |value: &str| measure_text_width_px(value, font_size, font);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if width(word) > max_width {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                let mut pieces = split_chars(word, max_width, &width);
                if let Some(last) = pieces.pop() {
                    lines.extend(pieces);
                    current = last;
                }
                continue;
            }
            if current.is_empty() {
                current.push_str(word);
                continue;
            }
            let joined = format!("{} {}", current, word);
            if width(&joined) <= max_width {
                current = joined;
            } else {
                lines.push(std::mem::replace(&mut current, word.to_string()));
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }

    lines
}

fn split_chars(word: &str, max_width: f32, width: &impl Fn(&str) -> f32) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for ch in word.chars() {
        let mut candidate = current.clone();
        candidate.push(ch);
        if !current.is_empty() && width(&candidate) > max_width {
            pieces.push(std::mem::take(&mut current));
            current.push(ch);
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
