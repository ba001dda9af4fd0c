use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{DynamicImage, RgbaImage};
use resvg::render;
use std::fmt::Write as _;
use std::io::Cursor;
use std::sync::Arc;
use tiny_skia::Pixmap;
use tracing::{debug, warn};
use usvg::{Options, Tree, fontdb};

use super::Quad;
use super::background::classify_background;
use super::font::ResolvedOverlayFont;
use super::geom::Rect;
use super::layout::{TextBox, fit_text};

const OUTLINE_OFFSETS: [(f32, f32); 8] = [
    (-1.0, -1.0),
    (0.0, -1.0),
    (1.0, -1.0),
    (-1.0, 0.0),
    (1.0, 0.0),
    (-1.0, 1.0),
    (0.0, 1.0),
    (1.0, 1.0),
];

/// One box to paint over the source image.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLine {
    pub bbox: Quad,
    pub text: String,
}

#[derive(Clone)]
pub struct OverlayOptions {
    pub boxes_only: bool,
    pub min_font_size: f32,
    pub font: Option<ResolvedOverlayFont>,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            boxes_only: false,
            min_font_size: 10.0,
            font: None,
        }
    }
}

/// Paints every line onto `image` and returns the result as PNG bytes.
///
/// Lines that cannot be laid out are logged and skipped.
pub fn render_overlay(
    image: &DynamicImage,
    lines: &[OverlayLine],
    options: &OverlayOptions,
) -> Result<Vec<u8>> {
    let svg = build_svg(image, lines, options)?;
    let font_data = options.font.as_ref().map(|font| font.metrics.data());
    rasterize_png(&svg, font_data)
}

fn build_svg(image: &DynamicImage, lines: &[OverlayLine], options: &OverlayOptions) -> Result<String> {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut png = Vec::new();
    DynamicImage::ImageRgba8(rgba.clone())
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .with_context(|| "failed to encode source image")?;
    let data_uri = format!("data:image/png;base64,{}", BASE64.encode(&png));

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = width,
        h = height
    ));

    for (idx, line) in lines.iter().enumerate() {
        match line_svg(idx, line, &rgba, options) {
            Ok(Some(fragment)) => svg.push_str(&fragment),
            Ok(None) => debug!("overlay line {} has no text; skipped", idx),
            Err(err) => warn!("overlay line {} skipped: {:#}", idx, err),
        }
    }

    svg.push_str("</svg>");
    Ok(svg)
}

fn line_svg(
    idx: usize,
    line: &OverlayLine,
    image: &RgbaImage,
    options: &OverlayOptions,
) -> Result<Option<String>> {
    let rect = Rect::from_quad(&line.bbox).ok_or_else(|| anyhow!("malformed bounding box"))?;
    let text = line.text.trim();
    if text.is_empty() && !options.boxes_only {
        return Ok(None);
    }
    let text_box = TextBox::from_rect(&rect);
    let palette = classify_background(image, &text_box);

    let mut out = String::new();
    write!(
        out,
        r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" fill="{fill}" fill-opacity="{opacity}" stroke="{stroke}" stroke-opacity="0.6" stroke-width="1"/>"#,
        x = text_box.x,
        y = text_box.y,
        w = text_box.w,
        h = text_box.h,
        fill = palette.fill(),
        opacity = palette.fill_opacity(),
        stroke = palette.text(),
    )?;
    if options.boxes_only {
        return Ok(Some(out));
    }

    let metrics = options.font.as_ref().map(|font| &font.metrics);
    let fitted = fit_text(text, &text_box, options.min_font_size, metrics);
    if fitted.lines.is_empty() {
        return Ok(None);
    }
    let family = options
        .font
        .as_ref()
        .map(|font| font.family.as_str())
        .unwrap_or("sans-serif");

    let clip_id = format!("clip-{}", idx);
    write!(
        out,
        r#"<clipPath id="{id}"><rect x="{x}" y="{y}" width="{w}" height="{h}"/></clipPath>"#,
        id = clip_id,
        x = text_box.x,
        y = text_box.y,
        w = text_box.w,
        h = text_box.h
    )?;
    write!(
        out,
        r#"<g font-size="{size}" font-family="{family}" clip-path="url(#{clip})">"#,
        size = fitted.font_size,
        family = escape_xml(family),
        clip = clip_id
    )?;

    let origin_x = (text_box.x + text_box.padding) as f32;
    let origin_y = (text_box.y + text_box.padding) as f32 + fitted.font_size;
    let step = fitted.line_step();
    let outline_width = (fitted.font_size * 0.06).max(1.0);
    for (dx, dy) in OUTLINE_OFFSETS {
        out.push_str(&text_element(
            origin_x + dx * outline_width,
            origin_y + dy * outline_width,
            step,
            palette.outline(),
            &fitted.lines,
        ));
    }
    out.push_str(&text_element(origin_x, origin_y, step, palette.text(), &fitted.lines));
    out.push_str("</g>");
    Ok(Some(out))
}

fn text_element(x: f32, y: f32, step: f32, color: &str, lines: &[String]) -> String {
    let mut element = format!(r#"<text x="{x}" y="{y}" fill="{color}">"#);
    for (idx, line) in lines.iter().enumerate() {
        let escaped = escape_xml(line);
        if idx == 0 {
            element.push_str(&format!(r#"<tspan x="{x}">{escaped}</tspan>"#));
        } else {
            element.push_str(&format!(r#"<tspan x="{x}" dy="{step}">{escaped}</tspan>"#));
        }
    }
    element.push_str("</text>");
    element
}

fn rasterize_png(svg: &str, font_data: Option<&[u8]>) -> Result<Vec<u8>> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    if let Some(data) = font_data {
        db.load_font_data(data.to_vec());
    }
    let options = Options {
        fontdb: Arc::new(db),
        ..Options::default()
    };
    let tree = Tree::from_str(svg, &options).with_context(|| "failed to parse SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty SVG size"))?;
    let mut pixmap_mut = pixmap.as_mut();
    render(&tree, tiny_skia::Transform::identity(), &mut pixmap_mut);
    let image = RgbaImage::from_raw(size.width(), size.height(), pixmap.data().to_vec())
        .ok_or_else(|| anyhow!("failed to build image buffer from SVG"))?;
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .with_context(|| "failed to encode overlay image")?;
    Ok(bytes)
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
