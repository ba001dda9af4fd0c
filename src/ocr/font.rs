use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{info, warn};
use ttf_parser::{Face, name_id};
use usvg::fontdb;

use super::text::is_cjk;

const CJK_FAMILIES: &[&str] = &[
    "Noto Sans CJK SC",
    "Source Han Sans SC",
    "PingFang SC",
    "Microsoft YaHei",
    "sans-serif",
];

const LATIN_FAMILIES: &[&str] = &[
    "Noto Sans",
    "DejaVu Sans",
    "Liberation Sans",
    "Helvetica",
    "Arial",
    "sans-serif",
];

/// The writing system an overlay font has to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WritingSystem {
    Latin,
    /// Any CJK character at all: CJK faces also carry Latin glyphs, the
    /// reverse is rarely true.
    Cjk,
}

impl WritingSystem {
    pub fn of(text: &str) -> Self {
        if text.chars().any(is_cjk) {
            Self::Cjk
        } else {
            Self::Latin
        }
    }

    /// System families tried in order when the configured one is missing.
    pub fn fallback_families(self) -> &'static [&'static str] {
        match self {
            Self::Latin => LATIN_FAMILIES,
            Self::Cjk => CJK_FAMILIES,
        }
    }
}

/// Advance widths of one parsed face, plus the bytes handed to the rasterizer.
#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    face_index: u32,
    units_per_em: u16,
    space_advance: u16,
    family: Option<String>,
}

impl FontMetrics {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn advance_units(&self, text: &str) -> Option<u32> {
        let face = Face::parse(&self.data, self.face_index).ok()?;
        let advance = text
            .chars()
            .filter(|ch| *ch != '\n')
            .map(|ch| match ch {
                ' ' => self.space_advance,
                _ => face
                    .glyph_index(ch)
                    .and_then(|glyph| face.glyph_hor_advance(glyph))
                    .unwrap_or(self.space_advance),
            })
            .fold(0u32, |sum, units| sum.saturating_add(units as u32));
        Some(advance)
    }
}

#[derive(Clone)]
pub struct ResolvedOverlayFont {
    pub metrics: FontMetrics,
    pub family: String,
}

/// Overlay fonts per writing system, resolved from the system font database
/// on first use and cached for the life of the service.
///
/// An explicit font file wins for every text.
pub struct OverlayFonts {
    explicit: Option<ResolvedOverlayFont>,
    family: Option<String>,
    db: OnceLock<fontdb::Database>,
    resolved: Mutex<HashMap<WritingSystem, Option<ResolvedOverlayFont>>>,
}

impl OverlayFonts {
    /// Fails only when `font_path` is given and cannot be loaded.
    pub fn new(font_path: Option<&Path>, font_family: Option<&str>) -> Result<Self> {
        let explicit = match font_path {
            Some(path) => {
                let metrics = load_font_file(path)?;
                let family = metrics
                    .family()
                    .or(font_family)
                    .unwrap_or("sans-serif")
                    .to_string();
                info!("overlay font file {} ({})", path.display(), family);
                Some(ResolvedOverlayFont { metrics, family })
            }
            None => None,
        };
        Ok(Self {
            explicit,
            family: font_family
                .map(str::trim)
                .filter(|family| !family.is_empty())
                .map(str::to_string),
            db: OnceLock::new(),
            resolved: Mutex::new(HashMap::new()),
        })
    }

    /// Font for painting `text`, or `None` to fall back to width estimates.
    ///
    /// Blocks while the system font database loads on first use.
    pub fn for_text(&self, text: &str) -> Option<ResolvedOverlayFont> {
        if let Some(font) = &self.explicit {
            return Some(font.clone());
        }
        let script = WritingSystem::of(text);
        let mut resolved = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
        resolved
            .entry(script)
            .or_insert_with(|| match self.resolve(script) {
                Ok(font) => {
                    info!("overlay font for {:?} text: {}", script, font.family);
                    Some(font)
                }
                Err(err) => {
                    warn!("no {:?} overlay font; using estimates: {:#}", script, err);
                    None
                }
            })
            .clone()
    }

    fn resolve(&self, script: WritingSystem) -> Result<ResolvedOverlayFont> {
        let db = self.db.get_or_init(|| {
            let mut db = fontdb::Database::new();
            db.load_system_fonts();
            db
        });
        self.family
            .as_deref()
            .into_iter()
            .chain(script.fallback_families().iter().copied())
            .find_map(|family| query_family(db, family).ok())
            .ok_or_else(|| anyhow!("none of the {:?} font families is installed", script))
    }
}

/// Rendered width of `text`; estimated per character when no font is loaded.
pub(crate) fn measure_text_width_px(text: &str, font_size: f32, font: Option<&FontMetrics>) -> f32 {
    match font.and_then(|font| Some((font, font.advance_units(text)?))) {
        Some((font, units)) => units as f32 * font_size / font.units_per_em.max(1) as f32,
        None => {
            let em = text
                .chars()
                .filter(|ch| *ch != '\n')
                .map(estimate_char_units)
                .sum::<f32>();
            em * font_size
        }
    }
}

fn estimate_char_units(ch: char) -> f32 {
    match ch {
        ch if ch.is_whitespace() => 0.25,
        ch if ch.is_ascii_alphanumeric() => 0.55,
        ch if ch.is_ascii() => 0.35,
        ch if is_cjk(ch) => 1.0,
        _ => 0.9,
    }
}

fn load_font_file(path: &Path) -> Result<FontMetrics> {
    let data =
        std::fs::read(path).with_context(|| format!("failed to read font: {}", path.display()))?;
    parse_metrics(data, None).with_context(|| format!("failed to parse font: {}", path.display()))
}

/// Picks the face named `preferred` out of a collection, else its first face.
fn parse_metrics(data: Vec<u8>, preferred: Option<&str>) -> Result<FontMetrics> {
    let data = Arc::new(data);
    let count = ttf_parser::fonts_in_collection(&data).unwrap_or(1);
    let faces = (0..count)
        .filter_map(|index| {
            let face = Face::parse(&data, index).ok()?;
            let units_per_em = face.units_per_em().max(1);
            Some(FontMetrics {
                data: data.clone(),
                face_index: index,
                units_per_em,
                space_advance: face
                    .glyph_index(' ')
                    .and_then(|glyph| face.glyph_hor_advance(glyph))
                    .unwrap_or(units_per_em / 2),
                family: family_name(&face),
            })
        })
        .collect::<Vec<_>>();
    let wanted = preferred.and_then(|preferred| {
        faces.iter().position(|metrics| {
            metrics
                .family()
                .is_some_and(|family| family.eq_ignore_ascii_case(preferred))
        })
    });
    faces
        .into_iter()
        .nth(wanted.unwrap_or(0))
        .ok_or_else(|| anyhow!("no usable face in font data"))
}

fn query_family(db: &fontdb::Database, family: &str) -> Result<ResolvedOverlayFont> {
    let families = [if family.eq_ignore_ascii_case("sans-serif") {
        fontdb::Family::SansSerif
    } else {
        fontdb::Family::Name(family)
    }];
    let id = db
        .query(&fontdb::Query {
            families: &families,
            ..Default::default()
        })
        .ok_or_else(|| anyhow!("font not found: {}", family))?;
    let data = db
        .with_face_data(id, |data, _| data.to_vec())
        .ok_or_else(|| anyhow!("failed to load font data: {}", family))?;
    let metrics = parse_metrics(data, Some(family))?;
    let family = metrics.family().unwrap_or(family).to_string();
    Ok(ResolvedOverlayFont { metrics, family })
}

/// Typographic family when present, else the legacy family name.
fn family_name(face: &Face<'_>) -> Option<String> {
    let named = |id| {
        face.names()
            .into_iter()
            .filter(|name| name.name_id == id)
            .find_map(|name| name.to_string())
    };
    named(name_id::TYPOGRAPHIC_FAMILY).or_else(|| named(name_id::FAMILY))
}
