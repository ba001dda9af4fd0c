use super::Quad;

/// Axis-aligned extent of a quad. Width and height never drop below 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Rect {
    pub fn from_quad(quad: &Quad) -> Option<Self> {
        if quad.iter().flatten().any(|value| !value.is_finite()) {
            return None;
        }
        let mut rect = Rect {
            x_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_min: f64::INFINITY,
            y_max: f64::NEG_INFINITY,
        };
        for [x, y] in quad {
            rect.x_min = rect.x_min.min(*x);
            rect.x_max = rect.x_max.max(*x);
            rect.y_min = rect.y_min.min(*y);
            rect.y_max = rect.y_max.max(*y);
        }
        Some(rect)
    }

    pub fn width(&self) -> f64 {
        (self.x_max - self.x_min).max(1.0)
    }

    pub fn height(&self) -> f64 {
        (self.y_max - self.y_min).max(1.0)
    }

    pub fn mid_y(&self) -> f64 {
        (self.y_min + self.y_max) / 2.0
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x_min: self.x_min.min(other.x_min),
            x_max: self.x_max.max(other.x_max),
            y_min: self.y_min.min(other.y_min),
            y_max: self.y_max.max(other.y_max),
        }
    }

    pub fn to_quad(&self) -> Quad {
        [
            [self.x_min, self.y_min],
            [self.x_max, self.y_min],
            [self.x_max, self.y_max],
            [self.x_min, self.y_max],
        ]
    }
}

pub(super) fn horizontal_overlap(a: &Rect, b: &Rect) -> f64 {
    a.x_max.min(b.x_max) - a.x_min.max(b.x_min)
}

pub(super) fn horizontal_overlap_ratio(a: &Rect, b: &Rect) -> f64 {
    let overlap = horizontal_overlap(a, b);
    if overlap <= 0.0 {
        return 0.0;
    }
    overlap / a.width().min(b.width())
}

/// Distance from the bottom of `upper` to the top of `lower`; negative when they overlap.
pub(super) fn vertical_gap(upper: &Rect, lower: &Rect) -> f64 {
    lower.y_min - upper.y_max
}
