use crate::ocr::Detection;

const WORD_LEVEL: i32 = 5;

/// Word rows of a tesseract TSV report as detections.
///
/// Rows with a negative confidence (layout-only rows) or empty text are
/// skipped; confidence is rescaled from 0..100 to 0..1.
pub(super) fn parse_tsv_words(tsv: &str) -> Vec<Detection> {
    let mut detections = Vec::new();

    for (idx, row) in tsv.lines().enumerate() {
        if idx == 0 {
            continue;
        }
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 12 {
            continue;
        }
        let level: i32 = cols[0].parse().unwrap_or(0);
        if level != WORD_LEVEL {
            continue;
        }
        let left: f64 = cols[6].parse().unwrap_or(0.0);
        let top: f64 = cols[7].parse().unwrap_or(0.0);
        let width: f64 = cols[8].parse().unwrap_or(0.0);
        let height: f64 = cols[9].parse().unwrap_or(0.0);
        let conf: f64 = cols[10].trim().parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if text.is_empty() || conf < 0.0 {
            continue;
        }

        detections.push(Detection {
            bbox: [
                [left, top],
                [left + width, top],
                [left + width, top + height],
                [left, top + height],
            ],
            text: text.to_string(),
            confidence: (conf / 100.0).clamp(0.0, 1.0),
        });
    }

    detections
}
