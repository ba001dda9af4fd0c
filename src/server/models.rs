use serde::{Deserialize, Serialize};

use crate::ocr::Quad;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct OcrRequest {
    pub(crate) image: Option<String>,
    pub(crate) target_lang: Option<String>,
    pub(crate) return_overlay: bool,
    pub(crate) overlay_boxes_only: bool,
    pub(crate) include_segment_data: bool,
}

#[derive(Debug, Serialize, Default)]
pub(crate) struct OcrResponse {
    pub(crate) text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) mode: Option<String>,
    /// `Some(None)` serializes as `null`: translation was requested and failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) translated_text: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) translation_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) annotated_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) segments: Option<Vec<SegmentPayload>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SegmentPayload {
    pub(crate) text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) translated: Option<String>,
    pub(crate) confidence: f64,
    pub(crate) bbox: Quad,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct TranslateRequest {
    pub(crate) text: Option<String>,
    pub(crate) target_lang: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TranslateResponse {
    pub(crate) translated: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusResponse {
    pub(crate) status: &'static str,
    pub(crate) message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) engine_ready: Option<bool>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}
