use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::DynamicImage;
use tracing::info;

use super::models::{OcrRequest, OcrResponse, SegmentPayload, TranslateRequest, TranslateResponse};
use super::state::ServerState;
use crate::service::{NO_TEXT_DETECTED, OcrOptions, TranslationOutcome};

#[derive(Debug)]
pub(crate) struct ServerError {
    pub(crate) status: StatusCode,
    pub(crate) message: String,
}

impl ServerError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::internal(format!("{:#}", err))
    }
}

/// Accepts plain base64 or a `data:image/...;base64,` URL.
pub(crate) fn decode_image_payload(payload: &str) -> Result<DynamicImage, ServerError> {
    let payload = payload.trim();
    let encoded = if payload.starts_with("data:image") {
        payload
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| ServerError::bad_request("malformed data URL"))?
    } else {
        payload
    };
    if encoded.is_empty() {
        return Err(ServerError::bad_request("No image provided"));
    }
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|err| ServerError::bad_request(format!("invalid base64 image: {}", err)))?;
    image::load_from_memory(&bytes)
        .map_err(|err| ServerError::bad_request(format!("failed to decode image: {}", err)))
}

pub(crate) async fn ocr_request(
    state: &ServerState,
    request: OcrRequest,
) -> Result<OcrResponse, ServerError> {
    let payload = request
        .image
        .as_deref()
        .ok_or_else(|| ServerError::bad_request("No image provided"))?;
    info!("image payload length: {}", payload.len());
    let image = decode_image_payload(payload)?;

    let options = OcrOptions {
        target_lang: request.target_lang,
        return_overlay: request.return_overlay,
        boxes_only: request.overlay_boxes_only,
        include_segments: request.include_segment_data,
    };
    let outcome = state.service.process(image, &options).await?;
    let Some(best) = outcome.report.best.as_ref() else {
        return Ok(OcrResponse {
            text: NO_TEXT_DETECTED.to_string(),
            ..OcrResponse::default()
        });
    };

    let (translated_text, translation_note) = match &outcome.translation {
        Some(TranslationOutcome::Translated(text)) => (Some(Some(text.clone())), None),
        Some(TranslationOutcome::Failed { note }) => (Some(None), Some(note.clone())),
        None => (None, None),
    };
    let annotated_image = outcome
        .overlay_png
        .as_ref()
        .map(|png| format!("data:image/png;base64,{}", BASE64.encode(png)));
    let translating = outcome.translation.is_some();
    let segments = options.include_segments.then(|| {
        outcome
            .report
            .lines
            .iter()
            .zip(&outcome.overlay_texts)
            .map(|(line, overlay_text)| SegmentPayload {
                text: line.text.clone(),
                translated: overlay_text.clone().filter(|_| translating),
                confidence: line.confidence,
                bbox: line.bbox,
            })
            .collect()
    });

    Ok(OcrResponse {
        text: best.text.clone(),
        confidence: Some(best.confidence),
        engine: Some(best.engine.clone()),
        mode: Some(best.config.clone()),
        translated_text,
        translation_note,
        annotated_image,
        segments,
    })
}

pub(crate) async fn translate_request(
    state: &ServerState,
    request: TranslateRequest,
) -> Result<TranslateResponse, ServerError> {
    let text = request
        .text
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| ServerError::bad_request("text is required"))?;
    let target_lang = request
        .target_lang
        .filter(|lang| !lang.trim().is_empty())
        .ok_or_else(|| ServerError::bad_request("target_lang is required"))?;
    let translated = state.service.translate(&text, &target_lang).await?;
    Ok(TranslateResponse { translated })
}
