use anyhow::{Context, Result};
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::engine::EngineHandle;
use super::preprocess::{invert, preprocess_variants, resize_to_max_width};
use super::select::{select_best, short_circuits};
use super::{Candidate, CoordinateSpace, Line, Segment, merge_segments, segments_from_detections};
use crate::settings::OcrSettings;

/// Outcome of every pass run for one image.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// `None` is the "no text detected" result.
    pub best: Option<Candidate>,
    pub score: Option<f64>,
    pub short_circuited: bool,
    pub passes: Vec<String>,
    pub candidates: Vec<Candidate>,
    /// Reading-order lines in source-image coordinates, for the overlay.
    pub lines: Vec<Line>,
}

/// Runs recognition passes in sequence over one shared engine.
#[derive(Clone)]
pub struct OcrPipeline {
    engine: EngineHandle,
    settings: OcrSettings,
}

struct Pass {
    label: String,
    image: Arc<DynamicImage>,
    space: CoordinateSpace,
    deadline: Duration,
}

impl OcrPipeline {
    pub fn new(engine: EngineHandle, settings: OcrSettings) -> Self {
        Self { engine, settings }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub async fn run(&self, image: DynamicImage) -> Result<PipelineReport> {
        let engine_label = self.engine.label().await?;
        info!(
            "running OCR on {}x{} image with {}",
            image.width(),
            image.height(),
            engine_label
        );

        let mut passes = Vec::new();
        let mut candidates = Vec::new();
        let early = self
            .run_passes(Arc::new(image), &engine_label, &mut passes, &mut candidates)
            .await;
        self.engine.release(self.settings.pass_timeout).await;
        let early = early?;

        let short_circuited = early.is_some();
        let (best, score) = match early {
            Some(candidate) => {
                info!(
                    "short-circuit on {} conf={:.3}",
                    candidate.config, candidate.confidence
                );
                (Some(candidate), None)
            }
            None => match select_best(&candidates, self.settings.min_confidence) {
                Some((candidate, score)) => {
                    info!(
                        "selected {} conf={:.3} score={:.2}",
                        candidate.config, candidate.confidence, score
                    );
                    (Some(candidate), Some(score))
                }
                None => {
                    info!("no candidate above confidence floor");
                    (None, None)
                }
            },
        };

        let lines = match &best {
            Some(best) => merge_segments(&self.overlay_segments(best, &candidates)),
            None => Vec::new(),
        };

        Ok(PipelineReport {
            best,
            score,
            short_circuited,
            passes,
            candidates,
            lines,
        })
    }

    /// Returns the short-circuit winner, if any pass produced one.
    async fn run_passes(
        &self,
        original: Arc<DynamicImage>,
        engine_label: &str,
        passes: &mut Vec<String>,
        candidates: &mut Vec<Candidate>,
    ) -> Result<Option<Candidate>> {
        let settings = &self.settings;

        let first = Pass {
            label: "original".to_string(),
            image: original.clone(),
            space: CoordinateSpace::Original,
            deadline: settings.pass_timeout,
        };
        if let Some(winner) = self.run_unmodified(first, engine_label, passes, candidates).await {
            return Ok(Some(winner));
        }

        let (resized, was_resized) = resize_to_max_width(&original, settings.max_width);
        let base_space = if was_resized {
            CoordinateSpace::Resized
        } else {
            CoordinateSpace::Original
        };
        let resized = Arc::new(resized);
        let second = Pass {
            label: "resized".to_string(),
            image: resized.clone(),
            space: base_space,
            deadline: settings.pass_timeout,
        };
        if let Some(winner) = self.run_unmodified(second, engine_label, passes, candidates).await {
            return Ok(Some(winner));
        }

        let apply_deskew = settings.deskew_when_empty && candidates.is_empty();
        if apply_deskew {
            info!("no text from unmodified passes; enabling deskew for preprocessing");
        }
        let source = resized.clone();
        let variants = tokio::task::spawn_blocking(move || preprocess_variants(&source, apply_deskew))
            .await
            .with_context(|| "preprocessing task failed")?;
        let space = if variants.deskewed {
            CoordinateSpace::Deskewed
        } else {
            base_space
        };
        let deadline = if apply_deskew {
            settings.deskew_timeout
        } else {
            settings.pass_timeout
        };

        let mut queue = Vec::new();
        for name in &settings.preprocess_variants {
            match variants.get(name) {
                Some(gray) => queue.push((format!("preprocess_{}", name), gray.clone())),
                None => warn!("unknown preprocessing variant '{}'", name),
            }
        }
        for name in &settings.inverted_variants {
            match variants.get(name) {
                Some(gray) => queue.push((format!("inverted_preprocess_{}", name), invert(gray))),
                None => warn!("unknown preprocessing variant '{}'", name),
            }
        }
        drop(variants);

        for (label, gray) in queue {
            let pass = Pass {
                label,
                image: Arc::new(DynamicImage::ImageLuma8(gray)),
                space,
                deadline,
            };
            passes.push(pass.label.clone());
            if let Some(candidate) = self.run_pass(pass, engine_label).await {
                candidates.push(candidate);
            }
        }
        Ok(None)
    }

    async fn run_unmodified(
        &self,
        pass: Pass,
        engine_label: &str,
        passes: &mut Vec<String>,
        candidates: &mut Vec<Candidate>,
    ) -> Option<Candidate> {
        passes.push(pass.label.clone());
        let candidate = self.run_pass(pass, engine_label).await?;
        let done = short_circuits(&candidate, self.settings.high_confidence);
        candidates.push(candidate.clone());
        done.then_some(candidate)
    }

    async fn run_pass(&self, pass: Pass, engine_label: &str) -> Option<Candidate> {
        let Pass {
            label,
            image,
            space,
            deadline,
        } = pass;
        info!("pass {} on {}x{}", label, image.width(), image.height());
        let detections = match self.engine.recognize(image, deadline).await {
            Ok(detections) => detections,
            Err(err) => {
                warn!("pass {} failed: {:#}", label, err);
                return None;
            }
        };

        let floor = self.settings.min_confidence;
        for detection in &detections {
            let verdict = if detection.confidence >= floor {
                "kept"
            } else {
                "discarded"
            };
            debug!(
                "[{}] {:?} conf={:.3} {}",
                label, detection.text, detection.confidence, verdict
            );
        }

        let segments = segments_from_detections(&detections, floor);
        let candidate = Candidate::from_segments(segments, label.as_str(), engine_label, space);
        match &candidate {
            Some(candidate) => info!(
                "pass {}: {} detections, conf={:.3}, {} chars",
                label,
                detections.len(),
                candidate.confidence,
                candidate.length
            ),
            None => info!("pass {}: {} detections, no candidate", label, detections.len()),
        }
        candidate
    }

    /// Segments usable on the source image: the winner's when they are in
    /// original coordinates, else those of the best original-space candidate.
    fn overlay_segments(&self, best: &Candidate, candidates: &[Candidate]) -> Vec<Segment> {
        if best.coordinate_space == CoordinateSpace::Original {
            return best.segments.clone();
        }
        let originals = candidates
            .iter()
            .filter(|candidate| candidate.coordinate_space == CoordinateSpace::Original)
            .cloned()
            .collect::<Vec<_>>();
        select_best(&originals, self.settings.min_confidence)
            .map(|(candidate, _)| candidate.segments)
            .unwrap_or_default()
    }
}
