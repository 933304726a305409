// Overlay pipeline: detect (color + grayscale) -> fuse -> translate -> render

use anyhow::{Context, Result};
use image::{DynamicImage, RgbaImage};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::core::config::{Config, CredentialSource};
use crate::core::errors::{PassContext, PipelineError, PipelineResult};
use crate::core::types::{DetectParams, FusedRegion, StageTimings, TextRegion};
use crate::services::credentials::{CredentialStore, EnvCredentialStore, KeyringStore};
use crate::services::detection::{OnnxTextDetector, TextDetector};
use crate::services::fusion::RegionFuser;
use crate::services::rendering::{CosmicTextEngine, OverlayRenderer};
use crate::services::translation::Translator;
use crate::utils::{grayscale, Metrics, Stage};

/// Result of one run
#[derive(Debug)]
pub struct PipelineOutput {
    pub image: RgbaImage,
    pub regions: Vec<FusedRegion>,
    pub translations: Vec<String>,
    pub timings: StageTimings,
}

/// Owns every stage. Runs are sequential: `run` takes `&mut self` because
/// the translator's cache is updated in place.
pub struct OverlayPipeline {
    detector: Arc<dyn TextDetector>,
    fuser: RegionFuser,
    translator: Translator,
    renderer: Arc<OverlayRenderer>,
    params: DetectParams,
    target_lang: String,
    metrics: Option<Metrics>,
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

impl OverlayPipeline {
    pub fn new(
        detector: Arc<dyn TextDetector>,
        fuser: RegionFuser,
        translator: Translator,
        renderer: Arc<OverlayRenderer>,
    ) -> Self {
        Self {
            detector,
            fuser,
            translator,
            renderer,
            params: DetectParams::default(),
            target_lang: "EN-US".to_string(),
            metrics: None,
        }
    }

    pub fn from_config(
        config: &Config,
        detector: Arc<dyn TextDetector>,
        translator: Translator,
        renderer: Arc<OverlayRenderer>,
    ) -> Self {
        Self::new(detector, RegionFuser::new(&config.fusion), translator, renderer)
            .with_params(config.detect_params())
            .with_target_lang(config.target_lang())
    }

    /// Load models, fonts and the translation credential. Fails if any
    /// model artifact is missing or no font can be loaded.
    pub fn load(config: &Config, metrics: Option<Metrics>) -> Result<Self> {
        info!("Loading detection models...");
        let detector = Arc::new(
            OnnxTextDetector::new(&config.detection)
                .context("Failed to initialize text detector")?,
        );

        let engine = Arc::new(
            CosmicTextEngine::new(&config.rendering).context("Failed to initialize text engine")?,
        );
        let renderer = Arc::new(OverlayRenderer::new(engine, &config.rendering));

        let store: Box<dyn CredentialStore> = match config.translation.credential_source {
            CredentialSource::Keyring => Box::new(KeyringStore::default()),
            CredentialSource::Env => Box::new(EnvCredentialStore),
        };
        let translator =
            Translator::from_credentials(store.as_ref(), &config.translation, metrics.clone())
                .context("Failed to initialize translator")?;
        if translator.is_pass_through() {
            warn!("Running without a translation backend");
        }

        let pipeline = Self::from_config(config, detector, translator, renderer);
        Ok(match metrics {
            Some(m) => pipeline.with_metrics(m),
            None => pipeline,
        })
    }

    pub fn with_params(mut self, params: DetectParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_target_lang(mut self, target_lang: impl Into<String>) -> Self {
        self.target_lang = target_lang.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn target_lang(&self) -> &str {
        &self.target_lang
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    /// Run once into the default target language
    pub async fn run(&mut self, image: RgbaImage) -> PipelineResult<PipelineOutput> {
        let target_lang = self.target_lang.clone();
        self.run_for(image, &target_lang).await
    }

    /// Run once. Any detector failure fails the whole run; translation
    /// failures degrade to the source text instead.
    #[instrument(skip(self, image), fields(w = image.width(), h = image.height()))]
    pub async fn run_for(
        &mut self,
        image: RgbaImage,
        target_lang: &str,
    ) -> PipelineResult<PipelineOutput> {
        let result = self.execute(image, target_lang).await;
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(output) => metrics.record_run(true, output.regions.len()),
                Err(_) => metrics.record_run(false, 0),
            }
        }
        result
    }

    async fn execute(
        &mut self,
        image: RgbaImage,
        target_lang: &str,
    ) -> PipelineResult<PipelineOutput> {
        let total_start = Instant::now();
        let mut timings = StageTimings::default();

        // Detect: color pass then grayscale pass, on a blocking thread
        let stage_start = Instant::now();
        let (image, pass_a, pass_b) = self.detect_both(image).await?;
        timings.detect_ms = elapsed_ms(stage_start);
        self.record_stage(Stage::Detect, stage_start);

        // Fuse
        let stage_start = Instant::now();
        let (count_a, count_b) = (pass_a.len(), pass_b.len());
        let regions = self.fuser.fuse(pass_a, pass_b);
        timings.fuse_ms = elapsed_ms(stage_start);
        self.record_stage(Stage::Fuse, stage_start);

        // Translate
        let stage_start = Instant::now();
        let sources: Vec<String> = regions.iter().map(|r| r.text().to_string()).collect();
        let translations = self.translator.translate_many(&sources, target_lang).await;
        timings.translate_ms = elapsed_ms(stage_start);
        self.record_stage(Stage::Translate, stage_start);

        // Render
        let stage_start = Instant::now();
        let renderer = Arc::clone(&self.renderer);
        let (image, regions, translations) = tokio::task::spawn_blocking(move || {
            let rendered = renderer.render(&image, &regions, &translations);
            (rendered, regions, translations)
        })
        .await
        .map_err(|e| PipelineError::TaskJoinFailed(e.to_string()))?;
        timings.render_ms = elapsed_ms(stage_start);
        self.record_stage(Stage::Render, stage_start);

        timings.total_ms = elapsed_ms(total_start);
        info!(
            "Overlay run: {} + {} detections -> {} regions ({}) in {:.2}ms \
             [detect {:.2}ms, fuse {:.2}ms, translate {:.2}ms, render {:.2}ms]",
            count_a,
            count_b,
            regions.len(),
            target_lang,
            timings.total_ms,
            timings.detect_ms,
            timings.fuse_ms,
            timings.translate_ms,
            timings.render_ms
        );

        Ok(PipelineOutput {
            image,
            regions,
            translations,
            timings,
        })
    }

    /// Hands the image back together with both passes' regions
    async fn detect_both(
        &self,
        image: RgbaImage,
    ) -> PipelineResult<(RgbaImage, Vec<TextRegion>, Vec<TextRegion>)> {
        let detector = Arc::clone(&self.detector);
        let params = self.params.clone();

        let (image, passes) = tokio::task::spawn_blocking(move || {
            let gray = grayscale(&image);
            let color = DynamicImage::ImageRgba8(image);
            let passes = detector
                .detect(&color, &params)
                .in_pass("color")
                .and_then(|a| {
                    let b = detector.detect(&gray, &params).in_pass("grayscale")?;
                    Ok((a, b))
                });
            (color.into_rgba8(), passes)
        })
        .await
        .map_err(|e| PipelineError::TaskJoinFailed(e.to_string()))?;

        let (pass_a, pass_b) = passes?;
        Ok((image, pass_a, pass_b))
    }

    fn record_stage(&self, stage: Stage, start: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_stage(stage, start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Decoder;
    use crate::services::translation::TranslationCache;
    use crate::testing::{BlockTextEngine, RecordingBackend, ScriptedDetector};
    use image::Rgba;

    const GRAY: Rgba<u8> = Rgba([128, 128, 128, 255]);

    fn pipeline(detector: Arc<ScriptedDetector>, backend: Arc<RecordingBackend>) -> OverlayPipeline {
        let engine = Arc::new(BlockTextEngine::new(&["Noto Sans JP"]));
        OverlayPipeline::new(
            detector,
            RegionFuser::default(),
            Translator::new(backend, TranslationCache::unbounded()),
            Arc::new(OverlayRenderer::with_defaults(engine)),
        )
    }

    fn two_pass_detector() -> ScriptedDetector {
        ScriptedDetector::new(
            vec![TextRegion::from_box([20.0, 20.0, 120.0, 60.0], "hi", 0.6)],
            vec![TextRegion::from_box([22.0, 20.0, 120.0, 60.0], "hello", 0.8)],
        )
    }

    #[tokio::test]
    async fn test_end_to_end_single_overlapping_region() {
        let detector = Arc::new(two_pass_detector());
        let backend = Arc::new(RecordingBackend::suffix("'"));
        let mut pipeline = pipeline(detector.clone(), backend.clone());

        let input = RgbaImage::from_pixel(200, 100, GRAY);
        let output = pipeline.run(input).await.unwrap();

        // Grayscale pass wins the overlap on confidence
        assert_eq!(output.regions.len(), 1);
        assert_eq!(output.regions[0].text(), "hello");
        assert_eq!(output.translations, vec!["hello'".to_string()]);
        assert_eq!(backend.calls(), vec![vec!["hello".to_string()]]);

        let img = &output.image;
        assert_eq!(img.dimensions(), (200, 100));
        // Outside the region: untouched
        assert_eq!(*img.get_pixel(5, 5), GRAY);
        // Inside the region, away from text: darkened by the mask
        let masked = img.get_pixel(23, 21);
        assert!(masked[0] < 128 && masked[0] == masked[1] && masked[1] == masked[2]);
        // Center of the region: white text
        assert_eq!(*img.get_pixel(71, 40), Rgba([255, 255, 255, 255]));
    }

    #[tokio::test]
    async fn test_detector_failure_fails_run() {
        let detector = Arc::new(ScriptedDetector::failing());
        let backend = Arc::new(RecordingBackend::suffix("'"));
        let mut pipeline = pipeline(detector, backend.clone());

        let err = pipeline
            .run(RgbaImage::from_pixel(10, 10, GRAY))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DetectionFailed { pass: "color", .. }
        ));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_both_passes_receive_same_params_and_size() {
        let detector = Arc::new(two_pass_detector());
        let backend = Arc::new(RecordingBackend::suffix("'"));
        let mut pipeline = pipeline(detector.clone(), backend);

        pipeline
            .run(RgbaImage::from_pixel(64, 32, GRAY))
            .await
            .unwrap();

        let calls = detector.calls();
        assert_eq!(calls.len(), 2);
        for (w, h, params) in calls {
            assert_eq!((w, h), (64, 32));
            assert_eq!(params.decoder, Decoder::Greedy);
            assert_eq!(params.confidence_threshold, 0.5);
            assert_eq!(params.batch_size, 16);
        }
    }

    #[tokio::test]
    async fn test_no_regions_returns_unchanged_copy() {
        let detector = Arc::new(ScriptedDetector::new(Vec::new(), Vec::new()));
        let backend = Arc::new(RecordingBackend::suffix("'"));
        let mut pipeline = pipeline(detector, backend.clone());

        let input = RgbaImage::from_pixel(16, 16, GRAY);
        let output = pipeline.run(input.clone()).await.unwrap();
        assert!(output.regions.is_empty());
        assert_eq!(output.image, input);
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_repeat_run_served_from_cache() {
        let backend = Arc::new(RecordingBackend::suffix("'"));
        let mut pipeline = pipeline(Arc::new(two_pass_detector()), backend.clone());
        let metrics = Metrics::new();
        pipeline = pipeline.with_metrics(metrics.clone());

        pipeline.run(RgbaImage::from_pixel(200, 100, GRAY)).await.unwrap();
        pipeline.run(RgbaImage::from_pixel(200, 100, GRAY)).await.unwrap();

        assert_eq!(backend.call_count(), 1);
        assert_eq!(pipeline.translator().cache().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_translation_keeps_source_text() {
        let backend = Arc::new(RecordingBackend::failing());
        let mut pipeline = pipeline(Arc::new(two_pass_detector()), backend);

        let output = pipeline
            .run(RgbaImage::from_pixel(200, 100, GRAY))
            .await
            .unwrap();
        assert_eq!(output.translations, vec!["hello".to_string()]);
        assert!(pipeline.translator().cache().is_empty());
    }
}
