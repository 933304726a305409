pub mod recognizer;
pub mod session;

use image::{imageops::FilterType, DynamicImage};
use ndarray::{arr2, Array2, Array4};
use ort::{session::Session, value::Value};
use parking_lot::Mutex;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, instrument, trace};

use crate::core::config::DetectionConfig;
use crate::core::errors::{DetectionError, DetectionResult};
use crate::core::types::{DetectParams, TextRegion};

pub use recognizer::CtcRecognizer;

/// Finds text in an image. Implementations are synchronous and may be slow;
/// callers run them on a blocking thread.
pub trait TextDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage, params: &DetectParams)
        -> DetectionResult<Vec<TextRegion>>;
}

/// Keep boxes scoring at least `threshold`, clamped to the image and in
/// reading order (top to bottom, then left to right). Degenerate boxes are
/// dropped.
pub fn select_boxes(
    boxes: &[f32],
    scores: &[f32],
    threshold: f32,
    width: u32,
    height: u32,
) -> Vec<[f32; 4]> {
    let (w, h) = (width as f32, height as f32);
    let mut kept: Vec<[f32; 4]> = boxes
        .chunks_exact(4)
        .zip(scores)
        .filter(|&(_, &score)| score >= threshold)
        .map(|(b, _)| {
            [
                b[0].clamp(0.0, w),
                b[1].clamp(0.0, h),
                b[2].clamp(0.0, w),
                b[3].clamp(0.0, h),
            ]
        })
        .filter(|b| b[2] - b[0] >= 1.0 && b[3] - b[1] >= 1.0)
        .collect();

    kept.sort_by(|a, b| a[1].total_cmp(&b[1]).then(a[0].total_cmp(&b[0])));
    kept
}

/// Two-stage ONNX detector: a box regressor proposes text lines, a CTC
/// recognizer reads each crop.
pub struct OnnxTextDetector {
    session: Mutex<Session>,
    recognizer: CtcRecognizer,
    target_size: u32,
    device: String,
}

impl OnnxTextDetector {
    /// Loads both models. Any missing artifact is an error here, before the
    /// first run is accepted.
    pub fn new(config: &DetectionConfig) -> DetectionResult<Self> {
        let backend = config.inference_backend.as_deref();
        let (device, session) =
            session::build_session(Path::new(&config.detector_model_path), "detector", backend)?;
        let recognizer = CtcRecognizer::new(
            Path::new(&config.recognizer_model_path),
            Path::new(&config.recognizer_vocab_path),
            backend,
        )?;

        info!("Text detector ready on {} (input {}px)", device, config.target_size);
        Ok(Self {
            session: Mutex::new(session),
            recognizer,
            target_size: config.target_size,
            device,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    fn preprocess(&self, image: &DynamicImage) -> (Array4<f32>, Array2<i64>) {
        let target = self.target_size;
        let original_size = arr2(&[[image.width() as i64, image.height() as i64]]);

        let rgb = image
            .resize_exact(target, target, FilterType::Triangle)
            .to_rgb8();

        let mut tensor = Array4::<f32>::zeros((1, 3, target as usize, target as usize));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }
        (tensor, original_size)
    }

    fn propose(&self, image: &DynamicImage, threshold: f32) -> DetectionResult<Vec<[f32; 4]>> {
        let (tensor, original_size) = self.preprocess(image);
        let images_value = Value::from_array(tensor)?;
        let sizes_value = Value::from_array(original_size)?;

        let (boxes, scores) = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![
                "images" => images_value,
                "orig_target_sizes" => sizes_value
            ])?;
            let (_, boxes) = outputs["boxes"].try_extract_tensor::<f32>()?;
            let (_, scores) = outputs["scores"].try_extract_tensor::<f32>()?;
            (boxes.to_vec(), scores.to_vec())
        };

        if boxes.len() != scores.len() * 4 {
            return Err(DetectionError::InvalidOutput(format!(
                "{} box coordinates for {} scores",
                boxes.len(),
                scores.len()
            )));
        }
        trace!("Detector proposed {} raw boxes", scores.len());
        Ok(select_boxes(&boxes, &scores, threshold, image.width(), image.height()))
    }
}

impl TextDetector for OnnxTextDetector {
    #[instrument(skip_all, fields(w = image.width(), h = image.height()))]
    fn detect(&self, image: &DynamicImage, params: &DetectParams) -> DetectionResult<Vec<TextRegion>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectionError::InvalidImageSize {
                width: image.width(),
                height: image.height(),
            });
        }

        let start = Instant::now();
        let boxes = self.propose(image, params.confidence_threshold)?;

        let crops: Vec<DynamicImage> = boxes
            .iter()
            .map(|b| {
                let x = b[0] as u32;
                let y = b[1] as u32;
                let w = ((b[2] - b[0]) as u32).max(1);
                let h = ((b[3] - b[1]) as u32).max(1);
                image.crop_imm(x, y, w, h)
            })
            .collect();

        let lines = self
            .recognizer
            .recognize(&crops, params.batch_size, params.decoder)?;

        let regions: Vec<TextRegion> = boxes
            .into_iter()
            .zip(lines)
            .map(|(bbox, (text, confidence))| TextRegion::from_box(bbox, text, confidence))
            .collect();

        debug!(
            "Detected {} text regions in {:.1}ms",
            regions.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(regions)
    }
}
