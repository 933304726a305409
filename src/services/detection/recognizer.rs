// CTC text-line recognizer: crops in, (text, confidence) out.

use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, trace};

use crate::core::errors::{DetectionError, DetectionResult};
use crate::core::types::Decoder;
use crate::services::detection::session::{build_session, read_artifact};

/// Recognizer input height; width follows the crop's aspect ratio
const TARGET_HEIGHT: u32 = 60;
const MIN_WIDTH: u32 = 16;
/// Horizontal downsampling of the recognizer backbone
const WIDTH_STRIDE: u32 = 4;

/// Parsed `index<TAB>token` vocabulary
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    tokens: HashMap<usize, String>,
    blank: Option<usize>,
}

impl Vocabulary {
    /// `<space>` maps to a space; a `<blank>` entry marks the CTC blank.
    /// Malformed lines are skipped.
    pub fn parse(content: &str) -> Self {
        let mut vocab = Vocabulary::default();
        for line in content.lines() {
            let line = line.trim_end_matches(['\r', '\n']);
            let Some((idx, token)) = line.split_once('\t') else {
                continue;
            };
            let Ok(idx) = idx.trim().parse::<usize>() else {
                continue;
            };
            match token {
                "<blank>" => vocab.blank = Some(idx),
                "<space>" => {
                    vocab.tokens.insert(idx, " ".to_string());
                }
                "" => {}
                other => {
                    vocab.tokens.insert(idx, other.to_string());
                }
            }
        }
        vocab
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Blank index, defaulting to the last class of the model output
    pub fn blank_for(&self, classes: usize) -> usize {
        self.blank.unwrap_or(classes.saturating_sub(1))
    }

    fn token(&self, idx: usize) -> &str {
        self.tokens.get(&idx).map(String::as_str).unwrap_or("")
    }
}

/// Greedy CTC decoding over `steps x classes` log-probabilities: argmax per
/// step, collapse repeats, drop blanks. Confidence is the mean probability of
/// the emitted characters (0 when nothing is emitted).
pub fn ctc_greedy_decode(
    log_probs: &[f32],
    steps: usize,
    classes: usize,
    vocab: &Vocabulary,
) -> (String, f32) {
    let blank = vocab.blank_for(classes);
    let mut text = String::new();
    let mut prob_sum = 0.0f32;
    let mut emitted = 0usize;
    let mut prev: Option<usize> = None;

    for row in log_probs.chunks_exact(classes).take(steps) {
        let (best, best_val) = row
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |acc, (i, v)| if v > acc.1 { (i, v) } else { acc });

        if best != blank && prev != Some(best) {
            text.push_str(vocab.token(best));
            prob_sum += best_val.exp().min(1.0);
            emitted += 1;
        }
        prev = Some(best);
    }

    let confidence = if emitted == 0 { 0.0 } else { prob_sum / emitted as f32 };
    (text, confidence)
}

/// How a `[_, _, classes]` logits tensor is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogitsLayout {
    /// `[batch, steps, classes]`
    BatchFirst { steps: usize, classes: usize },
    /// `[steps, batch, classes]`
    StepsFirst { steps: usize, classes: usize },
}

impl LogitsLayout {
    pub fn detect(dims: &[usize], batch: usize) -> Option<Self> {
        match *dims {
            [b, steps, classes] if b == batch => Some(Self::BatchFirst { steps, classes }),
            [steps, b, classes] if b == batch => Some(Self::StepsFirst { steps, classes }),
            [steps, classes] if batch == 1 => Some(Self::BatchFirst { steps, classes }),
            _ => None,
        }
    }

    pub fn steps(&self) -> usize {
        match *self {
            Self::BatchFirst { steps, .. } | Self::StepsFirst { steps, .. } => steps,
        }
    }

    pub fn classes(&self) -> usize {
        match *self {
            Self::BatchFirst { classes, .. } | Self::StepsFirst { classes, .. } => classes,
        }
    }

    /// Contiguous `steps x classes` rows for one batch item
    pub fn item(&self, logits: &[f32], batch: usize, item: usize) -> Vec<f32> {
        match *self {
            Self::BatchFirst { steps, classes } => {
                let start = item * steps * classes;
                logits[start..start + steps * classes].to_vec()
            }
            Self::StepsFirst { steps, classes } => (0..steps)
                .flat_map(|t| {
                    let start = (t * batch + item) * classes;
                    logits[start..start + classes].iter().copied()
                })
                .collect(),
        }
    }
}

fn resize_line(crop: &DynamicImage) -> RgbImage {
    let (w, h) = (crop.width().max(1), crop.height().max(1));
    let scaled_w = ((w as f32 * TARGET_HEIGHT as f32 / h as f32) as u32).max(MIN_WIDTH);
    crop.resize_exact(scaled_w, TARGET_HEIGHT, FilterType::Triangle)
        .to_rgb8()
}

/// ONNX text-line recognizer (`data` [B,3,60,W] + `seq_lengths` [B])
pub struct CtcRecognizer {
    session: Mutex<Session>,
    vocab: Vocabulary,
}

impl CtcRecognizer {
    pub fn new(model_path: &Path, vocab_path: &Path, backend: Option<&str>) -> DetectionResult<Self> {
        let raw_vocab = read_artifact(vocab_path)?;
        let vocab = Vocabulary::parse(&String::from_utf8_lossy(&raw_vocab));
        if vocab.is_empty() {
            return Err(DetectionError::ModelLoad {
                path: vocab_path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, "empty vocabulary"),
            });
        }

        let (_, session) = build_session(model_path, "recognizer", backend)?;
        debug!("Recognizer vocabulary: {} tokens", vocab.len());

        Ok(Self {
            session: Mutex::new(session),
            vocab,
        })
    }

    /// Recognize `crops` in batches of `batch_size`, preserving order
    pub fn recognize(
        &self,
        crops: &[DynamicImage],
        batch_size: usize,
        decoder: Decoder,
    ) -> DetectionResult<Vec<(String, f32)>> {
        let mut results = Vec::with_capacity(crops.len());
        for batch in crops.chunks(batch_size.max(1)) {
            results.extend(self.recognize_batch(batch, decoder)?);
        }
        Ok(results)
    }

    fn recognize_batch(
        &self,
        crops: &[DynamicImage],
        decoder: Decoder,
    ) -> DetectionResult<Vec<(String, f32)>> {
        let lines: Vec<RgbImage> = crops.par_iter().map(resize_line).collect();
        let max_w = lines.iter().map(|l| l.width()).max().unwrap_or(MIN_WIDTH);
        let batch = lines.len();

        // Right-padded with zeros to the widest line
        let mut tensor =
            Array4::<f32>::zeros((batch, 3, TARGET_HEIGHT as usize, max_w as usize));
        for (b, line) in lines.iter().enumerate() {
            for (x, y, pixel) in line.enumerate_pixels() {
                for c in 0..3 {
                    tensor[[b, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
                }
            }
        }
        let seq_lengths: Vec<i32> = lines
            .iter()
            .map(|l| (l.width() / WIDTH_STRIDE) as i32)
            .collect();

        let data_value = Value::from_array(tensor)?;
        let seq_value = Value::from_array(([batch], seq_lengths.clone()))?;

        let (dims, logits) = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![
                "data" => data_value,
                "seq_lengths" => seq_value
            ])?;

            let output = match outputs.get("output") {
                Some(output) => output,
                None => {
                    let first = outputs.keys().next().ok_or_else(|| {
                        DetectionError::InvalidOutput("recognizer produced no outputs".to_string())
                    })?;
                    &outputs[first]
                }
            };
            let (shape, data) = output.try_extract_tensor::<f32>()?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            (dims, data.to_vec())
        };

        let layout = LogitsLayout::detect(&dims, batch).ok_or_else(|| {
            DetectionError::InvalidOutput(format!(
                "unexpected logits shape {:?} for batch of {}",
                dims, batch
            ))
        })?;
        trace!("Recognizer logits {:?} -> {:?}", dims, layout);

        Ok((0..batch)
            .map(|item| {
                let rows = layout.item(&logits, batch, item);
                let steps = (seq_lengths[item].max(0) as usize).min(layout.steps());
                match decoder {
                    Decoder::Greedy => ctc_greedy_decode(&rows, steps, layout.classes(), &self.vocab),
                }
            })
            .collect())
    }
}
