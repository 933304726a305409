// In-crate fakes for unit tests: scripted detector, recording translation
// backend, block-glyph text engine, in-memory credentials.

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::errors::{DetectionError, DetectionResult, TranslationError, TranslationResult};
use crate::core::types::{DetectParams, TextRegion};
use crate::services::credentials::CredentialStore;
use crate::services::detection::TextDetector;
use crate::services::rendering::{blend_pixel, FontCatalog, TextEngine};
use crate::services::translation::TranslationBackend;

#[derive(Default)]
pub struct MemoryCredentials {
    keys: HashMap<String, String>,
}

impl MemoryCredentials {
    pub fn with_key(provider: &str, key: &str) -> Self {
        let mut keys = HashMap::new();
        keys.insert(provider.to_string(), key.to_string());
        Self { keys }
    }
}

impl CredentialStore for MemoryCredentials {
    fn get_key(&self, provider: &str) -> Option<String> {
        self.keys.get(provider).cloned()
    }
}

enum Reply {
    Suffix(&'static str),
    Fail,
    Truncate,
}

/// Translation backend that records every batch it receives
pub struct RecordingBackend {
    reply: Reply,
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingBackend {
    /// Translates by appending `suffix`
    pub fn suffix(suffix: &'static str) -> Self {
        Self {
            reply: Reply::Suffix(suffix),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Reply::Fail,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers with one translation too few
    pub fn truncating() -> Self {
        Self {
            reply: Reply::Truncate,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TranslationBackend for RecordingBackend {
    async fn translate_batch(
        &self,
        texts: &[String],
        _target_lang: &str,
    ) -> TranslationResult<Vec<String>> {
        self.calls.lock().push(texts.to_vec());
        match self.reply {
            Reply::Suffix(suffix) => Ok(texts.iter().map(|t| format!("{t}{suffix}")).collect()),
            Reply::Fail => Err(TranslationError::ApiStatus {
                status: 503,
                body: "unavailable".to_string(),
            }),
            Reply::Truncate => Ok(texts.iter().skip(1).cloned().collect()),
        }
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Monospace engine: every glyph is a `size/2` x `size` block
pub struct BlockTextEngine {
    families: Vec<String>,
    measure_calls: AtomicUsize,
}

impl BlockTextEngine {
    pub fn new(families: &[&str]) -> Self {
        Self {
            families: families.iter().map(|f| f.to_string()).collect(),
            measure_calls: AtomicUsize::new(0),
        }
    }

    pub fn measure_calls(&self) -> usize {
        self.measure_calls.load(Ordering::SeqCst)
    }
}

impl FontCatalog for BlockTextEngine {
    fn available_fonts(&self) -> Vec<String> {
        self.families.clone()
    }
}

impl TextEngine for BlockTextEngine {
    fn measure(&self, _family: &str, size: u32, text: &str) -> (f32, f32) {
        self.measure_calls.fetch_add(1, Ordering::SeqCst);
        if text.is_empty() {
            return (0.0, 0.0);
        }
        let glyphs = text.chars().count() as f32;
        (glyphs * size as f32 / 2.0, size as f32)
    }

    fn draw(
        &self,
        canvas: &mut RgbaImage,
        family: &str,
        size: u32,
        text: &str,
        origin: (i32, i32),
        color: Rgba<u8>,
    ) {
        let (w, h) = self.measure(family, size, text);
        let (x0, y0) = origin;
        for y in y0..y0 + h as i32 {
            for x in x0..x0 + w as i32 {
                blend_pixel(canvas, x, y, color);
            }
        }
    }
}

/// Detector that returns fixed regions per pass: the first call gets
/// `color`, the second `gray`, and so on alternating.
pub struct ScriptedDetector {
    color: Vec<TextRegion>,
    gray: Vec<TextRegion>,
    fail: bool,
    delay: Duration,
    calls: Mutex<Vec<(u32, u32, DetectParams)>>,
}

impl ScriptedDetector {
    pub fn new(color: Vec<TextRegion>, gray: Vec<TextRegion>) -> Self {
        Self {
            color,
            gray,
            fail: false,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Block each call for `delay`, to hold a run in flight
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new(), Vec::new())
        }
    }

    /// `(width, height, params)` of every call, in order
    pub fn calls(&self) -> Vec<(u32, u32, DetectParams)> {
        self.calls.lock().clone()
    }
}

impl TextDetector for ScriptedDetector {
    fn detect(&self, image: &DynamicImage, params: &DetectParams) -> DetectionResult<Vec<TextRegion>> {
        std::thread::sleep(self.delay);
        let mut calls = self.calls.lock();
        calls.push((image.width(), image.height(), params.clone()));
        if self.fail {
            return Err(DetectionError::InvalidOutput("scripted failure".to_string()));
        }
        Ok(if calls.len() % 2 == 1 {
            self.color.clone()
        } else {
            self.gray.clone()
        })
    }
}
