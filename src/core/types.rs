// Shared data model for the detect -> fuse -> translate -> render pipeline

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::config::Config;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub worker: crate::orchestration::worker::WorkerHandle,
    pub metrics: crate::utils::Metrics,
}

/// A point in image pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Four ordered corner points. Not necessarily axis-aligned.
pub type Quad = [Point; 4];

/// Axis-aligned rectangle in pixel space, `x0 <= x1` and `y0 <= y1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    /// Bounding rectangle of a quad (min/max over its four corners)
    pub fn from_quad(quad: &Quad) -> Self {
        let mut rect = Rect {
            x0: f32::INFINITY,
            y0: f32::INFINITY,
            x1: f32::NEG_INFINITY,
            y1: f32::NEG_INFINITY,
        };
        for p in quad {
            rect.x0 = rect.x0.min(p.x);
            rect.y0 = rect.y0.min(p.y);
            rect.x1 = rect.x1.max(p.x);
            rect.y1 = rect.y1.max(p.y);
        }
        rect
    }

    pub fn width(&self) -> f32 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y1 - self.y0).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Integer pixel box `(x, y, w, h)`, truncating like a widget toolkit would
    pub fn to_pixels(&self) -> (i32, i32, u32, u32) {
        let x = self.x0 as i32;
        let y = self.y0 as i32;
        let w = (self.x1 as i32).saturating_sub(x).max(0) as u32;
        let h = (self.y1 as i32).saturating_sub(y).max(0) as u32;
        (x, y, w, h)
    }
}

/// One detected piece of text: where it is, what it says, and how sure the
/// detector was. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    quad: Quad,
    text: String,
    confidence: f32,
}

impl TextRegion {
    /// Confidence is clamped into [0, 1]; NaN becomes 0.
    pub fn new(quad: Quad, text: impl Into<String>, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            quad,
            text: text.into(),
            confidence,
        }
    }

    /// Convenience constructor for an axis-aligned box given as `[x0, y0, x1, y1]`
    pub fn from_box(bbox: [f32; 4], text: impl Into<String>, confidence: f32) -> Self {
        let [x0, y0, x1, y1] = bbox;
        let quad = [
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ];
        Self::new(quad, text, confidence)
    }

    pub fn quad(&self) -> &Quad {
        &self.quad
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn rect(&self) -> Rect {
        Rect::from_quad(&self.quad)
    }
}

/// A region that survived de-duplication across detection passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FusedRegion(TextRegion);

impl FusedRegion {
    pub fn quad(&self) -> &Quad {
        self.0.quad()
    }

    pub fn text(&self) -> &str {
        self.0.text()
    }

    pub fn confidence(&self) -> f32 {
        self.0.confidence()
    }

    pub fn rect(&self) -> Rect {
        self.0.rect()
    }

    pub fn into_inner(self) -> TextRegion {
        self.0
    }
}

impl From<TextRegion> for FusedRegion {
    fn from(region: TextRegion) -> Self {
        Self(region)
    }
}

/// Per-region layout decision, derived at render time
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSpec {
    pub rect: Rect,
    pub translated_text: String,
    pub font_family: String,
    pub font_size: u32,
}

/// Decoder used by the recognizer stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decoder {
    Greedy,
}

/// Parameters passed to every detector call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectParams {
    pub decoder: Decoder,
    pub confidence_threshold: f32,
    pub batch_size: usize,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            decoder: Decoder::Greedy,
            confidence_threshold: 0.5,
            batch_size: 16,
        }
    }
}

/// One row of the JSON response: a fused region and its translation
#[derive(Debug, Clone, Serialize)]
pub struct OverlayRegion {
    pub quad: Quad,
    pub text: String,
    pub confidence: f32,
    pub translation: String,
}

/// Per-stage wall-clock timings of one pipeline run, in milliseconds
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    pub detect_ms: f64,
    pub fuse_ms: f64,
    pub translate_ms: f64,
    pub render_ms: f64,
    pub total_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_from_rotated_quad() {
        let quad = [
            Point::new(5.0, 0.0),
            Point::new(10.0, 5.0),
            Point::new(5.0, 10.0),
            Point::new(0.0, 5.0),
        ];
        let rect = Rect::from_quad(&quad);
        assert_eq!(rect, Rect { x0: 0.0, y0: 0.0, x1: 10.0, y1: 10.0 });
        assert_eq!(rect.area(), 100.0);
    }

    #[test]
    fn test_to_pixels_extreme_coordinates_saturate() {
        let rect = Rect { x0: -3.0e9, y0: 0.0, x1: 3.0e9, y1: 10.0 };
        let (x, y, w, h) = rect.to_pixels();
        assert_eq!((x, y), (i32::MIN, 0));
        assert_eq!(w, i32::MAX as u32);
        assert_eq!(h, 10);

        let inverted = Rect { x0: 3.0e9, y0: 5.0, x1: -3.0e9, y1: 1.0 };
        assert_eq!(inverted.to_pixels().2, 0);
        assert_eq!(inverted.to_pixels().3, 0);
    }

    #[test]
    fn test_confidence_clamped() {
        let r = TextRegion::from_box([0.0, 0.0, 1.0, 1.0], "a", 1.7);
        assert_eq!(r.confidence(), 1.0);
        let r = TextRegion::from_box([0.0, 0.0, 1.0, 1.0], "a", -0.2);
        assert_eq!(r.confidence(), 0.0);
        let r = TextRegion::from_box([0.0, 0.0, 1.0, 1.0], "a", f32::NAN);
        assert_eq!(r.confidence(), 0.0);
    }

    #[test]
    fn test_inverted_rect_has_no_negative_extent() {
        let rect = Rect { x0: 10.0, y0: 10.0, x1: 2.0, y1: 4.0 };
        assert_eq!(rect.width(), 0.0);
        assert_eq!(rect.height(), 0.0);
        assert_eq!(rect.to_pixels().2, 0);
    }

    #[test]
    fn test_default_detect_params() {
        let p = DetectParams::default();
        assert_eq!(p.decoder, Decoder::Greedy);
        assert_eq!(p.confidence_threshold, 0.5);
        assert_eq!(p.batch_size, 16);
    }
}
