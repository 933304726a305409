// Overlay rendering: mask each source region and draw its translation
// centered inside, shrinking the font until it fits.

pub mod cosmic;

use image::{Rgba, RgbaImage};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::core::config::RenderingConfig;
use crate::core::types::{FusedRegion, RenderSpec};

pub use cosmic::CosmicTextEngine;

pub const DEFAULT_FONT_SIZE: u32 = 14;
pub const MASK_COLOR: Rgba<u8> = Rgba([0, 0, 0, 200]);
pub const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Installed font families
pub trait FontCatalog: Send + Sync {
    fn available_fonts(&self) -> Vec<String>;

    fn is_available(&self, family: &str) -> bool {
        self.available_fonts()
            .iter()
            .any(|f| f.eq_ignore_ascii_case(family))
    }
}

/// Single-line text measurement and drawing
pub trait TextEngine: FontCatalog {
    /// Pixel `(width, height)` of `text` set in `family` at `size`
    fn measure(&self, family: &str, size: u32, text: &str) -> (f32, f32);

    /// Draw `text` with its layout box's top-left corner at `origin`
    fn draw(
        &self,
        canvas: &mut RgbaImage,
        family: &str,
        size: u32,
        text: &str,
        origin: (i32, i32),
        color: Rgba<u8>,
    );
}

/// Source-over blend of `src` onto the canvas pixel at `(x, y)`.
/// Out-of-bounds coordinates are ignored.
pub fn blend_pixel(canvas: &mut RgbaImage, x: i32, y: i32, src: Rgba<u8>) {
    if x < 0 || y < 0 || x >= canvas.width() as i32 || y >= canvas.height() as i32 {
        return;
    }
    let dst = canvas.get_pixel_mut(x as u32, y as u32);
    let alpha = src[3] as f32 / 255.0;
    let inv_alpha = 1.0 - alpha;
    for c in 0..3 {
        dst[c] = (src[c] as f32 * alpha + dst[c] as f32 * inv_alpha).round() as u8;
    }
    dst[3] = dst[3].max(src[3]);
}

fn fill_rect_blend(canvas: &mut RgbaImage, x: i32, y: i32, w: u32, h: u32, color: Rgba<u8>) {
    let x_end = (x + w as i32).min(canvas.width() as i32);
    let y_end = (y + h as i32).min(canvas.height() as i32);
    for py in y.max(0)..y_end {
        for px in x.max(0)..x_end {
            blend_pixel(canvas, px, py, color);
        }
    }
}

/// Largest size `<= initial` at which `text` fits `max_w` x `max_h`,
/// stepping down by one. Never goes below 1, so overflowing text ends at 1.
pub fn fit_font_size(
    engine: &dyn TextEngine,
    family: &str,
    text: &str,
    max_w: u32,
    max_h: u32,
    initial: u32,
) -> u32 {
    let mut size = initial.max(1);
    let (mut w, mut h) = engine.measure(family, size, text);
    while (w > max_w as f32 || h > max_h as f32) && size > 1 {
        size -= 1;
        (w, h) = engine.measure(family, size, text);
    }
    size
}

/// Paints translations over their source regions
pub struct OverlayRenderer {
    engine: Arc<dyn TextEngine>,
    font_preferences: Vec<String>,
    initial_font_size: u32,
}

impl OverlayRenderer {
    pub fn new(engine: Arc<dyn TextEngine>, config: &RenderingConfig) -> Self {
        Self {
            engine,
            font_preferences: config.font_families.clone(),
            initial_font_size: config.font_size.max(1),
        }
    }

    /// Renderer with the stock preference list (`Noto Sans JP`, then `Meiryo`)
    pub fn with_defaults(engine: Arc<dyn TextEngine>) -> Self {
        Self {
            engine,
            font_preferences: vec!["Noto Sans JP".to_string(), "Meiryo".to_string()],
            initial_font_size: DEFAULT_FONT_SIZE,
        }
    }

    /// First installed family from the preference list. When none is
    /// installed the last entry is used by name and the engine falls back.
    pub fn select_font(&self) -> String {
        self.font_preferences
            .iter()
            .find(|f| self.engine.is_available(f))
            .or_else(|| self.font_preferences.last())
            .cloned()
            .unwrap_or_default()
    }

    /// Layout decisions for each region that has a non-empty rectangle.
    /// Pairs regions with translations by position.
    pub fn plan(&self, regions: &[FusedRegion], translations: &[String]) -> Vec<RenderSpec> {
        if regions.len() != translations.len() {
            warn!(
                "{} regions but {} translations, rendering the first {}",
                regions.len(),
                translations.len(),
                regions.len().min(translations.len())
            );
        }

        let family = self.select_font();
        regions
            .iter()
            .zip(translations)
            .filter_map(|(region, text)| {
                let rect = region.rect();
                let (_, _, w, h) = rect.to_pixels();
                if w == 0 || h == 0 {
                    trace!("Skipping degenerate region {:?}", rect);
                    return None;
                }
                let font_size = fit_font_size(
                    self.engine.as_ref(),
                    &family,
                    text,
                    w,
                    h,
                    self.initial_font_size,
                );
                Some(RenderSpec {
                    rect,
                    translated_text: text.clone(),
                    font_family: family.clone(),
                    font_size,
                })
            })
            .collect()
    }

    /// Copy of `base` with every region masked and overwritten by its
    /// translation. Same dimensions and pixel format as the input.
    pub fn render(
        &self,
        base: &RgbaImage,
        regions: &[FusedRegion],
        translations: &[String],
    ) -> RgbaImage {
        let mut canvas = base.clone();
        let specs = self.plan(regions, translations);

        for spec in &specs {
            let (x, y, w, h) = spec.rect.to_pixels();
            fill_rect_blend(&mut canvas, x, y, w, h, MASK_COLOR);

            let (tw, th) =
                self.engine
                    .measure(&spec.font_family, spec.font_size, &spec.translated_text);
            let origin = (
                x + ((w as f32 - tw) / 2.0).round() as i32,
                y + ((h as f32 - th) / 2.0).round() as i32,
            );
            self.engine.draw(
                &mut canvas,
                &spec.font_family,
                spec.font_size,
                &spec.translated_text,
                origin,
                TEXT_COLOR,
            );
        }

        debug!(
            "Rendered {} of {} regions in '{}'",
            specs.len(),
            regions.len(),
            specs.first().map(|s| s.font_family.as_str()).unwrap_or("-")
        );
        canvas
    }
}
