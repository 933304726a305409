use cosmic_text::{
    fontdb, Attrs, Buffer, Color as CosmicColor, Family, FontSystem, Metrics, Shaping,
    SwashCache, Wrap,
};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::core::config::RenderingConfig;
use crate::core::errors::{RenderingError, RenderingResult};
use crate::services::rendering::{blend_pixel, FontCatalog, TextEngine};

const LINE_HEIGHT_FACTOR: f32 = 1.2;

/// Text measurement and drawing backed by cosmic-text.
///
/// Fonts come from a local directory plus (optionally) the system font
/// database; both are queried through the same fontdb, which also answers
/// [`FontCatalog`] lookups.
pub struct CosmicTextEngine {
    font_system: Mutex<FontSystem>,
    swash_cache: Mutex<SwashCache>,
    families: BTreeSet<String>,
}

impl CosmicTextEngine {
    pub fn new(config: &RenderingConfig) -> RenderingResult<Self> {
        let mut db = fontdb::Database::new();

        // The default directory may be absent; a custom one must exist
        let fonts_dir = Path::new(&config.fonts_dir);
        if fonts_dir.is_dir() {
            db.load_fonts_dir(fonts_dir);
            debug!("Loaded fonts from {}", fonts_dir.display());
        } else if fonts_dir != Path::new("fonts") {
            return Err(RenderingError::FontDirectory {
                path: config.fonts_dir.clone(),
            });
        }

        if config.load_system_fonts {
            db.load_system_fonts();
        }

        if db.is_empty() {
            return Err(RenderingError::NoFonts {
                fonts_dir: config.fonts_dir.clone(),
                system: config.load_system_fonts,
            });
        }

        let families: BTreeSet<String> = db
            .faces()
            .flat_map(|face| face.families.iter().map(|(name, _)| name.clone()))
            .collect();
        info!(
            "Text engine ready: {} faces, {} families",
            db.len(),
            families.len()
        );
        for wanted in &config.font_families {
            if !families.iter().any(|f| f.eq_ignore_ascii_case(wanted)) {
                warn!("Preferred font '{}' is not installed", wanted);
            }
        }

        Ok(Self {
            font_system: Mutex::new(FontSystem::new_with_locale_and_db("en-US".to_string(), db)),
            swash_cache: Mutex::new(SwashCache::new()),
            families,
        })
    }

    fn shape(font_system: &mut FontSystem, family: &str, size: u32, text: &str) -> Buffer {
        let size = size.max(1) as f32;
        let metrics = Metrics::new(size, size * LINE_HEIGHT_FACTOR);
        let mut buffer = Buffer::new(font_system, metrics);

        // Single line, the fitting loop shrinks instead of wrapping
        buffer.set_wrap(font_system, Wrap::None);
        let attrs = Attrs::new().family(Family::Name(family));
        buffer.set_text(font_system, text, &attrs, Shaping::Advanced);
        buffer.shape_until_scroll(font_system, false);
        buffer
    }
}

impl FontCatalog for CosmicTextEngine {
    fn available_fonts(&self) -> Vec<String> {
        self.families.iter().cloned().collect()
    }

    fn is_available(&self, family: &str) -> bool {
        self.families.iter().any(|f| f.eq_ignore_ascii_case(family))
    }
}

impl TextEngine for CosmicTextEngine {
    fn measure(&self, family: &str, size: u32, text: &str) -> (f32, f32) {
        if text.is_empty() {
            return (0.0, 0.0);
        }

        let mut font_system = self.font_system.lock();
        let buffer = Self::shape(&mut font_system, family, size, text);

        let (width, lines) = buffer
            .layout_runs()
            .fold((0.0f32, 0usize), |(w, n), run| (w.max(run.line_w), n + 1));
        (width, lines as f32 * buffer.metrics().line_height)
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
        if text.is_empty() {
            return;
        }

        let mut font_system = self.font_system.lock();
        let mut swash_cache = self.swash_cache.lock();
        let buffer = Self::shape(&mut font_system, family, size, text);

        let (ox, oy) = origin;
        let ink = CosmicColor::rgba(color[0], color[1], color[2], color[3]);
        buffer.draw(
            &mut font_system,
            &mut swash_cache,
            ink,
            |px, py, w, h, c| {
                let src = Rgba([c.r(), c.g(), c.b(), c.a()]);
                for dy in 0..h as i32 {
                    for dx in 0..w as i32 {
                        blend_pixel(canvas, ox + px + dx, oy + py + dy, src);
                    }
                }
            },
        );
    }
}
