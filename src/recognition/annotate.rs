//! Annotated shelf images for operator review

use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{debug, warn};

use super::matcher::MatchResult;
use crate::config::AnnotationSettings;

/// Label font shipped with the crate (DejaVu Sans)
static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// Average glyph width as a fraction of the font size (rough estimate)
const CHAR_WIDTH_RATIO: f32 = 0.6;
const LABEL_PADDING: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Label text for a match: product name (or "Unknown") and score
pub fn label_text(result: &MatchResult) -> String {
    format!("{} ({:.2})", result.label(), result.score)
}

/// Draws detection boxes and match labels
pub struct Annotator {
    settings: AnnotationSettings,
    font: FontArc,
}

impl Annotator {
    /// Create an annotator using `font_path` when set, the embedded font otherwise
    pub fn new(settings: &AnnotationSettings) -> Self {
        let font = settings
            .font_path
            .as_deref()
            .and_then(load_font)
            .unwrap_or_else(embedded_font);

        Self {
            settings: settings.clone(),
            font,
        }
    }

    /// Draw every result onto a copy of `image`
    pub fn annotate(&self, image: &DynamicImage, matches: &[MatchResult]) -> RgbImage {
        let mut canvas = image.to_rgb8();
        let color = Rgb(self.settings.color);

        for result in matches {
            self.draw_box(&mut canvas, result, color);
            self.draw_label(&mut canvas, result, color);
        }

        canvas
    }

    fn draw_box(&self, canvas: &mut RgbImage, result: &MatchResult, color: Rgb<u8>) {
        let b = result.bbox;

        // Outline grows inward so it stays inside the box
        for inset in 0..self.settings.line_width.max(1) {
            let width = b.width().saturating_sub(2 * inset);
            let height = b.height().saturating_sub(2 * inset);
            if width == 0 || height == 0 {
                break;
            }

            let rect = Rect::at((b.x1 + inset) as i32, (b.y1 + inset) as i32).of_size(width, height);
            draw_hollow_rect_mut(canvas, rect, color);
        }
    }

    fn draw_label(&self, canvas: &mut RgbImage, result: &MatchResult, color: Rgb<u8>) {
        let label = label_text(result);
        let font_size = self.settings.font_size.max(1.0);

        let text_width = (label.chars().count() as f32 * font_size * CHAR_WIDTH_RATIO).ceil() as i32;
        let text_height = font_size.ceil() as i32 + 2 * LABEL_PADDING;

        let canvas_width = canvas.width() as i32;
        let x = result.bbox.x1 as i32;

        // Above the box when there is room, otherwise inside its top edge
        let y = if result.bbox.y1 as i32 >= text_height {
            result.bbox.y1 as i32 - text_height
        } else {
            result.bbox.y1 as i32
        };

        let label_width = text_width.min(canvas_width - x);
        if label_width <= 0 {
            return;
        }

        let background = Rect::at(x, y).of_size(label_width as u32, text_height as u32);
        draw_filled_rect_mut(canvas, background, color);
        draw_text_mut(
            canvas,
            TEXT_COLOR,
            x + LABEL_PADDING,
            y + LABEL_PADDING,
            PxScale::from(font_size),
            &self.font,
            &label,
        );
    }
}

fn embedded_font() -> FontArc {
    FontArc::try_from_slice(EMBEDDED_FONT).expect("embedded label font is a valid TrueType file")
}

fn load_font(path: &Path) -> Option<FontArc> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warn!("Failed to read font {:?}, using the embedded font: {}", path, e);
            return None;
        }
    };

    match FontArc::try_from_vec(data) {
        Ok(font) => {
            debug!("Loaded label font {:?}", path);
            Some(font)
        }
        Err(e) => {
            warn!("Invalid font {:?}, using the embedded font: {}", path, e);
            None
        }
    }
}
