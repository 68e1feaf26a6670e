//! Bounding boxes and status label over a copy of the frame

use ab_glyph::FontVec;
use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{info, warn};

use super::detector::{MotionResult, MotionStatus};
use crate::capture::DecodedFrame;
use crate::AnnotateConfig;

pub const READY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const MOTION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Nominal TrueType pixel height at label scale 1.0
const TTF_BASE_PX: f32 = 12.0;

/// Label renderer. Set `annotate.font_path` (e.g.
/// `MOTIONCAM_ANNOTATE__FONT_PATH=/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf`)
/// to draw the label with `ab_glyph`; the bitmap glyphs below only cover
/// the two status strings and are used when no font is configured.
enum LabelFont {
    TrueType(FontVec),
    Builtin,
}

pub struct Annotator {
    config: AnnotateConfig,
    font: LabelFont,
}

impl Annotator {
    /// A missing or unreadable font falls back to the built-in glyphs
    pub fn new(config: AnnotateConfig) -> Self {
        let font = match &config.font_path {
            Some(path) => match std::fs::read(path).map(FontVec::try_from_vec) {
                Ok(Ok(font)) => {
                    info!("Label font loaded from {}", path.display());
                    LabelFont::TrueType(font)
                }
                Ok(Err(e)) => {
                    warn!("Invalid label font {}: {}", path.display(), e);
                    LabelFont::Builtin
                }
                Err(e) => {
                    warn!("Cannot read label font {}: {}", path.display(), e);
                    LabelFont::Builtin
                }
            },
            None => LabelFont::Builtin,
        };

        Self { config, font }
    }

    pub fn annotate(&self, frame: &DecodedFrame, result: &MotionResult) -> DecodedFrame {
        let mut image = frame.image.clone();

        for region in &result.regions {
            for inset in 0..self.config.box_thickness {
                let (w, h) = (
                    region.width.saturating_sub(2 * inset),
                    region.height.saturating_sub(2 * inset),
                );
                if w == 0 || h == 0 {
                    break;
                }
                let rect = Rect::at((region.x + inset) as i32, (region.y + inset) as i32).of_size(w, h);
                draw_hollow_rect_mut(&mut image, rect, MOTION_COLOR);
            }
        }

        let color = match result.status {
            MotionStatus::Ready => READY_COLOR,
            MotionStatus::MotionDetected => MOTION_COLOR,
        };
        let (x, baseline) = (self.config.label_x as i32, self.config.label_y as i32);
        let label = result.status.label();

        match &self.font {
            LabelFont::TrueType(font) => {
                let px = TTF_BASE_PX * self.config.label_scale;
                draw_text_mut(&mut image, color, x, baseline - px as i32, px, font, label);
            }
            LabelFont::Builtin => {
                let dot = (self.config.label_scale * 1.5).round().max(1.0) as u32;
                let top = baseline - (GLYPH_ROWS as u32 * dot) as i32;
                for (i, ch) in label.chars().enumerate() {
                    let left = x + (i as u32 * GLYPH_ADVANCE * dot) as i32;
                    draw_glyph(&mut image, ch, left, top, dot, color);
                }
            }
        }

        DecodedFrame {
            meta: frame.meta.clone(),
            image,
        }
    }
}

// Fallback glyphs for "Ready" and "Motion detected" only
const GLYPH_ROWS: usize = 7;
const GLYPH_ADVANCE: u32 = 6;

/// 5x7 bitmaps, bit 4 is the leftmost column
fn glyph(ch: char) -> Option<[u8; GLYPH_ROWS]> {
    Some(match ch {
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'a' => [0b00000, 0b00000, 0b01110, 0b00001, 0b01111, 0b10001, 0b01111],
        'c' => [0b00000, 0b00000, 0b01110, 0b10000, 0b10000, 0b10001, 0b01110],
        'd' => [0b00001, 0b00001, 0b01101, 0b10011, 0b10001, 0b10011, 0b01101],
        'e' => [0b00000, 0b00000, 0b01110, 0b10001, 0b11111, 0b10000, 0b01110],
        'i' => [0b00100, 0b00000, 0b01100, 0b00100, 0b00100, 0b00100, 0b01110],
        'n' => [0b00000, 0b00000, 0b10110, 0b11001, 0b10001, 0b10001, 0b10001],
        'o' => [0b00000, 0b00000, 0b01110, 0b10001, 0b10001, 0b10001, 0b01110],
        't' => [0b01000, 0b01000, 0b11100, 0b01000, 0b01000, 0b01001, 0b00110],
        'y' => [0b00000, 0b00000, 0b10001, 0b10001, 0b01111, 0b00001, 0b01110],
        _ => return None,
    })
}

fn draw_glyph(image: &mut image::RgbImage, ch: char, left: i32, top: i32, dot: u32, color: Rgb<u8>) {
    let Some(rows) = glyph(ch) else {
        return;
    };
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..5 {
            if bits & (0b10000 >> col) != 0 {
                let rect = Rect::at(left + (col * dot) as i32, top + (row as u32 * dot) as i32)
                    .of_size(dot, dot);
                draw_filled_rect_mut(image, rect, color);
            }
        }
    }
}
