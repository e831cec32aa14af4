use image::Rgba;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::PreconditionError;
use crate::font::FontPool;
use crate::geometry::PixelBox;
use crate::glyph::GlyphTarget;

const FALLBACK_GLYPH_SIZE: (f64, f64) = (10.0, 10.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    pub size_min: f64,
    pub size_max: f64,
    /// Horizontal jitter bound as a fraction of the destination box width.
    pub x_ratio: f64,
    /// Vertical jitter bound as a fraction of the destination box height.
    pub y_ratio: f64,
}

impl Default for Jitter {
    fn default() -> Self {
        Self {
            size_min: 0.95,
            size_max: 1.05,
            x_ratio: 0.35,
            y_ratio: 0.025,
        }
    }
}

impl Jitter {
    pub fn none() -> Self {
        Self {
            size_min: 1.0,
            size_max: 1.0,
            x_ratio: 0.0,
            y_ratio: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransplantStyle {
    pub base_font_size: u32,
    pub color: Rgba<u8>,
    pub jitter: Jitter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlyphPlacement {
    pub ch: char,
    pub font_index: usize,
    pub font_size: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

// No font twice in a row unless the pool has a single font.
#[derive(Debug, Default)]
pub struct FontPicker {
    last: Option<usize>,
}

impl FontPicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pick<R: Rng + ?Sized>(&mut self, pool_len: usize, rng: &mut R) -> usize {
        let index = match self.last {
            Some(last) if pool_len > 1 && last < pool_len => {
                let candidate = rng.gen_range(0..pool_len - 1);
                if candidate >= last { candidate + 1 } else { candidate }
            }
            _ => rng.gen_range(0..pool_len.max(1)),
        };
        self.last = Some(index);
        index
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    if high <= low {
        return low;
    }
    rng.gen_range(low..high)
}

/// Draws `text` into `dest` one character at a time, on a single line that may
/// overflow the box. The run is re-centered on every character.
pub fn transplant_text<R, T>(
    text: &str,
    dest: PixelBox,
    pool: &FontPool,
    style: &TransplantStyle,
    rng: &mut R,
    target: &mut T,
) -> Result<Vec<GlyphPlacement>, PreconditionError>
where
    R: Rng + ?Sized,
    T: GlyphTarget + ?Sized,
{
    if pool.is_empty() {
        return Err(PreconditionError::MissingFonts);
    }
    let jitter = style.jitter;
    let box_w = dest.width();
    let box_h = dest.height();
    let mut picker = FontPicker::new();
    let mut total_width = 0.0;
    let mut max_height: f64 = 0.0;
    let mut placements = Vec::new();

    for ch in text.chars().filter(|ch| !matches!(ch, '\n' | '\r')) {
        let font_index = picker.pick(pool.len(), rng);
        let Some(font) = pool.get(font_index) else {
            return Err(PreconditionError::MissingFonts);
        };

        let factor = uniform(rng, jitter.size_min, jitter.size_max);
        let font_size = (style.base_font_size as f64 * factor).round().max(1.0) as u32;

        let (glyph_w, glyph_h) = target
            .measure(font, ch, font_size as f32)
            .map(|(w, h)| (w as f64, h as f64))
            .unwrap_or(FALLBACK_GLYPH_SIZE);
        max_height = max_height.max(glyph_h);

        let jitter_x = uniform(rng, -jitter.x_ratio * box_w, jitter.x_ratio * box_w);
        let jitter_y = uniform(rng, -jitter.y_ratio * box_h, jitter.y_ratio * box_h);

        let anchor_x = dest.x1 + (box_w - total_width) / 2.0 + jitter_x - glyph_w / 2.0;
        let anchor_y = dest.y1 + (box_h - max_height) / 2.0 + jitter_y;
        let x = anchor_x + total_width;

        if let Err(err) = target.draw(
            font,
            ch,
            font_size as f32,
            (x as f32, anchor_y as f32),
            style.color,
        ) {
            warn!("failed to draw '{}' with {}: {}", ch, font.display(), err);
        }

        placements.push(GlyphPlacement {
            ch,
            font_index,
            font_size,
            x,
            y: anchor_y,
            width: glyph_w,
            height: glyph_h,
        });
        total_width += glyph_w;
    }

    debug!(
        "transplanted {} glyphs into ({:.0},{:.0})-({:.0},{:.0})",
        placements.len(),
        dest.x1,
        dest.y1,
        dest.x2,
        dest.y2
    );
    Ok(placements)
}
