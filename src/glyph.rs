use anyhow::{Result, anyhow};
use image::{Rgba, RgbaImage};
use std::path::Path;
use tiny_skia::{ColorU8, FillRule, IntRect, Paint, PathBuilder, Pixmap, Transform};

use crate::font::FontCache;

pub trait GlyphTarget {
    fn measure(&mut self, font: &Path, ch: char, font_size: f32) -> Option<(f32, f32)>;

    fn draw(
        &mut self,
        font: &Path,
        ch: char,
        font_size: f32,
        origin: (f32, f32),
        color: Rgba<u8>,
    ) -> Result<()>;
}

pub struct RasterTarget<'a> {
    pixmap: Pixmap,
    cache: &'a mut FontCache,
}

impl<'a> RasterTarget<'a> {
    pub fn new(image: &RgbaImage, cache: &'a mut FontCache) -> Result<Self> {
        Ok(Self {
            pixmap: image_to_pixmap(image)?,
            cache,
        })
    }

    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Option<RgbaImage> {
        let rect = IntRect::from_xywh(
            i32::try_from(x).ok()?,
            i32::try_from(y).ok()?,
            width,
            height,
        )?;
        self.pixmap.clone_rect(rect).map(|pixmap| pixmap_to_image(&pixmap))
    }

    pub fn finish(self) -> RgbaImage {
        pixmap_to_image(&self.pixmap)
    }
}

impl GlyphTarget for RasterTarget<'_> {
    fn measure(&mut self, font: &Path, ch: char, font_size: f32) -> Option<(f32, f32)> {
        self.cache.face_for(font)?.measure(ch, font_size)
    }

    fn draw(
        &mut self,
        font: &Path,
        ch: char,
        font_size: f32,
        origin: (f32, f32),
        color: Rgba<u8>,
    ) -> Result<()> {
        let loaded = self
            .cache
            .face_for(font)
            .ok_or_else(|| anyhow!("no usable face for {}", font.display()))?;
        let face = loaded
            .face()
            .ok_or_else(|| anyhow!("failed to parse cached face for {}", font.display()))?;
        let Some(glyph) = face.glyph_index(ch) else {
            return Ok(());
        };
        let mut outline = OutlinePath(PathBuilder::new());
        if face.outline_glyph(glyph, &mut outline).is_none() {
            return Ok(());
        }
        let Some(path) = outline.0.finish() else {
            return Ok(());
        };

        let scale = loaded.scale(font_size);
        let baseline = origin.1 + loaded.ascent_px(font_size);
        let transform = Transform::from_row(scale, 0.0, 0.0, -scale, origin.0, baseline);
        let mut paint = Paint::default();
        let [r, g, b, a] = color.0;
        paint.set_color_rgba8(r, g, b, a);
        paint.anti_alias = true;
        self.pixmap
            .fill_path(&path, &paint, FillRule::Winding, transform, None);
        Ok(())
    }
}

struct OutlinePath(PathBuilder);

impl ttf_parser::OutlineBuilder for OutlinePath {
    fn move_to(&mut self, x: f32, y: f32) {
        self.0.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.0.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.0.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.0.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.0.close();
    }
}

fn image_to_pixmap(image: &RgbaImage) -> Result<Pixmap> {
    let (width, height) = image.dimensions();
    let mut pixmap =
        Pixmap::new(width, height).ok_or_else(|| anyhow!("empty image ({}x{})", width, height))?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(image.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}

pub(crate) fn pixmap_to_image(pixmap: &Pixmap) -> RgbaImage {
    let mut image = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in image.pixels_mut().zip(pixmap.pixels()) {
        let color = src.demultiply();
        *dst = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
    }
    image
}
