use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::RgbaImage;
use resvg::render;
use std::io::Cursor;
use tiny_skia::{Pixmap, Transform};
use usvg::{Options, Tree};

use crate::geometry::{RatioBox, Size, to_pixel};
use crate::glyph::pixmap_to_image;
use crate::regions::RegionStore;

const SOURCE_STROKE: &str = "#ff0000";
const DESTINATION_STROKE: &str = "#0000ff";
const CURSOR_STROKE: &str = "#ffa500";

#[derive(Debug, Clone, Default)]
pub struct OverlayLayers {
    pub drag_preview: Vec<RatioBox>,
    pub cursor: Option<RatioBox>,
}

pub fn render_overlay_svg(
    image: &RgbaImage,
    store: &RegionStore,
    layers: &OverlayLayers,
) -> Result<String> {
    let size = Size::new(image.width(), image.height())?;
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .context("failed to encode overlay background")?;
    let data_uri = format!("data:image/png;base64,{}", BASE64.encode(&png));

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = size.width(),
        h = size.height()
    ));
    svg.push_str(&format!(
        r#"<image href="{uri}" xlink:href="{uri}" x="0" y="0" width="{w}" height="{h}" preserveAspectRatio="none"/>"#,
        uri = data_uri,
        w = size.width(),
        h = size.height()
    ));
    svg.push_str(&box_elements(store, layers, size));
    svg.push_str("</svg>");
    Ok(svg)
}

fn box_elements(store: &RegionStore, layers: &OverlayLayers, size: Size) -> String {
    let mut rects = Vec::new();
    for pair in store.all() {
        rects.push(rect(pair.source(), size, SOURCE_STROKE, false));
        for destination in pair.destinations() {
            rects.push(rect(*destination, size, DESTINATION_STROKE, false));
        }
    }
    for preview in &layers.drag_preview {
        rects.push(rect(*preview, size, DESTINATION_STROKE, true));
    }
    if let Some(cursor) = layers.cursor {
        rects.push(rect(cursor, size, CURSOR_STROKE, true));
    }
    rects.join("\n")
}

fn rect(ratio: RatioBox, size: Size, stroke: &str, dashed: bool) -> String {
    let pixel = to_pixel(ratio, size);
    let dash = if dashed { r#" stroke-dasharray="2 2""# } else { "" };
    format!(
        r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="none" stroke="{}" stroke-width="2"{}/>"#,
        pixel.x1,
        pixel.y1,
        pixel.width(),
        pixel.height(),
        stroke,
        dash
    )
}

pub fn render_overlay(
    image: &RgbaImage,
    store: &RegionStore,
    layers: &OverlayLayers,
) -> Result<RgbaImage> {
    let svg = render_overlay_svg(image, store, layers)?;
    let tree = Tree::from_str(&svg, &Options::default()).context("failed to parse overlay SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty overlay size"))?;
    render(&tree, Transform::identity(), &mut pixmap.as_mut());
    Ok(pixmap_to_image(&pixmap))
}
