use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

// Absorbs float noise such as 0.7 * 1000.0 before snapping to whole pixels.
const SNAP_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioPoint {
    pub x: f64,
    pub y: f64,
}

/// Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    width: u32,
    height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Result<Self, GeometryError> {
        if width == 0 || height == 0 {
            return Err(GeometryError::EmptySize { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn of_image(image: &image::DynamicImage) -> Result<Self, GeometryError> {
        Self::new(image.width(), image.height())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl RatioBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl PixelBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> PixelPoint {
        PixelPoint::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn to_rect(&self) -> PixelRect {
        PixelRect {
            x1: snap(self.x1),
            y1: snap(self.y1),
            x2: snap(self.x2),
            y2: snap(self.y2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl PixelRect {
    pub fn width(&self) -> i64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i64 {
        self.y2 - self.y1
    }

    pub fn as_box(&self) -> PixelBox {
        PixelBox::new(
            self.x1 as f64,
            self.y1 as f64,
            self.x2 as f64,
            self.y2 as f64,
        )
    }

    /// Intersection with an image of `size`, as `(x, y, w, h)` for cropping.
    pub fn clip_to(&self, size: Size) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x1.clamp(0, size.width as i64);
        let y1 = self.y1.clamp(0, size.height as i64);
        let x2 = self.x2.clamp(0, size.width as i64);
        let y2 = self.y2.clamp(0, size.height as i64);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
    }
}

fn snap(value: f64) -> i64 {
    (value + SNAP_EPSILON).floor() as i64
}

pub fn to_ratio(point: PixelPoint, display: Size) -> RatioPoint {
    RatioPoint {
        x: point.x / display.width as f64,
        y: point.y / display.height as f64,
    }
}

pub fn box_to_ratio(pixel: PixelBox, display: Size) -> RatioBox {
    let top_left = to_ratio(PixelPoint::new(pixel.x1, pixel.y1), display);
    let bottom_right = to_ratio(PixelPoint::new(pixel.x2, pixel.y2), display);
    RatioBox::new(top_left.x, top_left.y, bottom_right.x, bottom_right.y)
}

pub fn to_pixel(ratio: RatioBox, target: Size) -> PixelBox {
    let width = target.width as f64;
    let height = target.height as f64;
    PixelBox::new(
        ratio.x1 * width,
        ratio.y1 * height,
        ratio.x2 * width,
        ratio.y2 * height,
    )
}

/// Square of side `box_size` centered on `center`, using an integer half side.
pub fn square_at(center: PixelPoint, box_size: u32) -> PixelBox {
    let half = (box_size / 2) as f64;
    PixelBox::new(
        center.x - half,
        center.y - half,
        center.x + half,
        center.y + half,
    )
}
