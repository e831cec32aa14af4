use tracing::debug;

use crate::error::RegionError;
use crate::geometry::{PixelBox, PixelPoint, Size, box_to_ratio, square_at};
use crate::regions::RegionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragDirection {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetLayout {
    pub box_size: u32,
    pub gap: u32,
}

impl TargetLayout {
    pub fn step(&self) -> u32 {
        self.box_size + self.gap
    }
}

/// Preview-then-commit generator for a run of evenly spaced destination boxes.
#[derive(Debug, Default)]
pub struct DragGesture {
    start: Option<PixelPoint>,
    direction: Option<DragDirection>,
    preview: Vec<PixelBox>,
}

impl DragGesture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, start: PixelPoint) {
        self.start = Some(start);
        self.direction = None;
        self.preview.clear();
    }

    pub fn is_active(&self) -> bool {
        self.start.is_some()
    }

    pub fn direction(&self) -> Option<DragDirection> {
        self.direction
    }

    pub fn preview(&self) -> &[PixelBox] {
        &self.preview
    }

    pub fn motion(&mut self, current: PixelPoint, layout: TargetLayout) -> &[PixelBox] {
        let Some(start) = self.start else {
            return &self.preview;
        };
        let dx = current.x - start.x;
        let dy = current.y - start.y;
        let direction = *self.direction.get_or_insert_with(|| {
            if dx.abs() > dy.abs() {
                DragDirection::Horizontal
            } else {
                DragDirection::Vertical
            }
        });
        let displacement = match direction {
            DragDirection::Horizontal => dx.abs(),
            DragDirection::Vertical => dy.abs(),
        };
        self.preview = generate_targets(start, direction, displacement, layout);
        &self.preview
    }

    /// Ends the gesture even when the store has no active pair.
    pub fn release(
        &mut self,
        store: &mut RegionStore,
        display: Size,
    ) -> Result<usize, RegionError> {
        let preview = std::mem::take(&mut self.preview);
        self.start = None;
        self.direction = None;
        if preview.is_empty() {
            return Ok(0);
        }
        let id = store.active().ok_or(RegionError::NoActiveSource)?;
        for target in &preview {
            store.append_destination_to(id, box_to_ratio(*target, display))?;
        }
        debug!("committed {} drag targets", preview.len());
        Ok(preview.len())
    }

    pub fn leave(&mut self, store: &mut RegionStore, display: Size) -> Result<usize, RegionError> {
        if !self.is_active() {
            return Ok(0);
        }
        self.release(store, display)
    }
}

pub fn generate_targets(
    start: PixelPoint,
    direction: DragDirection,
    displacement: f64,
    layout: TargetLayout,
) -> Vec<PixelBox> {
    let step = layout.step().max(1) as f64;
    let count = ((displacement.abs() / step).floor() as usize).max(1);
    (0..count)
        .map(|index| {
            let offset = index as f64 * step;
            let center = match direction {
                DragDirection::Horizontal => PixelPoint::new(start.x + offset, start.y),
                DragDirection::Vertical => PixelPoint::new(start.x, start.y + offset),
            };
            square_at(center, layout.box_size)
        })
        .collect()
}
