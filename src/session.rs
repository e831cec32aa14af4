use anyhow::{Context, Result, anyhow, bail};
use image::{DynamicImage, RgbaImage};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::batch::{OutputFormat, TransplantProcessor, save_render};
use crate::color::{parse_color, to_hex};
use crate::font::{FontCache, FontPool};
use crate::gesture::{DragGesture, TargetLayout};
use crate::geometry::{PixelBox, PixelPoint, Size, box_to_ratio, square_at};
use crate::ocr::{
    EngineConfig, LanguageSelection, RecognitionService, Recognizer, build_recognizer,
};
use crate::overlay::{OverlayLayers, render_overlay};
use crate::pipeline::{
    CropDebug, ProcessReport, TransplantContext, process_image_with_service,
};
use crate::regions::{PairId, RegionStore};
use crate::render::TransplantStyle;
use crate::settings::{MAX_BOX_SIZE, MIN_BOX_SIZE, Settings};

const SCROLL_STEP: u32 = 5;
const FONT_TO_BOX_RATIO: f64 = 0.85;

/// Pointer positions are in display pixels; the store only ever sees ratios.
pub struct Session {
    store: RegionStore,
    pool: FontPool,
    cache: FontCache,
    gesture: DragGesture,
    layout: TargetLayout,
    style: TransplantStyle,
    display: Option<Size>,
    cursor: Option<PixelPoint>,
    reference: Option<DynamicImage>,
    rendered: Option<RgbaImage>,
    engine: EngineConfig,
    language: LanguageSelection,
    service: Option<RecognitionService>,
    output_format: OutputFormat,
    debug: Option<CropDebug>,
    rng: StdRng,
}

impl Session {
    pub fn new(settings: &Settings, seed: Option<u64>) -> Result<Self> {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(rand::thread_rng())
                .context("failed to seed the random number generator")?,
        };
        Ok(Self {
            store: RegionStore::new(),
            pool: FontPool::from_paths(settings.font_paths.iter().cloned()),
            cache: FontCache::new(),
            gesture: DragGesture::new(),
            layout: TargetLayout {
                box_size: settings.box_size,
                gap: settings.gap,
            },
            style: settings.transplant_style()?,
            display: None,
            cursor: None,
            reference: None,
            rendered: None,
            engine: settings.engine_config(),
            language: settings.language_selection()?,
            service: None,
            output_format: settings.output_format,
            debug: None,
            rng,
        })
    }

    pub fn store(&self) -> &RegionStore {
        &self.store
    }

    pub fn replace_store(&mut self, store: RegionStore) {
        self.store = store;
    }

    pub fn clear_regions(&mut self) {
        self.store.clear();
        self.gesture = DragGesture::new();
    }

    pub fn fonts(&self) -> &FontPool {
        &self.pool
    }

    pub fn add_font(&mut self, path: impl Into<PathBuf>) -> bool {
        self.pool.add(path)
    }

    pub fn layout(&self) -> TargetLayout {
        self.layout
    }

    pub fn style(&self) -> &TransplantStyle {
        &self.style
    }

    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    pub fn language(&self) -> &LanguageSelection {
        &self.language
    }

    pub fn set_display(&mut self, display: Size) {
        self.display = Some(display);
    }

    pub fn display(&self) -> Option<Size> {
        self.display
    }

    fn require_display(&self) -> Result<Size> {
        self.display
            .ok_or_else(|| anyhow!("no display size; load a reference image first"))
    }

    pub fn set_box_size(&mut self, box_size: u32) {
        self.layout.box_size = box_size.clamp(MIN_BOX_SIZE, MAX_BOX_SIZE);
    }

    pub fn set_font_size(&mut self, font_size: u32) {
        self.style.base_font_size = font_size.max(1);
    }

    pub fn set_gap(&mut self, gap: u32) {
        self.layout.gap = gap;
    }

    pub fn set_color(&mut self, value: &str) -> Result<()> {
        self.style.color = parse_color(value)?;
        debug!("font color {}", to_hex(self.style.color));
        Ok(())
    }

    /// Returns the new box size.
    pub fn scroll(&mut self, delta: i32) -> u32 {
        let size = self.layout.box_size;
        self.layout.box_size = match delta.signum() {
            1 => (size + SCROLL_STEP).min(MAX_BOX_SIZE),
            -1 => size.saturating_sub(SCROLL_STEP).max(MIN_BOX_SIZE),
            _ => size,
        };
        self.style.base_font_size = (self.layout.box_size as f64 * FONT_TO_BOX_RATIO) as u32;
        debug!(
            "box size {}, font size {}",
            self.layout.box_size, self.style.base_font_size
        );
        self.layout.box_size
    }

    pub fn set_language(&mut self, language: LanguageSelection) {
        if language != self.language {
            info!("ocr language set to {}", language);
            self.language = language;
            self.service = None;
        }
    }

    pub fn set_engine(&mut self, engine: EngineConfig) {
        self.engine = engine;
        self.service = None;
    }

    /// Discards all marked regions.
    pub fn load_reference(&mut self, path: &Path) -> Result<Size> {
        let image =
            image::open(path).with_context(|| format!("failed to open image: {}", path.display()))?;
        self.set_reference(image)
    }

    pub fn set_reference(&mut self, image: DynamicImage) -> Result<Size> {
        let size = Size::of_image(&image)?;
        self.clear_regions();
        self.rendered = None;
        self.reference = Some(image);
        if self.display.is_none() {
            self.display = Some(size);
        }
        Ok(size)
    }

    pub fn reference(&self) -> Option<&DynamicImage> {
        self.reference.as_ref()
    }

    pub fn mark_source(&mut self, at: PixelPoint) -> Result<PairId> {
        let display = self.require_display()?;
        let square = square_at(at, self.layout.box_size);
        let id = self.store.begin_source(box_to_ratio(square, display));
        debug!("source {} at ({}, {})", id.index() + 1, at.x, at.y);
        Ok(id)
    }

    pub fn mark_destination(&mut self, at: PixelPoint) -> Result<()> {
        let display = self.require_display()?;
        let square = square_at(at, self.layout.box_size);
        self.store.append_destination(box_to_ratio(square, display))?;
        Ok(())
    }

    pub fn hover(&mut self, at: PixelPoint) {
        self.cursor = Some(at);
    }

    pub fn drag_start(&mut self, at: PixelPoint) {
        self.gesture.begin(at);
    }

    pub fn drag_motion(&mut self, at: PixelPoint) -> &[PixelBox] {
        self.gesture.motion(at, self.layout)
    }

    pub fn drag_release(&mut self) -> Result<usize> {
        let display = match self.require_display() {
            Ok(display) => display,
            Err(err) => {
                self.gesture = DragGesture::new();
                return Err(err);
            }
        };
        Ok(self.gesture.release(&mut self.store, display)?)
    }

    pub fn pointer_leave(&mut self) -> Result<usize> {
        self.cursor = None;
        if !self.gesture.is_active() {
            return Ok(0);
        }
        self.drag_release()
    }

    pub fn build_recognizer(&self) -> Result<Box<dyn Recognizer>> {
        Ok(build_recognizer(&self.engine, &self.language)?)
    }

    pub fn attach_recognizer(&mut self, recognizer: Box<dyn Recognizer>) {
        self.language = recognizer.language().clone();
        self.service = Some(RecognitionService::spawn(recognizer));
    }

    async fn ensure_service(&mut self) -> Result<()> {
        if self.service.is_some() {
            return Ok(());
        }
        let engine = self.engine.clone();
        let language = self.language.clone();
        let recognizer =
            tokio::task::spawn_blocking(move || build_recognizer(&engine, &language)).await??;
        info!("{} recognizer ready ({})", recognizer.name(), self.language);
        self.service = Some(RecognitionService::spawn(recognizer));
        Ok(())
    }

    pub async fn process_reference(&mut self) -> Result<ProcessReport> {
        let Some(reference) = self.reference.as_ref() else {
            bail!("no reference image loaded");
        };
        let reference = reference.clone();
        self.ensure_service().await?;
        let Some(service) = self.service.as_mut() else {
            bail!("recognizer is not running");
        };
        let ctx = TransplantContext {
            store: &self.store,
            pool: &self.pool,
            cache: &mut self.cache,
            style: &self.style,
            rng: &mut self.rng,
            debug: self.debug.as_ref(),
        };
        let (rendered, report) = process_image_with_service(&reference, service, ctx).await?;
        self.rendered = Some(rendered);
        Ok(report)
    }

    /// Later passes also write each region's OCR crop and text into `dir`.
    pub fn set_debug_dir(&mut self, dir: &Path) -> Result<()> {
        self.debug = Some(CropDebug::new(dir)?);
        Ok(())
    }

    pub fn rendered(&self) -> Option<&RgbaImage> {
        self.rendered.as_ref()
    }

    pub fn save_rendered(&self, path: &Path) -> Result<()> {
        let rendered = self
            .rendered
            .as_ref()
            .ok_or_else(|| anyhow!("nothing rendered yet"))?;
        save_render(rendered, path)
    }

    pub fn overlay(&self) -> Result<RgbaImage> {
        let reference = self
            .reference
            .as_ref()
            .ok_or_else(|| anyhow!("no reference image loaded"))?;
        let display = self.require_display()?;
        let layers = OverlayLayers {
            drag_preview: self
                .gesture
                .preview()
                .iter()
                .map(|preview| box_to_ratio(*preview, display))
                .collect(),
            cursor: self
                .cursor
                .map(|at| box_to_ratio(square_at(at, self.layout.box_size), display)),
        };
        render_overlay(&reference.to_rgba8(), &self.store, &layers)
    }

    pub fn transplant_processor<'a>(
        &'a mut self,
        recognizer: &'a mut dyn Recognizer,
    ) -> TransplantProcessor<'a, StdRng> {
        TransplantProcessor {
            recognizer,
            store: &self.store,
            pool: &self.pool,
            cache: &mut self.cache,
            style: &self.style,
            rng: &mut self.rng,
        }
    }

    pub async fn shutdown(&mut self) {
        if let Some(service) = self.service.take() {
            service.shutdown().await;
        }
    }
}
