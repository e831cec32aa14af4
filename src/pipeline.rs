use anyhow::{Context, Result};
use image::{DynamicImage, RgbaImage};
use rand::Rng;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{PreconditionError, RecognitionError};
use crate::font::{FontCache, FontPool};
use crate::geometry::{Size, to_pixel};
use crate::glyph::RasterTarget;
use crate::ocr::{RecognitionService, Recognizer};
use crate::regions::{RegionPair, RegionStore};
use crate::render::{TransplantStyle, transplant_text};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SourceOutsideImage { pair: usize },
    RecognitionFailed { pair: usize, message: String },
    NoTextFound { pair: usize },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SourceOutsideImage { pair } => {
                write!(f, "region {}: source box lies outside the image", pair + 1)
            }
            Notice::RecognitionFailed { pair, message } => {
                write!(f, "region {}: recognition failed: {}", pair + 1, message)
            }
            Notice::NoTextFound { pair } => write!(f, "region {}: no text recognized", pair + 1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub notices: Vec<Notice>,
    /// Recognized text per pair, `None` where nothing was transplanted.
    pub texts: Vec<Option<String>>,
    pub destinations_rendered: usize,
    pub glyphs_drawn: usize,
}

impl ProcessReport {
    fn record(
        &mut self,
        pair: usize,
        result: Result<String, RecognitionError>,
    ) -> Option<String> {
        let text = match result {
            Ok(text) if text.trim().is_empty() => {
                self.notices.push(Notice::NoTextFound { pair });
                None
            }
            Ok(text) => {
                debug!("region {} read {:?}", pair + 1, text);
                Some(text)
            }
            Err(err) => {
                self.notices.push(Notice::RecognitionFailed {
                    pair,
                    message: err.to_string(),
                });
                None
            }
        };
        self.texts.push(text.clone());
        text
    }

    fn outside(&mut self, pair: usize) {
        self.notices.push(Notice::SourceOutsideImage { pair });
        self.texts.push(None);
    }
}

#[derive(Debug, Clone)]
pub struct CropDebug {
    output_dir: PathBuf,
}

impl CropDebug {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("failed to create debug dir: {}", output_dir.display()))?;
        Ok(Self { output_dir })
    }

    pub fn crop_path(&self, pair: usize) -> PathBuf {
        self.output_dir.join(format!("region-{}.png", pair + 1))
    }

    pub fn text_path(&self, pair: usize) -> PathBuf {
        self.output_dir.join(format!("region-{}.txt", pair + 1))
    }

    fn write(&self, pair: usize, crop: &DynamicImage, text: Option<&str>) -> Result<()> {
        let crop_path = self.crop_path(pair);
        crop.to_rgba8()
            .save(&crop_path)
            .with_context(|| format!("failed to write debug crop: {}", crop_path.display()))?;
        let text_path = self.text_path(pair);
        fs::write(&text_path, text.unwrap_or_default())
            .with_context(|| format!("failed to write debug text: {}", text_path.display()))?;
        debug!(
            "region {} crop {}x{} written to {}",
            pair + 1,
            crop.width(),
            crop.height(),
            crop_path.display()
        );
        Ok(())
    }
}

pub struct TransplantContext<'a, R: Rng + ?Sized> {
    pub store: &'a RegionStore,
    pub pool: &'a FontPool,
    pub cache: &'a mut FontCache,
    pub style: &'a TransplantStyle,
    pub rng: &'a mut R,
    pub debug: Option<&'a CropDebug>,
}

fn check_ready(store: &RegionStore, pool: &FontPool) -> Result<(), PreconditionError> {
    if store.is_empty() {
        return Err(PreconditionError::MissingRegions);
    }
    if pool.is_empty() {
        return Err(PreconditionError::MissingFonts);
    }
    Ok(())
}

// Sources are cropped from the current pixels, so a later pair sees text an
// earlier pair has already transplanted.
struct Canvas<'a, R: Rng + ?Sized> {
    target: RasterTarget<'a>,
    size: Size,
    store: &'a RegionStore,
    pool: &'a FontPool,
    style: &'a TransplantStyle,
    rng: &'a mut R,
    debug: Option<&'a CropDebug>,
}

impl<'a, R: Rng + ?Sized> Canvas<'a, R> {
    fn new(image: &DynamicImage, ctx: TransplantContext<'a, R>) -> Result<Self> {
        check_ready(ctx.store, ctx.pool)?;
        Ok(Self {
            target: RasterTarget::new(&image.to_rgba8(), ctx.cache)?,
            size: Size::of_image(image)?,
            store: ctx.store,
            pool: ctx.pool,
            style: ctx.style,
            rng: ctx.rng,
            debug: ctx.debug,
        })
    }

    fn source_crop(&self, pair: &RegionPair) -> Option<DynamicImage> {
        let (x, y, width, height) = to_pixel(pair.source(), self.size)
            .to_rect()
            .clip_to(self.size)?;
        self.target
            .crop(x, y, width, height)
            .map(DynamicImage::ImageRgba8)
    }

    fn apply(
        &mut self,
        index: usize,
        pair: &RegionPair,
        crop: &DynamicImage,
        result: Result<String, RecognitionError>,
        report: &mut ProcessReport,
    ) -> Result<()> {
        let text = report.record(index, result);
        if let Some(debug) = self.debug {
            debug.write(index, crop, text.as_deref())?;
        }
        let Some(text) = text else {
            return Ok(());
        };
        for destination in pair.destinations() {
            let dest = to_pixel(*destination, self.size).to_rect().as_box();
            let placements = transplant_text(
                &text,
                dest,
                self.pool,
                self.style,
                &mut *self.rng,
                &mut self.target,
            )?;
            report.destinations_rendered += 1;
            report.glyphs_drawn += placements.len();
        }
        Ok(())
    }
}

pub fn process_image<R: Rng + ?Sized>(
    image: &DynamicImage,
    recognizer: &mut dyn Recognizer,
    ctx: TransplantContext<'_, R>,
) -> Result<(RgbaImage, ProcessReport)> {
    let mut canvas = Canvas::new(image, ctx)?;
    let mut report = ProcessReport::default();
    let store = canvas.store;
    for (index, pair) in store.all().iter().enumerate() {
        let Some(crop) = canvas.source_crop(pair) else {
            report.outside(index);
            continue;
        };
        let result = recognizer.recognize(&crop);
        canvas.apply(index, pair, &crop, result, &mut report)?;
    }
    Ok((canvas.target.finish(), report))
}

/// Same as [`process_image`]; a pair is submitted only after the previous one
/// has been rendered.
pub async fn process_image_with_service<R: Rng + ?Sized>(
    image: &DynamicImage,
    service: &mut RecognitionService,
    ctx: TransplantContext<'_, R>,
) -> Result<(RgbaImage, ProcessReport)> {
    let mut canvas = Canvas::new(image, ctx)?;
    let mut report = ProcessReport::default();
    let store = canvas.store;
    for (index, pair) in store.all().iter().enumerate() {
        let Some(crop) = canvas.source_crop(pair) else {
            report.outside(index);
            continue;
        };
        let job = service.submit(crop.clone())?;
        debug!("queued region {} as {:?}", index + 1, job.id());
        let result = job.wait().await;
        canvas.apply(index, pair, &crop, result, &mut report)?;
    }
    Ok((canvas.target.finish(), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::resolve_default_face;
    use crate::geometry::RatioBox;
    use crate::ocr::{LanguageSelection, OcrLanguage};
    use crate::render::Jitter;
    use image::Rgba;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::tempdir;

    struct ScriptedRecognizer {
        language: LanguageSelection,
        answers: Vec<Result<String, RecognitionError>>,
        seen: Vec<(u32, u32)>,
        dark: Vec<usize>,
    }

    impl ScriptedRecognizer {
        fn new(answers: Vec<Result<String, RecognitionError>>) -> Self {
            Self {
                language: LanguageSelection::single(OcrLanguage::English),
                answers,
                seen: Vec::new(),
                dark: Vec::new(),
            }
        }
    }

    impl Recognizer for ScriptedRecognizer {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn language(&self) -> &LanguageSelection {
            &self.language
        }

        fn recognize(&mut self, crop: &DynamicImage) -> Result<String, RecognitionError> {
            self.seen.push((crop.width(), crop.height()));
            let dark = crop
                .to_rgba8()
                .pixels()
                .filter(|pixel| pixel[3] > 0 && pixel[0] < 128)
                .count();
            self.dark.push(dark);
            self.answers.remove(0)
        }
    }

    fn style() -> TransplantStyle {
        TransplantStyle {
            base_font_size: 20,
            color: Rgba([0, 0, 0, 255]),
            jitter: Jitter::default(),
        }
    }

    #[test]
    fn crops_follow_the_target_image_size() {
        let image = DynamicImage::new_rgba8(200, 100);
        let mut store = RegionStore::new();
        store.begin_source(RatioBox::new(0.0, 0.0, 0.25, 0.5));
        store.begin_source(RatioBox::new(0.9, 0.9, 1.2, 1.2));
        store.begin_source(RatioBox::new(1.1, 1.1, 1.2, 1.2));
        let pool = FontPool::from_paths(["a.ttf"]);
        let mut cache = FontCache::new();
        let mut rng = StdRng::seed_from_u64(3);
        let mut recognizer =
            ScriptedRecognizer::new(vec![Ok(String::new()), Ok(String::new())]);
        let ctx = TransplantContext {
            store: &store,
            pool: &pool,
            cache: &mut cache,
            style: &style(),
            rng: &mut rng,
            debug: None,
        };
        let (_, report) = process_image(&image, &mut recognizer, ctx).expect("process");
        assert_eq!(recognizer.seen, vec![(50, 50), (20, 10)]);
        assert_eq!(report.notices[2], Notice::SourceOutsideImage { pair: 2 });
    }

    #[test]
    fn failures_become_notices_and_processing_continues() {
        let image = DynamicImage::new_rgba8(100, 100);
        let mut store = RegionStore::new();
        for _ in 0..3 {
            store.begin_source(RatioBox::new(0.0, 0.0, 0.5, 0.5));
            store
                .append_destination(RatioBox::new(0.5, 0.5, 1.0, 1.0))
                .expect("append");
        }
        let pool = FontPool::from_paths(["/nonexistent/font.ttf"]);
        let mut cache = FontCache::new();
        let mut rng = StdRng::seed_from_u64(5);
        let mut recognizer = ScriptedRecognizer::new(vec![
            Err(RecognitionError::engine("boom")),
            Ok("  ".to_string()),
            Ok("ok".to_string()),
        ]);
        let ctx = TransplantContext {
            store: &store,
            pool: &pool,
            cache: &mut cache,
            style: &style(),
            rng: &mut rng,
            debug: None,
        };
        let (rendered, report) = process_image(&image, &mut recognizer, ctx).expect("process");

        assert_eq!(rendered.dimensions(), (100, 100));
        assert_eq!(recognizer.seen, vec![(50, 50); 3]);
        assert!(matches!(report.notices[0], Notice::RecognitionFailed { pair: 0, .. }));
        assert_eq!(report.notices[1], Notice::NoTextFound { pair: 1 });
        assert_eq!(report.texts[2].as_deref(), Some("ok"));
        assert_eq!(report.destinations_rendered, 1);
        assert_eq!(report.glyphs_drawn, 2);
    }

    #[test]
    fn later_pairs_read_text_transplanted_by_earlier_pairs() {
        if resolve_default_face().is_err() {
            return;
        }
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            200,
            100,
            Rgba([255, 255, 255, 255]),
        ));
        let mut store = RegionStore::new();
        store.begin_source(RatioBox::new(0.0, 0.0, 0.5, 1.0));
        store
            .append_destination(RatioBox::new(0.5, 0.0, 1.0, 1.0))
            .expect("append");
        store.begin_source(RatioBox::new(0.5, 0.0, 1.0, 1.0));
        let pool = FontPool::from_paths(["/nonexistent/font.ttf"]);
        let mut cache = FontCache::new();
        let mut rng = StdRng::seed_from_u64(9);
        let mut recognizer =
            ScriptedRecognizer::new(vec![Ok("WW".to_string()), Ok(String::new())]);
        let style = TransplantStyle {
            base_font_size: 40,
            color: Rgba([0, 0, 0, 255]),
            jitter: Jitter::none(),
        };
        let ctx = TransplantContext {
            store: &store,
            pool: &pool,
            cache: &mut cache,
            style: &style,
            rng: &mut rng,
            debug: None,
        };
        let (_, report) = process_image(&image, &mut recognizer, ctx).expect("process");
        assert_eq!(report.glyphs_drawn, 2);
        assert_eq!(recognizer.dark[0], 0);
        assert!(recognizer.dark[1] > 0);
    }

    #[test]
    fn debug_dir_receives_each_crop_and_its_text() {
        let dir = tempdir().expect("tempdir");
        let debug = CropDebug::new(dir.path().join("debug")).expect("debug dir");
        let image = DynamicImage::new_rgba8(40, 20);
        let mut store = RegionStore::new();
        store.begin_source(RatioBox::new(0.0, 0.0, 0.5, 1.0));
        store.begin_source(RatioBox::new(0.5, 0.0, 0.75, 0.5));
        let pool = FontPool::from_paths(["a.ttf"]);
        let mut cache = FontCache::new();
        let mut rng = StdRng::seed_from_u64(4);
        let mut recognizer = ScriptedRecognizer::new(vec![
            Ok("hi".to_string()),
            Err(RecognitionError::engine("boom")),
        ]);
        let ctx = TransplantContext {
            store: &store,
            pool: &pool,
            cache: &mut cache,
            style: &style(),
            rng: &mut rng,
            debug: Some(&debug),
        };
        process_image(&image, &mut recognizer, ctx).expect("process");

        let first = image::open(debug.crop_path(0)).expect("crop 1");
        assert_eq!((first.width(), first.height()), (20, 20));
        assert_eq!(fs::read_to_string(debug.text_path(0)).expect("text 1"), "hi");
        let second = image::open(debug.crop_path(1)).expect("crop 2");
        assert_eq!((second.width(), second.height()), (10, 10));
        assert_eq!(fs::read_to_string(debug.text_path(1)).expect("text 2"), "");
        assert!(debug.crop_path(1).ends_with("region-2.png"));
    }

    #[test]
    fn empty_store_or_pool_is_rejected() {
        let image = DynamicImage::new_rgba8(10, 10);
        let mut cache = FontCache::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut recognizer = ScriptedRecognizer::new(Vec::new());
        let store = RegionStore::new();
        let pool = FontPool::from_paths(["a.ttf"]);
        let ctx = TransplantContext {
            store: &store,
            pool: &pool,
            cache: &mut cache,
            style: &style(),
            rng: &mut rng,
            debug: None,
        };
        let err = process_image(&image, &mut recognizer, ctx).err().expect("error");
        assert_eq!(
            err.downcast_ref::<PreconditionError>(),
            Some(&PreconditionError::MissingRegions)
        );
    }

    #[tokio::test]
    async fn service_results_are_applied_in_pair_order() {
        let image = DynamicImage::new_rgba8(100, 100);
        let mut store = RegionStore::new();
        store.begin_source(RatioBox::new(0.0, 0.0, 0.1, 0.1));
        store.begin_source(RatioBox::new(0.0, 0.0, 0.2, 0.2));
        let mut service = RecognitionService::spawn(Box::new(ScriptedRecognizer::new(vec![
            Ok("first".to_string()),
            Ok("second".to_string()),
        ])));
        let pool = FontPool::from_paths(["a.ttf"]);
        let mut cache = FontCache::new();
        let mut rng = StdRng::seed_from_u64(2);
        let ctx = TransplantContext {
            store: &store,
            pool: &pool,
            cache: &mut cache,
            style: &style(),
            rng: &mut rng,
            debug: None,
        };
        let (_, report) = process_image_with_service(&image, &mut service, ctx)
            .await
            .expect("process");
        assert_eq!(
            report.texts,
            vec![Some("first".to_string()), Some("second".to_string())]
        );
        service.shutdown().await;
    }
}
