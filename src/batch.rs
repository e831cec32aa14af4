use anyhow::{Context, Result, bail};
use image::{DynamicImage, ImageFormat, RgbaImage};
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::PreconditionError;
use crate::font::{FontCache, FontPool};
use crate::ocr::Recognizer;
use crate::pipeline::{ProcessReport, TransplantContext, process_image};
use crate::regions::RegionStore;
use crate::render::TransplantStyle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    KeepExtension,
    Png,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keep" | "same" | "original" => Some(OutputFormat::KeepExtension),
            "png" => Some(OutputFormat::Png),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Running(usize),
    Previewing(usize),
    Completed,
    Cancelled,
}

pub trait PageProcessor {
    fn process(&mut self, image: &DynamicImage) -> Result<(RgbaImage, ProcessReport)>;
}

pub struct TransplantProcessor<'a, R: Rng + ?Sized> {
    pub recognizer: &'a mut dyn Recognizer,
    pub store: &'a RegionStore,
    pub pool: &'a FontPool,
    pub cache: &'a mut FontCache,
    pub style: &'a TransplantStyle,
    pub rng: &'a mut R,
}

impl<R: Rng + ?Sized> PageProcessor for TransplantProcessor<'_, R> {
    fn process(&mut self, image: &DynamicImage) -> Result<(RgbaImage, ProcessReport)> {
        let ctx = TransplantContext {
            store: self.store,
            pool: self.pool,
            cache: &mut *self.cache,
            style: self.style,
            rng: &mut *self.rng,
            debug: None,
        };
        process_image(image, &mut *self.recognizer, ctx)
    }
}

#[derive(Debug)]
pub struct BatchJob {
    images: Vec<PathBuf>,
    current_index: usize,
    output_folder: PathBuf,
    pending_render: Option<RgbaImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
    pub written: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct BatchRunner {
    state: BatchState,
    job: Option<BatchJob>,
    output_format: OutputFormat,
    summary: BatchSummary,
}

impl BatchRunner {
    pub fn new(output_format: OutputFormat) -> Self {
        Self {
            state: BatchState::Idle,
            job: None,
            output_format,
            summary: BatchSummary::default(),
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn summary(&self) -> &BatchSummary {
        &self.summary
    }

    pub fn current_image(&self) -> Option<&Path> {
        let job = self.job.as_ref()?;
        job.images.get(job.current_index).map(PathBuf::as_path)
    }

    pub fn pending_render(&self) -> Option<&RgbaImage> {
        self.job.as_ref()?.pending_render.as_ref()
    }

    pub fn start(
        &mut self,
        images: Vec<PathBuf>,
        output_folder: PathBuf,
        store: &RegionStore,
        pool: &FontPool,
    ) -> Result<(), PreconditionError> {
        if matches!(
            self.state,
            BatchState::Running(_) | BatchState::Previewing(_)
        ) {
            return Err(PreconditionError::BatchInProgress);
        }
        if store.is_empty() {
            return Err(PreconditionError::MissingRegions);
        }
        if pool.is_empty() {
            return Err(PreconditionError::MissingFonts);
        }
        if images.is_empty() {
            return Err(PreconditionError::MissingImages);
        }
        info!(
            "batch of {} images into {}",
            images.len(),
            output_folder.display()
        );
        self.summary = BatchSummary {
            total: images.len(),
            ..BatchSummary::default()
        };
        self.job = Some(BatchJob {
            images,
            current_index: 0,
            output_folder,
            pending_render: None,
        });
        self.state = BatchState::Running(0);
        Ok(())
    }

    /// Returns `None` once the batch completes.
    pub fn process_next(
        &mut self,
        processor: &mut dyn PageProcessor,
    ) -> Result<Option<ProcessReport>> {
        loop {
            let BatchState::Running(index) = self.state else {
                bail!("batch is not running ({:?})", self.state);
            };
            let Some(job) = self.job.as_mut() else {
                bail!("batch has no job");
            };
            let path = job.images[index].clone();
            match render_page(&path, processor) {
                Ok((rendered, report)) => {
                    for notice in &report.notices {
                        warn!("{}: {}", path.display(), notice);
                    }
                    job.pending_render = Some(rendered);
                    self.state = BatchState::Previewing(index);
                    return Ok(Some(report));
                }
                Err(err) => {
                    warn!("skipping {}: {:#}", path.display(), err);
                    self.summary.failed += 1;
                    self.advance();
                    if self.state == BatchState::Completed {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// A failed write still advances the batch; the image counts as failed.
    pub fn accept(&mut self) -> Result<PathBuf> {
        let (path, rendered) = self.take_pending()?;
        let result = match save_render(&rendered, &path) {
            Ok(()) => {
                info!("saved {}", path.display());
                self.summary.accepted += 1;
                self.summary.written.push(path.clone());
                Ok(path)
            }
            Err(err) => {
                warn!("failed to save {}: {:#}", path.display(), err);
                self.summary.failed += 1;
                Err(err)
            }
        };
        self.advance();
        result
    }

    pub fn reject(&mut self) -> Result<()> {
        self.take_pending()?;
        self.summary.rejected += 1;
        self.advance();
        Ok(())
    }

    pub fn skip(&mut self) -> Result<()> {
        self.reject()
    }

    pub fn cancel(&mut self) {
        if matches!(
            self.state,
            BatchState::Running(_) | BatchState::Previewing(_)
        ) {
            self.job = None;
            self.state = BatchState::Cancelled;
            info!("batch cancelled");
        }
    }

    pub fn run_automatic(&mut self, processor: &mut dyn PageProcessor) -> Result<usize> {
        while self.process_next(processor)?.is_some() {
            // Failures are already counted in the summary.
            let _ = self.accept();
        }
        Ok(self.summary.accepted)
    }

    fn take_pending(&mut self) -> Result<(PathBuf, RgbaImage)> {
        let BatchState::Previewing(index) = self.state else {
            bail!("no render is waiting for review ({:?})", self.state);
        };
        let format = self.output_format;
        let Some(job) = self.job.as_mut() else {
            bail!("batch has no job");
        };
        let rendered = job
            .pending_render
            .take()
            .context("pending render is missing")?;
        let path = output_path(&job.images[index], &job.output_folder, format);
        Ok((path, rendered))
    }

    fn advance(&mut self) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        job.pending_render = None;
        job.current_index += 1;
        if job.current_index < job.images.len() {
            self.state = BatchState::Running(job.current_index);
        } else {
            self.job = None;
            self.state = BatchState::Completed;
            info!(
                "batch completed: {} saved, {} rejected, {} failed",
                self.summary.accepted, self.summary.rejected, self.summary.failed
            );
        }
    }
}

fn render_page(
    path: &Path,
    processor: &mut dyn PageProcessor,
) -> Result<(RgbaImage, ProcessReport)> {
    let image =
        image::open(path).with_context(|| format!("failed to open image: {}", path.display()))?;
    processor.process(&image)
}

pub fn output_path(image: &Path, folder: &Path, format: OutputFormat) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    let ext = match format {
        OutputFormat::Png => "png".to_string(),
        OutputFormat::KeepExtension => image
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_else(|| "png".to_string()),
    };
    folder.join(format!("{}_modified.{}", stem, ext))
}

/// Writes `image`, dropping alpha for formats that cannot store it.
pub fn save_render(image: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output folder: {}", parent.display()))?;
    }
    let format = ImageFormat::from_path(path)
        .with_context(|| format!("unsupported output format: {}", path.display()))?;
    let result = match format {
        ImageFormat::Jpeg | ImageFormat::Bmp => DynamicImage::ImageRgba8(image.clone())
            .to_rgb8()
            .save_with_format(path, format),
        _ => image.save_with_format(path, format),
    };
    result.with_context(|| format!("failed to write image: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::RatioBox;
    use image::Rgba;
    use tempfile::tempdir;

    struct FillProcessor {
        calls: usize,
    }

    impl PageProcessor for FillProcessor {
        fn process(&mut self, image: &DynamicImage) -> Result<(RgbaImage, ProcessReport)> {
            self.calls += 1;
            let rendered =
                RgbaImage::from_pixel(image.width(), image.height(), Rgba([0, 0, 0, 255]));
            Ok((rendered, ProcessReport::default()))
        }
    }

    fn ready_store() -> RegionStore {
        let mut store = RegionStore::new();
        store.begin_source(RatioBox::new(0.0, 0.0, 0.5, 0.5));
        store
    }

    fn write_images(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                let page = RgbaImage::from_pixel(6, 4, Rgba([255, 255, 255, 255]));
                save_render(&page, &path).expect("write image");
                path
            })
            .collect()
    }

    #[test]
    fn start_checks_preconditions_and_stays_idle() {
        let pool = FontPool::from_paths(["a.ttf"]);
        let mut runner = BatchRunner::new(OutputFormat::KeepExtension);
        assert_eq!(
            runner.start(Vec::new(), PathBuf::from("out"), &ready_store(), &pool),
            Err(PreconditionError::MissingImages)
        );
        assert_eq!(
            runner.start(
                vec![PathBuf::from("a.png")],
                PathBuf::from("out"),
                &RegionStore::new(),
                &pool
            ),
            Err(PreconditionError::MissingRegions)
        );
        assert_eq!(
            runner.start(
                vec![PathBuf::from("a.png")],
                PathBuf::from("out"),
                &ready_store(),
                &FontPool::new()
            ),
            Err(PreconditionError::MissingFonts)
        );
        assert_eq!(runner.state(), BatchState::Idle);
    }

    #[test]
    fn review_walks_through_accept_and_reject() {
        let dir = tempdir().expect("tempdir");
        let images = write_images(dir.path(), &["one.png", "two.png"]);
        let out = dir.path().join("out");
        let pool = FontPool::from_paths(["a.ttf"]);
        let mut runner = BatchRunner::new(OutputFormat::KeepExtension);
        let mut processor = FillProcessor { calls: 0 };
        runner
            .start(images, out.clone(), &ready_store(), &pool)
            .expect("start");

        assert_eq!(runner.state(), BatchState::Running(0));
        runner.process_next(&mut processor).expect("process");
        assert_eq!(runner.state(), BatchState::Previewing(0));
        assert!(runner.pending_render().is_some());
        let saved = runner.accept().expect("accept");
        assert_eq!(saved, out.join("one_modified.png"));
        assert!(saved.exists());

        assert_eq!(runner.state(), BatchState::Running(1));
        runner.process_next(&mut processor).expect("process");
        runner.skip().expect("skip");
        assert!(!out.join("two_modified.png").exists());

        assert_eq!(runner.state(), BatchState::Completed);
        let summary = runner.summary();
        assert_eq!((summary.accepted, summary.rejected, summary.failed), (1, 1, 0));
        assert!(runner.accept().is_err());
    }

    #[test]
    fn accepting_every_image_completes_with_matching_count() {
        let dir = tempdir().expect("tempdir");
        let images = write_images(dir.path(), &["p1.png", "p2.png", "p3.png"]);
        let pool = FontPool::from_paths(["a.ttf"]);
        let mut runner = BatchRunner::new(OutputFormat::KeepExtension);
        let mut processor = FillProcessor { calls: 0 };
        runner
            .start(images, dir.path().join("out"), &ready_store(), &pool)
            .expect("start");
        let mut accepts = 0;
        while runner.process_next(&mut processor).expect("process").is_some() {
            runner.accept().expect("accept");
            accepts += 1;
        }
        assert_eq!(runner.state(), BatchState::Completed);
        assert_eq!(accepts, 3);
        assert_eq!(runner.summary().accepted, accepts);
        assert_eq!(runner.summary().written.len(), accepts);
    }

    #[test]
    fn unreadable_images_are_skipped_automatically() {
        let dir = tempdir().expect("tempdir");
        let mut images = write_images(dir.path(), &["a.png"]);
        let broken = dir.path().join("broken.png");
        fs::write(&broken, b"not an image").expect("write");
        images.insert(0, broken);
        images.push(dir.path().join("missing.jpg"));
        let pool = FontPool::from_paths(["a.ttf"]);
        let mut runner = BatchRunner::new(OutputFormat::KeepExtension);
        let mut processor = FillProcessor { calls: 0 };
        runner
            .start(images, dir.path().join("out"), &ready_store(), &pool)
            .expect("start");

        runner.process_next(&mut processor).expect("process");
        assert_eq!(runner.state(), BatchState::Previewing(1));
        runner.reject().expect("reject");
        assert_eq!(runner.process_next(&mut processor).expect("process"), None);
        assert_eq!(runner.state(), BatchState::Completed);
        assert_eq!(runner.summary().failed, 2);
        assert_eq!(processor.calls, 1);
    }

    #[test]
    fn automatic_mode_writes_every_image() {
        let dir = tempdir().expect("tempdir");
        let images = write_images(dir.path(), &["a.png", "b.bmp", "c.jpg"]);
        let out = dir.path().join("out");
        let pool = FontPool::from_paths(["a.ttf"]);
        let mut runner = BatchRunner::new(OutputFormat::Png);
        runner
            .start(images, out.clone(), &ready_store(), &pool)
            .expect("start");
        let written = runner
            .run_automatic(&mut FillProcessor { calls: 0 })
            .expect("run");
        assert_eq!(written, 3);
        for name in ["a", "b", "c"] {
            assert!(out.join(format!("{}_modified.png", name)).exists());
        }
        assert_eq!(runner.state(), BatchState::Completed);
    }

    #[test]
    fn save_failure_counts_as_failed_and_advances() {
        let dir = tempdir().expect("tempdir");
        let images = write_images(dir.path(), &["a.png", "b.png"]);
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, b"file").expect("write");
        let pool = FontPool::from_paths(["a.ttf"]);
        let mut runner = BatchRunner::new(OutputFormat::KeepExtension);
        let mut processor = FillProcessor { calls: 0 };
        runner
            .start(images, blocker, &ready_store(), &pool)
            .expect("start");
        runner.process_next(&mut processor).expect("process");
        assert!(runner.accept().is_err());
        assert_eq!(runner.state(), BatchState::Running(1));
        assert_eq!(runner.summary().failed, 1);
        assert!(runner.pending_render().is_none());
    }

    #[test]
    fn cancel_drops_batch_state() {
        let dir = tempdir().expect("tempdir");
        let images = write_images(dir.path(), &["a.png"]);
        let pool = FontPool::from_paths(["a.ttf"]);
        let mut runner = BatchRunner::new(OutputFormat::KeepExtension);
        runner
            .start(images, dir.path().join("out"), &ready_store(), &pool)
            .expect("start");
        runner
            .process_next(&mut FillProcessor { calls: 0 })
            .expect("process");
        runner.cancel();
        assert_eq!(runner.state(), BatchState::Cancelled);
        assert!(runner.current_image().is_none());
        assert!(runner.pending_render().is_none());
    }

    #[test]
    fn start_is_refused_while_a_batch_is_in_progress() {
        let dir = tempdir().expect("tempdir");
        let images = write_images(dir.path(), &["a.png", "b.png"]);
        let pool = FontPool::from_paths(["a.ttf"]);
        let mut runner = BatchRunner::new(OutputFormat::KeepExtension);
        runner
            .start(images.clone(), dir.path().join("out"), &ready_store(), &pool)
            .expect("start");
        runner
            .process_next(&mut FillProcessor { calls: 0 })
            .expect("process");

        let restart = runner.start(
            images.clone(),
            dir.path().join("other"),
            &ready_store(),
            &pool,
        );
        assert_eq!(restart, Err(PreconditionError::BatchInProgress));
        assert_eq!(runner.state(), BatchState::Previewing(0));
        assert!(runner.pending_render().is_some());

        runner.cancel();
        runner
            .start(images, dir.path().join("other"), &ready_store(), &pool)
            .expect("restart after cancel");
        assert_eq!(runner.state(), BatchState::Running(0));
    }

    #[test]
    fn output_names_follow_the_format() {
        let folder = Path::new("out");
        assert_eq!(
            output_path(Path::new("/in/page 1.jpeg"), folder, OutputFormat::KeepExtension),
            folder.join("page 1_modified.jpeg")
        );
        assert_eq!(
            output_path(Path::new("/in/page.bmp"), folder, OutputFormat::Png),
            folder.join("page_modified.png")
        );
    }
}
