use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};

use text_transplant::batch::{BatchRunner, save_render};
use text_transplant::ocr::{EngineConfig, OcrEngineKind, list_tesseract_languages};
use text_transplant::{PixelPoint, RegionStore, Session, Size, load_settings};

const DEFAULT_REGIONS_FILE: &str = "regions.json";

#[derive(Parser, Debug)]
#[command(
    name = "text-transplant",
    version,
    about = "Mark region pairs on an image and transplant recognized text between them"
)]
struct Cli {
    /// Region project file (default: ./regions.json)
    #[arg(short = 'R', long = "regions", global = true)]
    regions: Option<PathBuf>,

    /// Font file to render with (repeatable; adds to settings [fonts])
    #[arg(short = 'F', long = "font", global = true)]
    fonts: Vec<PathBuf>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings", global = true)]
    read_settings: Option<PathBuf>,

    /// OCR language (ch_sim, ch_tra, ja, en, ko; combine with '+')
    #[arg(short = 'l', long = "lang", global = true)]
    lang: Option<String>,

    /// OCR engine (tesseract, paddle-json)
    #[arg(short = 'e', long = "engine", global = true)]
    engine: Option<String>,

    /// Text color (any CSS color: name, #rrggbb, rgb(...))
    #[arg(short = 'c', long = "color", global = true)]
    color: Option<String>,

    /// Base font size in pixels
    #[arg(long = "font-size", global = true)]
    font_size: Option<u32>,

    /// Seed for font/size/position randomization
    #[arg(long = "seed", global = true)]
    seed: Option<u64>,

    /// Enable verbose logging
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Edit the region project file
    Mark {
        #[command(subcommand)]
        action: MarkAction,
    },
    /// Recognize and transplant text on one image
    Process {
        #[arg(long = "image")]
        image: PathBuf,
        #[arg(long = "output")]
        output: PathBuf,
        /// Write each region's OCR crop and text here (region-N.png, region-N.txt)
        #[arg(long = "debug-dir")]
        debug_dir: Option<PathBuf>,
    },
    /// Apply the regions to many images
    Batch {
        #[arg(long = "output-dir")]
        output_dir: PathBuf,
        /// Ask before saving each result (a)ccept, (r)eject, (s)kip, (q)uit
        #[arg(long = "review")]
        review: bool,
        images: Vec<PathBuf>,
    },
    /// Draw the marked regions over an image
    Preview {
        #[arg(long = "image")]
        image: PathBuf,
        #[arg(long = "output")]
        output: PathBuf,
        /// Also draw the marking square centered at X,Y (image pixels)
        #[arg(long = "cursor", value_parser = parse_point)]
        cursor: Option<PixelPoint>,
    },
    /// List languages installed for tesseract
    Languages,
}

#[derive(Subcommand, Debug)]
enum MarkAction {
    /// Start a new pair with a square source region centered at --at
    Source(ClickArgs),
    /// Add a square destination region to the latest pair
    Dest(ClickArgs),
    /// Add a run of destination regions along a drag
    Drag(DragArgs),
    /// Remove every pair
    Clear,
    /// Print the pairs
    Show,
}

#[derive(Args, Debug)]
struct ClickArgs {
    /// Pointer position X,Y in display pixels
    #[arg(long = "at", value_parser = parse_point)]
    at: PixelPoint,
    /// Display size WxH the position refers to
    #[arg(long = "display", value_parser = parse_size)]
    display: Size,
    #[arg(long = "box-size")]
    box_size: Option<u32>,
}

#[derive(Args, Debug)]
struct DragArgs {
    #[arg(long = "from", value_parser = parse_point)]
    from: PixelPoint,
    #[arg(long = "to", value_parser = parse_point)]
    to: PixelPoint,
    /// Intermediate pointer positions (the first one fixes the direction)
    #[arg(long = "via", value_parser = parse_point)]
    via: Vec<PixelPoint>,
    #[arg(long = "display", value_parser = parse_size)]
    display: Size,
    #[arg(long = "box-size")]
    box_size: Option<u32>,
    #[arg(long = "gap")]
    gap: Option<u32>,
}

fn parse_point(value: &str) -> Result<PixelPoint, String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y (got '{}')", value))?;
    let x = x.trim().parse::<f64>().map_err(|err| err.to_string())?;
    let y = y.trim().parse::<f64>().map_err(|err| err.to_string())?;
    Ok(PixelPoint::new(x, y))
}

fn parse_size(value: &str) -> Result<Size, String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH (got '{}')", value))?;
    let w = w.trim().parse::<u32>().map_err(|err| err.to_string())?;
    let h = h.trim().parse::<u32>().map_err(|err| err.to_string())?;
    Size::new(w, h).map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    text_transplant::logging::init(cli.verbose)?;

    let settings = load_settings(cli.read_settings.as_deref())?;
    let mut session = Session::new(&settings, cli.seed)?;
    for font in &cli.fonts {
        session.add_font(font.clone());
    }
    if let Some(lang) = cli.lang.as_deref() {
        session.set_language(lang.parse()?);
    }
    if let Some(engine) = cli.engine.as_deref() {
        let kind = OcrEngineKind::parse(engine)
            .ok_or_else(|| anyhow!("unknown ocr engine '{}'", engine))?;
        session.set_engine(EngineConfig {
            kind,
            ..settings.engine_config()
        });
    }
    if let Some(color) = cli.color.as_deref() {
        session.set_color(color)?;
    }
    if let Some(size) = cli.font_size {
        session.set_font_size(size);
    }
    let regions_path = cli
        .regions
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_REGIONS_FILE));

    match cli.command {
        Command::Mark { action } => run_mark(&mut session, &regions_path, action),
        Command::Process {
            image,
            output,
            debug_dir,
        } => {
            if let Some(dir) = debug_dir.as_deref() {
                session.set_debug_dir(dir)?;
            }
            run_process(&mut session, &regions_path, &image, &output).await
        }
        Command::Batch {
            output_dir,
            review,
            images,
        } => run_batch(&mut session, &regions_path, images, output_dir, review),
        Command::Preview {
            image,
            output,
            cursor,
        } => run_preview(&mut session, &regions_path, &image, &output, cursor),
        Command::Languages => {
            for lang in list_tesseract_languages(settings.ocr_executable.as_deref())? {
                println!("{}", lang);
            }
            Ok(())
        }
    }
}

fn load_store(path: &Path) -> Result<RegionStore> {
    if path.exists() {
        RegionStore::load(path)
    } else {
        Ok(RegionStore::new())
    }
}

fn run_mark(session: &mut Session, regions_path: &Path, action: MarkAction) -> Result<()> {
    session.replace_store(load_store(regions_path)?);
    match action {
        MarkAction::Source(args) => {
            apply_click_args(session, &args);
            let id = session.mark_source(args.at)?;
            println!("pair {}: source marked", id.index() + 1);
        }
        MarkAction::Dest(args) => {
            apply_click_args(session, &args);
            session.mark_destination(args.at)?;
            let pairs = session.store().len();
            let count = session.store().all()[pairs - 1].destinations().len();
            println!("pair {}: {} destination(s)", pairs, count);
        }
        MarkAction::Drag(args) => {
            session.set_display(args.display);
            if let Some(size) = args.box_size {
                session.set_box_size(size);
            }
            if let Some(gap) = args.gap {
                session.set_gap(gap);
            }
            session.drag_start(args.from);
            for point in args.via.iter().chain(std::iter::once(&args.to)) {
                session.drag_motion(*point);
            }
            let committed = session.drag_release()?;
            println!("{} destination(s) added", committed);
        }
        MarkAction::Clear => {
            session.clear_regions();
            println!("regions cleared");
        }
        MarkAction::Show => {
            print_store(session.store());
            return Ok(());
        }
    }
    session.store().save(regions_path)
}

fn apply_click_args(session: &mut Session, args: &ClickArgs) {
    session.set_display(args.display);
    if let Some(size) = args.box_size {
        session.set_box_size(size);
    }
}

fn print_store(store: &RegionStore) {
    if store.is_empty() {
        println!("no regions");
        return;
    }
    for (index, pair) in store.all().iter().enumerate() {
        let src = pair.source();
        println!(
            "pair {}: source ({:.4}, {:.4}, {:.4}, {:.4})",
            index + 1,
            src.x1,
            src.y1,
            src.x2,
            src.y2
        );
        for dst in pair.destinations() {
            println!(
                "  destination ({:.4}, {:.4}, {:.4}, {:.4})",
                dst.x1, dst.y1, dst.x2, dst.y2
            );
        }
    }
}

// A new reference discards regions, so the project file is applied afterwards.
fn open_reference(session: &mut Session, regions_path: &Path, image: &Path) -> Result<()> {
    session.load_reference(image)?;
    session.replace_store(load_store(regions_path)?);
    Ok(())
}

async fn run_process(
    session: &mut Session,
    regions_path: &Path,
    image: &Path,
    output: &Path,
) -> Result<()> {
    open_reference(session, regions_path, image)?;
    let report = session.process_reference().await;
    session.shutdown().await;
    let report = report?;
    for notice in &report.notices {
        eprintln!("warning: {}", notice);
    }
    session.save_rendered(output)?;
    println!(
        "{} glyph(s) in {} destination(s) -> {}",
        report.glyphs_drawn,
        report.destinations_rendered,
        output.display()
    );
    Ok(())
}

fn run_preview(
    session: &mut Session,
    regions_path: &Path,
    image: &Path,
    output: &Path,
    cursor: Option<PixelPoint>,
) -> Result<()> {
    open_reference(session, regions_path, image)?;
    if let Some(at) = cursor {
        session.hover(at);
    }
    let overlay = session.overlay()?;
    save_render(&overlay, output)?;
    println!("{}", output.display());
    Ok(())
}

fn run_batch(
    session: &mut Session,
    regions_path: &Path,
    images: Vec<PathBuf>,
    output_dir: PathBuf,
    review: bool,
) -> Result<()> {
    session.replace_store(load_store(regions_path)?);
    let mut runner = BatchRunner::new(session.output_format());
    runner.start(images, output_dir, session.store(), session.fonts())?;
    let mut recognizer = session
        .build_recognizer()
        .context("failed to start the recognizer")?;
    let mut processor = session.transplant_processor(recognizer.as_mut());

    if review {
        review_batch(&mut runner, &mut processor)?;
    } else {
        runner.run_automatic(&mut processor)?;
    }

    let summary = runner.summary();
    println!(
        "{} of {} image(s) saved ({} rejected, {} failed)",
        summary.accepted, summary.total, summary.rejected, summary.failed
    );
    Ok(())
}

fn review_batch(
    runner: &mut BatchRunner,
    processor: &mut dyn text_transplant::PageProcessor,
) -> Result<()> {
    let preview = tempfile::Builder::new()
        .prefix("text-transplant-review-")
        .suffix(".png")
        .tempfile()?;
    let stdin = io::stdin();
    let mut stdin_lock = stdin.lock();
    let mut line = String::new();
    let total = runner.summary().total;

    while let Some(report) = runner.process_next(processor)? {
        let current = runner
            .current_image()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        for notice in &report.notices {
            eprintln!("warning: {}", notice);
        }
        let rendered = runner
            .pending_render()
            .ok_or_else(|| anyhow!("no pending render"))?;
        save_render(rendered, preview.path())?;
        let index = match runner.state() {
            text_transplant::BatchState::Previewing(index) => index + 1,
            _ => 0,
        };

        loop {
            print!(
                "[{}/{}] {} (preview: {}) accept/reject/skip/quit [a/r/s/q]: ",
                index,
                total,
                current,
                preview.path().display()
            );
            io::stdout().flush()?;
            line.clear();
            if stdin_lock.read_line(&mut line)? == 0 {
                runner.cancel();
                return Ok(());
            }
            match line.trim() {
                "a" | "accept" => {
                    if let Err(err) = runner.accept() {
                        eprintln!("warning: {:#}", err);
                    }
                    break;
                }
                "r" | "reject" => {
                    runner.reject()?;
                    break;
                }
                "s" | "skip" => {
                    runner.skip()?;
                    break;
                }
                "q" | "quit" => {
                    runner.cancel();
                    return Ok(());
                }
                other => eprintln!("unknown answer: {}", other),
            }
        }
    }
    Ok(())
}
