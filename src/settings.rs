use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::batch::OutputFormat;
use crate::color::parse_color;
use crate::ocr::{EngineConfig, LanguageSelection, OcrEngineKind};
use crate::paths::{expand_tilde, settings_dir};
use crate::render::{Jitter, TransplantStyle};

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

pub const MIN_BOX_SIZE: u32 = 10;
pub const MAX_BOX_SIZE: u32 = 200;

#[derive(Debug, Clone)]
pub struct Settings {
    pub box_size: u32,
    pub font_size: u32,
    pub font_color: String,
    pub gap: u32,
    pub jitter: Jitter,
    pub ocr_engine: OcrEngineKind,
    pub ocr_language: String,
    pub ocr_executable: Option<PathBuf>,
    pub ocr_config_path: Option<PathBuf>,
    pub font_paths: Vec<PathBuf>,
    pub output_format: OutputFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            box_size: 50,
            font_size: 42,
            font_color: "black".to_string(),
            gap: 1,
            jitter: Jitter::default(),
            ocr_engine: OcrEngineKind::Tesseract,
            ocr_language: "ja".to_string(),
            ocr_executable: None,
            ocr_config_path: None,
            font_paths: Vec::new(),
            output_format: OutputFormat::KeepExtension,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    render: Option<RenderSettings>,
    ocr: Option<OcrSettings>,
    fonts: Option<FontSettings>,
    batch: Option<BatchSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderSettings {
    box_size: Option<u32>,
    font_size: Option<u32>,
    font_color: Option<String>,
    gap: Option<u32>,
    jitter: Option<JitterSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct JitterSettings {
    size_min: Option<f64>,
    size_max: Option<f64>,
    x_ratio: Option<f64>,
    y_ratio: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrSettings {
    engine: Option<String>,
    language: Option<String>,
    executable: Option<String>,
    config_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FontSettings {
    paths: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchSettings {
    output_format: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    settings.merge(parse_settings(DEFAULT_SETTINGS_TOML, Path::new("<embedded>"))?);
    ensure_settings_file()?;

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(dir) = settings_dir() {
        ordered_paths.push(dir.join("settings.toml"));
        ordered_paths.push(dir.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            debug!("merging settings from {}", path.display());
            settings.merge(parse_settings(&content, &path)?);
        }
    }

    Ok(settings)
}

fn parse_settings(content: &str, path: &Path) -> Result<SettingsFile> {
    toml::from_str(content).with_context(|| format!("failed to parse settings: {}", path.display()))
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(render) = incoming.render {
            if let Some(size) = render.box_size
                && (MIN_BOX_SIZE..=MAX_BOX_SIZE).contains(&size)
            {
                self.box_size = size;
            }
            if let Some(size) = render.font_size
                && size > 0
            {
                self.font_size = size;
            }
            if let Some(color) = render.font_color {
                if parse_color(&color).is_ok() {
                    self.font_color = color;
                } else {
                    warn!("ignoring invalid font_color '{}'", color);
                }
            }
            if let Some(gap) = render.gap {
                self.gap = gap;
            }
            if let Some(jitter) = render.jitter {
                self.jitter.merge(jitter);
            }
        }
        if let Some(ocr) = incoming.ocr {
            if let Some(engine) = ocr.engine {
                match OcrEngineKind::parse(&engine) {
                    Some(kind) => self.ocr_engine = kind,
                    None => warn!("ignoring unknown ocr engine '{}'", engine),
                }
            }
            if let Some(language) = ocr.language
                && !language.trim().is_empty()
            {
                self.ocr_language = language;
            }
            if let Some(path) = non_empty_path(ocr.executable) {
                self.ocr_executable = Some(path);
            }
            if let Some(path) = non_empty_path(ocr.config_path) {
                self.ocr_config_path = Some(path);
            }
        }
        if let Some(fonts) = incoming.fonts
            && let Some(paths) = fonts.paths
        {
            self.font_paths = paths
                .iter()
                .filter_map(|path| non_empty_path(Some(path.clone())))
                .collect();
        }
        if let Some(batch) = incoming.batch
            && let Some(format) = batch.output_format
        {
            match OutputFormat::parse(&format) {
                Some(format) => self.output_format = format,
                None => warn!("ignoring unknown output_format '{}'", format),
            }
        }
    }

    pub fn transplant_style(&self) -> Result<TransplantStyle> {
        Ok(TransplantStyle {
            base_font_size: self.font_size,
            color: parse_color(&self.font_color)?,
            jitter: self.jitter,
        })
    }

    pub fn language_selection(&self) -> Result<LanguageSelection> {
        Ok(self.ocr_language.parse()?)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            kind: self.ocr_engine,
            executable: self.ocr_executable.clone(),
            config_path: self.ocr_config_path.clone(),
        }
    }
}

impl Jitter {
    fn merge(&mut self, incoming: JitterSettings) {
        let size_min = incoming.size_min.unwrap_or(self.size_min);
        let size_max = incoming.size_max.unwrap_or(self.size_max);
        if size_min > 0.0 && size_min <= size_max {
            self.size_min = size_min;
            self.size_max = size_max;
        } else {
            warn!(
                "ignoring jitter size range {}..{}",
                size_min, size_max
            );
        }
        if let Some(ratio) = incoming.x_ratio
            && ratio >= 0.0
        {
            self.x_ratio = ratio;
        }
        if let Some(ratio) = incoming.y_ratio
            && ratio >= 0.0
        {
            self.y_ratio = ratio;
        }
    }
}

fn non_empty_path(value: Option<String>) -> Option<PathBuf> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(expand_tilde(trimmed))
    }
}

fn ensure_settings_file() -> Result<()> {
    let Some(dir) = settings_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create settings directory: {}", dir.display()))?;
    let path = dir.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}
