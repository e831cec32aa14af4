use image::DynamicImage;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

use super::{LanguageSelection, Recognizer, flatten_text};
use crate::error::RecognitionError;

const DEFAULT_EXECUTABLE: &str = "tesseract";
// Treat the crop as a single uniform block of text.
const PAGE_SEGMENTATION_MODE: u32 = 6;

pub struct TesseractRecognizer {
    language: LanguageSelection,
    executable: PathBuf,
    codes: String,
}

impl TesseractRecognizer {
    pub fn new(
        language: LanguageSelection,
        executable: Option<PathBuf>,
    ) -> Result<Self, RecognitionError> {
        let executable = executable.unwrap_or_else(|| PathBuf::from(DEFAULT_EXECUTABLE));
        let codes = normalize_languages(&executable, &language)?;
        debug!("tesseract ready ({}; -l {})", executable.display(), codes);
        Ok(Self {
            language,
            executable,
            codes,
        })
    }
}

impl Recognizer for TesseractRecognizer {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn language(&self) -> &LanguageSelection {
        &self.language
    }

    fn recognize(&mut self, crop: &DynamicImage) -> Result<String, RecognitionError> {
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile()?;
        crop.write_to(&mut tmp, image::ImageFormat::Png)
            .map_err(|err| RecognitionError::engine(format!("failed to write crop: {}", err)))?;
        tmp.flush()?;
        let stdout = run_tesseract_text(&self.executable, tmp.path(), &self.codes)?;
        Ok(flatten_text(stdout.lines()))
    }
}

pub fn list_tesseract_languages(
    executable: Option<&Path>,
) -> Result<Vec<String>, RecognitionError> {
    let executable = executable.unwrap_or_else(|| Path::new(DEFAULT_EXECUTABLE));
    let output = Command::new(executable)
        .arg("--list-langs")
        .output()
        .map_err(|err| spawn_error(executable, err))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RecognitionError::engine(format!(
            "tesseract --list-langs failed: {}",
            stderr.trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut langs = Vec::new();
    for (idx, line) in stdout.lines().enumerate() {
        if idx == 0 {
            continue;
        }
        let value = line.trim();
        if !value.is_empty() {
            langs.push(value.to_string());
        }
    }
    Ok(langs)
}

fn normalize_languages(
    executable: &Path,
    language: &LanguageSelection,
) -> Result<String, RecognitionError> {
    let requested: Vec<&str> = language
        .languages()
        .iter()
        .map(|lang| lang.tesseract_code())
        .collect();

    let available = match list_tesseract_languages(Some(executable)) {
        Ok(list) => list,
        Err(err @ RecognitionError::NotInitialized(_)) => return Err(err),
        Err(_) => return Ok(requested.join("+")),
    };

    let (chosen, missing): (Vec<&str>, Vec<&str>) = requested
        .into_iter()
        .partition(|code| available.iter().any(|value| value == code));

    if chosen.is_empty() {
        return Err(RecognitionError::UnsupportedLanguage(format!(
            "{} (available: {})",
            missing.join(", "),
            available.join(", ")
        )));
    }
    if !missing.is_empty() {
        warn!(
            "ocr language(s) not available: {} (available: {})",
            missing.join(", "),
            available.join(", ")
        );
    }
    Ok(chosen.join("+"))
}

fn run_tesseract_text(
    executable: &Path,
    path: &Path,
    languages: &str,
) -> Result<String, RecognitionError> {
    let output = Command::new(executable)
        .arg(path)
        .arg("stdout")
        .arg("-l")
        .arg(languages)
        .arg("--oem")
        .arg("1")
        .arg("--psm")
        .arg(PAGE_SEGMENTATION_MODE.to_string())
        .output()
        .map_err(|err| spawn_error(executable, err))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RecognitionError::engine(format!(
            "tesseract failed: {}",
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn spawn_error(executable: &Path, err: std::io::Error) -> RecognitionError {
    if err.kind() == ErrorKind::NotFound {
        RecognitionError::NotInitialized(format!(
            "{} not found (is tesseract installed?)",
            executable.display()
        ))
    } else {
        RecognitionError::Io(err)
    }
}
