mod paddle;
mod service;
mod tesseract;

use image::DynamicImage;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::RecognitionError;

pub use paddle::{PaddleJsonConfig, PaddleJsonRecognizer};
pub use service::{JobId, PendingRecognition, RecognitionService};
pub use tesseract::{TesseractRecognizer, list_tesseract_languages};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrLanguage {
    ChineseSimplified,
    ChineseTraditional,
    Japanese,
    English,
    Korean,
}

impl OcrLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrLanguage::ChineseSimplified => "ch_sim",
            OcrLanguage::ChineseTraditional => "ch_tra",
            OcrLanguage::Japanese => "ja",
            OcrLanguage::English => "en",
            OcrLanguage::Korean => "ko",
        }
    }

    pub fn tesseract_code(&self) -> &'static str {
        match self {
            OcrLanguage::ChineseSimplified => "chi_sim",
            OcrLanguage::ChineseTraditional => "chi_tra",
            OcrLanguage::Japanese => "jpn",
            OcrLanguage::English => "eng",
            OcrLanguage::Korean => "kor",
        }
    }

    fn parse_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "ch_sim" | "chi_sim" | "zh" | "zh-hans" | "zho-hans" => {
                Some(OcrLanguage::ChineseSimplified)
            }
            "ch_tra" | "chi_tra" | "zh-hant" | "zho-hant" => Some(OcrLanguage::ChineseTraditional),
            "ja" | "jpn" | "japan" => Some(OcrLanguage::Japanese),
            "en" | "eng" => Some(OcrLanguage::English),
            "ko" | "kor" | "korean" => Some(OcrLanguage::Korean),
            _ => None,
        }
    }
}

/// One or more languages, written `ch_sim+ja` on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSelection(Vec<OcrLanguage>);

impl LanguageSelection {
    pub fn single(language: OcrLanguage) -> Self {
        Self(vec![language])
    }

    pub fn languages(&self) -> &[OcrLanguage] {
        &self.0
    }

    pub fn primary(&self) -> OcrLanguage {
        self.0[0]
    }
}

impl FromStr for LanguageSelection {
    type Err = RecognitionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut languages = Vec::new();
        for raw in value.split(['+', ',', ' ']) {
            if raw.trim().is_empty() {
                continue;
            }
            let language = OcrLanguage::parse_code(raw)
                .ok_or_else(|| RecognitionError::UnsupportedLanguage(raw.trim().to_string()))?;
            if !languages.contains(&language) {
                languages.push(language);
            }
        }
        if languages.is_empty() {
            return Err(RecognitionError::UnsupportedLanguage(value.to_string()));
        }
        Ok(Self(languages))
    }
}

impl fmt::Display for LanguageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes: Vec<&str> = self.0.iter().map(OcrLanguage::as_str).collect();
        f.write_str(&codes.join("+"))
    }
}

/// The language is fixed when the adapter is built.
pub trait Recognizer: Send {
    fn name(&self) -> &'static str;

    fn language(&self) -> &LanguageSelection;

    fn recognize(&mut self, crop: &DynamicImage) -> Result<String, RecognitionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrEngineKind {
    Tesseract,
    PaddleJson,
}

impl OcrEngineKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tesseract" => Some(OcrEngineKind::Tesseract),
            "paddle" | "paddle-json" | "paddleocr-json" => Some(OcrEngineKind::PaddleJson),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OcrEngineKind::Tesseract => "tesseract",
            OcrEngineKind::PaddleJson => "paddle-json",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub kind: OcrEngineKind,
    pub executable: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

pub fn build_recognizer(
    engine: &EngineConfig,
    language: &LanguageSelection,
) -> Result<Box<dyn Recognizer>, RecognitionError> {
    match engine.kind {
        OcrEngineKind::Tesseract => Ok(Box::new(TesseractRecognizer::new(
            language.clone(),
            engine.executable.clone(),
        )?)),
        OcrEngineKind::PaddleJson => {
            let executable = engine.executable.clone().ok_or_else(|| {
                RecognitionError::NotInitialized(
                    "paddle-json engine needs [ocr] executable".to_string(),
                )
            })?;
            let config = PaddleJsonConfig {
                executable,
                args: Vec::new(),
                config_path: engine.config_path.clone(),
            };
            Ok(Box::new(PaddleJsonRecognizer::spawn(language.clone(), config)?))
        }
    }
}

pub(crate) fn flatten_text<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_language_combinations() {
        let selection: LanguageSelection = "ch_sim+jpn".parse().expect("parse");
        assert_eq!(
            selection.languages(),
            &[OcrLanguage::ChineseSimplified, OcrLanguage::Japanese]
        );
        assert_eq!(selection.to_string(), "ch_sim+ja");
    }

    #[test]
    fn rejects_unknown_languages() {
        let err = "ja+klingon".parse::<LanguageSelection>().err().expect("error");
        assert!(matches!(err, RecognitionError::UnsupportedLanguage(code) if code == "klingon"));
        assert!("".parse::<LanguageSelection>().is_err());
    }

    #[test]
    fn flatten_joins_with_single_spaces() {
        assert_eq!(flatten_text(["  ab ", "", "\tcd", "ef\n"]), "ab cd ef");
        assert_eq!(flatten_text(Vec::<&str>::new()), "");
    }

    #[test]
    fn paddle_engine_requires_an_executable() {
        let engine = EngineConfig {
            kind: OcrEngineKind::PaddleJson,
            executable: None,
            config_path: None,
        };
        let err = build_recognizer(&engine, &LanguageSelection::single(OcrLanguage::Japanese))
            .err()
            .expect("error");
        assert!(matches!(err, RecognitionError::NotInitialized(_)));
    }
}
