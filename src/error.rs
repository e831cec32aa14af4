use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("size must be positive (got {width}x{height})")]
    EmptySize { width: u32, height: u32 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegionError {
    #[error("no source region marked; mark a source region first")]
    NoActiveSource,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("no source regions marked")]
    MissingRegions,
    #[error("no font files selected")]
    MissingFonts,
    #[error("no images selected")]
    MissingImages,
    #[error("a batch is already in progress")]
    BatchInProgress,
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("recognition engine is not initialized: {0}")]
    NotInitialized(String),
    #[error("unsupported ocr language: {0}")]
    UnsupportedLanguage(String),
    #[error("ocr i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("ocr engine error: {0}")]
    Engine(String),
    #[error("recognition was cancelled")]
    Cancelled,
}

impl RecognitionError {
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }
}

#[derive(Debug, Error)]
pub enum FontLoadError {
    #[error("failed to read font {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse font {}", path.display())]
    Parse { path: PathBuf },
    #[error("no default font face available")]
    NoDefaultFace,
}
