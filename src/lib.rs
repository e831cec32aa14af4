pub mod batch;
pub mod color;
pub mod error;
pub mod font;
pub mod geometry;
pub mod gesture;
pub mod glyph;
pub mod logging;
pub mod ocr;
pub mod overlay;
mod paths;
pub mod pipeline;
pub mod regions;
pub mod render;
pub mod session;
pub mod settings;
#[cfg(test)]
mod test_util;

pub use batch::{BatchRunner, BatchState, BatchSummary, OutputFormat, PageProcessor};
pub use error::{
    FontLoadError, GeometryError, PreconditionError, RecognitionError, RegionError,
};
pub use font::{FontCache, FontPool};
pub use geometry::{PixelBox, PixelPoint, RatioBox, RatioPoint, Size};
pub use gesture::{DragDirection, DragGesture, TargetLayout};
pub use ocr::{LanguageSelection, OcrLanguage, RecognitionService, Recognizer};
pub use pipeline::{CropDebug, Notice, ProcessReport};
pub use regions::{PairId, RegionPair, RegionStore};
pub use render::{Jitter, TransplantStyle, transplant_text};
pub use session::Session;
pub use settings::{Settings, load_settings};
