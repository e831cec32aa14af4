use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use ttf_parser::{Face, name_id};
use usvg::fontdb;

use crate::error::FontLoadError;

#[cfg(target_os = "macos")]
fn default_font_families() -> &'static [&'static str] {
    &["NotoSans", "Hiragino Sans", "sans-serif"]
}

#[cfg(target_os = "windows")]
fn default_font_families() -> &'static [&'static str] {
    &["NotoSans", "Arial Unicode", "sans-serif"]
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn default_font_families() -> &'static [&'static str] {
    &["NotoSans", "DejaVu Sans", "sans-serif"]
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FontPool {
    fonts: Vec<PathBuf>,
}

impl FontPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut pool = Self::new();
        for path in paths {
            pool.add(path);
        }
        pool
    }

    pub fn add(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if self.fonts.contains(&path) {
            return false;
        }
        self.fonts.push(path);
        true
    }

    pub fn get(&self, index: usize) -> Option<&Path> {
        self.fonts.get(index).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.fonts.iter().map(PathBuf::as_path)
    }
}

#[derive(Clone)]
pub struct LoadedFace {
    data: Arc<Vec<u8>>,
    face_index: u32,
    units_per_em: u16,
    ascender: i16,
    descender: i16,
    family: Option<String>,
}

impl LoadedFace {
    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn face(&self) -> Option<Face<'_>> {
        Face::parse(&self.data, self.face_index).ok()
    }

    pub fn scale(&self, font_size: f32) -> f32 {
        font_size / self.units_per_em.max(1) as f32
    }

    pub fn ascent_px(&self, font_size: f32) -> f32 {
        self.ascender as f32 * self.scale(font_size)
    }

    pub fn line_height_px(&self, font_size: f32) -> f32 {
        (self.ascender as f32 - self.descender as f32) * self.scale(font_size)
    }

    /// Advance width and line height of `ch` at `font_size`, or `None` when
    /// the face has no glyph for it.
    pub fn measure(&self, ch: char, font_size: f32) -> Option<(f32, f32)> {
        let face = self.face()?;
        let glyph = face.glyph_index(ch)?;
        let advance = face.glyph_hor_advance(glyph)?;
        Some((
            advance as f32 * self.scale(font_size),
            self.line_height_px(font_size),
        ))
    }
}

pub fn load_face(path: &Path) -> Result<LoadedFace, FontLoadError> {
    let data = std::fs::read(path).map_err(|source| FontLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    load_face_from_data(data, None).ok_or_else(|| FontLoadError::Parse {
        path: path.to_path_buf(),
    })
}

fn load_face_from_data(data: Vec<u8>, preferred_family: Option<&str>) -> Option<LoadedFace> {
    let data = Arc::new(data);
    let mut fallback = None;
    let count = ttf_parser::fonts_in_collection(&data).unwrap_or(1);
    for index in 0..count {
        let Ok(face) = Face::parse(&data, index) else {
            continue;
        };
        let family = extract_family_name(&face);
        let loaded = LoadedFace {
            data: Arc::clone(&data),
            face_index: index,
            units_per_em: face.units_per_em().max(1),
            ascender: face.ascender(),
            descender: face.descender(),
            family: family.clone(),
        };
        if let (Some(preferred), Some(found)) = (preferred_family, &family)
            && found.eq_ignore_ascii_case(preferred)
        {
            return Some(loaded);
        }
        if fallback.is_none() {
            fallback = Some(loaded);
        }
    }
    fallback
}

fn load_system_face(db: &fontdb::Database, family: &str) -> Option<LoadedFace> {
    let families = if family.eq_ignore_ascii_case("sans-serif") {
        vec![fontdb::Family::SansSerif]
    } else {
        vec![fontdb::Family::Name(family)]
    };
    let query = fontdb::Query {
        families: &families,
        ..Default::default()
    };
    let id = db.query(&query)?;
    let data = db.with_face_data(id, |data, _index| data.to_vec())?;
    load_face_from_data(data, Some(family)).or_else(|| {
        // Collections may name the face differently from the query.
        let data = db.with_face_data(id, |data, _index| data.to_vec())?;
        load_face_from_data(data, None)
    })
}

pub fn resolve_default_face() -> Result<LoadedFace, FontLoadError> {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    default_font_families()
        .iter()
        .find_map(|family| load_system_face(&db, family))
        .ok_or(FontLoadError::NoDefaultFace)
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}

// Font files are treated as immutable; entries are never invalidated.
#[derive(Default)]
pub struct FontCache {
    faces: HashMap<PathBuf, Option<LoadedFace>>,
    default_face: Option<Option<LoadedFace>>,
}

impl FontCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn face_for(&mut self, path: &Path) -> Option<LoadedFace> {
        if !self.faces.contains_key(path) {
            let loaded = match load_face(path) {
                Ok(face) => {
                    debug!(
                        "loaded font {} ({})",
                        path.display(),
                        face.family().unwrap_or("unnamed")
                    );
                    Some(face)
                }
                Err(err) => {
                    warn!("{}; using the default face instead", err);
                    None
                }
            };
            self.faces.insert(path.to_path_buf(), loaded);
        }
        match self.faces.get(path) {
            Some(Some(face)) => Some(face.clone()),
            _ => self.default_face(),
        }
    }

    pub fn default_face(&mut self) -> Option<LoadedFace> {
        self.default_face
            .get_or_insert_with(|| match resolve_default_face() {
                Ok(face) => Some(face),
                Err(err) => {
                    warn!("{}", err);
                    None
                }
            })
            .clone()
    }

    pub fn is_cached(&self, path: &Path) -> bool {
        self.faces.contains_key(path)
    }
}
