use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::RegionError;
use crate::geometry::RatioBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairId(usize);

impl PairId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionPair {
    source: RatioBox,
    #[serde(default)]
    destinations: Vec<RatioBox>,
}

impl RegionPair {
    fn new(source: RatioBox) -> Self {
        Self {
            source,
            destinations: Vec::new(),
        }
    }

    pub fn source(&self) -> RatioBox {
        self.source
    }

    pub fn destinations(&self) -> &[RatioBox] {
        &self.destinations
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionStore {
    pairs: Vec<RegionPair>,
    #[serde(skip)]
    active: Option<PairId>,
}

impl RegionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_source(&mut self, source: RatioBox) -> PairId {
        self.pairs.push(RegionPair::new(source));
        let id = PairId(self.pairs.len() - 1);
        self.active = Some(id);
        id
    }

    /// Appends to the active pair, which is always the most recently begun one.
    pub fn append_destination(&mut self, destination: RatioBox) -> Result<(), RegionError> {
        let id = self.active.ok_or(RegionError::NoActiveSource)?;
        self.append_destination_to(id, destination)
    }

    pub fn append_destination_to(
        &mut self,
        id: PairId,
        destination: RatioBox,
    ) -> Result<(), RegionError> {
        let pair = self
            .pairs
            .get_mut(id.0)
            .ok_or(RegionError::NoActiveSource)?;
        pair.destinations.push(destination);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
        self.active = None;
    }

    pub fn all(&self) -> &[RegionPair] {
        &self.pairs
    }

    pub fn active(&self) -> Option<PairId> {
        self.active
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn destination_count(&self) -> usize {
        self.pairs.iter().map(|pair| pair.destinations.len()).sum()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read regions: {}", path.display()))?;
        let mut store: RegionStore = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse regions: {}", path.display()))?;
        store.active = store.pairs.len().checked_sub(1).map(PairId);
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create regions directory: {}", parent.display())
            })?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write regions: {}", path.display()))?;
        Ok(())
    }
}
