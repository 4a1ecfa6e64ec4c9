//! Persistent sampling-outcome history for memory-backed shapes.
//!
//! Chunk coordinates are stored under a bijective 64-bit packing: the high 32
//! bits are the two's-complement bit image of `x`, the low 32 bits of `z`.
//! Unpacking truncates back with `as i32`, so every `(i32, i32)` pair round
//! trips, including the coordinate extremes.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    path::{Path, PathBuf},
    fs::File,
    io::{
        BufReader,
        BufWriter,
    },
};
use anyhow::*;
use rand::{Rng, RngCore};
use serde::{Serialize, Deserialize};
use vek::*;


/// Pack a chunk coordinate into the documented 64-bit layout.
pub fn pack(cc: Vec2<i32>) -> u64 {
    ((cc.x as u32 as u64) << 32) | (cc.y as u32 as u64)
}

/// Inverse of `pack`.
pub fn unpack(packed: u64) -> Vec2<i32> {
    Vec2::new((packed >> 32) as u32 as i32, packed as u32 as i32)
}


/// Outcome history of one region's shape, persisted across restarts.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ShapeMemory {
    /// Coordinates that failed selection (bad vertical placement, unsafe
    /// blocks, vetoed, wrong biome under the default filter).
    bad: HashSet<u64>,
    /// For each biome, coordinates that selected successfully in it.
    biomes: BTreeMap<String, BTreeSet<u64>>,
    #[serde(skip)]
    dirty: bool,
}

impl ShapeMemory {
    /// Remember a failed coordinate.
    pub fn add_bad(&mut self, cc: Vec2<i32>) {
        if self.bad.insert(pack(cc)) {
            self.dirty = true;
        }
    }

    pub fn is_bad(&self, cc: Vec2<i32>) -> bool {
        self.bad.contains(&pack(cc))
    }

    /// Remember a successful coordinate and the biome found there.
    pub fn add_biome_location(&mut self, cc: Vec2<i32>, biome: &str) {
        let packed = pack(cc);
        if self.bad.remove(&packed) {
            self.dirty = true;
        }
        if self.biomes.entry(biome.to_owned()).or_default().insert(packed) {
            self.dirty = true;
        }
    }

    /// Draw a remembered coordinate whose biome is in the filter, uniformly
    /// across all remembered locations of those biomes.
    pub fn recall(&self, filter: &BTreeSet<String>, rng: &mut dyn RngCore) -> Option<Vec2<i32>> {
        let pool: Vec<u64> = filter.iter()
            .filter_map(|biome| self.biomes.get(biome))
            .flatten()
            .copied()
            .collect();
        if pool.is_empty() {
            return None;
        }
        Some(unpack(pool[rng.gen_range(0..pool.len())]))
    }

    pub fn bad_count(&self) -> usize {
        self.bad.len()
    }

    pub fn remembered_count(&self) -> usize {
        self.biomes.values().map(BTreeSet::len).sum()
    }

    /// History file for a region in a world.
    pub fn file_path(dir: &Path, region: &str, world: &str) -> PathBuf {
        dir.join(format!("{region}.{world}.json"))
    }

    /// Load history, or start empty if the file doesn't exist yet.
    pub fn load(path: impl AsRef<Path>) -> Self {
        Self::try_load(path).unwrap_or_default()
    }

    pub fn try_load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }

    /// Persist if anything changed since the last save.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        serde_json::to_writer(BufWriter::new(File::create(path)?), self)?;
        self.dirty = false;
        Ok(())
    }
}
