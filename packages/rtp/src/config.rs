//! Engine configuration files.

use std::{
    collections::BTreeMap,
    path::Path,
    fs::File,
    io::{
        BufReader,
        BufWriter,
    },
};
use serde::{Serialize, Deserialize};
use anyhow::*;


pub const CONFIG_FILE_NAME: &'static str = "rtp.json";


/// Top-level engine configuration. Snapshotted on read, swapped whole.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Configs {
    pub performance: PerformanceConfig,
    pub safety: SafetyConfig,
    pub logging: LoggingConfig,
}

/// Selection budget and caching behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Base number of selection attempts per call, minimum 1.
    pub max_attempts: u64,
    /// Biome resample budget per base attempt.
    pub max_biome_checks_per_gen: u64,
    /// Whether memory-backed shapes bias sampling toward remembered biomes.
    pub biome_recall: bool,
    /// Fail a filtered selection outright when recall is on but the memory
    /// holds nothing for the requested biomes.
    pub biome_recall_forced: bool,
    /// Chunk radius retained around each cached location.
    pub view_distance_select: u32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        PerformanceConfig {
            max_attempts: 20,
            max_biome_checks_per_gen: 100,
            biome_recall: false,
            biome_recall_forced: false,
            view_distance_select: 0,
        }
    }
}

/// Placement safety policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Block materials a selected location may not stand in or near.
    pub unsafe_blocks: Vec<String>,
    /// Scan radius, in blocks, around a candidate location.
    pub safety_radius: i32,
    /// Biome name list. Whitelist or blacklist per `biome_whitelist`.
    pub biomes: Vec<String>,
    pub biome_whitelist: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        SafetyConfig {
            unsafe_blocks: vec![
                "LAVA".to_owned(),
                "MAGMA_BLOCK".to_owned(),
                "FIRE".to_owned(),
                "CACTUS".to_owned(),
            ],
            safety_radius: 0,
            biomes: Vec::new(),
            biome_whitelist: false,
        }
    }
}

/// Diagnostic verbosity switches.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit a per-cause failure breakdown when a selection call exhausts its
    /// attempt budget.
    pub selection_failure: bool,
    /// Chatty region construction.
    pub detailed_region_init: bool,
}

impl Configs {
    pub fn read(path: impl AsRef<Path>) -> Self {
        Self::try_read(path).unwrap_or_default()
    }

    pub fn try_read(path: impl AsRef<Path>) -> Result<Self> {
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }
}


/// One region as configured, before construction against a live world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    pub name: String,
    pub world: String,
    pub shape: StrategyConfig,
    pub vert: StrategyConfig,
    #[serde(default = "default_cache_cap")]
    pub cache_cap: u64,
    #[serde(default)]
    pub world_border_override: bool,
    /// Persist sampling outcome history for this region's shape.
    #[serde(default)]
    pub memory: bool,
}

fn default_cache_cap() -> u64 {
    10
}

/// Named strategy (shape or vertical adjustor) plus its parameter table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(flatten)]
    pub params: ParamTable,
}

impl StrategyConfig {
    pub fn new(name: &str) -> Self {
        StrategyConfig { name: name.to_owned(), params: ParamTable::default() }
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.0.insert(key.to_owned(), value.into());
        self
    }
}

/// Loosely-typed parameter table for strategy construction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParamTable(pub BTreeMap<String, serde_json::Value>);

impl ParamTable {
    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.0.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    pub fn get_i32(&self, key: &str, default: i32) -> i32 {
        self.get_i64(key, default as i64) as i32
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.0.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.0.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_owned()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let configs = Configs::read("/definitely/not/a/real/path.json");
        assert_eq!(configs.performance.max_attempts, 20);
        assert!(!configs.logging.selection_failure);
    }

    #[test]
    fn region_config_roundtrip() {
        let region = RegionConfig {
            name: "default".to_owned(),
            world: "world".to_owned(),
            shape: StrategyConfig::new("circle").with("radius", 256).with("center_radius", 16),
            vert: StrategyConfig::new("linear").with("max_y", 127),
            cache_cap: 10,
            world_border_override: false,
            memory: true,
        };
        let json = serde_json::to_string(&region).unwrap();
        let back: RegionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.shape.params.get_i32("radius", 0), 256);
        assert_eq!(back.vert.params.get_i32("max_y", 0), 127);
        assert!(back.memory);
    }
}
