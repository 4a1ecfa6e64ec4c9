//! Deterministic in-memory world fixtures for tests.

use crate::{
    promise::Promise,
    server::{Message, Messenger, PlayerId},
    shape::Shape,
    world::{ChunkFuture, RtpChunk, RtpWorld, WorldBorder, chunk_of},
};
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};
use parking_lot::Mutex;
use rand::RngCore;
use vek::*;


type KeepCounts = Arc<Mutex<HashMap<Vec2<i32>, i32>>>;

/// Flat-terrain chunk: solid `material` up to and including `surface`, air
/// above, with optional carved air pockets per column.
pub struct TestChunk {
    cc: Vec2<i32>,
    surface: i32,
    material: String,
    air_pockets: HashMap<Vec2<i32>, (i32, i32)>,
    keeps: KeepCounts,
}

impl TestChunk {
    pub fn surface_at(cc: Vec2<i32>, surface: i32) -> Self {
        TestChunk {
            cc,
            surface,
            material: "STONE".to_owned(),
            air_pockets: HashMap::new(),
            keeps: KeepCounts::default(),
        }
    }

    /// Carve air at `lo..=hi` in one column.
    pub fn with_air_column(mut self, column: Vec2<i32>, lo: i32, hi: i32) -> Self {
        self.air_pockets.insert(column, (lo, hi));
        self
    }

    pub fn with_material(mut self, material: &str) -> Self {
        self.material = material.to_owned();
        self
    }

    fn with_keeps(mut self, keeps: KeepCounts) -> Self {
        self.keeps = keeps;
        self
    }
}

impl RtpChunk for TestChunk {
    fn cc(&self) -> Vec2<i32> {
        self.cc
    }

    fn material_at(&self, local: Vec3<i32>) -> String {
        if self.is_air_at(local) {
            "AIR".to_owned()
        } else {
            self.material.clone()
        }
    }

    fn is_air_at(&self, local: Vec3<i32>) -> bool {
        if let Some(&(lo, hi)) = self.air_pockets.get(&Vec2::new(local.x, local.z)) {
            if (lo..=hi).contains(&local.y) {
                return true;
            }
        }
        local.y > self.surface
    }

    fn keep(&self, keep: bool) {
        *self.keeps.lock().entry(self.cc).or_insert(0) += if keep { 1 } else { -1 };
    }
}


/// Deterministic world: flat terrain, per-chunk biome and material
/// overrides, optional failing chunks, configurable border. Chunk loads
/// resolve immediately.
pub struct TestWorld {
    name: String,
    min_y: i32,
    max_y: i32,
    surface: i32,
    default_biome: String,
    biome_overrides: HashMap<Vec2<i32>, String>,
    material_overrides: HashMap<Vec2<i32>, String>,
    fail_chunks: HashSet<Vec2<i32>>,
    border: WorldBorder,
    keeps: KeepCounts,
}

impl TestWorld {
    pub fn flat(name: &str) -> Self {
        TestWorld {
            name: name.to_owned(),
            min_y: 0,
            max_y: 256,
            surface: 63,
            default_biome: "PLAINS".to_owned(),
            biome_overrides: HashMap::new(),
            material_overrides: HashMap::new(),
            fail_chunks: HashSet::new(),
            border: WorldBorder::unbounded(),
            keeps: KeepCounts::default(),
        }
    }

    pub fn with_biome(mut self, cc: Vec2<i32>, biome: &str) -> Self {
        self.biome_overrides.insert(cc, biome.to_owned());
        self
    }

    /// Fill the given chunk's terrain with `material` instead of stone.
    pub fn with_terrain(mut self, cc: Vec2<i32>, material: &str) -> Self {
        self.material_overrides.insert(cc, material.to_owned());
        self
    }

    pub fn with_failing_chunk(mut self, cc: Vec2<i32>) -> Self {
        self.fail_chunks.insert(cc);
        self
    }

    pub fn with_border(mut self, border: WorldBorder) -> Self {
        self.border = border;
        self
    }

    /// Whether every chunk's retention balance is back to zero.
    pub fn all_released(&self) -> bool {
        self.keeps.lock().values().all(|&count| count == 0)
    }
}

impl RtpWorld for TestWorld {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_y(&self) -> i32 {
        self.min_y
    }

    fn max_y(&self) -> i32 {
        self.max_y
    }

    fn chunk_at(&self, cc: Vec2<i32>) -> ChunkFuture {
        if self.fail_chunks.contains(&cc) {
            return Promise::ready(None);
        }
        let mut chunk = TestChunk::surface_at(cc, self.surface).with_keeps(Arc::clone(&self.keeps));
        if let Some(material) = self.material_overrides.get(&cc) {
            chunk = chunk.with_material(material);
        }
        Promise::ready(Some(Arc::new(chunk) as Arc<dyn RtpChunk>))
    }

    fn biome_at(&self, pos: Vec3<i32>) -> String {
        let cc = chunk_of(pos.x, pos.z);
        self.biome_overrides
            .get(&cc)
            .unwrap_or(&self.default_biome)
            .clone()
    }

    fn biomes(&self) -> BTreeSet<String> {
        let mut biomes: BTreeSet<String> =
            self.biome_overrides.values().cloned().collect();
        biomes.insert(self.default_biome.clone());
        biomes
    }

    fn border(&self) -> WorldBorder {
        self.border.clone()
    }
}


/// Shape that always lands on one chunk coordinate.
#[derive(Debug, Clone)]
pub struct FixedShape(pub Vec2<i32>);

impl Shape for FixedShape {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn select(&self, _rng: &mut dyn RngCore) -> Vec2<i32> {
        self.0
    }

    fn params(&self) -> Vec<(String, String)> {
        vec![
            ("x".to_owned(), self.0.x.to_string()),
            ("z".to_owned(), self.0.y.to_string()),
        ]
    }

    fn clone_box(&self) -> Box<dyn Shape> {
        Box::new(self.clone())
    }
}


/// Messenger that records everything it is told to send.
#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<(PlayerId, Message)>>,
    pub offline: Mutex<HashSet<PlayerId>>,
}

impl RecordingMessenger {
    pub fn positions_for(&self, player: PlayerId) -> Vec<u64> {
        self.sent
            .lock()
            .iter()
            .filter(|(id, _)| *id == player)
            .map(|(_, message)| match message {
                Message::QueueUpdate { position } => *position,
            })
            .collect()
    }
}

impl Messenger for RecordingMessenger {
    fn send(&self, player: PlayerId, message: Message) {
        self.sent.lock().push((player, message));
    }

    fn is_online(&self, player: PlayerId) -> bool {
        !self.offline.lock().contains(&player)
    }
}
