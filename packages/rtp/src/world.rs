//! Interfaces onto the host's worlds, chunks, and world borders.
//!
//! The engine never owns terrain. It sees worlds through `RtpWorld`, which
//! hands out chunk loads as promises resolved by the host on its own threads,
//! and individual loaded chunks through `RtpChunk` handles carrying a
//! per-chunk retention counter.

use crate::{
    promise::Promise,
    shape::Shape,
};
use std::{
    collections::BTreeSet,
    sync::Arc,
};
use vek::*;


/// Side length of a chunk, in blocks.
pub const CHUNK_SIDE: i32 = 16;


/// An immutable 3D point in a named world.
///
/// Used as a map key, so equality and hashing depend only on the world name
/// and coordinates, never on mutable world state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub world: Arc<str>,
    pub pos: Vec3<i32>,
}

impl Location {
    pub fn new(world: impl Into<Arc<str>>, pos: Vec3<i32>) -> Self {
        Location { world: world.into(), pos }
    }

    /// Chunk coordinate containing this location.
    pub fn chunk(&self) -> Vec2<i32> {
        chunk_of(self.pos.x, self.pos.z)
    }
}

/// Chunk coordinate containing world column (x, z).
pub fn chunk_of(x: i32, z: i32) -> Vec2<i32> {
    Vec2::new(x.div_euclid(CHUNK_SIDE), z.div_euclid(CHUNK_SIDE))
}

/// In-chunk column coordinate of world column (x, z).
pub fn local_of(x: i32, z: i32) -> Vec2<i32> {
    Vec2::new(x.rem_euclid(CHUNK_SIDE), z.rem_euclid(CHUNK_SIDE))
}


/// A chunk load in flight. Resolves with `None` if the host failed to load
/// the chunk.
pub type ChunkFuture = Promise<Option<Arc<dyn RtpChunk>>>;


/// Host handle to one loaded chunk.
pub trait RtpChunk: Send + Sync {
    /// Chunk coordinate.
    fn cc(&self) -> Vec2<i32>;

    /// Material name at the given position. `local.x`/`local.z` are in-chunk
    /// (0..16), `local.y` is an absolute world height.
    fn material_at(&self, local: Vec3<i32>) -> String;

    /// Whether the block at the given position is passable air.
    fn is_air_at(&self, local: Vec3<i32>) -> bool;

    /// Adjust this chunk's retention count. While positive, the host must not
    /// evict the chunk's terrain data.
    fn keep(&self, keep: bool);
}


/// Host handle to one world.
pub trait RtpWorld: Send + Sync {
    /// World name, unique on the host.
    fn name(&self) -> &str;

    fn min_y(&self) -> i32;

    fn max_y(&self) -> i32;

    /// Begin loading the chunk at `cc`. Never blocks; the returned future is
    /// resolved by the host, possibly on another thread.
    fn chunk_at(&self, cc: Vec2<i32>) -> ChunkFuture;

    /// Biome name at a world position. May be approximate above unloaded
    /// terrain.
    fn biome_at(&self, pos: Vec3<i32>) -> String;

    /// Every biome this world can produce.
    fn biomes(&self) -> BTreeSet<String>;

    /// Current world border.
    fn border(&self) -> WorldBorder;
}


/// World border membership test, plus the border's own footprint as a shape
/// for regions configured to substitute it.
#[derive(Clone)]
pub struct WorldBorder {
    inside: Arc<dyn Fn(Vec3<i32>) -> bool + Send + Sync>,
    shape: Option<Arc<dyn Shape>>,
}

impl WorldBorder {
    pub fn new(inside: impl Fn(Vec3<i32>) -> bool + Send + Sync + 'static) -> Self {
        WorldBorder { inside: Arc::new(inside), shape: None }
    }

    /// Border that admits everything.
    pub fn unbounded() -> Self {
        Self::new(|_| true)
    }

    pub fn with_shape(mut self, shape: Arc<dyn Shape>) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn is_inside(&self, pos: Vec3<i32>) -> bool {
        (self.inside)(pos)
    }

    /// Shape covering the border's footprint, if the host reported one.
    pub fn shape(&self) -> Option<&Arc<dyn Shape>> {
        self.shape.as_ref()
    }
}
