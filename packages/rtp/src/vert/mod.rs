//! Vertical placement strategies.
//!
//! Given a loaded chunk and an in-chunk column, an adjustor picks a standing
//! height or rejects the column. Like shapes, adjustors are registry-built
//! from a named parameter table; height bounds are clamped to the world's at
//! construction.

mod linear;
mod jump;

pub use self::{
    linear::Linear,
    jump::Jump,
};

use crate::{
    config::StrategyConfig,
    world::RtpChunk,
};
use std::collections::BTreeMap;
use anyhow::*;
use vek::*;


/// Pluggable height-selection strategy.
pub trait VerticalAdjustor: Send + Sync {
    /// Registry name of this strategy.
    fn name(&self) -> &'static str;

    /// Lowest height this adjustor will place at.
    fn min_y(&self) -> i32;

    /// Highest height this adjustor will place at.
    fn max_y(&self) -> i32;

    /// Choose a standing height in the given in-chunk column, or reject it.
    /// The returned height is the feet block: itself air, air above, solid
    /// below.
    fn adjust(&self, chunk: &dyn RtpChunk, column: Vec2<i32>) -> Option<i32>;

    /// Named parameters, for introspection.
    fn params(&self) -> Vec<(String, String)>;

    fn clone_box(&self) -> Box<dyn VerticalAdjustor>;
}

/// Whether a column height is standable: air at feet and head, solid floor.
pub(crate) fn is_standable(chunk: &dyn RtpChunk, column: Vec2<i32>, y: i32) -> bool {
    chunk.is_air_at(Vec3::new(column.x, y, column.y))
        && chunk.is_air_at(Vec3::new(column.x, y + 1, column.y))
        && !chunk.is_air_at(Vec3::new(column.x, y - 1, column.y))
}


type VertCtor = fn(&StrategyConfig, (i32, i32)) -> Result<Box<dyn VerticalAdjustor>>;

/// Name → constructor registry for vertical adjustors.
pub struct VertRegistry {
    ctors: BTreeMap<&'static str, VertCtor>,
}

impl Default for VertRegistry {
    fn default() -> Self {
        let mut registry = VertRegistry { ctors: BTreeMap::new() };
        registry.register("linear", |cfg, bounds| Ok(Box::new(Linear::from_params(cfg, bounds))));
        registry.register("jump", |cfg, bounds| Ok(Box::new(Jump::from_params(cfg, bounds))));
        registry
    }
}

impl VertRegistry {
    pub fn register(&mut self, name: &'static str, ctor: VertCtor) {
        self.ctors.insert(name, ctor);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ctors.keys().copied()
    }

    /// Build a fresh adjustor from config, clamping its height bounds to the
    /// world's `(min_y, max_y)`. Errors on unknown strategy names.
    pub fn build(
        &self,
        cfg: &StrategyConfig,
        world_bounds: (i32, i32),
    ) -> Result<Box<dyn VerticalAdjustor>> {
        let ctor = self.ctors.get(cfg.name.as_str())
            .ok_or_else(|| anyhow!("unknown vertical adjustor {:?}", cfg.name))?;
        ctor(cfg, world_bounds)
    }
}

/// Configured height bounds clamped to the world's, kept ordered.
pub(crate) fn clamp_bounds(cfg: &StrategyConfig, world_bounds: (i32, i32)) -> (i32, i32) {
    let (world_min, world_max) = world_bounds;
    let min_y = cfg.params.get_i32("min_y", world_min).clamp(world_min, world_max);
    let max_y = cfg.params.get_i32("max_y", world_max).clamp(world_min, world_max);
    (min_y.min(max_y), min_y.max(max_y))
}
