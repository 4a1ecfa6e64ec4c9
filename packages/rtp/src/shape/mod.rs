//! Horizontal sampling strategies.
//!
//! A shape produces chunk-scale 2D candidates within a region's footprint.
//! Shapes are looked up by name in a registry and built from a parameter
//! table, clone-on-fetch; there is no reflection anywhere.

mod circle;
mod square;
mod rectangle;
pub mod memory;

pub use self::{
    circle::Circle,
    square::Square,
    rectangle::Rectangle,
};

use crate::config::StrategyConfig;
use std::collections::BTreeMap;
use anyhow::*;
use rand::RngCore;
use vek::*;


/// Pluggable 2D-area sampling strategy.
///
/// `select` must be callable concurrently, return within bounded time, and
/// never perform blocking I/O.
pub trait Shape: Send + Sync {
    /// Registry name of this strategy.
    fn name(&self) -> &'static str;

    /// Sample one candidate chunk coordinate.
    fn select(&self, rng: &mut dyn RngCore) -> Vec2<i32>;

    /// Named parameters, for introspection and equality.
    fn params(&self) -> Vec<(String, String)>;

    fn clone_box(&self) -> Box<dyn Shape>;
}

/// Whether two shapes are interchangeable: same strategy, same parameters.
pub fn shape_eq(a: &dyn Shape, b: &dyn Shape) -> bool {
    a.name() == b.name() && a.params() == b.params()
}


type ShapeCtor = fn(&StrategyConfig) -> Result<Box<dyn Shape>>;

/// Name → constructor registry for shapes.
pub struct ShapeRegistry {
    ctors: BTreeMap<&'static str, ShapeCtor>,
}

impl Default for ShapeRegistry {
    fn default() -> Self {
        let mut registry = ShapeRegistry { ctors: BTreeMap::new() };
        registry.register("circle", |cfg| Ok(Box::new(Circle::from_params(cfg, false))));
        registry.register("circle_normal", |cfg| Ok(Box::new(Circle::from_params(cfg, true))));
        registry.register("square", |cfg| Ok(Box::new(Square::from_params(cfg, false))));
        registry.register("square_normal", |cfg| Ok(Box::new(Square::from_params(cfg, true))));
        registry.register("rectangle", |cfg| Ok(Box::new(Rectangle::from_params(cfg))));
        registry
    }
}

impl ShapeRegistry {
    pub fn register(&mut self, name: &'static str, ctor: ShapeCtor) {
        self.ctors.insert(name, ctor);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ctors.keys().copied()
    }

    /// Build a fresh shape from config. Errors on unknown strategy names.
    pub fn build(&self, cfg: &StrategyConfig) -> Result<Box<dyn Shape>> {
        let ctor = self.ctors.get(cfg.name.as_str())
            .ok_or_else(|| anyhow!("unknown shape {:?}", cfg.name))?;
        ctor(cfg)
    }
}


/// One draw from the standard normal distribution, via Box-Muller.
pub(crate) fn sample_standard_normal(rng: &mut dyn RngCore) -> f64 {
    use rand::Rng;
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}
