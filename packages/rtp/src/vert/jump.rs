//! See `Jump`.

use crate::{
    config::StrategyConfig,
    vert::{VerticalAdjustor, is_standable, clamp_bounds},
    world::RtpChunk,
};
use vek::*;


/// Halving search for the terrain surface. Assumes the column is monotone
/// within bounds (solid below the surface, air above), which holds for
/// ordinary overworld terrain; columns that violate the assumption fail the
/// final standability check and are rejected rather than misplaced.
#[derive(Debug, Clone)]
pub struct Jump {
    min_y: i32,
    max_y: i32,
}

impl Jump {
    pub fn new(min_y: i32, max_y: i32) -> Self {
        Jump { min_y: min_y.min(max_y), max_y: min_y.max(max_y) }
    }

    pub fn from_params(cfg: &StrategyConfig, world_bounds: (i32, i32)) -> Self {
        let (min_y, max_y) = clamp_bounds(cfg, world_bounds);
        Jump { min_y, max_y }
    }
}

impl VerticalAdjustor for Jump {
    fn name(&self) -> &'static str {
        "jump"
    }

    fn min_y(&self) -> i32 {
        self.min_y
    }

    fn max_y(&self) -> i32 {
        self.max_y
    }

    fn adjust(&self, chunk: &dyn RtpChunk, column: Vec2<i32>) -> Option<i32> {
        let top = self.max_y - 1;
        let bottom = self.min_y + 1;
        if bottom > top || !chunk.is_air_at(Vec3::new(column.x, top, column.y)) {
            return None;
        }
        // lowest air block under the monotone assumption
        let mut lo = bottom;
        let mut hi = top;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if chunk.is_air_at(Vec3::new(column.x, mid, column.y)) {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Some(hi).filter(|&y| is_standable(chunk, column, y))
    }

    fn params(&self) -> Vec<(String, String)> {
        vec![
            ("min_y".to_owned(), self.min_y.to_string()),
            ("max_y".to_owned(), self.max_y.to_string()),
        ]
    }

    fn clone_box(&self) -> Box<dyn VerticalAdjustor> {
        Box::new(self.clone())
    }
}
