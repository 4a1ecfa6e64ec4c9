//! See `Linear`.

use crate::{
    config::StrategyConfig,
    vert::{VerticalAdjustor, is_standable, clamp_bounds},
    world::RtpChunk,
};
use vek::*;


/// Top-down exhaustive column scan. Finds the highest standable height within
/// bounds, so it lands on surfaces rather than cave floors.
#[derive(Debug, Clone)]
pub struct Linear {
    min_y: i32,
    max_y: i32,
}

impl Linear {
    pub fn new(min_y: i32, max_y: i32) -> Self {
        Linear { min_y: min_y.min(max_y), max_y: min_y.max(max_y) }
    }

    pub fn from_params(cfg: &StrategyConfig, world_bounds: (i32, i32)) -> Self {
        let (min_y, max_y) = clamp_bounds(cfg, world_bounds);
        Linear { min_y, max_y }
    }
}

impl VerticalAdjustor for Linear {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn min_y(&self) -> i32 {
        self.min_y
    }

    fn max_y(&self) -> i32 {
        self.max_y
    }

    fn adjust(&self, chunk: &dyn RtpChunk, column: Vec2<i32>) -> Option<i32> {
        // leave headroom for the head block and a floor below
        let top = self.max_y - 1;
        let bottom = self.min_y + 1;
        (bottom..=top).rev().find(|&y| is_standable(chunk, column, y))
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


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::TestChunk;

    #[test]
    fn finds_highest_standable_height() {
        // solid up to y=63, air above; also a cave pocket at y=20..22
        let chunk = TestChunk::surface_at(Vec2::new(0, 0), 63)
            .with_air_column(Vec2::new(7, 7), 20, 22);
        let vert = Linear::new(0, 128);
        assert_eq!(vert.adjust(&chunk, Vec2::new(7, 7)), Some(64));
    }

    #[test]
    fn rejects_all_solid_columns() {
        let chunk = TestChunk::surface_at(Vec2::new(0, 0), 200);
        let vert = Linear::new(0, 128);
        assert_eq!(vert.adjust(&chunk, Vec2::new(7, 7)), None);
    }

    #[test]
    fn respects_lower_bound() {
        // surface at 63, but the adjustor only looks at 100..=128
        let chunk = TestChunk::surface_at(Vec2::new(0, 0), 63);
        let vert = Linear::new(100, 128);
        assert_eq!(vert.adjust(&chunk, Vec2::new(7, 7)), None);
    }
}
