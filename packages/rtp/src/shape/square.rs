//! Square sampling, uniform or normal-weighted.

use super::{Shape, sample_standard_normal};
use crate::config::StrategyConfig;
use rand::{Rng, RngCore};
use vek::*;


// rejection budget before giving up on the inner exclusion zone
const REJECT_CAP: u32 = 64;

/// Square ring between Chebyshev radii `center_radius` and `radius` around
/// `center`, in chunk coordinates.
#[derive(Debug, Clone)]
pub struct Square {
    pub center: Vec2<i32>,
    pub radius: i32,
    pub center_radius: i32,
    pub normal: bool,
    pub std_factor: f64,
}

impl Square {
    pub fn from_params(cfg: &StrategyConfig, normal: bool) -> Self {
        let p = &cfg.params;
        let radius = p.get_i32("radius", 256).max(1);
        Square {
            center: Vec2::new(p.get_i32("center_x", 0), p.get_i32("center_z", 0)),
            radius,
            center_radius: p.get_i32("center_radius", 0).clamp(0, radius),
            normal,
            std_factor: p.get_f64("std_factor", 0.25),
        }
    }

    fn sample_axis(&self, rng: &mut dyn RngCore) -> i32 {
        if self.normal {
            let std = self.radius as f64 * self.std_factor;
            (sample_standard_normal(rng) * std)
                .round()
                .clamp(-(self.radius as f64), self.radius as f64) as i32
        } else {
            rng.gen_range(-self.radius..=self.radius)
        }
    }
}

impl Shape for Square {
    fn name(&self) -> &'static str {
        if self.normal { "square_normal" } else { "square" }
    }

    fn select(&self, rng: &mut dyn RngCore) -> Vec2<i32> {
        let mut offset = Vec2::new(self.sample_axis(rng), self.sample_axis(rng));
        // resample out of the central exclusion zone; bounded so select() has
        // bounded time even with a degenerate configuration
        for _ in 0..REJECT_CAP {
            if offset.x.abs().max(offset.y.abs()) >= self.center_radius {
                break;
            }
            offset = Vec2::new(self.sample_axis(rng), self.sample_axis(rng));
        }
        self.center + offset
    }

    fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("radius".to_owned(), self.radius.to_string()),
            ("center_radius".to_owned(), self.center_radius.to_string()),
            ("center_x".to_owned(), self.center.x.to_string()),
            ("center_z".to_owned(), self.center.y.to_string()),
        ];
        if self.normal {
            params.push(("std_factor".to_owned(), self.std_factor.to_string()));
        }
        params
    }

    fn clone_box(&self) -> Box<dyn Shape> {
        Box::new(self.clone())
    }
}
