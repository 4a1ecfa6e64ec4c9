//! Circular sampling, uniform or normal-weighted.

use super::{Shape, sample_standard_normal};
use crate::config::StrategyConfig;
use rand::{Rng, RngCore};
use vek::*;


/// Annulus between `center_radius` and `radius` around `center`, in chunk
/// coordinates.
///
/// Uniform mode distributes candidates evenly by area (square-root radial
/// sampling); normal mode concentrates them around the middle of the annulus
/// with a standard deviation of `std_factor` half-widths.
#[derive(Debug, Clone)]
pub struct Circle {
    pub center: Vec2<i32>,
    pub radius: i32,
    pub center_radius: i32,
    pub normal: bool,
    pub std_factor: f64,
}

impl Circle {
    pub fn from_params(cfg: &StrategyConfig, normal: bool) -> Self {
        let p = &cfg.params;
        let radius = p.get_i32("radius", 256).max(1);
        Circle {
            center: Vec2::new(p.get_i32("center_x", 0), p.get_i32("center_z", 0)),
            radius,
            center_radius: p.get_i32("center_radius", 0).clamp(0, radius),
            normal,
            std_factor: p.get_f64("std_factor", 0.25),
        }
    }

    fn sample_radius(&self, rng: &mut dyn RngCore) -> f64 {
        let r0 = self.center_radius as f64;
        let r1 = self.radius as f64;
        if self.normal {
            let mid = (r0 + r1) / 2.0;
            let std = (r1 - r0) / 2.0 * self.std_factor;
            (mid + sample_standard_normal(rng) * std).clamp(r0, r1)
        } else {
            // uniform over the annulus area
            let u: f64 = rng.gen_range(0.0..1.0);
            (u * (r1 * r1 - r0 * r0) + r0 * r0).sqrt()
        }
    }
}

impl Shape for Circle {
    fn name(&self) -> &'static str {
        if self.normal { "circle_normal" } else { "circle" }
    }

    fn select(&self, rng: &mut dyn RngCore) -> Vec2<i32> {
        let r = self.sample_radius(rng);
        let theta: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
        Vec2::new(
            self.center.x + (r * theta.cos()).round() as i32,
            self.center.y + (r * theta.sin()).round() as i32,
        )
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
