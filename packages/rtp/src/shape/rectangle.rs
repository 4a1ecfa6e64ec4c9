//! Axis-aligned rectangular sampling.

use super::Shape;
use crate::config::StrategyConfig;
use rand::{Rng, RngCore};
use vek::*;


/// Uniform over a `width` × `height` rectangle of chunks around `center`.
#[derive(Debug, Clone)]
pub struct Rectangle {
    pub center: Vec2<i32>,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    pub fn from_params(cfg: &StrategyConfig) -> Self {
        let p = &cfg.params;
        Rectangle {
            center: Vec2::new(p.get_i32("center_x", 0), p.get_i32("center_z", 0)),
            width: p.get_i32("width", 256).max(1),
            height: p.get_i32("height", 256).max(1),
        }
    }
}

impl Shape for Rectangle {
    fn name(&self) -> &'static str {
        "rectangle"
    }

    fn select(&self, rng: &mut dyn RngCore) -> Vec2<i32> {
        Vec2::new(
            self.center.x + rng.gen_range(-self.width / 2..=self.width / 2),
            self.center.y + rng.gen_range(-self.height / 2..=self.height / 2),
        )
    }

    fn params(&self) -> Vec<(String, String)> {
        vec![
            ("width".to_owned(), self.width.to_string()),
            ("height".to_owned(), self.height.to_string()),
            ("center_x".to_owned(), self.center.x.to_string()),
            ("center_z".to_owned(), self.center.y.to_string()),
        ]
    }

    fn clone_box(&self) -> Box<dyn Shape> {
        Box::new(self.clone())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    #[test]
    fn samples_stay_in_bounds() {
        let shape = Rectangle { center: Vec2::new(100, -40), width: 30, height: 8 };
        let mut rng = Pcg64::seed_from_u64(21);
        for _ in 0..1000 {
            let cc = shape.select(&mut rng);
            assert!((cc.x - 100).abs() <= 15);
            assert!((cc.y + 40).abs() <= 4);
        }
    }
}
