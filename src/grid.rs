//! Image-mode particle source: a regular W×H lattice over the image plane.
//!
//! The CPU emits only base positions and texture coordinates; color and
//! depth are sampled from the two textures in the vertex stage.

use crate::trails::TrailParticle;

/// Side length of the plane in world units (particles span ±5).
pub const PLANE_SIZE: f32 = 10.0;

/// Grid of base positions sized to a requested particle count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSource {
    pub width: u32,
    pub height: u32,
}

impl GridSource {
    /// Pick the square lattice closest to `particle_count` points.
    pub fn new(particle_count: u32) -> Self {
        let side = ((particle_count as f64).sqrt().round() as u32).max(2);
        Self {
            width: side,
            height: side,
        }
    }

    /// Actual number of particles the lattice emits.
    pub fn particle_count(&self) -> u32 {
        self.width * self.height
    }

    /// Base position and UV for lattice point `(i, j)`.
    pub fn point(&self, i: u32, j: u32) -> TrailParticle {
        let u = i as f32 / (self.width - 1).max(1) as f32;
        let v = j as f32 / (self.height - 1).max(1) as f32;
        TrailParticle {
            base: [(u - 0.5) * PLANE_SIZE, (v - 0.5) * PLANE_SIZE, 0.0],
            color: [1.0, 1.0, 1.0],
            uv: [u, v],
        }
    }

    /// All lattice points in row-major order.
    pub fn particles(&self) -> Vec<TrailParticle> {
        let mut out = Vec::with_capacity(self.particle_count() as usize);
        for j in 0..self.height {
            for i in 0..self.width {
                out.push(self.point(i, j));
            }
        }
        out
    }
}
