//! Static trail geometry shared by both particle sources.
//!
//! Trails carry no simulation state. Each vertex is stamped with its base
//! position and a normalized lag `segment` in [0, 1]; the vertex shader
//! re-evaluates the displacement field at a lagged time per vertex, so the
//! buffers uploaded here never change while animating. Only particle
//! count, colors, or the trail style force a rebuild.

use bytemuck::{Pod, Zeroable};

/// Vertices per trail polyline.
pub const TRAIL_SEGMENTS: u32 = 20;

/// How a trail is expanded on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailStyle {
    /// One polyline per particle, rasterized as 1px line segments.
    Line,
    /// A camera-facing ribbon, two triangles per segment.
    Ribbon,
}

/// A single particle as produced by a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailParticle {
    pub base: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

/// Vertex layout for trails, shared by the line and ribbon pipelines.
/// `side` is 0 for lines and ±1 for the two ribbon edges.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TrailVertex {
    pub base: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
    pub segment: f32,
    pub side: f32,
}

/// Vertex layout for particle heads; one per particle, instanced into
/// a screen-facing quad by the head pipeline.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct HeadVertex {
    pub base: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

/// CPU-side geometry ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailGeometry {
    pub style: TrailStyle,
    pub vertices: Vec<TrailVertex>,
    pub indices: Vec<u32>,
}

impl TrailGeometry {
    /// Build trail buffers for every particle.
    ///
    /// Line style emits `N * S` vertices and `N * (S - 1) * 2` indices;
    /// ribbon style emits `N * S * 2` vertices and `N * (S - 1) * 6`
    /// indices. Vertex `segment` runs 0 at the head to 1 at the tail.
    pub fn build(style: TrailStyle, particles: &[TrailParticle]) -> Self {
        let n = particles.len();
        let s = TRAIL_SEGMENTS as usize;

        match style {
            TrailStyle::Line => {
                let mut vertices = Vec::with_capacity(n * s);
                let mut indices = Vec::with_capacity(n * (s - 1) * 2);
                for (p_idx, p) in particles.iter().enumerate() {
                    let first = (p_idx * s) as u32;
                    for seg in 0..s {
                        vertices.push(TrailVertex {
                            base: p.base,
                            color: p.color,
                            uv: p.uv,
                            segment: seg as f32 / (s - 1) as f32,
                            side: 0.0,
                        });
                    }
                    for seg in 0..s as u32 - 1 {
                        indices.push(first + seg);
                        indices.push(first + seg + 1);
                    }
                }
                Self {
                    style,
                    vertices,
                    indices,
                }
            }
            TrailStyle::Ribbon => {
                let mut vertices = Vec::with_capacity(n * s * 2);
                let mut indices = Vec::with_capacity(n * (s - 1) * 6);
                for (p_idx, p) in particles.iter().enumerate() {
                    let first = (p_idx * s * 2) as u32;
                    for seg in 0..s {
                        let segment = seg as f32 / (s - 1) as f32;
                        for side in [-1.0f32, 1.0] {
                            vertices.push(TrailVertex {
                                base: p.base,
                                color: p.color,
                                uv: p.uv,
                                segment,
                                side,
                            });
                        }
                    }
                    for seg in 0..s as u32 - 1 {
                        let left = first + seg * 2;
                        let right = left + 1;
                        let next_left = left + 2;
                        let next_right = left + 3;
                        indices.extend_from_slice(&[
                            left, right, next_left, //
                            right, next_right, next_left,
                        ]);
                    }
                }
                Self {
                    style,
                    vertices,
                    indices,
                }
            }
        }
    }
}

/// Head vertices, one per particle.
pub fn head_vertices(particles: &[TrailParticle]) -> Vec<HeadVertex> {
    particles
        .iter()
        .map(|p| HeadVertex {
            base: p.base,
            color: p.color,
            uv: p.uv,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particles(n: usize) -> Vec<TrailParticle> {
        (0..n)
            .map(|i| TrailParticle {
                base: [i as f32, 0.0, -(i as f32)],
                color: [0.1 * i as f32, 0.5, 0.9],
                uv: [i as f32 / n as f32, 0.25],
            })
            .collect()
    }

    #[test]
    fn line_geometry_dimensions() {
        let geo = TrailGeometry::build(TrailStyle::Line, &particles(100));
        assert_eq!(geo.vertices.len(), 100 * 20);
        assert_eq!(geo.indices.len(), 100 * 19 * 2);
    }

    #[test]
    fn ribbon_geometry_dimensions() {
        let geo = TrailGeometry::build(TrailStyle::Ribbon, &particles(100));
        assert_eq!(geo.vertices.len(), 100 * 20 * 2);
        assert_eq!(geo.indices.len(), 100 * 19 * 6);
    }

    #[test]
    fn segments_run_zero_to_one() {
        let geo = TrailGeometry::build(TrailStyle::Line, &particles(3));
        for chunk in geo.vertices.chunks_exact(20) {
            assert_eq!(chunk[0].segment, 0.0);
            assert_eq!(chunk[19].segment, 1.0);
            for pair in chunk.windows(2) {
                assert!(pair[0].segment < pair[1].segment);
            }
        }
    }

    #[test]
    fn every_vertex_carries_its_particle_base() {
        let src = particles(5);
        let geo = TrailGeometry::build(TrailStyle::Ribbon, &src);
        for (p_idx, p) in src.iter().enumerate() {
            for v in &geo.vertices[p_idx * 40..(p_idx + 1) * 40] {
                assert_eq!(v.base, p.base);
                assert_eq!(v.color, p.color);
                assert_eq!(v.uv, p.uv);
            }
        }
    }

    #[test]
    fn ribbon_sides_alternate() {
        let geo = TrailGeometry::build(TrailStyle::Ribbon, &particles(1));
        for pair in geo.vertices.chunks_exact(2) {
            assert_eq!(pair[0].side, -1.0);
            assert_eq!(pair[1].side, 1.0);
            assert_eq!(pair[0].segment, pair[1].segment);
        }
    }

    #[test]
    fn line_indices_stay_within_particle() {
        let geo = TrailGeometry::build(TrailStyle::Line, &particles(4));
        for (p_idx, chunk) in geo.indices.chunks_exact(19 * 2).enumerate() {
            let lo = (p_idx * 20) as u32;
            let hi = lo + 20;
            for &i in chunk {
                assert!((lo..hi).contains(&i));
            }
        }
    }

    #[test]
    fn ribbon_indices_reference_valid_vertices() {
        let geo = TrailGeometry::build(TrailStyle::Ribbon, &particles(7));
        let len = geo.vertices.len() as u32;
        assert!(geo.indices.iter().all(|&i| i < len));
        assert_eq!(geo.indices.len() % 3, 0);
    }

    #[test]
    fn head_vertices_mirror_particles() {
        let src = particles(6);
        let heads = head_vertices(&src);
        assert_eq!(heads.len(), 6);
        for (h, p) in heads.iter().zip(&src) {
            assert_eq!(h.base, p.base);
            assert_eq!(h.color, p.color);
        }
    }
}
