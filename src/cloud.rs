//! Point-cloud ingestion and conditioning for the PLY path.
//!
//! The pipeline is parse → normalize → color-filter → deterministic
//! subsample. The parser is a black box (`ply-rs`) wrapped by
//! [`parse_ply`]; everything downstream only sees flat `f32` position and
//! color arrays. Raw arrays are never mutated after normalization; the
//! subsampled [`RenderSet`] is rebuilt whenever the particle count or the
//! color filter changes.

use std::io::Cursor;

use glam::Vec3;
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};

use crate::config::UpAxis;
use crate::error::UploadError;
use crate::trails::TrailParticle;

/// Side of the normalized bounding cube; coordinates end up in [-5, 5].
pub const NORMALIZED_SIZE: f32 = 10.0;

/// Per-channel tolerance of the color filter.
pub const FILTER_TOLERANCE: f32 = 0.01;

/// A parsed, normalized point cloud. Owned by the ingestion stage and
/// immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudSource {
    positions: Vec<f32>,
    colors: Option<Vec<f32>>,
}

/// The subsampled view handed to the render graph.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSet {
    pub positions: Vec<f32>,
    pub colors: Option<Vec<f32>>,
}

/// Inputs the subsampler observes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubsampleParams {
    pub target_count: u32,
    pub enable_color_filter: bool,
    pub filter_color: [f32; 3],
}

impl CloudSource {
    /// Build a source from already-parsed arrays, validating the data-model
    /// invariants and normalizing positions into the ±5 cube.
    pub fn from_arrays(
        mut positions: Vec<f32>,
        colors: Option<Vec<f32>>,
    ) -> Result<Self, UploadError> {
        if positions.is_empty() || positions.len() % 3 != 0 {
            return Err(UploadError::PolygonParseFailed(format!(
                "position array length {} is not a non-empty multiple of 3",
                positions.len()
            )));
        }
        if let Some(ref colors) = colors {
            if colors.len() != positions.len() {
                return Err(UploadError::PolygonParseFailed(format!(
                    "color array length {} does not match position length {}",
                    colors.len(),
                    positions.len()
                )));
            }
        }

        normalize_positions(&mut positions);
        Ok(Self { positions, colors })
    }

    /// Parse a PLY byte buffer and normalize it.
    pub fn from_ply_bytes(bytes: &[u8]) -> Result<Self, UploadError> {
        let (positions, colors) = parse_ply(bytes)?;
        Self::from_arrays(positions, colors)
    }

    pub fn point_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn positions(&self) -> &[f32] {
        &self.positions
    }

    pub fn colors(&self) -> Option<&[f32]> {
        self.colors.as_deref()
    }

    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    /// Axis-aligned bounding box of the (normalized) positions.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        bounding_box(&self.positions)
    }

    /// Axis of maximum bounding-box extent, tie-break Y > Z > X.
    pub fn detect_up_axis(&self) -> UpAxis {
        let (min, max) = self.bounds();
        let extent = max - min;
        let largest = extent.x.max(extent.y).max(extent.z);
        if extent.y == largest {
            UpAxis::Y
        } else if extent.z == largest {
            UpAxis::Z
        } else {
            UpAxis::X
        }
    }

    /// Color-filter then stride-subsample down to the target count.
    ///
    /// The stride sample is deterministic and preserves source traversal
    /// order, so spatially ordered files keep approximately uniform density.
    pub fn subsample(&self, params: &SubsampleParams) -> RenderSet {
        let valid = filter_indices(
            self.colors.as_deref(),
            params.enable_color_filter,
            params.filter_color,
            self.point_count(),
        );

        let target = params.target_count as usize;
        let m = valid.len();

        let chosen: Vec<usize> = if m <= target {
            valid
        } else {
            let step = m.div_ceil(target);
            let k = m / step;
            (0..k).map(|i| valid[i * step]).collect()
        };

        let mut positions = Vec::with_capacity(chosen.len() * 3);
        let mut colors = self
            .colors
            .as_ref()
            .map(|_| Vec::with_capacity(chosen.len() * 3));

        for &idx in &chosen {
            positions.extend_from_slice(&self.positions[idx * 3..idx * 3 + 3]);
            if let (Some(out), Some(src)) = (colors.as_mut(), self.colors.as_ref()) {
                out.extend_from_slice(&src[idx * 3..idx * 3 + 3]);
            }
        }

        RenderSet { positions, colors }
    }
}

impl RenderSet {
    pub fn point_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Particles for the trail builder, replicating per-point color.
    pub fn particles(&self) -> Vec<TrailParticle> {
        let count = self.point_count();
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let color = match &self.colors {
                Some(c) => [c[i * 3], c[i * 3 + 1], c[i * 3 + 2]],
                None => [1.0, 1.0, 1.0],
            };
            out.push(TrailParticle {
                base: [
                    self.positions[i * 3],
                    self.positions[i * 3 + 1],
                    self.positions[i * 3 + 2],
                ],
                color,
                uv: [0.0, 0.0],
            });
        }
        out
    }
}

/// Center on the origin and scale the longest extent to the cube side.
/// Idempotent within floating tolerance; zero-extent clouds are only
/// re-centered.
pub fn normalize_positions(positions: &mut [f32]) {
    let (min, max) = bounding_box(positions);
    let center = (min + max) * 0.5;
    let extent = max - min;
    let size = extent.x.max(extent.y).max(extent.z);
    let scale = if size > 0.0 { NORMALIZED_SIZE / size } else { 1.0 };

    for p in positions.chunks_exact_mut(3) {
        p[0] = (p[0] - center.x) * scale;
        p[1] = (p[1] - center.y) * scale;
        p[2] = (p[2] - center.z) * scale;
    }
}

fn bounding_box(positions: &[f32]) -> (Vec3, Vec3) {
    let mut min = Vec3::splat(f32::INFINITY);
    let mut max = Vec3::splat(f32::NEG_INFINITY);
    for p in positions.chunks_exact(3) {
        let v = Vec3::new(p[0], p[1], p[2]);
        min = min.min(v);
        max = max.max(v);
    }
    (min, max)
}

/// Indices of points that survive the color filter, in source order.
///
/// A point is kept if colors are absent, the filter is disabled, or any
/// channel differs from the filter color by more than the tolerance.
pub fn filter_indices(
    colors: Option<&[f32]>,
    enabled: bool,
    filter_color: [f32; 3],
    point_count: usize,
) -> Vec<usize> {
    let Some(colors) = colors.filter(|_| enabled) else {
        return (0..point_count).collect();
    };

    (0..point_count)
        .filter(|&i| {
            let matches = (0..3)
                .all(|c| (colors[i * 3 + c] - filter_color[c]).abs() < FILTER_TOLERANCE);
            !matches
        })
        .collect()
}

/// Black-box polygon parser: yields flat position and optional color
/// arrays from PLY bytes. Colors are normalized to [0, 1].
pub fn parse_ply(bytes: &[u8]) -> Result<(Vec<f32>, Option<Vec<f32>>), UploadError> {
    let parser = Parser::<DefaultElement>::new();
    let mut reader = Cursor::new(bytes);
    let ply = parser
        .read_ply(&mut reader)
        .map_err(|e| UploadError::PolygonParseFailed(e.to_string()))?;

    let vertices = ply
        .payload
        .get("vertex")
        .ok_or_else(|| UploadError::PolygonParseFailed("no vertex element".into()))?;

    let mut positions = Vec::with_capacity(vertices.len() * 3);
    let mut colors = Vec::with_capacity(vertices.len() * 3);
    let mut any_color = false;

    for vertex in vertices {
        for key in ["x", "y", "z"] {
            let value = vertex
                .get(key)
                .and_then(scalar_property)
                .ok_or_else(|| {
                    UploadError::PolygonParseFailed(format!("vertex missing property '{key}'"))
                })?;
            positions.push(value);
        }

        let channel = |names: [&str; 2]| {
            names
                .iter()
                .find_map(|n| vertex.get(*n).and_then(color_property))
        };
        match (
            channel(["red", "r"]),
            channel(["green", "g"]),
            channel(["blue", "b"]),
        ) {
            (Some(r), Some(g), Some(b)) => {
                any_color = true;
                colors.extend_from_slice(&[r, g, b]);
            }
            _ => colors.extend_from_slice(&[1.0, 1.0, 1.0]),
        }
    }

    Ok((positions, any_color.then_some(colors)))
}

fn scalar_property(p: &Property) -> Option<f32> {
    match *p {
        Property::Float(v) => Some(v),
        Property::Double(v) => Some(v as f32),
        Property::Char(v) => Some(v as f32),
        Property::UChar(v) => Some(v as f32),
        Property::Short(v) => Some(v as f32),
        Property::UShort(v) => Some(v as f32),
        Property::Int(v) => Some(v as f32),
        Property::UInt(v) => Some(v as f32),
        _ => None,
    }
}

/// Color channels: integer types are treated as 0-255, floats as 0-1.
fn color_property(p: &Property) -> Option<f32> {
    match *p {
        Property::UChar(v) => Some(v as f32 / 255.0),
        Property::Char(v) => Some(v as f32 / 255.0),
        Property::UShort(v) => Some(v as f32 / 65535.0),
        Property::Float(v) => Some(v),
        Property::Double(v) => Some(v as f32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_corners(scale: f32) -> Vec<f32> {
        let mut out = Vec::new();
        for x in [-1.0f32, 1.0] {
            for y in [-1.0f32, 1.0] {
                for z in [-1.0f32, 1.0] {
                    out.extend_from_slice(&[x * scale, y * scale, z * scale]);
                }
            }
        }
        out
    }

    #[test]
    fn normalization_fits_the_cube_and_centers_on_origin() {
        let src = CloudSource::from_arrays(cube_corners(10.0), None).unwrap();
        for &c in src.positions() {
            assert!((-5.0..=5.0).contains(&c));
            assert!(c.abs() == 5.0, "cube corners land on the cube faces");
        }

        let (min, max) = src.bounds();
        let center = (min + max) * 0.5;
        assert!(center.length() < 1e-4);
    }

    #[test]
    fn normalization_is_idempotent() {
        let mut positions = vec![1.0, 2.0, 3.0, -4.0, 0.5, 2.0, 3.0, -1.0, 0.0];
        normalize_positions(&mut positions);
        let once = positions.clone();
        normalize_positions(&mut positions);
        for (a, b) in once.iter().zip(&positions) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn zero_extent_cloud_is_only_recentered() {
        let mut positions = vec![2.0, 2.0, 2.0, 2.0, 2.0, 2.0];
        normalize_positions(&mut positions);
        assert_eq!(positions, vec![0.0; 6]);
    }

    #[test]
    fn anisotropic_cloud_keeps_aspect_ratio() {
        // Extents (2, 10, 3): the longest axis maps to 10, others scale along.
        let positions = vec![
            0.0, 0.0, 0.0, //
            2.0, 10.0, 3.0,
        ];
        let src = CloudSource::from_arrays(positions, None).unwrap();
        let (min, max) = src.bounds();
        let extent = max - min;
        assert!((extent.y - 10.0).abs() < 1e-4);
        assert!((extent.x - 2.0).abs() < 1e-4);
        assert!((extent.z - 3.0).abs() < 1e-4);
    }

    #[test]
    fn detect_axis_prefers_longest_extent() {
        let src = CloudSource::from_arrays(vec![0.0, 0.0, 0.0, 2.0, 10.0, 3.0], None).unwrap();
        assert_eq!(src.detect_up_axis(), UpAxis::Y);

        let src = CloudSource::from_arrays(vec![0.0, 0.0, 0.0, 2.0, 3.0, 10.0], None).unwrap();
        assert_eq!(src.detect_up_axis(), UpAxis::Z);

        let src = CloudSource::from_arrays(vec![0.0, 0.0, 0.0, 10.0, 3.0, 2.0], None).unwrap();
        assert_eq!(src.detect_up_axis(), UpAxis::X);
    }

    #[test]
    fn detect_axis_tie_breaks_y_over_z_over_x() {
        // Equal extents everywhere: Y wins.
        let src = CloudSource::from_arrays(cube_corners(1.0), None).unwrap();
        assert_eq!(src.detect_up_axis(), UpAxis::Y);

        // Z and X tied above Y: Z wins.
        let src =
            CloudSource::from_arrays(vec![0.0, 0.0, 0.0, 4.0, 1.0, 4.0], None).unwrap();
        assert_eq!(src.detect_up_axis(), UpAxis::Z);
    }

    #[test]
    fn small_clouds_pass_through_subsampling() {
        // S2: eight corners survive a 40 000 target untouched.
        let src = CloudSource::from_arrays(cube_corners(10.0), None).unwrap();
        let set = src.subsample(&SubsampleParams {
            target_count: 40_000,
            enable_color_filter: false,
            filter_color: [1.0, 1.0, 1.0],
        });
        assert_eq!(set.point_count(), 8);
        assert_eq!(set.positions, src.positions);
        assert!(set.colors.is_none());
    }

    #[test]
    fn stride_subsampling_bounds_hold() {
        let n: usize = 10_123;
        let positions: Vec<f32> = (0..n * 3).map(|i| i as f32).collect();
        let src = CloudSource::from_arrays(positions, None).unwrap();

        for target in [1_000u32, 3_000, 9_999] {
            let set = src.subsample(&SubsampleParams {
                target_count: target,
                enable_color_filter: false,
                filter_color: [1.0, 1.0, 1.0],
            });
            let k = set.point_count();
            let step = n.div_ceil(target as usize);
            assert!(k <= target as usize, "K={k} exceeds target {target}");
            assert_eq!(k, n / step, "K must equal floor(M/step)");
        }
    }

    #[test]
    fn subsampling_already_subsampled_is_identity() {
        let positions: Vec<f32> = (0..3_000).map(|i| i as f32).collect();
        let src = CloudSource::from_arrays(positions, None).unwrap();
        let params = SubsampleParams {
            target_count: 400,
            enable_color_filter: false,
            filter_color: [1.0, 1.0, 1.0],
        };
        let once = src.subsample(&params);

        let again = CloudSource {
            positions: once.positions.clone(),
            colors: None,
        }
        .subsample(&params);
        assert_eq!(once, again);
    }

    #[test]
    fn color_filter_drops_matching_points() {
        // S3: 1000 points, 300 pure white, filter #ffffff.
        let n = 1_000;
        let positions: Vec<f32> = (0..n * 3).map(|i| i as f32 * 0.001).collect();
        let colors: Vec<f32> = (0..n)
            .flat_map(|i| {
                if i % 10 < 3 {
                    [1.0, 1.0, 1.0]
                } else {
                    [0.2, 0.4, 0.6]
                }
            })
            .collect();
        let src = CloudSource::from_arrays(positions, Some(colors)).unwrap();

        let set = src.subsample(&SubsampleParams {
            target_count: 40_000,
            enable_color_filter: true,
            filter_color: [1.0, 1.0, 1.0],
        });
        assert_eq!(set.point_count(), 700);
        assert_eq!(set.colors.as_ref().unwrap().len(), 700 * 3);
    }

    #[test]
    fn filter_without_matches_keeps_everything() {
        let colors = vec![0.5; 300];
        let indices = filter_indices(Some(&colors), true, [1.0, 1.0, 1.0], 100);
        assert_eq!(indices.len(), 100);
    }

    #[test]
    fn filter_disabled_or_colorless_keeps_everything() {
        assert_eq!(filter_indices(None, true, [1.0, 1.0, 1.0], 5).len(), 5);
        let colors = vec![1.0; 15];
        assert_eq!(filter_indices(Some(&colors), false, [1.0, 1.0, 1.0], 5).len(), 5);
    }

    #[test]
    fn parses_ascii_ply_with_colors() {
        let ply = b"ply\n\
format ascii 1.0\n\
element vertex 2\n\
property float x\n\
property float y\n\
property float z\n\
property uchar red\n\
property uchar green\n\
property uchar blue\n\
end_header\n\
0.0 0.0 0.0 255 0 0\n\
1.0 2.0 3.0 0 255 0\n";
        let (positions, colors) = parse_ply(ply).unwrap();
        assert_eq!(positions, vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        let colors = colors.unwrap();
        assert_eq!(colors, vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn parses_ascii_ply_without_colors() {
        let ply = b"ply\n\
format ascii 1.0\n\
element vertex 1\n\
property float x\n\
property float y\n\
property float z\n\
end_header\n\
4.0 5.0 6.0\n";
        let (positions, colors) = parse_ply(ply).unwrap();
        assert_eq!(positions, vec![4.0, 5.0, 6.0]);
        assert!(colors.is_none());
    }

    #[test]
    fn malformed_ply_is_rejected_without_state_change() {
        assert!(CloudSource::from_ply_bytes(b"not a ply file").is_err());
        assert!(CloudSource::from_arrays(vec![1.0, 2.0], None).is_err());
        assert!(CloudSource::from_arrays(vec![1.0, 2.0, 3.0], Some(vec![1.0])).is_err());
    }
}
