//! The configuration record and its reactive merge operation.
//!
//! A single [`SimulationConfig`] drives everything: both rendering modes,
//! both trail geometries, the subsampler and the camera. Mutation goes
//! through [`SimulationConfig::apply`], which merges a partial
//! [`ConfigPatch`], clamps every numeric field to its documented range and
//! returns a [`ChangeSet`] naming the fields that actually changed.
//! Subsystems react by intersecting that set with the fields they observe
//! (see the `FIELDS_*` constants).
//!
//! `auto_detect_axis` is the one pulse field: it stays set until the
//! component that consumes it calls [`SimulationConfig::take_auto_detect`].

use serde::{Deserialize, Serialize};

/// World up axis for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UpAxis {
    X,
    #[default]
    Y,
    Z,
}

impl UpAxis {
    pub fn unit(self) -> glam::Vec3 {
        match self {
            UpAxis::X => glam::Vec3::X,
            UpAxis::Y => glam::Vec3::Y,
            UpAxis::Z => glam::Vec3::Z,
        }
    }
}

/// Fields of the configuration record, used to key change subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ConfigField {
    PointSize = 0,
    TrailThickness,
    UseRealTrailThickness,
    DisplacementScale,
    NoiseSpeed,
    NoiseAmplitude,
    NoiseScale,
    TrailLength,
    NoiseBlend,
    TimeRandomization,
    TimeRandomizationScale,
    SpeedRandomization,
    ParticleColor,
    ParticleCount,
    EnableColorFilter,
    FilterColor,
    UpAxis,
    AutoDetectAxis,
    LightEmissionProportion,
}

/// A set of changed configuration fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeSet(u32);

impl ChangeSet {
    pub const EMPTY: ChangeSet = ChangeSet(0);

    /// Fields whose change forces a trail-geometry rebuild.
    pub const FIELDS_TRAIL_GEOMETRY: ChangeSet = ChangeSet(
        1 << ConfigField::ParticleCount as u32
            | 1 << ConfigField::UseRealTrailThickness as u32,
    );

    /// Fields the point-cloud subsampler observes.
    pub const FIELDS_SUBSAMPLE: ChangeSet = ChangeSet(
        1 << ConfigField::ParticleCount as u32
            | 1 << ConfigField::EnableColorFilter as u32
            | 1 << ConfigField::FilterColor as u32,
    );

    pub fn insert(&mut self, field: ConfigField) {
        self.0 |= 1 << field as u32;
    }

    pub fn contains(&self, field: ConfigField) -> bool {
        self.0 & (1 << field as u32) != 0
    }

    pub fn intersects(&self, other: ChangeSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(self, other: ChangeSet) -> ChangeSet {
        ChangeSet(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// The single source of truth driving rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Screen-pixel sprite size at unit distance; 0 hides heads.
    pub point_size: f32,
    /// Ribbon half-width scalar; 0 hides trails.
    pub trail_thickness: f32,
    /// false: thin polyline trails, true: view-aligned ribbons.
    pub use_real_trail_thickness: bool,
    /// Depth-to-z multiplier, image mode only.
    pub displacement_scale: f32,
    /// Temporal frequency of the field.
    pub noise_speed: f32,
    /// Spatial magnitude of the field.
    pub noise_amplitude: f32,
    /// Spatial frequency of the field.
    pub noise_scale: f32,
    /// Temporal extent of the trail, in seconds when speed = 1.
    pub trail_length: f32,
    /// 0 = pure turbulence, 1 = pure Perlin field.
    pub noise_blend: f32,
    /// Per-particle time-offset magnitude, fraction of 5 s.
    pub time_randomization: f32,
    /// Multiplier on the time-offset range.
    pub time_randomization_scale: f32,
    /// Reserved: consumed by no pipeline stage yet.
    pub speed_randomization: f32,
    /// Fallback tint when vertex colors are absent, linear RGB.
    pub particle_color: [f32; 3],
    /// Target point count.
    pub particle_count: u32,
    pub enable_color_filter: bool,
    /// Points whose color equals this ± 0.01 per channel are dropped.
    pub filter_color: [f32; 3],
    /// Camera up direction.
    pub up_axis: UpAxis,
    /// One-shot request: set `up_axis` to the longest bounding-box extent.
    pub auto_detect_axis: bool,
    /// Reserved: consumed by no pipeline stage yet.
    pub light_emission_proportion: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            point_size: 0.0,
            trail_thickness: 0.5,
            use_real_trail_thickness: true,
            displacement_scale: 3.5,
            noise_speed: 0.3,
            noise_amplitude: 0.3,
            noise_scale: 0.5,
            trail_length: 2.0,
            noise_blend: 1.0,
            time_randomization: 0.5,
            time_randomization_scale: 1.0,
            speed_randomization: 0.0,
            particle_color: [0.0, 1.0, 1.0],
            particle_count: 40_000,
            enable_color_filter: false,
            filter_color: [1.0, 1.0, 1.0],
            up_axis: UpAxis::Y,
            auto_detect_axis: false,
            light_emission_proportion: 0.0,
        }
    }
}

/// A partial update to the configuration. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub point_size: Option<f32>,
    pub trail_thickness: Option<f32>,
    pub use_real_trail_thickness: Option<bool>,
    pub displacement_scale: Option<f32>,
    pub noise_speed: Option<f32>,
    pub noise_amplitude: Option<f32>,
    pub noise_scale: Option<f32>,
    pub trail_length: Option<f32>,
    pub noise_blend: Option<f32>,
    pub time_randomization: Option<f32>,
    pub time_randomization_scale: Option<f32>,
    pub speed_randomization: Option<f32>,
    pub particle_color: Option<[f32; 3]>,
    pub particle_count: Option<u32>,
    pub enable_color_filter: Option<bool>,
    pub filter_color: Option<[f32; 3]>,
    pub up_axis: Option<UpAxis>,
    pub auto_detect_axis: Option<bool>,
    pub light_emission_proportion: Option<f32>,
}

impl ConfigPatch {
    pub fn particle_count(count: u32) -> Self {
        Self {
            particle_count: Some(count),
            ..Self::default()
        }
    }

    pub fn auto_detect_axis() -> Self {
        Self {
            auto_detect_axis: Some(true),
            ..Self::default()
        }
    }
}

macro_rules! merge_clamped {
    ($cfg:ident, $patch:ident, $changes:ident, $field:ident, $variant:ident, $lo:expr, $hi:expr) => {
        if let Some(v) = $patch.$field {
            let v = v.clamp($lo, $hi);
            if $cfg.$field != v {
                $cfg.$field = v;
                $changes.insert(ConfigField::$variant);
            }
        }
    };
}

macro_rules! merge_plain {
    ($cfg:ident, $patch:ident, $changes:ident, $field:ident, $variant:ident) => {
        if let Some(v) = $patch.$field {
            if $cfg.$field != v {
                $cfg.$field = v;
                $changes.insert(ConfigField::$variant);
            }
        }
    };
}

impl SimulationConfig {
    /// Merge a partial patch, clamping every numeric field to its range.
    ///
    /// Returns the set of fields whose value actually changed, so applying
    /// the same patch twice publishes nothing the second time.
    pub fn apply(&mut self, patch: &ConfigPatch) -> ChangeSet {
        let mut changes = ChangeSet::default();

        merge_clamped!(self, patch, changes, point_size, PointSize, 0.0, 3.5);
        merge_clamped!(self, patch, changes, trail_thickness, TrailThickness, 0.0, 3.5);
        merge_plain!(self, patch, changes, use_real_trail_thickness, UseRealTrailThickness);
        merge_clamped!(self, patch, changes, displacement_scale, DisplacementScale, 0.0, 10.0);
        merge_clamped!(self, patch, changes, noise_speed, NoiseSpeed, 0.0, 5.0);
        merge_clamped!(self, patch, changes, noise_amplitude, NoiseAmplitude, 0.0, 2.0);
        merge_clamped!(self, patch, changes, noise_scale, NoiseScale, 0.02, 2.0);
        merge_clamped!(self, patch, changes, trail_length, TrailLength, 0.0, 5.0);
        merge_clamped!(self, patch, changes, noise_blend, NoiseBlend, 0.0, 1.0);
        merge_clamped!(self, patch, changes, time_randomization, TimeRandomization, 0.0, 1.0);
        merge_clamped!(
            self, patch, changes, time_randomization_scale, TimeRandomizationScale, 0.1, 3.0
        );
        merge_clamped!(self, patch, changes, speed_randomization, SpeedRandomization, 0.0, 1.0);
        merge_plain!(self, patch, changes, particle_color, ParticleColor);

        if let Some(count) = patch.particle_count {
            let count = count.clamp(1_000, 1_000_000);
            if self.particle_count != count {
                self.particle_count = count;
                changes.insert(ConfigField::ParticleCount);
            }
        }

        merge_plain!(self, patch, changes, enable_color_filter, EnableColorFilter);
        merge_plain!(self, patch, changes, filter_color, FilterColor);
        merge_plain!(self, patch, changes, up_axis, UpAxis);
        merge_plain!(self, patch, changes, auto_detect_axis, AutoDetectAxis);
        merge_clamped!(
            self, patch, changes, light_emission_proportion, LightEmissionProportion, 0.0, 1.0
        );

        changes
    }

    /// Consume the auto-detect pulse. Returns whether it was set.
    pub fn take_auto_detect(&mut self) -> bool {
        std::mem::take(&mut self.auto_detect_axis)
    }
}

/// Parse a `#rrggbb` hex color into normalized linear RGB.
pub fn parse_hex_color(hex: &str) -> Option<[f32; 3]> {
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([
        channel(0)? as f32 / 255.0,
        channel(2)? as f32 / 255.0,
        channel(4)? as f32 / 255.0,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_is_idempotent() {
        let patch = ConfigPatch {
            noise_speed: Some(1.5),
            particle_count: Some(20_000),
            use_real_trail_thickness: Some(false),
            ..ConfigPatch::default()
        };

        let mut a = SimulationConfig::default();
        let first = a.apply(&patch);
        assert!(!first.is_empty());

        let snapshot = a.clone();
        let second = a.apply(&patch);
        assert!(second.is_empty(), "second apply must publish nothing");
        assert_eq!(a, snapshot);
    }

    #[test]
    fn particle_count_is_clamped() {
        let mut cfg = SimulationConfig::default();
        cfg.apply(&ConfigPatch::particle_count(500));
        assert_eq!(cfg.particle_count, 1_000);

        cfg.apply(&ConfigPatch::particle_count(5_000_000));
        assert_eq!(cfg.particle_count, 1_000_000);
    }

    #[test]
    fn numeric_fields_are_clamped_to_documented_ranges() {
        let mut cfg = SimulationConfig::default();
        cfg.apply(&ConfigPatch {
            point_size: Some(99.0),
            noise_scale: Some(0.0),
            time_randomization_scale: Some(0.0),
            noise_blend: Some(-1.0),
            ..ConfigPatch::default()
        });
        assert_eq!(cfg.point_size, 3.5);
        assert_eq!(cfg.noise_scale, 0.02);
        assert_eq!(cfg.time_randomization_scale, 0.1);
        assert_eq!(cfg.noise_blend, 0.0);
    }

    #[test]
    fn change_set_keys_on_observed_fields() {
        let mut cfg = SimulationConfig::default();
        let changes = cfg.apply(&ConfigPatch::particle_count(10_000));
        assert!(changes.intersects(ChangeSet::FIELDS_TRAIL_GEOMETRY));
        assert!(changes.intersects(ChangeSet::FIELDS_SUBSAMPLE));

        let changes = cfg.apply(&ConfigPatch {
            noise_speed: Some(2.0),
            ..ConfigPatch::default()
        });
        assert!(!changes.intersects(ChangeSet::FIELDS_TRAIL_GEOMETRY));
        assert!(changes.contains(ConfigField::NoiseSpeed));
    }

    #[test]
    fn auto_detect_is_a_pulse() {
        let mut cfg = SimulationConfig::default();
        let changes = cfg.apply(&ConfigPatch::auto_detect_axis());
        assert!(changes.contains(ConfigField::AutoDetectAxis));
        assert!(cfg.take_auto_detect());
        assert!(!cfg.auto_detect_axis);
        assert!(!cfg.take_auto_detect(), "pulse consumed exactly once");
    }

    #[test]
    fn reserved_fields_merge_but_drive_nothing() {
        let mut cfg = SimulationConfig::default();
        let changes = cfg.apply(&ConfigPatch {
            speed_randomization: Some(0.7),
            light_emission_proportion: Some(0.4),
            ..ConfigPatch::default()
        });
        assert!(changes.contains(ConfigField::SpeedRandomization));
        assert!(!changes.intersects(ChangeSet::FIELDS_TRAIL_GEOMETRY));
        assert!(!changes.intersects(ChangeSet::FIELDS_SUBSAMPLE));
    }

    #[test]
    fn patches_deserialize_with_absent_fields() {
        let patch: ConfigPatch =
            serde_json::from_str(r#"{ "noise_speed": 1.2, "up_axis": "Z" }"#).unwrap();
        assert_eq!(patch.noise_speed, Some(1.2));
        assert_eq!(patch.up_axis, Some(UpAxis::Z));
        assert_eq!(patch.particle_count, None);

        let mut cfg = SimulationConfig::default();
        let changes = cfg.apply(&patch);
        assert!(changes.contains(ConfigField::NoiseSpeed));
        assert_eq!(cfg.up_axis, UpAxis::Z);
    }

    #[test]
    fn hex_colors_parse() {
        assert_eq!(parse_hex_color("#ffffff"), Some([1.0, 1.0, 1.0]));
        assert_eq!(parse_hex_color("000000"), Some([0.0, 0.0, 0.0]));
        let cyan = parse_hex_color("#00ffff").unwrap();
        assert_eq!(cyan, [0.0, 1.0, 1.0]);
        assert_eq!(parse_hex_color("#fff"), None);
        assert_eq!(parse_hex_color("#zzzzzz"), None);
    }
}
