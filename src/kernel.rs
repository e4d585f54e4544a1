//! The displacement field shared by every rendering path.
//!
//! Each particle's world position is a pure function of its base position,
//! the current time and a handful of noise parameters:
//!
//! ```text
//! displace(base, depth, t, params) = base_3d + amplitude * lerp(T, P, blend)
//! ```
//!
//! where `base_3d` lifts the base by the sampled depth (image mode only),
//! `T` is a curl-style turbulence field and `P` is a three-channel gradient
//! noise field. The function carries no frame state, which is what makes
//! stateless trails possible: a trail is just `displace` evaluated at
//! time-lagged samples of `t`.
//!
//! The module ships two renditions of the same math. [`KERNEL_WGSL`] is
//! spliced into every shader and runs in the vertex stage;
//! [`displace`] is the Rust reference used by the tests. Both follow the
//! same structure so a reader can check them against each other
//! side by side (exact bit equality across CPU and GPU is not promised,
//! determinism within each rendition is).
//!
//! # The particle hash
//!
//! Per-particle time jitter derives from a stateless hash of the base
//! position, documented here so trail positions can be reproduced exactly:
//!
//! ```text
//! hash(p) = fract(sin(dot(p, (127.1, 311.7, 74.7))) * 43758.5453123)
//! offset(p) = (hash(p) - 0.5) * time_randomization * time_randomization_scale * 5.0
//! ```

use glam::{Vec2, Vec3, Vec4, Vec3Swizzles, Vec4Swizzles};

/// Finite-difference step for the turbulence curl estimate.
const CURL_EPS: f32 = 0.1;

/// Keeps the turbulence field's range comparable to the Perlin field's.
const CURL_GAIN: f32 = 0.35;

/// Subset of the configuration consumed by the kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelParams {
    pub noise_amplitude: f32,
    pub noise_speed: f32,
    pub noise_scale: f32,
    pub noise_blend: f32,
    pub displacement_scale: f32,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            noise_amplitude: 0.3,
            noise_speed: 0.3,
            noise_scale: 0.5,
            noise_blend: 1.0,
            displacement_scale: 3.5,
        }
    }
}

/// GLSL-style fract: always in [0, 1).
#[inline]
fn fract(x: f32) -> f32 {
    x - x.floor()
}

/// Stateless per-particle hash in [0, 1). See the module docs.
pub fn hash(p: Vec3) -> f32 {
    fract((p.dot(Vec3::new(127.1, 311.7, 74.7))).sin() * 43758.5453123)
}

/// Per-particle time offset in seconds.
///
/// Zero `time_randomization` phase-locks every particle.
pub fn time_offset(base: Vec3, time_randomization: f32, time_randomization_scale: f32) -> f32 {
    (hash(base) - 0.5) * time_randomization * time_randomization_scale * 5.0
}

fn mod289_3(x: Vec3) -> Vec3 {
    x - (x * (1.0 / 289.0)).floor() * 289.0
}

fn mod289_4(x: Vec4) -> Vec4 {
    x - (x * (1.0 / 289.0)).floor() * 289.0
}

fn permute4(x: Vec4) -> Vec4 {
    mod289_4(((x * 34.0) + Vec4::ONE) * x)
}

fn taylor_inv_sqrt4(r: Vec4) -> Vec4 {
    Vec4::splat(1.792_842_9) - 0.853_734_7 * r
}

fn step3(edge: Vec3, x: Vec3) -> Vec3 {
    Vec3::select(x.cmpge(edge), Vec3::ONE, Vec3::ZERO)
}

fn step4(edge: Vec4, x: Vec4) -> Vec4 {
    Vec4::select(x.cmpge(edge), Vec4::ONE, Vec4::ZERO)
}

/// 3D simplex gradient noise in roughly [-1, 1].
///
/// Scalar port of the Ashima simplex noise; the WGSL rendition in
/// [`KERNEL_WGSL`] is the same algorithm.
pub fn noise3(v: Vec3) -> f32 {
    let c = Vec2::new(1.0 / 6.0, 1.0 / 3.0);
    let d = Vec4::new(0.0, 0.5, 1.0, 2.0);

    // First corner
    let mut i = (v + Vec3::splat(v.dot(Vec3::splat(c.y)))).floor();
    let x0 = v - i + Vec3::splat(i.dot(Vec3::splat(c.x)));

    // Other corners
    let g = step3(x0.yzx(), x0);
    let l = Vec3::ONE - g;
    let i1 = g.min(l.zxy());
    let i2 = g.max(l.zxy());

    let x1 = x0 - i1 + Vec3::splat(c.x);
    let x2 = x0 - i2 + Vec3::splat(c.y);
    let x3 = x0 - Vec3::splat(d.y);

    // Permutations
    i = mod289_3(i);
    let p = permute4(
        permute4(
            permute4(Vec4::splat(i.z) + Vec4::new(0.0, i1.z, i2.z, 1.0))
                + Vec4::splat(i.y)
                + Vec4::new(0.0, i1.y, i2.y, 1.0),
        ) + Vec4::splat(i.x)
            + Vec4::new(0.0, i1.x, i2.x, 1.0),
    );

    // Gradients
    let n_ = 0.142_857_142_857;
    let ns = n_ * d.wyz() - d.xzx();

    let j = p - 49.0 * (p * ns.z * ns.z).floor();

    let x_ = (j * ns.z).floor();
    let y_ = (j - 7.0 * x_).floor();

    let x = x_ * ns.x + Vec4::splat(ns.y);
    let y = y_ * ns.x + Vec4::splat(ns.y);
    let h = Vec4::ONE - x.abs() - y.abs();

    let b0 = Vec4::new(x.x, x.y, y.x, y.y);
    let b1 = Vec4::new(x.z, x.w, y.z, y.w);

    let s0 = b0.floor() * 2.0 + Vec4::ONE;
    let s1 = b1.floor() * 2.0 + Vec4::ONE;
    let sh = -step4(h, Vec4::ZERO);

    let a0 = b0.xzyw() + s0.xzyw() * sh.xxyy();
    let a1 = b1.xzyw() + s1.xzyw() * sh.zzww();

    let mut p0 = Vec3::new(a0.x, a0.y, h.x);
    let mut p1 = Vec3::new(a0.z, a0.w, h.y);
    let mut p2 = Vec3::new(a1.x, a1.y, h.z);
    let mut p3 = Vec3::new(a1.z, a1.w, h.w);

    // Normalize gradients
    let norm = taylor_inv_sqrt4(Vec4::new(
        p0.dot(p0),
        p1.dot(p1),
        p2.dot(p2),
        p3.dot(p3),
    ));
    p0 *= norm.x;
    p1 *= norm.y;
    p2 *= norm.z;
    p3 *= norm.w;

    // Mix final noise value
    let mut m = (Vec4::splat(0.6)
        - Vec4::new(x0.dot(x0), x1.dot(x1), x2.dot(x2), x3.dot(x3)))
    .max(Vec4::ZERO);
    m = m * m;
    42.0 * (m * m).dot(Vec4::new(p0.dot(x0), p1.dot(x1), p2.dot(x2), p3.dot(x3)))
}

/// Vector potential sampled from three offset noise evaluations.
fn potential(q: Vec3, ts: f32) -> Vec3 {
    Vec3::new(
        noise3(q + Vec3::new(0.0, 0.0, ts)),
        noise3(q + Vec3::new(31.416, -47.853, ts)),
        noise3(q + Vec3::new(-233.145, 61.998, ts)),
    )
}

/// Curl-style turbulence field: bounded, continuous, divergence-free up to
/// the finite-difference error, and it swirls.
pub fn turbulence(p: Vec3, t: f32, noise_scale: f32, noise_speed: f32) -> Vec3 {
    let q = p * noise_scale;
    let ts = t * noise_speed;
    let e = CURL_EPS;

    let dx = Vec3::new(e, 0.0, 0.0);
    let dy = Vec3::new(0.0, e, 0.0);
    let dz = Vec3::new(0.0, 0.0, e);

    let py0 = potential(q - dy, ts);
    let py1 = potential(q + dy, ts);
    let pz0 = potential(q - dz, ts);
    let pz1 = potential(q + dz, ts);
    let px0 = potential(q - dx, ts);
    let px1 = potential(q + dx, ts);

    let inv = 1.0 / (2.0 * e);
    let curl = Vec3::new(
        (py1.z - py0.z) - (pz1.y - pz0.y),
        (pz1.x - pz0.x) - (px1.z - px0.z),
        (px1.y - px0.y) - (py1.x - py0.x),
    ) * inv;

    curl * CURL_GAIN
}

/// Three-channel gradient noise field ("Perlin Field" in the UI).
pub fn perlin_field(p: Vec3, t: f32, noise_scale: f32, noise_speed: f32) -> Vec3 {
    let q = p * noise_scale;
    let ts = t * noise_speed;
    Vec3::new(
        noise3(q + Vec3::new(0.0, 0.0, ts)),
        noise3(q + Vec3::new(123.456, 789.012, ts)),
        noise3(q + Vec3::new(-654.321, 987.654, ts)),
    )
}

/// Evaluate the displacement field.
///
/// `depth_sample` is the depth-texture luminance at the particle's UV
/// (image mode) or 0 (point-cloud mode, where the base is already the final
/// resting position). Deterministic in `(base, depth_sample, t, params)`.
pub fn displace(base: Vec3, depth_sample: f32, t: f32, params: &KernelParams) -> Vec3 {
    let base_3d = Vec3::new(
        base.x,
        base.y,
        base.z + depth_sample * params.displacement_scale,
    );

    let turb = turbulence(base_3d, t, params.noise_scale, params.noise_speed);
    let field = perlin_field(base_3d, t, params.noise_scale, params.noise_speed);
    let delta = turb.lerp(field, params.noise_blend) * params.noise_amplitude;

    base_3d + delta
}

/// WGSL rendition of the kernel, spliced into every vertex shader.
///
/// Exposes `displace(base, depth_sample, t, amplitude, speed, scale, blend,
/// displacement)` plus `particle_hash` and `particle_time_offset`; the Rust
/// functions above mirror it one for one.
pub const KERNEL_WGSL: &str = r#"
// Stateless per-particle hash, documented in the kernel module.
fn particle_hash(p: vec3<f32>) -> f32 {
    return fract(sin(dot(p, vec3<f32>(127.1, 311.7, 74.7))) * 43758.5453123);
}

fn particle_time_offset(base: vec3<f32>, randomization: f32, randomization_scale: f32) -> f32 {
    return (particle_hash(base) - 0.5) * randomization * randomization_scale * 5.0;
}

fn mod289_3(x: vec3<f32>) -> vec3<f32> {
    return x - floor(x * (1.0 / 289.0)) * 289.0;
}

fn mod289_4(x: vec4<f32>) -> vec4<f32> {
    return x - floor(x * (1.0 / 289.0)) * 289.0;
}

fn permute4(x: vec4<f32>) -> vec4<f32> {
    return mod289_4(((x * 34.0) + 1.0) * x);
}

fn taylor_inv_sqrt4(r: vec4<f32>) -> vec4<f32> {
    return 1.79284291400159 - 0.85373472095314 * r;
}

// 3D simplex noise
fn noise3(v: vec3<f32>) -> f32 {
    let C = vec2<f32>(1.0 / 6.0, 1.0 / 3.0);
    let D = vec4<f32>(0.0, 0.5, 1.0, 2.0);

    // First corner
    var i = floor(v + dot(v, vec3(C.y)));
    let x0 = v - i + dot(i, vec3(C.x));

    // Other corners
    let g = step(x0.yzx, x0.xyz);
    let l = 1.0 - g;
    let i1 = min(g.xyz, l.zxy);
    let i2 = max(g.xyz, l.zxy);

    let x1 = x0 - i1 + C.x;
    let x2 = x0 - i2 + C.y;
    let x3 = x0 - D.yyy;

    // Permutations
    i = mod289_3(i);
    let p = permute4(permute4(permute4(
        i.z + vec4<f32>(0.0, i1.z, i2.z, 1.0))
      + i.y + vec4<f32>(0.0, i1.y, i2.y, 1.0))
      + i.x + vec4<f32>(0.0, i1.x, i2.x, 1.0));

    // Gradients
    let n_ = 0.142857142857;
    let ns = n_ * D.wyz - D.xzx;

    let j = p - 49.0 * floor(p * ns.z * ns.z);

    let x_ = floor(j * ns.z);
    let y_ = floor(j - 7.0 * x_);

    let x = x_ * ns.x + ns.yyyy;
    let y = y_ * ns.x + ns.yyyy;
    let h = 1.0 - abs(x) - abs(y);

    let b0 = vec4<f32>(x.xy, y.xy);
    let b1 = vec4<f32>(x.zw, y.zw);

    let s0 = floor(b0) * 2.0 + 1.0;
    let s1 = floor(b1) * 2.0 + 1.0;
    let sh = -step(h, vec4<f32>(0.0));

    let a0 = b0.xzyw + s0.xzyw * sh.xxyy;
    let a1 = b1.xzyw + s1.xzyw * sh.zzww;

    var p0 = vec3<f32>(a0.xy, h.x);
    var p1 = vec3<f32>(a0.zw, h.y);
    var p2 = vec3<f32>(a1.xy, h.z);
    var p3 = vec3<f32>(a1.zw, h.w);

    // Normalize gradients
    let norm = taylor_inv_sqrt4(vec4<f32>(dot(p0, p0), dot(p1, p1), dot(p2, p2), dot(p3, p3)));
    p0 *= norm.x;
    p1 *= norm.y;
    p2 *= norm.z;
    p3 *= norm.w;

    // Mix final noise value
    var m = max(0.6 - vec4<f32>(dot(x0, x0), dot(x1, x1), dot(x2, x2), dot(x3, x3)), vec4<f32>(0.0));
    m = m * m;
    return 42.0 * dot(m * m, vec4<f32>(dot(p0, x0), dot(p1, x1), dot(p2, x2), dot(p3, x3)));
}

fn field_potential(q: vec3<f32>, ts: f32) -> vec3<f32> {
    return vec3<f32>(
        noise3(q + vec3<f32>(0.0, 0.0, ts)),
        noise3(q + vec3<f32>(31.416, -47.853, ts)),
        noise3(q + vec3<f32>(-233.145, 61.998, ts)),
    );
}

// Curl of the vector potential by central differences.
fn turbulence(p: vec3<f32>, t: f32, noise_scale: f32, noise_speed: f32) -> vec3<f32> {
    let q = p * noise_scale;
    let ts = t * noise_speed;
    let e = 0.1;

    let dx = vec3<f32>(e, 0.0, 0.0);
    let dy = vec3<f32>(0.0, e, 0.0);
    let dz = vec3<f32>(0.0, 0.0, e);

    let py0 = field_potential(q - dy, ts);
    let py1 = field_potential(q + dy, ts);
    let pz0 = field_potential(q - dz, ts);
    let pz1 = field_potential(q + dz, ts);
    let px0 = field_potential(q - dx, ts);
    let px1 = field_potential(q + dx, ts);

    let inv = 1.0 / (2.0 * e);
    let curl = vec3<f32>(
        (py1.z - py0.z) - (pz1.y - pz0.y),
        (pz1.x - pz0.x) - (px1.z - px0.z),
        (px1.y - px0.y) - (py1.x - py0.x),
    ) * inv;

    return curl * 0.35;
}

fn perlin_field(p: vec3<f32>, t: f32, noise_scale: f32, noise_speed: f32) -> vec3<f32> {
    let q = p * noise_scale;
    let ts = t * noise_speed;
    return vec3<f32>(
        noise3(q + vec3<f32>(0.0, 0.0, ts)),
        noise3(q + vec3<f32>(123.456, 789.012, ts)),
        noise3(q + vec3<f32>(-654.321, 987.654, ts)),
    );
}

fn displace(
    base: vec3<f32>,
    depth_sample: f32,
    t: f32,
    amplitude: f32,
    speed: f32,
    scale: f32,
    blend: f32,
    displacement: f32,
) -> vec3<f32> {
    let base_3d = vec3<f32>(base.x, base.y, base.z + depth_sample * displacement);
    let turb = turbulence(base_3d, t, scale, speed);
    let field = perlin_field(base_3d, t, scale, speed);
    let delta = mix(turb, field, blend) * amplitude;
    return base_3d + delta;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    #[test]
    fn hash_matches_documented_formula() {
        let p = Vec3::new(1.25, -3.5, 0.75);
        let expected = {
            let x = (p.x * 127.1 + p.y * 311.7 + p.z * 74.7).sin() * 43758.5453123;
            x - x.floor()
        };
        assert_eq!(hash(p), expected);
        assert!((0.0..1.0).contains(&hash(p)));
    }

    #[test]
    fn displace_is_deterministic() {
        let params = KernelParams::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let base = Vec3::new(
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-5.0..5.0),
            );
            let t = rng.gen_range(0.0..100.0);
            let a = displace(base, 0.0, t, &params);
            let b = displace(base, 0.0, t, &params);
            assert_eq!(a, b, "two evaluations must be bit-identical");
        }
    }

    #[test]
    fn zero_amplitude_is_identity_on_cloud_points() {
        let params = KernelParams {
            noise_amplitude: 0.0,
            ..KernelParams::default()
        };
        let base = Vec3::new(1.0, -2.0, 3.0);
        assert_eq!(displace(base, 0.0, 42.0, &params), base);
    }

    #[test]
    fn depth_lifts_base_along_z() {
        let params = KernelParams {
            noise_amplitude: 0.0,
            displacement_scale: 3.5,
            ..KernelParams::default()
        };
        let base = Vec3::new(0.5, 0.5, 0.0);
        let pos = displace(base, 0.8, 1.0, &params);
        assert_eq!(pos, Vec3::new(0.5, 0.5, 0.8 * 3.5));
    }

    #[test]
    fn noise_is_bounded() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let p = Vec3::new(
                rng.gen_range(-20.0..20.0),
                rng.gen_range(-20.0..20.0),
                rng.gen_range(-20.0..20.0),
            );
            let n = noise3(p);
            assert!(n.abs() <= 1.1, "noise3({p:?}) = {n} out of range");
        }
    }

    #[test]
    fn fields_are_bounded_and_continuous_in_time() {
        let params = KernelParams::default();
        let base = Vec3::new(0.3, -1.2, 2.0);
        let mut prev = displace(base, 0.0, 0.0, &params);
        for i in 1..1000 {
            let t = i as f32 * 0.001;
            let cur = displace(base, 0.0, t, &params);
            assert!((cur - base).length() < 3.0 * params.noise_amplitude + 0.5);
            assert!((cur - prev).length() < 0.05, "field jumped at t={t}");
            prev = cur;
        }
    }

    #[test]
    fn zero_time_randomization_phase_locks_particles() {
        for base in [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(-4.0, 0.5, 2.5),
        ] {
            assert_eq!(time_offset(base, 0.0, 2.0), 0.0);
        }
    }

    #[test]
    fn time_offset_range_scales_as_documented() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let base = Vec3::new(rng.gen(), rng.gen(), rng.gen());
            let off = time_offset(base, 1.0, 1.0);
            assert!(off.abs() <= 2.5, "full randomization spans ±2.5 s");
            let scaled = time_offset(base, 1.0, 3.0);
            assert!((scaled - off * 3.0).abs() < 1e-4);
        }
    }
}
