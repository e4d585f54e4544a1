//! WGSL program composition.
//!
//! Every pipeline shares one uniform block and the displacement kernel from
//! [`crate::kernel`]; the six programs (head, line trail, ribbon trail, each
//! in image and point-cloud flavor) differ only in how they source color and
//! depth and in how they expand a vertex. Shaders are assembled with
//! `format!` at pipeline build time and validated by the naga tests below.

use crate::kernel::KERNEL_WGSL;

/// Which data source feeds the shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderMode {
    /// Color and depth come from the two textures bound at group(1),
    /// sampled in the vertex stage at the particle's UV.
    Image,
    /// Color comes from the vertex buffer, depth is zero.
    Cloud,
}

/// Uniform block shared by all pipelines, bound at group(0) binding(0).
/// Layout mirrors `SceneUniforms` in the scene module.
const UNIFORMS_WGSL: &str = "
struct Uniforms {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    time: f32,
    point_size: f32,
    trail_thickness: f32,
    trail_length: f32,
    noise_amplitude: f32,
    noise_speed: f32,
    noise_scale: f32,
    noise_blend: f32,
    displacement_scale: f32,
    time_randomization: f32,
    time_randomization_scale: f32,
    use_vertex_colors: f32,
    particle_color: vec3<f32>,
    _pad0: f32,
    viewport: vec2<f32>,
    _pad1: vec2<f32>,
}

@group(0) @binding(0) var<uniform> u: Uniforms;
";

const IMAGE_BINDINGS_WGSL: &str = "
@group(1) @binding(0) var color_texture: texture_2d<f32>;
@group(1) @binding(1) var color_sampler: sampler;
@group(1) @binding(2) var depth_texture: texture_2d<f32>;
@group(1) @binding(3) var depth_sampler: sampler;

fn sample_color(uv: vec2<f32>, vertex_color: vec3<f32>) -> vec3<f32> {
    return textureSampleLevel(color_texture, color_sampler, uv, 0.0).rgb;
}

fn sample_depth(uv: vec2<f32>) -> f32 {
    let texel = textureSampleLevel(depth_texture, depth_sampler, uv, 0.0).rgb;
    return dot(texel, vec3<f32>(0.299, 0.587, 0.114));
}
";

const CLOUD_BINDINGS_WGSL: &str = "
fn sample_color(uv: vec2<f32>, vertex_color: vec3<f32>) -> vec3<f32> {
    return mix(u.particle_color, vertex_color, u.use_vertex_colors);
}

fn sample_depth(uv: vec2<f32>) -> f32 {
    return 0.0;
}
";

/// Helpers shared by the trail shaders. The effective trail duration is
/// clamped against near-zero noise speed so trails never collapse when the
/// field barely moves.
const TRAIL_COMMON_WGSL: &str = "
fn effective_duration() -> f32 {
    return u.trail_length / max(u.noise_speed, 0.1);
}

fn lagged_time(base: vec3<f32>, segment: f32) -> f32 {
    let offset = particle_time_offset(base, u.time_randomization, u.time_randomization_scale);
    return u.time + offset - segment * effective_duration();
}

fn trail_position(base: vec3<f32>, depth: f32, t: f32) -> vec3<f32> {
    return displace(
        base, depth, t,
        u.noise_amplitude, u.noise_speed, u.noise_scale, u.noise_blend,
        u.displacement_scale,
    );
}
";

fn mode_bindings(mode: ShaderMode) -> &'static str {
    match mode {
        ShaderMode::Image => IMAGE_BINDINGS_WGSL,
        ShaderMode::Cloud => CLOUD_BINDINGS_WGSL,
    }
}

/// Head program: one instanced screen-facing quad per particle, sized by
/// perspective distance and clipped to a disc in the fragment stage.
pub fn head_shader(mode: ShaderMode) -> String {
    format!(
        "{uniforms}\n{bindings}\n{kernel}\n{trail_common}
struct HeadInput {{
    @location(0) base: vec3<f32>,
    @location(1) color: vec3<f32>,
    @location(2) uv: vec2<f32>,
}}

struct HeadOutput {{
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec3<f32>,
    @location(1) corner: vec2<f32>,
}}

@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    input: HeadInput,
) -> HeadOutput {{
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0), vec2<f32>(1.0, -1.0), vec2<f32>(-1.0, 1.0),
        vec2<f32>(-1.0, 1.0), vec2<f32>(1.0, -1.0), vec2<f32>(1.0, 1.0),
    );
    let corner = corners[vertex_index];

    let depth = sample_depth(input.uv);
    let t = lagged_time(input.base, 0.0);
    let world = trail_position(input.base, depth, t);

    let view_pos = u.view * vec4<f32>(world, 1.0);
    var clip = u.proj * view_pos;

    // Size in pixels falls off with view depth, then converts to NDC.
    let size_px = u.point_size * 100.0 / max(-view_pos.z, 0.1);
    clip = vec4<f32>(
        clip.xy + corner * (size_px / u.viewport) * clip.w,
        clip.zw,
    );

    var out: HeadOutput;
    out.clip_position = clip;
    out.color = sample_color(input.uv, input.color);
    out.corner = corner;
    return out;
}}

@fragment
fn fs_main(input: HeadOutput) -> @location(0) vec4<f32> {{
    let r = length(input.corner);
    if (r > 1.0) {{
        discard;
    }}
    let alpha = 1.0 - smoothstep(0.7, 1.0, r);
    return vec4<f32>(input.color, alpha);
}}
",
        uniforms = UNIFORMS_WGSL,
        bindings = mode_bindings(mode),
        kernel = KERNEL_WGSL,
        trail_common = TRAIL_COMMON_WGSL,
    )
}

/// Line-trail program: each vertex re-evaluates the kernel at its lagged
/// time, so the whole polyline animates without any per-frame upload.
pub fn line_trail_shader(mode: ShaderMode) -> String {
    format!(
        "{uniforms}\n{bindings}\n{kernel}\n{trail_common}
struct TrailInput {{
    @location(0) base: vec3<f32>,
    @location(1) color: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) segment: f32,
    @location(4) side: f32,
}}

struct TrailOutput {{
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec3<f32>,
    @location(1) fade: f32,
}}

@vertex
fn vs_main(input: TrailInput) -> TrailOutput {{
    let depth = sample_depth(input.uv);
    let t = lagged_time(input.base, input.segment);
    let world = trail_position(input.base, depth, t);

    var out: TrailOutput;
    out.clip_position = u.proj * u.view * vec4<f32>(world, 1.0);
    out.color = sample_color(input.uv, input.color);
    out.fade = 1.0 - input.segment;
    return out;
}}

@fragment
fn fs_main(input: TrailOutput) -> @location(0) vec4<f32> {{
    return vec4<f32>(input.color, input.fade);
}}
",
        uniforms = UNIFORMS_WGSL,
        bindings = mode_bindings(mode),
        kernel = KERNEL_WGSL,
        trail_common = TRAIL_COMMON_WGSL,
    )
}

/// Ribbon-trail program: pairs of vertices expand around the polyline in
/// view space, perpendicular to both the view direction and the local
/// tangent, so the ribbon always faces the camera.
pub fn ribbon_trail_shader(mode: ShaderMode) -> String {
    format!(
        "{uniforms}\n{bindings}\n{kernel}\n{trail_common}
struct TrailInput {{
    @location(0) base: vec3<f32>,
    @location(1) color: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) segment: f32,
    @location(4) side: f32,
}}

struct TrailOutput {{
    @builtin(position) clip_position: vec4<f32>,
    @location(0) color: vec3<f32>,
    @location(1) fade: f32,
}}

@vertex
fn vs_main(input: TrailInput) -> TrailOutput {{
    let depth = sample_depth(input.uv);
    let t = lagged_time(input.base, input.segment);
    let world = trail_position(input.base, depth, t);

    // Tangent from a small step forward along the curve, in view space.
    let dt = 0.05 * effective_duration();
    let world_ahead = trail_position(input.base, depth, t + dt);

    let view_pos = (u.view * vec4<f32>(world, 1.0)).xyz;
    let view_ahead = (u.view * vec4<f32>(world_ahead, 1.0)).xyz;

    var tangent = view_ahead - view_pos;
    if (length(tangent) < 1e-6) {{
        // Degenerate curve: world up, carried into view space.
        tangent = (u.view * vec4<f32>(0.0, 1.0, 0.0, 0.0)).xyz;
    }}
    tangent = normalize(tangent);

    let view_dir = normalize(view_pos);
    var side_vec = cross(view_dir, tangent);
    if (length(side_vec) < 1e-6) {{
        side_vec = vec3<f32>(1.0, 0.0, 0.0);
    }}
    side_vec = normalize(side_vec);

    let expanded = view_pos + side_vec * input.side * (0.05 * u.trail_thickness);

    var out: TrailOutput;
    out.clip_position = u.proj * vec4<f32>(expanded, 1.0);
    out.color = sample_color(input.uv, input.color);
    out.fade = 1.0 - input.segment;
    return out;
}}

@fragment
fn fs_main(input: TrailOutput) -> @location(0) vec4<f32> {{
    return vec4<f32>(input.color, input.fade);
}}
",
        uniforms = UNIFORMS_WGSL,
        bindings = mode_bindings(mode),
        kernel = KERNEL_WGSL,
        trail_common = TRAIL_COMMON_WGSL,
    )
}
