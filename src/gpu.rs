//! GPU device, surface, and camera state.
//!
//! Pipeline and buffer construction lives in [`crate::scene`]; this module
//! owns everything tied to the window surface so a resize or a source swap
//! never has to touch the device.

use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};
use winit::window::Window;

use crate::config::UpAxis;
use crate::error::GpuError;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Orbit camera around a target point.
///
/// Yaw and pitch describe the orbit in a Y-up frame; the configured up axis
/// rotates the whole orbit so point clouds scanned with a different vertical
/// still spin the way the user expects.
pub struct Camera {
    pub yaw: f32,
    pub pitch: f32,
    pub distance: f32,
    pub target: Vec3,
    pub up_axis: UpAxis,
}

impl Camera {
    pub fn new() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.3,
            distance: 12.0,
            target: Vec3::ZERO,
            up_axis: UpAxis::Y,
        }
    }

    fn orbit_rotation(&self) -> Quat {
        Quat::from_rotation_arc(Vec3::Y, self.up_axis.unit())
    }

    pub fn position(&self) -> Vec3 {
        let x = self.distance * self.pitch.cos() * self.yaw.sin();
        let y = self.distance * self.pitch.sin();
        let z = self.distance * self.pitch.cos() * self.yaw.cos();
        self.target + self.orbit_rotation() * Vec3::new(x, y, z)
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, self.up_axis.unit())
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

/// Device, queue, surface, and the window-sized depth buffer.
pub struct GpuState {
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub depth_texture: wgpu::TextureView,
    pub camera: Camera,
}

impl GpuState {
    pub async fn new(window: Arc<Window>) -> Result<Self, GpuError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance.create_surface(window)?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let depth_texture = create_depth_texture(&device, &config);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            depth_texture,
            camera: Camera::new(),
        })
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
            self.depth_texture = create_depth_texture(&self.device, &self.config);
        }
    }

    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height as f32
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(45.0_f32.to_radians(), self.aspect(), 0.1, 100.0)
    }
}

fn create_depth_texture(
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size: wgpu::Extent3d {
            width: config.width,
            height: config.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_orbits_at_its_distance() {
        let camera = Camera::new();
        let offset = camera.position() - camera.target;
        assert!((offset.length() - camera.distance).abs() < 1e-4);
    }

    #[test]
    fn up_axis_rotates_the_orbit() {
        let mut camera = Camera::new();
        camera.pitch = 0.0;
        camera.yaw = 0.0;

        camera.up_axis = UpAxis::Y;
        let y_pos = camera.position();
        assert!((y_pos - Vec3::new(0.0, 0.0, camera.distance)).length() < 1e-4);

        // With Z up, the orbit plane tips so the +Y offset maps onto +Z.
        camera.pitch = std::f32::consts::FRAC_PI_2;
        camera.up_axis = UpAxis::Z;
        let z_pos = camera.position();
        assert!((z_pos - Vec3::new(0.0, 0.0, camera.distance)).length() < 1e-3);
    }
}
