//! The interactive viewer: window, event loop, and ingestion plumbing.
//!
//! The event loop is single-threaded; file reads and depth estimation run
//! on background threads and report back over a channel. Every upload bumps
//! an epoch counter and every worker message carries the epoch it belongs
//! to, so a slow depth response for an old image can never clobber a newer
//! scene (latest wins, always).
//!
//! Configuration changes are coalesced: patches applied between frames
//! accumulate into one [`ChangeSet`], and geometry rebuilds run at most
//! once per frame no matter how fast a control is ridden.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use winit::application::ApplicationHandler;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::cloud::{CloudSource, SubsampleParams};
use crate::config::{ChangeSet, ConfigPatch, SimulationConfig};
use crate::credentials;
use crate::depth::{DepthClient, DEFAULT_ENDPOINT};
use crate::error::{UploadError, ViewerError};
use crate::gpu::GpuState;
use crate::grid::GridSource;
use crate::scene::{Scene, SceneSource};
use crate::time::Time;
use crate::trails::TrailParticle;

/// Messages from ingestion workers. Each carries the upload epoch it
/// answers; the viewer drops anything that is not the current epoch.
enum WorkerMessage {
    CloudReady {
        epoch: u64,
        cloud: Box<CloudSource>,
    },
    /// The color image decoded; retained while depth estimation runs,
    /// nothing renders until the depth map arrives.
    ImageReady {
        epoch: u64,
        color: Box<image::RgbaImage>,
    },
    DepthReady {
        epoch: u64,
        depth: Box<image::RgbaImage>,
    },
    Failed {
        epoch: u64,
        message: String,
    },
}

/// Builder for the viewer window.
pub struct Viewer {
    config: SimulationConfig,
    initial_file: Option<PathBuf>,
    depth_endpoint: String,
}

impl Viewer {
    pub fn new() -> Self {
        Self {
            config: SimulationConfig::default(),
            initial_file: None,
            depth_endpoint: std::env::var("NEBULA_DEPTH_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
        }
    }

    pub fn with_config(mut self, config: SimulationConfig) -> Self {
        self.config = config;
        self
    }

    /// Load this file on startup as if it had been dropped on the window.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.initial_file = Some(path.into());
        self
    }

    /// Run the viewer. Blocks until the window closes.
    pub fn run(self) -> Result<(), ViewerError> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);

        let mut app = App::new(self.config, self.initial_file, self.depth_endpoint);
        event_loop.run_app(&mut app)?;
        Ok(())
    }
}

impl Default for Viewer {
    fn default() -> Self {
        Self::new()
    }
}

/// What currently feeds the scene, kept so geometry can be rebuilt when
/// the configuration changes. An image without its depth map yet renders
/// nothing; the color image is retained so a later depth result (or none)
/// never has to re-read the file.
enum Source {
    Image {
        color: image::RgbaImage,
        depth: Option<image::RgbaImage>,
    },
    Cloud(CloudSource),
}

struct App {
    window: Option<Arc<Window>>,
    gpu: Option<GpuState>,
    scene: Option<Scene>,
    source: Option<Source>,

    config: SimulationConfig,
    pending: ChangeSet,
    time: Time,

    epoch: u64,
    sender: Sender<WorkerMessage>,
    receiver: Receiver<WorkerMessage>,
    depth_endpoint: String,
    initial_file: Option<PathBuf>,

    /// Last user-facing failure, surfaced in the window title.
    error: Option<String>,

    mouse_pressed: bool,
    last_mouse_pos: Option<(f64, f64)>,
}

impl App {
    fn new(config: SimulationConfig, initial_file: Option<PathBuf>, depth_endpoint: String) -> Self {
        let (sender, receiver) = channel();
        Self {
            window: None,
            gpu: None,
            scene: None,
            source: None,
            config,
            pending: ChangeSet::EMPTY,
            time: Time::new(),
            epoch: 0,
            sender,
            receiver,
            depth_endpoint,
            initial_file,
            error: None,
            mouse_pressed: false,
            last_mouse_pos: None,
        }
    }

    /// Apply a patch now and remember the changed fields for the next frame.
    fn queue_patch(&mut self, patch: ConfigPatch) {
        let changes = self.config.apply(&patch);
        self.pending = self.pending.union(changes);
    }

    /// Spawn the ingestion worker for a dropped or opened file.
    fn start_ingest(&mut self, path: PathBuf) {
        self.epoch += 1;
        self.error = None;
        let epoch = self.epoch;
        let sender = self.sender.clone();
        let endpoint = self.depth_endpoint.clone();
        log::info!("loading {} (epoch {epoch})", path.display());

        thread::spawn(move || {
            if let Err(err) = ingest(&path, epoch, &sender, &endpoint) {
                let _ = sender.send(WorkerMessage::Failed {
                    epoch,
                    message: err.user_message(),
                });
            }
        });
    }

    /// Drain worker messages, dropping anything from a superseded epoch.
    fn drain_workers(&mut self) {
        while let Ok(message) = self.receiver.try_recv() {
            let epoch = match &message {
                WorkerMessage::CloudReady { epoch, .. }
                | WorkerMessage::ImageReady { epoch, .. }
                | WorkerMessage::DepthReady { epoch, .. }
                | WorkerMessage::Failed { epoch, .. } => *epoch,
            };
            if epoch != self.epoch {
                log::debug!("dropping stale worker message (epoch {epoch})");
                continue;
            }

            match message {
                WorkerMessage::CloudReady { cloud, .. } => {
                    log::info!("point cloud ready: {} points", cloud.point_count());
                    self.source = Some(Source::Cloud(*cloud));
                    // New clouds request an up-axis detection pass.
                    self.queue_patch(ConfigPatch::auto_detect_axis());
                    self.rebuild_scene();
                }
                WorkerMessage::ImageReady { color, .. } => {
                    log::info!(
                        "image ready: {}x{}, awaiting depth",
                        color.width(),
                        color.height()
                    );
                    // The previous source is superseded; nothing renders
                    // until the depth map arrives.
                    self.source = Some(Source::Image {
                        color: *color,
                        depth: None,
                    });
                    self.scene = None;
                }
                WorkerMessage::DepthReady { depth, .. } => {
                    if let Some(Source::Image { depth: slot, .. }) = &mut self.source {
                        log::info!("depth map ready");
                        *slot = Some(*depth);
                        self.rebuild_scene();
                    }
                }
                WorkerMessage::Failed { message, .. } => {
                    log::error!("{message}");
                    self.error = Some(message);
                    self.update_title();
                }
            }
        }
    }

    fn current_particles(&self) -> Option<Vec<TrailParticle>> {
        match self.source.as_ref()? {
            Source::Image { .. } => {
                Some(GridSource::new(self.config.particle_count).particles())
            }
            Source::Cloud(cloud) => {
                let set = cloud.subsample(&SubsampleParams {
                    target_count: self.config.particle_count,
                    enable_color_filter: self.config.enable_color_filter,
                    filter_color: self.config.filter_color,
                });
                Some(set.particles())
            }
        }
    }

    /// Build a fresh scene for the current source.
    fn rebuild_scene(&mut self) {
        let Some(gpu) = self.gpu.as_ref() else { return };
        let Some(source) = self.source.as_ref() else { return };
        let Some(particles) = self.current_particles() else { return };

        let scene_source = match source {
            Source::Image { depth: None, .. } => return,
            Source::Image {
                color,
                depth: Some(depth),
            } => SceneSource::Image {
                color: color.clone(),
                depth: depth.clone(),
            },
            Source::Cloud(cloud) => SceneSource::Cloud {
                has_colors: cloud.has_colors(),
            },
        };

        match Scene::new(gpu, &scene_source, &particles, &self.config) {
            Ok(scene) => {
                if scene.head_only() {
                    self.error = Some("trail buffers unavailable, heads only".into());
                }
                self.scene = Some(scene);
                self.update_title();
            }
            Err(err) => {
                log::error!("scene construction failed: {err}");
                self.error = Some(err.to_string());
                self.update_title();
            }
        }
    }

    /// React to the configuration fields that changed since last frame.
    /// Runs once per frame, so a burst of slider motion costs one rebuild.
    fn process_pending(&mut self) {
        if self.config.take_auto_detect() {
            if let Some(Source::Cloud(cloud)) = &self.source {
                let axis = cloud.detect_up_axis();
                log::info!("auto-detected up axis: {axis:?}");
                self.config.up_axis = axis;
            }
        }
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.camera.up_axis = self.config.up_axis;
        }

        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);

        let needs_resample = matches!(self.source, Some(Source::Cloud(_)))
            && pending.intersects(ChangeSet::FIELDS_SUBSAMPLE);
        let needs_geometry = pending.intersects(ChangeSet::FIELDS_TRAIL_GEOMETRY);

        if needs_resample || needs_geometry {
            if let (Some(particles), Some(gpu), Some(scene)) = (
                self.current_particles(),
                self.gpu.as_ref(),
                self.scene.as_mut(),
            ) {
                if let Err(err) = scene.rebuild_geometry(gpu, &particles, &self.config) {
                    log::error!("geometry rebuild failed: {err}");
                    self.error = Some(err.to_string());
                }
            }
        }
    }

    fn update_title(&self) {
        if let Some(window) = &self.window {
            let title = match &self.error {
                Some(error) => format!("nebula - {error}"),
                None => "nebula".to_string(),
            };
            window.set_title(&title);
        }
    }

    fn handle_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Space => self.time.toggle_pause(),
            KeyCode::KeyT => {
                let ribbon = !self.config.use_real_trail_thickness;
                self.queue_patch(ConfigPatch {
                    use_real_trail_thickness: Some(ribbon),
                    ..ConfigPatch::default()
                });
            }
            KeyCode::KeyP => {
                // Cycle head size through a few useful stops.
                let next = match self.config.point_size {
                    s if s == 0.0 => 0.5,
                    s if s < 1.5 => 1.5,
                    _ => 0.0,
                };
                self.queue_patch(ConfigPatch {
                    point_size: Some(next),
                    ..ConfigPatch::default()
                });
            }
            KeyCode::BracketLeft => {
                let count = self.config.particle_count.saturating_sub(10_000);
                self.queue_patch(ConfigPatch::particle_count(count));
            }
            KeyCode::BracketRight => {
                let count = self.config.particle_count.saturating_add(10_000);
                self.queue_patch(ConfigPatch::particle_count(count));
            }
            KeyCode::KeyA => self.queue_patch(ConfigPatch::auto_detect_axis()),
            KeyCode::KeyF => {
                let enabled = !self.config.enable_color_filter;
                self.queue_patch(ConfigPatch {
                    enable_color_filter: Some(enabled),
                    ..ConfigPatch::default()
                });
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let window_attrs = Window::default_attributes()
                .with_title("nebula")
                .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));

            let window = match event_loop.create_window(window_attrs) {
                Ok(window) => Arc::new(window),
                Err(err) => {
                    log::error!("window creation failed: {err}");
                    event_loop.exit();
                    return;
                }
            };
            self.window = Some(window.clone());

            match pollster::block_on(GpuState::new(window)) {
                Ok(mut gpu) => {
                    gpu.camera.up_axis = self.config.up_axis;
                    self.gpu = Some(gpu);
                }
                Err(err) => {
                    log::error!("{err}");
                    event_loop.exit();
                    return;
                }
            }

            if let Some(path) = self.initial_file.take() {
                self.start_ingest(path);
            } else {
                log::info!("drop an image or .ply file onto the window to begin");
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(physical_size) => {
                if let Some(gpu) = &mut self.gpu {
                    gpu.resize(physical_size);
                }
            }
            WindowEvent::DroppedFile(path) => {
                self.start_ingest(path);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed {
                    if let PhysicalKey::Code(code) = event.physical_key {
                        self.handle_key(code);
                    }
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if button == MouseButton::Left {
                    self.mouse_pressed = state == ElementState::Pressed;
                    if !self.mouse_pressed {
                        self.last_mouse_pos = None;
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if self.mouse_pressed {
                    if let Some((last_x, last_y)) = self.last_mouse_pos {
                        let dx = position.x - last_x;
                        let dy = position.y - last_y;

                        if let Some(gpu) = &mut self.gpu {
                            gpu.camera.yaw -= dx as f32 * 0.005;
                            gpu.camera.pitch += dy as f32 * 0.005;
                            gpu.camera.pitch = gpu.camera.pitch.clamp(-1.5, 1.5);
                        }
                    }
                    self.last_mouse_pos = Some((position.x, position.y));
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let scroll = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 * 0.1,
                };
                if let Some(gpu) = &mut self.gpu {
                    gpu.camera.distance -= scroll * 0.5;
                    gpu.camera.distance = gpu.camera.distance.clamp(1.0, 50.0);
                }
            }
            WindowEvent::RedrawRequested => {
                self.drain_workers();
                self.process_pending();

                let (elapsed, _) = self.time.update();
                if let (Some(gpu), Some(scene)) = (&mut self.gpu, &self.scene) {
                    match scene.render(gpu, &self.config, elapsed) {
                        Ok(_) => {}
                        Err(wgpu::SurfaceError::Lost) => {
                            let size = winit::dpi::PhysicalSize {
                                width: gpu.config.width,
                                height: gpu.config.height,
                            };
                            gpu.resize(size);
                        }
                        Err(wgpu::SurfaceError::OutOfMemory) => event_loop.exit(),
                        Err(e) => log::warn!("render error: {e:?}"),
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

/// Worker-side ingestion: classify, parse, and for images chase depth.
fn ingest(
    path: &Path,
    epoch: u64,
    sender: &Sender<WorkerMessage>,
    endpoint: &str,
) -> Result<(), UploadError> {
    let bytes = std::fs::read(path)?;

    let is_ply = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ply"));

    if is_ply {
        let cloud = CloudSource::from_ply_bytes(&bytes)?;
        let _ = sender.send(WorkerMessage::CloudReady {
            epoch,
            cloud: Box::new(cloud),
        });
        return Ok(());
    }

    let color = image::load_from_memory(&bytes)
        .map_err(|_| UploadError::InvalidUpload)?
        .to_rgba8();
    let _ = sender.send(WorkerMessage::ImageReady {
        epoch,
        color: Box::new(color),
    });

    // Depth failure is not an upload failure: the flat-depth scene stays up.
    let client = DepthClient::new(endpoint, credentials::load_token());
    match client.estimate(&bytes) {
        Ok(depth_bytes) => match image::load_from_memory(&depth_bytes) {
            Ok(depth) => {
                let _ = sender.send(WorkerMessage::DepthReady {
                    epoch,
                    depth: Box::new(depth.to_rgba8()),
                });
            }
            Err(err) => {
                log::warn!("depth service returned an undecodable image: {err}");
                let _ = sender.send(WorkerMessage::Failed {
                    epoch,
                    message: "depth estimation failed".into(),
                });
            }
        },
        Err(err) => {
            log::warn!("{err}");
            let _ = sender.send(WorkerMessage::Failed {
                epoch,
                message: err.user_message(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_app() -> App {
        App::new(
            SimulationConfig::default(),
            None,
            "http://127.0.0.1:1/never".to_string(),
        )
    }

    fn cloud_message(epoch: u64) -> WorkerMessage {
        let cloud = CloudSource::from_arrays(vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0], None).unwrap();
        WorkerMessage::CloudReady {
            epoch,
            cloud: Box::new(cloud),
        }
    }

    #[test]
    fn stale_worker_messages_are_dropped() {
        let mut app = test_app();
        app.epoch = 2;

        app.sender.send(cloud_message(1)).unwrap();
        app.drain_workers();
        assert!(app.source.is_none(), "superseded epoch must not land");
        assert!(app.error.is_none());
    }

    #[test]
    fn current_epoch_messages_land() {
        let mut app = test_app();
        app.epoch = 2;

        app.sender.send(cloud_message(2)).unwrap();
        app.drain_workers();
        assert!(matches!(app.source, Some(Source::Cloud(_))));
        // A fresh cloud schedules an up-axis detection pass.
        assert!(app.config.auto_detect_axis);
    }

    #[test]
    fn stale_failure_does_not_clobber_the_error_channel() {
        let mut app = test_app();
        app.epoch = 3;

        app.sender
            .send(WorkerMessage::Failed {
                epoch: 2,
                message: "old upload failed".into(),
            })
            .unwrap();
        app.drain_workers();
        assert!(app.error.is_none());
    }

    #[test]
    fn ingest_rejects_unknown_bytes() {
        let dir = std::env::temp_dir();
        let path = dir.join("nebula_ingest_garbage_test.bin");
        std::fs::write(&path, b"definitely not an image").unwrap();

        let (sender, receiver) = channel();
        let result = ingest(&path, 1, &sender, "http://127.0.0.1:1/never");
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(UploadError::InvalidUpload)));
        assert!(receiver.try_recv().is_err(), "no message for a rejected file");
    }

    #[test]
    fn ingest_parses_ply_without_touching_the_network() {
        let dir = std::env::temp_dir();
        let path = dir.join("nebula_ingest_ply_test.ply");
        std::fs::write(
            &path,
            b"ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nproperty float z\nend_header\n1.0 2.0 3.0\n",
        )
        .unwrap();

        let (sender, receiver) = channel();
        ingest(&path, 7, &sender, "http://127.0.0.1:1/never").unwrap();
        std::fs::remove_file(&path).ok();

        match receiver.try_recv().unwrap() {
            WorkerMessage::CloudReady { epoch, cloud } => {
                assert_eq!(epoch, 7);
                assert_eq!(cloud.point_count(), 1);
            }
            _ => panic!("expected a cloud message"),
        }
    }
}
