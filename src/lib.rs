//! # Nebula - animated point-and-trail visualizer
//!
//! Nebula turns a single photograph or a PLY point cloud into an animated
//! particle nebula. Every particle drifts through a smooth noise field and
//! drags a glowing trail behind it, and the whole thing runs on the GPU
//! from static buffers: a trail is the displacement field evaluated at
//! time-lagged samples, not a history of stored positions.
//!
//! ## Quick Start
//!
//! ```ignore
//! use nebula::prelude::*;
//!
//! fn main() -> Result<(), ViewerError> {
//!     env_logger::init();
//!     Viewer::new()
//!         .with_file("scan.ply")
//!         .run()
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Sources
//!
//! Two kinds of input feed the same render graph:
//! - An image: a regular particle lattice over the image plane, lifted
//!   along z by a monocular depth estimate fetched from a depth service.
//! - A point cloud: parsed from PLY, normalized into a ±5 cube, optionally
//!   color-filtered and deterministically subsampled.
//!
//! ### Stateless trails
//!
//! Trail geometry never changes while animating. Each vertex carries a
//! normalized lag and the vertex shader re-evaluates the displacement
//! kernel at `time - lag * duration`, so trails follow the field exactly
//! and cost zero per-frame CPU work. See [`kernel`] for the field itself.
//!
//! ### Configuration
//!
//! One [`SimulationConfig`] record drives everything. Partial updates go
//! through [`SimulationConfig::apply`], which clamps values and returns the
//! set of changed fields; the viewer coalesces those sets and rebuilds at
//! most once per frame.

pub mod cloud;
pub mod config;
pub mod credentials;
pub mod depth;
mod error;
mod gpu;
pub mod grid;
pub mod kernel;
mod scene;
pub mod shaders;
pub mod time;
pub mod trails;
mod viewer;

pub use cloud::{CloudSource, RenderSet, SubsampleParams};
pub use config::{ChangeSet, ConfigField, ConfigPatch, SimulationConfig, UpAxis};
pub use depth::DepthClient;
pub use error::{DepthError, GpuError, UploadError, ViewerError};
pub use glam::{Vec2, Vec3, Vec4};
pub use grid::GridSource;
pub use kernel::KernelParams;
pub use trails::{TrailGeometry, TrailParticle, TrailStyle};
pub use viewer::Viewer;

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use nebula::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cloud::{CloudSource, SubsampleParams};
    pub use crate::config::{ConfigPatch, SimulationConfig, UpAxis};
    pub use crate::error::{DepthError, UploadError, ViewerError};
    pub use crate::kernel::KernelParams;
    pub use crate::time::Time;
    pub use crate::trails::{TrailGeometry, TrailParticle, TrailStyle};
    pub use crate::viewer::Viewer;
    pub use crate::{Vec2, Vec3, Vec4};
}
