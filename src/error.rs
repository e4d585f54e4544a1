//! Error types for nebula.
//!
//! This module provides error types for upload handling, depth estimation,
//! GPU initialization, and the viewer event loop. Each failure domain keeps
//! its own enum so the viewer can map it to a stable user-facing message
//! without losing the underlying cause.

use std::fmt;

/// Errors raised while ingesting a dropped or opened file.
#[derive(Debug)]
pub enum UploadError {
    /// The file is neither a decodable image nor a parseable polygon file.
    InvalidUpload,
    /// The polygon file was recognized but could not be parsed.
    PolygonParseFailed(String),
    /// Failed to read the file from disk.
    Io(std::io::Error),
}

impl UploadError {
    /// Stable message shown to the user for rejected uploads.
    pub fn user_message(&self) -> String {
        match self {
            UploadError::InvalidUpload => {
                "please upload a valid image or polygon file".to_string()
            }
            UploadError::PolygonParseFailed(_) | UploadError::Io(_) => self.to_string(),
        }
    }
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::InvalidUpload => {
                write!(f, "please upload a valid image or polygon file")
            }
            UploadError::PolygonParseFailed(msg) => {
                write!(f, "Failed to parse polygon file: {}", msg)
            }
            UploadError::Io(e) => write!(f, "Failed to read uploaded file: {}", e),
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UploadError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(e: std::io::Error) -> Self {
        UploadError::Io(e)
    }
}

impl From<image::ImageError> for UploadError {
    fn from(_: image::ImageError) -> Self {
        UploadError::InvalidUpload
    }
}

/// Errors raised by the depth estimation client.
#[derive(Debug)]
pub enum DepthError {
    /// The depth service request failed or returned an unusable payload.
    EstimationFailed(String),
}

impl DepthError {
    /// Stable message shown to the user when depth estimation fails.
    pub fn user_message(&self) -> String {
        "depth estimation failed".to_string()
    }
}

impl fmt::Display for DepthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepthError::EstimationFailed(msg) => {
                write!(f, "Depth estimation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for DepthError {}

/// Errors that can occur during GPU initialization and resource creation.
#[derive(Debug)]
pub enum GpuError {
    /// Failed to create a surface for rendering.
    SurfaceCreation(wgpu::CreateSurfaceError),
    /// No compatible GPU adapter found.
    NoAdapter,
    /// Failed to create GPU device.
    DeviceCreation(wgpu::RequestDeviceError),
    /// A buffer or texture allocation failed after device creation.
    ResourceFailed(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::SurfaceCreation(e) => write!(f, "Failed to create GPU surface: {}", e),
            GpuError::NoAdapter => write!(f, "No compatible GPU adapter found. Ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support."),
            GpuError::DeviceCreation(e) => write!(f, "Failed to create GPU device: {}", e),
            GpuError::ResourceFailed(msg) => write!(f, "Failed to allocate GPU resource: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::SurfaceCreation(e) => Some(e),
            GpuError::DeviceCreation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::CreateSurfaceError> for GpuError {
    fn from(e: wgpu::CreateSurfaceError) -> Self {
        GpuError::SurfaceCreation(e)
    }
}

impl From<wgpu::RequestDeviceError> for GpuError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        GpuError::DeviceCreation(e)
    }
}

/// Errors that can occur when running the viewer.
#[derive(Debug)]
pub enum ViewerError {
    /// Failed to create event loop.
    EventLoop(winit::error::EventLoopError),
    /// Failed to create window.
    Window(winit::error::OsError),
    /// GPU initialization failed.
    Gpu(GpuError),
}

impl fmt::Display for ViewerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewerError::EventLoop(e) => write!(f, "Failed to create event loop: {}", e),
            ViewerError::Window(e) => write!(f, "Failed to create window: {}", e),
            ViewerError::Gpu(e) => write!(f, "GPU error: {}", e),
        }
    }
}

impl std::error::Error for ViewerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ViewerError::EventLoop(e) => Some(e),
            ViewerError::Window(e) => Some(e),
            ViewerError::Gpu(e) => Some(e),
        }
    }
}

impl From<winit::error::EventLoopError> for ViewerError {
    fn from(e: winit::error::EventLoopError) -> Self {
        ViewerError::EventLoop(e)
    }
}

impl From<winit::error::OsError> for ViewerError {
    fn from(e: winit::error::OsError) -> Self {
        ViewerError::Window(e)
    }
}

impl From<GpuError> for ViewerError {
    fn from(e: GpuError) -> Self {
        ViewerError::Gpu(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_upload_message_is_stable() {
        assert_eq!(
            UploadError::InvalidUpload.user_message(),
            "please upload a valid image or polygon file"
        );
    }

    #[test]
    fn depth_failure_message_is_stable() {
        let err = DepthError::EstimationFailed("503 from service".into());
        assert_eq!(err.user_message(), "depth estimation failed");
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn io_error_preserves_source() {
        use std::error::Error;
        let err = UploadError::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        assert!(err.source().is_some());
    }
}
