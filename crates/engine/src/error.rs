use thiserror::Error;

/// Typed failures raised by the ray tracing backend and its resources.
///
/// These travel through the crate as `anyhow::Error`; callers that need to
/// react to a specific failure can `downcast_ref::<RaytracerError>()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RaytracerError {
    #[error("failed to allocate {bytes} bytes for '{label}'")]
    Allocation { label: String, bytes: u64 },

    #[error("buffer {0} is not owned by this allocator")]
    UnknownBuffer(u64),

    #[error("denoiser error: {0}")]
    Denoiser(String),

    #[error("image {0} has not been imported")]
    UnknownImage(u64),

    #[error("unsupported image format '{0}' (expected png, jpg, jpeg or hdr)")]
    UnsupportedImageFormat(String),

    #[error("failed to export image: {0}")]
    Export(String),
}
