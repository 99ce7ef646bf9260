use crate::prelude::*;

/// Size of one RGBA f32 texel in a frame buffer
pub const TEXEL_BYTES: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DenoiserHandle(pub u64);

/// Memory the denoiser needs for a given frame size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenoiserSizes {
    pub scratch_bytes: u64,
    pub state_bytes: u64,
}

/// Allocation side of the ray tracing backend.
///
/// Every handle returned here must be given back exactly once through the
/// matching `free_buffer` / `destroy_denoiser` call.
pub trait GpuAllocator: Send + Sync {
    fn allocate_buffer(&self, label: &str, bytes: u64) -> Result<BufferHandle>;

    fn free_buffer(&self, handle: BufferHandle) -> Result<()>;

    fn create_denoiser(&self, size: Vector2<u32>) -> Result<(DenoiserHandle, DenoiserSizes)>;

    fn destroy_denoiser(&self, handle: DenoiserHandle) -> Result<()>;
}

#[derive(Debug)]
pub struct DenoiserResources {
    pub denoiser: DenoiserHandle,
    pub scratch: BufferHandle,
    pub state: BufferHandle,
    /// Single float holding the average log luminance of the frame
    pub intensity: BufferHandle,
}

/// Color/normal/albedo frame buffers and the denoiser resources sized to them.
///
/// Owned by exactly one camera. Nothing is freed implicitly: `release` must be
/// called before the value is dropped, otherwise the memory leaks and a
/// warning is logged.
#[derive(Debug)]
pub struct FrameBuffers {
    pub size: Vector2<u32>,
    pub color: BufferHandle,
    pub normal: BufferHandle,
    pub albedo: BufferHandle,
    pub denoiser: DenoiserResources,
    released: bool,
}

impl FrameBuffers {
    pub fn allocate<A: GpuAllocator + ?Sized>(allocator: &A, size: Vector2<u32>) -> Result<Self> {
        let frame_bytes = size.x as u64 * size.y as u64 * TEXEL_BYTES;
        let mut allocated: Vec<BufferHandle> = Vec::with_capacity(6);
        let mut denoiser: Option<DenoiserHandle> = None;

        let result = (|| -> Result<Self> {
            let mut buffer = |label: &str, bytes: u64| -> Result<BufferHandle> {
                let handle = allocator.allocate_buffer(label, bytes)?;
                allocated.push(handle);
                Ok(handle)
            };

            let color = buffer("Frame Buffer Color", frame_bytes)?;
            let normal = buffer("Frame Buffer Normal", frame_bytes)?;
            let albedo = buffer("Frame Buffer Albedo", frame_bytes)?;

            let (handle, sizes) = allocator
                .create_denoiser(size)
                .context("failed to create denoiser")?;
            denoiser = Some(handle);

            let scratch = buffer("Denoiser Scratch", sizes.scratch_bytes)?;
            let state = buffer("Denoiser State", sizes.state_bytes)?;
            let intensity = buffer("Denoiser Intensity", std::mem::size_of::<f32>() as u64)?;

            Ok(Self {
                size,
                color,
                normal,
                albedo,
                denoiser: DenoiserResources {
                    denoiser: handle,
                    scratch,
                    state,
                    intensity,
                },
                released: false,
            })
        })();

        if result.is_err() {
            // Roll back whatever was created before the failure
            for handle in allocated {
                if let Err(e) = allocator.free_buffer(handle) {
                    log::error!("Failed to roll back buffer {:?}: {}", handle, e);
                }
            }
            if let Some(handle) = denoiser {
                if let Err(e) = allocator.destroy_denoiser(handle) {
                    log::error!("Failed to roll back denoiser {:?}: {}", handle, e);
                }
            }
        }

        result
    }

    /// Free everything in a fixed order: color, normal, albedo, denoiser,
    /// scratch, state, intensity. Calling it twice is a no-op.
    ///
    /// A failed step does not stop the ones after it; every handle is handed
    /// back and the first error is returned.
    pub fn release<A: GpuAllocator + ?Sized>(&mut self, allocator: &A) -> Result<()> {
        if self.released {
            return Ok(());
        }

        let steps = [
            allocator.free_buffer(self.color),
            allocator.free_buffer(self.normal),
            allocator.free_buffer(self.albedo),
            allocator
                .destroy_denoiser(self.denoiser.denoiser)
                .context("failed to destroy denoiser"),
            allocator.free_buffer(self.denoiser.scratch),
            allocator.free_buffer(self.denoiser.state),
            allocator.free_buffer(self.denoiser.intensity),
        ];
        self.released = true;

        let mut first_error = None;
        for error in steps.into_iter().filter_map(|step| step.err()) {
            log::error!("Failed to release frame buffer resource: {:#}", error);
            first_error.get_or_insert(error);
        }
        if let Some(error) = first_error {
            return Err(error);
        }

        log::debug!("Released frame buffers {}x{}", self.size.x, self.size.y);
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for FrameBuffers {
    fn drop(&mut self) {
        if !self.released {
            log::warn!(
                "Frame buffers {}x{} dropped without release, GPU memory leaked",
                self.size.x,
                self.size.y
            );
        }
    }
}
