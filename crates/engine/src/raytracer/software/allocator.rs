use crate::prelude::*;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

struct HostBuffer {
    label: String,
    bytes: u64,
    texels: Vec<Vector4<f32>>,
}

#[derive(Default)]
struct Allocations {
    buffers: HashMap<u64, HostBuffer>,
    denoisers: HashMap<u64, Vector2<u32>>,
    used_bytes: u64,
    allocation_count: u64,
    release_log: Vec<String>,
}

/// Host-memory implementation of `GpuAllocator`.
///
/// Buffers are plain RGBA f32 texel arrays. An optional byte budget makes
/// allocations fail the same way an exhausted device would.
pub struct HostAllocator {
    next_id: AtomicU64,
    budget: Option<u64>,
    state: Mutex<Allocations>,
}

impl HostAllocator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            budget: None,
            state: Mutex::new(Allocations::default()),
        }
    }

    pub fn with_budget(bytes: u64) -> Self {
        Self {
            budget: Some(bytes),
            ..Self::new()
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, Allocations> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state().buffers.len()
    }

    pub fn live_denoiser_count(&self) -> usize {
        self.state().denoisers.len()
    }

    /// Total number of buffer allocations ever made
    pub fn allocation_count(&self) -> u64 {
        self.state().allocation_count
    }

    pub fn buffer_bytes(&self, handle: BufferHandle) -> Option<u64> {
        self.state().buffers.get(&handle.0).map(|buffer| buffer.bytes)
    }

    /// Labels of released resources, in release order, since the last call
    pub fn take_release_log(&self) -> Vec<String> {
        std::mem::take(&mut self.state().release_log)
    }

    pub fn read_buffer(&self, handle: BufferHandle) -> Result<Vec<Vector4<f32>>> {
        self.state()
            .buffers
            .get(&handle.0)
            .map(|buffer| buffer.texels.clone())
            .ok_or_else(|| RaytracerError::UnknownBuffer(handle.0).into())
    }

    pub fn with_buffer_mut<R>(
        &self,
        handle: BufferHandle,
        f: impl FnOnce(&mut [Vector4<f32>]) -> R,
    ) -> Result<R> {
        let mut state = self.state();
        let buffer = state
            .buffers
            .get_mut(&handle.0)
            .ok_or(RaytracerError::UnknownBuffer(handle.0))?;
        Ok(f(&mut buffer.texels))
    }
}

impl Default for HostAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuAllocator for HostAllocator {
    fn allocate_buffer(&self, label: &str, bytes: u64) -> Result<BufferHandle> {
        let mut state = self.state();

        if let Some(budget) = self.budget {
            if state.used_bytes + bytes > budget {
                return Err(RaytracerError::Allocation {
                    label: label.to_string(),
                    bytes,
                }
                .into());
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let texel_count = bytes.div_ceil(TEXEL_BYTES) as usize;
        state.buffers.insert(
            id,
            HostBuffer {
                label: label.to_string(),
                bytes,
                texels: vec![Vector4::zeros(); texel_count],
            },
        );
        state.used_bytes += bytes;
        state.allocation_count += 1;

        log::trace!("Allocated {} ({} bytes) as buffer {}", label, bytes, id);
        Ok(BufferHandle(id))
    }

    fn free_buffer(&self, handle: BufferHandle) -> Result<()> {
        let mut state = self.state();
        let buffer = state
            .buffers
            .remove(&handle.0)
            .ok_or(RaytracerError::UnknownBuffer(handle.0))?;

        state.used_bytes -= buffer.bytes;
        state.release_log.push(buffer.label);
        Ok(())
    }

    fn create_denoiser(&self, size: Vector2<u32>) -> Result<(DenoiserHandle, DenoiserSizes)> {
        if size.x == 0 || size.y == 0 {
            return Err(RaytracerError::Denoiser(format!(
                "cannot denoise an empty {}x{} frame",
                size.x, size.y
            ))
            .into());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state().denoisers.insert(id, size);

        let texels = size.x as u64 * size.y as u64;
        let sizes = DenoiserSizes {
            // Filtered color
            scratch_bytes: texels * TEXEL_BYTES,
            // Per-pixel luminance weights
            state_bytes: texels * TEXEL_BYTES,
        };
        Ok((DenoiserHandle(id), sizes))
    }

    fn destroy_denoiser(&self, handle: DenoiserHandle) -> Result<()> {
        let mut state = self.state();
        if state.denoisers.remove(&handle.0).is_none() {
            return Err(RaytracerError::Denoiser(format!("unknown denoiser {}", handle.0)).into());
        }
        state.release_log.push("Denoiser".to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_free_is_an_error() {
        let allocator = HostAllocator::new();
        let handle = allocator.allocate_buffer("Test", 64).unwrap();

        allocator.free_buffer(handle).unwrap();
        let error = allocator.free_buffer(handle).unwrap_err();
        assert_eq!(
            error.downcast_ref::<RaytracerError>(),
            Some(&RaytracerError::UnknownBuffer(handle.0))
        );
    }

    #[test]
    fn test_budget_is_returned_on_free() {
        let allocator = HostAllocator::with_budget(128);
        let first = allocator.allocate_buffer("First", 128).unwrap();
        assert!(allocator.allocate_buffer("Second", 16).is_err());

        allocator.free_buffer(first).unwrap();
        assert!(allocator.allocate_buffer("Second", 16).is_ok());
        assert_eq!(allocator.allocation_count(), 2);
    }

    #[test]
    fn test_buffers_round_up_to_whole_texels() {
        let allocator = HostAllocator::new();
        let handle = allocator.allocate_buffer("Intensity", 4).unwrap();

        assert_eq!(allocator.read_buffer(handle).unwrap().len(), 1);
        allocator
            .with_buffer_mut(handle, |texels| texels[0].x = 0.5)
            .unwrap();
        assert_eq!(allocator.read_buffer(handle).unwrap()[0].x, 0.5);
    }

    #[test]
    fn test_empty_denoiser_is_rejected() {
        let allocator = HostAllocator::new();
        assert!(allocator.create_denoiser(Vector2::new(0, 4)).is_err());
        assert_eq!(allocator.live_denoiser_count(), 0);
    }
}
