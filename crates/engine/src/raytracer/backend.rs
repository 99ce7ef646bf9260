use crate::prelude::*;

/// Result of a single ray-scene intersection
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct HitInfo {
    pub position: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub tangent: Vector3<f32>,
    pub color: Vector4<f32>,
    pub tex_coord: Vector2<f32>,
    pub data: Vector3<f32>,
    pub data2: Vector2<f32>,
}

impl Default for HitInfo {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            normal: Vector3::zeros(),
            tangent: Vector3::zeros(),
            color: Vector4::repeat(1.0),
            tex_coord: Vector2::zeros(),
            data: Vector3::zeros(),
            data2: Vector2::zeros(),
        }
    }
}

/// One ray of a point cloud scan. The backend fills in `hit`, `hit_info`
/// and `handle`; the origin and direction are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointCloudSample {
    pub start: Vector3<f32>,
    pub direction: Vector3<f32>,
    pub hit: bool,
    pub hit_info: HitInfo,
    /// Opaque handle of the instance that was hit
    pub handle: u64,
}

impl PointCloudSample {
    pub fn new(start: Vector3<f32>, direction: Vector3<f32>) -> Self {
        Self {
            start,
            direction,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaterialKind {
    #[default]
    Lambertian,
    Metal,
}

/// Renderable instance as the backend sees it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneInstance {
    pub handle: u64,
    pub center: Point3<f32>,
    pub radius: f32,
    pub color: Vector3<f32>,
    pub material: MaterialKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneLight {
    pub position: Point3<f32>,
    pub intensity: f32,
    pub color: Vector3<f32>,
}

/// Ray tracing backend the camera and the scanner render through.
///
/// Every call is synchronous: it returns once the whole frame or batch has
/// completed. Accumulation state between renders belongs to the backend.
pub trait RayTracingBackend: GpuAllocator {
    /// Number of renderable instances currently uploaded
    fn instance_count(&self) -> usize;

    /// Replace the uploaded scene
    fn update_scene(&self, instances: Vec<SceneInstance>, lights: Vec<SceneLight>);

    /// Render one (possibly accumulated) frame into the camera's buffers and
    /// its imported render target. Returns whether a frame was produced.
    fn render_to_camera(
        &self,
        environment: &EnvironmentProperties,
        camera: &mut CameraProperties,
        rays: &RayProperties,
    ) -> Result<bool>;

    /// Intersect a batch of rays, filling in the hit fields of each sample
    fn sample_point_cloud(
        &self,
        environment: &EnvironmentProperties,
        samples: &mut [PointCloudSample],
    ) -> Result<()>;

    fn import_render_texture(&self, texture: &RenderTexture) -> Result<ImageHandle>;

    /// Imports of the same cubemap are counted; each needs its own release
    fn import_cubemap(&self, cubemap: &Cubemap) -> Result<ImageHandle>;

    /// Drop one import of a render texture or cubemap
    fn release_image(&self, handle: ImageHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_info_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<HitInfo>(), 20 * std::mem::size_of::<f32>());

        let hit = HitInfo::default();
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&hit));
        // Color sits after position, normal and tangent
        assert_eq!(&floats[9..13], &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_new_sample_is_a_miss() {
        let sample = PointCloudSample::new(Vector3::x(), -Vector3::z());
        assert!(!sample.hit);
        assert_eq!(sample.handle, 0);
        assert_eq!(sample.direction, -Vector3::z());
    }
}
