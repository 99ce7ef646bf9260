use crate::prelude::*;

pub const NEAR_PLANE: f32 = 0.0001;
pub const FAR_PLANE: f32 = 100.0;

/// Sampling configuration for a single render or scan invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RayProperties {
    pub samples: u32,
    pub bounces: u32,
}

impl Default for RayProperties {
    fn default() -> Self {
        Self {
            samples: 1,
            bounces: 4,
        }
    }
}

/// Which attribute the backend writes into the render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputType {
    #[default]
    Color,
    Normal,
    Albedo,
    Depth,
}

/// Environment lighting shared by every camera of a scene.
/// The raytracer layer owns one as a resource; renders may pass an override.
#[derive(Resource, Debug, Clone, PartialEq)]
pub struct EnvironmentProperties {
    pub background_color: Vector3<f32>,
    pub environment_intensity: f32,
    pub skybox: Option<ImageHandle>,
}

impl Default for EnvironmentProperties {
    fn default() -> Self {
        Self {
            background_color: Vector3::new(0.6, 0.7, 0.9),
            environment_intensity: 1.0,
            skybox: None,
        }
    }
}

/// Current frame extent plus the GPU buffers sized to it
#[derive(Debug, Default)]
pub struct Frame {
    pub size: Vector2<u32>,
    pub buffers: Option<FrameBuffers>,
}

/// GPU-facing render configuration and state for one camera
#[derive(Debug)]
pub struct CameraProperties {
    pub frame: Frame,
    pub fov: f32,
    pub gamma: f32,
    pub accumulate: bool,
    pub denoiser_strength: f32,
    pub aperture: f32,
    pub focal_length: f32,
    pub max_distance: f32,
    pub output_type: OutputType,
    pub position: Point3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub inverse_projection_view: Matrix4<f32>,
    /// Render target as imported into the backend
    pub image: Option<ImageHandle>,
    pub skybox: Option<ImageHandle>,
    /// Set whenever a change invalidates accumulated samples; cleared by the backend
    pub modified: bool,
}

impl Default for CameraProperties {
    fn default() -> Self {
        Self {
            frame: Frame::default(),
            fov: 60.0,
            gamma: 2.2,
            accumulate: true,
            denoiser_strength: 0.0,
            aperture: 0.0,
            focal_length: 1.0,
            max_distance: FAR_PLANE,
            output_type: OutputType::Color,
            position: Point3::origin(),
            rotation: UnitQuaternion::identity(),
            inverse_projection_view: Matrix4::identity(),
            image: None,
            skybox: None,
            modified: true,
        }
    }
}

impl CameraProperties {
    /// Release the current frame buffers and allocate new ones for `size`.
    /// On failure the camera is left without buffers and a zero frame size.
    pub fn resize<A: GpuAllocator + ?Sized>(
        &mut self,
        allocator: &A,
        size: Vector2<u32>,
    ) -> Result<()> {
        self.release(allocator)?;

        let buffers = FrameBuffers::allocate(allocator, size)?;
        self.frame.buffers = Some(buffers);
        self.frame.size = size;
        self.modified = true;

        log::debug!("Resized camera frame to {}x{}", size.x, size.y);
        Ok(())
    }

    /// Free every frame and denoiser buffer this camera owns
    pub fn release<A: GpuAllocator + ?Sized>(&mut self, allocator: &A) -> Result<()> {
        if let Some(mut buffers) = self.frame.buffers.take() {
            buffers.release(allocator)?;
        }
        self.frame.size = Vector2::zeros();
        Ok(())
    }

    /// Push a new pose and recompute the inverse projection-view matrix
    pub fn set(&mut self, position: Point3<f32>, rotation: UnitQuaternion<f32>) {
        if self.position != position || self.rotation != rotation {
            self.position = position;
            self.rotation = rotation;
            self.modified = true;
        }

        let aspect = aspect_ratio(self.frame.size.x as f32, self.frame.size.y as f32);
        let projection = perspective((self.fov * 0.5).to_radians(), aspect, NEAR_PLANE, FAR_PLANE);
        let view = Isometry3::from_parts(Translation3::from(position.coords), rotation)
            .inverse()
            .to_homogeneous();

        self.inverse_projection_view = (projection * view)
            .try_inverse()
            .unwrap_or_else(Matrix4::identity);
    }

    pub fn set_fov(&mut self, value: f32) {
        if self.fov != value {
            self.fov = value;
            self.modified = true;
        }
    }

    pub fn set_gamma(&mut self, value: f32) {
        if self.gamma != value {
            self.gamma = value;
            self.modified = true;
        }
    }

    pub fn set_aperture(&mut self, value: f32) {
        if self.aperture != value {
            self.aperture = value;
            self.modified = true;
        }
    }

    pub fn set_focal_length(&mut self, value: f32) {
        if self.focal_length != value {
            self.focal_length = value;
            self.modified = true;
        }
    }

    pub fn set_denoiser_strength(&mut self, value: f32) {
        if self.denoiser_strength != value {
            self.denoiser_strength = value;
            self.modified = true;
        }
    }

    pub fn set_max_distance(&mut self, value: f32) {
        if self.max_distance != value {
            self.max_distance = value;
            self.modified = true;
        }
    }

    pub fn set_output_type(&mut self, value: OutputType) {
        if self.output_type != value {
            self.output_type = value;
            self.modified = true;
        }
    }

    pub fn set_skybox(&mut self, value: Option<ImageHandle>) {
        if self.skybox != value {
            self.skybox = value;
            self.modified = true;
        }
    }
}

/// Right-handed perspective projection with an OpenGL depth range.
///
/// Unlike `Perspective3::new` this never panics on a degenerate aspect ratio,
/// since a declared frame size may still be zero before it is clamped.
pub fn perspective(fovy: f32, aspect: f32, znear: f32, zfar: f32) -> Matrix4<f32> {
    let f = 1.0 / (fovy * 0.5).tan();
    let mut matrix = Matrix4::zeros();
    matrix[(0, 0)] = f / aspect;
    matrix[(1, 1)] = f;
    matrix[(2, 2)] = (zfar + znear) / (znear - zfar);
    matrix[(2, 3)] = 2.0 * zfar * znear / (znear - zfar);
    matrix[(3, 2)] = -1.0;
    matrix
}

fn aspect_ratio(width: f32, height: f32) -> f32 {
    if height == 0.0 { 1.0 } else { width / height }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perspective_matches_nalgebra() {
        let ours = perspective(0.8, 1.5, NEAR_PLANE, FAR_PLANE);
        let reference = Perspective3::new(1.5, 0.8, NEAR_PLANE, FAR_PLANE).to_homogeneous();

        assert!((ours - reference).abs().max() < 1e-3);
    }

    #[test]
    fn test_set_marks_modified_only_on_pose_change() {
        let mut properties = CameraProperties::default();
        properties.set(Point3::new(1.0, 2.0, 3.0), UnitQuaternion::identity());
        properties.modified = false;

        properties.set(Point3::new(1.0, 2.0, 3.0), UnitQuaternion::identity());
        assert!(!properties.modified);

        properties.set(Point3::new(1.0, 2.0, 4.0), UnitQuaternion::identity());
        assert!(properties.modified);
    }

    #[test]
    fn test_inverse_projection_view_maps_center_forward() {
        let mut properties = CameraProperties::default();
        properties.frame.size = Vector2::new(4, 4);
        properties.set(Point3::new(0.0, 0.0, 5.0), UnitQuaternion::identity());

        // Center of the far plane sits straight ahead along -Z
        let far = properties.inverse_projection_view * Vector4::new(0.0, 0.0, 1.0, 1.0);
        let far = far.xyz() / far.w;
        let direction = (far - Vector3::new(0.0, 0.0, 5.0)).normalize();

        assert!((direction - Vector3::new(0.0, 0.0, -1.0)).norm() < 1e-3);
    }

    #[test]
    fn test_setters_only_flag_real_changes() {
        let mut properties = CameraProperties::default();
        properties.modified = false;

        properties.set_gamma(2.2);
        assert!(!properties.modified);

        properties.set_output_type(OutputType::Normal);
        assert!(properties.modified);
        assert_eq!(properties.output_type, OutputType::Normal);
    }
}
