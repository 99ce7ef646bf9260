use crate::prelude::*;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_FRAME_WIDTH: i32 = 512;
pub const DEFAULT_FRAME_HEIGHT: i32 = 512;

/// Camera that renders the scene through the ray tracing backend.
///
/// The camera owns its frame buffers and render texture. Call `ready` (or one
/// of the `render` methods, which call it) before every frame so the buffers
/// follow the declared frame size, and `destroy` before dropping it.
#[derive(Component, Debug)]
pub struct RayTracerCamera {
    properties: CameraProperties,
    ray_properties: RayProperties,
    skybox: Option<Arc<Cubemap>>,
    main_camera: bool,
    allow_auto_resize: bool,
    /// Requested size; may be non-positive until the next `ready` clamps it
    frame_size: Vector2<i32>,
    render_texture: RenderTexture,
    rendered: bool,
}

impl RayTracerCamera {
    pub fn new(backend: &dyn RayTracingBackend) -> Result<Self> {
        let frame_size = Vector2::new(DEFAULT_FRAME_WIDTH, DEFAULT_FRAME_HEIGHT);
        let mut camera = Self {
            properties: CameraProperties::default(),
            ray_properties: RayProperties::default(),
            skybox: None,
            main_camera: false,
            allow_auto_resize: true,
            frame_size,
            render_texture: RenderTexture::new(frame_size.map(|axis| axis as u32)),
            rendered: false,
        };

        camera
            .ready(backend, Point3::origin(), UnitQuaternion::identity())
            .context("Failed to create ray tracer camera")?;
        Ok(camera)
    }

    /// Bring the backend state in line with the declared frame size and the
    /// given pose. Buffers are only reallocated when the size changed.
    pub fn ready(
        &mut self,
        backend: &dyn RayTracingBackend,
        position: Point3<f32>,
        rotation: UnitQuaternion<f32>,
    ) -> Result<()> {
        if self.properties.frame.size.map(|axis| axis as i32) != self.frame_size {
            self.frame_size = self.frame_size.map(|axis| axis.max(1));
            let size = self.frame_size.map(|axis| axis as u32);

            self.properties
                .resize(backend, size)
                .with_context(|| format!("Failed to resize camera frame to {}x{}", size.x, size.y))?;
            self.render_texture.resize(size);
            self.properties.image = Some(backend.import_render_texture(&self.render_texture)?);
        }

        // A destroyed camera gives its skybox import back; take it again
        if let (Some(cubemap), None) = (&self.skybox, self.properties.skybox) {
            let handle = backend
                .import_cubemap(cubemap)
                .context("Failed to import camera skybox")?;
            self.properties.set_skybox(Some(handle));
        }

        self.properties.set(position, rotation);
        Ok(())
    }

    /// Render with the camera's own ray properties
    pub fn render(
        &mut self,
        backend: &dyn RayTracingBackend,
        environment: &EnvironmentProperties,
        transform: &GlobalTransform,
    ) -> Result<bool> {
        let rays = self.ray_properties;
        self.render_with_environment(backend, transform, &rays, environment)
    }

    pub fn render_with_rays(
        &mut self,
        backend: &dyn RayTracingBackend,
        environment: &EnvironmentProperties,
        transform: &GlobalTransform,
        rays: &RayProperties,
    ) -> Result<bool> {
        self.render_with_environment(backend, transform, rays, environment)
    }

    /// Render one frame with explicit ray and environment settings.
    ///
    /// Returns false without touching any buffer when the backend has no
    /// instances to trace; `rendered` is cleared in that case.
    pub fn render_with_environment(
        &mut self,
        backend: &dyn RayTracingBackend,
        transform: &GlobalTransform,
        rays: &RayProperties,
        environment: &EnvironmentProperties,
    ) -> Result<bool> {
        if backend.instance_count() == 0 {
            log::trace!("Scene is empty, skipping camera render");
            self.rendered = false;
            return Ok(false);
        }

        self.ready(backend, transform.position(), transform.rotation())?;
        self.rendered = backend
            .render_to_camera(environment, &mut self.properties, rays)
            .context("Failed to render camera frame")?;
        Ok(self.rendered)
    }

    /// Free every GPU resource and give back the imported render texture and
    /// skybox. Safe to call more than once.
    pub fn destroy<B: RayTracingBackend + ?Sized>(&mut self, backend: &B) -> Result<()> {
        let buffers = self
            .properties
            .release(backend)
            .context("Failed to release camera frame buffers");
        let image = match self.properties.image.take() {
            Some(handle) => backend
                .release_image(handle)
                .context("Failed to release camera render target"),
            None => Ok(()),
        };
        let skybox = match self.properties.skybox.take() {
            Some(handle) => backend
                .release_image(handle)
                .context("Failed to release camera skybox"),
            None => Ok(()),
        };
        self.properties.modified = true;
        self.rendered = false;

        buffers.and(image).and(skybox)
    }

    /// Take over another camera's settings. GPU resources stay with this
    /// camera and are reallocated on the next `ready`.
    pub fn copy_settings_from(&mut self, source: &RayTracerCamera) {
        self.main_camera = source.main_camera;
        self.properties.accumulate = source.properties.accumulate;
        self.properties.fov = source.properties.fov;
        self.properties.inverse_projection_view = source.properties.inverse_projection_view;
        self.properties.output_type = source.properties.output_type;
        self.properties.gamma = source.properties.gamma;
        self.properties.denoiser_strength = source.properties.denoiser_strength;
        self.properties.aperture = source.properties.aperture;
        self.properties.focal_length = source.properties.focal_length;
        self.ray_properties = source.ray_properties;
        self.frame_size = source.frame_size;
        self.allow_auto_resize = source.allow_auto_resize;

        self.properties.modified = true;
        self.properties.frame.size = Vector2::zeros();
        self.rendered = false;
    }

    pub fn projection(&self) -> Matrix4<f32> {
        let aspect = self.frame_size.x as f32 / self.frame_size.y as f32;
        perspective((self.properties.fov * 0.5).to_radians(), aspect, NEAR_PLANE, FAR_PLANE)
    }

    /// Write the last rendered frame to disk, picking the format by extension
    pub fn save_frame(&self, path: impl AsRef<Path>) -> Result<()> {
        self.render_texture.save(path)
    }

    /// Follow a viewport size when auto-resize is allowed
    pub fn auto_resize(&mut self, width: u32, height: u32) -> bool {
        if !self.allow_auto_resize {
            return false;
        }
        let axis = |value: u32| i32::try_from(value).unwrap_or(i32::MAX);
        self.frame_size = Vector2::new(axis(width), axis(height));
        true
    }

    pub fn set_fov(&mut self, value: f32) {
        self.properties.set_fov(value);
    }

    pub fn set_aperture(&mut self, value: f32) {
        self.properties.set_aperture(value);
    }

    pub fn set_focal_length(&mut self, value: f32) {
        self.properties.set_focal_length(value);
    }

    pub fn set_denoiser_strength(&mut self, value: f32) {
        self.properties.set_denoiser_strength(value);
    }

    pub fn set_gamma(&mut self, value: f32) {
        self.properties.set_gamma(value);
    }

    pub fn set_output_type(&mut self, value: OutputType) {
        self.properties.set_output_type(value);
    }

    pub fn set_max_distance(&mut self, value: f32) {
        self.properties.set_max_distance(value);
    }

    pub fn set_accumulate(&mut self, value: bool) {
        if self.properties.accumulate != value {
            self.properties.accumulate = value;
            self.properties.modified = true;
        }
    }

    /// Use `skybox` instead of the environment's. The cubemap is imported
    /// into the backend right away and the previous one is released.
    pub fn set_skybox(
        &mut self,
        backend: &dyn RayTracingBackend,
        skybox: Option<Arc<Cubemap>>,
    ) -> Result<()> {
        let handle = match &skybox {
            Some(cubemap) => Some(
                backend
                    .import_cubemap(cubemap)
                    .context("Failed to import camera skybox")?,
            ),
            None => None,
        };
        let previous = self.properties.skybox;
        self.properties.set_skybox(handle);
        self.skybox = skybox;

        if let Some(previous) = previous {
            backend
                .release_image(previous)
                .context("Failed to release previous camera skybox")?;
        }
        Ok(())
    }

    pub fn set_frame_size(&mut self, width: i32, height: i32) {
        self.frame_size = Vector2::new(width, height);
    }

    pub fn set_allow_auto_resize(&mut self, value: bool) {
        self.allow_auto_resize = value;
    }

    pub fn set_ray_properties(&mut self, value: RayProperties) {
        self.ray_properties = value;
    }

    pub fn properties(&self) -> &CameraProperties {
        &self.properties
    }

    pub fn ray_properties(&self) -> RayProperties {
        self.ray_properties
    }

    pub fn skybox(&self) -> Option<&Arc<Cubemap>> {
        self.skybox.as_ref()
    }

    pub fn is_main_camera(&self) -> bool {
        self.main_camera
    }

    pub fn allow_auto_resize(&self) -> bool {
        self.allow_auto_resize
    }

    pub fn frame_size(&self) -> Vector2<i32> {
        self.frame_size
    }

    pub fn render_texture(&self) -> &RenderTexture {
        &self.render_texture
    }

    /// Whether the last render produced a frame. Cleared by an empty-scene
    /// render and by `destroy`.
    pub fn rendered(&self) -> bool {
        self.rendered
    }
}

/// Mark (or unmark) the camera on `entity` as the main camera.
///
/// Ignored when the entity is gone or has no camera; returns whether the flag
/// was applied.
pub fn set_main_camera(world: &mut World, entity: Entity, value: bool) -> bool {
    let Ok(mut entity_mut) = world.get_entity_mut(entity) else {
        log::warn!("Cannot set main camera on missing entity {:?}", entity);
        return false;
    };
    let Some(mut camera) = entity_mut.get_mut::<RayTracerCamera>() else {
        log::warn!("Entity {:?} has no ray tracer camera", entity);
        return false;
    };

    camera.main_camera = value;
    true
}

/// Persisted camera settings; absent keys leave the camera untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RayTracerCameraConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_camera: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_auto_resize: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_width: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_height: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounces: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fov: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accumulate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denoiser_strength: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_length: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aperture: Option<f32>,
}

impl Serializable for RayTracerCamera {
    type Persisted = RayTracerCameraConfig;

    fn persist(&self) -> RayTracerCameraConfig {
        RayTracerCameraConfig {
            main_camera: Some(self.main_camera),
            allow_auto_resize: Some(self.allow_auto_resize),
            frame_width: Some(self.frame_size.x),
            frame_height: Some(self.frame_size.y),
            samples: Some(self.ray_properties.samples),
            bounces: Some(self.ray_properties.bounces),
            fov: Some(self.properties.fov),
            gamma: Some(self.properties.gamma),
            accumulate: Some(self.properties.accumulate),
            denoiser_strength: Some(self.properties.denoiser_strength),
            focal_length: Some(self.properties.focal_length),
            aperture: Some(self.properties.aperture),
        }
    }

    fn restore(&mut self, config: RayTracerCameraConfig) {
        if let Some(value) = config.main_camera {
            self.main_camera = value;
        }
        if let Some(value) = config.allow_auto_resize {
            self.allow_auto_resize = value;
        }
        if let Some(value) = config.frame_width {
            self.frame_size.x = value;
        }
        if let Some(value) = config.frame_height {
            self.frame_size.y = value;
        }
        if let Some(value) = config.samples {
            self.ray_properties.samples = value;
        }
        if let Some(value) = config.bounces {
            self.ray_properties.bounces = value;
        }
        if let Some(value) = config.fov {
            self.set_fov(value);
        }
        if let Some(value) = config.gamma {
            self.set_gamma(value);
        }
        if let Some(value) = config.accumulate {
            self.set_accumulate(value);
        }
        if let Some(value) = config.denoiser_strength {
            self.set_denoiser_strength(value);
        }
        if let Some(value) = config.focal_length {
            self.set_focal_length(value);
        }
        if let Some(value) = config.aperture {
            self.set_aperture(value);
        }
    }
}
