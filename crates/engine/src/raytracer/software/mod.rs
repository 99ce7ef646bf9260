//! CPU implementation of the ray tracing backend.
//!
//! Renders spheres lit by point lights with rayon, keeping every frame and
//! denoiser buffer in host memory. It stands in for a GPU backend in tests
//! and in the demo.

mod allocator;
mod denoiser;
mod tracer;

pub use allocator::HostAllocator;
pub use tracer::{Background, HostScene, Intersection, PathSample};

use crate::prelude::*;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

pub struct HostRayTracer {
    allocator: HostAllocator,
    scene: RwLock<HostScene>,
    render_targets: Mutex<HashMap<u64, RenderTexture>>,
    /// Imported cubemaps with their import count
    cubemaps: Mutex<HashMap<u64, (Cubemap, usize)>>,
    /// Frames accumulated so far, keyed by the camera's color buffer
    accumulation: Mutex<HashMap<BufferHandle, u32>>,
}

impl HostRayTracer {
    pub fn new() -> Self {
        Self::with_allocator(HostAllocator::new())
    }

    pub fn with_allocator(allocator: HostAllocator) -> Self {
        Self {
            allocator,
            scene: RwLock::new(HostScene::default()),
            render_targets: Mutex::new(HashMap::new()),
            cubemaps: Mutex::new(HashMap::new()),
            accumulation: Mutex::new(HashMap::new()),
        }
    }

    pub fn allocator(&self) -> &HostAllocator {
        &self.allocator
    }

    /// Number of frames accumulated into the buffer (0 if never rendered)
    pub fn accumulated_frames(&self, color: BufferHandle) -> u32 {
        self.accumulation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&color)
            .copied()
            .unwrap_or(0)
    }

    fn cubemap(&self, handle: Option<ImageHandle>) -> Result<Option<Cubemap>> {
        let Some(handle) = handle else {
            return Ok(None);
        };
        self.cubemaps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle.0)
            .map(|(cubemap, _)| Some(cubemap.clone()))
            .ok_or_else(|| RaytracerError::UnknownImage(handle.0).into())
    }

    /// Render targets and cubemaps currently imported
    pub fn imported_image_count(&self) -> usize {
        let targets = self
            .render_targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let cubemaps = self
            .cubemaps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        targets + cubemaps
    }

    /// Advance the accumulation counter and return the index of this frame
    fn next_frame_index(&self, color: BufferHandle, restart: bool) -> u32 {
        let mut accumulation = self
            .accumulation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let frames = accumulation.entry(color).or_insert(0);
        if restart {
            *frames = 0;
        }
        let index = *frames;
        *frames += 1;
        index
    }

    fn trace_frame(
        &self,
        environment: &EnvironmentProperties,
        camera: &CameraProperties,
        rays: &RayProperties,
        frame_index: u32,
    ) -> Result<Vec<PathSample>> {
        let size = camera.frame.size;
        let skybox = match camera.skybox {
            Some(_) => self.cubemap(camera.skybox)?,
            None => self.cubemap(environment.skybox)?,
        };
        let background = Background {
            skybox: skybox.as_ref(),
            color: environment.background_color,
            intensity: environment.environment_intensity,
        };
        let scene = self.scene.read().unwrap_or_else(PoisonError::into_inner);

        let right = camera.rotation * Vector3::x();
        let up = camera.rotation * Vector3::y();
        let front = camera.rotation * -Vector3::z();
        let samples = rays.samples.max(1);
        let texel_count = size.x as usize * size.y as usize;

        let frame = (0..texel_count)
            .into_par_iter()
            .map(|index| {
                let mut rng = StdRng::seed_from_u64(((frame_index as u64) << 32) ^ index as u64);
                let x = (index % size.x as usize) as f32;
                let y = (index / size.x as usize) as f32;
                let mut total = PathSample::default();

                for _ in 0..samples {
                    let jitter = Vector2::<f32>::new(rng.random(), rng.random());
                    let ndc_x = 2.0 * (x + jitter.x) / size.x as f32 - 1.0;
                    let ndc_y = 1.0 - 2.0 * (y + jitter.y) / size.y as f32;

                    let far = camera.inverse_projection_view * Vector4::new(ndc_x, ndc_y, 1.0, 1.0);
                    let far = far.xyz() / far.w;
                    let mut origin = camera.position.coords;
                    let mut direction = (far - origin).normalize();

                    if camera.aperture > 0.0 {
                        // Thin lens: keep the focal plane sharp
                        let focus = origin + direction * (camera.focal_length / direction.dot(&front));
                        let lens = tracer::random_in_disk(&mut rng) * camera.aperture;
                        origin += right * lens.x + up * lens.y;
                        direction = (focus - origin).normalize();
                    }

                    let path = scene.trace_path(
                        origin,
                        direction,
                        rays.bounces,
                        camera.max_distance,
                        &background,
                        &mut rng,
                    );
                    total.color += path.color;
                    total.normal += path.normal;
                    total.albedo += path.albedo;
                    total.depth += path.depth;
                }

                let scale = 1.0 / samples as f32;
                PathSample {
                    color: total.color * scale,
                    normal: total.normal * scale,
                    albedo: total.albedo * scale,
                    depth: total.depth * scale,
                }
            })
            .collect();

        Ok(frame)
    }
}

impl Default for HostRayTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuAllocator for HostRayTracer {
    fn allocate_buffer(&self, label: &str, bytes: u64) -> Result<BufferHandle> {
        self.allocator.allocate_buffer(label, bytes)
    }

    fn free_buffer(&self, handle: BufferHandle) -> Result<()> {
        self.accumulation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        self.allocator.free_buffer(handle)
    }

    fn create_denoiser(&self, size: Vector2<u32>) -> Result<(DenoiserHandle, DenoiserSizes)> {
        self.allocator.create_denoiser(size)
    }

    fn destroy_denoiser(&self, handle: DenoiserHandle) -> Result<()> {
        self.allocator.destroy_denoiser(handle)
    }
}

impl RayTracingBackend for HostRayTracer {
    fn instance_count(&self) -> usize {
        self.scene
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .instances
            .len()
    }

    fn update_scene(&self, instances: Vec<SceneInstance>, lights: Vec<SceneLight>) {
        log::debug!(
            "Uploading host scene with {} instances and {} lights",
            instances.len(),
            lights.len()
        );
        *self.scene.write().unwrap_or_else(PoisonError::into_inner) = HostScene { instances, lights };
        // New geometry invalidates every accumulated frame
        self.accumulation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn render_to_camera(
        &self,
        environment: &EnvironmentProperties,
        camera: &mut CameraProperties,
        rays: &RayProperties,
    ) -> Result<bool> {
        let size = camera.frame.size;
        let Some(buffers) = camera.frame.buffers.as_ref() else {
            log::warn!("Camera has no frame buffers, skipping render");
            return Ok(false);
        };
        let Some(image) = camera.image else {
            log::warn!("Camera render target was never imported, skipping render");
            return Ok(false);
        };
        let target = self
            .render_targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&image.0)
            .cloned()
            .ok_or(RaytracerError::UnknownImage(image.0))?;
        if target.size() != size {
            anyhow::bail!(
                "render target is {:?} but camera frame is {}x{}",
                target.size(),
                size.x,
                size.y
            );
        }

        let (color, normal, albedo) = (buffers.color, buffers.normal, buffers.albedo);
        let denoiser = (
            buffers.denoiser.scratch,
            buffers.denoiser.state,
            buffers.denoiser.intensity,
        );

        let restart = camera.modified || !camera.accumulate;
        let frame_index = self.next_frame_index(color, restart);
        let frame = self.trace_frame(environment, camera, rays, frame_index)?;
        camera.modified = false;

        // Running average over accumulated frames
        let previous = frame_index as f32;
        let weight = 1.0 / (previous + 1.0);
        self.allocator.with_buffer_mut(color, |texels| {
            texels.par_iter_mut().zip(frame.par_iter()).for_each(|(texel, path)| {
                *texel = (*texel * previous + path.color.push(1.0)) * weight;
            });
        })?;
        self.allocator.with_buffer_mut(normal, |texels| {
            texels.par_iter_mut().zip(frame.par_iter()).for_each(|(texel, path)| {
                *texel = (*texel * previous + path.normal.push(path.depth)) * weight;
            });
        })?;
        self.allocator.with_buffer_mut(albedo, |texels| {
            texels.par_iter_mut().zip(frame.par_iter()).for_each(|(texel, path)| {
                *texel = (*texel * previous + path.albedo.push(1.0)) * weight;
            });
        })?;

        let mut output = self.allocator.read_buffer(color)?;
        let normals = self.allocator.read_buffer(normal)?;

        if camera.denoiser_strength > 0.0 {
            let (scratch, state, intensity_buffer) = denoiser;
            let intensity = denoiser::compute_intensity(&output);
            let mut weights = vec![Vector4::zeros(); output.len()];
            let mut filtered = vec![Vector4::zeros(); output.len()];
            denoiser::filter(&output, &normals, size, intensity, &mut weights, &mut filtered);

            self.allocator
                .with_buffer_mut(intensity_buffer, |texels| texels[0].x = intensity)?;
            self.allocator
                .with_buffer_mut(state, |texels| texels.copy_from_slice(&weights))?;
            self.allocator
                .with_buffer_mut(scratch, |texels| texels.copy_from_slice(&filtered))?;

            denoiser::blend(&mut output, &filtered, camera.denoiser_strength);
        }

        let inverse_gamma = 1.0 / camera.gamma.max(1e-4);
        let presented: Vec<Vector4<f32>> = match camera.output_type {
            OutputType::Color => output
                .par_iter()
                .map(|texel| {
                    texel
                        .xyz()
                        .map(|channel| channel.max(0.0).powf(inverse_gamma))
                        .push(1.0)
                })
                .collect(),
            OutputType::Normal => normals
                .par_iter()
                .map(|texel| (texel.xyz() * 0.5).add_scalar(0.5).push(1.0))
                .collect(),
            OutputType::Albedo => self.allocator.read_buffer(albedo)?,
            OutputType::Depth => {
                let max_distance = camera.max_distance.max(1e-4);
                normals
                    .par_iter()
                    .map(|texel| Vector3::repeat(texel.w / max_distance).push(1.0))
                    .collect()
            }
        };
        target.write(presented)?;

        log::trace!(
            "Rendered {}x{} frame {} ({} samples, {} bounces)",
            size.x,
            size.y,
            frame_index,
            rays.samples,
            rays.bounces
        );
        Ok(true)
    }

    fn sample_point_cloud(
        &self,
        _environment: &EnvironmentProperties,
        samples: &mut [PointCloudSample],
    ) -> Result<()> {
        let scene = self.scene.read().unwrap_or_else(PoisonError::into_inner);
        samples
            .par_iter_mut()
            .for_each(|sample| scene.sample_point(sample, f32::INFINITY));
        Ok(())
    }

    fn import_render_texture(&self, texture: &RenderTexture) -> Result<ImageHandle> {
        self.render_targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(texture.id(), texture.clone());
        Ok(ImageHandle(texture.id()))
    }

    fn import_cubemap(&self, cubemap: &Cubemap) -> Result<ImageHandle> {
        self.cubemaps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(cubemap.id())
            .or_insert_with(|| (cubemap.clone(), 0))
            .1 += 1;
        Ok(ImageHandle(cubemap.id()))
    }

    fn release_image(&self, handle: ImageHandle) -> Result<()> {
        let target = self
            .render_targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.0);
        if target.is_some() {
            log::trace!("Released render target {}", handle.0);
            return Ok(());
        }

        let mut cubemaps = self.cubemaps.lock().unwrap_or_else(PoisonError::into_inner);
        let Some((_, imports)) = cubemaps.get_mut(&handle.0) else {
            return Err(RaytracerError::UnknownImage(handle.0).into());
        };
        *imports -= 1;
        if *imports == 0 {
            cubemaps.remove(&handle.0);
            log::trace!("Released cubemap {}", handle.0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(backend: &HostRayTracer) {
        backend.update_scene(
            vec![SceneInstance {
                handle: 7,
                center: Point3::new(0.0, 0.0, -5.0),
                radius: 1.0,
                color: Vector3::new(0.9, 0.1, 0.1),
                material: MaterialKind::Lambertian,
            }],
            vec![SceneLight {
                position: Point3::new(0.0, 3.0, 0.0),
                intensity: 20.0,
                color: Vector3::repeat(1.0),
            }],
        );
    }

    fn camera(backend: &HostRayTracer, size: Vector2<u32>) -> (CameraProperties, RenderTexture) {
        let mut properties = CameraProperties::default();
        let texture = RenderTexture::new(size);
        properties.resize(backend, size).unwrap();
        properties.image = Some(backend.import_render_texture(&texture).unwrap());
        properties.set(Point3::origin(), UnitQuaternion::identity());
        (properties, texture)
    }

    #[test]
    fn test_render_writes_target() {
        let backend = HostRayTracer::new();
        scene(&backend);
        let (mut properties, texture) = camera(&backend, Vector2::new(8, 8));

        let rendered = backend
            .render_to_camera(&EnvironmentProperties::default(), &mut properties, &RayProperties::default())
            .unwrap();
        assert!(rendered);
        assert!(!properties.modified);

        // The sphere fills the center, the corners see the sky
        let texels = texture.read();
        let center = texels[4 * 8 + 4];
        let corner = texels[0];
        assert!(center.x > center.z);
        assert!(corner.z > corner.x);

        properties.release(&backend).unwrap();
    }

    #[test]
    fn test_accumulation_restarts_when_modified() {
        let backend = HostRayTracer::new();
        scene(&backend);
        let (mut properties, _texture) = camera(&backend, Vector2::new(4, 4));
        let environment = EnvironmentProperties::default();
        let rays = RayProperties::default();
        let color = properties.frame.buffers.as_ref().unwrap().color;

        backend.render_to_camera(&environment, &mut properties, &rays).unwrap();
        backend.render_to_camera(&environment, &mut properties, &rays).unwrap();
        assert_eq!(backend.accumulated_frames(color), 2);

        properties.set_fov(45.0);
        backend.render_to_camera(&environment, &mut properties, &rays).unwrap();
        assert_eq!(backend.accumulated_frames(color), 1);

        properties.accumulate = false;
        backend.render_to_camera(&environment, &mut properties, &rays).unwrap();
        backend.render_to_camera(&environment, &mut properties, &rays).unwrap();
        assert_eq!(backend.accumulated_frames(color), 1);

        properties.release(&backend).unwrap();
    }

    #[test]
    fn test_render_without_buffers_declines() {
        let backend = HostRayTracer::new();
        let mut properties = CameraProperties::default();

        let rendered = backend
            .render_to_camera(&EnvironmentProperties::default(), &mut properties, &RayProperties::default())
            .unwrap();
        assert!(!rendered);
    }

    #[test]
    fn test_denoiser_writes_intensity() {
        let backend = HostRayTracer::new();
        scene(&backend);
        let (mut properties, _texture) = camera(&backend, Vector2::new(4, 4));
        properties.set_denoiser_strength(0.5);

        backend
            .render_to_camera(&EnvironmentProperties::default(), &mut properties, &RayProperties::default())
            .unwrap();

        let intensity = properties.frame.buffers.as_ref().unwrap().denoiser.intensity;
        assert!(backend.allocator().read_buffer(intensity).unwrap()[0].x > 0.0);

        properties.release(&backend).unwrap();
    }

    #[test]
    fn test_depth_output() {
        let backend = HostRayTracer::new();
        scene(&backend);
        let (mut properties, texture) = camera(&backend, Vector2::new(8, 8));
        properties.set_output_type(OutputType::Depth);
        properties.set_max_distance(10.0);

        backend
            .render_to_camera(&EnvironmentProperties::default(), &mut properties, &RayProperties::default())
            .unwrap();

        let texels = texture.read();
        // Sphere surface is about 4 units away, the sky is at max distance
        assert!(texels[4 * 8 + 4].x < 0.45);
        assert!((texels[0].x - 1.0).abs() < 1e-5);

        properties.release(&backend).unwrap();
    }

    #[test]
    fn test_sample_point_cloud_marks_hits() {
        let backend = HostRayTracer::new();
        scene(&backend);
        let mut samples = vec![
            PointCloudSample::new(Vector3::zeros(), -Vector3::z()),
            PointCloudSample::new(Vector3::zeros(), Vector3::z()),
        ];

        backend
            .sample_point_cloud(&EnvironmentProperties::default(), &mut samples)
            .unwrap();
        assert!(samples[0].hit);
        assert_eq!(samples[0].handle, 7);
        assert!(!samples[1].hit);
    }

    #[test]
    fn test_release_image_drops_imports() {
        let backend = HostRayTracer::new();
        let texture = RenderTexture::new(Vector2::new(2, 2));
        let cubemap = Cubemap::uniform(Vector3::repeat(0.5));

        let target = backend.import_render_texture(&texture).unwrap();
        // Re-importing after a resize replaces the entry
        backend.import_render_texture(&texture).unwrap();
        let first = backend.import_cubemap(&cubemap).unwrap();
        let second = backend.import_cubemap(&cubemap).unwrap();
        assert_eq!(backend.imported_image_count(), 2);

        backend.release_image(target).unwrap();
        backend.release_image(first).unwrap();
        assert_eq!(backend.imported_image_count(), 1);
        backend.release_image(second).unwrap();
        assert_eq!(backend.imported_image_count(), 0);

        let error = backend.release_image(target).unwrap_err();
        assert_eq!(
            error.downcast_ref::<RaytracerError>(),
            Some(&RaytracerError::UnknownImage(target.0))
        );
    }

    #[test]
    fn test_unknown_skybox_is_an_error() {
        let backend = HostRayTracer::new();
        scene(&backend);
        let (mut properties, _texture) = camera(&backend, Vector2::new(2, 2));
        properties.set_skybox(Some(ImageHandle(u64::MAX)));

        let error = backend
            .render_to_camera(&EnvironmentProperties::default(), &mut properties, &RayProperties::default())
            .unwrap_err();
        assert_eq!(
            error.downcast_ref::<RaytracerError>(),
            Some(&RaytracerError::UnknownImage(u64::MAX))
        );

        properties.release(&backend).unwrap();
    }
}
