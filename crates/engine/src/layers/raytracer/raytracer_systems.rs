use crate::prelude::*;

/// System to keep every GlobalTransform in step with its Transform
pub fn propagate_global_transforms(
    mut commands: Commands,
    mut query: Query<(Entity, &Transform, Option<&mut GlobalTransform>), Changed<Transform>>,
) {
    for (entity, transform, global) in query.iter_mut() {
        match global {
            Some(mut global) => *global = GlobalTransform::from(transform),
            None => {
                commands
                    .entity(entity)
                    .insert(GlobalTransform::from(transform));
            }
        }
    }
}

/// System to collect all spheres and lights and upload them to the backend.
/// Nothing is uploaded unless a sphere or light changed, moved or went away.
pub fn sync_raytracer_scene(
    raytracer: Res<RayTracer>,
    sphere_query: Query<(Entity, &Sphere, &GlobalTransform)>,
    light_query: Query<(&Light, &GlobalTransform)>,
    changed_spheres: Query<(), (With<Sphere>, Or<(Changed<Sphere>, Changed<GlobalTransform>)>)>,
    changed_lights: Query<(), (With<Light>, Or<(Changed<Light>, Changed<GlobalTransform>)>)>,
    mut removed_spheres: RemovedComponents<Sphere>,
    mut removed_lights: RemovedComponents<Light>,
) {
    let removed = removed_spheres.read().count() + removed_lights.read().count();
    if changed_spheres.is_empty() && changed_lights.is_empty() && removed == 0 {
        return;
    }

    let instances: Vec<SceneInstance> = sphere_query
        .iter()
        .map(|(entity, sphere, transform)| sphere.to_instance(entity.to_bits(), transform))
        .collect();

    let lights: Vec<SceneLight> = light_query
        .iter()
        .map(|(light, transform)| light.to_scene_light(transform))
        .collect();

    log::debug!(
        "Syncing raytracer scene: {} spheres, {} lights",
        instances.len(),
        lights.len()
    );
    raytracer.update_scene(instances, lights);
}

/// Render every camera from its entity's transform. Returns how many
/// cameras produced a frame.
pub fn render_cameras(world: &mut World) -> Result<usize> {
    let raytracer = world
        .get_resource::<RayTracer>()
        .cloned()
        .context("RayTracer resource is missing")?;
    let environment = world
        .get_resource::<EnvironmentProperties>()
        .cloned()
        .unwrap_or_default();
    let viewport = world.get_resource::<ViewportSize>().copied();

    let mut query = world.query::<(Entity, &mut RayTracerCamera, Option<&GlobalTransform>)>();
    let mut rendered = 0;
    for (entity, mut camera, transform) in query.iter_mut(world) {
        if let Some(viewport) = viewport {
            if camera.is_main_camera() {
                camera.auto_resize(viewport.width, viewport.height);
            }
        }

        let transform = transform.copied().unwrap_or_default();
        if camera
            .render(&*raytracer, &environment, &transform)
            .with_context(|| format!("Failed to render camera {:?}", entity))?
        {
            rendered += 1;
        }
    }

    Ok(rendered)
}

/// Run every scanner once and collect its points into the entity's
/// PointCloud, if it has one. Returns the number of new hits.
pub fn run_scanners(world: &mut World) -> Result<usize> {
    let raytracer = world
        .get_resource::<RayTracer>()
        .cloned()
        .context("RayTracer resource is missing")?;
    let environment = world
        .get_resource::<EnvironmentProperties>()
        .cloned()
        .unwrap_or_default();

    let mut query = world.query::<(
        Entity,
        &mut PointCloudScanner,
        Option<&GlobalTransform>,
        Option<&mut PointCloud>,
    )>();
    let mut hits = 0;
    for (entity, mut scanner, transform, cloud) in query.iter_mut(world) {
        let transform = transform.copied().unwrap_or_default();
        hits += scanner
            .scan(&*raytracer, &environment, &transform)
            .with_context(|| format!("Failed to scan from {:?}", entity))?;

        if let Some(mut cloud) = cloud {
            cloud.points.clear();
            scanner.construct_point_cloud(&mut cloud);
        }
    }

    Ok(hits)
}

/// Entity of the first camera flagged as main
pub fn main_camera(world: &mut World) -> Option<Entity> {
    world
        .query::<(Entity, &RayTracerCamera)>()
        .iter(world)
        .find(|(_, camera)| camera.is_main_camera())
        .map(|(entity, _)| entity)
}

/// Release the camera's GPU resources and despawn its entity. Returns false
/// when the entity no longer exists.
pub fn despawn_ray_tracer_camera(world: &mut World, entity: Entity) -> Result<bool> {
    let raytracer = world
        .get_resource::<RayTracer>()
        .cloned()
        .context("RayTracer resource is missing")?;

    let Ok(mut entity_mut) = world.get_entity_mut(entity) else {
        log::warn!("Cannot despawn missing camera entity {:?}", entity);
        return Ok(false);
    };

    if let Some(mut camera) = entity_mut.take::<RayTracerCamera>() {
        camera.destroy(&*raytracer)?;
    }
    entity_mut.despawn();
    Ok(true)
}

/// Release every camera's GPU resources, keeping the components in place
pub fn destroy_cameras(world: &mut World) -> Result<()> {
    let Some(raytracer) = world.get_resource::<RayTracer>().cloned() else {
        return Ok(());
    };

    let mut query = world.query::<(Entity, &mut RayTracerCamera)>();
    for (entity, mut camera) in query.iter_mut(world) {
        camera
            .destroy(&*raytracer)
            .with_context(|| format!("Failed to destroy camera {:?}", entity))?;
    }
    Ok(())
}
