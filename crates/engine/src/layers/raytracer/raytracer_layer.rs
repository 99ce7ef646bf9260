use crate::prelude::*;

use bevy_ecs::schedule::Schedule;
use std::sync::Arc;

/// Drives the ray tracing backend once per frame: transforms are propagated,
/// changed spheres and lights are uploaded, then every camera renders.
pub struct RaytracerLayer {
    schedule: Schedule,
}

impl RaytracerLayer {
    pub fn new(world: &mut World, backend: Arc<dyn RayTracingBackend>) -> Self {
        world.insert_resource(RayTracer(backend));
        world.init_resource::<EnvironmentProperties>();

        let mut schedule = Schedule::default();
        schedule.add_systems((propagate_global_transforms, sync_raytracer_scene).chain());

        Self { schedule }
    }
}

impl Layer for RaytracerLayer {
    fn frame(&mut self, world: &mut World) -> Result<()> {
        self.schedule.run(world);

        let rendered = render_cameras(world)?;
        log::trace!("Rendered {} cameras", rendered);
        Ok(())
    }

    fn detach(&mut self, world: &mut World) -> Result<()> {
        destroy_cameras(world)?;
        log::debug!("Raytracer layer detached");
        Ok(())
    }
}
