use crate::prelude::*;

use std::ops::Deref;
use std::sync::Arc;

/// Backend shared by every camera and scanner in the world
#[derive(Resource, Clone)]
pub struct RayTracer(pub Arc<dyn RayTracingBackend>);

impl Deref for RayTracer {
    type Target = dyn RayTracingBackend;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

/// Size of the surface the main camera presents to. When present, the
/// raytracer layer feeds it to the main camera's auto-resize each frame.
#[derive(Resource, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}
