mod raytracer_layer;
mod raytracer_systems;

pub use raytracer_layer::*;
pub use raytracer_systems::*;
