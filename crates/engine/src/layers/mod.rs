pub mod raytracer;

pub use raytracer::RaytracerLayer;
