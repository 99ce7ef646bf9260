pub use bevy_ecs::prelude::*;

pub use anyhow::Context;
pub use nalgebra::{
    Isometry3, Matrix3, Matrix4, Perspective3, Point3, Rotation3, Translation3, Unit,
    UnitQuaternion, Vector2, Vector3, Vector4,
};

pub use crate::Result;
pub use crate::components::*;
pub use crate::error::RaytracerError;
pub use crate::layers::raytracer::*;
pub use crate::raytracer::*;
pub use crate::Layer;
