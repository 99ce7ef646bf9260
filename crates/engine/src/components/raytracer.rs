use crate::prelude::*;

/// User-facing component for spawning spheres in the raytracer scene.
/// Position is taken from the GlobalTransform, its x scale is the radius.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub color: [f32; 3],
    pub material: MaterialKind,
}

impl Sphere {
    pub fn to_instance(&self, handle: u64, transform: &GlobalTransform) -> SceneInstance {
        SceneInstance {
            handle,
            center: transform.position(),
            radius: transform.scale().x,
            color: Vector3::from_row_slice(&self.color),
            material: self.material,
        }
    }
}

/// User-facing component for spawning lights in the raytracer scene.
/// Position is taken from the GlobalTransform.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub intensity: f32,
    pub color: [f32; 3],
}

impl Light {
    pub fn to_scene_light(&self, transform: &GlobalTransform) -> SceneLight {
        SceneLight {
            position: transform.position(),
            intensity: self.intensity,
            color: Vector3::from_row_slice(&self.color),
        }
    }
}

/// Points collected from one or more scanners
#[derive(Component, Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<Vector3<f32>>,
}
