use crate::prelude::*;

#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Point3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Transform {
    pub fn from_position(position: Point3<f32>) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::new_translation(&self.position.coords)
            * self.rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&self.scale)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Point3::origin(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

/// World-space transform of an entity, derived from its `Transform`.
/// Cameras and scanners only ever read it.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct GlobalTransform(pub Matrix4<f32>);

impl GlobalTransform {
    pub fn position(&self) -> Point3<f32> {
        Point3::new(self.0[(0, 3)], self.0[(1, 3)], self.0[(2, 3)])
    }

    /// Rotation part with any scale divided out
    pub fn rotation(&self) -> UnitQuaternion<f32> {
        let mut basis: Matrix3<f32> = self.0.fixed_view::<3, 3>(0, 0).into_owned();
        for mut column in basis.column_iter_mut() {
            let length = column.norm();
            if length <= f32::EPSILON {
                return UnitQuaternion::identity();
            }
            column /= length;
        }
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(basis))
    }

    pub fn scale(&self) -> Vector3<f32> {
        let basis = self.0.fixed_view::<3, 3>(0, 0);
        Vector3::new(
            basis.column(0).norm(),
            basis.column(1).norm(),
            basis.column(2).norm(),
        )
    }
}

impl Default for GlobalTransform {
    fn default() -> Self {
        Self(Matrix4::identity())
    }
}

impl From<&Transform> for GlobalTransform {
    fn from(transform: &Transform) -> Self {
        Self(transform.to_matrix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_transform_decomposes() {
        let transform = Transform {
            position: Point3::new(1.0, -2.0, 3.0),
            rotation: UnitQuaternion::from_euler_angles(0.3, -0.7, 1.1),
            scale: Vector3::new(2.0, 0.5, 3.0),
        };
        let global = GlobalTransform::from(&transform);

        assert!((global.position() - transform.position).norm() < 1e-5);
        assert!(global.rotation().angle_to(&transform.rotation) < 1e-4);
        assert!((global.scale() - transform.scale).norm() < 1e-5);
    }

    #[test]
    fn test_degenerate_scale_falls_back_to_identity() {
        let transform = Transform {
            scale: Vector3::new(0.0, 1.0, 1.0),
            ..Default::default()
        };
        let global = GlobalTransform::from(&transform);
        assert_eq!(global.rotation(), UnitQuaternion::identity());
    }
}
