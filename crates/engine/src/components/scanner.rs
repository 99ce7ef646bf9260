use crate::prelude::*;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Samples the scene by firing a rectangular grid of parallel rays.
///
/// The grid lies in the plane spanned by the owner's right and up axes and
/// fires along its front axis, turned by `rotate_angle` degrees around up.
/// Hits accumulate across scans until `clear` is called.
#[derive(Component, Debug, Clone, PartialEq)]
pub struct PointCloudScanner {
    pub rotate_angle: f32,
    /// Extent of the grid in world units
    pub size: Vector2<f32>,
    /// Spacing between neighbouring rays
    pub distance: Vector2<f32>,
    handles: Vec<u64>,
    points: Vec<Vector3<f32>>,
    point_colors: Vec<Vector3<f32>>,
}

impl Default for PointCloudScanner {
    fn default() -> Self {
        Self {
            rotate_angle: 0.0,
            size: Vector2::new(8.0, 4.0),
            distance: Vector2::new(0.02, 0.02),
            handles: Vec::new(),
            points: Vec::new(),
            point_colors: Vec::new(),
        }
    }
}

/// Column/row layout of one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanGrid {
    pub columns: u32,
    pub rows: u32,
    pub column_start: i32,
    pub row_start: i32,
}

impl ScanGrid {
    /// Non-positive or non-finite spacing gives an empty grid
    pub fn new(size: Vector2<f32>, distance: Vector2<f32>) -> Self {
        let count = |extent: f32, spacing: f32| -> u32 {
            if spacing > 0.0 && spacing.is_finite() {
                // Saturating cast floors and maps negatives to zero
                (extent / spacing) as u32
            } else {
                0
            }
        };
        let columns = count(size.x, distance.x);
        let rows = count(size.y, distance.y);

        Self {
            columns,
            rows,
            column_start: -((columns / 2) as i32),
            row_start: -((rows / 2) as i32),
        }
    }

    pub fn sample_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    /// Grid offset of sample `index`, in spacing units
    pub fn offset(&self, index: usize) -> Vector2<i32> {
        let rows = self.rows.max(1) as usize;
        let column_index = (index / rows) as i32;
        let row_index = (index % rows) as i32;
        Vector2::new(self.column_start + column_index, self.row_start + row_index)
    }
}

impl PointCloudScanner {
    /// Scanner covering `size` world units with rays `distance` apart
    pub fn new(size: Vector2<f32>, distance: Vector2<f32>) -> Self {
        Self {
            size,
            distance,
            ..Default::default()
        }
    }

    pub fn grid(&self) -> ScanGrid {
        ScanGrid::new(self.size, self.distance)
    }

    /// Fire one grid of rays from `transform` and keep every hit. Returns the
    /// number of new points.
    pub fn scan(
        &mut self,
        backend: &dyn RayTracingBackend,
        environment: &EnvironmentProperties,
        transform: &GlobalTransform,
    ) -> Result<usize> {
        let grid = self.grid();
        let total = grid.sample_count();
        if total == 0 {
            log::warn!(
                "Scanner grid {:?} with spacing {:?} is empty, nothing to scan",
                self.size,
                self.distance
            );
            return Ok(0);
        }

        let center = transform.position().coords;
        let rotation = transform.rotation();
        let front = rotation * -Vector3::z();
        let up = rotation * Vector3::y();
        let right = rotation * Vector3::x();

        let turn = UnitQuaternion::from_axis_angle(&Unit::new_normalize(up), self.rotate_angle.to_radians());
        let direction = (turn * front).normalize();
        let distance = self.distance;

        let mut samples = vec![PointCloudSample::default(); total];
        samples.par_iter_mut().enumerate().for_each(|(index, sample)| {
            let offset = grid.offset(index);
            let start = center
                + right * (offset.x as f32 * distance.x)
                + up * (offset.y as f32 * distance.y);
            *sample = PointCloudSample::new(start, direction);
        });

        backend
            .sample_point_cloud(environment, &mut samples)
            .context("Failed to sample point cloud")?;

        let before = self.points.len();
        for sample in samples.iter().filter(|sample| sample.hit) {
            self.points.push(sample.hit_info.position - center);
            self.point_colors.push(sample.hit_info.color.xyz());
            self.handles.push(sample.handle);
        }
        let hits = self.points.len() - before;

        log::info!(
            "Scanned {}x{} grid: {} of {} rays hit",
            grid.columns,
            grid.rows,
            hits,
            total
        );
        Ok(hits)
    }

    /// Append every collected point to `cloud`, in scan order
    pub fn construct_point_cloud(&self, cloud: &mut PointCloud) {
        cloud.points.extend_from_slice(&self.points);
    }

    pub fn clear(&mut self) {
        self.handles.clear();
        self.points.clear();
        self.point_colors.clear();
    }

    /// Hit positions relative to the scan origin
    pub fn points(&self) -> &[Vector3<f32>] {
        &self.points
    }

    pub fn point_colors(&self) -> &[Vector3<f32>] {
        &self.point_colors
    }

    pub fn handles(&self) -> &[u64] {
        &self.handles
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointCloudScannerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotate_angle: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<[f32; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<[f32; 2]>,
}

impl Serializable for PointCloudScanner {
    type Persisted = PointCloudScannerConfig;

    fn persist(&self) -> PointCloudScannerConfig {
        PointCloudScannerConfig {
            rotate_angle: Some(self.rotate_angle),
            size: Some([self.size.x, self.size.y]),
            distance: Some([self.distance.x, self.distance.y]),
        }
    }

    fn restore(&mut self, config: PointCloudScannerConfig) {
        if let Some(value) = config.rotate_angle {
            self.rotate_angle = value;
        }
        if let Some([x, y]) = config.size {
            self.size = Vector2::new(x, y);
        }
        if let Some([x, y]) = config.distance {
            self.distance = Vector2::new(x, y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raytracer::software::HostRayTracer;

    fn backend_with_sphere() -> HostRayTracer {
        let backend = HostRayTracer::new();
        backend.update_scene(
            vec![SceneInstance {
                handle: 99,
                center: Point3::new(0.0, 0.0, -5.0),
                radius: 1.0,
                color: Vector3::new(0.25, 0.5, 0.75),
                material: MaterialKind::Lambertian,
            }],
            Vec::new(),
        );
        backend
    }

    #[test]
    fn test_default_grid_dimensions() {
        let grid = PointCloudScanner::default().grid();

        assert_eq!(grid.columns, 400);
        assert_eq!(grid.rows, 200);
        assert_eq!(grid.sample_count(), 80_000);
        assert_eq!(grid.column_start, -200);
        assert_eq!(grid.row_start, -100);
    }

    #[test]
    fn test_grid_offsets_favour_negative_side() {
        let even = ScanGrid::new(Vector2::new(4.0, 1.0), Vector2::new(1.0, 1.0));
        let columns: Vec<i32> = (0..even.sample_count()).map(|i| even.offset(i).x).collect();
        assert_eq!(columns, vec![-2, -1, 0, 1]);

        let odd = ScanGrid::new(Vector2::new(1.0, 3.0), Vector2::new(1.0, 1.0));
        let rows: Vec<i32> = (0..odd.sample_count()).map(|i| odd.offset(i).y).collect();
        assert_eq!(rows, vec![-1, 0, 1]);
    }

    #[test]
    fn test_row_index_varies_fastest() {
        let grid = ScanGrid::new(Vector2::new(2.0, 2.0), Vector2::new(1.0, 1.0));
        assert_eq!(grid.offset(0), Vector2::new(-1, -1));
        assert_eq!(grid.offset(1), Vector2::new(-1, 0));
        assert_eq!(grid.offset(2), Vector2::new(0, -1));
        assert_eq!(grid.offset(3), Vector2::new(0, 0));
    }

    #[test]
    fn test_non_positive_spacing_is_empty() {
        assert_eq!(ScanGrid::new(Vector2::new(8.0, 4.0), Vector2::new(0.0, 0.02)).sample_count(), 0);
        assert_eq!(ScanGrid::new(Vector2::new(8.0, 4.0), Vector2::new(0.02, -1.0)).sample_count(), 0);

        let backend = backend_with_sphere();
        let mut scanner = PointCloudScanner {
            distance: Vector2::new(0.0, 0.0),
            ..Default::default()
        };
        let hits = scanner
            .scan(&backend, &EnvironmentProperties::default(), &GlobalTransform::default())
            .unwrap();
        assert_eq!(hits, 0);
        assert!(scanner.points().is_empty());
    }

    #[test]
    fn test_scan_keeps_only_hits() {
        let backend = backend_with_sphere();
        // 4x4 rays at offsets -1.5, -0.75, 0 and 0.75
        let mut scanner = PointCloudScanner::new(Vector2::new(3.0, 3.0), Vector2::new(0.75, 0.75));
        assert_eq!(scanner.rotate_angle, 0.0);
        assert!(scanner.points().is_empty());

        let hits = scanner
            .scan(&backend, &EnvironmentProperties::default(), &GlobalTransform::default())
            .unwrap();

        assert_eq!(hits, 5);
        assert!(hits < scanner.grid().sample_count());
        assert_eq!(scanner.points().len(), scanner.point_colors().len());
        assert_eq!(scanner.points().len(), scanner.handles().len());
        assert!(scanner.handles().iter().all(|&handle| handle == 99));
        assert!((scanner.point_colors()[0] - Vector3::new(0.25, 0.5, 0.75)).norm() < 1e-6);

        // The center ray meets the sphere head on
        let center = scanner
            .points()
            .iter()
            .find(|point| point.x.abs() < 1e-6 && point.y.abs() < 1e-6)
            .unwrap();
        assert!((center.z + 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_points_are_relative_to_scan_origin() {
        let backend = backend_with_sphere();
        let mut scanner = PointCloudScanner {
            size: Vector2::new(1.0, 1.0),
            distance: Vector2::new(1.0, 1.0),
            ..Default::default()
        };
        let transform = GlobalTransform::from(&Transform::from_position(Point3::new(0.0, 0.0, 2.0)));

        scanner
            .scan(&backend, &EnvironmentProperties::default(), &transform)
            .unwrap();

        assert_eq!(scanner.points().len(), 1);
        assert!((scanner.points()[0] - Vector3::new(0.0, 0.0, -6.0)).norm() < 1e-4);
    }

    #[test]
    fn test_rotate_angle_turns_rays_around_up() {
        let backend = backend_with_sphere();
        let mut scanner = PointCloudScanner {
            size: Vector2::new(1.0, 1.0),
            distance: Vector2::new(1.0, 1.0),
            rotate_angle: 90.0,
            ..Default::default()
        };

        // Front turned a quarter around +Y faces -X, away from the sphere
        let hits = scanner
            .scan(&backend, &EnvironmentProperties::default(), &GlobalTransform::default())
            .unwrap();
        assert_eq!(hits, 0);
    }

    #[test]
    fn test_empty_scene_misses_everything() {
        let backend = HostRayTracer::new();
        let mut scanner = PointCloudScanner {
            size: Vector2::new(2.0, 2.0),
            distance: Vector2::new(0.5, 0.5),
            ..Default::default()
        };

        let hits = scanner
            .scan(&backend, &EnvironmentProperties::default(), &GlobalTransform::default())
            .unwrap();
        assert_eq!(hits, 0);
    }

    #[test]
    fn test_scans_accumulate_and_construct_in_order() {
        let backend = backend_with_sphere();
        let mut scanner = PointCloudScanner {
            size: Vector2::new(3.0, 3.0),
            distance: Vector2::new(0.75, 0.75),
            ..Default::default()
        };
        let environment = EnvironmentProperties::default();

        scanner.scan(&backend, &environment, &GlobalTransform::default()).unwrap();
        scanner.scan(&backend, &environment, &GlobalTransform::default()).unwrap();
        assert_eq!(scanner.points().len(), 10);

        let mut cloud = PointCloud {
            points: vec![Vector3::repeat(7.0)],
        };
        scanner.construct_point_cloud(&mut cloud);
        assert_eq!(cloud.points.len(), 11);
        assert_eq!(&cloud.points[1..], scanner.points());

        scanner.clear();
        assert!(scanner.points().is_empty());
        assert!(scanner.point_colors().is_empty());
        assert!(scanner.handles().is_empty());
    }

    #[test]
    fn test_partial_config() {
        let mut scanner = PointCloudScanner::default();
        let config: PointCloudScannerConfig =
            serde_json::from_str(r#"{ "distance": [0.5, 0.25] }"#).unwrap();

        scanner.restore(config);
        assert_eq!(scanner.distance, Vector2::new(0.5, 0.25));
        assert_eq!(scanner.size, Vector2::new(8.0, 4.0));
        assert_eq!(scanner.rotate_angle, 0.0);
    }
}
