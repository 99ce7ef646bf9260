use crate::prelude::*;

use rand::Rng;
use std::f32::consts::PI;

const HIT_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Default)]
pub struct HostScene {
    pub instances: Vec<SceneInstance>,
    pub lights: Vec<SceneLight>,
}

#[derive(Debug, Clone, Copy)]
pub struct Intersection {
    pub distance: f32,
    pub position: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub instance: usize,
}

/// What a single camera path contributes to each frame buffer
#[derive(Debug, Clone, Copy, Default)]
pub struct PathSample {
    pub color: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub albedo: Vector3<f32>,
    pub depth: f32,
}

/// Background lookup used when a path leaves the scene
pub struct Background<'a> {
    pub skybox: Option<&'a Cubemap>,
    pub color: Vector3<f32>,
    pub intensity: f32,
}

impl Background<'_> {
    fn radiance(&self, direction: &Vector3<f32>) -> Vector3<f32> {
        let base = match self.skybox {
            Some(cubemap) => cubemap.sample(direction),
            None => self.color,
        };
        base * self.intensity
    }
}

impl HostScene {
    /// Nearest sphere hit along the ray within `(HIT_EPSILON, max_distance)`
    pub fn intersect(
        &self,
        origin: &Vector3<f32>,
        direction: &Vector3<f32>,
        max_distance: f32,
    ) -> Option<Intersection> {
        let mut closest: Option<Intersection> = None;
        let mut limit = max_distance;

        for (index, instance) in self.instances.iter().enumerate() {
            let oc = origin - instance.center.coords;
            let a = direction.dot(direction);
            let half_b = oc.dot(direction);
            let c = oc.dot(&oc) - instance.radius * instance.radius;

            let discriminant = half_b * half_b - a * c;
            if discriminant < 0.0 {
                continue;
            }

            let sqrt_discriminant = discriminant.sqrt();
            let mut t = (-half_b - sqrt_discriminant) / a;
            if t <= HIT_EPSILON || t >= limit {
                // Origin inside the sphere, take the far root
                t = (-half_b + sqrt_discriminant) / a;
                if t <= HIT_EPSILON || t >= limit {
                    continue;
                }
            }

            let position = origin + direction * t;
            limit = t;
            closest = Some(Intersection {
                distance: t,
                position,
                normal: (position - instance.center.coords) / instance.radius,
                instance: index,
            });
        }

        closest
    }

    fn is_occluded(&self, origin: &Vector3<f32>, direction: &Vector3<f32>, distance: f32) -> bool {
        self.intersect(origin, direction, distance - HIT_EPSILON).is_some()
    }

    fn direct_light(&self, position: &Vector3<f32>, normal: &Vector3<f32>) -> Vector3<f32> {
        let mut radiance = Vector3::zeros();

        for light in &self.lights {
            let to_light = light.position.coords - position;
            let distance = to_light.norm();
            if distance <= HIT_EPSILON {
                continue;
            }

            let direction = to_light / distance;
            let cosine = normal.dot(&direction);
            if cosine <= 0.0 || self.is_occluded(position, &direction, distance) {
                continue;
            }

            radiance += light.color * (light.intensity * cosine / (distance * distance));
        }

        radiance
    }

    /// Trace one camera path. The first hit feeds the normal/albedo/depth
    /// outputs; the color is the radiance gathered over `bounces` scatters.
    pub fn trace_path<R: Rng>(
        &self,
        origin: Vector3<f32>,
        direction: Vector3<f32>,
        bounces: u32,
        max_distance: f32,
        background: &Background,
        rng: &mut R,
    ) -> PathSample {
        let mut sample = PathSample {
            depth: max_distance,
            ..Default::default()
        };
        let mut throughput = Vector3::repeat(1.0);
        let mut origin = origin;
        let mut direction = direction;

        for bounce in 0..=bounces {
            let Some(hit) = self.intersect(&origin, &direction, max_distance) else {
                sample.color += throughput.component_mul(&background.radiance(&direction));
                break;
            };

            let instance = &self.instances[hit.instance];
            if bounce == 0 {
                sample.normal = hit.normal;
                sample.albedo = instance.color;
                sample.depth = hit.distance;
            }

            throughput = throughput.component_mul(&instance.color);
            sample.color += throughput.component_mul(&self.direct_light(&hit.position, &hit.normal));

            direction = match instance.material {
                MaterialKind::Lambertian => {
                    let scattered = hit.normal + random_unit_vector(rng);
                    if scattered.norm_squared() < 1e-8 {
                        hit.normal
                    } else {
                        scattered.normalize()
                    }
                }
                MaterialKind::Metal => {
                    let reflected = direction - hit.normal * 2.0 * direction.dot(&hit.normal);
                    if reflected.dot(&hit.normal) <= 0.0 {
                        break;
                    }
                    reflected.normalize()
                }
            };
            origin = hit.position;
        }

        sample
    }

    /// Fill the hit fields of a point cloud sample
    pub fn sample_point(&self, sample: &mut PointCloudSample, max_distance: f32) {
        let direction = sample.direction.normalize();
        let Some(hit) = self.intersect(&sample.start, &direction, max_distance) else {
            sample.hit = false;
            return;
        };

        let instance = &self.instances[hit.instance];
        let tangent = orthogonal(&hit.normal);

        sample.hit = true;
        sample.handle = instance.handle;
        sample.hit_info = HitInfo {
            position: hit.position,
            normal: hit.normal,
            tangent,
            color: instance.color.push(1.0),
            tex_coord: spherical_uv(&hit.normal),
            data: Vector3::new(hit.distance, 0.0, 0.0),
            data2: Vector2::zeros(),
        };
    }
}

pub fn random_unit_vector<R: Rng>(rng: &mut R) -> Vector3<f32> {
    let z: f32 = rng.random_range(-1.0..1.0);
    let angle: f32 = rng.random_range(0.0..(2.0 * PI));
    let radius = (1.0 - z * z).max(0.0).sqrt();
    Vector3::new(radius * angle.cos(), radius * angle.sin(), z)
}

/// Uniform point on the unit disk
pub fn random_in_disk<R: Rng>(rng: &mut R) -> Vector2<f32> {
    let radius = rng.random::<f32>().sqrt();
    let angle: f32 = rng.random_range(0.0..(2.0 * PI));
    Vector2::new(radius * angle.cos(), radius * angle.sin())
}

fn orthogonal(normal: &Vector3<f32>) -> Vector3<f32> {
    let helper = if normal.x.abs() > 0.9 {
        Vector3::y()
    } else {
        Vector3::x()
    };
    normal.cross(&helper).normalize()
}

fn spherical_uv(normal: &Vector3<f32>) -> Vector2<f32> {
    let u = 0.5 + normal.z.atan2(normal.x) / (2.0 * PI);
    let v = 0.5 - normal.y.clamp(-1.0, 1.0).asin() / PI;
    Vector2::new(u, v)
}
