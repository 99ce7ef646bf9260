use prism_engine::{
    Application, Result, prelude::*, raytracer::software::HostRayTracer,
};
use std::sync::Arc;

mod scan_layer;

const FRAMES: usize = 8;

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_module("prism", log::LevelFilter::Debug)
        .filter_module("prism_engine", log::LevelFilter::Debug)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let output = args.get(1).map(String::as_str).unwrap_or("render.png");
    let config = args.get(2).map(|path| load_camera_config(path)).transpose()?;

    let backend = Arc::new(HostRayTracer::new());

    let mut app = Application::new()
        .add_layer(|world| Box::new(RaytracerLayer::new(world, backend.clone())))
        .add_layer(|_| Box::new(scan_layer::ScanLayer::new()));

    // Ground
    app.spawn((
        Transform {
            position: Point3::new(0.0, -100.5, -3.0),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::repeat(100.0),
        },
        Sphere {
            color: [0.5, 0.6, 0.3],
            material: MaterialKind::Lambertian,
        },
    ));

    app.spawn((
        Transform::from_position(Point3::new(-0.6, 0.0, -3.0)),
        Sphere {
            color: [0.8, 0.3, 0.3],
            material: MaterialKind::Lambertian,
        },
    ));

    app.spawn((
        Transform {
            position: Point3::new(0.9, -0.1, -3.5),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::repeat(0.4),
        },
        Sphere {
            color: [0.9, 0.9, 0.9],
            material: MaterialKind::Metal,
        },
    ));

    app.spawn((
        Transform::from_position(Point3::new(5.0, 10.0, 5.0)),
        Light {
            intensity: 150.0,
            color: [1.0, 1.0, 1.0],
        },
    ));

    let mut camera = RayTracerCamera::new(backend.as_ref())?;
    camera.set_frame_size(320, 180);
    camera.set_ray_properties(RayProperties {
        samples: 4,
        bounces: 4,
    });
    camera.set_denoiser_strength(0.5);
    if let Some(config) = config {
        camera.restore(config);
    }
    let camera = app.spawn((
        Transform::from_position(Point3::new(0.0, 0.3, 1.0)),
        camera,
    ));
    set_main_camera(app.world_mut(), camera, true);

    app.spawn((
        Transform::from_position(Point3::new(0.0, 0.0, 0.0)),
        PointCloudScanner::new(Vector2::new(3.0, 1.5), Vector2::new(0.05, 0.05)),
        PointCloud::default(),
    ));

    for _ in 0..FRAMES {
        app.frame()?;
    }

    let serializers = create_component_serializers();
    let settings = serializers.serialize_entity(app.world(), camera)?;
    log::info!("Camera settings: {}", serde_json::Value::Object(settings));

    let main = main_camera(app.world_mut()).context("No main camera in the scene")?;
    if let Some(camera) = app.world().get::<RayTracerCamera>(main) {
        if camera.rendered() {
            camera.save_frame(output)?;
        } else {
            log::warn!("Main camera never rendered, nothing to save");
        }
    }

    app.shutdown()
}

fn load_camera_config(path: &str) -> Result<RayTracerCameraConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read camera config {}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse camera config {}", path))
}
