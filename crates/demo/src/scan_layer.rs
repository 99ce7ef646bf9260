use prism_engine::prelude::*;

/// Runs every scanner once, on the first frame after the scene is synced
pub struct ScanLayer {
    scanned: bool,
}

impl ScanLayer {
    pub fn new() -> Self {
        Self { scanned: false }
    }
}

impl Layer for ScanLayer {
    fn frame(&mut self, world: &mut World) -> Result<()> {
        if self.scanned {
            return Ok(());
        }

        let hits = run_scanners(world)?;
        let mut clouds = world.query::<&PointCloud>();
        for cloud in clouds.iter(world) {
            let Some(nearest) = cloud
                .points
                .iter()
                .map(|point| point.norm())
                .min_by(|a, b| a.total_cmp(b))
            else {
                continue;
            };
            log::info!(
                "Point cloud holds {} points, nearest {:.3} from the scanner",
                cloud.points.len(),
                nearest
            );
        }

        log::debug!("Scan finished with {} hits", hits);
        self.scanned = true;
        Ok(())
    }

    fn detach(&mut self, _world: &mut World) -> Result<()> {
        Ok(())
    }
}
