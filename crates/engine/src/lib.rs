pub use bevy_ecs::world::World;

pub type Result<T> = anyhow::Result<T>;

pub mod components;
pub mod error;
pub mod layers;
pub mod prelude;
pub mod raytracer;

/// A unit of per-frame work driven against the shared `World`
pub trait Layer: 'static {
    fn frame(&mut self, world: &mut World) -> Result<()>;

    /// Release everything the layer owns. Called once before shutdown.
    fn detach(&mut self, world: &mut World) -> Result<()>;
}

/// Runs a stack of layers in insertion order
pub struct Application {
    world: World,
    layers: Vec<Box<dyn Layer>>,
}

impl Application {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            layers: Vec::new(),
        }
    }

    pub fn add_layer<F>(mut self, factory_fn: F) -> Self
    where
        F: FnOnce(&mut World) -> Box<dyn Layer>,
    {
        let layer = factory_fn(&mut self.world);
        self.layers.push(layer);
        self
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn spawn<B: bevy_ecs::bundle::Bundle>(&mut self, bundle: B) -> bevy_ecs::entity::Entity {
        self.world.spawn(bundle).id()
    }

    pub fn frame(&mut self) -> Result<()> {
        for layer in &mut self.layers {
            layer.frame(&mut self.world)?;
        }

        self.world.clear_trackers();
        Ok(())
    }

    /// Detach every layer in reverse order, reporting the first failure
    pub fn shutdown(mut self) -> Result<()> {
        let mut first_error = None;
        for layer in self.layers.iter_mut().rev() {
            if let Err(e) = layer.detach(&mut self.world) {
                log::error!("Failed to detach layer: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}
