mod camera;
mod raytracer;
mod resources;
mod scanner;
mod transform;

use anyhow::Context;
use bevy_ecs::{component::Mutable, prelude::*};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

pub use camera::*;
pub use raytracer::*;
pub use resources::*;
pub use scanner::*;
pub use transform::*;

/// Create the serializer registry with every persistable component
pub fn create_component_serializers() -> ComponentSerializers {
    let mut serializers = ComponentSerializers::new();

    serializers.register::<RayTracerCamera>("RayTracerCamera");
    serializers.register::<PointCloudScanner>("PointCloudScanner");

    serializers
}

/// Components whose configuration survives a save/load cycle.
///
/// `restore` applies a possibly partial configuration: anything missing from
/// `persisted` keeps its current value.
pub trait Serializable {
    type Persisted: Serialize + DeserializeOwned;

    fn persist(&self) -> Self::Persisted;

    fn restore(&mut self, persisted: Self::Persisted);
}

type SerializeFn = Box<dyn Fn(&World, Entity) -> crate::Result<Option<Value>> + Send + Sync>;
type DeserializeFn = Box<dyn Fn(&mut World, Entity, Value) -> crate::Result<bool> + Send + Sync>;

struct Registration {
    name: &'static str,
    serialize: SerializeFn,
    deserialize: DeserializeFn,
}

/// Name-keyed registry that moves an entity's components to and from JSON
pub struct ComponentSerializers {
    registrations: Vec<Registration>,
}

impl ComponentSerializers {
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }

    /// Register a component type under `name`
    pub fn register<T>(&mut self, name: &'static str)
    where
        T: Component<Mutability = Mutable> + Serializable,
    {
        let serialize: SerializeFn = Box::new(|world, entity| {
            let Ok(entity_ref) = world.get_entity(entity) else {
                return Ok(None);
            };
            let Some(component) = entity_ref.get::<T>() else {
                return Ok(None);
            };
            Ok(Some(serde_json::to_value(component.persist())?))
        });

        let deserialize: DeserializeFn = Box::new(move |world, entity, value| {
            let Ok(mut entity_mut) = world.get_entity_mut(entity) else {
                return Ok(false);
            };
            let Some(mut component) = entity_mut.get_mut::<T>() else {
                return Ok(false);
            };
            let persisted: T::Persisted = serde_json::from_value(value)
                .with_context(|| format!("Failed to deserialize {}", name))?;
            component.restore(persisted);
            Ok(true)
        });

        self.registrations.push(Registration {
            name,
            serialize,
            deserialize,
        });
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.registrations.iter().map(|registration| registration.name)
    }

    /// Serialize every registered component the entity has, keyed by name
    pub fn serialize_entity(&self, world: &World, entity: Entity) -> crate::Result<Map<String, Value>> {
        let mut components = Map::new();
        for registration in &self.registrations {
            if let Some(value) = (registration.serialize)(world, entity)? {
                components.insert(registration.name.to_string(), value);
            }
        }
        Ok(components)
    }

    /// Restore the entity's components from `components`. Names that are not
    /// registered or components the entity lacks are skipped with a warning.
    pub fn deserialize_entity(
        &self,
        world: &mut World,
        entity: Entity,
        components: &Map<String, Value>,
    ) -> crate::Result<()> {
        for (name, value) in components {
            let Some(registration) = self
                .registrations
                .iter()
                .find(|registration| registration.name == name)
            else {
                log::warn!("No serializer registered for component {}", name);
                continue;
            };

            if !(registration.deserialize)(world, entity, value.clone())? {
                log::warn!("Entity {:?} has no {} to restore", entity, name);
            }
        }
        Ok(())
    }
}

impl Default for ComponentSerializers {
    fn default() -> Self {
        Self::new()
    }
}
