pub mod memory;
pub mod traits;

pub use memory::{MemoryDirectory, MemoryTreeMaps, StaticActor, StaticObjectTypeRegistry};
pub use traits::{
    ActorContext, CmsDirectory, CrossMap, ObjectTreeMaps, ObjectTypeRegistry, PluggableObject,
    TreeMap,
};
