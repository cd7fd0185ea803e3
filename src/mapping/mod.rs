//! Namespacing and the resource index.

pub mod namespace;
pub mod records;
pub mod resource_maps;

pub use namespace::{enumerate_aliases, qualify_name, split_qualified, DEFAULT_SEPARATOR};
pub use records::{NamespacedPrompt, NamespacedRecord, NamespacedResource, NamespacedTool};
pub use resource_maps::{
    AddOptions, CategoryIndex, MapStatistics, MapsConfig, Registration, RemovalSummary,
    ResourceCategory, ResourceMaps,
};
