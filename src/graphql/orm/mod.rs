//! Entity metadata consumed by the weaver.

pub mod entity;
pub mod registry;
pub mod visibility;

pub use entity::{
    Cardinality, EntityDef, EntityDescriptor, PropertyDescriptor, PropertyKind,
    RelationDescriptor,
};
pub use registry::EntityRegistry;
pub use visibility::{ColumnVisibility, OpSetting, Operation, PropertyVisibility, Visibility};
