//! Maps entity properties to GraphQL types.

use async_graphql::dynamic::{Enum, TypeRef};

use super::context::WeaverContext;
use super::error::{WeaveError, WeaveResult};
use crate::graphql::orm::{EntityDescriptor, Operation, PropertyDescriptor, PropertyKind, entity::pascal};

/// Which side of the schema a type is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeUsage {
    /// `<E>Item` fields.
    Output,
    /// `<E>InsertInput` fields.
    Insert,
    /// `<E>UpdateInput` fields.
    Update,
    /// Operator fields of column filters.
    Filter,
}

impl TypeUsage {
    fn operation(self) -> Option<Operation> {
        match self {
            TypeUsage::Output => None,
            TypeUsage::Insert => Some(Operation::Insert),
            TypeUsage::Update => Some(Operation::Update),
            TypeUsage::Filter => Some(Operation::Filters),
        }
    }
}

pub struct TypeMapper;

impl TypeMapper {
    /// Field type for `property` in `usage`, including the outer non-null:
    /// output fields are non-null unless nullable, insert fields only when
    /// not nullable and without a default, update and filter fields never.
    /// A preset type is used exactly as the hook returns it.
    pub fn field_type(
        ctx: &mut WeaverContext,
        entity: &EntityDescriptor,
        property: &PropertyDescriptor,
        usage: TypeUsage,
    ) -> WeaveResult<TypeRef> {
        if Self::custom_type(ctx, entity, property, usage).is_none() {
            if let Some(ty) = Self::preset_type(ctx, entity, property) {
                return Ok(ty);
            }
        }
        let base = Self::map_type(ctx, entity, property, usage)?;
        let required = match usage {
            TypeUsage::Output => !property.nullable,
            TypeUsage::Insert => !property.nullable && !property.has_default,
            TypeUsage::Update | TypeUsage::Filter => false,
        };
        Ok(if required { non_null(base) } else { base })
    }

    /// Base type without the outer non-null.
    pub fn map_type(
        ctx: &mut WeaverContext,
        entity: &EntityDescriptor,
        property: &PropertyDescriptor,
        usage: TypeUsage,
    ) -> WeaveResult<TypeRef> {
        if let Some(ty) = Self::override_type(ctx, entity, property, usage) {
            return Ok(ty);
        }
        Self::map_kind(ctx, entity, property, &property.kind, usage)
    }

    /// A per-column custom type from the visibility config, then the preset
    /// hook. `None` when the built-in mapping applies.
    pub fn override_type(
        ctx: &WeaverContext,
        entity: &EntityDescriptor,
        property: &PropertyDescriptor,
        usage: TypeUsage,
    ) -> Option<TypeRef> {
        Self::custom_type(ctx, entity, property, usage)
            .or_else(|| Self::preset_type(ctx, entity, property).map(unwrap_non_null))
    }

    fn custom_type(
        ctx: &WeaverContext,
        entity: &EntityDescriptor,
        property: &PropertyDescriptor,
        usage: TypeUsage,
    ) -> Option<TypeRef> {
        let custom = ctx.config().custom_type(&entity.name, &property.name, usage.operation()?)?;
        Some(TypeRef::named(custom))
    }

    fn preset_type(
        ctx: &WeaverContext,
        entity: &EntityDescriptor,
        property: &PropertyDescriptor,
    ) -> Option<TypeRef> {
        let preset = ctx.config().preset_type.as_ref()?;
        preset(entity, property)
    }

    fn map_kind(
        ctx: &mut WeaverContext,
        entity: &EntityDescriptor,
        property: &PropertyDescriptor,
        kind: &PropertyKind,
        usage: TypeUsage,
    ) -> WeaveResult<TypeRef> {
        let ty = match kind {
            PropertyKind::String => TypeRef::named(TypeRef::STRING),
            PropertyKind::Integer => TypeRef::named(TypeRef::INT),
            PropertyKind::Float => TypeRef::named(TypeRef::FLOAT),
            PropertyKind::Boolean => TypeRef::named(TypeRef::BOOLEAN),
            PropertyKind::Date
            | PropertyKind::Time
            | PropertyKind::Timestamp
            | PropertyKind::Json
            | PropertyKind::Blob
            | PropertyKind::Interval => TypeRef::named(TypeRef::STRING),
            PropertyKind::Enum { name, values } => {
                let enum_name = enum_type_name(entity, property, name.as_deref());
                ctx.memo_with(enum_name.clone(), |_| {
                    Ok(values
                        .iter()
                        .fold(Enum::new(&enum_name), |e, value| e.item(value.as_str())))
                })?
            }
            PropertyKind::Array(inner) => {
                let inner = Self::map_kind(ctx, entity, property, inner, usage)?;
                TypeRef::List(Box::new(non_null(inner)))
            }
            PropertyKind::Object { entity: target } => match usage {
                TypeUsage::Output => TypeRef::named(format!("{}Item", pascal(target))),
                _ => TypeRef::named(format!("{}InsertInput", pascal(target))),
            },
            PropertyKind::Custom(type_name) | PropertyKind::Unsupported(type_name) => {
                return Err(WeaveError::UnsupportedType {
                    entity: entity.name.clone(),
                    property: property.name.clone(),
                    type_name: type_name.clone(),
                });
            }
        };
        Ok(ty)
    }
}

/// `<Pascal(declared)>` or `<PascalEntity><PascalProperty>Enum`.
pub fn enum_type_name(
    entity: &EntityDescriptor,
    property: &PropertyDescriptor,
    declared: Option<&str>,
) -> String {
    match declared {
        Some(name) => pascal(name),
        None => format!("{}{}Enum", entity.pascal_name(), pascal(&property.name)),
    }
}

pub fn non_null(ty: TypeRef) -> TypeRef {
    match ty {
        TypeRef::NonNull(_) => ty,
        other => TypeRef::NonNull(Box::new(other)),
    }
}

pub fn unwrap_non_null(ty: TypeRef) -> TypeRef {
    match ty {
        TypeRef::NonNull(inner) => *inner,
        other => other,
    }
}

/// Innermost named type of a reference.
pub fn unwrap_type(ty: &TypeRef) -> &str {
    match ty {
        TypeRef::Named(name) => name,
        TypeRef::NonNull(inner) | TypeRef::List(inner) => unwrap_type(inner),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::config::WeaveConfig;
    use crate::db::BackendCapability;
    use crate::graphql::orm::{ColumnVisibility, PropertyVisibility};

    fn context(config: WeaveConfig) -> WeaverContext {
        WeaverContext::new(config, BackendCapability::default())
    }

    fn users() -> EntityDescriptor {
        EntityDescriptor::new("users")
            .property(PropertyDescriptor::new("id", PropertyKind::Integer).primary_key().with_default())
            .property(PropertyDescriptor::new("name", PropertyKind::String).not_null())
            .property(PropertyDescriptor::new("age", PropertyKind::Integer))
            .property(
                PropertyDescriptor::new(
                    "role",
                    PropertyKind::Enum {
                        name: None,
                        values: vec!["admin".into(), "member".into()],
                    },
                )
                .not_null(),
            )
            .property(PropertyDescriptor::new(
                "tags",
                PropertyKind::Array(Box::new(PropertyKind::String)),
            ))
    }

    fn field(ctx: &mut WeaverContext, column: &str, usage: TypeUsage) -> String {
        let entity = users();
        let property = entity.get_property(column).unwrap().clone();
        TypeMapper::field_type(ctx, &entity, &property, usage)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_non_null_wrapping() {
        let mut ctx = context(WeaveConfig::default());
        // not null, no default
        assert_eq!(field(&mut ctx, "name", TypeUsage::Output), "String!");
        assert_eq!(field(&mut ctx, "name", TypeUsage::Insert), "String!");
        assert_eq!(field(&mut ctx, "name", TypeUsage::Update), "String");
        // not null with default
        assert_eq!(field(&mut ctx, "id", TypeUsage::Output), "Int!");
        assert_eq!(field(&mut ctx, "id", TypeUsage::Insert), "Int");
        assert_eq!(field(&mut ctx, "id", TypeUsage::Update), "Int");
        // nullable
        assert_eq!(field(&mut ctx, "age", TypeUsage::Output), "Int");
        assert_eq!(field(&mut ctx, "age", TypeUsage::Insert), "Int");
    }

    #[test]
    fn test_enum_and_array_mapping() {
        let mut ctx = context(WeaveConfig::default());
        assert_eq!(field(&mut ctx, "role", TypeUsage::Output), "UsersRoleEnum!");
        assert!(ctx.get_named_type("UsersRoleEnum").is_some());
        assert_eq!(field(&mut ctx, "tags", TypeUsage::Output), "[String!]");
    }

    #[test]
    fn test_declared_enum_name() {
        let entity = users();
        let property = entity.get_property("role").unwrap();
        assert_eq!(enum_type_name(&entity, property, Some("user_role")), "UserRole");
    }

    #[test]
    fn test_unsupported_type() {
        let mut ctx = context(WeaveConfig::default());
        let entity = EntityDescriptor::new("places");
        let property =
            PropertyDescriptor::new("shape", PropertyKind::from_column_type("geometry"));
        let err = TypeMapper::field_type(&mut ctx, &entity, &property, TypeUsage::Output)
            .unwrap_err();
        assert_matches!(err, WeaveError::UnsupportedType { type_name, .. } if type_name == "geometry");
    }

    #[test]
    fn test_preset_and_custom_types_win() {
        let config = WeaveConfig::default()
            .preset_type(|_, property| {
                (property.name == "shape").then(|| TypeRef::named_nn("GeoJson"))
            })
            .visibility(
                "places",
                serde_json::from_str::<PropertyVisibility>(r#"{"meta": {"insert": {"type": "JSON"}}}"#)
                    .unwrap()
                    .column("hidden", ColumnVisibility::All(false)),
            );
        let mut ctx = context(config);
        let entity = EntityDescriptor::new("places");
        let shape = PropertyDescriptor::new("shape", PropertyKind::Custom("geometry".into()));
        let meta = PropertyDescriptor::new("meta", PropertyKind::Json);

        let ty = TypeMapper::field_type(&mut ctx, &entity, &shape, TypeUsage::Output).unwrap();
        assert_eq!(ty.to_string(), "GeoJson!");
        let ty = TypeMapper::field_type(&mut ctx, &entity, &shape, TypeUsage::Update).unwrap();
        assert_eq!(ty.to_string(), "GeoJson!");
        let ty = TypeMapper::map_type(&mut ctx, &entity, &shape, TypeUsage::Output).unwrap();
        assert_eq!(ty.to_string(), "GeoJson");
        let ty = TypeMapper::field_type(&mut ctx, &entity, &meta, TypeUsage::Insert).unwrap();
        assert_eq!(ty.to_string(), "JSON");
        let ty = TypeMapper::field_type(&mut ctx, &entity, &meta, TypeUsage::Update).unwrap();
        assert_eq!(ty.to_string(), "String");
    }

    #[test]
    fn test_preset_keeps_its_nullability() {
        let config = WeaveConfig::default().preset_type(|_, property| {
            (property.kind == PropertyKind::Json).then(|| TypeRef::named("JSON"))
        });
        let mut ctx = context(config);
        let entity = EntityDescriptor::new("places");
        let meta = PropertyDescriptor::new("meta", PropertyKind::Json).not_null();

        for usage in [TypeUsage::Output, TypeUsage::Insert] {
            let ty = TypeMapper::field_type(&mut ctx, &entity, &meta, usage).unwrap();
            assert_eq!(ty.to_string(), "JSON");
        }
    }
}
