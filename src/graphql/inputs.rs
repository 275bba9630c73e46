//! Input types and argument sets derived from one entity.
//!
//! Every type is memoized by name in the [`WeaverContext`], so building the
//! same entity's inputs from several resolvers (or across relation cycles)
//! yields one registered type.

use std::sync::Arc;

use async_graphql::dynamic::{Enum, InputObject, InputValue, Object, TypeRef};

use super::context::{ArgumentSet, WeaverContext};
use super::error::{WeaveResult, schema_error};
use super::resolvers::column_field;
use super::types::{TypeMapper, TypeUsage, enum_type_name, unwrap_type};
use crate::db::ConflictClauseShape;
use crate::graphql::orm::{
    EntityDescriptor, EntityRegistry, Operation, PropertyDescriptor, PropertyKind, entity::pascal,
};

pub const ORDER_DIRECTION: &str = "OrderDirection";
pub const MUTATION_SUCCESS_RESULT: &str = "MutationSuccessResult";

/// Operators every column filter accepts.
const COMPARISON_OPERATORS: [&str; 6] = ["eq", "ne", "lt", "lte", "gt", "gte"];
/// Operators added for string columns.
pub const LIKE_OPERATORS: [&str; 4] = ["like", "notLike", "ilike", "notIlike"];

pub struct InputFactory<'a> {
    entity: &'a EntityDescriptor,
    registry: &'a EntityRegistry,
}

impl<'a> InputFactory<'a> {
    pub fn new(entity: &'a EntityDescriptor, registry: &'a EntityRegistry) -> Self {
        Self { entity, registry }
    }

    fn name(&self, suffix: &str) -> String {
        self.entity.type_name(suffix)
    }

    fn visible(&self, ctx: &WeaverContext, op: Operation) -> Vec<&'a PropertyDescriptor> {
        self.entity
            .properties
            .iter()
            .filter(|p| ctx.config().is_visible(&self.entity.name, &p.name, op))
            .collect()
    }

    fn filterable(&self, ctx: &WeaverContext) -> Vec<&'a PropertyDescriptor> {
        self.visible(ctx, Operation::Filters)
            .into_iter()
            .filter(|p| p.kind.is_filterable())
            .collect()
    }

    /// Whether an input for `op` would have at least one field.
    pub fn writable(&self, ctx: &WeaverContext, op: Operation) -> bool {
        !self.visible(ctx, op).is_empty()
    }

    // ========================================================================
    // Filters
    // ========================================================================

    /// `<E>Filters`: one column filter per visible column plus `OR`, `AND`, `NOT`.
    pub fn filters(&self, ctx: &mut WeaverContext) -> WeaveResult<TypeRef> {
        let name = self.name("Filters");
        ctx.memo_with(name.clone(), |ctx| {
            let mut filters = InputObject::new(&name);
            for property in self.filterable(ctx) {
                let ty = column_filters(ctx, self.entity, property)?;
                filters = filters.field(InputValue::new(&property.name, ty));
            }
            if !self.filterable(ctx).is_empty() {
                let or = self.filters_or(ctx)?;
                filters = filters.field(InputValue::new("OR", TypeRef::named_nn_list(unwrap_type(&or))));
            }
            Ok(filters
                .field(InputValue::new("AND", TypeRef::named_nn_list(&name)))
                .field(InputValue::new("NOT", TypeRef::named(&name))))
        })
    }

    /// `<E>FiltersOr`: the column fields of `<E>Filters` without logical keys.
    pub fn filters_or(&self, ctx: &mut WeaverContext) -> WeaveResult<TypeRef> {
        let name = self.name("FiltersOr");
        ctx.memo_with(name.clone(), |ctx| {
            let mut filters = InputObject::new(&name);
            for property in self.filterable(ctx) {
                let ty = column_filters(ctx, self.entity, property)?;
                filters = filters.field(InputValue::new(&property.name, ty));
            }
            Ok(filters)
        })
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    /// `<E>OrderBy`: one `OrderDirection` field per orderable column.
    pub fn order_by(&self, ctx: &mut WeaverContext) -> WeaveResult<TypeRef> {
        let name = self.name("OrderBy");
        let direction = order_direction(ctx)?;
        ctx.memo_with(name.clone(), |_| {
            let columns: Vec<_> = self
                .entity
                .properties
                .iter()
                .filter(|p| p.kind.is_orderable())
                .collect();
            if columns.is_empty() {
                return Err(schema_error(format!(
                    "Table `{}` has no orderable columns",
                    self.entity.name
                )));
            }
            Ok(columns.into_iter().fold(InputObject::new(&name), |obj, p| {
                obj.field(InputValue::new(&p.name, direction.clone()))
            }))
        })
    }

    // ========================================================================
    // Insert / update
    // ========================================================================

    /// `<E>InsertInput`: required only when not nullable and without default.
    pub fn insert_input(&self, ctx: &mut WeaverContext) -> WeaveResult<TypeRef> {
        self.write_input(ctx, "InsertInput", Operation::Insert, TypeUsage::Insert)
    }

    /// `<E>UpdateInput`: every field optional.
    pub fn update_input(&self, ctx: &mut WeaverContext) -> WeaveResult<TypeRef> {
        self.write_input(ctx, "UpdateInput", Operation::Update, TypeUsage::Update)
    }

    fn write_input(
        &self,
        ctx: &mut WeaverContext,
        suffix: &str,
        op: Operation,
        usage: TypeUsage,
    ) -> WeaveResult<TypeRef> {
        let name = self.name(suffix);
        ctx.memo_with(name.clone(), |ctx| {
            let columns = self.visible(ctx, op);
            if columns.is_empty() {
                return Err(schema_error(format!(
                    "`{name}` has no visible columns"
                )));
            }
            let mut input = InputObject::new(&name);
            for property in columns {
                if let PropertyKind::Object { entity: target } = property.kind.leaf() {
                    let target = self.registry.get(target)?;
                    InputFactory::new(&target, self.registry).insert_input(ctx)?;
                }
                let ty = TypeMapper::field_type(ctx, self.entity, property, usage)?;
                input = input.field(InputValue::new(&property.name, ty));
            }
            Ok(input)
        })
    }

    // ========================================================================
    // Conflict handling
    // ========================================================================

    /// `<E>Columns`: column names usable as a conflict target.
    pub fn columns_enum(&self, ctx: &mut WeaverContext) -> WeaveResult<TypeRef> {
        let name = self.name("Columns");
        ctx.memo_with(name.clone(), |_| {
            Ok(self
                .entity
                .properties
                .iter()
                .fold(Enum::new(&name), |e, p| e.item(p.name.as_str())))
        })
    }

    /// `<E>OnConflictDoNothing { target }`
    pub fn on_conflict_do_nothing(&self, ctx: &mut WeaverContext) -> WeaveResult<TypeRef> {
        let name = self.name("OnConflictDoNothing");
        let columns = self.columns_enum(ctx)?;
        ctx.memo_with(name.clone(), |_| {
            Ok(InputObject::new(&name).field(InputValue::new(
                "target",
                TypeRef::named_nn_list(unwrap_type(&columns)),
            )))
        })
    }

    /// `<E>OnConflictDoUpdate { target, set, where }`
    pub fn on_conflict_do_update(&self, ctx: &mut WeaverContext) -> WeaveResult<TypeRef> {
        let name = self.name("OnConflictDoUpdate");
        let columns = self.columns_enum(ctx)?;
        let set = self.update_input(ctx)?;
        let filters = self.filters(ctx)?;
        ctx.memo_with(name.clone(), |_| {
            Ok(InputObject::new(&name)
                .field(InputValue::new(
                    "target",
                    TypeRef::named_nn_list_nn(unwrap_type(&columns)),
                ))
                .field(InputValue::new("set", TypeRef::named_nn(unwrap_type(&set))))
                .field(InputValue::new("where", filters)))
        })
    }

    /// Conflict arguments in the shape the backend family accepts.
    fn conflict_arguments(&self, ctx: &mut WeaverContext, set: ArgumentSet) -> WeaveResult<ArgumentSet> {
        Ok(match ctx.capability().conflict_clause {
            ConflictClauseShape::None => set,
            ConflictClauseShape::Targeted => {
                let nothing = self.on_conflict_do_nothing(ctx)?;
                let update = if self.writable(ctx, Operation::Update) {
                    Some(self.on_conflict_do_update(ctx)?)
                } else {
                    None
                };
                let set = set.argument("onConflictDoNothing", nothing);
                match update {
                    Some(update) => set.argument("onConflictDoUpdate", update),
                    None => set,
                }
            }
            ConflictClauseShape::DuplicateKeyUpdate => {
                if self.writable(ctx, Operation::Update) {
                    let update = self.update_input(ctx)?;
                    set.argument("onDuplicateKeyUpdate", update)
                } else {
                    set
                }
            }
        })
    }

    // ========================================================================
    // Argument sets
    // ========================================================================

    /// `{where, orderBy, limit, offset}`
    pub fn select_array_args(&self, ctx: &mut WeaverContext) -> WeaveResult<Arc<ArgumentSet>> {
        let name = self.name("SelectArrayArgs");
        ctx.memo_args(name.clone(), |ctx| {
            let filters = self.filters(ctx)?;
            let order_by = self.order_by(ctx)?;
            Ok(ArgumentSet::new(name)
                .argument("where", filters)
                .argument("orderBy", TypeRef::named_nn_list(unwrap_type(&order_by)))
                .argument("limit", TypeRef::named(TypeRef::INT))
                .argument("offset", TypeRef::named(TypeRef::INT)))
        })
    }

    /// `{where, orderBy, offset}`
    pub fn select_single_args(&self, ctx: &mut WeaverContext) -> WeaveResult<Arc<ArgumentSet>> {
        let name = self.name("SelectSingleArgs");
        ctx.memo_args(name.clone(), |ctx| {
            let filters = self.filters(ctx)?;
            let order_by = self.order_by(ctx)?;
            Ok(ArgumentSet::new(name)
                .argument("where", filters)
                .argument("orderBy", TypeRef::named_nn_list(unwrap_type(&order_by)))
                .argument("offset", TypeRef::named(TypeRef::INT)))
        })
    }

    /// `{where}`
    pub fn count_args(&self, ctx: &mut WeaverContext) -> WeaveResult<Arc<ArgumentSet>> {
        self.where_only(ctx, "CountArgs")
    }

    /// `{where}`
    pub fn delete_args(&self, ctx: &mut WeaverContext) -> WeaveResult<Arc<ArgumentSet>> {
        self.where_only(ctx, "DeleteArgs")
    }

    /// Arguments of a to-one relation field: `{where}`.
    pub fn relation_single_args(&self, ctx: &mut WeaverContext) -> WeaveResult<Arc<ArgumentSet>> {
        self.where_only(ctx, "RelationSingleArgs")
    }

    fn where_only(&self, ctx: &mut WeaverContext, suffix: &str) -> WeaveResult<Arc<ArgumentSet>> {
        let name = self.name(suffix);
        ctx.memo_args(name.clone(), |ctx| {
            let filters = self.filters(ctx)?;
            Ok(ArgumentSet::new(name).argument("where", filters))
        })
    }

    /// `{values: [<E>InsertInput!]!, ..conflict}`
    pub fn insert_array_args(&self, ctx: &mut WeaverContext) -> WeaveResult<Arc<ArgumentSet>> {
        let name = self.name("InsertArrayArgs");
        ctx.memo_args(name.clone(), |ctx| {
            let input = self.insert_input(ctx)?;
            let set = ArgumentSet::new(name)
                .argument("values", TypeRef::named_nn_list_nn(unwrap_type(&input)));
            self.conflict_arguments(ctx, set)
        })
    }

    /// `{values: <E>InsertInput!, ..conflict}`
    pub fn insert_single_args(&self, ctx: &mut WeaverContext) -> WeaveResult<Arc<ArgumentSet>> {
        let name = self.name("InsertSingleArgs");
        ctx.memo_args(name.clone(), |ctx| {
            let input = self.insert_input(ctx)?;
            let set = ArgumentSet::new(name)
                .argument("values", TypeRef::named_nn(unwrap_type(&input)));
            self.conflict_arguments(ctx, set)
        })
    }

    /// `{set: <E>UpdateInput!, where}`
    pub fn update_args(&self, ctx: &mut WeaverContext) -> WeaveResult<Arc<ArgumentSet>> {
        let name = self.name("UpdateArgs");
        ctx.memo_args(name.clone(), |ctx| {
            let input = self.update_input(ctx)?;
            let filters = self.filters(ctx)?;
            Ok(ArgumentSet::new(name)
                .argument("set", TypeRef::named_nn(unwrap_type(&input)))
                .argument("where", filters))
        })
    }
}

// ============================================================================
// Shared types
// ============================================================================

/// `enum OrderDirection { asc desc }`
pub fn order_direction(ctx: &mut WeaverContext) -> WeaveResult<TypeRef> {
    ctx.memo_with(ORDER_DIRECTION, |_| {
        Ok(Enum::new(ORDER_DIRECTION).item("asc").item("desc"))
    })
}

/// `type MutationSuccessResult { isSuccess: Boolean! }`
pub fn mutation_success_result(ctx: &mut WeaverContext) -> WeaveResult<TypeRef> {
    ctx.memo_with(MUTATION_SUCCESS_RESULT, |_| {
        Ok(Object::new(MUTATION_SUCCESS_RESULT).field(column_field(
            "isSuccess",
            TypeRef::named_nn(TypeRef::BOOLEAN),
        )))
    })
}

/// Prefix of the shared operator types for `property`: the storage column
/// type, the enum name for enums, the overriding type name when a custom or
/// preset type applies.
pub fn column_filter_prefix(
    ctx: &WeaverContext,
    entity: &EntityDescriptor,
    property: &PropertyDescriptor,
) -> String {
    if let Some(ty) = TypeMapper::override_type(ctx, entity, property, TypeUsage::Filter) {
        return pascal(&sanitize(&ty.to_string()));
    }
    match property.kind.leaf() {
        PropertyKind::Enum { name, .. } => {
            let base = enum_type_name(entity, property, name.as_deref());
            match property.kind {
                PropertyKind::Array(_) => format!("{base}Array"),
                _ => base,
            }
        }
        _ => pascal(&sanitize(&property.column_type)),
    }
}

fn sanitize(name: &str) -> String {
    name.replace("[]", "_array")
        .replace('!', "")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// `<ColumnType>Filters` (and its `<ColumnType>FiltersOr`), shared by every
/// column with the same storage type.
pub fn column_filters(
    ctx: &mut WeaverContext,
    entity: &EntityDescriptor,
    property: &PropertyDescriptor,
) -> WeaveResult<TypeRef> {
    let prefix = column_filter_prefix(ctx, entity, property);
    let operand = TypeMapper::field_type(ctx, entity, property, TypeUsage::Filter)?;
    let with_like = matches!(property.kind, PropertyKind::String);

    let or_name = format!("{prefix}FiltersOr");
    let or_operand = operand.clone();
    ctx.memo_with(or_name.clone(), |_| {
        Ok(operator_fields(InputObject::new(&or_name), &or_operand, with_like))
    })?;

    let name = format!("{prefix}Filters");
    ctx.memo_with(name.clone(), |_| {
        Ok(operator_fields(InputObject::new(&name), &operand, with_like)
            .field(InputValue::new("OR", TypeRef::named_nn_list(&or_name))))
    })
}

fn operator_fields(mut input: InputObject, operand: &TypeRef, with_like: bool) -> InputObject {
    for op in COMPARISON_OPERATORS {
        input = input.field(InputValue::new(op, operand.clone()));
    }
    if with_like {
        for op in LIKE_OPERATORS {
            input = input.field(InputValue::new(op, TypeRef::named(TypeRef::STRING)));
        }
    }
    let list = TypeRef::List(Box::new(TypeRef::NonNull(Box::new(operand.clone()))));
    input
        .field(InputValue::new("inArray", list.clone()))
        .field(InputValue::new("notInArray", list))
        .field(InputValue::new("isNull", TypeRef::named(TypeRef::BOOLEAN)))
        .field(InputValue::new("isNotNull", TypeRef::named(TypeRef::BOOLEAN)))
}
