//! CRUD fields for one entity.
//!
//! A [`ResolverFactory`] turns an entity of the backend's registry into
//! dynamic GraphQL fields:
//!
//! | field                      | backend call  |
//! |----------------------------|---------------|
//! | `<camel>`                  | `find_many`   |
//! | `<camel>Single`            | `find_first`  |
//! | `<camel>Count`             | `count`       |
//! | `insertInto<Pascal>`       | `insert`      |
//! | `insertInto<Pascal>Single` | `insert`      |
//! | `update<Pascal>`           | `update`      |
//! | `deleteFrom<Pascal>`       | `delete`      |
//!
//! Mutation result shapes follow the backend capability: affected rows when
//! it supports returning, `MutationSuccessResult` otherwise.

use std::sync::Arc;

use async_graphql::dynamic::{Field, FieldFuture, FieldValue, Object, ResolverContext, TypeRef};
use async_graphql::{Name, Value};
use indexmap::IndexMap;
use tracing::debug;

use super::context::WeaverContext;
use super::error::{WeaveError, WeaveResult, invalid_argument, resolver_error};
use super::filters::{FilterCompiler, compile_pagination, normalize};
use super::inputs::{InputFactory, mutation_success_result};
use super::loaders::{KeyTuple, RelationGroup, RelationKey, RelationScope};
use super::types::{TypeMapper, TypeUsage, unwrap_type};
use crate::config::FilterConflictPolicy;
use crate::db::{
    Backend, FindFirst, FindMany, InsertRequest, MutationOutcome, OnConflict, Row, UpdateRequest,
};
use crate::graphql::orm::{EntityDescriptor, Operation, PropertyKind, RelationDescriptor};

pub struct ResolverFactory {
    backend: Arc<dyn Backend>,
    entity: Arc<EntityDescriptor>,
}

impl ResolverFactory {
    /// Factory for `entity`, which must be registered with the backend.
    pub fn new(backend: Arc<dyn Backend>, entity: &str) -> WeaveResult<Self> {
        let entity = backend.registry().get(entity)?;
        Ok(Self { backend, entity })
    }

    pub fn entity(&self) -> &EntityDescriptor {
        &self.entity
    }

    fn inputs(&self) -> InputFactory<'_> {
        InputFactory::new(&self.entity, self.backend.registry())
    }

    fn for_entity(&self, name: &str) -> WeaveResult<ResolverFactory> {
        Self::new(self.backend.clone(), name)
    }

    // ========================================================================
    // Output types
    // ========================================================================

    /// `<E>Item`: one field per property plus one per declared relation.
    pub fn item_type(&self, ctx: &mut WeaverContext) -> WeaveResult<TypeRef> {
        let name = self.entity.type_name("Item");
        ctx.memo_with(name.clone(), |ctx| {
            let mut object = Object::new(&name);
            for property in &self.entity.properties {
                if let PropertyKind::Object { entity: target } = property.kind.leaf() {
                    self.for_entity(target)?.item_type(ctx)?;
                }
                let ty = TypeMapper::field_type(ctx, &self.entity, property, TypeUsage::Output)?;
                object = object.field(property_field(&property.name, ty, Some(property.kind.clone())));
            }
            for relation in &self.entity.relations {
                object = object.field(self.relation_field(ctx, &relation.name)?);
            }
            Ok(object)
        })
    }

    /// Relation field `name`: `[<T>Item!]!` with `{where, orderBy, limit,
    /// offset}` for to-many, nullable `<T>Item` with `{where}` for to-one.
    pub fn relation_field(&self, ctx: &mut WeaverContext, name: &str) -> WeaveResult<Field> {
        let relation = self
            .entity
            .get_relation(name)
            .cloned()
            .ok_or_else(|| WeaveError::RelationNotFound {
                entity: self.entity.name.clone(),
                relation: name.to_string(),
            })?;
        if relation.source_columns.is_empty()
            || relation.source_columns.len() != relation.target_columns.len()
        {
            return Err(WeaveError::Schema(format!(
                "Relation `{}.{}` needs join columns of equal length on both sides",
                self.entity.name, relation.name
            )));
        }

        let target = self.for_entity(&relation.target)?;
        let item = target.item_type(ctx)?;
        let inputs = target.inputs();
        let (ty, args) = if relation.is_many() {
            (
                TypeRef::named_nn_list_nn(unwrap_type(&item)),
                inputs.select_array_args(ctx)?,
            )
        } else {
            (item, inputs.relation_single_args(ctx)?)
        };

        let resolver = RelationResolver {
            owner: self.entity.name.clone(),
            relation: Arc::new(relation),
            target: target.entity.clone(),
            policy: ctx.config().conflict_policy,
        };
        let field = Field::new(name, ty, move |rctx| {
            let resolver = resolver.clone();
            FieldFuture::new(async move { resolver.resolve(rctx).await })
        });
        Ok(args.apply(field))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// `<camel>(where, orderBy, limit, offset): [<E>Item!]!`
    pub fn select_array_query(&self, ctx: &mut WeaverContext) -> WeaveResult<Field> {
        let item = self.item_type(ctx)?;
        let args = self.inputs().select_array_args(ctx)?;
        let (entity, backend, policy) = self.captures(ctx);

        let field = Field::new(
            self.entity.camel_name(),
            TypeRef::named_nn_list_nn(unwrap_type(&item)),
            move |rctx| {
                let entity = entity.clone();
                let backend = backend.clone();
                FieldFuture::new(async move {
                    let args = rctx.args.as_index_map();
                    let compiler = FilterCompiler::new(&entity, policy);
                    let filter = compiler.compile(args.get("where"))?;
                    let order_by = compiler.compile_order_by(args.get("orderBy"));
                    let (limit, offset) = compile_pagination(args.get("limit"), args.get("offset"))?;

                    let rows = backend
                        .find_many(
                            &entity,
                            FindMany {
                                filter,
                                order_by,
                                limit,
                                offset,
                                columns: None,
                            },
                        )
                        .await?;
                    Ok(Some(rows_value(rows)))
                })
            },
        );
        Ok(args.apply(field))
    }

    /// `<camel>Single(where, orderBy, offset): <E>Item`
    pub fn select_single_query(&self, ctx: &mut WeaverContext) -> WeaveResult<Field> {
        let item = self.item_type(ctx)?;
        let args = self.inputs().select_single_args(ctx)?;
        let (entity, backend, policy) = self.captures(ctx);

        let field = Field::new(format!("{}Single", self.entity.camel_name()), item, move |rctx| {
            let entity = entity.clone();
            let backend = backend.clone();
            FieldFuture::new(async move {
                let args = rctx.args.as_index_map();
                let compiler = FilterCompiler::new(&entity, policy);
                let filter = compiler.compile(args.get("where"))?;
                let order_by = compiler.compile_order_by(args.get("orderBy"));
                let (_, offset) = compile_pagination(None, args.get("offset"))?;

                let row = backend
                    .find_first(
                        &entity,
                        FindFirst {
                            filter,
                            order_by,
                            offset,
                        },
                    )
                    .await?;
                Ok(row.map(FieldValue::owned_any))
            })
        });
        Ok(args.apply(field))
    }

    /// `<camel>Count(where): Int!`
    pub fn count_query(&self, ctx: &mut WeaverContext) -> WeaveResult<Field> {
        let args = self.inputs().count_args(ctx)?;
        let (entity, backend, policy) = self.captures(ctx);

        let field = Field::new(
            format!("{}Count", self.entity.camel_name()),
            TypeRef::named_nn(TypeRef::INT),
            move |rctx| {
                let entity = entity.clone();
                let backend = backend.clone();
                FieldFuture::new(async move {
                    let args = rctx.args.as_index_map();
                    let filter = FilterCompiler::new(&entity, policy).compile(args.get("where"))?;
                    let count = backend.count(&entity, filter).await?;
                    Ok(Some(FieldValue::value(Value::from(count))))
                })
            },
        );
        Ok(args.apply(field))
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Result type of a mutation returning many (`single == false`) or one row.
    fn mutation_result_type(&self, ctx: &mut WeaverContext, single: bool) -> WeaveResult<TypeRef> {
        if !ctx.capability().supports_returning {
            let success = mutation_success_result(ctx)?;
            return Ok(TypeRef::named_nn(unwrap_type(&success)));
        }
        let item = self.item_type(ctx)?;
        Ok(if single {
            item
        } else {
            TypeRef::named_nn_list_nn(unwrap_type(&item))
        })
    }

    /// `insertInto<Pascal>(values: [<E>InsertInput!]!, ..)`
    pub fn insert_array_mutation(&self, ctx: &mut WeaverContext) -> WeaveResult<Field> {
        self.insert_mutation(ctx, false)
    }

    /// `insertInto<Pascal>Single(values: <E>InsertInput!, ..)`
    pub fn insert_single_mutation(&self, ctx: &mut WeaverContext) -> WeaveResult<Field> {
        self.insert_mutation(ctx, true)
    }

    fn insert_mutation(&self, ctx: &mut WeaverContext, single: bool) -> WeaveResult<Field> {
        let ty = self.mutation_result_type(ctx, single)?;
        let args = if single {
            self.inputs().insert_single_args(ctx)?
        } else {
            self.inputs().insert_array_args(ctx)?
        };
        let (entity, backend, policy) = self.captures(ctx);
        let name = if single {
            format!("insertInto{}Single", self.entity.pascal_name())
        } else {
            format!("insertInto{}", self.entity.pascal_name())
        };

        let field = Field::new(name, ty, move |rctx| {
            let entity = entity.clone();
            let backend = backend.clone();
            FieldFuture::new(async move {
                let args = rctx.args.as_index_map();
                let values = match args.get("values") {
                    Some(Value::List(items)) => items
                        .iter()
                        .map(input_row)
                        .collect::<WeaveResult<Vec<_>>>()?,
                    Some(value) => vec![input_row(value)?],
                    None => return Err(invalid_argument("values", "is required").into()),
                };
                let on_conflict = on_conflict(&entity, policy, args)?;

                let outcome = backend
                    .insert(&entity, InsertRequest { values, on_conflict })
                    .await?;
                Ok(Some(outcome_value(outcome, single)))
            })
        });
        Ok(args.apply(field))
    }

    /// `update<Pascal>(set: <E>UpdateInput!, where)`
    pub fn update_mutation(&self, ctx: &mut WeaverContext) -> WeaveResult<Field> {
        let ty = self.mutation_result_type(ctx, false)?;
        let args = self.inputs().update_args(ctx)?;
        let (entity, backend, policy) = self.captures(ctx);

        let field = Field::new(
            format!("update{}", self.entity.pascal_name()),
            ty,
            move |rctx| {
                let entity = entity.clone();
                let backend = backend.clone();
                FieldFuture::new(async move {
                    let args = rctx.args.as_index_map();
                    let set = match args.get("set") {
                        Some(value) => input_row(value)?,
                        None => return Err(invalid_argument("set", "is required").into()),
                    };
                    if set.is_empty() {
                        return Err(invalid_argument("set", "must name at least one column").into());
                    }
                    let filter = FilterCompiler::new(&entity, policy).compile(args.get("where"))?;

                    let outcome = backend
                        .update(&entity, UpdateRequest { filter, set })
                        .await?;
                    Ok(Some(outcome_value(outcome, false)))
                })
            },
        );
        Ok(args.apply(field))
    }

    /// `deleteFrom<Pascal>(where)`
    pub fn delete_mutation(&self, ctx: &mut WeaverContext) -> WeaveResult<Field> {
        let ty = self.mutation_result_type(ctx, false)?;
        let args = self.inputs().delete_args(ctx)?;
        let (entity, backend, policy) = self.captures(ctx);

        let field = Field::new(
            format!("deleteFrom{}", self.entity.pascal_name()),
            ty,
            move |rctx| {
                let entity = entity.clone();
                let backend = backend.clone();
                FieldFuture::new(async move {
                    let args = rctx.args.as_index_map();
                    let filter = FilterCompiler::new(&entity, policy).compile(args.get("where"))?;
                    let outcome = backend.delete(&entity, filter).await?;
                    Ok(Some(outcome_value(outcome, false)))
                })
            },
        );
        Ok(args.apply(field))
    }

    // ========================================================================
    // Bundles
    // ========================================================================

    pub fn queries(&self, ctx: &mut WeaverContext) -> WeaveResult<Vec<Field>> {
        Ok(vec![
            self.select_array_query(ctx)?,
            self.select_single_query(ctx)?,
            self.count_query(ctx)?,
        ])
    }

    /// Mutations whose inputs have at least one visible column.
    pub fn mutations(&self, ctx: &mut WeaverContext) -> WeaveResult<Vec<Field>> {
        let mut fields = Vec::new();
        if self.inputs().writable(ctx, Operation::Insert) {
            fields.push(self.insert_array_mutation(ctx)?);
            fields.push(self.insert_single_mutation(ctx)?);
        }
        if self.inputs().writable(ctx, Operation::Update) {
            fields.push(self.update_mutation(ctx)?);
        }
        fields.push(self.delete_mutation(ctx)?);
        Ok(fields)
    }

    fn captures(
        &self,
        ctx: &WeaverContext,
    ) -> (Arc<EntityDescriptor>, Arc<dyn Backend>, FilterConflictPolicy) {
        (
            self.entity.clone(),
            self.backend.clone(),
            ctx.config().conflict_policy,
        )
    }
}

// ============================================================================
// Relation resolution
// ============================================================================

#[derive(Clone)]
struct RelationResolver {
    owner: String,
    relation: Arc<RelationDescriptor>,
    target: Arc<EntityDescriptor>,
    policy: FilterConflictPolicy,
}

impl RelationResolver {
    async fn resolve<'a>(&self, ctx: ResolverContext<'a>) -> async_graphql::Result<Option<FieldValue<'a>>> {
        let many = self.relation.is_many();
        let empty = || {
            if many {
                Some(FieldValue::list(Vec::<FieldValue>::new()))
            } else {
                None
            }
        };

        let scope = ctx.ctx.data::<Arc<RelationScope>>().map_err(|_| {
            resolver_error(format!(
                "No relation scope for `{}.{}`; execute requests through WovenSchema::execute",
                self.owner, self.relation.name
            ))
        })?;
        let parent = ctx.parent_value.try_downcast_ref::<Row>()?;

        // a parent whose join columns are null has nothing to join
        let Some(tuple) = KeyTuple::from_row(parent, &self.relation.source_columns) else {
            return Ok(empty());
        };

        let args = ctx.args.as_index_map();
        let compiler = FilterCompiler::new(&self.target, self.policy);
        let filter = compiler.compile(args.get("where"))?;
        let order_by = compiler.compile_order_by(args.get("orderBy"));
        let (limit, offset) = compile_pagination(args.get("limit"), args.get("offset"))?;

        let mut requested: Vec<String> = Vec::new();
        for field in ctx.ctx.field().selection_set() {
            let name = field.name();
            if self.target.get_property(name).is_some() && !requested.iter().any(|c| c == name) {
                requested.push(name.to_string());
            }
        }

        let group = RelationGroup::new(
            self.target.clone(),
            self.relation.target_columns.clone(),
            requested,
            &[
                ("where", args.get("where")),
                ("orderBy", args.get("orderBy")),
                ("limit", args.get("limit")),
                ("offset", args.get("offset")),
            ],
            filter,
            order_by,
        );
        let rows = scope
            .loader(&self.owner, &self.relation.name)
            .load_one(RelationKey {
                group: Arc::new(group),
                tuple,
            })
            .await?
            .unwrap_or_default();

        let rows = rows
            .into_iter()
            .skip(offset.unwrap_or(0) as usize)
            .take(limit.map_or(usize::MAX, |l| l as usize));
        Ok(if many {
            Some(FieldValue::list(rows.map(FieldValue::owned_any)))
        } else {
            rows.map(FieldValue::owned_any).next()
        })
    }
}

// ============================================================================
// Value plumbing
// ============================================================================

/// A field reading `name` from the parent [`Row`].
pub fn column_field(name: &str, ty: TypeRef) -> Field {
    property_field(name, ty, None)
}

/// A field reading `name` from the parent [`Row`], shaped by `kind`: enum
/// strings become enum values, nested objects become rows.
fn property_field(name: &str, ty: TypeRef, kind: Option<PropertyKind>) -> Field {
    let column = name.to_string();
    Field::new(name, ty, move |ctx| {
        let column = column.clone();
        let kind = kind.clone();
        FieldFuture::new(async move {
            let row = ctx.parent_value.try_downcast_ref::<Row>()?;
            let value = row.get(&column).cloned().unwrap_or(Value::Null);
            Ok(match kind {
                Some(kind) => output_value(value, &kind),
                None if value == Value::Null => None,
                None => Some(FieldValue::value(value)),
            })
        })
    })
}

fn output_value(value: Value, kind: &PropertyKind) -> Option<FieldValue<'static>> {
    match (value, kind) {
        (Value::Null, _) => None,
        (Value::String(s), PropertyKind::Enum { .. }) => {
            Some(FieldValue::value(Value::Enum(Name::new(s))))
        }
        (Value::Object(fields), PropertyKind::Object { .. }) => {
            let row: Row = fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
            Some(FieldValue::owned_any(row))
        }
        (Value::List(items), PropertyKind::Array(inner)) => Some(FieldValue::list(
            items
                .into_iter()
                .map(|item| output_value(item, inner).unwrap_or(FieldValue::NULL)),
        )),
        (value, _) => Some(FieldValue::value(value)),
    }
}

fn rows_value(rows: Vec<Row>) -> FieldValue<'static> {
    FieldValue::list(rows.into_iter().map(FieldValue::owned_any))
}

fn outcome_value(outcome: MutationOutcome, single: bool) -> FieldValue<'static> {
    match outcome {
        MutationOutcome::Success => {
            let row = Row::from([("isSuccess".to_string(), Value::Boolean(true))]);
            FieldValue::owned_any(row)
        }
        MutationOutcome::Rows(rows) if single => match rows.into_iter().next() {
            Some(row) => FieldValue::owned_any(row),
            None => FieldValue::NULL,
        },
        MutationOutcome::Rows(rows) => rows_value(rows),
    }
}

/// An input object as a backend row; enum literals become strings.
fn input_row(value: &Value) -> WeaveResult<Row> {
    match value {
        Value::Object(fields) => Ok(fields
            .iter()
            .map(|(k, v)| (k.to_string(), normalize(v)))
            .collect()),
        other => Err(invalid_argument("values", format!("expected an object, found {other}"))),
    }
}

fn column_names(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::List(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::Enum(name) => Some(name.to_string()),
                Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn object<'v>(value: Option<&'v Value>) -> Option<&'v IndexMap<Name, Value>> {
    match value {
        Some(Value::Object(fields)) => Some(fields),
        _ => None,
    }
}

/// Read the conflict arguments of an insert.
fn on_conflict(
    entity: &EntityDescriptor,
    policy: FilterConflictPolicy,
    args: &IndexMap<Name, Value>,
) -> WeaveResult<Option<OnConflict>> {
    let nothing = object(args.get("onConflictDoNothing"));
    let update = object(args.get("onConflictDoUpdate"));
    let duplicate = args.get("onDuplicateKeyUpdate").filter(|v| **v != Value::Null);

    match (nothing, update, duplicate) {
        (None, None, None) => Ok(None),
        (Some(nothing), None, None) => Ok(Some(OnConflict::DoNothing {
            target: column_names(nothing.get("target")),
        })),
        (None, Some(update), None) => {
            let set = match update.get("set") {
                Some(set) => input_row(set)?,
                None => return Err(invalid_argument("onConflictDoUpdate", "`set` is required")),
            };
            let filter = FilterCompiler::new(entity, policy).compile(update.get("where"))?;
            Ok(Some(OnConflict::DoUpdate {
                target: column_names(update.get("target")),
                set,
                filter,
            }))
        }
        (None, None, Some(set)) => Ok(Some(OnConflict::DoUpdate {
            target: Vec::new(),
            set: input_row(set)?,
            filter: None,
        })),
        _ => {
            debug!(entity = %entity.name, "Rejected insert with several conflict clauses");
            Err(invalid_argument(
                "onConflictDoNothing",
                "only one conflict clause may be given",
            ))
        }
    }
}
