//! End-to-end tests for woven schemas
//!
//! Every test weaves the blog demo document over a seeded in-memory backend
//! and executes real GraphQL requests against it:
//! - Filtering, ordering and pagination
//! - Mutations per backend capability
//! - Batched relation loading
//! - Visibility and filter conflict policies

use std::sync::Arc;

use graphweave::config::{FilterConflictPolicy, SchemaDocument};
use graphweave::db::{BackendCall, BackendCapability, MemoryBackend, Predicate, Value};
use graphweave::graphql::{Weaver, WovenSchema};
use serde_json::json;

const BLOG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/blog.json");

fn document() -> SchemaDocument {
    SchemaDocument::load(BLOG).unwrap()
}

fn backend(capability: BackendCapability) -> Arc<MemoryBackend> {
    let doc = document();
    let backend = MemoryBackend::new(doc.registry()).with_capability(capability);
    for (entity, rows) in doc.seed_rows().unwrap() {
        backend.seed(&entity, rows).unwrap();
    }
    Arc::new(backend)
}

fn weave(backend: &Arc<MemoryBackend>, policy: FilterConflictPolicy) -> WovenSchema {
    Weaver::new(backend.clone())
        .with_config(document().weave_config(policy))
        .weave()
        .unwrap()
}

/// Execute `query`, assert it succeeded and return its data as JSON.
async fn run(schema: &WovenSchema, query: &str) -> serde_json::Value {
    let response = schema.execute(query).await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    response.data.into_json().unwrap()
}

/// Execute `query` and return its first error message.
async fn run_err(schema: &WovenSchema, query: &str) -> String {
    let response = schema.execute(query).await;
    assert!(!response.errors.is_empty(), "expected an error for {query}");
    response.errors[0].message.clone()
}

/// Body of the SDL block starting with `header`.
fn sdl_block(sdl: &str, header: &str) -> String {
    let start = sdl.find(header).unwrap_or_else(|| panic!("`{header}` not in SDL"));
    let rest = &sdl[start..];
    let end = rest.find('}').unwrap_or(rest.len());
    rest[..end].to_string()
}

// ============================================================================
// Queries
// ============================================================================

mod queries {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_filter_order_and_limit() {
        let schema = weave(&backend(BackendCapability::POSTGRES), FilterConflictPolicy::Combine);
        let data = run(
            &schema,
            r#"{ users(where: {name: {like: "T%"}}, orderBy: [{name: asc}], limit: 2) { name } }"#,
        )
        .await;
        assert_eq!(data, json!({"users": [{"name": "Taylor"}, {"name": "Tom"}]}));
    }

    #[tokio::test]
    async fn test_single_and_count() {
        let schema = weave(&backend(BackendCapability::POSTGRES), FilterConflictPolicy::Combine);
        let data = run(
            &schema,
            r#"{
                usersSingle(orderBy: [{id: desc}], offset: 1) { id role tags }
                usersCount(where: {role: {eq: member}})
            }"#,
        )
        .await;
        assert_eq!(
            data,
            json!({
                "usersSingle": {"id": 3, "role": "member", "tags": ["new"]},
                "usersCount": 3
            })
        );
    }

    #[tokio::test]
    async fn test_false_operands_are_ignored() {
        let schema = weave(&backend(BackendCapability::POSTGRES), FilterConflictPolicy::Combine);
        let data = run(
            &schema,
            r#"{
                notFalse: usersCount(where: {email: {isNull: false}})
                isNull: usersCount(where: {email: {isNull: true}})
            }"#,
        )
        .await;
        assert_eq!(data, json!({"notFalse": 4, "isNull": 1}));
    }

    #[tokio::test]
    async fn test_negative_limit_is_rejected() {
        let schema = weave(&backend(BackendCapability::POSTGRES), FilterConflictPolicy::Combine);
        let message = run_err(&schema, "{ users(limit: -1) { id } }").await;
        assert!(message.contains("limit"), "{message}");
    }
}

// ============================================================================
// Filter conflict policies
// ============================================================================

mod conflict_policy {
    use pretty_assertions::assert_eq;

    use super::*;

    const MIXED: &str = r#"{
        users(where: {role: {eq: member}, OR: [{name: {eq: "Ann"}}, {name: {eq: "Tom"}}]}) { name }
    }"#;

    #[tokio::test]
    async fn test_reject_mixed_filters() {
        let schema = weave(&backend(BackendCapability::POSTGRES), FilterConflictPolicy::Reject);
        let message = run_err(&schema, MIXED).await;
        assert_eq!(message, "Cannot specify both fields and 'OR' in filters!");
    }

    #[tokio::test]
    async fn test_combine_mixed_filters() {
        let schema = weave(&backend(BackendCapability::POSTGRES), FilterConflictPolicy::Combine);
        let data = run(&schema, MIXED).await;
        assert_eq!(data, json!({"users": [{"name": "Ann"}]}));
    }
}

// ============================================================================
// Mutations
// ============================================================================

mod mutations {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_insert_without_returning() {
        let backend = backend(BackendCapability::MYSQL);
        let schema = weave(&backend, FilterConflictPolicy::Combine);

        let data = run(
            &schema,
            r#"mutation { insertIntoUsers(values: [{name: "Tina"}]) { isSuccess } }"#,
        )
        .await;
        assert_eq!(data, json!({"insertIntoUsers": {"isSuccess": true}}));

        let data = run(&schema, r#"{ usersSingle(where: {name: {eq: "Tina"}}) { id role } }"#).await;
        assert_eq!(data, json!({"usersSingle": {"id": 5, "role": "member"}}));
        let data = run(&schema, r#"{ usersCount(where: {name: {eq: "Tina"}}) }"#).await;
        assert_eq!(data, json!({"usersCount": 1}));
    }

    #[tokio::test]
    async fn test_insert_returning_rows() {
        let schema = weave(&backend(BackendCapability::POSTGRES), FilterConflictPolicy::Combine);
        let data = run(
            &schema,
            r#"mutation {
                insertIntoUsers(values: [{name: "Zed", role: admin}, {name: "Yan"}]) { id name role }
            }"#,
        )
        .await;
        assert_eq!(
            data,
            json!({"insertIntoUsers": [
                {"id": 5, "name": "Zed", "role": "admin"},
                {"id": 6, "name": "Yan", "role": "member"}
            ]})
        );
    }

    #[tokio::test]
    async fn test_insert_conflicts() {
        let schema = weave(&backend(BackendCapability::POSTGRES), FilterConflictPolicy::Combine);

        let message = run_err(
            &schema,
            r#"mutation { insertIntoUsersSingle(values: {id: 1, name: "Dup"}) { id } }"#,
        )
        .await;
        assert!(message.contains("duplicate key"), "{message}");

        let data = run(
            &schema,
            r#"mutation {
                insertIntoUsers(values: [{id: 1, name: "Dup"}], onConflictDoNothing: {target: [id]}) { id }
            }"#,
        )
        .await;
        assert_eq!(data, json!({"insertIntoUsers": []}));

        let data = run(
            &schema,
            r#"mutation {
                insertIntoUsersSingle(
                    values: {id: 1, name: "Dup"},
                    onConflictDoUpdate: {target: [id], set: {name: "Thomas"}}
                ) { id name }
            }"#,
        )
        .await;
        assert_eq!(data, json!({"insertIntoUsersSingle": {"id": 1, "name": "Thomas"}}));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let backend = backend(BackendCapability::POSTGRES);
        let schema = weave(&backend, FilterConflictPolicy::Combine);

        let data = run(
            &schema,
            r#"mutation {
                updatePosts(set: {published: true}, where: {authorId: {eq: 1}}) { id published }
            }"#,
        )
        .await;
        assert_eq!(
            data,
            json!({"updatePosts": [{"id": 1, "published": true}, {"id": 2, "published": true}]})
        );

        let data = run(&schema, "mutation { deleteFromPosts(where: {id: {eq: 4}}) { title } }").await;
        assert_eq!(data, json!({"deleteFromPosts": [{"title": "Orphan"}]}));
        assert_eq!(backend.rows("posts").len(), 3);
    }
}

// ============================================================================
// Relations
// ============================================================================

mod relations {
    use pretty_assertions::assert_eq;

    use super::*;

    fn posts_lookups(calls: &[BackendCall]) -> Vec<&BackendCall> {
        calls
            .iter()
            .filter(|c| matches!(c, BackendCall::FindMany { entity, .. } if entity == "posts"))
            .collect()
    }

    #[tokio::test]
    async fn test_to_many_is_batched() {
        let backend = backend(BackendCapability::POSTGRES);
        let schema = weave(&backend, FilterConflictPolicy::Combine);

        let data = run(
            &schema,
            r#"{ users(where: {id: {inArray: [1, 2, 3]}}, orderBy: [{id: asc}]) {
                name
                posts(orderBy: [{id: asc}]) { title }
            } }"#,
        )
        .await;
        assert_eq!(
            data,
            json!({"users": [
                {"name": "Tom", "posts": [{"title": "Hello"}, {"title": "Again"}]},
                {"name": "Taylor", "posts": [{"title": "Notes"}]},
                {"name": "Ann", "posts": []}
            ]})
        );

        let calls = backend.take_calls();
        let lookups = posts_lookups(&calls);
        assert_eq!(lookups.len(), 1);
        let BackendCall::FindMany { query, .. } = lookups[0] else {
            unreachable!()
        };
        let Some(Predicate::InArray { column, values, .. }) = &query.filter else {
            panic!("unexpected filter {:?}", query.filter);
        };
        assert_eq!(column, "authorId");
        let mut ids: Vec<i64> = values
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => n.as_i64(),
                _ => None,
            })
            .collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_per_parent_pagination() {
        let schema = weave(&backend(BackendCapability::POSTGRES), FilterConflictPolicy::Combine);
        let data = run(
            &schema,
            r#"{ users(where: {id: {inArray: [1, 2]}}, orderBy: [{id: asc}]) {
                posts(orderBy: [{id: desc}], limit: 1) { title }
            } }"#,
        )
        .await;
        assert_eq!(
            data,
            json!({"users": [
                {"posts": [{"title": "Again"}]},
                {"posts": [{"title": "Notes"}]}
            ]})
        );
    }

    #[tokio::test]
    async fn test_to_one_with_null_key() {
        let backend = backend(BackendCapability::POSTGRES);
        let schema = weave(&backend, FilterConflictPolicy::Combine);

        let data = run(
            &schema,
            r#"{ posts(orderBy: [{id: asc}]) { title author { name } } }"#,
        )
        .await;
        assert_eq!(
            data,
            json!({"posts": [
                {"title": "Hello", "author": {"name": "Tom"}},
                {"title": "Again", "author": {"name": "Tom"}},
                {"title": "Notes", "author": {"name": "Taylor"}},
                {"title": "Orphan", "author": null}
            ]})
        );

        let user_lookups = backend
            .take_calls()
            .into_iter()
            .filter(|c| matches!(c, BackendCall::FindMany { entity, .. } if entity == "users"))
            .count();
        assert_eq!(user_lookups, 1);
    }

    #[tokio::test]
    async fn test_aliases_with_different_filters() {
        let schema = weave(&backend(BackendCapability::POSTGRES), FilterConflictPolicy::Combine);
        let data = run(
            &schema,
            r#"{ usersSingle(where: {id: {eq: 1}}) {
                published: posts(where: {published: {eq: true}}) { title }
                drafts: posts(where: {published: {ne: true}}) { title }
            } }"#,
        )
        .await;
        assert_eq!(
            data,
            json!({"usersSingle": {
                "published": [{"title": "Hello"}],
                "drafts": [{"title": "Again"}]
            }})
        );
    }

    #[tokio::test]
    async fn test_relation_needs_scope() {
        let schema = weave(&backend(BackendCapability::POSTGRES), FilterConflictPolicy::Combine);
        let response = schema
            .schema()
            .execute("{ users { posts { title } } }")
            .await;
        assert!(response.errors[0].message.contains("No relation scope"));
    }
}

// ============================================================================
// Schema shape
// ============================================================================

mod schema_shape {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_weave_is_deterministic() {
        let backend = backend(BackendCapability::POSTGRES);
        let a = weave(&backend, FilterConflictPolicy::Combine).sdl();
        let b = weave(&backend, FilterConflictPolicy::Combine).sdl();
        assert_eq!(a, b);
    }

    #[test]
    fn test_visibility_hides_columns() {
        let sdl = weave(&backend(BackendCapability::POSTGRES), FilterConflictPolicy::Combine).sdl();

        let filters = sdl_block(&sdl, "input UsersFilters {");
        assert!(filters.contains("email"));
        assert!(!filters.contains("password"));

        let update = sdl_block(&sdl, "input UsersUpdateInput {");
        assert!(!update.contains("password"));
        assert!(!update.contains("createdAt"));

        let insert = sdl_block(&sdl, "input UsersInsertInput {");
        assert!(insert.contains("password"));
        assert!(insert.contains("name: String!"));
        assert!(insert.contains("role: UserRole\n"));

        let item = sdl_block(&sdl, "type UsersItem {");
        assert!(item.contains("password"));
        assert!(item.contains("posts("));
    }

    #[test]
    fn test_mutation_shapes_follow_capability() {
        let sdl = weave(&backend(BackendCapability::MYSQL), FilterConflictPolicy::Combine).sdl();
        let mutation = sdl_block(&sdl, "type Mutation {");
        assert!(mutation.contains("onDuplicateKeyUpdate"));
        assert!(!mutation.contains("onConflictDoNothing"));
        assert!(mutation.contains("MutationSuccessResult!"));
    }

    #[test]
    fn test_unknown_entity() {
        let err = Weaver::new(backend(BackendCapability::POSTGRES))
            .only(["comments"])
            .weave()
            .err()
            .unwrap();
        assert!(err.to_string().starts_with("Table `comments` not found"));
    }
}
