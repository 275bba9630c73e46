//! graphweave - GraphQL schemas woven from entity descriptions
//!
//! A [`Backend`](db::Backend) describes its entities; the [`graphql`] module
//! derives types, filters and CRUD resolvers from them and serves the result
//! through axum.

pub mod config;
pub mod db;
pub mod graphql;
