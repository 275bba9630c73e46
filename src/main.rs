//! graphweave demo server
//!
//! Loads a schema document, seeds an in-memory backend and serves the woven
//! schema at /graphql.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use graphweave::config::{Config, SchemaDocument};
use graphweave::db::MemoryBackend;
use graphweave::graphql::{Weaver, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphweave=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting graphweave");

    let document = SchemaDocument::load(&config.schema_path)?;
    let backend = MemoryBackend::new(document.registry()).with_capability(config.capability);
    for (entity, rows) in document.seed_rows()? {
        let count = rows.len();
        backend
            .seed(&entity, rows)
            .with_context(|| format!("Failed to seed `{entity}`"))?;
        tracing::info!(entity = %entity, rows = count, "Seeded entity");
    }

    let schema = Weaver::new(Arc::new(backend))
        .with_config(document.weave_config(config.conflict_policy))
        .weave()?;

    let app = router(schema)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let ip = config.host.parse().context("Invalid HOST")?;
    let addr = SocketAddr::new(ip, config.port);
    tracing::info!("Listening on {}", addr);
    tracing::info!("GraphQL playground: http://localhost:{}/graphql", config.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
