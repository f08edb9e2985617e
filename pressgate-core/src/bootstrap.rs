//! Bootstrap helpers for embedding the engine
//!
//! Wires configuration, database pool, stores and the shared group context
//! together. The CMS collaborators (tree maps, type registry, directory,
//! actor) come from the embedding adapter.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::cms::{ActorContext, CmsDirectory, ObjectTreeMaps, ObjectTypeRegistry};
use crate::config::Config;
use crate::membership::{EngineOptions, GroupContext};
use crate::repository::{PgAssignmentStore, PgUserGroupStore};
use crate::service::{UserGroupAssignmentHandler, UserGroupHandler};

/// Open the Postgres pool described by `config.database`.
///
/// Migrations are the embedding binary's responsibility.
pub async fn init_database(config: &Config) -> Result<PgPool> {
    let db = &config.database;
    info!(url = %config.database_url(), "Opening database pool");

    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .min_connections(db.min_connections)
        .acquire_timeout(Duration::from_secs(db.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(db.idle_timeout_seconds))
        .connect(config.database_url())
        .await
        .inspect_err(|e| error!(error = %e, "Database connection failed"))
        .context("connecting to database")?;

    info!("Database pool ready");
    Ok(pool)
}

/// Build the shared group context over the Postgres stores.
pub fn init_context(
    pool: PgPool,
    config: &Config,
    object_types: Arc<dyn ObjectTypeRegistry>,
    tree_maps: Arc<dyn ObjectTreeMaps>,
    directory: Arc<dyn CmsDirectory>,
) -> Arc<GroupContext> {
    let options = EngineOptions::from(&config.engine);
    Arc::new(GroupContext::new(
        Arc::new(PgUserGroupStore::new(pool.clone())),
        Arc::new(PgAssignmentStore::new(pool)),
        object_types,
        tree_maps,
        directory,
        options,
    ))
}

/// Build the request-scoped services for one actor.
#[must_use]
pub fn init_request_services(
    ctx: Arc<GroupContext>,
    actor: Arc<dyn ActorContext>,
) -> (Arc<UserGroupHandler>, UserGroupAssignmentHandler) {
    let groups = Arc::new(UserGroupHandler::new(ctx, actor));
    let assignments = UserGroupAssignmentHandler::new(groups.clone());
    (groups, assignments)
}
