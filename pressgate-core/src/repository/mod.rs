// Persistence boundary.
//
// The engine is written against the two store traits; `postgres` holds the
// production sqlx implementation and `memory` a hermetic in-memory one used
// by tests and storeless embedders.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::models::{GroupId, GroupKey, ObjectAssignment, UserGroup};
use crate::Result;

/// Row-level access to the persisted groups table.
#[async_trait]
pub trait UserGroupStore: Send + Sync {
    /// Insert-or-update by id.
    async fn save(&self, group: &UserGroup) -> Result<()>;

    async fn fetch(&self, id: &GroupId) -> Result<Option<UserGroup>>;

    async fn fetch_all(&self) -> Result<Vec<UserGroup>>;

    /// Delete the group row only; assignment cascade is the caller's job.
    async fn delete(&self, id: &GroupId) -> Result<bool>;
}

/// Row-level access to the group-to-object assignment table.
#[async_trait]
pub trait ObjectAssignmentStore: Send + Sync {
    /// Insert-or-replace one assignment row (keyed by group, object type,
    /// object id).
    async fn upsert(&self, row: &ObjectAssignment) -> Result<()>;

    /// Rows of one group whose concrete *or* general type matches
    /// `object_type`. Includes default-type marker rows; callers filter.
    async fn fetch_by_type(
        &self,
        group: &GroupKey,
        object_type: &str,
    ) -> Result<Vec<ObjectAssignment>>;

    /// Every row of one group, across all object types.
    async fn fetch_for_group(&self, group: &GroupKey) -> Result<Vec<ObjectAssignment>>;

    /// Delete rows of one group matching `object_type` (concrete column, and
    /// the general column too unless `ignore_general_type`), optionally
    /// narrowed to a single object id. Returns the number of rows removed.
    async fn delete_object(
        &self,
        group: &GroupKey,
        object_type: &str,
        object_id: Option<&crate::models::ObjectId>,
        ignore_general_type: bool,
    ) -> Result<u64>;

    /// Cascade-delete every row of one group.
    async fn delete_group_rows(&self, group: &GroupKey) -> Result<u64>;

    /// Distinct dynamic group keys (`user`/`role` discriminators) present in
    /// the table.
    async fn dynamic_group_keys(&self) -> Result<Vec<GroupKey>>;
}

pub use memory::MemoryStore;
pub use postgres::{PgAssignmentStore, PgUserGroupStore};
