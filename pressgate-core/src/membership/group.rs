use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{GroupContext, Membership};
use crate::models::{
    AssignmentInformation, DynamicUserGroup, GeneralObjectType, GroupId, GroupKey, ObjectAssignment,
    ObjectId, UserGroup,
};
use crate::{Error, Result};

/// What a member group wraps: a stored group row or a virtual dynamic one.
#[derive(Debug, Clone)]
pub enum GroupEntity {
    Persisted(UserGroup),
    Dynamic(DynamicUserGroup),
}

type DateWindow = (Option<DateTime<Utc>>, Option<DateTime<Utc>>);

/// A group with membership behavior attached.
///
/// Wraps either kind of group entity and answers every membership question
/// through the handler registry, memoizing per instance. Instances are
/// request-scoped: the service layer builds them once per request and throws
/// them away, so the caches never outlive one resolution pass.
pub struct MemberGroup {
    key: GroupKey,
    entity: RwLock<GroupEntity>,
    ctx: Arc<GroupContext>,

    /// When set, assignment date windows are not enforced. Flipping it
    /// drops the caches since every cached answer depends on it.
    ignore_dates: AtomicBool,

    assigned_cache: RwLock<HashMap<String, Arc<HashMap<ObjectId, AssignmentInformation>>>>,
    membership_cache: RwLock<HashMap<(String, ObjectId), Membership>>,
    full_objects_cache: RwLock<HashMap<String, Arc<HashMap<ObjectId, String>>>>,
    default_types_cache: RwLock<Option<Arc<HashMap<String, DateWindow>>>>,
}

impl MemberGroup {
    #[must_use]
    pub fn from_persisted(group: UserGroup, ctx: Arc<GroupContext>) -> Self {
        Self::new(group.key(), GroupEntity::Persisted(group), ctx)
    }

    #[must_use]
    pub fn from_dynamic(group: DynamicUserGroup, ctx: Arc<GroupContext>) -> Self {
        Self::new(group.key(), GroupEntity::Dynamic(group), ctx)
    }

    fn new(key: GroupKey, entity: GroupEntity, ctx: Arc<GroupContext>) -> Self {
        Self {
            key,
            entity: RwLock::new(entity),
            ctx,
            ignore_dates: AtomicBool::new(false),
            assigned_cache: RwLock::new(HashMap::new()),
            membership_cache: RwLock::new(HashMap::new()),
            full_objects_cache: RwLock::new(HashMap::new()),
            default_types_cache: RwLock::new(None),
        }
    }

    /// Load a persisted group by id; None when the row does not exist.
    pub async fn load(ctx: Arc<GroupContext>, id: &GroupId) -> Result<Option<Self>> {
        Ok(ctx
            .groups
            .fetch(id)
            .await?
            .map(|group| Self::from_persisted(group, ctx.clone())))
    }

    #[must_use]
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.key.group_type.is_dynamic()
    }

    /// Snapshot of the stored entity; None for dynamic groups.
    #[must_use]
    pub fn persisted(&self) -> Option<UserGroup> {
        match &*self.entity.read() {
            GroupEntity::Persisted(group) => Some(group.clone()),
            GroupEntity::Dynamic(_) => None,
        }
    }

    #[must_use]
    pub fn dynamic(&self) -> Option<DynamicUserGroup> {
        match &*self.entity.read() {
            GroupEntity::Persisted(_) => None,
            GroupEntity::Dynamic(group) => Some(group.clone()),
        }
    }

    /// Display name: the stored name, or a directory lookup for dynamic
    /// groups, falling back to the raw id.
    #[must_use]
    pub fn name(&self) -> String {
        match &*self.entity.read() {
            GroupEntity::Persisted(group) => group.name.clone(),
            GroupEntity::Dynamic(group) => {
                if group.is_not_logged_in() {
                    return "Not logged in users".to_string();
                }
                let looked_up = match group.kind {
                    crate::models::DynamicGroupKind::User => self
                        .ctx
                        .directory
                        .user_display_name(&ObjectId::from(group.raw_id.as_str())),
                    crate::models::DynamicGroupKind::Role => {
                        self.ctx.directory.role_label(&group.raw_id)
                    }
                };
                looked_up.unwrap_or_else(|| group.raw_id.clone())
            }
        }
    }

    /// Apply a mutation to the stored entity. Rejected for dynamic groups,
    /// which have no stored attributes.
    pub fn update(&self, mutate: impl FnOnce(&mut UserGroup)) -> Result<()> {
        match &mut *self.entity.write() {
            GroupEntity::Persisted(group) => {
                mutate(group);
                Ok(())
            }
            GroupEntity::Dynamic(_) => Err(Error::Configuration(
                "Dynamic groups have no stored attributes".to_string(),
            )),
        }
    }

    #[must_use]
    pub fn ignore_dates(&self) -> bool {
        self.ignore_dates.load(Ordering::Acquire)
    }

    /// Toggle date-window enforcement. Changing the flag invalidates every
    /// memoized answer.
    pub fn set_ignore_dates(&self, ignore: bool) {
        if self.ignore_dates.swap(ignore, Ordering::AcqRel) != ignore {
            self.reset_objects();
        }
    }

    /// Drop all memoized assignment and membership state.
    pub fn reset_objects(&self) {
        self.assigned_cache.write().clear();
        self.membership_cache.write().clear();
        self.full_objects_cache.write().clear();
        *self.default_types_cache.write() = None;
    }

    /// Directly assigned objects under one type bucket (a general bucket
    /// string for the built-in categories, the concrete type string for
    /// pluggable ones). Default-type markers and, unless dates are ignored,
    /// rows outside their window are filtered out. Memoized.
    pub async fn assigned_objects(
        &self,
        object_type: &str,
    ) -> Result<Arc<HashMap<ObjectId, AssignmentInformation>>> {
        if let Some(cached) = self.assigned_cache.read().get(object_type) {
            return Ok(cached.clone());
        }

        let rows = self.ctx.assignments.fetch_by_type(&self.key, object_type).await?;

        let ignore_dates = self.ignore_dates();
        let now = Utc::now();
        let assigned: HashMap<ObjectId, AssignmentInformation> = rows
            .iter()
            .filter(|row| !row.is_default_type_marker())
            .filter(|row| ignore_dates || row.is_active_at(now))
            .map(|row| (row.object_id.clone(), AssignmentInformation::from_row(row)))
            .collect();

        let assigned = Arc::new(assigned);
        self.assigned_cache
            .write()
            .insert(object_type.to_string(), assigned.clone());
        Ok(assigned)
    }

    /// Whether `object_id` is a member of this group under `object_type`,
    /// directly or through the type's recursion rules. Memoized.
    ///
    /// An unknown object type, or a pluggable type with no registered
    /// extension object, resolves to "not a member" rather than erroring:
    /// access decisions built on top must stay closed.
    pub async fn is_object_member(
        &self,
        object_type: &str,
        object_id: &ObjectId,
    ) -> Result<Membership> {
        let cache_key = (object_type.to_string(), object_id.clone());
        if let Some(cached) = self.membership_cache.read().get(&cache_key) {
            return Ok(cached.clone());
        }

        let membership = self.resolve_membership(object_type, object_id).await?;

        self.membership_cache
            .write()
            .insert(cache_key, membership.clone());
        Ok(membership)
    }

    async fn resolve_membership(
        &self,
        object_type: &str,
        object_id: &ObjectId,
    ) -> Result<Membership> {
        if object_id.is_default_type_marker() {
            return Ok(Membership::not_a_member());
        }

        let Some(general) = self.ctx.object_types.general_object_type(object_type) else {
            tracing::debug!(object_type, "Unknown object type, treating as non-member");
            return Ok(Membership::not_a_member());
        };

        let lock_recursive = self.ctx.options.lock_recursive;

        let result = match &general {
            GeneralObjectType::Pluggable(name) => {
                self.ctx
                    .handlers
                    .pluggable()
                    .is_member_of(name, self, lock_recursive, object_id)
                    .await
            }
            _ => match self.ctx.handlers.builtin_handler(&general) {
                Some(handler) => handler.is_member(self, lock_recursive, object_id).await,
                None => Err(Error::MissingHandler(object_type.to_string())),
            },
        };

        match result {
            Ok(membership) => Ok(membership),
            Err(Error::MissingHandler(object_type)) => {
                tracing::warn!(
                    group = %self.key,
                    object_type,
                    "No membership handler registered, treating as non-member"
                );
                Ok(Membership::not_a_member())
            }
            Err(err) => Err(err),
        }
    }

    /// Transitive closure of every object assigned to this group under
    /// `object_type`. A general bucket string returns the whole category;
    /// a concrete type narrows to it. Memoized.
    pub async fn full_objects(&self, object_type: &str) -> Result<Arc<HashMap<ObjectId, String>>> {
        if let Some(cached) = self.full_objects_cache.read().get(object_type) {
            return Ok(cached.clone());
        }

        let full = Arc::new(self.resolve_full_objects(object_type).await?);
        self.full_objects_cache
            .write()
            .insert(object_type.to_string(), full.clone());
        Ok(full)
    }

    async fn resolve_full_objects(&self, object_type: &str) -> Result<HashMap<ObjectId, String>> {
        let Some(general) = self.ctx.object_types.general_object_type(object_type) else {
            tracing::debug!(object_type, "Unknown object type, no assigned objects");
            return Ok(HashMap::new());
        };

        let lock_recursive = self.ctx.options.lock_recursive;

        let result = match &general {
            GeneralObjectType::Pluggable(name) => {
                self.ctx
                    .handlers
                    .pluggable()
                    .full_objects_of(name, self, lock_recursive)
                    .await
            }
            _ => {
                let filter = if object_type == general.as_str() {
                    None
                } else {
                    Some(object_type)
                };
                match self.ctx.handlers.builtin_handler(&general) {
                    Some(handler) => handler.full_objects(self, lock_recursive, filter).await,
                    None => Err(Error::MissingHandler(object_type.to_string())),
                }
            }
        };

        match result {
            Ok(full) => Ok(full),
            Err(Error::MissingHandler(object_type)) => {
                tracing::warn!(
                    group = %self.key,
                    object_type,
                    "No membership handler registered, no assigned objects"
                );
                Ok(HashMap::new())
            }
            Err(err) => Err(err),
        }
    }

    /// Human label for an object, resolved through the handler for its
    /// category. None when the type is unknown or the object has no name.
    #[must_use]
    pub fn object_name(&self, object_type: &str, object_id: &ObjectId) -> Option<String> {
        let general = self.ctx.object_types.general_object_type(object_type)?;
        match &general {
            GeneralObjectType::Pluggable(name) => {
                self.ctx.handlers.pluggable().object_name_of(name, object_id)
            }
            _ => self
                .ctx
                .handlers
                .builtin_handler(&general)?
                .object_name(object_id),
        }
    }

    /// Assign an object to this group, optionally with a date window.
    pub async fn add_object(
        &self,
        object_type: &str,
        object_id: &ObjectId,
        from_date: Option<DateTime<Utc>>,
        to_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if object_id.is_default_type_marker() {
            return Err(Error::InvalidInput(
                "Object id must not be empty".to_string(),
            ));
        }
        let Some(general) = self.ctx.object_types.general_object_type(object_type) else {
            return Err(Error::InvalidInput(format!(
                "Unknown object type: {object_type}"
            )));
        };
        if self.is_dynamic() && general == GeneralObjectType::User {
            return Err(Error::Assignment(
                "Dynamic groups cannot hold user assignments".to_string(),
            ));
        }

        let row = ObjectAssignment::new(
            self.key.clone(),
            object_id.clone(),
            general.as_str(),
            object_type,
        )
        .with_dates(from_date, to_date);

        self.ctx.assignments.upsert(&row).await?;
        self.reset_objects();
        Ok(())
    }

    /// Remove assignments matching `object_type`, optionally narrowed to one
    /// object. With `ignore_general_type` only the concrete type column is
    /// matched. Returns whether anything was removed.
    pub async fn remove_object(
        &self,
        object_type: &str,
        object_id: Option<&ObjectId>,
        ignore_general_type: bool,
    ) -> Result<bool> {
        let removed = self
            .ctx
            .assignments
            .delete_object(&self.key, object_type, object_id, ignore_general_type)
            .await?;
        if removed > 0 {
            self.reset_objects();
        }
        Ok(removed > 0)
    }

    /// Mark this group as the default for `object_type`, with an optional
    /// membership window applied when the default is materialized.
    ///
    /// A window whose end does not lie after its start is widened to one
    /// second so the stored row stays a valid interval.
    pub async fn add_default_type(
        &self,
        object_type: &str,
        from_date: Option<DateTime<Utc>>,
        mut to_date: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let Some(general) = self.ctx.object_types.general_object_type(object_type) else {
            return Err(Error::InvalidInput(format!(
                "Unknown object type: {object_type}"
            )));
        };

        if let (Some(from), Some(to)) = (from_date, to_date) {
            if to <= from {
                to_date = Some(from + Duration::seconds(1));
            }
        }

        let row = ObjectAssignment::new(
            self.key.clone(),
            ObjectId::default_type_marker(),
            general.as_str(),
            object_type,
        )
        .with_dates(from_date, to_date);

        self.ctx.assignments.upsert(&row).await?;
        self.reset_objects();
        Ok(())
    }

    /// Remove the default-type marker for `object_type`. Returns whether a
    /// marker existed.
    pub async fn remove_default_type(&self, object_type: &str) -> Result<bool> {
        let marker = ObjectId::default_type_marker();
        let removed = self
            .ctx
            .assignments
            .delete_object(&self.key, object_type, Some(&marker), true)
            .await?;
        if removed > 0 {
            self.reset_objects();
        }
        Ok(removed > 0)
    }

    /// Object types this group is the default for, each with the stored
    /// membership window. Memoized.
    pub async fn default_object_types(&self) -> Result<Arc<HashMap<String, DateWindow>>> {
        if let Some(cached) = &*self.default_types_cache.read() {
            return Ok(cached.clone());
        }

        let rows = self.ctx.assignments.fetch_for_group(&self.key).await?;
        let defaults: HashMap<String, DateWindow> = rows
            .into_iter()
            .filter(ObjectAssignment::is_default_type_marker)
            .map(|row| (row.object_type, (row.from_date, row.to_date)))
            .collect();

        let defaults = Arc::new(defaults);
        *self.default_types_cache.write() = Some(defaults.clone());
        Ok(defaults)
    }

    /// The stored default window for `object_type`, or None when this group
    /// is not a default for it.
    pub async fn is_default_group_for_object_type(
        &self,
        object_type: &str,
    ) -> Result<Option<DateWindow>> {
        Ok(self
            .default_object_types()
            .await?
            .get(object_type)
            .copied())
    }

    /// Persist the stored entity. Dynamic groups are never stored as rows.
    pub async fn save(&self) -> Result<()> {
        let group = match &mut *self.entity.write() {
            GroupEntity::Persisted(group) => {
                group.validate()?;
                group.updated_at = Utc::now();
                group.clone()
            }
            GroupEntity::Dynamic(_) => {
                return Err(Error::Configuration(
                    "Dynamic groups cannot be saved".to_string(),
                ));
            }
        };
        self.ctx.groups.save(&group).await
    }

    /// Delete the group: the stored row (persisted groups only) plus every
    /// assignment row carrying its key.
    pub async fn delete(&self) -> Result<()> {
        let persisted_id = match &*self.entity.read() {
            GroupEntity::Persisted(group) => Some(group.id.clone()),
            GroupEntity::Dynamic(_) => None,
        };
        if let Some(id) = persisted_id {
            self.ctx.groups.delete(&id).await?;
        }
        self.ctx.assignments.delete_group_rows(&self.key).await?;
        self.reset_objects();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::{MemoryDirectory, MemoryTreeMaps, StaticObjectTypeRegistry};
    use crate::membership::{EngineOptions, GroupContext};
    use crate::models::TYPE_POST;
    use crate::repository::MemoryStore;
    use chrono::TimeZone;

    fn context() -> Arc<GroupContext> {
        let store = Arc::new(MemoryStore::new());
        Arc::new(GroupContext::new(
            store.clone(),
            store,
            Arc::new(StaticObjectTypeRegistry::new()),
            Arc::new(MemoryTreeMaps::new()),
            Arc::new(MemoryDirectory::new()),
            EngineOptions::default(),
        ))
    }

    fn group(ctx: &Arc<GroupContext>) -> MemberGroup {
        MemberGroup::from_persisted(UserGroup::new("test group"), ctx.clone())
    }

    fn ts(s: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(s, 0).single().expect("valid ts")
    }

    #[tokio::test]
    async fn test_add_object_rejects_unknown_type_and_marker_id() {
        let ctx = context();
        let g = group(&ctx);

        let err = g
            .add_object("ghost_type", &ObjectId::from("1"), None, None)
            .await;
        assert!(matches!(err, Err(Error::InvalidInput(_))));

        let err = g
            .add_object(TYPE_POST, &ObjectId::default_type_marker(), None, None)
            .await;
        assert!(matches!(err, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_dynamic_group_rejects_user_assignment() {
        let ctx = context();
        let g = MemberGroup::from_dynamic(DynamicUserGroup::for_user("5"), ctx);

        let err = g.add_object("user", &ObjectId::from("7"), None, None).await;
        assert!(matches!(err, Err(Error::Assignment(_))));

        // Non-user objects are fine in dynamic groups.
        g.add_object(TYPE_POST, &ObjectId::from("10"), None, None)
            .await
            .expect("post assignment");
    }

    #[tokio::test]
    async fn test_membership_direct_and_cache_invalidation() {
        let ctx = context();
        let g = group(&ctx);
        let post = ObjectId::from("10");

        assert!(!g.is_object_member(TYPE_POST, &post).await.expect("check").is_member);

        g.add_object(TYPE_POST, &post, None, None).await.expect("add");
        assert!(g.is_object_member(TYPE_POST, &post).await.expect("check").is_member);

        assert!(g.remove_object(TYPE_POST, Some(&post), false).await.expect("remove"));
        assert!(!g.is_object_member(TYPE_POST, &post).await.expect("check").is_member);
    }

    #[tokio::test]
    async fn test_expired_window_needs_ignore_dates() {
        let ctx = context();
        let g = group(&ctx);
        let post = ObjectId::from("10");

        g.add_object(TYPE_POST, &post, Some(ts(0)), Some(ts(1)))
            .await
            .expect("add");

        assert!(!g.is_object_member(TYPE_POST, &post).await.expect("check").is_member);

        g.set_ignore_dates(true);
        assert!(g.is_object_member(TYPE_POST, &post).await.expect("check").is_member);

        g.set_ignore_dates(false);
        assert!(!g.is_object_member(TYPE_POST, &post).await.expect("check").is_member);
    }

    #[tokio::test]
    async fn test_default_type_window_normalization() {
        let ctx = context();
        let g = group(&ctx);

        g.add_default_type(TYPE_POST, Some(ts(100)), Some(ts(50)))
            .await
            .expect("add default");

        let window = g
            .is_default_group_for_object_type(TYPE_POST)
            .await
            .expect("lookup")
            .expect("is default");
        assert_eq!(window, (Some(ts(100)), Some(ts(101))));

        // Markers never surface as assigned objects.
        let assigned = g.assigned_objects("_post_").await.expect("assigned");
        assert!(assigned.is_empty());

        assert!(g.remove_default_type(TYPE_POST).await.expect("remove"));
        assert_eq!(
            g.is_default_group_for_object_type(TYPE_POST)
                .await
                .expect("lookup"),
            None
        );
    }

    #[tokio::test]
    async fn test_assigned_objects_memoized() {
        let store = Arc::new(MemoryStore::new());
        let ctx = Arc::new(GroupContext::new(
            store.clone(),
            store.clone(),
            Arc::new(StaticObjectTypeRegistry::new()),
            Arc::new(MemoryTreeMaps::new()),
            Arc::new(MemoryDirectory::new()),
            EngineOptions::default(),
        ));
        let g = group(&ctx);

        g.add_object(TYPE_POST, &ObjectId::from("10"), None, None)
            .await
            .expect("add");

        let before = store.assignment_fetches();
        g.assigned_objects("_post_").await.expect("first");
        g.assigned_objects("_post_").await.expect("second");
        g.assigned_objects("_post_").await.expect("third");
        assert_eq!(store.assignment_fetches(), before + 1);
    }

    #[tokio::test]
    async fn test_save_and_delete_persisted() {
        let ctx = context();
        let g = group(&ctx);
        g.save().await.expect("save");

        let id = g.persisted().expect("persisted").id;
        assert!(ctx.groups.fetch(&id).await.expect("fetch").is_some());

        g.add_object(TYPE_POST, &ObjectId::from("10"), None, None)
            .await
            .expect("add");
        g.delete().await.expect("delete");

        assert!(ctx.groups.fetch(&id).await.expect("fetch").is_none());
        assert!(g.assigned_objects("_post_").await.expect("assigned").is_empty());
    }

    #[tokio::test]
    async fn test_dynamic_group_cannot_be_saved() {
        let ctx = context();
        let g = MemberGroup::from_dynamic(DynamicUserGroup::for_role("editor"), ctx);
        assert!(matches!(g.save().await, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_object_name_resolves_through_handlers() {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        directory.set_post_title("10", "Hello world");
        let ctx = Arc::new(GroupContext::new(
            store.clone(),
            store,
            Arc::new(StaticObjectTypeRegistry::new()),
            Arc::new(MemoryTreeMaps::new()),
            directory,
            EngineOptions::default(),
        ));
        let g = group(&ctx);

        assert_eq!(
            g.object_name(TYPE_POST, &ObjectId::from("10")).as_deref(),
            Some("Hello world")
        );
        assert_eq!(g.object_name("ghost", &ObjectId::from("10")), None);
    }
}
