use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cms::ActorContext;
use crate::membership::{GroupContext, MemberGroup};
use crate::models::{
    AccessMode, DynamicUserGroup, GroupId, GroupKey, ObjectId, UserGroup, GENERAL_USER,
};
use crate::Result;

type GroupMap = HashMap<GroupKey, Arc<MemberGroup>>;

/// Request-scoped group resolution service.
///
/// Holds the current actor and memoizes every answer for the lifetime of
/// the handler. The store is only hit once per question shape; repeated
/// calls during one request are served from the caches.
pub struct UserGroupHandler {
    ctx: Arc<GroupContext>,
    actor: Arc<dyn ActorContext>,

    groups: RwLock<Option<Arc<GroupMap>>>,
    dynamic: RwLock<Option<Arc<GroupMap>>>,
    for_user: RwLock<Option<Arc<GroupMap>>>,
    /// Keyed by (ignore_dates, object type, object id).
    for_object: DashMap<(bool, String, ObjectId), Arc<Vec<Arc<MemberGroup>>>>,
}

impl UserGroupHandler {
    #[must_use]
    pub fn new(ctx: Arc<GroupContext>, actor: Arc<dyn ActorContext>) -> Self {
        Self {
            ctx,
            actor,
            groups: RwLock::new(None),
            dynamic: RwLock::new(None),
            for_user: RwLock::new(None),
            for_object: DashMap::new(),
        }
    }

    #[must_use]
    pub fn context(&self) -> &Arc<GroupContext> {
        &self.ctx
    }

    #[must_use]
    pub fn actor(&self) -> &Arc<dyn ActorContext> {
        &self.actor
    }

    /// Every persisted group, keyed by group key. Memoized.
    pub async fn user_groups(&self) -> Result<Arc<GroupMap>> {
        if let Some(cached) = self.groups.read().clone() {
            return Ok(cached);
        }

        let rows = self.ctx.groups.fetch_all().await?;
        let map: GroupMap = rows
            .into_iter()
            .map(|group| {
                let member = Arc::new(MemberGroup::from_persisted(group, self.ctx.clone()));
                (member.key().clone(), member)
            })
            .collect();

        let map = Arc::new(map);
        *self.groups.write() = Some(map.clone());
        Ok(map)
    }

    /// One persisted group by id, or None.
    pub async fn user_group(&self, id: &GroupId) -> Result<Option<Arc<MemberGroup>>> {
        let key = GroupKey::persisted(id.as_str());
        Ok(self.user_groups().await?.get(&key).cloned())
    }

    /// Every dynamic group that left traces in the assignment table, plus
    /// the implicit not-logged-in group. Memoized.
    pub async fn dynamic_user_groups(&self) -> Result<Arc<GroupMap>> {
        if let Some(cached) = self.dynamic.read().clone() {
            return Ok(cached);
        }

        let mut map = GroupMap::new();
        for key in self.ctx.assignments.dynamic_group_keys().await? {
            let dynamic = DynamicUserGroup::try_new(key.group_type.as_str(), key.id.clone())?;
            map.insert(
                key,
                Arc::new(MemberGroup::from_dynamic(dynamic, self.ctx.clone())),
            );
        }

        let not_logged_in = DynamicUserGroup::not_logged_in();
        map.entry(not_logged_in.key()).or_insert_with(|| {
            Arc::new(MemberGroup::from_dynamic(not_logged_in, self.ctx.clone()))
        });

        let map = Arc::new(map);
        *self.dynamic.write() = Some(map.clone());
        Ok(map)
    }

    /// Union of persisted and discovered dynamic groups.
    pub async fn full_user_groups(&self) -> Result<GroupMap> {
        let mut map = (*self.user_groups().await?).clone();
        for (key, member) in self.dynamic_user_groups().await?.iter() {
            map.entry(key.clone()).or_insert_with(|| member.clone());
        }
        Ok(map)
    }

    /// Persisted groups narrowed to those the current actor can see.
    pub async fn filtered_user_groups(&self) -> Result<GroupMap> {
        let all = self.user_groups().await?;
        let visible = self.user_groups_for_user().await?;
        Ok(all
            .iter()
            .filter(|(key, _)| visible.contains_key(*key))
            .map(|(key, member)| (key.clone(), member.clone()))
            .collect())
    }

    /// Like [`Self::user_groups_for_object`], restricted to groups the
    /// current actor can see. Dynamic groups are always visible: they only
    /// exist through their assignment rows, so a sweep that found one may
    /// report it.
    pub async fn filtered_user_groups_for_object(
        &self,
        object_type: &str,
        object_id: &ObjectId,
        ignore_dates: bool,
    ) -> Result<Vec<Arc<MemberGroup>>> {
        let for_object = self
            .user_groups_for_object(object_type, object_id, ignore_dates)
            .await?;
        let visible = self.user_groups_for_user().await?;
        let dynamic = self.dynamic_user_groups().await?;
        Ok(for_object
            .iter()
            .filter(|member| {
                visible.contains_key(member.key()) || dynamic.contains_key(member.key())
            })
            .cloned()
            .collect())
    }

    /// Create and persist a new group.
    pub async fn add_user_group(&self, group: UserGroup) -> Result<Arc<MemberGroup>> {
        group.validate()?;
        let member = Arc::new(MemberGroup::from_persisted(group, self.ctx.clone()));
        member.save().await?;
        tracing::info!(group = %member.key(), name = %member.name(), "User group created");
        self.invalidate();
        Ok(member)
    }

    /// Delete a persisted group along with its assignment rows. Returns
    /// false when the id is unknown.
    pub async fn delete_user_group(&self, id: &GroupId) -> Result<bool> {
        let Some(member) = self.user_group(id).await? else {
            return Ok(false);
        };
        member.delete().await?;
        tracing::info!(group = %member.key(), "User group deleted");
        self.invalidate();
        Ok(true)
    }

    /// Groups the current actor belongs to, by any road in: direct or
    /// role-based user membership, an `all` read/write access level, an IP
    /// allowlist hit, the actor's own dynamic group, and one dynamic role
    /// group per held role. Group managers get every persisted group.
    /// Memoized.
    pub async fn user_groups_for_user(&self) -> Result<Arc<GroupMap>> {
        if let Some(cached) = self.for_user.read().clone() {
            return Ok(cached);
        }

        let persisted = self.user_groups().await?;
        let user_id = self.actor.user_id();
        let request_ip = self.actor.request_ip();
        let manage = self.actor.can_manage_user_groups();

        let mut map = GroupMap::new();
        for (key, member) in persisted.iter() {
            if manage || self.actor_belongs_to(member, &user_id, request_ip).await? {
                map.insert(key.clone(), member.clone());
            }
        }

        // The actor's own dynamic group, anonymous sessions included.
        let own = if user_id.as_str() == DynamicUserGroup::NOT_LOGGED_IN_USER_ID {
            DynamicUserGroup::not_logged_in()
        } else {
            DynamicUserGroup::for_user(user_id.as_str())
        };
        map.insert(
            own.key(),
            Arc::new(MemberGroup::from_dynamic(own, self.ctx.clone())),
        );

        for role in self.actor.roles() {
            let role_group = DynamicUserGroup::for_role(role);
            map.insert(
                role_group.key(),
                Arc::new(MemberGroup::from_dynamic(role_group, self.ctx.clone())),
            );
        }

        let map = Arc::new(map);
        *self.for_user.write() = Some(map.clone());
        Ok(map)
    }

    async fn actor_belongs_to(
        &self,
        member: &Arc<MemberGroup>,
        user_id: &ObjectId,
        request_ip: Option<std::net::IpAddr>,
    ) -> Result<bool> {
        if let Some(group) = member.persisted() {
            if group.read_access == AccessMode::All || group.write_access == AccessMode::All {
                return Ok(true);
            }
            if let Some(ip) = request_ip {
                if group.ip_in_range(ip) {
                    return Ok(true);
                }
            }
        }
        Ok(member
            .is_object_member(GENERAL_USER, user_id)
            .await?
            .is_member)
    }

    /// Every group (persisted and dynamic) the object belongs to. With
    /// `ignore_dates` the sweep sees expired and future assignments too.
    /// Memoized per (ignore_dates, type, id) triple.
    pub async fn user_groups_for_object(
        &self,
        object_type: &str,
        object_id: &ObjectId,
        ignore_dates: bool,
    ) -> Result<Arc<Vec<Arc<MemberGroup>>>> {
        let cache_key = (ignore_dates, object_type.to_string(), object_id.clone());
        if let Some(cached) = self.for_object.get(&cache_key) {
            return Ok(cached.clone());
        }

        let persisted = self.user_groups().await?;
        let dynamic = self.dynamic_user_groups().await?;

        let mut matching = Vec::new();
        for member in persisted.values().chain(dynamic.values()) {
            member.set_ignore_dates(ignore_dates);
            let is_member = member
                .is_object_member(object_type, object_id)
                .await?
                .is_member;
            if is_member {
                matching.push(member.clone());
            }
        }
        // Sweeps never leave date enforcement disabled behind them.
        if ignore_dates {
            for member in persisted.values().chain(dynamic.values()) {
                member.set_ignore_dates(false);
            }
        }

        let matching = Arc::new(matching);
        self.for_object.insert(cache_key, matching.clone());
        Ok(matching)
    }

    /// Drop the per-object memo, forcing the next sweep to re-resolve.
    pub fn unset_user_groups_for_object(&self) {
        self.for_object.clear();
    }

    /// Groups that are defaults for `object_type`, each with its stored
    /// window.
    pub async fn default_groups_for_object_type(
        &self,
        object_type: &str,
    ) -> Result<Vec<Arc<MemberGroup>>> {
        let mut defaults = Vec::new();
        for member in self.user_groups().await?.values() {
            if member
                .is_default_group_for_object_type(object_type)
                .await?
                .is_some()
            {
                defaults.push(member.clone());
            }
        }
        Ok(defaults)
    }

    /// Resolve a composite dynamic key to its group, reusing a discovered
    /// instance when one exists.
    pub async fn dynamic_user_group(&self, composite: &str) -> Result<Arc<MemberGroup>> {
        let key = GroupKey::parse_dynamic(composite)?;
        let discovered = self.dynamic_user_groups().await?;
        if let Some(existing) = discovered.get(&key) {
            return Ok(existing.clone());
        }

        let dynamic = DynamicUserGroup::try_new(key.group_type.as_str(), key.id.clone())?;
        let member = Arc::new(MemberGroup::from_dynamic(dynamic, self.ctx.clone()));

        // Keep the instance in the memo so later sweeps see it.
        let mut map = (*discovered).clone();
        map.insert(key, member.clone());
        *self.dynamic.write() = Some(Arc::new(map));
        Ok(member)
    }

    fn invalidate(&self) {
        *self.groups.write() = None;
        *self.dynamic.write() = None;
        *self.for_user.write() = None;
        self.for_object.clear();
    }
}

impl UserGroupHandler {
    /// Convenience check used by access layers: is the current actor inside
    /// any group of the given set.
    pub async fn actor_in_any(&self, groups: &[Arc<MemberGroup>]) -> Result<bool> {
        let own = self.user_groups_for_user().await?;
        Ok(groups.iter().any(|g| own.contains_key(g.key())))
    }
}
