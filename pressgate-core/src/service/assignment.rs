use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::UserGroupHandler;
use crate::membership::MemberGroup;
use crate::models::{GroupId, GroupKey, ObjectId};
use crate::Result;

/// Split date/time inputs for one end of an assignment window, as submitted
/// by an edit form. Both parts are required to produce a bound; a lone date
/// or lone time yields an open end.
#[derive(Debug, Clone, Default)]
pub struct DateWindowInput {
    pub from_date: Option<String>,
    pub from_time: Option<String>,
    pub to_date: Option<String>,
    pub to_time: Option<String>,
}

impl DateWindowInput {
    /// Resolve the submitted parts into concrete bounds.
    #[must_use]
    pub fn resolve(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (
            parse_date_time(self.from_date.as_deref(), self.from_time.as_deref()),
            parse_date_time(self.to_date.as_deref(), self.to_time.as_deref()),
        )
    }
}

/// Parse a `%Y-%m-%d` date plus `%H:%M:%S` time pair into a UTC instant.
/// Returns None unless both parts are present and well-formed.
#[must_use]
pub fn parse_date_time(date: Option<&str>, time: Option<&str>) -> Option<DateTime<Utc>> {
    let date = date?.trim();
    let time = time?.trim();
    if date.is_empty() || time.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// One bulk assignment submission for an object, as collected from an edit
/// form.
#[derive(Debug, Clone, Default)]
pub struct GroupAssignmentRequest {
    /// Persisted groups to assign the object to.
    pub add: Vec<GroupId>,
    /// Persisted groups to unassign the object from.
    pub remove: Vec<GroupId>,
    /// Composite dynamic keys (`user|5`, `role|editor`); only honored for
    /// actors with the manage capability.
    pub add_dynamic: Vec<String>,
    /// Per-group windows, keyed by the group key's display form.
    pub windows: HashMap<String, DateWindowInput>,
}

/// Applies submitted group sets to objects, respecting the actor's reach.
///
/// Actors only touch the groups they can see: group managers reach every
/// group plus dynamic assignment, everyone else only the groups they belong
/// to. Saves by actors without the manage capability additionally pull in
/// the default groups configured for the object type.
pub struct UserGroupAssignmentHandler {
    groups: Arc<UserGroupHandler>,
}

impl UserGroupAssignmentHandler {
    #[must_use]
    pub fn new(groups: Arc<UserGroupHandler>) -> Self {
        Self { groups }
    }

    /// Apply one bulk submission. Groups outside the actor's reach are left
    /// untouched whatever the request says. Always drops the per-object
    /// memo so subsequent reads see the outcome.
    pub async fn assign_object_to_user_groups(
        &self,
        object_type: &str,
        object_id: &ObjectId,
        request: &GroupAssignmentRequest,
    ) -> Result<()> {
        let result = self
            .apply_assignments(object_type, object_id, request)
            .await;
        self.groups.unset_user_groups_for_object();
        result
    }

    async fn apply_assignments(
        &self,
        object_type: &str,
        object_id: &ObjectId,
        request: &GroupAssignmentRequest,
    ) -> Result<()> {
        let manage = self.groups.actor().can_manage_user_groups();

        let editable = if manage {
            self.groups.user_groups().await?
        } else {
            self.groups.user_groups_for_user().await?
        };

        let add: HashSet<GroupKey> = request
            .add
            .iter()
            .map(|id| GroupKey::persisted(id.as_str()))
            .collect();
        let remove: HashSet<GroupKey> = request
            .remove
            .iter()
            .map(|id| GroupKey::persisted(id.as_str()))
            .collect();

        for (key, member) in editable.iter() {
            if key.group_type.is_dynamic() {
                continue;
            }
            if remove.contains(key) {
                member
                    .remove_object(object_type, Some(object_id), false)
                    .await?;
            }
            if add.contains(key) {
                let (from_date, to_date) = request
                    .windows
                    .get(&key.to_string())
                    .map(DateWindowInput::resolve)
                    .unwrap_or_default();
                member
                    .add_object(object_type, object_id, from_date, to_date)
                    .await?;
            }
        }

        if manage {
            self.apply_dynamic_assignments(object_type, object_id, request)
                .await;
        } else {
            self.apply_default_groups(object_type, object_id, &editable)
                .await?;
        }

        Ok(())
    }

    /// Dynamic assignments are best effort: one malformed key must not roll
    /// back the rest of the save.
    async fn apply_dynamic_assignments(
        &self,
        object_type: &str,
        object_id: &ObjectId,
        request: &GroupAssignmentRequest,
    ) {
        for composite in &request.add_dynamic {
            let outcome = async {
                let member = self.groups.dynamic_user_group(composite).await?;
                let (from_date, to_date) = request
                    .windows
                    .get(composite)
                    .map(DateWindowInput::resolve)
                    .unwrap_or_default();
                member
                    .add_object(object_type, object_id, from_date, to_date)
                    .await
            }
            .await;

            if let Err(err) = outcome {
                tracing::warn!(
                    key = composite,
                    object_type,
                    object_id = %object_id,
                    error = %err,
                    "Skipping dynamic group assignment"
                );
            }
        }
    }

    /// Saves by non-managing actors pull in the default groups for the
    /// object type, using each default's stored window. Groups the actor
    /// already reaches are left to the explicit request.
    async fn apply_default_groups(
        &self,
        object_type: &str,
        object_id: &ObjectId,
        editable: &HashMap<GroupKey, Arc<MemberGroup>>,
    ) -> Result<()> {
        for member in self
            .groups
            .default_groups_for_object_type(object_type)
            .await?
        {
            if editable.contains_key(member.key()) {
                continue;
            }
            let Some((from_date, to_date)) = member
                .is_default_group_for_object_type(object_type)
                .await?
            else {
                continue;
            };
            member
                .add_object(object_type, object_id, from_date, to_date)
                .await?;
            tracing::debug!(
                group = %member.key(),
                object_type,
                object_id = %object_id,
                "Default group applied"
            );
        }
        Ok(())
    }

    /// Strip an object from every group, persisted and dynamic. Used when
    /// the object itself is deleted.
    pub async fn remove_object_assignments(
        &self,
        object_type: &str,
        object_id: &ObjectId,
    ) -> Result<()> {
        let persisted = self.groups.user_groups().await?;
        let dynamic = self.groups.dynamic_user_groups().await?;
        futures::future::try_join_all(
            persisted
                .values()
                .chain(dynamic.values())
                .map(|member| member.remove_object(object_type, Some(object_id), false)),
        )
        .await?;
        self.groups.unset_user_groups_for_object();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::{MemoryDirectory, MemoryTreeMaps, StaticActor, StaticObjectTypeRegistry};
    use crate::membership::{EngineOptions, GroupContext};
    use crate::models::{UserGroup, TYPE_POST};
    use crate::repository::MemoryStore;
    use chrono::TimeZone;

    struct World {
        ctx: Arc<GroupContext>,
    }

    impl World {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let ctx = Arc::new(GroupContext::new(
                store.clone(),
                store,
                Arc::new(StaticObjectTypeRegistry::new()),
                Arc::new(MemoryTreeMaps::new()),
                Arc::new(MemoryDirectory::new()),
                EngineOptions::default(),
            ));
            Self { ctx }
        }

        fn handler(&self, actor: StaticActor) -> (Arc<UserGroupHandler>, UserGroupAssignmentHandler) {
            let groups = Arc::new(UserGroupHandler::new(self.ctx.clone(), Arc::new(actor)));
            let assignments = UserGroupAssignmentHandler::new(groups.clone());
            (groups, assignments)
        }
    }

    async fn is_assigned(member: &Arc<MemberGroup>, object_id: &ObjectId) -> bool {
        member
            .is_object_member(TYPE_POST, object_id)
            .await
            .expect("check")
            .is_member
    }

    #[test]
    fn test_parse_date_time_requires_both_parts() {
        assert_eq!(
            parse_date_time(Some("2026-01-02"), Some("03:04:05")),
            Some(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("ts"))
        );
        assert_eq!(parse_date_time(Some("2026-01-02"), None), None);
        assert_eq!(parse_date_time(None, Some("03:04:05")), None);
        assert_eq!(parse_date_time(Some(""), Some("03:04:05")), None);
        assert_eq!(parse_date_time(Some("not-a-date"), Some("03:04:05")), None);
    }

    #[tokio::test]
    async fn test_manager_adds_and_removes_groups() {
        let world = World::new();
        let (groups, assignments) = world.handler(StaticActor::manager("1"));

        let id_a = groups
            .add_user_group(UserGroup::new("a"))
            .await
            .expect("create")
            .persisted()
            .expect("persisted")
            .id;
        let id_b = groups
            .add_user_group(UserGroup::new("b"))
            .await
            .expect("create")
            .persisted()
            .expect("persisted")
            .id;
        let a = groups.user_group(&id_a).await.expect("lookup").expect("exists");
        let b = groups.user_group(&id_b).await.expect("lookup").expect("exists");
        let post = ObjectId::from("10");

        let both = GroupAssignmentRequest {
            add: vec![id_a.clone(), id_b.clone()],
            ..Default::default()
        };
        assignments
            .assign_object_to_user_groups(TYPE_POST, &post, &both)
            .await
            .expect("save");
        assert!(is_assigned(&a, &post).await);
        assert!(is_assigned(&b, &post).await);

        let drop_b = GroupAssignmentRequest {
            remove: vec![id_b],
            ..Default::default()
        };
        assignments
            .assign_object_to_user_groups(TYPE_POST, &post, &drop_b)
            .await
            .expect("save");
        assert!(is_assigned(&a, &post).await);
        assert!(!is_assigned(&b, &post).await);
    }

    #[tokio::test]
    async fn test_non_manager_cannot_touch_foreign_groups() {
        let world = World::new();
        let (setup_groups, _) = world.handler(StaticActor::manager("1"));
        let foreign = setup_groups
            .add_user_group(UserGroup::new("foreign"))
            .await
            .expect("create");
        let foreign_id = foreign.persisted().expect("persisted").id;
        let post = ObjectId::from("10");
        foreign
            .add_object(TYPE_POST, &post, None, None)
            .await
            .expect("assign");

        // Actor 42 does not belong to "foreign"; an explicit removal
        // request must not strip the existing assignment.
        let (_, assignments) = world.handler(StaticActor::user("42", &[]));
        let request = GroupAssignmentRequest {
            remove: vec![foreign_id],
            ..Default::default()
        };
        assignments
            .assign_object_to_user_groups(TYPE_POST, &post, &request)
            .await
            .expect("save");
        assert!(is_assigned(&foreign, &post).await);
    }

    #[tokio::test]
    async fn test_member_can_manage_own_groups() {
        let world = World::new();
        let (setup_groups, _) = world.handler(StaticActor::manager("1"));
        let own = setup_groups
            .add_user_group(UserGroup::new("own"))
            .await
            .expect("create");
        own.add_object("user", &ObjectId::from("42"), None, None)
            .await
            .expect("membership");
        let own_id = own.persisted().expect("persisted").id;
        let post = ObjectId::from("10");

        let (_, assignments) = world.handler(StaticActor::user("42", &[]));
        let request = GroupAssignmentRequest {
            add: vec![own_id.clone()],
            ..Default::default()
        };
        assignments
            .assign_object_to_user_groups(TYPE_POST, &post, &request)
            .await
            .expect("save");
        assert!(is_assigned(&own, &post).await);

        let request = GroupAssignmentRequest {
            remove: vec![own_id.clone()],
            ..Default::default()
        };
        assignments
            .assign_object_to_user_groups(TYPE_POST, &post, &request)
            .await
            .expect("save");

        // Verify through a fresh handler so no per-group memo from the
        // earlier positive check gets in the way.
        let (verify, _) = world.handler(StaticActor::manager("1"));
        let own = verify
            .user_group(&own_id)
            .await
            .expect("lookup")
            .expect("exists");
        assert!(!is_assigned(&own, &post).await);
    }

    #[tokio::test]
    async fn test_dynamic_assignment_best_effort() {
        let world = World::new();
        let (groups, assignments) = world.handler(StaticActor::manager("1"));
        let post = ObjectId::from("10");

        let request = GroupAssignmentRequest {
            add_dynamic: vec!["bogus".to_string(), "user|7".to_string()],
            ..Default::default()
        };
        assignments
            .assign_object_to_user_groups(TYPE_POST, &post, &request)
            .await
            .expect("save");

        let dynamic = groups.dynamic_user_group("user|7").await.expect("resolve");
        assert!(is_assigned(&dynamic, &post).await);
    }

    #[tokio::test]
    async fn test_non_manager_ignores_dynamic_keys() {
        let world = World::new();
        let (groups, assignments) = world.handler(StaticActor::user("42", &[]));
        let post = ObjectId::from("10");

        let request = GroupAssignmentRequest {
            add_dynamic: vec!["user|7".to_string()],
            ..Default::default()
        };
        assignments
            .assign_object_to_user_groups(TYPE_POST, &post, &request)
            .await
            .expect("save");

        let dynamic = groups.dynamic_user_group("user|7").await.expect("resolve");
        assert!(!is_assigned(&dynamic, &post).await);
    }

    #[tokio::test]
    async fn test_default_groups_applied_for_non_managers() {
        let world = World::new();
        let (setup_groups, _) = world.handler(StaticActor::manager("1"));
        let default_group = setup_groups
            .add_user_group(UserGroup::new("default"))
            .await
            .expect("create");
        default_group
            .add_default_type(TYPE_POST, None, None)
            .await
            .expect("mark default");

        let post = ObjectId::from("10");
        let (_, assignments) = world.handler(StaticActor::user("42", &[]));
        assignments
            .assign_object_to_user_groups(TYPE_POST, &post, &GroupAssignmentRequest::default())
            .await
            .expect("save");

        assert!(is_assigned(&default_group, &post).await);
    }

    #[tokio::test]
    async fn test_manager_save_skips_default_propagation() {
        let world = World::new();
        let (groups, assignments) = world.handler(StaticActor::manager("1"));
        let default_group = groups
            .add_user_group(UserGroup::new("default"))
            .await
            .expect("create");
        default_group
            .add_default_type(TYPE_POST, None, None)
            .await
            .expect("mark default");

        let post = ObjectId::from("10");
        assignments
            .assign_object_to_user_groups(TYPE_POST, &post, &GroupAssignmentRequest::default())
            .await
            .expect("save");

        assert!(!is_assigned(&default_group, &post).await);
    }

    #[tokio::test]
    async fn test_window_from_request_applied() {
        let world = World::new();
        let (groups, assignments) = world.handler(StaticActor::manager("1"));
        let timed = groups.add_user_group(UserGroup::new("timed")).await.expect("create");
        let id = timed.persisted().expect("persisted").id;
        let post = ObjectId::from("10");

        let mut windows = HashMap::new();
        windows.insert(
            id.as_str().to_string(),
            DateWindowInput {
                from_date: Some("2020-01-01".to_string()),
                from_time: Some("00:00:00".to_string()),
                to_date: Some("2020-01-02".to_string()),
                to_time: Some("00:00:00".to_string()),
            },
        );
        let request = GroupAssignmentRequest {
            add: vec![id],
            windows,
            ..Default::default()
        };
        assignments
            .assign_object_to_user_groups(TYPE_POST, &post, &request)
            .await
            .expect("save");

        // The window is in the past, so the assignment exists but is inert.
        assert!(!is_assigned(&timed, &post).await);
        timed.set_ignore_dates(true);
        assert!(is_assigned(&timed, &post).await);
    }

    #[tokio::test]
    async fn test_remove_object_assignments_sweeps_all_groups() {
        let world = World::new();
        let (groups, assignments) = world.handler(StaticActor::manager("1"));
        let persisted = groups.add_user_group(UserGroup::new("g")).await.expect("create");
        let dynamic = groups.dynamic_user_group("role|editor").await.expect("resolve");
        let post = ObjectId::from("10");

        persisted.add_object(TYPE_POST, &post, None, None).await.expect("assign");
        dynamic.add_object(TYPE_POST, &post, None, None).await.expect("assign");

        assignments
            .remove_object_assignments(TYPE_POST, &post)
            .await
            .expect("remove");

        assert!(!is_assigned(&persisted, &post).await);
        assert!(!is_assigned(&dynamic, &post).await);
    }
}
