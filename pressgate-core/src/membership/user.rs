use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::{MemberGroup, Membership, ObjectMembershipHandler};
use crate::cms::CmsDirectory;
use crate::models::{
    AssignmentInformation, GeneralObjectType, ObjectId, GENERAL_ROLE, GENERAL_USER, TYPE_USER,
};
use crate::Result;

/// User membership: direct assignment, or any held role assigned to the
/// group. Recursion is exactly one level (user -> roles) and applies
/// regardless of the recursive-lock mode.
pub struct UserMembershipHandler {
    directory: Arc<dyn CmsDirectory>,
}

impl UserMembershipHandler {
    #[must_use]
    pub fn new(directory: Arc<dyn CmsDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl ObjectMembershipHandler for UserMembershipHandler {
    fn general_object_type(&self) -> GeneralObjectType {
        GeneralObjectType::User
    }

    fn handled_objects(&self) -> Vec<String> {
        vec![GENERAL_USER.to_string(), TYPE_USER.to_string()]
    }

    async fn is_member(
        &self,
        group: &MemberGroup,
        _lock_recursive: bool,
        object_id: &ObjectId,
    ) -> Result<Membership> {
        let assigned_users = group.assigned_objects(GENERAL_USER).await?;
        let assigned_roles = group.assigned_objects(GENERAL_ROLE).await?;

        // Direct assignment takes precedence for the returned window; the
        // role trail is attached either way.
        let mut info = assigned_users
            .get(object_id)
            .cloned()
            .unwrap_or_else(AssignmentInformation::recursive_only);

        for role in self.directory.user_roles(object_id) {
            let role_id = ObjectId::from(role.as_str());
            if let Some(role_info) = assigned_roles.get(&role_id) {
                info.add_recursive(GENERAL_ROLE, role_id, role_info.clone());
            }
        }

        Ok(Membership::from_information(info))
    }

    async fn full_objects(
        &self,
        group: &MemberGroup,
        _lock_recursive: bool,
        object_type: Option<&str>,
    ) -> Result<HashMap<ObjectId, String>> {
        if object_type.is_some_and(|t| t != GENERAL_USER && t != TYPE_USER) {
            return Ok(HashMap::new());
        }

        let mut full: HashMap<ObjectId, String> = group
            .assigned_objects(GENERAL_USER)
            .await?
            .keys()
            .map(|id| (id.clone(), TYPE_USER.to_string()))
            .collect();

        for role in group.assigned_objects(GENERAL_ROLE).await?.keys() {
            for user in self.directory.users_with_role(role.as_str()) {
                full.entry(user).or_insert_with(|| TYPE_USER.to_string());
            }
        }

        Ok(full)
    }

    fn object_name(&self, object_id: &ObjectId) -> Option<String> {
        self.directory.user_display_name(object_id)
    }
}
