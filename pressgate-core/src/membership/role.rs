use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::{MemberGroup, Membership, ObjectMembershipHandler};
use crate::cms::CmsDirectory;
use crate::models::{GeneralObjectType, ObjectId, GENERAL_ROLE, TYPE_ROLE};
use crate::Result;

/// Role membership: direct assignment only, roles have no hierarchy.
pub struct RoleMembershipHandler {
    directory: Arc<dyn CmsDirectory>,
}

impl RoleMembershipHandler {
    #[must_use]
    pub fn new(directory: Arc<dyn CmsDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl ObjectMembershipHandler for RoleMembershipHandler {
    fn general_object_type(&self) -> GeneralObjectType {
        GeneralObjectType::Role
    }

    fn handled_objects(&self) -> Vec<String> {
        vec![GENERAL_ROLE.to_string(), TYPE_ROLE.to_string()]
    }

    async fn is_member(
        &self,
        group: &MemberGroup,
        _lock_recursive: bool,
        object_id: &ObjectId,
    ) -> Result<Membership> {
        let assigned = group.assigned_objects(GENERAL_ROLE).await?;
        Ok(match assigned.get(object_id) {
            Some(info) => Membership::member(info.clone()),
            None => Membership::not_a_member(),
        })
    }

    async fn full_objects(
        &self,
        group: &MemberGroup,
        _lock_recursive: bool,
        object_type: Option<&str>,
    ) -> Result<HashMap<ObjectId, String>> {
        let assigned = group.assigned_objects(GENERAL_ROLE).await?;
        Ok(assigned
            .iter()
            .map(|(id, info)| {
                let concrete = info
                    .assignment_type
                    .clone()
                    .unwrap_or_else(|| TYPE_ROLE.to_string());
                (id.clone(), concrete)
            })
            .filter(|(_, concrete)| object_type.is_none_or(|t| t == concrete.as_str()))
            .collect())
    }

    fn object_name(&self, object_id: &ObjectId) -> Option<String> {
        self.directory
            .role_label(object_id.as_str())
            .or_else(|| Some(object_id.as_str().to_string()))
    }
}
