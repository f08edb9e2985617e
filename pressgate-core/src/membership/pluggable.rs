use std::collections::HashMap;
use std::sync::Arc;

use super::{MemberGroup, Membership};
use crate::cms::ObjectTypeRegistry;
use crate::models::{AssignmentInformation, ObjectId};
use crate::{Error, Result};

/// Dispatcher for extension object types.
///
/// Unlike the built-in handlers this is keyed by the concrete type string:
/// each registered [`crate::cms::PluggableObject`] owns one type and
/// supplies the recursive part of the answer. An unregistered type yields
/// [`Error::MissingHandler`], which the group turns into "not a member".
pub struct PluggableMembershipHandler {
    object_types: Arc<dyn ObjectTypeRegistry>,
}

impl PluggableMembershipHandler {
    #[must_use]
    pub fn new(object_types: Arc<dyn ObjectTypeRegistry>) -> Self {
        Self { object_types }
    }

    pub async fn is_member_of(
        &self,
        object_type: &str,
        group: &MemberGroup,
        lock_recursive: bool,
        object_id: &ObjectId,
    ) -> Result<Membership> {
        let Some(pluggable) = self.object_types.pluggable_object(object_type) else {
            return Err(Error::MissingHandler(object_type.to_string()));
        };

        let assigned = group.assigned_objects(object_type).await?;
        let mut info = assigned
            .get(object_id)
            .cloned()
            .unwrap_or_else(AssignmentInformation::recursive_only);

        if lock_recursive {
            // Some(..) from the extension means "member"; its trail carries
            // the causes. A trail-less answer stands in for a direct hit.
            if let Some(recursive) = pluggable.recursive_membership(group, object_id).await? {
                if recursive.has_recursive_membership() {
                    for (general, branch) in recursive.recursive_membership {
                        info.extend_recursive(general, branch);
                    }
                } else if info.assignment_type.is_none() {
                    info = recursive;
                }
            }
        }

        Ok(Membership::from_information(info))
    }

    pub async fn full_objects_of(
        &self,
        object_type: &str,
        group: &MemberGroup,
        lock_recursive: bool,
    ) -> Result<HashMap<ObjectId, String>> {
        let Some(pluggable) = self.object_types.pluggable_object(object_type) else {
            return Err(Error::MissingHandler(object_type.to_string()));
        };

        let mut full: HashMap<ObjectId, String> = group
            .assigned_objects(object_type)
            .await?
            .keys()
            .map(|id| (id.clone(), object_type.to_string()))
            .collect();

        if lock_recursive {
            for (id, concrete) in pluggable.full_objects(group).await? {
                full.entry(id).or_insert(concrete);
            }
        }

        Ok(full)
    }

    #[must_use]
    pub fn object_name_of(&self, object_type: &str, object_id: &ObjectId) -> Option<String> {
        self.object_types
            .pluggable_object(object_type)
            .and_then(|p| p.object_name(object_id))
    }
}
