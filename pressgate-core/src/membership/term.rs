use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::{MemberGroup, Membership, ObjectMembershipHandler};
use crate::cms::{CmsDirectory, ObjectTreeMaps, ObjectTypeRegistry};
use crate::models::{
    AssignmentInformation, GeneralObjectType, ObjectId, GENERAL_TERM, TYPE_CATEGORY,
};
use crate::Result;

/// Term membership: direct assignment, or (in recursive mode) any ancestor
/// term assigned to the group. The tree map is already flattened per node,
/// so one lookup yields the whole ancestor chain; every assigned ancestor
/// lands in the trail, not just the nearest.
pub struct TermMembershipHandler {
    object_types: Arc<dyn ObjectTypeRegistry>,
    tree_maps: Arc<dyn ObjectTreeMaps>,
    directory: Arc<dyn CmsDirectory>,
}

impl TermMembershipHandler {
    #[must_use]
    pub fn new(
        object_types: Arc<dyn ObjectTypeRegistry>,
        tree_maps: Arc<dyn ObjectTreeMaps>,
        directory: Arc<dyn CmsDirectory>,
    ) -> Self {
        Self {
            object_types,
            tree_maps,
            directory,
        }
    }
}

#[async_trait]
impl ObjectMembershipHandler for TermMembershipHandler {
    fn general_object_type(&self) -> GeneralObjectType {
        GeneralObjectType::Term
    }

    fn handled_objects(&self) -> Vec<String> {
        let mut handled = vec![GENERAL_TERM.to_string()];
        handled.extend(self.object_types.taxonomies());
        handled
    }

    async fn is_member(
        &self,
        group: &MemberGroup,
        lock_recursive: bool,
        object_id: &ObjectId,
    ) -> Result<Membership> {
        let assigned = group.assigned_objects(GENERAL_TERM).await?;

        let mut info = assigned
            .get(object_id)
            .cloned()
            .unwrap_or_else(AssignmentInformation::recursive_only);

        if lock_recursive {
            let tree = self.tree_maps.term_tree_map();
            for (ancestor, _ancestor_type) in tree.ancestors(object_id) {
                if let Some(ancestor_info) = assigned.get(&ancestor) {
                    info.add_recursive(GENERAL_TERM, ancestor, ancestor_info.clone());
                }
            }
        }

        Ok(Membership::from_information(info))
    }

    async fn full_objects(
        &self,
        group: &MemberGroup,
        lock_recursive: bool,
        object_type: Option<&str>,
    ) -> Result<HashMap<ObjectId, String>> {
        let assigned = group.assigned_objects(GENERAL_TERM).await?;

        let mut full: HashMap<ObjectId, String> = assigned
            .iter()
            .map(|(id, info)| {
                let concrete = info
                    .assignment_type
                    .clone()
                    .unwrap_or_else(|| TYPE_CATEGORY.to_string());
                (id.clone(), concrete)
            })
            .collect();

        if lock_recursive {
            let tree = self.tree_maps.term_tree_map();
            for term in assigned.keys() {
                for (descendant, descendant_type) in tree.descendants(term) {
                    full.entry(descendant).or_insert(descendant_type);
                }
            }
        }

        if let Some(filter) = object_type {
            if filter != GENERAL_TERM {
                full.retain(|_, concrete| concrete == filter);
            }
        }

        Ok(full)
    }

    fn object_name(&self, object_id: &ObjectId) -> Option<String> {
        self.directory.term_name(object_id)
    }
}
