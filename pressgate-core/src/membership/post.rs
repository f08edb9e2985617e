use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::{MemberGroup, Membership, ObjectMembershipHandler, TermMembershipHandler};
use crate::cms::{CmsDirectory, ObjectTreeMaps, ObjectTypeRegistry};
use crate::models::{
    AssignmentInformation, GeneralObjectType, ObjectId, GENERAL_POST, GENERAL_TERM, TYPE_POST,
};
use crate::Result;

/// Post membership: direct assignment, ancestor-post assignment, or
/// membership of any term attached to the post. Term checks go through the
/// term handler so term-side recursion is honored too.
pub struct PostMembershipHandler {
    object_types: Arc<dyn ObjectTypeRegistry>,
    tree_maps: Arc<dyn ObjectTreeMaps>,
    directory: Arc<dyn CmsDirectory>,
    term_handler: Arc<TermMembershipHandler>,
}

impl PostMembershipHandler {
    #[must_use]
    pub fn new(
        object_types: Arc<dyn ObjectTypeRegistry>,
        tree_maps: Arc<dyn ObjectTreeMaps>,
        directory: Arc<dyn CmsDirectory>,
        term_handler: Arc<TermMembershipHandler>,
    ) -> Self {
        Self {
            object_types,
            tree_maps,
            directory,
            term_handler,
        }
    }
}

#[async_trait]
impl ObjectMembershipHandler for PostMembershipHandler {
    fn general_object_type(&self) -> GeneralObjectType {
        GeneralObjectType::Post
    }

    fn handled_objects(&self) -> Vec<String> {
        let mut handled = vec![GENERAL_POST.to_string()];
        handled.extend(self.object_types.post_types());
        handled
    }

    async fn is_member(
        &self,
        group: &MemberGroup,
        lock_recursive: bool,
        object_id: &ObjectId,
    ) -> Result<Membership> {
        let assigned = group.assigned_objects(GENERAL_POST).await?;

        let mut info = assigned
            .get(object_id)
            .cloned()
            .unwrap_or_else(AssignmentInformation::recursive_only);

        if lock_recursive {
            let tree = self.tree_maps.post_tree_map();
            for (ancestor, _ancestor_type) in tree.ancestors(object_id) {
                if let Some(ancestor_info) = assigned.get(&ancestor) {
                    info.add_recursive(GENERAL_POST, ancestor, ancestor_info.clone());
                }
            }

            if let Some(terms) = self.tree_maps.post_term_map().get(object_id) {
                for term_id in terms.keys() {
                    let term_membership = self
                        .term_handler
                        .is_member(group, true, term_id)
                        .await?;
                    if term_membership.is_member {
                        info.add_recursive(
                            GENERAL_TERM,
                            term_id.clone(),
                            term_membership.info.unwrap_or_default(),
                        );
                    }
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
        let assigned = group.assigned_objects(GENERAL_POST).await?;

        let mut full: HashMap<ObjectId, String> = assigned
            .iter()
            .map(|(id, info)| {
                let concrete = info
                    .assignment_type
                    .clone()
                    .unwrap_or_else(|| TYPE_POST.to_string());
                (id.clone(), concrete)
            })
            .collect();

        if lock_recursive {
            let tree = self.tree_maps.post_tree_map();
            for post in assigned.keys() {
                for (descendant, descendant_type) in tree.descendants(post) {
                    full.entry(descendant).or_insert(descendant_type);
                }
            }

            // Every post attached to a fully assigned term is pulled in
            // through the term -> post cross map.
            let term_post_map = self.tree_maps.term_post_map();
            let full_terms = self.term_handler.full_objects(group, true, None).await?;
            for term in full_terms.keys() {
                if let Some(posts) = term_post_map.get(term) {
                    for (post, post_type) in posts {
                        full.entry(post.clone()).or_insert_with(|| post_type.clone());
                    }
                }
            }
        }

        if let Some(filter) = object_type {
            if filter != GENERAL_POST {
                full.retain(|_, concrete| concrete == filter);
            }
        }

        Ok(full)
    }

    fn object_name(&self, object_id: &ObjectId) -> Option<String> {
        self.directory.post_title(object_id)
    }
}
