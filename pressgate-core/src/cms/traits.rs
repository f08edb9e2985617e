// CMS collaborator boundary
//
// The membership engine never talks to the CMS directly; everything it needs
// (object hierarchies, type registration, user/role lookups, request actor)
// comes through these interfaces. Production embeds the engine behind CMS
// adapters; tests use the in-memory implementations in `cms::memory`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::membership::group::MemberGroup;
use crate::models::{AssignmentInformation, GeneralObjectType, ObjectId};
use crate::Result;

/// Flattened adjacency for one object hierarchy.
///
/// Both maps are keyed `object type -> object id -> related id -> related
/// type`. The inner maps are already transitive: a node's parents entry
/// holds its full ancestor chain, its children entry the full descendant
/// closure, so membership checks need a single lookup per node.
#[derive(Debug, Clone, Default)]
pub struct TreeMap {
    pub parents: HashMap<String, HashMap<ObjectId, HashMap<ObjectId, String>>>,
    pub children: HashMap<String, HashMap<ObjectId, HashMap<ObjectId, String>>>,
}

impl TreeMap {
    /// All ancestors of `object_id`, merged across the per-type maps.
    #[must_use]
    pub fn ancestors(&self, object_id: &ObjectId) -> HashMap<ObjectId, String> {
        Self::merged_lookup(&self.parents, object_id)
    }

    /// All descendants of `object_id`, merged across the per-type maps.
    #[must_use]
    pub fn descendants(&self, object_id: &ObjectId) -> HashMap<ObjectId, String> {
        Self::merged_lookup(&self.children, object_id)
    }

    fn merged_lookup(
        map: &HashMap<String, HashMap<ObjectId, HashMap<ObjectId, String>>>,
        object_id: &ObjectId,
    ) -> HashMap<ObjectId, String> {
        let mut merged = HashMap::new();
        for per_type in map.values() {
            if let Some(related) = per_type.get(object_id) {
                merged.extend(related.iter().map(|(id, t)| (id.clone(), t.clone())));
            }
        }
        merged
    }
}

/// Cross-reference map between two object categories
/// (`post id -> term id -> term type` and its inverse).
pub type CrossMap = HashMap<ObjectId, HashMap<ObjectId, String>>;

/// Supplier of the parent/child adjacency and post↔term cross maps.
///
/// Building these from the CMS (walking post parents, term taxonomies, term
/// attachments) is outside the engine; implementations hand over prebuilt,
/// flattened maps.
pub trait ObjectTreeMaps: Send + Sync {
    fn term_tree_map(&self) -> Arc<TreeMap>;
    fn post_tree_map(&self) -> Arc<TreeMap>;
    fn post_term_map(&self) -> Arc<CrossMap>;
    fn term_post_map(&self) -> Arc<CrossMap>;
}

/// Registry of object types known to the CMS.
pub trait ObjectTypeRegistry: Send + Sync {
    fn is_valid_object_type(&self, object_type: &str) -> bool;

    /// Resolve a concrete type to its coarse dispatch category.
    fn general_object_type(&self, object_type: &str) -> Option<GeneralObjectType>;

    fn is_taxonomy(&self, object_type: &str) -> bool;
    fn is_post_type(&self, object_type: &str) -> bool;
    fn is_pluggable_object(&self, object_type: &str) -> bool;

    /// Registered extension object for a pluggable type, if any.
    fn pluggable_object(&self, object_type: &str) -> Option<Arc<dyn PluggableObject>>;

    fn taxonomies(&self) -> Vec<String>;
    fn post_types(&self) -> Vec<String>;
    fn all_object_types(&self) -> Vec<String>;
}

/// User and role lookups the engine needs beyond tree maps.
pub trait CmsDirectory: Send + Sync {
    /// Roles held by a user; empty for unknown users.
    fn user_roles(&self, user_id: &ObjectId) -> Vec<String>;

    /// Every user holding the given role.
    fn users_with_role(&self, role: &str) -> Vec<ObjectId>;

    fn user_display_name(&self, user_id: &ObjectId) -> Option<String>;
    fn role_label(&self, role: &str) -> Option<String>;
    fn post_title(&self, post_id: &ObjectId) -> Option<String>;
    fn term_name(&self, term_id: &ObjectId) -> Option<String>;
}

/// The current request's actor.
pub trait ActorContext: Send + Sync {
    /// Current CMS user id; `"0"` for anonymous sessions.
    fn user_id(&self) -> ObjectId;

    fn roles(&self) -> Vec<String>;

    /// Value of the trusted client-IP header (`X-Real-IP`), if present.
    fn real_ip_header(&self) -> Option<IpAddr>;

    /// Transport-level peer address.
    fn remote_addr(&self) -> Option<IpAddr>;

    /// The single capability the engine cares about: may this actor manage
    /// user groups (see every group, assign dynamic groups)?
    fn can_manage_user_groups(&self) -> bool;

    /// Effective request IP: header first, remote address as fallback.
    fn request_ip(&self) -> Option<IpAddr> {
        self.real_ip_header().or_else(|| self.remote_addr())
    }
}

/// Extension point for object categories the engine does not know about.
///
/// Registered per object-type string through the `ObjectTypeRegistry`. When
/// a pluggable type has no registered object, membership resolves to
/// "not a member" at the group boundary rather than erroring outward.
#[async_trait]
pub trait PluggableObject: Send + Sync {
    fn object_type(&self) -> &str;

    /// Recursive membership of `object_id` in `group`, or None if the
    /// object is not a member.
    async fn recursive_membership(
        &self,
        group: &MemberGroup,
        object_id: &ObjectId,
    ) -> Result<Option<AssignmentInformation>>;

    /// Transitive closure of every object of this type assigned to `group`.
    async fn full_objects(&self, group: &MemberGroup) -> Result<HashMap<ObjectId, String>>;

    fn object_name(&self, object_id: &ObjectId) -> Option<String>;
}
