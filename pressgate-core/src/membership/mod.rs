//! Membership resolution engine.
//!
//! One handler per object category answers "is this object (or anything it
//! inherits from) assigned to this group" and "give me the transitive
//! closure of assigned objects". Handlers are stateless strategies: the
//! group is passed in, owns its assignment rows, and memoizes the answers.

pub mod group;
pub mod pluggable;
pub mod post;
pub mod role;
pub mod term;
pub mod user;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cms::{CmsDirectory, ObjectTreeMaps, ObjectTypeRegistry};
use crate::models::{AssignmentInformation, GeneralObjectType, ObjectId};
use crate::repository::{ObjectAssignmentStore, UserGroupStore};
use crate::Result;

pub use group::MemberGroup;
pub use pluggable::PluggableMembershipHandler;
pub use post::PostMembershipHandler;
pub use role::RoleMembershipHandler;
pub use term::TermMembershipHandler;
pub use user::UserMembershipHandler;

/// Result of a membership check: the flag plus the "why".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Membership {
    pub is_member: bool,
    pub info: Option<AssignmentInformation>,
}

impl Membership {
    #[must_use]
    pub fn member(info: AssignmentInformation) -> Self {
        Self {
            is_member: true,
            info: Some(info),
        }
    }

    #[must_use]
    pub fn not_a_member() -> Self {
        Self::default()
    }

    /// Build from accumulated information: a membership exists when there
    /// was a direct hit or the recursive trail is non-empty.
    #[must_use]
    pub fn from_information(info: AssignmentInformation) -> Self {
        if info.assignment_type.is_some() || info.has_recursive_membership() {
            Self::member(info)
        } else {
            Self::not_a_member()
        }
    }
}

/// One membership strategy per built-in object category.
#[async_trait]
pub trait ObjectMembershipHandler: Send + Sync {
    fn general_object_type(&self) -> GeneralObjectType;

    /// Object-type identifiers this handler answers for: the general bucket
    /// plus every registered concrete sub-type.
    fn handled_objects(&self) -> Vec<String>;

    /// Whether `object_id` is a member of `group`, directly or (when
    /// `lock_recursive`) through ancestors / related objects.
    async fn is_member(
        &self,
        group: &MemberGroup,
        lock_recursive: bool,
        object_id: &ObjectId,
    ) -> Result<Membership>;

    /// Transitive closure of every object of this category assigned to
    /// `group`, optionally narrowed to one concrete sub-type.
    async fn full_objects(
        &self,
        group: &MemberGroup,
        lock_recursive: bool,
        object_type: Option<&str>,
    ) -> Result<HashMap<ObjectId, String>>;

    /// Human label for UI purposes.
    fn object_name(&self, object_id: &ObjectId) -> Option<String>;
}

/// Lookup table from general category to handler.
///
/// A closed mapping for the four built-in categories; pluggable types go
/// through their own handler which resolves registered extension objects.
pub struct MembershipHandlerRegistry {
    role: Arc<RoleMembershipHandler>,
    user: Arc<UserMembershipHandler>,
    term: Arc<TermMembershipHandler>,
    post: Arc<PostMembershipHandler>,
    pluggable: Arc<PluggableMembershipHandler>,
}

impl MembershipHandlerRegistry {
    #[must_use]
    pub fn new(
        object_types: Arc<dyn ObjectTypeRegistry>,
        tree_maps: Arc<dyn ObjectTreeMaps>,
        directory: Arc<dyn CmsDirectory>,
    ) -> Self {
        let role = Arc::new(RoleMembershipHandler::new(directory.clone()));
        let user = Arc::new(UserMembershipHandler::new(directory.clone()));
        let term = Arc::new(TermMembershipHandler::new(
            object_types.clone(),
            tree_maps.clone(),
            directory.clone(),
        ));
        let post = Arc::new(PostMembershipHandler::new(
            object_types.clone(),
            tree_maps,
            directory,
            term.clone(),
        ));
        let pluggable = Arc::new(PluggableMembershipHandler::new(object_types));

        Self {
            role,
            user,
            term,
            post,
            pluggable,
        }
    }

    /// Handler for one of the closed built-in categories; None for
    /// pluggable types, which dispatch through [`Self::pluggable`].
    #[must_use]
    pub fn builtin_handler(
        &self,
        general: &GeneralObjectType,
    ) -> Option<Arc<dyn ObjectMembershipHandler>> {
        match general {
            GeneralObjectType::Role => Some(self.role.clone()),
            GeneralObjectType::User => Some(self.user.clone()),
            GeneralObjectType::Term => Some(self.term.clone()),
            GeneralObjectType::Post => Some(self.post.clone()),
            GeneralObjectType::Pluggable(_) => None,
        }
    }

    #[must_use]
    pub fn pluggable(&self) -> &PluggableMembershipHandler {
        &self.pluggable
    }
}

/// Engine-wide toggles.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Whether ancestor / cross-referenced assignments propagate down.
    pub lock_recursive: bool,
    /// Name of the trusted client-IP header. The embedding adapter reads
    /// this to decide which header feeds `ActorContext::real_ip_header`.
    pub real_ip_header: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lock_recursive: true,
            real_ip_header: "X-Real-IP".to_string(),
        }
    }
}

impl From<&crate::config::EngineConfig> for EngineOptions {
    fn from(config: &crate::config::EngineConfig) -> Self {
        Self {
            lock_recursive: config.lock_recursive,
            real_ip_header: config.real_ip_header.clone(),
        }
    }
}

/// Shared dependencies every group operates against.
///
/// Groups hold an `Arc<GroupContext>`; the context never holds groups, so
/// there are no ownership cycles.
pub struct GroupContext {
    pub groups: Arc<dyn UserGroupStore>,
    pub assignments: Arc<dyn ObjectAssignmentStore>,
    pub object_types: Arc<dyn ObjectTypeRegistry>,
    pub directory: Arc<dyn CmsDirectory>,
    pub handlers: MembershipHandlerRegistry,
    pub options: EngineOptions,
}

impl GroupContext {
    /// Header the adapter should trust for client IPs, per configuration.
    #[must_use]
    pub fn real_ip_header(&self) -> &str {
        &self.options.real_ip_header
    }

    #[must_use]
    pub fn new(
        groups: Arc<dyn UserGroupStore>,
        assignments: Arc<dyn ObjectAssignmentStore>,
        object_types: Arc<dyn ObjectTypeRegistry>,
        tree_maps: Arc<dyn ObjectTreeMaps>,
        directory: Arc<dyn CmsDirectory>,
        options: EngineOptions,
    ) -> Self {
        let handlers =
            MembershipHandlerRegistry::new(object_types.clone(), tree_maps, directory.clone());
        Self {
            groups,
            assignments,
            object_types,
            directory,
            handlers,
            options,
        }
    }
}
