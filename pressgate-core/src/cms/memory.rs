// In-memory collaborator implementations.
//
// Used by the test suites and by embedders that build hierarchy maps
// themselves instead of adapting a live CMS. Edges are registered as
// immediate parent links; the flattened transitive maps the engine consumes
// are derived lazily and invalidated on mutation.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use super::traits::{
    ActorContext, CmsDirectory, CrossMap, ObjectTreeMaps, ObjectTypeRegistry, PluggableObject,
    TreeMap,
};
use crate::models::{
    GeneralObjectType, ObjectId, GENERAL_POST, GENERAL_ROLE, GENERAL_TERM, GENERAL_USER,
    TYPE_ATTACHMENT, TYPE_CATEGORY, TYPE_PAGE, TYPE_POST, TYPE_ROLE, TYPE_USER,
};

#[derive(Default)]
struct TreeState {
    /// child id -> (child type, parent id, parent type)
    term_parent: HashMap<ObjectId, (String, ObjectId, String)>,
    term_types: HashMap<ObjectId, String>,
    post_parent: HashMap<ObjectId, (String, ObjectId, String)>,
    post_types: HashMap<ObjectId, String>,
    /// post id -> term id -> term type
    post_terms: HashMap<ObjectId, HashMap<ObjectId, String>>,

    term_tree: Option<Arc<TreeMap>>,
    post_tree: Option<Arc<TreeMap>>,
    post_term: Option<Arc<CrossMap>>,
    term_post: Option<Arc<CrossMap>>,
}

/// In-memory `ObjectTreeMaps`.
#[derive(Default)]
pub struct MemoryTreeMaps {
    state: RwLock<TreeState>,
}

impl MemoryTreeMaps {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_term(&self, term_id: impl Into<ObjectId>, taxonomy: &str) {
        let mut state = self.state.write();
        state.term_types.insert(term_id.into(), taxonomy.to_string());
        state.term_tree = None;
    }

    pub fn add_term_with_parent(
        &self,
        term_id: impl Into<ObjectId>,
        taxonomy: &str,
        parent_id: impl Into<ObjectId>,
        parent_taxonomy: &str,
    ) {
        let term_id = term_id.into();
        let parent_id = parent_id.into();
        let mut state = self.state.write();
        state.term_types.insert(term_id.clone(), taxonomy.to_string());
        state
            .term_types
            .entry(parent_id.clone())
            .or_insert_with(|| parent_taxonomy.to_string());
        state.term_parent.insert(
            term_id,
            (taxonomy.to_string(), parent_id, parent_taxonomy.to_string()),
        );
        state.term_tree = None;
    }

    pub fn add_post(&self, post_id: impl Into<ObjectId>, post_type: &str) {
        let mut state = self.state.write();
        state.post_types.insert(post_id.into(), post_type.to_string());
        state.post_tree = None;
    }

    pub fn add_post_with_parent(
        &self,
        post_id: impl Into<ObjectId>,
        post_type: &str,
        parent_id: impl Into<ObjectId>,
        parent_type: &str,
    ) {
        let post_id = post_id.into();
        let parent_id = parent_id.into();
        let mut state = self.state.write();
        state.post_types.insert(post_id.clone(), post_type.to_string());
        state
            .post_types
            .entry(parent_id.clone())
            .or_insert_with(|| parent_type.to_string());
        state.post_parent.insert(
            post_id,
            (post_type.to_string(), parent_id, parent_type.to_string()),
        );
        state.post_tree = None;
    }

    pub fn attach_term(
        &self,
        post_id: impl Into<ObjectId>,
        term_id: impl Into<ObjectId>,
        taxonomy: &str,
    ) {
        let mut state = self.state.write();
        state
            .post_terms
            .entry(post_id.into())
            .or_default()
            .insert(term_id.into(), taxonomy.to_string());
        state.post_term = None;
        state.term_post = None;
    }

    /// Flatten immediate-parent edges into full ancestor/descendant maps.
    fn build_tree(
        parent_edges: &HashMap<ObjectId, (String, ObjectId, String)>,
        node_types: &HashMap<ObjectId, String>,
    ) -> TreeMap {
        let mut tree = TreeMap::default();

        for (child, (child_type, _, _)) in parent_edges {
            let mut ancestors: HashMap<ObjectId, String> = HashMap::new();
            let mut cursor = child.clone();
            // Walk the chain; a cycle guard caps the walk at the node count.
            for _ in 0..=parent_edges.len() {
                let Some((_, parent, parent_type)) = parent_edges.get(&cursor) else {
                    break;
                };
                if ancestors.insert(parent.clone(), parent_type.clone()).is_some() {
                    break;
                }
                cursor = parent.clone();
            }

            for (ancestor, ancestor_type) in &ancestors {
                tree.children
                    .entry(ancestor_type.clone())
                    .or_default()
                    .entry(ancestor.clone())
                    .or_default()
                    .insert(child.clone(), child_type.clone());
            }
            tree.parents
                .entry(child_type.clone())
                .or_default()
                .insert(child.clone(), ancestors);
        }

        // Leaf/root nodes still get (empty) entries so lookups are total.
        for (node, node_type) in node_types {
            tree.parents
                .entry(node_type.clone())
                .or_default()
                .entry(node.clone())
                .or_default();
        }

        tree
    }
}

impl ObjectTreeMaps for MemoryTreeMaps {
    fn term_tree_map(&self) -> Arc<TreeMap> {
        if let Some(tree) = self.state.read().term_tree.clone() {
            return tree;
        }
        let mut state = self.state.write();
        let tree = Arc::new(Self::build_tree(&state.term_parent, &state.term_types));
        state.term_tree = Some(tree.clone());
        tree
    }

    fn post_tree_map(&self) -> Arc<TreeMap> {
        if let Some(tree) = self.state.read().post_tree.clone() {
            return tree;
        }
        let mut state = self.state.write();
        let tree = Arc::new(Self::build_tree(&state.post_parent, &state.post_types));
        state.post_tree = Some(tree.clone());
        tree
    }

    fn post_term_map(&self) -> Arc<CrossMap> {
        if let Some(map) = self.state.read().post_term.clone() {
            return map;
        }
        let mut state = self.state.write();
        let map = Arc::new(state.post_terms.clone());
        state.post_term = Some(map.clone());
        map
    }

    fn term_post_map(&self) -> Arc<CrossMap> {
        if let Some(map) = self.state.read().term_post.clone() {
            return map;
        }
        let mut state = self.state.write();
        let mut inverse: CrossMap = HashMap::new();
        for (post, terms) in &state.post_terms {
            let post_type = state
                .post_types
                .get(post)
                .cloned()
                .unwrap_or_else(|| TYPE_POST.to_string());
            for term in terms.keys() {
                inverse
                    .entry(term.clone())
                    .or_default()
                    .insert(post.clone(), post_type.clone());
            }
        }
        let map = Arc::new(inverse);
        state.term_post = Some(map.clone());
        map
    }
}

/// Static `ObjectTypeRegistry` seeded with the standard CMS types.
pub struct StaticObjectTypeRegistry {
    taxonomies: RwLock<HashSet<String>>,
    post_types: RwLock<HashSet<String>>,
    pluggable_types: RwLock<HashSet<String>>,
    pluggables: RwLock<HashMap<String, Arc<dyn PluggableObject>>>,
}

impl Default for StaticObjectTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticObjectTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            taxonomies: RwLock::new(HashSet::from([TYPE_CATEGORY.to_string()])),
            post_types: RwLock::new(HashSet::from([
                TYPE_POST.to_string(),
                TYPE_PAGE.to_string(),
                TYPE_ATTACHMENT.to_string(),
            ])),
            pluggable_types: RwLock::new(HashSet::new()),
            pluggables: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_taxonomy(&self, taxonomy: &str) {
        self.taxonomies.write().insert(taxonomy.to_string());
    }

    pub fn register_post_type(&self, post_type: &str) {
        self.post_types.write().insert(post_type.to_string());
    }

    /// Declare a pluggable type without registering a handler for it.
    /// Membership checks against it fail closed until one is registered.
    pub fn register_pluggable_type(&self, object_type: &str) {
        self.pluggable_types.write().insert(object_type.to_string());
    }

    pub fn register_pluggable(&self, object: Arc<dyn PluggableObject>) {
        let object_type = object.object_type().to_string();
        self.pluggable_types.write().insert(object_type.clone());
        self.pluggables.write().insert(object_type, object);
    }
}

impl ObjectTypeRegistry for StaticObjectTypeRegistry {
    fn is_valid_object_type(&self, object_type: &str) -> bool {
        self.general_object_type(object_type).is_some()
    }

    fn general_object_type(&self, object_type: &str) -> Option<GeneralObjectType> {
        match object_type {
            GENERAL_ROLE | TYPE_ROLE => Some(GeneralObjectType::Role),
            GENERAL_USER | TYPE_USER => Some(GeneralObjectType::User),
            GENERAL_TERM => Some(GeneralObjectType::Term),
            GENERAL_POST => Some(GeneralObjectType::Post),
            t if self.is_taxonomy(t) => Some(GeneralObjectType::Term),
            t if self.is_post_type(t) => Some(GeneralObjectType::Post),
            t if self.is_pluggable_object(t) => Some(GeneralObjectType::Pluggable(t.to_string())),
            _ => None,
        }
    }

    fn is_taxonomy(&self, object_type: &str) -> bool {
        self.taxonomies.read().contains(object_type)
    }

    fn is_post_type(&self, object_type: &str) -> bool {
        self.post_types.read().contains(object_type)
    }

    fn is_pluggable_object(&self, object_type: &str) -> bool {
        self.pluggable_types.read().contains(object_type)
    }

    fn pluggable_object(&self, object_type: &str) -> Option<Arc<dyn PluggableObject>> {
        self.pluggables.read().get(object_type).cloned()
    }

    fn taxonomies(&self) -> Vec<String> {
        self.taxonomies.read().iter().cloned().collect()
    }

    fn post_types(&self) -> Vec<String> {
        self.post_types.read().iter().cloned().collect()
    }

    fn all_object_types(&self) -> Vec<String> {
        let mut all = vec![
            GENERAL_ROLE.to_string(),
            GENERAL_USER.to_string(),
            GENERAL_TERM.to_string(),
            GENERAL_POST.to_string(),
            TYPE_ROLE.to_string(),
            TYPE_USER.to_string(),
        ];
        all.extend(self.taxonomies());
        all.extend(self.post_types());
        all.extend(self.pluggable_types.read().iter().cloned());
        all
    }
}

#[derive(Default)]
struct DirectoryState {
    user_roles: HashMap<ObjectId, Vec<String>>,
    user_names: HashMap<ObjectId, String>,
    role_labels: HashMap<String, String>,
    post_titles: HashMap<ObjectId, String>,
    term_names: HashMap<ObjectId, String>,
}

/// In-memory `CmsDirectory`.
#[derive(Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: impl Into<ObjectId>, roles: &[&str]) {
        let user_id = user_id.into();
        let mut state = self.state.write();
        state
            .user_roles
            .insert(user_id, roles.iter().map(|r| (*r).to_string()).collect());
    }

    pub fn set_user_display_name(&self, user_id: impl Into<ObjectId>, name: &str) {
        self.state
            .write()
            .user_names
            .insert(user_id.into(), name.to_string());
    }

    pub fn set_role_label(&self, role: &str, label: &str) {
        self.state
            .write()
            .role_labels
            .insert(role.to_string(), label.to_string());
    }

    pub fn set_post_title(&self, post_id: impl Into<ObjectId>, title: &str) {
        self.state
            .write()
            .post_titles
            .insert(post_id.into(), title.to_string());
    }

    pub fn set_term_name(&self, term_id: impl Into<ObjectId>, name: &str) {
        self.state
            .write()
            .term_names
            .insert(term_id.into(), name.to_string());
    }
}

impl CmsDirectory for MemoryDirectory {
    fn user_roles(&self, user_id: &ObjectId) -> Vec<String> {
        self.state
            .read()
            .user_roles
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    fn users_with_role(&self, role: &str) -> Vec<ObjectId> {
        self.state
            .read()
            .user_roles
            .iter()
            .filter(|(_, roles)| roles.iter().any(|r| r == role))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn user_display_name(&self, user_id: &ObjectId) -> Option<String> {
        self.state.read().user_names.get(user_id).cloned()
    }

    fn role_label(&self, role: &str) -> Option<String> {
        self.state.read().role_labels.get(role).cloned()
    }

    fn post_title(&self, post_id: &ObjectId) -> Option<String> {
        self.state.read().post_titles.get(post_id).cloned()
    }

    fn term_name(&self, term_id: &ObjectId) -> Option<String> {
        self.state.read().term_names.get(term_id).cloned()
    }
}

/// Fixed-value `ActorContext`.
#[derive(Debug, Clone)]
pub struct StaticActor {
    pub user_id: ObjectId,
    pub roles: Vec<String>,
    pub real_ip_header: Option<IpAddr>,
    pub remote_addr: Option<IpAddr>,
    pub can_manage_user_groups: bool,
}

impl StaticActor {
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            user_id: ObjectId::from("0"),
            roles: Vec::new(),
            real_ip_header: None,
            remote_addr: None,
            can_manage_user_groups: false,
        }
    }

    #[must_use]
    pub fn user(user_id: impl Into<ObjectId>, roles: &[&str]) -> Self {
        Self {
            user_id: user_id.into(),
            roles: roles.iter().map(|r| (*r).to_string()).collect(),
            real_ip_header: None,
            remote_addr: None,
            can_manage_user_groups: false,
        }
    }

    #[must_use]
    pub fn manager(user_id: impl Into<ObjectId>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: vec!["administrator".to_string()],
            real_ip_header: None,
            remote_addr: None,
            can_manage_user_groups: true,
        }
    }
}

impl ActorContext for StaticActor {
    fn user_id(&self) -> ObjectId {
        self.user_id.clone()
    }

    fn roles(&self) -> Vec<String> {
        self.roles.clone()
    }

    fn real_ip_header(&self) -> Option<IpAddr> {
        self.real_ip_header
    }

    fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }

    fn can_manage_user_groups(&self) -> bool {
        self.can_manage_user_groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_flattening_is_transitive() {
        let maps = MemoryTreeMaps::new();
        maps.add_term("1", "category");
        maps.add_term_with_parent("2", "category", "1", "category");
        maps.add_term_with_parent("3", "category", "2", "category");

        let tree = maps.term_tree_map();
        let ancestors = tree.ancestors(&ObjectId::from("3"));
        assert!(ancestors.contains_key(&ObjectId::from("2")));
        assert!(ancestors.contains_key(&ObjectId::from("1")));

        let descendants = tree.descendants(&ObjectId::from("1"));
        assert!(descendants.contains_key(&ObjectId::from("2")));
        assert!(descendants.contains_key(&ObjectId::from("3")));
    }

    #[test]
    fn test_tree_rebuilds_after_mutation() {
        let maps = MemoryTreeMaps::new();
        maps.add_post("1", "post");
        let before = maps.post_tree_map();
        assert!(before.ancestors(&ObjectId::from("2")).is_empty());

        maps.add_post_with_parent("2", "post", "1", "post");
        let after = maps.post_tree_map();
        assert!(after.ancestors(&ObjectId::from("2")).contains_key(&ObjectId::from("1")));
    }

    #[test]
    fn test_term_post_map_is_inverse() {
        let maps = MemoryTreeMaps::new();
        maps.add_post("10", "post");
        maps.attach_term("10", "3", "category");

        let forward = maps.post_term_map();
        assert!(forward[&ObjectId::from("10")].contains_key(&ObjectId::from("3")));

        let inverse = maps.term_post_map();
        assert_eq!(
            inverse[&ObjectId::from("3")][&ObjectId::from("10")],
            "post".to_string()
        );
    }

    #[test]
    fn test_registry_general_types() {
        let registry = StaticObjectTypeRegistry::new();
        assert_eq!(
            registry.general_object_type("page"),
            Some(GeneralObjectType::Post)
        );
        assert_eq!(
            registry.general_object_type("category"),
            Some(GeneralObjectType::Term)
        );
        assert_eq!(
            registry.general_object_type("user"),
            Some(GeneralObjectType::User)
        );
        assert_eq!(registry.general_object_type("widget"), None);

        registry.register_pluggable_type("widget");
        assert_eq!(
            registry.general_object_type("widget"),
            Some(GeneralObjectType::Pluggable("widget".to_string()))
        );
    }

    #[test]
    fn test_directory_role_lookup() {
        let dir = MemoryDirectory::new();
        dir.add_user("42", &["editor", "author"]);
        dir.add_user("7", &["subscriber"]);

        assert_eq!(dir.user_roles(&ObjectId::from("42")).len(), 2);
        assert_eq!(dir.users_with_role("editor"), vec![ObjectId::from("42")]);
        assert!(dir.users_with_role("ghost").is_empty());
    }

    #[test]
    fn test_actor_ip_precedence() {
        let mut actor = StaticActor::user("42", &["editor"]);
        actor.remote_addr = Some("10.0.0.1".parse().expect("ip"));
        assert_eq!(actor.request_ip(), actor.remote_addr);

        actor.real_ip_header = Some("203.0.113.9".parse().expect("ip"));
        assert_eq!(actor.request_ip(), actor.real_ip_header);
    }
}
