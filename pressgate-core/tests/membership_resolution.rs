//! End-to-end membership resolution over hierarchies and roles.

use std::sync::Arc;

use pressgate_core::cms::{
    MemoryDirectory, MemoryTreeMaps, StaticActor, StaticObjectTypeRegistry,
};
use pressgate_core::membership::{EngineOptions, GroupContext, MemberGroup};
use pressgate_core::models::{
    ObjectId, UserGroup, GENERAL_POST, GENERAL_ROLE, GENERAL_TERM, GENERAL_USER,
};
use pressgate_core::repository::MemoryStore;
use pressgate_core::service::UserGroupHandler;

struct Fixture {
    store: Arc<MemoryStore>,
    tree: Arc<MemoryTreeMaps>,
    registry: Arc<StaticObjectTypeRegistry>,
    directory: Arc<MemoryDirectory>,
    ctx: Arc<GroupContext>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    fn with_options(options: EngineOptions) -> Self {
        let store = Arc::new(MemoryStore::new());
        let tree = Arc::new(MemoryTreeMaps::new());
        let registry = Arc::new(StaticObjectTypeRegistry::new());
        let directory = Arc::new(MemoryDirectory::new());
        let ctx = Arc::new(GroupContext::new(
            store.clone(),
            store.clone(),
            registry.clone(),
            tree.clone(),
            directory.clone(),
            options,
        ));
        Self {
            store,
            tree,
            registry,
            directory,
            ctx,
        }
    }

    fn group(&self, name: &str) -> MemberGroup {
        MemberGroup::from_persisted(UserGroup::new(name), self.ctx.clone())
    }
}

#[tokio::test]
async fn term_membership_flows_down_the_term_tree() {
    let fx = Fixture::new();
    fx.tree.add_term("3", "category");
    fx.tree.add_term_with_parent("9", "category", "3", "category");

    let group = fx.group("g1");
    group
        .add_object("category", &ObjectId::from("3"), None, None)
        .await
        .expect("assign term 3");

    // Direct hit on the assigned term itself.
    let direct = group
        .is_object_member("category", &ObjectId::from("3"))
        .await
        .expect("check");
    assert!(direct.is_member);
    assert_eq!(
        direct.info.expect("info").assignment_type.as_deref(),
        Some("category")
    );

    // The child inherits, with the causing term in the trail.
    let inherited = group
        .is_object_member("category", &ObjectId::from("9"))
        .await
        .expect("check");
    assert!(inherited.is_member);
    let info = inherited.info.expect("info");
    assert_eq!(info.assignment_type, None);
    assert!(info.recursive_membership[GENERAL_TERM].contains_key(&ObjectId::from("3")));
}

#[tokio::test]
async fn disabling_recursion_stops_inheritance() {
    let fx = Fixture::with_options(EngineOptions {
        lock_recursive: false,
        ..EngineOptions::default()
    });
    fx.tree.add_term("3", "category");
    fx.tree.add_term_with_parent("9", "category", "3", "category");

    let group = fx.group("g1");
    group
        .add_object("category", &ObjectId::from("3"), None, None)
        .await
        .expect("assign");

    assert!(
        group
            .is_object_member("category", &ObjectId::from("3"))
            .await
            .expect("check")
            .is_member
    );
    assert!(
        !group
            .is_object_member("category", &ObjectId::from("9"))
            .await
            .expect("check")
            .is_member
    );
}

#[tokio::test]
async fn deep_term_chain_puts_assigned_ancestors_in_the_trail() {
    let fx = Fixture::new();
    fx.tree.add_term("1", "category");
    fx.tree.add_term_with_parent("2", "category", "1", "category");
    fx.tree.add_term_with_parent("3", "category", "2", "category");

    let group = fx.group("g1");
    group
        .add_object("category", &ObjectId::from("1"), None, None)
        .await
        .expect("assign");

    let membership = group
        .is_object_member("category", &ObjectId::from("3"))
        .await
        .expect("check");
    assert!(membership.is_member);
    let trail = &membership.info.expect("info").recursive_membership[GENERAL_TERM];
    // Only the assigned ancestor shows up, not the unassigned middle term.
    assert!(trail.contains_key(&ObjectId::from("1")));
    assert!(!trail.contains_key(&ObjectId::from("2")));
}

#[tokio::test]
async fn post_membership_flows_down_the_post_tree() {
    let fx = Fixture::new();
    fx.tree.add_post("10", "page");
    fx.tree.add_post_with_parent("11", "page", "10", "page");

    let group = fx.group("g1");
    group
        .add_object("page", &ObjectId::from("10"), None, None)
        .await
        .expect("assign");

    let inherited = group
        .is_object_member("page", &ObjectId::from("11"))
        .await
        .expect("check");
    assert!(inherited.is_member);
    let info = inherited.info.expect("info");
    assert!(info.recursive_membership[GENERAL_POST].contains_key(&ObjectId::from("10")));
}

#[tokio::test]
async fn post_inherits_membership_from_attached_term() {
    let fx = Fixture::new();
    fx.tree.add_term("3", "category");
    fx.tree.add_post("10", "post");
    fx.tree.attach_term("10", "3", "category");

    let group = fx.group("g1");
    group
        .add_object("category", &ObjectId::from("3"), None, None)
        .await
        .expect("assign term");

    let via_term = group
        .is_object_member("post", &ObjectId::from("10"))
        .await
        .expect("check");
    assert!(via_term.is_member);
    let info = via_term.info.expect("info");
    let term_trail = &info.recursive_membership[GENERAL_TERM];
    assert_eq!(
        term_trail[&ObjectId::from("3")].assignment_type.as_deref(),
        Some("category")
    );
}

#[tokio::test]
async fn post_inherits_through_term_hierarchy() {
    // Post in a child term, group assigned to the parent term: membership
    // crosses the post->term edge and then the term tree.
    let fx = Fixture::new();
    fx.tree.add_term("3", "category");
    fx.tree.add_term_with_parent("9", "category", "3", "category");
    fx.tree.add_post("10", "post");
    fx.tree.attach_term("10", "9", "category");

    let group = fx.group("g1");
    group
        .add_object("category", &ObjectId::from("3"), None, None)
        .await
        .expect("assign");

    let membership = group
        .is_object_member("post", &ObjectId::from("10"))
        .await
        .expect("check");
    assert!(membership.is_member);

    // The trail keeps the path: term 9 caused it, itself caused by term 3.
    let info = membership.info.expect("info");
    let via = &info.recursive_membership[GENERAL_TERM][&ObjectId::from("9")];
    assert!(via.recursive_membership[GENERAL_TERM].contains_key(&ObjectId::from("3")));
}

#[tokio::test]
async fn user_membership_through_role() {
    let fx = Fixture::new();
    fx.directory.add_user("42", &["editor"]);
    fx.directory.add_user("7", &["subscriber"]);

    let group = fx.group("g2");
    group
        .add_object("role", &ObjectId::from("editor"), None, None)
        .await
        .expect("assign role");

    let member = group
        .is_object_member("user", &ObjectId::from("42"))
        .await
        .expect("check");
    assert!(member.is_member);
    let info = member.info.expect("info");
    assert!(info.recursive_membership[GENERAL_ROLE].contains_key(&ObjectId::from("editor")));

    assert!(
        !group
            .is_object_member("user", &ObjectId::from("7"))
            .await
            .expect("check")
            .is_member
    );
}

#[tokio::test]
async fn role_carried_membership_ignores_recursion_toggle() {
    let fx = Fixture::with_options(EngineOptions {
        lock_recursive: false,
        ..EngineOptions::default()
    });
    fx.directory.add_user("42", &["editor"]);

    let group = fx.group("g2");
    group
        .add_object("role", &ObjectId::from("editor"), None, None)
        .await
        .expect("assign");

    assert!(
        group
            .is_object_member("user", &ObjectId::from("42"))
            .await
            .expect("check")
            .is_member
    );
}

#[tokio::test]
async fn full_objects_includes_term_attached_posts() {
    let fx = Fixture::new();
    fx.tree.add_term("3", "category");
    fx.tree.add_post("10", "post");
    fx.tree.add_post("20", "page");
    fx.tree.attach_term("10", "3", "category");

    let group = fx.group("g3");
    group
        .add_object("category", &ObjectId::from("3"), None, None)
        .await
        .expect("assign term");
    group
        .add_object("page", &ObjectId::from("20"), None, None)
        .await
        .expect("assign page");

    let full = group.full_objects(GENERAL_POST).await.expect("full");
    assert_eq!(full.get(&ObjectId::from("10")), Some(&"post".to_string()));
    assert_eq!(full.get(&ObjectId::from("20")), Some(&"page".to_string()));

    // Narrowing to one concrete type drops the rest.
    let pages = group.full_objects("page").await.expect("full");
    assert!(pages.contains_key(&ObjectId::from("20")));
    assert!(!pages.contains_key(&ObjectId::from("10")));
}

#[tokio::test]
async fn full_objects_includes_role_carried_users() {
    let fx = Fixture::new();
    fx.directory.add_user("42", &["editor"]);
    fx.directory.add_user("43", &["editor"]);
    fx.directory.add_user("7", &["subscriber"]);

    let group = fx.group("g2");
    group
        .add_object("role", &ObjectId::from("editor"), None, None)
        .await
        .expect("assign role");
    group
        .add_object("user", &ObjectId::from("7"), None, None)
        .await
        .expect("assign user");

    let users = group.full_objects(GENERAL_USER).await.expect("full");
    assert!(users.contains_key(&ObjectId::from("42")));
    assert!(users.contains_key(&ObjectId::from("43")));
    assert!(users.contains_key(&ObjectId::from("7")));
    assert_eq!(users.len(), 3);
}

#[tokio::test]
async fn registered_custom_types_resolve_like_builtins() {
    let fx = Fixture::new();
    fx.registry.register_taxonomy("product_cat");
    fx.registry.register_post_type("product");
    fx.tree.add_term("5", "product_cat");
    fx.tree.add_post("30", "product");
    fx.tree.attach_term("30", "5", "product_cat");

    let group = fx.group("shop");
    group
        .add_object("product_cat", &ObjectId::from("5"), None, None)
        .await
        .expect("assign");

    assert!(
        group
            .is_object_member("product", &ObjectId::from("30"))
            .await
            .expect("check")
            .is_member
    );
}

#[tokio::test]
async fn repeated_checks_hit_the_store_once_per_bucket() {
    let fx = Fixture::new();
    fx.tree.add_term("3", "category");
    fx.tree.add_post("10", "post");
    fx.tree.attach_term("10", "3", "category");

    let group = fx.group("g1");
    group
        .add_object("category", &ObjectId::from("3"), None, None)
        .await
        .expect("assign");

    let before = fx.store.assignment_fetches();
    for _ in 0..5 {
        group
            .is_object_member("post", &ObjectId::from("10"))
            .await
            .expect("check");
    }
    // One fetch for the post bucket and one for the term bucket.
    assert_eq!(fx.store.assignment_fetches(), before + 2);
}

#[tokio::test]
async fn handler_sweep_finds_groups_by_every_road() {
    let fx = Fixture::new();
    fx.tree.add_term("3", "category");
    fx.tree.add_post("10", "post");
    fx.tree.attach_term("10", "3", "category");

    let handler = UserGroupHandler::new(fx.ctx.clone(), Arc::new(StaticActor::manager("1")));
    let direct = handler
        .add_user_group(UserGroup::new("direct"))
        .await
        .expect("create");
    let via_term = handler
        .add_user_group(UserGroup::new("via term"))
        .await
        .expect("create");
    let unrelated = handler
        .add_user_group(UserGroup::new("unrelated"))
        .await
        .expect("create");

    direct
        .add_object("post", &ObjectId::from("10"), None, None)
        .await
        .expect("assign");
    via_term
        .add_object("category", &ObjectId::from("3"), None, None)
        .await
        .expect("assign");

    let groups = handler
        .user_groups_for_object("post", &ObjectId::from("10"), false)
        .await
        .expect("sweep");
    let keys: Vec<_> = groups.iter().map(|g| g.key().clone()).collect();
    assert!(keys.contains(direct.key()));
    assert!(keys.contains(via_term.key()));
    assert!(!keys.contains(unrelated.key()));
}
