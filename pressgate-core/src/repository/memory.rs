use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{ObjectAssignmentStore, UserGroupStore};
use crate::models::{GroupId, GroupKey, GroupType, ObjectAssignment, ObjectId, UserGroup};
use crate::Result;

/// In-memory store implementing both persistence traits.
///
/// Backs the hermetic test suites and storeless embedders. Fetches are
/// counted so the engine's memoization layers are observable: a memoized
/// read must not move the counters.
#[derive(Default)]
pub struct MemoryStore {
    groups: RwLock<HashMap<GroupId, UserGroup>>,
    assignments: RwLock<Vec<ObjectAssignment>>,
    group_fetches: AtomicUsize,
    assignment_fetches: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of group-table reads served so far.
    pub fn group_fetches(&self) -> usize {
        self.group_fetches.load(Ordering::SeqCst)
    }

    /// Number of assignment-table reads served so far.
    pub fn assignment_fetches(&self) -> usize {
        self.assignment_fetches.load(Ordering::SeqCst)
    }

    /// Current number of assignment rows (markers included).
    pub fn assignment_rows(&self) -> usize {
        self.assignments.read().len()
    }
}

#[async_trait]
impl UserGroupStore for MemoryStore {
    async fn save(&self, group: &UserGroup) -> Result<()> {
        group.validate()?;
        self.groups.write().insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn fetch(&self, id: &GroupId) -> Result<Option<UserGroup>> {
        self.group_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.groups.read().get(id).cloned())
    }

    async fn fetch_all(&self) -> Result<Vec<UserGroup>> {
        self.group_fetches.fetch_add(1, Ordering::SeqCst);
        let mut all: Vec<UserGroup> = self.groups.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn delete(&self, id: &GroupId) -> Result<bool> {
        Ok(self.groups.write().remove(id).is_some())
    }
}

#[async_trait]
impl ObjectAssignmentStore for MemoryStore {
    async fn upsert(&self, row: &ObjectAssignment) -> Result<()> {
        let mut rows = self.assignments.write();
        rows.retain(|existing| {
            !(existing.group == row.group
                && existing.object_type == row.object_type
                && existing.object_id == row.object_id)
        });
        rows.push(row.clone());
        Ok(())
    }

    async fn fetch_by_type(
        &self,
        group: &GroupKey,
        object_type: &str,
    ) -> Result<Vec<ObjectAssignment>> {
        self.assignment_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .assignments
            .read()
            .iter()
            .filter(|row| {
                row.group == *group
                    && (row.object_type == object_type
                        || row.general_object_type == object_type)
            })
            .cloned()
            .collect())
    }

    async fn fetch_for_group(&self, group: &GroupKey) -> Result<Vec<ObjectAssignment>> {
        self.assignment_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .assignments
            .read()
            .iter()
            .filter(|row| row.group == *group)
            .cloned()
            .collect())
    }

    async fn delete_object(
        &self,
        group: &GroupKey,
        object_type: &str,
        object_id: Option<&ObjectId>,
        ignore_general_type: bool,
    ) -> Result<u64> {
        let mut rows = self.assignments.write();
        let before = rows.len();
        rows.retain(|row| {
            if row.group != *group {
                return true;
            }
            let type_matches = row.object_type == object_type
                || (!ignore_general_type && row.general_object_type == object_type);
            let id_matches = object_id.is_none_or(|id| row.object_id == *id);
            !(type_matches && id_matches)
        });
        Ok((before - rows.len()) as u64)
    }

    async fn delete_group_rows(&self, group: &GroupKey) -> Result<u64> {
        let mut rows = self.assignments.write();
        let before = rows.len();
        rows.retain(|row| row.group != *group);
        Ok((before - rows.len()) as u64)
    }

    async fn dynamic_group_keys(&self) -> Result<Vec<GroupKey>> {
        self.assignment_fetches.fetch_add(1, Ordering::SeqCst);
        let mut keys: Vec<GroupKey> = Vec::new();
        for row in self.assignments.read().iter() {
            if row.group.group_type != GroupType::UserGroup && !keys.contains(&row.group) {
                keys.push(row.group.clone());
            }
        }
        Ok(keys)
    }
}
