use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::id::ObjectId;
use super::object_type::GroupKey;

/// Persisted group-to-object assignment row.
///
/// A row with an empty object id is the "default for this object type"
/// marker; it never satisfies a concrete membership check and is only read
/// through the default-type API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectAssignment {
    pub group: GroupKey,
    pub object_id: ObjectId,

    /// Coarse bucket the concrete type maps onto (`_post_`, `_term_`, ...)
    pub general_object_type: String,
    /// Concrete CMS type the object was assigned as (`page`, `category`, ...)
    pub object_type: String,

    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

impl ObjectAssignment {
    #[must_use]
    pub fn new(
        group: GroupKey,
        object_id: ObjectId,
        general_object_type: impl Into<String>,
        object_type: impl Into<String>,
    ) -> Self {
        Self {
            group,
            object_id,
            general_object_type: general_object_type.into(),
            object_type: object_type.into(),
            from_date: None,
            to_date: None,
        }
    }

    #[must_use]
    pub fn with_dates(
        mut self,
        from_date: Option<DateTime<Utc>>,
        to_date: Option<DateTime<Utc>>,
    ) -> Self {
        self.from_date = from_date;
        self.to_date = to_date;
        self
    }

    #[must_use]
    pub fn is_default_type_marker(&self) -> bool {
        self.object_id.is_default_type_marker()
    }

    /// Whether the assignment's date window contains `now`.
    /// A missing bound is unbounded in that direction.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if let Some(from) = self.from_date {
            if now < from {
                return false;
            }
        }
        if let Some(to) = self.to_date {
            if now > to {
                return false;
            }
        }
        true
    }
}

/// Why an object is considered a member of a group.
///
/// Produced fresh by every membership check and never persisted. The
/// recursive trail maps a general object type to the related objects whose
/// own assignment caused (or contributed to) the membership, each with its
/// own `AssignmentInformation`. The trail nests, so a post reached through
/// a term that was itself reached through an ancestor term keeps the path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentInformation {
    /// Concrete type of the direct assignment, None when membership came
    /// purely from recursion with no direct hit.
    pub assignment_type: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub recursive_membership: HashMap<String, HashMap<ObjectId, AssignmentInformation>>,
}

impl AssignmentInformation {
    #[must_use]
    pub fn direct(
        assignment_type: impl Into<String>,
        from_date: Option<DateTime<Utc>>,
        to_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            assignment_type: Some(assignment_type.into()),
            from_date,
            to_date,
            recursive_membership: HashMap::new(),
        }
    }

    /// Information for a purely recursive hit (no direct assignment).
    #[must_use]
    pub fn recursive_only() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_row(row: &ObjectAssignment) -> Self {
        Self::direct(row.object_type.clone(), row.from_date, row.to_date)
    }

    /// Record that `object_id` (of general type `general_type`) caused a
    /// recursive membership, with its own assignment information.
    pub fn add_recursive(
        &mut self,
        general_type: impl Into<String>,
        object_id: ObjectId,
        info: AssignmentInformation,
    ) {
        self.recursive_membership
            .entry(general_type.into())
            .or_default()
            .insert(object_id, info);
    }

    /// Merge another trail branch map under `general_type`.
    pub fn extend_recursive(
        &mut self,
        general_type: impl Into<String>,
        branch: HashMap<ObjectId, AssignmentInformation>,
    ) {
        if branch.is_empty() {
            return;
        }
        self.recursive_membership
            .entry(general_type.into())
            .or_default()
            .extend(branch);
    }

    #[must_use]
    pub fn has_recursive_membership(&self) -> bool {
        !self.recursive_membership.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object_type::GroupType;
    use chrono::TimeZone;

    fn row(from: Option<i64>, to: Option<i64>) -> ObjectAssignment {
        ObjectAssignment::new(
            GroupKey::new(GroupType::UserGroup, "g1"),
            ObjectId::from("10"),
            "_post_",
            "post",
        )
        .with_dates(
            from.map(|s| Utc.timestamp_opt(s, 0).single().expect("valid ts")),
            to.map(|s| Utc.timestamp_opt(s, 0).single().expect("valid ts")),
        )
    }

    fn ts(s: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(s, 0).single().expect("valid ts")
    }

    #[test]
    fn test_unbounded_window_is_always_active() {
        assert!(row(None, None).is_active_at(ts(0)));
        assert!(row(None, None).is_active_at(ts(i32::MAX as i64)));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let r = row(Some(100), Some(200));
        assert!(!r.is_active_at(ts(99)));
        assert!(r.is_active_at(ts(100)));
        assert!(r.is_active_at(ts(200)));
        assert!(!r.is_active_at(ts(201)));
    }

    #[test]
    fn test_half_open_windows() {
        assert!(row(Some(100), None).is_active_at(ts(5000)));
        assert!(!row(Some(100), None).is_active_at(ts(99)));
        assert!(row(None, Some(100)).is_active_at(ts(50)));
        assert!(!row(None, Some(100)).is_active_at(ts(101)));
    }

    #[test]
    fn test_recursive_trail_nesting() {
        let mut info = AssignmentInformation::recursive_only();
        assert!(!info.has_recursive_membership());

        let mut term_info = AssignmentInformation::direct("category", None, None);
        term_info.add_recursive(
            "_term_",
            ObjectId::from("3"),
            AssignmentInformation::direct("category", None, None),
        );
        info.add_recursive("_term_", ObjectId::from("9"), term_info);

        assert!(info.has_recursive_membership());
        let branch = &info.recursive_membership["_term_"];
        assert!(branch[&ObjectId::from("9")]
            .recursive_membership["_term_"]
            .contains_key(&ObjectId::from("3")));
    }
}
