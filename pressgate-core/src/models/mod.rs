pub mod assignment;
pub mod id;
pub mod object_type;
pub mod user_group;

pub use assignment::{AssignmentInformation, ObjectAssignment};
pub use id::{GroupId, ObjectId, GROUP_ID_LEN};
pub use object_type::{
    GeneralObjectType, GroupKey, GroupType, GENERAL_POST, GENERAL_ROLE, GENERAL_TERM,
    GENERAL_USER, TYPE_ATTACHMENT, TYPE_CATEGORY, TYPE_PAGE, TYPE_POST, TYPE_ROLE, TYPE_USER,
};
pub use user_group::{
    ip_in_ranges, AccessMode, DynamicGroupKind, DynamicUserGroup, UserGroup,
};
