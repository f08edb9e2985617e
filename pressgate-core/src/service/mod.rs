// Service layer.
//
// Request-scoped handlers over the membership engine: group resolution for
// the current actor and bulk assignment updates on object save.

pub mod assignment;
pub mod group_handler;

pub use assignment::{
    parse_date_time, DateWindowInput, GroupAssignmentRequest, UserGroupAssignmentHandler,
};
pub use group_handler::UserGroupHandler;
