//! Group-based membership resolution engine for CMS content.
//!
//! Answers, for any CMS object (posts, terms, users, roles, extension
//! types), which user groups it belongs to and why: direct assignment,
//! inherited assignment through object hierarchies, role-carried user
//! membership, time-bounded windows, IP allowlists and per-type default
//! groups. Persisted groups live in Postgres; dynamic per-user and per-role
//! groups exist implicitly through their assignment rows.

pub mod bootstrap;
pub mod cms;
pub mod config;
pub mod error;
pub mod logging;
pub mod membership;
pub mod models;
pub mod repository;
pub mod service;

pub use config::Config;
pub use error::{Error, Result};
pub use membership::{EngineOptions, GroupContext, MemberGroup, Membership};
pub use service::{GroupAssignmentRequest, UserGroupAssignmentHandler, UserGroupHandler};
