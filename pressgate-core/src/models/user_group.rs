use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use super::id::GroupId;
use super::object_type::{GroupKey, GroupType};
use crate::{Error, Result};

/// Read/write visibility rule of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Only group members get access
    Group,
    /// Everybody gets access
    All,
}

impl Default for AccessMode {
    fn default() -> Self {
        Self::Group
    }
}

impl AccessMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::All => "all",
        }
    }
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "group" => Ok(Self::Group),
            "all" => Ok(Self::All),
            _ => Err(format!("Unknown access mode: {s}")),
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Database mapping: AccessMode <-> TEXT
impl sqlx::Type<sqlx::Postgres> for AccessMode {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for AccessMode {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for AccessMode {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Self::from_str(&s).map_err(Into::into)
    }
}

/// Persisted user group entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGroup {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub read_access: AccessMode,
    pub write_access: AccessMode,
    /// Semicolon-delimited CIDR / dashed-range allowlist (`10.0.0.0/8;192.168.0.1-192.168.0.20`)
    pub ip_range: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserGroup {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: GroupId::new(),
            name: name.into(),
            description: String::new(),
            read_access: AccessMode::Group,
            write_access: AccessMode::Group,
            ip_range: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn key(&self) -> GroupKey {
        GroupKey::persisted(self.id.as_str())
    }

    /// Whether `ip` falls inside any entry of the group's allowlist.
    ///
    /// Malformed entries are skipped (denying the extra grant) rather than
    /// failing the whole request.
    #[must_use]
    pub fn ip_in_range(&self, ip: IpAddr) -> bool {
        ip_in_ranges(ip, &self.ip_range)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Group name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Check `ip` against a semicolon-delimited allowlist of CIDR blocks and
/// dashed IPv4 ranges. Entries without a slash are treated as single hosts.
#[must_use]
pub fn ip_in_ranges(ip: IpAddr, ranges: &str) -> bool {
    ranges
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .any(|entry| ip_in_range_entry(ip, entry))
}

fn ip_in_range_entry(ip: IpAddr, entry: &str) -> bool {
    if let Some((start, end)) = entry.split_once('-') {
        let (IpAddr::V4(ip), Ok(start), Ok(end)) =
            (ip, Ipv4Addr::from_str(start.trim()), Ipv4Addr::from_str(end.trim()))
        else {
            tracing::warn!(entry, "Skipping malformed IP range entry");
            return false;
        };
        let ip = u32::from(ip);
        return u32::from(start) <= ip && ip <= u32::from(end);
    }

    if entry.contains('/') {
        match IpNet::from_str(entry) {
            Ok(net) => return net.contains(&ip),
            Err(_) => {
                tracing::warn!(entry, "Skipping malformed CIDR entry");
                return false;
            }
        }
    }

    match IpAddr::from_str(entry) {
        Ok(single) => single == ip,
        Err(_) => {
            tracing::warn!(entry, "Skipping malformed IP entry");
            false
        }
    }
}

/// Dynamic group kind: per-user or per-role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DynamicGroupKind {
    User,
    Role,
}

impl DynamicGroupKind {
    #[must_use]
    pub const fn group_type(&self) -> GroupType {
        match self {
            Self::User => GroupType::User,
            Self::Role => GroupType::Role,
        }
    }
}

/// Virtual group representing all sessions of one user or one role.
///
/// Never stored as a group row; it exists implicitly as soon as an
/// assignment row carries its composite key. `user|0` is the implicit
/// not-logged-in pseudo-user group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicUserGroup {
    pub kind: DynamicGroupKind,
    /// CMS user id or role slug
    pub raw_id: String,
}

impl DynamicUserGroup {
    /// Raw id of the implicit not-logged-in pseudo-user.
    pub const NOT_LOGGED_IN_USER_ID: &'static str = "0";

    /// Construct from a group-type discriminator string; fails for the
    /// persisted discriminator or anything unrecognized.
    pub fn try_new(group_type: &str, raw_id: impl Into<String>) -> Result<Self> {
        let kind = match GroupType::from_str(group_type)? {
            GroupType::User => DynamicGroupKind::User,
            GroupType::Role => DynamicGroupKind::Role,
            GroupType::UserGroup => {
                return Err(Error::Configuration(format!(
                    "'{group_type}' is not a dynamic group type"
                )));
            }
        };
        Ok(Self {
            kind,
            raw_id: raw_id.into(),
        })
    }

    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            kind: DynamicGroupKind::User,
            raw_id: user_id.into(),
        }
    }

    #[must_use]
    pub fn for_role(role: impl Into<String>) -> Self {
        Self {
            kind: DynamicGroupKind::Role,
            raw_id: role.into(),
        }
    }

    #[must_use]
    pub fn not_logged_in() -> Self {
        Self::for_user(Self::NOT_LOGGED_IN_USER_ID)
    }

    #[must_use]
    pub fn key(&self) -> GroupKey {
        GroupKey::new(self.kind.group_type(), self.raw_id.clone())
    }

    #[must_use]
    pub fn is_not_logged_in(&self) -> bool {
        self.kind == DynamicGroupKind::User && self.raw_id == Self::NOT_LOGGED_IN_USER_ID
    }
}
