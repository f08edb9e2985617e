use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// General object-type buckets used for membership-handler dispatch.
///
/// Every concrete CMS type (a post type, a taxonomy, "user", "role") maps
/// onto one of the four built-in buckets; anything else is a pluggable type
/// resolved through the registered extension objects.
pub const GENERAL_ROLE: &str = "_role_";
pub const GENERAL_USER: &str = "_user_";
pub const GENERAL_TERM: &str = "_term_";
pub const GENERAL_POST: &str = "_post_";

/// Concrete built-in object types
pub const TYPE_ROLE: &str = "role";
pub const TYPE_USER: &str = "user";
pub const TYPE_POST: &str = "post";
pub const TYPE_PAGE: &str = "page";
pub const TYPE_ATTACHMENT: &str = "attachment";
pub const TYPE_CATEGORY: &str = "category";

/// Coarse category an object type resolves to before handler dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneralObjectType {
    Role,
    User,
    Term,
    Post,
    /// Extension-point category, carrying the concrete pluggable type name.
    Pluggable(String),
}

impl GeneralObjectType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Role => GENERAL_ROLE,
            Self::User => GENERAL_USER,
            Self::Term => GENERAL_TERM,
            Self::Post => GENERAL_POST,
            Self::Pluggable(name) => name,
        }
    }
}

impl std::fmt::Display for GeneralObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Group discriminator: one persisted kind and two dynamic kinds.
///
/// The discriminator is stored alongside the group id in every assignment
/// row so a dynamic `user` group with raw id `5` can never collide with a
/// persisted group that happens to use the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupType {
    /// Persisted group row
    UserGroup,
    /// Dynamic group representing all sessions of one CMS user
    User,
    /// Dynamic group representing all sessions holding one CMS role
    Role,
}

impl GroupType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UserGroup => "UserGroup",
            Self::User => "user",
            Self::Role => "role",
        }
    }

    #[must_use]
    pub const fn is_dynamic(&self) -> bool {
        matches!(self, Self::User | Self::Role)
    }
}

impl FromStr for GroupType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UserGroup" => Ok(Self::UserGroup),
            "user" => Ok(Self::User),
            "role" => Ok(Self::Role),
            _ => Err(crate::Error::Configuration(format!(
                "Unknown group type: {s}"
            ))),
        }
    }
}

impl std::fmt::Display for GroupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Database mapping: GroupType <-> TEXT
impl sqlx::Type<sqlx::Postgres> for GroupType {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for GroupType {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for GroupType {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Self::from_str(&s).map_err(|e| e.to_string().into())
    }
}

/// Composite key identifying any group, persisted or dynamic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub group_type: GroupType,
    pub id: String,
}

impl GroupKey {
    #[must_use]
    pub fn new(group_type: GroupType, id: impl Into<String>) -> Self {
        Self {
            group_type,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn persisted(id: impl Into<String>) -> Self {
        Self::new(GroupType::UserGroup, id)
    }

    /// Parse a composite dynamic key of the form `user|5` or `role|editor`.
    pub fn parse_dynamic(composite: &str) -> crate::Result<Self> {
        let (kind, raw_id) = composite.split_once('|').ok_or_else(|| {
            crate::Error::InvalidInput(format!("Malformed dynamic group key: {composite}"))
        })?;
        let group_type = GroupType::from_str(kind)?;
        if !group_type.is_dynamic() {
            return Err(crate::Error::InvalidInput(format!(
                "Not a dynamic group type: {kind}"
            )));
        }
        Ok(Self::new(group_type, raw_id))
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group_type.is_dynamic() {
            write!(f, "{}|{}", self.group_type, self.id)
        } else {
            write!(f, "{}", self.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_type_round_trip() {
        for t in [GroupType::UserGroup, GroupType::User, GroupType::Role] {
            assert_eq!(GroupType::from_str(t.as_str()).ok(), Some(t));
        }
        assert!(GroupType::from_str("bogus").is_err());
    }

    #[test]
    fn test_parse_dynamic_key() {
        let key = GroupKey::parse_dynamic("user|5").expect("valid key");
        assert_eq!(key.group_type, GroupType::User);
        assert_eq!(key.id, "5");
        assert_eq!(key.to_string(), "user|5");

        let key = GroupKey::parse_dynamic("role|editor").expect("valid key");
        assert_eq!(key.group_type, GroupType::Role);
        assert_eq!(key.id, "editor");
    }

    #[test]
    fn test_parse_dynamic_key_rejects_persisted_and_malformed() {
        assert!(GroupKey::parse_dynamic("UserGroup|1").is_err());
        assert!(GroupKey::parse_dynamic("user5").is_err());
        assert!(GroupKey::parse_dynamic("ghost|1").is_err());
    }

    #[test]
    fn test_persisted_key_display() {
        let key = GroupKey::persisted("abc123");
        assert_eq!(key.to_string(), "abc123");
    }
}
