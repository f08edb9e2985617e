use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::str::FromStr;

use super::{ObjectAssignmentStore, UserGroupStore};
use crate::models::{
    AccessMode, GroupId, GroupKey, GroupType, ObjectAssignment, ObjectId, UserGroup,
};
use crate::{Error, Result};

/// User group repository for database operations
#[derive(Clone)]
pub struct PgUserGroupStore {
    pool: PgPool,
}

impl PgUserGroupStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_group(&self, row: PgRow) -> Result<UserGroup> {
        let read_access: String = row.try_get("read_access")?;
        let write_access: String = row.try_get("write_access")?;

        Ok(UserGroup {
            id: GroupId::from_string(row.try_get("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            read_access: AccessMode::from_str(&read_access)
                .map_err(Error::InvalidInput)?,
            write_access: AccessMode::from_str(&write_access)
                .map_err(Error::InvalidInput)?,
            ip_range: row.try_get("ip_range")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl UserGroupStore for PgUserGroupStore {
    async fn save(&self, group: &UserGroup) -> Result<()> {
        group.validate()?;

        sqlx::query(
            "INSERT INTO user_groups (
                id, name, description, read_access, write_access, ip_range,
                created_at, updated_at
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE
             SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                read_access = EXCLUDED.read_access,
                write_access = EXCLUDED.write_access,
                ip_range = EXCLUDED.ip_range,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(group.id.as_str())
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.read_access.as_str())
        .bind(group.write_access.as_str())
        .bind(&group.ip_range)
        .bind(group.created_at)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch(&self, id: &GroupId) -> Result<Option<UserGroup>> {
        let row = sqlx::query(
            "SELECT id, name, description, read_access, write_access, ip_range,
                    created_at, updated_at
             FROM user_groups
             WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_group(row)?)),
            None => Ok(None),
        }
    }

    async fn fetch_all(&self) -> Result<Vec<UserGroup>> {
        let rows = sqlx::query(
            "SELECT id, name, description, read_access, write_access, ip_range,
                    created_at, updated_at
             FROM user_groups
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| self.row_to_group(row)).collect()
    }

    async fn delete(&self, id: &GroupId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_groups WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Assignment-row repository for database operations
#[derive(Clone)]
pub struct PgAssignmentStore {
    pool: PgPool,
}

impl PgAssignmentStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_assignment(&self, row: PgRow) -> Result<ObjectAssignment> {
        let group_type: String = row.try_get("group_type")?;

        Ok(ObjectAssignment {
            group: GroupKey::new(
                GroupType::from_str(&group_type)?,
                row.try_get::<String, _>("group_id")?,
            ),
            object_id: ObjectId::from_string(row.try_get("object_id")?),
            general_object_type: row.try_get("general_object_type")?,
            object_type: row.try_get("object_type")?,
            from_date: row.try_get("from_date")?,
            to_date: row.try_get("to_date")?,
        })
    }
}

#[async_trait]
impl ObjectAssignmentStore for PgAssignmentStore {
    async fn upsert(&self, row: &ObjectAssignment) -> Result<()> {
        sqlx::query(
            "INSERT INTO group_to_object (
                group_id, group_type, object_id, general_object_type,
                object_type, from_date, to_date
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (group_id, group_type, object_type, object_id) DO UPDATE
             SET
                general_object_type = EXCLUDED.general_object_type,
                from_date = EXCLUDED.from_date,
                to_date = EXCLUDED.to_date",
        )
        .bind(&row.group.id)
        .bind(row.group.group_type.as_str())
        .bind(row.object_id.as_str())
        .bind(&row.general_object_type)
        .bind(&row.object_type)
        .bind(row.from_date)
        .bind(row.to_date)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_by_type(
        &self,
        group: &GroupKey,
        object_type: &str,
    ) -> Result<Vec<ObjectAssignment>> {
        let rows = sqlx::query(
            "SELECT group_id, group_type, object_id, general_object_type,
                    object_type, from_date, to_date
             FROM group_to_object
             WHERE group_id = $1 AND group_type = $2
               AND (object_type = $3 OR general_object_type = $3)",
        )
        .bind(&group.id)
        .bind(group.group_type.as_str())
        .bind(object_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| self.row_to_assignment(row))
            .collect()
    }

    async fn fetch_for_group(&self, group: &GroupKey) -> Result<Vec<ObjectAssignment>> {
        let rows = sqlx::query(
            "SELECT group_id, group_type, object_id, general_object_type,
                    object_type, from_date, to_date
             FROM group_to_object
             WHERE group_id = $1 AND group_type = $2",
        )
        .bind(&group.id)
        .bind(group.group_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| self.row_to_assignment(row))
            .collect()
    }

    async fn delete_object(
        &self,
        group: &GroupKey,
        object_type: &str,
        object_id: Option<&ObjectId>,
        ignore_general_type: bool,
    ) -> Result<u64> {
        let result = match (object_id, ignore_general_type) {
            (Some(id), false) => {
                sqlx::query(
                    "DELETE FROM group_to_object
                     WHERE group_id = $1 AND group_type = $2
                       AND (object_type = $3 OR general_object_type = $3)
                       AND object_id = $4",
                )
                .bind(&group.id)
                .bind(group.group_type.as_str())
                .bind(object_type)
                .bind(id.as_str())
                .execute(&self.pool)
                .await?
            }
            (Some(id), true) => {
                sqlx::query(
                    "DELETE FROM group_to_object
                     WHERE group_id = $1 AND group_type = $2
                       AND object_type = $3 AND object_id = $4",
                )
                .bind(&group.id)
                .bind(group.group_type.as_str())
                .bind(object_type)
                .bind(id.as_str())
                .execute(&self.pool)
                .await?
            }
            (None, false) => {
                sqlx::query(
                    "DELETE FROM group_to_object
                     WHERE group_id = $1 AND group_type = $2
                       AND (object_type = $3 OR general_object_type = $3)",
                )
                .bind(&group.id)
                .bind(group.group_type.as_str())
                .bind(object_type)
                .execute(&self.pool)
                .await?
            }
            (None, true) => {
                sqlx::query(
                    "DELETE FROM group_to_object
                     WHERE group_id = $1 AND group_type = $2 AND object_type = $3",
                )
                .bind(&group.id)
                .bind(group.group_type.as_str())
                .bind(object_type)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected())
    }

    async fn delete_group_rows(&self, group: &GroupKey) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM group_to_object WHERE group_id = $1 AND group_type = $2",
        )
        .bind(&group.id)
        .bind(group.group_type.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn dynamic_group_keys(&self) -> Result<Vec<GroupKey>> {
        let rows = sqlx::query(
            "SELECT DISTINCT group_id, group_type
             FROM group_to_object
             WHERE group_type IN ('user', 'role')",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let group_type: String = row.try_get("group_type")?;
                Ok(GroupKey::new(
                    GroupType::from_str(&group_type)?,
                    row.try_get::<String, _>("group_id")?,
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_upsert_assignment() {
        // Integration test placeholder
    }
}
