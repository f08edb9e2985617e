use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine error type. Membership checks fail toward denial, so only genuine
/// faults travel through this enum.
#[derive(Error, Debug)]
pub enum Error {
    #[error("storage failure: {0}")]
    Database(sqlx::Error),

    #[error("configuration problem: {0}")]
    Configuration(String),

    #[error("invalid assignment: {0}")]
    Assignment(String),

    #[error("no membership handler registered for object type '{0}'")]
    MissingHandler(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::RowNotFound) {
            return Self::NotFound("row not found".into());
        }
        let code = match &err {
            sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
            _ => None,
        };
        // Postgres constraint classes worth typed variants.
        match code.as_deref() {
            Some("23505") => Self::Assignment("duplicate assignment".into()),
            Some("23503") => Self::NotFound("referenced row is missing".into()),
            Some("23502") => Self::InvalidInput("required column is null".into()),
            _ => Self::Database(err),
        }
    }
}
