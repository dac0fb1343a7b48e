use crate::application::repos::RepoError;

/// SQLSTATE `query_canceled`, raised when `statement_timeout` fires.
const QUERY_CANCELED: &str = "57014";
/// SQLSTATE `invalid_text_representation`, e.g. a malformed cast of user input.
const INVALID_TEXT_REPRESENTATION: &str = "22P02";

/// Fold driver errors into the closed [`RepoError`] set.
pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(QUERY_CANCELED) => RepoError::Timeout,
            Some(INVALID_TEXT_REPRESENTATION) => RepoError::InvalidInput {
                message: db.message().to_string(),
            },
            _ => RepoError::from_persistence(db),
        },
        other => RepoError::from_persistence(other),
    }
}
