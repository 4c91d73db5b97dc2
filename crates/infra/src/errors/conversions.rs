//! Conversions from external infrastructure errors into domain errors.

use homeboard_domain::HomeboardError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub HomeboardError);

impl From<InfraError> for HomeboardError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<HomeboardError> for InfraError {
    fn from(value: HomeboardError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoHomeboardError {
    fn into_homeboard(self) -> HomeboardError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → HomeboardError */
/* -------------------------------------------------------------------------- */

impl IntoHomeboardError for SqlError {
    fn into_homeboard(self) -> HomeboardError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => {
                        HomeboardError::Database("database is busy".into())
                    }
                    (ErrorCode::DatabaseLocked, _) => {
                        HomeboardError::Database("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 2067) => {
                        HomeboardError::Database("unique constraint violation".into())
                    }
                    (ErrorCode::ConstraintViolation, 787) => {
                        HomeboardError::Database("foreign key constraint violation".into())
                    }
                    _ => HomeboardError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => {
                HomeboardError::NotFound("no rows returned by query".into())
            }
            RE::FromSqlConversionFailure(_, _, cause) => {
                HomeboardError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, _, ty) => {
                HomeboardError::Database(format!("invalid column type: {ty}"))
            }
            RE::InvalidPath(path) => HomeboardError::Database(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => HomeboardError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_homeboard())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → HomeboardError */
/* -------------------------------------------------------------------------- */

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        InfraError(HomeboardError::Database(format!("connection pool error: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → HomeboardError */
/* -------------------------------------------------------------------------- */

impl IntoHomeboardError for HttpError {
    fn into_homeboard(self) -> HomeboardError {
        if self.is_timeout() {
            return HomeboardError::Network("HTTP request timed out".into());
        }

        if self.is_connect() {
            return HomeboardError::Network("HTTP connection failure".into());
        }

        if self.is_decode() {
            return HomeboardError::InvalidInput(format!("malformed response body: {self}"));
        }

        if let Some(status) = self.status() {
            return status_error(status);
        }

        HomeboardError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_homeboard())
    }
}

/// Classify a non-success HTTP status
pub(crate) fn status_error(status: reqwest::StatusCode) -> HomeboardError {
    let code = status.as_u16();
    let message = format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

    match code {
        401 | 403 => HomeboardError::Auth(message),
        404 | 410 => HomeboardError::NotFound(message),
        429 => HomeboardError::Network(message),
        400..=499 => HomeboardError::InvalidInput(message),
        _ => HomeboardError::Network(message),
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
