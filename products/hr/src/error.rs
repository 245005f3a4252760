use platform_api::{ApiError, FieldErrors};
use sea_orm::{DbErr, SqlErr};
use thiserror::Error;
use uuid::Uuid;

pub type HrResult<T> = Result<T, HrError>;

#[derive(Debug, Error)]
pub enum HrError {
    #[error("{entity} not found with id: {id}")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("validation failed")]
    Validation(FieldErrors),
    #[error(transparent)]
    Db(DbErr),
}

impl HrError {
    pub(crate) fn department_not_found(id: Uuid) -> Self {
        HrError::NotFound {
            entity: "Department",
            id,
        }
    }

    pub(crate) fn employee_not_found(id: Uuid) -> Self {
        HrError::NotFound {
            entity: "Employee",
            id,
        }
    }
}

// Constraint violations only reach us when a concurrent writer slipped past
// the in-transaction checks; they mean the same thing the checks would have.
impl From<DbErr> for HrError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                HrError::Conflict("a record with the same unique value already exists".into())
            }
            Some(SqlErr::ForeignKeyConstraintViolation(_)) => {
                HrError::Conflict("the record is still referenced by other records".into())
            }
            _ => HrError::Db(err),
        }
    }
}

impl From<HrError> for ApiError {
    fn from(err: HrError) -> Self {
        match err {
            HrError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            HrError::Conflict(message) => ApiError::Conflict(message),
            HrError::InvalidState(message) => ApiError::InvalidState(message),
            HrError::Validation(fields) => ApiError::Validation(fields),
            HrError::Db(db) => ApiError::internal(db.into()),
        }
    }
}
