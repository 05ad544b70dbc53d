use super::error::ServiceError;
use serde::Serialize;

/// Two-branch result used by the `safe_*` method variants. Exactly one branch
/// is ever populated, and the serialized form carries a `status` discriminant
/// the UI layer branches on without any error-handling machinery.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome<T> {
    Ok { data: T },
    Fail { error: ServiceError },
}

/// Success constructor.
pub fn ok<T>(data: T) -> Outcome<T> {
    Outcome::Ok { data }
}

/// Failure constructor.
pub fn fail<T>(error: ServiceError) -> Outcome<T> {
    Outcome::Fail { error }
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok { .. })
    }

    pub fn into_result(self) -> Result<T, ServiceError> {
        match self {
            Outcome::Ok { data } => Ok(data),
            Outcome::Fail { error } => Err(error),
        }
    }
}

impl<T> From<Result<T, ServiceError>> for Outcome<T> {
    fn from(result: Result<T, ServiceError>) -> Self {
        match result {
            Ok(data) => ok(data),
            Err(error) => fail(error),
        }
    }
}
