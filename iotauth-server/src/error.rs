use iotauth_policy::PolicyError;
use iotauth_types::error::ErrorKind;
use sqlx::sqlite::SqliteError;

/// Sniffs a raw `sqlx::Error` into the §7 taxonomy the same way the teacher's
/// `covert-server::error::Error::from(sqlx::Error)` remaps SQLite error codes
/// instead of surfacing every storage failure as a generic 500.
pub(crate) fn from_storage(err: sqlx::Error) -> ErrorKind {
    if let Some(code) = err
        .as_database_error()
        .and_then(|db_err| db_err.try_downcast_ref::<SqliteError>())
        .and_then(|e| e.code())
    {
        match &code[..] {
            "1555" | "2067" => return ErrorKind::Conflict(err.to_string()),
            "787" => return ErrorKind::MalformedEntity(err.to_string()),
            _ => {}
        }
    }
    match err {
        sqlx::Error::RowNotFound => ErrorKind::NotFound("row".into()),
        other => ErrorKind::MalformedEntity(other.to_string()),
    }
}

/// `CheckPolicy` failures surface as `AuthorizationError`; any engine error
/// reaching here has already been distinguished from a genuine "no" verdict
/// at the call site (§4.4).
pub(crate) fn from_policy_check(err: PolicyError) -> ErrorKind {
    match err {
        PolicyError::Precondition(msg) => ErrorKind::MalformedEntity(msg),
        PolicyError::Transport { .. } => ErrorKind::AuthorizationError,
    }
}

/// Mutation (`AddPolicy`/`DeletePolicy`/precondition) failures surface as
/// `MalformedEntity` (§4.4).
pub(crate) fn from_policy_write(err: PolicyError) -> ErrorKind {
    match err {
        PolicyError::Precondition(msg) => ErrorKind::MalformedEntity(msg),
        PolicyError::Transport { status, .. } => ErrorKind::MalformedEntity(status.to_string()),
    }
}
