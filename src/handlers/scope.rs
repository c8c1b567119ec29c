// School scoping rules shared by classroom and student handlers.

use serde_json::Value;
use uuid::Uuid;

use crate::auth::Claims;
use crate::database::{Record, Repository};
use crate::error::ApiError;

/// School a new record belongs to. School admins default to, and are
/// limited to, their own school; superadmins must name one.
pub async fn target_school(
    claims: &Claims,
    requested: Option<Uuid>,
    schools: &Repository,
) -> Result<Uuid, ApiError> {
    let school_id = match (claims.is_superadmin(), requested, claims.school_id) {
        (true, Some(id), _) => id,
        (true, None, _) => return Err(ApiError::field_error("school_id", "This field is required")),
        (false, Some(id), _) if !claims.can_access_school(id) => {
            return Err(ApiError::forbidden("Access to this school is not allowed"))
        }
        (false, Some(id), _) => id,
        (false, None, Some(own)) => own,
        (false, None, None) => return Err(ApiError::forbidden("No school assigned to this account")),
    };

    schools.select_404(school_id).await?;
    Ok(school_id)
}

/// The record's school must be reachable with these claims
pub fn ensure_access(claims: &Claims, record: &Record) -> Result<(), ApiError> {
    let school_id = record
        .get("school_id")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Uuid>().ok());

    match school_id {
        Some(id) if claims.can_access_school(id) => Ok(()),
        Some(_) => Err(ApiError::forbidden("Access to this school is not allowed")),
        None if claims.is_superadmin() => Ok(()),
        None => Err(ApiError::forbidden("Access to this school is not allowed")),
    }
}
