use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::auth::Claims;
use crate::database::Record;
use crate::dispatch::HandlerArgs;
use crate::error::ApiError;

/// Claims contributed by one of the auth middleware units
pub fn claims(args: &HandlerArgs, middleware: &str) -> Result<Claims, ApiError> {
    let value = args
        .get(middleware)
        .cloned()
        .ok_or_else(|| ApiError::internal_server_error(format!("{} was not run", middleware)))?;
    serde_json::from_value(value).map_err(|e| ApiError::internal_server_error(format!("Malformed claims: {}", e)))
}

/// Fail with one field error per missing or blank field
pub fn require(args: &HandlerArgs, fields: &[&str]) -> Result<(), ApiError> {
    let missing: BTreeMap<String, String> = fields
        .iter()
        .filter(|field| match args.get(**field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        })
        .map(|field| (field.to_string(), "This field is required".to_string()))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation_error("Missing required fields", Some(missing)))
    }
}

pub fn string_field<'a>(args: &'a HandlerArgs, field: &str) -> Result<&'a str, ApiError> {
    match args.get(field) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(_) => Err(ApiError::field_error(field, "Must be a string")),
        None => Err(ApiError::field_error(field, "This field is required")),
    }
}

pub fn uuid_field(args: &HandlerArgs, field: &str) -> Result<Uuid, ApiError> {
    string_field(args, field)?
        .parse()
        .map_err(|_| ApiError::field_error(field, "Must be a valid UUID"))
}

pub fn optional_uuid_field(args: &HandlerArgs, field: &str) -> Result<Option<Uuid>, ApiError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => uuid_field(args, field).map(Some),
    }
}

/// Record id from the body, falling back to the `__query` enrichment
pub fn record_id(args: &HandlerArgs) -> Result<Uuid, ApiError> {
    if args.contains_key("id") {
        return uuid_field(args, "id");
    }
    match args.get("__query").and_then(|q| q.get("id")).and_then(Value::as_str) {
        Some(id) => id.parse().map_err(|_| ApiError::field_error("id", "Must be a valid UUID")),
        None => Err(ApiError::field_error("id", "This field is required")),
    }
}

/// Query parameter from the `__query` enrichment
pub fn query_param<'a>(args: &'a HandlerArgs, name: &str) -> Option<&'a str> {
    args.get("__query").and_then(|q| q.get(name)).and_then(Value::as_str)
}

/// Copy the listed fields that are present; everything else is ignored
pub fn pick(args: &HandlerArgs, fields: &[&str]) -> Record {
    let mut record = Map::new();
    for field in fields {
        if let Some(value) = args.get(*field) {
            record.insert(field.to_string(), value.clone());
        }
    }
    record
}

pub fn id_of(record: &Record) -> Option<Uuid> {
    record.get("id").and_then(Value::as_str).and_then(|s| s.parse().ok())
}
