use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::utils::{claims, id_of, optional_uuid_field, require, string_field};
use crate::app::Services;
use crate::auth::{hash_password, verify_password, Role, TokenService};
use crate::database::{Record, Repository};
use crate::dispatch::{HandlerArgs, HandlerModule, HandlerResult};
use crate::error::ApiError;

const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Clone)]
struct Deps {
    users: Repository,
    schools: Repository,
    tokens: Arc<TokenService>,
}

pub fn module(services: &Services) -> HandlerModule {
    let deps = Deps {
        users: services.repo("users"),
        schools: services.repo("schools"),
        tokens: Arc::clone(&services.tokens),
    };

    let d = deps.clone();
    let create = move |args| create_user(d.clone(), args);
    let d = deps.clone();
    let login = move |args| login_user(d.clone(), args);
    let d = deps;
    let profile = move |args| get_profile(d.clone(), args);

    HandlerModule::new("user")
        .expose("createUser")
        .expose("loginUser")
        .expose("get=getProfile")
        .method("createUser", "({ username, password, role, school_id, __superAdmin })", create)
        .method("loginUser", "({ username, password, __device })", login)
        .method("getProfile", "({ __auth })", profile)
}

/// Stored user without its password hash
fn public_user(mut user: Record) -> Value {
    user.remove("password_hash");
    Value::Object(user)
}

/// Seed a superadmin when no user holds that name yet. Returns whether one was created.
pub async fn ensure_superadmin(services: &Services, username: &str, password: &str) -> Result<bool, ApiError> {
    let users = services.repo("users");
    if !users.select_where("username", &json!(username)).await.is_empty() {
        return Ok(false);
    }

    let mut record = Map::new();
    record.insert("username".into(), json!(username));
    record.insert("password_hash".into(), json!(hash_password(password)?));
    record.insert("role".into(), json!(Role::SuperAdmin));
    record.insert("school_id".into(), Value::Null);
    users.create_one(record, Some("username")).await?;

    tracing::info!("Seeded superadmin '{}'", username);
    Ok(true)
}

async fn create_user(deps: Deps, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    claims(&args, "__superAdmin")?;
    require(&args, &["username", "password", "role"])?;

    let username = string_field(&args, "username")?.trim().to_string();
    let password = string_field(&args, "password")?;
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::field_error(
            "password",
            format!("Must be at least {} characters", MIN_PASSWORD_LENGTH),
        ));
    }

    let role = Role::parse(string_field(&args, "role")?)
        .ok_or_else(|| ApiError::field_error("role", "Must be one of: superadmin, school_admin"))?;

    let school_id = match role {
        Role::SuperAdmin => None,
        Role::SchoolAdmin => {
            let id = optional_uuid_field(&args, "school_id")?
                .ok_or_else(|| ApiError::field_error("school_id", "Required for school admins"))?;
            deps.schools
                .select_one(id)
                .await
                .ok_or_else(|| ApiError::field_error("school_id", "School not found"))?;
            Some(id)
        }
    };

    let mut record = Map::new();
    record.insert("username".into(), json!(username));
    record.insert("password_hash".into(), json!(hash_password(password)?));
    record.insert("role".into(), json!(role));
    record.insert("school_id".into(), json!(school_id.map(|id| id.to_string())));

    let user = deps.users.create_one(record, Some("username")).await?;
    tracing::info!("User '{}' created", username);
    Ok(HandlerResult::created(public_user(user)))
}

async fn login_user(deps: Deps, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    require(&args, &["username", "password"])?;
    let username = string_field(&args, "username")?.trim();
    let password = string_field(&args, "password")?;

    let user = deps
        .users
        .select_where("username", &json!(username))
        .await
        .into_iter()
        .next()
        .filter(|user| {
            user.get("password_hash")
                .and_then(Value::as_str)
                .map(|stored| verify_password(password, stored))
                .unwrap_or(false)
        });

    let Some(user) = user else {
        let ip = args.get("__device").and_then(|d| d.get("ip")).cloned().unwrap_or(Value::Null);
        tracing::warn!("Failed login for '{}' from {}", username, ip);
        return Err(ApiError::unauthorized("Invalid username or password"));
    };

    let user_id = id_of(&user).ok_or_else(|| ApiError::internal_server_error("Stored user has no id"))?;
    let role = user
        .get("role")
        .and_then(Value::as_str)
        .and_then(Role::parse)
        .ok_or_else(|| ApiError::internal_server_error("Stored user has no role"))?;
    let school_id = user.get("school_id").and_then(Value::as_str).and_then(|s| s.parse().ok());

    let token = deps.tokens.issue(user_id, username, role, school_id)?;
    Ok(HandlerResult::ok(json!({
        "token": token,
        "user": public_user(user),
    })))
}

async fn get_profile(deps: Deps, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let claims = claims(&args, "__auth")?;
    let user = deps.users.select_404(claims.user_id).await?;
    Ok(HandlerResult::ok(public_user(user)))
}
