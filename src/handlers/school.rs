use serde_json::{json, Value};

use super::utils::{claims, id_of, pick, record_id, require};
use crate::app::Services;
use crate::database::Repository;
use crate::dispatch::{HandlerArgs, HandlerModule, HandlerResult};
use crate::error::ApiError;

const FIELDS: &[&str] = &["name", "address", "website", "phone"];

#[derive(Clone)]
struct Repos {
    schools: Repository,
    classrooms: Repository,
    students: Repository,
    users: Repository,
}

pub fn module(services: &Services) -> HandlerModule {
    let repos = Repos {
        schools: services.repo("schools"),
        classrooms: services.repo("classrooms"),
        students: services.repo("students"),
        users: services.repo("users"),
    };

    let r = repos.clone();
    let create = move |args| create_school(r.clone(), args);
    let r = repos.clone();
    let get = move |args| get_school(r.clone(), args);
    let r = repos.clone();
    let list = move |args| list_schools(r.clone(), args);
    let r = repos.clone();
    let update = move |args| update_school(r.clone(), args);
    let r = repos;
    let delete = move |args| delete_school(r.clone(), args);

    HandlerModule::new("school")
        .expose("createSchool")
        .expose("get=getSchool")
        .expose("get=listSchools")
        .expose("put=updateSchool")
        .expose("delete=deleteSchool")
        .method("createSchool", "({ name, address, website, phone, __superAdmin })", create)
        .method("getSchool", "({ __query, __schoolAdmin })", get)
        .method("listSchools", "({ __schoolAdmin })", list)
        .method("updateSchool", "({ id, name, address, website, phone, __superAdmin })", update)
        .method("deleteSchool", "({ id, __query, __superAdmin })", delete)
}

async fn create_school(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    require(&args, &["name", "address"])?;
    let school = repos.schools.create_one(pick(&args, FIELDS), Some("name")).await?;
    if let Some(id) = id_of(&school) {
        tracing::info!("School {} created", id);
    }
    Ok(HandlerResult::created(Value::Object(school)))
}

async fn get_school(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let claims = claims(&args, "__schoolAdmin")?;
    let id = record_id(&args)?;
    if !claims.can_access_school(id) {
        return Err(ApiError::forbidden("Access to this school is not allowed"));
    }
    let school = repos.schools.select_404(id).await?;
    Ok(HandlerResult::ok(Value::Object(school)))
}

/// Superadmins see every school, school admins only their own
async fn list_schools(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let claims = claims(&args, "__schoolAdmin")?;
    let schools = if claims.is_superadmin() {
        repos.schools.select_all().await
    } else {
        let own = claims.school_id.map(|id| id.to_string());
        repos.schools.select_where("id", &json!(own)).await
    };
    Ok(HandlerResult::ok(json!(schools)))
}

async fn update_school(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let id = record_id(&args)?;
    let changes = pick(&args, FIELDS);
    if changes.is_empty() {
        return Err(ApiError::bad_request("Nothing to update"));
    }
    let school = repos.schools.update_one(id, changes, Some("name")).await?;
    Ok(HandlerResult::ok(Value::Object(school)))
}

/// Schools that still own classrooms, students or users are kept
async fn delete_school(repos: Repos, args: HandlerArgs) -> Result<Value, ApiError> {
    let id = record_id(&args)?;
    repos.schools.select_404(id).await?;

    let key = json!(id.to_string());
    let dependents = repos.classrooms.count_where("school_id", &key).await
        + repos.students.count_where("school_id", &key).await
        + repos.users.count_where("school_id", &key).await;
    if dependents > 0 {
        return Err(ApiError::conflict("School still has classrooms, students or users"));
    }

    repos.schools.delete_one(id).await?;
    tracing::info!("School {} deleted", id);
    Ok(json!({ "id": id }))
}
