use serde_json::{json, Map, Value};

use super::scope::{ensure_access, target_school};
use super::utils::{claims, id_of, optional_uuid_field, pick, query_param, record_id, require};
use crate::app::Services;
use crate::database::Repository;
use crate::dispatch::{HandlerArgs, HandlerModule, HandlerResult};
use crate::error::ApiError;

const FIELDS: &[&str] = &["name", "capacity", "resources"];

#[derive(Clone)]
struct Repos {
    schools: Repository,
    classrooms: Repository,
    students: Repository,
}

pub fn module(services: &Services) -> HandlerModule {
    let repos = Repos {
        schools: services.repo("schools"),
        classrooms: services.repo("classrooms"),
        students: services.repo("students"),
    };

    let r = repos.clone();
    let create = move |args| create_classroom(r.clone(), args);
    let r = repos.clone();
    let get = move |args| get_classroom(r.clone(), args);
    let r = repos.clone();
    let list = move |args| list_classrooms(r.clone(), args);
    let r = repos.clone();
    let update = move |args| update_classroom(r.clone(), args);
    let r = repos;
    let delete = move |args| delete_classroom(r.clone(), args);

    HandlerModule::new("classroom")
        .expose("createClassroom")
        .expose("get=getClassroom")
        .expose("get=listClassrooms")
        .expose("put=updateClassroom")
        .expose("delete=deleteClassroom")
        .method(
            "createClassroom",
            "({ name, capacity, resources, school_id, __schoolAdmin })",
            create,
        )
        .method("getClassroom", "({ __query, __schoolAdmin })", get)
        .method("listClassrooms", "({ __query, __schoolAdmin })", list)
        .method("updateClassroom", "({ id, name, capacity, resources, __schoolAdmin })", update)
        .method("deleteClassroom", "({ id, __query, __schoolAdmin })", delete)
}

fn check_capacity(args: &HandlerArgs) -> Result<(), ApiError> {
    match args.get("capacity") {
        None | Some(Value::Null) => Ok(()),
        Some(v) if v.as_u64().is_some() => Ok(()),
        Some(_) => Err(ApiError::field_error("capacity", "Must be a non-negative integer")),
    }
}

async fn create_classroom(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let claims = claims(&args, "__schoolAdmin")?;
    require(&args, &["name"])?;
    check_capacity(&args)?;

    let school_id = target_school(&claims, optional_uuid_field(&args, "school_id")?, &repos.schools).await?;

    let mut record = pick(&args, FIELDS);
    record.insert("school_id".into(), json!(school_id.to_string()));
    let classroom = repos.classrooms.create_one(record, None).await?;
    Ok(HandlerResult::created(Value::Object(classroom)))
}

async fn get_classroom(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let claims = claims(&args, "__schoolAdmin")?;
    let classroom = repos.classrooms.select_404(record_id(&args)?).await?;
    ensure_access(&claims, &classroom)?;
    Ok(HandlerResult::ok(Value::Object(classroom)))
}

/// `?school_id=` narrows the listing; school admins always get their own school
async fn list_classrooms(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let claims = claims(&args, "__schoolAdmin")?;

    let classrooms = match (claims.is_superadmin(), query_param(&args, "school_id")) {
        (true, None) => repos.classrooms.select_all().await,
        (true, Some(school_id)) => repos.classrooms.select_where("school_id", &json!(school_id)).await,
        (false, _) => {
            let own = claims.school_id.map(|id| id.to_string());
            repos.classrooms.select_where("school_id", &json!(own)).await
        }
    };
    Ok(HandlerResult::ok(json!(classrooms)))
}

async fn update_classroom(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let claims = claims(&args, "__schoolAdmin")?;
    let id = record_id(&args)?;
    check_capacity(&args)?;

    let existing = repos.classrooms.select_404(id).await?;
    ensure_access(&claims, &existing)?;

    let changes = pick(&args, FIELDS);
    if changes.is_empty() {
        return Err(ApiError::bad_request("Nothing to update"));
    }
    let classroom = repos.classrooms.update_one(id, changes, None).await?;
    Ok(HandlerResult::ok(Value::Object(classroom)))
}

/// Students in the classroom are kept and become unassigned
async fn delete_classroom(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let claims = claims(&args, "__schoolAdmin")?;
    let id = record_id(&args)?;

    let existing = repos.classrooms.select_404(id).await?;
    ensure_access(&claims, &existing)?;

    let key = json!(id.to_string());
    for student in repos.students.select_where("classroom_id", &key).await {
        if let Some(student_id) = id_of(&student) {
            let mut changes = Map::new();
            changes.insert("classroom_id".into(), Value::Null);
            repos.students.update_one(student_id, changes, None).await?;
        }
    }

    repos.classrooms.delete_one(id).await?;
    tracing::info!("Classroom {} deleted", id);
    Ok(HandlerResult::ok(json!({ "id": id })))
}
