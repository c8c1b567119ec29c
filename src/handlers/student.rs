use serde_json::{json, Value};
use uuid::Uuid;

use super::scope::{ensure_access, target_school};
use super::utils::{claims, optional_uuid_field, pick, query_param, record_id, require};
use crate::app::Services;
use crate::database::Repository;
use crate::dispatch::{HandlerArgs, HandlerModule, HandlerResult};
use crate::error::ApiError;

const FIELDS: &[&str] = &["first_name", "last_name", "email", "birth_date"];

#[derive(Clone)]
struct Repos {
    schools: Repository,
    classrooms: Repository,
    students: Repository,
}

impl Repos {
    /// A classroom a student may be placed in: it must exist in the same school
    async fn check_classroom(&self, classroom_id: Uuid, school_id: Uuid) -> Result<(), ApiError> {
        let classroom = self
            .classrooms
            .select_one(classroom_id)
            .await
            .ok_or_else(|| ApiError::field_error("classroom_id", "Classroom not found"))?;

        if classroom.get("school_id") != Some(&json!(school_id.to_string())) {
            return Err(ApiError::field_error("classroom_id", "Classroom belongs to another school"));
        }
        Ok(())
    }
}

pub fn module(services: &Services) -> HandlerModule {
    let repos = Repos {
        schools: services.repo("schools"),
        classrooms: services.repo("classrooms"),
        students: services.repo("students"),
    };

    let r = repos.clone();
    let create = move |args| create_student(r.clone(), args);
    let r = repos.clone();
    let get = move |args| get_student(r.clone(), args);
    let r = repos.clone();
    let list = move |args| list_students(r.clone(), args);
    let r = repos.clone();
    let update = move |args| update_student(r.clone(), args);
    let r = repos;
    let delete = move |args| delete_student(r.clone(), args);

    HandlerModule::new("student")
        .expose("createStudent")
        .expose("get=getStudent")
        .expose("get=listStudents")
        .expose("put=updateStudent")
        .expose("delete=deleteStudent")
        .method_with_params(
            "createStudent",
            &["first_name", "last_name", "email", "birth_date", "school_id", "classroom_id", "__schoolAdmin"],
            create,
        )
        .method("getStudent", "({ __query, __schoolAdmin })", get)
        .method("listStudents", "({ __query, __schoolAdmin })", list)
        .method(
            "updateStudent",
            "({ id, first_name, last_name, email, birth_date, classroom_id, __schoolAdmin })",
            update,
        )
        .method("deleteStudent", "({ id, __query, __schoolAdmin })", delete)
}

async fn create_student(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let claims = claims(&args, "__schoolAdmin")?;
    require(&args, &["first_name", "last_name"])?;

    let school_id = target_school(&claims, optional_uuid_field(&args, "school_id")?, &repos.schools).await?;
    let classroom_id = optional_uuid_field(&args, "classroom_id")?;
    if let Some(classroom_id) = classroom_id {
        repos.check_classroom(classroom_id, school_id).await?;
    }

    let mut record = pick(&args, FIELDS);
    record.insert("school_id".into(), json!(school_id.to_string()));
    record.insert("classroom_id".into(), json!(classroom_id.map(|id| id.to_string())));
    let student = repos.students.create_one(record, None).await?;
    Ok(HandlerResult::created(Value::Object(student)))
}

async fn get_student(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let claims = claims(&args, "__schoolAdmin")?;
    let student = repos.students.select_404(record_id(&args)?).await?;
    ensure_access(&claims, &student)?;
    Ok(HandlerResult::ok(Value::Object(student)))
}

async fn list_students(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let claims = claims(&args, "__schoolAdmin")?;

    let mut students = if claims.is_superadmin() {
        match query_param(&args, "school_id") {
            Some(school_id) => repos.students.select_where("school_id", &json!(school_id)).await,
            None => repos.students.select_all().await,
        }
    } else {
        let own = claims.school_id.map(|id| id.to_string());
        repos.students.select_where("school_id", &json!(own)).await
    };

    if let Some(classroom_id) = query_param(&args, "classroom_id") {
        students.retain(|s| s.get("classroom_id").and_then(Value::as_str) == Some(classroom_id));
    }
    Ok(HandlerResult::ok(json!(students)))
}

/// Students can move between classrooms of their school, never between schools
async fn update_student(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let claims = claims(&args, "__schoolAdmin")?;
    let id = record_id(&args)?;

    let existing = repos.students.select_404(id).await?;
    ensure_access(&claims, &existing)?;

    let mut changes = pick(&args, FIELDS);
    if args.contains_key("classroom_id") {
        let classroom_id = optional_uuid_field(&args, "classroom_id")?;
        if let Some(classroom_id) = classroom_id {
            let school_id = existing
                .get("school_id")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ApiError::internal_server_error("Student has no school"))?;
            repos.check_classroom(classroom_id, school_id).await?;
        }
        changes.insert("classroom_id".into(), json!(classroom_id.map(|id| id.to_string())));
    }

    if changes.is_empty() {
        return Err(ApiError::bad_request("Nothing to update"));
    }
    let student = repos.students.update_one(id, changes, None).await?;
    Ok(HandlerResult::ok(Value::Object(student)))
}

async fn delete_student(repos: Repos, args: HandlerArgs) -> Result<HandlerResult, ApiError> {
    let claims = claims(&args, "__schoolAdmin")?;
    let id = record_id(&args)?;

    let existing = repos.students.select_404(id).await?;
    ensure_access(&claims, &existing)?;

    repos.students.delete_one(id).await?;
    tracing::info!("Student {} deleted", id);
    Ok(HandlerResult::ok(json!({ "id": id })))
}
