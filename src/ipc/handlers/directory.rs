use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    load_actor, require_db, str_param, ROLE_ADMIN, ROLE_STUDENT, ROLE_TEACHER,
};
use crate::ipc::types::{AppState, Request};

fn handle_users_register(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let name = str_param(&req.params, "name")?;
    let role = str_param(&req.params, "role")?;
    if role != ROLE_TEACHER && role != ROLE_STUDENT && role != ROLE_ADMIN {
        return Err(HandlerErr::with_details(
            "validation",
            "role must be one of: teacher, student, admin",
            json!({ "role": role }),
        ));
    }

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, name, role) VALUES(?, ?, ?)",
        (&user_id, &name, &role),
    )
    .map_err(|e| {
        HandlerErr::with_details("db_insert_failed", e.to_string(), json!({ "table": "users" }))
    })?;

    Ok(json!({ "userId": user_id, "name": name, "role": role }))
}

fn handle_users_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let user_id = str_param(&req.params, "userId")?;
    let actor = load_actor(conn, &user_id)?;
    Ok(json!({ "userId": actor.id, "name": actor.name, "role": actor.role }))
}

fn handle_courses_register(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let title = str_param(&req.params, "title")?;

    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, title) VALUES(?, ?)",
        (&course_id, &title),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "courses" }),
        )
    })?;

    Ok(json!({ "courseId": course_id, "title": title }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let out = match req.method.as_str() {
        "users.register" => handle_users_register(state, req),
        "users.get" => handle_users_get(state, req),
        "courses.register" => handle_courses_register(state, req),
        _ => return None,
    };
    Some(match out {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
