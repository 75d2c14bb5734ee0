use serde_json::json;
use uuid::Uuid;

use crate::eval;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    list_quizzes, load_actor, load_quiz, now_rfc3339, opt_i64_param, opt_str_param, policy_flag,
    quiz_json, require_course, require_db, require_published, require_quiz_owner, require_role,
    str_param, QuizRow, ROLE_ADMIN, ROLE_STUDENT, ROLE_TEACHER,
};
use crate::ipc::types::{AppState, Request};

fn handle_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let teacher_id = str_param(&req.params, "teacherId")?;
    let title = str_param(&req.params, "title")?;
    let description = opt_str_param(&req.params, "description");
    let duration_minutes = opt_i64_param(&req.params, "durationMinutes");

    let teacher = load_actor(conn, &teacher_id)?;
    require_role(&teacher, ROLE_TEACHER)?;

    let course_id = opt_str_param(&req.params, "courseId");
    if let Some(cid) = &course_id {
        require_course(conn, cid)?;
    }

    // Quizzes always begin unpublished, with no questions and zero marks.
    let quiz_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO quizzes(id, title, description, course_id, created_by,
                             is_published, total_marks, duration_minutes, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, 0, 0, ?, ?, ?)",
        (
            &quiz_id,
            &title,
            &description,
            &course_id,
            &teacher_id,
            duration_minutes,
            &now,
            &now,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "quizzes" }),
        )
    })?;

    let quiz = load_quiz(conn, &quiz_id)?;
    quiz_json(conn, &quiz, false, false, None)
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let quiz_id = str_param(&req.params, "quizId")?;
    let teacher_id = str_param(&req.params, "teacherId")?;
    let title = str_param(&req.params, "title")?;
    let description = opt_str_param(&req.params, "description");
    let duration_minutes = opt_i64_param(&req.params, "durationMinutes");

    let quiz = load_quiz(conn, &quiz_id)?;
    require_quiz_owner(&quiz, &teacher_id)?;

    let course_id = match opt_str_param(&req.params, "courseId") {
        Some(cid) => {
            require_course(conn, &cid)?;
            Some(cid)
        }
        // A missing courseId leaves the existing linkage alone.
        None => quiz.course_id.clone(),
    };

    // Total marks is derived-only; a direct write is never accepted here.
    conn.execute(
        "UPDATE quizzes SET title = ?, description = ?, course_id = ?, duration_minutes = ?,
                            updated_at = ?
         WHERE id = ?",
        (
            &title,
            &description,
            &course_id,
            duration_minutes,
            now_rfc3339(),
            &quiz_id,
        ),
    )?;

    let quiz = load_quiz(conn, &quiz_id)?;
    quiz_json(conn, &quiz, true, true, None)
}

fn delete_quiz_cascade(
    conn: &rusqlite::Connection,
    quiz_id: &str,
) -> Result<(), HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    tx.execute("DELETE FROM attempts WHERE quiz_id = ?", [quiz_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "attempts" }),
            )
        })?;
    tx.execute("DELETE FROM questions WHERE quiz_id = ?", [quiz_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "questions" }),
            )
        })?;
    tx.execute("DELETE FROM quizzes WHERE id = ?", [quiz_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "quizzes" }),
            )
        })?;

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let quiz_id = str_param(&req.params, "quizId")?;
    let teacher_id = str_param(&req.params, "teacherId")?;

    let quiz = load_quiz(conn, &quiz_id)?;
    require_quiz_owner(&quiz, &teacher_id)?;

    delete_quiz_cascade(conn, &quiz_id)?;
    Ok(json!({ "ok": true }))
}

fn toggle_publish(conn: &rusqlite::Connection, quiz: &QuizRow) -> Result<QuizRow, HandlerErr> {
    if !quiz.is_published && policy_flag(conn, "policy.forbid_publish_empty") {
        let question_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM questions WHERE quiz_id = ?",
            [&quiz.id],
            |r| r.get(0),
        )?;
        if question_count == 0 {
            return Err(HandlerErr::new(
                "validation",
                "cannot publish a quiz with no questions",
            ));
        }
    }

    conn.execute(
        "UPDATE quizzes SET is_published = 1 - is_published, updated_at = ? WHERE id = ?",
        (now_rfc3339(), &quiz.id),
    )?;
    load_quiz(conn, &quiz.id)
}

fn handle_toggle_publish(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let quiz_id = str_param(&req.params, "quizId")?;
    let teacher_id = str_param(&req.params, "teacherId")?;

    let quiz = load_quiz(conn, &quiz_id)?;
    require_quiz_owner(&quiz, &teacher_id)?;

    let updated = toggle_publish(conn, &quiz)?;
    quiz_json(conn, &updated, false, false, None)
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let quiz_id = str_param(&req.params, "quizId")?;
    let teacher_id = str_param(&req.params, "teacherId")?;

    let quiz = load_quiz(conn, &quiz_id)?;
    require_quiz_owner(&quiz, &teacher_id)?;

    quiz_json(conn, &quiz, true, true, None)
}

fn handle_list_for_teacher(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let teacher_id = str_param(&req.params, "teacherId")?;
    let teacher = load_actor(conn, &teacher_id)?;
    require_role(&teacher, ROLE_TEACHER)?;

    let quizzes = list_quizzes(conn, "WHERE created_by = ?", &[&teacher_id])?;
    let rows = quizzes
        .iter()
        .map(|q| quiz_json(conn, q, false, false, None))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "quizzes": rows }))
}

fn handle_list_published(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = str_param(&req.params, "studentId")?;
    let student = load_actor(conn, &student_id)?;
    require_role(&student, ROLE_STUDENT)?;

    let quizzes = list_quizzes(conn, "WHERE is_published = 1", &[])?;
    let rows = quizzes
        .iter()
        .map(|q| quiz_json(conn, q, false, false, Some(&student_id)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "quizzes": rows }))
}

fn handle_list_by_course(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let course_id = str_param(&req.params, "courseId")?;
    let student_id = str_param(&req.params, "studentId")?;
    let student = load_actor(conn, &student_id)?;
    require_role(&student, ROLE_STUDENT)?;

    let quizzes = list_quizzes(
        conn,
        "WHERE course_id = ? AND is_published = 1",
        &[&course_id],
    )?;
    let rows = quizzes
        .iter()
        .map(|q| quiz_json(conn, q, false, false, Some(&student_id)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "quizzes": rows }))
}

fn handle_get_for_student(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let quiz_id = str_param(&req.params, "quizId")?;
    let student_id = str_param(&req.params, "studentId")?;
    let student = load_actor(conn, &student_id)?;
    require_role(&student, ROLE_STUDENT)?;

    let quiz = load_quiz(conn, &quiz_id)?;
    require_published(&quiz)?;

    // Questions included, answers and explanations stripped.
    quiz_json(conn, &quiz, true, false, Some(&student_id))
}

fn require_admin(
    conn: &rusqlite::Connection,
    params: &serde_json::Value,
) -> Result<(), HandlerErr> {
    let admin_id = str_param(params, "adminId")?;
    let admin = load_actor(conn, &admin_id)?;
    require_role(&admin, ROLE_ADMIN)
}

fn handle_list_all(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(conn, &req.params)?;

    let quizzes = list_quizzes(conn, "", &[])?;
    let rows = quizzes
        .iter()
        .map(|q| quiz_json(conn, q, false, false, None))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "quizzes": rows }))
}

fn handle_get_for_admin(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(conn, &req.params)?;

    let quiz_id = str_param(&req.params, "quizId")?;
    let quiz = load_quiz(conn, &quiz_id)?;
    quiz_json(conn, &quiz, true, true, None)
}

fn handle_admin_toggle_publish(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(conn, &req.params)?;

    let quiz_id = str_param(&req.params, "quizId")?;
    let quiz = load_quiz(conn, &quiz_id)?;
    let updated = toggle_publish(conn, &quiz)?;
    quiz_json(conn, &updated, false, false, None)
}

fn handle_admin_delete(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(conn, &req.params)?;

    let quiz_id = str_param(&req.params, "quizId")?;
    load_quiz(conn, &quiz_id)?;
    delete_quiz_cascade(conn, &quiz_id)?;
    Ok(json!({ "ok": true }))
}

fn handle_stats(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(conn, &req.params)?;

    let total_quizzes: i64 = conn.query_row("SELECT COUNT(*) FROM quizzes", [], |r| r.get(0))?;
    let published: i64 = conn.query_row(
        "SELECT COUNT(*) FROM quizzes WHERE is_published = 1",
        [],
        |r| r.get(0),
    )?;
    let total_attempts: i64 =
        conn.query_row("SELECT COUNT(*) FROM attempts", [], |r| r.get(0))?;
    let average: Option<f64> = conn.query_row(
        "SELECT AVG(score * 100.0 / total_marks) FROM attempts
         WHERE is_completed = 1 AND total_marks > 0",
        [],
        |r| r.get(0),
    )?;

    Ok(json!({
        "totalQuizzes": total_quizzes,
        "publishedQuizzes": published,
        "unpublishedQuizzes": total_quizzes - published,
        "totalAttempts": total_attempts,
        "averageScore": eval::round_2(average.unwrap_or(0.0)),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let out = match req.method.as_str() {
        "quizzes.create" => handle_create(state, req),
        "quizzes.update" => handle_update(state, req),
        "quizzes.delete" => handle_delete(state, req),
        "quizzes.togglePublish" => handle_toggle_publish(state, req),
        "quizzes.get" => handle_get(state, req),
        "quizzes.listForTeacher" => handle_list_for_teacher(state, req),
        "quizzes.listPublished" => handle_list_published(state, req),
        "quizzes.listByCourse" => handle_list_by_course(state, req),
        "quizzes.getForStudent" => handle_get_for_student(state, req),
        "quizzes.listAll" => handle_list_all(state, req),
        "quizzes.getForAdmin" => handle_get_for_admin(state, req),
        "quizzes.adminTogglePublish" => handle_admin_toggle_publish(state, req),
        "quizzes.adminDelete" => handle_admin_delete(state, req),
        "quizzes.stats" => handle_stats(state, req),
        _ => return None,
    };
    Some(match out {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
