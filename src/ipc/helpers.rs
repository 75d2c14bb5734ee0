use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::db;
use crate::eval::QuestionKey;
use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;

pub const ROLE_TEACHER: &str = "teacher";
pub const ROLE_STUDENT: &str = "student";
pub const ROLE_ADMIN: &str = "admin";

pub fn now_rfc3339() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

// ---- param parsing ----

pub fn str_param(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(HandlerErr::new("bad_params", format!("missing {}", key))),
    }
}

pub fn opt_str_param(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn opt_i64_param(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Submitted answers: a JSON object mapping question id -> selected letter.
/// An empty object is a valid (blank) submission.
pub fn answers_param(params: &serde_json::Value) -> Result<HashMap<String, String>, HandlerErr> {
    let Some(obj) = params.get("answers").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "missing answers object"));
    };
    let mut answers = HashMap::with_capacity(obj.len());
    for (question_id, selected) in obj {
        let Some(s) = selected.as_str() else {
            return Err(HandlerErr::with_details(
                "bad_params",
                "answers values must be strings",
                json!({ "questionId": question_id }),
            ));
        };
        answers.insert(question_id.clone(), s.to_string());
    }
    Ok(answers)
}

// ---- access policy ----

pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: String,
}

pub fn load_actor(conn: &Connection, user_id: &str) -> Result<Actor, HandlerErr> {
    conn.query_row(
        "SELECT id, name, role FROM users WHERE id = ?",
        [user_id],
        |r| {
            Ok(Actor {
                id: r.get(0)?,
                name: r.get(1)?,
                role: r.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| HandlerErr::new("not_found", "user not found"))
}

pub fn require_role(actor: &Actor, role: &str) -> Result<(), HandlerErr> {
    if actor.role == role {
        Ok(())
    } else {
        Err(HandlerErr::with_details(
            "unauthorized",
            format!("requires the {} role", role),
            json!({ "role": actor.role }),
        ))
    }
}

pub fn require_quiz_owner(quiz: &QuizRow, requester_id: &str) -> Result<(), HandlerErr> {
    if quiz.created_by == requester_id {
        Ok(())
    } else {
        Err(HandlerErr::new(
            "unauthorized",
            "only the owning teacher may modify this quiz",
        ))
    }
}

pub fn require_published(quiz: &QuizRow) -> Result<(), HandlerErr> {
    if quiz.is_published {
        Ok(())
    } else {
        Err(HandlerErr::new("not_available", "quiz is not available"))
    }
}

/// Course ids are only ever stamped onto quizzes; a dangling reference is a
/// validation failure, not a missing resource.
pub fn require_course(conn: &Connection, course_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT title FROM courses WHERE id = ?",
        [course_id],
        |r| r.get::<_, String>(0),
    )
    .optional()?
    .ok_or_else(|| {
        HandlerErr::with_details(
            "validation",
            "course not found",
            json!({ "courseId": course_id }),
        )
    })
}

pub fn normalize_answer_label(raw: &str) -> Result<String, HandlerErr> {
    let label = raw.trim().to_ascii_uppercase();
    match label.as_str() {
        "A" | "B" | "C" | "D" => Ok(label),
        _ => Err(HandlerErr::with_details(
            "validation",
            "correctAnswer must be one of A, B, C, D",
            json!({ "correctAnswer": raw }),
        )),
    }
}

pub fn policy_flag(conn: &Connection, key: &str) -> bool {
    db::settings_get_json(conn, key)
        .ok()
        .flatten()
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

// ---- quiz rows ----

pub struct QuizRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub course_id: Option<String>,
    pub created_by: String,
    pub is_published: bool,
    pub total_marks: i64,
    pub duration_minutes: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

pub const QUIZ_COLUMNS: &str = "id, title, description, course_id, created_by, \
     is_published, total_marks, duration_minutes, created_at, updated_at";

pub fn quiz_from_row(r: &rusqlite::Row) -> rusqlite::Result<QuizRow> {
    Ok(QuizRow {
        id: r.get(0)?,
        title: r.get(1)?,
        description: r.get(2)?,
        course_id: r.get(3)?,
        created_by: r.get(4)?,
        is_published: r.get::<_, i64>(5)? != 0,
        total_marks: r.get(6)?,
        duration_minutes: r.get(7)?,
        created_at: r.get(8)?,
        updated_at: r.get(9)?,
    })
}

pub fn load_quiz(conn: &Connection, quiz_id: &str) -> Result<QuizRow, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM quizzes WHERE id = ?", QUIZ_COLUMNS),
        [quiz_id],
        quiz_from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::new("not_found", "quiz not found"))
}

pub fn list_quizzes(conn: &Connection, where_sql: &str, binds: &[&str]) -> Result<Vec<QuizRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM quizzes {} ORDER BY created_at DESC, rowid DESC",
        QUIZ_COLUMNS, where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), quiz_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---- question rows ----

pub struct QuestionRow {
    pub id: String,
    pub quiz_id: String,
    pub question_text: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub correct_answer: String,
    pub image_url: Option<String>,
    pub explanation: Option<String>,
    pub marks: i64,
}

impl QuestionRow {
    pub fn to_key(&self) -> QuestionKey {
        QuestionKey {
            id: self.id.clone(),
            question_text: self.question_text.clone(),
            option_a: self.option_a.clone(),
            option_b: self.option_b.clone(),
            option_c: self.option_c.clone(),
            option_d: self.option_d.clone(),
            correct_answer: self.correct_answer.clone(),
            image_url: self.image_url.clone(),
            explanation: self.explanation.clone(),
            marks: self.marks,
        }
    }
}

const QUESTION_COLUMNS: &str = "id, quiz_id, question_text, option_a, option_b, option_c, \
     option_d, correct_answer, image_url, explanation, marks";

fn question_from_row(r: &rusqlite::Row) -> rusqlite::Result<QuestionRow> {
    Ok(QuestionRow {
        id: r.get(0)?,
        quiz_id: r.get(1)?,
        question_text: r.get(2)?,
        option_a: r.get(3)?,
        option_b: r.get(4)?,
        option_c: r.get(5)?,
        option_d: r.get(6)?,
        correct_answer: r.get(7)?,
        image_url: r.get(8)?,
        explanation: r.get(9)?,
        marks: r.get(10)?,
    })
}

pub fn load_question(conn: &Connection, question_id: &str) -> Result<QuestionRow, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM questions WHERE id = ?", QUESTION_COLUMNS),
        [question_id],
        question_from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::new("not_found", "question not found"))
}

pub fn quiz_questions(conn: &Connection, quiz_id: &str) -> Result<Vec<QuestionRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM questions WHERE quiz_id = ? ORDER BY rowid",
        QUESTION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([quiz_id], question_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Sums the question marks from scratch and persists the new quiz total.
/// Must run inside the same transaction as the question mutation that
/// triggered it so readers never observe a stale total.
pub fn recompute_total_marks(conn: &Connection, quiz_id: &str) -> Result<i64, HandlerErr> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(marks), 0) FROM questions WHERE quiz_id = ?",
        [quiz_id],
        |r| r.get(0),
    )?;
    conn.execute(
        "UPDATE quizzes SET total_marks = ?, updated_at = ? WHERE id = ?",
        (total, now_rfc3339(), quiz_id),
    )?;
    Ok(total)
}

// ---- attempt rows ----

pub struct AttemptRow {
    pub id: String,
    pub quiz_id: String,
    pub student_id: String,
    pub answers: String,
    pub score: i64,
    pub total_marks: i64,
    pub correct_answers: i64,
    pub total_questions: i64,
    pub started_at: String,
    pub submitted_at: String,
    pub is_completed: bool,
}

pub const ATTEMPT_COLUMNS: &str = "id, quiz_id, student_id, answers, score, total_marks, \
     correct_answers, total_questions, started_at, submitted_at, is_completed";

pub fn attempt_from_row(r: &rusqlite::Row) -> rusqlite::Result<AttemptRow> {
    Ok(AttemptRow {
        id: r.get(0)?,
        quiz_id: r.get(1)?,
        student_id: r.get(2)?,
        answers: r.get(3)?,
        score: r.get(4)?,
        total_marks: r.get(5)?,
        correct_answers: r.get(6)?,
        total_questions: r.get(7)?,
        started_at: r.get(8)?,
        submitted_at: r.get(9)?,
        is_completed: r.get::<_, i64>(10)? != 0,
    })
}

pub fn parse_stored_answers(raw: &str) -> Result<HashMap<String, String>, HandlerErr> {
    serde_json::from_str(raw)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("corrupt answers payload: {}", e)))
}

// ---- DTO shaping ----

pub fn question_json(q: &QuestionRow, include_answer: bool) -> serde_json::Value {
    json!({
        "id": q.id,
        "quizId": q.quiz_id,
        "questionText": q.question_text,
        "optionA": q.option_a,
        "optionB": q.option_b,
        "optionC": q.option_c,
        "optionD": q.option_d,
        "correctAnswer": if include_answer { json!(q.correct_answer) } else { json!(null) },
        "imageUrl": q.image_url,
        "explanation": if include_answer { json!(q.explanation) } else { json!(null) },
        "marks": q.marks,
    })
}

pub fn user_display_name(conn: &Connection, user_id: &str) -> Result<Option<String>, HandlerErr> {
    Ok(conn
        .query_row("SELECT name FROM users WHERE id = ?", [user_id], |r| {
            r.get(0)
        })
        .optional()?)
}

/// Builds the quiz DTO. `include_answers` governs question sanitization;
/// passing a `student_id` stamps that student's `hasAttempted`/`bestScore`,
/// both derived on demand from the attempt rows.
pub fn quiz_json(
    conn: &Connection,
    quiz: &QuizRow,
    include_questions: bool,
    include_answers: bool,
    student_id: Option<&str>,
) -> Result<serde_json::Value, HandlerErr> {
    let question_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM questions WHERE quiz_id = ?",
        [&quiz.id],
        |r| r.get(0),
    )?;
    let course_name: Option<String> = match &quiz.course_id {
        Some(cid) => conn
            .query_row("SELECT title FROM courses WHERE id = ?", [cid], |r| {
                r.get(0)
            })
            .optional()?,
        None => None,
    };
    let created_by_name = user_display_name(conn, &quiz.created_by)?;

    let mut dto = json!({
        "id": quiz.id,
        "title": quiz.title,
        "description": quiz.description,
        "courseId": quiz.course_id,
        "courseName": course_name,
        "createdById": quiz.created_by,
        "createdByName": created_by_name,
        "isPublished": quiz.is_published,
        "totalMarks": quiz.total_marks,
        "durationMinutes": quiz.duration_minutes,
        "questionCount": question_count,
        "createdAt": quiz.created_at,
        "updatedAt": quiz.updated_at,
    });

    if include_questions {
        let questions = quiz_questions(conn, &quiz.id)?;
        dto["questions"] = serde_json::Value::Array(
            questions
                .iter()
                .map(|q| question_json(q, include_answers))
                .collect(),
        );
    }

    if let Some(sid) = student_id {
        let best: Option<i64> = conn.query_row(
            "SELECT MAX(score) FROM attempts WHERE student_id = ? AND quiz_id = ?",
            [sid, quiz.id.as_str()],
            |r| r.get(0),
        )?;
        dto["hasAttempted"] = json!(best.is_some());
        dto["bestScore"] = json!(best);
    }

    Ok(dto)
}

/// Aggregate attempt DTO (no per-question breakdown).
pub fn attempt_json(conn: &Connection, a: &AttemptRow) -> Result<serde_json::Value, HandlerErr> {
    let student_name = user_display_name(conn, &a.student_id)?;
    let quiz_title: Option<String> = conn
        .query_row("SELECT title FROM quizzes WHERE id = ?", [&a.quiz_id], |r| {
            r.get(0)
        })
        .optional()?;

    Ok(json!({
        "id": a.id,
        "studentId": a.student_id,
        "studentName": student_name,
        "quizId": a.quiz_id,
        "quizTitle": quiz_title,
        "score": a.score,
        "totalMarks": a.total_marks,
        "correctAnswers": a.correct_answers,
        "totalQuestions": a.total_questions,
        "percentage": crate::eval::percentage(a.score, a.total_marks),
        "startedAt": a.started_at,
        "submittedAt": a.submitted_at,
        "isCompleted": a.is_completed,
    }))
}
