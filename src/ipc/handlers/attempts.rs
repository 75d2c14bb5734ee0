use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::eval;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    answers_param, attempt_from_row, attempt_json, load_actor, load_quiz, now_rfc3339,
    parse_stored_answers, policy_flag, quiz_questions, require_db, require_published,
    require_role, str_param, AttemptRow, ATTEMPT_COLUMNS, ROLE_ADMIN, ROLE_STUDENT,
};
use crate::ipc::types::{AppState, Request};

fn handle_submit(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let quiz_id = str_param(&req.params, "quizId")?;
    let student_id = str_param(&req.params, "studentId")?;
    let answers = answers_param(&req.params)?;

    let student = load_actor(conn, &student_id)?;
    require_role(&student, ROLE_STUDENT)?;

    // One transaction spans the question read, the evaluation, and the
    // attempt insert, so a concurrent question edit can never split the
    // submission across two versions of the quiz.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let quiz = load_quiz(&tx, &quiz_id)?;
    require_published(&quiz)?;

    if policy_flag(&tx, "policy.single_attempt_per_quiz") {
        let already: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM attempts WHERE student_id = ? AND quiz_id = ? LIMIT 1",
                [&student_id, &quiz_id],
                |r| r.get(0),
            )
            .optional()?;
        if already.is_some() {
            return Err(HandlerErr::new(
                "conflict",
                "quiz has already been attempted",
            ));
        }
    }

    let questions = quiz_questions(&tx, &quiz_id)?;
    let keys: Vec<_> = questions.iter().map(|q| q.to_key()).collect();
    let evaluation = eval::evaluate(&keys, &answers);

    let attempt_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let answers_raw = serde_json::to_string(&answers)
        .map_err(|e| HandlerErr::new("bad_json", e.to_string()))?;

    tx.execute(
        "INSERT INTO attempts(id, quiz_id, student_id, answers, score, total_marks,
                              correct_answers, total_questions, started_at, submitted_at,
                              is_completed)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)",
        (
            &attempt_id,
            &quiz_id,
            &student_id,
            &answers_raw,
            evaluation.score,
            quiz.total_marks,
            evaluation.correct_answers,
            evaluation.total_questions,
            &now,
            &now,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "attempts" }),
        )
    })?;

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "id": attempt_id,
        "studentId": student_id,
        "studentName": student.name,
        "quizId": quiz_id,
        "quizTitle": quiz.title,
        "score": evaluation.score,
        "totalMarks": quiz.total_marks,
        "correctAnswers": evaluation.correct_answers,
        "totalQuestions": evaluation.total_questions,
        "percentage": eval::percentage(evaluation.score, quiz.total_marks),
        "answers": answers,
        "startedAt": now,
        "submittedAt": now,
        "isCompleted": true,
        "questionResults": evaluation.results,
    }))
}

fn handle_best_score(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = str_param(&req.params, "studentId")?;
    let quiz_id = str_param(&req.params, "quizId")?;

    // Derived by scanning the pair's attempts, never cached.
    let best: Option<i64> = conn.query_row(
        "SELECT MAX(score) FROM attempts WHERE student_id = ? AND quiz_id = ?",
        [&student_id, &quiz_id],
        |r| r.get(0),
    )?;
    Ok(json!({ "bestScore": best }))
}

fn handle_has_attempted(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = str_param(&req.params, "studentId")?;
    let quiz_id = str_param(&req.params, "quizId")?;

    let row: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM attempts WHERE student_id = ? AND quiz_id = ? LIMIT 1",
            [&student_id, &quiz_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(json!({ "hasAttempted": row.is_some() }))
}

fn handle_latest_result(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = str_param(&req.params, "studentId")?;
    let quiz_id = str_param(&req.params, "quizId")?;

    let sql = format!(
        "SELECT {} FROM attempts
         WHERE student_id = ? AND quiz_id = ? AND is_completed = 1
         ORDER BY submitted_at DESC, rowid DESC LIMIT 1",
        ATTEMPT_COLUMNS
    );
    let attempt: Option<AttemptRow> = conn
        .query_row(&sql, [&student_id, &quiz_id], attempt_from_row)
        .optional()?;
    let attempt = attempt.ok_or_else(|| {
        HandlerErr::new("not_found", "no completed attempt found for this quiz")
    })?;

    let mut dto = attempt_json(conn, &attempt)?;

    // The breakdown is re-derived against the current question bank; edits
    // made after the attempt change the displayed correctness while the
    // stored aggregates above stay frozen.
    let answers = parse_stored_answers(&attempt.answers)?;
    let questions = quiz_questions(conn, &quiz_id)?;
    let keys: Vec<_> = questions.iter().map(|q| q.to_key()).collect();
    let results = eval::replay_results(&keys, &answers);

    dto["answers"] = json!(answers);
    dto["questionResults"] = serde_json::to_value(results)
        .map_err(|e| HandlerErr::new("bad_json", e.to_string()))?;
    Ok(dto)
}

fn handle_list_for_student(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = str_param(&req.params, "studentId")?;
    let student = load_actor(conn, &student_id)?;
    require_role(&student, ROLE_STUDENT)?;

    let sql = format!(
        "SELECT {} FROM attempts WHERE student_id = ? AND is_completed = 1
         ORDER BY submitted_at DESC, rowid DESC",
        ATTEMPT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let attempts = stmt
        .query_map([&student_id], attempt_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let rows = attempts
        .iter()
        .map(|a| attempt_json(conn, a))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "attempts": rows }))
}

fn require_admin(
    conn: &rusqlite::Connection,
    params: &serde_json::Value,
) -> Result<(), HandlerErr> {
    let admin_id = str_param(params, "adminId")?;
    let admin = load_actor(conn, &admin_id)?;
    require_role(&admin, ROLE_ADMIN)
}

fn handle_list_for_quiz(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(conn, &req.params)?;
    let quiz_id = str_param(&req.params, "quizId")?;

    let sql = format!(
        "SELECT {} FROM attempts WHERE quiz_id = ?
         ORDER BY submitted_at DESC, rowid DESC",
        ATTEMPT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let attempts = stmt
        .query_map([&quiz_id], attempt_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let rows = attempts
        .iter()
        .map(|a| attempt_json(conn, a))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "attempts": rows }))
}

fn handle_list_all(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    require_admin(conn, &req.params)?;

    let sql = format!(
        "SELECT {} FROM attempts ORDER BY submitted_at DESC, rowid DESC",
        ATTEMPT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let attempts = stmt
        .query_map([], attempt_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let rows = attempts
        .iter()
        .map(|a| attempt_json(conn, a))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "attempts": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let out = match req.method.as_str() {
        "attempts.submit" => handle_submit(state, req),
        "attempts.bestScore" => handle_best_score(state, req),
        "attempts.hasAttempted" => handle_has_attempted(state, req),
        "attempts.latestResult" => handle_latest_result(state, req),
        "attempts.listForStudent" => handle_list_for_student(state, req),
        "attempts.listForQuiz" => handle_list_for_quiz(state, req),
        "attempts.listAll" => handle_list_all(state, req),
        _ => return None,
    };
    Some(match out {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
