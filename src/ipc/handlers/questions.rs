use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    load_question, load_quiz, normalize_answer_label, opt_i64_param, opt_str_param, question_json,
    recompute_total_marks, require_db, require_quiz_owner, str_param,
};
use crate::ipc::types::{AppState, Request};

struct QuestionSpec {
    question_text: String,
    option_a: String,
    option_b: String,
    option_c: String,
    option_d: String,
    correct_answer: String,
    image_url: Option<String>,
    explanation: Option<String>,
    marks: i64,
}

/// Parses and validates the gradable fields shared by add and update.
/// The correct-answer label is normalized to upper-case here; an absent or
/// out-of-range label is a validation failure, not a missing parameter.
fn question_spec(params: &serde_json::Value) -> Result<QuestionSpec, HandlerErr> {
    let question_text = str_param(params, "questionText")?;
    let option_a = str_param(params, "optionA")?;
    let option_b = str_param(params, "optionB")?;
    let option_c = str_param(params, "optionC")?;
    let option_d = str_param(params, "optionD")?;

    let correct_answer = match params.get("correctAnswer").and_then(|v| v.as_str()) {
        Some(raw) => normalize_answer_label(raw)?,
        None => {
            return Err(HandlerErr::new("validation", "correctAnswer is required"));
        }
    };

    let marks = opt_i64_param(params, "marks").unwrap_or(1);
    if marks < 1 {
        return Err(HandlerErr::with_details(
            "validation",
            "marks must be at least 1",
            json!({ "marks": marks }),
        ));
    }

    Ok(QuestionSpec {
        question_text,
        option_a,
        option_b,
        option_c,
        option_d,
        correct_answer,
        image_url: opt_str_param(params, "imageUrl"),
        explanation: opt_str_param(params, "explanation"),
        marks,
    })
}

fn handle_add(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let quiz_id = str_param(&req.params, "quizId")?;
    let teacher_id = str_param(&req.params, "teacherId")?;
    let spec = question_spec(&req.params)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let quiz = load_quiz(&tx, &quiz_id)?;
    require_quiz_owner(&quiz, &teacher_id)?;

    let question_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO questions(id, quiz_id, question_text, option_a, option_b, option_c,
                               option_d, correct_answer, image_url, explanation, marks)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &question_id,
            &quiz_id,
            &spec.question_text,
            &spec.option_a,
            &spec.option_b,
            &spec.option_c,
            &spec.option_d,
            &spec.correct_answer,
            &spec.image_url,
            &spec.explanation,
            spec.marks,
        ),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "questions" }),
        )
    })?;

    let total_marks = recompute_total_marks(&tx, &quiz_id)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let question = load_question(conn, &question_id)?;
    Ok(json!({
        "question": question_json(&question, true),
        "quizTotalMarks": total_marks,
    }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let question_id = str_param(&req.params, "questionId")?;
    let teacher_id = str_param(&req.params, "teacherId")?;
    let spec = question_spec(&req.params)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let existing = load_question(&tx, &question_id)?;
    let quiz = load_quiz(&tx, &existing.quiz_id)?;
    require_quiz_owner(&quiz, &teacher_id)?;

    // Full replacement of all gradable fields.
    tx.execute(
        "UPDATE questions SET question_text = ?, option_a = ?, option_b = ?, option_c = ?,
                              option_d = ?, correct_answer = ?, image_url = ?, explanation = ?,
                              marks = ?
         WHERE id = ?",
        (
            &spec.question_text,
            &spec.option_a,
            &spec.option_b,
            &spec.option_c,
            &spec.option_d,
            &spec.correct_answer,
            &spec.image_url,
            &spec.explanation,
            spec.marks,
            &question_id,
        ),
    )?;

    let total_marks = recompute_total_marks(&tx, &existing.quiz_id)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let question = load_question(conn, &question_id)?;
    Ok(json!({
        "question": question_json(&question, true),
        "quizTotalMarks": total_marks,
    }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let question_id = str_param(&req.params, "questionId")?;
    let teacher_id = str_param(&req.params, "teacherId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let existing = load_question(&tx, &question_id)?;
    let quiz = load_quiz(&tx, &existing.quiz_id)?;
    require_quiz_owner(&quiz, &teacher_id)?;

    tx.execute("DELETE FROM questions WHERE id = ?", [&question_id])
        .map_err(|e| {
            HandlerErr::with_details(
                "db_delete_failed",
                e.to_string(),
                json!({ "table": "questions" }),
            )
        })?;

    // The parent quiz's derived total must track the deletion even though
    // the quiz itself was not addressed in the call.
    let total_marks = recompute_total_marks(&tx, &existing.quiz_id)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true, "quizTotalMarks": total_marks }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let out = match req.method.as_str() {
        "questions.add" => handle_add(state, req),
        "questions.update" => handle_update(state, req),
        "questions.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(match out {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    })
}
