use serde::Serialize;
use std::collections::HashMap;

/// Authoritative grading view of one question, as read from the question
/// bank at evaluation time.
#[derive(Debug, Clone)]
pub struct QuestionKey {
    pub id: String,
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

/// Post-submission per-question disclosure: answers are no longer hidden.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub question_id: String,
    pub question_text: String,
    pub option_a: String,
    pub option_b: String,
    pub option_c: String,
    pub option_d: String,
    pub selected_answer: Option<String>,
    pub correct_answer: String,
    pub is_correct: bool,
    pub explanation: Option<String>,
    pub marks: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub score: i64,
    pub correct_answers: i64,
    pub total_questions: i64,
    pub results: Vec<QuestionResult>,
}

fn result_for(question: &QuestionKey, selected: Option<&String>) -> QuestionResult {
    // A missing selection can never match a correct-answer label.
    let is_correct = selected
        .map(|s| s.eq_ignore_ascii_case(&question.correct_answer))
        .unwrap_or(false);
    QuestionResult {
        question_id: question.id.clone(),
        question_text: question.question_text.clone(),
        option_a: question.option_a.clone(),
        option_b: question.option_b.clone(),
        option_c: question.option_c.clone(),
        option_d: question.option_d.clone(),
        selected_answer: selected.cloned(),
        correct_answer: question.correct_answer.clone(),
        is_correct,
        explanation: question.explanation.clone(),
        marks: question.marks,
    }
}

/// Scores a submission against the authoritative question set.
///
/// Iterates the question set rather than the submission's keys, so omitted
/// answers count as wrong instead of being skipped. Pure and idempotent;
/// persistence is the caller's job.
pub fn evaluate(questions: &[QuestionKey], answers: &HashMap<String, String>) -> Evaluation {
    let mut score: i64 = 0;
    let mut correct_answers: i64 = 0;
    let mut results = Vec::with_capacity(questions.len());

    for question in questions {
        let entry = result_for(question, answers.get(&question.id));
        if entry.is_correct {
            score += question.marks;
            correct_answers += 1;
        }
        results.push(entry);
    }

    Evaluation {
        score,
        correct_answers,
        total_questions: questions.len() as i64,
        results,
    }
}

/// Re-derives a per-question breakdown for a historical attempt from its
/// stored answer map joined against the current question bank. Answers whose
/// question has since been deleted are skipped; the stored aggregates on the
/// attempt row are never touched.
pub fn replay_results(
    questions: &[QuestionKey],
    answers: &HashMap<String, String>,
) -> Vec<QuestionResult> {
    let by_id: HashMap<&str, &QuestionKey> =
        questions.iter().map(|q| (q.id.as_str(), q)).collect();

    let mut results: Vec<QuestionResult> = answers
        .iter()
        .filter_map(|(question_id, selected)| {
            by_id
                .get(question_id.as_str())
                .map(|q| result_for(q, Some(selected)))
        })
        .collect();
    results.sort_by(|a, b| a.question_id.cmp(&b.question_id));
    results
}

pub fn percentage(score: i64, total_marks: i64) -> f64 {
    if total_marks > 0 {
        (score as f64) * 100.0 / (total_marks as f64)
    } else {
        0.0
    }
}

pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
