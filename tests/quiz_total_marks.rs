use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_quizd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn quizd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    expected_code: &str,
) {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    let code = value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str());
    assert_eq!(
        code,
        Some(expected_code),
        "expected {} for {}: {}",
        expected_code,
        method,
        value
    );
}

fn register_user(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
    role: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        id,
        "users.register",
        json!({ "name": name, "role": role }),
    );
    result
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string()
}

#[test]
fn total_marks_tracks_question_mutations() {
    let workspace = temp_dir("quizd-total-marks");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = register_user(&mut stdin, &mut reader, "2", "Pat Ahmed", "teacher");

    let quiz = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "quizzes.create",
        json!({ "teacherId": teacher, "title": "Fractions" }),
    );
    assert_eq!(quiz.get("totalMarks").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(quiz.get("isPublished").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(quiz.get("questionCount").and_then(|v| v.as_i64()), Some(0));
    let quiz_id = quiz.get("id").and_then(|v| v.as_str()).expect("quiz id").to_string();

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "questions.add",
        json!({
            "quizId": quiz_id,
            "teacherId": teacher,
            "questionText": "1/2 + 1/4 = ?",
            "optionA": "1/6",
            "optionB": "3/4",
            "optionC": "2/6",
            "optionD": "1/8",
            "correctAnswer": "B",
            "marks": 2
        }),
    );
    assert_eq!(added.get("quizTotalMarks").and_then(|v| v.as_i64()), Some(2));
    let q1 = added
        .get("question")
        .and_then(|q| q.get("id"))
        .and_then(|v| v.as_str())
        .expect("question id")
        .to_string();

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "questions.add",
        json!({
            "quizId": quiz_id,
            "teacherId": teacher,
            "questionText": "2/3 of 9 = ?",
            "optionA": "3",
            "optionB": "4",
            "optionC": "5",
            "optionD": "6",
            "correctAnswer": "D",
            "marks": 3
        }),
    );
    assert_eq!(added.get("quizTotalMarks").and_then(|v| v.as_i64()), Some(5));
    let q2 = added
        .get("question")
        .and_then(|q| q.get("id"))
        .and_then(|v| v.as_str())
        .expect("question id")
        .to_string();

    let full = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "quizzes.get",
        json!({ "quizId": quiz_id, "teacherId": teacher }),
    );
    assert_eq!(full.get("totalMarks").and_then(|v| v.as_i64()), Some(5));
    assert_eq!(full.get("questionCount").and_then(|v| v.as_i64()), Some(2));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "questions.update",
        json!({
            "questionId": q1,
            "teacherId": teacher,
            "questionText": "1/2 + 1/4 = ?",
            "optionA": "1/6",
            "optionB": "3/4",
            "optionC": "2/6",
            "optionD": "1/8",
            "correctAnswer": "B",
            "marks": 4
        }),
    );
    assert_eq!(updated.get("quizTotalMarks").and_then(|v| v.as_i64()), Some(7));

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "questions.delete",
        json!({ "questionId": q2, "teacherId": teacher }),
    );
    assert_eq!(deleted.get("quizTotalMarks").and_then(|v| v.as_i64()), Some(4));

    let full = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "quizzes.get",
        json!({ "quizId": quiz_id, "teacherId": teacher }),
    );
    assert_eq!(full.get("totalMarks").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(full.get("questionCount").and_then(|v| v.as_i64()), Some(1));
}

#[test]
fn deleting_question_then_perfect_submission_scores_100() {
    let workspace = temp_dir("quizd-delete-then-submit");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = register_user(&mut stdin, &mut reader, "2", "Pat Ahmed", "teacher");
    let student = register_user(&mut stdin, &mut reader, "3", "Sam Osei", "student");

    let quiz = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "quizzes.create",
        json!({ "teacherId": teacher, "title": "Shrinking quiz" }),
    );
    let quiz_id = quiz.get("id").and_then(|v| v.as_str()).expect("quiz id").to_string();

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "questions.add",
        json!({
            "quizId": quiz_id,
            "teacherId": teacher,
            "questionText": "Keep me",
            "optionA": "a", "optionB": "b", "optionC": "c", "optionD": "d",
            "correctAnswer": "B",
            "marks": 2
        }),
    );
    let keep = added
        .get("question")
        .and_then(|q| q.get("id"))
        .and_then(|v| v.as_str())
        .expect("question id")
        .to_string();
    let added = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "questions.add",
        json!({
            "quizId": quiz_id,
            "teacherId": teacher,
            "questionText": "Drop me",
            "optionA": "a", "optionB": "b", "optionC": "c", "optionD": "d",
            "correctAnswer": "D",
            "marks": 3
        }),
    );
    let drop = added
        .get("question")
        .and_then(|q| q.get("id"))
        .and_then(|v| v.as_str())
        .expect("question id")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "quizzes.togglePublish",
        json!({ "quizId": quiz_id, "teacherId": teacher }),
    );

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "questions.delete",
        json!({ "questionId": drop, "teacherId": teacher }),
    );
    assert_eq!(deleted.get("quizTotalMarks").and_then(|v| v.as_i64()), Some(2));

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attempts.submit",
        json!({
            "quizId": quiz_id,
            "studentId": student,
            "answers": { keep.clone(): "B" }
        }),
    );
    assert_eq!(result.get("score").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(result.get("totalMarks").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(result.get("correctAnswers").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(result.get("totalQuestions").and_then(|v| v.as_i64()), Some(1));
    let pct = result.get("percentage").and_then(|v| v.as_f64()).expect("percentage");
    assert!((pct - 100.0).abs() < 1e-9, "expected 100%, got {}", pct);
}

#[test]
fn default_marks_is_one_and_label_is_normalized() {
    let workspace = temp_dir("quizd-question-defaults");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = register_user(&mut stdin, &mut reader, "2", "Pat Ahmed", "teacher");
    let quiz = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "quizzes.create",
        json!({ "teacherId": teacher, "title": "Defaults" }),
    );
    let quiz_id = quiz.get("id").and_then(|v| v.as_str()).expect("quiz id").to_string();

    let added = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "questions.add",
        json!({
            "quizId": quiz_id,
            "teacherId": teacher,
            "questionText": "No marks given",
            "optionA": "a", "optionB": "b", "optionC": "c", "optionD": "d",
            "correctAnswer": "c"
        }),
    );
    let question = added.get("question").expect("question");
    assert_eq!(question.get("marks").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        question.get("correctAnswer").and_then(|v| v.as_str()),
        Some("C")
    );
    assert_eq!(added.get("quizTotalMarks").and_then(|v| v.as_i64()), Some(1));
}

#[test]
fn invalid_label_or_marks_is_a_validation_error() {
    let workspace = temp_dir("quizd-question-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = register_user(&mut stdin, &mut reader, "2", "Pat Ahmed", "teacher");
    let quiz = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "quizzes.create",
        json!({ "teacherId": teacher, "title": "Validation" }),
    );
    let quiz_id = quiz.get("id").and_then(|v| v.as_str()).expect("quiz id").to_string();

    request_err(
        &mut stdin,
        &mut reader,
        "4",
        "questions.add",
        json!({
            "quizId": quiz_id,
            "teacherId": teacher,
            "questionText": "Bad label",
            "optionA": "a", "optionB": "b", "optionC": "c", "optionD": "d",
            "correctAnswer": "E"
        }),
        "validation",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "5",
        "questions.add",
        json!({
            "quizId": quiz_id,
            "teacherId": teacher,
            "questionText": "Missing label",
            "optionA": "a", "optionB": "b", "optionC": "c", "optionD": "d"
        }),
        "validation",
    );
    request_err(
        &mut stdin,
        &mut reader,
        "6",
        "questions.add",
        json!({
            "quizId": quiz_id,
            "teacherId": teacher,
            "questionText": "Zero marks",
            "optionA": "a", "optionB": "b", "optionC": "c", "optionD": "d",
            "correctAnswer": "A",
            "marks": 0
        }),
        "validation",
    );

    // None of the rejects may leak into the derived total.
    let full = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "quizzes.get",
        json!({ "quizId": quiz_id, "teacherId": teacher }),
    );
    assert_eq!(full.get("totalMarks").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(full.get("questionCount").and_then(|v| v.as_i64()), Some(0));
}
