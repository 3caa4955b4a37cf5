use crate::imports;
use crate::ipc::helpers::{
    db_conn, db_err, ensure_exists, new_id, now_ts, opt_i64, opt_str, parse_bool, required_str,
    respond, string_array, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::surveys::{completion_rate, parse_options, parse_response_sheet};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

/// Survey types and answer types share one shape: a unique name plus a description.
#[derive(Clone, Copy)]
enum Lookup {
    SurveyType,
    AnswerType,
}

impl Lookup {
    fn table(self) -> &'static str {
        match self {
            Self::SurveyType => "survey_types",
            Self::AnswerType => "answer_types",
        }
    }

    fn what(self) -> &'static str {
        match self {
            Self::SurveyType => "survey type",
            Self::AnswerType => "answer type",
        }
    }

    fn usage_sql(self) -> &'static str {
        match self {
            Self::SurveyType => "SELECT COUNT(*) FROM surveys WHERE type_id = ?",
            Self::AnswerType => "SELECT COUNT(*) FROM survey_questions WHERE answer_type_id = ?",
        }
    }
}

fn lookup_list(state: &AppState, kind: Lookup) -> HandlerResult {
    let conn = db_conn(state)?;
    let sql = format!(
        "SELECT id, name, description FROM {} ORDER BY name",
        kind.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "items": items }))
}

fn lookup_create(state: &AppState, req: &Request, kind: Lookup) -> HandlerResult {
    let conn = db_conn(state)?;
    let name = required_str(req, "name")?;
    let description = opt_str(req, "description")?.unwrap_or_default();
    let id = new_id();
    let sql = format!(
        "INSERT INTO {}(id, name, description) VALUES(?, ?, ?)",
        kind.table()
    );
    conn.execute(&sql, (&id, &name, &description))
        .map_err(db_err("db_insert_failed", kind.table()))
        .map_err(|e| {
            if e.code == "conflict" {
                HandlerErr::conflict(format!("{} {} already exists", kind.what(), name))
            } else {
                e
            }
        })?;
    Ok(json!({ "id": id }))
}

fn lookup_delete(state: &AppState, req: &Request, kind: Lookup) -> HandlerResult {
    let conn = db_conn(state)?;
    let id = required_str(req, "id")?;
    ensure_exists(conn, kind.table(), &id, kind.what())?;
    let in_use: i64 = conn.query_row(kind.usage_sql(), [&id], |r| r.get(0))?;
    if in_use > 0 {
        return Err(HandlerErr::conflict(format!("{} is in use", kind.what()))
            .with_details(json!({ "usedBy": in_use })));
    }
    let sql = format!("DELETE FROM {} WHERE id = ?", kind.table());
    conn.execute(&sql, [&id])
        .map_err(db_err("db_delete_failed", kind.table()))?;
    Ok(json!({ "ok": true }))
}

fn survey_row_json(r: &rusqlite::Row) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "typeId": r.get::<_, String>(1)?,
        "typeName": r.get::<_, String>(2)?,
        "title": r.get::<_, String>(3)?,
        "description": r.get::<_, String>(4)?,
        "active": r.get::<_, i64>(5)? != 0,
        "createdAt": r.get::<_, String>(6)?,
        "updatedAt": r.get::<_, String>(7)?,
        "questionCount": r.get::<_, i64>(8)?,
    }))
}

const SURVEY_SELECT: &str = "SELECT s.id, s.type_id, st.name, s.title, s.description, s.active,
        s.created_at, s.updated_at,
        (SELECT COUNT(*) FROM survey_questions q WHERE q.survey_id = s.id)
     FROM surveys s JOIN survey_types st ON st.id = s.type_id";

fn surveys_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let active_only = parse_bool(req, "activeOnly", false)?;
    let sql = format!(
        "{} WHERE (?1 = 0 OR s.active = 1) ORDER BY s.created_at DESC, s.title",
        SURVEY_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let surveys = stmt
        .query_map([active_only as i64], survey_row_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "surveys": surveys }))
}

struct Question {
    id: String,
    answer_type_id: String,
    text: String,
    sort_order: i64,
    options: Value,
    required: bool,
    reverse_scored: bool,
}

fn load_questions(conn: &Connection, survey_id: &str) -> Result<Vec<Question>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, answer_type_id, text, sort_order, options_json, required, reverse_scored
         FROM survey_questions WHERE survey_id = ? ORDER BY sort_order, id",
    )?;
    let rows = stmt
        .query_map([survey_id], |r| {
            let options_json: String = r.get(4)?;
            Ok(Question {
                id: r.get(0)?,
                answer_type_id: r.get(1)?,
                text: r.get(2)?,
                sort_order: r.get(3)?,
                options: serde_json::from_str(&options_json).unwrap_or_else(|_| json!([])),
                required: r.get::<_, i64>(5)? != 0,
                reverse_scored: r.get::<_, i64>(6)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn surveys_get(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let survey_id = required_str(req, "surveyId")?;
    let sql = format!("{} WHERE s.id = ?", SURVEY_SELECT);
    let survey = conn
        .query_row(&sql, [&survey_id], survey_row_json)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("survey not found"))?;
    let questions: Vec<Value> = load_questions(conn, &survey_id)?
        .into_iter()
        .map(|q| {
            json!({
                "id": q.id,
                "answerTypeId": q.answer_type_id,
                "text": q.text,
                "sortOrder": q.sort_order,
                "options": q.options,
                "required": q.required,
                "reverseScored": q.reverse_scored,
            })
        })
        .collect();
    Ok(json!({ "survey": survey, "questions": questions }))
}

fn surveys_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let type_id = required_str(req, "typeId")?;
    let title = required_str(req, "title")?;
    let description = opt_str(req, "description")?.unwrap_or_default();
    let active = parse_bool(req, "active", true)?;
    ensure_exists(conn, "survey_types", &type_id, "survey type")?;
    let id = new_id();
    let ts = now_ts();
    conn.execute(
        "INSERT INTO surveys(id, type_id, title, description, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&id, &type_id, &title, &description, active as i64, &ts, &ts),
    )
    .map_err(db_err("db_insert_failed", "surveys"))?;
    tracing::info!(survey_id = %id, %title, "survey created");
    Ok(json!({ "surveyId": id }))
}

fn surveys_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let survey_id = required_str(req, "surveyId")?;
    let (type_id, title, description, active): (String, String, String, i64) = conn
        .query_row(
            "SELECT type_id, title, description, active FROM surveys WHERE id = ?",
            [&survey_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("survey not found"))?;
    let type_id = opt_str(req, "typeId")?.unwrap_or(type_id);
    ensure_exists(conn, "survey_types", &type_id, "survey type")?;
    let title = opt_str(req, "title")?.unwrap_or(title);
    let description = if req.params.get("description").is_some() {
        opt_str(req, "description")?.unwrap_or_default()
    } else {
        description
    };
    let active = parse_bool(req, "active", active != 0)?;
    conn.execute(
        "UPDATE surveys SET type_id = ?, title = ?, description = ?, active = ?, updated_at = ?
         WHERE id = ?",
        (
            &type_id,
            &title,
            &description,
            active as i64,
            now_ts(),
            &survey_id,
        ),
    )
    .map_err(db_err("db_update_failed", "surveys"))?;
    Ok(json!({ "ok": true }))
}

fn surveys_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let survey_id = required_str(req, "surveyId")?;
    ensure_exists(conn, "surveys", &survey_id, "survey")?;
    conn.execute("DELETE FROM surveys WHERE id = ?", [&survey_id])
        .map_err(db_err("db_delete_failed", "surveys"))?;
    tracing::info!(%survey_id, "survey deleted");
    Ok(json!({ "ok": true }))
}

fn options_param(req: &Request) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = req.params.get("options") else {
        return Ok(None);
    };
    let options =
        parse_options(Some(raw)).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    serde_json::to_string(&options)
        .map(Some)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))
}

fn questions_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let survey_id = required_str(req, "surveyId")?;
    let answer_type_id = required_str(req, "answerTypeId")?;
    let text = required_str(req, "text")?;
    ensure_exists(conn, "surveys", &survey_id, "survey")?;
    ensure_exists(conn, "answer_types", &answer_type_id, "answer type")?;
    let sort_order = match opt_i64(req, "sortOrder")? {
        Some(o) => o,
        None => {
            let max: Option<i64> = conn.query_row(
                "SELECT MAX(sort_order) FROM survey_questions WHERE survey_id = ?",
                [&survey_id],
                |r| r.get(0),
            )?;
            max.map_or(1, |m| m + 1)
        }
    };
    let options = options_param(req)?.unwrap_or_else(|| "[]".to_string());
    let required = parse_bool(req, "required", true)?;
    let reverse_scored = parse_bool(req, "reverseScored", false)?;

    let id = new_id();
    conn.execute(
        "INSERT INTO survey_questions(id, survey_id, answer_type_id, text, sort_order, options_json,
                                      required, reverse_scored)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &survey_id,
            &answer_type_id,
            &text,
            sort_order,
            &options,
            required as i64,
            reverse_scored as i64,
        ),
    )
    .map_err(db_err("db_insert_failed", "survey_questions"))?;
    Ok(json!({ "questionId": id, "sortOrder": sort_order }))
}

fn questions_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let question_id = required_str(req, "questionId")?;
    let current = conn
        .query_row(
            "SELECT answer_type_id, text, sort_order, options_json, required, reverse_scored
             FROM survey_questions WHERE id = ?",
            [&question_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)? != 0,
                    r.get::<_, i64>(5)? != 0,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("question not found"))?;
    let (answer_type_id, text, sort_order, options, required, reverse_scored) = current;

    let answer_type_id = opt_str(req, "answerTypeId")?.unwrap_or(answer_type_id);
    ensure_exists(conn, "answer_types", &answer_type_id, "answer type")?;
    let text = opt_str(req, "text")?.unwrap_or(text);
    let sort_order = opt_i64(req, "sortOrder")?.unwrap_or(sort_order);
    let options = options_param(req)?.unwrap_or(options);
    let required = parse_bool(req, "required", required)?;
    let reverse_scored = parse_bool(req, "reverseScored", reverse_scored)?;

    conn.execute(
        "UPDATE survey_questions SET answer_type_id = ?, text = ?, sort_order = ?, options_json = ?,
                required = ?, reverse_scored = ?
         WHERE id = ?",
        (
            &answer_type_id,
            &text,
            sort_order,
            &options,
            required as i64,
            reverse_scored as i64,
            &question_id,
        ),
    )
    .map_err(db_err("db_update_failed", "survey_questions"))?;
    Ok(json!({ "ok": true }))
}

fn questions_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let question_id = required_str(req, "questionId")?;
    let n = conn
        .execute("DELETE FROM survey_questions WHERE id = ?", [&question_id])
        .map_err(db_err("db_delete_failed", "survey_questions"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("question not found"));
    }
    Ok(json!({ "ok": true }))
}

fn ensure_active(conn: &Connection, survey_id: &str) -> Result<(), HandlerErr> {
    let active: i64 = conn
        .query_row("SELECT active FROM surveys WHERE id = ?", [survey_id], |r| {
            r.get(0)
        })
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("survey not found"))?;
    if active == 0 {
        return Err(HandlerErr::bad_params("survey is not active"));
    }
    Ok(())
}

fn surveys_assign(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let survey_id = required_str(req, "surveyId")?;
    let student_ids = string_array(req, "studentIds")?;
    if student_ids.is_empty() {
        return Err(HandlerErr::bad_params("studentIds must not be empty"));
    }
    ensure_active(conn, &survey_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "survey_assignments"))?;
    let mut added = 0usize;
    let mut already = 0usize;
    let mut skipped = 0usize;
    for student_id in &student_ids {
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get(0)
            })
            .optional()?;
        if exists.is_none() {
            skipped += 1;
            continue;
        }
        let n = tx
            .execute(
                "INSERT OR IGNORE INTO survey_assignments(id, survey_id, student_id, assigned_at)
                 VALUES(?, ?, ?, ?)",
                (new_id(), &survey_id, student_id, now_ts()),
            )
            .map_err(db_err("db_insert_failed", "survey_assignments"))?;
        if n == 0 {
            already += 1;
        } else {
            added += 1;
        }
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "survey_assignments"))?;
    Ok(json!({ "added": added, "alreadyAssigned": already, "unknownStudents": skipped }))
}

fn surveys_import_responses(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let survey_id = required_str(req, "surveyId")?;
    let csv_text = required_str(req, "csvText")?;
    let class_name = opt_str(req, "className")?;
    ensure_exists(conn, "surveys", &survey_id, "survey")?;

    let questions = load_questions(conn, &survey_id)?;
    if questions.is_empty() {
        return Err(HandlerErr::bad_params("survey has no questions"));
    }
    let records =
        imports::read_records(&csv_text).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let sheet = parse_response_sheet(&records, questions.len())
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "survey_answers"))?;
    let mut succeeded = 0usize;
    let mut not_found = 0usize;
    for row in &sheet.rows {
        let student_id: Option<String> = tx
            .query_row(
                "SELECT id FROM students WHERE number = ?",
                [&row.student_number],
                |r| r.get(0),
            )
            .optional()?;
        let Some(student_id) = student_id else {
            not_found += 1;
            continue;
        };

        let ts = now_ts();
        tx.execute(
            "INSERT OR IGNORE INTO survey_assignments(id, survey_id, student_id, assigned_at)
             VALUES(?, ?, ?, ?)",
            (new_id(), &survey_id, &student_id, &ts),
        )
        .map_err(db_err("db_insert_failed", "survey_assignments"))?;
        let assignment_id: String = tx.query_row(
            "SELECT id FROM survey_assignments WHERE survey_id = ? AND student_id = ?",
            [&survey_id, &student_id],
            |r| r.get(0),
        )?;

        for (question, answer) in questions.iter().zip(&row.answers) {
            let Some(answer) = answer else {
                continue;
            };
            tx.execute(
                "INSERT INTO survey_answers(id, assignment_id, question_id, answer)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(assignment_id, question_id) DO UPDATE SET answer = excluded.answer",
                (new_id(), &assignment_id, &question.id, answer),
            )
            .map_err(db_err("db_insert_failed", "survey_answers"))?;
        }
        tx.execute(
            "UPDATE survey_assignments SET completed = 1, completed_at = ? WHERE id = ?",
            (&ts, &assignment_id),
        )
        .map_err(db_err("db_update_failed", "survey_assignments"))?;
        succeeded += 1;
    }

    if let (Some(class_name), true) = (class_name.as_deref(), succeeded > 0) {
        tx.execute(
            "INSERT INTO survey_class_results(id, survey_id, class_name, respondent_count, updated_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(survey_id, class_name) DO UPDATE SET
                respondent_count = respondent_count + excluded.respondent_count,
                updated_at = excluded.updated_at",
            (new_id(), &survey_id, class_name, succeeded as i64, now_ts()),
        )
        .map_err(db_err("db_update_failed", "survey_class_results"))?;
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "survey_answers"))?;

    tracing::info!(
        %survey_id,
        succeeded,
        failed = sheet.malformed,
        not_found,
        "survey responses imported"
    );
    Ok(json!({
        "succeeded": succeeded,
        "failed": sheet.malformed,
        "notFound": not_found,
    }))
}

fn surveys_results(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let survey_id = required_str(req, "surveyId")?;
    ensure_exists(conn, "surveys", &survey_id, "survey")?;
    let (assigned, completed): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(completed), 0) FROM survey_assignments WHERE survey_id = ?",
        [&survey_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT class_name, respondent_count, updated_at FROM survey_class_results
         WHERE survey_id = ? ORDER BY class_name",
    )?;
    let classes = stmt
        .query_map([&survey_id], |r| {
            Ok(json!({
                "className": r.get::<_, String>(0)?,
                "respondentCount": r.get::<_, i64>(1)?,
                "updatedAt": r.get::<_, String>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "assigned": assigned,
        "completed": completed,
        "completionRate": completion_rate(assigned, completed),
        "classResults": classes,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "surveys.types.list" => lookup_list(state, Lookup::SurveyType),
        "surveys.types.create" => lookup_create(state, req, Lookup::SurveyType),
        "surveys.types.delete" => lookup_delete(state, req, Lookup::SurveyType),
        "surveys.answerTypes.list" => lookup_list(state, Lookup::AnswerType),
        "surveys.answerTypes.create" => lookup_create(state, req, Lookup::AnswerType),
        "surveys.answerTypes.delete" => lookup_delete(state, req, Lookup::AnswerType),
        "surveys.list" => surveys_list(state, req),
        "surveys.get" => surveys_get(state, req),
        "surveys.create" => surveys_create(state, req),
        "surveys.update" => surveys_update(state, req),
        "surveys.delete" => surveys_delete(state, req),
        "surveys.questions.create" => questions_create(state, req),
        "surveys.questions.update" => questions_update(state, req),
        "surveys.questions.delete" => questions_delete(state, req),
        "surveys.assign" => surveys_assign(state, req),
        "surveys.importResponses" => surveys_import_responses(state, req),
        "surveys.results" => surveys_results(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
