use crate::imports;
use crate::ipc::handlers::tracking::overall_progress;
use crate::ipc::helpers::{
    db_conn, db_err, ensure_exists, new_id, now_ts, opt_i64, opt_str, required_str, respond,
    round2, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};

pub(crate) const STUDENT_COLS: &str =
    "id, number, first_name, last_name, class_name, gender, phone, email, created_at";

pub(crate) fn student_json(r: &Row) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "number": r.get::<_, String>(1)?,
        "firstName": r.get::<_, String>(2)?,
        "lastName": r.get::<_, String>(3)?,
        "className": r.get::<_, String>(4)?,
        "gender": r.get::<_, String>(5)?,
        "phone": r.get::<_, Option<String>>(6)?,
        "email": r.get::<_, Option<String>>(7)?,
        "createdAt": r.get::<_, String>(8)?,
    }))
}

fn load_student(conn: &Connection, student_id: &str) -> Result<Value, HandlerErr> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLS);
    conn.query_row(&sql, [student_id], student_json)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("student not found"))
}

fn number_taken(conn: &Connection, number: &str, except_id: Option<&str>) -> Result<bool, HandlerErr> {
    let found: Option<String> = conn
        .query_row("SELECT id FROM students WHERE number = ?", [number], |r| r.get(0))
        .optional()?;
    Ok(match (found, except_id) {
        (Some(id), Some(except)) => id != except,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

fn students_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let search = opt_str(req, "search")?.map(|s| s.to_lowercase());
    let sort_col = match opt_str(req, "sortBy")?.as_deref() {
        None | Some("number") => "number",
        Some("firstName") => "first_name",
        Some("lastName") => "last_name",
        Some("className") => "class_name",
        Some(other) => return Err(HandlerErr::bad_params(format!("unknown sortBy: {}", other))),
    };
    let order = match opt_str(req, "sortOrder")?.as_deref() {
        None | Some("asc") => "ASC",
        Some("desc") => "DESC",
        Some(other) => {
            return Err(HandlerErr::bad_params(format!("unknown sortOrder: {}", other)))
        }
    };

    let sql = format!(
        "SELECT {} FROM students ORDER BY {} {}, number ASC",
        STUDENT_COLS, sort_col, order
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], student_json)?
        .collect::<Result<Vec<_>, _>>()?;

    let students: Vec<Value> = match search {
        None => rows,
        Some(needle) => rows
            .into_iter()
            .filter(|s| {
                ["number", "firstName", "lastName"].iter().any(|k| {
                    s[*k]
                        .as_str()
                        .map(|v| v.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
            })
            .collect(),
    };
    Ok(json!({ "students": students }))
}

fn students_get(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    Ok(json!({ "student": load_student(conn, &student_id)? }))
}

fn students_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let number = required_str(req, "number")?;
    let first_name = required_str(req, "firstName")?;
    let last_name = required_str(req, "lastName")?;
    let class_name = required_str(req, "className")?;
    let gender = required_str(req, "gender")?;
    let phone = opt_str(req, "phone")?;
    let email = opt_str(req, "email")?;

    if number_taken(conn, &number, None)? {
        return Err(HandlerErr::conflict(format!(
            "student number {} already exists",
            number
        )));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO students(id, number, first_name, last_name, class_name, gender, phone, email, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id, &number, &first_name, &last_name, &class_name, &gender, &phone, &email,
            now_ts(),
        ),
    )
    .map_err(db_err("db_insert_failed", "students"))?;
    tracing::info!(student_id = %id, %number, "student created");
    Ok(json!({ "studentId": id }))
}

fn students_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let current = load_student(conn, &student_id)?;
    let field = |key: &str| -> Result<String, HandlerErr> {
        Ok(opt_str(req, key)?
            .or_else(|| current[key].as_str().map(str::to_string))
            .unwrap_or_default())
    };
    let number = field("number")?;
    let first_name = field("firstName")?;
    let last_name = field("lastName")?;
    let class_name = field("className")?;
    let gender = field("gender")?;
    // Optional contact fields are cleared by an explicit null.
    let contact = |key: &str| -> Result<Option<String>, HandlerErr> {
        if req.params.get(key).is_some() {
            opt_str(req, key)
        } else {
            Ok(current[key].as_str().map(str::to_string))
        }
    };
    let phone = contact("phone")?;
    let email = contact("email")?;

    if number_taken(conn, &number, Some(&student_id))? {
        return Err(HandlerErr::conflict(format!(
            "student number {} already exists",
            number
        )));
    }

    conn.execute(
        "UPDATE students SET number = ?, first_name = ?, last_name = ?, class_name = ?, gender = ?,
         phone = ?, email = ? WHERE id = ?",
        (
            &number, &first_name, &last_name, &class_name, &gender, &phone, &email, &student_id,
        ),
    )
    .map_err(db_err("db_update_failed", "students"))?;
    Ok(json!({ "ok": true }))
}

fn students_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    conn.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(db_err("db_delete_failed", "students"))?;
    tracing::info!(%student_id, "student deleted");
    Ok(json!({ "ok": true }))
}

fn students_import_csv(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let csv_text = required_str(req, "csvText")?;
    let rows = imports::read_table(
        &csv_text,
        &["number", "firstName", "lastName", "className", "gender"],
    )
    .map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "students"))?;
    let mut imported = 0usize;
    let mut errors: Vec<String> = Vec::new();
    for row in &rows {
        let fields = (|| -> Result<[String; 5], String> {
            Ok([
                row.required("number")?.to_string(),
                row.required("firstName")?.to_string(),
                row.required("lastName")?.to_string(),
                row.required("className")?.to_string(),
                row.required("gender")?.to_string(),
            ])
        })();
        let [number, first_name, last_name, class_name, gender] = match fields {
            Ok(f) => f,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        if number_taken(&tx, &number, None)? {
            errors.push(format!(
                "row {}: student number {} already exists",
                row.row_no, number
            ));
            continue;
        }
        tx.execute(
            "INSERT INTO students(id, number, first_name, last_name, class_name, gender, phone, email, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                new_id(),
                &number,
                &first_name,
                &last_name,
                &class_name,
                &gender,
                row.get("phone"),
                row.get("email"),
                now_ts(),
            ),
        )
        .map_err(db_err("db_insert_failed", "students"))?;
        imported += 1;
    }
    tx.commit().map_err(db_err("db_commit_failed", "students"))?;

    tracing::info!(imported, errors = errors.len(), "student csv imported");
    Ok(json!({ "imported": imported, "errors": errors }))
}

fn students_progress(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;

    let mut stmt = conn.prepare(
        "SELECT lp.lesson_id, l.name, lp.completed_topics, lp.total_topics, lp.percent,
                lp.estimated_end_date, lp.updated_at
         FROM lesson_progress lp JOIN lessons l ON l.id = lp.lesson_id
         WHERE lp.student_id = ?
         ORDER BY l.name",
    )?;
    let lessons = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "lessonId": r.get::<_, String>(0)?,
                "lessonName": r.get::<_, String>(1)?,
                "completedTopics": r.get::<_, i64>(2)?,
                "totalTopics": r.get::<_, i64>(3)?,
                "percent": round2(r.get::<_, f64>(4)?),
                "estimatedEndDate": r.get::<_, Option<String>>(5)?,
                "updatedAt": r.get::<_, String>(6)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let target_date = lessons
        .iter()
        .filter_map(|l| l["estimatedEndDate"].as_str())
        .max()
        .map(str::to_string);

    Ok(json!({
        "lessons": lessons,
        "overallProgress": round2(overall_progress(conn, &student_id)?),
        "targetDate": target_date,
    }))
}

fn students_at_risk(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let limit = opt_i64(req, "limit")?.unwrap_or(10);
    if limit <= 0 {
        return Err(HandlerErr::bad_params("limit must be positive"));
    }
    let threshold = state.config.risk.progress_threshold;

    let mut stmt = conn.prepare(
        "SELECT s.id, s.number, s.first_name, s.last_name, s.class_name,
                COALESCE(AVG(lp.percent), 0) AS progress
         FROM students s LEFT JOIN lesson_progress lp ON lp.student_id = s.id
         GROUP BY s.id
         HAVING progress < ?
         ORDER BY progress ASC, s.number ASC
         LIMIT ?",
    )?;
    let students = stmt
        .query_map((threshold, limit), |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "number": r.get::<_, String>(1)?,
                "firstName": r.get::<_, String>(2)?,
                "lastName": r.get::<_, String>(3)?,
                "className": r.get::<_, String>(4)?,
                "progress": round2(r.get::<_, f64>(5)?),
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "threshold": threshold, "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, req),
        "students.get" => students_get(state, req),
        "students.create" => students_create(state, req),
        "students.update" => students_update(state, req),
        "students.delete" => students_delete(state, req),
        "students.importCsv" => students_import_csv(state, req),
        "students.progress" => students_progress(state, req),
        "students.atRisk" => students_at_risk(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
