use crate::exams::{build_report, ExamError, ExamRecord, Nets, Scores, NET_FIELDS, SCORE_FIELDS};
use crate::imports;
use crate::ipc::helpers::{
    db_conn, db_err, ensure_exists, new_id, now_ts, opt_f64, opt_str, required_str, respond,
    round2, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::timefmt::{iso, parse_date};
use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{json, Map, Value};

fn net_columns() -> String {
    NET_FIELDS
        .iter()
        .chain(SCORE_FIELDS.iter())
        .map(|(col, _)| *col)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reads `id, exam_name, exam_date` followed by the net and score columns.
fn record_from_row(r: &Row) -> rusqlite::Result<ExamRecord> {
    let mut nets = [0.0; 12];
    for (i, slot) in nets.iter_mut().enumerate() {
        *slot = r.get(3 + i)?;
    }
    let mut scores = [None; 4];
    for (i, slot) in scores.iter_mut().enumerate() {
        *slot = r.get(15 + i)?;
    }
    let raw_date: String = r.get(2)?;
    Ok(ExamRecord {
        id: r.get(0)?,
        exam_name: r.get(1)?,
        exam_date: parse_date(&raw_date).unwrap_or(NaiveDate::MIN),
        nets: Nets(nets),
        scores: Scores(scores),
    })
}

/// All results of a student, oldest first.
pub(crate) fn load_exam_records(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<ExamRecord>, HandlerErr> {
    let sql = format!(
        "SELECT id, exam_name, exam_date, {} FROM exam_results
         WHERE student_id = ? ORDER BY exam_date, created_at",
        net_columns()
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map([student_id], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

fn record_json(rec: &ExamRecord) -> Value {
    let mut m = Map::new();
    m.insert("id".into(), json!(rec.id));
    m.insert("examName".into(), json!(rec.exam_name));
    m.insert("examDate".into(), json!(iso(rec.exam_date)));
    for (i, (_, key)) in NET_FIELDS.iter().enumerate() {
        m.insert((*key).into(), json!(rec.nets.0[i]));
    }
    for (i, (_, key)) in SCORE_FIELDS.iter().enumerate() {
        m.insert((*key).into(), json!(rec.scores.0[i]));
    }
    m.insert("tytTotal".into(), json!(round2(rec.nets.tyt_total())));
    m.insert("aytTotal".into(), json!(round2(rec.nets.ayt_total())));
    Value::Object(m)
}

fn date_param(req: &Request, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = required_str(req, key)?;
    parse_date(&raw).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

fn exams_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let mut records = load_exam_records(conn, &student_id)?;
    records.reverse();
    Ok(json!({ "exams": records.iter().map(record_json).collect::<Vec<_>>() }))
}

fn insert_exam(
    conn: &Connection,
    student_id: &str,
    exam_name: &str,
    exam_date: NaiveDate,
    nets: &Nets,
    scores: &Scores,
) -> Result<String, HandlerErr> {
    let id = new_id();
    let cols = net_columns();
    let placeholders = vec!["?"; 4 + NET_FIELDS.len() + SCORE_FIELDS.len() + 1].join(", ");
    let sql = format!(
        "INSERT INTO exam_results(id, student_id, exam_name, exam_date, {}, created_at) VALUES({})",
        cols, placeholders
    );
    let mut values: Vec<SqlValue> = vec![
        SqlValue::Text(id.clone()),
        SqlValue::Text(student_id.to_string()),
        SqlValue::Text(exam_name.to_string()),
        SqlValue::Text(iso(exam_date)),
    ];
    values.extend(nets.0.iter().map(|n| SqlValue::Real(*n)));
    values.extend(
        scores
            .0
            .iter()
            .map(|s| s.map(SqlValue::Real).unwrap_or(SqlValue::Null)),
    );
    values.push(SqlValue::Text(now_ts()));
    conn.execute(&sql, params_from_iter(values))
        .map_err(db_err("db_insert_failed", "exam_results"))?;
    Ok(id)
}

fn nets_from_params(req: &Request, base: Nets) -> Result<Nets, HandlerErr> {
    let mut nets = base;
    for (i, (_, key)) in NET_FIELDS.iter().enumerate() {
        if let Some(v) = opt_f64(req, key)? {
            nets.0[i] = v;
        }
    }
    Ok(nets)
}

fn scores_from_params(req: &Request, base: Scores) -> Result<Scores, HandlerErr> {
    let mut scores = base;
    for (i, (_, key)) in SCORE_FIELDS.iter().enumerate() {
        if req.params.get(*key).is_some() {
            scores.0[i] = opt_f64(req, key)?;
        }
    }
    Ok(scores)
}

fn exams_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let exam_name = required_str(req, "examName")?;
    let exam_date = date_param(req, "examDate")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let nets = nets_from_params(req, Nets::default())?;
    let scores = scores_from_params(req, Scores::default())?;
    let id = insert_exam(conn, &student_id, &exam_name, exam_date, &nets, &scores)?;
    tracing::info!(exam_id = %id, %student_id, "exam result recorded");
    Ok(json!({ "examId": id, "tytTotal": round2(nets.tyt_total()), "aytTotal": round2(nets.ayt_total()) }))
}

fn exams_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let exam_id = required_str(req, "examId")?;
    let sql = format!(
        "SELECT id, exam_name, exam_date, {} FROM exam_results WHERE id = ?",
        net_columns()
    );
    let current = conn
        .query_row(&sql, [&exam_id], record_from_row)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("exam result not found"))?;

    let exam_name = opt_str(req, "examName")?.unwrap_or(current.exam_name);
    let exam_date = match opt_str(req, "examDate")? {
        Some(_) => date_param(req, "examDate")?,
        None => current.exam_date,
    };
    let nets = nets_from_params(req, current.nets)?;
    let scores = scores_from_params(req, current.scores)?;

    let assignments: Vec<String> = NET_FIELDS
        .iter()
        .chain(SCORE_FIELDS.iter())
        .map(|(col, _)| format!("{} = ?", col))
        .collect();
    let sql = format!(
        "UPDATE exam_results SET exam_name = ?, exam_date = ?, {} WHERE id = ?",
        assignments.join(", ")
    );
    let mut values: Vec<SqlValue> = vec![SqlValue::Text(exam_name), SqlValue::Text(iso(exam_date))];
    values.extend(nets.0.iter().map(|n| SqlValue::Real(*n)));
    values.extend(
        scores
            .0
            .iter()
            .map(|s| s.map(SqlValue::Real).unwrap_or(SqlValue::Null)),
    );
    values.push(SqlValue::Text(exam_id));
    conn.execute(&sql, params_from_iter(values))
        .map_err(db_err("db_update_failed", "exam_results"))?;
    Ok(json!({ "ok": true }))
}

fn exams_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let exam_id = required_str(req, "examId")?;
    let n = conn
        .execute("DELETE FROM exam_results WHERE id = ?", [&exam_id])
        .map_err(db_err("db_delete_failed", "exam_results"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("exam result not found"));
    }
    Ok(json!({ "ok": true }))
}

fn exams_report(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let records = load_exam_records(conn, &student_id)?;
    let report = build_report(&records).map_err(|e| match e {
        ExamError::NoResults => HandlerErr::not_found("no exam results for student"),
    })?;
    serde_json::to_value(&report).map_err(|e| HandlerErr::new("io_failed", e.to_string()))
}

fn exams_import_csv(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let csv_text = required_str(req, "csvText")?;
    let rows = imports::read_table(&csv_text, &["studentNumber", "examName", "examDate"])
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "exam_results"))?;
    let mut imported = 0usize;
    let mut errors: Vec<String> = Vec::new();
    for row in &rows {
        let parsed = (|| -> Result<(String, String, NaiveDate, Nets, Scores), String> {
            let number = row.required("studentNumber")?.to_string();
            let name = row.required("examName")?.to_string();
            let raw_date = row.required("examDate")?;
            let date = parse_date(raw_date).map_err(|e| format!("row {}: {}", row.row_no, e))?;
            let mut nets = Nets::default();
            for (i, (_, key)) in NET_FIELDS.iter().enumerate() {
                nets.0[i] = row.f64(key)?.unwrap_or(0.0);
            }
            let mut scores = Scores::default();
            for (i, (_, key)) in SCORE_FIELDS.iter().enumerate() {
                scores.0[i] = row.f64(key)?;
            }
            Ok((number, name, date, nets, scores))
        })();
        let (number, name, date, nets, scores) = match parsed {
            Ok(v) => v,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        let student_id: Option<String> = tx
            .query_row("SELECT id FROM students WHERE number = ?", [&number], |r| {
                r.get(0)
            })
            .optional()?;
        let Some(student_id) = student_id else {
            errors.push(format!("row {}: unknown student number {}", row.row_no, number));
            continue;
        };
        insert_exam(&tx, &student_id, &name, date, &nets, &scores)?;
        imported += 1;
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "exam_results"))?;

    tracing::info!(imported, errors = errors.len(), "exam csv imported");
    Ok(json!({ "imported": imported, "errors": errors }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "exams.list" => exams_list(state, req),
        "exams.create" => exams_create(state, req),
        "exams.update" => exams_update(state, req),
        "exams.delete" => exams_delete(state, req),
        "exams.report" => exams_report(state, req),
        "exams.importCsv" => exams_import_csv(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
