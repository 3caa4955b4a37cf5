use crate::imports;
use crate::ipc::handlers::tracking::recompute_lesson_progress;
use crate::ipc::helpers::{
    db_conn, db_err, ensure_exists, new_id, now_ts, opt_i64, opt_str, required_str, respond,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

/// Splits `"Name - 45"` into name and minutes. Lines without a trailing
/// positive number keep the whole text as the name.
fn parse_topic_line(line: &str, default_minutes: i64) -> Option<(String, i64)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some((name, minutes)) = line.rsplit_once('-') {
        let name = name.trim();
        if let Ok(m) = minutes.trim().parse::<i64>() {
            if m > 0 && !name.is_empty() {
                return Some((name.to_string(), m));
            }
        }
    }
    Some((line.to_string(), default_minutes))
}

fn next_sort_order(conn: &Connection, lesson_id: &str) -> Result<i64, HandlerErr> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(sort_order) FROM topics WHERE lesson_id = ?",
        [lesson_id],
        |r| r.get(0),
    )?;
    Ok(max.map_or(1, |m| m + 1))
}

/// Totals changed, so tracked students get their lesson progress recomputed.
fn refresh_lesson(conn: &Connection, lesson_id: &str) -> Result<(), HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT student_id FROM lesson_progress WHERE lesson_id = ?
         UNION
         SELECT DISTINCT tt.student_id FROM topic_tracking tt
         JOIN topics t ON t.id = tt.topic_id WHERE t.lesson_id = ?",
    )?;
    let students = stmt
        .query_map([lesson_id, lesson_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for student_id in students {
        recompute_lesson_progress(conn, &student_id, lesson_id)?;
    }
    Ok(())
}

fn minutes_param(req: &Request, key: &str) -> Result<Option<i64>, HandlerErr> {
    match opt_i64(req, key)? {
        Some(m) if m <= 0 => Err(HandlerErr::bad_params(format!(
            "{} must be greater than 0",
            key
        ))),
        other => Ok(other),
    }
}

fn lesson_id_by_name(conn: &Connection, name: &str) -> Result<Option<String>, HandlerErr> {
    Ok(conn
        .query_row("SELECT id FROM lessons WHERE name = ?", [name], |r| r.get(0))
        .optional()?)
}

fn insert_lesson(conn: &Connection, name: &str, description: &str) -> Result<String, HandlerErr> {
    let id = new_id();
    conn.execute(
        "INSERT INTO lessons(id, name, description, created_at) VALUES(?, ?, ?, ?)",
        (&id, name, description, now_ts()),
    )
    .map_err(db_err("db_insert_failed", "lessons"))?;
    Ok(id)
}

fn insert_topic(
    conn: &Connection,
    lesson_id: &str,
    name: &str,
    minutes: i64,
    sort_order: i64,
) -> Result<String, HandlerErr> {
    let id = new_id();
    conn.execute(
        "INSERT INTO topics(id, lesson_id, name, estimated_minutes, sort_order) VALUES(?, ?, ?, ?, ?)",
        (&id, lesson_id, name, minutes, sort_order),
    )
    .map_err(db_err("db_insert_failed", "topics"))?;
    Ok(id)
}

fn topic_json(r: &rusqlite::Row) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "lessonId": r.get::<_, String>(1)?,
        "name": r.get::<_, String>(2)?,
        "estimatedMinutes": r.get::<_, i64>(3)?,
        "sortOrder": r.get::<_, i64>(4)?,
    }))
}

fn topics_of(conn: &Connection, lesson_id: &str) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, lesson_id, name, estimated_minutes, sort_order
         FROM topics WHERE lesson_id = ? ORDER BY sort_order, name",
    )?;
    let topics = stmt
        .query_map([lesson_id], topic_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(topics)
}

fn lessons_list(state: &AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let mut stmt = conn.prepare(
        "SELECT l.id, l.name, l.description, l.created_at,
                COUNT(t.id), COALESCE(SUM(t.estimated_minutes), 0)
         FROM lessons l LEFT JOIN topics t ON t.lesson_id = l.id
         GROUP BY l.id
         ORDER BY l.name",
    )?;
    let lessons = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "description": r.get::<_, String>(2)?,
                "createdAt": r.get::<_, String>(3)?,
                "topicCount": r.get::<_, i64>(4)?,
                "totalMinutes": r.get::<_, i64>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "lessons": lessons }))
}

fn lessons_get(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    let lesson = conn
        .query_row(
            "SELECT id, name, description, created_at FROM lessons WHERE id = ?",
            [&lesson_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "description": r.get::<_, String>(2)?,
                    "createdAt": r.get::<_, String>(3)?,
                }))
            },
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("lesson not found"))?;
    Ok(json!({ "lesson": lesson, "topics": topics_of(conn, &lesson_id)? }))
}

fn lessons_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let name = required_str(req, "name")?;
    let description = opt_str(req, "description")?.unwrap_or_default();
    if lesson_id_by_name(conn, &name)?.is_some() {
        return Err(HandlerErr::conflict(format!("lesson {} already exists", name)));
    }
    let id = insert_lesson(conn, &name, &description)?;
    tracing::info!(lesson_id = %id, %name, "lesson created");
    Ok(json!({ "lessonId": id }))
}

fn lessons_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    ensure_exists(conn, "lessons", &lesson_id, "lesson")?;
    if let Some(name) = opt_str(req, "name")? {
        if matches!(lesson_id_by_name(conn, &name)?, Some(other) if other != lesson_id) {
            return Err(HandlerErr::conflict(format!("lesson {} already exists", name)));
        }
        conn.execute("UPDATE lessons SET name = ? WHERE id = ?", (&name, &lesson_id))
            .map_err(db_err("db_update_failed", "lessons"))?;
    }
    if req.params.get("description").is_some() {
        let description = opt_str(req, "description")?.unwrap_or_default();
        conn.execute(
            "UPDATE lessons SET description = ? WHERE id = ?",
            (&description, &lesson_id),
        )
        .map_err(db_err("db_update_failed", "lessons"))?;
    }
    Ok(json!({ "ok": true }))
}

fn lessons_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    ensure_exists(conn, "lessons", &lesson_id, "lesson")?;
    conn.execute("DELETE FROM lessons WHERE id = ?", [&lesson_id])
        .map_err(db_err("db_delete_failed", "lessons"))?;
    tracing::info!(%lesson_id, "lesson deleted");
    Ok(json!({ "ok": true }))
}

fn topics_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    ensure_exists(conn, "lessons", &lesson_id, "lesson")?;
    Ok(json!({ "topics": topics_of(conn, &lesson_id)? }))
}

fn topics_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    let name = required_str(req, "name")?;
    ensure_exists(conn, "lessons", &lesson_id, "lesson")?;
    let minutes = minutes_param(req, "estimatedMinutes")?
        .unwrap_or(state.config.schedule.default_topic_minutes);
    let sort_order = match opt_i64(req, "sortOrder")? {
        Some(o) => o,
        None => next_sort_order(conn, &lesson_id)?,
    };
    let id = insert_topic(conn, &lesson_id, &name, minutes, sort_order)?;
    refresh_lesson(conn, &lesson_id)?;
    Ok(json!({ "topicId": id, "sortOrder": sort_order }))
}

fn topics_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let topic_id = required_str(req, "topicId")?;
    let (name, minutes, sort_order): (String, i64, i64) = conn
        .query_row(
            "SELECT name, estimated_minutes, sort_order FROM topics WHERE id = ?",
            [&topic_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("topic not found"))?;
    let name = opt_str(req, "name")?.unwrap_or(name);
    let minutes = minutes_param(req, "estimatedMinutes")?.unwrap_or(minutes);
    let sort_order = opt_i64(req, "sortOrder")?.unwrap_or(sort_order);
    conn.execute(
        "UPDATE topics SET name = ?, estimated_minutes = ?, sort_order = ? WHERE id = ?",
        (&name, minutes, sort_order, &topic_id),
    )
    .map_err(db_err("db_update_failed", "topics"))?;
    Ok(json!({ "ok": true }))
}

fn topics_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let topic_id = required_str(req, "topicId")?;
    let lesson_id: String = conn
        .query_row("SELECT lesson_id FROM topics WHERE id = ?", [&topic_id], |r| {
            r.get(0)
        })
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("topic not found"))?;
    conn.execute("DELETE FROM topics WHERE id = ?", [&topic_id])
        .map_err(db_err("db_delete_failed", "topics"))?;
    refresh_lesson(conn, &lesson_id)?;
    Ok(json!({ "ok": true }))
}

fn topics_import_text(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let lesson_id = required_str(req, "lessonId")?;
    let text = required_str(req, "text")?;
    ensure_exists(conn, "lessons", &lesson_id, "lesson")?;
    let default_minutes = state.config.schedule.default_topic_minutes;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "topics"))?;
    let mut order = next_sort_order(&tx, &lesson_id)?;
    let mut created = Vec::new();
    for line in text.lines() {
        let Some((name, minutes)) = parse_topic_line(line, default_minutes) else {
            continue;
        };
        let id = insert_topic(&tx, &lesson_id, &name, minutes, order)?;
        created.push(json!({ "topicId": id, "name": name, "estimatedMinutes": minutes, "sortOrder": order }));
        order += 1;
    }
    refresh_lesson(&tx, &lesson_id)?;
    tx.commit().map_err(db_err("db_commit_failed", "topics"))?;

    tracing::info!(%lesson_id, count = created.len(), "topics imported from text");
    Ok(json!({ "imported": created.len(), "topics": created }))
}

fn curriculum_import_csv(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let csv_text = required_str(req, "csvText")?;
    let rows = imports::read_table(&csv_text, &["lesson", "topic"])
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    let default_minutes = state.config.schedule.default_topic_minutes;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "topics"))?;
    let mut lessons_created = 0usize;
    let mut topics_created = 0usize;
    let mut touched: Vec<String> = Vec::new();
    let mut errors: Vec<String> = Vec::new();
    for row in &rows {
        let parsed = (|| -> Result<(String, String, Option<i64>, Option<i64>), String> {
            let lesson = row.required("lesson")?.to_string();
            let topic = row.required("topic")?.to_string();
            let minutes = row.i64("minutes")?;
            if matches!(minutes, Some(m) if m <= 0) {
                return Err(format!("row {}: minutes must be greater than 0", row.row_no));
            }
            Ok((lesson, topic, minutes, row.i64("order")?))
        })();
        let (lesson, topic, minutes, order) = match parsed {
            Ok(v) => v,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };

        let lesson_id = match lesson_id_by_name(&tx, &lesson)? {
            Some(id) => id,
            None => {
                lessons_created += 1;
                insert_lesson(&tx, &lesson, "")?
            }
        };
        let order = match order {
            Some(o) => o,
            None => next_sort_order(&tx, &lesson_id)?,
        };
        insert_topic(
            &tx,
            &lesson_id,
            &topic,
            minutes.unwrap_or(default_minutes),
            order,
        )?;
        topics_created += 1;
        if !touched.contains(&lesson_id) {
            touched.push(lesson_id);
        }
    }
    for lesson_id in &touched {
        refresh_lesson(&tx, lesson_id)?;
    }
    tx.commit().map_err(db_err("db_commit_failed", "topics"))?;

    tracing::info!(lessons_created, topics_created, errors = errors.len(), "curriculum csv imported");
    Ok(json!({
        "lessonsCreated": lessons_created,
        "topicsCreated": topics_created,
        "errors": errors,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "lessons.list" => lessons_list(state, req),
        "lessons.get" => lessons_get(state, req),
        "lessons.create" => lessons_create(state, req),
        "lessons.update" => lessons_update(state, req),
        "lessons.delete" => lessons_delete(state, req),
        "topics.list" => topics_list(state, req),
        "topics.create" => topics_create(state, req),
        "topics.update" => topics_update(state, req),
        "topics.delete" => topics_delete(state, req),
        "topics.importText" => topics_import_text(state, req),
        "curriculum.importCsv" => curriculum_import_csv(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
