use crate::ipc::helpers::{
    db_conn, db_err, ensure_exists, new_id, opt_i64, opt_str, required_str, respond, round2,
    today, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{
    check_conflicts, validate_slot, BookedSlot, ProjectedEntry, ScheduleBuilder, ScheduleError,
    Slot, TopicProjector, TopicState,
};
use crate::timefmt::{day_name, dotted, format_hhmm, iso, parse_date, parse_hhmm, week_start};
use chrono::Duration;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;

struct Entry {
    id: String,
    lesson_id: String,
    lesson_name: String,
    day: i64,
    start: i64,
    end: i64,
}

impl Entry {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "lessonId": self.lesson_id,
            "lessonName": self.lesson_name,
            "day": self.day,
            "dayName": day_name(self.day),
            "start": format_hhmm(self.start),
            "end": format_hhmm(self.end),
            "durationMinutes": self.end - self.start,
        })
    }
}

fn schedule_err(e: ScheduleError) -> HandlerErr {
    match e {
        ScheduleError::Conflict { .. } => HandlerErr::conflict(e.to_string()),
        other => HandlerErr::bad_params(other.to_string()),
    }
}

fn time_param(req: &Request, key: &str) -> Result<i64, HandlerErr> {
    let raw = required_str(req, key)?;
    parse_hhmm(&raw).map_err(|e| HandlerErr::bad_params(format!("{}: {}", key, e)))
}

/// Entries ordered by day then start. Rows with unreadable times are skipped.
fn load_entries(conn: &Connection, student_id: &str) -> Result<Vec<Entry>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT se.id, se.lesson_id, l.name, se.day, se.start_time, se.end_time
         FROM schedule_entries se JOIN lessons l ON l.id = se.lesson_id
         WHERE se.student_id = ?
         ORDER BY se.day, se.start_time",
    )?;
    let raw = stmt
        .query_map([student_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(raw.len());
    for (id, lesson_id, lesson_name, day, start, end) in raw {
        match (parse_hhmm(&start), parse_hhmm(&end)) {
            (Ok(start), Ok(end)) => out.push(Entry {
                id,
                lesson_id,
                lesson_name,
                day,
                start,
                end,
            }),
            _ => tracing::warn!(entry_id = %id, "schedule entry with unreadable time skipped"),
        }
    }
    Ok(out)
}

fn booked_same_day(entries: &[Entry], day: i64, except_id: Option<&str>) -> Vec<BookedSlot> {
    entries
        .iter()
        .filter(|e| e.day == day && Some(e.id.as_str()) != except_id)
        .map(|e| BookedSlot {
            lesson_name: e.lesson_name.clone(),
            start: e.start,
            end: e.end,
        })
        .collect()
}

fn insert_entry(
    conn: &Connection,
    student_id: &str,
    lesson_id: &str,
    slot: &Slot,
) -> Result<String, HandlerErr> {
    let id = new_id();
    conn.execute(
        "INSERT INTO schedule_entries(id, student_id, lesson_id, day, start_time, end_time)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            student_id,
            lesson_id,
            slot.day,
            format_hhmm(slot.start),
            format_hhmm(slot.end),
        ),
    )
    .map_err(db_err("db_insert_failed", "schedule_entries"))?;
    Ok(id)
}

fn schedule_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let entries = load_entries(conn, &student_id)?;
    Ok(json!({ "entries": entries.iter().map(Entry::to_json).collect::<Vec<_>>() }))
}

fn schedule_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let lesson_id = required_str(req, "lessonId")?;
    let day = opt_i64(req, "day")?.ok_or_else(|| HandlerErr::bad_params("missing day"))?;
    let slot = Slot {
        day,
        start: time_param(req, "start")?,
        end: time_param(req, "end")?,
    };
    validate_slot(&slot).map_err(schedule_err)?;
    ensure_exists(conn, "students", &student_id, "student")?;
    ensure_exists(conn, "lessons", &lesson_id, "lesson")?;

    let entries = load_entries(conn, &student_id)?;
    check_conflicts(&slot, &booked_same_day(&entries, day, None)).map_err(schedule_err)?;

    let id = insert_entry(conn, &student_id, &lesson_id, &slot)?;
    Ok(json!({ "entryId": id }))
}

fn schedule_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let entry_id = required_str(req, "entryId")?;
    let (student_id, lesson_id, day, start, end): (String, String, i64, String, String) = conn
        .query_row(
            "SELECT student_id, lesson_id, day, start_time, end_time
             FROM schedule_entries WHERE id = ?",
            [&entry_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("schedule entry not found"))?;

    let lesson_id = opt_str(req, "lessonId")?.unwrap_or(lesson_id);
    ensure_exists(conn, "lessons", &lesson_id, "lesson")?;
    let start = match opt_str(req, "start")? {
        Some(_) => time_param(req, "start")?,
        None => parse_hhmm(&start).map_err(|e| HandlerErr::bad_params(e.to_string()))?,
    };
    let end = match opt_str(req, "end")? {
        Some(_) => time_param(req, "end")?,
        None => parse_hhmm(&end).map_err(|e| HandlerErr::bad_params(e.to_string()))?,
    };
    let slot = Slot {
        day: opt_i64(req, "day")?.unwrap_or(day),
        start,
        end,
    };
    validate_slot(&slot).map_err(schedule_err)?;

    let entries = load_entries(conn, &student_id)?;
    check_conflicts(&slot, &booked_same_day(&entries, slot.day, Some(&entry_id)))
        .map_err(schedule_err)?;

    conn.execute(
        "UPDATE schedule_entries SET lesson_id = ?, day = ?, start_time = ?, end_time = ?
         WHERE id = ?",
        (
            &lesson_id,
            slot.day,
            format_hhmm(slot.start),
            format_hhmm(slot.end),
            &entry_id,
        ),
    )
    .map_err(db_err("db_update_failed", "schedule_entries"))?;
    Ok(json!({ "ok": true }))
}

fn schedule_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let entry_id = required_str(req, "entryId")?;
    let n = conn
        .execute("DELETE FROM schedule_entries WHERE id = ?", [&entry_id])
        .map_err(db_err("db_delete_failed", "schedule_entries"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("schedule entry not found"));
    }
    Ok(json!({ "ok": true }))
}

fn schedule_clear(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let deleted = conn
        .execute(
            "DELETE FROM schedule_entries WHERE student_id = ?",
            [&student_id],
        )
        .map_err(db_err("db_delete_failed", "schedule_entries"))?;
    Ok(json!({ "deleted": deleted }))
}

fn int_array(req: &Request, key: &str) -> Result<Vec<i64>, HandlerErr> {
    let arr = req
        .params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    let mut out = Vec::with_capacity(arr.len());
    for v in arr {
        let n = v
            .as_i64()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be array of integers", key)))?;
        if !out.contains(&n) {
            out.push(n);
        }
    }
    Ok(out)
}

fn schedule_auto_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let days = int_array(req, "days")?;
    let start = time_param(req, "start")?;
    let end = time_param(req, "end")?;
    let builder = ScheduleBuilder::new(
        opt_i64(req, "lessonMinutes")?.unwrap_or(state.config.schedule.lesson_minutes),
        opt_i64(req, "breakMinutes")?.unwrap_or(state.config.schedule.break_minutes),
    );
    ensure_exists(conn, "students", &student_id, "student")?;

    let wanted: Vec<String> = match req.params.get("lessonIds") {
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    let mut stmt = conn.prepare("SELECT id, name FROM lessons ORDER BY name, id")?;
    let all = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let lessons: Vec<(String, String)> = if wanted.is_empty() {
        all
    } else {
        for id in &wanted {
            if !all.iter().any(|(lid, _)| lid == id) {
                return Err(HandlerErr::not_found(format!("lesson not found: {}", id)));
            }
        }
        wanted
            .iter()
            .filter_map(|id| all.iter().find(|(lid, _)| lid == id).cloned())
            .collect()
    };

    let blocks = builder
        .build(&days, start, end, lessons.len())
        .map_err(schedule_err)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "schedule_entries"))?;
    let cleared = tx
        .execute(
            "DELETE FROM schedule_entries WHERE student_id = ?",
            [&student_id],
        )
        .map_err(db_err("db_delete_failed", "schedule_entries"))?;
    let mut created = Vec::with_capacity(blocks.len());
    for b in &blocks {
        let (lesson_id, lesson_name) = &lessons[b.lesson_index];
        let slot = Slot {
            day: b.day,
            start: b.start,
            end: b.end,
        };
        let id = insert_entry(&tx, &student_id, lesson_id, &slot)?;
        created.push(
            Entry {
                id,
                lesson_id: lesson_id.clone(),
                lesson_name: lesson_name.clone(),
                day: b.day,
                start: b.start,
                end: b.end,
            }
            .to_json(),
        );
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "schedule_entries"))?;

    tracing::info!(%student_id, created = created.len(), cleared, "schedule generated");
    Ok(json!({
        "created": created.len(),
        "cleared": cleared,
        "entries": created,
    }))
}

fn by_day(entries: &[Entry]) -> Vec<Value> {
    (0..7)
        .map(|day| {
            json!({
                "day": day,
                "dayName": day_name(day),
                "entries": entries
                    .iter()
                    .filter(|e| e.day == day)
                    .map(Entry::to_json)
                    .collect::<Vec<_>>(),
            })
        })
        .collect()
}

fn schedule_weekly(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let entries = load_entries(conn, &student_id)?;
    let total: i64 = entries.iter().map(|e| e.end - e.start).sum();
    Ok(json!({
        "days": by_day(&entries),
        "totalMinutes": total,
    }))
}

fn schedule_week_plan(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let anchor = match opt_str(req, "date")? {
        Some(raw) => parse_date(&raw).map_err(|e| HandlerErr::bad_params(e.to_string()))?,
        None => today(),
    };
    let monday = week_start(anchor);
    let entries = load_entries(conn, &student_id)?;

    let days: Vec<Value> = by_day(&entries)
        .into_iter()
        .enumerate()
        .map(|(i, mut d)| {
            d["date"] = json!(dotted(monday + Duration::days(i as i64)));
            d
        })
        .collect();

    let mut stmt = conn.prepare(
        "SELECT lp.lesson_id, l.name, lp.percent, lp.estimated_end_date
         FROM lesson_progress lp JOIN lessons l ON l.id = lp.lesson_id
         WHERE lp.student_id = ? ORDER BY l.name",
    )?;
    let progress = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "lessonId": r.get::<_, String>(0)?,
                "lessonName": r.get::<_, String>(1)?,
                "percent": round2(r.get::<_, f64>(2)?),
                "estimatedEndDate": r.get::<_, Option<String>>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "weekStart": iso(monday),
        "weekEnd": iso(monday + Duration::days(6)),
        "days": days,
        "progress": progress,
    }))
}

fn load_topic_states(
    conn: &Connection,
    student_id: &str,
    lesson_ids: &[String],
) -> Result<HashMap<String, Vec<TopicState>>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.estimated_minutes, tt.studied_minutes, COALESCE(tt.completed, 0)
         FROM topics t
         LEFT JOIN topic_tracking tt ON tt.topic_id = t.id AND tt.student_id = ?
         WHERE t.lesson_id = ?
         ORDER BY t.sort_order, t.name",
    )?;
    let mut out = HashMap::with_capacity(lesson_ids.len());
    for lesson_id in lesson_ids {
        let topics = stmt
            .query_map([student_id, lesson_id.as_str()], |r| {
                Ok(TopicState {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    estimated_minutes: r.get(2)?,
                    studied_minutes: r.get(3)?,
                    completed: r.get::<_, i64>(4)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        out.insert(lesson_id.clone(), topics);
    }
    Ok(out)
}

fn schedule_topic_plan(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let entries = load_entries(conn, &student_id)?;

    let mut lesson_ids: Vec<String> = Vec::new();
    let mut lesson_names: HashMap<String, String> = HashMap::new();
    for e in &entries {
        if !lesson_ids.contains(&e.lesson_id) {
            lesson_ids.push(e.lesson_id.clone());
            lesson_names.insert(e.lesson_id.clone(), e.lesson_name.clone());
        }
    }
    let topics = load_topic_states(conn, &student_id, &lesson_ids)?;
    let projected: Vec<ProjectedEntry> = entries
        .iter()
        .map(|e| ProjectedEntry {
            day: e.day,
            start: e.start,
            end: e.end,
            lesson_id: e.lesson_id.clone(),
        })
        .collect();
    let plan = TopicProjector::new(&topics).project(&projected);

    let days: Vec<Value> = plan
        .iter()
        .enumerate()
        .map(|(day, items)| {
            json!({
                "day": day,
                "dayName": day_name(day as i64),
                "items": items
                    .iter()
                    .map(|it| json!({
                        "lessonId": it.lesson_id,
                        "lessonName": lesson_names.get(&it.lesson_id),
                        "topicId": it.topic_id,
                        "topicName": it.topic_name,
                        "start": format_hhmm(it.start),
                        "end": format_hhmm(it.end),
                        "minutes": it.minutes,
                    }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    Ok(json!({ "days": days }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "schedule.list" => schedule_list(state, req),
        "schedule.create" => schedule_create(state, req),
        "schedule.update" => schedule_update(state, req),
        "schedule.delete" => schedule_delete(state, req),
        "schedule.clear" => schedule_clear(state, req),
        "schedule.autoCreate" => schedule_auto_create(state, req),
        "schedule.weekly" => schedule_weekly(state, req),
        "schedule.weekPlan" => schedule_week_plan(state, req),
        "schedule.topicPlan" => schedule_topic_plan(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
