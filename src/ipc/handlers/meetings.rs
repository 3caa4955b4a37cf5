use crate::ipc::helpers::{
    db_conn, db_err, ensure_exists, new_id, now_ts, opt_str, parse_bool, required_str, respond,
    today, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::meetings::{categorize, session_numbers, MeetingKey};
use crate::timefmt::{format_hhmm, iso, month_bounds, parse_date, parse_hhmm};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};

const MEETING_COLS: &str = "id, student_id, meeting_date, start_time, end_time, ordinal, person,
    person_role, relation, topic, work_area, work_category, service_type,
    institution_cooperation, place, discipline, judicial_referral, method, summary,
    exported, exported_at, created_at";

fn meeting_json(r: &Row) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, Option<String>>(1)?,
        "date": r.get::<_, String>(2)?,
        "startTime": r.get::<_, String>(3)?,
        "endTime": r.get::<_, String>(4)?,
        "ordinal": r.get::<_, i64>(5)?,
        "person": r.get::<_, String>(6)?,
        "personRole": r.get::<_, String>(7)?,
        "relation": r.get::<_, Option<String>>(8)?,
        "topic": r.get::<_, String>(9)?,
        "workArea": r.get::<_, Option<String>>(10)?,
        "workCategory": r.get::<_, Option<String>>(11)?,
        "serviceType": r.get::<_, Option<String>>(12)?,
        "institutionCooperation": r.get::<_, Option<String>>(13)?,
        "place": r.get::<_, Option<String>>(14)?,
        "discipline": r.get::<_, i64>(15)? != 0,
        "judicialReferral": r.get::<_, i64>(16)? != 0,
        "method": r.get::<_, Option<String>>(17)?,
        "summary": r.get::<_, Option<String>>(18)?,
        "exported": r.get::<_, i64>(19)? != 0,
        "exportedAt": r.get::<_, Option<String>>(20)?,
        "createdAt": r.get::<_, String>(21)?,
    }))
}

fn date_param(req: &Request, key: &str) -> Result<Option<String>, HandlerErr> {
    match opt_str(req, key)? {
        Some(raw) => parse_date(&raw)
            .map(|d| Some(iso(d)))
            .map_err(|e| HandlerErr::bad_params(e.to_string())),
        None => Ok(None),
    }
}

fn time_param(req: &Request, key: &str) -> Result<Option<i64>, HandlerErr> {
    match opt_str(req, key)? {
        Some(raw) => parse_hhmm(&raw)
            .map(Some)
            .map_err(|e| HandlerErr::bad_params(e.to_string())),
        None => Ok(None),
    }
}

fn check_times(start: i64, end: i64) -> Result<(), HandlerErr> {
    if end < start {
        return Err(HandlerErr::bad_params("endTime must not be before startTime"));
    }
    Ok(())
}

fn range_params(req: &Request) -> Result<(String, String), HandlerErr> {
    let from = date_param(req, "from")?.ok_or_else(|| HandlerErr::bad_params("missing from"))?;
    let to = date_param(req, "to")?.ok_or_else(|| HandlerErr::bad_params("missing to"))?;
    if from > to {
        return Err(HandlerErr::bad_params("from must not be after to"));
    }
    Ok((from, to))
}

/// Rewrites every stored ordinal that differs from its chronological
/// session number. Returns how many rows changed.
fn renumber_all(conn: &Connection) -> Result<usize, HandlerErr> {
    let mut stmt =
        conn.prepare("SELECT id, student_id, meeting_date, created_at, ordinal FROM meetings")?;
    let rows = stmt
        .query_map([], |r| {
            Ok((
                MeetingKey {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    date: r.get(2)?,
                    created_at: r.get(3)?,
                },
                r.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let keys: Vec<MeetingKey> = rows.iter().map(|(k, _)| k.clone()).collect();
    let numbers = session_numbers(&keys);

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "meetings"))?;
    let mut updated = 0usize;
    for (key, stored) in &rows {
        let Some(&n) = numbers.get(&key.id) else {
            continue;
        };
        if n != *stored {
            tx.execute("UPDATE meetings SET ordinal = ? WHERE id = ?", (n, &key.id))
                .map_err(db_err("db_update_failed", "meetings"))?;
            updated += 1;
        }
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "meetings"))?;
    Ok(updated)
}

fn meetings_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let bounds = match opt_str(req, "month")? {
        Some(m) => {
            let (first, last) =
                month_bounds(&m).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
            Some((iso(first), iso(last)))
        }
        None => None,
    };
    renumber_all(conn)?;

    let (from, to) = bounds.unwrap_or_else(|| ("0000-01-01".into(), "9999-12-31".into()));
    let sql = format!(
        "SELECT {} FROM meetings WHERE meeting_date BETWEEN ? AND ?
         ORDER BY meeting_date DESC, start_time DESC, created_at DESC",
        MEETING_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let meetings = stmt
        .query_map([&from, &to], meeting_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "meetings": meetings }))
}

fn load_meeting(conn: &Connection, id: &str) -> Result<Value, HandlerErr> {
    let sql = format!("SELECT {} FROM meetings WHERE id = ?", MEETING_COLS);
    conn.query_row(&sql, [id], meeting_json)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("meeting not found"))
}

fn meetings_get(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let id = required_str(req, "meetingId")?;
    Ok(json!({ "meeting": load_meeting(conn, &id)? }))
}

/// Optional text fields; a missing value falls back to the derived one.
fn text_or(req: &Request, key: &str, derived: &str) -> Result<Option<String>, HandlerErr> {
    Ok(opt_str(req, key)?.or_else(|| {
        if derived.is_empty() {
            None
        } else {
            Some(derived.to_string())
        }
    }))
}

fn meetings_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = opt_str(req, "studentId")?;
    if let Some(sid) = student_id.as_deref() {
        ensure_exists(conn, "students", sid, "student")?;
    }
    let date = date_param(req, "date")?.unwrap_or_else(|| iso(today()));
    let start = time_param(req, "startTime")?.ok_or_else(|| HandlerErr::bad_params("missing startTime"))?;
    let end = time_param(req, "endTime")?.ok_or_else(|| HandlerErr::bad_params("missing endTime"))?;
    check_times(start, end)?;
    let topic = required_str(req, "topic")?;
    let method = opt_str(req, "method")?.unwrap_or_default();
    let derived = categorize(&topic, &method);
    let person = opt_str(req, "person")?.unwrap_or_else(|| derived.person_role.clone());
    let person_role = opt_str(req, "personRole")?.unwrap_or_else(|| derived.person_role.clone());

    let ordinal = match student_id.as_deref() {
        Some(sid) => {
            let prior: i64 = conn.query_row(
                "SELECT COUNT(*) FROM meetings WHERE student_id = ? AND meeting_date <= ?",
                [sid, date.as_str()],
                |r| r.get(0),
            )?;
            prior + 1
        }
        None => 1,
    };

    let id = new_id();
    conn.execute(
        "INSERT INTO meetings(id, student_id, meeting_date, start_time, end_time, ordinal, person,
            person_role, relation, topic, work_area, work_category, service_type,
            institution_cooperation, place, discipline, judicial_referral, method, summary,
            exported, exported_at, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?)",
        rusqlite::params![
            &id,
            &student_id,
            &date,
            format_hhmm(start),
            format_hhmm(end),
            ordinal,
            &person,
            &person_role,
            opt_str(req, "relation")?,
            &topic,
            text_or(req, "workArea", &derived.work_area)?,
            text_or(req, "workCategory", &derived.work_category)?,
            text_or(req, "serviceType", &derived.service_type)?,
            opt_str(req, "institutionCooperation")?,
            opt_str(req, "place")?,
            parse_bool(req, "discipline", false)? as i64,
            parse_bool(req, "judicialReferral", false)? as i64,
            text_or(req, "method", &derived.method)?,
            opt_str(req, "summary")?,
            now_ts(),
        ],
    )
    .map_err(db_err("db_insert_failed", "meetings"))?;
    tracing::info!(meeting_id = %id, %date, ordinal, "meeting recorded");
    Ok(json!({ "meetingId": id, "ordinal": ordinal }))
}

fn meetings_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let id = required_str(req, "meetingId")?;
    let current = load_meeting(conn, &id)?;
    let cur_str = |key: &str| current.get(key).and_then(|v| v.as_str()).map(str::to_string);
    let cur_bool = |key: &str| current.get(key).and_then(|v| v.as_bool()).unwrap_or(false);

    let student_id = if req.params.get("studentId").is_some() {
        let sid = opt_str(req, "studentId")?;
        if let Some(s) = sid.as_deref() {
            ensure_exists(conn, "students", s, "student")?;
        }
        sid
    } else {
        cur_str("studentId")
    };
    let date = date_param(req, "date")?
        .or_else(|| cur_str("date"))
        .unwrap_or_else(|| iso(today()));
    let start = match time_param(req, "startTime")? {
        Some(t) => t,
        None => parse_hhmm(&cur_str("startTime").unwrap_or_default())
            .map_err(|e| HandlerErr::bad_params(e.to_string()))?,
    };
    let end = match time_param(req, "endTime")? {
        Some(t) => t,
        None => parse_hhmm(&cur_str("endTime").unwrap_or_default())
            .map_err(|e| HandlerErr::bad_params(e.to_string()))?,
    };
    check_times(start, end)?;

    let merged = |key: &str| -> Result<Option<String>, HandlerErr> {
        if req.params.get(key).is_some() {
            opt_str(req, key)
        } else {
            Ok(cur_str(key))
        }
    };
    let topic = merged("topic")?.ok_or_else(|| HandlerErr::bad_params("topic must not be empty"))?;
    let person = merged("person")?.ok_or_else(|| HandlerErr::bad_params("person must not be empty"))?;
    let person_role = merged("personRole")?.unwrap_or_else(|| person.clone());

    conn.execute(
        "UPDATE meetings SET student_id = ?, meeting_date = ?, start_time = ?, end_time = ?,
            person = ?, person_role = ?, relation = ?, topic = ?, work_area = ?,
            work_category = ?, service_type = ?, institution_cooperation = ?, place = ?,
            discipline = ?, judicial_referral = ?, method = ?, summary = ?
         WHERE id = ?",
        rusqlite::params![
            &student_id,
            &date,
            format_hhmm(start),
            format_hhmm(end),
            &person,
            &person_role,
            merged("relation")?,
            &topic,
            merged("workArea")?,
            merged("workCategory")?,
            merged("serviceType")?,
            merged("institutionCooperation")?,
            merged("place")?,
            parse_bool(req, "discipline", cur_bool("discipline"))? as i64,
            parse_bool(req, "judicialReferral", cur_bool("judicialReferral"))? as i64,
            merged("method")?,
            merged("summary")?,
            &id,
        ],
    )
    .map_err(db_err("db_update_failed", "meetings"))?;
    renumber_all(conn)?;
    Ok(json!({ "ok": true }))
}

fn meetings_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let id = required_str(req, "meetingId")?;
    let n = conn
        .execute("DELETE FROM meetings WHERE id = ?", [&id])
        .map_err(db_err("db_delete_failed", "meetings"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("meeting not found"));
    }
    renumber_all(conn)?;
    Ok(json!({ "ok": true }))
}

fn meetings_renumber(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let updated = renumber_all(conn)?;
    tracing::info!(updated, "meeting ordinals renumbered");
    Ok(json!({ "updated": updated }))
}

fn meetings_count_in_range(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let (from, to) = range_params(req)?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM meetings WHERE meeting_date BETWEEN ? AND ?",
        [&from, &to],
        |r| r.get(0),
    )?;
    Ok(json!({ "count": count }))
}

fn meetings_on_date(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let date = date_param(req, "date")?.ok_or_else(|| HandlerErr::bad_params("missing date"))?;
    let sql = format!(
        "SELECT {} FROM meetings WHERE meeting_date = ? ORDER BY start_time, created_at",
        MEETING_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let meetings = stmt
        .query_map([&date], meeting_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "meetings": meetings }))
}

fn meetings_export_mebbis(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let sql = format!(
        "SELECT {} FROM meetings WHERE exported = 0 ORDER BY meeting_date, start_time",
        MEETING_COLS
    );
    let pending = {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], meeting_json)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    if pending.is_empty() {
        return Ok(json!({ "exported": 0, "message": "nothing to export" }));
    }

    let ts = now_ts();
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "meetings"))?;
    for m in &pending {
        let Some(id) = m.get("id").and_then(|v| v.as_str()) else {
            continue;
        };
        tx.execute(
            "UPDATE meetings SET exported = 1, exported_at = ? WHERE id = ?",
            (&ts, id),
        )
        .map_err(db_err("db_update_failed", "meetings"))?;
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "meetings"))?;

    tracing::info!(exported = pending.len(), "meetings marked as exported");
    Ok(json!({
        "exported": pending.len(),
        "exportedAt": ts,
        "meetings": pending,
    }))
}

fn meetings_categorize(req: &Request) -> HandlerResult {
    let topic = required_str(req, "topic")?;
    let method = opt_str(req, "method")?.unwrap_or_default();
    serde_json::to_value(categorize(&topic, &method))
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))
}

fn meeting_topics_list(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let mut stmt = conn.prepare("SELECT id, title FROM meeting_topics ORDER BY title")?;
    let topics = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "topics": topics }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "meetings.list" => meetings_list(state, req),
        "meetings.get" => meetings_get(state, req),
        "meetings.create" => meetings_create(state, req),
        "meetings.update" => meetings_update(state, req),
        "meetings.delete" => meetings_delete(state, req),
        "meetings.renumber" => meetings_renumber(state),
        "meetings.countInRange" => meetings_count_in_range(state, req),
        "meetings.onDate" => meetings_on_date(state, req),
        "meetings.exportMebbis" => meetings_export_mebbis(state),
        "meetings.categorize" => meetings_categorize(req),
        "meetings.topics.list" => meeting_topics_list(state),
        _ => return None,
    };
    Some(respond(req, result))
}
