use crate::db;
use crate::ipc::helpers::{
    db_conn, db_err, new_id, opt_str, parse_bool, required_str, respond, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::timefmt::{format_hhmm, parse_hhmm};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeSet;

const SCHOOL_KEY: &str = "school_info";
const LUNCH_KEY: &str = "lunch_break";
const DEFAULT_LUNCH: (&str, &str) = ("12:00", "12:50");

fn settings_err(e: anyhow::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", format!("{e:#}"))
}

fn read_setting(conn: &Connection, key: &str) -> Result<Option<Value>, HandlerErr> {
    db::settings_get_json(conn, key).map_err(settings_err)
}

fn school_get(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let school = read_setting(conn, SCHOOL_KEY)?.filter(|v| {
        v.get("active").and_then(|a| a.as_bool()).unwrap_or(true)
    });
    Ok(json!({ "school": school }))
}

fn school_set(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let school = json!({
        "schoolName": required_str(req, "schoolName")?,
        "province": required_str(req, "province")?,
        "district": required_str(req, "district")?,
        "counsellorName": required_str(req, "counsellorName")?,
        "active": parse_bool(req, "active", true)?,
    });
    db::settings_set_json(conn, SCHOOL_KEY, &school).map_err(settings_err)?;
    tracing::info!("school info saved");
    Ok(json!({ "school": school }))
}

#[derive(Debug, Clone, PartialEq)]
struct LessonHour {
    period_no: i64,
    start: i64,
    end: i64,
    lunch_break: bool,
}

/// Parses `no,HH:MM,HH:MM[,0|1]`.
fn parse_lesson_hour(line: &str) -> Result<LessonHour, String> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() != 3 && parts.len() != 4 {
        return Err("expected no,HH:MM,HH:MM[,0|1]".to_string());
    }
    let period_no: i64 = parts[0]
        .parse()
        .map_err(|_| format!("bad period number '{}'", parts[0]))?;
    if period_no <= 0 {
        return Err("period number must be positive".to_string());
    }
    let start = parse_hhmm(parts[1]).map_err(|e| e.to_string())?;
    let end = parse_hhmm(parts[2]).map_err(|e| e.to_string())?;
    if start >= end {
        return Err("start must be before end".to_string());
    }
    let lunch_break = match parts.get(3).copied() {
        None | Some("0") => false,
        Some("1") => true,
        Some(other) => return Err(format!("bad lunch flag '{}'", other)),
    };
    Ok(LessonHour {
        period_no,
        start,
        end,
        lunch_break,
    })
}

fn summarize_invalid(saved: usize, invalid: &[String]) -> String {
    let mut message = if saved > 0 {
        format!("{} lesson hours saved", saved)
    } else {
        "lesson hours cleared".to_string()
    };
    if !invalid.is_empty() {
        let shown: Vec<&str> = invalid.iter().take(3).map(String::as_str).collect();
        message.push_str(&format!(
            "; {} invalid lines: {}",
            invalid.len(),
            shown.join(", ")
        ));
        if invalid.len() > 3 {
            message.push_str(&format!(" +{} more", invalid.len() - 3));
        }
    }
    message
}

fn lesson_hours_list(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let mut stmt = conn.prepare(
        "SELECT id, period_no, start_time, end_time, lunch_break FROM lesson_hours ORDER BY period_no",
    )?;
    let hours = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "periodNo": r.get::<_, i64>(1)?,
                "startTime": r.get::<_, String>(2)?,
                "endTime": r.get::<_, String>(3)?,
                "lunchBreak": r.get::<_, i64>(4)? != 0,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "hours": hours }))
}

fn lesson_hours_replace(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let text = opt_str(req, "text")?.unwrap_or_default();

    let mut valid: Vec<LessonHour> = Vec::new();
    let mut invalid: Vec<String> = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match parse_lesson_hour(line) {
            Ok(h) if valid.iter().any(|v| v.period_no == h.period_no) => {
                invalid.push(format!("{} (duplicate period)", line));
            }
            Ok(h) => valid.push(h),
            Err(e) => invalid.push(format!("{} ({})", line, e)),
        }
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "lesson_hours"))?;
    tx.execute("DELETE FROM lesson_hours", [])
        .map_err(db_err("db_delete_failed", "lesson_hours"))?;
    for h in &valid {
        tx.execute(
            "INSERT INTO lesson_hours(id, period_no, start_time, end_time, lunch_break)
             VALUES(?, ?, ?, ?, ?)",
            (
                new_id(),
                h.period_no,
                format_hhmm(h.start),
                format_hhmm(h.end),
                h.lunch_break as i64,
            ),
        )
        .map_err(db_err("db_insert_failed", "lesson_hours"))?;
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "lesson_hours"))?;

    tracing::info!(saved = valid.len(), invalid = invalid.len(), "lesson hours replaced");
    Ok(json!({
        "saved": valid.len(),
        "invalid": invalid,
        "message": summarize_invalid(valid.len(), &invalid),
    }))
}

fn lunch_get(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let stored = read_setting(conn, LUNCH_KEY)?;
    let field = |key: &str, default: &str| {
        stored
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    };
    Ok(json!({
        "startTime": field("startTime", DEFAULT_LUNCH.0),
        "endTime": field("endTime", DEFAULT_LUNCH.1),
    }))
}

fn lunch_set(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let parse = |key: &str| -> Result<i64, HandlerErr> {
        parse_hhmm(&required_str(req, key)?).map_err(|e| HandlerErr::bad_params(e.to_string()))
    };
    let start = parse("startTime")?;
    let end = parse("endTime")?;
    if start >= end {
        return Err(HandlerErr::bad_params("startTime must be before endTime"));
    }
    let value = json!({ "startTime": format_hhmm(start), "endTime": format_hhmm(end) });
    db::settings_set_json(conn, LUNCH_KEY, &value).map_err(settings_err)?;
    Ok(value)
}

fn meeting_topics_replace(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let text = required_str(req, "text")?;
    let titles: BTreeSet<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "meeting_topics"))?;
    tx.execute("DELETE FROM meeting_topics", [])
        .map_err(db_err("db_delete_failed", "meeting_topics"))?;
    for title in &titles {
        tx.execute(
            "INSERT INTO meeting_topics(id, title) VALUES(?, ?)",
            (new_id(), title),
        )
        .map_err(db_err("db_insert_failed", "meeting_topics"))?;
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "meeting_topics"))?;
    Ok(json!({ "saved": titles.len() }))
}

fn meeting_topics_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let topic_id = required_str(req, "topicId")?;
    let n = conn
        .execute("DELETE FROM meeting_topics WHERE id = ?", [&topic_id])
        .map_err(db_err("db_delete_failed", "meeting_topics"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("meeting topic not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "params.school.get" => school_get(state),
        "params.school.set" => school_set(state, req),
        "params.lessonHours.list" => lesson_hours_list(state),
        "params.lessonHours.replace" => lesson_hours_replace(state, req),
        "params.lunchBreak.get" => lunch_get(state),
        "params.lunchBreak.set" => lunch_set(state, req),
        "params.meetingTopics.replace" => meeting_topics_replace(state, req),
        "params.meetingTopics.delete" => meeting_topics_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
