use crate::ipc::helpers::{
    db_conn, db_err, new_id, non_negative, now_ts, opt_i64, opt_str, required_str, respond,
    today, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::timefmt::{iso, parse_date};
use chrono::Duration;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};

const ACTIVITY_TYPES: [&str; 8] = [
    "Bireysel Görüşme",
    "Grup Rehberliği",
    "Psikoeğitim",
    "Seminer",
    "Veli Toplantısı",
    "Atölye Çalışması",
    "Saha Çalışması",
    "Diğer",
];

const TARGET_TYPES: [&str; 5] = [
    "Akademik Gelişim",
    "Kişisel/Sosyal Gelişim",
    "Mesleki Gelişim",
    "Psikolojik Destek",
    "Diğer",
];

const METHODS: [&str; 7] = [
    "Bilgilendirme",
    "Grup Çalışması",
    "Bireysel Görüşme",
    "Sunum",
    "Atölye",
    "Uygulama",
    "Diğer",
];

const COUNT_KEYS: [(&str, &str); 6] = [
    ("teacher_count", "teacherCount"),
    ("parent_count", "parentCount"),
    ("other_count", "otherCount"),
    ("male_count", "maleCount"),
    ("female_count", "femaleCount"),
    ("official_letter_count", "officialLetterCount"),
];

const ACTIVITY_COLS: &str = "id, activity_date, method, description, target_type, activity_type,
    teacher_count, parent_count, other_count, male_count, female_count, class_info,
    official_letter_count, created_at, updated_at";

const MAX_COUNT: i64 = 1_000_000;

/// Head counts in `COUNT_KEYS` order.
#[derive(Debug, Clone, Copy, Default)]
struct Counts([i64; 6]);

impl Counts {
    fn total_students(&self) -> i64 {
        self.0[3].saturating_add(self.0[4])
    }

    fn total_participants(&self) -> i64 {
        self.0[..3]
            .iter()
            .fold(self.total_students(), |acc, n| acc.saturating_add(*n))
    }
}

fn activity_json(r: &Row) -> rusqlite::Result<Value> {
    let mut counts = Counts::default();
    for (i, slot) in counts.0.iter_mut().take(5).enumerate() {
        *slot = r.get(6 + i)?;
    }
    counts.0[5] = r.get(12)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "date": r.get::<_, String>(1)?,
        "method": r.get::<_, String>(2)?,
        "description": r.get::<_, String>(3)?,
        "targetType": r.get::<_, String>(4)?,
        "activityType": r.get::<_, String>(5)?,
        "teacherCount": counts.0[0],
        "parentCount": counts.0[1],
        "otherCount": counts.0[2],
        "maleCount": counts.0[3],
        "femaleCount": counts.0[4],
        "classInfo": r.get::<_, Option<String>>(11)?,
        "officialLetterCount": counts.0[5],
        "totalStudents": counts.total_students(),
        "totalParticipants": counts.total_participants(),
        "createdAt": r.get::<_, String>(13)?,
        "updatedAt": r.get::<_, String>(14)?,
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

fn counts_from_params(req: &Request, base: Counts) -> Result<Counts, HandlerErr> {
    let mut counts = base;
    for (i, (_, key)) in COUNT_KEYS.iter().enumerate() {
        if let Some(v) = non_negative(req, key)? {
            if v > MAX_COUNT {
                return Err(HandlerErr::bad_params(format!(
                    "{} must not exceed {}",
                    key, MAX_COUNT
                )));
            }
            counts.0[i] = v;
        }
    }
    Ok(counts)
}

fn query_activities(conn: &Connection, sql: &str, args: &[&str]) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), activity_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn activities_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let from = date_param(req, "from")?.unwrap_or_else(|| "0000-01-01".into());
    let to = date_param(req, "to")?.unwrap_or_else(|| "9999-12-31".into());
    let sql = format!(
        "SELECT {} FROM activities WHERE activity_date BETWEEN ? AND ?
         ORDER BY activity_date DESC, created_at DESC",
        ACTIVITY_COLS
    );
    let activities = query_activities(conn, &sql, &[&from, &to])?;
    Ok(json!({ "activities": activities }))
}

fn load_activity(conn: &Connection, id: &str) -> Result<Value, HandlerErr> {
    let sql = format!("SELECT {} FROM activities WHERE id = ?", ACTIVITY_COLS);
    conn.query_row(&sql, [id], activity_json)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("activity not found"))
}

fn activities_get(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let id = required_str(req, "activityId")?;
    Ok(json!({ "activity": load_activity(conn, &id)? }))
}

fn activities_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let date = date_param(req, "date")?.ok_or_else(|| HandlerErr::bad_params("missing date"))?;
    let method = required_str(req, "method")?;
    let target_type = required_str(req, "targetType")?;
    let activity_type = required_str(req, "activityType")?;
    let description = opt_str(req, "description")?.unwrap_or_default();
    let class_info = opt_str(req, "classInfo")?;
    let counts = counts_from_params(req, Counts::default())?;

    let id = new_id();
    let ts = now_ts();
    conn.execute(
        "INSERT INTO activities(id, activity_date, method, description, target_type,
            activity_type, teacher_count, parent_count, other_count, male_count, female_count,
            class_info, official_letter_count, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            &date,
            &method,
            &description,
            &target_type,
            &activity_type,
            counts.0[0],
            counts.0[1],
            counts.0[2],
            counts.0[3],
            counts.0[4],
            &class_info,
            counts.0[5],
            &ts,
            &ts,
        ],
    )
    .map_err(db_err("db_insert_failed", "activities"))?;
    tracing::info!(activity_id = %id, %date, %activity_type, "activity recorded");
    Ok(json!({
        "activityId": id,
        "totalStudents": counts.total_students(),
        "totalParticipants": counts.total_participants(),
    }))
}

fn activities_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let id = required_str(req, "activityId")?;
    let current = load_activity(conn, &id)?;
    let cur_str = |key: &str| {
        current
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let mut base = Counts::default();
    for (i, (_, key)) in COUNT_KEYS.iter().enumerate() {
        base.0[i] = current.get(*key).and_then(|v| v.as_i64()).unwrap_or(0);
    }
    let counts = counts_from_params(req, base)?;
    let date = date_param(req, "date")?.unwrap_or_else(|| cur_str("date"));
    let method = opt_str(req, "method")?.unwrap_or_else(|| cur_str("method"));
    let target_type = opt_str(req, "targetType")?.unwrap_or_else(|| cur_str("targetType"));
    let activity_type = opt_str(req, "activityType")?.unwrap_or_else(|| cur_str("activityType"));
    let description = if req.params.get("description").is_some() {
        opt_str(req, "description")?.unwrap_or_default()
    } else {
        cur_str("description")
    };
    let class_info = if req.params.get("classInfo").is_some() {
        opt_str(req, "classInfo")?
    } else {
        current
            .get("classInfo")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    conn.execute(
        "UPDATE activities SET activity_date = ?, method = ?, description = ?, target_type = ?,
            activity_type = ?, teacher_count = ?, parent_count = ?, other_count = ?,
            male_count = ?, female_count = ?, class_info = ?, official_letter_count = ?,
            updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            &date,
            &method,
            &description,
            &target_type,
            &activity_type,
            counts.0[0],
            counts.0[1],
            counts.0[2],
            counts.0[3],
            counts.0[4],
            &class_info,
            counts.0[5],
            now_ts(),
            &id,
        ],
    )
    .map_err(db_err("db_update_failed", "activities"))?;
    Ok(json!({ "ok": true }))
}

fn activities_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let id = required_str(req, "activityId")?;
    let n = conn
        .execute("DELETE FROM activities WHERE id = ?", [&id])
        .map_err(db_err("db_delete_failed", "activities"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("activity not found"));
    }
    Ok(json!({ "ok": true }))
}

/// Activities dated from today through `days` days ahead, soonest first.
pub(crate) fn upcoming(conn: &Connection, days: i64) -> Result<Vec<Value>, HandlerErr> {
    let start = today();
    let end = start + Duration::days(days);
    let sql = format!(
        "SELECT {} FROM activities WHERE activity_date BETWEEN ? AND ?
         ORDER BY activity_date, created_at",
        ACTIVITY_COLS
    );
    query_activities(conn, &sql, &[&iso(start), &iso(end)])
}

fn activities_upcoming(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let days = match opt_i64(req, "days")? {
        Some(d) if d < 0 => return Err(HandlerErr::bad_params("days must not be negative")),
        Some(d) => d,
        None => state.config.activities.upcoming_days,
    };
    Ok(json!({ "days": days, "activities": upcoming(conn, days)? }))
}

fn activities_count_in_range(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let from = date_param(req, "from")?.ok_or_else(|| HandlerErr::bad_params("missing from"))?;
    let to = date_param(req, "to")?.ok_or_else(|| HandlerErr::bad_params("missing to"))?;
    if from > to {
        return Err(HandlerErr::bad_params("from must not be after to"));
    }
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM activities WHERE activity_date BETWEEN ? AND ?",
        [&from, &to],
        |r| r.get(0),
    )?;
    Ok(json!({ "count": count }))
}

fn activities_catalog() -> HandlerResult {
    Ok(json!({
        "activityTypes": ACTIVITY_TYPES,
        "targetTypes": TARGET_TYPES,
        "methods": METHODS,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "activities.list" => activities_list(state, req),
        "activities.get" => activities_get(state, req),
        "activities.create" => activities_create(state, req),
        "activities.update" => activities_update(state, req),
        "activities.delete" => activities_delete(state, req),
        "activities.upcoming" => activities_upcoming(state, req),
        "activities.countInRange" => activities_count_in_range(state, req),
        "activities.catalog" => activities_catalog(),
        _ => return None,
    };
    Some(respond(req, result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_saturate_instead_of_overflowing() {
        let counts = Counts([i64::MAX, 1, 0, i64::MAX, 1, 0]);
        assert_eq!(counts.total_students(), i64::MAX);
        assert_eq!(counts.total_participants(), i64::MAX);
        let small = Counts([2, 5, 0, 20, 22, 1]);
        assert_eq!(small.total_students(), 42);
        assert_eq!(small.total_participants(), 49);
    }
}
