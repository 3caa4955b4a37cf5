use crate::ipc::handlers::activities::upcoming;
use crate::ipc::helpers::{
    db_conn, db_err, new_id, now_ts, opt_str, required_str, respond, round2, string_array, today,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::meetings::{KindCounts, PersonKind};
use crate::reports::{
    check_kind, check_status, performance, previous_window, term_of, ReportError, StatisticsKind,
};
use crate::timefmt::{dotted, iso, month_bounds, parse_date};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn count(conn: &Connection, sql: &str) -> Result<i64, HandlerErr> {
    Ok(conn.query_row(sql, [], |r| r.get(0))?)
}

fn dashboard(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let students = count(conn, "SELECT COUNT(*) FROM students")?;
    let lessons = count(conn, "SELECT COUNT(*) FROM lessons")?;
    let topics = count(conn, "SELECT COUNT(*) FROM topics")?;
    // Students without progress rows count as 0%.
    let avg_progress: Option<f64> = conn.query_row(
        "SELECT AVG(COALESCE(lp.p, 0)) FROM students s
         LEFT JOIN (SELECT student_id, AVG(percent) AS p FROM lesson_progress GROUP BY student_id) lp
           ON lp.student_id = s.id",
        [],
        |r| r.get(0),
    )?;

    let this_month = today().format("%Y-%m").to_string();
    let (first, last) =
        month_bounds(&this_month).map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    let meetings_this_month: i64 = conn.query_row(
        "SELECT COUNT(*) FROM meetings WHERE meeting_date BETWEEN ? AND ?",
        [iso(first), iso(last)],
        |r| r.get(0),
    )?;
    let upcoming_days = state.config.activities.upcoming_days;

    Ok(json!({
        "studentCount": students,
        "lessonCount": lessons,
        "topicCount": topics,
        "averageProgress": round2(avg_progress.unwrap_or(0.0)),
        "month": this_month,
        "meetingsThisMonth": meetings_this_month,
        "upcomingDays": upcoming_days,
        "upcomingActivities": upcoming(conn, upcoming_days)?,
    }))
}

#[derive(Default)]
struct ClassRow {
    students: i64,
    meetings: i64,
}

fn date_param(req: &Request, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match opt_str(req, key)? {
        Some(raw) => parse_date(&raw)
            .map(Some)
            .map_err(|e| HandlerErr::bad_params(format!("{}: {}", key, e))),
        None => Ok(None),
    }
}

fn required_range(req: &Request) -> Result<(NaiveDate, NaiveDate), HandlerErr> {
    let from = date_param(req, "from")?.ok_or_else(|| HandlerErr::bad_params("missing from"))?;
    let to = date_param(req, "to")?.ok_or_else(|| HandlerErr::bad_params("missing to"))?;
    if from > to {
        return Err(HandlerErr::bad_params("from must not be after to"));
    }
    Ok((from, to))
}

fn period(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let (from, to) = required_range(req)?;
    period_data(conn, &iso(from), &iso(to))
}

fn period_data(conn: &Connection, from: &str, to: &str) -> HandlerResult {
    let mut classes: BTreeMap<String, ClassRow> = BTreeMap::new();
    {
        let mut stmt =
            conn.prepare("SELECT class_name, COUNT(*) FROM students GROUP BY class_name")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (class_name, n) = row?;
            classes.entry(class_name).or_default().students = n;
        }
    }

    let mut by_person = KindCounts::default();
    let mut monthly: BTreeMap<String, i64> = BTreeMap::new();
    let mut by_work_area: BTreeMap<String, i64> = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT m.person, m.meeting_date, m.work_area, s.class_name
         FROM meetings m LEFT JOIN students s ON s.id = m.student_id
         WHERE m.meeting_date BETWEEN ? AND ?",
    )?;
    let rows = stmt.query_map([from, to], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, Option<String>>(2)?,
            r.get::<_, Option<String>>(3)?,
        ))
    })?;
    for row in rows {
        let (person, date, work_area, class_name) = row?;
        by_person.add(PersonKind::of(&person));
        let month = date.get(..7).unwrap_or(&date).to_string();
        *monthly.entry(month).or_insert(0) += 1;
        if let Some(area) = work_area.filter(|a| !a.trim().is_empty()) {
            *by_work_area.entry(area).or_insert(0) += 1;
        }
        if let Some(class_name) = class_name {
            classes.entry(class_name).or_default().meetings += 1;
        }
    }

    let monthly: Vec<Value> = monthly
        .into_iter()
        .map(|(month, count)| json!({ "month": month, "count": count }))
        .collect();
    let per_class: Vec<Value> = classes
        .into_iter()
        .map(|(class_name, row)| {
            json!({
                "className": class_name,
                "studentCount": row.students,
                "meetingCount": row.meetings,
            })
        })
        .collect();
    let work_areas: Vec<Value> = by_work_area
        .into_iter()
        .map(|(area, count)| json!({ "workArea": area, "count": count }))
        .collect();

    Ok(json!({
        "from": from,
        "to": to,
        "meetingsByPerson": by_person,
        "monthly": monthly,
        "classes": per_class,
        "workAreas": work_areas,
    }))
}

fn report_err(e: ReportError) -> HandlerErr {
    HandlerErr::bad_params(e.to_string())
}

fn stored_json(raw: &str) -> Result<Value, HandlerErr> {
    serde_json::from_str(raw).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn term(req: &Request) -> HandlerResult {
    let date = date_param(req, "date")?.unwrap_or_else(today);
    let t = term_of(date);
    Ok(json!({ "term": t.name, "from": iso(t.from), "to": iso(t.to) }))
}

const REPORT_COLS: &str =
    "id, title, term, kind, status, from_date, to_date, comment, created_at, updated_at";

fn report_summary(r: &Row) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "title": r.get::<_, String>(1)?,
        "term": r.get::<_, String>(2)?,
        "kind": r.get::<_, String>(3)?,
        "status": r.get::<_, String>(4)?,
        "from": r.get::<_, String>(5)?,
        "to": r.get::<_, String>(6)?,
        "comment": r.get::<_, Option<String>>(7)?,
        "createdAt": r.get::<_, String>(8)?,
        "updatedAt": r.get::<_, String>(9)?,
    }))
}

/// Computes the period report and stores it as a draft. Without a range the
/// current term's window is used.
fn reports_save(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let title = required_str(req, "title")?;
    let kind = opt_str(req, "kind")?.unwrap_or_else(|| "dönemsel".to_string());
    check_kind(&kind).map_err(report_err)?;
    let comment = opt_str(req, "comment")?;
    let (from, to, default_term) = match (date_param(req, "from")?, date_param(req, "to")?) {
        (None, None) => {
            let t = term_of(today());
            (t.from, t.to, t.name)
        }
        (Some(from), Some(to)) if from <= to => (from, to, term_of(from).name),
        (Some(_), Some(_)) => return Err(HandlerErr::bad_params("from must not be after to")),
        _ => return Err(HandlerErr::bad_params("from and to must be given together")),
    };
    let term = opt_str(req, "term")?.unwrap_or(default_term);
    let (from, to) = (iso(from), iso(to));
    let data = period_data(conn, &from, &to)?;

    let id = new_id();
    let ts = now_ts();
    conn.execute(
        "INSERT INTO activity_reports(id, title, term, kind, status, from_date, to_date,
            data_json, comment, created_at, updated_at)
         VALUES(?, ?, ?, ?, 'taslak', ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            &title,
            &term,
            &kind,
            &from,
            &to,
            data.to_string(),
            &comment,
            &ts,
            &ts
        ],
    )
    .map_err(db_err("db_insert_failed", "activity_reports"))?;
    tracing::info!(report_id = %id, %term, "activity report saved");

    Ok(json!({
        "reportId": id,
        "title": title,
        "term": term,
        "kind": kind,
        "status": "taslak",
        "from": from,
        "to": to,
        "data": data,
    }))
}

fn reports_list(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let sql = format!(
        "SELECT {} FROM activity_reports ORDER BY created_at DESC, title",
        REPORT_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let reports = stmt
        .query_map([], report_summary)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "reports": reports }))
}

fn reports_get(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let report_id = required_str(req, "reportId")?;
    let sql = format!(
        "SELECT {}, data_json FROM activity_reports WHERE id = ?",
        REPORT_COLS
    );
    let (mut report, raw) = conn
        .query_row(&sql, [&report_id], |r| {
            Ok((report_summary(r)?, r.get::<_, String>(10)?))
        })
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("report not found"))?;
    report["data"] = stored_json(&raw)?;
    Ok(json!({ "report": report }))
}

fn reports_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let report_id = required_str(req, "reportId")?;
    let title = opt_str(req, "title")?;
    let status = opt_str(req, "status")?;
    if let Some(status) = &status {
        check_status(status).map_err(report_err)?;
    }
    let comment = opt_str(req, "comment")?;
    let changed = conn
        .execute(
            "UPDATE activity_reports SET
                title = COALESCE(?, title),
                status = COALESCE(?, status),
                comment = COALESCE(?, comment),
                updated_at = ?
             WHERE id = ?",
            rusqlite::params![&title, &status, &comment, now_ts(), &report_id],
        )
        .map_err(db_err("db_update_failed", "activity_reports"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("report not found"));
    }
    Ok(json!({ "ok": true }))
}

fn reports_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let report_id = required_str(req, "reportId")?;
    let deleted = conn
        .execute("DELETE FROM activity_reports WHERE id = ?", [&report_id])
        .map_err(db_err("db_delete_failed", "activity_reports"))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("report not found"));
    }
    Ok(json!({ "ok": true }))
}

struct Filters {
    class_names: Vec<String>,
    work_areas: Vec<String>,
}

impl Filters {
    fn class_ok(&self, class_name: Option<&str>) -> bool {
        self.class_names.is_empty()
            || class_name.map_or(false, |c| self.class_names.iter().any(|f| f == c))
    }

    fn area_ok(&self, work_area: Option<&str>) -> bool {
        self.work_areas.is_empty()
            || work_area.map_or(false, |a| self.work_areas.iter().any(|f| f == a))
    }

    fn to_json(&self) -> Value {
        json!({ "classNames": self.class_names, "workAreas": self.work_areas })
    }
}

struct MeetingRow {
    person: String,
    work_area: Option<String>,
    class_name: Option<String>,
}

/// Meetings in the range that pass both filters. A class filter drops
/// meetings without a student.
fn filtered_meetings(
    conn: &Connection,
    from: &str,
    to: &str,
    filters: &Filters,
) -> Result<Vec<MeetingRow>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT m.person, m.work_area, s.class_name
         FROM meetings m LEFT JOIN students s ON s.id = m.student_id
         WHERE m.meeting_date BETWEEN ? AND ?",
    )?;
    let rows = stmt
        .query_map([from, to], |r| {
            Ok(MeetingRow {
                person: r.get(0)?,
                work_area: r.get::<_, Option<String>>(1)?.filter(|a| !a.trim().is_empty()),
                class_name: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter(|m| {
            filters.class_ok(m.class_name.as_deref()) && filters.area_ok(m.work_area.as_deref())
        })
        .collect())
}

fn analysis_data(meetings: &[MeetingRow]) -> Value {
    let mut by_person = KindCounts::default();
    let mut areas: BTreeMap<&str, i64> = BTreeMap::new();
    for m in meetings {
        by_person.add(PersonKind::of(&m.person));
        if let Some(area) = &m.work_area {
            *areas.entry(area.as_str()).or_insert(0) += 1;
        }
    }
    let areas: Vec<Value> = areas
        .into_iter()
        .map(|(area, count)| json!({ "workArea": area, "count": count }))
        .collect();
    json!({
        "totalMeetings": meetings.len(),
        "meetingsByPerson": by_person,
        "workAreas": areas,
    })
}

fn comparison_data(
    conn: &Connection,
    from: &str,
    to: &str,
    filters: &Filters,
    meetings: &[MeetingRow],
) -> HandlerResult {
    let mut stmt = conn.prepare(
        "SELECT s.class_name, COUNT(*),
            (SELECT AVG(e.score_tyt) FROM exam_results e JOIN students s2 ON s2.id = e.student_id
             WHERE s2.class_name = s.class_name AND e.exam_date BETWEEN ?1 AND ?2)
         FROM students s WHERE TRIM(s.class_name) <> ''
         GROUP BY s.class_name ORDER BY s.class_name",
    )?;
    let rows = stmt
        .query_map([from, to], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, Option<f64>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let groups: Vec<Value> = rows
        .into_iter()
        .filter(|(class_name, _, _)| filters.class_ok(Some(class_name.as_str())))
        .map(|(class_name, students, avg_tyt)| {
            let meeting_count = meetings
                .iter()
                .filter(|m| m.class_name.as_deref() == Some(class_name.as_str()))
                .count();
            json!({
                "className": class_name,
                "studentCount": students,
                "meetingCount": meeting_count,
                "averageTytScore": round2(avg_tyt.unwrap_or(0.0)),
            })
        })
        .collect();
    Ok(json!({ "groups": groups }))
}

fn performance_data(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
    filters: &Filters,
    meetings: &[MeetingRow],
) -> HandlerResult {
    let (prev_from, prev_to) = previous_window(from, to);
    let previous = filtered_meetings(conn, &iso(prev_from), &iso(prev_to), filters)?.len() as i64;

    let mut students = 0i64;
    let mut completed_surveys = 0i64;
    {
        let mut stmt = conn.prepare(
            "SELECT s.class_name,
                (SELECT COUNT(*) FROM survey_assignments a
                 WHERE a.student_id = s.id AND a.completed = 1
                   AND substr(a.completed_at, 1, 10) BETWEEN ?1 AND ?2)
             FROM students s",
        )?;
        let rows = stmt.query_map([iso(from), iso(to)], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (class_name, completed) = row?;
            if filters.class_ok(Some(class_name.as_str())) {
                students += 1;
                completed_surveys += completed;
            }
        }
    }

    let total = meetings.len() as i64;
    let p = performance(from, to, total, previous, students);
    Ok(json!({
        "totalMeetings": total,
        "completedSurveys": completed_surveys,
        "studentCount": students,
        "days": p.days,
        "weeks": p.weeks,
        "meetingsPerDay": p.per_day,
        "meetingsPerWeek": p.per_week,
        "meetingsPerStudent": p.per_student,
        "previousMeetings": previous,
        "previousFrom": iso(prev_from),
        "previousTo": iso(prev_to),
        "changePercent": p.change_percent,
    }))
}

fn statistics(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let kind = StatisticsKind::parse(&required_str(req, "kind")?).map_err(report_err)?;
    let (from, to) = required_range(req)?;
    let filters = Filters {
        class_names: string_array(req, "classNames")?,
        work_areas: string_array(req, "workAreas")?,
    };
    let (from_s, to_s) = (iso(from), iso(to));
    let meetings = filtered_meetings(conn, &from_s, &to_s, &filters)?;
    let data = match kind {
        StatisticsKind::Analysis => analysis_data(&meetings),
        StatisticsKind::Comparison => comparison_data(conn, &from_s, &to_s, &filters, &meetings)?,
        StatisticsKind::Performance => performance_data(conn, from, to, &filters, &meetings)?,
    };
    let title = format!("{} Raporu ({} - {})", kind.title(), dotted(from), dotted(to));
    let filters = filters.to_json();

    let id = new_id();
    conn.execute(
        "INSERT INTO statistics_reports(id, title, kind, from_date, to_date, filters_json,
            data_json, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            &title,
            kind.as_str(),
            &from_s,
            &to_s,
            filters.to_string(),
            data.to_string(),
            now_ts()
        ],
    )
    .map_err(db_err("db_insert_failed", "statistics_reports"))?;

    Ok(json!({
        "reportId": id,
        "title": title,
        "kind": kind.as_str(),
        "from": from_s,
        "to": to_s,
        "filters": filters,
        "data": data,
    }))
}

fn statistics_row(r: &Row) -> rusqlite::Result<(Value, String, String)> {
    Ok((
        json!({
            "id": r.get::<_, String>(0)?,
            "title": r.get::<_, String>(1)?,
            "kind": r.get::<_, String>(2)?,
            "from": r.get::<_, String>(3)?,
            "to": r.get::<_, String>(4)?,
            "createdAt": r.get::<_, String>(7)?,
        }),
        r.get(5)?,
        r.get(6)?,
    ))
}

const STATISTICS_COLS: &str = "id, title, kind, from_date, to_date, filters_json, data_json, created_at";

fn statistics_list(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let sql = format!(
        "SELECT {} FROM statistics_reports ORDER BY created_at DESC, title",
        STATISTICS_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], statistics_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let reports: Vec<Value> = rows.into_iter().map(|(summary, _, _)| summary).collect();
    Ok(json!({ "reports": reports }))
}

fn statistics_get(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let report_id = required_str(req, "reportId")?;
    let sql = format!("SELECT {} FROM statistics_reports WHERE id = ?", STATISTICS_COLS);
    let (mut report, filters, data) = conn
        .query_row(&sql, [&report_id], statistics_row)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("report not found"))?;
    report["filters"] = stored_json(&filters)?;
    report["data"] = stored_json(&data)?;
    Ok(json!({ "report": report }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "reports.dashboard" => dashboard(state),
        "reports.period" => period(state, req),
        "reports.term" => term(req),
        "reports.save" => reports_save(state, req),
        "reports.list" => reports_list(state),
        "reports.get" => reports_get(state, req),
        "reports.update" => reports_update(state, req),
        "reports.delete" => reports_delete(state, req),
        "reports.statistics" => statistics(state, req),
        "reports.statistics.list" => statistics_list(state),
        "reports.statistics.get" => statistics_get(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
