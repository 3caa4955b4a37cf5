use crate::ipc::helpers::{
    db_conn, db_err, ensure_exists, new_id, now_ts, opt_f64, opt_str, required_str, respond,
    round2, today, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{estimate_completion, progress_percent, CompletionEstimate, ScheduleError};
use crate::timefmt::{iso, parse_hhmm};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

/// Mean of the student's lesson percentages; 0 without any progress rows.
pub(crate) fn overall_progress(conn: &Connection, student_id: &str) -> Result<f64, HandlerErr> {
    let avg: Option<f64> = conn.query_row(
        "SELECT AVG(percent) FROM lesson_progress WHERE student_id = ?",
        [student_id],
        |r| r.get(0),
    )?;
    Ok(avg.unwrap_or(0.0))
}

/// Recomputes completed/total topics for one lesson, keeping any stored end date.
pub(crate) fn recompute_lesson_progress(
    conn: &Connection,
    student_id: &str,
    lesson_id: &str,
) -> Result<f64, HandlerErr> {
    let (total, completed): (i64, i64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN tt.completed = 1 THEN 1 ELSE 0 END), 0)
         FROM topics t
         LEFT JOIN topic_tracking tt ON tt.topic_id = t.id AND tt.student_id = ?
         WHERE t.lesson_id = ?",
        [student_id, lesson_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let percent = progress_percent(completed as usize, total as usize);
    conn.execute(
        "INSERT INTO lesson_progress(id, student_id, lesson_id, completed_topics, total_topics, percent, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, lesson_id) DO UPDATE SET
            completed_topics = excluded.completed_topics,
            total_topics = excluded.total_topics,
            percent = excluded.percent,
            updated_at = excluded.updated_at",
        (new_id(), student_id, lesson_id, completed, total, percent, now_ts()),
    )
    .map_err(db_err("db_update_failed", "lesson_progress"))?;
    Ok(percent)
}

fn lesson_of_topic(conn: &Connection, topic_id: &str) -> Result<String, HandlerErr> {
    conn.query_row("SELECT lesson_id FROM topics WHERE id = ?", [topic_id], |r| {
        r.get(0)
    })
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("topic not found"))
}

fn correct_ratio(solved: i64, correct: i64) -> f64 {
    if solved > 0 {
        round2(correct as f64 / solved as f64 * 100.0)
    } else {
        0.0
    }
}

/// Reads a counter that must be a non-negative integer.
fn counter(v: Option<&Value>, key: &str) -> Result<Option<i64>, HandlerErr> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_i64() {
            Some(n) if n >= 0 => Ok(Some(n)),
            _ => Err(HandlerErr::bad_params(format!(
                "{} must be a non-negative integer",
                key
            ))),
        },
    }
}

fn check_counts(solved: i64, correct: i64) -> Result<(), HandlerErr> {
    if correct > solved {
        return Err(HandlerErr::bad_params(
            "correctQuestions cannot exceed solvedQuestions",
        ));
    }
    Ok(())
}

fn tracking_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let lesson_id = opt_str(req, "lessonId")?;
    ensure_exists(conn, "students", &student_id, "student")?;

    let mut stmt = conn.prepare(
        "SELECT tt.id, tt.topic_id, t.name, t.lesson_id, l.name, tt.completed, tt.studied_minutes,
                tt.solved_questions, tt.correct_questions, tt.last_studied_at
         FROM topic_tracking tt
         JOIN topics t ON t.id = tt.topic_id
         JOIN lessons l ON l.id = t.lesson_id
         WHERE tt.student_id = ?1 AND (?2 IS NULL OR t.lesson_id = ?2)
         ORDER BY l.name, t.sort_order",
    )?;
    let items = stmt
        .query_map((&student_id, &lesson_id), |r| {
            let solved: i64 = r.get(7)?;
            let correct: i64 = r.get(8)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "topicId": r.get::<_, String>(1)?,
                "topicName": r.get::<_, String>(2)?,
                "lessonId": r.get::<_, String>(3)?,
                "lessonName": r.get::<_, String>(4)?,
                "completed": r.get::<_, i64>(5)? != 0,
                "studiedMinutes": r.get::<_, i64>(6)?,
                "solvedQuestions": solved,
                "correctQuestions": correct,
                "correctRatio": correct_ratio(solved, correct),
                "lastStudiedAt": r.get::<_, Option<String>>(9)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "items": items }))
}

fn tracking_create(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let topic_id = required_str(req, "topicId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let lesson_id = lesson_of_topic(conn, &topic_id)?;

    let completed = req
        .params
        .get("completed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let studied = counter(req.params.get("studiedMinutes"), "studiedMinutes")?.unwrap_or(0);
    let solved = counter(req.params.get("solvedQuestions"), "solvedQuestions")?.unwrap_or(0);
    let correct = counter(req.params.get("correctQuestions"), "correctQuestions")?.unwrap_or(0);
    check_counts(solved, correct)?;

    let last_studied = (completed || studied > 0).then(now_ts);
    let id = new_id();
    conn.execute(
        "INSERT INTO topic_tracking(id, student_id, topic_id, completed, studied_minutes,
                                    solved_questions, correct_questions, last_studied_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &student_id,
            &topic_id,
            completed as i64,
            studied,
            solved,
            correct,
            last_studied,
        ),
    )
    .map_err(db_err("db_insert_failed", "topic_tracking"))?;
    let percent = recompute_lesson_progress(conn, &student_id, &lesson_id)?;
    Ok(json!({ "trackingId": id, "lessonPercent": round2(percent) }))
}

fn tracking_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let tracking_id = required_str(req, "trackingId")?;
    let current = conn
        .query_row(
            "SELECT tt.student_id, t.lesson_id, tt.completed, tt.studied_minutes,
                    tt.solved_questions, tt.correct_questions, tt.last_studied_at
             FROM topic_tracking tt JOIN topics t ON t.id = tt.topic_id
             WHERE tt.id = ?",
            [&tracking_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)? != 0,
                    r.get::<_, i64>(3)?,
                    r.get::<_, i64>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, Option<String>>(6)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("tracking entry not found"))?;
    let (student_id, lesson_id, was_completed, was_studied, was_solved, was_correct, last) =
        current;

    let completed = match req.params.get("completed") {
        None | Some(Value::Null) => was_completed,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params("completed must be boolean"))?,
    };
    let studied = counter(req.params.get("studiedMinutes"), "studiedMinutes")?.unwrap_or(was_studied);
    let solved = counter(req.params.get("solvedQuestions"), "solvedQuestions")?.unwrap_or(was_solved);
    let correct =
        counter(req.params.get("correctQuestions"), "correctQuestions")?.unwrap_or(was_correct);
    check_counts(solved, correct)?;

    let touched = (completed && !was_completed) || studied > was_studied;
    let last_studied = if touched { Some(now_ts()) } else { last };

    conn.execute(
        "UPDATE topic_tracking SET completed = ?, studied_minutes = ?, solved_questions = ?,
                correct_questions = ?, last_studied_at = ?
         WHERE id = ?",
        (
            completed as i64,
            studied,
            solved,
            correct,
            last_studied,
            &tracking_id,
        ),
    )
    .map_err(db_err("db_update_failed", "topic_tracking"))?;
    let percent = recompute_lesson_progress(conn, &student_id, &lesson_id)?;
    Ok(json!({ "ok": true, "lessonPercent": round2(percent) }))
}

fn tracking_delete(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let tracking_id = required_str(req, "trackingId")?;
    let (student_id, lesson_id): (String, String) = conn
        .query_row(
            "SELECT tt.student_id, t.lesson_id
             FROM topic_tracking tt JOIN topics t ON t.id = tt.topic_id
             WHERE tt.id = ?",
            [&tracking_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("tracking entry not found"))?;
    conn.execute("DELETE FROM topic_tracking WHERE id = ?", [&tracking_id])
        .map_err(db_err("db_delete_failed", "topic_tracking"))?;
    recompute_lesson_progress(conn, &student_id, &lesson_id)?;
    Ok(json!({ "ok": true }))
}

fn tracking_bulk_update(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let items = req
        .params
        .get("items")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("missing items"))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "topic_tracking"))?;
    let mut lessons: Vec<String> = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let topic_id = item
            .get("topicId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params(format!("items[{}].topicId missing", idx)))?;
        let completed = item
            .get("completed")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| HandlerErr::bad_params(format!("items[{}].completed missing", idx)))?;
        let solved = counter(item.get("solvedQuestions"), "solvedQuestions")?;
        let correct = counter(item.get("correctQuestions"), "correctQuestions")?;
        let lesson_id = lesson_of_topic(&tx, topic_id)?;

        let existing: Option<(String, i64, i64, Option<String>)> = tx
            .query_row(
                "SELECT id, solved_questions, correct_questions, last_studied_at
                 FROM topic_tracking WHERE student_id = ? AND topic_id = ?",
                [student_id.as_str(), topic_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;

        match existing {
            None => {
                let solved = solved.unwrap_or(0);
                let correct = correct.unwrap_or(0);
                check_counts(solved, correct)?;
                tx.execute(
                    "INSERT INTO topic_tracking(id, student_id, topic_id, completed, solved_questions,
                                                correct_questions, last_studied_at)
                     VALUES(?, ?, ?, ?, ?, ?, ?)",
                    (
                        new_id(),
                        &student_id,
                        topic_id,
                        completed as i64,
                        solved,
                        correct,
                        completed.then(now_ts),
                    ),
                )
                .map_err(db_err("db_insert_failed", "topic_tracking"))?;
            }
            Some((id, was_solved, was_correct, last)) => {
                let solved = solved.unwrap_or(was_solved);
                let correct = correct.unwrap_or(was_correct);
                check_counts(solved, correct)?;
                let last = match last {
                    Some(ts) => Some(ts),
                    None => completed.then(now_ts),
                };
                tx.execute(
                    "UPDATE topic_tracking SET completed = ?, solved_questions = ?,
                            correct_questions = ?, last_studied_at = ?
                     WHERE id = ?",
                    (completed as i64, solved, correct, last, &id),
                )
                .map_err(db_err("db_update_failed", "topic_tracking"))?;
            }
        }
        if !lessons.contains(&lesson_id) {
            lessons.push(lesson_id);
        }
    }
    for lesson_id in &lessons {
        recompute_lesson_progress(&tx, &student_id, lesson_id)?;
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "topic_tracking"))?;

    tracing::info!(%student_id, items = items.len(), "topic tracking bulk update");
    Ok(json!({ "updated": items.len(), "lessonsRecomputed": lessons.len() }))
}

fn progress_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let mut stmt = conn.prepare(
        "SELECT lp.id, lp.lesson_id, l.name, lp.completed_topics, lp.total_topics, lp.percent,
                lp.estimated_end_date, lp.updated_at
         FROM lesson_progress lp JOIN lessons l ON l.id = lp.lesson_id
         WHERE lp.student_id = ?
         ORDER BY l.name",
    )?;
    let rows = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lessonId": r.get::<_, String>(1)?,
                "lessonName": r.get::<_, String>(2)?,
                "completedTopics": r.get::<_, i64>(3)?,
                "totalTopics": r.get::<_, i64>(4)?,
                "percent": round2(r.get::<_, f64>(5)?),
                "estimatedEndDate": r.get::<_, Option<String>>(6)?,
                "updatedAt": r.get::<_, String>(7)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "progress": rows }))
}

fn progress_set(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let lesson_id = required_str(req, "lessonId")?;
    let percent = opt_f64(req, "percent")?.ok_or_else(|| HandlerErr::bad_params("missing percent"))?;
    if !(0.0..=100.0).contains(&percent) {
        return Err(HandlerErr::bad_params("percent must be between 0 and 100"));
    }
    ensure_exists(conn, "students", &student_id, "student")?;
    ensure_exists(conn, "lessons", &lesson_id, "lesson")?;

    conn.execute(
        "INSERT INTO lesson_progress(id, student_id, lesson_id, completed_topics, total_topics, percent, updated_at)
         VALUES(?, ?, ?, 0, (SELECT COUNT(*) FROM topics WHERE lesson_id = ?), ?, ?)
         ON CONFLICT(student_id, lesson_id) DO UPDATE SET
            percent = excluded.percent,
            updated_at = excluded.updated_at",
        (
            new_id(),
            &student_id,
            &lesson_id,
            &lesson_id,
            percent,
            now_ts(),
        ),
    )
    .map_err(db_err("db_update_failed", "lesson_progress"))?;
    Ok(json!({ "ok": true, "percent": percent }))
}

/// Sum of the student's scheduled minutes per lesson.
pub(crate) fn weekly_minutes(
    conn: &Connection,
    student_id: &str,
    lesson_id: Option<&str>,
) -> Result<i64, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT start_time, end_time FROM schedule_entries
         WHERE student_id = ?1 AND (?2 IS NULL OR lesson_id = ?2)",
    )?;
    let ranges = stmt
        .query_map((student_id, lesson_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut total = 0;
    for (start, end) in ranges {
        // Stored entries were validated on write; skip anything unreadable.
        if let (Ok(s), Ok(e)) = (parse_hhmm(&start), parse_hhmm(&end)) {
            total += (e - s).max(0);
        }
    }
    Ok(total)
}

fn estimate_for(
    conn: &Connection,
    student_id: &str,
    lesson_id: &str,
) -> Result<CompletionEstimate, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT t.estimated_minutes, COALESCE(tt.completed, 0)
         FROM topics t
         LEFT JOIN topic_tracking tt ON tt.topic_id = t.id AND tt.student_id = ?
         WHERE t.lesson_id = ?
         ORDER BY t.sort_order",
    )?;
    let topics = stmt
        .query_map([student_id, lesson_id], |r| {
            Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)? != 0))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let weekly = weekly_minutes(conn, student_id, Some(lesson_id))?;
    estimate_completion(today(), &topics, weekly).map_err(|e| match e {
        ScheduleError::NoTopics => HandlerErr::bad_params("lesson has no topics"),
        other => HandlerErr::bad_params(other.to_string()),
    })
}

fn estimate_json(lesson_id: &str, est: &CompletionEstimate) -> Value {
    let mut out = json!({
        "lessonId": lesson_id,
        "totalTopics": est.total_topics,
        "completedTopics": est.completed_topics,
        "percent": round2(est.percent),
        "remainingMinutes": est.remaining_minutes,
        "weeklyMinutes": est.weekly_minutes,
        "remainingWeeks": est.remaining_weeks.map(round2),
        "endDate": est.end_date.map(iso),
    });
    if est.end_date.is_none() {
        out["message"] = json!("no weekly schedule");
    }
    out
}

fn completion_estimate(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    let lesson_id = required_str(req, "lessonId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    ensure_exists(conn, "lessons", &lesson_id, "lesson")?;
    let est = estimate_for(conn, &student_id, &lesson_id)?;
    Ok(estimate_json(&lesson_id, &est))
}

fn completion_refresh(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;

    let mut stmt = conn.prepare(
        "SELECT DISTINCT lesson_id FROM schedule_entries WHERE student_id = ? ORDER BY lesson_id",
    )?;
    let lesson_ids = stmt
        .query_map([&student_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "lesson_progress"))?;
    let mut lessons = Vec::new();
    let mut latest: Option<chrono::NaiveDate> = None;
    for lesson_id in &lesson_ids {
        let est = match estimate_for(&tx, &student_id, lesson_id) {
            Ok(e) => e,
            Err(e) if e.code == "bad_params" => {
                tracing::debug!(%lesson_id, "skipping lesson without topics");
                continue;
            }
            Err(e) => return Err(e),
        };
        tx.execute(
            "INSERT INTO lesson_progress(id, student_id, lesson_id, completed_topics, total_topics,
                                         percent, estimated_end_date, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, lesson_id) DO UPDATE SET
                completed_topics = excluded.completed_topics,
                total_topics = excluded.total_topics,
                percent = excluded.percent,
                estimated_end_date = excluded.estimated_end_date,
                updated_at = excluded.updated_at",
            (
                new_id(),
                &student_id,
                lesson_id,
                est.completed_topics as i64,
                est.total_topics as i64,
                est.percent,
                est.end_date.map(iso),
                now_ts(),
            ),
        )
        .map_err(db_err("db_update_failed", "lesson_progress"))?;
        if let Some(d) = est.end_date {
            latest = Some(latest.map_or(d, |l| l.max(d)));
        }
        lessons.push(estimate_json(lesson_id, &est));
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "lesson_progress"))?;

    Ok(json!({
        "lessons": lessons,
        "latestEndDate": latest.map(iso),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "tracking.list" => tracking_list(state, req),
        "tracking.create" => tracking_create(state, req),
        "tracking.update" => tracking_update(state, req),
        "tracking.delete" => tracking_delete(state, req),
        "tracking.bulkUpdate" => tracking_bulk_update(state, req),
        "progress.list" => progress_list(state, req),
        "progress.set" => progress_set(state, req),
        "completion.estimate" => completion_estimate(state, req),
        "completion.refresh" => completion_refresh(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
