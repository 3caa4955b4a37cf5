use crate::ipc::handlers::exams::load_exam_records;
use crate::ipc::handlers::tracking::{overall_progress, weekly_minutes};
use crate::ipc::helpers::{
    db_conn, db_err, ensure_exists, new_id, now_ts, opt_i64, opt_str, required_str, respond,
    round2, today, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::risk::{self, ModelKind, RiskError, StudentFeatures, TrainingSet};
use crate::sentiment::{self, Mode};
use crate::timefmt::iso;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

impl From<RiskError> for HandlerErr {
    fn from(e: RiskError) -> Self {
        match e {
            RiskError::UnknownKind(_)
            | RiskError::NotEnoughStudents { .. }
            | RiskError::SingleClass => HandlerErr::bad_params(e.to_string()),
            RiskError::BadTrainingData(_) | RiskError::Fit(_) => {
                HandlerErr::new("model_failed", e.to_string())
            }
        }
    }
}

fn encode_err(e: serde_json::Error) -> HandlerErr {
    HandlerErr::new("model_failed", e.to_string())
}

/// Aggregates the stored data of one student into model features.
fn student_features(conn: &Connection, student_id: &str) -> Result<StudentFeatures, HandlerErr> {
    let totals: Vec<f64> = load_exam_records(conn, student_id)?
        .iter()
        .map(|rec| rec.nets.total())
        .collect();
    let avg_net = if totals.is_empty() {
        0.0
    } else {
        totals.iter().sum::<f64>() / totals.len() as f64
    };
    let (assigned, completed): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(completed), 0) FROM survey_assignments WHERE student_id = ?",
        [student_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    Ok(StudentFeatures {
        avg_net,
        progress: overall_progress(conn, student_id)?,
        trend: risk::exam_trend(&totals),
        weekly_hours: weekly_minutes(conn, student_id, None)? as f64 / 60.0,
        survey_completion: risk::survey_completion(assigned.max(0) as usize, completed.max(0) as usize),
    })
}

fn features_json(f: &StudentFeatures) -> Value {
    json!({
        "avgNet": round2(f.avg_net),
        "progress": round2(f.progress),
        "trend": round2(f.trend),
        "weeklyHours": round2(f.weekly_hours),
        "surveyCompletion": round2(f.survey_completion),
    })
}

fn models_train(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let kind = ModelKind::parse(&required_str(req, "kind")?)?;
    let class_name = opt_str(req, "className")?;
    let name = opt_str(req, "name")?
        .unwrap_or_else(|| format!("{} model {}", kind.as_str(), iso(today())));

    let student_ids: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT id FROM students WHERE (?1 IS NULL OR class_name = ?1) ORDER BY number",
        )?;
        let ids = stmt
            .query_map([&class_name], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    let samples = student_ids
        .iter()
        .map(|sid| student_features(conn, sid))
        .collect::<Result<Vec<_>, _>>()?;

    let risk_cfg = &state.config.risk;
    let (set, report) = risk::train(
        kind,
        &samples,
        risk_cfg.min_training_students,
        risk_cfg.test_ratio,
    )?;

    let id = new_id();
    let description = match class_name.as_deref() {
        Some(c) => format!("{} students of class {}", report.sample_count, c),
        None => format!("{} students", report.sample_count),
    };
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "risk_models"))?;
    tx.execute("UPDATE risk_models SET active = 0", [])
        .map_err(db_err("db_update_failed", "risk_models"))?;
    tx.execute(
        "INSERT INTO risk_models(id, name, kind, description, features_json, training_json,
            train_accuracy, test_accuracy, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        rusqlite::params![
            &id,
            &name,
            kind.as_str(),
            &description,
            serde_json::to_string(kind.feature_names()).map_err(encode_err)?,
            serde_json::to_string(&set).map_err(encode_err)?,
            report.train_accuracy,
            report.test_accuracy,
            now_ts(),
        ],
    )
    .map_err(db_err("db_insert_failed", "risk_models"))?;
    tx.commit()
        .map_err(db_err("db_commit_failed", "risk_models"))?;

    tracing::info!(
        model_id = %id,
        kind = kind.as_str(),
        samples = report.sample_count,
        train_accuracy = report.train_accuracy,
        "risk model trained"
    );
    Ok(json!({
        "modelId": id,
        "name": name,
        "kind": kind.as_str(),
        "features": kind.feature_names(),
        "report": report,
    }))
}

fn models_list(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let mut stmt = conn.prepare(
        "SELECT id, name, kind, description, features_json, train_accuracy, test_accuracy,
                active, created_at
         FROM risk_models ORDER BY created_at DESC, name",
    )?;
    let models = stmt
        .query_map([], |r| {
            let features: String = r.get(4)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "kind": r.get::<_, String>(2)?,
                "description": r.get::<_, String>(3)?,
                "features": serde_json::from_str::<Value>(&features).unwrap_or(Value::Null),
                "trainAccuracy": r.get::<_, f64>(5)?,
                "testAccuracy": r.get::<_, Option<f64>>(6)?,
                "active": r.get::<_, i64>(7)? != 0,
                "createdAt": r.get::<_, String>(8)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "models": models }))
}

fn models_activate(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let model_id = required_str(req, "modelId")?;
    ensure_exists(conn, "risk_models", &model_id, "model")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "risk_models"))?;
    tx.execute("UPDATE risk_models SET active = (id = ?)", [&model_id])
        .map_err(db_err("db_update_failed", "risk_models"))?;
    tx.commit()
        .map_err(db_err("db_commit_failed", "risk_models"))?;
    Ok(json!({ "ok": true }))
}

fn risk_analyze(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;

    let (model_id, model_name, training_json): (String, String, String) = conn
        .query_row(
            "SELECT id, name, training_json FROM risk_models WHERE active = 1
             ORDER BY created_at DESC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("no active risk model; train one first"))?;
    let set: TrainingSet = serde_json::from_str(&training_json)
        .map_err(|e| HandlerErr::from(RiskError::BadTrainingData(e.to_string())))?;

    let features = student_features(conn, &student_id)?;
    let prediction = set.fit()?.predict(&features)?;
    let comments = risk::comments(&prediction, &features);
    let recs = risk::recommendations(prediction.at_risk);

    let analysis_id = new_id();
    let ts = now_ts();
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed", "risk_analyses"))?;
    tx.execute(
        "INSERT INTO risk_analyses(id, student_id, model_id, probability, level, features_json,
            comments_json, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &analysis_id,
            &student_id,
            &model_id,
            prediction.probability,
            prediction.level(),
            features_json(&features).to_string(),
            json!([comments]).to_string(),
            &ts,
        ],
    )
    .map_err(db_err("db_insert_failed", "risk_analyses"))?;
    let mut stored = Vec::with_capacity(recs.len());
    for rec in &recs {
        let rec_id = new_id();
        tx.execute(
            "INSERT INTO recommendations(id, analysis_id, student_id, title, description, kind,
                priority, applied, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, 0, ?)",
            (
                &rec_id,
                &analysis_id,
                &student_id,
                rec.title,
                rec.description,
                rec.kind,
                rec.priority,
                &ts,
            ),
        )
        .map_err(db_err("db_insert_failed", "recommendations"))?;
        stored.push(json!({
            "id": rec_id,
            "title": rec.title,
            "description": rec.description,
            "kind": rec.kind,
            "priority": rec.priority,
        }));
    }
    tx.commit()
        .map_err(db_err("db_commit_failed", "risk_analyses"))?;

    tracing::info!(
        %student_id,
        %model_id,
        level = prediction.level(),
        "risk analysis stored"
    );
    Ok(json!({
        "analysisId": analysis_id,
        "modelId": model_id,
        "modelName": model_name,
        "probability": round2(prediction.probability),
        "level": prediction.level(),
        "label": prediction.label(),
        "features": features_json(&features),
        "comments": comments,
        "recommendations": stored,
    }))
}

fn recommendations_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = required_str(req, "studentId")?;
    ensure_exists(conn, "students", &student_id, "student")?;
    let mut stmt = conn.prepare(
        "SELECT id, analysis_id, title, description, kind, priority, applied, applied_at,
                result_note, created_at
         FROM recommendations WHERE student_id = ?
         ORDER BY applied, priority DESC, created_at DESC",
    )?;
    let items = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "analysisId": r.get::<_, String>(1)?,
                "title": r.get::<_, String>(2)?,
                "description": r.get::<_, String>(3)?,
                "kind": r.get::<_, String>(4)?,
                "priority": r.get::<_, i64>(5)?,
                "applied": r.get::<_, i64>(6)? != 0,
                "appliedAt": r.get::<_, Option<String>>(7)?,
                "resultNote": r.get::<_, Option<String>>(8)?,
                "createdAt": r.get::<_, String>(9)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "recommendations": items }))
}

fn recommendations_apply(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let rec_id = required_str(req, "recommendationId")?;
    let note = opt_str(req, "note")?;
    let n = conn
        .execute(
            "UPDATE recommendations SET applied = 1, applied_at = ?, result_note = ? WHERE id = ?",
            (now_ts(), &note, &rec_id),
        )
        .map_err(db_err("db_update_failed", "recommendations"))?;
    if n == 0 {
        return Err(HandlerErr::not_found("recommendation not found"));
    }
    Ok(json!({ "ok": true }))
}

fn sentiment_analyze(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let text = required_str(req, "text")?;
    let mode = match opt_str(req, "mode")? {
        Some(m) => Mode::parse(&m)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown mode: {}", m)))?,
        None => Mode::Basic,
    };
    let student_id = opt_str(req, "studentId")?;
    if let Some(sid) = student_id.as_deref() {
        ensure_exists(conn, "students", sid, "student")?;
    }

    let analysis = sentiment::analyze(&text, mode);
    let detail = serde_json::to_value(&analysis).map_err(encode_err)?;
    let id = new_id();
    conn.execute(
        "INSERT INTO sentiment_analyses(id, student_id, mode, source_text, dominant, positive,
            negative, neutral, detail_json, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            &student_id,
            mode.as_str(),
            &text,
            analysis.dominant.as_str(),
            analysis.scores.positive,
            analysis.scores.negative,
            analysis.scores.neutral,
            detail.to_string(),
            now_ts(),
        ],
    )
    .map_err(db_err("db_insert_failed", "sentiment_analyses"))?;
    tracing::debug!(analysis_id = %id, mode = mode.as_str(), "sentiment analysed");
    Ok(json!({ "analysisId": id, "analysis": detail }))
}

fn sentiment_list(state: &AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_id = opt_str(req, "studentId")?;
    let limit = opt_i64(req, "limit")?.unwrap_or(50).clamp(1, 500);
    let mut stmt = conn.prepare(
        "SELECT id, student_id, mode, source_text, dominant, positive, negative, neutral,
                detail_json, created_at
         FROM sentiment_analyses WHERE (?1 IS NULL OR student_id = ?1)
         ORDER BY created_at DESC LIMIT ?2",
    )?;
    let items = stmt
        .query_map((&student_id, limit), |r| {
            let detail: String = r.get(8)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, Option<String>>(1)?,
                "mode": r.get::<_, String>(2)?,
                "text": r.get::<_, String>(3)?,
                "dominant": r.get::<_, String>(4)?,
                "positive": r.get::<_, f64>(5)?,
                "negative": r.get::<_, f64>(6)?,
                "neutral": r.get::<_, f64>(7)?,
                "detail": serde_json::from_str::<Value>(&detail).unwrap_or(Value::Null),
                "createdAt": r.get::<_, String>(9)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "analyses": items }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "assistant.models.train" => models_train(state, req),
        "assistant.models.list" => models_list(state),
        "assistant.models.activate" => models_activate(state, req),
        "assistant.risk.analyze" => risk_analyze(state, req),
        "assistant.recommendations.list" => recommendations_list(state, req),
        "assistant.recommendations.apply" => recommendations_apply(state, req),
        "assistant.sentiment.analyze" => sentiment_analyze(state, req),
        "assistant.sentiment.list" => sentiment_list(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
