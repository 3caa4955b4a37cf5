use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

pub type HandlerResult = Result<Value, HandlerErr>;

/// Maps a storage error to the given code, turning constraint violations into `conflict`.
pub fn db_err(code: &'static str, table: &'static str) -> impl FnOnce(rusqlite::Error) -> HandlerErr {
    move |e| {
        let code = if is_constraint_violation(&e) {
            "conflict"
        } else {
            code
        };
        HandlerErr::new(code, e.to_string()).with_details(json!({ "table": table }))
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn respond(req: &Request, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

pub fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn opt_str(req: &Request, key: &str) -> Result<Option<String>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string or null", key)))?
                .trim()
                .to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

pub fn opt_i64(req: &Request, key: &str) -> Result<Option<i64>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer or null", key))),
    }
}

pub fn opt_f64(req: &Request, key: &str) -> Result<Option<f64>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be number or null", key))),
    }
}

pub fn parse_bool(req: &Request, key: &str, default: bool) -> Result<bool, HandlerErr> {
    match req.params.get(key) {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn non_negative(req: &Request, key: &str) -> Result<Option<i64>, HandlerErr> {
    match opt_i64(req, key)? {
        Some(v) if v < 0 => Err(HandlerErr::bad_params(format!("{} must not be negative", key))),
        other => Ok(other),
    }
}

pub fn string_array(req: &Request, key: &str) -> Result<Vec<String>, HandlerErr> {
    match req.params.get(key) {
        None => Ok(Vec::new()),
        Some(v) if v.is_null() => Ok(Vec::new()),
        Some(v) => {
            let arr = v
                .as_array()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be array of strings", key)))?;
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                let s = item
                    .as_str()
                    .ok_or_else(|| {
                        HandlerErr::bad_params(format!("{} must be array of strings", key))
                    })?
                    .trim()
                    .to_string();
                if !s.is_empty() && !out.contains(&s) {
                    out.push(s);
                }
            }
            Ok(out)
        }
    }
}

/// `table` is always a compile-time table name, never user input.
pub fn ensure_exists(
    conn: &Connection,
    table: &'static str,
    id: &str,
    what: &str,
) -> Result<(), HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ? LIMIT 1", table);
    let exists = conn
        .query_row(&sql, [id], |_r| Ok(()))
        .optional()?;
    if exists.is_some() {
        Ok(())
    } else {
        Err(HandlerErr::not_found(format!("{} not found", what)))
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
