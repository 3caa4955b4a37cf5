use crate::config::RehberConfig;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    // A rejected config leaves the current workspace untouched.
    let config = match RehberConfig::load(&path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "workspace config rejected");
            return err(&req.id, "config_invalid", e.to_string(), None);
        }
    };

    match db::open_db(&path) {
        Ok(conn) => {
            tracing::info!(path = %path.display(), "workspace opened");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            state.config = config;
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to open workspace database");
            err(&req.id, "db_open_failed", format!("{e:#}"), None)
        }
    }
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, state.config.to_json())
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "config.get" => Some(handle_config_get(state, req)),
        _ => None,
    }
}
