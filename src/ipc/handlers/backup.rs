use crate::backup;
use crate::db;
use crate::ipc::helpers::{required_str, respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;

fn workspace_path(state: &AppState) -> Result<PathBuf, HandlerErr> {
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn export_bundle(state: &AppState, req: &Request) -> HandlerResult {
    let out_path = required_str(req, "outPath")?;
    let workspace = workspace_path(state)?;

    if let Some(conn) = state.db.as_ref() {
        if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(FULL)") {
            tracing::warn!(error = %e, "wal checkpoint before export failed");
        }
    }

    let export = backup::export_workspace_bundle(&workspace, &PathBuf::from(&out_path))
        .map_err(|e| {
            HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": out_path }))
        })?;
    tracing::info!(path = %out_path, entries = export.entry_count, "workspace bundle exported");
    Ok(json!({
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "dbSha256": export.db_sha256,
    }))
}

fn import_bundle(state: &mut AppState, req: &Request) -> HandlerResult {
    let in_path = required_str(req, "inPath")?;
    let workspace = workspace_path(state)?;
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::not_found("bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    // The database file is replaced underneath; release the handle first.
    state.db = None;
    let imported = backup::import_workspace_bundle(&src, &workspace);
    let reopened = db::open_db(&workspace);
    let conn = reopened
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    state.db = Some(conn);

    let import = imported.map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": in_path }))
    })?;
    tracing::info!(
        path = %in_path,
        format = %import.bundle_format_detected,
        "workspace bundle imported"
    );
    Ok(json!({
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
        "dbSha256": import.db_sha256,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => export_bundle(state, req),
        "backup.importWorkspaceBundle" => import_bundle(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
