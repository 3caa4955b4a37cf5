use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

const FAMILIES: &[TryHandle] = &[
    handlers::core::try_handle,
    handlers::students::try_handle,
    handlers::curriculum::try_handle,
    handlers::schedule::try_handle,
    handlers::tracking::try_handle,
    handlers::exams::try_handle,
    handlers::surveys::try_handle,
    handlers::meetings::try_handle,
    handlers::activities::try_handle,
    handlers::parameters::try_handle,
    handlers::assistant::try_handle,
    handlers::reports::try_handle,
    handlers::backup::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let span = tracing::debug_span!("request", id = %req.id, method = %req.method);
    let _guard = span.enter();

    for try_handle in FAMILIES {
        if let Some(resp) = try_handle(state, &req) {
            if resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
                let code = resp
                    .pointer("/error/code")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                tracing::debug!(code, "request failed");
            }
            return resp;
        }
    }

    tracing::warn!("unknown method");
    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
