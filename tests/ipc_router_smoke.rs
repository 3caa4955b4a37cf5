mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{request, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn requests_before_workspace_select_fail_with_no_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").expect("workspacePath").is_null());

    for (i, method) in ["students.list", "lessons.list", "meetings.list", "reports.dashboard"]
        .iter()
        .enumerate()
    {
        let code = request_err(&mut stdin, &mut reader, &format!("nw{}", i), method, json!({}));
        assert_eq!(code, "no_workspace", "{}", method);
    }

    let code = request_err(&mut stdin, &mut reader, "2", "no.such.method", json!({}));
    assert_eq!(code, "not_implemented");
}

#[test]
fn unparseable_lines_get_bad_json_and_the_loop_continues() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json response");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(value["ok"], json!(false));
    assert_eq!(value["error"]["code"], json!("bad_json"));

    let health = request(&mut stdin, &mut reader, "after", "health", json!({}));
    assert_eq!(health["ok"], json!(true));
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("rehber-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(
        selected.get("workspacePath").and_then(|v| v.as_str()),
        Some(workspace.to_string_lossy().as_ref())
    );
    assert!(workspace.join("rehber.sqlite3").is_file());

    let config = request_ok(&mut stdin, &mut reader, "2", "config.get", json!({}));
    assert_eq!(config["schedule"]["lessonMinutes"], json!(45));

    let calls = [
        ("students.list", json!({})),
        ("lessons.list", json!({})),
        ("surveys.types.list", json!({})),
        ("surveys.list", json!({})),
        ("meetings.list", json!({})),
        ("meetings.topics.list", json!({})),
        ("activities.list", json!({})),
        ("activities.catalog", json!({})),
        ("params.school.get", json!({})),
        ("params.lessonHours.list", json!({})),
        ("params.lunchBreak.get", json!({})),
        ("assistant.models.list", json!({})),
        ("assistant.sentiment.list", json!({})),
        ("reports.dashboard", json!({})),
        ("reports.period", json!({ "from": "2024-01-01", "to": "2024-12-31" })),
    ];
    for (i, (method, params)) in calls.iter().enumerate() {
        let _ = request_ok(&mut stdin, &mut reader, &format!("c{}", i), method, params.clone());
    }

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_workspace_config_is_rejected_and_keeps_previous_workspace() {
    let good = temp_dir("rehber-config-good");
    let bad = temp_dir("rehber-config-bad");
    std::fs::write(
        bad.join("rehber.toml"),
        "[schedule]\nlesson_minutes = 0\n",
    )
    .expect("write config");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": good.to_string_lossy() }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": bad.to_string_lossy() }),
    );
    assert_eq!(code, "config_invalid");

    let health = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert_eq!(
        health.get("workspacePath").and_then(|v| v.as_str()),
        Some(good.to_string_lossy().as_ref())
    );

    let _ = std::fs::remove_dir_all(good);
    let _ = std::fs::remove_dir_all(bad);
}
