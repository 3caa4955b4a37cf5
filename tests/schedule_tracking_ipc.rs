mod test_support;

use chrono::{Duration, Local};
use serde_json::json;
use test_support::{
    create_student, open_workspace, request_err, request_ok, spawn_sidecar, str_field,
};

#[test]
fn schedule_entries_update_delete_and_clear() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "rehber-schedule-edit");
    let chemistry = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "lessons.create",
        json!({ "name": "Kimya" }),
    );
    let biology = request_ok(
        &mut stdin,
        &mut reader,
        "l2",
        "lessons.create",
        json!({ "name": "Biyoloji" }),
    );
    let chemistry_id = str_field(&chemistry, "lessonId");
    let student = create_student(&mut stdin, &mut reader, "501", "10-C");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "schedule.create",
        json!({ "studentId": student, "lessonId": chemistry_id, "day": 1, "start": "09:00", "end": "10:00" }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "schedule.create",
        json!({
            "studentId": student,
            "lessonId": str_field(&biology, "lessonId"),
            "day": 1,
            "start": "10:00",
            "end": "11:00",
        }),
    );
    let first_id = str_field(&first, "entryId");
    let second_id = str_field(&second, "entryId");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "u1",
        "schedule.update",
        json!({ "entryId": second_id, "start": "09:30" }),
    );
    assert_eq!(code, "conflict");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "u2",
        "schedule.update",
        json!({ "entryId": second_id, "day": 9 }),
    );
    assert_eq!(code, "bad_params");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u3",
        "schedule.update",
        json!({
            "entryId": second_id,
            "lessonId": chemistry_id,
            "day": 2,
            "start": "09:30",
            "end": "10:15",
        }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l3",
        "schedule.list",
        json!({ "studentId": student }),
    );
    let entries = listed["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["id"], json!(first_id));
    assert_eq!(entries[1]["day"], json!(2));
    assert_eq!(entries[1]["dayName"], json!("Çarşamba"));
    assert_eq!(entries[1]["start"], json!("09:30"));
    assert_eq!(entries[1]["durationMinutes"], json!(45));
    assert_eq!(entries[1]["lessonName"], json!("Kimya"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "schedule.delete",
        json!({ "entryId": first_id }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "d2",
        "schedule.delete",
        json!({ "entryId": first_id }),
    );
    assert_eq!(code, "not_found");

    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "schedule.clear",
        json!({ "studentId": student }),
    );
    assert_eq!(cleared["deleted"], json!(1));
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "l4",
        "schedule.list",
        json!({ "studentId": student }),
    );
    assert_eq!(empty["entries"], json!([]));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn auto_create_rejects_unusable_durations_and_short_ranges() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "rehber-autocreate-bounds");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "lessons.create",
        json!({ "name": "Geometri" }),
    );
    let student = create_student(&mut stdin, &mut reader, "502", "10-C");

    let cases = [
        json!({ "lessonMinutes": i64::MAX, "breakMinutes": 1 }),
        json!({ "lessonMinutes": 40, "breakMinutes": i64::MAX }),
        json!({ "lessonMinutes": 0, "breakMinutes": 10 }),
        json!({ "lessonMinutes": 1441, "breakMinutes": 0 }),
        json!({ "lessonMinutes": 40, "breakMinutes": -5 }),
    ];
    for (i, durations) in cases.iter().enumerate() {
        let mut params = json!({
            "studentId": student,
            "days": [0],
            "start": "09:00",
            "end": "10:00",
        });
        params["lessonMinutes"] = durations["lessonMinutes"].clone();
        params["breakMinutes"] = durations["breakMinutes"].clone();
        let code = request_err(
            &mut stdin,
            &mut reader,
            &format!("bad{}", i),
            "schedule.autoCreate",
            params,
        );
        assert_eq!(code, "bad_params", "durations {}", durations);
    }

    let code = request_err(
        &mut stdin,
        &mut reader,
        "short",
        "schedule.autoCreate",
        json!({ "studentId": student, "days": [0], "start": "09:00", "end": "09:30" }),
    );
    assert_eq!(code, "bad_params");

    let health = request_ok(&mut stdin, &mut reader, "h", "health", json!({}));
    assert!(health["version"].is_string());
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l2",
        "schedule.list",
        json!({ "studentId": student }),
    );
    assert_eq!(listed["entries"], json!([]));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn tracking_edits_recompute_progress_and_stamp_completion() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "rehber-tracking");
    let history = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "lessons.create",
        json!({ "name": "Tarih" }),
    );
    let history_id = str_field(&history, "lessonId");
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "topics.importText",
        json!({ "lessonId": history_id, "text": "Osmanlı - 60\nCumhuriyet - 60\n" }),
    );
    assert_eq!(imported["imported"], json!(2));
    let topics = request_ok(
        &mut stdin,
        &mut reader,
        "t2",
        "topics.list",
        json!({ "lessonId": history_id }),
    );
    let ottoman = str_field(&topics["topics"][0], "id");
    let republic = str_field(&topics["topics"][1], "id");
    let student = create_student(&mut stdin, &mut reader, "601", "11-C");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "tr1",
        "tracking.create",
        json!({ "studentId": student, "topicId": ottoman }),
    );
    assert_eq!(created["lessonPercent"], json!(0.0));
    let tracking_id = str_field(&created, "trackingId");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "tr2",
        "tracking.update",
        json!({
            "trackingId": tracking_id,
            "completed": true,
            "solvedQuestions": 10,
            "correctQuestions": 7,
        }),
    );
    assert_eq!(updated["lessonPercent"], json!(50.0));
    let code = request_err(
        &mut stdin,
        &mut reader,
        "tr3",
        "tracking.update",
        json!({ "trackingId": tracking_id, "correctQuestions": 11 }),
    );
    assert_eq!(code, "bad_params");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "tl1",
        "tracking.list",
        json!({ "studentId": student }),
    );
    let item = &listed["items"][0];
    assert_eq!(item["correctRatio"], json!(70.0));
    assert!(item["lastStudiedAt"].is_string());

    let bulk = request_ok(
        &mut stdin,
        &mut reader,
        "b1",
        "tracking.bulkUpdate",
        json!({ "studentId": student, "items": [{ "topicId": republic, "completed": true }] }),
    );
    assert_eq!(bulk["updated"], json!(1));
    assert_eq!(bulk["lessonsRecomputed"], json!(1));
    let code = request_err(
        &mut stdin,
        &mut reader,
        "b2",
        "tracking.bulkUpdate",
        json!({ "studentId": student, "items": [{ "topicId": republic }] }),
    );
    assert_eq!(code, "bad_params");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "tl2",
        "tracking.list",
        json!({ "studentId": student, "lessonId": history_id }),
    );
    let items = listed["items"].as_array().expect("items");
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|it| it["lastStudiedAt"].is_string()));
    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "progress.list",
        json!({ "studentId": student }),
    );
    assert_eq!(progress["progress"][0]["percent"], json!(100.0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "td1",
        "tracking.delete",
        json!({ "trackingId": tracking_id }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "td2",
        "tracking.delete",
        json!({ "trackingId": tracking_id }),
    );
    assert_eq!(code, "not_found");
    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "progress.list",
        json!({ "studentId": student }),
    );
    assert_eq!(progress["progress"][0]["percent"], json!(50.0));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn completion_refresh_reports_the_latest_end_date() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "rehber-refresh");
    let student = create_student(&mut stdin, &mut reader, "701", "12-B");

    let nothing = request_ok(
        &mut stdin,
        &mut reader,
        "r0",
        "completion.refresh",
        json!({ "studentId": student }),
    );
    assert_eq!(nothing["lessons"], json!([]));
    assert!(nothing["latestEndDate"].is_null());

    // One hour a week each: 60 minutes left ends in a week, 120 in two.
    for (i, (name, topics, day)) in [("Felsefe", "Mantık - 60\n", 0), ("Coğrafya", "İklim - 120\n", 1)]
        .iter()
        .enumerate()
    {
        let lesson = request_ok(
            &mut stdin,
            &mut reader,
            &format!("l{}", i),
            "lessons.create",
            json!({ "name": name }),
        );
        let lesson_id = str_field(&lesson, "lessonId");
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("t{}", i),
            "topics.importText",
            json!({ "lessonId": lesson_id, "text": topics }),
        );
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "schedule.create",
            json!({ "studentId": student, "lessonId": lesson_id, "day": day, "start": "17:00", "end": "18:00" }),
        );
    }

    let refreshed = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "completion.refresh",
        json!({ "studentId": student }),
    );
    assert_eq!(refreshed["lessons"].as_array().map(Vec::len), Some(2));
    let expected = (Local::now().date_naive() + Duration::days(14))
        .format("%Y-%m-%d")
        .to_string();
    assert_eq!(refreshed["latestEndDate"], json!(expected));

    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "progress.list",
        json!({ "studentId": student }),
    );
    let rows = progress["progress"].as_array().expect("progress");
    assert!(rows.iter().all(|r| r["estimatedEndDate"].is_string()));

    let _ = std::fs::remove_dir_all(workspace);
}
