mod test_support;

use chrono::{Duration, Local};
use serde_json::json;
use test_support::{open_workspace, request_err, request_ok, spawn_sidecar, str_field};

#[test]
fn activities_total_participants_and_upcoming_window() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "rehber-activities");
    let today = Local::now().date_naive();
    let soon = (today + Duration::days(2)).format("%Y-%m-%d").to_string();
    let later = (today + Duration::days(30)).format("%Y-%m-%d").to_string();

    let catalog = request_ok(&mut stdin, &mut reader, "cat", "activities.catalog", json!({}));
    assert_eq!(catalog["activityTypes"].as_array().map(Vec::len), Some(8));
    assert_eq!(catalog["methods"].as_array().map(Vec::len), Some(7));

    let seminar = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "activities.create",
        json!({
            "date": soon,
            "method": "Sunum",
            "targetType": "Mesleki Gelişim",
            "activityType": "Seminer",
            "classInfo": "12-A, 12-B",
            "teacherCount": 2,
            "parentCount": 5,
            "maleCount": 20,
            "femaleCount": 22,
            "officialLetterCount": 1,
        }),
    );
    assert_eq!(seminar["totalStudents"], json!(42));
    assert_eq!(seminar["totalParticipants"], json!(49));
    let seminar_id = str_field(&seminar, "activityId");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a2",
        "activities.create",
        json!({
            "date": later,
            "method": "Atölye",
            "targetType": "Diğer",
            "activityType": "Atölye Çalışması",
        }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "a3",
        "activities.create",
        json!({
            "date": soon,
            "method": "Sunum",
            "targetType": "Diğer",
            "activityType": "Seminer",
            "maleCount": -1,
        }),
    );
    assert_eq!(code, "bad_params");

    let upcoming = request_ok(&mut stdin, &mut reader, "u1", "activities.upcoming", json!({}));
    assert_eq!(upcoming["days"], json!(7));
    let listed = upcoming["activities"].as_array().expect("activities");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], json!(seminar_id));

    let wide = request_ok(
        &mut stdin,
        &mut reader,
        "u2",
        "activities.upcoming",
        json!({ "days": 60 }),
    );
    assert_eq!(wide["activities"].as_array().map(Vec::len), Some(2));
    let code = request_err(
        &mut stdin,
        &mut reader,
        "u3",
        "activities.upcoming",
        json!({ "days": -1 }),
    );
    assert_eq!(code, "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "up",
        "activities.update",
        json!({ "activityId": seminar_id, "otherCount": 3 }),
    );
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "activities.get",
        json!({ "activityId": seminar_id }),
    );
    assert_eq!(got["activity"]["totalParticipants"], json!(52));
    assert_eq!(got["activity"]["maleCount"], json!(20));
    assert_eq!(got["activity"]["classInfo"], json!("12-A, 12-B"));

    let counted = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "activities.countInRange",
        json!({ "from": soon, "to": soon }),
    );
    assert_eq!(counted["count"], json!(1));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "activities.delete",
        json!({ "activityId": seminar_id }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "d2",
        "activities.delete",
        json!({ "activityId": seminar_id }),
    );
    assert_eq!(code, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn school_parameters_lesson_hours_and_topic_list() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "rehber-params");

    let empty = request_ok(&mut stdin, &mut reader, "s0", "params.school.get", json!({}));
    assert!(empty["school"].is_null());
    let code = request_err(
        &mut stdin,
        &mut reader,
        "s1",
        "params.school.set",
        json!({ "schoolName": "Atatürk Lisesi", "province": "Ankara" }),
    );
    assert_eq!(code, "bad_params");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "params.school.set",
        json!({
            "schoolName": "Atatürk Lisesi",
            "province": "Ankara",
            "district": "Çankaya",
            "counsellorName": "Z. Yılmaz",
        }),
    );
    let school = request_ok(&mut stdin, &mut reader, "s3", "params.school.get", json!({}));
    assert_eq!(school["school"]["district"], json!("Çankaya"));

    let replaced = request_ok(
        &mut stdin,
        &mut reader,
        "h1",
        "params.lessonHours.replace",
        json!({ "text": "1,08:30,09:10\n2,09:20,10:00\n2,10:10,10:50\n3,11:00,10:40\n5,12:00,12:40,1\n" }),
    );
    assert_eq!(replaced["saved"], json!(3));
    assert_eq!(replaced["invalid"].as_array().map(Vec::len), Some(2));
    assert!(replaced["message"]
        .as_str()
        .unwrap_or_default()
        .starts_with("3 lesson hours saved; 2 invalid lines"));
    let hours = request_ok(&mut stdin, &mut reader, "h2", "params.lessonHours.list", json!({}));
    assert_eq!(hours["hours"][2]["periodNo"], json!(5));
    assert_eq!(hours["hours"][2]["lunchBreak"], json!(true));

    let lunch = request_ok(&mut stdin, &mut reader, "lb1", "params.lunchBreak.get", json!({}));
    assert_eq!(lunch["startTime"], json!("12:00"));
    let code = request_err(
        &mut stdin,
        &mut reader,
        "lb2",
        "params.lunchBreak.set",
        json!({ "startTime": "13:00", "endTime": "12:30" }),
    );
    assert_eq!(code, "bad_params");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "lb3",
        "params.lunchBreak.set",
        json!({ "startTime": "12:10", "endTime": "12:55" }),
    );
    let lunch = request_ok(&mut stdin, &mut reader, "lb4", "params.lunchBreak.get", json!({}));
    assert_eq!(lunch["endTime"], json!("12:55"));

    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "mt1",
        "params.meetingTopics.replace",
        json!({ "text": "İB - Sınav kaygısı\nDMVG - Veli görüşmesi\n\nİB - Sınav kaygısı\n" }),
    );
    assert_eq!(saved["saved"], json!(2));
    let topics = request_ok(&mut stdin, &mut reader, "mt2", "meetings.topics.list", json!({}));
    let topics = topics["topics"].as_array().expect("topics").clone();
    assert_eq!(topics.len(), 2);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "mt3",
        "params.meetingTopics.delete",
        json!({ "topicId": str_field(&topics[0], "id") }),
    );
    let left = request_ok(&mut stdin, &mut reader, "mt4", "meetings.topics.list", json!({}));
    assert_eq!(left["topics"].as_array().map(Vec::len), Some(1));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn oversized_participant_counts_are_rejected() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "rehber-activity-counts");
    let base = json!({
        "date": "2024-04-10",
        "method": "Sunum",
        "targetType": "Diğer",
        "activityType": "Seminer",
    });

    for (i, count) in [json!(i64::MAX), json!(1_000_001)].iter().enumerate() {
        let mut params = base.clone();
        params["maleCount"] = count.clone();
        params["femaleCount"] = count.clone();
        let code = request_err(
            &mut stdin,
            &mut reader,
            &format!("big{}", i),
            "activities.create",
            params,
        );
        assert_eq!(code, "bad_params", "count {}", count);
    }

    let mut params = base.clone();
    params["maleCount"] = json!(1_000_000);
    params["femaleCount"] = json!(1_000_000);
    params["teacherCount"] = json!(1_000_000);
    let created = request_ok(&mut stdin, &mut reader, "max", "activities.create", params);
    assert_eq!(created["totalStudents"], json!(2_000_000));
    assert_eq!(created["totalParticipants"], json!(3_000_000));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "u1",
        "activities.update",
        json!({ "activityId": str_field(&created, "activityId"), "parentCount": i64::MAX }),
    );
    assert_eq!(code, "bad_params");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "activities.list",
        json!({}),
    );
    let items = listed["activities"].as_array().expect("activities");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["totalParticipants"], json!(3_000_000));

    let _ = std::fs::remove_dir_all(workspace);
}
