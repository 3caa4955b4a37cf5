mod test_support;

use serde_json::{json, Value};
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{create_student, open_workspace, request_err, request_ok, spawn_sidecar, str_field};

#[test]
fn meeting_log_derives_categories_and_renumbers_sessions() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "rehber-meetings");
    let student = create_student(&mut stdin, &mut reader, "801", "9-C");

    let march = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "meetings.create",
        json!({
            "studentId": student,
            "date": "2024-03-10",
            "startTime": "10:00",
            "endTime": "10:40",
            "topic": "İB - Sınav kaygısı",
            "method": "Yüz yüze",
        }),
    );
    assert_eq!(march["ordinal"], json!(1));
    let march_id = str_field(&march, "meetingId");

    let february = request_ok(
        &mut stdin,
        &mut reader,
        "m2",
        "meetings.create",
        json!({
            "studentId": student,
            "date": "01.02.2024",
            "startTime": "09:00",
            "endTime": "09:30",
            "topic": "ÖOVMb - Meslek tanıtımı",
        }),
    );
    assert_eq!(february["ordinal"], json!(1));
    let february_id = str_field(&february, "meetingId");

    let parent = request_ok(
        &mut stdin,
        &mut reader,
        "m3",
        "meetings.create",
        json!({
            "date": "2024-03-15",
            "startTime": "14:00",
            "endTime": "14:20",
            "topic": "DMVG - Veli görüşmesi",
        }),
    );
    let parent_id = str_field(&parent, "meetingId");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "m4",
        "meetings.create",
        json!({ "startTime": "11:00", "endTime": "10:00", "topic": "İB - Deneme" }),
    );
    assert_eq!(code, "bad_params");

    let march_list = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "meetings.list",
        json!({ "month": "2024-03" }),
    );
    let meetings = march_list["meetings"].as_array().expect("meetings");
    assert_eq!(meetings.len(), 2);
    assert_eq!(meetings[0]["id"], json!(parent_id));
    assert_eq!(meetings[1]["ordinal"], json!(2), "earlier february session shifts march");
    assert_eq!(meetings[1]["workCategory"], json!("İB - Bireysel Psikolojik Danışma"));

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "meetings.get",
        json!({ "meetingId": parent_id }),
    );
    assert_eq!(got["meeting"]["person"], json!("Veli"));
    assert_eq!(got["meeting"]["workArea"], json!("DMV - Veliye Yönelik"));
    assert!(got["meeting"]["studentId"].is_null());

    let counted = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "meetings.countInRange",
        json!({ "from": "2024-01-01", "to": "2024-02-29" }),
    );
    assert_eq!(counted["count"], json!(1));
    let code = request_err(
        &mut stdin,
        &mut reader,
        "c2",
        "meetings.countInRange",
        json!({ "from": "2024-05-01", "to": "2024-01-01" }),
    );
    assert_eq!(code, "bad_params");

    let on_date = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "meetings.onDate",
        json!({ "date": "2024-03-10" }),
    );
    assert_eq!(on_date["meetings"][0]["id"], json!(march_id));

    let exported = request_ok(&mut stdin, &mut reader, "x1", "meetings.exportMebbis", json!({}));
    assert_eq!(exported["exported"], json!(3));
    assert_eq!(exported["meetings"][0]["id"], json!(february_id));
    let nothing = request_ok(&mut stdin, &mut reader, "x2", "meetings.exportMebbis", json!({}));
    assert_eq!(nothing["exported"], json!(0));
    assert_eq!(nothing["message"], json!("nothing to export"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "meetings.delete",
        json!({ "meetingId": february_id }),
    );
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "meetings.get",
        json!({ "meetingId": march_id }),
    );
    assert_eq!(got["meeting"]["ordinal"], json!(1));
    assert_eq!(got["meeting"]["exported"], json!(true));

    let renumbered = request_ok(&mut stdin, &mut reader, "rn", "meetings.renumber", json!({}));
    assert_eq!(renumbered["updated"], json!(0));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn categorize_previews_without_a_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "cat",
        "meetings.categorize",
        json!({ "topic": "DMÖG - Öğretmen görüşmesi", "method": "Telefon" }),
    );
    assert_eq!(preview["personRole"], json!("Öğretmen"));
    assert_eq!(preview["serviceType"], json!("D - Destek Hizmetler"));
    assert_eq!(preview["method"], json!("Telefon"));
}

#[test]
fn updating_a_meeting_date_or_student_renumbers_sessions() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "rehber-meeting-update");
    let ayse = create_student(&mut stdin, &mut reader, "811", "10-B");
    let mehmet = create_student(&mut stdin, &mut reader, "812", "10-B");

    let mut ids = Vec::new();
    for (i, date) in ["2024-03-01", "2024-03-20"].iter().enumerate() {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{}", i),
            "meetings.create",
            json!({
                "studentId": ayse,
                "date": date,
                "startTime": "11:00",
                "endTime": "11:30",
                "topic": "İB - Ders çalışma alışkanlığı",
            }),
        );
        assert_eq!(created["ordinal"], json!(i + 1));
        ids.push(str_field(&created, "meetingId"));
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "meetings.update",
        json!({ "meetingId": ids[1], "date": "15.02.2024", "summary": "Plan yapıldı" }),
    );
    assert_eq!(ordinal_of(&mut stdin, &mut reader, "g1", &ids[1]), json!(1));
    assert_eq!(ordinal_of(&mut stdin, &mut reader, "g2", &ids[0]), json!(2));
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "g3",
        "meetings.get",
        json!({ "meetingId": ids[1] }),
    );
    assert_eq!(got["meeting"]["date"], json!("2024-02-15"));
    assert_eq!(got["meeting"]["summary"], json!("Plan yapıldı"));
    assert_eq!(got["meeting"]["topic"], json!("İB - Ders çalışma alışkanlığı"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "u2",
        "meetings.update",
        json!({ "meetingId": ids[0], "startTime": "12:00" }),
    );
    assert_eq!(code, "bad_params", "start after the stored end time");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "u3",
        "meetings.update",
        json!({ "meetingId": "missing", "topic": "x" }),
    );
    assert_eq!(code, "not_found");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u4",
        "meetings.update",
        json!({ "meetingId": ids[1], "studentId": mehmet }),
    );
    assert_eq!(ordinal_of(&mut stdin, &mut reader, "g4", &ids[0]), json!(1));
    assert_eq!(ordinal_of(&mut stdin, &mut reader, "g5", &ids[1]), json!(1));

    let _ = std::fs::remove_dir_all(workspace);
}

fn ordinal_of(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    tag: &str,
    meeting_id: &str,
) -> Value {
    let got = request_ok(stdin, reader, tag, "meetings.get", json!({ "meetingId": meeting_id }));
    got["meeting"]["ordinal"].clone()
}
