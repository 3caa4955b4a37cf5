mod test_support;

use serde_json::json;
use test_support::{create_student, open_workspace, request_err, request_ok, spawn_sidecar, str_field};

#[test]
fn exam_report_orders_chronologically_and_reports_delta() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "rehber-exams");
    let student = create_student(&mut stdin, &mut reader, "501", "12-A");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "r0",
        "exams.report",
        json!({ "studentId": student }),
    );
    assert_eq!(code, "not_found");

    let later = request_ok(
        &mut stdin,
        &mut reader,
        "e1",
        "exams.create",
        json!({
            "studentId": student,
            "examName": "Deneme 2",
            "examDate": "2024-03-10",
            "tytTurkish": 32.5,
            "tytMath": 25.0,
            "aytMath": 20.0,
            "scoreSay": 410.0,
        }),
    );
    assert_eq!(later["tytTotal"], json!(57.5));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "e2",
        "exams.create",
        json!({
            "studentId": student,
            "examName": "Deneme 1",
            "examDate": "15.02.2024",
            "tytTurkish": 30.0,
            "tytMath": 20.0,
            "aytMath": 15.5,
            "scoreSay": 380.0,
        }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "e3",
        "exams.create",
        json!({ "studentId": student, "examName": "Bozuk", "examDate": "2024/03/01" }),
    );
    assert_eq!(code, "bad_params");

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "exams.report",
        json!({ "studentId": student }),
    );
    assert_eq!(report["examCount"], json!(2));
    assert_eq!(report["examNames"], json!(["Deneme 1", "Deneme 2"]));
    assert_eq!(report["dates"][0], json!("15.02.2024"));
    assert_eq!(report["lastExam"]["examName"], json!("Deneme 2"));
    assert_eq!(report["tyt"]["total"], json!([50.0, 57.5]));
    assert_eq!(report["delta"]["tytTotal"], json!(7.5));
    assert_eq!(report["delta"]["aytMath"], json!(4.5));
    assert_eq!(report["delta"]["scoreSay"], json!(30.0));
    assert!(report["delta"]["scoreTyt"].is_null());

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "exams.list",
        json!({ "studentId": student }),
    );
    assert_eq!(listed["exams"][0]["examName"], json!("Deneme 2"));

    let exam_id = str_field(&later, "examId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "u1",
        "exams.update",
        json!({ "examId": exam_id, "tytMath": 30.0 }),
    );
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "exams.report",
        json!({ "studentId": student }),
    );
    assert_eq!(report["lastExam"]["tytTotal"], json!(62.5));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "exams.delete",
        json!({ "examId": exam_id }),
    );
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "exams.report",
        json!({ "studentId": student }),
    );
    assert_eq!(report["examCount"], json!(1));
    assert!(report["delta"].is_null());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn exam_csv_import_matches_students_by_number() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "rehber-exams-csv");
    let student = create_student(&mut stdin, &mut reader, "601", "11-A");

    let csv = "studentNumber,examName,examDate,tytTurkish,tytMath\n\
               601,TYT Deneme,2024-04-01,\"28,5\",22\n\
               999,TYT Deneme,2024-04-01,10,10\n\
               601,TYT Deneme,bugün,10,10\n\
               601,AYT Deneme,2024-04-08,abc,1\n";
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "i1",
        "exams.importCsv",
        json!({ "csvText": csv }),
    );
    assert_eq!(imported["imported"], json!(1));
    let errors = imported["errors"].as_array().expect("errors");
    assert_eq!(errors.len(), 3);
    assert!(errors[0].as_str().unwrap_or_default().contains("unknown student number 999"));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "exams.list",
        json!({ "studentId": student }),
    );
    assert_eq!(listed["exams"][0]["tytTurkish"], json!(28.5));
    assert_eq!(listed["exams"][0]["tytTotal"], json!(50.5));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "i2",
        "exams.importCsv",
        json!({ "csvText": "examName,examDate\nX,2024-01-01\n" }),
    );
    assert_eq!(code, "bad_params");

    let _ = std::fs::remove_dir_all(workspace);
}
