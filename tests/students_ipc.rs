mod test_support;

use serde_json::json;
use test_support::{
    create_student, open_workspace, request_err, request_ok, spawn_sidecar, str_field,
};

#[test]
fn student_crud_search_and_number_uniqueness() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "rehber-students-crud");

    let ali = create_student(&mut stdin, &mut reader, "101", "12-A");
    let _veli = create_student(&mut stdin, &mut reader, "102", "12-B");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "dup",
        "students.create",
        json!({
            "number": "101",
            "firstName": "Tekrar",
            "lastName": "Numara",
            "className": "12-A",
            "gender": "E",
        }),
    );
    assert_eq!(code, "conflict");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "missing",
        "students.create",
        json!({ "number": "103", "firstName": "Eksik" }),
    );
    assert_eq!(code, "bad_params");

    let found = request_ok(
        &mut stdin,
        &mut reader,
        "search",
        "students.list",
        json!({ "search": "ad101" }),
    );
    let students = found["students"].as_array().expect("students");
    assert_eq!(students.len(), 1);
    assert_eq!(students[0]["id"], json!(ali));

    let sorted = request_ok(
        &mut stdin,
        &mut reader,
        "sorted",
        "students.list",
        json!({ "sortBy": "number", "sortOrder": "desc" }),
    );
    assert_eq!(sorted["students"][0]["number"], json!("102"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "taken",
        "students.update",
        json!({ "studentId": ali, "number": "102" }),
    );
    assert_eq!(code, "conflict");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "update",
        "students.update",
        json!({ "studentId": ali, "phone": "5551112233", "className": "11-C" }),
    );
    let got = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "students.get",
        json!({ "studentId": ali }),
    );
    assert_eq!(got["student"]["className"], json!("11-C"));
    assert_eq!(got["student"]["phone"], json!("5551112233"));
    assert_eq!(got["student"]["number"], json!("101"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "delete",
        "students.delete",
        json!({ "studentId": ali }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "gone",
        "students.get",
        json!({ "studentId": ali }),
    );
    assert_eq!(code, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn csv_import_reports_row_errors_and_at_risk_lists_low_progress() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "rehber-students-csv");

    let csv = "number,firstName,lastName,className,gender,phone\n\
               201,Ayşe,Kaya,10-A,K,\n\
               202,Mehmet,Demir,10-A,E,5550000000\n\
               201,Çift,Kayıt,10-B,K,\n\
               203,,Eksik,10-B,E,\n";
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "import",
        "students.importCsv",
        json!({ "csvText": csv }),
    );
    assert_eq!(imported["imported"], json!(2));
    let errors = imported["errors"].as_array().expect("errors");
    assert_eq!(errors.len(), 2);
    assert!(errors[0].as_str().unwrap_or_default().starts_with("row 4"));
    assert!(errors[1].as_str().unwrap_or_default().contains("firstName"));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "nohdr",
        "students.importCsv",
        json!({ "csvText": "number,firstName\n1,A\n" }),
    );
    assert_eq!(code, "bad_params");

    let at_risk = request_ok(
        &mut stdin,
        &mut reader,
        "risk",
        "students.atRisk",
        json!({ "limit": 5 }),
    );
    let listed = at_risk["students"].as_array().expect("students");
    assert_eq!(listed.len(), 2, "students without progress count as 0%");
    assert_eq!(listed[0]["progress"], json!(0.0));

    let any = str_field(&listed[0], "studentId");
    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "progress",
        "students.progress",
        json!({ "studentId": any }),
    );
    assert_eq!(progress["overallProgress"], json!(0.0));
    assert!(progress["targetDate"].is_null());

    let _ = std::fs::remove_dir_all(workspace);
}
