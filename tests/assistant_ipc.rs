mod test_support;

use serde_json::json;
use test_support::{
    create_student, request_err, request_ok, spawn_sidecar, str_field, temp_dir,
};

#[test]
fn risk_model_training_analysis_and_recommendations() {
    let workspace = temp_dir("rehber-assistant");
    std::fs::write(
        workspace.join("rehber.toml"),
        "[risk]\nmin_training_students = 4\n",
    )
    .expect("write config");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "t0",
        "assistant.models.train",
        json!({ "kind": "basic" }),
    );
    assert_eq!(code, "bad_params", "no students yet");

    let strong: Vec<String> = ["901", "902", "903"]
        .iter()
        .map(|n| create_student(&mut stdin, &mut reader, n, "12-A"))
        .collect();
    let weak: Vec<String> = ["904", "905", "906"]
        .iter()
        .map(|n| create_student(&mut stdin, &mut reader, n, "12-A"))
        .collect();

    let code = request_err(
        &mut stdin,
        &mut reader,
        "t1",
        "assistant.models.train",
        json!({ "kind": "basic" }),
    );
    assert_eq!(code, "bad_params", "every student is at risk so far");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "t2",
        "assistant.models.train",
        json!({ "kind": "deep" }),
    );
    assert_eq!(code, "bad_params");

    let lesson = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "lessons.create",
        json!({ "name": "Matematik" }),
    );
    let lesson_id = str_field(&lesson, "lessonId");
    for (i, sid) in strong.iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("p{}", i),
            "progress.set",
            json!({ "studentId": sid, "lessonId": lesson_id, "percent": 70.0 + i as f64 * 10.0 }),
        );
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("x{}", i),
            "exams.create",
            json!({
                "studentId": sid,
                "examName": "Deneme 1",
                "examDate": "2024-02-01",
                "tytTurkish": 30.0 + i as f64,
                "tytMath": 25.0,
            }),
        );
    }

    let code = request_err(
        &mut stdin,
        &mut reader,
        "a0",
        "assistant.risk.analyze",
        json!({ "studentId": weak[0] }),
    );
    assert_eq!(code, "not_found", "no model trained yet");

    let trained = request_ok(
        &mut stdin,
        &mut reader,
        "t3",
        "assistant.models.train",
        json!({ "kind": "basic", "name": "Sınıf modeli" }),
    );
    assert_eq!(trained["name"], json!("Sınıf modeli"));
    assert_eq!(trained["features"], json!(["avgNet", "progress"]));
    assert_eq!(trained["report"]["sampleCount"], json!(6));
    assert_eq!(trained["report"]["atRiskCount"], json!(3));

    let models = request_ok(&mut stdin, &mut reader, "ml", "assistant.models.list", json!({}));
    assert_eq!(models["models"][0]["active"], json!(true));
    let first_model = str_field(&trained, "modelId");

    let retrained = request_ok(
        &mut stdin,
        &mut reader,
        "t4",
        "assistant.models.train",
        json!({ "kind": "basic", "name": "Yedek model" }),
    );
    let second_model = str_field(&retrained, "modelId");
    let active_ids = |models: &serde_json::Value| -> Vec<String> {
        models["models"]
            .as_array()
            .expect("models")
            .iter()
            .filter(|m| m["active"] == json!(true))
            .map(|m| str_field(m, "id"))
            .collect()
    };
    let models = request_ok(&mut stdin, &mut reader, "ml2", "assistant.models.list", json!({}));
    assert_eq!(active_ids(&models), vec![second_model.clone()]);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ma1",
        "assistant.models.activate",
        json!({ "modelId": first_model }),
    );
    let models = request_ok(&mut stdin, &mut reader, "ml3", "assistant.models.list", json!({}));
    assert_eq!(models["models"].as_array().map(Vec::len), Some(2));
    assert_eq!(active_ids(&models), vec![first_model.clone()]);
    let code = request_err(
        &mut stdin,
        &mut reader,
        "ma2",
        "assistant.models.activate",
        json!({ "modelId": "missing" }),
    );
    assert_eq!(code, "not_found");

    let weak_result = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "assistant.risk.analyze",
        json!({ "studentId": weak[0] }),
    );
    let strong_result = request_ok(
        &mut stdin,
        &mut reader,
        "a2",
        "assistant.risk.analyze",
        json!({ "studentId": strong[2] }),
    );
    let p_weak = weak_result["probability"].as_f64().expect("probability");
    let p_strong = strong_result["probability"].as_f64().expect("probability");
    assert!((0.0..=1.0).contains(&p_weak));
    assert!(p_weak > p_strong);
    assert_eq!(weak_result["modelId"], json!(first_model));
    assert_eq!(weak_result["modelName"], json!("Sınıf modeli"));
    assert_eq!(weak_result["level"], json!("high"));
    assert_eq!(strong_result["level"], json!("low"));
    assert_eq!(weak_result["features"]["avgNet"], json!(0.0));
    assert_eq!(strong_result["features"]["progress"], json!(90.0));

    let recs = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "assistant.recommendations.list",
        json!({ "studentId": weak[0] }),
    );
    let recs = recs["recommendations"].as_array().expect("recommendations").clone();
    assert_eq!(recs.len(), 4);
    assert_eq!(recs[0]["priority"], json!(2));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "assistant.recommendations.apply",
        json!({ "recommendationId": str_field(&recs[0], "id"), "note": "Program başladı" }),
    );
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "r3",
        "assistant.recommendations.list",
        json!({ "studentId": weak[0] }),
    );
    let last = after["recommendations"]
        .as_array()
        .and_then(|a| a.last())
        .cloned()
        .expect("applied recommendation");
    assert_eq!(last["applied"], json!(true));
    assert_eq!(last["resultNote"], json!("Program başladı"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn sentiment_analysis_is_stored_per_student() {
    let workspace = temp_dir("rehber-sentiment");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = create_student(&mut stdin, &mut reader, "911", "11-A");

    let analysed = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "assistant.sentiment.analyze",
        json!({
            "text": "Çok stres ve endişe var, yorgun ve umutsuz hissediyorum.",
            "mode": "advanced",
            "studentId": student,
        }),
    );
    assert_eq!(analysed["analysis"]["dominant"], json!("negative"));
    assert!(analysed["analysis"]["keyWords"].is_array());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "assistant.sentiment.analyze",
        json!({ "text": "Bugün her şey harika ve güzel geçti." }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "s3",
        "assistant.sentiment.analyze",
        json!({ "text": "metin", "mode": "ultra" }),
    );
    assert_eq!(code, "bad_params");

    let mine = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "assistant.sentiment.list",
        json!({ "studentId": student }),
    );
    let items = mine["analyses"].as_array().expect("analyses");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["mode"], json!("advanced"));
    assert_eq!(items[0]["dominant"], json!("negative"));

    let all = request_ok(&mut stdin, &mut reader, "l2", "assistant.sentiment.list", json!({}));
    assert_eq!(all["analyses"].as_array().map(Vec::len), Some(2));

    let _ = std::fs::remove_dir_all(workspace);
}
