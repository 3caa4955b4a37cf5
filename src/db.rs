use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "rehber.sqlite3";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS settings(
        key TEXT PRIMARY KEY,
        value_json TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS students(
        id TEXT PRIMARY KEY,
        number TEXT NOT NULL UNIQUE,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        class_name TEXT NOT NULL,
        gender TEXT NOT NULL,
        phone TEXT,
        email TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_name)",
    "CREATE TABLE IF NOT EXISTS lessons(
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS topics(
        id TEXT PRIMARY KEY,
        lesson_id TEXT NOT NULL,
        name TEXT NOT NULL,
        estimated_minutes INTEGER NOT NULL,
        sort_order INTEGER NOT NULL,
        FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_topics_lesson_sort ON topics(lesson_id, sort_order)",
    "CREATE TABLE IF NOT EXISTS schedule_entries(
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        lesson_id TEXT NOT NULL,
        day INTEGER NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
        FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_schedule_student_day ON schedule_entries(student_id, day, start_time)",
    "CREATE TABLE IF NOT EXISTS topic_tracking(
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        topic_id TEXT NOT NULL,
        completed INTEGER NOT NULL DEFAULT 0,
        studied_minutes INTEGER NOT NULL DEFAULT 0,
        solved_questions INTEGER NOT NULL DEFAULT 0,
        correct_questions INTEGER NOT NULL DEFAULT 0,
        last_studied_at TEXT,
        FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
        FOREIGN KEY(topic_id) REFERENCES topics(id) ON DELETE CASCADE,
        UNIQUE(student_id, topic_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_topic_tracking_student ON topic_tracking(student_id)",
    "CREATE TABLE IF NOT EXISTS lesson_progress(
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        lesson_id TEXT NOT NULL,
        completed_topics INTEGER NOT NULL DEFAULT 0,
        total_topics INTEGER NOT NULL DEFAULT 0,
        percent REAL NOT NULL DEFAULT 0,
        estimated_end_date TEXT,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
        FOREIGN KEY(lesson_id) REFERENCES lessons(id) ON DELETE CASCADE,
        UNIQUE(student_id, lesson_id)
    )",
    "CREATE TABLE IF NOT EXISTS exam_results(
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        exam_name TEXT NOT NULL,
        exam_date TEXT NOT NULL,
        tyt_turkish REAL NOT NULL DEFAULT 0,
        tyt_social REAL NOT NULL DEFAULT 0,
        tyt_math REAL NOT NULL DEFAULT 0,
        tyt_science REAL NOT NULL DEFAULT 0,
        ayt_math REAL NOT NULL DEFAULT 0,
        ayt_physics REAL NOT NULL DEFAULT 0,
        ayt_chemistry REAL NOT NULL DEFAULT 0,
        ayt_biology REAL NOT NULL DEFAULT 0,
        ayt_literature REAL NOT NULL DEFAULT 0,
        ayt_history REAL NOT NULL DEFAULT 0,
        ayt_geography REAL NOT NULL DEFAULT 0,
        ayt_philosophy REAL NOT NULL DEFAULT 0,
        score_tyt REAL,
        score_say REAL,
        score_ea REAL,
        score_soz REAL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_exam_results_student_date ON exam_results(student_id, exam_date)",
    "CREATE TABLE IF NOT EXISTS survey_types(
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS answer_types(
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS surveys(
        id TEXT PRIMARY KEY,
        type_id TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(type_id) REFERENCES survey_types(id)
    )",
    "CREATE TABLE IF NOT EXISTS survey_questions(
        id TEXT PRIMARY KEY,
        survey_id TEXT NOT NULL,
        answer_type_id TEXT NOT NULL,
        text TEXT NOT NULL,
        sort_order INTEGER NOT NULL,
        options_json TEXT NOT NULL DEFAULT '[]',
        required INTEGER NOT NULL DEFAULT 1,
        reverse_scored INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY(survey_id) REFERENCES surveys(id) ON DELETE CASCADE,
        FOREIGN KEY(answer_type_id) REFERENCES answer_types(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_survey_questions_survey ON survey_questions(survey_id, sort_order)",
    "CREATE TABLE IF NOT EXISTS survey_assignments(
        id TEXT PRIMARY KEY,
        survey_id TEXT NOT NULL,
        student_id TEXT NOT NULL,
        assigned_at TEXT NOT NULL,
        completed INTEGER NOT NULL DEFAULT 0,
        completed_at TEXT,
        FOREIGN KEY(survey_id) REFERENCES surveys(id) ON DELETE CASCADE,
        FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
        UNIQUE(survey_id, student_id)
    )",
    "CREATE TABLE IF NOT EXISTS survey_answers(
        id TEXT PRIMARY KEY,
        assignment_id TEXT NOT NULL,
        question_id TEXT NOT NULL,
        answer TEXT NOT NULL,
        FOREIGN KEY(assignment_id) REFERENCES survey_assignments(id) ON DELETE CASCADE,
        FOREIGN KEY(question_id) REFERENCES survey_questions(id) ON DELETE CASCADE,
        UNIQUE(assignment_id, question_id)
    )",
    "CREATE TABLE IF NOT EXISTS survey_class_results(
        id TEXT PRIMARY KEY,
        survey_id TEXT NOT NULL,
        class_name TEXT NOT NULL,
        respondent_count INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(survey_id) REFERENCES surveys(id) ON DELETE CASCADE,
        UNIQUE(survey_id, class_name)
    )",
    "CREATE TABLE IF NOT EXISTS meetings(
        id TEXT PRIMARY KEY,
        student_id TEXT,
        meeting_date TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        ordinal INTEGER NOT NULL DEFAULT 1,
        person TEXT NOT NULL,
        person_role TEXT NOT NULL,
        relation TEXT,
        topic TEXT NOT NULL,
        work_area TEXT,
        work_category TEXT,
        service_type TEXT,
        institution_cooperation TEXT,
        place TEXT,
        discipline INTEGER NOT NULL DEFAULT 0,
        judicial_referral INTEGER NOT NULL DEFAULT 0,
        method TEXT,
        summary TEXT,
        exported INTEGER NOT NULL DEFAULT 0,
        exported_at TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE SET NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_meetings_date ON meetings(meeting_date)",
    "CREATE INDEX IF NOT EXISTS idx_meetings_student ON meetings(student_id)",
    "CREATE TABLE IF NOT EXISTS activities(
        id TEXT PRIMARY KEY,
        activity_date TEXT NOT NULL,
        method TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        target_type TEXT NOT NULL,
        activity_type TEXT NOT NULL,
        teacher_count INTEGER NOT NULL DEFAULT 0,
        parent_count INTEGER NOT NULL DEFAULT 0,
        other_count INTEGER NOT NULL DEFAULT 0,
        male_count INTEGER NOT NULL DEFAULT 0,
        female_count INTEGER NOT NULL DEFAULT 0,
        class_info TEXT,
        official_letter_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_activities_date ON activities(activity_date)",
    "CREATE TABLE IF NOT EXISTS activity_reports(
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        term TEXT NOT NULL,
        kind TEXT NOT NULL DEFAULT 'dönemsel',
        status TEXT NOT NULL DEFAULT 'taslak',
        from_date TEXT NOT NULL,
        to_date TEXT NOT NULL,
        data_json TEXT NOT NULL,
        comment TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS statistics_reports(
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        kind TEXT NOT NULL,
        from_date TEXT NOT NULL,
        to_date TEXT NOT NULL,
        filters_json TEXT NOT NULL,
        data_json TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS lesson_hours(
        id TEXT PRIMARY KEY,
        period_no INTEGER NOT NULL UNIQUE,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        lunch_break INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS meeting_topics(
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS risk_models(
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        features_json TEXT NOT NULL,
        training_json TEXT NOT NULL,
        train_accuracy REAL NOT NULL,
        test_accuracy REAL,
        active INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS risk_analyses(
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        model_id TEXT NOT NULL,
        probability REAL NOT NULL,
        level TEXT NOT NULL,
        features_json TEXT NOT NULL,
        comments_json TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
        FOREIGN KEY(model_id) REFERENCES risk_models(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS recommendations(
        id TEXT PRIMARY KEY,
        analysis_id TEXT NOT NULL,
        student_id TEXT NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        kind TEXT NOT NULL,
        priority INTEGER NOT NULL,
        applied INTEGER NOT NULL DEFAULT 0,
        applied_at TEXT,
        result_note TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY(analysis_id) REFERENCES risk_analyses(id) ON DELETE CASCADE,
        FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_recommendations_student ON recommendations(student_id)",
    "CREATE TABLE IF NOT EXISTS sentiment_analyses(
        id TEXT PRIMARY KEY,
        student_id TEXT,
        mode TEXT NOT NULL,
        source_text TEXT NOT NULL,
        dominant TEXT NOT NULL,
        positive REAL NOT NULL,
        negative REAL NOT NULL,
        neutral REAL NOT NULL,
        detail_json TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
    )",
];

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    for stmt in SCHEMA {
        conn.execute(stmt, [])?;
    }

    Ok(conn)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
