use serde_json::Value;

pub const STUDENT_NUMBER_HEADER: &str = "ogrenci_no";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResponseSheetError {
    #[error("response sheet is empty")]
    Empty,

    #[error("response sheet needs an ogrenci_no column and at least one answer column")]
    TooFewColumns,

    #[error("first column must be 'ogrenci_no'")]
    BadFirstColumn,

    #[error("sheet has {found} answer columns but the survey has {expected} questions")]
    QuestionCountMismatch { found: usize, expected: usize },

    #[error("options must be a list, a JSON array string or newline-separated text")]
    BadOptions,
}

/// Answer options come as a JSON list, a string holding a JSON array, or
/// plain text with one option per line.
pub fn parse_options(value: Option<&Value>) -> Result<Vec<String>, ResponseSheetError> {
    let clean = |items: Vec<String>| -> Vec<String> {
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => out.push(s.clone()),
                    Value::Number(n) => out.push(n.to_string()),
                    _ => return Err(ResponseSheetError::BadOptions),
                }
            }
            Ok(clean(out))
        }
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.starts_with('[') {
                if let Ok(items) = serde_json::from_str::<Vec<String>>(trimmed) {
                    return Ok(clean(items));
                }
            }
            Ok(clean(trimmed.lines().map(str::to_string).collect()))
        }
        Some(_) => Err(ResponseSheetError::BadOptions),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRow {
    pub student_number: String,
    /// One slot per question; `None` where the row ran out of cells.
    pub answers: Vec<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseSheet {
    pub rows: Vec<ResponseRow>,
    pub malformed: usize,
}

/// Validates the header of a bulk response sheet and splits the data rows.
/// Rows with fewer than two cells are counted as malformed.
pub fn parse_response_sheet(
    records: &[Vec<String>],
    question_count: usize,
) -> Result<ResponseSheet, ResponseSheetError> {
    let Some((header, data)) = records.split_first() else {
        return Err(ResponseSheetError::Empty);
    };
    if header.len() < 2 {
        return Err(ResponseSheetError::TooFewColumns);
    }
    let first = header[0].trim().trim_start_matches('\u{feff}');
    if !first.eq_ignore_ascii_case(STUDENT_NUMBER_HEADER) {
        return Err(ResponseSheetError::BadFirstColumn);
    }
    let found = header.len() - 1;
    if found != question_count {
        return Err(ResponseSheetError::QuestionCountMismatch {
            found,
            expected: question_count,
        });
    }

    let mut sheet = ResponseSheet::default();
    for record in data {
        if record.len() < 2 {
            sheet.malformed += 1;
            continue;
        }
        let answers = (0..question_count)
            .map(|i| {
                record
                    .get(i + 1)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            })
            .collect();
        sheet.rows.push(ResponseRow {
            student_number: record[0].trim().to_string(),
            answers,
        });
    }
    Ok(sheet)
}

pub fn completion_rate(assigned: i64, completed: i64) -> i64 {
    if assigned <= 0 {
        0
    } else {
        ((completed as f64 / assigned as f64) * 100.0).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(lines: &[&[&str]]) -> Vec<Vec<String>> {
        lines
            .iter()
            .map(|l| l.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn options_accept_three_shapes() {
        let list = json!(["Evet", " Hayır ", ""]);
        assert_eq!(parse_options(Some(&list)), Ok(vec!["Evet".into(), "Hayır".into()]));
        let encoded = json!("[\"A\",\"B\"]");
        assert_eq!(parse_options(Some(&encoded)), Ok(vec!["A".into(), "B".into()]));
        let text = json!("Az\n\nÇok\n");
        assert_eq!(parse_options(Some(&text)), Ok(vec!["Az".into(), "Çok".into()]));
        assert_eq!(parse_options(None), Ok(vec![]));
        assert_eq!(parse_options(Some(&json!(true))), Err(ResponseSheetError::BadOptions));
    }

    #[test]
    fn header_is_checked_before_rows() {
        let bad_first = rows(&[&["numara", "s1"]]);
        assert_eq!(
            parse_response_sheet(&bad_first, 1),
            Err(ResponseSheetError::BadFirstColumn)
        );
        let mismatch = rows(&[&["OGRENCI_NO", "s1", "s2"]]);
        assert_eq!(
            parse_response_sheet(&mismatch, 3),
            Err(ResponseSheetError::QuestionCountMismatch { found: 2, expected: 3 })
        );
        assert_eq!(
            parse_response_sheet(&rows(&[&["ogrenci_no"]]), 1),
            Err(ResponseSheetError::TooFewColumns)
        );
    }

    #[test]
    fn short_rows_are_malformed_and_missing_cells_are_none() {
        let sheet = parse_response_sheet(
            &rows(&[&["ogrenci_no", "s1", "s2"], &["101", "Evet"], &["102"], &["103", "a", "b"]]),
            2,
        )
        .expect("sheet");
        assert_eq!(sheet.malformed, 1);
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[0].answers, vec![Some("Evet".to_string()), None]);
        assert_eq!(sheet.rows[1].student_number, "103");
    }

    #[test]
    fn completion_rate_rounds() {
        assert_eq!(completion_rate(3, 2), 67);
        assert_eq!(completion_rate(0, 0), 0);
    }
}
