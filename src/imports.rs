use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("CSV has no header row")]
    Empty,

    #[error("missing required columns: {0}")]
    MissingColumns(String),

    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone)]
pub struct CsvRow {
    pub row_no: usize,
    fields: HashMap<String, String>,
}

impl CsvRow {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(&key.to_lowercase())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn required(&self, key: &str) -> Result<&str, String> {
        self.get(key)
            .ok_or_else(|| format!("row {}: missing {}", self.row_no, key))
    }

    pub fn f64(&self, key: &str) -> Result<Option<f64>, String> {
        match self.get(key) {
            None => Ok(None),
            Some(s) => s
                .replace(',', ".")
                .parse::<f64>()
                .map(Some)
                .map_err(|_| format!("row {}: {} must be a number", self.row_no, key)),
        }
    }

    pub fn i64(&self, key: &str) -> Result<Option<i64>, String> {
        match self.get(key) {
            None => Ok(None),
            Some(s) => s
                .parse::<i64>()
                .map(Some)
                .map_err(|_| format!("row {}: {} must be an integer", self.row_no, key)),
        }
    }
}

fn reader(text: &str, has_headers: bool) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes())
}

/// Reads a headered table, failing up front if any `required` column is absent.
pub fn read_table(text: &str, required: &[&str]) -> Result<Vec<CsvRow>, ImportError> {
    let mut rdr = reader(text, true);
    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_lowercase())
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(ImportError::Empty);
    }

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|r| !headers.contains(&r.to_lowercase()))
        .collect();
    if !missing.is_empty() {
        return Err(ImportError::MissingColumns(missing.join(", ")));
    }

    let mut rows = Vec::new();
    for (idx, record) in rdr.records().enumerate() {
        let record = record?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let fields = headers
            .iter()
            .cloned()
            .zip(record.iter().map(|f| f.to_string()))
            .collect();
        rows.push(CsvRow {
            row_no: idx + 2,
            fields,
        });
    }
    Ok(rows)
}

/// Reads raw records, header included, for positional formats.
pub fn read_records(text: &str) -> Result<Vec<Vec<String>>, ImportError> {
    let mut rdr = reader(text, false);
    let mut out = Vec::new();
    for record in rdr.records() {
        let record = record?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        out.push(record.iter().map(|f| f.to_string()).collect());
    }
    if out.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok(out)
}
