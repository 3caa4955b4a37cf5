use chrono::{Datelike, Duration, NaiveDate};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReportError {
    #[error("unknown report kind: {0}")]
    UnknownKind(String),

    #[error("unknown report status: {0}")]
    UnknownStatus(String),

    #[error("unknown statistics kind: {0}")]
    UnknownStatisticsKind(String),
}

pub const REPORT_KINDS: [&str; 4] = ["dönemsel", "yıllık", "aylık", "haftalık"];

pub const REPORT_STATUSES: [&str; 4] = ["taslak", "tamamlandı", "onaylandı", "mebbis_aktarıldı"];

pub fn check_kind(kind: &str) -> Result<(), ReportError> {
    if REPORT_KINDS.contains(&kind) {
        Ok(())
    } else {
        Err(ReportError::UnknownKind(kind.to_string()))
    }
}

pub fn check_status(status: &str) -> Result<(), ReportError> {
    if REPORT_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(ReportError::UnknownStatus(status.to_string()))
    }
}

/// A school term: September through January is Güz, the rest of the year Bahar.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub name: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

pub fn term_of(date: NaiveDate) -> Term {
    let year = date.year();
    let (from, to, season) = match date.month() {
        9..=12 => (ymd(year, 9, 1), ymd(year + 1, 1, 31), "Güz"),
        1 => (ymd(year - 1, 9, 1), ymd(year, 1, 31), "Güz"),
        _ => (ymd(year, 2, 1), ymd(year, 6, 30), "Bahar"),
    };
    // Bahar keeps the academic-year label of the autumn that started it.
    let label_start = if season == "Bahar" { year - 1 } else { from.year() };
    Term {
        name: format!("{}-{} {}", label_start, label_start + 1, season),
        from,
        to,
    }
}

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticsKind {
    Analysis,
    Comparison,
    Performance,
}

impl StatisticsKind {
    pub fn parse(raw: &str) -> Result<Self, ReportError> {
        match raw {
            "analiz" => Ok(Self::Analysis),
            "karşılaştırma" => Ok(Self::Comparison),
            "performans" => Ok(Self::Performance),
            other => Err(ReportError::UnknownStatisticsKind(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analysis => "analiz",
            Self::Comparison => "karşılaştırma",
            Self::Performance => "performans",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Analysis => "Analiz",
            Self::Comparison => "Karşılaştırma",
            Self::Performance => "Performans",
        }
    }
}

/// The window of the same length ending the day before `from`.
pub fn previous_window(from: NaiveDate, to: NaiveDate) -> (NaiveDate, NaiveDate) {
    let days = (to - from).num_days() + 1;
    (from - Duration::days(days), from - Duration::days(1))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Performance {
    pub days: i64,
    pub weeks: i64,
    pub per_day: f64,
    pub per_week: f64,
    pub per_student: f64,
    pub change_percent: f64,
}

pub fn performance(
    from: NaiveDate,
    to: NaiveDate,
    meetings: i64,
    previous_meetings: i64,
    students: i64,
) -> Performance {
    let days = (to - from).num_days() + 1;
    let weeks = (days + 6) / 7;
    let ratio = |n: i64, d: i64| {
        if d > 0 {
            round2(n as f64 / d as f64)
        } else {
            0.0
        }
    };
    let change_percent = if previous_meetings > 0 {
        round2((meetings - previous_meetings) as f64 / previous_meetings as f64 * 100.0)
    } else if meetings > 0 {
        100.0
    } else {
        0.0
    };
    Performance {
        days,
        weeks,
        per_day: ratio(meetings, days),
        per_week: ratio(meetings, weeks),
        per_student: ratio(meetings, students),
        change_percent,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
