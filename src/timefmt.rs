use chrono::{Datelike, Duration, NaiveDate};

pub const DAY_NAMES: [&str; 7] = [
    "Pazartesi",
    "Salı",
    "Çarşamba",
    "Perşembe",
    "Cuma",
    "Cumartesi",
    "Pazar",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("invalid time {0:?}, expected HH:MM")]
    BadTime(String),

    #[error("invalid date {0:?}, expected YYYY-MM-DD or DD.MM.YYYY")]
    BadDate(String),

    #[error("invalid month {0:?}, expected YYYY-MM")]
    BadMonth(String),
}

/// Minutes since midnight for an `HH:MM` string.
pub fn parse_hhmm(raw: &str) -> Result<i64, TimeError> {
    let s = raw.trim();
    let bad = || TimeError::BadTime(raw.to_string());
    let (h, m) = s.split_once(':').ok_or_else(bad)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(bad());
    }
    let h: i64 = h.parse().map_err(|_| bad())?;
    let m: i64 = m.parse().map_err(|_| bad())?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        return Err(bad());
    }
    Ok(h * 60 + m)
}

pub fn format_hhmm(minutes: i64) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Accepts ISO dates and the `DD.MM.YYYY` form used on printed forms.
pub fn parse_date(raw: &str) -> Result<NaiveDate, TimeError> {
    let s = raw.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d.%m.%Y"))
        .map_err(|_| TimeError::BadDate(raw.to_string()))
}

pub fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn dotted(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

/// First and last day of a `YYYY-MM` month.
pub fn month_bounds(raw: &str) -> Result<(NaiveDate, NaiveDate), TimeError> {
    let bad = || TimeError::BadMonth(raw.to_string());
    let (y, m) = raw.trim().split_once('-').ok_or_else(bad)?;
    let y: i32 = y.parse().map_err(|_| bad())?;
    let m: u32 = m.parse().map_err(|_| bad())?;
    let first = NaiveDate::from_ymd_opt(y, m, 1).ok_or_else(bad)?;
    let next = if m == 12 {
        NaiveDate::from_ymd_opt(y + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(y, m + 1, 1)
    }
    .ok_or_else(bad)?;
    Ok((first, next - Duration::days(1)))
}

pub fn day_name(day: i64) -> Option<&'static str> {
    usize::try_from(day).ok().and_then(|d| DAY_NAMES.get(d).copied())
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hhmm_parses_and_formats() {
        assert_eq!(parse_hhmm("08:30"), Ok(510));
        assert_eq!(parse_hhmm("8:05"), Ok(485));
        assert_eq!(format_hhmm(510), "08:30");
        assert!(parse_hhmm("24:00").is_err());
        assert!(parse_hhmm("12:7").is_err());
        assert!(parse_hhmm("noon").is_err());
    }

    #[test]
    fn both_date_forms_are_accepted() {
        let a = parse_date("2024-03-09").expect("iso");
        let b = parse_date("09.03.2024").expect("dotted");
        assert_eq!(a, b);
        assert_eq!(dotted(a), "09.03.2024");
        assert!(parse_date("2024/03/09").is_err());
    }

    #[test]
    fn week_starts_on_monday() {
        let sunday = NaiveDate::from_ymd_opt(2024, 3, 10).expect("date");
        assert_eq!(iso(week_start(sunday)), "2024-03-04");
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).expect("date");
        assert_eq!(week_start(monday), monday);
    }

    #[test]
    fn month_bounds_handle_december() {
        let (a, b) = month_bounds("2023-12").expect("month");
        assert_eq!(iso(a), "2023-12-01");
        assert_eq!(iso(b), "2023-12-31");
        let (_, feb) = month_bounds("2024-02").expect("month");
        assert_eq!(iso(feb), "2024-02-29");
    }
}
