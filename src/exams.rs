use chrono::NaiveDate;
use serde::Serialize;

use crate::timefmt::dotted;

/// (column, JSON key) for the twelve per-subject nets, TYT first.
pub const NET_FIELDS: [(&str, &str); 12] = [
    ("tyt_turkish", "tytTurkish"),
    ("tyt_social", "tytSocial"),
    ("tyt_math", "tytMath"),
    ("tyt_science", "tytScience"),
    ("ayt_math", "aytMath"),
    ("ayt_physics", "aytPhysics"),
    ("ayt_chemistry", "aytChemistry"),
    ("ayt_biology", "aytBiology"),
    ("ayt_literature", "aytLiterature"),
    ("ayt_history", "aytHistory"),
    ("ayt_geography", "aytGeography"),
    ("ayt_philosophy", "aytPhilosophy"),
];

pub const SCORE_FIELDS: [(&str, &str); 4] = [
    ("score_tyt", "scoreTyt"),
    ("score_say", "scoreSay"),
    ("score_ea", "scoreEa"),
    ("score_soz", "scoreSoz"),
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExamError {
    #[error("no exam results for student")]
    NoResults,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Nets(pub [f64; 12]);

impl Nets {
    pub fn tyt_total(&self) -> f64 {
        self.0[..4].iter().sum()
    }

    pub fn ayt_total(&self) -> f64 {
        self.0[4..].iter().sum()
    }

    pub fn ayt_science_total(&self) -> f64 {
        self.0[5] + self.0[6] + self.0[7]
    }

    pub fn ayt_social_total(&self) -> f64 {
        self.0[8] + self.0[9] + self.0[10] + self.0[11]
    }

    pub fn total(&self) -> f64 {
        self.tyt_total() + self.ayt_total()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Scores(pub [Option<f64>; 4]);

#[derive(Debug, Clone)]
pub struct ExamRecord {
    pub id: String,
    pub exam_name: String,
    pub exam_date: NaiveDate,
    pub nets: Nets,
    pub scores: Scores,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TytSeries {
    pub turkish: Vec<f64>,
    pub social: Vec<f64>,
    pub math: Vec<f64>,
    pub science: Vec<f64>,
    pub total: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AytSeries {
    pub math: Vec<f64>,
    pub physics: Vec<f64>,
    pub chemistry: Vec<f64>,
    pub biology: Vec<f64>,
    pub science_total: Vec<f64>,
    pub literature: Vec<f64>,
    pub history: Vec<f64>,
    pub geography: Vec<f64>,
    pub philosophy: Vec<f64>,
    pub social_total: Vec<f64>,
    pub total: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSeries {
    pub tyt: Vec<Option<f64>>,
    pub say: Vec<Option<f64>>,
    pub ea: Vec<Option<f64>>,
    pub soz: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastExam {
    pub id: String,
    pub exam_name: String,
    pub exam_date: String,
    pub tyt_total: f64,
    pub ayt_total: f64,
    pub score_tyt: Option<f64>,
    pub score_say: Option<f64>,
    pub score_ea: Option<f64>,
    pub score_soz: Option<f64>,
}

/// Last exam minus the one before it. Score deltas are `None` unless both
/// exams carry that score.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamDelta {
    pub tyt_turkish: f64,
    pub tyt_social: f64,
    pub tyt_math: f64,
    pub tyt_science: f64,
    pub tyt_total: f64,
    pub ayt_math: f64,
    pub ayt_physics: f64,
    pub ayt_chemistry: f64,
    pub ayt_biology: f64,
    pub ayt_literature: f64,
    pub ayt_history: f64,
    pub ayt_geography: f64,
    pub ayt_philosophy: f64,
    pub ayt_total: f64,
    pub score_tyt: Option<f64>,
    pub score_say: Option<f64>,
    pub score_ea: Option<f64>,
    pub score_soz: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamReport {
    pub exam_count: usize,
    pub last_exam: LastExam,
    pub dates: Vec<String>,
    pub exam_names: Vec<String>,
    pub tyt: TytSeries,
    pub ayt: AytSeries,
    pub scores: ScoreSeries,
    pub delta: Option<ExamDelta>,
}

fn col(records: &[&ExamRecord], idx: usize) -> Vec<f64> {
    records.iter().map(|r| r.nets.0[idx]).collect()
}

fn score_col(records: &[&ExamRecord], idx: usize) -> Vec<Option<f64>> {
    records.iter().map(|r| r.scores.0[idx]).collect()
}

fn score_delta(last: &Scores, prev: &Scores, idx: usize) -> Option<f64> {
    match (last.0[idx], prev.0[idx]) {
        (Some(a), Some(b)) => Some(a - b),
        _ => None,
    }
}

fn delta(last: &ExamRecord, prev: &ExamRecord) -> ExamDelta {
    let d = |i: usize| last.nets.0[i] - prev.nets.0[i];
    ExamDelta {
        tyt_turkish: d(0),
        tyt_social: d(1),
        tyt_math: d(2),
        tyt_science: d(3),
        tyt_total: last.nets.tyt_total() - prev.nets.tyt_total(),
        ayt_math: d(4),
        ayt_physics: d(5),
        ayt_chemistry: d(6),
        ayt_biology: d(7),
        ayt_literature: d(8),
        ayt_history: d(9),
        ayt_geography: d(10),
        ayt_philosophy: d(11),
        ayt_total: last.nets.ayt_total() - prev.nets.ayt_total(),
        score_tyt: score_delta(&last.scores, &prev.scores, 0),
        score_say: score_delta(&last.scores, &prev.scores, 1),
        score_ea: score_delta(&last.scores, &prev.scores, 2),
        score_soz: score_delta(&last.scores, &prev.scores, 3),
    }
}

/// Records may arrive in any order; the report is chronological.
pub fn build_report(records: &[ExamRecord]) -> Result<ExamReport, ExamError> {
    let mut sorted: Vec<&ExamRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.exam_date.cmp(&b.exam_date).then_with(|| a.id.cmp(&b.id)));
    let Some(last) = sorted.last().copied() else {
        return Err(ExamError::NoResults);
    };

    let delta = if sorted.len() >= 2 {
        Some(delta(last, sorted[sorted.len() - 2]))
    } else {
        None
    };

    Ok(ExamReport {
        exam_count: sorted.len(),
        last_exam: LastExam {
            id: last.id.clone(),
            exam_name: last.exam_name.clone(),
            exam_date: dotted(last.exam_date),
            tyt_total: last.nets.tyt_total(),
            ayt_total: last.nets.ayt_total(),
            score_tyt: last.scores.0[0],
            score_say: last.scores.0[1],
            score_ea: last.scores.0[2],
            score_soz: last.scores.0[3],
        },
        dates: sorted.iter().map(|r| dotted(r.exam_date)).collect(),
        exam_names: sorted.iter().map(|r| r.exam_name.clone()).collect(),
        tyt: TytSeries {
            turkish: col(&sorted, 0),
            social: col(&sorted, 1),
            math: col(&sorted, 2),
            science: col(&sorted, 3),
            total: sorted.iter().map(|r| r.nets.tyt_total()).collect(),
        },
        ayt: AytSeries {
            math: col(&sorted, 4),
            physics: col(&sorted, 5),
            chemistry: col(&sorted, 6),
            biology: col(&sorted, 7),
            science_total: sorted.iter().map(|r| r.nets.ayt_science_total()).collect(),
            literature: col(&sorted, 8),
            history: col(&sorted, 9),
            geography: col(&sorted, 10),
            philosophy: col(&sorted, 11),
            social_total: sorted.iter().map(|r| r.nets.ayt_social_total()).collect(),
            total: sorted.iter().map(|r| r.nets.ayt_total()).collect(),
        },
        scores: ScoreSeries {
            tyt: score_col(&sorted, 0),
            say: score_col(&sorted, 1),
            ea: score_col(&sorted, 2),
            soz: score_col(&sorted, 3),
        },
        delta,
    })
}
