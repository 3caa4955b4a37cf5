use linfa::prelude::*;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

const MAX_ITERATIONS: u64 = 100;

const NET_LIMIT: f64 = 20.0;
const PROGRESS_LIMIT: f64 = 30.0;
const TREND_LIMIT: f64 = -0.3;
const WEEKLY_HOURS_LIMIT: f64 = 10.0;
const SURVEY_LIMIT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RiskError {
    #[error("unknown model kind: {0}")]
    UnknownKind(String),

    #[error("at least {required} students with data are needed, found {found}")]
    NotEnoughStudents { found: usize, required: usize },

    #[error("training data has a single class; both at-risk and not-at-risk students are needed")]
    SingleClass,

    #[error("stored training data is inconsistent: {0}")]
    BadTrainingData(String),

    #[error("model fit failed: {0}")]
    Fit(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Basic,
    Advanced,
    Comprehensive,
}

impl ModelKind {
    pub fn parse(s: &str) -> Result<Self, RiskError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "advanced" => Ok(Self::Advanced),
            "comprehensive" => Ok(Self::Comprehensive),
            other => Err(RiskError::UnknownKind(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
            Self::Comprehensive => "comprehensive",
        }
    }

    pub fn feature_names(self) -> &'static [&'static str] {
        match self {
            Self::Basic => &["avgNet", "progress"],
            Self::Advanced => &["avgNet", "progress", "trend"],
            Self::Comprehensive => &[
                "avgNet",
                "progress",
                "trend",
                "weeklyHours",
                "surveyCompletion",
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFeatures {
    pub avg_net: f64,
    pub progress: f64,
    pub trend: f64,
    pub weekly_hours: f64,
    pub survey_completion: f64,
}

impl StudentFeatures {
    pub fn vector(&self, kind: ModelKind) -> Vec<f64> {
        match kind {
            ModelKind::Basic => vec![self.avg_net, self.progress],
            ModelKind::Advanced => vec![self.avg_net, self.progress, self.trend],
            ModelKind::Comprehensive => vec![
                self.avg_net,
                self.progress,
                self.trend,
                self.weekly_hours,
                self.survey_completion,
            ],
        }
    }

    /// Rule-based training label.
    pub fn is_at_risk(&self, kind: ModelKind) -> bool {
        let low_net = self.avg_net < NET_LIMIT;
        let low_progress = self.progress < PROGRESS_LIMIT;
        let falling = self.trend < TREND_LIMIT;
        match kind {
            ModelKind::Basic => low_net || low_progress,
            ModelKind::Advanced => low_net || low_progress || falling,
            ModelKind::Comprehensive => {
                let hits = [
                    low_net,
                    low_progress,
                    falling,
                    self.weekly_hours < WEEKLY_HOURS_LIMIT,
                    self.survey_completion < SURVEY_LIMIT,
                ]
                .iter()
                .filter(|hit| **hit)
                .count();
                hits >= 3
            }
        }
    }
}

/// Relative change over the last (at most three) exam totals, clamped to
/// [-1, 1]. `totals` must be chronological.
pub fn exam_trend(totals: &[f64]) -> f64 {
    if totals.len() < 2 {
        return 0.0;
    }
    let recent = &totals[totals.len().saturating_sub(3)..];
    let first = recent[0];
    let last = recent[recent.len() - 1];
    ((last - first) / (first + 0.1)).clamp(-1.0, 1.0)
}

pub fn survey_completion(assigned: usize, completed: usize) -> f64 {
    if assigned == 0 {
        1.0
    } else {
        completed as f64 / assigned as f64
    }
}

/// Standardised training rows plus the scaling needed to project new students.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSet {
    pub kind: ModelKind,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingReport {
    pub sample_count: usize,
    pub at_risk_count: usize,
    pub train_size: usize,
    pub test_size: usize,
    pub train_accuracy: f64,
    pub test_accuracy: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub at_risk: bool,
    /// Probability of the at-risk class.
    pub probability: f64,
}

impl Prediction {
    pub fn level(&self) -> &'static str {
        if self.at_risk {
            "high"
        } else {
            "low"
        }
    }

    pub fn label(&self) -> &'static str {
        if self.at_risk {
            "Yüksek Risk"
        } else {
            "Düşük Risk"
        }
    }
}

fn accuracy(predictions: &Array1<bool>, targets: &[bool]) -> f64 {
    if targets.is_empty() {
        return 0.0;
    }
    predictions
        .iter()
        .zip(targets.iter())
        .filter(|(pred, actual)| pred == actual)
        .count() as f64
        / targets.len() as f64
}

/// Deterministic stratified split: each class keeps its leading
/// `ceil(n * (1 - test_ratio))` rows (at least one) for training.
fn split(labels: &[bool], test_ratio: f64) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [true, false] {
        let idx: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == class)
            .map(|(i, _)| i)
            .collect();
        if idx.is_empty() {
            continue;
        }
        let keep = ((idx.len() as f64) * (1.0 - test_ratio)).ceil() as usize;
        let keep = keep.clamp(1, idx.len());
        train.extend_from_slice(&idx[..keep]);
        test.extend_from_slice(&idx[keep..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

fn column_stats(rows: &[Vec<f64>], width: usize) -> (Vec<f64>, Vec<f64>) {
    let n = rows.len().max(1) as f64;
    let mut means = vec![0.0; width];
    for row in rows {
        for (m, v) in means.iter_mut().zip(row) {
            *m += v / n;
        }
    }
    let mut stds = vec![0.0; width];
    for row in rows {
        for ((s, v), m) in stds.iter_mut().zip(row).zip(&means) {
            *s += (v - m).powi(2) / n;
        }
    }
    for s in stds.iter_mut() {
        *s = s.sqrt();
        if *s < 1e-9 {
            *s = 1.0;
        }
    }
    (means, stds)
}

fn matrix(rows: &[Vec<f64>], width: usize) -> Result<Array2<f64>, RiskError> {
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), width), flat)
        .map_err(|e| RiskError::BadTrainingData(e.to_string()))
}

impl TrainingSet {
    fn width(&self) -> usize {
        self.kind.feature_names().len()
    }

    fn scale(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    fn validate(&self) -> Result<(), RiskError> {
        let width = self.width();
        if self.means.len() != width || self.stds.len() != width {
            return Err(RiskError::BadTrainingData("scaling width".into()));
        }
        if self.rows.len() != self.labels.len() {
            return Err(RiskError::BadTrainingData("row/label count".into()));
        }
        if self.rows.iter().any(|r| r.len() != width) {
            return Err(RiskError::BadTrainingData("row width".into()));
        }
        if !(self.labels.contains(&true) && self.labels.contains(&false)) {
            return Err(RiskError::SingleClass);
        }
        Ok(())
    }

    pub fn fit(&self) -> Result<RiskModel, RiskError> {
        self.validate()?;
        let records = matrix(&self.rows, self.width())?;
        let targets = Array1::from_vec(self.labels.clone());
        let dataset = Dataset::new(records, targets);
        let fitted = LogisticRegression::default()
            .max_iterations(MAX_ITERATIONS)
            .fit(&dataset)
            .map_err(|e| RiskError::Fit(e.to_string()))?;
        Ok(RiskModel { set: self, fitted })
    }
}

pub struct RiskModel<'a> {
    set: &'a TrainingSet,
    fitted: FittedLogisticRegression<f64, bool>,
}

impl RiskModel<'_> {
    fn predict_scaled(&self, rows: &[Vec<f64>]) -> Result<(Array1<bool>, Array1<f64>), RiskError> {
        let x = matrix(rows, self.set.width())?;
        let labels = self.fitted.predict(&x);
        let probs = self.fitted.predict_probabilities(&x);
        Ok((labels, probs))
    }

    pub fn predict(&self, features: &StudentFeatures) -> Result<Prediction, RiskError> {
        let row = self.set.scale(&features.vector(self.set.kind));
        let (labels, probs) = self.predict_scaled(&[row])?;
        let at_risk = labels.get(0).copied().unwrap_or(false);
        let p = probs.get(0).copied().unwrap_or(0.5);
        // The library's positive class is not necessarily `true`.
        let probability = if at_risk { p.max(1.0 - p) } else { p.min(1.0 - p) };
        Ok(Prediction {
            at_risk,
            probability,
        })
    }

    fn accuracy_on(&self, rows: &[Vec<f64>], labels: &[bool]) -> Result<f64, RiskError> {
        let (pred, _) = self.predict_scaled(rows)?;
        Ok(accuracy(&pred, labels))
    }
}

/// Labels `samples`, splits them, fits on the training part and reports
/// accuracy on both parts.
pub fn train(
    kind: ModelKind,
    samples: &[StudentFeatures],
    min_students: usize,
    test_ratio: f64,
) -> Result<(TrainingSet, TrainingReport), RiskError> {
    let required = min_students.max(2);
    if samples.len() < required {
        return Err(RiskError::NotEnoughStudents {
            found: samples.len(),
            required,
        });
    }

    let labels: Vec<bool> = samples.iter().map(|s| s.is_at_risk(kind)).collect();
    let at_risk_count = labels.iter().filter(|l| **l).count();
    if at_risk_count == 0 || at_risk_count == labels.len() {
        return Err(RiskError::SingleClass);
    }

    let raw: Vec<Vec<f64>> = samples.iter().map(|s| s.vector(kind)).collect();
    let (train_idx, test_idx) = split(&labels, test_ratio);
    let width = kind.feature_names().len();
    let train_raw: Vec<Vec<f64>> = train_idx.iter().map(|i| raw[*i].clone()).collect();
    let (means, stds) = column_stats(&train_raw, width);

    let mut set = TrainingSet {
        kind,
        means,
        stds,
        rows: Vec::with_capacity(train_idx.len()),
        labels: train_idx.iter().map(|i| labels[*i]).collect(),
    };
    set.rows = train_raw.iter().map(|r| set.scale(r)).collect();

    let test_rows: Vec<Vec<f64>> = test_idx.iter().map(|i| set.scale(&raw[*i])).collect();
    let test_labels: Vec<bool> = test_idx.iter().map(|i| labels[*i]).collect();

    let (train_accuracy, test_accuracy) = {
        let model = set.fit()?;
        let train_accuracy = model.accuracy_on(&set.rows, &set.labels)?;
        let test_accuracy = if test_rows.is_empty() {
            None
        } else {
            Some(model.accuracy_on(&test_rows, &test_labels)?)
        };
        (train_accuracy, test_accuracy)
    };

    let report = TrainingReport {
        sample_count: samples.len(),
        at_risk_count,
        train_size: set.rows.len(),
        test_size: test_rows.len(),
        train_accuracy,
        test_accuracy,
    };
    Ok((set, report))
}

pub fn comments(prediction: &Prediction, features: &StudentFeatures) -> String {
    if prediction.at_risk {
        format!(
            "Öğrenci akademik risk altında görünüyor. Ortalama net: {:.1}, İlerleme: {:.1}%. \
             Öğrencinin akademik durumunu iyileştirmek için acil müdahale gerekebilir.",
            features.avg_net, features.progress
        )
    } else {
        format!(
            "Öğrenci akademik olarak iyi durumda görünüyor. Ortalama net: {:.1}, İlerleme: {:.1}%. \
             Mevcut performansını korumak için destekleyici önlemler alınabilir.",
            features.avg_net, features.progress
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub title: &'static str,
    pub description: &'static str,
    pub kind: &'static str,
    pub priority: i64,
}

pub fn recommendations(at_risk: bool) -> Vec<Recommendation> {
    let rec = |title, description, kind, priority| Recommendation {
        title,
        description,
        kind,
        priority,
    };
    if at_risk {
        vec![
            rec(
                "Birebir çalışma programı",
                "Öğrencinin akademik durumunu iyileştirmek için birebir çalışma programı hazırlanmalı.",
                "intervention",
                2,
            ),
            rec(
                "Haftalık ilerleme değerlendirmesi",
                "Haftalık ilerleme değerlendirmeleri yapılarak öğrencinin motivasyonu artırılmalı.",
                "intervention",
                1,
            ),
            rec(
                "Ek kaynak desteği",
                "Öğrencinin eksik olduğu konular için ek kaynak ve çalışma materyalleri sağlanmalı.",
                "resource",
                1,
            ),
            rec(
                "Akran çalışma grubu",
                "Akran çalışma grubu oluşturarak işbirlikli öğrenme ortamı sağlanmalı.",
                "activity",
                0,
            ),
        ]
    } else {
        vec![
            rec(
                "Mevcut programın sürdürülmesi",
                "Mevcut çalışma programı devam ettirilerek öğrencinin motivasyonu korunmalı.",
                "intervention",
                0,
            ),
            rec(
                "Ek okuma kaynakları",
                "Öğrencinin ilgi alanlarına yönelik ek okuma kaynakları önerilebilir.",
                "resource",
                0,
            ),
            rec(
                "Proje tabanlı aktiviteler",
                "Üst düzey düşünme becerilerini geliştirmek için proje tabanlı aktiviteler planlanabilir.",
                "activity",
                1,
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(avg_net: f64, progress: f64) -> StudentFeatures {
        StudentFeatures {
            avg_net,
            progress,
            trend: 0.0,
            weekly_hours: 12.0,
            survey_completion: 1.0,
        }
    }

    fn cohort() -> Vec<StudentFeatures> {
        let mut out = Vec::new();
        for i in 0..8 {
            out.push(student(5.0 + i as f64, 10.0 + i as f64));
        }
        for i in 0..12 {
            out.push(student(60.0 + 2.0 * i as f64, 70.0 + i as f64));
        }
        out
    }

    #[test]
    fn labels_follow_kind_rules() {
        let mut s = student(25.0, 50.0);
        assert!(!s.is_at_risk(ModelKind::Basic));
        s.trend = -0.5;
        assert!(!s.is_at_risk(ModelKind::Basic));
        assert!(s.is_at_risk(ModelKind::Advanced));
        // trend alone is one hit of five
        assert!(!s.is_at_risk(ModelKind::Comprehensive));
        s.weekly_hours = 4.0;
        s.survey_completion = 0.2;
        assert!(s.is_at_risk(ModelKind::Comprehensive));
        assert_eq!(s.vector(ModelKind::Comprehensive).len(), 5);
    }

    #[test]
    fn trend_uses_last_three_exams_and_clamps() {
        assert_eq!(exam_trend(&[40.0]), 0.0);
        let t = exam_trend(&[100.0, 20.0, 30.0, 40.0]);
        assert!((t - (20.0 / 20.1)).abs() < 1e-9);
        assert_eq!(exam_trend(&[0.0, 50.0]), 1.0);
        assert_eq!(survey_completion(0, 0), 1.0);
        assert_eq!(survey_completion(4, 1), 0.25);
    }

    #[test]
    fn split_is_stratified() {
        let labels = [true, false, true, false, false, false, true, false, false, false];
        let (train, test) = split(&labels, 0.3);
        assert_eq!(train.len() + test.len(), labels.len());
        assert_eq!(train, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(test, vec![8, 9]);
    }

    #[test]
    fn too_few_or_single_class_cohorts_are_rejected() {
        let small = vec![student(5.0, 5.0); 3];
        assert_eq!(
            train(ModelKind::Basic, &small, 10, 0.3),
            Err(RiskError::NotEnoughStudents { found: 3, required: 10 })
        );
        let healthy = vec![student(70.0, 80.0); 12];
        assert_eq!(
            train(ModelKind::Basic, &healthy, 10, 0.3),
            Err(RiskError::SingleClass)
        );
        assert!(matches!(ModelKind::parse("forest"), Err(RiskError::UnknownKind(_))));
    }

    #[test]
    fn separable_cohort_trains_and_predicts() {
        let (set, report) = train(ModelKind::Basic, &cohort(), 10, 0.3).expect("train");
        assert_eq!(report.sample_count, 20);
        assert_eq!(report.at_risk_count, 8);
        assert_eq!(report.train_size + report.test_size, 20);
        assert!(report.train_accuracy >= 0.9);

        let model = set.fit().expect("refit");
        let weak = model.predict(&student(2.0, 5.0)).expect("predict");
        assert!(weak.at_risk);
        assert!(weak.probability > 0.5);
        assert_eq!(weak.level(), "high");
        let strong = model.predict(&student(85.0, 95.0)).expect("predict");
        assert!(!strong.at_risk);
        assert!(strong.probability < 0.5);
    }

    #[test]
    fn recommendation_priorities_depend_on_risk() {
        let high: Vec<i64> = recommendations(true).iter().map(|r| r.priority).collect();
        assert_eq!(high, vec![2, 1, 1, 0]);
        let low: Vec<i64> = recommendations(false).iter().map(|r| r.priority).collect();
        assert_eq!(low, vec![0, 0, 1]);
    }
}
