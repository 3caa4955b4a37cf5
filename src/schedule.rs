use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

use crate::timefmt::format_hhmm;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScheduleError {
    #[error("start time must be before end time")]
    StartNotBeforeEnd,

    #[error("day must be between 0 and 6, got {0}")]
    InvalidDay(i64),

    #[error("no lessons available to schedule")]
    NoLessons,

    #[error("no days selected")]
    NoDays,

    #[error("time range too short for a {block_minutes}-minute block")]
    RangeTooShort { block_minutes: i64 },

    #[error("lesson minutes must be 1..=1440 and break minutes 0..=1440")]
    BadDurations,

    #[error("overlaps {lesson} ({start}-{end})")]
    Conflict {
        lesson: String,
        start: String,
        end: String,
    },

    #[error("lesson has no topics")]
    NoTopics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub day: i64,
    pub start: i64,
    pub end: i64,
}

pub fn validate_slot(slot: &Slot) -> Result<(), ScheduleError> {
    if !(0..7).contains(&slot.day) {
        return Err(ScheduleError::InvalidDay(slot.day));
    }
    if slot.start >= slot.end {
        return Err(ScheduleError::StartNotBeforeEnd);
    }
    Ok(())
}

/// Half-open ranges: touching blocks (09:00-09:45, 09:45-10:30) do not clash.
pub fn overlaps(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> bool {
    a_start < b_end && b_start < a_end
}

/// An existing entry on the same day, with its lesson name for the conflict message.
#[derive(Debug, Clone)]
pub struct BookedSlot {
    pub lesson_name: String,
    pub start: i64,
    pub end: i64,
}

pub fn check_conflicts(slot: &Slot, same_day: &[BookedSlot]) -> Result<(), ScheduleError> {
    for b in same_day {
        if overlaps(slot.start, slot.end, b.start, b.end) {
            return Err(ScheduleError::Conflict {
                lesson: b.lesson_name.clone(),
                start: format_hhmm(b.start),
                end: format_hhmm(b.end),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltBlock {
    pub day: i64,
    pub start: i64,
    pub end: i64,
    /// Index into the lesson list passed to [`ScheduleBuilder::build`].
    pub lesson_index: usize,
}

pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// Partitions a daily window into (lesson + break) blocks on each selected
/// day and deals lessons out round-robin across the whole week.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleBuilder {
    pub lesson_minutes: i64,
    pub break_minutes: i64,
}

impl ScheduleBuilder {
    pub fn new(lesson_minutes: i64, break_minutes: i64) -> Self {
        Self {
            lesson_minutes,
            break_minutes,
        }
    }

    fn step(&self) -> Option<i64> {
        self.lesson_minutes
            .checked_add(self.break_minutes)
            .filter(|step| *step > 0)
    }

    pub fn blocks_per_day(&self, start: i64, end: i64) -> i64 {
        match (self.step(), end.checked_sub(start)) {
            (Some(step), Some(window)) => window / step,
            _ => 0,
        }
    }

    pub fn build(
        &self,
        days: &[i64],
        start: i64,
        end: i64,
        lesson_count: usize,
    ) -> Result<Vec<BuiltBlock>, ScheduleError> {
        if !(1..=MINUTES_PER_DAY).contains(&self.lesson_minutes)
            || !(0..=MINUTES_PER_DAY).contains(&self.break_minutes)
        {
            return Err(ScheduleError::BadDurations);
        }
        if lesson_count == 0 {
            return Err(ScheduleError::NoLessons);
        }
        if days.is_empty() {
            return Err(ScheduleError::NoDays);
        }
        for &day in days {
            if !(0..7).contains(&day) {
                return Err(ScheduleError::InvalidDay(day));
            }
        }
        if start >= end {
            return Err(ScheduleError::StartNotBeforeEnd);
        }

        let step = self.step().ok_or(ScheduleError::BadDurations)?;
        let per_day = self.blocks_per_day(start, end);
        if per_day <= 0 {
            return Err(ScheduleError::RangeTooShort {
                block_minutes: step,
            });
        }

        let mut out = Vec::with_capacity(days.len() * per_day as usize);
        let mut counter = 0usize;
        for &day in days {
            for b in 0..per_day {
                let block_start = start + b * step;
                out.push(BuiltBlock {
                    day,
                    start: block_start,
                    end: block_start + self.lesson_minutes,
                    lesson_index: counter % lesson_count,
                });
                counter += 1;
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct TopicState {
    pub id: String,
    pub name: String,
    pub estimated_minutes: i64,
    /// `None` when the student has no tracking row for the topic.
    pub studied_minutes: Option<i64>,
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct ProjectedEntry {
    pub day: i64,
    pub start: i64,
    pub end: i64,
    pub lesson_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanItem {
    pub lesson_id: String,
    pub topic_id: String,
    pub topic_name: String,
    pub start: i64,
    pub end: i64,
    pub minutes: i64,
}

struct Cursor<'a> {
    topics: &'a [TopicState],
    index: usize,
    remaining: i64,
}

impl<'a> Cursor<'a> {
    fn new(topics: &'a [TopicState]) -> Self {
        let mut cursor = Cursor {
            topics,
            index: topics.len(),
            remaining: 0,
        };
        if let Some(i) = topics.iter().position(|t| !t.completed) {
            let t = &topics[i];
            cursor.index = i;
            cursor.remaining = match t.studied_minutes {
                Some(done) => (t.estimated_minutes - done).max(0),
                None => t.estimated_minutes,
            };
        }
        cursor.skip_exhausted();
        cursor
    }

    fn advance(&mut self) {
        self.index += 1;
        self.remaining = self
            .topics
            .get(self.index)
            .map(|t| t.estimated_minutes)
            .unwrap_or(0);
    }

    /// Topics already fully worked (or estimated at zero) contribute no time.
    fn skip_exhausted(&mut self) {
        while self.index < self.topics.len() && self.remaining <= 0 {
            self.advance();
        }
    }

    fn current(&self) -> Option<&'a TopicState> {
        self.topics.get(self.index)
    }
}

/// Walks each lesson's ordered topics across one week of scheduled blocks.
pub struct TopicProjector<'a> {
    cursors: HashMap<&'a str, Cursor<'a>>,
}

impl<'a> TopicProjector<'a> {
    /// `topics` must already be in curriculum order per lesson.
    pub fn new(topics: &'a HashMap<String, Vec<TopicState>>) -> Self {
        let cursors = topics
            .iter()
            .map(|(lesson_id, list)| (lesson_id.as_str(), Cursor::new(list)))
            .collect();
        Self { cursors }
    }

    /// Returns seven day lists (Monday first). `entries` may be in any order.
    pub fn project(mut self, entries: &[ProjectedEntry]) -> Vec<Vec<PlanItem>> {
        let mut sorted: Vec<&ProjectedEntry> = entries.iter().collect();
        sorted.sort_by_key(|e| (e.day, e.start));

        let mut days: Vec<Vec<PlanItem>> = vec![Vec::new(); 7];
        for entry in sorted {
            let Ok(day) = usize::try_from(entry.day) else {
                continue;
            };
            if day >= 7 {
                continue;
            }
            let Some(cursor) = self.cursors.get_mut(entry.lesson_id.as_str()) else {
                continue;
            };

            let mut left = entry.end - entry.start;
            let mut clock = entry.start;
            while left > 0 {
                let Some(topic) = cursor.current() else {
                    break;
                };
                let take = left.min(cursor.remaining);
                days[day].push(PlanItem {
                    lesson_id: entry.lesson_id.clone(),
                    topic_id: topic.id.clone(),
                    topic_name: topic.name.clone(),
                    start: clock,
                    end: clock + take,
                    minutes: take,
                });
                clock += take;
                left -= take;
                cursor.remaining -= take;
                cursor.skip_exhausted();
            }
        }
        days
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEstimate {
    pub total_topics: usize,
    pub completed_topics: usize,
    pub percent: f64,
    pub remaining_minutes: i64,
    pub weekly_minutes: i64,
    pub remaining_weeks: Option<f64>,
    pub end_date: Option<NaiveDate>,
}

pub fn progress_percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64 * 100.0
    }
}

/// `topics` are `(estimated_minutes, completed)` pairs for one lesson.
pub fn estimate_completion(
    today: NaiveDate,
    topics: &[(i64, bool)],
    weekly_minutes: i64,
) -> Result<CompletionEstimate, ScheduleError> {
    if topics.is_empty() {
        return Err(ScheduleError::NoTopics);
    }
    let completed = topics.iter().filter(|(_, done)| *done).count();
    let remaining: i64 = topics
        .iter()
        .filter(|(_, done)| !*done)
        .map(|(m, _)| *m)
        .sum();

    let (remaining_weeks, end_date) = if weekly_minutes > 0 {
        let weeks = remaining as f64 / weekly_minutes as f64;
        let days = (weeks * 7.0).floor() as i64;
        (Some(weeks), Some(today + Duration::days(days)))
    } else {
        (None, None)
    };

    Ok(CompletionEstimate {
        total_topics: topics.len(),
        completed_topics: completed,
        percent: progress_percent(completed, topics.len()),
        remaining_minutes: remaining,
        weekly_minutes,
        remaining_weeks,
        end_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(id: &str, minutes: i64, studied: Option<i64>, completed: bool) -> TopicState {
        TopicState {
            id: id.to_string(),
            name: format!("Topic {}", id),
            estimated_minutes: minutes,
            studied_minutes: studied,
            completed,
        }
    }

    fn entry(day: i64, start: i64, end: i64, lesson: &str) -> ProjectedEntry {
        ProjectedEntry {
            day,
            start,
            end,
            lesson_id: lesson.to_string(),
        }
    }

    #[test]
    fn builder_deals_lessons_round_robin_across_days() {
        let b = ScheduleBuilder::new(45, 15);
        // 09:00-12:00 gives three 60-minute steps.
        let blocks = b.build(&[0, 2], 540, 720, 2).expect("build");
        assert_eq!(blocks.len(), 6);
        assert_eq!(blocks[0], BuiltBlock { day: 0, start: 540, end: 585, lesson_index: 0 });
        assert_eq!(blocks[1].start, 600);
        assert_eq!(blocks[1].lesson_index, 1);
        assert_eq!(blocks[2].lesson_index, 0);
        // The counter continues on the next day instead of restarting.
        assert_eq!(blocks[3].day, 2);
        assert_eq!(blocks[3].lesson_index, 1);
    }

    #[test]
    fn builder_rejects_short_ranges_and_empty_inputs() {
        let b = ScheduleBuilder::new(45, 15);
        assert_eq!(
            b.build(&[0], 540, 580, 1),
            Err(ScheduleError::RangeTooShort { block_minutes: 60 })
        );
        assert_eq!(b.build(&[0], 540, 720, 0), Err(ScheduleError::NoLessons));
        assert_eq!(b.build(&[], 540, 720, 1), Err(ScheduleError::NoDays));
        assert_eq!(b.build(&[7], 540, 720, 1), Err(ScheduleError::InvalidDay(7)));
        assert_eq!(b.build(&[1], 720, 540, 1), Err(ScheduleError::StartNotBeforeEnd));
    }

    #[test]
    fn builder_rejects_out_of_range_durations() {
        let huge = ScheduleBuilder::new(i64::MAX, 1);
        assert_eq!(huge.build(&[0], 540, 600, 1), Err(ScheduleError::BadDurations));
        assert_eq!(huge.blocks_per_day(540, 600), 0);
        let zero = ScheduleBuilder::new(0, 15);
        assert_eq!(zero.build(&[0], 540, 600, 1), Err(ScheduleError::BadDurations));
        let long_break = ScheduleBuilder::new(45, MINUTES_PER_DAY + 1);
        assert_eq!(long_break.build(&[0], 540, 600, 1), Err(ScheduleError::BadDurations));
        assert_eq!(ScheduleBuilder::new(i64::MAX, i64::MAX).blocks_per_day(0, 60), 0);
    }

    #[test]
    fn conflicts_name_the_booked_lesson() {
        let booked = vec![BookedSlot {
            lesson_name: "Matematik".to_string(),
            start: 540,
            end: 585,
        }];
        let clash = Slot { day: 0, start: 570, end: 600 };
        match check_conflicts(&clash, &booked) {
            Err(ScheduleError::Conflict { lesson, start, end }) => {
                assert_eq!(lesson, "Matematik");
                assert_eq!(start, "09:00");
                assert_eq!(end, "09:45");
            }
            other => panic!("unexpected {:?}", other),
        }
        let touching = Slot { day: 0, start: 585, end: 630 };
        assert!(check_conflicts(&touching, &booked).is_ok());
        let enclosing = Slot { day: 0, start: 500, end: 700 };
        assert!(check_conflicts(&enclosing, &booked).is_err());
    }

    #[test]
    fn projector_splits_blocks_across_topics() {
        let mut topics = HashMap::new();
        topics.insert(
            "math".to_string(),
            vec![
                topic("t1", 60, Some(60), true),
                topic("t2", 60, Some(30), false),
                topic("t3", 45, None, false),
            ],
        );
        let entries = vec![entry(1, 600, 660, "math"), entry(0, 540, 585, "math")];
        let days = TopicProjector::new(&topics).project(&entries);

        // Monday: 30 minutes left on t2, then 15 into t3.
        assert_eq!(days[0].len(), 2);
        assert_eq!(days[0][0].topic_id, "t2");
        assert_eq!((days[0][0].start, days[0][0].end), (540, 570));
        assert_eq!(days[0][1].topic_id, "t3");
        assert_eq!((days[0][1].start, days[0][1].end), (570, 585));

        // Tuesday: the remaining 30 of t3, then nothing left to study.
        assert_eq!(days[1].len(), 1);
        assert_eq!(days[1][0].topic_id, "t3");
        assert_eq!(days[1][0].minutes, 30);
    }

    #[test]
    fn projector_skips_finished_lessons_and_overworked_topics() {
        let mut topics = HashMap::new();
        topics.insert("done".to_string(), vec![topic("a", 30, Some(30), true)]);
        topics.insert(
            "chem".to_string(),
            vec![topic("b", 30, Some(50), false), topic("c", 20, None, false)],
        );
        let entries = vec![entry(3, 600, 645, "done"), entry(3, 660, 705, "chem")];
        let days = TopicProjector::new(&topics).project(&entries);
        assert_eq!(days[3].len(), 1);
        assert_eq!(days[3][0].topic_id, "c");
        assert_eq!(days[3][0].minutes, 20);
    }

    #[test]
    fn completion_estimate_projects_end_date() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).expect("date");
        let est = estimate_completion(today, &[(90, true), (120, false), (60, false)], 90)
            .expect("estimate");
        assert_eq!(est.remaining_minutes, 180);
        assert_eq!(est.remaining_weeks, Some(2.0));
        assert_eq!(est.end_date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert!((est.percent - 100.0 / 3.0).abs() < 1e-9);

        let none = estimate_completion(today, &[(30, false)], 0).expect("estimate");
        assert_eq!(none.end_date, None);
        assert_eq!(estimate_completion(today, &[], 90), Err(ScheduleError::NoTopics));
    }
}
