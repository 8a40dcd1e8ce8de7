use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::mastery::types::{QuizAttempt, SkillId, StudentId};

#[derive(Debug, Default, Clone, Copy)]
struct TimeStat {
    total_seconds: f64,
    count: u64,
}

/// Running statistics over every accepted attempt, plus the pending queue.
///
/// Only aggregates are kept: per-skill response-time totals, the latest
/// response time per (student, skill), and when each student was last seen.
/// None of it is persisted. Attempts can also sit in a per-student pending
/// queue until their BKT update is applied.
#[derive(Debug, Default)]
pub struct AttemptLog {
    recorded: usize,
    per_skill: HashMap<SkillId, TimeStat>,
    latest: HashMap<(StudentId, SkillId), f64>,
    last_seen: HashMap<StudentId, DateTime<Utc>>,
    pending: HashMap<StudentId, VecDeque<QuizAttempt>>,
}

impl AttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, attempt: &QuizAttempt) {
        let stat = self.per_skill.entry(attempt.skill_id.clone()).or_default();
        stat.total_seconds += attempt.response_time_seconds;
        stat.count += 1;

        self.latest.insert(
            (attempt.student_id.clone(), attempt.skill_id.clone()),
            attempt.response_time_seconds,
        );
        self.last_seen.insert(attempt.student_id.clone(), Utc::now());
        self.recorded += 1;
    }

    /// Records the attempt as known but defers its mastery update.
    pub fn enqueue(&mut self, attempt: QuizAttempt) {
        self.record(&attempt);
        self.pending
            .entry(attempt.student_id.clone())
            .or_default()
            .push_back(attempt);
    }

    pub fn take_pending(&mut self, student: &StudentId) -> Vec<QuizAttempt> {
        self.pending
            .remove(student)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn take_all_pending(&mut self) -> Vec<QuizAttempt> {
        let mut students: Vec<StudentId> = self.pending.keys().cloned().collect();
        students.sort();
        students
            .into_iter()
            .flat_map(|student| self.take_pending(&student))
            .collect()
    }

    /// Puts attempts back at the front of their student's queue.
    pub fn requeue_front(&mut self, attempts: Vec<QuizAttempt>) {
        for attempt in attempts.into_iter().rev() {
            self.pending
                .entry(attempt.student_id.clone())
                .or_default()
                .push_front(attempt);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    /// Mean response time over all known attempts for `skill`.
    pub fn average_response_time(&self, skill: &SkillId) -> Option<f64> {
        let stat = self.per_skill.get(skill)?;
        if stat.count == 0 {
            return None;
        }
        let mean = stat.total_seconds / stat.count as f64;
        (mean.is_finite() && mean > 0.0).then_some(mean)
    }

    /// Response time of the student's most recent attempt on `skill`.
    pub fn response_time_for(&self, student: &StudentId, skill: &SkillId) -> Option<f64> {
        self.latest.get(&(student.clone(), skill.clone())).copied()
    }

    /// Number of attempts recorded since startup.
    pub fn recorded_count(&self) -> usize {
        self.recorded
    }

    /// When the student's most recent attempt was recorded.
    pub fn last_attempt_at(&self, student: &StudentId) -> Option<DateTime<Utc>> {
        self.last_seen.get(student).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(attempts: &[(i64, i64, f64)]) -> AttemptLog {
        let mut log = AttemptLog::new();
        for &(student, skill, time) in attempts {
            log.record(&QuizAttempt::new(student, skill, 0.5, time));
        }
        log
    }

    #[test]
    fn test_average_spans_all_students() {
        let log = log_with(&[(1, 101, 30.0), (2, 101, 60.0), (3, 102, 10.0)]);
        assert_eq!(log.average_response_time(&101.into()), Some(45.0));
        assert_eq!(log.average_response_time(&102.into()), Some(10.0));
        assert_eq!(log.average_response_time(&103.into()), None);
    }

    #[test]
    fn test_zero_average_is_unavailable() {
        let log = log_with(&[(1, 101, 0.0), (2, 101, 0.0)]);
        assert_eq!(log.average_response_time(&101.into()), None);
    }

    #[test]
    fn test_latest_attempt_wins_for_student_time() {
        let log = log_with(&[(1, 101, 30.0), (1, 101, 90.0), (2, 101, 10.0)]);
        assert_eq!(log.response_time_for(&1.into(), &101.into()), Some(90.0));
        assert_eq!(log.response_time_for(&1.into(), &102.into()), None);
        assert!(log.last_attempt_at(&2.into()).is_some());
        assert!(log.last_attempt_at(&3.into()).is_none());
    }

    #[test]
    fn test_repeated_attempts_do_not_grow_log() {
        let mut log = AttemptLog::new();
        for i in 0..1_000 {
            log.record(&QuizAttempt::new(1, 101, 0.5, f64::from(i % 10)));
        }

        assert_eq!(log.recorded_count(), 1_000);
        assert_eq!(log.per_skill.len(), 1);
        assert_eq!(log.latest.len(), 1);
        assert_eq!(log.last_seen.len(), 1);
        assert_eq!(log.response_time_for(&1.into(), &101.into()), Some(9.0));
        assert_eq!(log.average_response_time(&101.into()), Some(4.5));
    }

    #[test]
    fn test_pending_queue_preserves_order_per_student() {
        let mut log = AttemptLog::new();
        log.enqueue(QuizAttempt::new(1, 101, 0.9, 10.0));
        log.enqueue(QuizAttempt::new(2, 101, 0.1, 10.0));
        log.enqueue(QuizAttempt::new(1, 102, 0.4, 20.0));

        assert_eq!(log.recorded_count(), 3);
        assert_eq!(log.pending_count(), 3);

        let taken = log.take_pending(&1.into());
        let skills: Vec<&str> = taken.iter().map(|a| a.skill_id.as_str()).collect();
        assert_eq!(skills, vec!["101", "102"]);
        assert_eq!(log.pending_count(), 1);

        log.requeue_front(taken);
        assert_eq!(log.pending_count(), 3);
        assert_eq!(log.take_all_pending().len(), 3);
        assert_eq!(log.pending_count(), 0);
    }
}
