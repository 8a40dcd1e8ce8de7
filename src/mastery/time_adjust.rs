use crate::mastery::attempts::AttemptLog;
use crate::mastery::config::TimeAdjustParams;
use crate::mastery::types::{SkillId, StudentId};

#[derive(Debug, Clone)]
pub struct TimeAdjuster {
    params: TimeAdjustParams,
}

impl TimeAdjuster {
    pub fn new(params: TimeAdjustParams) -> Self {
        Self { params }
    }

    /// Rescales `estimate` by the student's response time relative to the
    /// skill average. Identity when either time is unknown. Result in `[0, 1]`.
    pub fn adjust(&self, estimate: f64, normalized_time: Option<f64>) -> f64 {
        let factor = match normalized_time {
            Some(t) if t > self.params.slow_ratio => self.params.slow_factor,
            Some(t) if t < self.params.fast_ratio => self.params.fast_factor,
            _ => 1.0,
        };
        (estimate * factor).clamp(0.0, 1.0)
    }

    pub fn normalized_time(log: &AttemptLog, student: &StudentId, skill: &SkillId) -> Option<f64> {
        let own = log.response_time_for(student, skill)?;
        let average = log.average_response_time(skill)?;
        Some(own / average)
    }

    pub fn adjust_for(
        &self,
        log: &AttemptLog,
        student: &StudentId,
        skill: &SkillId,
        estimate: f64,
    ) -> f64 {
        self.adjust(estimate, Self::normalized_time(log, student, skill))
    }
}

impl Default for TimeAdjuster {
    fn default() -> Self {
        Self::new(TimeAdjustParams::default())
    }
}
