use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Str(String),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Int(v) => v.to_string(),
            RawId::Str(s) => s,
        }
    }
}

/// Opaque student identifier. Accepts a JSON string or integer on input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for StudentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawId::deserialize(deserializer).map(|raw| Self(raw.into()))
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StudentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<i64> for StudentId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<i32> for StudentId {
    fn from(value: i32) -> Self {
        Self(value.to_string())
    }
}

/// Opaque skill identifier.
///
/// Ordering is numeric when both ids are integers, lexicographic otherwise;
/// numeric ids sort before non-numeric ones. Rankings rely on this for
/// deterministic tie-breaks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SkillId(String);

impl SkillId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<i128> {
        self.0.parse::<i128>().ok()
    }
}

impl Ord for SkillId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for SkillId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'de> Deserialize<'de> for SkillId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawId::deserialize(deserializer).map(|raw| Self(raw.into()))
    }
}

impl fmt::Display for SkillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SkillId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<i64> for SkillId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<i32> for SkillId {
    fn from(value: i32) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub student_id: StudentId,
    pub skill_id: SkillId,
    pub score: f64,
    pub response_time_seconds: f64,
}

impl QuizAttempt {
    pub fn new(
        student_id: impl Into<StudentId>,
        skill_id: impl Into<SkillId>,
        score: f64,
        response_time_seconds: f64,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            skill_id: skill_id.into(),
            score,
            response_time_seconds,
        }
    }

    pub fn validate(&self) -> Result<(), AttemptError> {
        if self.student_id.as_str().trim().is_empty() {
            return Err(AttemptError::EmptyStudent);
        }
        if self.skill_id.as_str().trim().is_empty() {
            return Err(AttemptError::EmptySkill);
        }
        if !self.score.is_finite() || !(0.0..=1.0).contains(&self.score) {
            return Err(AttemptError::ScoreOutOfRange(self.score));
        }
        if !self.response_time_seconds.is_finite() || self.response_time_seconds < 0.0 {
            return Err(AttemptError::InvalidResponseTime(self.response_time_seconds));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttemptError {
    #[error("student id must not be empty")]
    EmptyStudent,
    #[error("skill id must not be empty")]
    EmptySkill,
    #[error("score {0} is outside [0, 1]")]
    ScoreOutOfRange(f64),
    #[error("response time {0}s must be a non-negative number")]
    InvalidResponseTime(f64),
}

#[derive(Debug, Clone)]
pub struct RecommendationRequest {
    pub student_id: StudentId,
    pub candidate_skills: Vec<SkillId>,
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimateSource {
    Bkt,
    Cf,
    Prior,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkillEstimate {
    pub value: f64,
    pub source: EstimateSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedSkill {
    pub skill_id: SkillId,
    pub estimate: f64,
    pub source: EstimateSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recommendation {
    Ranked(Vec<RankedSkill>),
    FullyMastered,
    NoData,
}

impl Recommendation {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Ranked(_) => "ranked",
            Self::FullyMastered => "fully_mastered",
            Self::NoData => "no_data",
        }
    }

    pub fn skill_ids(&self) -> Vec<SkillId> {
        match self {
            Self::Ranked(skills) => skills.iter().map(|s| s.skill_id.clone()).collect(),
            _ => Vec::new(),
        }
    }
}
