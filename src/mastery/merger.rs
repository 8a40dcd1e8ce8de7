//! Per-skill merge of BKT records with the CF baseline.
//!
//! A BKT record, once it exists, is authoritative. CF only fills in pairs
//! without direct evidence, and `p_init` fills in what CF cannot answer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::mastery::store::StudentRecords;
use crate::mastery::types::{EstimateSource, SkillEstimate, SkillId, StudentId};
use crate::services::cf::{CfError, CfEstimator};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedEstimates {
    pub estimates: BTreeMap<SkillId, SkillEstimate>,
}

impl MergedEstimates {
    /// True when at least one skill is backed by BKT or CF rather than the prior.
    pub fn has_evidence(&self) -> bool {
        self.estimates
            .values()
            .any(|e| e.source != EstimateSource::Prior)
    }
}

/// Merge for one skill, given what each source produced.
pub fn merge_one(bkt: Option<f64>, cf: Option<f64>, p_init: f64) -> SkillEstimate {
    match (bkt, cf) {
        (Some(value), _) => SkillEstimate {
            value,
            source: EstimateSource::Bkt,
        },
        (None, Some(value)) => SkillEstimate {
            value,
            source: EstimateSource::Cf,
        },
        (None, None) => SkillEstimate {
            value: p_init,
            source: EstimateSource::Prior,
        },
    }
}

pub struct EstimateMerger {
    cf: Arc<dyn CfEstimator>,
    cf_timeout: Duration,
    p_init: f64,
}

impl EstimateMerger {
    pub fn new(cf: Arc<dyn CfEstimator>, cf_timeout: Duration, p_init: f64) -> Self {
        Self {
            cf,
            cf_timeout,
            p_init,
        }
    }

    /// `records` must be a snapshot of the student's BKT state taken after
    /// any pending attempts were applied.
    pub async fn merge(
        &self,
        student: &StudentId,
        records: &StudentRecords,
        skills: &[SkillId],
    ) -> MergedEstimates {
        let candidates: BTreeSet<&SkillId> = skills.iter().collect();

        let missing: Vec<&SkillId> = candidates
            .iter()
            .copied()
            .filter(|skill| !records.contains_key(*skill))
            .collect();

        let cf_results = join_all(missing.iter().map(|skill| self.cf_estimate(student, skill))).await;
        let cf: BTreeMap<&SkillId, f64> = missing
            .into_iter()
            .zip(cf_results)
            .filter_map(|(skill, value)| value.map(|v| (skill, v)))
            .collect();

        let estimates = candidates
            .into_iter()
            .map(|skill| {
                let merged = merge_one(records.get(skill).copied(), cf.get(skill).copied(), self.p_init);
                (skill.clone(), merged)
            })
            .collect();

        MergedEstimates { estimates }
    }

    async fn cf_estimate(&self, student: &StudentId, skill: &SkillId) -> Option<f64> {
        let result = match tokio::time::timeout(self.cf_timeout, self.cf.estimate(student, skill)).await {
            Ok(result) => result,
            Err(_) => Err(CfError::Timeout(self.cf_timeout)),
        };

        match result {
            Ok(value) => Some(value),
            Err(CfError::NoEstimate { .. }) => {
                tracing::debug!(%student, %skill, "no CF estimate");
                None
            }
            Err(err) => {
                tracing::warn!(%student, %skill, error = %err, "CF estimate unavailable");
                None
            }
        }
    }
}
