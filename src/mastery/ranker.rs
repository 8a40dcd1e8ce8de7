use std::collections::BTreeMap;

use crate::mastery::config::RankingParams;
use crate::mastery::types::{RankedSkill, Recommendation, SkillEstimate, SkillId};

/// Weakest skills first, at most `top_n`, excluding anything at or above the
/// mastery threshold. Equal estimates are ordered by skill id.
pub fn rank(
    estimates: &BTreeMap<SkillId, SkillEstimate>,
    mastery_threshold: f64,
    top_n: usize,
) -> Recommendation {
    let mut weak: Vec<RankedSkill> = estimates
        .iter()
        .filter(|(_, e)| e.value < mastery_threshold)
        .map(|(skill, e)| RankedSkill {
            skill_id: skill.clone(),
            estimate: e.value,
            source: e.source,
        })
        .collect();

    if weak.is_empty() {
        return Recommendation::FullyMastered;
    }

    weak.sort_by(|a, b| {
        a.estimate
            .total_cmp(&b.estimate)
            .then_with(|| a.skill_id.cmp(&b.skill_id))
    });
    weak.truncate(top_n);

    Recommendation::Ranked(weak)
}

pub fn rank_with(
    estimates: &BTreeMap<SkillId, SkillEstimate>,
    params: &RankingParams,
    top_n: Option<usize>,
) -> Recommendation {
    rank(
        estimates,
        params.mastery_threshold,
        top_n.unwrap_or(params.top_n),
    )
}
