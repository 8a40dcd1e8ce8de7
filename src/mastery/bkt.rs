//! Bayesian Knowledge Tracing update.
//!
//! Two-state model (mastered / unmastered). Each observed response first
//! applies Bayes' rule with the guess and slip noise terms, then the
//! learning transition `p + (1 - p) * p_learn`.

use crate::mastery::config::BktParams;

#[derive(Debug, Clone)]
pub struct BktModel {
    params: BktParams,
}

impl BktModel {
    pub fn new(params: BktParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &BktParams {
        &self.params
    }

    /// Mastery assumed for a pair with no record yet.
    pub fn initial(&self) -> f64 {
        self.clamp(self.params.p_init)
    }

    pub fn is_correct(&self, score: f64) -> bool {
        score >= self.params.correct_score
    }

    pub fn clamp(&self, p: f64) -> f64 {
        let eps = self.params.epsilon;
        if p.is_nan() {
            return eps;
        }
        p.clamp(eps, 1.0 - eps)
    }

    /// Posterior after observing one response, before the learning transition.
    pub fn posterior(&self, prior: f64, correct: bool) -> f64 {
        let p = self.clamp(prior);
        let BktParams { p_guess, p_slip, .. } = self.params;

        let (evidence_mastered, evidence_unmastered) = if correct {
            (p * (1.0 - p_slip), (1.0 - p) * p_guess)
        } else {
            (p * p_slip, (1.0 - p) * (1.0 - p_guess))
        };

        let denom = evidence_mastered + evidence_unmastered;
        if denom <= 0.0 {
            // guess/slip at 0 or 1 with the observation impossible under both states
            return p;
        }
        self.clamp(evidence_mastered / denom)
    }

    pub fn update(&self, prior: f64, correct: bool) -> f64 {
        let posterior = self.posterior(prior, correct);
        self.clamp(posterior + (1.0 - posterior) * self.params.p_learn)
    }

    pub fn update_with_score(&self, prior: f64, score: f64) -> f64 {
        self.update(prior, self.is_correct(score))
    }
}

impl Default for BktModel {
    fn default() -> Self {
        Self::new(BktParams::default())
    }
}
