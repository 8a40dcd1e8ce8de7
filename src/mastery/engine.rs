use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::mastery::attempts::AttemptLog;
use crate::mastery::bkt::BktModel;
use crate::mastery::config::MasteryConfig;
use crate::mastery::merger::EstimateMerger;
use crate::mastery::ranker;
use crate::mastery::store::{MasteryStore, StoreError, StudentRecords};
use crate::mastery::time_adjust::TimeAdjuster;
use crate::mastery::types::{
    AttemptError, QuizAttempt, Recommendation, RecommendationRequest, SkillEstimate, SkillId,
    StudentId,
};
use crate::services::cf::CfEstimator;

/// When mastery updates reach disk.
///
/// `PerAttempt`: an ingestion returns only after its update is saved.
/// `Batched`: saves happen at batch end, on `flush`, and at shutdown; a crash
/// loses at most the updates since the last successful save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    #[default]
    PerAttempt,
    Batched,
}

impl PersistMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "per_attempt" | "per-attempt" | "attempt" => Some(Self::PerAttempt),
            "batched" | "batch" => Some(Self::Batched),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerAttempt => "per_attempt",
            Self::Batched => "batched",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub persist_mode: PersistMode,
    pub cf_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            persist_mode: PersistMode::PerAttempt,
            cf_timeout: Duration::from_millis(2_000),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("attempt {index} rejected: {source}")]
    Invalid {
        index: usize,
        #[source]
        source: AttemptError,
    },
    #[error("failed to persist mastery update: {0}")]
    Persist(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum RecommendError {
    #[error("candidate skill set is empty")]
    NoCandidates,
    #[error("top_n must be at least 1")]
    ZeroTopN,
    #[error("failed to persist pending attempts: {0}")]
    Persist(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedAttempt {
    pub index: usize,
    pub student_id: StudentId,
    pub skill_id: SkillId,
    pub mastery: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedAttempt {
    pub index: usize,
    pub reason: AttemptError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub applied: Vec<AppliedAttempt>,
    pub rejected: Vec<RejectedAttempt>,
}

struct Applied {
    student: StudentId,
    skill: SkillId,
    prior: Option<f64>,
    next: f64,
}

pub struct MasteryEngine {
    config: MasteryConfig,
    bkt: BktModel,
    store: Arc<MasteryStore>,
    attempts: RwLock<AttemptLog>,
    merger: EstimateMerger,
    time_adjuster: TimeAdjuster,
    persist_mode: PersistMode,
    dirty: AtomicBool,
}

impl MasteryEngine {
    pub fn new(
        config: MasteryConfig,
        store: Arc<MasteryStore>,
        cf: Arc<dyn CfEstimator>,
        options: EngineOptions,
    ) -> Self {
        let bkt = BktModel::new(config.bkt.clone());
        let merger = EstimateMerger::new(cf, options.cf_timeout, bkt.initial());
        let time_adjuster = TimeAdjuster::new(config.time_adjust.clone());

        Self {
            config,
            bkt,
            store,
            attempts: RwLock::new(AttemptLog::new()),
            merger,
            time_adjuster,
            persist_mode: options.persist_mode,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &MasteryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MasteryStore> {
        &self.store
    }

    pub fn persist_mode(&self) -> PersistMode {
        self.persist_mode
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.read().recorded_count()
    }

    pub fn pending_count(&self) -> usize {
        self.attempts.read().pending_count()
    }

    pub fn mastery_of(&self, student: &StudentId) -> StudentRecords {
        self.store.student_snapshot(student)
    }

    pub fn last_attempt_at(&self, student: &StudentId) -> Option<DateTime<Utc>> {
        self.attempts.read().last_attempt_at(student)
    }

    /// Applies one attempt and returns the new mastery probability.
    pub async fn ingest(&self, attempt: QuizAttempt) -> Result<f64, IngestError> {
        validate(0, &attempt)?;

        let applied = self.apply(&attempt);
        if self.persist_mode == PersistMode::PerAttempt {
            self.persist_or_undo(std::slice::from_ref(&applied)).await?;
        }

        self.attempts.write().record(&attempt);
        Ok(applied.next)
    }

    /// Applies every valid attempt in order and saves once at the end.
    ///
    /// Invalid attempts are reported and skipped. If the save fails, all of
    /// the batch's updates are rolled back.
    pub async fn ingest_batch(&self, attempts: Vec<QuizAttempt>) -> Result<BatchOutcome, IngestError> {
        let mut outcome = BatchOutcome::default();
        let mut undo = Vec::new();
        let mut accepted = Vec::new();

        for (index, attempt) in attempts.into_iter().enumerate() {
            if let Err(IngestError::Invalid { source, .. }) = validate(index, &attempt) {
                outcome.rejected.push(RejectedAttempt {
                    index,
                    reason: source,
                });
                continue;
            }

            let applied = self.apply(&attempt);
            outcome.applied.push(AppliedAttempt {
                index,
                student_id: attempt.student_id.clone(),
                skill_id: attempt.skill_id.clone(),
                mastery: applied.next,
            });
            undo.push(applied);
            accepted.push(attempt);
        }

        if !undo.is_empty() {
            self.persist_or_undo(&undo).await?;
        }

        let mut log = self.attempts.write();
        for attempt in &accepted {
            log.record(attempt);
        }

        tracing::debug!(
            applied = outcome.applied.len(),
            rejected = outcome.rejected.len(),
            "attempt batch ingested"
        );
        Ok(outcome)
    }

    /// Records an attempt now and defers its mastery update until the next
    /// recommendation for that student or an explicit flush.
    pub fn enqueue(&self, attempt: QuizAttempt) -> Result<(), IngestError> {
        validate(0, &attempt)?;
        self.attempts.write().enqueue(attempt);
        Ok(())
    }

    pub async fn recommend(
        &self,
        request: RecommendationRequest,
    ) -> Result<Recommendation, RecommendError> {
        if request.candidate_skills.is_empty() {
            return Err(RecommendError::NoCandidates);
        }
        let top_n = request.top_n.unwrap_or(self.config.ranking.top_n);
        if top_n == 0 {
            return Err(RecommendError::ZeroTopN);
        }

        let student = request.student_id;
        self.apply_pending(Some(&student)).await?;

        let records = self.store.student_snapshot(&student);
        let merged = self
            .merger
            .merge(&student, &records, &request.candidate_skills)
            .await;

        if !merged.has_evidence() {
            tracing::debug!(%student, "no mastery data for any candidate skill");
            return Ok(Recommendation::NoData);
        }

        let adjusted: BTreeMap<SkillId, SkillEstimate> = {
            let log = self.attempts.read();
            merged
                .estimates
                .into_iter()
                .map(|(skill, estimate)| {
                    let value =
                        self.time_adjuster
                            .adjust_for(&log, &student, &skill, estimate.value);
                    (
                        skill,
                        SkillEstimate {
                            value,
                            source: estimate.source,
                        },
                    )
                })
                .collect()
        };

        let result = ranker::rank_with(&adjusted, &self.config.ranking, Some(top_n));
        tracing::debug!(%student, status = result.status(), "recommendation computed");
        Ok(result)
    }

    /// Applies every queued attempt.
    pub async fn flush_pending(&self) -> Result<usize, StoreError> {
        self.apply_pending(None).await
    }

    /// Saves the current state if anything changed since the last save.
    pub async fn flush(&self) -> Result<(), StoreError> {
        if !self.dirty.load(Ordering::Acquire) {
            return Ok(());
        }
        self.persist().await
    }

    pub fn spawn_periodic_flush(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = engine.flush().await {
                    tracing::warn!(error = %err, "periodic mastery flush failed");
                }
            }
        })
    }

    async fn apply_pending(&self, student: Option<&StudentId>) -> Result<usize, StoreError> {
        let pending = {
            let mut log = self.attempts.write();
            match student {
                Some(student) => log.take_pending(student),
                None => log.take_all_pending(),
            }
        };
        if pending.is_empty() {
            return Ok(0);
        }

        let undo: Vec<Applied> = pending.iter().map(|a| self.apply(a)).collect();
        if self.persist_mode == PersistMode::PerAttempt {
            if let Err(err) = self.persist_or_undo(&undo).await {
                self.attempts.write().requeue_front(pending);
                return Err(err);
            }
        }

        tracing::debug!(count = undo.len(), "pending attempts applied");
        Ok(undo.len())
    }

    fn apply(&self, attempt: &QuizAttempt) -> Applied {
        let correct = self.bkt.is_correct(attempt.score);
        let (prior, next) = self
            .store
            .update(&attempt.student_id, &attempt.skill_id, |prior| {
                self.bkt
                    .update(prior.unwrap_or_else(|| self.bkt.initial()), correct)
            });
        self.dirty.store(true, Ordering::Release);

        Applied {
            student: attempt.student_id.clone(),
            skill: attempt.skill_id.clone(),
            prior,
            next,
        }
    }

    /// Saves. On failure, undoes `undo` and saves again, so the file never
    /// keeps a value from an operation reported as failed once a later save
    /// succeeds. If that second save fails too, the store stays dirty for the
    /// next flush.
    async fn persist_or_undo(&self, undo: &[Applied]) -> Result<(), StoreError> {
        let Err(err) = self.persist().await else {
            return Ok(());
        };
        self.rollback(undo);

        // the failed write may have landed, and concurrent saves may have
        // captured the undone values
        if let Err(resave) = self.persist().await {
            tracing::warn!(error = %resave, "re-save after rollback failed, store left dirty");
        }
        Err(err)
    }

    fn rollback(&self, applied: &[Applied]) {
        for entry in applied.iter().rev() {
            if !self
                .store
                .restore_if(&entry.student, &entry.skill, entry.next, entry.prior)
            {
                tracing::warn!(
                    student = %entry.student,
                    skill = %entry.skill,
                    "record changed after failed save, keeping newer value"
                );
            }
        }
    }

    async fn persist(&self) -> Result<(), StoreError> {
        self.dirty.store(false, Ordering::Release);
        let store = Arc::clone(&self.store);
        let result = match tokio::task::spawn_blocking(move || store.save()).await {
            Ok(result) => result,
            Err(err) => Err(StoreError::Io {
                path: self.store.path().to_path_buf(),
                source: std::io::Error::other(err),
            }),
        };
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }
}

fn validate(index: usize, attempt: &QuizAttempt) -> Result<(), IngestError> {
    attempt.validate().map_err(|source| {
        tracing::debug!(
            index,
            student = %attempt.student_id,
            skill = %attempt.skill_id,
            error = %source,
            "attempt rejected"
        );
        IngestError::Invalid { index, source }
    })
}
