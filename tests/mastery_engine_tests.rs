//! End-to-end tests for MasteryEngine: ingestion, persistence, merge policy
//! and recommendation outcomes.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use mastery_backend::mastery::bkt::BktModel;
use mastery_backend::mastery::store::{load_state, save_state};
use mastery_backend::mastery::{
    EngineOptions, EstimateSource, IngestError, MasteryConfig, MasteryEngine, MasteryState,
    MasteryStore, PersistMode, QuizAttempt, Recommendation, RecommendationRequest, SkillId,
    StateWriter, StoreError, StudentId,
};
use mastery_backend::services::cf::{CfError, CfEstimator, StaticCfTable, UnavailableCf};

mod common;

use common::{approx, create_engine, EPSILON};

const AFTER_CORRECT: f64 = 0.692_682_926_8;

struct SlowCf(Duration);

#[async_trait]
impl CfEstimator for SlowCf {
    async fn estimate(&self, _student: &StudentId, _skill: &SkillId) -> Result<f64, CfError> {
        tokio::time::sleep(self.0).await;
        Ok(0.05)
    }
}

enum WriteOutcome {
    /// The file is replaced but the save still reports an error.
    LandThenFail,
    Fail,
}

/// Plays back one outcome per save, then writes normally.
struct ScriptedWriter {
    script: parking_lot::Mutex<VecDeque<WriteOutcome>>,
}

impl ScriptedWriter {
    fn new(outcomes: impl IntoIterator<Item = WriteOutcome>) -> Self {
        Self {
            script: parking_lot::Mutex::new(outcomes.into_iter().collect()),
        }
    }
}

impl StateWriter for ScriptedWriter {
    fn write(&self, path: &Path, state: &MasteryState) -> Result<(), StoreError> {
        let outcome = self.script.lock().pop_front();
        let injected = || StoreError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other("disk full"),
        };
        match outcome {
            None => save_state(path, state),
            Some(WriteOutcome::LandThenFail) => {
                save_state(path, state)?;
                Err(injected())
            }
            Some(WriteOutcome::Fail) => Err(injected()),
        }
    }
}

fn scripted_engine(dir: &Path, outcomes: Vec<WriteOutcome>) -> MasteryEngine {
    let store = MasteryStore::with_state(common::store_path(dir), EPSILON, MasteryState::new())
        .with_writer(ScriptedWriter::new(outcomes));
    MasteryEngine::new(
        MasteryConfig::default(),
        Arc::new(store),
        Arc::new(UnavailableCf),
        EngineOptions::default(),
    )
}

fn request(student: i64, skills: &[i64], top_n: Option<usize>) -> RecommendationRequest {
    RecommendationRequest {
        student_id: student.into(),
        candidate_skills: skills.iter().map(|&s| SkillId::from(s)).collect(),
        top_n,
    }
}

fn ranked_ids(result: &Recommendation) -> Vec<String> {
    result
        .skill_ids()
        .iter()
        .map(|id| id.as_str().to_string())
        .collect()
}

#[tokio::test]
async fn test_bkt_record_takes_precedence_over_cf() {
    let dir = tempfile::tempdir().unwrap();
    let cf = StaticCfTable::new().with(1, 101, 0.01).with(1, 102, 0.5);
    let engine = create_engine(dir.path(), Arc::new(cf), PersistMode::PerAttempt);

    engine
        .ingest(QuizAttempt::new(1, 101, 0.9, 20.0))
        .await
        .unwrap();

    let result = engine.recommend(request(1, &[101, 102, 103], Some(3))).await.unwrap();
    let Recommendation::Ranked(skills) = result else {
        panic!("expected ranked result, got {result:?}");
    };

    assert_eq!(skills.len(), 3);
    assert_eq!(skills[0].skill_id.as_str(), "103");
    assert_eq!(skills[0].source, EstimateSource::Prior);
    assert!(approx(skills[0].estimate, 0.3));
    assert_eq!(skills[1].skill_id.as_str(), "102");
    assert_eq!(skills[1].source, EstimateSource::Cf);
    assert_eq!(skills[2].skill_id.as_str(), "101");
    assert_eq!(skills[2].source, EstimateSource::Bkt);
    assert!(approx(skills[2].estimate, AFTER_CORRECT));
}

#[tokio::test]
async fn test_no_data_is_distinct_from_fully_mastered() {
    let dir = tempfile::tempdir().unwrap();
    let cf = StaticCfTable::new().with(1, 101, 0.95);
    let engine = create_engine(dir.path(), Arc::new(cf), PersistMode::PerAttempt);

    let mastered = engine.recommend(request(1, &[101], None)).await.unwrap();
    assert_eq!(mastered, Recommendation::FullyMastered);

    let unknown = engine.recommend(request(2, &[101, 102], None)).await.unwrap();
    assert_eq!(unknown, Recommendation::NoData);
}

#[tokio::test]
async fn test_ranking_scenario_with_default_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let cf = StaticCfTable::new()
        .with(1, 101, 0.92)
        .with(1, 102, 0.75)
        .with(1, 103, 0.60);
    let engine = create_engine(dir.path(), Arc::new(cf), PersistMode::PerAttempt);

    let result = engine.recommend(request(1, &[101, 102, 103], Some(2))).await.unwrap();
    assert_eq!(ranked_ids(&result), vec!["103", "102"]);
}

#[tokio::test]
async fn test_slow_cf_falls_back_to_prior() {
    let dir = tempfile::tempdir().unwrap();
    let store = MasteryStore::open(common::store_path(dir.path()), EPSILON).unwrap();
    let engine = MasteryEngine::new(
        MasteryConfig::default(),
        Arc::new(store),
        Arc::new(SlowCf(Duration::from_secs(5))),
        EngineOptions {
            persist_mode: PersistMode::PerAttempt,
            cf_timeout: Duration::from_millis(50),
        },
    );
    engine
        .ingest(QuizAttempt::new(1, 101, 0.9, 20.0))
        .await
        .unwrap();

    let result = engine.recommend(request(1, &[101, 102], None)).await.unwrap();
    let Recommendation::Ranked(skills) = result else {
        panic!("expected ranked result, got {result:?}");
    };
    assert_eq!(skills[0].skill_id.as_str(), "102");
    assert_eq!(skills[0].source, EstimateSource::Prior);
    assert!(approx(skills[0].estimate, 0.3));
}

#[tokio::test]
async fn test_slow_response_lowers_estimate() {
    let dir = tempfile::tempdir().unwrap();
    let engine = create_engine(dir.path(), Arc::new(UnavailableCf), PersistMode::PerAttempt);

    engine.ingest(QuizAttempt::new(1, 101, 0.9, 40.0)).await.unwrap();
    engine.ingest(QuizAttempt::new(2, 101, 0.9, 10.0)).await.unwrap();

    let slow = engine.recommend(request(1, &[101], Some(1))).await.unwrap();
    let Recommendation::Ranked(skills) = slow else {
        panic!("expected ranked result, got {slow:?}");
    };
    assert!(approx(skills[0].estimate, AFTER_CORRECT * 0.9));

    let fast = engine.recommend(request(2, &[101], Some(1))).await.unwrap();
    let Recommendation::Ranked(skills) = fast else {
        panic!("expected ranked result, got {fast:?}");
    };
    assert!(approx(skills[0].estimate, AFTER_CORRECT * 1.05));

    // stored value is unaffected by the adjustment
    let stored = engine.mastery_of(&1.into());
    assert!(approx(stored[&SkillId::from(101)], AFTER_CORRECT));
}

#[tokio::test]
async fn test_failed_save_rolls_back_update() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocked");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let store = MasteryStore::with_state(blocker.join("bkt.json"), EPSILON, MasteryState::new());
    let engine = MasteryEngine::new(
        MasteryConfig::default(),
        Arc::new(store),
        Arc::new(UnavailableCf),
        EngineOptions::default(),
    );

    let err = engine
        .ingest(QuizAttempt::new(1, 101, 0.9, 20.0))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Persist(_)));
    assert_eq!(engine.store().record_count(), 0);
    assert_eq!(engine.attempt_count(), 0);

    let err = engine
        .ingest_batch(vec![
            QuizAttempt::new(1, 101, 0.9, 20.0),
            QuizAttempt::new(1, 102, 0.2, 20.0),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Persist(_)));
    assert_eq!(engine.store().record_count(), 0);

    std::fs::remove_file(&blocker).unwrap();
    let p = engine
        .ingest(QuizAttempt::new(1, 101, 0.9, 20.0))
        .await
        .unwrap();
    assert!(approx(p, AFTER_CORRECT));
}

#[tokio::test]
async fn test_failed_ingest_is_not_left_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::store_path(dir.path());
    let engine = scripted_engine(dir.path(), vec![WriteOutcome::LandThenFail]);

    let err = engine
        .ingest(QuizAttempt::new(1, 101, 0.9, 20.0))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Persist(_)));
    assert_eq!(engine.store().record_count(), 0);
    assert_eq!(load_state(&path, EPSILON).unwrap().get(&1.into(), &101.into()), None);

    // the retry is applied exactly once
    let p = engine
        .ingest(QuizAttempt::new(1, 101, 0.9, 20.0))
        .await
        .unwrap();
    assert!(approx(p, AFTER_CORRECT));
    let on_disk = load_state(&path, EPSILON).unwrap();
    assert_eq!(on_disk.get(&1.into(), &101.into()), Some(p));
}

#[tokio::test]
async fn test_failed_resave_is_repaired_by_flush() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::store_path(dir.path());
    let engine = scripted_engine(
        dir.path(),
        vec![WriteOutcome::LandThenFail, WriteOutcome::Fail],
    );

    assert!(engine
        .ingest(QuizAttempt::new(1, 101, 0.9, 20.0))
        .await
        .is_err());
    assert!(load_state(&path, EPSILON)
        .unwrap()
        .get(&1.into(), &101.into())
        .is_some());

    engine.flush().await.unwrap();
    assert!(load_state(&path, EPSILON).unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_save_keeps_other_students_updates() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::store_path(dir.path());
    let engine = scripted_engine(dir.path(), vec![]);

    engine.ingest(QuizAttempt::new(2, 202, 0.9, 20.0)).await.unwrap();

    let engine = {
        let store = MasteryStore::open(&path, EPSILON)
            .unwrap()
            .with_writer(ScriptedWriter::new([WriteOutcome::LandThenFail]));
        MasteryEngine::new(
            MasteryConfig::default(),
            Arc::new(store),
            Arc::new(UnavailableCf),
            EngineOptions::default(),
        )
    };
    assert!(engine
        .ingest(QuizAttempt::new(1, 101, 0.9, 20.0))
        .await
        .is_err());

    let on_disk = load_state(&path, EPSILON).unwrap();
    assert_eq!(on_disk.record_count(), 1);
    assert!(approx(on_disk.get(&2.into(), &202.into()).unwrap(), AFTER_CORRECT));
}

#[tokio::test]
async fn test_pending_attempts_survive_failed_save() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocked");
    std::fs::write(&blocker, b"x").unwrap();

    let store = MasteryStore::with_state(blocker.join("bkt.json"), EPSILON, MasteryState::new());
    let engine = MasteryEngine::new(
        MasteryConfig::default(),
        Arc::new(store),
        Arc::new(UnavailableCf),
        EngineOptions::default(),
    );

    engine.enqueue(QuizAttempt::new(1, 101, 0.9, 20.0)).unwrap();
    assert!(engine.recommend(request(1, &[101], None)).await.is_err());
    assert_eq!(engine.pending_count(), 1);
    assert_eq!(engine.store().record_count(), 0);

    std::fs::remove_file(&blocker).unwrap();
    assert_eq!(engine.flush_pending().await.unwrap(), 1);
    assert!(approx(
        engine.mastery_of(&1.into())[&SkillId::from(101)],
        AFTER_CORRECT
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingestion_matches_sequential() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(create_engine(
        dir.path(),
        Arc::new(UnavailableCf),
        PersistMode::PerAttempt,
    ));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .ingest(QuizAttempt::new(1, 101, 1.0, 10.0 + i as f64))
                    .await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let model = BktModel::default();
    let expected = (0..16).fold(model.initial(), |p, _| model.update(p, true));
    let stored = engine.store().get(&1.into(), &101.into()).unwrap();
    assert!(approx(stored, expected));
    assert_eq!(engine.attempt_count(), 16);

    let reloaded = MasteryStore::open(common::store_path(dir.path()), EPSILON).unwrap();
    assert_eq!(reloaded.get(&1.into(), &101.into()), Some(stored));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = create_engine(dir.path(), Arc::new(UnavailableCf), PersistMode::PerAttempt);
        engine.ingest(QuizAttempt::new(1, 101, 0.9, 20.0)).await.unwrap();
        engine.ingest(QuizAttempt::new(1, 102, 0.4, 20.0)).await.unwrap();
    }

    let engine = create_engine(dir.path(), Arc::new(UnavailableCf), PersistMode::PerAttempt);
    let records = engine.mastery_of(&1.into());
    assert_eq!(records.len(), 2);
    assert!(approx(records[&SkillId::from(101)], AFTER_CORRECT));
    assert!(approx(records[&SkillId::from(102)], 0.145_762_711_9));

    // response-time history is not persisted
    assert_eq!(engine.attempt_count(), 0);
}

#[tokio::test]
async fn test_batched_mode_saves_on_flush() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::store_path(dir.path());
    let engine = create_engine(dir.path(), Arc::new(UnavailableCf), PersistMode::Batched);

    engine.ingest(QuizAttempt::new(1, 101, 0.9, 20.0)).await.unwrap();
    engine.enqueue(QuizAttempt::new(2, 101, 0.9, 20.0)).unwrap();
    assert!(!path.exists());

    assert_eq!(engine.flush_pending().await.unwrap(), 1);
    engine.flush().await.unwrap();
    assert!(path.exists());

    let reloaded = MasteryStore::open(&path, EPSILON).unwrap();
    assert_eq!(reloaded.record_count(), 2);
}

#[tokio::test]
async fn test_duplicate_candidates_ranked_once() {
    let dir = tempfile::tempdir().unwrap();
    let cf = StaticCfTable::new().with(1, 101, 0.4);
    let engine = create_engine(dir.path(), Arc::new(cf), PersistMode::PerAttempt);

    let result = engine.recommend(request(1, &[101, 101, 101], Some(3))).await.unwrap();
    assert_eq!(ranked_ids(&result), vec!["101"]);
}
