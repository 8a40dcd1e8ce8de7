//! Adaptive mastery tracking and quiz recommendation.
//!
//! Contains:
//! - BKT (Bayesian Knowledge Tracing) per (student, skill) update
//! - Mastery store with atomic JSON persistence
//! - Estimate merge of BKT records with the CF baseline
//! - Response-time adjustment against the per-skill population average
//! - Ranking of the weakest unmastered skills
//! - MasteryEngine - unified entry point for ingestion and recommendation

pub mod attempts;
pub mod bkt;
pub mod config;
pub mod engine;
pub mod merger;
pub mod ranker;
pub mod store;
pub mod time_adjust;
pub mod types;

pub use config::MasteryConfig;
pub use engine::{
    BatchOutcome, EngineOptions, IngestError, MasteryEngine, PersistMode, RecommendError,
};
pub use store::{AtomicFileWriter, MasteryState, MasteryStore, StateWriter, StoreError};
pub use types::*;
