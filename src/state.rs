use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::mastery::MasteryEngine;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<MasteryEngine>,
    started_at: Instant,
    started_at_system: SystemTime,
}

impl AppState {
    pub fn new(engine: Arc<MasteryEngine>) -> Self {
        Self {
            engine,
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
        }
    }

    pub fn engine(&self) -> &Arc<MasteryEngine> {
        &self.engine
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }
}
