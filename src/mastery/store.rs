//! Durable (student, skill) -> mastery probability store.
//!
//! On-disk layout is a JSON object keyed by student id, each value an object
//! keyed by skill id holding the probability. Saves go through a temp file in
//! the same directory followed by a rename, so readers only ever see a
//! complete file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::mastery::types::{SkillId, StudentId};

pub type StudentRecords = BTreeMap<SkillId, f64>;

type Layout = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize mastery state: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("mastery store {path} has an unexpected layout: {reason}")]
    Schema { path: PathBuf, reason: String },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasteryState {
    students: BTreeMap<StudentId, StudentRecords>,
}

impl MasteryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, student: &StudentId, skill: &SkillId) -> Option<f64> {
        self.students.get(student)?.get(skill).copied()
    }

    pub fn insert(&mut self, student: StudentId, skill: SkillId, probability: f64) -> Option<f64> {
        self.students
            .entry(student)
            .or_default()
            .insert(skill, probability)
    }

    pub fn student(&self, student: &StudentId) -> Option<&StudentRecords> {
        self.students.get(student)
    }

    /// Every `(student, skill, probability)` in key order.
    pub fn records(&self) -> impl Iterator<Item = (&StudentId, &SkillId, f64)> {
        self.students.iter().flat_map(|(student, records)| {
            records.iter().map(move |(skill, p)| (student, skill, *p))
        })
    }

    pub fn record_count(&self) -> usize {
        self.students.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    fn remove(&mut self, student: &StudentId, skill: &SkillId) {
        if let Some(records) = self.students.get_mut(student) {
            records.remove(skill);
            if records.is_empty() {
                self.students.remove(student);
            }
        }
    }

    fn to_layout(&self) -> Layout {
        let mut layout = Layout::new();
        for (student, skill, p) in self.records() {
            layout
                .entry(student.to_string())
                .or_default()
                .insert(skill.to_string(), p);
        }
        layout
    }
}

/// Reads the store file.
///
/// Missing file: empty state. Unparseable JSON: the file is moved aside and
/// an empty state returned. Parseable JSON with the wrong layout or values
/// outside `[0, 1]`: [`StoreError::Schema`].
pub fn load_state(path: &Path, epsilon: f64) -> Result<MasteryState, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "mastery store not found, starting empty");
            return Ok(MasteryState::new());
        }
        Err(err) => return Err(StoreError::io(path, err)),
    };

    let value: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let quarantined = quarantine(path);
            tracing::warn!(
                path = %path.display(),
                error = %err,
                moved_to = ?quarantined,
                "mastery store is corrupt, starting empty"
            );
            return Ok(MasteryState::new());
        }
    };

    let layout: Layout = serde_json::from_value(value).map_err(|err| StoreError::Schema {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;

    let mut state = MasteryState::new();
    for (student, skills) in layout {
        for (skill, p) in skills {
            if !p.is_finite() || !(0.0..=1.0).contains(&p) {
                return Err(StoreError::Schema {
                    path: path.to_path_buf(),
                    reason: format!("probability {p} for student {student} skill {skill}"),
                });
            }
            state.insert(
                StudentId::new(student.clone()),
                SkillId::new(skill),
                p.clamp(epsilon, 1.0 - epsilon),
            );
        }
    }

    tracing::info!(
        path = %path.display(),
        records = state.record_count(),
        "mastery store loaded"
    );
    Ok(state)
}

/// Writes `state` to `path` atomically.
pub fn save_state(path: &Path, state: &MasteryState) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;

    let json = serde_json::to_vec_pretty(&state.to_layout())?;
    let tmp = temp_path(path);

    let written = write_synced(&tmp, &json).and_then(|_| fs::rename(&tmp, path));
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(path, err));
    }

    // directory entry durability for the rename
    #[cfg(unix)]
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mastery".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

fn quarantine(path: &Path) -> Option<PathBuf> {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let name = path.file_name()?.to_string_lossy().into_owned();
    let target = path.with_file_name(format!("{name}.corrupt-{stamp}"));
    match fs::rename(path, &target) {
        Ok(()) => Some(target),
        Err(err) => {
            tracing::warn!(error = %err, "failed to move corrupt mastery store aside");
            None
        }
    }
}

/// Where [`MasteryStore::save`] sends its snapshots.
pub trait StateWriter: Send + Sync {
    fn write(&self, path: &Path, state: &MasteryState) -> Result<(), StoreError>;
}

/// Temp file, fsync, rename. See [`save_state`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AtomicFileWriter;

impl StateWriter for AtomicFileWriter {
    fn write(&self, path: &Path, state: &MasteryState) -> Result<(), StoreError> {
        save_state(path, state)
    }
}

/// Single source of truth for BKT state.
///
/// Reads and writes go through one `RwLock`, so every read-modify-write of a
/// record is serialized and readers never observe a half-applied update.
/// Saves are serialized separately and snapshot under the read lock.
pub struct MasteryStore {
    path: PathBuf,
    epsilon: f64,
    state: RwLock<MasteryState>,
    save_lock: Mutex<()>,
    writer: Box<dyn StateWriter>,
}

impl MasteryStore {
    pub fn open(path: impl Into<PathBuf>, epsilon: f64) -> Result<Self, StoreError> {
        let path = path.into();
        let state = load_state(&path, epsilon)?;
        Ok(Self::with_state(path, epsilon, state))
    }

    pub fn with_state(path: impl Into<PathBuf>, epsilon: f64, state: MasteryState) -> Self {
        Self {
            path: path.into(),
            epsilon,
            state: RwLock::new(state),
            save_lock: Mutex::new(()),
            writer: Box::new(AtomicFileWriter),
        }
    }

    pub fn with_writer(mut self, writer: impl StateWriter + 'static) -> Self {
        self.writer = Box::new(writer);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, student: &StudentId, skill: &SkillId) -> Option<f64> {
        self.state.read().get(student, skill)
    }

    pub fn put(&self, student: &StudentId, skill: &SkillId, probability: f64) {
        let p = self.clamp(probability);
        self.state.write().insert(student.clone(), skill.clone(), p);
    }

    /// Atomic read-modify-write of one record. Returns `(prior, new)`.
    pub fn update<F>(&self, student: &StudentId, skill: &SkillId, f: F) -> (Option<f64>, f64)
    where
        F: FnOnce(Option<f64>) -> f64,
    {
        let mut state = self.state.write();
        let prior = state.get(student, skill);
        let next = self.clamp(f(prior));
        state.insert(student.clone(), skill.clone(), next);
        (prior, next)
    }

    /// Puts `prior` back if the record still holds `expected`.
    pub fn restore_if(
        &self,
        student: &StudentId,
        skill: &SkillId,
        expected: f64,
        prior: Option<f64>,
    ) -> bool {
        let mut state = self.state.write();
        if state.get(student, skill) != Some(expected) {
            return false;
        }
        match prior {
            Some(p) => {
                state.insert(student.clone(), skill.clone(), p);
            }
            None => state.remove(student, skill),
        }
        true
    }

    pub fn student_snapshot(&self, student: &StudentId) -> StudentRecords {
        self.state
            .read()
            .student(student)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> MasteryState {
        self.state.read().clone()
    }

    pub fn record_count(&self) -> usize {
        self.state.read().record_count()
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock();
        let snapshot = self.snapshot();
        self.writer.write(&self.path, &snapshot).inspect_err(|err| {
            tracing::error!(path = %self.path.display(), error = %err, "failed to save mastery store");
        })
    }

    fn clamp(&self, p: f64) -> f64 {
        if p.is_nan() {
            return self.epsilon;
        }
        p.clamp(self.epsilon, 1.0 - self.epsilon)
    }
}
