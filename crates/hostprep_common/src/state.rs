//! Execution state persistence
//!
//! One KEY=VALUE file records which step completed last, when, and the
//! hardware identity of every NIC role. The file is always rewritten whole
//! and atomically, so a crash leaves either the old or the new record.

use chrono::{DateTime, FixedOffset, Local, SecondsFormat};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::ProvisionError;
use crate::identity::IdentitySnapshot;
use crate::kvfile;
use crate::steps::{StepId, StepRegistry};

pub const DEFAULT_STATE_DIR: &str = "/var/lib/hostprep";
pub const STATE_FILE_NAME: &str = "state.env";

pub const KEY_LAST_COMPLETED: &str = "LAST_COMPLETED_STEP";
pub const KEY_LAST_RUN: &str = "LAST_RUN_TIME";

/// A recorded step id; ids from other releases are kept verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepRef {
    Known(StepId),
    Unknown(String),
}

impl StepRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(match StepId::parse(raw) {
            Some(id) => StepRef::Known(id),
            None => StepRef::Unknown(raw.to_string()),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            StepRef::Known(id) => id.as_str(),
            StepRef::Unknown(s) => s,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionState {
    pub last_completed_step: Option<StepRef>,
    pub last_run_time: Option<DateTime<FixedOffset>>,
    pub identities: IdentitySnapshot,
    /// Well-formed keys this release does not know about
    pub extra: BTreeMap<String, String>,
}

impl ExecutionState {
    pub fn from_kv(map: &BTreeMap<String, String>) -> Self {
        let last_completed_step = map.get(KEY_LAST_COMPLETED).and_then(|v| StepRef::parse(v));
        let last_run_time = map
            .get(KEY_LAST_RUN)
            .filter(|v| !v.trim().is_empty())
            .and_then(|v| match DateTime::parse_from_rfc3339(v.trim()) {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!("ignoring unreadable {} {:?}: {}", KEY_LAST_RUN, v, e);
                    None
                }
            });
        let extra = map
            .iter()
            .filter(|(k, _)| {
                k.as_str() != KEY_LAST_COMPLETED
                    && k.as_str() != KEY_LAST_RUN
                    && !IdentitySnapshot::owns_key(k)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            last_completed_step,
            last_run_time,
            identities: IdentitySnapshot::from_kv(map),
            extra,
        }
    }

    /// Full record in file order
    pub fn to_kv(&self) -> Vec<(String, String)> {
        let mut out = vec![
            (
                KEY_LAST_COMPLETED.to_string(),
                self.last_completed_step
                    .as_ref()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
            ),
            (
                KEY_LAST_RUN.to_string(),
                self.last_run_time
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, false))
                    .unwrap_or_default(),
            ),
        ];
        out.extend(self.identities.to_kv());
        out.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }

    pub fn mark_completed(&mut self, id: StepId) {
        self.last_completed_step = Some(StepRef::Known(id));
        self.last_run_time = Some(Local::now().fixed_offset());
    }

    pub fn clear_progress(&mut self) {
        self.last_completed_step = None;
        self.last_run_time = None;
    }

    /// Index of the first step that still has to run
    pub fn resume_point(&self, registry: &StepRegistry) -> usize {
        match &self.last_completed_step {
            None => 0,
            Some(StepRef::Unknown(raw)) => {
                warn!("recorded step {:?} is not in this release, starting over", raw);
                0
            }
            Some(StepRef::Known(id)) => match registry.index_of(*id) {
                Ok(idx) => (idx + 1).min(registry.len()),
                Err(_) => {
                    warn!("recorded step {} is not registered, starting over", id);
                    0
                }
            },
        }
    }

    fn render(&self) -> String {
        let entries = self.to_kv();
        kvfile::render(entries.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// Reads and writes the state file
#[derive(Debug, Clone)]
pub struct ExecutionStateStore {
    path: PathBuf,
}

impl ExecutionStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails. A missing or unreadable file is the empty state.
    pub fn load(&self) -> ExecutionState {
        match kvfile::read(&self.path) {
            Ok(Some(map)) => {
                debug!("loaded {} keys from {}", map.len(), self.path.display());
                ExecutionState::from_kv(&map)
            }
            Ok(None) => ExecutionState::default(),
            Err(e) => {
                warn!(
                    "cannot read state file {}: {}; treating as nothing completed",
                    self.path.display(),
                    e
                );
                ExecutionState::default()
            }
        }
    }

    /// Record `id` as completed and persist the whole state
    pub fn save(&self, state: &mut ExecutionState, id: StepId) -> Result<(), ProvisionError> {
        state.mark_completed(id);
        self.write(state)?;
        info!("state saved: {} completed", id);
        Ok(())
    }

    /// Persist the identity block without touching progress
    pub fn save_identities(&self, state: &ExecutionState) -> Result<(), ProvisionError> {
        let mut on_disk = self.load();
        on_disk.identities = state.identities.clone();
        self.write(&on_disk)?;
        debug!("identity snapshot saved");
        Ok(())
    }

    pub fn resume_point(&self, registry: &StepRegistry) -> usize {
        self.load().resume_point(registry)
    }

    /// Forget progress, keep identities and unknown keys
    pub fn reset_progress(&self) -> Result<ExecutionState, ProvisionError> {
        let mut state = self.load();
        state.clear_progress();
        self.write(&state)?;
        info!("progress reset in {}", self.path.display());
        Ok(state)
    }

    fn write(&self, state: &ExecutionState) -> Result<(), ProvisionError> {
        kvfile::atomic_write(&self.path, state.render().as_bytes()).map_err(|source| {
            ProvisionError::StatePersist {
                path: self.path.clone(),
                source,
            }
        })
    }
}
