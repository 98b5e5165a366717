use super::error::{io_error, json_error};
use super::{SessionError, WorkflowState};
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::ids::SessionId;
use crate::shared::logging::{append_json_log, SESSIONS_LOG_FILE};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

struct Slot {
    published: Arc<WorkflowState>,
    leased: Arc<AtomicBool>,
}

/// Registry of sessions keyed by id. Readers get the state published at the
/// last commit; at most one writer holds a [`SessionLease`] per session.
pub struct SessionStore {
    state_root: PathBuf,
    sessions: Mutex<BTreeMap<String, Slot>>,
}

/// Exclusive, mutable working copy of one session. Changes become visible
/// only through [`SessionStore::commit`]. Dropping the lease releases it.
pub struct SessionLease {
    state: WorkflowState,
    flag: Arc<AtomicBool>,
}

impl Deref for SessionLease {
    type Target = WorkflowState;

    fn deref(&self) -> &WorkflowState {
        &self.state
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut WorkflowState {
        &mut self.state
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl SessionStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn state_root(&self) -> &Path {
        &self.state_root
    }

    pub fn session_path(&self, session_id: &SessionId) -> PathBuf {
        self.state_root
            .join("sessions")
            .join(format!("{}.json", session_id.as_str()))
    }

    fn registry(&self) -> MutexGuard<'_, BTreeMap<String, Slot>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers and persists a new session.
    pub fn create(&self, state: WorkflowState) -> Result<Arc<WorkflowState>, SessionError> {
        let key = state.session_id.as_str().to_string();
        let path = self.session_path(&state.session_id);
        if self.registry().contains_key(&key) || path.exists() {
            return Err(SessionError::DuplicateSession { session_id: key });
        }
        self.persist(&state)?;
        self.mirror_logs(&state, 0);
        let published = Arc::new(state);
        self.registry().insert(
            key,
            Slot {
                published: Arc::clone(&published),
                leased: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(published)
    }

    /// Takes the writer lease, loading the session from disk if needed.
    pub fn checkout(&self, session_id: &str) -> Result<SessionLease, SessionError> {
        self.ensure_loaded(session_id)?;
        let registry = self.registry();
        let slot = registry
            .get(session_id)
            .ok_or_else(|| SessionError::UnknownSession {
                session_id: session_id.to_string(),
            })?;
        if slot
            .leased
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::SessionBusy {
                session_id: session_id.to_string(),
            });
        }
        Ok(SessionLease {
            state: slot.published.as_ref().clone(),
            flag: Arc::clone(&slot.leased),
        })
    }

    /// Persists and publishes the lease's working copy. `logs`, `checksums`
    /// and `artifacts` may only grow, and `correction_attempt` never drops.
    pub fn commit(&self, lease: &SessionLease) -> Result<Arc<WorkflowState>, SessionError> {
        let session_id = lease.session_id.as_str().to_string();
        let previous = {
            let registry = self.registry();
            let slot = registry
                .get(&session_id)
                .ok_or_else(|| SessionError::UnknownSession {
                    session_id: session_id.clone(),
                })?;
            if !Arc::ptr_eq(&slot.leased, &lease.flag) || !lease.flag.load(Ordering::SeqCst) {
                return Err(SessionError::LeaseMismatch { session_id });
            }
            Arc::clone(&slot.published)
        };

        check_audit_trail(&previous, &lease.state)?;
        self.persist(&lease.state)?;
        self.mirror_logs(&lease.state, previous.logs.len());

        let published = Arc::new(lease.state.clone());
        if let Some(slot) = self.registry().get_mut(&session_id) {
            slot.published = Arc::clone(&published);
        }
        Ok(published)
    }

    /// State as of the last commit. Never blocks on a writer.
    pub fn snapshot(&self, session_id: &str) -> Result<Arc<WorkflowState>, SessionError> {
        self.ensure_loaded(session_id)?;
        self.registry()
            .get(session_id)
            .map(|slot| Arc::clone(&slot.published))
            .ok_or_else(|| SessionError::UnknownSession {
                session_id: session_id.to_string(),
            })
    }

    /// Snapshots of every persisted session, oldest first.
    pub fn list(&self) -> Result<Vec<Arc<WorkflowState>>, SessionError> {
        let dir = self.state_root.join("sessions");
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&dir, err)),
        };
        let mut sessions = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_error(&dir, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if SessionId::parse(stem).is_err() {
                continue;
            }
            sessions.push(self.snapshot(stem)?);
        }
        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }

    /// Drops the session from the registry. The persisted record stays.
    pub fn close(&self, session_id: &str) -> Result<(), SessionError> {
        let mut registry = self.registry();
        let Some(slot) = registry.get(session_id) else {
            return Err(SessionError::UnknownSession {
                session_id: session_id.to_string(),
            });
        };
        if slot.leased.load(Ordering::SeqCst) {
            return Err(SessionError::SessionBusy {
                session_id: session_id.to_string(),
            });
        }
        registry.remove(session_id);
        Ok(())
    }

    fn ensure_loaded(&self, session_id: &str) -> Result<(), SessionError> {
        if self.registry().contains_key(session_id) {
            return Ok(());
        }
        let id = SessionId::parse(session_id).map_err(SessionError::InvalidId)?;
        let path = self.session_path(&id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::UnknownSession {
                    session_id: session_id.to_string(),
                })
            }
            Err(err) => return Err(io_error(&path, err)),
        };
        let state: WorkflowState = serde_json::from_str(&raw).map_err(|e| json_error(&path, e))?;
        self.registry()
            .entry(session_id.to_string())
            .or_insert_with(|| Slot {
                published: Arc::new(state),
                leased: Arc::new(AtomicBool::new(false)),
            });
        Ok(())
    }

    fn persist(&self, state: &WorkflowState) -> Result<(), SessionError> {
        let path = self.session_path(&state.session_id);
        let body = serde_json::to_vec_pretty(state).map_err(|e| json_error(&path, e))?;
        atomic_write_file(&path, &body).map_err(|e| io_error(&path, e))
    }

    fn mirror_logs(&self, state: &WorkflowState, already_mirrored: usize) {
        for entry in state.logs.iter().skip(already_mirrored) {
            let mut fields = Map::new();
            fields.insert(
                "sessionId".to_string(),
                Value::from(state.session_id.as_str()),
            );
            fields.insert("phase".to_string(), Value::from(state.phase.as_str()));
            fields.insert("message".to_string(), Value::from(entry.message.clone()));
            append_json_log(
                &self.state_root,
                SESSIONS_LOG_FILE,
                entry.timestamp,
                &entry.level,
                &entry.event,
                fields,
            );
        }
    }
}

fn check_audit_trail(previous: &WorkflowState, next: &WorkflowState) -> Result<(), SessionError> {
    let violation = |reason: &str| SessionError::AuditTrail {
        session_id: next.session_id.as_str().to_string(),
        reason: reason.to_string(),
    };
    if next.session_id != previous.session_id {
        return Err(violation("session id changed"));
    }
    if !next.logs.starts_with(&previous.logs) {
        return Err(violation("logs were truncated or rewritten"));
    }
    if !next.checksums.starts_with(&previous.checksums) {
        return Err(violation("checksums were truncated or rewritten"));
    }
    if !next.artifacts.starts_with(&previous.artifacts) {
        return Err(violation("versioned artifacts were truncated or rewritten"));
    }
    if next.correction_attempt < previous.correction_attempt {
        return Err(violation("correction attempt decreased"));
    }
    Ok(())
}
