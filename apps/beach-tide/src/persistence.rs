use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

/// Visual position of the log view. Only used to restore what was on screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportState {
    pub height: u16,
    pub scroll_offset: usize,
}

/// Everything the tailer remembers between runs in the same session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(default)]
    pub progress_cursor: Option<usize>,
    #[serde(default)]
    pub viewport_height: Option<u16>,
    #[serde(default)]
    pub scroll_offset: Option<usize>,
}

impl PersistedSession {
    pub fn viewport(&self) -> Option<ViewportState> {
        match (self.viewport_height, self.scroll_offset) {
            (None, None) => None,
            (height, offset) => Some(ViewportState {
                height: height.unwrap_or_default(),
                scroll_offset: offset.unwrap_or_default(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read session state {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write session state {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to encode session state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Session-scoped key/value storage for resume state.
pub trait SessionStore {
    fn load(&self) -> Result<PersistedSession, PersistError>;
    fn save_cursor(&mut self, cursor: Option<usize>) -> Result<(), PersistError>;
    fn save_viewport(&mut self, viewport: ViewportState) -> Result<(), PersistError>;
}

/// JSON file per session key, e.g. `$TMPDIR/beach-tide/4242.json`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(state_dir: &Path, session: &str) -> Self {
        let file = format!("{}.json", sanitize_key(session));
        Self {
            path: state_dir.join(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forget everything stored for this session.
    pub fn reset(&self) -> Result<(), PersistError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut PersistedSession)) -> Result<(), PersistError> {
        let mut state = self.load()?;
        apply(&mut state);
        self.write(&state)
    }

    fn write(&self, state: &PersistedSession) -> Result<(), PersistError> {
        let write_err = |source| PersistError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let encoded = serde_json::to_vec_pretty(state)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, encoded).map_err(write_err)?;
        fs::rename(&staging, &self.path).map_err(write_err)
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<PersistedSession, PersistError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(PersistedSession::default());
            }
            Err(source) => {
                return Err(PersistError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(state) => Ok(state),
            Err(err) => {
                warn!(
                    target: "beach_tide::persistence",
                    path = %self.path.display(),
                    error = %err,
                    "ignoring unreadable session state"
                );
                Ok(PersistedSession::default())
            }
        }
    }

    fn save_cursor(&mut self, cursor: Option<usize>) -> Result<(), PersistError> {
        self.update(|state| state.progress_cursor = cursor)
    }

    fn save_viewport(&mut self, viewport: ViewportState) -> Result<(), PersistError> {
        self.update(|state| {
            state.viewport_height = Some(viewport.height);
            state.scroll_offset = Some(viewport.scroll_offset);
        })
    }
}

fn sanitize_key(session: &str) -> String {
    let key: String = session
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if key.is_empty() {
        "default".to_string()
    } else {
        key
    }
}

/// Shared in-memory store; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    state: Arc<Mutex<PersistedSession>>,
}

impl MemorySessionStore {
    pub fn new(initial: PersistedSession) -> Self {
        Self {
            state: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn snapshot(&self) -> PersistedSession {
        self.state.lock().unwrap().clone()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<PersistedSession, PersistError> {
        Ok(self.snapshot())
    }

    fn save_cursor(&mut self, cursor: Option<usize>) -> Result<(), PersistError> {
        self.state.lock().unwrap().progress_cursor = cursor;
        Ok(())
    }

    fn save_viewport(&mut self, viewport: ViewportState) -> Result<(), PersistError> {
        let mut state = self.state.lock().unwrap();
        state.viewport_height = Some(viewport.height);
        state.scroll_offset = Some(viewport.scroll_offset);
        Ok(())
    }
}
