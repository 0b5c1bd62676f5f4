use crate::config::ConfigError;
use crate::persistence::PersistError;
use crate::snapshot::SnapshotError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TideError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Snapshot(#[from] SnapshotError),
    #[error("session state error: {0}")]
    Persist(#[from] PersistError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
