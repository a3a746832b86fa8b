use std::io::ErrorKind;

use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};

use crate::config::ConfigError;

#[derive(Debug)]
pub enum TrackDbError {
    Io(std::io::Error),
    Redb(redb::Error),
    Config(ConfigError),
    Pattern(regex::Error),
    /// Another process holds the database; the operation can be rerun.
    Conflict(String),
    Corrupt(String),
    VersionTooNew { found: u32, supported: u32 },
    UpgradeRequired { found: u32, supported: u32 },
    UpgradeFailed(String),
    NotUpgradable(String),
}

impl TrackDbError {
    /// Whether rerunning the whole transaction might succeed.
    pub fn is_conflict(&self) -> bool {
        match self {
            TrackDbError::Conflict(_) => true,
            TrackDbError::Redb(redb::Error::DatabaseAlreadyOpen) => true,
            TrackDbError::Redb(redb::Error::Io(err)) | TrackDbError::Io(err) => matches!(
                err.kind(),
                ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

impl std::fmt::Display for TrackDbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackDbError::Io(err) => write!(f, "io error: {}", err),
            TrackDbError::Redb(err) => write!(f, "db error: {}", err),
            TrackDbError::Config(err) => write!(f, "config error: {}", err),
            TrackDbError::Pattern(err) => write!(f, "pattern error: {}", err),
            TrackDbError::Conflict(what) => write!(f, "lock conflict: {}", what),
            TrackDbError::Corrupt(what) => write!(f, "corrupt record: {}", what),
            TrackDbError::VersionTooNew { found, supported } => write!(
                f,
                "database version {} is newer than supported version {}",
                found, supported
            ),
            TrackDbError::UpgradeRequired { found, supported } => write!(
                f,
                "database version {} needs upgrading to {}",
                found, supported
            ),
            TrackDbError::UpgradeFailed(what) => write!(f, "database upgrade failed: {}", what),
            TrackDbError::NotUpgradable(what) => write!(f, "cannot upgrade: {}", what),
        }
    }
}

impl std::error::Error for TrackDbError {}

impl From<std::io::Error> for TrackDbError {
    fn from(err: std::io::Error) -> Self {
        TrackDbError::Io(err)
    }
}

impl From<redb::Error> for TrackDbError {
    fn from(err: redb::Error) -> Self {
        TrackDbError::Redb(err)
    }
}

impl From<DatabaseError> for TrackDbError {
    fn from(err: DatabaseError) -> Self {
        TrackDbError::Redb(err.into())
    }
}

impl From<TableError> for TrackDbError {
    fn from(err: TableError) -> Self {
        TrackDbError::Redb(err.into())
    }
}

impl From<TransactionError> for TrackDbError {
    fn from(err: TransactionError) -> Self {
        TrackDbError::Redb(err.into())
    }
}

impl From<StorageError> for TrackDbError {
    fn from(err: StorageError) -> Self {
        TrackDbError::Redb(err.into())
    }
}

impl From<CommitError> for TrackDbError {
    fn from(err: CommitError) -> Self {
        TrackDbError::Redb(err.into())
    }
}

impl From<ConfigError> for TrackDbError {
    fn from(err: ConfigError) -> Self {
        TrackDbError::Config(err)
    }
}

impl From<regex::Error> for TrackDbError {
    fn from(err: regex::Error) -> Self {
        TrackDbError::Pattern(err)
    }
}

pub type Result<T> = std::result::Result<T, TrackDbError>;
