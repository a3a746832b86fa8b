//! Database environment shared by every process that touches the catalog.
//!
//! The database file is opened for the lifetime of a single transaction, so
//! redb's exclusive file lock serializes writers across processes. Failing
//! to get the lock is a conflict and [`Environment::with_txn`] reruns the
//! whole unit of work.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use redb::{Builder, Database, RepairSession, WriteTransaction};
use tracing::{debug, info, warn};

use crate::error::{Result, TrackDbError};
use crate::supervisor::UpgradeProgram;

/// Schema version written by this code base.
pub const DB_VERSION: u32 = 1;

pub(crate) const DB_VERSION_KEY: &str = "_dbversion";

const BACKOFF_START_MS: u64 = 2;
const BACKOFF_MAX_MS: u64 = 250;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoverMode {
    /// Repair an uncleanly closed database without reporting it.
    None,
    Normal,
    /// Repair and report it loudly.
    Fatal,
}

#[derive(Clone, Debug)]
pub enum UpgradePolicy {
    Forbid,
    Run(UpgradeProgram),
    /// Open an old database as-is so that it can be upgraded.
    ForUpgrade,
}

#[derive(Clone, Debug)]
pub struct OpenOptions {
    pub recover: RecoverMode,
    pub may_create: bool,
    pub upgrade: UpgradePolicy,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            recover: RecoverMode::Normal,
            may_create: true,
            upgrade: UpgradePolicy::Forbid,
        }
    }
}

pub struct Environment {
    path: PathBuf,
    recover: RecoverMode,
}

/// An open handle on the database file, valid for one transaction.
pub struct Session {
    db: Database,
}

pub struct Txn<'db> {
    pub(crate) inner: WriteTransaction<'db>,
}

impl Environment {
    pub fn open(path: &Path, options: OpenOptions) -> Result<Self> {
        let exists = path.exists();
        if !exists {
            if !options.may_create {
                return Err(TrackDbError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no database at {:?}", path),
                )));
            }
            if matches!(options.upgrade, UpgradePolicy::ForUpgrade) {
                return Err(TrackDbError::NotUpgradable(format!(
                    "no database at {:?}",
                    path
                )));
            }
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
                if options.may_create {
                    restrict_permissions(parent)?;
                }
            }
        }

        let env = Self {
            path: path.to_path_buf(),
            recover: options.recover,
        };
        if !exists {
            env.retrying("create", || {
                let db = builder(env.recover).create(&env.path)?;
                drop(db);
                Ok(())
            })?;
            info!("Created database {:?}", env.path);
        }

        let found = env.with_txn("open", |txn| {
            txn.init_tables()?;
            match txn.global_get(DB_VERSION_KEY)? {
                Some(value) => value
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| TrackDbError::Corrupt(format!("{}={:?}", DB_VERSION_KEY, value))),
                None if !exists => {
                    txn.global_set(DB_VERSION_KEY, Some(DB_VERSION.to_string().as_str()))?;
                    Ok(DB_VERSION)
                }
                None => Ok(1),
            }
        })?;

        env.check_version(found, &options.upgrade)?;
        Ok(env)
    }

    fn check_version(&self, found: u32, policy: &UpgradePolicy) -> Result<()> {
        if found > DB_VERSION {
            return Err(TrackDbError::VersionTooNew {
                found,
                supported: DB_VERSION,
            });
        }
        if found == DB_VERSION {
            if matches!(policy, UpgradePolicy::ForUpgrade) {
                return Err(TrackDbError::NotUpgradable(format!(
                    "database is already at version {}",
                    found
                )));
            }
            return Ok(());
        }
        match policy {
            UpgradePolicy::Forbid => Err(TrackDbError::UpgradeRequired {
                found,
                supported: DB_VERSION,
            }),
            UpgradePolicy::ForUpgrade => Ok(()),
            UpgradePolicy::Run(program) => {
                info!("Upgrading database from version {} to {}", found, DB_VERSION);
                program.run()?;
                let now = self.version()?;
                if now != DB_VERSION {
                    return Err(TrackDbError::UpgradeFailed(format!(
                        "database still at version {} after upgrade",
                        now
                    )));
                }
                Ok(())
            }
        }
    }

    /// Stored schema version; a database that never recorded one is version 1.
    pub fn version(&self) -> Result<u32> {
        self.with_txn("version", |txn| match txn.global_get(DB_VERSION_KEY)? {
            Some(value) => value
                .trim()
                .parse::<u32>()
                .map_err(|_| TrackDbError::Corrupt(format!("{}={:?}", DB_VERSION_KEY, value))),
            None => Ok(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session(&self) -> Result<Session> {
        let db = builder(self.recover).open(&self.path)?;
        Ok(Session { db })
    }

    /// Runs `body` in a fresh transaction, committing on success and
    /// aborting on error. Lock conflicts abort and rerun `body` from the
    /// start; any other error is returned as-is.
    pub fn with_txn<T, F>(&self, what: &str, mut body: F) -> Result<T>
    where
        F: FnMut(&Txn<'_>) -> Result<T>,
    {
        self.retrying(what, || {
            let session = self.session()?;
            let txn = session.begin()?;
            match body(&txn) {
                Ok(value) => {
                    txn.commit()?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(abort_err) = txn.abort() {
                        warn!("Abort after {} failed: {}", what, abort_err);
                    }
                    Err(err)
                }
            }
        })
    }

    fn retrying<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut delay = BACKOFF_START_MS;
        let mut attempts = 0u64;
        loop {
            match op() {
                Err(err) if err.is_conflict() => {
                    attempts += 1;
                    debug!("{}: {} (retry {})", what, err, attempts);
                    if attempts % 100 == 0 {
                        warn!("{}: still waiting for the database after {} tries", what, attempts);
                    }
                    thread::sleep(Duration::from_millis(delay));
                    delay = (delay * 2).min(BACKOFF_MAX_MS);
                }
                result => return result,
            }
        }
    }
}

impl Session {
    pub fn begin(&self) -> Result<Txn<'_>> {
        Ok(Txn {
            inner: self.db.begin_write()?,
        })
    }
}

impl<'db> Txn<'db> {
    pub fn commit(self) -> Result<()> {
        self.inner.commit()?;
        Ok(())
    }

    pub fn abort(self) -> Result<()> {
        self.inner.abort()?;
        Ok(())
    }
}

fn builder(recover: RecoverMode) -> Builder {
    let mut builder = Database::builder();
    builder.set_repair_callback(move |session: &mut RepairSession| match recover {
        RecoverMode::None => debug!("Repairing database: {:.0}%", session.progress() * 100.0),
        RecoverMode::Normal => info!("Repairing database: {:.0}%", session.progress() * 100.0),
        RecoverMode::Fatal => warn!("Repairing database: {:.0}%", session.progress() * 100.0),
    });
    builder
}

#[cfg(unix)]
fn restrict_permissions(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let mode = meta.permissions().mode();
        if mode & 0o077 != 0 {
            fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode & !0o077))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_new(dir: &Path) -> Environment {
        Environment::open(&dir.join("trackdb.redb"), OpenOptions::default()).unwrap()
    }

    #[test]
    fn new_database_records_current_version() {
        let dir = tempfile::tempdir().unwrap();
        let env = open_new(dir.path());
        assert_eq!(env.version().unwrap(), DB_VERSION);
    }

    #[test]
    fn refuses_to_create_when_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let options = OpenOptions {
            may_create: false,
            ..OpenOptions::default()
        };
        assert!(Environment::open(&dir.path().join("trackdb.redb"), options).is_err());
    }

    #[test]
    fn newer_database_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let env = open_new(dir.path());
        env.with_txn("bump", |txn| {
            txn.global_set(DB_VERSION_KEY, Some((DB_VERSION + 1).to_string().as_str()))?;
            Ok(())
        })
        .unwrap();
        drop(env);
        let err = Environment::open(&dir.path().join("trackdb.redb"), OpenOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, TrackDbError::VersionTooNew { .. }));
    }

    #[test]
    fn older_database_needs_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let env = open_new(dir.path());
        env.with_txn("age", |txn| {
            txn.global_set(DB_VERSION_KEY, Some("0"))?;
            Ok(())
        })
        .unwrap();
        let path = dir.path().join("trackdb.redb");

        let err = Environment::open(&path, OpenOptions::default()).err().unwrap();
        assert!(matches!(err, TrackDbError::UpgradeRequired { found: 0, .. }));

        let options = OpenOptions {
            upgrade: UpgradePolicy::ForUpgrade,
            ..OpenOptions::default()
        };
        assert!(Environment::open(&path, options).is_ok());
    }

    #[test]
    fn open_for_upgrade_refuses_current_or_missing() {
        let dir = tempfile::tempdir().unwrap();
        let options = OpenOptions {
            upgrade: UpgradePolicy::ForUpgrade,
            ..OpenOptions::default()
        };
        let path = dir.path().join("trackdb.redb");
        assert!(matches!(
            Environment::open(&path, options.clone()).err().unwrap(),
            TrackDbError::NotUpgradable(_)
        ));
        open_new(dir.path());
        assert!(matches!(
            Environment::open(&path, options).err().unwrap(),
            TrackDbError::NotUpgradable(_)
        ));
    }

    #[test]
    fn failed_body_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let env = open_new(dir.path());
        let result: Result<()> = env.with_txn("fail", |txn| {
            txn.global_set("playing", Some("yes"))?;
            Err(TrackDbError::Corrupt("boom".to_string()))
        });
        assert!(result.is_err());
        let value = env.with_txn("read", |txn| txn.global_get("playing")).unwrap();
        assert_eq!(value, None);
    }

    const CRASH_DB: &str = "TRACKDB_CRASH_DB";

    #[test]
    fn writer_killed_mid_transaction_is_repaired() {
        if let Some(path) = std::env::var_os(CRASH_DB) {
            let env = Environment::open(Path::new(&path), OpenOptions::default()).unwrap();
            let session = env.session().unwrap();
            let txn = session.begin().unwrap();
            txn.global_set("playing", Some("yes")).unwrap();
            std::process::abort();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trackdb.redb");
        let status = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "env::tests::writer_killed_mid_transaction_is_repaired",
                "--exact",
                "--nocapture",
                "--test-threads=1",
            ])
            .env(CRASH_DB, &path)
            .status()
            .unwrap();
        assert!(!status.success());

        for recover in [RecoverMode::None, RecoverMode::Normal] {
            let options = OpenOptions {
                recover,
                may_create: false,
                upgrade: UpgradePolicy::Forbid,
            };
            let env = Environment::open(&path, options).unwrap();
            let value = env.with_txn("read", |txn| txn.global_get("playing")).unwrap();
            assert_eq!(value, None);
        }
    }

    #[test]
    fn conflicts_rerun_the_whole_body() {
        let dir = tempfile::tempdir().unwrap();
        let env = open_new(dir.path());
        let mut runs = 0;
        let value = env
            .with_txn("flaky", |txn| {
                runs += 1;
                txn.global_set("counter", Some(runs.to_string().as_str()))?;
                if runs < 3 {
                    return Err(TrackDbError::Conflict("simulated".to_string()));
                }
                txn.global_get("counter")
            })
            .unwrap();
        assert_eq!(runs, 3);
        assert_eq!(value.as_deref(), Some("3"));
    }

    #[test]
    fn held_lock_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let env = open_new(dir.path());
        let session = env.session().unwrap();
        let err = env.session().err().unwrap();
        assert!(err.is_conflict());
        drop(session);
        assert!(env.session().is_ok());
    }
}
