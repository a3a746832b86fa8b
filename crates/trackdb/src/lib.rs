pub mod catalog;
pub mod config;
pub mod env;
pub mod error;
pub mod index;
pub mod kvp;
pub mod store;
pub mod supervisor;
pub mod trackname;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use catalog::{Catalog, Listable, Noticed, TrackData, UpgradeReport, WeightedPick};
pub use config::{load_or_create_config, CatalogConfig, ConfigError};
pub use env::{Environment, OpenOptions, RecoverMode, Txn, UpgradePolicy, DB_VERSION};
pub use error::{Result, TrackDbError};
pub use kvp::PropertySet;
pub use supervisor::{Supervisor, UpgradeProgram};

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}
