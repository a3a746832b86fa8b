use std::collections::HashSet;
use std::ops::ControlFlow;

use tracing::{info, warn};

use super::{Catalog, ALIAS_FOR, PATH};
use crate::env::{DB_VERSION, DB_VERSION_KEY};
use crate::error::Result;
use crate::kvp::PropertySet;
use crate::store::{Index, Records};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpgradeReport {
    pub tracks: u64,
    pub aliases_dropped: u64,
    pub prefs: u64,
}

impl Catalog {
    /// Rewrites a database opened for upgrade in the current format: keys
    /// composed, aliases and indexes rebuilt from the canonical records.
    pub fn upgrade(&self) -> Result<UpgradeReport> {
        let report = self.env.with_txn("upgrade", |txn| {
            let mut report = UpgradeReport::default();

            let mut tracks = Vec::new();
            txn.walk_records(Records::Tracks, "", |key, value| {
                let data = PropertySet::decode(value)?;
                if data.get(ALIAS_FOR).is_some() {
                    report.aliases_dropped += 1;
                } else {
                    tracks.push((self.key(key), data));
                }
                Ok(ControlFlow::Continue(()))
            })?;
            txn.clear_records(Records::Tracks)?;
            for (track, data) in &tracks {
                txn.put_record(Records::Tracks, track, data)?;
            }

            let mut prefs = Vec::new();
            txn.walk_records(Records::Prefs, "", |key, value| {
                prefs.push((self.key(key), PropertySet::decode(value)?));
                Ok(ControlFlow::Continue(()))
            })?;
            txn.clear_records(Records::Prefs)?;
            let mut seen = HashSet::new();
            for (track, record) in &prefs {
                if !seen.insert(track.clone()) {
                    warn!("Dropping duplicate preferences for {:?}", track);
                    continue;
                }
                txn.put_record(Records::Prefs, track, record)?;
                report.prefs += 1;
            }

            let globals = txn.global_entries()?;
            txn.clear_globals()?;
            for (name, value) in &globals {
                txn.global_set(&self.key(name), Some(value.as_str()))?;
            }

            let noticed = txn.noticed_entries()?;
            txn.clear_noticed()?;
            for (when, track) in &noticed {
                txn.noticed_insert(*when, &self.key(track))?;
            }

            txn.clear_index(Index::Search)?;
            txn.clear_index(Index::Tags)?;
            for (track, data) in &tracks {
                let path = data.get(PATH).unwrap_or(track.as_str()).to_string();
                self.notice_in(txn, track, &path)?;
                report.tracks += 1;
            }

            txn.global_set(DB_VERSION_KEY, Some(DB_VERSION.to_string().as_str()))?;
            Ok(report)
        })?;
        self.invalidate_tag_cache();
        info!(
            "Upgraded database to version {}: {} tracks, {} aliases dropped",
            DB_VERSION, report.tracks, report.aliases_dropped
        );
        Ok(report)
    }
}
