use std::collections::HashSet;
use std::ops::ControlFlow;

use tracing::info;

use super::Catalog;
use crate::error::Result;
use crate::store::Records;

impl Catalog {
    /// Most recently noticed tracks that still exist, newest first, each
    /// at most once. `max == 0` means no limit.
    pub fn most_recent(&self, max: usize) -> Result<Vec<String>> {
        self.env.with_txn("most_recent", |txn| {
            let mut seen = HashSet::new();
            let mut recent = Vec::new();
            txn.walk_noticed_rev(|_, track| {
                if max != 0 && recent.len() >= max {
                    return Ok(ControlFlow::Break(()));
                }
                if seen.insert(track.to_string())
                    && txn.get_record(Records::Tracks, track)?.is_some()
                {
                    recent.push(track.to_string());
                }
                Ok(ControlFlow::Continue(()))
            })?;
            Ok(recent)
        })
    }

    /// Drops noticed entries older than `earliest` (seconds since the epoch).
    pub fn expire_noticed(&self, earliest: u64) -> Result<u64> {
        let count = self
            .env
            .with_txn("expire_noticed", |txn| txn.noticed_expire(earliest))?;
        if count > 0 {
            info!("Expired {} tracks from noticed log", count);
        }
        Ok(count)
    }
}
