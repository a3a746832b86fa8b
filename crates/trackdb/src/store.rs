//! Typed access to the catalog's containers inside a transaction.
//!
//! Tables are opened per call and dropped before returning, so no cursor
//! outlives the method that created it.

use std::cmp::Ordering;
use std::ops::ControlFlow;

use common::compare_path;
use redb::{
    MultimapTableDefinition, ReadableMultimapTable, ReadableTable, RedbKey, RedbValue,
    TableDefinition, TypeName,
};

use crate::env::Txn;
use crate::error::{Result, TrackDbError};
use crate::kvp::PropertySet;

const TRACKS_TABLE: TableDefinition<TrackPath, &[u8]> = TableDefinition::new("tracks");
const PREFS_TABLE: TableDefinition<TrackPath, &[u8]> = TableDefinition::new("prefs");
const SEARCH_TABLE: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("search");
const TAGS_TABLE: MultimapTableDefinition<&str, &str> = MultimapTableDefinition::new("tags");
const GLOBAL_TABLE: TableDefinition<&str, &str> = TableDefinition::new("global");
const NOTICED_TABLE: MultimapTableDefinition<u64, &str> = MultimapTableDefinition::new("noticed");

/// Key type for path-keyed tables, ordered by [`compare_path`].
#[derive(Debug)]
pub(crate) struct TrackPath;

impl RedbValue for TrackPath {
    type SelfType<'a> = &'a [u8] where Self: 'a;
    type AsBytes<'a> = &'a [u8] where Self: 'a;

    fn fixed_width() -> Option<usize> {
        None
    }

    fn from_bytes<'a>(data: &'a [u8]) -> &'a [u8]
    where
        Self: 'a,
    {
        data
    }

    fn as_bytes<'a, 'b: 'a>(value: &'a &'b [u8]) -> &'a [u8]
    where
        Self: 'a,
        Self: 'b,
    {
        value
    }

    fn type_name() -> TypeName {
        TypeName::new("trackdb::TrackPath")
    }
}

impl RedbKey for TrackPath {
    fn compare(data1: &[u8], data2: &[u8]) -> Ordering {
        compare_path(data1, data2)
    }
}

/// Path-keyed containers holding encoded property sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Records {
    Tracks,
    Prefs,
}

impl Records {
    fn table(self) -> TableDefinition<'static, TrackPath, &'static [u8]> {
        match self {
            Records::Tracks => TRACKS_TABLE,
            Records::Prefs => PREFS_TABLE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Records::Tracks => "tracks",
            Records::Prefs => "prefs",
        }
    }
}

/// Token to track multimaps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Index {
    Search,
    Tags,
}

impl Index {
    fn table(self) -> MultimapTableDefinition<'static, &'static str, &'static str> {
        match self {
            Index::Search => SEARCH_TABLE,
            Index::Tags => TAGS_TABLE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Index::Search => "search",
            Index::Tags => "tags",
        }
    }
}

fn key_str(raw: &[u8]) -> Result<&str> {
    std::str::from_utf8(raw)
        .map_err(|_| TrackDbError::Corrupt(format!("non utf-8 key {:?}", String::from_utf8_lossy(raw))))
}

impl<'db> Txn<'db> {
    pub(crate) fn init_tables(&self) -> Result<()> {
        self.inner.open_table(TRACKS_TABLE)?;
        self.inner.open_table(PREFS_TABLE)?;
        self.inner.open_multimap_table(SEARCH_TABLE)?;
        self.inner.open_multimap_table(TAGS_TABLE)?;
        self.inner.open_table(GLOBAL_TABLE)?;
        self.inner.open_multimap_table(NOTICED_TABLE)?;
        Ok(())
    }

    pub fn get_record(&self, which: Records, key: &str) -> Result<Option<PropertySet>> {
        let table = self.inner.open_table(which.table())?;
        let record = match table.get(key.as_bytes())? {
            Some(value) => Some(PropertySet::decode(value.value())?),
            None => None,
        };
        Ok(record)
    }

    pub fn put_record(&self, which: Records, key: &str, record: &PropertySet) -> Result<()> {
        let mut table = self.inner.open_table(which.table())?;
        let encoded = record.encode();
        table.insert(key.as_bytes(), encoded.as_bytes())?;
        Ok(())
    }

    /// Returns whether a record was removed.
    pub fn delete_record(&self, which: Records, key: &str) -> Result<bool> {
        let mut table = self.inner.open_table(which.table())?;
        let removed = table.remove(key.as_bytes())?.is_some();
        Ok(removed)
    }

    /// Visits records in key order starting at the first key `>= from`.
    /// The record value is handed over still encoded.
    pub fn walk_records<F>(&self, which: Records, from: &str, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &[u8]) -> Result<ControlFlow<()>>,
    {
        let table = self.inner.open_table(which.table())?;
        for entry in table.range(from.as_bytes()..)? {
            let (key, value) = entry?;
            if visit(key_str(key.value())?, value.value())?.is_break() {
                break;
            }
        }
        Ok(())
    }

    pub fn count_records(&self, which: Records) -> Result<u64> {
        let table = self.inner.open_table(which.table())?;
        Ok(table.len()?)
    }

    /// Keys of the records at `positions` (sorted, distinct) in key order,
    /// found in one walk. Positions past the end are left out.
    pub fn record_keys_at(&self, which: Records, positions: &[u64]) -> Result<Vec<String>> {
        let table = self.inner.open_table(which.table())?;
        let mut iter = table.iter()?;
        let mut keys = Vec::with_capacity(positions.len());
        let mut next = 0u64;
        for &position in positions {
            let skip = match position.checked_sub(next).and_then(|gap| usize::try_from(gap).ok()) {
                Some(skip) => skip,
                None => continue,
            };
            let entry = match iter.nth(skip) {
                Some(entry) => entry?,
                None => break,
            };
            keys.push(key_str(entry.0.value())?.to_string());
            next = position + 1;
        }
        Ok(keys)
    }

    pub fn clear_records(&self, which: Records) -> Result<()> {
        self.inner.delete_table(which.table())?;
        self.inner.open_table(which.table())?;
        Ok(())
    }

    /// Returns false if the pair was already present.
    pub fn index_insert(&self, index: Index, token: &str, track: &str) -> Result<bool> {
        let mut table = self.inner.open_multimap_table(index.table())?;
        let existed = table.insert(token, track)?;
        Ok(!existed)
    }

    /// Returns whether the pair was present.
    pub fn index_delete(&self, index: Index, token: &str, track: &str) -> Result<bool> {
        let mut table = self.inner.open_multimap_table(index.table())?;
        Ok(table.remove(token, track)?)
    }

    pub fn index_tracks(&self, index: Index, token: &str) -> Result<Vec<String>> {
        let table = self.inner.open_multimap_table(index.table())?;
        let mut tracks = Vec::new();
        for value in table.get(token)? {
            tracks.push(value?.value().to_string());
        }
        Ok(tracks)
    }

    /// Distinct tokens with the number of tracks under each, in token order.
    pub fn index_tokens(&self, index: Index) -> Result<Vec<(String, u64)>> {
        let table = self.inner.open_multimap_table(index.table())?;
        let mut tokens = Vec::new();
        for entry in table.iter()? {
            let (key, values) = entry?;
            let mut count = 0u64;
            for value in values {
                value?;
                count += 1;
            }
            tokens.push((key.value().to_string(), count));
        }
        Ok(tokens)
    }

    pub fn clear_index(&self, index: Index) -> Result<()> {
        self.inner.delete_multimap_table(index.table())?;
        self.inner.open_multimap_table(index.table())?;
        Ok(())
    }

    pub fn global_get(&self, name: &str) -> Result<Option<String>> {
        let table = self.inner.open_table(GLOBAL_TABLE)?;
        let value = table.get(name)?.map(|value| value.value().to_string());
        Ok(value)
    }

    /// Sets or (for `None`) removes a global. Returns whether it changed.
    pub fn global_set(&self, name: &str, value: Option<&str>) -> Result<bool> {
        let mut table = self.inner.open_table(GLOBAL_TABLE)?;
        let changed = match value {
            Some(value) => {
                let old = table.insert(name, value)?.map(|old| old.value() != value);
                old.unwrap_or(true)
            }
            None => table.remove(name)?.is_some(),
        };
        Ok(changed)
    }

    pub fn global_entries(&self) -> Result<Vec<(String, String)>> {
        let table = self.inner.open_table(GLOBAL_TABLE)?;
        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            entries.push((key.value().to_string(), value.value().to_string()));
        }
        Ok(entries)
    }

    pub fn clear_globals(&self) -> Result<()> {
        self.inner.delete_table(GLOBAL_TABLE)?;
        self.inner.open_table(GLOBAL_TABLE)?;
        Ok(())
    }

    pub fn noticed_insert(&self, when: u64, track: &str) -> Result<()> {
        let mut table = self.inner.open_multimap_table(NOTICED_TABLE)?;
        table.insert(when, track)?;
        Ok(())
    }

    /// Visits noticed entries newest first.
    pub fn walk_noticed_rev<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(u64, &str) -> Result<ControlFlow<()>>,
    {
        let table = self.inner.open_multimap_table(NOTICED_TABLE)?;
        for entry in table.iter()?.rev() {
            let (when, values) = entry?;
            let when = when.value();
            let mut tracks = Vec::new();
            for value in values {
                tracks.push(value?.value().to_string());
            }
            for track in tracks.iter().rev() {
                if visit(when, track)?.is_break() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Removes every entry noticed before `earliest`; returns how many went.
    pub fn noticed_expire(&self, earliest: u64) -> Result<u64> {
        let mut table = self.inner.open_multimap_table(NOTICED_TABLE)?;
        let mut stale = Vec::new();
        let mut count = 0u64;
        for entry in table.range(..earliest)? {
            let (when, values) = entry?;
            for value in values {
                value?;
                count += 1;
            }
            stale.push(when.value());
        }
        for when in stale {
            table.remove_all(when)?;
        }
        Ok(count)
    }

    pub fn noticed_entries(&self) -> Result<Vec<(u64, String)>> {
        let table = self.inner.open_multimap_table(NOTICED_TABLE)?;
        let mut entries = Vec::new();
        for entry in table.iter()? {
            let (when, values) = entry?;
            let when = when.value();
            for value in values {
                entries.push((when, value?.value().to_string()));
            }
        }
        Ok(entries)
    }

    pub fn clear_noticed(&self) -> Result<()> {
        self.inner.delete_multimap_table(NOTICED_TABLE)?;
        self.inner.open_multimap_table(NOTICED_TABLE)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Environment, OpenOptions};

    fn env() -> (tempfile::TempDir, Environment) {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::open(&dir.path().join("trackdb.redb"), OpenOptions::default())
            .unwrap();
        (dir, env)
    }

    #[test]
    fn records_iterate_in_directory_grouping_order() {
        let (_dir, env) = env();
        env.with_txn("fill", |txn| {
            for key in ["/m/a.ogg", "/m/a/2.ogg", "/m/a-b/1.ogg", "/m/a/1.ogg"] {
                txn.put_record(Records::Tracks, key, &PropertySet::from_pairs([("_path", key)]))?;
            }
            Ok(())
        })
        .unwrap();

        let mut seen = Vec::new();
        env.with_txn("walk", |txn| {
            seen.clear();
            txn.walk_records(Records::Tracks, "/m/a", |key, _| {
                seen.push(key.to_string());
                Ok(ControlFlow::Continue(()))
            })
        })
        .unwrap();
        assert_eq!(seen, vec!["/m/a/1.ogg", "/m/a/2.ogg", "/m/a-b/1.ogg", "/m/a.ogg"]);

        let picked = env
            .with_txn("positions", |txn| txn.record_keys_at(Records::Tracks, &[1, 3, 9]))
            .unwrap();
        assert_eq!(picked, vec!["/m/a/2.ogg", "/m/a.ogg"]);
    }

    #[test]
    fn index_pairs_are_unique() {
        let (_dir, env) = env();
        env.with_txn("index", |txn| {
            assert!(txn.index_insert(Index::Search, "song", "/m/b.ogg")?);
            assert!(!txn.index_insert(Index::Search, "song", "/m/b.ogg")?);
            assert!(txn.index_insert(Index::Search, "song", "/m/a.ogg")?);
            assert_eq!(txn.index_tracks(Index::Search, "song")?, vec!["/m/a.ogg", "/m/b.ogg"]);
            assert!(txn.index_delete(Index::Search, "song", "/m/a.ogg")?);
            assert!(!txn.index_delete(Index::Search, "song", "/m/a.ogg")?);
            assert_eq!(txn.index_tokens(Index::Search)?, vec![("song".to_string(), 1)]);
            assert!(txn.index_tracks(Index::Tags, "song")?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn noticed_walks_newest_first_and_expires() {
        let (_dir, env) = env();
        env.with_txn("noticed", |txn| {
            txn.noticed_insert(10, "/m/old.ogg")?;
            txn.noticed_insert(20, "/m/mid.ogg")?;
            txn.noticed_insert(20, "/m/mid2.ogg")?;
            txn.noticed_insert(30, "/m/new.ogg")?;
            txn.noticed_insert(21, "/m/cutoff.ogg")?;

            let mut order = Vec::new();
            txn.walk_noticed_rev(|when, track| {
                order.push((when, track.to_string()));
                Ok(ControlFlow::Continue(()))
            })?;
            assert_eq!(order[0], (30, "/m/new.ogg".to_string()));
            assert_eq!(order[1], (21, "/m/cutoff.ogg".to_string()));
            assert_eq!(order[4], (10, "/m/old.ogg".to_string()));

            assert_eq!(txn.noticed_expire(21)?, 3);
            assert_eq!(
                txn.noticed_entries()?,
                vec![(21, "/m/cutoff.ogg".to_string()), (30, "/m/new.ogg".to_string())]
            );
            assert_eq!(txn.noticed_expire(21)?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn globals_report_changes() {
        let (_dir, env) = env();
        env.with_txn("global", |txn| {
            assert!(txn.global_set("playing", Some("yes"))?);
            assert!(!txn.global_set("playing", Some("yes"))?);
            assert_eq!(txn.global_get("playing")?.as_deref(), Some("yes"));
            assert!(txn.global_set("playing", None)?);
            assert!(!txn.global_set("playing", None)?);
            Ok(())
        })
        .unwrap();
    }
}
