//! Track records, their aliases and the derived search and tag indexes.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::{Normalizer, UnicodeNormalizer};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::CatalogConfig;
use crate::env::{Environment, OpenOptions, Txn};
use crate::error::Result;
use crate::index::{sorted_delta, Indexer};
use crate::kvp::PropertySet;
use crate::now_secs;
use crate::store::{Index, Records};
use crate::trackname::{NameParts, DISPLAY_PREFIX};

mod listing;
mod noticed;
mod random;
mod search;
mod stats;
mod upgrade;

pub use listing::Listable;
pub use random::WeightedPick;
pub use upgrade::UpgradeReport;

use random::TagCache;

const ALIAS_FOR: &str = "_alias_for";
const PATH: &str = "_path";
const NOTICED: &str = "_noticed";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Noticed {
    Created,
    AlreadyKnown,
}

/// A canonical track with its stored data and preferences.
#[derive(Clone, Debug)]
pub struct TrackData {
    pub track: String,
    pub data: PropertySet,
    pub prefs: PropertySet,
}

struct Alias {
    name: String,
    /// A record naming the track is already in place.
    stored: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Follow {
    Aliases,
    CanonicalOnly,
}

pub struct Catalog {
    env: Environment,
    config: CatalogConfig,
    names: NameParts,
    indexer: Indexer,
    tag_version: AtomicU64,
    tag_cache: Mutex<TagCache>,
}

impl Catalog {
    pub fn new(
        env: Environment,
        config: CatalogConfig,
        normalizer: Arc<dyn Normalizer>,
    ) -> Result<Self> {
        config.validate()?;
        let names = NameParts::new(&config)?;
        let indexer = Indexer::new(normalizer, &config.stopwords);
        Ok(Self {
            env,
            config,
            names,
            indexer,
            tag_version: AtomicU64::new(0),
            tag_cache: Mutex::new(TagCache::default()),
        })
    }

    pub fn open(config: CatalogConfig, db_path: &Path, options: OpenOptions) -> Result<Self> {
        let env = Environment::open(db_path, options)?;
        Self::new(env, config, Arc::new(UnicodeNormalizer))
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn names(&self) -> &NameParts {
        &self.names
    }

    /// Forgets cached tag candidates; call after another process may have
    /// changed tags.
    pub fn invalidate_tag_cache(&self) {
        self.tag_version.fetch_add(1, Ordering::Relaxed);
    }

    fn key(&self, track: &str) -> String {
        self.indexer.normalizer().nfc(track)
    }

    fn track_data(&self, txn: &Txn<'_>, track: &str, follow: Follow) -> Result<Option<TrackData>> {
        let data = match txn.get_record(Records::Tracks, track)? {
            Some(data) => data,
            None => return Ok(None),
        };
        let (actual, data) = match data.get(ALIAS_FOR) {
            Some(target) => {
                if follow == Follow::CanonicalOnly {
                    panic!("{} is an alias, not a canonical track", track);
                }
                let target = target.to_string();
                match txn.get_record(Records::Tracks, &target)? {
                    Some(data) => (target, data),
                    None => {
                        warn!("Alias {:?} points at missing track {:?}", track, target);
                        return Ok(None);
                    }
                }
            }
            None => (track.to_string(), data),
        };
        let prefs = txn.get_record(Records::Prefs, &actual)?.unwrap_or_default();
        Ok(Some(TrackData {
            track: actual,
            data,
            prefs,
        }))
    }

    /// Alias for `track` with `prefs`, provided it would not clobber
    /// another track's record.
    fn compute_alias(&self, txn: &Txn<'_>, track: &str, prefs: &PropertySet) -> Result<Option<Alias>> {
        let name = match self.names.expand_alias(&self.config.alias, track, prefs) {
            Some(alias) => self.key(&alias),
            None => return Ok(None),
        };
        if name == track {
            return Ok(None);
        }
        let stored = match txn.get_record(Records::Tracks, &name)? {
            Some(existing) if existing.get(ALIAS_FOR) == Some(track) => true,
            Some(_) => {
                debug!("Alias {:?} for {:?} is taken", name, track);
                return Ok(None);
            }
            None => false,
        };
        Ok(Some(Alias { name, stored }))
    }

    fn store_alias(&self, txn: &Txn<'_>, alias: &Alias, track: &str) -> Result<()> {
        if alias.stored {
            return Ok(());
        }
        txn.put_record(
            Records::Tracks,
            &alias.name,
            &PropertySet::from_pairs([(ALIAS_FOR, track)]),
        )
    }

    fn search_words(&self, track: &str, prefs: &PropertySet) -> Vec<String> {
        let rootless = self.names.rootless(track).unwrap_or(track);
        self.indexer.index_words(rootless, prefs)
    }

    /// Records a sighting of `track` at `raw_path`.
    pub fn notice(&self, track: &str, raw_path: &str) -> Result<Noticed> {
        let track = self.key(track);
        self.env
            .with_txn("notice", |txn| self.notice_in(txn, &track, raw_path))
    }

    pub fn notice_in(&self, txn: &Txn<'_>, track: &str, raw_path: &str) -> Result<Noticed> {
        let existing = txn.get_record(Records::Tracks, track)?;
        let created = existing.is_none();
        let mut data = existing.unwrap_or_default();
        let mut changed = data.set(ALIAS_FOR, None);
        changed |= data.set(PATH, Some(raw_path));
        let now = now_secs();
        if created {
            data.set(NOTICED, Some(now.to_string().as_str()));
            changed = true;
        }
        let prefs = txn.get_record(Records::Prefs, track)?.unwrap_or_default();

        if let Some(alias) = self.compute_alias(txn, track, &prefs)? {
            self.store_alias(txn, &alias, track)?;
        }
        for word in self.search_words(track, &prefs) {
            txn.index_insert(Index::Search, &word, track)?;
        }
        let mut tags_added = false;
        for tag in self.indexer.parse_tags(prefs.get("tags")) {
            tags_added |= txn.index_insert(Index::Tags, &tag, track)?;
        }
        if tags_added {
            self.invalidate_tag_cache();
        }
        if changed {
            txn.put_record(Records::Tracks, track, &data)?;
        }
        if created {
            txn.noticed_insert(now, track)?;
            debug!("Noticed new track {:?}", track);
            return Ok(Noticed::Created);
        }
        Ok(Noticed::AlreadyKnown)
    }

    /// Removes a canonical track and everything derived from it. Its
    /// preferences are kept so that they survive the file coming back.
    /// Returns false if the track was not known.
    ///
    /// # Panics
    ///
    /// If `track` names an alias record.
    pub fn obsolete(&self, track: &str) -> Result<bool> {
        let track = self.key(track);
        self.env
            .with_txn("obsolete", |txn| self.obsolete_in(txn, &track))
    }

    pub fn obsolete_in(&self, txn: &Txn<'_>, track: &str) -> Result<bool> {
        let found = match self.track_data(txn, track, Follow::CanonicalOnly)? {
            Some(found) => found,
            None => return Ok(false),
        };
        if let Some(alias) = self.compute_alias(txn, track, &found.prefs)? {
            txn.delete_record(Records::Tracks, &alias.name)?;
        }
        for word in self.search_words(track, &found.prefs) {
            txn.index_delete(Index::Search, &word, track)?;
        }
        let tags = self.indexer.parse_tags(found.prefs.get("tags"));
        for tag in &tags {
            txn.index_delete(Index::Tags, tag, track)?;
        }
        if !tags.is_empty() {
            self.invalidate_tag_cache();
        }
        txn.delete_record(Records::Tracks, track)?;
        debug!("Obsoleted {:?}", track);
        Ok(true)
    }

    /// Value a preference has when it is not set.
    fn default_pref(&self, track: &str, name: &str) -> Option<String> {
        if let Some(rest) = name.strip_prefix("trackname_") {
            let (context, part) = rest.split_once('_')?;
            return Some(self.names.part(track, context, part));
        }
        match name {
            "weight" => Some("90000".to_string()),
            "pick_at_random" => Some("1".to_string()),
            "tags" => Some(String::new()),
            _ => None,
        }
    }

    /// Sets (or with `None` clears) a property of a track, resolving aliases
    /// first. Names starting with `_` live in the track record, everything
    /// else is a preference. Returns false if the track is unknown.
    pub fn set(&self, track: &str, name: &str, value: Option<&str>) -> Result<bool> {
        let track = self.key(track);
        self.env.with_txn("set", |txn| {
            let mut found = match self.track_data(txn, &track, Follow::Aliases)? {
                Some(found) => found,
                None => return Ok(false),
            };
            let actual = found.track.clone();
            let value = match (value, self.default_pref(&actual, name)) {
                (Some(value), Some(default)) if value == default => None,
                (value, _) => value,
            };

            if name.starts_with('_') {
                if found.data.set(name, value) {
                    txn.put_record(Records::Tracks, &actual, &found.data)?;
                }
                return Ok(true);
            }

            let old_alias = self.compute_alias(txn, &actual, &found.prefs)?;
            let old_words = self.search_words(&actual, &found.prefs);
            let old_tags = self.indexer.parse_tags(found.prefs.get("tags"));
            if !found.prefs.set(name, value) {
                return Ok(true);
            }
            txn.put_record(Records::Prefs, &actual, &found.prefs)?;

            let new_alias = self.compute_alias(txn, &actual, &found.prefs)?;
            let old_name = old_alias.as_ref().map(|alias| alias.name.as_str());
            let new_name = new_alias.as_ref().map(|alias| alias.name.as_str());
            if old_name != new_name {
                if let Some(old) = old_name {
                    txn.delete_record(Records::Tracks, old)?;
                }
                if let Some(new) = &new_alias {
                    self.store_alias(txn, new, &actual)?;
                }
            }

            if name.starts_with(DISPLAY_PREFIX) {
                let new_words = self.search_words(&actual, &found.prefs);
                let (removed, added) = sorted_delta(&old_words, &new_words);
                for word in removed {
                    txn.index_delete(Index::Search, word, &actual)?;
                }
                for word in added {
                    txn.index_insert(Index::Search, word, &actual)?;
                }
            }

            if name == "tags" {
                let new_tags = self.indexer.parse_tags(found.prefs.get("tags"));
                let (removed, added) = sorted_delta(&old_tags, &new_tags);
                for tag in &removed {
                    txn.index_delete(Index::Tags, tag, &actual)?;
                }
                for tag in &added {
                    txn.index_insert(Index::Tags, tag, &actual)?;
                }
                if !removed.is_empty() || !added.is_empty() {
                    self.invalidate_tag_cache();
                }
            }
            Ok(true)
        })
    }

    /// A preference, falling back to the track record.
    pub fn get(&self, track: &str, name: &str) -> Result<Option<String>> {
        let track = self.key(track);
        self.env.with_txn("get", |txn| {
            let found = match self.track_data(txn, &track, Follow::Aliases)? {
                Some(found) => found,
                None => return Ok(None),
            };
            let value = found.prefs.get(name).or_else(|| found.data.get(name));
            Ok(value.map(str::to_string))
        })
    }

    /// Every preference followed by every track property.
    pub fn get_all(&self, track: &str) -> Result<Option<Vec<(String, String)>>> {
        let track = self.key(track);
        self.env.with_txn("get_all", |txn| {
            let found = match self.track_data(txn, &track, Follow::Aliases)? {
                Some(found) => found,
                None => return Ok(None),
            };
            let all = found
                .prefs
                .iter()
                .chain(found.data.iter())
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect();
            Ok(Some(all))
        })
    }

    /// Canonical name of a track or alias.
    pub fn resolve(&self, track: &str) -> Result<Option<String>> {
        let track = self.key(track);
        self.env.with_txn("resolve", |txn| {
            Ok(self
                .track_data(txn, &track, Follow::Aliases)?
                .map(|found| found.track))
        })
    }

    pub fn is_alias(&self, track: &str) -> Result<bool> {
        let track = self.key(track);
        self.env.with_txn("is_alias", |txn| {
            Ok(txn
                .get_record(Records::Tracks, &track)?
                .map(|data| data.get(ALIAS_FOR).is_some())
                .unwrap_or(false))
        })
    }

    pub fn exists(&self, track: &str) -> Result<bool> {
        let track = self.key(track);
        self.env.with_txn("exists", |txn| {
            Ok(txn.get_record(Records::Tracks, &track)?.is_some())
        })
    }

    /// A name part of a track, honouring preferences. Unknown tracks get
    /// the part computed from their path.
    pub fn get_part(&self, track: &str, context: &str, part: &str) -> Result<String> {
        let track = self.key(track);
        let found = self
            .env
            .with_txn("get_part", |txn| self.track_data(txn, &track, Follow::Aliases))?;
        let value = match found {
            Some(found) => {
                self.names
                    .part_with_prefs(&found.track, context, part, &found.prefs)
                    .0
            }
            None => self.names.part(&track, context, part),
        };
        Ok(value)
    }

    /// Filesystem path of a track as it was last seen.
    pub fn raw_path(&self, track: &str) -> Result<Option<String>> {
        let track = self.key(track);
        self.env.with_txn("raw_path", |txn| {
            Ok(self
                .track_data(txn, &track, Follow::Aliases)?
                .map(|found| found.data.get(PATH).unwrap_or(found.track.as_str()).to_string()))
        })
    }

    pub fn all_tags(&self) -> Result<Vec<String>> {
        self.env.with_txn("all_tags", |txn| {
            Ok(txn
                .index_tokens(Index::Tags)?
                .into_iter()
                .map(|(tag, _)| tag)
                .collect())
        })
    }

    pub fn get_global(&self, name: &str) -> Result<Option<String>> {
        self.env.with_txn("get_global", |txn| txn.global_get(name))
    }

    /// Sets or clears a global preference on behalf of `who`.
    pub fn set_global(&self, name: &str, value: Option<&str>, who: &str) -> Result<()> {
        let changed = self
            .env
            .with_txn("set_global", |txn| txn.global_set(name, value))?;
        if !changed {
            return Ok(());
        }
        match name {
            "playing" | "random-play" => {
                info!("{} {} by {}", name, value.unwrap_or("unset"), who);
            }
            "required-tags" => self.invalidate_tag_cache(),
            _ => {}
        }
        Ok(())
    }

    /// Visits every canonical track under `root` (all tracks when `None`)
    /// in key order. The walk is read in one transaction and the visitor
    /// runs after it has finished, so it may call back into the catalog.
    pub fn scan<F>(&self, root: Option<&str>, mut visit: F) -> Result<()>
    where
        F: FnMut(&TrackData) -> ControlFlow<()>,
    {
        let prefix = root.map(|root| format!("{}/", self.key(root)));
        let tracks = self.env.with_txn("scan", |txn| {
            let mut tracks = Vec::new();
            let from = prefix.as_deref().unwrap_or("");
            txn.walk_records(Records::Tracks, from, |key, value| {
                if let Some(prefix) = &prefix {
                    if !key.starts_with(prefix.as_str()) {
                        return Ok(ControlFlow::Break(()));
                    }
                }
                let data = PropertySet::decode(value)?;
                if data.get(PATH).is_some() {
                    tracks.push((key.to_string(), data));
                }
                Ok(ControlFlow::Continue(()))
            })?;
            let mut found = Vec::with_capacity(tracks.len());
            for (track, data) in tracks {
                let prefs = txn.get_record(Records::Prefs, &track)?.unwrap_or_default();
                found.push(TrackData { track, data, prefs });
            }
            Ok(found)
        })?;
        for track in &tracks {
            if visit(track).is_break() {
                break;
            }
        }
        Ok(())
    }
}
