use std::ops::ControlFlow;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info};

use super::{Catalog, TrackData, ALIAS_FOR};
use crate::env::Txn;
use crate::error::Result;
use crate::index::tag_intersection;
use crate::kvp::PropertySet;
use crate::now_secs;
use crate::store::{Index, Records};

const DEFAULT_WEIGHT: u64 = 90000;

/// Random record numbers resolved by a single walk of the tracks table.
const DRAWS_PER_WALK: usize = 32;

/// Tracks carrying at least one of `required`, valid while the catalog's
/// tag version is unchanged.
#[derive(Default)]
pub(super) struct TagCache {
    version: Option<u64>,
    required: Vec<String>,
    candidates: Arc<Vec<String>>,
}

struct Criteria {
    required: Vec<String>,
    prohibited: Vec<String>,
    now: u64,
}

/// Every eligible track with its weight, for a single weighted draw.
#[derive(Debug, Default)]
pub struct WeightedPick {
    tracks: Vec<(String, u64)>,
    total: u64,
}

impl WeightedPick {
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn total_weight(&self) -> u64 {
        self.total
    }

    pub fn choose<R: Rng>(&self, rng: &mut R) -> Option<&str> {
        if self.total == 0 {
            return None;
        }
        let mut left = rng.random_range(0..self.total);
        for (track, weight) in &self.tracks {
            if left < *weight {
                return Some(track);
            }
            left -= weight;
        }
        None
    }
}

impl Catalog {
    fn criteria(&self, txn: &Txn<'_>) -> Result<Criteria> {
        let required = txn.global_get("required-tags")?;
        let prohibited = txn.global_get("prohibited-tags")?;
        Ok(Criteria {
            required: self.indexer.parse_tags(required.as_deref()),
            prohibited: self.indexer.parse_tags(prohibited.as_deref()),
            now: now_secs(),
        })
    }

    /// Whether a track may be played at random under `criteria`.
    fn suitable(&self, track: &str, data: &PropertySet, prefs: &PropertySet, criteria: &Criteria) -> bool {
        if self.names.find_root(track).is_none() {
            info!("Found track not in any collection: {:?}", track);
            return false;
        }
        if data.get(ALIAS_FOR).is_some() {
            return false;
        }
        if prefs.get("pick_at_random") == Some("0") {
            return false;
        }
        if let Some(last) = prefs.get("played_time") {
            let last = last.trim().parse::<u64>().unwrap_or(0);
            if criteria.now < last.saturating_add(self.config.replay_min_secs) {
                return false;
            }
        }
        let tags = self.indexer.parse_tags(prefs.get("tags"));
        if tag_intersection(&tags, &criteria.prohibited) {
            return false;
        }
        if !criteria.required.is_empty() && !tag_intersection(&tags, &criteria.required) {
            return false;
        }
        true
    }

    /// Share of a weighted draw; only suitable tracks get any.
    fn weight(&self, track: &str, data: &PropertySet, prefs: &PropertySet, criteria: &Criteria) -> u64 {
        if !self.suitable(track, data, prefs, criteria) {
            return 0;
        }
        prefs
            .get("weight")
            .and_then(|weight| weight.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_WEIGHT)
    }

    fn suitable_in(&self, txn: &Txn<'_>, track: &str, criteria: &Criteria) -> Result<bool> {
        let data = match txn.get_record(Records::Tracks, track)? {
            Some(data) => data,
            None => return Ok(false),
        };
        let prefs = txn.get_record(Records::Prefs, track)?.unwrap_or_default();
        Ok(self.suitable(track, &data, &prefs, criteria))
    }

    /// Whether `track` may be picked at random right now.
    pub fn check_suitable(&self, track: &str) -> Result<bool> {
        let track = self.key(track);
        self.env.with_txn("check_suitable", |txn| {
            let criteria = self.criteria(txn)?;
            self.suitable_in(txn, &track, &criteria)
        })
    }

    fn tag_candidates(&self, txn: &Txn<'_>, required: &[String]) -> Result<Arc<Vec<String>>> {
        let version = self.tag_version.load(Ordering::Relaxed);
        let mut cache = self.tag_cache.lock();
        if cache.version == Some(version) && cache.required == required {
            return Ok(cache.candidates.clone());
        }
        let mut candidates = Vec::new();
        for tag in required {
            candidates.extend(txn.index_tracks(Index::Tags, tag)?);
        }
        candidates.sort();
        candidates.dedup();
        debug!("{} tracks carry a required tag", candidates.len());
        *cache = TagCache {
            version: Some(version),
            required: required.to_vec(),
            candidates: Arc::new(candidates),
        };
        Ok(cache.candidates.clone())
    }

    /// Picks a random suitable track, giving up after `max_tries` draws.
    /// Weights play no part here; see [`Catalog::collect_weighted`].
    pub fn pick_random(&self, max_tries: usize) -> Result<Option<String>> {
        self.pick_random_with(&mut rand::rng(), max_tries)
    }

    pub fn pick_random_with<R: Rng>(&self, rng: &mut R, max_tries: usize) -> Result<Option<String>> {
        self.env.with_txn("pick_random", |txn| {
            let criteria = self.criteria(txn)?;
            if !criteria.required.is_empty() {
                let candidates = self.tag_candidates(txn, &criteria.required)?;
                if candidates.is_empty() {
                    return Ok(None);
                }
                for _ in 0..max_tries {
                    let track = &candidates[rng.random_range(0..candidates.len())];
                    if self.suitable_in(txn, track, &criteria)? {
                        return Ok(Some(track.clone()));
                    }
                }
                return Ok(None);
            }

            let count = txn.count_records(Records::Tracks)?;
            if count == 0 {
                return Ok(None);
            }
            let mut tries = max_tries;
            while tries > 0 {
                let round = tries.min(DRAWS_PER_WALK);
                tries -= round;
                let draws: Vec<u64> = (0..round).map(|_| rng.random_range(0..count)).collect();
                let mut positions = draws.clone();
                positions.sort_unstable();
                positions.dedup();
                let keys = txn.record_keys_at(Records::Tracks, &positions)?;
                for draw in &draws {
                    let track = match positions.binary_search(draw).ok().and_then(|idx| keys.get(idx)) {
                        Some(track) => track,
                        None => continue,
                    };
                    if self.suitable_in(txn, track, &criteria)? {
                        return Ok(Some(track.clone()));
                    }
                }
            }
            Ok(None)
        })
    }

    /// Weighs every canonical track against the current random-play rules.
    pub fn collect_weighted(&self) -> Result<WeightedPick> {
        let criteria = self.env.with_txn("criteria", |txn| self.criteria(txn))?;
        let mut pick = WeightedPick::default();
        self.scan(None, |found: &TrackData| {
            let weight = self.weight(&found.track, &found.data, &found.prefs, &criteria);
            if weight > 0 {
                pick.tracks.push((found.track.clone(), weight));
                pick.total += weight;
            }
            ControlFlow::Continue(())
        })?;
        Ok(pick)
    }
}
