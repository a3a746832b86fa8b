use tracing::error;

use super::{Catalog, Follow};
use crate::error::Result;
use crate::store::Index;

enum Term {
    Word(String),
    Tag(String),
}

impl Catalog {
    /// Tracks matching every term. A term `tag:NAME` requires that tag;
    /// any other term is split into words the way track names are, and
    /// each of those must be one of the track's words.
    pub fn search(&self, terms: &[&str]) -> Result<Vec<String>> {
        let norm = self.indexer.normalizer();
        let mut parsed = Vec::new();
        for term in terms {
            let folded = norm.fold(term);
            match folded.strip_prefix("tag:") {
                Some(tag) => parsed.push(Term::Tag(norm.tag(tag))),
                None => parsed.extend(norm.words(&folded, true).into_iter().map(Term::Word)),
            }
        }
        let terms = parsed;

        let mut pivot: Option<&str> = None;
        for term in &terms {
            if let Term::Word(word) = term {
                if self.indexer.is_stopword(word) {
                    continue;
                }
                if pivot.map_or(true, |best| word.len() > best.len()) {
                    pivot = Some(word.as_str());
                }
            }
        }
        let (index, pivot) = match (pivot, terms.first()) {
            (Some(word), _) => (Index::Search, word),
            (None, Some(Term::Tag(tag))) => (Index::Tags, tag.as_str()),
            _ => return Ok(Vec::new()),
        };

        self.env.with_txn("search", |txn| {
            let candidates = txn.index_tracks(index, pivot)?;
            let mut found = Vec::new();
            for candidate in candidates {
                let data = match self.track_data(txn, &candidate, Follow::Aliases)? {
                    Some(data) => data,
                    None => {
                        error!("Track {:?} in {} index has no record", candidate, index.name());
                        continue;
                    }
                };
                let rootless = self.names.rootless(&candidate).unwrap_or(&candidate);
                let words = self.indexer.words(rootless, &data.prefs);
                let tags = self.indexer.parse_tags(data.prefs.get("tags"));
                let all = terms.iter().all(|term| match term {
                    Term::Word(word) => words.binary_search(word).is_ok(),
                    Term::Tag(tag) => tags.binary_search(tag).is_ok(),
                });
                if all {
                    found.push(candidate);
                }
            }
            Ok(found)
        })
    }
}
