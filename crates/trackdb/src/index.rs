//! Search words and tags derived from a track and its preferences.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use common::{strip_extension, Normalizer};

use crate::kvp::PropertySet;
use crate::trackname::DISPLAY_PREFIX;

pub struct Indexer {
    normalizer: Arc<dyn Normalizer>,
    stopwords: HashSet<String>,
}

impl Indexer {
    pub fn new(normalizer: Arc<dyn Normalizer>, stopwords: &[String]) -> Self {
        let stopwords = stopwords
            .iter()
            .map(|word| normalizer.fold(word))
            .collect();
        Self {
            normalizer,
            stopwords,
        }
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.contains(word)
    }

    /// Sorted, deduplicated words of a track: its rootless name without the
    /// extension, plus every display-name preference. Stopwords are kept.
    pub fn words(&self, rootless: &str, prefs: &PropertySet) -> Vec<String> {
        let mut words = self.normalizer.words(strip_extension(rootless), true);
        for (name, value) in prefs.iter() {
            if name.starts_with(DISPLAY_PREFIX) {
                words.extend(self.normalizer.words(value, true));
            }
        }
        words.sort();
        words.dedup();
        words
    }

    /// The words that go into the search index.
    pub fn index_words(&self, rootless: &str, prefs: &PropertySet) -> Vec<String> {
        let mut words = self.words(rootless, prefs);
        words.retain(|word| !self.is_stopword(word));
        words
    }

    /// Splits a comma separated tag list into sorted, unique, normalized tags.
    pub fn parse_tags(&self, tags: Option<&str>) -> Vec<String> {
        let mut out: Vec<String> = tags
            .unwrap_or("")
            .split(|c: char| c == ',' || c < ' ')
            .map(|tag| tag.trim_matches(' '))
            .filter(|tag| !tag.is_empty())
            .map(|tag| self.normalizer.tag(tag))
            .filter(|tag| !tag.is_empty())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn normalizer(&self) -> &dyn Normalizer {
        self.normalizer.as_ref()
    }
}

/// Whether two sorted lists share an element.
pub fn tag_intersection(a: &[String], b: &[String]) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Equal => return true,
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
        }
    }
    false
}

/// Walks two sorted lists once, returning what to remove and what to add
/// to turn `old` into `new`.
pub fn sorted_delta<'a>(old: &'a [String], new: &'a [String]) -> (Vec<&'a str>, Vec<&'a str>) {
    let (mut removed, mut added) = (Vec::new(), Vec::new());
    let (mut i, mut j) = (0, 0);
    while i < old.len() || j < new.len() {
        if i < old.len() && j < new.len() && old[i] == new[j] {
            i += 1;
            j += 1;
        } else if j >= new.len() || (i < old.len() && old[i] < new[j]) {
            removed.push(old[i].as_str());
            i += 1;
        } else {
            added.push(new[j].as_str());
            j += 1;
        }
    }
    (removed, added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::UnicodeNormalizer;

    fn indexer() -> Indexer {
        let stopwords: Vec<String> = ["the", "01", "a"].iter().map(|w| w.to_string()).collect();
        Indexer::new(Arc::new(UnicodeNormalizer), &stopwords)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn words_come_from_name_and_display_prefs() {
        let indexer = indexer();
        let prefs = PropertySet::from_pairs([
            ("trackname_display_artist", "Fred Smith"),
            ("trackname_sort_artist", "Smith, Fred"),
            ("tags", "jazz"),
        ]);
        let words = indexer.words("/The Band/01:Love_Song.ogg", &prefs);
        assert_eq!(words, strings(&["01", "band", "fred", "love", "smith", "song", "the"]));
        let indexed = indexer.index_words("/The Band/01:Love_Song.ogg", &prefs);
        assert_eq!(indexed, strings(&["band", "fred", "love", "smith", "song"]));
    }

    #[test]
    fn words_ignore_accents() {
        let indexer = indexer();
        let words = indexer.words("/Joe/F\u{cc}rst Th\u{49}\u{301}rd.ogg", &PropertySet::new());
        assert_eq!(words, strings(&["first", "joe", "third"]));
    }

    #[test]
    fn tags_are_split_normalized_and_sorted() {
        let indexer = indexer();
        assert_eq!(
            indexer.parse_tags(Some("  Rock , jazz,,\u{7}JAZZ, drum  and bass ")),
            strings(&["drum and bass", "jazz", "rock"])
        );
        assert!(indexer.parse_tags(None).is_empty());
        assert!(indexer.parse_tags(Some(" , ,")).is_empty());
    }

    #[test]
    fn intersection_of_sorted_lists() {
        assert!(tag_intersection(&strings(&["a", "c", "e"]), &strings(&["b", "e"])));
        assert!(!tag_intersection(&strings(&["a", "c"]), &strings(&["b", "d"])));
        assert!(!tag_intersection(&[], &strings(&["b"])));
    }

    #[test]
    fn delta_touches_only_the_difference() {
        let old = strings(&["a", "c", "d"]);
        let new = strings(&["b", "c", "e"]);
        let (removed, added) = sorted_delta(&old, &new);
        assert_eq!(removed, vec!["a", "d"]);
        assert_eq!(added, vec!["b", "e"]);

        let (removed, added) = sorted_delta(&old, &old);
        assert!(removed.is_empty() && added.is_empty());
    }
}
