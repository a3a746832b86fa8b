use super::Catalog;
use crate::error::Result;
use crate::store::{Index, Records};

const LEAGUE_SIZE: usize = 10;

impl Catalog {
    /// Human-readable database statistics, one line per entry, ending
    /// with the most common search words.
    pub fn stats(&self) -> Result<Vec<String>> {
        self.env.with_txn("stats", |txn| {
            let mut lines = Vec::new();
            for which in [Records::Tracks, Records::Prefs] {
                lines.push(format!("{}: {} records", which.name(), txn.count_records(which)?));
            }
            let mut words = txn.index_tokens(Index::Search)?;
            let tags = txn.index_tokens(Index::Tags)?;
            lines.push(format!("search: {} words", words.len()));
            lines.push(format!("tags: {} tags", tags.len()));
            lines.push(format!("noticed: {} entries", txn.noticed_entries()?.len()));

            words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            lines.push("search league:".to_string());
            for (word, count) in words.iter().take(LEAGUE_SIZE) {
                lines.push(format!("{:>8} {}", count, word));
            }
            Ok(lines)
        })
    }
}
