use std::ops::ControlFlow;

use common::{basename, dirname};
use regex::{Regex, RegexBuilder};

use super::{Catalog, ALIAS_FOR};
use crate::env::Txn;
use crate::error::Result;
use crate::kvp::PropertySet;
use crate::store::Records;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Listable {
    Files,
    Dirs,
    Both,
}

impl Listable {
    fn files(self) -> bool {
        matches!(self, Listable::Files | Listable::Both)
    }

    fn dirs(self) -> bool {
        matches!(self, Listable::Dirs | Listable::Both)
    }
}

impl Catalog {
    /// Direct children of `dir`, or of every collection root when `dir`
    /// is `None`. `pattern` is a case-insensitive regex matched against
    /// the last path component. Aliases that sit next to their target are
    /// left out so a directory shows each track once.
    pub fn list(&self, dir: Option<&str>, what: Listable, pattern: Option<&str>) -> Result<Vec<String>> {
        let filter = match pattern {
            Some(pattern) => Some(RegexBuilder::new(pattern).case_insensitive(true).build()?),
            None => None,
        };
        let dirs: Vec<String> = match dir {
            Some(dir) => vec![self.key(dir)],
            None => self.names.roots().to_vec(),
        };
        self.env.with_txn("list", |txn| {
            let mut out = Vec::new();
            for dir in &dirs {
                list_one(txn, dir, what, filter.as_ref(), &mut out)?;
            }
            Ok(out)
        })
    }
}

fn list_one(
    txn: &Txn<'_>,
    dir: &str,
    what: Listable,
    filter: Option<&Regex>,
    out: &mut Vec<String>,
) -> Result<()> {
    let prefix = format!("{}/", dir.trim_end_matches('/'));
    let matches = |name: &str| filter.map_or(true, |re| re.is_match(name));
    let mut last_dir: Option<String> = None;

    txn.walk_records(Records::Tracks, &prefix, |key, value| {
        let rest = match key.strip_prefix(prefix.as_str()) {
            Some(rest) => rest,
            None => return Ok(ControlFlow::Break(())),
        };
        match rest.find('/') {
            Some(slash) => {
                if !what.dirs() {
                    return Ok(ControlFlow::Continue(()));
                }
                let subdir = &key[..prefix.len() + slash];
                if last_dir.as_deref() == Some(subdir) {
                    return Ok(ControlFlow::Continue(()));
                }
                last_dir = Some(subdir.to_string());
                if matches(basename(subdir)) {
                    out.push(subdir.to_string());
                }
            }
            None => {
                if !what.files() {
                    return Ok(ControlFlow::Continue(()));
                }
                let data = PropertySet::decode(value)?;
                if let Some(target) = data.get(ALIAS_FOR) {
                    if dirname(target) == dirname(key) {
                        return Ok(ControlFlow::Continue(()));
                    }
                }
                if matches(rest) {
                    out.push(key.to_string());
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    })
}
