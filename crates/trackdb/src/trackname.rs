//! Collection roots and name parts derived from track paths.

use common::extension;
use regex::Regex;

use crate::config::CatalogConfig;
use crate::error::Result;
use crate::kvp::PropertySet;

pub const DISPLAY_PREFIX: &str = "trackname_display_";

struct PartRule {
    part: String,
    regex: Regex,
    replace: String,
    context: String,
}

pub struct NameParts {
    roots: Vec<String>,
    rules: Vec<PartRule>,
}

impl NameParts {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.nameparts.len());
        for rule in &config.nameparts {
            rules.push(PartRule {
                part: rule.part.clone(),
                regex: Regex::new(&rule.regex)?,
                replace: rule.replace.clone(),
                context: rule.context.clone(),
            });
        }
        Ok(Self {
            roots: config
                .collections
                .iter()
                .map(|collection| collection.root.clone())
                .collect(),
            rules,
        })
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Root of the first collection that contains `track`.
    pub fn find_root(&self, track: &str) -> Option<&str> {
        self.roots
            .iter()
            .find(|root| {
                track.len() > root.len()
                    && track.starts_with(root.as_str())
                    && track.as_bytes()[root.len()] == b'/'
            })
            .map(String::as_str)
    }

    /// `track` with its collection root removed; keeps the leading `/`.
    pub fn rootless<'a>(&self, track: &'a str) -> Option<&'a str> {
        self.find_root(track).map(|root| &track[root.len()..])
    }

    /// Name part computed from the path alone, ignoring preferences.
    pub fn part(&self, track: &str, context: &str, part: &str) -> String {
        match part {
            "path" => return track.to_string(),
            "ext" => return extension(track).to_string(),
            _ => {}
        }
        let subject = self.rootless(track).unwrap_or(track);
        for rule in &self.rules {
            if rule.part != part || !glob_match(&rule.context, context) {
                continue;
            }
            if let Some(caps) = rule.regex.captures(subject) {
                let mut out = String::new();
                caps.expand(&rule.replace, &mut out);
                return out;
            }
        }
        String::new()
    }

    /// Name part honouring a `trackname_<context>_<part>` preference.
    /// The flag reports whether the preference supplied the value.
    pub fn part_with_prefs(
        &self,
        track: &str,
        context: &str,
        part: &str,
        prefs: &PropertySet,
    ) -> (String, bool) {
        let pref = format!("trackname_{}_{}", context, part);
        match prefs.get(&pref) {
            Some(value) => (value.to_string(), true),
            None => (self.part(track, context, part), false),
        }
    }

    /// Expands an alias template such as `{/artist}{/album}{/title}{ext}`
    /// under the track's collection root. Returns `None` when the track is
    /// in no collection or no preference contributed to the result.
    pub fn expand_alias(&self, template: &str, track: &str, prefs: &PropertySet) -> Option<String> {
        let root = self.find_root(track)?;
        let mut out = root.to_string();
        let mut used_prefs = false;
        let mut rest = template;
        while !rest.is_empty() {
            let open = match rest.find('{') {
                Some(open) => open,
                None => {
                    out.push_str(rest);
                    break;
                }
            };
            out.push_str(&rest[..open]);
            let close = match rest[open..].find('}') {
                Some(close) => open + close,
                None => panic!("unterminated part in alias template {:?}", template),
            };
            let spec = &rest[open + 1..close];
            let (slash, name) = match spec.strip_prefix('/') {
                Some(name) => (true, name),
                None => (false, spec),
            };
            let (value, from_prefs) = self.part_with_prefs(track, "display", name, prefs);
            used_prefs |= from_prefs;
            if !value.is_empty() {
                if slash {
                    out.push('/');
                }
                out.push_str(&value);
            }
            rest = &rest[close + 1..];
        }
        if !used_prefs || out == track {
            return None;
        }
        Some(out)
    }
}

/// Shell-style match supporting `*` and `?`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionConfig;

    fn parts() -> NameParts {
        let mut config = CatalogConfig::default();
        config.collections.push(CollectionConfig {
            root: "/music".to_string(),
            ..CollectionConfig::default()
        });
        NameParts::new(&config).unwrap()
    }

    #[test]
    fn finds_collection_roots() {
        let parts = parts();
        assert_eq!(parts.find_root("/music/a/b.ogg"), Some("/music"));
        assert_eq!(parts.find_root("/musical/b.ogg"), None);
        assert_eq!(parts.find_root("/music"), None);
        assert_eq!(parts.rootless("/music/a/b.ogg"), Some("/a/b.ogg"));
    }

    #[test]
    fn default_rules_split_artist_album_title() {
        let parts = parts();
        let track = "/music/Joe Bloggs/First Album/01:First track.ogg";
        assert_eq!(parts.part(track, "display", "artist"), "Joe Bloggs");
        assert_eq!(parts.part(track, "display", "album"), "First Album");
        assert_eq!(parts.part(track, "display", "title"), "First track");
        assert_eq!(parts.part(track, "sort", "title"), "01:First track");
        assert_eq!(parts.part(track, "display", "ext"), ".ogg");
        assert_eq!(parts.part(track, "display", "path"), track);
        assert_eq!(parts.part("/music/misc/x.ogg", "display", "artist"), "");
    }

    #[test]
    fn preferences_override_parts() {
        let parts = parts();
        let prefs = PropertySet::from_pairs([("trackname_display_artist", "Fred Smith")]);
        let (artist, from_prefs) =
            parts.part_with_prefs("/music/misc/x.ogg", "display", "artist", &prefs);
        assert_eq!(artist, "Fred Smith");
        assert!(from_prefs);
        let (title, from_prefs) =
            parts.part_with_prefs("/music/misc/x.ogg", "display", "title", &prefs);
        assert_eq!(title, "x");
        assert!(!from_prefs);
    }

    #[test]
    fn alias_needs_a_preference() {
        let parts = parts();
        let template = "{/artist}{/album}{/title}{ext}";
        let track = "/music/misc/blahblahblah.ogg";
        assert_eq!(parts.expand_alias(template, track, &PropertySet::new()), None);

        let prefs = PropertySet::from_pairs([
            ("trackname_display_artist", "Fred Smith"),
            ("trackname_display_album", "wibble"),
        ]);
        assert_eq!(
            parts.expand_alias(template, track, &prefs).as_deref(),
            Some("/music/Fred Smith/wibble/blahblahblah.ogg")
        );
        assert_eq!(parts.expand_alias(template, "/elsewhere/x.ogg", &prefs), None);
    }

    #[test]
    fn alias_equal_to_track_is_dropped() {
        let parts = parts();
        let prefs = PropertySet::from_pairs([("trackname_display_artist", "A")]);
        let track = "/music/A/B/t.ogg";
        assert_eq!(
            parts.expand_alias("{/artist}{/album}{/title}{ext}", track, &prefs),
            None
        );
    }

    #[test]
    fn context_globs() {
        assert!(glob_match("*", "display"));
        assert!(glob_match("disp*", "display"));
        assert!(glob_match("d?splay", "display"));
        assert!(!glob_match("sort", "display"));
        assert!(glob_match("*lay", "display"));
    }
}
