//! Ordered name/value sets stored as URL-encoded `name=value&...` strings.

use crate::error::{Result, TrackDbError};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertySet {
    pairs: Vec<(String, String)>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }

    /// Value of the first pair called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces, appends or (for `None`) removes `name`. Returns whether
    /// anything changed.
    pub fn set(&mut self, name: &str, value: Option<&str>) -> bool {
        let found = self.pairs.iter().position(|(n, _)| n == name);
        match (found, value) {
            (Some(idx), Some(value)) => {
                if self.pairs[idx].1 == value {
                    return false;
                }
                self.pairs[idx].1 = value.to_string();
                true
            }
            (Some(idx), None) => {
                self.pairs.remove(idx);
                true
            }
            (None, Some(value)) => {
                self.pairs.push((name.to_string(), value.to_string()));
                true
            }
            (None, None) => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (idx, (name, value)) in self.pairs.iter().enumerate() {
            if idx > 0 {
                out.push('&');
            }
            encode_into(&mut out, name);
            out.push('=');
            encode_into(&mut out, value);
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pairs = Vec::new();
        if data.is_empty() {
            return Ok(Self { pairs });
        }
        for chunk in data.split(|b| *b == b'&') {
            let eq = chunk
                .iter()
                .position(|b| *b == b'=')
                .ok_or_else(|| corrupt(chunk, "missing '='"))?;
            let name = decode_component(&chunk[..eq])?;
            let value = decode_component(&chunk[eq + 1..])?;
            pairs.push((name, value));
        }
        Ok(Self { pairs })
    }
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"-_.!~*'()/".contains(&byte)
}

fn encode_into(out: &mut String, text: &str) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for &byte in text.as_bytes() {
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0xf) as usize] as char);
        }
    }
}

fn decode_component(raw: &[u8]) -> Result<String> {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut idx = 0;
    while idx < raw.len() {
        match raw[idx] {
            b'+' => {
                bytes.push(b' ');
                idx += 1;
            }
            b'%' => {
                let hi = raw.get(idx + 1).and_then(|b| hex_value(*b));
                let lo = raw.get(idx + 2).and_then(|b| hex_value(*b));
                match (hi, lo) {
                    (Some(hi), Some(lo)) => bytes.push(hi << 4 | lo),
                    _ => return Err(corrupt(raw, "bad escape")),
                }
                idx += 3;
            }
            other => {
                bytes.push(other);
                idx += 1;
            }
        }
    }
    String::from_utf8(bytes).map_err(|_| corrupt(raw, "not utf-8"))
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn corrupt(raw: &[u8], what: &str) -> TrackDbError {
    TrackDbError::Corrupt(format!("{}: {:?}", what, String::from_utf8_lossy(raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_reserved_characters() {
        let set = PropertySet::from_pairs([("_path", "/m/a b&c=d.ogg"), ("tags", "jazz, 50%")]);
        assert_eq!(
            set.encode(),
            "_path=/m/a%20b%26c%3dd.ogg&tags=jazz%2c%2050%25"
        );
        assert_eq!(PropertySet::decode(set.encode().as_bytes()).unwrap(), set);
    }

    #[test]
    fn decodes_plus_as_space_and_keeps_order() {
        let set = PropertySet::decode(b"b=x+y&a=%C3%A9&b=dup").unwrap();
        let pairs: Vec<_> = set.iter().collect();
        assert_eq!(pairs, vec![("b", "x y"), ("a", "\u{e9}"), ("b", "dup")]);
        assert_eq!(set.get("b"), Some("x y"));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(PropertySet::decode(b"novalue").is_err());
        assert!(PropertySet::decode(b"a=%zz").is_err());
        assert!(PropertySet::decode(b"").unwrap().is_empty());
    }

    #[test]
    fn set_reports_changes() {
        let mut set = PropertySet::new();
        assert!(set.set("weight", Some("10")));
        assert!(!set.set("weight", Some("10")));
        assert!(set.set("weight", Some("20")));
        assert!(set.set("pick_at_random", Some("0")));
        assert_eq!(set.iter().map(|(n, _)| n).collect::<Vec<_>>(), vec!["weight", "pick_at_random"]);
        assert!(set.set("weight", None));
        assert!(!set.set("weight", None));
        assert_eq!(set.len(), 1);
    }
}
