use std::cmp::Ordering;

mod normalize;

pub use normalize::{Normalizer, UnicodeNormalizer};

/// Orders track paths so that the direct children of a directory sort
/// together: at the first differing byte a `/` sorts before anything else.
///
/// `/a/b` < `/aa/`, `/a` < `/a/b`, and a proper prefix sorts first.
pub fn compare_path(a: &[u8], b: &[u8]) -> Ordering {
    for (&x, &y) in a.iter().zip(b.iter()) {
        if x == y {
            continue;
        }
        if x == b'/' {
            return Ordering::Less;
        }
        if y == b'/' {
            return Ordering::Greater;
        }
        return x.cmp(&y);
    }
    a.len().cmp(&b.len())
}

/// Everything before the last `/`. A top-level name yields `/`, a bare name `.`.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Extension of the last path component including the dot, or "".
pub fn extension(path: &str) -> &str {
    let name = basename(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[idx..],
        _ => "",
    }
}

pub fn strip_extension(path: &str) -> &str {
    let ext = extension(path);
    &path[..path.len() - ext.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_path_groups_directory_children() {
        let cases: &[(&str, &str, Ordering)] = &[
            ("/a/b", "/aa/", Ordering::Less),
            ("/a/b", "/a", Ordering::Greater),
            ("/ab", "/a", Ordering::Greater),
            ("/ab", "/aa", Ordering::Greater),
            ("/aa", "/aa", Ordering::Equal),
            ("/", "/", Ordering::Equal),
            ("/x/y/z", "/x/y-z", Ordering::Less),
        ];
        for (a, b, expected) in cases {
            assert_eq!(compare_path(a.as_bytes(), b.as_bytes()), *expected, "{a} vs {b}");
            assert_eq!(
                compare_path(b.as_bytes(), a.as_bytes()),
                expected.reverse(),
                "{b} vs {a}"
            );
        }
    }

    #[test]
    fn children_sort_contiguously() {
        let mut paths = vec!["/m/b-side.ogg", "/m/a/1.ogg", "/m/a.ogg", "/m/a/2.ogg", "/m/a-b/3.ogg"];
        paths.sort_by(|a, b| compare_path(a.as_bytes(), b.as_bytes()));
        assert_eq!(
            paths,
            vec!["/m/a/1.ogg", "/m/a/2.ogg", "/m/a-b/3.ogg", "/m/a.ogg", "/m/b-side.ogg"]
        );
    }

    #[test]
    fn path_helpers() {
        assert_eq!(dirname("/music/a/b.ogg"), "/music/a");
        assert_eq!(dirname("/b.ogg"), "/");
        assert_eq!(dirname("b.ogg"), ".");
        assert_eq!(basename("/music/a/b.ogg"), "b.ogg");
        assert_eq!(extension("/music/a/b.ogg"), ".ogg");
        assert_eq!(extension("/music/a.d/b"), "");
        assert_eq!(extension("/music/.hidden"), "");
        assert_eq!(strip_extension("/music/a/b.ogg"), "/music/a/b");
    }
}
