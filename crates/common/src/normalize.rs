use unicode_normalization::char::canonical_combining_class;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

/// Text normalization used to build database keys and index tokens.
///
/// The catalog only relies on this contract; [`UnicodeNormalizer`] is the
/// stock implementation.
pub trait Normalizer: Send + Sync {
    /// Canonical composed form, used for every stored key.
    fn nfc(&self, input: &str) -> String;

    /// Compatibility case fold with combining characters removed.
    fn fold(&self, input: &str) -> String;

    /// Folded words in order of appearance. With `underscore_breaks` an
    /// underscore separates words instead of joining them.
    fn words(&self, input: &str, underscore_breaks: bool) -> Vec<String>;

    /// Normalized tag: folded words joined by single spaces.
    fn tag(&self, input: &str) -> String {
        self.words(input, false).join(" ")
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UnicodeNormalizer;

impl Normalizer for UnicodeNormalizer {
    fn nfc(&self, input: &str) -> String {
        input.nfc().collect()
    }

    fn fold(&self, input: &str) -> String {
        let decomposed: String = input.nfkd().collect();
        decomposed
            .to_lowercase()
            .nfkd()
            .filter(|ch| canonical_combining_class(*ch) == 0)
            .collect()
    }

    fn words(&self, input: &str, underscore_breaks: bool) -> Vec<String> {
        let mut folded = self.fold(input);
        if underscore_breaks {
            folded = folded.replace('_', " ");
        }
        folded.unicode_words().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_strips_case_and_accents() {
        let norm = UnicodeNormalizer;
        assert_eq!(norm.fold("Café"), "cafe");
        assert_eq!(norm.fold("ÅNGSTRÖM"), "angstrom");
        assert_eq!(norm.fold("ﬁve"), "five");
    }

    #[test]
    fn words_respect_underscore_tailoring() {
        let norm = UnicodeNormalizer;
        assert_eq!(norm.words("Love_Song (live)", true), vec!["love", "song", "live"]);
        assert_eq!(norm.words("Love_Song", false), vec!["love_song"]);
    }

    #[test]
    fn tag_collapses_spacing() {
        let norm = UnicodeNormalizer;
        assert_eq!(norm.tag("  Drum   and BASS "), "drum and bass");
    }

    #[test]
    fn nfc_composes() {
        let norm = UnicodeNormalizer;
        assert_eq!(norm.nfc("e\u{301}"), "\u{e9}");
    }
}
