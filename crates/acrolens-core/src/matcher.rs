//! Acronym-like token matching.
//!
//! The matcher is a pure function over a text blob: it never fails, keeps no
//! state between calls and returns non-overlapping matches sorted by start
//! offset. Overlapping lexical possibilities are resolved leftmost-first by
//! the underlying regex engine.

use std::collections::HashSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

#[cfg(not(all(target_family = "wasm", target_os = "unknown")))]
use regex::Regex;
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
use regex_lite::Regex;

/// Lexical rule deciding what counts as an acronym-like token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchRule {
    /// Whole words made of two or more uppercase ASCII letters (`REST`, `FAQ`).
    #[default]
    UpperRun,
    /// Whole words containing at least two uppercase letters anywhere
    /// (`GitHub`, `iOS`, `PhD`, as well as everything `UpperRun` finds).
    MixedCase,
}

/// ASCII word boundary on both targets, so accented letters delimit tokens.
#[cfg(not(all(target_family = "wasm", target_os = "unknown")))]
const BOUNDARY: &str = r"(?-u:\b)";
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
const BOUNDARY: &str = r"\b";

impl MatchRule {
    fn pattern(self) -> String {
        let body = match self {
            MatchRule::UpperRun => "[A-Z]{2,}",
            MatchRule::MixedCase => "[A-Za-z]*[A-Z][a-z]*[A-Z][A-Za-z]*",
        };
        format!("{BOUNDARY}{body}{BOUNDARY}")
    }
}

/// One candidate token found by the matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Byte range in the scanned text.
    pub range: Range<usize>,
    /// The matched text.
    pub text: SmolStr,
}

impl Match {
    pub fn new(range: Range<usize>, text: impl Into<SmolStr>) -> Self {
        Self {
            range,
            text: text.into(),
        }
    }

    pub fn start(&self) -> usize {
        self.range.start
    }

    pub fn end(&self) -> usize {
        self.range.end
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Compiled matcher for one rule plus its post-filters.
///
/// Cheap to clone; a scan snapshots the matcher at start so the rule stays
/// fixed for the whole walk even if configuration reloads mid-scan.
#[derive(Debug, Clone)]
pub struct TokenMatcher {
    rule: MatchRule,
    regex: Regex,
    min_len: usize,
    max_len: Option<usize>,
    stop_words: HashSet<SmolStr>,
}

impl Default for TokenMatcher {
    fn default() -> Self {
        Self::new(MatchRule::default())
    }
}

impl TokenMatcher {
    pub fn new(rule: MatchRule) -> Self {
        // The built-in patterns are constant and known-good.
        let regex = Regex::new(&rule.pattern()).unwrap_or_else(|e| {
            unreachable!("built-in pattern for {rule:?} failed to compile: {e}")
        });
        Self {
            rule,
            regex,
            min_len: 2,
            max_len: None,
            stop_words: HashSet::new(),
        }
    }

    /// Only report tokens with at least `min_len` characters.
    pub fn with_min_len(mut self, min_len: usize) -> Self {
        self.min_len = min_len.max(1);
        self
    }

    /// Only report tokens with at most `max_len` characters. Unbounded
    /// unless set.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len.max(self.min_len));
        self
    }

    /// Never report these exact tokens.
    pub fn with_stop_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.stop_words = words.into_iter().map(Into::into).collect();
        self
    }

    pub fn rule(&self) -> MatchRule {
        self.rule
    }

    /// Find all candidate tokens in `text`.
    ///
    /// Total and pure: empty input gives an empty vector, results never
    /// overlap and are sorted by ascending start offset.
    pub fn find(&self, text: &str) -> Vec<Match> {
        if text.is_empty() {
            return Vec::new();
        }

        self.regex
            .find_iter(text)
            .filter(|m| {
                let len = m.as_str().chars().count();
                len >= self.min_len
                    && self.max_len.is_none_or(|max| len <= max)
                    && !self.stop_words.contains(m.as_str())
            })
            .map(|m| Match::new(m.start()..m.end(), m.as_str()))
            .collect()
    }
}

/// Match `text` with the default rule.
pub fn match_tokens(text: &str) -> Vec<Match> {
    TokenMatcher::default().find(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(matches: &[Match]) -> Vec<&str> {
        matches.iter().map(|m| m.text.as_str()).collect()
    }

    #[test]
    fn test_rest_api_json_sentence() {
        let text = "The REST API uses JSON payloads.";
        let matches = match_tokens(text);

        assert_eq!(texts(&matches), ["REST", "API", "JSON"]);
        assert_eq!(matches[0].range, 4..8);
        assert_eq!(matches[1].range, 9..12);
        assert_eq!(matches[2].range, 18..22);
        for m in &matches {
            assert_eq!(&text[m.range.clone()], m.text);
        }
    }

    #[test]
    fn test_empty_text() {
        assert!(match_tokens("").is_empty());
        assert!(TokenMatcher::new(MatchRule::MixedCase).find("").is_empty());
    }

    #[test]
    fn test_single_capital_is_not_a_token() {
        assert!(match_tokens("A quick note. I agree.").is_empty());
    }

    #[test]
    fn test_upper_run_requires_whole_word() {
        // Embedded capitals inside a word are not acronyms under the default rule.
        assert!(match_tokens("GitHub and McDONALD").is_empty());
        assert_eq!(texts(&match_tokens("NASA, ESA; JAXA.")), ["NASA", "ESA", "JAXA"]);
    }

    #[test]
    fn test_long_runs_match_by_default() {
        let text = "Set ABCDEFGHIJKLMNOP and SUPERCALIFRAGILISTIC";
        assert_eq!(
            texts(&match_tokens(text)),
            ["ABCDEFGHIJKLMNOP", "SUPERCALIFRAGILISTIC"]
        );
    }

    #[test]
    fn test_accented_letters_are_word_boundaries() {
        let text = "ÉTAT and NAÏVE and ÀLA";
        let matches = match_tokens(text);
        assert_eq!(texts(&matches), ["TAT", "NA", "VE", "LA"]);
        for m in &matches {
            assert_eq!(&text[m.range.clone()], m.text);
        }
        let mixed = TokenMatcher::new(MatchRule::MixedCase);
        assert_eq!(texts(&mixed.find("ÉcoleNormale GÉNÉRAL")), ["RAL"]);
    }

    #[test]
    fn test_mixed_case_rule() {
        let matcher = TokenMatcher::new(MatchRule::MixedCase);
        let matches = matcher.find("Push to GitHub from iOS with a PhD and REST.");
        assert_eq!(texts(&matches), ["GitHub", "iOS", "PhD", "REST"]);

        assert!(matcher.find("Hello World").is_empty());
    }

    #[test]
    fn test_length_bounds_and_stop_words() {
        let matcher = TokenMatcher::default()
            .with_min_len(3)
            .with_max_len(4)
            .with_stop_words(["III"]);
        let matches = matcher.find("UK USA NATO UNESCO Henry III");
        assert_eq!(texts(&matches), ["USA", "NATO"]);
    }

    #[test]
    fn test_matches_sorted_and_disjoint() {
        let inputs = [
            "AB CD EF",
            "ABCD-EFGH/IJ",
            "x HTTP/HTTPS TLS1 TCP_IP  ÉTAT",
            "mixed GitHub iOS PhD ABC",
            "",
        ];
        for rule in [MatchRule::UpperRun, MatchRule::MixedCase] {
            let matcher = TokenMatcher::new(rule);
            for input in inputs {
                let matches = matcher.find(input);
                for pair in matches.windows(2) {
                    assert!(pair[0].end() <= pair[1].start(), "{rule:?} {input:?}");
                }
                for m in &matches {
                    assert!(!m.is_empty());
                    assert_eq!(&input[m.range.clone()], m.text);
                }
            }
        }
    }

    #[test]
    fn test_rule_serde_names() {
        let rule: MatchRule = serde_json::from_str("\"mixed-case\"").unwrap();
        assert_eq!(rule, MatchRule::MixedCase);
        assert_eq!(serde_json::to_string(&MatchRule::UpperRun).unwrap(), "\"upper-run\"");
    }
}
