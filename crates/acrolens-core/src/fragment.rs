//! Pure text-to-fragment rewriting.
//!
//! Splits a text node's content into plain runs interleaved with annotated
//! runs, one per match. The fragment is a description only; applying it to
//! a document is `DocumentTree::replace_text_with_fragment`, which the scanner
//! defers to the host's frame queue.

use smol_str::SmolStr;

use crate::error::RewriteError;
use crate::matcher::Match;

/// What a run of a fragment represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunKind {
    /// Text kept as-is.
    Plain,
    /// Highlighted token; the index refers to the match list it was built from.
    Annotated(usize),
}

/// One run of a rewritten fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub kind: RunKind,
    pub content: SmolStr,
}

impl Run {
    pub fn plain(content: impl Into<SmolStr>) -> Self {
        Self {
            kind: RunKind::Plain,
            content: content.into(),
        }
    }

    pub fn annotated(index: usize, content: impl Into<SmolStr>) -> Self {
        Self {
            kind: RunKind::Annotated(index),
            content: content.into(),
        }
    }

    pub fn is_annotated(&self) -> bool {
        matches!(self.kind, RunKind::Annotated(_))
    }
}

/// Ordered replacement for one text node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fragment {
    runs: Vec<Run>,
}

impl Fragment {
    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn into_runs(self) -> Vec<Run> {
        self.runs
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Number of annotated runs.
    pub fn annotated_count(&self) -> usize {
        self.runs.iter().filter(|r| r.is_annotated()).count()
    }

    /// Read every run back as plain text.
    pub fn plain_text(&self) -> String {
        let len = self.runs.iter().map(|r| r.content.len()).sum();
        let mut out = String::with_capacity(len);
        for run in &self.runs {
            out.push_str(&run.content);
        }
        out
    }
}

/// Build the replacement fragment for `text` given its match list.
///
/// Matches must be sorted, non-overlapping, non-empty and on character
/// boundaries; anything else is a matching error and nothing is produced.
/// Zero-length plain runs are never emitted, so reading the fragment back
/// gives exactly `text`.
pub fn rewrite(text: &str, matches: &[Match]) -> Result<Fragment, RewriteError> {
    let mut runs = Vec::with_capacity(matches.len() * 2 + 1);
    let mut cursor = 0;

    for (index, m) in matches.iter().enumerate() {
        let range = m.range.clone();
        if range.is_empty() {
            return Err(RewriteError::Empty { range });
        }
        if range.end > text.len() {
            return Err(RewriteError::OutOfBounds {
                range,
                len: text.len(),
            });
        }
        if range.start < cursor {
            return Err(RewriteError::Overlap {
                range,
                previous_end: cursor,
            });
        }
        let Some(token) = text.get(range.clone()) else {
            return Err(RewriteError::NotCharBoundary { range });
        };

        if range.start > cursor {
            // cursor and range.start are both known boundaries here
            runs.push(Run::plain(&text[cursor..range.start]));
        }
        runs.push(Run::annotated(index, token));
        cursor = range.end;
    }

    if cursor < text.len() {
        runs.push(Run::plain(&text[cursor..]));
    }

    Ok(Fragment { runs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{MatchRule, TokenMatcher, match_tokens};

    #[test]
    fn test_rewrite_scenario_sentence() {
        let text = "The REST API uses JSON payloads.";
        let fragment = rewrite(text, &match_tokens(text)).unwrap();
        let rendered: String = fragment
            .runs()
            .iter()
            .map(|r| match r.kind {
                RunKind::Plain => r.content.to_string(),
                RunKind::Annotated(i) => format!("[{i}:{}]", r.content),
            })
            .collect();
        insta::assert_snapshot!(rendered, @"The [0:REST] [1:API] uses [2:JSON] payloads.");
        assert_eq!(fragment.plain_text(), text);
        assert_eq!(fragment.annotated_count(), 3);
    }

    #[test]
    fn test_no_empty_plain_runs() {
        let text = "ABC DEF";
        let fragment = rewrite(text, &match_tokens(text)).unwrap();
        let kinds: Vec<_> = fragment.runs().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            [RunKind::Annotated(0), RunKind::Plain, RunKind::Annotated(1)]
        );
        assert!(fragment.runs().iter().all(|r| !r.content.is_empty()));
    }

    #[test]
    fn test_no_matches_is_single_plain_run() {
        let fragment = rewrite("nothing here", &[]).unwrap();
        assert_eq!(fragment.runs(), [Run::plain("nothing here")]);
        assert!(rewrite("", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip_over_varied_text() {
        let inputs = [
            "",
            "plain prose only",
            "NASA",
            "  leading and trailing CPU  ",
            "Ünïcödé AB text 😀 with CD and EF!",
            "GitHub iOS PhD REST\nnewline TLS\tTAB",
            "AB-CD/EF.GH,IJ",
        ];
        for rule in [MatchRule::UpperRun, MatchRule::MixedCase] {
            let matcher = TokenMatcher::new(rule);
            for text in inputs {
                let matches = matcher.find(text);
                let fragment = rewrite(text, &matches).unwrap();
                assert_eq!(fragment.plain_text(), text, "{rule:?}");
                assert_eq!(fragment.annotated_count(), matches.len());
            }
        }
    }

    #[test]
    fn test_malformed_matches_are_rejected() {
        let text = "AB CD é";

        let out_of_bounds = [Match::new(5..40, "CD")];
        assert!(matches!(
            rewrite(text, &out_of_bounds),
            Err(RewriteError::OutOfBounds { len: 8, .. })
        ));

        let overlapping = [Match::new(0..2, "AB"), Match::new(1..5, "B CD")];
        assert!(matches!(
            rewrite(text, &overlapping),
            Err(RewriteError::Overlap { previous_end: 2, .. })
        ));

        let unsorted = [Match::new(3..5, "CD"), Match::new(0..2, "AB")];
        assert!(matches!(
            rewrite(text, &unsorted),
            Err(RewriteError::Overlap { .. })
        ));

        // 'é' occupies bytes 6..8
        let split_char = [Match::new(6..7, "é")];
        assert!(matches!(
            rewrite(text, &split_char),
            Err(RewriteError::NotCharBoundary { .. })
        ));

        let empty = [Match::new(2..2, "")];
        assert!(matches!(rewrite(text, &empty), Err(RewriteError::Empty { .. })));
    }
}
