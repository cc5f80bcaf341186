//! Core engine types: text spans, content stamps and overlay identifiers.
//!
//! These types are platform-agnostic and carry no reference to any
//! particular document implementation beyond the generic node handle.

use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;

use serde::{Serialize, Serializer};
use smol_str::{SmolStr, format_smolstr};

/// A contiguous range of text inside one text container.
///
/// Offsets are UTF-8 byte offsets into the container's text as it was when
/// the span was created. Spans are one-shot: once the container is rewritten
/// the offsets mean nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan<N> {
    /// The text node the span was taken from.
    pub container: N,
    /// Byte range within the container's text.
    pub range: Range<usize>,
    /// The literal text covered by `range`.
    pub text: SmolStr,
}

impl<N> TextSpan<N> {
    pub fn new(container: N, range: Range<usize>, text: impl Into<SmolStr>) -> Self {
        Self {
            container,
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
}

/// Hash of the text a node held when the engine classified it.
///
/// Stored against a text node as its processed marker. A node whose current
/// text hashes to its stored stamp has already been handled and is skipped;
/// a character-data edit makes the stamp stale and the node eligible again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentStamp(u32);

impl ContentStamp {
    /// Stamp for the given text.
    pub fn of(text: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let hash = hasher.finish();
        // Fold to 32 bits so the browser side-table can hold it as an exact JS number.
        Self((hash ^ (hash >> 32)) as u32)
    }

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Identifier of one overlay instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(u64);

impl OverlayId {
    pub fn get(self) -> u64 {
        self.0
    }

    /// Value written to the container's overlay marker attribute.
    pub fn to_attr(self) -> SmolStr {
        format_smolstr!("ov-{}", self.0)
    }

    /// Parse a marker attribute value back into an id.
    pub fn from_attr(value: &str) -> Option<Self> {
        value.strip_prefix("ov-")?.parse().ok().map(Self)
    }
}

impl Serialize for OverlayId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_attr())
    }
}

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ov-{}", self.0)
    }
}

/// Monotonic allocator for overlay ids, owned by the content controller.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: Cell<u64>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_overlay(&self) -> OverlayId {
        let id = self.next.get();
        self.next.set(id + 1);
        OverlayId(id)
    }
}

/// Convert a UTF-16 code unit offset (as used by DOM ranges) to a byte offset.
///
/// Offsets that land inside a surrogate pair or past the end are clamped to
/// the nearest preceding character boundary.
pub fn utf16_to_byte(text: &str, utf16_offset: usize) -> usize {
    let mut units = 0;
    for (byte_idx, ch) in text.char_indices() {
        if units >= utf16_offset {
            return byte_idx;
        }
        units += ch.len_utf16();
        if units > utf16_offset {
            return byte_idx;
        }
    }
    text.len()
}

/// Convert a byte offset into a UTF-16 code unit offset.
pub fn byte_to_utf16(text: &str, byte_offset: usize) -> usize {
    let end = byte_offset.min(text.len());
    text.get(..end)
        .map(|prefix| prefix.encode_utf16().count())
        .unwrap_or_else(|| text.encode_utf16().count())
}

/// Clip `text` to at most `max_chars` characters centred on `focus`.
///
/// Used to bound the surrounding-text context handed to the language model.
pub fn clip_around(text: &str, focus: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let focus_char = text
        .find(focus)
        .map(|byte| text[..byte].chars().count())
        .unwrap_or(0);
    let half = max_chars / 2;
    let start = focus_char.saturating_sub(half).min(total - max_chars);
    text.chars().skip(start).take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_stamp_tracks_text() {
        assert_eq!(ContentStamp::of("REST API"), ContentStamp::of("REST API"));
        assert_ne!(ContentStamp::of("REST API"), ContentStamp::of("REST APIs"));
        let stamp = ContentStamp::of("JSON");
        assert_eq!(ContentStamp::from_raw(stamp.raw()), stamp);
    }

    #[test]
    fn test_overlay_id_attr_roundtrip() {
        let ids = IdAllocator::new();
        let first = ids.next_overlay();
        let second = ids.next_overlay();
        assert_ne!(first, second);
        assert_eq!(second.to_attr(), "ov-1");
        assert_eq!(OverlayId::from_attr("ov-1"), Some(second));
        assert_eq!(OverlayId::from_attr("1"), None);
    }

    #[test]
    fn test_utf16_offsets() {
        // 'é' is 2 bytes / 1 unit, '😀' is 4 bytes / 2 units
        let text = "é😀ab";
        assert_eq!(utf16_to_byte(text, 0), 0);
        assert_eq!(utf16_to_byte(text, 1), 2);
        assert_eq!(utf16_to_byte(text, 3), 6);
        assert_eq!(utf16_to_byte(text, 4), 7);
        assert_eq!(utf16_to_byte(text, 99), text.len());
        // Inside the surrogate pair clamps back to the emoji start
        assert_eq!(utf16_to_byte(text, 2), 2);

        assert_eq!(byte_to_utf16(text, 6), 3);
        assert_eq!(byte_to_utf16(text, text.len()), 5);
    }

    #[test]
    fn test_clip_around() {
        assert_eq!(clip_around("short FAQ", "FAQ", 100), "short FAQ");
        let long = format!("{}FAQ{}", "a".repeat(50), "b".repeat(50));
        let clipped = clip_around(&long, "FAQ", 11);
        assert_eq!(clipped.chars().count(), 11);
        assert!(clipped.contains("FAQ"));
    }
}
