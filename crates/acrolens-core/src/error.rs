//! Error types for the annotation engine.
//!
//! None of these are fatal to the host page: each one is contained to the
//! single text node, overlay panel or overlay instance it was raised for.

use std::ops::Range;

use smol_str::SmolStr;
use thiserror::Error;

/// A match list that cannot be applied to the text it was produced for.
///
/// Raised by the fragment rewriter. The scanner logs it and skips the node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RewriteError {
    /// Match range extends past the end of the text.
    #[error("match {range:?} is out of bounds for text of {len} bytes")]
    OutOfBounds { range: Range<usize>, len: usize },

    /// Match range does not fall on UTF-8 character boundaries.
    #[error("match {range:?} does not fall on character boundaries")]
    NotCharBoundary { range: Range<usize> },

    /// Match starts before the previous match ended.
    #[error("match {range:?} overlaps or precedes the previous match ending at {previous_end}")]
    Overlap {
        range: Range<usize>,
        previous_end: usize,
    },

    /// Match has no content.
    #[error("match {range:?} is empty")]
    Empty { range: Range<usize> },
}

/// Failure mutating or querying the document tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TreeError {
    /// The node has been removed from the document.
    #[error("node is no longer attached to the document")]
    Detached,

    /// The node is not of the kind the operation needs.
    #[error("expected a {expected} node")]
    WrongKind { expected: &'static str },

    /// Offset range does not fit the node's text.
    #[error("range {range:?} is invalid for text of {len} bytes")]
    InvalidRange { range: Range<usize>, len: usize },

    /// The platform rejected the operation.
    #[error("platform error: {0}")]
    Platform(SmolStr),
}

/// Failure from one of the external lookup collaborators.
///
/// Surfaced as an inline message on the affected panel only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LookupError {
    /// The language model refused or failed the request.
    #[error("language model error: {0}")]
    Model(SmolStr),

    /// The language model is not available in this browser.
    #[error("language model unavailable: {0}")]
    Unavailable(SmolStr),

    /// The encyclopedia request failed.
    #[error("encyclopedia error: {0}")]
    Encyclopedia(SmolStr),

    /// No page matched the query.
    #[error("no encyclopedia page found for {0:?}")]
    NotFound(SmolStr),

    /// The extension runtime relay failed.
    #[error("extension relay error: {0}")]
    Relay(SmolStr),
}

/// Failure decoding host configuration.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// Stored configuration could not be decoded.
    #[error("invalid configuration: {0}")]
    Decode(#[from] serde_json::Error),

    /// The host storage could not be read.
    #[error("configuration storage unavailable: {0}")]
    Storage(String),
}

/// Failure creating the overlay rendering surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SurfaceError {
    /// The anchor container is gone.
    #[error("anchor container is detached")]
    Detached,

    /// The platform could not build the isolated surface.
    #[error("could not create overlay surface: {0}")]
    Platform(SmolStr),
}
