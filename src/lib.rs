//! `textquilt` - Layered patch text buffer engine
//!
//! textquilt is the core of a text-buffer engine built to back
//! interactive editors: an in-memory document supporting O(log n) edits,
//! instant copy-on-write snapshots, translation between `(row, column)`
//! positions and flat code-unit offsets, and regex search that never
//! materializes the document.
//!
//! # How This Crate Fits In
//!
//! This is a single-crate library with no I/O: loading, saving,
//! transcoding, history policy, and rendering belong to the host. The
//! host hands the engine UTF-16 text and ranges; the engine hands back
//! views, match ranges, and serialized change sets.
//!
//! # Architecture At A Glance
//!
//! - `buffer`: The layer stack - edits, snapshots, consolidation
//! - `patch`: Splay tree of changes, dual-keyed by old and new coordinates
//! - `text`: UTF-16 storage with line starts, plus borrowed slices
//! - `regex`: Streaming Pike-VM matcher with hard-partial results
//! - `point` / `serialization` / `error`: Coordinates, framing, errors
//!
//! # Data Flow
//!
//! ```text
//! Edit arrives as (range, replacement)
//!     -> top layer's patch splices in O(log n)
//!     -> readers walk patch chunks over the base text
//!     -> consolidation squashes layers no snapshot pins
//! ```
//!
//! Snapshots pin layers by reference count and keep reading the document
//! as of their creation while edits continue above them.
//!
//! # Examples
//!
//! ```
//! use textquilt::{Point, Range, TextBuffer};
//!
//! let mut buffer = TextBuffer::with_text("hello world");
//! let snapshot = buffer.create_snapshot();
//! buffer.set_text_in_range(
//!     Range::new(Point::new(0, 0), Point::new(0, 5)),
//!     "goodbye",
//! );
//! assert_eq!(buffer.text(), "goodbye world");
//! assert_eq!(snapshot.text(), "hello world");
//! ```
//!
//! ## Searching
//!
//! ```
//! use textquilt::{Point, Range, Regex, RegexOptions, TextBuffer};
//!
//! let buffer = TextBuffer::with_text("one two three");
//! let regex = Regex::new(r"t\w+", RegexOptions::empty()).unwrap();
//! let matches = buffer.search_all(&regex);
//! assert_eq!(matches.len(), 2);
//! assert_eq!(matches[0], Range::new(Point::new(0, 4), Point::new(0, 7)));
//! ```

// Crate-level lint configuration
#![warn(unsafe_code)]
#![allow(clippy::cast_possible_truncation)] // Intentional coordinate casts
#![allow(clippy::module_name_repetitions)] // TextBuffer, TextSlice etc
#![allow(clippy::missing_panics_doc)] // Internal invariants only
#![allow(clippy::collapsible_if)] // Sometimes nested ifs are clearer
#![allow(clippy::items_after_statements)] // Common pattern in tests

pub mod buffer;
pub mod error;
pub mod patch;
pub mod point;
pub mod regex;
pub mod serialization;
pub mod text;

// Re-export core types at crate root
pub use buffer::{LineEnding, Snapshot, TextBuffer};
pub use error::{Error, Result};
pub use patch::{Change, Patch};
pub use point::{ClipResult, Point, Range};
pub use regex::{MatchData, MatchResult, Regex, RegexOptions};
pub use text::{Text, TextSlice};
