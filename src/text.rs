//! UTF-16 text storage with precomputed line starts.
//!
//! [`Text`] is the owned substrate the layer stack is built on: a
//! contiguous sequence of UTF-16 code units plus an index of line-start
//! offsets, giving O(log lines) translation between [`Point`]s and
//! code-unit offsets. [`TextSlice`] is a borrowed window into a `Text`,
//! used by chunk iteration and the scan engine so no operation has to
//! concatenate buffer contents.
//!
//! Rows are delimited by `'\n'` only; a lone `'\r'` is ordinary content.
//! The one multi-unit sequence the crate understands is `"\r\n"`: a
//! position between the CR and the LF is invalid, and
//! [`Text::clip_position`] snaps it left onto the CR.

use crate::point::{ClipResult, Point, Range};

/// Owned UTF-16 text with line-start offsets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Text {
    content: Vec<u16>,
    /// Offset of the first code unit of each row. Always starts with 0;
    /// one extra entry per `'\n'` in `content`.
    line_starts: Vec<u32>,
}

const CR: u16 = b'\r' as u16;
const LF: u16 = b'\n' as u16;

fn scan_line_starts(content: &[u16], base_offset: u32, out: &mut Vec<u32>) {
    for (i, &unit) in content.iter().enumerate() {
        if unit == LF {
            out.push(base_offset + i as u32 + 1);
        }
    }
}

impl Text {
    /// Create an empty text.
    #[must_use]
    pub fn new() -> Self {
        Self {
            content: Vec::new(),
            line_starts: vec![0],
        }
    }

    /// Create a text from UTF-16 code units.
    #[must_use]
    pub fn from_units(content: Vec<u16>) -> Self {
        let mut line_starts = vec![0];
        scan_line_starts(&content, 0, &mut line_starts);
        Self {
            content,
            line_starts,
        }
    }

    /// Create a text by copying a slice's contents.
    #[must_use]
    pub fn from_slice(slice: TextSlice<'_>) -> Self {
        Self::from_units(slice.data().to_vec())
    }

    /// The code units of this text.
    #[must_use]
    pub fn content(&self) -> &[u16] {
        &self.content
    }

    /// Number of code units.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.content.len() as u32
    }

    /// True when the text holds no code units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// The extent of this text: last row index and the length of the
    /// last row.
    #[must_use]
    pub fn extent(&self) -> Point {
        let last_row = self.line_starts.len() - 1;
        Point::new(
            last_row as u32,
            self.size() - self.line_starts[last_row],
        )
    }

    /// The code unit at a position, or `None` past the end.
    #[must_use]
    pub fn at(&self, position: Point) -> Option<u16> {
        let offset = self.raw_offset(position) as usize;
        self.content.get(offset).copied()
    }

    /// First code unit, or `None` when empty.
    #[must_use]
    pub fn front(&self) -> Option<u16> {
        self.content.first().copied()
    }

    /// Last code unit, or `None` when empty.
    #[must_use]
    pub fn back(&self) -> Option<u16> {
        self.content.last().copied()
    }

    /// Snap a position to the nearest valid position at or before it and
    /// return that position with its code-unit offset.
    ///
    /// Columns clamp to the row's content length, which excludes the
    /// terminating `'\n'` and, when the row ends with `"\r\n"`, the CR
    /// as well: no valid position sits between a CR and its LF.
    #[must_use]
    pub fn clip_position(&self, position: Point) -> ClipResult {
        let last_row = (self.line_starts.len() - 1) as u32;
        if position.row > last_row {
            return ClipResult::new(self.extent(), self.size());
        }
        let row = position.row;
        let line_start = self.line_starts[row as usize];
        let mut max_column = if row == last_row {
            self.size() - line_start
        } else {
            self.line_starts[row as usize + 1] - line_start - 1
        };
        if row < last_row
            && max_column > 0
            && self.content[(line_start + max_column - 1) as usize] == CR
        {
            max_column -= 1;
        }
        let column = position.column.min(max_column);
        ClipResult::new(Point::new(row, column), line_start + column)
    }

    /// The offset of a position without the CRLF snap: columns clamp to
    /// the row's raw span, so a position on the `'\n'` itself (as patch
    /// coordinates can produce) keeps its exact offset.
    #[must_use]
    pub fn raw_offset(&self, position: Point) -> u32 {
        let last_row = (self.line_starts.len() - 1) as u32;
        if position.row > last_row {
            return self.size();
        }
        let row = position.row;
        let line_start = self.line_starts[row as usize];
        let max_column = if row == last_row {
            self.size() - line_start
        } else {
            self.line_starts[row as usize + 1] - line_start - 1
        };
        line_start + position.column.min(max_column)
    }

    /// The position of a code-unit offset.
    #[must_use]
    pub fn position_for_offset(&self, offset: u32) -> Point {
        self.position_for_offset_with_hint(offset, 0)
    }

    /// The position of a code-unit offset, searching no earlier than
    /// `min_row`. The hint is a performance floor; an overshooting hint
    /// falls back to a full search.
    #[must_use]
    pub fn position_for_offset_with_hint(&self, offset: u32, min_row: u32) -> Point {
        let offset = offset.min(self.size());
        let mut lo = (min_row as usize).min(self.line_starts.len() - 1);
        if self.line_starts[lo] > offset {
            lo = 0;
        }
        let rel = self.line_starts[lo..].partition_point(|&start| start <= offset);
        let row = lo + rel - 1;
        Point::new(row as u32, offset - self.line_starts[row])
    }

    /// Replace the range starting at `start` spanning `deletion_extent`
    /// with the contents of `new_text`.
    pub fn splice(&mut self, start: Point, deletion_extent: Point, new_text: &Text) {
        let start_offset = self.raw_offset(start) as usize;
        let end_offset = self
            .raw_offset(start.traverse(deletion_extent))
            .max(start_offset as u32) as usize;
        self.content
            .splice(start_offset..end_offset, new_text.content.iter().copied());
        self.line_starts.truncate(1);
        scan_line_starts(&self.content, 0, &mut self.line_starts);
    }

    /// Append a slice's contents.
    pub fn append(&mut self, slice: TextSlice<'_>) {
        let base = self.size();
        self.content.extend_from_slice(slice.data());
        scan_line_starts(&self.content[base as usize..], base, &mut self.line_starts);
    }

    /// Remove all content.
    pub fn clear(&mut self) {
        self.content.clear();
        self.line_starts.truncate(1);
    }

    /// Lossily decode to a `String`.
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.content)
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Self {
        Self::from_units(s.encode_utf16().collect())
    }
}

impl From<&String> for Text {
    fn from(s: &String) -> Self {
        Self::from(s.as_str())
    }
}

/// A borrowed window into a [`Text`].
///
/// Slices carry both offsets and positions so extent arithmetic and
/// sub-slicing stay O(log lines).
#[derive(Clone, Copy, Debug)]
pub struct TextSlice<'a> {
    text: &'a Text,
    start_offset: u32,
    end_offset: u32,
    start_position: Point,
    end_position: Point,
}

impl<'a> TextSlice<'a> {
    /// A slice covering all of `text`.
    #[must_use]
    pub fn new(text: &'a Text) -> Self {
        Self {
            text,
            start_offset: 0,
            end_offset: text.size(),
            start_position: Point::ZERO,
            end_position: text.extent(),
        }
    }

    /// The text this slice borrows from.
    #[must_use]
    pub fn text(&self) -> &'a Text {
        self.text
    }

    /// Offset of this slice's start within its backing text.
    #[must_use]
    pub fn start_offset(&self) -> u32 {
        self.start_offset
    }

    /// Sub-slice by positions relative to this slice's start.
    #[must_use]
    pub fn slice(&self, range: Range) -> TextSlice<'a> {
        let start = self.bound(range.start);
        let end = self.bound(range.end);
        let (start_offset, start_position) = start;
        let (end_offset, end_position) = if end.0 < start.0 { start } else { end };
        TextSlice {
            text: self.text,
            start_offset,
            end_offset,
            start_position,
            end_position,
        }
    }

    /// The leading part of this slice, up to a relative extent.
    #[must_use]
    pub fn prefix(&self, extent: Point) -> TextSlice<'a> {
        self.slice(Range::new(Point::ZERO, extent))
    }

    /// The trailing part of this slice, from a relative extent on.
    #[must_use]
    pub fn suffix(&self, extent: Point) -> TextSlice<'a> {
        self.slice(Range::new(extent, self.extent()))
    }

    /// A prefix limited to at most `max_size` code units.
    #[must_use]
    pub fn prefix_sized(&self, max_size: u32) -> TextSlice<'a> {
        if self.size() <= max_size {
            return *self;
        }
        let end_offset = self.start_offset + max_size;
        let end_position = self.text.position_for_offset_with_hint(
            end_offset,
            self.start_position.row,
        );
        TextSlice {
            text: self.text,
            start_offset: self.start_offset,
            end_offset,
            start_position: self.start_position,
            end_position,
        }
    }

    fn bound(&self, relative: Point) -> (u32, Point) {
        let absolute = self.start_position.traverse(relative);
        let offset = self
            .text
            .raw_offset(absolute)
            .clamp(self.start_offset, self.end_offset);
        let position = self
            .text
            .position_for_offset_with_hint(offset, self.start_position.row);
        (offset, position)
    }

    /// The extent this slice spans.
    #[must_use]
    pub fn extent(&self) -> Point {
        self.end_position.traversal(self.start_position)
    }

    /// Number of code units in this slice.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.end_offset - self.start_offset
    }

    /// True when the slice is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start_offset == self.end_offset
    }

    /// The code units of this slice.
    #[must_use]
    pub fn data(&self) -> &'a [u16] {
        &self.text.content[self.start_offset as usize..self.end_offset as usize]
    }

    /// First code unit, or `None` when empty.
    #[must_use]
    pub fn front(&self) -> Option<u16> {
        self.data().first().copied()
    }

    /// Last code unit, or `None` when empty.
    #[must_use]
    pub fn back(&self) -> Option<u16> {
        self.data().last().copied()
    }

    /// The position, relative to this slice's start, of a relative
    /// code-unit offset. `min_row` floors the line search as in
    /// [`Text::position_for_offset_with_hint`].
    #[must_use]
    pub fn position_for_offset(&self, offset: u32, min_row: u32) -> Point {
        let absolute = (self.start_offset + offset).min(self.end_offset);
        self.text
            .position_for_offset_with_hint(
                absolute,
                self.start_position.row + min_row,
            )
            .traversal(self.start_position)
    }
}

impl<'a> From<&'a Text> for TextSlice<'a> {
    fn from(text: &'a Text) -> Self {
        Self::new(text)
    }
}
