//! The layered patch buffer.
//!
//! A [`TextBuffer`] is a stack of layers over an immutable base text.
//! The bottom (base) layer holds a materialized [`Text`]; every layer
//! above holds a [`Patch`] describing how it transforms the layer below.
//! Edits accumulate in the top layer's patch in O(log n); snapshots pin
//! a layer (and the base) with a reference count and read the document
//! as of their creation; consolidation squashes layers no snapshot pins
//! any longer.
//!
//! Layers live in an arena and refer to each other by id, so the
//! `previous` relation is a lookup, not ownership. The arena sits behind
//! `Rc<RefCell<_>>`, shared between the buffer facade and its snapshots:
//! the buffer is single-threaded and cooperative, and a snapshot may
//! outlive the facade. Splaying the top layer's patch is an explicit
//! warming step gated on `snapshot_count == 0`; every query path is
//! otherwise pure, which is what makes snapshot reads safe.
//!
//! Callbacks handed to chunk iteration and scanning run while the
//! buffer's interior is borrowed and must not re-enter the buffer.

use std::cell::{Ref, RefCell};
use std::fmt::Write as _;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::patch::Patch;
use crate::point::{ClipResult, Point, Range};
use crate::regex::{MatchData, MatchResult, Regex};
use crate::serialization::{Deserializer, Serializer};
use crate::text::{Text, TextSlice};

const CR: u16 = b'\r' as u16;
const LF: u16 = b'\n' as u16;

/// Largest number of code units copied out of a chunk when a search has
/// to stitch data across a chunk boundary.
const MAX_CHUNK_SIZE_TO_COPY: u32 = 1024;

/// The line ending terminating a row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineEnding {
    None,
    Lf,
    Crlf,
}

impl LineEnding {
    /// The ending's code units.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Lf => "\n",
            Self::Crlf => "\r\n",
        }
    }
}

#[derive(Debug)]
struct Layer {
    previous: Option<usize>,
    patch: Patch,
    text: Option<Text>,
    uses_patch: bool,
    extent: Point,
    size: u32,
    snapshot_count: u32,
}

impl Layer {
    fn base(text: Text) -> Self {
        Self {
            previous: None,
            patch: Patch::new(),
            extent: text.extent(),
            size: text.size(),
            text: Some(text),
            uses_patch: false,
            snapshot_count: 0,
        }
    }

    fn above(previous: usize, extent: Point, size: u32) -> Self {
        Self {
            previous: Some(previous),
            patch: Patch::new(),
            text: None,
            uses_patch: true,
            extent,
            size,
            snapshot_count: 0,
        }
    }
}

#[derive(Debug, Default)]
struct LayerArena {
    slots: Vec<Option<Layer>>,
    free_list: Vec<usize>,
}

impl LayerArena {
    fn insert(&mut self, layer: Layer) -> usize {
        if let Some(id) = self.free_list.pop() {
            self.slots[id] = Some(layer);
            id
        } else {
            self.slots.push(Some(layer));
            self.slots.len() - 1
        }
    }

    fn get(&self, id: usize) -> &Layer {
        self.slots[id].as_ref().expect("freed layer")
    }

    fn get_mut(&mut self, id: usize) -> &mut Layer {
        self.slots[id].as_mut().expect("freed layer")
    }

    fn remove(&mut self, id: usize) {
        self.slots[id] = None;
        self.free_list.push(id);
    }
}

#[derive(Debug)]
struct BufferCore {
    layers: LayerArena,
    top: usize,
    base: usize,
}

fn previous_column(position: Point) -> Point {
    Point::new(position.row, position.column.saturating_sub(1))
}

impl BufferCore {
    fn new(base_text: Text) -> Self {
        let mut layers = LayerArena::default();
        let base = layers.insert(Layer::base(base_text));
        Self {
            layers,
            top: base,
            base,
        }
    }

    fn layer_extent(&self, id: usize) -> Point {
        self.layers.get(id).extent
    }

    fn layer_size(&self, id: usize) -> u32 {
        self.layers.get(id).size
    }

    /// Splay the top layer's patch toward `position` to amortize the
    /// pure queries that follow. A no-op when the top layer is pinned by
    /// a snapshot or is the base.
    fn warm_top_layer(&mut self, position: Point) {
        let layer = self.layers.get_mut(self.top);
        if layer.uses_patch && layer.snapshot_count == 0 {
            layer.patch.grab_change_starting_before_new_position(position);
        }
    }

    fn layer_character_at(&self, id: usize, position: Point) -> Option<u16> {
        let layer = self.layers.get(id);
        if !layer.uses_patch {
            return layer.text.as_ref().and_then(|text| text.at(position));
        }
        let previous = layer.previous?;
        match layer.patch.get_change_starting_before_new_position(position) {
            None => self.layer_character_at(previous, position),
            Some(change) => {
                if position < change.new_end {
                    change.new_text.at(position.traversal(change.new_start))
                } else {
                    self.layer_character_at(
                        previous,
                        change.old_end.traverse(position.traversal(change.new_end)),
                    )
                }
            }
        }
    }

    fn layer_clip_position(&self, id: usize, position: Point) -> ClipResult {
        let layer = self.layers.get(id);
        if !layer.uses_patch {
            return layer
                .text
                .as_ref()
                .map_or_else(ClipResult::default, |text| text.clip_position(position));
        }
        let Some(previous) = layer.previous else {
            return ClipResult::default();
        };
        let Some(change) = layer.patch.get_change_starting_before_new_position(position) else {
            return self.layer_clip_position(previous, position);
        };

        let preceding_base_offset = self.layer_clip_position(previous, change.old_start).offset;
        let preceding_current_offset = preceding_base_offset - change.preceding_old_text_size
            + change.preceding_new_text_size;

        if position < change.new_end {
            let within = change
                .new_text
                .clip_position(position.traversal(change.new_start));

            // A change whose new text begins with LF can abut a CR in
            // the layer below; the seam is the middle of a CRLF pair.
            if within.offset == 0
                && change.old_start.column > 0
                && change.new_text.front() == Some(LF)
                && self.layer_character_at(previous, previous_column(change.old_start))
                    == Some(CR)
            {
                return ClipResult::new(
                    previous_column(change.new_start),
                    preceding_current_offset.saturating_sub(1),
                );
            }

            ClipResult::new(
                change.new_start.traverse(within.position),
                preceding_current_offset + within.offset,
            )
        } else {
            let base_location = self.layer_clip_position(
                previous,
                change.old_end.traverse(position.traversal(change.new_end)),
            );
            let distance_past_offset = base_location
                .offset
                .saturating_sub(preceding_base_offset + change.old_text_size);
            let distance_past_position = base_location.position.traversal(change.old_end);

            // The mirror seam: a change ending in CR abutting an LF in
            // the layer below.
            if distance_past_offset == 0 && base_location.offset < self.layer_size(previous) {
                let previous_character = if change.new_text.size() > 0 {
                    change.new_text.back()
                } else if change.old_start.column > 0 {
                    self.layer_character_at(previous, previous_column(change.old_start))
                } else {
                    None
                };
                if previous_character == Some(CR)
                    && self.layer_character_at(previous, base_location.position) == Some(LF)
                {
                    return ClipResult::new(
                        previous_column(change.new_end),
                        (preceding_current_offset + change.new_text.size()).saturating_sub(1),
                    );
                }
            }

            ClipResult::new(
                change.new_end.traverse(distance_past_position),
                preceding_current_offset + change.new_text.size() + distance_past_offset,
            )
        }
    }

    fn layer_position_for_offset(&self, id: usize, offset: u32) -> Point {
        let layer = self.layers.get(id);
        if let Some(text) = &layer.text {
            return text.position_for_offset(offset);
        }
        let Some(previous) = layer.previous else {
            return Point::ZERO;
        };
        layer.patch.new_position_for_new_offset(
            offset,
            |old_position| self.layer_clip_position(previous, old_position).offset,
            |old_offset| self.layer_position_for_offset(previous, old_offset),
        )
    }

    /// Yield the text in `[start, end]` as a sequence of slices in
    /// document order. The callback returns `true` to abort; the return
    /// value reports whether iteration was aborted.
    fn layer_for_each_chunk(
        &self,
        id: usize,
        start: Point,
        end: Point,
        callback: &mut dyn FnMut(TextSlice<'_>) -> bool,
    ) -> bool {
        let goal_position = self.layer_clip_position(id, end).position;
        let mut current_position = self.layer_clip_position(id, start).position;

        let layer = self.layers.get(id);
        if !layer.uses_patch {
            let Some(text) = &layer.text else { return false };
            return callback(
                TextSlice::new(text).slice(Range::new(current_position, goal_position)),
            );
        }
        let Some(previous) = layer.previous else {
            return false;
        };

        let mut base_position;
        match layer
            .patch
            .get_change_starting_before_new_position(current_position)
        {
            None => base_position = current_position,
            Some(change) if current_position < change.new_end => {
                let slice = TextSlice::new(&change.new_text).slice(Range::new(
                    change
                        .new_end
                        .min(current_position)
                        .traversal(change.new_start),
                    goal_position.traversal(change.new_start),
                ));
                if callback(slice) {
                    return true;
                }
                base_position = change.old_end;
                current_position = change.new_end;
            }
            Some(change) => {
                base_position = change
                    .old_end
                    .traverse(current_position.traversal(change.new_end));
            }
        }

        let changes = layer
            .patch
            .get_changes_in_new_range(current_position, goal_position);
        for change in &changes {
            if base_position < change.old_start
                && self.layer_for_each_chunk(previous, base_position, change.old_start, callback)
            {
                return true;
            }

            let slice = TextSlice::new(&change.new_text)
                .prefix(change.new_end.min(goal_position).traversal(change.new_start));
            if callback(slice) {
                return true;
            }

            base_position = change.old_end;
            current_position = change.new_end;
        }

        if current_position < goal_position {
            return self.layer_for_each_chunk(
                previous,
                base_position,
                base_position.traverse(goal_position.traversal(current_position)),
                callback,
            );
        }
        false
    }

    fn layer_text_in_range(&self, id: usize, range: Range) -> Text {
        let mut result = Text::new();
        self.layer_for_each_chunk(id, range.start, range.end, &mut |slice| {
            result.append(slice);
            false
        });
        result
    }

    /// Stream regex matches over `[range.start, range.end]` without
    /// materializing the text. The callback returns `true` to abort.
    fn layer_scan_in_range(
        &self,
        id: usize,
        regex: &Regex,
        range: Range,
        callback: &mut dyn FnMut(Range) -> bool,
    ) {
        let mut match_data = MatchData::new(regex);
        let mut minimum_match_row = 0u32;
        let mut result: Option<Range> = None;
        let mut chunk_continuation = Text::new();
        let mut chunk_start_position = range.start;
        let mut last_search_end_position = range.start;
        let mut slice_to_search_start_position = range.start;
        let mut user_aborted = false;
        let mut engine_error = false;
        let cr_text = Text::from("\r");

        self.layer_for_each_chunk(id, range.start, range.end, &mut |chunk| {
            let chunk_end_position = chunk_start_position.traverse(chunk.extent());
            while last_search_end_position < chunk_end_position {
                // A match can end strictly inside retained continuation
                // data; the unsearched part of this chunk is then the
                // whole chunk.
                let remaining_chunk = if last_search_end_position <= chunk_start_position {
                    chunk
                } else {
                    chunk.suffix(last_search_end_position.traversal(chunk_start_position))
                };

                // A match ending in CR at a chunk boundary was deferred:
                // if this chunk starts with LF the match must end on the
                // CR, because no position sits inside a CRLF pair.
                if let Some(found) = result.as_mut() {
                    if remaining_chunk.front() == Some(LF) {
                        chunk_continuation.splice(Point::ZERO, Point::ZERO, &cr_text);
                        slice_to_search_start_position.column =
                            slice_to_search_start_position.column.saturating_sub(1);
                        found.end.column = found.end.column.saturating_sub(1);
                    }
                    let found = *found;
                    result = None;
                    if callback(found) {
                        user_aborted = true;
                        return true;
                    }
                }

                let mut appended_size = 0;
                if !chunk_continuation.is_empty() {
                    let appended = remaining_chunk.prefix_sized(MAX_CHUNK_SIZE_TO_COPY);
                    appended_size = appended.size();
                    chunk_continuation.append(appended);
                }
                let continuation_active = !chunk_continuation.is_empty();
                let slice_to_search = if continuation_active {
                    TextSlice::new(&chunk_continuation)
                } else {
                    remaining_chunk
                };
                let slice_extent = slice_to_search.extent();
                let slice_size = slice_to_search.size();
                let slice_back = slice_to_search.back();
                let continuation_coverage = slice_size - appended_size;
                let is_last_slice =
                    slice_to_search_start_position.traverse(slice_extent) == range.end;

                let match_result =
                    regex.match_slice(slice_to_search.data(), &mut match_data, is_last_slice);
                match match_result {
                    MatchResult::Error => {
                        trace!("scan aborted by regex engine");
                        chunk_continuation.clear();
                        engine_error = true;
                        return true;
                    }
                    MatchResult::None => {
                        last_search_end_position =
                            slice_to_search_start_position.traverse(slice_extent);
                        slice_to_search_start_position = last_search_end_position;
                        minimum_match_row = slice_to_search_start_position.row;
                        chunk_continuation.clear();
                    }
                    MatchResult::Partial { start_offset } => {
                        last_search_end_position =
                            slice_to_search_start_position.traverse(slice_extent);
                        if !continuation_active || start_offset > 0 {
                            let partial_match_position = slice_to_search.position_for_offset(
                                start_offset,
                                minimum_match_row
                                    .saturating_sub(slice_to_search_start_position.row),
                            );
                            let retained =
                                Text::from_slice(slice_to_search.suffix(partial_match_position));
                            slice_to_search_start_position = slice_to_search_start_position
                                .traverse(partial_match_position);
                            minimum_match_row = slice_to_search_start_position.row;
                            chunk_continuation = retained;
                        }
                    }
                    MatchResult::Full {
                        start_offset,
                        end_offset,
                    } => {
                        let min_row_hint =
                            minimum_match_row.saturating_sub(slice_to_search_start_position.row);
                        let match_start_position =
                            slice_to_search.position_for_offset(start_offset, min_row_hint);
                        let match_end_position =
                            slice_to_search.position_for_offset(end_offset, min_row_hint);
                        let found = Range::new(
                            slice_to_search_start_position.traverse(match_start_position),
                            slice_to_search_start_position.traverse(match_end_position),
                        );

                        // A zero-length match would re-match at the same
                        // position forever; resume one unit past it.
                        let resume_offset = if end_offset == start_offset && end_offset < slice_size
                        {
                            end_offset + 1
                        } else {
                            end_offset
                        };
                        let resume_position =
                            slice_to_search.position_for_offset(resume_offset, min_row_hint);

                        result = Some(found);
                        minimum_match_row = found.end.row;
                        last_search_end_position =
                            slice_to_search_start_position.traverse(resume_position);
                        slice_to_search_start_position = last_search_end_position;

                        // Keep the unsearched tail when the match ended
                        // inside retained data; otherwise the
                        // continuation is spent.
                        if resume_offset < continuation_coverage {
                            let coverage_position = slice_to_search
                                .position_for_offset(continuation_coverage, min_row_hint);
                            chunk_continuation = Text::from_slice(slice_to_search.slice(
                                Range::new(resume_position, coverage_position),
                            ));
                        } else {
                            chunk_continuation.clear();
                        }

                        // A match ending in CR at the end of the slice is
                        // deferred: the next chunk may start with LF.
                        if end_offset == slice_size && slice_back == Some(CR) {
                            continue;
                        }

                        result = None;
                        if callback(found) {
                            user_aborted = true;
                            return true;
                        }
                    }
                }
            }

            chunk_start_position = chunk_end_position;
            false
        });

        if user_aborted {
            return;
        }
        if let Some(found) = result {
            callback(found);
        } else if !engine_error {
            // Probe with empty final input so patterns that match the
            // empty string still report once.
            let probe = regex.match_slice(&[], &mut match_data, true);
            if matches!(
                probe,
                MatchResult::Partial { .. } | MatchResult::Full { .. }
            ) {
                callback(Range::new(Point::ZERO, Point::ZERO));
            }
        }
    }

    fn layer_search_in_range(&self, id: usize, regex: &Regex, range: Range) -> Option<Range> {
        let mut result = None;
        self.layer_scan_in_range(id, regex, range, &mut |found| {
            result = Some(found);
            true
        });
        result
    }

    fn layer_search_all_in_range(&self, id: usize, regex: &Regex, range: Range) -> Vec<Range> {
        let mut results = Vec::new();
        self.layer_scan_in_range(id, regex, range, &mut |found| {
            results.push(found);
            false
        });
        results
    }

    fn layer_is_modified(&self, id: usize, base_id: usize) -> bool {
        let Some(base_text) = self.layers.get(base_id).text.as_ref() else {
            return true;
        };
        if self.layer_size(id) != base_text.size() {
            return true;
        }
        let mut modified = false;
        let mut start_offset = 0usize;
        self.layer_for_each_chunk(id, Point::ZERO, self.layer_extent(id), &mut |chunk| {
            let data = chunk.data();
            let same_backing = std::ptr::eq(chunk.text(), base_text)
                && chunk.start_offset() as usize == start_offset;
            if same_backing
                || base_text
                    .content()
                    .get(start_offset..start_offset + data.len())
                    == Some(data)
            {
                start_offset += data.len();
                false
            } else {
                modified = true;
                true
            }
        });
        modified
    }

    fn layer_is_above(&self, id: usize, other: usize) -> bool {
        let mut current = self.layers.get(id).previous;
        while let Some(ancestor) = current {
            if ancestor == other {
                return true;
            }
            current = self.layers.get(ancestor).previous;
        }
        false
    }

    fn layer_count(&self) -> usize {
        let mut count = 1;
        let mut layer = self.top;
        while let Some(previous) = self.layers.get(layer).previous {
            count += 1;
            layer = previous;
        }
        count
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    fn set_text_in_range(&mut self, old_range: Range, new_text: Text) {
        if self.top == self.base || self.layers.get(self.top).snapshot_count > 0 {
            let previous = self.top;
            let layer = Layer::above(
                previous,
                self.layer_extent(previous),
                self.layer_size(previous),
            );
            self.top = self.layers.insert(layer);
        }
        let top = self.top;
        self.warm_top_layer(old_range.start);

        let clipped_start = self.layer_clip_position(top, old_range.start);
        let clipped_end = self.layer_clip_position(top, old_range.end);
        let (start, end) = if clipped_end.offset < clipped_start.offset {
            (clipped_end, clipped_start)
        } else {
            (clipped_start, clipped_end)
        };

        let deleted_extent = end.position.traversal(start.position);
        let inserted_extent = new_text.extent();
        let inserted_size = new_text.size();
        let new_range_end = start.position.traverse(inserted_extent);
        let deleted_text_size = end.offset - start.offset;

        {
            let layer = self.layers.get_mut(top);
            layer.extent = new_range_end.traverse(layer.extent.traversal(end.position));
            layer.size = layer.size - deleted_text_size + inserted_size;
            layer.patch.splice(
                start.position,
                deleted_extent,
                inserted_extent,
                None,
                Rc::new(new_text),
                deleted_text_size,
            );
        }

        // An edit that rewrites a range with identical content must not
        // grow the patch: compare the change against the layer below and
        // drop it when nothing actually changed.
        let change = self
            .layers
            .get_mut(top)
            .patch
            .grab_change_starting_before_new_position(start.position);
        if let Some(change) = change {
            if change.old_text_size == change.new_text.size() {
                let Some(previous) = self.layers.get(top).previous else {
                    return;
                };
                let mut is_noop = true;
                let mut compare_offset = 0usize;
                let new_text = change.new_text.clone();
                self.layer_for_each_chunk(
                    previous,
                    change.old_start,
                    change.old_end,
                    &mut |chunk| {
                        let data = chunk.data();
                        match new_text.content().get(compare_offset..compare_offset + data.len())
                        {
                            Some(expected) if expected == data => {
                                compare_offset += data.len();
                                false
                            }
                            _ => {
                                is_noop = false;
                                true
                            }
                        }
                    },
                );
                if is_noop {
                    self.layers
                        .get_mut(top)
                        .patch
                        .splice_old(change.old_start, Point::ZERO, Point::ZERO);

                    // A collapse can leave a freshly pushed layer with an
                    // empty patch; pop it so noop edits never deepen the
                    // stack.
                    let layer = self.layers.get(top);
                    if layer.patch.is_empty()
                        && layer.text.is_none()
                        && layer.snapshot_count == 0
                    {
                        if let Some(previous) = layer.previous {
                            self.top = previous;
                            self.layers.remove(top);
                        }
                    }
                }
            }
        }
    }

    fn reset(&mut self, new_base_text: Text) {
        let top = self.top;
        let layer = self.layers.get_mut(top);
        if layer.previous.is_none() && layer.snapshot_count == 0 {
            layer.extent = new_base_text.extent();
            layer.size = new_base_text.size();
            layer.text = Some(new_base_text);
            layer.patch.clear();
            layer.uses_patch = false;
        } else {
            let whole = Range::new(Point::ZERO, self.layer_extent(top));
            self.set_text_in_range(whole, new_base_text);
            self.flush_changes();
        }
    }

    fn flush_changes(&mut self) {
        if self.layers.get(self.top).text.is_none() {
            debug!(layer = self.top, "flushing changes");
            let whole = Range::new(Point::ZERO, self.layer_extent(self.top));
            let text = self.layer_text_in_range(self.top, whole);
            self.layers.get_mut(self.top).text = Some(text);
            self.base = self.top;
            self.consolidate_layers();
        }
    }

    // ------------------------------------------------------------------
    // Consolidation
    // ------------------------------------------------------------------

    fn consolidate_layers(&mut self) {
        let mut mutable_layers: Vec<usize> = Vec::new();
        let mut needed_by_layer_above = false;
        let mut layer_opt = Some(self.top);
        while let Some(id) = layer_opt {
            if needed_by_layer_above || self.layers.get(id).snapshot_count > 0 {
                self.squash_layers(&mutable_layers);
                mutable_layers.clear();
                needed_by_layer_above = true;
            } else {
                if id == self.base {
                    self.squash_layers(&mutable_layers);
                    mutable_layers.clear();
                }
                if self.layers.get(id).text.is_some() {
                    self.layers.get_mut(id).uses_patch = false;
                }
                mutable_layers.push(id);
            }
            if !self.layers.get(id).uses_patch {
                needed_by_layer_above = false;
            }
            layer_opt = self.layers.get(id).previous;
        }
        self.squash_layers(&mutable_layers);
    }

    /// Collapse a run of unpinned layers (ordered top first) into the
    /// topmost one: compose their patches onto the bottom layer's patch,
    /// roll their changes into the highest materialized text, and free
    /// the rest.
    fn squash_layers(&mut self, layers: &[usize]) {
        if layers.len() < 2 {
            return;
        }
        debug!(count = layers.len(), "squashing layers");

        // Highest layer in the group that already computed its text.
        let mut text: Option<Text> = None;
        let mut text_index = layers.len();
        for (index, &id) in layers.iter().enumerate() {
            if self.layers.get(id).text.is_some() {
                text = self.layers.get_mut(id).text.take();
                text_index = index;
                break;
            }
        }

        // Incorporate the patches of the layers above it.
        if let Some(text) = text.as_mut() {
            for index in (0..text_index).rev() {
                for change in self.layers.get(layers[index]).patch.get_changes() {
                    text.splice(
                        change.new_start,
                        change.old_end.traversal(change.old_start),
                        &change.new_text,
                    );
                }
            }
        }

        // If a layer remains below the group, fold the group's patches
        // into one; otherwise the squashed layer is a base and carries
        // no patch.
        let bottom = *layers.last().expect("group has at least two layers");
        let previous = self.layers.get(bottom).previous;
        let mut patch = Patch::new();
        if previous.is_some() {
            patch = std::mem::take(&mut self.layers.get_mut(bottom).patch);
            let mut left_to_right = true;
            for index in (0..layers.len() - 1).rev() {
                let other = std::mem::take(&mut self.layers.get_mut(layers[index]).patch);
                patch.combine(&other, left_to_right);
                left_to_right = !left_to_right;
            }
        } else {
            debug_assert!(text.is_some(), "a base group must contain text");
        }

        let first = layers[0];
        {
            let layer = self.layers.get_mut(first);
            layer.previous = previous;
            layer.text = text;
            layer.patch = patch;
        }
        for &id in &layers[1..] {
            self.layers.remove(id);
        }
    }

    // ------------------------------------------------------------------
    // Serialization and inversion
    // ------------------------------------------------------------------

    fn serialize_changes(&self) -> Vec<u8> {
        let mut serializer = Serializer::new();
        serializer.append_u32(self.layer_size(self.top));
        serializer.append_point(self.layer_extent(self.top));
        if self.top == self.base {
            Patch::new().serialize(&mut serializer);
            return serializer.finish();
        }
        if self.layers.get(self.top).previous == Some(self.base) {
            self.layers.get(self.top).patch.serialize(&mut serializer);
            return serializer.finish();
        }
        let ids = self.layer_ids_above(self.base);
        let patches: Vec<&Patch> = ids.iter().map(|&id| &self.layers.get(id).patch).collect();
        Patch::compose(&patches).serialize(&mut serializer);
        serializer.finish()
    }

    fn deserialize_changes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.top != self.base || self.layers.get(self.base).previous.is_some() {
            return Err(Error::NotPristine);
        }
        let mut deserializer = Deserializer::new(bytes);
        let size = deserializer.read_u32()?;
        let extent = deserializer.read_point()?;
        let patch = Patch::deserialize(&mut deserializer)?;
        let mut layer = Layer::above(self.base, extent, size);
        layer.patch = patch;
        self.top = self.layers.insert(layer);
        Ok(())
    }

    /// Bottom-first patch layer ids strictly above `floor`.
    fn layer_ids_above(&self, floor: usize) -> Vec<usize> {
        let mut ids = Vec::new();
        let mut layer = self.top;
        while layer != floor {
            ids.push(layer);
            match self.layers.get(layer).previous {
                Some(previous) => layer = previous,
                None => break,
            }
        }
        ids.reverse();
        ids
    }

    fn get_inverted_changes(&self, snapshot_base: usize) -> Patch {
        let ids = self.layer_ids_above(snapshot_base);
        let patches: Vec<&Patch> = ids.iter().map(|&id| &self.layers.get(id).patch).collect();
        let combination = Patch::compose(&patches);
        let Some(base_text) = self.layers.get(snapshot_base).text.as_ref() else {
            return Patch::new();
        };
        let base_slice = TextSlice::new(base_text);
        let mut result = Patch::new();
        for change in combination.get_changes() {
            let old_text = Text::from_slice(
                base_slice.slice(Range::new(change.old_start, change.old_end)),
            );
            result.splice(
                change.old_start,
                change.new_end.traversal(change.new_start),
                change.old_end.traversal(change.old_start),
                Some(change.new_text.clone()),
                Rc::new(old_text),
                change.new_text.size(),
            );
        }
        result
    }

    fn get_dot_graph(&self) -> String {
        let mut ids = Vec::new();
        let mut layer_opt = Some(self.top);
        while let Some(id) = layer_opt {
            ids.push(id);
            layer_opt = self.layers.get(id).previous;
        }

        let mut result = String::from("graph { label=\"--- buffer ---\" }\n");
        for (index, &id) in ids.iter().rev().enumerate() {
            let layer = self.layers.get(id);
            let _ = write!(
                result,
                "graph {{ label=\"layer {index} (snapshot count {}",
                layer.snapshot_count
            );
            if id == self.base {
                result.push_str(", base");
            }
            if layer.uses_patch {
                result.push_str(", uses_patch");
            }
            result.push_str("):\" }\n");
            if let Some(text) = &layer.text {
                let _ = writeln!(
                    result,
                    "graph {{ label=\"text:\n{}\" }}",
                    text.to_string_lossy()
                );
            }
            if index > 0 {
                result.push_str(&layer.patch.get_dot_graph());
            }
        }
        result
    }
}

/// An in-memory text document backed by a stack of patch layers.
///
/// See the module documentation for the data model. All reads take
/// `&self`; writers take `&mut self`. Closures passed to
/// [`Self::for_each_chunk_in_range`] and [`Self::scan_in_range`] must
/// not call back into the buffer.
pub struct TextBuffer {
    core: Rc<RefCell<BufferCore>>,
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_text(Text::new())
    }

    /// Create a buffer over a string.
    #[must_use]
    pub fn with_text(text: &str) -> Self {
        Self::with_base_text(Text::from(text))
    }

    /// Create a buffer over an existing base text.
    #[must_use]
    pub fn with_base_text(text: Text) -> Self {
        Self {
            core: Rc::new(RefCell::new(BufferCore::new(text))),
        }
    }

    /// The buffer's extent.
    #[must_use]
    pub fn extent(&self) -> Point {
        let core = self.core.borrow();
        core.layer_extent(core.top)
    }

    /// Total number of UTF-16 code units.
    #[must_use]
    pub fn size(&self) -> u32 {
        let core = self.core.borrow();
        core.layer_size(core.top)
    }

    /// The entire document as a string.
    #[must_use]
    pub fn text(&self) -> String {
        self.text_in_range(Range::new(Point::ZERO, self.extent()))
    }

    /// The document text within a range.
    #[must_use]
    pub fn text_in_range(&self, range: Range) -> String {
        let mut core = self.core.borrow_mut();
        core.warm_top_layer(range.start);
        let top = core.top;
        core.layer_text_in_range(top, range).to_string_lossy()
    }

    /// The document's chunks, in order. Concatenating them reproduces
    /// [`Self::text`].
    #[must_use]
    pub fn chunks(&self) -> Vec<String> {
        let mut result = Vec::new();
        self.for_each_chunk_in_range(Range::new(Point::ZERO, self.extent()), |slice| {
            result.push(String::from_utf16_lossy(slice.data()));
            false
        });
        result
    }

    /// Stream the chunks covering a range. The callback returns `true`
    /// to abort; the return value reports whether iteration aborted.
    pub fn for_each_chunk_in_range<F>(&self, range: Range, mut callback: F) -> bool
    where
        F: FnMut(TextSlice<'_>) -> bool,
    {
        let core = self.core.borrow();
        core.layer_for_each_chunk(core.top, range.start, range.end, &mut callback)
    }

    /// Length of a row in code units, excluding its line ending. `None`
    /// past the last row.
    #[must_use]
    pub fn line_length_for_row(&self, row: u32) -> Option<u32> {
        let mut core = self.core.borrow_mut();
        if row > core.layer_extent(core.top).row {
            return None;
        }
        let position = Point::new(row, u32::MAX);
        core.warm_top_layer(position);
        let top = core.top;
        Some(core.layer_clip_position(top, position).position.column)
    }

    /// The line ending terminating a row. `None` past the last row.
    #[must_use]
    pub fn line_ending_for_row(&self, row: u32) -> Option<LineEnding> {
        let mut core = self.core.borrow_mut();
        if row > core.layer_extent(core.top).row {
            return None;
        }
        core.warm_top_layer(Point::new(row, u32::MAX));
        let top = core.top;
        let mut ending = LineEnding::None;
        core.layer_for_each_chunk(
            top,
            Point::new(row, u32::MAX),
            Point::new(row + 1, 0),
            &mut |slice| match slice.front() {
                None => false,
                Some(CR) => {
                    ending = LineEnding::Crlf;
                    true
                }
                Some(_) => {
                    ending = LineEnding::Lf;
                    true
                }
            },
        );
        Some(ending)
    }

    /// A row's text, excluding its line ending. `None` past the last
    /// row.
    #[must_use]
    pub fn line_for_row(&self, row: u32) -> Option<String> {
        if row > self.extent().row {
            return None;
        }
        Some(self.text_in_range(Range::new(
            Point::new(row, 0),
            Point::new(row, u32::MAX),
        )))
    }

    /// Snap a position to the nearest valid document position at or
    /// before it, with its code-unit offset.
    #[must_use]
    pub fn clip_position(&self, position: Point) -> ClipResult {
        let mut core = self.core.borrow_mut();
        core.warm_top_layer(position);
        let top = core.top;
        core.layer_clip_position(top, position)
    }

    /// The position of a code-unit offset.
    #[must_use]
    pub fn position_for_offset(&self, offset: u32) -> Point {
        let core = self.core.borrow();
        core.layer_position_for_offset(core.top, offset)
    }

    /// The base layer's text.
    #[must_use]
    pub fn base_text(&self) -> Ref<'_, Text> {
        Ref::map(self.core.borrow(), |core| {
            core.layers
                .get(core.base)
                .text
                .as_ref()
                .expect("base layer has text")
        })
    }

    /// Replace the entire document.
    pub fn set_text(&mut self, text: &str) {
        self.set_text_in_range(Range::new(Point::ZERO, self.extent()), text);
    }

    /// Replace a range of the document. Out-of-bounds positions clip.
    pub fn set_text_in_range(&mut self, old_range: Range, text: &str) {
        self.core
            .borrow_mut()
            .set_text_in_range(old_range, Text::from(text));
    }

    /// Replace the document and history with a fresh base text.
    pub fn reset(&mut self, new_base_text: Text) {
        self.core.borrow_mut().reset(new_base_text);
    }

    /// Materialize the top layer as the new base and squash everything
    /// no snapshot still pins.
    pub fn flush_changes(&mut self) {
        self.core.borrow_mut().flush_changes();
    }

    /// Find the first match in the whole document.
    #[must_use]
    pub fn search(&self, regex: &Regex) -> Option<Range> {
        self.search_in_range(regex, Range::new(Point::ZERO, self.extent()))
    }

    /// Find every match in the whole document.
    #[must_use]
    pub fn search_all(&self, regex: &Regex) -> Vec<Range> {
        self.search_all_in_range(regex, Range::new(Point::ZERO, self.extent()))
    }

    /// Find the first match within a range.
    #[must_use]
    pub fn search_in_range(&self, regex: &Regex, range: Range) -> Option<Range> {
        let core = self.core.borrow();
        let range = Range::new(
            core.layer_clip_position(core.top, range.start).position,
            core.layer_clip_position(core.top, range.end).position,
        );
        core.layer_search_in_range(core.top, regex, range)
    }

    /// Find every match within a range.
    #[must_use]
    pub fn search_all_in_range(&self, regex: &Regex, range: Range) -> Vec<Range> {
        let core = self.core.borrow();
        let range = Range::new(
            core.layer_clip_position(core.top, range.start).position,
            core.layer_clip_position(core.top, range.end).position,
        );
        core.layer_search_all_in_range(core.top, regex, range)
    }

    /// Stream matches within a range. The callback returns `true` to
    /// stop the scan.
    pub fn scan_in_range<F>(&self, regex: &Regex, range: Range, mut callback: F)
    where
        F: FnMut(Range) -> bool,
    {
        let core = self.core.borrow();
        let range = Range::new(
            core.layer_clip_position(core.top, range.start).position,
            core.layer_clip_position(core.top, range.end).position,
        );
        core.layer_scan_in_range(core.top, regex, range, &mut callback);
    }

    /// Whether the document differs from the base text.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        let core = self.core.borrow();
        core.layer_is_modified(core.top, core.base)
    }

    /// Whether the document differs from a snapshot's base.
    #[must_use]
    pub fn is_modified_since(&self, snapshot: &Snapshot) -> bool {
        let core = self.core.borrow();
        core.layer_is_modified(core.top, snapshot.base)
    }

    /// Pin the current state and return a handle that reads it even as
    /// the buffer continues to change.
    #[must_use]
    pub fn create_snapshot(&self) -> Snapshot {
        let mut core = self.core.borrow_mut();
        let (top, base) = (core.top, core.base);
        core.layers.get_mut(top).snapshot_count += 1;
        core.layers.get_mut(base).snapshot_count += 1;
        Snapshot {
            core: Rc::clone(&self.core),
            layer: top,
            base,
        }
    }

    /// A patch mapping the current document back to a snapshot's state.
    #[must_use]
    pub fn get_inverted_changes(&self, snapshot: &Snapshot) -> Patch {
        self.core.borrow().get_inverted_changes(snapshot.base)
    }

    /// Serialize the changes accumulated since the base text as
    /// `size | extent | patch`.
    #[must_use]
    pub fn serialize_changes(&self) -> Vec<u8> {
        self.core.borrow().serialize_changes()
    }

    /// Restore changes serialized by [`Self::serialize_changes`] onto a
    /// pristine buffer holding the same base text.
    pub fn deserialize_changes(&mut self, bytes: &[u8]) -> Result<()> {
        self.core.borrow_mut().deserialize_changes(bytes)
    }

    /// Number of layers currently in the stack.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.core.borrow().layer_count()
    }

    /// A graphviz rendering of the layer stack, for diagnostics.
    #[must_use]
    pub fn get_dot_graph(&self) -> String {
        self.core.borrow().get_dot_graph()
    }
}

/// A read-only view of the buffer as of [`TextBuffer::create_snapshot`].
///
/// Snapshots pin their layer and the base layer; dropping the snapshot
/// unpins them and lets consolidation reclaim the layers. All reads are
/// pure, so snapshots freeze the layers they reference.
pub struct Snapshot {
    core: Rc<RefCell<BufferCore>>,
    layer: usize,
    base: usize,
}

impl Snapshot {
    /// The snapshot's extent.
    #[must_use]
    pub fn extent(&self) -> Point {
        self.core.borrow().layer_extent(self.layer)
    }

    /// The snapshot's size in code units.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.core.borrow().layer_size(self.layer)
    }

    /// The snapshot's entire text.
    #[must_use]
    pub fn text(&self) -> String {
        self.text_in_range(Range::new(Point::ZERO, self.extent()))
    }

    /// The snapshot's text within a range.
    #[must_use]
    pub fn text_in_range(&self, range: Range) -> String {
        let core = self.core.borrow();
        core.layer_text_in_range(self.layer, range).to_string_lossy()
    }

    /// Length of a row as of the snapshot.
    #[must_use]
    pub fn line_length_for_row(&self, row: u32) -> Option<u32> {
        let core = self.core.borrow();
        if row > core.layer_extent(self.layer).row {
            return None;
        }
        Some(
            core.layer_clip_position(self.layer, Point::new(row, u32::MAX))
                .position
                .column,
        )
    }

    /// Snap a position as of the snapshot.
    #[must_use]
    pub fn clip_position(&self, position: Point) -> ClipResult {
        self.core.borrow().layer_clip_position(self.layer, position)
    }

    /// The position of an offset as of the snapshot.
    #[must_use]
    pub fn position_for_offset(&self, offset: u32) -> Point {
        self.core
            .borrow()
            .layer_position_for_offset(self.layer, offset)
    }

    /// Find the first match as of the snapshot.
    #[must_use]
    pub fn search(&self, regex: &Regex) -> Option<Range> {
        let core = self.core.borrow();
        core.layer_search_in_range(
            self.layer,
            regex,
            Range::new(Point::ZERO, core.layer_extent(self.layer)),
        )
    }

    /// Find every match as of the snapshot.
    #[must_use]
    pub fn search_all(&self, regex: &Regex) -> Vec<Range> {
        let core = self.core.borrow();
        core.layer_search_all_in_range(
            self.layer,
            regex,
            Range::new(Point::ZERO, core.layer_extent(self.layer)),
        )
    }

    /// The base text this snapshot is layered over.
    #[must_use]
    pub fn base_text(&self) -> Ref<'_, Text> {
        Ref::map(self.core.borrow(), |core| {
            core.layers
                .get(self.base)
                .text
                .as_ref()
                .expect("base layer has text")
        })
    }

    /// Materialize this snapshot's layer so the layers below it can be
    /// reclaimed; promotes the buffer's base when this layer sits above
    /// it.
    pub fn flush_preceding_changes(&self) {
        let mut core = self.core.borrow_mut();
        if core.layers.get(self.layer).text.is_none() {
            let whole = Range::new(Point::ZERO, core.layer_extent(self.layer));
            let text = core.layer_text_in_range(self.layer, whole);
            core.layers.get_mut(self.layer).text = Some(text);
            if core.layer_is_above(self.layer, core.base) {
                core.base = self.layer;
            }
            core.consolidate_layers();
        }
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        let mut core = self.core.borrow_mut();
        let layer_released = {
            let layer = core.layers.get_mut(self.layer);
            debug_assert!(layer.snapshot_count > 0);
            layer.snapshot_count = layer.snapshot_count.saturating_sub(1);
            layer.snapshot_count == 0
        };
        let base_released = {
            let layer = core.layers.get_mut(self.base);
            layer.snapshot_count = layer.snapshot_count.saturating_sub(1);
            layer.snapshot_count == 0
        };
        if layer_released || base_released {
            core.consolidate_layers();
        }
    }
}
