//! A patch: an ordered set of non-overlapping changes, dual-keyed by old
//! and new coordinates.
//!
//! The tree is a splay tree whose nodes store coordinates *relative* to
//! their left-turn ancestor's end, in both coordinate spaces at once.
//! Relative storage is what makes edits cheap: shifting every change
//! after a splice rewrites a single distance at the cut point instead of
//! touching O(n) records. Each node also aggregates the replaced and
//! replacement text sizes of its subtree, so the `preceding_*_text_size`
//! fields of a [`Change`] fall out of the lookup descent.
//!
//! Queries come in two flavors: `get_*` methods are pure, `grab_*`
//! methods additionally splay the visited node to the root to amortize
//! future lookups. Callers gate `grab_*` on the layer not being pinned
//! by a snapshot.

use std::rc::Rc;

use crate::error::{Error, Result};
use crate::point::Point;
use crate::serialization::{Deserializer, Serializer};
use crate::text::Text;

/// A contiguous replacement record: the range it replaced in the layer
/// below (`old_*`), the range it occupies in this layer (`new_*`), and
/// the replacement text. `preceding_*_text_size` sum the text sizes of
/// every change before this one, which coordinate translation needs to
/// turn positions into offsets.
#[derive(Clone, Debug)]
pub struct Change {
    pub old_start: Point,
    pub old_end: Point,
    pub new_start: Point,
    pub new_end: Point,
    pub new_text: Rc<Text>,
    pub old_text: Option<Rc<Text>>,
    pub old_text_size: u32,
    pub preceding_old_text_size: u32,
    pub preceding_new_text_size: u32,
}

#[derive(Clone, Debug)]
struct Node {
    left: Option<usize>,
    right: Option<usize>,
    /// Old-coordinate distance from the left-turn ancestor's old end to
    /// this change's old start. The root's distance is absolute.
    old_distance_from_left_ancestor: Point,
    /// New-coordinate counterpart of the distance above.
    new_distance_from_left_ancestor: Point,
    old_extent: Point,
    new_extent: Point,
    new_text: Rc<Text>,
    old_text: Option<Rc<Text>>,
    old_text_size: u32,
    /// Sum of `old_text_size` over this subtree, including this node.
    old_subtree_text_size: u32,
    /// Sum of `new_text.size()` over this subtree, including this node.
    new_subtree_text_size: u32,
}

/// A node with its absolute coordinates resolved during a walk.
#[derive(Clone, Debug)]
struct Resolved {
    id: usize,
    old_start: Point,
    old_end: Point,
    new_start: Point,
    new_end: Point,
    preceding_old_text_size: u32,
    preceding_new_text_size: u32,
}

/// Flattened node data, used when a splice absorbs existing changes.
#[derive(Clone, Debug)]
struct Absorbed {
    old_start: Point,
    old_end: Point,
    new_start: Point,
    new_end: Point,
    new_text: Rc<Text>,
    old_text_size: u32,
}

/// An ordered set of non-overlapping [`Change`]s over a base document.
#[derive(Clone, Debug, Default)]
pub struct Patch {
    nodes: Vec<Option<Node>>,
    free_slots: Vec<usize>,
    root: Option<usize>,
}

impl Patch {
    /// Create an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the patch records no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of recorded changes.
    #[must_use]
    pub fn change_count(&self) -> usize {
        fn count(patch: &Patch, id: Option<usize>) -> usize {
            id.map_or(0, |id| {
                let node = patch.node(id);
                1 + count(patch, node.left) + count(patch, node.right)
            })
        }
        count(self, self.root)
    }

    /// Remove every change.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free_slots.clear();
        self.root = None;
    }

    // ------------------------------------------------------------------
    // Arena plumbing
    // ------------------------------------------------------------------

    fn node(&self, id: usize) -> &Node {
        self.nodes[id].as_ref().expect("freed patch node")
    }

    fn node_mut(&mut self, id: usize) -> &mut Node {
        self.nodes[id].as_mut().expect("freed patch node")
    }

    fn alloc(&mut self, node: Node) -> usize {
        if let Some(id) = self.free_slots.pop() {
            self.nodes[id] = Some(node);
            id
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn release(&mut self, id: usize) {
        self.nodes[id] = None;
        self.free_slots.push(id);
    }

    fn subtree_old_size(&self, id: Option<usize>) -> u32 {
        id.map_or(0, |id| self.node(id).old_subtree_text_size)
    }

    fn subtree_new_size(&self, id: Option<usize>) -> u32 {
        id.map_or(0, |id| self.node(id).new_subtree_text_size)
    }

    fn update_aggregates(&mut self, id: usize) {
        let (left, right) = {
            let node = self.node(id);
            (node.left, node.right)
        };
        let old = self.subtree_old_size(left)
            + self.subtree_old_size(right)
            + self.node(id).old_text_size;
        let new = self.subtree_new_size(left)
            + self.subtree_new_size(right)
            + self.node(id).new_text.size();
        let node = self.node_mut(id);
        node.old_subtree_text_size = old;
        node.new_subtree_text_size = new;
    }

    // ------------------------------------------------------------------
    // Rotations and splaying
    // ------------------------------------------------------------------

    fn rotate_right(&mut self, parent_id: usize) -> usize {
        let child_id = self.node(parent_id).left.expect("rotate_right without left child");
        let (child_old_end, child_new_end, grandchild) = {
            let child = self.node(child_id);
            (
                child
                    .old_distance_from_left_ancestor
                    .traverse(child.old_extent),
                child
                    .new_distance_from_left_ancestor
                    .traverse(child.new_extent),
                child.right,
            )
        };
        {
            let parent = self.node_mut(parent_id);
            parent.left = grandchild;
            parent.old_distance_from_left_ancestor = parent
                .old_distance_from_left_ancestor
                .traversal(child_old_end);
            parent.new_distance_from_left_ancestor = parent
                .new_distance_from_left_ancestor
                .traversal(child_new_end);
        }
        self.node_mut(child_id).right = Some(parent_id);
        self.update_aggregates(parent_id);
        self.update_aggregates(child_id);
        child_id
    }

    fn rotate_left(&mut self, parent_id: usize) -> usize {
        let child_id = self.node(parent_id).right.expect("rotate_left without right child");
        let (parent_old_end, parent_new_end) = {
            let parent = self.node(parent_id);
            (
                parent
                    .old_distance_from_left_ancestor
                    .traverse(parent.old_extent),
                parent
                    .new_distance_from_left_ancestor
                    .traverse(parent.new_extent),
            )
        };
        let grandchild = {
            let child = self.node_mut(child_id);
            child.old_distance_from_left_ancestor =
                parent_old_end.traverse(child.old_distance_from_left_ancestor);
            child.new_distance_from_left_ancestor =
                parent_new_end.traverse(child.new_distance_from_left_ancestor);
            child.left
        };
        {
            let parent = self.node_mut(parent_id);
            parent.right = grandchild;
        }
        self.node_mut(child_id).left = Some(parent_id);
        self.update_aggregates(parent_id);
        self.update_aggregates(child_id);
        child_id
    }

    /// Rotate `path[index]` above its parent, fixing the grandparent's
    /// child pointer (or the root) and dropping the parent from the path.
    fn rotate_up(&mut self, path: &mut Vec<usize>, index: usize) {
        let child = path[index];
        let parent = path[index - 1];
        let new_subroot = if self.node(parent).left == Some(child) {
            self.rotate_right(parent)
        } else {
            self.rotate_left(parent)
        };
        debug_assert_eq!(new_subroot, child);
        if index >= 2 {
            let grand = path[index - 2];
            if self.node(grand).left == Some(parent) {
                self.node_mut(grand).left = Some(child);
            } else {
                self.node_mut(grand).right = Some(child);
            }
        } else {
            self.root = Some(child);
        }
        path.remove(index - 1);
    }

    /// Splay the last node of a root-to-node path up to the root.
    fn splay(&mut self, path: &mut Vec<usize>) {
        while path.len() >= 2 {
            let i = path.len() - 1;
            if path.len() == 2 {
                self.rotate_up(path, i);
            } else {
                let target_is_left = self.node(path[i - 1]).left == Some(path[i]);
                let parent_is_left = self.node(path[i - 2]).left == Some(path[i - 1]);
                if target_is_left == parent_is_left {
                    self.rotate_up(path, i - 1);
                    self.rotate_up(path, i - 1);
                } else {
                    self.rotate_up(path, i);
                    self.rotate_up(path, i - 1);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Descents
    // ------------------------------------------------------------------

    /// Rightmost change with `new_start <= position`, with the path to it.
    fn descend_starting_before_new(&self, position: Point) -> Option<(Resolved, Vec<usize>)> {
        let mut path = Vec::new();
        let mut best: Option<Resolved> = None;
        let mut best_len = 0;
        let mut id_opt = self.root;
        let mut old_base = Point::ZERO;
        let mut new_base = Point::ZERO;
        let mut acc_old = 0u32;
        let mut acc_new = 0u32;
        while let Some(id) = id_opt {
            path.push(id);
            let node = self.node(id);
            let new_start = new_base.traverse(node.new_distance_from_left_ancestor);
            if new_start <= position {
                let old_start = old_base.traverse(node.old_distance_from_left_ancestor);
                let old_end = old_start.traverse(node.old_extent);
                let new_end = new_start.traverse(node.new_extent);
                best = Some(Resolved {
                    id,
                    old_start,
                    old_end,
                    new_start,
                    new_end,
                    preceding_old_text_size: acc_old + self.subtree_old_size(node.left),
                    preceding_new_text_size: acc_new + self.subtree_new_size(node.left),
                });
                best_len = path.len();
                acc_old += self.subtree_old_size(node.left) + node.old_text_size;
                acc_new += self.subtree_new_size(node.left) + node.new_text.size();
                old_base = old_end;
                new_base = new_end;
                id_opt = node.right;
            } else {
                id_opt = node.left;
            }
        }
        best.map(|resolved| {
            path.truncate(best_len);
            (resolved, path)
        })
    }

    /// Path to the leftmost node whose new end is at or past `position`.
    fn path_to_first_new_end_ge(&self, position: Point) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut best_len = 0;
        let mut id_opt = self.root;
        let mut new_base = Point::ZERO;
        while let Some(id) = id_opt {
            path.push(id);
            let node = self.node(id);
            let new_start = new_base.traverse(node.new_distance_from_left_ancestor);
            let new_end = new_start.traverse(node.new_extent);
            if new_end >= position {
                best_len = path.len();
                id_opt = node.left;
            } else {
                new_base = new_end;
                id_opt = node.right;
            }
        }
        (best_len > 0).then(|| {
            path.truncate(best_len);
            path
        })
    }

    /// Path to the leftmost node whose new start is strictly past
    /// `position`.
    fn path_to_first_new_start_gt(&self, position: Point) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut best_len = 0;
        let mut id_opt = self.root;
        let mut new_base = Point::ZERO;
        while let Some(id) = id_opt {
            path.push(id);
            let node = self.node(id);
            let new_start = new_base.traverse(node.new_distance_from_left_ancestor);
            if new_start > position {
                best_len = path.len();
                id_opt = node.left;
            } else {
                new_base = new_start.traverse(node.new_extent);
                id_opt = node.right;
            }
        }
        (best_len > 0).then(|| {
            path.truncate(best_len);
            path
        })
    }

    /// Old-coordinate counterpart of [`Self::path_to_first_new_end_ge`].
    fn path_to_first_old_end_ge(&self, position: Point) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut best_len = 0;
        let mut id_opt = self.root;
        let mut old_base = Point::ZERO;
        while let Some(id) = id_opt {
            path.push(id);
            let node = self.node(id);
            let old_start = old_base.traverse(node.old_distance_from_left_ancestor);
            let old_end = old_start.traverse(node.old_extent);
            if old_end >= position {
                best_len = path.len();
                id_opt = node.left;
            } else {
                old_base = old_end;
                id_opt = node.right;
            }
        }
        (best_len > 0).then(|| {
            path.truncate(best_len);
            path
        })
    }

    /// Old-coordinate counterpart of [`Self::path_to_first_new_start_gt`].
    fn path_to_first_old_start_gt(&self, position: Point) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut best_len = 0;
        let mut id_opt = self.root;
        let mut old_base = Point::ZERO;
        while let Some(id) = id_opt {
            path.push(id);
            let node = self.node(id);
            let old_start = old_base.traverse(node.old_distance_from_left_ancestor);
            if old_start > position {
                best_len = path.len();
                id_opt = node.left;
            } else {
                old_base = old_start.traverse(node.old_extent);
                id_opt = node.right;
            }
        }
        (best_len > 0).then(|| {
            path.truncate(best_len);
            path
        })
    }

    fn path_to_rightmost(&self, root: usize) -> Vec<usize> {
        let mut path = vec![root];
        let mut id = root;
        while let Some(right) = self.node(id).right {
            path.push(right);
            id = right;
        }
        path
    }

    /// Absolute end coordinates of a detached tree's rightmost change.
    fn tree_end_coords(&self, root: Option<usize>) -> (Point, Point) {
        let mut old_end = Point::ZERO;
        let mut new_end = Point::ZERO;
        let mut id_opt = root;
        while let Some(id) = id_opt {
            let node = self.node(id);
            old_end = old_end
                .traverse(node.old_distance_from_left_ancestor)
                .traverse(node.old_extent);
            new_end = new_end
                .traverse(node.new_distance_from_left_ancestor)
                .traverse(node.new_extent);
            id_opt = node.right;
        }
        (old_end, new_end)
    }

    fn change_from_resolved(&self, resolved: &Resolved) -> Change {
        let node = self.node(resolved.id);
        Change {
            old_start: resolved.old_start,
            old_end: resolved.old_end,
            new_start: resolved.new_start,
            new_end: resolved.new_end,
            new_text: node.new_text.clone(),
            old_text: node.old_text.clone(),
            old_text_size: node.old_text_size,
            preceding_old_text_size: resolved.preceding_old_text_size,
            preceding_new_text_size: resolved.preceding_new_text_size,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The rightmost change whose new start is at or before `position`.
    #[must_use]
    pub fn get_change_starting_before_new_position(&self, position: Point) -> Option<Change> {
        self.descend_starting_before_new(position)
            .map(|(resolved, _)| self.change_from_resolved(&resolved))
    }

    /// Splaying counterpart of
    /// [`Self::get_change_starting_before_new_position`]. Must not be
    /// called on a patch referenced by a snapshot.
    pub fn grab_change_starting_before_new_position(&mut self, position: Point) -> Option<Change> {
        let (resolved, mut path) = self.descend_starting_before_new(position)?;
        let change = self.change_from_resolved(&resolved);
        self.splay(&mut path);
        Some(change)
    }

    /// Changes overlapping `[start, end)` in new coordinates, in order.
    #[must_use]
    pub fn get_changes_in_new_range(&self, start: Point, end: Point) -> Vec<Change> {
        let mut out = Vec::new();
        self.collect_new_range(self.root, Point::ZERO, Point::ZERO, 0, 0, start, end, &mut out);
        out.into_iter()
            .map(|resolved| self.change_from_resolved(&resolved))
            .collect()
    }

    /// Splaying counterpart of [`Self::get_changes_in_new_range`]:
    /// additionally splays the last overlapping change.
    pub fn grab_changes_in_new_range(&mut self, start: Point, end: Point) -> Vec<Change> {
        let changes = self.get_changes_in_new_range(start, end);
        if changes.last().is_some() {
            if let Some((_, mut path)) = self.descend_starting_before_new(end) {
                self.splay(&mut path);
            }
        }
        changes
    }

    /// Every change, in order.
    #[must_use]
    pub fn get_changes(&self) -> Vec<Change> {
        let mut out = Vec::new();
        self.collect_all(self.root, Point::ZERO, Point::ZERO, 0, 0, &mut out);
        out.into_iter()
            .map(|resolved| self.change_from_resolved(&resolved))
            .collect()
    }

    fn collect_all(
        &self,
        id_opt: Option<usize>,
        old_base: Point,
        new_base: Point,
        acc_old: u32,
        acc_new: u32,
        out: &mut Vec<Resolved>,
    ) {
        let Some(id) = id_opt else { return };
        let node = self.node(id);
        let old_start = old_base.traverse(node.old_distance_from_left_ancestor);
        let new_start = new_base.traverse(node.new_distance_from_left_ancestor);
        let old_end = old_start.traverse(node.old_extent);
        let new_end = new_start.traverse(node.new_extent);
        self.collect_all(node.left, old_base, new_base, acc_old, acc_new, out);
        out.push(Resolved {
            id,
            old_start,
            old_end,
            new_start,
            new_end,
            preceding_old_text_size: acc_old + self.subtree_old_size(node.left),
            preceding_new_text_size: acc_new + self.subtree_new_size(node.left),
        });
        let acc_old = acc_old + self.subtree_old_size(node.left) + node.old_text_size;
        let acc_new = acc_new + self.subtree_new_size(node.left) + node.new_text.size();
        self.collect_all(node.right, old_end, new_end, acc_old, acc_new, out);
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_new_range(
        &self,
        id_opt: Option<usize>,
        old_base: Point,
        new_base: Point,
        acc_old: u32,
        acc_new: u32,
        start: Point,
        end: Point,
        out: &mut Vec<Resolved>,
    ) {
        let Some(id) = id_opt else { return };
        let node = self.node(id);
        let old_start = old_base.traverse(node.old_distance_from_left_ancestor);
        let new_start = new_base.traverse(node.new_distance_from_left_ancestor);
        let old_end = old_start.traverse(node.old_extent);
        let new_end = new_start.traverse(node.new_extent);

        if new_start > start {
            self.collect_new_range(node.left, old_base, new_base, acc_old, acc_new, start, end, out);
        }
        if new_end > start && new_start < end {
            out.push(Resolved {
                id,
                old_start,
                old_end,
                new_start,
                new_end,
                preceding_old_text_size: acc_old + self.subtree_old_size(node.left),
                preceding_new_text_size: acc_new + self.subtree_new_size(node.left),
            });
        }
        if new_end < end {
            let acc_old = acc_old + self.subtree_old_size(node.left) + node.old_text_size;
            let acc_new = acc_new + self.subtree_new_size(node.left) + node.new_text.size();
            self.collect_new_range(node.right, old_end, new_end, acc_old, acc_new, start, end, out);
        }
    }

    /// Translate a new-coordinate offset into a new-coordinate position.
    ///
    /// The patch only knows distances between changes; the two callbacks
    /// supply the layer below: the offset of an old position, and the
    /// position of an old offset.
    pub fn new_position_for_new_offset(
        &self,
        goal_offset: u32,
        old_position_to_offset: impl Fn(Point) -> u32,
        old_offset_to_position: impl Fn(u32) -> Point,
    ) -> Point {
        let mut id_opt = self.root;
        let mut old_base = Point::ZERO;
        let mut new_base = Point::ZERO;
        let mut acc_old = 0u32;
        let mut acc_new = 0u32;
        let mut best: Option<(Resolved, u32)> = None;
        while let Some(id) = id_opt {
            let node = self.node(id);
            let old_start = old_base.traverse(node.old_distance_from_left_ancestor);
            let new_start = new_base.traverse(node.new_distance_from_left_ancestor);
            let preceding_old = acc_old + self.subtree_old_size(node.left);
            let preceding_new = acc_new + self.subtree_new_size(node.left);
            let new_start_offset =
                old_position_to_offset(old_start) + preceding_new - preceding_old;
            if goal_offset < new_start_offset {
                id_opt = node.left;
            } else {
                let new_end_offset = new_start_offset + node.new_text.size();
                if goal_offset <= new_end_offset {
                    return new_start.traverse(
                        node.new_text
                            .position_for_offset(goal_offset - new_start_offset),
                    );
                }
                let old_end = old_start.traverse(node.old_extent);
                let new_end = new_start.traverse(node.new_extent);
                best = Some((
                    Resolved {
                        id,
                        old_start,
                        old_end,
                        new_start,
                        new_end,
                        preceding_old_text_size: preceding_old,
                        preceding_new_text_size: preceding_new,
                    },
                    new_end_offset,
                ));
                acc_old += self.subtree_old_size(node.left) + node.old_text_size;
                acc_new += self.subtree_new_size(node.left) + node.new_text.size();
                old_base = old_end;
                new_base = new_end;
                id_opt = node.right;
            }
        }
        match best {
            Some((resolved, new_end_offset)) => {
                let old_start_offset = old_position_to_offset(resolved.old_start);
                let old_end_offset =
                    old_start_offset + self.node(resolved.id).old_text_size;
                let old_position = old_offset_to_position(
                    old_end_offset + (goal_offset - new_end_offset),
                );
                resolved
                    .new_end
                    .traverse(old_position.traversal(resolved.old_end))
            }
            None => old_offset_to_position(goal_offset),
        }
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Record a replacement in new-coordinate space.
    ///
    /// The region `[new_start, new_start + new_deletion_extent)` of this
    /// patch's output document is replaced by `new_text` (spanning
    /// `new_insertion_extent`). Existing changes whose new range overlaps
    /// or touches the deleted region are absorbed into a single merged
    /// change. `deleted_text_size` is the code-unit size of the deleted
    /// new-space region, which the patch cannot compute on its own.
    pub fn splice(
        &mut self,
        new_start: Point,
        new_deletion_extent: Point,
        new_insertion_extent: Point,
        old_text: Option<Rc<Text>>,
        new_text: Rc<Text>,
        deleted_text_size: u32,
    ) {
        let deletion_end = new_start.traverse(new_deletion_extent);

        // Detach the changes strictly before the splice.
        let left_root = match self.path_to_first_new_end_ge(new_start) {
            Some(mut path) => {
                self.splay(&mut path);
                let root = self.root.expect("splayed node must be root");
                let left = self.node_mut(root).left.take();
                self.update_aggregates(root);
                left
            }
            None => self.root.take(),
        };

        // Detach the changes strictly after it.
        let after_root = if self.root.is_some() {
            match self.path_to_first_new_start_gt(deletion_end) {
                Some(mut path) => {
                    self.splay(&mut path);
                    let root = self.root.expect("splayed node must be root");
                    let absorbed = self.node_mut(root).left.take();
                    self.update_aggregates(root);
                    let after = self.root.take();
                    self.root = absorbed;
                    after
                }
                None => None,
            }
        } else {
            None
        };

        // What remains rooted is the set of absorbed changes.
        let absorbed_root = self.root.take();
        let mut absorbed = Vec::new();
        self.flatten(absorbed_root, Point::ZERO, Point::ZERO, &mut absorbed);

        if absorbed.is_empty()
            && new_deletion_extent.is_zero()
            && new_insertion_extent.is_zero()
            && new_text.is_empty()
        {
            self.join_detached(left_root, after_root);
            return;
        }

        let (left_old_end, left_new_end) = self.tree_end_coords(left_root);
        let first = absorbed.first();
        let last = absorbed.last();

        let merged_new_start = match first {
            Some(f) if f.new_start < new_start => f.new_start,
            _ => new_start,
        };
        let merged_old_start = match first {
            Some(f) if f.new_start <= new_start => f.old_start,
            _ => left_old_end.traverse(new_start.traversal(left_new_end)),
        };
        let merged_old_end = match last {
            Some(l) if l.new_end >= deletion_end => l.old_end,
            Some(l) => l.old_end.traverse(deletion_end.traversal(l.new_end)),
            None => left_old_end.traverse(deletion_end.traversal(left_new_end)),
        };

        let prefix_extent = match first {
            Some(f) if f.new_start < new_start => new_start.traversal(f.new_start),
            _ => Point::ZERO,
        };
        let suffix_extent = match last {
            Some(l) if l.new_end > deletion_end => l.new_end.traversal(deletion_end),
            _ => Point::ZERO,
        };
        let merged_new_extent = prefix_extent
            .traverse(new_insertion_extent)
            .traverse(suffix_extent);

        let merged_new_text = if prefix_extent.is_zero() && suffix_extent.is_zero() {
            new_text
        } else {
            let mut units = Vec::new();
            if let Some(f) = first {
                if f.new_start < new_start {
                    let cut = f.new_text.raw_offset(new_start.traversal(f.new_start));
                    units.extend_from_slice(&f.new_text.content()[..cut as usize]);
                }
            }
            units.extend_from_slice(new_text.content());
            if let Some(l) = last {
                if l.new_end > deletion_end {
                    let cut = l.new_text.raw_offset(deletion_end.traversal(l.new_start));
                    units.extend_from_slice(&l.new_text.content()[cut as usize..]);
                }
            }
            Rc::new(Text::from_units(units))
        };

        let covered: u32 = absorbed
            .iter()
            .map(|change| {
                let lo = change.new_start.max(new_start);
                let hi = change.new_end.min(deletion_end);
                if hi > lo {
                    change.new_text.raw_offset(hi.traversal(change.new_start))
                        - change.new_text.raw_offset(lo.traversal(change.new_start))
                } else {
                    0
                }
            })
            .sum();
        let merged_old_text_size = absorbed
            .iter()
            .map(|change| change.old_text_size)
            .sum::<u32>()
            + deleted_text_size.saturating_sub(covered);
        let merged_old_text = if absorbed.is_empty() { old_text } else { None };

        let merged_old_extent = merged_old_end.traversal(merged_old_start);

        // An edit can cancel the absorbed changes outright (for example,
        // deleting an insertion). Drop the empty record instead of
        // storing it; the suffix re-bases through the now pass-through
        // region.
        if merged_old_extent.is_zero()
            && merged_new_extent.is_zero()
            && merged_new_text.is_empty()
            && merged_old_text_size == 0
        {
            if let Some(after) = after_root {
                let old_abs = self.node(after).old_distance_from_left_ancestor;
                let corrected_new = left_new_end.traverse(old_abs.traversal(left_old_end));
                self.node_mut(after).new_distance_from_left_ancestor = corrected_new;
            }
            self.join_detached(left_root, after_root);
            return;
        }

        let after_gap = after_root.map(|after| {
            self.node(after)
                .old_distance_from_left_ancestor
                .traversal(merged_old_end)
        });
        let merged_id = self.alloc(Node {
            left: left_root,
            right: after_root,
            old_distance_from_left_ancestor: merged_old_start,
            new_distance_from_left_ancestor: merged_new_start,
            old_extent: merged_old_extent,
            new_extent: merged_new_extent,
            new_text: merged_new_text,
            old_text: merged_old_text,
            old_text_size: merged_old_text_size,
            old_subtree_text_size: 0,
            new_subtree_text_size: 0,
        });
        if let (Some(after), Some(gap)) = (after_root, after_gap) {
            // Everything between the merged change and the next one is
            // pass-through, so the old and new gaps coincide.
            let node = self.node_mut(after);
            node.old_distance_from_left_ancestor = gap;
            node.new_distance_from_left_ancestor = gap;
        }
        self.update_aggregates(merged_id);
        self.root = Some(merged_id);
    }

    /// Record a replacement in old-coordinate space: the underlying
    /// document changed out from under this patch. Changes whose old
    /// range intersects the spliced region (touching counts) are
    /// discarded and the region reverts to pass-through; later changes
    /// shift by the insertion-minus-deletion delta.
    ///
    /// With zero extents this removes the change anchored at `old_start`,
    /// which is how a buffer discards a change it proved to be a noop.
    pub fn splice_old(
        &mut self,
        old_start: Point,
        old_deletion_extent: Point,
        old_insertion_extent: Point,
    ) {
        let deletion_end = old_start.traverse(old_deletion_extent);
        let insertion_end = old_start.traverse(old_insertion_extent);

        let left_root = match self.path_to_first_old_end_ge(old_start) {
            Some(mut path) => {
                self.splay(&mut path);
                let root = self.root.expect("splayed node must be root");
                let left = self.node_mut(root).left.take();
                self.update_aggregates(root);
                left
            }
            None => return, // every change ends before the splice
        };

        let after_root = match self.path_to_first_old_start_gt(deletion_end) {
            Some(mut path) => {
                self.splay(&mut path);
                let root = self.root.expect("splayed node must be root");
                let dropped = self.node_mut(root).left.take();
                self.update_aggregates(root);
                let after = self.root.take();
                self.root = dropped;
                after
            }
            None => None,
        };

        // Discard the intersecting changes entirely.
        let dropped_root = self.root.take();
        let mut dropped = Vec::new();
        self.flatten(dropped_root, Point::ZERO, Point::ZERO, &mut dropped);

        if let Some(after) = after_root {
            // Shift the suffix by the old-space delta; the region before
            // it is pass-through now, so old and new distances coincide.
            let old_abs = self.node(after).old_distance_from_left_ancestor;
            let shifted = insertion_end.traverse(old_abs.traversal(deletion_end));
            let (left_old_end, _) = self.tree_end_coords(left_root);
            let gap = shifted.traversal(left_old_end);
            let node = self.node_mut(after);
            node.old_distance_from_left_ancestor = gap;
            node.new_distance_from_left_ancestor = gap;
        }
        self.join_detached(left_root, after_root);
    }

    /// Compose `other` on top of `self`: `other`'s old coordinates are
    /// `self`'s new coordinates. Ascending application splices at each
    /// change's new start (earlier splices have already shifted the
    /// document); descending application splices at the old start. The
    /// two directions produce the same composition.
    pub fn combine(&mut self, other: &Patch, left_to_right: bool) {
        let changes = other.get_changes();
        tracing::debug!(
            changes = changes.len(),
            left_to_right,
            "combining patches"
        );
        let apply = |patch: &mut Patch, change: &Change| {
            let position = if left_to_right {
                change.new_start
            } else {
                change.old_start
            };
            patch.splice(
                position,
                change.old_end.traversal(change.old_start),
                change.new_end.traversal(change.new_start),
                change.old_text.clone(),
                change.new_text.clone(),
                change.old_text_size,
            );
        };
        if left_to_right {
            for change in &changes {
                apply(self, change);
            }
        } else {
            for change in changes.iter().rev() {
                apply(self, change);
            }
        }
    }

    /// Compose a stack of patches, bottom first.
    #[must_use]
    pub fn compose(patches: &[&Patch]) -> Patch {
        let Some((first, rest)) = patches.split_first() else {
            return Patch::new();
        };
        let mut result = (*first).clone();
        let mut left_to_right = true;
        for patch in rest {
            result.combine(patch, left_to_right);
            left_to_right = !left_to_right;
        }
        result
    }

    fn flatten(
        &mut self,
        id_opt: Option<usize>,
        old_base: Point,
        new_base: Point,
        out: &mut Vec<Absorbed>,
    ) {
        let Some(id) = id_opt else { return };
        let node = self.node(id);
        let (left, right) = (node.left, node.right);
        let old_start = old_base.traverse(node.old_distance_from_left_ancestor);
        let new_start = new_base.traverse(node.new_distance_from_left_ancestor);
        let old_end = old_start.traverse(node.old_extent);
        let new_end = new_start.traverse(node.new_extent);
        self.flatten(left, old_base, new_base, out);
        let node = self.node(id);
        out.push(Absorbed {
            old_start,
            old_end,
            new_start,
            new_end,
            new_text: node.new_text.clone(),
            old_text_size: node.old_text_size,
        });
        self.release(id);
        self.flatten(right, old_end, new_end, out);
    }

    /// Reattach two detached trees whose coordinates are unchanged.
    fn join_detached(&mut self, left_root: Option<usize>, after_root: Option<usize>) {
        match (left_root, after_root) {
            (left, None) => self.root = left,
            (None, Some(after)) => self.root = Some(after),
            (Some(left), Some(after)) => {
                self.root = Some(left);
                let mut path = self.path_to_rightmost(left);
                self.splay(&mut path);
                let root = self.root.expect("splayed node must be root");
                let (root_old_end, root_new_end) = {
                    let node = self.node(root);
                    debug_assert!(node.right.is_none());
                    (
                        node.old_distance_from_left_ancestor.traverse(node.old_extent),
                        node.new_distance_from_left_ancestor.traverse(node.new_extent),
                    )
                };
                {
                    let after_node = self.node_mut(after);
                    let old_abs = after_node.old_distance_from_left_ancestor;
                    let new_abs = after_node.new_distance_from_left_ancestor;
                    after_node.old_distance_from_left_ancestor = old_abs.traversal(root_old_end);
                    after_node.new_distance_from_left_ancestor = new_abs.traversal(root_new_end);
                }
                self.node_mut(root).right = Some(after);
                self.update_aggregates(root);
            }
        }
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    /// Write every change as `count | (old range, new range, old size,
    /// new text, optional old text)*`.
    pub fn serialize(&self, serializer: &mut Serializer) {
        let changes = self.get_changes();
        serializer.append_u32(changes.len() as u32);
        for change in &changes {
            serializer.append_point(change.old_start);
            serializer.append_point(change.old_end);
            serializer.append_point(change.new_start);
            serializer.append_point(change.new_end);
            serializer.append_u32(change.old_text_size);
            serializer.append_units(change.new_text.content());
            match &change.old_text {
                Some(text) => {
                    serializer.append_u32(1);
                    serializer.append_units(text.content());
                }
                None => serializer.append_u32(0),
            }
        }
    }

    /// Read a patch serialized by [`Self::serialize`].
    pub fn deserialize(deserializer: &mut Deserializer<'_>) -> Result<Patch> {
        struct Record {
            old_start: Point,
            old_end: Point,
            new_start: Point,
            new_end: Point,
            old_text_size: u32,
            new_text: Rc<Text>,
            old_text: Option<Rc<Text>>,
        }

        let count = deserializer.read_u32()?;
        let mut records = Vec::with_capacity(count.min(4096) as usize);
        let mut previous_old_end = Point::ZERO;
        let mut previous_new_end = Point::ZERO;
        for _ in 0..count {
            let old_start = deserializer.read_point()?;
            let old_end = deserializer.read_point()?;
            let new_start = deserializer.read_point()?;
            let new_end = deserializer.read_point()?;
            let old_text_size = deserializer.read_u32()?;
            let new_text = Rc::new(Text::from_units(deserializer.read_units()?));
            let old_text = if deserializer.read_u32()? != 0 {
                Some(Rc::new(Text::from_units(deserializer.read_units()?)))
            } else {
                None
            };
            if old_start < previous_old_end
                || new_start < previous_new_end
                || old_end < old_start
                || new_end < new_start
            {
                return Err(Error::MalformedData(
                    "patch changes out of order".to_string(),
                ));
            }
            if new_end.traversal(new_start) != new_text.extent() {
                return Err(Error::MalformedData(
                    "change extent does not match its text".to_string(),
                ));
            }
            previous_old_end = old_end;
            previous_new_end = new_end;
            records.push(Record {
                old_start,
                old_end,
                new_start,
                new_end,
                old_text_size,
                new_text,
                old_text,
            });
        }

        fn build(
            patch: &mut Patch,
            records: &[Record],
            old_base: Point,
            new_base: Point,
        ) -> Option<usize> {
            if records.is_empty() {
                return None;
            }
            let mid = records.len() / 2;
            let record = &records[mid];
            let left = build(patch, &records[..mid], old_base, new_base);
            let right = build(
                patch,
                &records[mid + 1..],
                record.old_end,
                record.new_end,
            );
            let id = patch.alloc(Node {
                left,
                right,
                old_distance_from_left_ancestor: record.old_start.traversal(old_base),
                new_distance_from_left_ancestor: record.new_start.traversal(new_base),
                old_extent: record.old_end.traversal(record.old_start),
                new_extent: record.new_end.traversal(record.new_start),
                new_text: record.new_text.clone(),
                old_text: record.old_text.clone(),
                old_text_size: record.old_text_size,
                old_subtree_text_size: 0,
                new_subtree_text_size: 0,
            });
            patch.update_aggregates(id);
            Some(id)
        }

        let mut patch = Patch::new();
        patch.root = build(&mut patch, &records, Point::ZERO, Point::ZERO);
        Ok(patch)
    }

    /// A graphviz rendering of the change list, for diagnostics.
    #[must_use]
    pub fn get_dot_graph(&self) -> String {
        use std::fmt::Write as _;
        let mut result = String::from("digraph patch {\n");
        for (index, change) in self.get_changes().iter().enumerate() {
            let _ = writeln!(
                result,
                "  change_{index} [label=\"old: {}-{}, new: {}-{}, text: {:?}\"]",
                change.old_start,
                change.old_end,
                change.new_start,
                change.new_end,
                change.new_text.to_string_lossy(),
            );
        }
        result.push_str("}\n");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Rc<Text> {
        Rc::new(Text::from(s))
    }

    fn splice_str(
        patch: &mut Patch,
        start: (u32, u32),
        deleted: (u32, u32),
        inserted: &str,
        deleted_size: u32,
    ) {
        let new_text = text(inserted);
        let extent = new_text.extent();
        patch.splice(
            Point::new(start.0, start.1),
            Point::new(deleted.0, deleted.1),
            extent,
            None,
            new_text,
            deleted_size,
        );
    }

    fn ranges(patch: &Patch) -> Vec<((u32, u32), (u32, u32), (u32, u32), (u32, u32))> {
        patch
            .get_changes()
            .iter()
            .map(|c| {
                (
                    (c.old_start.row, c.old_start.column),
                    (c.old_end.row, c.old_end.column),
                    (c.new_start.row, c.new_start.column),
                    (c.new_end.row, c.new_end.column),
                )
            })
            .collect()
    }

    #[test]
    fn test_single_splice() {
        let mut patch = Patch::new();
        // Replace "d" at column 3 with "DD".
        splice_str(&mut patch, (0, 3), (0, 1), "DD", 1);
        let changes = patch.get_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_start, Point::new(0, 3));
        assert_eq!(changes[0].old_end, Point::new(0, 4));
        assert_eq!(changes[0].new_end, Point::new(0, 5));
        assert_eq!(changes[0].old_text_size, 1);
        assert_eq!(changes[0].new_text.to_string_lossy(), "DD");
    }

    #[test]
    fn test_disjoint_splices_stay_separate() {
        let mut patch = Patch::new();
        splice_str(&mut patch, (0, 1), (0, 1), "X", 1);
        splice_str(&mut patch, (0, 5), (0, 1), "Y", 1);
        assert_eq!(patch.change_count(), 2);
        assert_eq!(
            ranges(&patch),
            vec![
                ((0, 1), (0, 2), (0, 1), (0, 2)),
                ((0, 5), (0, 6), (0, 5), (0, 6)),
            ]
        );
    }

    #[test]
    fn test_touching_splices_merge() {
        let mut patch = Patch::new();
        splice_str(&mut patch, (0, 1), (0, 0), "X", 0);
        // Insert directly after the previous insertion.
        splice_str(&mut patch, (0, 2), (0, 0), "Y", 0);
        let changes = patch.get_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new_text.to_string_lossy(), "XY");
        assert_eq!(changes[0].old_start, Point::new(0, 1));
        assert_eq!(changes[0].old_end, Point::new(0, 1));
        assert_eq!(changes[0].new_end, Point::new(0, 3));
    }

    #[test]
    fn test_overlapping_splice_merges_and_shifts() {
        let mut patch = Patch::new();
        // "abcdef" -> "abXdef"
        splice_str(&mut patch, (0, 2), (0, 1), "X", 1);
        // "abXdef" -> "abYYef": replaces "Xd".
        splice_str(&mut patch, (0, 2), (0, 2), "YY", 2);
        let changes = patch.get_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_start, Point::new(0, 2));
        assert_eq!(changes[0].old_end, Point::new(0, 4));
        assert_eq!(changes[0].new_end, Point::new(0, 4));
        assert_eq!(changes[0].new_text.to_string_lossy(), "YY");
        assert_eq!(changes[0].old_text_size, 2);
    }

    #[test]
    fn test_splice_preserves_head_and_tail_of_absorbed_change() {
        let mut patch = Patch::new();
        // "abc" -> "aXYZc"
        splice_str(&mut patch, (0, 1), (0, 1), "XYZ", 1);
        // "aXYZc" -> "aXWZc": replaces the middle of the insertion.
        splice_str(&mut patch, (0, 2), (0, 1), "W", 1);
        let changes = patch.get_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new_text.to_string_lossy(), "XWZ");
        assert_eq!(changes[0].old_text_size, 1);
    }

    #[test]
    fn test_later_changes_shift_on_insertion() {
        let mut patch = Patch::new();
        splice_str(&mut patch, (0, 10), (0, 1), "Z", 1);
        // Insert a line break before it.
        splice_str(&mut patch, (0, 2), (0, 0), "--\n", 0);
        let changes = patch.get_changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].old_start, Point::new(0, 10));
        // Positions after the inserted "--\n" land on the next row.
        assert_eq!(changes[1].new_start, Point::new(1, 8));
        assert_eq!(changes[1].new_end, Point::new(1, 9));
    }

    #[test]
    fn test_preceding_text_sizes() {
        let mut patch = Patch::new();
        splice_str(&mut patch, (0, 1), (0, 2), "XXX", 2);
        splice_str(&mut patch, (0, 10), (0, 1), "Y", 1);
        let changes = patch.get_changes();
        assert_eq!(changes[0].preceding_old_text_size, 0);
        assert_eq!(changes[0].preceding_new_text_size, 0);
        assert_eq!(changes[1].preceding_old_text_size, 2);
        assert_eq!(changes[1].preceding_new_text_size, 3);
    }

    #[test]
    fn test_get_change_starting_before_new_position() {
        let mut patch = Patch::new();
        splice_str(&mut patch, (0, 2), (0, 1), "XX", 1);
        splice_str(&mut patch, (0, 8), (0, 1), "Y", 1);
        assert!(patch
            .get_change_starting_before_new_position(Point::new(0, 1))
            .is_none());
        let change = patch
            .get_change_starting_before_new_position(Point::new(0, 5))
            .unwrap();
        assert_eq!(change.new_start, Point::new(0, 2));
        let change = patch
            .get_change_starting_before_new_position(Point::new(0, 9))
            .unwrap();
        assert_eq!(change.new_start, Point::new(0, 8));
        assert_eq!(change.preceding_new_text_size, 2);
        assert_eq!(change.preceding_old_text_size, 1);
    }

    #[test]
    fn test_grab_preserves_content() {
        let mut patch = Patch::new();
        for column in [2u32, 8, 14, 20, 26] {
            splice_str(&mut patch, (0, column), (0, 1), "Z", 1);
        }
        let before = ranges(&patch);
        for column in [26u32, 2, 14, 8, 20] {
            let change = patch
                .grab_change_starting_before_new_position(Point::new(0, column))
                .unwrap();
            assert_eq!(change.new_start, Point::new(0, column));
        }
        assert_eq!(ranges(&patch), before);
    }

    #[test]
    fn test_changes_in_new_range() {
        let mut patch = Patch::new();
        splice_str(&mut patch, (0, 2), (0, 1), "A", 1);
        splice_str(&mut patch, (0, 6), (0, 1), "B", 1);
        splice_str(&mut patch, (0, 10), (0, 1), "C", 1);
        let changes = patch.get_changes_in_new_range(Point::new(0, 3), Point::new(0, 10));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new_text.to_string_lossy(), "B");

        let changes = patch.get_changes_in_new_range(Point::new(0, 0), Point::new(0, 30));
        assert_eq!(changes.len(), 3);
    }

    #[test]
    fn test_splice_old_removes_change() {
        let mut patch = Patch::new();
        splice_str(&mut patch, (0, 2), (0, 1), "A", 1);
        splice_str(&mut patch, (0, 8), (0, 2), "BB", 2);
        patch.splice_old(Point::new(0, 2), Point::ZERO, Point::ZERO);
        let changes = patch.get_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new_text.to_string_lossy(), "BB");
        // The survivor's coordinates are unchanged: the removed change
        // had equal extents.
        assert_eq!(changes[0].old_start, Point::new(0, 8));
        assert_eq!(changes[0].new_start, Point::new(0, 8));
    }

    #[test]
    fn test_combine_left_to_right_and_right_to_left_agree() {
        let build_base = || {
            let mut patch = Patch::new();
            splice_str(&mut patch, (0, 1), (0, 1), "XX", 1);
            splice_str(&mut patch, (0, 8), (0, 2), "Y", 2);
            patch
        };
        let mut upper = Patch::new();
        splice_str(&mut upper, (0, 0), (0, 2), "Q", 2);
        splice_str(&mut upper, (0, 5), (0, 1), "RR", 1);

        let mut ltr = build_base();
        ltr.combine(&upper, true);
        let mut rtl = build_base();
        rtl.combine(&upper, false);
        assert_eq!(ranges(&ltr), ranges(&rtl));
        let ltr_texts: Vec<String> = ltr
            .get_changes()
            .iter()
            .map(|c| c.new_text.to_string_lossy())
            .collect();
        let rtl_texts: Vec<String> = rtl
            .get_changes()
            .iter()
            .map(|c| c.new_text.to_string_lossy())
            .collect();
        assert_eq!(ltr_texts, rtl_texts);
    }

    #[test]
    fn test_combine_composes_document_transform() {
        // Base document "abcdef". Lower patch: replace "cd" with "X",
        // producing "abXef". Upper patch: replace "bX" with "YY",
        // producing "aYYef". The composition maps "abcdef" to "aYYef".
        let mut lower = Patch::new();
        splice_str(&mut lower, (0, 2), (0, 2), "X", 2);
        let mut upper = Patch::new();
        splice_str(&mut upper, (0, 1), (0, 2), "YY", 2);
        lower.combine(&upper, true);
        let changes = lower.get_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_start, Point::new(0, 1));
        assert_eq!(changes[0].old_end, Point::new(0, 4));
        assert_eq!(changes[0].new_start, Point::new(0, 1));
        assert_eq!(changes[0].new_end, Point::new(0, 3));
        assert_eq!(changes[0].new_text.to_string_lossy(), "YY");
        assert_eq!(changes[0].old_text_size, 3);
    }

    #[test]
    fn test_new_position_for_new_offset() {
        // Old document "abcdef" (offsets are identities).
        let mut patch = Patch::new();
        splice_str(&mut patch, (0, 2), (0, 1), "XYZ", 1); // "abXYZdef"
        let old_to_offset = |p: Point| p.column;
        let offset_to_old = |offset: u32| Point::new(0, offset);
        assert_eq!(
            patch.new_position_for_new_offset(1, old_to_offset, offset_to_old),
            Point::new(0, 1)
        );
        assert_eq!(
            patch.new_position_for_new_offset(4, old_to_offset, offset_to_old),
            Point::new(0, 4)
        );
        assert_eq!(
            patch.new_position_for_new_offset(7, old_to_offset, offset_to_old),
            Point::new(0, 7)
        );
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut patch = Patch::new();
        splice_str(&mut patch, (0, 1), (0, 2), "one\ntwo", 2);
        splice_str(&mut patch, (3, 4), (1, 0), "z", 7);
        let mut serializer = Serializer::new();
        patch.serialize(&mut serializer);
        let bytes = serializer.finish();

        let mut deserializer = Deserializer::new(&bytes);
        let restored = Patch::deserialize(&mut deserializer).unwrap();
        assert_eq!(ranges(&restored), ranges(&patch));
        let original_texts: Vec<String> = patch
            .get_changes()
            .iter()
            .map(|c| c.new_text.to_string_lossy())
            .collect();
        let restored_texts: Vec<String> = restored
            .get_changes()
            .iter()
            .map(|c| c.new_text.to_string_lossy())
            .collect();
        assert_eq!(original_texts, restored_texts);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        let mut serializer = Serializer::new();
        serializer.append_u32(3);
        let bytes = serializer.finish();
        let mut deserializer = Deserializer::new(&bytes);
        assert!(Patch::deserialize(&mut deserializer).is_err());
    }

    #[test]
    fn test_multirow_coordinates() {
        let mut patch = Patch::new();
        // Replace a range spanning rows with a single-row text.
        splice_str(&mut patch, (1, 2), (2, 1), "flat", 10);
        let changes = patch.get_changes();
        assert_eq!(changes[0].old_start, Point::new(1, 2));
        assert_eq!(changes[0].old_end, Point::new(3, 1));
        assert_eq!(changes[0].new_end, Point::new(1, 6));

        // A later change on a following row shifts rows upward.
        splice_str(&mut patch, (2, 0), (0, 1), "q", 1);
        let changes = patch.get_changes();
        assert_eq!(changes[1].new_start, Point::new(2, 0));
        assert_eq!(changes[1].old_start, Point::new(4, 0));
    }
}
