//! The internal rope nodes backing [`Text`](crate::Text).
//!
//! A node is either a leaf over contiguous character storage (a string, a
//! character array, or a compressed [`Page`]) or the concatenation of two
//! non-empty nodes. Nodes are immutable and shared through `Arc`; narrowing
//! a leaf never copies its backing block, it only moves the window.

use std::{ops::Range, sync::Arc};

use once_cell::sync::Lazy;

use crate::{
    line_breaks::{self, LineBreakTable, LineBreakTableBuilder},
    page::{Page, PageManager},
    text::Line,
};

/// Joined nodes at most this long are merged into a single leaf instead of
/// a concatenation node, so that a long run of small edits does not
/// fragment the tree.
pub(crate) const MAX_CONSOLIDATED_LEN: usize = 200;

pub(crate) enum Node {
    Leaf(Leaf),
    Concat(Concat),
}

pub(crate) struct Leaf {
    source: Source,
    /// Window into the source, in characters.
    start: usize,
    len: usize,
    /// Line breaks of the whole source block, shared by every window.
    breaks: Arc<LineBreakTable>,
    /// Table indices of the breaks that intersect the window.
    break_range: Range<usize>,
}

#[derive(Clone)]
enum Source {
    Str { text: Arc<str>, ascii: bool },
    Chars(Arc<[char]>),
    Page(Arc<Page>),
}

pub(crate) struct Concat {
    left: Arc<Node>,
    right: Arc<Node>,
    len: usize,
    break_count: usize,
    depth: usize,
}

static EMPTY: Lazy<Arc<Node>> = Lazy::new(|| {
    Arc::new(Node::Leaf(Leaf {
        source: Source::Str {
            text: "".into(),
            ascii: true,
        },
        start: 0,
        len: 0,
        breaks: Arc::new(LineBreakTable::empty()),
        break_range: 0..0,
    }))
});

pub(crate) fn empty() -> Arc<Node> {
    Arc::clone(&EMPTY)
}

/// A leaf over the whole of `text`; scans its line breaks.
pub(crate) fn str_leaf(text: Arc<str>) -> Arc<Node> {
    let ascii = text.is_ascii();
    let (breaks, char_len) = line_breaks::scan_str(&text);
    let break_count = breaks.count();
    Arc::new(Node::Leaf(Leaf {
        source: Source::Str { text, ascii },
        start: 0,
        len: char_len,
        breaks: Arc::new(breaks),
        break_range: 0..break_count,
    }))
}

/// A leaf over a character block with a pre-built line break table.
pub(crate) fn chars_leaf(chars: Arc<[char]>, breaks: LineBreakTable) -> Arc<Node> {
    let len = chars.len();
    let break_count = breaks.count();
    Arc::new(Node::Leaf(Leaf {
        source: Source::Chars(chars),
        start: 0,
        len,
        breaks: Arc::new(breaks),
        break_range: 0..break_count,
    }))
}

/// A leaf over a freshly compressed page.
pub(crate) fn page_leaf(
    manager: &Arc<PageManager>,
    chars: Arc<[char]>,
    breaks: LineBreakTable,
) -> Arc<Node> {
    let len = chars.len();
    let break_count = breaks.count();
    let page = Page::new(manager, chars);
    Arc::new(Node::Leaf(Leaf {
        source: Source::Page(page),
        start: 0,
        len,
        breaks: Arc::new(breaks),
        break_range: 0..break_count,
    }))
}

impl Node {
    pub fn len(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.len,
            Node::Concat(concat) => concat.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn break_count(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.break_count(),
            Node::Concat(concat) => concat.break_count,
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Node::Leaf(_) => 0,
            Node::Concat(concat) => concat.depth,
        }
    }

    /// Character at `index`; the caller validates bounds.
    pub fn char_at(&self, index: usize) -> char {
        debug_assert!(index < self.len());
        match self {
            Node::Leaf(leaf) => leaf.char_at(index),
            Node::Concat(concat) => {
                let left_len = concat.left.len();
                if index < left_len {
                    concat.left.char_at(index)
                } else {
                    concat.right.char_at(index - left_len)
                }
            }
        }
    }

    pub fn first_char(&self) -> char {
        if self.is_empty() {
            '\0'
        } else {
            self.char_at(0)
        }
    }

    pub fn last_char(&self) -> char {
        if self.is_empty() {
            '\0'
        } else {
            self.char_at(self.len() - 1)
        }
    }

    /// Appends the characters in `range` to `out`.
    pub fn extend_string(&self, range: Range<usize>, out: &mut String) {
        debug_assert!(range.end <= self.len());
        match self {
            Node::Leaf(leaf) => leaf.extend_string(range, out),
            Node::Concat(concat) => {
                let left_len = concat.left.len();
                if range.end <= left_len {
                    concat.left.extend_string(range, out);
                } else if range.start >= left_len {
                    concat
                        .right
                        .extend_string(range.start - left_len..range.end - left_len, out);
                } else {
                    concat.left.extend_string(range.start..left_len, out);
                    concat.right.extend_string(0..range.end - left_len, out);
                }
            }
        }
    }

    /// Copies `dest.len()` characters starting at `from` into `dest`; the
    /// caller validates bounds.
    pub fn copy_to(&self, from: usize, dest: &mut [char]) {
        debug_assert!(from + dest.len() <= self.len());
        match self {
            Node::Leaf(leaf) => leaf.copy_to(from, dest),
            Node::Concat(concat) => {
                let left_len = concat.left.len();
                if from + dest.len() <= left_len {
                    concat.left.copy_to(from, dest);
                } else if from >= left_len {
                    concat.right.copy_to(from - left_len, dest);
                } else {
                    let split = left_len - from;
                    let (left_dest, right_dest) = dest.split_at_mut(split);
                    concat.left.copy_to(from, left_dest);
                    concat.right.copy_to(0, right_dest);
                }
            }
        }
    }

    /// Number of line breaks ending at or before `position`; `position` may
    /// equal the length, which maps to the total break count.
    pub fn line_of(&self, position: usize) -> usize {
        debug_assert!(position <= self.len());
        match self {
            Node::Leaf(leaf) => leaf.line_of(position),
            Node::Concat(concat) => {
                let left_len = concat.left.len();
                if position <= left_len {
                    concat.left.line_of(position)
                } else {
                    concat.left.break_count() + concat.right.line_of(position - left_len)
                }
            }
        }
    }

    /// Extent of line `number`; the caller validates `number <= break_count`.
    pub fn line(&self, number: usize) -> Line {
        debug_assert!(number <= self.break_count());
        match self {
            Node::Leaf(leaf) => leaf.line(number),
            Node::Concat(concat) => {
                let left_breaks = concat.left.break_count();
                if number < left_breaks {
                    return concat.left.line(number);
                }
                let right_number = number - left_breaks;
                let right_line = concat.right.line(right_number);
                let left_len = concat.left.len();
                let start = if right_number == 0 {
                    // The line straddles the seam; it begins where the last
                    // line of the left child begins.
                    concat.left.line(left_breaks).range.start
                } else {
                    left_len + right_line.range.start
                };
                Line {
                    range: start..left_len + right_line.range.end,
                    break_length: right_line.break_length,
                }
            }
        }
    }
}

/// Narrows `node` to `range` without copying character storage. The whole
/// range returns the node itself.
pub(crate) fn subtext(node: &Arc<Node>, range: Range<usize>) -> Arc<Node> {
    debug_assert!(range.start <= range.end && range.end <= node.len());
    if range.start == range.end {
        return empty();
    }
    if range == (0..node.len()) {
        return Arc::clone(node);
    }
    match &**node {
        Node::Leaf(leaf) => Arc::new(Node::Leaf(leaf.narrow(range))),
        Node::Concat(concat) => {
            let left_len = concat.left.len();
            if range.end <= left_len {
                subtext(&concat.left, range)
            } else if range.start >= left_len {
                subtext(&concat.right, range.start - left_len..range.end - left_len)
            } else {
                join(
                    subtext(&concat.left, range.start..left_len),
                    subtext(&concat.right, 0..range.end - left_len),
                )
            }
        }
    }
}

/// Joins two non-empty nodes: small results are consolidated into a single
/// leaf, larger ones become a concatenation node.
pub(crate) fn join(left: Arc<Node>, right: Arc<Node>) -> Arc<Node> {
    debug_assert!(!left.is_empty() && !right.is_empty());
    let len = left.len() + right.len();
    if len <= MAX_CONSOLIDATED_LEN {
        return consolidate(&left, &right);
    }
    let break_count = left.break_count() + right.break_count();
    let depth = 1 + left.depth().max(right.depth());
    Arc::new(Node::Concat(Concat {
        left,
        right,
        len,
        break_count,
        depth,
    }))
}

/// Merges two nodes into one character leaf, reusing both sides' line
/// break tables and fixing up only the breaks that straddle leaf seams. In
/// particular a `'\r'` ending the left side and a `'\n'` starting the
/// right become a single two-character break.
pub(crate) fn consolidate(left: &Arc<Node>, right: &Arc<Node>) -> Arc<Node> {
    if left.is_empty() {
        return Arc::clone(right);
    }
    if right.is_empty() {
        return Arc::clone(left);
    }
    let len = left.len() + right.len();
    let mut chars = vec!['\0'; len];
    left.copy_to(0, &mut chars[..left.len()]);
    right.copy_to(0, &mut chars[left.len()..]);

    let mut builder = LineBreakTableBuilder::for_block_len(len);
    let mut pending_cr = None;
    collect_breaks(left, 0, &mut builder, &mut pending_cr);
    collect_breaks(right, left.len(), &mut builder, &mut pending_cr);
    if let Some(offset) = pending_cr {
        builder.push(offset, 1);
    }

    chars_leaf(chars.into(), builder.finish())
}

/// Walks the leaves of `node` in order, re-emitting their line breaks at
/// absolute offsets. A one-character `'\r'` break at the very end of a
/// leaf is held back in `pending_cr`: if the next leaf starts with `'\n'`
/// the two halves merge into one CRLF break, otherwise the carriage
/// return stands alone.
fn collect_breaks(
    node: &Node,
    offset: usize,
    builder: &mut LineBreakTableBuilder,
    pending_cr: &mut Option<usize>,
) {
    match node {
        Node::Concat(concat) => {
            collect_breaks(&concat.left, offset, builder, pending_cr);
            collect_breaks(&concat.right, offset + concat.left.len(), builder, pending_cr);
        }
        Node::Leaf(leaf) => {
            if leaf.len == 0 {
                return;
            }
            let mut first = 0;
            if let Some(cr_offset) = pending_cr.take() {
                if leaf.char_at(0) == '\n' {
                    builder.push(cr_offset, 2);
                    // Skip the leaf's own record of that line feed.
                    first = 1;
                    debug_assert!(leaf.break_count() > 0 && leaf.break_start(0) == 0);
                } else {
                    builder.push(cr_offset, 1);
                }
            }
            for index in first..leaf.break_count() {
                let start = leaf.break_start(index);
                let end = leaf.break_end(index);
                if end == leaf.len && end - start == 1 && leaf.char_at(start) == '\r' {
                    *pending_cr = Some(offset + start);
                } else {
                    builder.push(offset + start, end - start);
                }
            }
        }
    }
}

impl Leaf {
    fn break_count(&self) -> usize {
        self.break_range.len()
    }

    /// Start offset of the `index`-th break intersecting the window,
    /// clipped to the window and relative to it.
    fn break_start(&self, index: usize) -> usize {
        let table_index = self.break_range.start + index;
        self.breaks.start(table_index).max(self.start) - self.start
    }

    /// Clipped end offset of the `index`-th break, relative to the window.
    fn break_end(&self, index: usize) -> usize {
        let table_index = self.break_range.start + index;
        self.breaks.end(table_index).min(self.start + self.len) - self.start
    }

    fn char_at(&self, index: usize) -> char {
        let offset = self.start + index;
        match &self.source {
            Source::Str { text, ascii: true } => text.as_bytes()[offset] as char,
            Source::Str { text, .. } => text
                .chars()
                .nth(offset)
                .expect("leaf window lies within its source"),
            Source::Chars(chars) => chars[offset],
            Source::Page(page) => page.expand()[offset],
        }
    }

    fn extend_string(&self, range: Range<usize>, out: &mut String) {
        let start = self.start + range.start;
        let end = self.start + range.end;
        match &self.source {
            Source::Str { text, ascii: true } => out.push_str(&text[start..end]),
            Source::Str { text, .. } => {
                let byte_start = byte_offset(text, start);
                let byte_end = byte_start + byte_offset(&text[byte_start..], end - start);
                out.push_str(&text[byte_start..byte_end]);
            }
            Source::Chars(chars) => out.extend(chars[start..end].iter()),
            Source::Page(page) => out.extend(page.expand()[start..end].iter()),
        }
    }

    fn copy_to(&self, from: usize, dest: &mut [char]) {
        let start = self.start + from;
        let end = start + dest.len();
        match &self.source {
            Source::Str { text, ascii: true } => {
                for (slot, byte) in dest.iter_mut().zip(text.as_bytes()[start..end].iter()) {
                    *slot = *byte as char;
                }
            }
            Source::Str { text, .. } => {
                for (slot, character) in dest.iter_mut().zip(text.chars().skip(start)) {
                    *slot = character;
                }
            }
            Source::Chars(chars) => dest.copy_from_slice(&chars[start..end]),
            Source::Page(page) => dest.copy_from_slice(&page.expand()[start..end]),
        }
    }

    /// A window over the same backing storage; the break range is found by
    /// binary search and breaks cut by the new boundaries stay listed,
    /// clipped at read time.
    fn narrow(&self, range: Range<usize>) -> Leaf {
        let window_start = self.start + range.start;
        let window_end = self.start + range.end;
        let first = lower_bound(self.break_range.clone(), |index| {
            self.breaks.end(index) > window_start
        });
        let last = lower_bound(first..self.break_range.end, |index| {
            self.breaks.start(index) >= window_end
        });
        Leaf {
            source: self.source.clone(),
            start: window_start,
            len: range.end - range.start,
            breaks: Arc::clone(&self.breaks),
            break_range: first..last,
        }
    }

    fn line_of(&self, position: usize) -> usize {
        lower_bound(0..self.break_count(), |index| self.break_end(index) > position)
    }

    fn line(&self, number: usize) -> Line {
        let start = if number == 0 {
            0
        } else {
            self.break_end(number - 1)
        };
        if number == self.break_count() {
            Line {
                range: start..self.len,
                break_length: 0,
            }
        } else {
            Line {
                range: start..self.break_start(number),
                break_length: self.break_end(number) - self.break_start(number),
            }
        }
    }
}

/// First index in `range` for which `predicate` holds; the predicate must
/// be monotone over the range.
fn lower_bound(range: Range<usize>, predicate: impl Fn(usize) -> bool) -> usize {
    let mut low = range.start;
    let mut high = range.end;
    while low < high {
        let middle = low + (high - low) / 2;
        if predicate(middle) {
            high = middle;
        } else {
            low = middle + 1;
        }
    }
    low
}

/// Byte offset of the `char_offset`-th character of `text`.
fn byte_offset(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map(|(index, _)| index)
        .unwrap_or(text.len())
}

/// Iterator over the characters of a node tree, leaf by leaf.
pub struct Chars<'a> {
    stack: Vec<&'a Node>,
    cursor: Option<LeafCursor<'a>>,
}

enum LeafCursor<'a> {
    Str(std::str::Chars<'a>),
    Slice(std::slice::Iter<'a, char>),
    Page { chars: Arc<[char]>, next: usize, end: usize },
}

impl<'a> Chars<'a> {
    pub(crate) fn over(node: &'a Node) -> Chars<'a> {
        let stack = if node.is_empty() { Vec::new() } else { vec![node] };
        Chars {
            stack,
            cursor: None,
        }
    }
}

impl<'a> Iterator for Chars<'a> {
    type Item = char;

    fn next(&mut self) -> Option<char> {
        loop {
            if let Some(cursor) = &mut self.cursor {
                let character = match cursor {
                    LeafCursor::Str(chars) => chars.next(),
                    LeafCursor::Slice(chars) => chars.next().copied(),
                    LeafCursor::Page { chars, next, end } => {
                        if next < end {
                            let character = chars[*next];
                            *next += 1;
                            Some(character)
                        } else {
                            None
                        }
                    }
                };
                match character {
                    Some(character) => return Some(character),
                    None => self.cursor = None,
                }
            }
            match self.stack.pop()? {
                Node::Concat(concat) => {
                    self.stack.push(&concat.right);
                    self.stack.push(&concat.left);
                }
                Node::Leaf(leaf) => {
                    let start = leaf.start;
                    let end = leaf.start + leaf.len;
                    self.cursor = Some(match &leaf.source {
                        Source::Str { text, ascii: true } => {
                            LeafCursor::Str(text[start..end].chars())
                        }
                        Source::Str { text, .. } => {
                            let byte_start = byte_offset(text, start);
                            let byte_end =
                                byte_start + byte_offset(&text[byte_start..], leaf.len);
                            LeafCursor::Str(text[byte_start..byte_end].chars())
                        }
                        Source::Chars(chars) => LeafCursor::Slice(chars[start..end].iter()),
                        Source::Page(page) => LeafCursor::Page {
                            chars: page.expand(),
                            next: start,
                            end,
                        },
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(text: &str) -> Arc<Node> {
        str_leaf(text.into())
    }

    #[test]
    fn empty_node_properties() {
        let node = empty();
        assert_eq!(node.len(), 0);
        assert_eq!(node.break_count(), 0);
        assert_eq!(node.depth(), 0);
        assert_eq!(node.first_char(), '\0');
        assert_eq!(node.last_char(), '\0');
    }

    #[test]
    fn leaf_character_access() {
        let node = leaf("hello\nworld");
        assert_eq!(node.len(), 11);
        assert_eq!(node.break_count(), 1);
        assert_eq!(node.char_at(0), 'h');
        assert_eq!(node.char_at(5), '\n');
        assert_eq!(node.last_char(), 'd');
    }

    #[test]
    fn narrowing_shares_backing_and_clips_breaks() {
        let node = leaf("one\r\ntwo\r\nthree");
        // Cut through the middle of the first CRLF: each half behaves as a
        // one-character break on its side.
        let front = subtext(&node, 0..4);
        assert_eq!(front.break_count(), 1);
        assert_eq!(front.line(0), Line { range: 0..3, break_length: 1 });
        let back = subtext(&node, 4..15);
        assert_eq!(back.break_count(), 2);
        assert_eq!(back.line(0), Line { range: 0..0, break_length: 1 });
        assert_eq!(back.line(1), Line { range: 1..4, break_length: 2 });
        assert_eq!(back.line(2), Line { range: 6..11, break_length: 0 });
    }

    #[test]
    fn join_small_nodes_consolidates() {
        let joined = join(leaf("abc\r"), leaf("\ndef"));
        assert!(matches!(&*joined, Node::Leaf(_)));
        assert_eq!(joined.break_count(), 1);
        let mut out = String::new();
        joined.extend_string(0..joined.len(), &mut out);
        assert_eq!(out, "abc\r\ndef");
        assert_eq!(joined.line(0), Line { range: 0..3, break_length: 2 });
        assert_eq!(joined.line(1), Line { range: 5..8, break_length: 0 });
    }

    #[test]
    fn join_large_nodes_concatenates() {
        let left = leaf(&"a".repeat(150));
        let right = leaf(&"b".repeat(150));
        let joined = join(left, right);
        assert!(matches!(&*joined, Node::Concat(_)));
        assert_eq!(joined.len(), 300);
        assert_eq!(joined.depth(), 1);
        assert_eq!(joined.char_at(149), 'a');
        assert_eq!(joined.char_at(150), 'b');
    }

    #[test]
    fn consolidate_merges_cr_lf_seam_across_trees() {
        let left = join(leaf(&"x\n".repeat(80)), leaf("tail\r"));
        let right = join(leaf("\nhead"), leaf(&"y\n".repeat(80)));
        let merged = consolidate(&left, &right);
        // 80 + 1 (the merged CRLF) + 1 (the LF after "head"... part of the
        // repeated block) + 79 remaining breaks on the right.
        assert_eq!(merged.break_count(), 80 + 1 + 80);
        let seam_line = merged.line(80);
        assert_eq!(merged.len(), 160 + 5 + 5 + 160);
        assert_eq!(seam_line.break_length, 2);
        let mut out = String::new();
        merged.extend_string(0..merged.len(), &mut out);
        assert_eq!(out, format!("{}tail\r\nhead{}", "x\n".repeat(80), "y\n".repeat(80)));
    }

    #[test]
    fn consolidate_keeps_lone_trailing_cr() {
        let merged = consolidate(&leaf("abc\r"), &leaf("def\r"));
        assert_eq!(merged.break_count(), 2);
        assert_eq!(merged.line(0), Line { range: 0..3, break_length: 1 });
        assert_eq!(merged.line(1), Line { range: 4..7, break_length: 1 });
    }

    #[test]
    fn line_lookup_over_concat() {
        let node = join(leaf(&format!("{}first\n", "a\n".repeat(70))), leaf(&format!("second\n{}", "b\n".repeat(70))));
        assert!(matches!(&*node, Node::Concat(_)));
        let total_breaks = node.break_count();
        assert_eq!(total_breaks, 142);
        // The line straddling the seam is the one numbered by the left
        // child's break count.
        let seam = node.line(71);
        let mut out = String::new();
        node.extend_string(seam.range.clone(), &mut out);
        assert_eq!(out, "second");
        assert_eq!(seam.break_length, 1);
        for position in [0, 1, 140, 141, node.len()] {
            let number = node.line_of(position);
            let line = node.line(number);
            assert!(
                (line.range.start <= position && position <= line.range.end + line.break_length)
                    || position == node.len()
            );
        }
    }

    #[test]
    fn page_backed_leaf_survives_reclamation() {
        let source = "compressed\r\ncontent with ünicode\nand more lines\n".repeat(40);
        let (breaks, char_len) = line_breaks::scan_str(&source);
        let chars: Arc<[char]> = source.chars().collect::<Vec<char>>().into();
        let manager = PageManager::new(2);
        let node = page_leaf(&manager, chars, breaks);
        assert_eq!(node.len(), char_len);

        let mut before = String::new();
        node.extend_string(0..node.len(), &mut before);
        let line_before = node.line(40);
        manager.release_all();
        let mut after = String::new();
        node.extend_string(0..node.len(), &mut after);
        assert_eq!(before, after);
        assert_eq!(after, source);
        assert_eq!(node.line(40), line_before);
    }

    #[test]
    fn narrowed_page_leaf_reads_through_the_window() {
        let source = "0123456789".repeat(30);
        let (breaks, _) = line_breaks::scan_str(&source);
        let chars: Arc<[char]> = source.chars().collect::<Vec<char>>().into();
        let manager = PageManager::new(2);
        let node = page_leaf(&manager, chars, breaks);
        let window = subtext(&node, 95..105);
        assert_eq!(window.len(), 10);
        assert_eq!(window.char_at(0), '5');
        let mut out = String::new();
        window.extend_string(0..10, &mut out);
        assert_eq!(out, "5678901234");
    }

    #[test]
    fn chars_iterator_walks_leaves_in_order() {
        let node = join(leaf(&"αβ".repeat(60)), leaf(&"cd".repeat(60)));
        let collected: String = Chars::over(&node).collect();
        assert_eq!(collected, format!("{}{}", "αβ".repeat(60), "cd".repeat(60)));
    }
}
