//! The public immutable text value.
//!
//! A [`Text`] is a persistent rope: every transformation returns a new
//! value, sharing unchanged subtrees with the original. Clones are cheap
//! (one `Arc`), and any number of threads may read the same value
//! concurrently because it is never mutated after construction.

use std::{fmt, ops::Range, sync::Arc};

use once_cell::sync::Lazy;
use smallvec::SmallVec;

use crate::{
    error::{Error, Result},
    line_breaks::LineBreakTable,
    node::{self, Chars, Node},
    page::PageManager,
};

/// Immutable text, structurally shared across edits and snapshots.
#[derive(Clone)]
pub struct Text {
    node: Arc<Node>,
}

/// The extent of one line: the characters of the line itself, then
/// `break_length` characters of line break (0 for the final line).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub range: Range<usize>,
    pub break_length: usize,
}

static EMPTY: Lazy<Text> = Lazy::new(|| Text { node: node::empty() });

/// Maximum characters per string-backed leaf; longer inputs are split so
/// that character-offset arithmetic inside a leaf stays bounded.
const STR_CHUNK_LEN: usize = 16 * 1024;

impl Text {
    /// Builds a text from a string. The empty string returns the shared
    /// empty singleton.
    pub fn new(text: &str) -> Text {
        if text.is_empty() {
            return Text::empty();
        }
        // A byte length within the chunk bound implies the character
        // length is too.
        if text.len() <= STR_CHUNK_LEN {
            return Text {
                node: node::str_leaf(text.into()),
            };
        }
        let mut leaves = Vec::with_capacity(text.len() / STR_CHUNK_LEN + 1);
        let mut rest = text;
        while !rest.is_empty() {
            let mut split = rest
                .char_indices()
                .nth(STR_CHUNK_LEN)
                .map(|(index, _)| index)
                .unwrap_or(rest.len());
            // Never split a CRLF pair across leaves.
            if rest[..split].ends_with('\r') && rest[split..].starts_with('\n') {
                split += 1;
            }
            leaves.push(Text {
                node: node::str_leaf(rest[..split].into()),
            });
            rest = &rest[split..];
        }
        balance(leaves)
    }

    /// The shared empty text.
    pub fn empty() -> Text {
        EMPTY.clone()
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_empty()
    }

    /// Number of line breaks; the number of lines is one more.
    pub fn line_break_count(&self) -> usize {
        self.node.break_count()
    }

    /// Height of the underlying tree; 0 for a single leaf.
    pub fn depth(&self) -> usize {
        self.node.depth()
    }

    /// First character, `'\0'` iff the text is empty.
    pub fn first_char(&self) -> char {
        self.node.first_char()
    }

    /// Last character, `'\0'` iff the text is empty.
    pub fn last_char(&self) -> char {
        self.node.last_char()
    }

    pub fn char_at(&self, index: usize) -> Result<char> {
        if index >= self.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                len: self.len(),
            });
        }
        Ok(self.node.char_at(index))
    }

    /// The characters in `range` as a string.
    pub fn slice_to_string(&self, range: Range<usize>) -> Result<String> {
        self.check_range(&range)?;
        let mut out = String::with_capacity(range.len());
        self.node.extend_string(range, &mut out);
        Ok(out)
    }

    /// Copies the characters in `range` into the front of `dest`.
    pub fn copy_to(&self, range: Range<usize>, dest: &mut [char]) -> Result<()> {
        self.check_range(&range)?;
        if dest.len() < range.len() {
            return Err(Error::DestinationTooSmall {
                count: range.len(),
                dest_len: dest.len(),
            });
        }
        let count = range.len();
        self.node.copy_to(range.start, &mut dest[..count]);
        Ok(())
    }

    /// The characters in `range` as a freshly allocated array.
    pub fn to_chars(&self, range: Range<usize>) -> Result<Vec<char>> {
        self.check_range(&range)?;
        let mut chars = vec!['\0'; range.len()];
        self.node.copy_to(range.start, &mut chars);
        Ok(chars)
    }

    /// The line number containing `position`; `position == len()` maps to
    /// the final line.
    pub fn line_of(&self, position: usize) -> Result<usize> {
        if position > self.len() {
            return Err(Error::PositionOutOfBounds {
                position,
                len: self.len(),
            });
        }
        Ok(self.node.line_of(position))
    }

    /// The extent of line `number`; the implicit final line after the last
    /// break has `break_length == 0`.
    pub fn line(&self, number: usize) -> Result<Line> {
        if number > self.line_break_count() {
            return Err(Error::LineOutOfBounds {
                line: number,
                line_breaks: self.line_break_count(),
            });
        }
        Ok(self.node.line(number))
    }

    /// Iterator over the characters.
    pub fn chars(&self) -> Chars<'_> {
        Chars::over(&self.node)
    }

    /// The text in `range`, sharing backing storage with `self`. The full
    /// range returns `self` unchanged.
    pub fn subtext(&self, range: Range<usize>) -> Result<Text> {
        self.check_range(&range)?;
        Ok(Text {
            node: node::subtext(&self.node, range),
        })
    }

    /// A new text with `text` inserted at `position`.
    pub fn insert(&self, position: usize, text: &Text) -> Result<Text> {
        if position > self.len() {
            return Err(Error::PositionOutOfBounds {
                position,
                len: self.len(),
            });
        }
        let prefix = Text {
            node: node::subtext(&self.node, 0..position),
        };
        let suffix = Text {
            node: node::subtext(&self.node, position..self.len()),
        };
        Ok(assemble([prefix, text.clone(), suffix]))
    }

    pub fn insert_str(&self, position: usize, text: &str) -> Result<Text> {
        self.insert(position, &Text::new(text))
    }

    /// A new text with the characters in `range` removed.
    pub fn delete(&self, range: Range<usize>) -> Result<Text> {
        self.check_range(&range)?;
        let prefix = Text {
            node: node::subtext(&self.node, 0..range.start),
        };
        let suffix = Text {
            node: node::subtext(&self.node, range.end..self.len()),
        };
        Ok(assemble([prefix, suffix]))
    }

    /// A new text with the characters in `range` replaced by `text`.
    /// Equivalent to delete-then-insert, built as one three-way assembly.
    pub fn replace(&self, range: Range<usize>, text: &Text) -> Result<Text> {
        self.check_range(&range)?;
        let prefix = Text {
            node: node::subtext(&self.node, 0..range.start),
        };
        let suffix = Text {
            node: node::subtext(&self.node, range.end..self.len()),
        };
        Ok(assemble([prefix, text.clone(), suffix]))
    }

    pub fn replace_str(&self, range: Range<usize>, text: &str) -> Result<Text> {
        self.replace(range, &Text::new(text))
    }

    /// A new text with `text` appended.
    pub fn append(&self, text: &Text) -> Text {
        assemble([self.clone(), text.clone()])
    }

    /// Merges two fully built texts into a single leaf, reusing their line
    /// break tables and fixing up only the seam. A `'\r'` ending `left`
    /// and a `'\n'` starting `right` become one two-character break.
    pub fn consolidate(left: &Text, right: &Text) -> Text {
        Text {
            node: node::consolidate(&left.node, &right.node),
        }
    }

    /// Whether two texts share the same root node (and therefore the same
    /// content for free).
    pub fn ptr_eq(left: &Text, right: &Text) -> bool {
        Arc::ptr_eq(&left.node, &right.node)
    }

    pub(crate) fn from_chars_block(chars: Arc<[char]>, breaks: LineBreakTable) -> Text {
        Text {
            node: node::chars_leaf(chars, breaks),
        }
    }

    pub(crate) fn from_page_block(
        manager: &Arc<PageManager>,
        chars: Arc<[char]>,
        breaks: LineBreakTable,
    ) -> Text {
        Text {
            node: node::page_leaf(manager, chars, breaks),
        }
    }

    fn check_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > self.len() {
            return Err(Error::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                len: self.len(),
            });
        }
        Ok(())
    }
}

impl Default for Text {
    fn default() -> Text {
        Text::empty()
    }
}

impl From<&str> for Text {
    fn from(text: &str) -> Text {
        Text::new(text)
    }
}

impl fmt::Display for Text {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        let mut out = String::with_capacity(self.len());
        self.node.extend_string(0..self.len(), &mut out);
        formatter.write_str(&out)
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_struct("Text")
            .field("len", &self.len())
            .field("line_breaks", &self.line_break_count())
            .field("depth", &self.depth())
            .finish()
    }
}

/// Joins up to three pieces, eliding empty ones. A sole surviving piece is
/// returned unchanged (no wrapping node). With three pieces the smaller of
/// the outer two is nested together with the middle first, which keeps
/// localised edits from deepening the larger side.
fn assemble<const N: usize>(pieces: [Text; N]) -> Text {
    let mut pieces: SmallVec<[Text; 3]> = pieces
        .into_iter()
        .filter(|piece| !piece.is_empty())
        .collect();
    match pieces.len() {
        0 => Text::empty(),
        1 => pieces.swap_remove(0),
        2 => {
            let right = pieces.pop().expect("two pieces");
            let left = pieces.pop().expect("two pieces");
            join(left, right)
        }
        _ => {
            let right = pieces.pop().expect("three pieces");
            let middle = pieces.pop().expect("three pieces");
            let left = pieces.pop().expect("three pieces");
            if left.len() < right.len() {
                join(join(left, middle), right)
            } else {
                join(left, join(middle, right))
            }
        }
    }
}

fn join(left: Text, right: Text) -> Text {
    Text {
        node: node::join(left.node, right.node),
    }
}

/// Pairwise bottom-up assembly of loaded leaves into a balanced tree.
pub(crate) fn balance(mut leaves: Vec<Text>) -> Text {
    if leaves.is_empty() {
        return Text::empty();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        let mut pairs = leaves.into_iter();
        while let Some(left) = pairs.next() {
            match pairs.next() {
                Some(right) => next.push(join(left, right)),
                None => next.push(left),
            }
        }
        leaves = next;
    }
    leaves.pop().expect("at least one leaf")
}
