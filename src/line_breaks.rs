//! Line break bookkeeping for blocks of text.
//!
//! Every leaf of a [`Text`](crate::Text) carries a [`LineBreakTable`]: a
//! packed, sorted sequence of the line breaks found in its backing block.
//! Tables are built once, while a block is scanned, and shared by every
//! narrowed window over that block afterwards.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// The recognised newline sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NewlineKind {
    /// `"\r\n"`
    CrLf,
    /// `'\r'`
    Cr,
    /// `'\n'`
    Lf,
    /// Next line, `U+0085`
    Nel,
    /// Line separator, `U+2028`
    Ls,
    /// Paragraph separator, `U+2029`
    Ps,
}

impl NewlineKind {
    /// Number of characters the sequence occupies.
    pub fn len(self) -> usize {
        match self {
            NewlineKind::CrLf => 2,
            _ => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NewlineKind::CrLf => "\r\n",
            NewlineKind::Cr => "\r",
            NewlineKind::Lf => "\n",
            NewlineKind::Nel => "\u{0085}",
            NewlineKind::Ls => "\u{2028}",
            NewlineKind::Ps => "\u{2029}",
        }
    }
}

/// Classifies the newline sequence starting at `character`, given the
/// character that follows it (if any).
pub(crate) fn classify(character: char, next: Option<char>) -> Option<NewlineKind> {
    match character {
        '\r' if next == Some('\n') => Some(NewlineKind::CrLf),
        '\r' => Some(NewlineKind::Cr),
        '\n' => Some(NewlineKind::Lf),
        '\u{0085}' => Some(NewlineKind::Nel),
        '\u{2028}' => Some(NewlineKind::Ls),
        '\u{2029}' => Some(NewlineKind::Ps),
        _ => None,
    }
}

/// Offsets below this bound fit the compact encoding (15 bits plus the
/// two-character flag).
const COMPACT_MAX_LEN: usize = 1 << 15;

/// A packed table of line breaks within one block of text.
///
/// Each entry encodes the break's start offset (in characters, relative to
/// the block) and whether it is a two-character break (CRLF). Entries are
/// strictly increasing and non-overlapping.
#[derive(Debug, Clone)]
pub(crate) struct LineBreakTable {
    entries: Encoding,
}

#[derive(Debug, Clone)]
enum Encoding {
    Compact(Box<[u16]>),
    Wide(Box<[u32]>),
}

impl LineBreakTable {
    pub fn empty() -> LineBreakTable {
        LineBreakTable {
            entries: Encoding::Compact(Box::new([])),
        }
    }

    pub fn count(&self) -> usize {
        match &self.entries {
            Encoding::Compact(entries) => entries.len(),
            Encoding::Wide(entries) => entries.len(),
        }
    }

    /// Start offset of the `index`-th break.
    pub fn start(&self, index: usize) -> usize {
        match &self.entries {
            Encoding::Compact(entries) => (entries[index] >> 1) as usize,
            Encoding::Wide(entries) => (entries[index] >> 1) as usize,
        }
    }

    /// Length in characters (1 or 2) of the `index`-th break.
    pub fn break_len(&self, index: usize) -> usize {
        let two = match &self.entries {
            Encoding::Compact(entries) => entries[index] & 1 == 1,
            Encoding::Wide(entries) => entries[index] & 1 == 1,
        };
        if two {
            2
        } else {
            1
        }
    }

    /// End offset (exclusive) of the `index`-th break.
    pub fn end(&self, index: usize) -> usize {
        self.start(index) + self.break_len(index)
    }
}

/// Incremental [`LineBreakTable`] construction over pooled scratch arrays.
///
/// The encoding is picked from the length of the owning block: blocks whose
/// offsets fit in 15 bits use the compact `u16` form. `finish` trims the
/// scratch into an exactly-sized table and hands the scratch back to the
/// pool, so loading many blocks reuses a single allocation per size class.
pub(crate) struct LineBreakTableBuilder {
    scratch: Scratch,
}

enum Scratch {
    Compact(Vec<u16>),
    Wide(Vec<u32>),
}

impl LineBreakTableBuilder {
    pub fn for_block_len(block_len: usize) -> LineBreakTableBuilder {
        let scratch = if block_len <= COMPACT_MAX_LEN {
            Scratch::Compact(COMPACT_POOL.take())
        } else {
            Scratch::Wide(WIDE_POOL.take())
        };
        LineBreakTableBuilder { scratch }
    }

    pub fn push(&mut self, offset: usize, break_len: usize) {
        debug_assert!(break_len == 1 || break_len == 2);
        let two = (break_len == 2) as usize;
        match &mut self.scratch {
            Scratch::Compact(entries) => {
                debug_assert!(offset < COMPACT_MAX_LEN);
                entries.push(((offset << 1) | two) as u16);
            }
            Scratch::Wide(entries) => entries.push(((offset << 1) | two) as u32),
        }
    }

    pub fn finish(self) -> LineBreakTable {
        let entries = match self.scratch {
            Scratch::Compact(scratch) => {
                let entries = Encoding::Compact(scratch.as_slice().into());
                COMPACT_POOL.put(scratch);
                entries
            }
            Scratch::Wide(scratch) => {
                let entries = Encoding::Wide(scratch.as_slice().into());
                WIDE_POOL.put(scratch);
                entries
            }
        };
        LineBreakTable { entries }
    }
}

/// Scans a string and records its line breaks at character offsets.
///
/// Returns the table together with the character length of the string.
pub(crate) fn scan_str(text: &str) -> (LineBreakTable, usize) {
    // Byte length is an upper bound on any character offset.
    let mut builder = LineBreakTableBuilder::for_block_len(text.len());
    let mut characters = text.chars().peekable();
    let mut offset = 0;
    while let Some(character) = characters.next() {
        match classify(character, characters.peek().copied()) {
            Some(kind) => {
                builder.push(offset, kind.len());
                if kind == NewlineKind::CrLf {
                    characters.next();
                }
                offset += kind.len();
            }
            None => offset += 1,
        }
    }
    (builder.finish(), offset)
}

/// A single free slot holding the largest scratch array returned so far.
///
/// Updates race benignly: `try_lock` never blocks and a lost race only
/// forfeits a pooling opportunity, never correctness.
struct Pool<T>(Lazy<Mutex<Option<Vec<T>>>>);

impl<T> Pool<T> {
    fn take(&self) -> Vec<T> {
        self.0
            .try_lock()
            .and_then(|mut slot| slot.take())
            .map(|mut scratch| {
                scratch.clear();
                scratch
            })
            .unwrap_or_default()
    }

    fn put(&self, scratch: Vec<T>) {
        if let Some(mut slot) = self.0.try_lock() {
            match slot.as_ref() {
                Some(held) if held.capacity() >= scratch.capacity() => {}
                _ => *slot = Some(scratch),
            }
        }
    }
}

static COMPACT_POOL: Pool<u16> = Pool(Lazy::new(|| Mutex::new(None)));
static WIDE_POOL: Pool<u32> = Pool(Lazy::new(|| Mutex::new(None)));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_all_kinds() {
        assert_eq!(classify('\r', Some('\n')), Some(NewlineKind::CrLf));
        assert_eq!(classify('\r', Some('x')), Some(NewlineKind::Cr));
        assert_eq!(classify('\r', None), Some(NewlineKind::Cr));
        assert_eq!(classify('\n', Some('\r')), Some(NewlineKind::Lf));
        assert_eq!(classify('\u{0085}', None), Some(NewlineKind::Nel));
        assert_eq!(classify('\u{2028}', None), Some(NewlineKind::Ls));
        assert_eq!(classify('\u{2029}', None), Some(NewlineKind::Ps));
        assert_eq!(classify('a', Some('\n')), None);
    }

    #[test]
    fn scan_mixed_breaks() {
        let (table, char_len) = scan_str("ab\r\ncd\ref\ngh");
        assert_eq!(char_len, 12);
        assert_eq!(table.count(), 3);
        assert_eq!((table.start(0), table.break_len(0)), (2, 2));
        assert_eq!((table.start(1), table.break_len(1)), (6, 1));
        assert_eq!((table.start(2), table.break_len(2)), (9, 1));
    }

    #[test]
    fn scan_counts_characters_not_bytes() {
        let (table, char_len) = scan_str("héllo\u{2028}wörld");
        assert_eq!(char_len, 11);
        assert_eq!(table.count(), 1);
        assert_eq!(table.start(0), 5);
        assert_eq!(table.break_len(0), 1);
    }

    #[test]
    fn entries_are_strictly_increasing() {
        let (table, _) = scan_str("\n\r\n\r\r\n");
        let mut previous_end = 0;
        for index in 0..table.count() {
            assert!(table.start(index) >= previous_end);
            previous_end = table.end(index);
        }
        assert_eq!(table.count(), 4);
    }

    #[test]
    fn wide_encoding_for_large_blocks() {
        let mut builder = LineBreakTableBuilder::for_block_len(COMPACT_MAX_LEN + 1);
        builder.push(COMPACT_MAX_LEN + 100, 2);
        let table = builder.finish();
        assert_eq!(table.start(0), COMPACT_MAX_LEN + 100);
        assert_eq!(table.break_len(0), 2);
    }

    #[test]
    fn pool_reuses_scratch() {
        let mut builder = LineBreakTableBuilder::for_block_len(16);
        for offset in 0..8 {
            builder.push(offset * 2, 1);
        }
        builder.finish();
        // The next builder of the same size class starts from the pooled
        // scratch; observable only through capacity, which is not part of
        // the contract. Just check that a fresh build still works.
        let (table, _) = scan_str("a\nb");
        assert_eq!(table.count(), 1);
    }
}
