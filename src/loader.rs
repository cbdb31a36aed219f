//! Streaming construction of a [`Text`] from a character source.
//!
//! The loader reads fixed-size blocks, builds a line break table per block
//! while gathering newline and leading-whitespace statistics, and decides
//! per block whether the characters are worth compressing into a page.
//! Text decoding is the caller's concern: the source already yields
//! characters.

use std::sync::Arc;

use crate::{
    error::{Error, Result},
    line_breaks::{self, LineBreakTableBuilder, NewlineKind},
    page::PageManager,
    text::{self, Text},
};

/// Tuning knobs for [`load`]. The defaults match interactive editing of
/// ordinary files; hosts loading very large documents may want a larger
/// residency bound.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Characters per block while the document stays below the compressed
    /// storage threshold.
    pub block_size: usize,
    /// Expected sizes at or above this switch the loader to page-sized,
    /// compressed blocks.
    pub compressed_storage_threshold: usize,
    /// Characters per block once compression is active.
    pub compressed_page_size: usize,
    /// Blocks smaller than this are not worth compressing and stay plain
    /// character arrays even when compression is active.
    pub min_compressed_block_size: usize,
    /// How many decompressed pages the MRU keeps warm.
    pub max_resident_pages: usize,
    /// Reject embedded NUL characters instead of treating them as content.
    pub reject_nuls: bool,
}

impl Default for LoadOptions {
    fn default() -> LoadOptions {
        LoadOptions {
            block_size: 16 * 1024,
            compressed_storage_threshold: 4 * 1024 * 1024,
            compressed_page_size: 1024 * 1024,
            min_compressed_block_size: 4 * 1024,
            max_resident_pages: 8,
            reject_nuls: false,
        }
    }
}

/// Counts of each recognised newline kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NewlineCounts {
    pub crlf: usize,
    pub cr: usize,
    pub lf: usize,
    pub nel: usize,
    pub ls: usize,
    pub ps: usize,
}

impl NewlineCounts {
    pub fn total(&self) -> usize {
        self.crlf + self.cr + self.lf + self.nel + self.ls + self.ps
    }

    /// Whether every line break in the stream was of one kind.
    pub fn is_consistent(&self) -> bool {
        let kinds = [self.crlf, self.cr, self.lf, self.nel, self.ls, self.ps];
        kinds.iter().filter(|&&count| count > 0).count() <= 1
    }

    /// The most frequent newline kind, if any were seen. Ties go to the
    /// earlier kind in declaration order.
    pub fn dominant(&self) -> Option<NewlineKind> {
        let kinds = [
            (NewlineKind::CrLf, self.crlf),
            (NewlineKind::Cr, self.cr),
            (NewlineKind::Lf, self.lf),
            (NewlineKind::Nel, self.nel),
            (NewlineKind::Ls, self.ls),
            (NewlineKind::Ps, self.ps),
        ];
        kinds
            .iter()
            .filter(|(_, count)| *count > 0)
            .max_by_key(|(_, count)| *count)
            .map(|(kind, _)| *kind)
    }

    fn record(&mut self, kind: NewlineKind) {
        match kind {
            NewlineKind::CrLf => self.crlf += 1,
            NewlineKind::Cr => self.cr += 1,
            NewlineKind::Lf => self.lf += 1,
            NewlineKind::Nel => self.nel += 1,
            NewlineKind::Ls => self.ls += 1,
            NewlineKind::Ps => self.ps += 1,
        }
    }
}

/// How lines begin, for inferring the document's indent style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeadingWhitespaceCounts {
    /// Lines starting with a space.
    pub space: usize,
    /// Lines starting with a tab.
    pub tab: usize,
    /// Lines starting with any other printable character.
    pub printable: usize,
    /// Lines consisting solely of a line break.
    pub empty: usize,
}

impl LeadingWhitespaceCounts {
    /// Whether indented lines lean towards tabs. `None` when no line is
    /// indented at all.
    pub fn prefers_tabs(&self) -> Option<bool> {
        if self.space == 0 && self.tab == 0 {
            None
        } else {
            Some(self.tab > self.space)
        }
    }
}

/// What [`load`] observed about the stream, alongside the text itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub newlines: NewlineCounts,
    pub leading_whitespace: LeadingWhitespaceCounts,
    /// Length in characters of the longest line, excluding its break.
    pub longest_line_len: usize,
}

impl LoadStats {
    pub fn has_consistent_line_endings(&self) -> bool {
        self.newlines.is_consistent()
    }
}

/// Loads a character stream into a [`Text`].
///
/// `size_hint` is the expected total character count; it only influences
/// the block size and whether pages are compressed, never correctness.
/// Blocks never split a CRLF pair: a block ending in `'\r'` absorbs a
/// following `'\n'` before it is finalised.
pub fn load<I>(source: I, size_hint: usize, options: &LoadOptions) -> Result<(Text, LoadStats)>
where
    I: IntoIterator<Item = char>,
{
    let mut source = source.into_iter().peekable();
    let paged = size_hint >= options.compressed_storage_threshold;
    let block_size = if paged {
        options.compressed_page_size
    } else {
        options.block_size
    };
    let manager = if paged {
        Some(PageManager::new(options.max_resident_pages))
    } else {
        None
    };

    let mut leaves: Vec<Text> = Vec::new();
    let mut stats = LoadStats::default();
    let mut tracker = LineTracker::default();
    let mut offset = 0;

    loop {
        let mut block: Vec<char> = Vec::with_capacity(block_size.min(size_hint.max(1)));
        while block.len() < block_size {
            match source.next() {
                Some(character) => block.push(character),
                None => break,
            }
        }
        if block.last() == Some(&'\r') && source.peek() == Some(&'\n') {
            block.push(source.next().expect("peeked line feed"));
        }
        if block.is_empty() {
            break;
        }

        let mut builder = LineBreakTableBuilder::for_block_len(block.len());
        let mut index = 0;
        while index < block.len() {
            let character = block[index];
            if options.reject_nuls && character == '\0' {
                return Err(Error::InvalidCharacter {
                    offset: offset + index,
                });
            }
            // CRLF pairs are never split across blocks, so looking ahead
            // within the block is enough.
            match line_breaks::classify(character, block.get(index + 1).copied()) {
                Some(kind) => {
                    builder.push(index, kind.len());
                    tracker.record_break(kind, &mut stats);
                    index += kind.len();
                }
                None => {
                    tracker.record_char(character, &mut stats);
                    index += 1;
                }
            }
        }
        offset += block.len();

        let block_len = block.len();
        let chars: Arc<[char]> = block.into();
        let breaks = builder.finish();
        let leaf = match &manager {
            Some(manager) if block_len >= options.min_compressed_block_size => {
                Text::from_page_block(manager, chars, breaks)
            }
            _ => Text::from_chars_block(chars, breaks),
        };
        leaves.push(leaf);
    }

    tracker.finish(&mut stats);
    log::debug!(
        "loaded {} characters in {} blocks ({} line breaks, compression {})",
        offset,
        leaves.len(),
        stats.newlines.total(),
        if paged { "on" } else { "off" }
    );
    Ok((text::balance(leaves), stats))
}

/// Loads an in-memory string with the stream machinery, mostly useful for
/// forcing compressed storage via `options`.
pub fn load_str(source: &str, options: &LoadOptions) -> Result<(Text, LoadStats)> {
    load(source.chars(), source.len(), options)
}

/// Per-line scanning state carried across blocks.
struct LineTracker {
    at_line_start: bool,
    current_line_len: usize,
}

impl Default for LineTracker {
    fn default() -> LineTracker {
        LineTracker {
            // The first character of the stream starts a line.
            at_line_start: true,
            current_line_len: 0,
        }
    }
}

impl LineTracker {
    fn record_char(&mut self, character: char, stats: &mut LoadStats) {
        if self.at_line_start {
            match character {
                ' ' => stats.leading_whitespace.space += 1,
                '\t' => stats.leading_whitespace.tab += 1,
                _ => stats.leading_whitespace.printable += 1,
            }
            self.at_line_start = false;
        }
        self.current_line_len += 1;
    }

    fn record_break(&mut self, kind: NewlineKind, stats: &mut LoadStats) {
        if self.at_line_start {
            stats.leading_whitespace.empty += 1;
        }
        stats.newlines.record(kind);
        stats.longest_line_len = stats.longest_line_len.max(self.current_line_len);
        self.current_line_len = 0;
        self.at_line_start = true;
    }

    fn finish(&mut self, stats: &mut LoadStats) {
        stats.longest_line_len = stats.longest_line_len.max(self.current_line_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_blocks() -> LoadOptions {
        LoadOptions {
            block_size: 8,
            ..LoadOptions::default()
        }
    }

    fn compressed() -> LoadOptions {
        LoadOptions {
            block_size: 512,
            compressed_storage_threshold: 1024,
            compressed_page_size: 4 * 1024,
            min_compressed_block_size: 64,
            max_resident_pages: 4,
            reject_nuls: false,
        }
    }

    #[test]
    fn empty_stream() {
        let (text, stats) = load_str("", &LoadOptions::default()).unwrap();
        assert!(text.is_empty());
        assert_eq!(stats, LoadStats::default());
    }

    #[test]
    fn round_trips_across_blocks() {
        let source = "The first line\nand the second\r\nand a third";
        let (text, _) = load_str(source, &tiny_blocks()).unwrap();
        assert_eq!(text.to_string(), source);
        assert_eq!(text.len(), source.chars().count());
        assert_eq!(text.line_break_count(), 2);
    }

    #[test]
    fn crlf_never_splits_at_a_block_boundary() {
        // Eight characters put the '\r' exactly at the end of a block.
        let source = "1234567\r\nnext line\r\nmore";
        let (text, stats) = load_str(source, &tiny_blocks()).unwrap();
        assert_eq!(text.line_break_count(), 2);
        assert_eq!(stats.newlines.crlf, 2);
        assert_eq!(stats.newlines.total(), 2);
        let line = text.line(0).unwrap();
        assert_eq!(line.break_length, 2);
        assert_eq!(text.slice_to_string(line.range.clone()).unwrap(), "1234567");
    }

    #[test]
    fn newline_statistics_cover_all_kinds() {
        let source = "a\r\nb\rc\nd\u{0085}e\u{2028}f\u{2029}g\nh";
        let (text, stats) = load_str(source, &tiny_blocks()).unwrap();
        assert_eq!(
            stats.newlines,
            NewlineCounts {
                crlf: 1,
                cr: 1,
                lf: 2,
                nel: 1,
                ls: 1,
                ps: 1,
            }
        );
        assert!(!stats.has_consistent_line_endings());
        assert_eq!(stats.newlines.dominant(), Some(NewlineKind::Lf));
        assert_eq!(text.line_break_count(), 7);
    }

    #[test]
    fn consistent_line_endings() {
        let (_, stats) = load_str("one\ntwo\nthree\n", &LoadOptions::default()).unwrap();
        assert!(stats.has_consistent_line_endings());
        assert_eq!(stats.newlines.dominant(), Some(NewlineKind::Lf));
        let (_, stats) = load_str("no breaks at all", &LoadOptions::default()).unwrap();
        assert!(stats.has_consistent_line_endings());
        assert_eq!(stats.newlines.dominant(), None);
    }

    #[test]
    fn leading_whitespace_and_longest_line() {
        let source = "plain\n    indented\n\ttabbed\n\nword and a very long line here";
        let (_, stats) = load_str(source, &tiny_blocks()).unwrap();
        assert_eq!(stats.leading_whitespace.space, 1);
        assert_eq!(stats.leading_whitespace.tab, 1);
        assert_eq!(stats.leading_whitespace.printable, 2);
        assert_eq!(stats.leading_whitespace.empty, 1);
        assert_eq!(stats.leading_whitespace.prefers_tabs(), Some(false));
        assert_eq!(stats.longest_line_len, "word and a very long line here".len());
    }

    #[test]
    fn rejects_nul_when_asked() {
        let options = LoadOptions {
            reject_nuls: true,
            ..tiny_blocks()
        };
        let result = load_str("good text\u{0}bad", &options);
        assert_eq!(result.unwrap_err(), Error::InvalidCharacter { offset: 9 });
        // NULs are ordinary content by default.
        let (text, _) = load_str("good text\u{0}bad", &tiny_blocks()).unwrap();
        assert_eq!(text.len(), 13);
        assert_eq!(text.char_at(9).unwrap(), '\0');
    }

    #[test]
    fn compressed_load_round_trips() {
        let mut source = String::new();
        for index in 0..1500 {
            source.push_str(&format!("line number {} with some text\r\n", index));
        }
        for index in 0..400 {
            source.push_str(&format!("short {}\n", index));
        }
        assert!(source.len() > 50 * 1024);
        let (text, stats) = load_str(&source, &compressed()).unwrap();
        assert_eq!(text.len(), source.chars().count());
        assert_eq!(text.line_break_count(), 1900);
        assert_eq!(stats.newlines.crlf, 1500);
        assert_eq!(stats.newlines.lf, 400);
        assert!(!stats.has_consistent_line_endings());
        assert_eq!(text.to_string(), source);
        // Line lookup still works through compressed pages.
        let line = text.line(1500).unwrap();
        assert_eq!(
            text.slice_to_string(line.range.clone()).unwrap(),
            "short 0"
        );
    }

    #[test]
    fn small_final_block_stays_uncompressed() {
        let options = LoadOptions {
            min_compressed_block_size: 4 * 1024,
            compressed_storage_threshold: 1024,
            compressed_page_size: 4 * 1024,
            ..LoadOptions::default()
        };
        // One full page plus a tail below the compression cut-off.
        let source = format!("{}tail", "x".repeat(4 * 1024));
        let (text, _) = load_str(&source, &options).unwrap();
        assert_eq!(text.len(), 4 * 1024 + 4);
        assert_eq!(text.to_string(), source);
    }

    #[test]
    fn edits_on_loaded_text_share_structure() {
        let source = "alpha\nbeta\ngamma\n".repeat(400);
        let (text, _) = load_str(&source, &LoadOptions::default()).unwrap();
        let edited = text.insert_str(0, "# heading\n").unwrap();
        assert_eq!(edited.len(), text.len() + 10);
        assert_eq!(edited.line_break_count(), text.line_break_count() + 1);
        let suffix = edited.subtext(10..edited.len()).unwrap();
        assert!(Text::ptr_eq(&suffix, &text));
    }
}
