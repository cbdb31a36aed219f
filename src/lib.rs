//! Immutable rope-based text storage for editors.
//!
//! The central type is [`Text`]: a persistent value representing a
//! document's character content. Edits ([`Text::insert`], [`Text::delete`],
//! [`Text::replace`]) never mutate; they return a new value that shares
//! unchanged subtrees with the original, so historical snapshots stay
//! valid and cheap, and any number of threads can read the same value
//! concurrently.
//!
//! Large documents are built through [`load`], which streams characters in
//! blocks, keeps exact line break bookkeeping for the six recognised
//! newline kinds, gathers newline/indent statistics, and can transparently
//! compress cold blocks into pages whose decompressed form is paged back
//! in on demand.
//!
//! ```
//! use imtext::Text;
//!
//! let original = Text::new("hello\nworld");
//! let edited = original.insert_str(5, ", immutable").unwrap();
//! assert_eq!(original.to_string(), "hello\nworld");
//! assert_eq!(edited.to_string(), "hello, immutable\nworld");
//! assert_eq!(edited.line_break_count(), 1);
//! ```

mod error;
mod line_breaks;
mod loader;
mod node;
mod page;
mod text;

pub use self::{
    error::{Error, Result},
    line_breaks::NewlineKind,
    loader::{
        load, load_str, LeadingWhitespaceCounts, LoadOptions, LoadStats, NewlineCounts,
    },
    node::Chars,
    text::{Line, Text},
};
