//! Compressed character storage with bounded decompression residency.
//!
//! A [`Page`] owns the compressed bytes of a fixed block of characters for
//! its whole lifetime and keeps only a weak handle to the decompressed
//! form. The [`PageManager`]'s MRU list is what actually keeps recently
//! touched pages warm: it holds the strong handles, bounded to
//! `max_pages`, and evicting an entry merely drops residency. A cold page
//! is re-decompressed transparently on the next access.

use std::{
    io::{Read, Write},
    sync::{Arc, Weak},
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use parking_lot::Mutex;

/// Tracks which pages' decompressed caches are resident, most recently
/// touched last.
pub(crate) struct PageManager {
    resident: Mutex<Vec<Resident>>,
    max_pages: usize,
}

struct Resident {
    page: Weak<Page>,
    // Keeps the page's decompressed cache alive while the entry is listed.
    chars: Arc<[char]>,
}

impl PageManager {
    pub fn new(max_pages: usize) -> Arc<PageManager> {
        Arc::new(PageManager {
            resident: Mutex::new(Vec::with_capacity(max_pages)),
            max_pages,
        })
    }

    /// Promotes `page` to most recently used, evicting the least recently
    /// used entry if the list is full.
    fn touch(&self, page: &Arc<Page>, chars: &Arc<[char]>) {
        if self.max_pages == 0 {
            return;
        }
        let mut resident = self.resident.lock();
        if let Some(index) = resident
            .iter()
            .position(|entry| std::ptr::eq(entry.page.as_ptr(), Arc::as_ptr(page)))
        {
            let entry = resident.remove(index);
            resident.push(entry);
            return;
        }
        if resident.len() == self.max_pages {
            let evicted = resident.remove(0);
            log::trace!(
                "page cache full, dropping residency of a {} character page",
                evicted.chars.len()
            );
        }
        resident.push(Resident {
            page: Arc::downgrade(page),
            chars: Arc::clone(chars),
        });
    }

    /// Drops every residency hint. Pages stay valid and re-expand on demand.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn release_all(&self) {
        self.resident.lock().clear();
    }

    #[cfg(test)]
    fn resident_count(&self) -> usize {
        self.resident.lock().len()
    }
}

/// A compressed block of characters.
pub(crate) struct Page {
    manager: Arc<PageManager>,
    compressed: Box<[u8]>,
    len: usize,
    cache: Mutex<Weak<[char]>>,
}

impl Page {
    /// Compresses `contents` immediately and registers the freshly built
    /// page as resident.
    pub fn new(manager: &Arc<PageManager>, contents: Arc<[char]>) -> Arc<Page> {
        let utf8: String = contents.iter().collect();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(utf8.as_bytes())
            .expect("writing to an in-memory encoder cannot fail");
        let compressed = encoder
            .finish()
            .expect("finishing an in-memory encoder cannot fail")
            .into_boxed_slice();
        log::trace!(
            "compressed page: {} characters -> {} bytes",
            contents.len(),
            compressed.len()
        );
        let page = Arc::new(Page {
            manager: Arc::clone(manager),
            compressed,
            len: contents.len(),
            cache: Mutex::new(Arc::downgrade(&contents)),
        });
        page.manager.touch(&page, &contents);
        page
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns the decompressed characters, reconstructing them if the
    /// cache has been reclaimed. Touches the MRU either way.
    pub fn expand(self: &Arc<Page>) -> Arc<[char]> {
        let mut cache = self.cache.lock();
        let chars = match cache.upgrade() {
            Some(chars) => chars,
            None => {
                // The pages are produced by this module, so the compressed
                // bytes are always well formed; a failure here is fatal.
                let mut decoder = GzDecoder::new(&self.compressed[..]);
                let mut utf8 = String::with_capacity(self.len);
                decoder
                    .read_to_string(&mut utf8)
                    .expect("page decompression cannot fail");
                let chars: Arc<[char]> = utf8.chars().collect::<Vec<char>>().into();
                debug_assert_eq!(chars.len(), self.len);
                *cache = Arc::downgrade(&chars);
                chars
            }
        };
        drop(cache);
        self.manager.touch(self, &chars);
        chars
    }
}
