//! Order Book Index - books and their top-of-book offers.
//!
//! Built in one pass over the directory pages tagged as book descriptors.
//! Each book holds its offers sorted by ascending quality (best rate first);
//! the sort is stable, so offers of equal quality keep directory order, which
//! is creation order.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::amount::Quality;
use crate::directory::{book_offers, DESCRIPTOR_PAGE};
use crate::ledger::{BookKey, LedgerRead, LedgerSnapshot, OfferId};

/// An offer as listed in a book: id plus the quality it was booked at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookOffer {
    pub id: OfferId,
    pub quality: Quality,
}

/// One currency-pair book.
#[derive(Clone, Debug)]
pub struct OrderBook {
    pub key: BookKey,
    /// Key of the reverse book, when that book exists
    pub partner: Option<BookKey>,
    /// Offers in ascending quality order
    pub offers: Vec<BookOffer>,
}

impl OrderBook {
    /// Best (lowest) quality in the book.
    #[inline]
    pub fn best_quality(&self) -> Option<Quality> {
        self.offers.first().map(|o| o.quality)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }
}

/// All books of a snapshot keyed by [`BookKey`].
#[derive(Clone, Debug, Default)]
pub struct BookIndex {
    books: BTreeMap<BookKey, OrderBook>,
}

impl BookIndex {
    /// Build the index from every descriptor page of the snapshot.
    ///
    /// A book key claimed by more than one descriptor is indexed once.
    pub fn build(snapshot: &LedgerSnapshot) -> Self {
        let mut index = Self::default();

        for page in snapshot.directories().filter(|d| d.descriptor) {
            if index.books.contains_key(&page.book) {
                warn!(book = %page.book, page = page.page, "duplicate book descriptor ignored");
                continue;
            }
            let book = load_book(snapshot, &page.book, page.page);
            index.books.insert(page.book.clone(), book);
        }

        let keys: Vec<BookKey> = index.books.keys().cloned().collect();
        for key in keys {
            index.link_partner(&key);
        }

        debug!(books = index.books.len(), "book index built");
        index
    }

    /// Reload the given books from `view` after a settlement touched them.
    /// Books whose descriptor is gone are dropped.
    pub fn refresh<V: LedgerRead>(&mut self, view: &V, touched: impl IntoIterator<Item = BookKey>) {
        for key in touched {
            if view.directory(&key, DESCRIPTOR_PAGE).is_some() {
                self.books.insert(key.clone(), load_book(view, &key, DESCRIPTOR_PAGE));
            } else {
                self.books.remove(&key);
            }
            self.link_partner(&key);
            self.link_partner(&key.reverse());
        }
    }

    fn link_partner(&mut self, key: &BookKey) {
        let reverse = key.reverse();
        let partner = self.books.contains_key(&reverse).then_some(reverse);
        if let Some(book) = self.books.get_mut(key) {
            book.partner = partner;
        }
    }

    #[inline]
    pub fn book(&self, key: &BookKey) -> Option<&OrderBook> {
        self.books.get(key)
    }

    /// Best quality of a book, `None` if the book is absent or empty.
    pub fn best_quality(&self, key: &BookKey) -> Option<Quality> {
        self.books.get(key).and_then(OrderBook::best_quality)
    }

    /// Books in key order.
    pub fn iter(&self) -> impl Iterator<Item = &OrderBook> {
        self.books.values()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Total offers across all books.
    pub fn offer_count(&self) -> usize {
        self.books.values().map(OrderBook::len).sum()
    }
}

/// Collect a book's offers from the page chain starting at `root` and sort
/// them by quality.
fn load_book<V: LedgerRead + ?Sized>(view: &V, key: &BookKey, root: u32) -> OrderBook {
    let mut offers = Vec::new();

    for id in book_offers(view, key, root) {
        let Some(offer) = view.offer(&id) else {
            warn!(offer = %id, book = %key, "directory lists a missing offer");
            continue;
        };
        if offer.book_directory != *key {
            warn!(
                offer = %id,
                book = %key,
                listed_in = %offer.book_directory,
                "offer listed in a foreign book skipped"
            );
            continue;
        }
        match offer.quality() {
            Ok(quality) => offers.push(BookOffer { id, quality }),
            Err(e) => warn!(offer = %id, book = %key, error = %e, "malformed offer skipped"),
        }
    }

    // Stable: equal qualities keep directory (creation) order
    offers.sort_by(|a, b| a.quality.cmp(&b.quality));

    OrderBook {
        key: key.clone(),
        partner: None,
        offers,
    }
}
