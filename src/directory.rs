//! Book directories - paged offer lists.
//!
//! A book's directory is a chain of pages starting at the descriptor page
//! (page 0). Offers are appended to the last page; a full page starts a new
//! one. Pages emptied by removals are unlinked, and the descriptor is erased
//! once the whole book is empty, which is what makes a book disappear from
//! the index.

use tracing::warn;

use crate::amount::AccountId;
use crate::ledger::{
    BookKey, DirectoryPage, EntryKey, LedgerEntry, LedgerRead, LedgerWrite, Offer, OfferId,
};

/// Page number of a book's descriptor page.
pub const DESCRIPTOR_PAGE: u32 = 0;

/// Offers of a book in directory order, walking the page chain from the
/// descriptor at `root`. Stops on a missing page or a chain that does not
/// ascend.
pub fn book_offers<V: LedgerRead + ?Sized>(view: &V, book: &BookKey, root: u32) -> Vec<OfferId> {
    let mut offers = Vec::new();
    let mut next = Some(root);

    while let Some(page_no) = next {
        let Some(page) = view.directory(book, page_no) else {
            if page_no != root {
                warn!(book = %book, page = page_no, "directory chain points at a missing page");
            }
            break;
        };
        offers.extend(page.offers.iter().cloned());
        next = page.next;

        if next.is_some_and(|n| n <= page_no) {
            warn!(book = %book, page = page_no, "directory chain is not ascending, stopping");
            break;
        }
    }

    offers
}

/// Append an offer to a book's directory, creating pages as needed.
///
/// Returns the page the offer was placed on.
pub fn insert_offer<W: LedgerWrite + ?Sized>(
    view: &mut W,
    book: &BookKey,
    offer: &OfferId,
    page_size: usize,
) -> u32 {
    let Some(root) = view.directory(book, DESCRIPTOR_PAGE).cloned() else {
        view.write(LedgerEntry::Directory(DirectoryPage {
            book: book.clone(),
            page: DESCRIPTOR_PAGE,
            descriptor: true,
            offers: vec![offer.clone()],
            next: None,
        }));
        return DESCRIPTOR_PAGE;
    };

    // Walk to the last page
    let mut last = root;
    while let Some(next) = last.next {
        match view.directory(book, next) {
            Some(page) => last = page.clone(),
            None => break,
        }
    }

    if last.offers.len() < page_size {
        let page_no = last.page;
        last.offers.push(offer.clone());
        view.write(LedgerEntry::Directory(last));
        return page_no;
    }

    let page_no = last.page + 1;
    last.next = Some(page_no);
    view.write(LedgerEntry::Directory(last));
    view.write(LedgerEntry::Directory(DirectoryPage {
        book: book.clone(),
        page: page_no,
        descriptor: false,
        offers: vec![offer.clone()],
        next: None,
    }));
    page_no
}

/// Remove an offer from the directory page it is listed on.
///
/// Returns `false` if the offer was not listed there.
pub fn remove_offer<W: LedgerWrite + ?Sized>(
    view: &mut W,
    book: &BookKey,
    page_no: u32,
    offer: &OfferId,
) -> bool {
    let Some(mut page) = view.directory(book, page_no).cloned() else {
        return false;
    };
    let Some(position) = page.offers.iter().position(|id| id == offer) else {
        return false;
    };
    page.offers.remove(position);

    if !page.offers.is_empty() {
        view.write(LedgerEntry::Directory(page));
        return true;
    }

    if page_no == DESCRIPTOR_PAGE {
        if page.next.is_none() {
            view.erase(&EntryKey::Directory {
                book: book.clone(),
                page: page_no,
            });
        } else {
            // Keep the descriptor while continuation pages remain
            view.write(LedgerEntry::Directory(page));
        }
        return true;
    }

    // Unlink the emptied continuation page
    let mut prev_no = DESCRIPTOR_PAGE;
    loop {
        let Some(mut prev) = view.directory(book, prev_no).cloned() else {
            break;
        };
        match prev.next {
            Some(n) if n == page_no => {
                prev.next = page.next;
                if prev.page == DESCRIPTOR_PAGE && prev.offers.is_empty() && prev.next.is_none() {
                    view.erase(&EntryKey::Directory {
                        book: book.clone(),
                        page: DESCRIPTOR_PAGE,
                    });
                } else {
                    view.write(LedgerEntry::Directory(prev));
                }
                break;
            }
            Some(n) if n > prev_no => prev_no = n,
            _ => break,
        }
    }
    view.erase(&EntryKey::Directory {
        book: book.clone(),
        page: page_no,
    });
    true
}

/// Create an offer: store it, list it in its book and bump the owner's
/// `owner_count`.
///
/// The caller has already checked that the owner exists.
pub fn create_offer<W: LedgerWrite + ?Sized>(view: &mut W, mut offer: Offer, page_size: usize) -> OfferId {
    let id = offer.id();
    let book = offer.book_directory.clone();
    offer.book_page = insert_offer(view, &book, &id, page_size);
    view.write(LedgerEntry::Offer(offer));
    adjust_owner_count(view, &id.owner, 1);
    id
}

/// Delete an offer, unlist it from its book and decrement the owner's
/// `owner_count`. Returns `false` if the offer does not exist.
pub fn delete_offer<W: LedgerWrite + ?Sized>(view: &mut W, id: &OfferId) -> bool {
    let Some(offer) = view.offer(id).cloned() else {
        return false;
    };
    if !remove_offer(view, &offer.book_directory, offer.book_page, id) {
        warn!(offer = %id, book = %offer.book_directory, "offer missing from its directory page");
    }
    view.erase(&EntryKey::Offer(id.clone()));
    adjust_owner_count(view, &id.owner, -1);
    true
}

/// Add `delta` to an account's `owner_count`, saturating at zero.
pub fn adjust_owner_count<W: LedgerWrite + ?Sized>(view: &mut W, account: &AccountId, delta: i64) {
    if let Some(mut root) = view.account(account).cloned() {
        let count = (root.owner_count as i64 + delta).max(0);
        root.owner_count = count as u32;
        view.write(LedgerEntry::Account(root));
    }
}
