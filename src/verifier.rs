//! Invariant Verifier - read-only audit of a ledger snapshot.
//!
//! Checks three things:
//! - no book and its crossing partner are mutually crossed
//! - every account's cached `owner_count` matches the objects it owns
//! - no trust line has the same account on both sides
//!
//! Findings are data; the verifier never fails and never writes. Results are
//! listed in ledger key order so repeated runs produce identical reports.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::amount::{AccountId, Currency, Quality};
use crate::ledger::{BookKey, LedgerSnapshot, TrustLineFlags};
use crate::order_book::BookIndex;

/// Two partner books whose best offers would trade with each other.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CrossedBook {
    pub ledger_index: u64,
    pub book: BookKey,
    pub partner: BookKey,
    /// Best quality of `book`
    pub book_quality: Quality,
    /// Best quality of `partner`
    pub partner_quality: Quality,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// Cached count above the objects found
    TooHigh,
    /// Cached count below the objects found
    TooLow,
    /// Objects owned by an account that does not exist
    MissingAccount,
    /// Non-zero cached count but no objects at all
    MissingObjects,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OwnerCountMismatch {
    pub account: AccountId,
    pub kind: MismatchKind,
    /// `owner_count` stored on the account root, zero if there is none
    pub recorded: u32,
    /// Offers plus reserve-flagged trust lines found
    pub actual: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SelfReferencingLine {
    pub account: AccountId,
    pub currency: Currency,
}

/// Everything the verifier found in one snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub ledger_index: u64,
    pub crossed_books: Vec<CrossedBook>,
    pub owner_count_mismatches: Vec<OwnerCountMismatch>,
    pub self_referencing_lines: Vec<SelfReferencingLine>,
}

impl AuditReport {
    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.crossed_books.is_empty()
            && self.owner_count_mismatches.is_empty()
            && self.self_referencing_lines.is_empty()
    }

    pub fn finding_count(&self) -> usize {
        self.crossed_books.len() + self.owner_count_mismatches.len() + self.self_referencing_lines.len()
    }
}

/// Audit `snapshot`.
pub fn verify(snapshot: &LedgerSnapshot) -> AuditReport {
    let index = BookIndex::build(snapshot);
    verify_with_index(snapshot, &index)
}

/// Audit `snapshot` reusing an index already built for it.
pub fn verify_with_index(snapshot: &LedgerSnapshot, index: &BookIndex) -> AuditReport {
    AuditReport {
        ledger_index: snapshot.ledger_index,
        crossed_books: crossed_books(snapshot.ledger_index, index),
        owner_count_mismatches: owner_count_mismatches(snapshot),
        self_referencing_lines: self_referencing_lines(snapshot),
    }
}

fn crossed_books(ledger_index: u64, index: &BookIndex) -> Vec<CrossedBook> {
    let mut visited: BTreeSet<&BookKey> = BTreeSet::new();
    let mut crossed = Vec::new();

    for book in index.iter() {
        if visited.contains(&book.key) {
            continue;
        }
        let Some(best) = book.best_quality() else {
            continue;
        };
        let Some(partner_key) = &book.partner else {
            continue;
        };
        visited.insert(&book.key);
        visited.insert(partner_key);

        let Some(partner_best) = index.best_quality(partner_key) else {
            continue;
        };
        // Buying from `book` at `best` and selling to the partner at
        // 1 / `partner_best` is profitable
        if partner_best.invert() >= best {
            crossed.push(CrossedBook {
                ledger_index,
                book: book.key.clone(),
                partner: partner_key.clone(),
                book_quality: best,
                partner_quality: partner_best,
            });
        }
    }
    crossed
}

fn owner_count_mismatches(snapshot: &LedgerSnapshot) -> Vec<OwnerCountMismatch> {
    let mut owned: FxHashMap<&AccountId, u32> = FxHashMap::default();

    for offer in snapshot.offers() {
        *owned.entry(&offer.owner).or_default() += 1;
    }
    for line in snapshot.trust_lines() {
        if line.flags.contains(TrustLineFlags::LOW_RESERVE) {
            *owned.entry(&line.low).or_default() += 1;
        }
        if line.flags.contains(TrustLineFlags::HIGH_RESERVE) {
            *owned.entry(&line.high).or_default() += 1;
        }
    }

    let mut mismatches = Vec::new();
    for account in snapshot.accounts() {
        let actual = owned.remove(&account.id).unwrap_or(0);
        let kind = match (account.owner_count, actual) {
            (recorded, actual) if recorded == actual => continue,
            (_, 0) => MismatchKind::MissingObjects,
            (recorded, actual) if recorded > actual => MismatchKind::TooHigh,
            _ => MismatchKind::TooLow,
        };
        mismatches.push(OwnerCountMismatch {
            account: account.id.clone(),
            kind,
            recorded: account.owner_count,
            actual,
        });
    }

    let mut orphans: Vec<_> = owned.into_iter().collect();
    orphans.sort();
    mismatches.extend(orphans.into_iter().map(|(account, actual)| OwnerCountMismatch {
        account: account.clone(),
        kind: MismatchKind::MissingAccount,
        recorded: 0,
        actual,
    }));
    mismatches
}

fn self_referencing_lines(snapshot: &LedgerSnapshot) -> Vec<SelfReferencingLine> {
    snapshot
        .trust_lines()
        .filter(|line| line.low == line.high)
        .map(|line| SelfReferencingLine {
            account: line.low.clone(),
            currency: line.currency.clone(),
        })
        .collect()
}
