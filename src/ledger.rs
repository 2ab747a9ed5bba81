//! Ledger object store.
//!
//! A [`LedgerSnapshot`] is an ordered map from [`EntryKey`] to
//! [`LedgerEntry`]. The engine never edits a snapshot it was handed: writes go
//! into a [`Sandbox`] overlay, and the overlay's change set is folded into a
//! fresh snapshot once an order has settled.
//!
//! Every map is a `BTreeMap` so iteration order, and therefore every result
//! derived from iteration, is identical on every replica.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::amount::{AccountId, Amount, AmountError, Asset, Currency, Quality};
use crate::error::Result;

// ============================================================================
// Keys
// ============================================================================

/// Identifies a standing offer: owner plus the sequence of the order that
/// created it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OfferId {
    pub owner: AccountId,
    pub sequence: u32,
}

impl OfferId {
    pub fn new(owner: AccountId, sequence: u32) -> Self {
        Self { owner, sequence }
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.sequence)
    }
}

/// Order book key: offers giving `gets` in exchange for `pays`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BookKey {
    /// Asset of the offers' `taker_gets`
    pub gets: Asset,
    /// Asset of the offers' `taker_pays`
    pub pays: Asset,
}

impl BookKey {
    pub fn new(gets: Asset, pays: Asset) -> Self {
        Self { gets, pays }
    }

    /// Book an offer with these amounts lives in.
    pub fn for_offer(taker_pays: &Amount, taker_gets: &Amount) -> Self {
        Self::new(taker_gets.asset.clone(), taker_pays.asset.clone())
    }

    /// Key of the crossing-partner book (the opposite direction).
    #[inline]
    pub fn reverse(&self) -> Self {
        Self {
            gets: self.pays.clone(),
            pays: self.gets.clone(),
        }
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>{}", self.pays, self.gets)
    }
}

/// Trust line key with the two accounts in canonical (low, high) order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineKey {
    pub low: AccountId,
    pub high: AccountId,
    pub currency: Currency,
}

impl LineKey {
    pub fn new(a: &AccountId, b: &AccountId, currency: &Currency) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.clone(),
            high: high.clone(),
            currency: currency.clone(),
        }
    }
}

/// Key of any ledger object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKey {
    Account(AccountId),
    TrustLine(LineKey),
    Offer(OfferId),
    Directory { book: BookKey, page: u32 },
}

// ============================================================================
// Entries
// ============================================================================

/// Account root: native balance and the cached count of owned objects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Native balance
    pub balance: Decimal,
    /// Offers plus reserve-counted trust lines this account owns
    pub owner_count: u32,
    /// Sequence the next order from this account will take
    pub sequence: u32,
}

impl Account {
    pub fn new(id: AccountId, balance: Decimal) -> Self {
        Self {
            id,
            balance,
            owner_count: 0,
            sequence: 1,
        }
    }
}

bitflags! {
    /// Which side of a trust line counts it toward its owner count.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TrustLineFlags: u32 {
        const LOW_RESERVE = 0x0001_0000;
        const HIGH_RESERVE = 0x0002_0000;
    }
}

/// Bilateral credit relationship (a "RippleState").
///
/// `balance > 0` means `low` holds `balance` of `high`'s IOUs; `balance < 0`
/// means `high` holds `-balance` of `low`'s IOUs. Each side's limit is how
/// much of the other side's IOUs it is willing to hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustLine {
    pub low: AccountId,
    pub high: AccountId,
    pub currency: Currency,
    pub balance: Decimal,
    pub low_limit: Decimal,
    pub high_limit: Decimal,
    pub flags: TrustLineFlags,
}

impl TrustLine {
    pub fn key(&self) -> LineKey {
        LineKey {
            low: self.low.clone(),
            high: self.high.clone(),
            currency: self.currency.clone(),
        }
    }

    /// Amount of the counterparty's IOUs `account` holds (negative when it
    /// owes the counterparty).
    pub fn holding(&self, account: &AccountId) -> Decimal {
        if *account == self.low {
            self.balance
        } else {
            -self.balance
        }
    }

    pub fn set_holding(&mut self, account: &AccountId, holding: Decimal) {
        self.balance = if *account == self.low { holding } else { -holding };
    }

    /// How much of the counterparty's IOUs `account` is willing to hold.
    pub fn limit_of(&self, account: &AccountId) -> Decimal {
        if *account == self.low {
            self.low_limit
        } else {
            self.high_limit
        }
    }

    pub fn reserve_flag(&self, account: &AccountId) -> TrustLineFlags {
        if *account == self.low {
            TrustLineFlags::LOW_RESERVE
        } else {
            TrustLineFlags::HIGH_RESERVE
        }
    }
}

/// Standing commitment to give `taker_gets` in exchange for `taker_pays`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub owner: AccountId,
    pub sequence: u32,
    pub taker_pays: Amount,
    pub taker_gets: Amount,
    /// Book directory the offer is listed in
    pub book_directory: BookKey,
    /// Page of that directory holding the offer
    pub book_page: u32,
}

impl Offer {
    pub fn id(&self) -> OfferId {
        OfferId::new(self.owner.clone(), self.sequence)
    }

    pub fn quality(&self) -> std::result::Result<Quality, AmountError> {
        Quality::from_amounts(&self.taker_pays, &self.taker_gets)
    }
}

/// One page of a book directory.
///
/// Only the page tagged `descriptor` identifies the book; the pages chained
/// after it through `next` are continuation pages of the same offer list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryPage {
    pub book: BookKey,
    pub page: u32,
    pub descriptor: bool,
    pub offers: Vec<OfferId>,
    pub next: Option<u32>,
}

/// Any object stored in the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LedgerEntry {
    Account(Account),
    TrustLine(TrustLine),
    Offer(Offer),
    Directory(DirectoryPage),
}

impl LedgerEntry {
    pub fn key(&self) -> EntryKey {
        match self {
            LedgerEntry::Account(a) => EntryKey::Account(a.id.clone()),
            LedgerEntry::TrustLine(l) => EntryKey::TrustLine(l.key()),
            LedgerEntry::Offer(o) => EntryKey::Offer(o.id()),
            LedgerEntry::Directory(d) => EntryKey::Directory {
                book: d.book.clone(),
                page: d.page,
            },
        }
    }
}

// ============================================================================
// Read / write views
// ============================================================================

/// Read access to ledger state.
pub trait LedgerRead {
    fn read(&self, key: &EntryKey) -> Option<&LedgerEntry>;

    fn account(&self, id: &AccountId) -> Option<&Account> {
        match self.read(&EntryKey::Account(id.clone())) {
            Some(LedgerEntry::Account(a)) => Some(a),
            _ => None,
        }
    }

    fn offer(&self, id: &OfferId) -> Option<&Offer> {
        match self.read(&EntryKey::Offer(id.clone())) {
            Some(LedgerEntry::Offer(o)) => Some(o),
            _ => None,
        }
    }

    fn trust_line(&self, key: &LineKey) -> Option<&TrustLine> {
        match self.read(&EntryKey::TrustLine(key.clone())) {
            Some(LedgerEntry::TrustLine(l)) => Some(l),
            _ => None,
        }
    }

    fn directory(&self, book: &BookKey, page: u32) -> Option<&DirectoryPage> {
        let key = EntryKey::Directory {
            book: book.clone(),
            page,
        };
        match self.read(&key) {
            Some(LedgerEntry::Directory(d)) => Some(d),
            _ => None,
        }
    }
}

/// Write access to ledger state.
pub trait LedgerWrite: LedgerRead {
    /// Insert or replace the entry under its own key.
    fn write(&mut self, entry: LedgerEntry);

    fn erase(&mut self, key: &EntryKey);
}

/// Pending writes: `None` marks an erased entry.
pub type ChangeSet = BTreeMap<EntryKey, Option<LedgerEntry>>;

/// Copy-on-write overlay over another view.
///
/// Reads fall through to the base unless the key was written or erased here.
pub struct Sandbox<'a, V: LedgerRead> {
    base: &'a V,
    changes: ChangeSet,
}

impl<'a, V: LedgerRead> Sandbox<'a, V> {
    pub fn new(base: &'a V) -> Self {
        Self {
            base,
            changes: ChangeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn into_changes(self) -> ChangeSet {
        self.changes
    }

    /// Fold changes produced by a child overlay into this one.
    pub fn absorb(&mut self, changes: ChangeSet) {
        self.changes.extend(changes);
    }
}

impl<V: LedgerRead> LedgerRead for Sandbox<'_, V> {
    fn read(&self, key: &EntryKey) -> Option<&LedgerEntry> {
        match self.changes.get(key) {
            Some(Some(entry)) => Some(entry),
            Some(None) => None,
            None => self.base.read(key),
        }
    }
}

impl<V: LedgerRead> LedgerWrite for Sandbox<'_, V> {
    fn write(&mut self, entry: LedgerEntry) {
        self.changes.insert(entry.key(), Some(entry));
    }

    fn erase(&mut self, key: &EntryKey) {
        self.changes.insert(key.clone(), None);
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// One consistent ledger state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SnapshotFile", into = "SnapshotFile")]
pub struct LedgerSnapshot {
    pub ledger_index: u64,
    pub close_time: DateTime<Utc>,
    entries: BTreeMap<EntryKey, LedgerEntry>,
}

/// On-disk form: entries as a list, since JSON object keys must be strings.
#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    ledger_index: u64,
    close_time: DateTime<Utc>,
    entries: Vec<LedgerEntry>,
}

impl From<SnapshotFile> for LedgerSnapshot {
    fn from(file: SnapshotFile) -> Self {
        let mut snapshot = LedgerSnapshot::new(file.ledger_index, file.close_time);
        for entry in file.entries {
            snapshot.insert(entry);
        }
        snapshot
    }
}

impl From<LedgerSnapshot> for SnapshotFile {
    fn from(snapshot: LedgerSnapshot) -> Self {
        SnapshotFile {
            ledger_index: snapshot.ledger_index,
            close_time: snapshot.close_time,
            entries: snapshot.entries.into_values().collect(),
        }
    }
}

impl LedgerSnapshot {
    pub fn new(ledger_index: u64, close_time: DateTime<Utc>) -> Self {
        Self {
            ledger_index,
            close_time,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&mut self, entry: LedgerEntry) {
        self.entries.insert(entry.key(), entry);
    }

    /// All entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.entries.values().filter_map(|e| match e {
            LedgerEntry::Account(a) => Some(a),
            _ => None,
        })
    }

    pub fn trust_lines(&self) -> impl Iterator<Item = &TrustLine> {
        self.entries.values().filter_map(|e| match e {
            LedgerEntry::TrustLine(l) => Some(l),
            _ => None,
        })
    }

    pub fn offers(&self) -> impl Iterator<Item = &Offer> {
        self.entries.values().filter_map(|e| match e {
            LedgerEntry::Offer(o) => Some(o),
            _ => None,
        })
    }

    pub fn directories(&self) -> impl Iterator<Item = &DirectoryPage> {
        self.entries.values().filter_map(|e| match e {
            LedgerEntry::Directory(d) => Some(d),
            _ => None,
        })
    }

    /// Fold a change set into this state.
    pub(crate) fn apply(&mut self, changes: ChangeSet) {
        for (key, change) in changes {
            match change {
                Some(entry) => {
                    self.entries.insert(key, entry);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// SHA-256 of the canonical JSON encoding, hex encoded.
    ///
    /// Two replicas that applied the same batch to the same snapshot must
    /// report the same hash.
    pub fn state_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.ledger_index.to_be_bytes());
        for entry in self.entries.values() {
            // Serializing plain data structures into a Vec cannot fail.
            if let Ok(bytes) = serde_json::to_vec(entry) {
                hasher.update(&bytes);
            }
        }
        hex::encode(hasher.finalize())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

impl LedgerRead for LedgerSnapshot {
    fn read(&self, key: &EntryKey) -> Option<&LedgerEntry> {
        self.entries.get(key)
    }
}
