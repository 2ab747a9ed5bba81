//! Snapshot builder for tests, benches and tools.
//!
//! Keeps every derived field consistent: trust lines and offers bump their
//! owner's `owner_count`, offers take the owner's next sequence and are
//! listed in their book directory.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::amount::{AccountId, Amount, Asset, Currency};
use crate::directory::{adjust_owner_count, create_offer};
use crate::ledger::{
    Account, BookKey, LedgerEntry, LedgerRead, LedgerSnapshot, LedgerWrite, LineKey, Offer, Sandbox, TrustLine,
    TrustLineFlags,
};

pub struct SnapshotBuilder {
    snapshot: LedgerSnapshot,
    page_size: usize,
}

impl SnapshotBuilder {
    pub fn new(ledger_index: u64) -> Self {
        Self {
            snapshot: LedgerSnapshot::new(ledger_index, DateTime::<Utc>::default()),
            page_size: 32,
        }
    }

    pub fn close_time(mut self, close_time: DateTime<Utc>) -> Self {
        self.snapshot.close_time = close_time;
        self
    }

    /// Offers per directory page for offers added after this call.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn account(mut self, id: &str, balance: Decimal) -> Self {
        self.snapshot
            .insert(LedgerEntry::Account(Account::new(AccountId::new(id), balance)));
        self
    }

    /// Trust line from `holder` to `issuer` with the holder's `limit`,
    /// counted in the holder's owner count.
    pub fn trust_line(self, holder: &str, currency: &str, issuer: &str, limit: Decimal) -> Self {
        self.edit(|view| {
            let holder = AccountId::new(holder);
            let issuer = AccountId::new(issuer);
            let currency = Currency::new(currency);
            let key = LineKey::new(&holder, &issuer, &currency);
            let mut line = view.trust_line(&key).cloned().unwrap_or_else(|| TrustLine {
                low: key.low.clone(),
                high: key.high.clone(),
                currency: currency.clone(),
                balance: Decimal::ZERO,
                low_limit: Decimal::ZERO,
                high_limit: Decimal::ZERO,
                flags: TrustLineFlags::empty(),
            });
            if holder == line.low {
                line.low_limit = limit;
            } else {
                line.high_limit = limit;
            }
            let flag = line.reserve_flag(&holder);
            if !line.flags.contains(flag) {
                line.flags.insert(flag);
                adjust_owner_count(view, &holder, 1);
            }
            view.write(LedgerEntry::TrustLine(line));
        })
    }

    /// Credit `amount` to `holder`: native balance, or the holding on an
    /// existing trust line to the issuer.
    pub fn fund(self, holder: &str, amount: Amount) -> Self {
        self.edit(|view| {
            let holder = AccountId::new(holder);
            match &amount.asset {
                Asset::Native => {
                    if let Some(mut root) = view.account(&holder).cloned() {
                        root.balance += amount.value;
                        view.write(LedgerEntry::Account(root));
                    }
                }
                Asset::Issued { currency, issuer } => {
                    let key = LineKey::new(&holder, issuer, currency);
                    if let Some(mut line) = view.trust_line(&key).cloned() {
                        let holding = line.holding(&holder) + amount.value;
                        line.set_holding(&holder, holding);
                        view.write(LedgerEntry::TrustLine(line));
                    }
                }
            }
        })
    }

    /// Standing offer from `owner` at the owner's next sequence.
    pub fn offer(self, owner: &str, taker_pays: Amount, taker_gets: Amount) -> Self {
        let page_size = self.page_size;
        self.edit(|view| {
            let owner = AccountId::new(owner);
            let sequence = match view.account(&owner).cloned() {
                Some(mut root) => {
                    let sequence = root.sequence;
                    root.sequence += 1;
                    view.write(LedgerEntry::Account(root));
                    sequence
                }
                None => 1,
            };
            let offer = Offer {
                owner,
                sequence,
                book_directory: BookKey::for_offer(&taker_pays, &taker_gets),
                taker_pays,
                taker_gets,
                book_page: 0,
            };
            create_offer(view, offer, page_size);
        })
    }

    /// Insert an entry as is, derived fields untouched.
    pub fn raw(mut self, entry: LedgerEntry) -> Self {
        self.snapshot.insert(entry);
        self
    }

    pub fn build(self) -> LedgerSnapshot {
        self.snapshot
    }

    fn edit(mut self, f: impl FnOnce(&mut Sandbox<'_, LedgerSnapshot>)) -> Self {
        let changes = {
            let mut sandbox = Sandbox::new(&self.snapshot);
            f(&mut sandbox);
            sandbox.into_changes()
        };
        self.snapshot.apply(changes);
        self
    }
}
