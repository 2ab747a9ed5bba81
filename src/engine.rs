//! Engine - command processing for one ledger.
//!
//! Owns the current snapshot and its book index. Each command runs inside a
//! [`Sandbox`] over the snapshot; only when the command has finished are the
//! sandbox's changes folded into a new snapshot and the books it touched
//! re-indexed. Commands of a batch therefore apply strictly in sequence, each
//! seeing the state the previous one left.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::amount::{AccountId, AmountError};
use crate::command::{
    CancelOffer, Command, IncomingOrder, MalformedReason, OrderOutcome, OrderStatus, RejectReason, ReplaceOffer,
    TradeLog,
};
use crate::config::EngineConfig;
use crate::directory::delete_offer;
use crate::ledger::{BookKey, ChangeSet, LedgerEntry, LedgerRead, LedgerSnapshot, LedgerWrite, OfferId, Sandbox};
use crate::matching::{cross, StopReason};
use crate::order_book::BookIndex;
use crate::settlement::{book_remainder, settle_fragment, spendable};
use crate::verifier::{verify_with_index, AuditReport};

/// The crossing engine.
pub struct Engine {
    config: EngineConfig,
    ledger: LedgerSnapshot,
    index: BookIndex,
}

impl Engine {
    /// Create an engine over `snapshot`.
    pub fn new(config: EngineConfig, snapshot: LedgerSnapshot) -> Self {
        let index = BookIndex::build(&snapshot);
        info!(
            ledger_index = snapshot.ledger_index,
            entries = snapshot.len(),
            books = index.len(),
            "engine loaded snapshot"
        );
        Self {
            config,
            ledger: snapshot,
            index,
        }
    }

    /// Process a single command and return its outcome.
    ///
    /// This is the main entry point for synchronous usage (tests, replay,
    /// benchmarks).
    pub fn process_command(&mut self, cmd: Command) -> OrderOutcome {
        debug!(account = %cmd.account(), ledger_index = self.ledger.ledger_index, "processing command");
        let outcome = match cmd {
            Command::Create(order) => self.process_create(order, None),
            Command::Cancel(cancel) => self.process_cancel(cancel),
            Command::Replace(ReplaceOffer { sequence, order }) => self.process_create(order, Some(sequence)),
        };
        info!(
            account = %outcome.account,
            sequence = ?outcome.sequence,
            status = ?outcome.status,
            fragments = outcome.log.fragments.len(),
            booked = outcome.log.booked.is_some(),
            "command processed"
        );
        outcome
    }

    /// Apply commands in order.
    pub fn apply_batch(&mut self, commands: impl IntoIterator<Item = Command>) -> Vec<OrderOutcome> {
        commands.into_iter().map(|cmd| self.process_command(cmd)).collect()
    }

    /// Close the current ledger: the next commands apply to ledger
    /// `ledger_index + 1`.
    pub fn close(&mut self, close_time: DateTime<Utc>) -> &LedgerSnapshot {
        self.ledger.ledger_index += 1;
        self.ledger.close_time = close_time;
        info!(
            ledger_index = self.ledger.ledger_index,
            books = self.index.len(),
            offers = self.index.offer_count(),
            "ledger closed"
        );
        &self.ledger
    }

    #[inline]
    pub fn snapshot(&self) -> &LedgerSnapshot {
        &self.ledger
    }

    pub fn into_snapshot(self) -> LedgerSnapshot {
        self.ledger
    }

    #[inline]
    pub fn index(&self) -> &BookIndex {
        &self.index
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the invariant verifier on the current snapshot.
    pub fn verify(&self) -> AuditReport {
        verify_with_index(&self.ledger, &self.index)
    }

    /// Compute state hash for determinism testing.
    pub fn state_hash(&self) -> String {
        self.ledger.state_hash()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn process_cancel(&mut self, cancel: CancelOffer) -> OrderOutcome {
        let id = OfferId::new(cancel.owner.clone(), cancel.sequence);
        let Some(book) = self.ledger.offer(&id).map(|o| o.book_directory.clone()) else {
            let reason = if self.ledger.account(&cancel.owner).is_none() {
                RejectReason::MalformedOffer(MalformedReason::UnknownTaker)
            } else {
                RejectReason::OfferNotFound
            };
            return OrderOutcome::rejected(cancel.owner, reason);
        };

        let (changes, sequence) = {
            let mut sandbox = Sandbox::new(&self.ledger);
            let sequence = take_sequence(&mut sandbox, &cancel.owner);
            delete_offer(&mut sandbox, &id);
            (sandbox.into_changes(), sequence)
        };
        self.commit(changes, [book]);

        OrderOutcome {
            account: cancel.owner,
            sequence,
            status: OrderStatus::Canceled,
            log: TradeLog {
                canceled_offers: vec![id],
                ..TradeLog::default()
            },
        }
    }

    fn process_create(&mut self, order: IncomingOrder, replaces: Option<u32>) -> OrderOutcome {
        if let Err(reason) = self.validate(&order) {
            debug!(taker = %order.taker, %reason, "order rejected");
            return OrderOutcome::rejected(order.taker, reason);
        }

        match self.run_create(&order, replaces) {
            Ok(Some((outcome, changes, touched))) => {
                self.commit(changes, touched);
                outcome
            }
            Ok(None) => OrderOutcome::rejected(order.taker, RejectReason::Unfunded),
            Err(CreateError::Rejected(reason)) => OrderOutcome::rejected(order.taker, reason),
            Err(CreateError::Amount(e)) => {
                warn!(taker = %order.taker, error = %e, "order arithmetic failed");
                OrderOutcome::rejected(order.taker, RejectReason::MalformedOffer(MalformedReason::Overflow))
            }
        }
    }

    fn validate(&self, order: &IncomingOrder) -> Result<(), RejectReason> {
        if !order.taker_pays.is_positive() || !order.taker_gets.is_positive() {
            return Err(RejectReason::MalformedOffer(MalformedReason::NonPositiveAmount));
        }
        if order.taker_pays.asset == order.taker_gets.asset {
            return Err(RejectReason::MalformedOffer(MalformedReason::SameAsset));
        }
        if self.ledger.account(&order.taker).is_none() {
            return Err(RejectReason::MalformedOffer(MalformedReason::UnknownTaker));
        }
        Ok(())
    }

    /// Cross and settle `order` in a sandbox. `Ok(None)` means the taker
    /// cannot spend anything.
    fn run_create(
        &self,
        order: &IncomingOrder,
        replaces: Option<u32>,
    ) -> Result<Option<(OrderOutcome, ChangeSet, BTreeSet<BookKey>)>, CreateError> {
        let mut sandbox = Sandbox::new(&self.ledger);
        let mut log = TradeLog::default();
        let mut touched = BTreeSet::new();

        if let Some(sequence) = replaces {
            let id = OfferId::new(order.taker.clone(), sequence);
            let Some(book) = sandbox.offer(&id).map(|o| o.book_directory.clone()) else {
                return Err(CreateError::Rejected(RejectReason::OfferNotFound));
            };
            delete_offer(&mut sandbox, &id);
            touched.insert(book);
            log.canceled_offers.push(id);
        }

        let funds = spendable(&sandbox, &order.taker, &order.taker_gets.asset, &self.config.reserve);
        if funds <= Decimal::ZERO {
            return Ok(None);
        }
        let Some(sequence) = take_sequence(&mut sandbox, &order.taker) else {
            return Err(CreateError::Rejected(RejectReason::MalformedOffer(MalformedReason::UnknownTaker)));
        };

        let crossing = cross(&sandbox, &self.index, &self.config, order, funds)?;
        let bookable = crossing.remainder_bookable();
        let stop = crossing.stop;

        for id in &crossing.stale {
            if let Some(offer) = sandbox.offer(id) {
                touched.insert(offer.book_directory.clone());
            }
            if delete_offer(&mut sandbox, id) {
                debug!(offer = %id, "stale taker offer canceled");
                log.canceled_offers.push(id.clone());
            }
        }

        let mut violated = false;
        let total = crossing.fragments.len();
        for (n, fragment) in crossing.fragments.into_iter().enumerate() {
            match settle_fragment(&mut sandbox, &fragment, &self.config) {
                Ok(()) => {
                    touched.extend(fragment.offers_consumed.iter().map(|fill| fill.book.clone()));
                    log.fragments.push(fragment);
                }
                Err(e) => {
                    log.discarded = total - n;
                    warn!(
                        taker = %order.taker,
                        fragment = n,
                        discarded = log.discarded,
                        error = %e,
                        "fragment violates ledger rules, discarding rest of order"
                    );
                    violated = true;
                    break;
                }
            }
        }

        let matched = !log.fragments.is_empty();
        let mut reserve_short = false;
        if !order.sell && !violated && bookable {
            let received = log.received();
            let paid = log.paid();
            match book_remainder(&mut sandbox, order, sequence, received, paid, &self.config) {
                Ok(Some(offer)) => {
                    touched.insert(offer.book_directory.clone());
                    log.booked = Some(offer);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(taker = %order.taker, error = %e, "remainder not booked");
                    reserve_short = true;
                }
            }
        }

        let status = match (stop, matched, log.booked.is_some()) {
            _ if !matched && (violated || reserve_short) => OrderStatus::Rejected(RejectReason::ReserveViolation),
            (StopReason::Satisfied, _, _) if !violated => OrderStatus::Filled,
            (_, true, true) => OrderStatus::PartiallyFilledBooked,
            (_, false, true) => OrderStatus::UnfilledBooked,
            (_, true, false) => OrderStatus::PartiallyFilledDiscarded,
            (_, false, false) => OrderStatus::UnfilledDiscarded,
        };

        let outcome = OrderOutcome {
            account: order.taker.clone(),
            sequence: Some(sequence),
            status,
            log,
        };
        Ok(Some((outcome, sandbox.into_changes(), touched)))
    }

    /// Fold a command's changes into a new snapshot and refresh its books.
    fn commit(&mut self, changes: ChangeSet, touched: impl IntoIterator<Item = BookKey>) {
        self.ledger.apply(changes);
        self.index.refresh(&self.ledger, touched);
    }
}

/// Internal failure of a create command.
enum CreateError {
    Rejected(RejectReason),
    Amount(AmountError),
}

impl From<AmountError> for CreateError {
    fn from(e: AmountError) -> Self {
        CreateError::Amount(e)
    }
}

/// Consume the account's current sequence.
fn take_sequence<W: LedgerWrite + ?Sized>(view: &mut W, account: &AccountId) -> Option<u32> {
    let mut root = view.account(account).cloned()?;
    let sequence = root.sequence;
    root.sequence += 1;
    view.write(LedgerEntry::Account(root));
    Some(sequence)
}

/// Apply `commands` to `snapshot` and return the derived snapshot with the
/// outcome of every command. `snapshot` itself is left untouched.
pub fn apply_batch(
    config: &EngineConfig,
    snapshot: &LedgerSnapshot,
    commands: impl IntoIterator<Item = Command>,
) -> (LedgerSnapshot, Vec<OrderOutcome>) {
    let mut engine = Engine::new(config.clone(), snapshot.clone());
    let outcomes = engine.apply_batch(commands);
    (engine.into_snapshot(), outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::{Amount, Asset};
    use crate::builder::SnapshotBuilder;
    use rust_decimal_macros::dec;

    fn usd() -> Asset {
        Asset::issued("USD", "gw")
    }

    fn engine() -> Engine {
        let snapshot = SnapshotBuilder::new(1)
            .account("gw", dec!(1000))
            .account("alice", dec!(1000))
            .account("bob", dec!(1000))
            .trust_line("alice", "USD", "gw", dec!(1000))
            .trust_line("bob", "USD", "gw", dec!(1000))
            .fund("bob", Amount::new(dec!(500), usd()))
            .offer("bob", Amount::native(dec!(100)), Amount::new(dec!(100), usd()))
            .build();
        Engine::new(EngineConfig::default(), snapshot)
    }

    fn place(engine: &mut Engine, taker: &str, taker_pays: Amount, taker_gets: Amount) -> OrderOutcome {
        engine.process_command(Command::Create(IncomingOrder::new(taker, taker_pays, taker_gets)))
    }

    #[test]
    fn test_engine_creation() {
        let engine = engine();
        assert_eq!(engine.index().len(), 1);
        assert_eq!(engine.index().offer_count(), 1);
        assert!(engine.verify().is_healthy());
    }

    #[test]
    fn test_full_fill() {
        let mut engine = engine();
        let outcome = place(&mut engine, "alice", Amount::new(dec!(100), usd()), Amount::native(dec!(100)));

        assert_eq!(outcome.status, OrderStatus::Filled);
        assert_eq!(outcome.sequence, Some(1));
        assert_eq!(outcome.log.received(), dec!(100));
        assert_eq!(engine.index().offer_count(), 0);
        assert!(engine.verify().is_healthy());

        let alice = AccountId::new("alice");
        assert_eq!(engine.snapshot().account(&alice).unwrap().balance, dec!(900));
        assert_eq!(engine.snapshot().account(&alice).unwrap().sequence, 2);
    }

    #[test]
    fn test_partial_fill_books_remainder() {
        let mut engine = engine();
        let outcome = place(&mut engine, "alice", Amount::new(dec!(150), usd()), Amount::native(dec!(150)));

        assert_eq!(outcome.status, OrderStatus::PartiallyFilledBooked);
        let booked = outcome.log.booked.unwrap();
        assert_eq!(booked.taker_pays, Amount::new(dec!(50), usd()));
        assert_eq!(booked.taker_gets, Amount::native(dec!(50)));
        assert_eq!(engine.index().offer_count(), 1);
        assert!(engine.verify().is_healthy());
    }

    #[test]
    fn test_unfilled_booked() {
        let mut engine = engine();
        let outcome = place(&mut engine, "alice", Amount::new(dec!(10), usd()), Amount::native(dec!(5)));
        assert_eq!(outcome.status, OrderStatus::UnfilledBooked);
        assert_eq!(engine.index().offer_count(), 2);
        assert!(engine.verify().is_healthy());
    }

    #[test]
    fn test_malformed_rejected_without_mutation() {
        let mut engine = engine();
        let before = engine.state_hash();

        let zero = place(&mut engine, "alice", Amount::new(dec!(0), usd()), Amount::native(dec!(5)));
        assert_eq!(
            zero.status,
            OrderStatus::Rejected(RejectReason::MalformedOffer(MalformedReason::NonPositiveAmount))
        );
        let same = place(&mut engine, "alice", Amount::native(dec!(1)), Amount::native(dec!(5)));
        assert_eq!(
            same.status,
            OrderStatus::Rejected(RejectReason::MalformedOffer(MalformedReason::SameAsset))
        );
        let unknown = place(&mut engine, "nobody", Amount::new(dec!(1), usd()), Amount::native(dec!(5)));
        assert_eq!(
            unknown.status,
            OrderStatus::Rejected(RejectReason::MalformedOffer(MalformedReason::UnknownTaker))
        );
        assert_eq!(engine.state_hash(), before);
    }

    #[test]
    fn test_unfunded_rejected() {
        let mut engine = engine();
        // alice holds no USD
        let outcome = place(&mut engine, "alice", Amount::native(dec!(10)), Amount::new(dec!(10), usd()));
        assert_eq!(outcome.status, OrderStatus::Rejected(RejectReason::Unfunded));
        assert_eq!(outcome.sequence, None);
    }

    #[test]
    fn test_cancel_order() {
        let mut engine = engine();
        let outcome = engine.process_command(Command::Cancel(CancelOffer {
            owner: AccountId::new("bob"),
            sequence: 1,
        }));
        assert_eq!(outcome.status, OrderStatus::Canceled);
        assert!(engine.index().is_empty());
        let bob = engine.snapshot().account(&AccountId::new("bob")).unwrap();
        assert_eq!(bob.owner_count, 1);
        assert!(engine.verify().is_healthy());
    }

    #[test]
    fn test_cancel_nonexistent() {
        let mut engine = engine();
        let outcome = engine.process_command(Command::Cancel(CancelOffer {
            owner: AccountId::new("bob"),
            sequence: 42,
        }));
        assert_eq!(outcome.status, OrderStatus::Rejected(RejectReason::OfferNotFound));
    }

    #[test]
    fn test_replace_cancels_then_creates() {
        let mut engine = engine();
        let first = place(&mut engine, "alice", Amount::new(dec!(10), usd()), Amount::native(dec!(5)));
        let seq = first.sequence.unwrap();

        let outcome = engine.process_command(Command::Replace(ReplaceOffer {
            sequence: seq,
            order: IncomingOrder::new("alice", Amount::new(dec!(20), usd()), Amount::native(dec!(8))),
        }));
        assert_eq!(outcome.status, OrderStatus::UnfilledBooked);
        assert_eq!(outcome.log.canceled_offers, vec![OfferId::new(AccountId::new("alice"), seq)]);
        assert!(engine.snapshot().offer(&OfferId::new(AccountId::new("alice"), seq)).is_none());
        assert_eq!(engine.index().offer_count(), 2);
        assert!(engine.verify().is_healthy());
    }

    #[test]
    fn test_own_offer_canceled_as_stale() {
        let mut engine = engine();
        // bob's own order would cross his standing offer
        let outcome = place(&mut engine, "bob", Amount::new(dec!(100), usd()), Amount::native(dec!(100)));
        assert_eq!(outcome.log.canceled_offers, vec![OfferId::new(AccountId::new("bob"), 1)]);
        assert_eq!(outcome.status, OrderStatus::UnfilledBooked);
        assert!(engine.verify().is_healthy());
    }

    #[test]
    fn test_close_advances_ledger() {
        let opened = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let snapshot = SnapshotBuilder::new(7)
            .close_time(opened)
            .account("alice", dec!(1000))
            .build();
        let mut engine = Engine::new(EngineConfig::default(), snapshot);
        assert_eq!(engine.snapshot().close_time, opened);

        let later = opened + chrono::Duration::seconds(4);
        let closed = engine.close(later);
        assert_eq!(closed.ledger_index, 8);
        assert_eq!(closed.close_time, later);
    }

    #[test]
    fn test_apply_batch_leaves_input_untouched() {
        let snapshot = engine().into_snapshot();
        let before = snapshot.state_hash();
        let (after, outcomes) = apply_batch(
            &EngineConfig::default(),
            &snapshot,
            vec![Command::Create(IncomingOrder::new(
                "alice",
                Amount::new(dec!(100), usd()),
                Amount::native(dec!(100)),
            ))],
        );
        assert_eq!(outcomes.len(), 1);
        assert_eq!(snapshot.state_hash(), before);
        assert_ne!(after.state_hash(), before);
    }
}
