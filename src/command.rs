//! Command and trade log types for the crossing engine.
//!
//! Commands are the inputs of a ledger close (one batch, applied in order).
//! Every command yields an [`OrderOutcome`] carrying its status and the
//! trade log of the fragments that settled.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amount::{AccountId, Amount, AmountError, Asset, Quality};
use crate::ledger::{BookKey, Offer, OfferId};

// ============================================================================
// Input Commands
// ============================================================================

/// An order submitted to the engine.
///
/// Field names follow the standing-offer convention: `taker_pays` is what the
/// submitter wants to receive (`out`) and `taker_gets` what it gives (`in`).
/// A booked remainder is an [`Offer`] with the same field meaning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingOrder {
    /// Submitting account
    pub taker: AccountId,
    /// Amount the taker wants to receive
    pub taker_pays: Amount,
    /// Amount the taker is willing to give
    pub taker_gets: Amount,
    /// Spend all of `taker_gets` and never book a remainder
    #[serde(default)]
    pub sell: bool,
}

impl IncomingOrder {
    pub fn new(taker: impl Into<AccountId>, taker_pays: Amount, taker_gets: Amount) -> Self {
        Self {
            taker: taker.into(),
            taker_pays,
            taker_gets,
            sell: false,
        }
    }

    /// Same order with the sell flag set.
    pub fn sell(mut self) -> Self {
        self.sell = true;
        self
    }

    /// What the taker gives.
    #[inline]
    pub fn input(&self) -> &Amount {
        &self.taker_gets
    }

    /// What the taker receives.
    #[inline]
    pub fn output(&self) -> &Amount {
        &self.taker_pays
    }

    /// Book of offers giving `out` for `in`.
    pub fn direct_book(&self) -> BookKey {
        BookKey::new(self.output().asset.clone(), self.input().asset.clone())
    }

    /// Book a remainder of this order is placed in.
    pub fn remainder_book(&self) -> BookKey {
        BookKey::for_offer(&self.taker_pays, &self.taker_gets)
    }

    /// Worst offer quality (`in` paid per `out` received) the taker accepts.
    pub fn limit_quality(&self) -> Result<Quality, AmountError> {
        Quality::new(self.taker_gets.value, self.taker_pays.value)
    }
}

/// Cancel a standing offer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOffer {
    pub owner: AccountId,
    /// Sequence of the order that created the offer
    pub sequence: u32,
}

/// Cancel a standing offer of the taker, then submit a new order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceOffer {
    /// Sequence of the offer to cancel
    pub sequence: u32,
    pub order: IncomingOrder,
}

/// Engine inputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    /// Cross a new order, booking any remainder
    Create(IncomingOrder),
    /// Remove a standing offer
    Cancel(CancelOffer),
    /// Cancel + create
    Replace(ReplaceOffer),
}

impl Command {
    /// Account that submitted the command.
    pub fn account(&self) -> &AccountId {
        match self {
            Command::Create(order) => &order.taker,
            Command::Cancel(cancel) => &cancel.owner,
            Command::Replace(replace) => &replace.order.taker,
        }
    }
}

// ============================================================================
// Fragments
// ============================================================================

/// Liquidity a fragment was taken from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentPath {
    /// The book giving `out` for `in`
    Direct,
    /// `in → native → out` through two books
    Bridged,
}

/// Portion of a standing offer consumed by a fragment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OfferFill {
    pub offer: OfferId,
    pub book: BookKey,
    /// Taken from the offer's `taker_pays` (what its owner receives)
    pub pays: Amount,
    /// Taken from the offer's `taker_gets` (what its owner gives)
    pub gets: Amount,
    /// The offer is used up and must be removed
    pub exhausted: bool,
}

/// Signed change of one account's balance in one asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BalanceDelta {
    pub account: AccountId,
    pub asset: Asset,
    pub value: Decimal,
}

/// One matched increment of an order, settled atomically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Fragment {
    pub path: FragmentPath,
    /// Effective quality (`in` per `out`) of the increment
    pub quality: Quality,
    /// What the taker gives
    pub input: Amount,
    /// What the taker receives
    pub output: Amount,
    /// Offers touched, leg 1 before leg 2 for bridged fragments
    pub offers_consumed: Vec<OfferFill>,
    pub deltas: Vec<BalanceDelta>,
    /// Native amount passed through the bridge (zero for direct fragments)
    pub native_flow: Decimal,
}

impl Fragment {
    /// Sum of native deltas; a bridge never retains or creates native.
    pub fn native_net(&self) -> Decimal {
        self.deltas
            .iter()
            .filter(|d| d.asset.is_native())
            .map(|d| d.value)
            .sum()
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Why an order was rejected outright.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("malformed offer: {0}")]
    MalformedOffer(MalformedReason),

    #[error("taker has no spendable funds")]
    Unfunded,

    #[error("offer not found")]
    OfferNotFound,

    #[error("reserve or trust limit violated")]
    ReserveViolation,
}

/// Detail of a [`RejectReason::MalformedOffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedReason {
    NonPositiveAmount,
    SameAsset,
    UnknownTaker,
    /// Amounts too large for exact decimal arithmetic
    Overflow,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MalformedReason::NonPositiveAmount => "amounts must be positive",
            MalformedReason::SameAsset => "both sides are the same asset",
            MalformedReason::UnknownTaker => "taker account does not exist",
            MalformedReason::Overflow => "amounts overflow decimal arithmetic",
        };
        f.write_str(text)
    }
}

/// Terminal state of a command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Fully matched, nothing booked
    Filled,
    PartiallyFilledBooked,
    UnfilledBooked,
    /// Matched in part; the remainder was not booked
    PartiallyFilledDiscarded,
    /// Nothing matched and nothing booked
    UnfilledDiscarded,
    /// Standing offer removed by a cancel command
    Canceled,
    Rejected(RejectReason),
}

impl OrderStatus {
    #[inline]
    pub fn is_rejected(&self) -> bool {
        matches!(self, OrderStatus::Rejected(_))
    }
}

/// Everything that happened to the ledger on behalf of one command.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TradeLog {
    /// Settled fragments in application order
    pub fragments: Vec<Fragment>,
    /// Taker-owned offers removed as stale while crossing, plus the offer a
    /// cancel or replace command removed
    pub canceled_offers: Vec<OfferId>,
    /// Remainder placed as a standing offer
    pub booked: Option<Offer>,
    /// Fragments matched but not applied
    pub discarded: usize,
}

impl TradeLog {
    /// Total the taker gave across settled fragments.
    pub fn paid(&self) -> Decimal {
        self.fragments.iter().map(|f| f.input.value).sum()
    }

    /// Total the taker received across settled fragments.
    pub fn received(&self) -> Decimal {
        self.fragments.iter().map(|f| f.output.value).sum()
    }

    /// Offers fully consumed by settled fragments.
    pub fn offers_removed(&self) -> impl Iterator<Item = &OfferId> {
        self.fragments
            .iter()
            .flat_map(|f| f.offers_consumed.iter())
            .filter(|fill| fill.exhausted)
            .map(|fill| &fill.offer)
    }
}

/// Result of processing one command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderOutcome {
    pub account: AccountId,
    /// Sequence the command consumed, if it passed validation
    pub sequence: Option<u32>,
    pub status: OrderStatus,
    pub log: TradeLog,
}

impl OrderOutcome {
    pub fn rejected(account: AccountId, reason: RejectReason) -> Self {
        Self {
            account,
            sequence: None,
            status: OrderStatus::Rejected(reason),
            log: TradeLog::default(),
        }
    }
}
