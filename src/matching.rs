//! Crossing - combining direct and bridged liquidity for one order.
//!
//! Implements the cross loop:
//! 1. PEEK: best direct quality and best bridged quality
//! 2. PICK: the better of the two under the taker's limit (a tie goes to the
//!    bridge)
//! 3. STEP: take one fragment from the chosen source and repeat
//!
//! Crossing only reads the ledger. The fragments and the list of stale
//! taker-owned offers are handed to settlement.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use crate::amount::AmountError;
use crate::bridge::BridgeMatcher;
use crate::command::{Fragment, IncomingOrder};
use crate::config::EngineConfig;
use crate::direct::DirectMatcher;
use crate::ledger::{LedgerRead, OfferId};
use crate::order_book::BookIndex;

/// What is left of an order while it crosses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Remaining {
    /// `out` still wanted; `None` for sell orders, which take all they can
    pub out: Option<Decimal>,
    /// `in` still spendable
    pub input: Decimal,
}

impl Remaining {
    /// Starting point for `order` when the taker can spend `funds` of `in`.
    pub fn new(order: &IncomingOrder, funds: Decimal) -> Self {
        Self {
            out: (!order.sell).then_some(order.taker_pays.value),
            input: order.taker_gets.value.min(funds),
        }
    }

    #[inline]
    pub fn out_delivered(&self) -> bool {
        self.out.is_some_and(|o| o <= Decimal::ZERO)
    }

    #[inline]
    pub fn input_spent(&self) -> bool {
        self.input <= Decimal::ZERO
    }

    fn apply(&mut self, fragment: &Fragment) {
        if let Some(out) = self.out.as_mut() {
            *out -= fragment.output.value;
        }
        self.input -= fragment.input.value;
    }
}

/// Offers an order has crossed so far, stale ones included.
#[derive(Clone, Debug, Default)]
pub struct CrossingBudget {
    touched: usize,
    stale: Vec<OfferId>,
}

impl CrossingBudget {
    /// Count a standing offer the order takes liquidity from.
    pub fn touch(&mut self) {
        self.touched += 1;
    }

    /// Record a taker-owned offer met while crossing.
    pub fn stale(&mut self, id: OfferId) {
        self.stale.push(id);
    }

    pub fn crossed(&self) -> usize {
        self.touched + self.stale.len()
    }

    pub fn stale_offers(&self) -> &[OfferId] {
        &self.stale
    }
}

/// Why crossing stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The order got what it asked for (or, for a sell order, spent it all)
    Satisfied,
    /// No offer left at or under the taker's limit
    LimitReached,
    /// The taker ran out of funds before spending `taker_gets`
    FundsExhausted,
    /// The crossing limit was hit
    OfferLimit,
    /// The next step would round to nothing
    Dust,
}

/// Output of [`cross`].
#[derive(Clone, Debug)]
pub struct CrossingResult {
    /// Fragments in the order they must settle
    pub fragments: Vec<Fragment>,
    /// Taker-owned offers met while crossing, to be canceled
    pub stale: Vec<OfferId>,
    pub stop: StopReason,
}

impl CrossingResult {
    /// Whether a non-sell order's remainder may be booked after this crossing.
    /// Only an order that ran out of liquidity under its limit can book
    /// without its remainder crossing what is left.
    pub fn remainder_bookable(&self) -> bool {
        self.stop == StopReason::LimitReached
    }
}

/// Cross `order` against the books of `index`, reading offers from `view`.
///
/// `funds` is what the taker can spend of `in`.
pub fn cross<V: LedgerRead + ?Sized>(
    view: &V,
    index: &BookIndex,
    config: &EngineConfig,
    order: &IncomingOrder,
    funds: Decimal,
) -> Result<CrossingResult, AmountError> {
    let limit = order.limit_quality()?;
    let funds_bound = funds < order.taker_gets.value;
    let mut remaining = Remaining::new(order, funds);
    let mut budget = CrossingBudget::default();
    let mut fragments = Vec::new();

    let mut direct = DirectMatcher::new(index, order, config.precision);
    let mut bridge = if config.bridging {
        BridgeMatcher::new(index, order, config.precision)
    } else {
        None
    };

    let stop = loop {
        if remaining.out_delivered() {
            break StopReason::Satisfied;
        }
        if remaining.input_spent() {
            break if funds_bound {
                StopReason::FundsExhausted
            } else {
                StopReason::Satisfied
            };
        }
        if budget.crossed() >= config.max_offers_crossed {
            break StopReason::OfferLimit;
        }

        let direct_quality = direct
            .best_quality(view, &mut budget)
            .filter(|q| *q <= limit);
        let bridge_quality = bridge
            .as_mut()
            .and_then(|b| b.best_quality(view, &mut budget))
            .filter(|q| *q <= limit);

        let fragment = match (direct_quality, bridge_quality, bridge.as_mut()) {
            (dq, Some(bq), Some(matcher)) if dq.map_or(true, |dq| bq <= dq) => {
                let ceiling = dq.map_or(limit, |dq| dq.min(limit));
                matcher.next_fragment(view, &remaining, ceiling, &mut budget)?
            }
            (Some(_), _, _) => direct.next_fragment(view, &remaining, limit, &mut budget)?,
            _ => break StopReason::LimitReached,
        };

        match fragment {
            Some(fragment) => {
                remaining.apply(&fragment);
                fragments.push(fragment);
            }
            None => break StopReason::Dust,
        }
    };

    debug!(
        taker = %order.taker,
        fragments = fragments.len(),
        stale = budget.stale_offers().len(),
        stop = ?stop,
        "crossing finished"
    );

    Ok(CrossingResult {
        fragments,
        stale: budget.stale,
        stop,
    })
}
