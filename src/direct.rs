//! Direct Matcher - crossing an order against the book giving `out` for `in`.
//!
//! Also home of [`BookCursor`], the per-book position both matchers walk
//! with. Matching only reads the ledger; the fragments it yields are written
//! by the settlement layer.

use rust_decimal::Decimal;
use tracing::debug;

use crate::amount::{mul_ratio, round_down, round_up, AccountId, Amount, AmountError, Asset, Precision, Quality};
use crate::command::{BalanceDelta, Fragment, FragmentPath, IncomingOrder, OfferFill};
use crate::ledger::{BookKey, LedgerRead, OfferId};
use crate::matching::{CrossingBudget, Remaining};
use crate::order_book::{BookIndex, OrderBook};

// ============================================================================
// Book cursor
// ============================================================================

/// Best unconsumed offer under a cursor, with what is left of it.
#[derive(Clone, Debug)]
pub struct Tip {
    pub id: OfferId,
    pub book: BookKey,
    /// Quality the offer was booked at
    pub quality: Quality,
    /// Remaining `taker_pays`
    pub pays: Amount,
    /// Remaining `taker_gets`
    pub gets: Amount,
}

/// Position in one book for the duration of one crossing.
///
/// Remembers how much of a partially used offer is left, since the ledger
/// view is not written until settlement.
pub struct BookCursor<'a> {
    key: BookKey,
    book: Option<&'a OrderBook>,
    position: usize,
    remaining: Option<(Amount, Amount)>,
    /// Scale of the book's `taker_pays` asset
    pays_scale: u32,
}

impl<'a> BookCursor<'a> {
    pub fn new(index: &'a BookIndex, key: BookKey, precision: &Precision) -> Self {
        let book = index.book(&key);
        let pays_scale = precision.scale_for(&key.pays);
        Self {
            key,
            book,
            position: 0,
            remaining: None,
            pays_scale,
        }
    }

    #[inline]
    pub fn key(&self) -> &BookKey {
        &self.key
    }

    /// Current best offer, skipping offers that are gone from `view` and
    /// offers owned by `taker`. The latter are recorded in `budget` as stale.
    pub fn peek<V: LedgerRead + ?Sized>(
        &mut self,
        view: &V,
        taker: &AccountId,
        budget: &mut CrossingBudget,
    ) -> Option<Tip> {
        let book = self.book?;
        loop {
            let entry = book.offers.get(self.position)?;

            if let Some((pays, gets)) = &self.remaining {
                return Some(Tip {
                    id: entry.id.clone(),
                    book: self.key.clone(),
                    quality: entry.quality,
                    pays: pays.clone(),
                    gets: gets.clone(),
                });
            }

            let Some(offer) = view.offer(&entry.id) else {
                debug!(offer = %entry.id, "offer gone from view, skipping");
                self.position += 1;
                continue;
            };

            if offer.owner == *taker {
                budget.stale(entry.id.clone());
                self.position += 1;
                continue;
            }

            return Some(Tip {
                id: entry.id.clone(),
                book: self.key.clone(),
                quality: entry.quality,
                pays: offer.taker_pays.clone(),
                gets: offer.taker_gets.clone(),
            });
        }
    }

    /// Record that `gets` of the current offer was taken. Unless the offer
    /// is exhausted, what is left of it is priced as settlement will leave it.
    pub fn consume(
        &mut self,
        tip: &Tip,
        gets: Decimal,
        exhausted: bool,
        budget: &mut CrossingBudget,
    ) -> Result<(), AmountError> {
        if self.remaining.is_none() {
            budget.touch();
        }
        if exhausted {
            self.position += 1;
            self.remaining = None;
        } else {
            let (pays_left, gets_left) = leftover(tip.pays.value, tip.gets.value, gets, self.pays_scale)?;
            self.remaining = Some((
                Amount::new(pays_left, tip.pays.asset.clone()),
                Amount::new(gets_left, tip.gets.asset.clone()),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Fill arithmetic
// ============================================================================

/// How much of one offer a taker takes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fill {
    /// Taken from the offer's `taker_gets`, received by the taker
    pub out: Decimal,
    /// Paid into the offer's `taker_pays`
    pub input: Decimal,
    pub exhausted: bool,
}

/// What an offer asks once `gets_used` of its `gets` is taken: the rest of
/// `gets`, and its price at the offer's own rate rounded up to `pays_scale`.
///
/// A leftover never quotes a better rate than the offer it came from.
pub fn leftover(
    pays: Decimal,
    gets: Decimal,
    gets_used: Decimal,
    pays_scale: u32,
) -> Result<(Decimal, Decimal), AmountError> {
    let gets_left = gets - gets_used;
    let pays_left = round_up(mul_ratio(gets_left, pays, gets)?, pays_scale);
    Ok((pays_left, gets_left))
}

/// Size a fill against an offer with `pays`/`gets` left.
///
/// The taker's receipt is rounded down and its payment rounded up; a fill
/// that uses the whole offer takes its exact amounts. Returns `None` when
/// the fill rounds to nothing.
pub fn fill_offer(
    pays: Decimal,
    gets: Decimal,
    remaining: &Remaining,
    out_scale: u32,
    in_scale: u32,
) -> Result<Option<Fill>, AmountError> {
    let out_cap = remaining.out.map_or(gets, |o| o.min(gets));
    if out_cap == gets && pays <= remaining.input {
        return Ok(Some(Fill {
            out: gets,
            input: pays,
            exhausted: true,
        }));
    }

    let mut out = out_cap;
    if mul_ratio(out, pays, gets)? > remaining.input {
        out = mul_ratio(remaining.input, gets, pays)?;
    }
    let out = round_down(out, out_scale).min(gets);
    if out.is_zero() {
        return Ok(None);
    }

    let input = round_up(mul_ratio(out, pays, gets)?, in_scale)
        .min(pays)
        .min(remaining.input);
    if input.is_zero() {
        return Ok(None);
    }

    Ok(Some(Fill {
        out,
        input,
        exhausted: out == gets || input == pays,
    }))
}

// ============================================================================
// Direct matcher
// ============================================================================

/// Walks the direct book of one order in quality order.
pub struct DirectMatcher<'a> {
    cursor: BookCursor<'a>,
    taker: AccountId,
    in_asset: Asset,
    out_asset: Asset,
    precision: Precision,
}

impl<'a> DirectMatcher<'a> {
    pub fn new(index: &'a BookIndex, order: &IncomingOrder, precision: Precision) -> Self {
        Self {
            cursor: BookCursor::new(index, order.direct_book(), &precision),
            taker: order.taker.clone(),
            in_asset: order.input().asset.clone(),
            out_asset: order.output().asset.clone(),
            precision,
        }
    }

    /// Quality of the best offer left in the book.
    pub fn best_quality<V: LedgerRead + ?Sized>(&mut self, view: &V, budget: &mut CrossingBudget) -> Option<Quality> {
        self.cursor.peek(view, &self.taker, budget).map(|tip| tip.quality)
    }

    /// Take the next fragment from the book.
    ///
    /// Returns `None` once the book is exhausted, the best offer is worse
    /// than `ceiling`, or the fill rounds to nothing.
    pub fn next_fragment<V: LedgerRead + ?Sized>(
        &mut self,
        view: &V,
        remaining: &Remaining,
        ceiling: Quality,
        budget: &mut CrossingBudget,
    ) -> Result<Option<Fragment>, AmountError> {
        let Some(tip) = self.cursor.peek(view, &self.taker, budget) else {
            return Ok(None);
        };
        if tip.quality > ceiling {
            return Ok(None);
        }

        let Some(fill) = fill_offer(
            tip.pays.value,
            tip.gets.value,
            remaining,
            self.precision.scale_for(&self.out_asset),
            self.precision.scale_for(&self.in_asset),
        )?
        else {
            return Ok(None);
        };

        self.cursor.consume(&tip, fill.out, fill.exhausted, budget)?;
        debug!(
            offer = %tip.id,
            quality = %tip.quality,
            out = %fill.out,
            input = %fill.input,
            exhausted = fill.exhausted,
            "direct fragment"
        );

        let input = Amount::new(fill.input, self.in_asset.clone());
        let output = Amount::new(fill.out, self.out_asset.clone());
        let owner = tip.id.owner.clone();

        Ok(Some(Fragment {
            path: FragmentPath::Direct,
            quality: tip.quality,
            deltas: vec![
                BalanceDelta {
                    account: self.taker.clone(),
                    asset: self.out_asset.clone(),
                    value: fill.out,
                },
                BalanceDelta {
                    account: self.taker.clone(),
                    asset: self.in_asset.clone(),
                    value: -fill.input,
                },
                BalanceDelta {
                    account: owner.clone(),
                    asset: self.out_asset.clone(),
                    value: -fill.out,
                },
                BalanceDelta {
                    account: owner,
                    asset: self.in_asset.clone(),
                    value: fill.input,
                },
            ],
            offers_consumed: vec![OfferFill {
                offer: tip.id,
                book: tip.book,
                pays: input.clone(),
                gets: output.clone(),
                exhausted: fill.exhausted,
            }],
            input,
            output,
            native_flow: Decimal::ZERO,
        }))
    }
}
