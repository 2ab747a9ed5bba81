//! Bridge Matcher - crossing through the native asset.
//!
//! Path `in → native → out` over two books: leg 1 holds offers giving native
//! for `in` (quality q1), leg 2 offers giving `out` for native (q2). The
//! combined quality of the two best offers is `q1 × q2`. Each step is sized
//! by whichever constraint binds first: leg 2's remaining `out`, leg 1's
//! remaining native, the order's remaining `out`, or its remaining `in`.
//! Native only passes through: leg 1's owner gives exactly what leg 2's
//! owner receives.

use rust_decimal::Decimal;
use tracing::debug;

use crate::amount::{mul_ratio, round_down, round_up, AccountId, Amount, AmountError, Asset, Precision, Quality};
use crate::command::{BalanceDelta, Fragment, FragmentPath, IncomingOrder, OfferFill};
use crate::direct::BookCursor;
use crate::ledger::{BookKey, LedgerRead};
use crate::matching::{CrossingBudget, Remaining};
use crate::order_book::BookIndex;

pub struct BridgeMatcher<'a> {
    /// Offers giving native for `in`
    leg1: BookCursor<'a>,
    /// Offers giving `out` for native
    leg2: BookCursor<'a>,
    taker: AccountId,
    in_asset: Asset,
    out_asset: Asset,
    precision: Precision,
}

impl<'a> BridgeMatcher<'a> {
    /// Matcher for `order`, or `None` when one side of the order is already
    /// native and there is nothing to bridge.
    pub fn new(index: &'a BookIndex, order: &IncomingOrder, precision: Precision) -> Option<Self> {
        let in_asset = order.input().asset.clone();
        let out_asset = order.output().asset.clone();
        if in_asset.is_native() || out_asset.is_native() {
            return None;
        }
        Some(Self {
            leg1: BookCursor::new(index, BookKey::new(Asset::Native, in_asset.clone()), &precision),
            leg2: BookCursor::new(index, BookKey::new(out_asset.clone(), Asset::Native), &precision),
            taker: order.taker.clone(),
            in_asset,
            out_asset,
            precision,
        })
    }

    /// Combined quality of the two legs' best offers.
    pub fn best_quality<V: LedgerRead + ?Sized>(&mut self, view: &V, budget: &mut CrossingBudget) -> Option<Quality> {
        let q1 = self.leg1.peek(view, &self.taker, budget)?.quality;
        let q2 = self.leg2.peek(view, &self.taker, budget)?.quality;
        q1.compose(&q2).ok()
    }

    /// Take the next bridged fragment.
    ///
    /// Returns `None` when either leg is exhausted, the combined quality is
    /// worse than `ceiling`, or the step rounds to nothing.
    pub fn next_fragment<V: LedgerRead + ?Sized>(
        &mut self,
        view: &V,
        remaining: &Remaining,
        ceiling: Quality,
        budget: &mut CrossingBudget,
    ) -> Result<Option<Fragment>, AmountError> {
        let Some(a) = self.leg1.peek(view, &self.taker, budget) else {
            return Ok(None);
        };
        let Some(b) = self.leg2.peek(view, &self.taker, budget) else {
            return Ok(None);
        };
        let quality = a.quality.compose(&b.quality)?;
        if quality > ceiling {
            return Ok(None);
        }

        let out_scale = self.precision.scale_for(&self.out_asset);
        let native_scale = self.precision.scale_for(&Asset::Native);
        let in_scale = self.precision.scale_for(&self.in_asset);

        // a: pays `in`, gets native. b: pays native, gets `out`.
        let (pa, ga) = (a.pays.value, a.gets.value);
        let (pb, gb) = (b.pays.value, b.gets.value);

        // Largest `out` each constraint allows
        let mut out = gb;
        if let Some(wanted) = remaining.out {
            out = out.min(wanted);
        }
        out = out.min(mul_ratio(ga, gb, pb)?);
        let affordable = mul_ratio(mul_ratio(remaining.input, ga, pa)?, gb, pb)?;
        out = out.min(affordable);

        let native = if out >= gb {
            out = gb;
            pb
        } else {
            out = round_down(out, out_scale);
            round_up(mul_ratio(out, pb, gb)?, native_scale)
        }
        .min(ga)
        .min(pb);

        if out.is_zero() || native.is_zero() {
            return Ok(None);
        }

        let input = if native == ga {
            pa
        } else {
            round_up(mul_ratio(native, pa, ga)?, in_scale)
        }
        .min(pa)
        .min(remaining.input);
        if input.is_zero() {
            return Ok(None);
        }

        let leg1_done = native == ga || input == pa;
        let leg2_done = out == gb || native == pb;
        self.leg1.consume(&a, native, leg1_done, budget)?;
        self.leg2.consume(&b, out, leg2_done, budget)?;

        debug!(
            leg1 = %a.id,
            leg2 = %b.id,
            quality = %quality,
            out = %out,
            native = %native,
            input = %input,
            "bridged fragment"
        );

        let a_owner = a.id.owner.clone();
        let b_owner = b.id.owner.clone();
        let delta = |account: &AccountId, asset: &Asset, value: Decimal| BalanceDelta {
            account: account.clone(),
            asset: asset.clone(),
            value,
        };

        Ok(Some(Fragment {
            path: FragmentPath::Bridged,
            quality,
            input: Amount::new(input, self.in_asset.clone()),
            output: Amount::new(out, self.out_asset.clone()),
            deltas: vec![
                delta(&self.taker, &self.out_asset, out),
                delta(&self.taker, &self.in_asset, -input),
                delta(&a_owner, &self.in_asset, input),
                delta(&a_owner, &Asset::Native, -native),
                delta(&b_owner, &Asset::Native, native),
                delta(&b_owner, &self.out_asset, -out),
            ],
            offers_consumed: vec![
                OfferFill {
                    offer: a.id,
                    book: a.book,
                    pays: Amount::new(input, self.in_asset.clone()),
                    gets: Amount::native(native),
                    exhausted: leg1_done,
                },
                OfferFill {
                    offer: b.id,
                    book: b.book,
                    pays: Amount::native(native),
                    gets: Amount::new(out, self.out_asset.clone()),
                    exhausted: leg2_done,
                },
            ],
            native_flow: native,
        }))
    }
}
