//! Settlement - writing matched fragments into the ledger.
//!
//! Each fragment is applied to a child [`Sandbox`] first and only folded into
//! the order's sandbox once every offer reduction and balance change in it
//! has passed its checks, so a violating fragment leaves nothing behind.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::amount::{mul_ratio, round_down, AccountId, Amount, AmountError, Asset, Currency, Precision};
use crate::command::{Fragment, IncomingOrder, OfferFill};
use crate::config::{EngineConfig, ReserveConfig};
use crate::direct::leftover;
use crate::directory::{create_offer, delete_offer};
use crate::ledger::{LedgerEntry, LedgerRead, LedgerWrite, LineKey, Offer, OfferId, Sandbox};

/// Why a fragment could not be settled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("offer {0} no longer exists")]
    OfferMissing(OfferId),

    #[error("offer {0} cannot cover the fill")]
    OfferOverdrawn(OfferId),

    #[error("account {0} does not exist")]
    MissingAccount(AccountId),

    #[error("no {currency} trust line between {account} and {issuer}")]
    MissingTrustLine {
        account: AccountId,
        issuer: AccountId,
        currency: Currency,
    },

    #[error("{account} would hold {balance} native, reserve is {required}")]
    Reserve {
        account: AccountId,
        balance: Decimal,
        required: Decimal,
    },

    #[error("{account} would hold {holding} of {asset}, outside its trust limits")]
    TrustLimit {
        account: AccountId,
        asset: Asset,
        holding: Decimal,
    },

    #[error(transparent)]
    Amount(#[from] AmountError),
}

// ============================================================================
// Funds
// ============================================================================

/// How much of `asset` `account` can spend.
///
/// Native: balance above the reserve. Issued: the positive holding on the
/// line to the issuer; an issuer spends its own currency without bound.
pub fn spendable<V: LedgerRead + ?Sized>(
    view: &V,
    account: &AccountId,
    asset: &Asset,
    reserve: &ReserveConfig,
) -> Decimal {
    match asset {
        Asset::Native => view
            .account(account)
            .map(|root| (root.balance - reserve.required(root.owner_count)).max(Decimal::ZERO))
            .unwrap_or(Decimal::ZERO),
        Asset::Issued { currency, issuer } => {
            if account == issuer {
                return Decimal::MAX;
            }
            view.trust_line(&LineKey::new(account, issuer, currency))
                .map(|line| line.holding(account).max(Decimal::ZERO))
                .unwrap_or(Decimal::ZERO)
        }
    }
}

// ============================================================================
// Fragments
// ============================================================================

/// Validate and apply one fragment. On error nothing is written.
pub fn settle_fragment<V: LedgerRead>(
    sandbox: &mut Sandbox<'_, V>,
    fragment: &Fragment,
    config: &EngineConfig,
) -> Result<(), FragmentError> {
    let changes = {
        let mut child = Sandbox::new(&*sandbox);
        write_fragment(&mut child, fragment, config)?;
        child.into_changes()
    };
    sandbox.absorb(changes);
    Ok(())
}

fn write_fragment<W: LedgerWrite + ?Sized>(
    view: &mut W,
    fragment: &Fragment,
    config: &EngineConfig,
) -> Result<(), FragmentError> {
    // Offers first: removing exhausted ones lowers their owners' reserve
    for fill in &fragment.offers_consumed {
        reduce_offer(view, fill, &config.precision)?;
    }

    let mut net: BTreeMap<(AccountId, Asset), Decimal> = BTreeMap::new();
    for delta in &fragment.deltas {
        let total = net.entry((delta.account.clone(), delta.asset.clone())).or_default();
        *total = total.checked_add(delta.value).ok_or(AmountError::Overflow)?;
    }
    for ((account, asset), value) in net {
        if !value.is_zero() {
            apply_delta(view, &account, &asset, value, &config.reserve)?;
        }
    }
    Ok(())
}

/// Take `fill` out of its offer. A partially used offer keeps its rate: the
/// leftover `taker_pays` is repriced from the remaining `taker_gets`.
fn reduce_offer<W: LedgerWrite + ?Sized>(
    view: &mut W,
    fill: &OfferFill,
    precision: &Precision,
) -> Result<(), FragmentError> {
    let Some(mut offer) = view.offer(&fill.offer).cloned() else {
        return Err(FragmentError::OfferMissing(fill.offer.clone()));
    };

    let pays = offer.taker_pays.checked_sub(&fill.pays)?;
    let gets = offer.taker_gets.checked_sub(&fill.gets)?;
    if pays.value.is_sign_negative() || gets.value.is_sign_negative() {
        return Err(FragmentError::OfferOverdrawn(fill.offer.clone()));
    }

    if fill.exhausted || pays.is_zero() || gets.is_zero() {
        delete_offer(view, &fill.offer);
    } else {
        let (pays_left, gets_left) = leftover(
            offer.taker_pays.value,
            offer.taker_gets.value,
            fill.gets.value,
            precision.scale_for(&offer.taker_pays.asset),
        )?;
        offer.taker_pays = Amount::new(pays_left, pays.asset);
        offer.taker_gets = Amount::new(gets_left, gets.asset);
        view.write(LedgerEntry::Offer(offer));
    }
    Ok(())
}

/// Apply a net balance change of `account` in `asset`.
///
/// The issuer's own side of its currency is implied by the holders' lines
/// and is not tracked.
fn apply_delta<W: LedgerWrite + ?Sized>(
    view: &mut W,
    account: &AccountId,
    asset: &Asset,
    value: Decimal,
    reserve: &ReserveConfig,
) -> Result<(), FragmentError> {
    let Some(mut root) = view.account(account).cloned() else {
        return Err(FragmentError::MissingAccount(account.clone()));
    };

    match asset {
        Asset::Native => {
            root.balance = root.balance.checked_add(value).ok_or(AmountError::Overflow)?;
            let required = reserve.required(root.owner_count);
            if value.is_sign_negative() && root.balance < required {
                return Err(FragmentError::Reserve {
                    account: account.clone(),
                    balance: root.balance,
                    required,
                });
            }
            view.write(LedgerEntry::Account(root));
        }
        Asset::Issued { currency, issuer } => {
            if account == issuer {
                return Ok(());
            }
            let key = LineKey::new(account, issuer, currency);
            let Some(mut line) = view.trust_line(&key).cloned() else {
                return Err(FragmentError::MissingTrustLine {
                    account: account.clone(),
                    issuer: issuer.clone(),
                    currency: currency.clone(),
                });
            };
            let holding = line
                .holding(account)
                .checked_add(value)
                .ok_or(AmountError::Overflow)?;
            let over_limit = value.is_sign_positive() && holding > line.limit_of(account);
            let over_credit = value.is_sign_negative() && holding < -line.limit_of(issuer);
            if over_limit || over_credit {
                return Err(FragmentError::TrustLimit {
                    account: account.clone(),
                    asset: asset.clone(),
                    holding,
                });
            }
            line.set_holding(account, holding);
            view.write(LedgerEntry::TrustLine(line));
        }
    }
    Ok(())
}

// ============================================================================
// Remainder
// ============================================================================

/// Book what is left of a non-sell order as a standing offer at the order's
/// own rate, the `in` side rounded down.
///
/// Returns `Ok(None)` when nothing, or only dust, is left.
pub fn book_remainder<W: LedgerWrite + ?Sized>(
    view: &mut W,
    order: &IncomingOrder,
    sequence: u32,
    received: Decimal,
    paid: Decimal,
    config: &EngineConfig,
) -> Result<Option<Offer>, FragmentError> {
    let out_left = order.taker_pays.value - received;
    if out_left <= Decimal::ZERO {
        return Ok(None);
    }
    let in_scale = config.precision.scale_for(&order.taker_gets.asset);
    let in_left = round_down(
        mul_ratio(out_left, order.taker_gets.value, order.taker_pays.value)?,
        in_scale,
    )
    .min(order.taker_gets.value - paid);
    if in_left <= Decimal::ZERO {
        return Ok(None);
    }

    let Some(root) = view.account(&order.taker) else {
        return Err(FragmentError::MissingAccount(order.taker.clone()));
    };
    let required = config.reserve.required(root.owner_count + 1);
    if root.balance < required {
        return Err(FragmentError::Reserve {
            account: order.taker.clone(),
            balance: root.balance,
            required,
        });
    }

    let offer = Offer {
        owner: order.taker.clone(),
        sequence,
        taker_pays: Amount::new(out_left, order.taker_pays.asset.clone()),
        taker_gets: Amount::new(in_left, order.taker_gets.asset.clone()),
        book_directory: order.remainder_book(),
        book_page: 0,
    };
    let id = create_offer(view, offer, config.directory_page_size);
    debug!(offer = %id, "remainder booked");
    Ok(view.offer(&id).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SnapshotBuilder;
    use crate::command::{BalanceDelta, FragmentPath};
    use crate::ledger::{BookKey, LedgerSnapshot};
    use crate::amount::Quality;
    use rust_decimal_macros::dec;

    fn usd() -> Asset {
        Asset::issued("USD", "gw")
    }

    /// bob offers 100 USD for 90 native; alice holds 50 USD and 100 native
    fn ledger() -> LedgerSnapshot {
        SnapshotBuilder::new(1)
            .account("gw", dec!(1000))
            .account("alice", dec!(100))
            .account("bob", dec!(1000))
            .trust_line("alice", "USD", "gw", dec!(500))
            .trust_line("bob", "USD", "gw", dec!(500))
            .fund("alice", Amount::new(dec!(50), usd()))
            .fund("bob", Amount::new(dec!(100), usd()))
            .offer("bob", Amount::native(dec!(90)), Amount::new(dec!(100), usd()))
            .build()
    }

    fn delta(account: &str, asset: Asset, value: Decimal) -> BalanceDelta {
        BalanceDelta {
            account: AccountId::new(account),
            asset,
            value,
        }
    }

    fn fragment(out: Decimal, input: Decimal, exhausted: bool) -> Fragment {
        Fragment {
            path: FragmentPath::Direct,
            quality: Quality::new(dec!(90), dec!(100)).unwrap(),
            input: Amount::native(input),
            output: Amount::new(out, usd()),
            offers_consumed: vec![OfferFill {
                offer: OfferId::new(AccountId::new("bob"), 1),
                book: BookKey::new(usd(), Asset::Native),
                pays: Amount::native(input),
                gets: Amount::new(out, usd()),
                exhausted,
            }],
            deltas: vec![
                delta("alice", usd(), out),
                delta("alice", Asset::Native, -input),
                delta("bob", usd(), -out),
                delta("bob", Asset::Native, input),
            ],
            native_flow: Decimal::ZERO,
        }
    }

    #[test]
    fn test_spendable() {
        let l = ledger();
        let reserve = ReserveConfig::default();
        // 100 - (10 + 2 × 1 line)
        assert_eq!(spendable(&l, &AccountId::new("alice"), &Asset::Native, &reserve), dec!(88));
        assert_eq!(spendable(&l, &AccountId::new("alice"), &usd(), &reserve), dec!(50));
        assert_eq!(spendable(&l, &AccountId::new("gw"), &usd(), &reserve), Decimal::MAX);
        assert_eq!(
            spendable(&l, &AccountId::new("alice"), &Asset::issued("EUR", "gw"), &reserve),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_partial_fragment_shrinks_offer() {
        let l = ledger();
        let mut sandbox = Sandbox::new(&l);
        settle_fragment(&mut sandbox, &fragment(dec!(50), dec!(45), false), &EngineConfig::default()).unwrap();

        let offer = sandbox.offer(&OfferId::new(AccountId::new("bob"), 1)).unwrap();
        assert_eq!(offer.taker_gets.value, dec!(50));
        assert_eq!(offer.taker_pays.value, dec!(45));

        let alice = AccountId::new("alice");
        let line = sandbox.trust_line(&LineKey::new(&alice, &AccountId::new("gw"), &Currency::new("USD"))).unwrap();
        assert_eq!(line.holding(&alice), dec!(100));
        assert_eq!(sandbox.account(&alice).unwrap().balance, dec!(55));
    }

    #[test]
    fn test_exhausted_offer_removed_and_owner_count_dropped() {
        let l = ledger();
        let bob = AccountId::new("bob");
        let before = l.account(&bob).unwrap().owner_count;
        let mut sandbox = Sandbox::new(&l);
        let config = EngineConfig::default();
        // alice can only spend 88 native over reserve, so give her more first
        let mut f = fragment(dec!(100), dec!(90), true);
        f.deltas[1].value = dec!(-85);
        f.offers_consumed[0].pays = Amount::native(dec!(85));
        f.deltas[3].value = dec!(85);
        settle_fragment(&mut sandbox, &f, &config).unwrap();

        assert!(sandbox.offer(&OfferId::new(bob.clone(), 1)).is_none());
        assert_eq!(sandbox.account(&bob).unwrap().owner_count, before - 1);
    }

    #[test]
    fn test_reserve_violation_writes_nothing() {
        let l = ledger();
        let mut sandbox = Sandbox::new(&l);
        // alice would drop to 10 native, under her 12 reserve
        let err = settle_fragment(&mut sandbox, &fragment(dec!(100), dec!(90), true), &EngineConfig::default())
            .unwrap_err();
        assert!(matches!(err, FragmentError::Reserve { .. }));
        assert!(sandbox.is_empty());
    }

    #[test]
    fn test_trust_limit_violation() {
        let l = ledger();
        let mut sandbox = Sandbox::new(&l);
        let mut config = EngineConfig::default();
        config.reserve.base = Decimal::ZERO;
        config.reserve.increment = Decimal::ZERO;

        let mut f = fragment(dec!(100), dec!(90), true);
        // alice's limit is 500 and she holds 50
        f.deltas[0].value = dec!(460);
        let err = settle_fragment(&mut sandbox, &f, &config).unwrap_err();
        assert!(matches!(err, FragmentError::TrustLimit { .. }));
    }

    #[test]
    fn test_partial_fragment_reprices_leftover() {
        // bob gives 3 USD for 1 native; alice takes 1 USD and pays 0.333334
        let l = SnapshotBuilder::new(1)
            .account("gw", dec!(1000))
            .account("alice", dec!(100))
            .account("bob", dec!(1000))
            .trust_line("alice", "USD", "gw", dec!(500))
            .trust_line("bob", "USD", "gw", dec!(500))
            .fund("bob", Amount::new(dec!(3), usd()))
            .offer("bob", Amount::native(dec!(1)), Amount::new(dec!(3), usd()))
            .build();
        let mut sandbox = Sandbox::new(&l);
        let mut f = fragment(dec!(1), dec!(0.333334), false);
        f.quality = Quality::new(dec!(1), dec!(3)).unwrap();
        settle_fragment(&mut sandbox, &f, &EngineConfig::default()).unwrap();

        let offer = sandbox.offer(&OfferId::new(AccountId::new("bob"), 1)).unwrap();
        assert_eq!(offer.taker_gets.value, dec!(2));
        // 2 / 3 rounded up, not 1 - 0.333334
        assert_eq!(offer.taker_pays.value, dec!(0.666667));
        assert!(offer.quality().unwrap() >= Quality::new(dec!(1), dec!(3)).unwrap());
    }

    #[test]
    fn test_balance_overflow_is_an_error() {
        let l = SnapshotBuilder::new(1)
            .account("gw", dec!(1000))
            .account("alice", dec!(100))
            .account("bob", Decimal::MAX)
            .trust_line("alice", "USD", "gw", dec!(500))
            .trust_line("bob", "USD", "gw", dec!(500))
            .fund("bob", Amount::new(dec!(100), usd()))
            .offer("bob", Amount::native(dec!(90)), Amount::new(dec!(100), usd()))
            .build();
        let mut sandbox = Sandbox::new(&l);
        let err = settle_fragment(&mut sandbox, &fragment(dec!(10), dec!(9), false), &EngineConfig::default())
            .unwrap_err();
        assert_eq!(err, FragmentError::Amount(AmountError::Overflow));
        assert!(sandbox.is_empty());
    }

    #[test]
    fn test_missing_trust_line() {
        let l = SnapshotBuilder::new(1)
            .account("alice", dec!(1000))
            .account("bob", dec!(1000))
            .trust_line("bob", "USD", "gw", dec!(500))
            .fund("bob", Amount::new(dec!(100), usd()))
            .offer("bob", Amount::native(dec!(90)), Amount::new(dec!(100), usd()))
            .build();
        let mut sandbox = Sandbox::new(&l);
        let err = settle_fragment(&mut sandbox, &fragment(dec!(10), dec!(9), false), &EngineConfig::default())
            .unwrap_err();
        assert!(matches!(err, FragmentError::MissingTrustLine { .. }));
    }

    #[test]
    fn test_book_remainder_at_order_rate() {
        let l = ledger();
        let mut sandbox = Sandbox::new(&l);
        let order = IncomingOrder::new("alice", Amount::new(dec!(30), usd()), Amount::native(dec!(10)));
        let offer = book_remainder(&mut sandbox, &order, 1, dec!(10), dec!(3), &EngineConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(offer.taker_pays.value, dec!(20));
        // 20 × 10 / 30 rounded down at native scale
        assert_eq!(offer.taker_gets.value, dec!(6.666666));
        assert_eq!(sandbox.account(&AccountId::new("alice")).unwrap().owner_count, 2);
    }

    #[test]
    fn test_book_remainder_needs_reserve() {
        let l = ledger();
        let mut sandbox = Sandbox::new(&l);
        let mut config = EngineConfig::default();
        config.reserve.base = dec!(99);
        let order = IncomingOrder::new("alice", Amount::new(dec!(30), usd()), Amount::native(dec!(10)));
        let err = book_remainder(&mut sandbox, &order, 1, Decimal::ZERO, Decimal::ZERO, &config).unwrap_err();
        assert!(matches!(err, FragmentError::Reserve { .. }));
    }

    #[test]
    fn test_nothing_left_to_book() {
        let l = ledger();
        let mut sandbox = Sandbox::new(&l);
        let order = IncomingOrder::new("alice", Amount::new(dec!(30), usd()), Amount::native(dec!(10)));
        let booked = book_remainder(&mut sandbox, &order, 1, dec!(30), dec!(10), &EngineConfig::default()).unwrap();
        assert!(booked.is_none());
    }
}
