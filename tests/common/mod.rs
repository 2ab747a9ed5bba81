//! Shared market fixture for the integration tests.

#![allow(dead_code)]

use offer_cross::ledger::LedgerRead;
use offer_cross::{
    AccountId, Amount, Asset, CancelOffer, Command, IncomingOrder, LedgerSnapshot, ReplaceOffer, SnapshotBuilder,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;

pub const TRADERS: usize = 8;
pub const ISSUERS: [&str; 2] = ["g1", "g2"];

pub fn trader(n: usize) -> String {
    format!("t{n}")
}

/// Assets traded in the market: native plus USD from both issuers and EUR
/// from the first.
pub fn assets() -> Vec<Asset> {
    vec![
        Asset::Native,
        Asset::issued("USD", "g1"),
        Asset::issued("USD", "g2"),
        Asset::issued("EUR", "g1"),
    ]
}

/// Traders trusting every issued asset, funded in all of them.
pub fn market() -> LedgerSnapshot {
    let mut builder = SnapshotBuilder::new(1);
    for issuer in ISSUERS {
        builder = builder.account(issuer, Decimal::from(1_000_000));
    }
    for n in 0..TRADERS {
        let name = trader(n);
        builder = builder.account(&name, Decimal::from(100_000));
        for asset in assets().iter().filter(|a| !a.is_native()) {
            let (currency, issuer) = issued_parts(asset);
            builder = builder
                .trust_line(&name, &currency, &issuer, Decimal::from(1_000_000))
                .fund(&name, Amount::new(Decimal::from(10_000), asset.clone()));
        }
    }
    builder.build()
}

fn issued_parts(asset: &Asset) -> (String, String) {
    let issuer = asset.issuer().map(|i| i.as_str().to_string()).unwrap_or_default();
    (asset.currency().as_str().to_string(), issuer)
}

/// Order trading two distinct assets at a price near par.
pub fn random_order(rng: &mut ChaCha8Rng, taker: &str) -> IncomingOrder {
    let assets = assets();
    let out = rng.gen_range(0..assets.len());
    let mut input = rng.gen_range(0..assets.len() - 1);
    if input >= out {
        input += 1;
    }

    // Four-decimal rates give ratios that do not divide evenly, so partial
    // fills have to round
    let pays = Decimal::new(rng.gen_range(100..50_000), 2);
    let rate = Decimal::new(rng.gen_range(9_000..=11_000), 4);
    let gets = (pays * rate).round_dp(4);

    let order = IncomingOrder::new(
        taker,
        Amount::new(pays, assets[out].clone()),
        Amount::new(gets, assets[input].clone()),
    );
    if rng.gen_bool(0.1) {
        order.sell()
    } else {
        order
    }
}

/// Deterministic mix of creates, cancels and replaces.
pub fn generate_commands(seed: u64, count: usize) -> Vec<Command> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut commands = Vec::with_capacity(count);
    // Upper bound on the sequences each trader has used so far
    let mut used = [0u32; TRADERS];

    for _ in 0..count {
        let n = rng.gen_range(0..TRADERS);
        let name = trader(n);
        let roll: f64 = rng.gen();

        let cmd = if used[n] > 0 && roll < 0.15 {
            Command::Cancel(CancelOffer {
                owner: AccountId::new(name),
                sequence: rng.gen_range(1..=used[n]),
            })
        } else if used[n] > 0 && roll < 0.2 {
            let sequence = rng.gen_range(1..=used[n]);
            Command::Replace(ReplaceOffer {
                sequence,
                order: random_order(&mut rng, &name),
            })
        } else {
            Command::Create(random_order(&mut rng, &name))
        };
        used[n] += 1;
        commands.push(cmd);
    }

    commands
}

/// Native held by all accounts.
pub fn total_native(snapshot: &LedgerSnapshot) -> Decimal {
    snapshot.accounts().map(|a| a.balance).sum()
}

/// Amount of `asset` held by accounts other than its issuer.
pub fn total_issued(snapshot: &LedgerSnapshot, asset: &Asset) -> Decimal {
    let Some(issuer) = asset.issuer() else {
        return total_native(snapshot);
    };
    let currency = asset.currency();
    snapshot
        .trust_lines()
        .filter(|line| line.currency == currency)
        .filter_map(|line| {
            if &line.low == issuer {
                Some(line.holding(&line.high))
            } else if &line.high == issuer {
                Some(line.holding(&line.low))
            } else {
                None
            }
        })
        .sum()
}

pub fn sequence_of(snapshot: &LedgerSnapshot, account: &str) -> u32 {
    snapshot
        .account(&AccountId::new(account))
        .map(|a| a.sequence)
        .unwrap_or_default()
}
