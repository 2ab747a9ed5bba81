//! # Offer-Cross
//!
//! A deterministic offer-crossing engine for a ledger of native balances,
//! trust lines and standing offers, plus a read-only invariant verifier.
//!
//! ## Design Principles
//!
//! - **Snapshots, not shared state**: the engine never edits a snapshot in
//!   place; every command runs in a copy-on-write sandbox and its change set
//!   derives the next snapshot
//! - **Exact arithmetic**: qualities are exact ratios, amounts are decimals
//!   rounded only when committed
//! - **Deterministic**: ordered maps drive every result, so replicas applying
//!   the same batch report the same state hash
//!
//! ## Architecture
//!
//! ```text
//! [Command] --> [Direct Matcher] --+
//!          \                       +--> [Crossing] --> [Settlement] --> [Snapshot']
//!           --> [Bridge Matcher] --+                                        |
//!                                                                      [Verifier]
//! ```

pub mod amount;
pub mod bridge;
pub mod builder;
pub mod command;
pub mod config;
pub mod direct;
pub mod directory;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod matching;
pub mod order_book;
pub mod replay;
pub mod settlement;
pub mod verifier;

// Re-exports for convenience
pub use amount::{AccountId, Amount, Asset, Currency, Quality};
pub use builder::SnapshotBuilder;
pub use command::{
    CancelOffer, Command, Fragment, FragmentPath, IncomingOrder, OrderOutcome, OrderStatus, RejectReason,
    ReplaceOffer, TradeLog,
};
pub use config::EngineConfig;
pub use engine::{apply_batch, Engine};
pub use error::{Error, Result};
pub use ledger::{BookKey, LedgerSnapshot, OfferId};
pub use order_book::BookIndex;
pub use verifier::{verify, AuditReport};
