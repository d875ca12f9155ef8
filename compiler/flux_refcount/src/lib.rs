//! Reference-count placement for Flux.
//!
//! Every future in a Flux program carries a read count and a write count.
//! Tasks block on unset futures and storage is reclaimed when both counts
//! reach zero, so the compiler must place increments and decrements such
//! that every count returns to zero exactly once, never early.
//!
//! This crate computes that placement for one function at a time:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `alias` | Canonical storage locations ([`AliasKey`]) and aliasing facts |
//! | `ledger` | Pending increments/decrements per location ([`RefcountLedger`]) |
//! | `uses` | Which locations a statement touches, synchronously or not |
//! | `placement` | Bottom-up counting and top-down emission ([`place_refcounts`]) |
//! | `balance` | Zero-sum simulation of a placed function ([`check_balance`]) |
//!
//! # Usage
//!
//! ```text
//! let stats = place_refcounts(&mut func, &mut program.vars, &mut program.names, flags)?;
//! check_balance(&func, &program.vars, 3)?;
//! ```
//!
//! Failures are internal-consistency errors ([`RefcountError`]): they mean
//! an earlier transformation produced a tree placement cannot prove safe.

mod alias;
pub mod balance;
mod error;
mod ledger;
mod placement;
mod uses;

#[cfg(test)]
mod test_helpers;

pub use alias::{AliasKey, AliasModel, PathElem, Resolved};
pub use balance::{check_balance, net_placement, BalanceViolation, NetPlacement};
pub use error::RefcountError;
pub use ledger::{LedgerEntry, RefcountLedger};
pub use placement::{place_refcounts, PlacementStats};
