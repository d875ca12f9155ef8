//! Congruence-based value numbering for Flux.
//!
//! Value numbering finds operands that provably hold the same value, or
//! name the same storage, and rewrites a function to use the cheapest
//! usable one. It also folds operations over known constants and turns
//! recomputations into copies.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `cv` | Computed values ([`ComputedValue`], [`ArgOrCv`]) |
//! | `union_find` | Scoped union-find with rollback ([`ScopedUnionFind`]) |
//! | `congruence` | Value and alias classes ([`CongruenceModel`]) |
//! | `fold` | Constant folding ([`eval`]) |
//! | `algebra` | `x + c` normalization |
//! | `init` | Definite initialization ([`InitTracker`]) |
//! | `pass` | The rewriting walk ([`number_values`]) |
//!
//! # Usage
//!
//! ```text
//! let stats = number_values(
//!     &mut func,
//!     &program.vars,
//!     &program.sigs,
//!     &program.globals,
//!     &program.names,
//!     flags,
//! )?;
//! ```
//!
//! Errors ([`VnError`]) are internal-consistency failures: two classes that
//! cannot hold the same value were about to be merged.

mod algebra;
mod congruence;
mod cv;
mod error;
mod fold;
mod init;
mod pass;
pub mod union_find;

#[cfg(test)]
mod test_helpers;

pub use congruence::{CongruenceModel, Merge};
pub use cv::{ArgOrCv, CongruenceKind, ComputedValue, Opcode};
pub use error::VnError;
pub use fold::eval;
pub use init::{InitOracle, InitTracker};
pub use pass::{facts, number_values, Fact, VnStats};
pub use union_find::ScopedUnionFind;
