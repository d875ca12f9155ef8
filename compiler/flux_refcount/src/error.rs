//! Internal-consistency failures of refcount placement.
//!
//! None of these describe a problem with the input program. Each one means
//! an earlier transformation broke an invariant, and placement refuses to
//! emit a refcount program it cannot prove safe.

use flux_ir::{BlockId, RcDir, RcKind};

use crate::AliasKey;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RefcountError {
    /// Unwinding more than the ledger holds for a location.
    #[error("cancelling {amount} {kind:?} holds on {key:?} overshoots the pending {pending}")]
    Overshoot {
        key: AliasKey,
        kind: RcKind,
        amount: i64,
        pending: i64,
    },
    /// A ledger bucket ended up with the wrong sign.
    #[error("{dir:?} residual of {amount} {kind:?} holds on {key:?} in {block:?}")]
    NegativeResidual {
        key: AliasKey,
        kind: RcKind,
        dir: RcDir,
        amount: i64,
        block: BlockId,
    },
    /// No variable in scope denotes the location, and none can be synthesized.
    #[error("no variable in scope of {block:?} resolves {key:?}")]
    UnresolvedKey { key: AliasKey, block: BlockId },
    /// Batching a per-iteration count overflowed.
    #[error("{amount} holds on {key:?} times {factor} iterations overflows")]
    CountOverflow {
        key: AliasKey,
        amount: i64,
        factor: u64,
    },
}
