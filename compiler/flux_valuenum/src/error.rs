//! Internal-consistency failures of value numbering.
//!
//! Both variants mean two classes that cannot denote the same value were
//! about to be merged, so an earlier fact was wrong.

use flux_ir::{Arg, Constant, Type};

use crate::CongruenceKind;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VnError {
    /// Representatives of different types.
    #[error("{kind:?} merge of {winner:?}: {winner_ty:?} with {loser:?}: {loser_ty:?}")]
    TypeMismatch {
        kind: CongruenceKind,
        winner: Arg,
        winner_ty: Type,
        loser: Arg,
        loser_ty: Type,
    },
    /// Two distinct literals in one class.
    #[error("{kind:?} class would hold both {first:?} and {second:?}")]
    ConflictingConstants {
        kind: CongruenceKind,
        first: Constant,
        second: Constant,
    },
}
