//! Definite initialization.
//!
//! Value numbering may only substitute a variable that is certainly
//! initialized wherever the substitution happens. [`InitOracle`] answers
//! that question; [`InitTracker`] answers it while walking a function in
//! program order.
//!
//! | Storage | Initialized |
//! |---------|-------------|
//! | `Stack`, `GlobalConst` | always (allocated on declaration) |
//! | `Local` | once an instruction assigns it, or it is bound by a loop |
//! | `Alias` | once an alias instruction binds it, or it is bound by a loop |
//!
//! Facts from a nested scope survive it only when the scope certainly ran
//! to completion before the code that follows: a synchronous `Nested`
//! block, or every arm of an exhaustive branch.

use rustc_hash::FxHashSet;

use flux_ir::{RcKind, Storage, VarId, VarTable};

/// Whether a variable is definitely initialized at the query point.
///
/// `perspective` is the hold kind the caller wants to use the variable
/// with: `Read` for a value operand, `Write` when its identity is used as
/// an alias target.
pub trait InitOracle {
    fn is_initialized(&self, var: VarId, perspective: RcKind) -> bool;
}

impl<F: Fn(VarId, RcKind) -> bool> InitOracle for F {
    fn is_initialized(&self, var: VarId, perspective: RcKind) -> bool {
        self(var, perspective)
    }
}

/// Scoped set of initialized variables.
pub struct InitTracker<'a> {
    vars: &'a VarTable,
    frames: Vec<FxHashSet<VarId>>,
}

impl<'a> InitTracker<'a> {
    pub fn new(vars: &'a VarTable) -> Self {
        InitTracker {
            vars,
            frames: vec![FxHashSet::default()],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(FxHashSet::default());
    }

    /// Leave a scope, returning what it initialized.
    pub fn pop(&mut self) -> FxHashSet<VarId> {
        debug_assert!(self.frames.len() > 1, "popping the function scope");
        if self.frames.len() <= 1 {
            return FxHashSet::default();
        }
        self.frames.pop().unwrap_or_default()
    }

    pub fn mark(&mut self, var: VarId) {
        if let Some(top) = self.frames.last_mut() {
            top.insert(var);
        }
    }

    pub fn mark_all(&mut self, vars: impl IntoIterator<Item = VarId>) {
        for v in vars {
            self.mark(v);
        }
    }

    /// Carry what every arm of an exhaustive branch initialized into the
    /// enclosing scope.
    pub fn join_arms(&mut self, arms: &[FxHashSet<VarId>]) {
        let Some((first, rest)) = arms.split_first() else {
            return;
        };
        let common: Vec<VarId> = first
            .iter()
            .filter(|v| rest.iter().all(|arm| arm.contains(*v)))
            .copied()
            .collect();
        self.mark_all(common);
    }
}

impl InitOracle for InitTracker<'_> {
    fn is_initialized(&self, var: VarId, _perspective: RcKind) -> bool {
        // Alias instructions bind both directions at once, so the
        // perspective does not change the answer for this IR.
        match self.vars.storage(var) {
            Storage::Stack | Storage::GlobalConst => true,
            Storage::Local | Storage::Alias => self.frames.iter().any(|f| f.contains(&var)),
        }
    }
}
