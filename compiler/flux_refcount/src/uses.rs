//! Which locations a statement touches, and how.
//!
//! Placement decisions need three views of a subtree: every key it
//! mentions at all (for "is this the last use?"), the keys the current
//! task touches synchronously (for cancellation), and the holds an
//! asynchronous continuation captures from its enclosing scope.

use rustc_hash::FxHashSet;

use flux_ir::{Block, Continuation, Instruction, RcKind, Statement, VarId, VarTable};
use flux_stack::ensure_sufficient_stack;

use crate::{AliasKey, AliasModel};

/// Lookups shared by the use queries.
pub(crate) struct UseCx<'a> {
    pub vars: &'a VarTable,
    pub model: &'a AliasModel,
}

impl UseCx<'_> {
    fn key(&self, v: VarId) -> Option<AliasKey> {
        self.vars
            .is_refcounted(v)
            .then(|| self.model.refcount_key(v))
    }

    fn instr_keys(&self, instr: &Instruction, out: &mut FxHashSet<AliasKey>) {
        if instr.is_refcount() {
            return;
        }
        for v in instr.inputs().into_iter().chain(instr.outputs()) {
            out.extend(self.key(v));
        }
    }

    /// Keys mentioned anywhere in `stmt`, nested blocks included.
    pub fn keys_used(&self, stmt: &Statement) -> FxHashSet<AliasKey> {
        let mut out = FxHashSet::default();
        match stmt {
            Statement::Instr(instr) => self.instr_keys(instr, &mut out),
            Statement::Cont(cont) => self.cont_keys(cont, &mut out),
        }
        out
    }

    fn cont_keys(&self, cont: &Continuation, out: &mut FxHashSet<AliasKey>) {
        for v in cont.control_inputs() {
            out.extend(self.key(v));
        }
        for block in cont.blocks() {
            block.walk(&mut |b| {
                for stmt in &b.statements {
                    match stmt {
                        Statement::Instr(instr) => self.instr_keys(instr, out),
                        Statement::Cont(inner) => {
                            for v in inner.control_inputs() {
                                out.extend(self.key(v));
                            }
                        }
                    }
                }
            });
        }
    }

    /// Keys mentioned anywhere in `block`.
    pub fn keys_used_in_block(&self, block: &Block) -> FxHashSet<AliasKey> {
        let mut out = FxHashSet::default();
        for stmt in &block.statements {
            out.extend(self.keys_used(stmt));
        }
        out
    }

    /// `(key, kind)` pairs accessed by the task running `block`: its own
    /// instructions, the control of its continuations, and the bodies of
    /// its synchronous continuations.
    pub fn sync_uses_in_subtree(&self, block: &Block) -> FxHashSet<(AliasKey, RcKind)> {
        let mut out = FxHashSet::default();
        self.collect_sync(block, &mut out);
        out
    }

    fn collect_sync(&self, block: &Block, out: &mut FxHashSet<(AliasKey, RcKind)>) {
        ensure_sufficient_stack(|| {
            for stmt in &block.statements {
                match stmt {
                    Statement::Instr(instr) => {
                        for (v, kind) in instr.sync_uses(self.vars) {
                            out.insert((self.model.refcount_key(v), kind));
                        }
                    }
                    Statement::Cont(cont) => {
                        for v in cont.control_inputs() {
                            if let Some(key) = self.key(v) {
                                out.insert((key, RcKind::Read));
                            }
                        }
                        if !cont.is_async() {
                            for child in cont.blocks() {
                                self.collect_sync(child, out);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Holds an asynchronous continuation takes from its enclosing scope:
    /// one read hold per outer location it reads and one write hold per
    /// outer location it writes, deduplicated by key.
    pub fn captured(&self, cont: &Continuation) -> Vec<(AliasKey, RcKind)> {
        let mut declared: FxHashSet<VarId> = FxHashSet::default();
        for block in cont.blocks() {
            declared.extend(block.declared_in_subtree());
        }
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        let mut capture = |v: VarId, kind: RcKind| {
            if declared.contains(&v) {
                return;
            }
            if let Some(key) = self.key(v) {
                if seen.insert((key.clone(), kind)) {
                    out.push((key, kind));
                }
            }
        };
        if let Continuation::Wait { wait_for, .. } = cont {
            wait_for.iter().for_each(|v| capture(*v, RcKind::Read));
        }
        for block in cont.blocks() {
            block.walk(&mut |b| {
                for stmt in &b.statements {
                    match stmt {
                        Statement::Instr(instr) if !instr.is_refcount() => {
                            instr.inputs().into_iter().for_each(|v| capture(v, RcKind::Read));
                            instr.outputs().into_iter().for_each(|v| capture(v, RcKind::Write));
                        }
                        Statement::Instr(_) => {}
                        Statement::Cont(inner) => {
                            for v in inner.control_inputs() {
                                capture(v, RcKind::Read);
                            }
                        }
                    }
                }
            });
        }
        out
    }
}

/// Whether `instr` gives alias variable `var` its referent.
pub(crate) fn defines_alias(instr: &Instruction, var: VarId) -> bool {
    match instr {
        Instruction::StructAlias { dst, .. }
        | Instruction::ArrayAlias { dst, .. }
        | Instruction::LoadRef { dst, .. } => *dst == var,
        _ => false,
    }
}

/// Whether `stmt` or anything nested in it defines `var`.
pub(crate) fn defines_in_subtree(stmt: &Statement, var: VarId) -> bool {
    match stmt {
        Statement::Instr(instr) => defines_alias(instr, var),
        Statement::Cont(cont) => cont.blocks().into_iter().any(|block| {
            let mut found = false;
            block.walk(&mut |b| {
                found |= b.instructions().any(|i| defines_alias(i, var));
            });
            found
        }),
    }
}
