//! Zero-sum checking of a placed function.
//!
//! Simulates the refcount traffic of a function after placement, running
//! every task inline at the point it is spawned. Loops with a statically
//! unknown iteration count run a caller-chosen number of times. The check
//! is independent of how placement arrived at its result, so it serves as
//! the oracle for differential testing of the optimization knobs.
//!
//! Three things are checked:
//!
//! - every location's read and write counts end where they started;
//! - all arms of a branch set leave the same counts (a non-exhaustive
//!   `Switch` also has the empty path);
//! - no stack-owned location is touched after both of its counts reached
//!   zero.
//!
//! Alongside, the simulation sums every count change placement is
//! responsible for (declaration holds, `RefCount`s, loop lists, acquire
//! counts and piggybacked releases) into a [`NetPlacement`].

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};

use flux_ir::{
    Block, BlockId, Continuation, Function, Instruction, RcKind, Statement, Storage, VarId,
    VarTable,
};
use flux_stack::ensure_sufficient_stack;

use crate::{AliasKey, AliasModel};

/// Executed count changes per location and kind, zero totals omitted.
pub type NetPlacement = BTreeMap<(AliasKey, RcKind), i64>;

/// A way a placed function fails to balance.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BalanceViolation {
    #[error("{kind:?} count of {key:?} ends {residual:+} from where it started")]
    Unbalanced {
        key: AliasKey,
        kind: RcKind,
        residual: i64,
    },
    #[error("arms of the branch set starting with {first_arm:?} leave different counts")]
    BranchMismatch { first_arm: BlockId },
    #[error("{key:?} touched in {block:?} after its holds were released")]
    UseAfterRelease { key: AliasKey, block: BlockId },
}

/// Check that `func` balances, running loops of unknown length
/// `unknown_iterations` times.
pub fn check_balance(
    func: &Function,
    vars: &VarTable,
    unknown_iterations: u64,
) -> Result<(), BalanceViolation> {
    net_placement(func, vars, unknown_iterations).map(|_| ())
}

/// Net placed count changes of a balanced function.
///
/// Branch sets contribute their first arm.
pub fn net_placement(
    func: &Function,
    vars: &VarTable,
    unknown_iterations: u64,
) -> Result<NetPlacement, BalanceViolation> {
    let model = AliasModel::from_function(func);
    let mut sim = Simulation {
        vars,
        model: &model,
        unknown_iterations,
        counts: FxHashMap::default(),
        owned: FxHashSet::default(),
        placed: NetPlacement::new(),
    };

    let caller_holds = caller_holds(func, vars, &model);
    for (key, kind) in &caller_holds {
        sim.bump(key.clone(), *kind, 1);
        sim.owned.insert(key.clone());
    }
    sim.run_block(&func.body)?;
    for (key, kind) in caller_holds {
        sim.bump(key, kind, -1);
    }

    let mut residuals: Vec<_> = sim.counts.into_iter().filter(|(_, n)| *n != 0).collect();
    residuals.sort();
    if let Some(((key, kind), residual)) = residuals.into_iter().next() {
        return Err(BalanceViolation::Unbalanced {
            key,
            kind,
            residual,
        });
    }
    sim.placed.retain(|_, n| *n != 0);
    Ok(sim.placed)
}

/// Holds the caller keeps on the parameters for the call's duration.
fn caller_holds(func: &Function, vars: &VarTable, model: &AliasModel) -> Vec<(AliasKey, RcKind)> {
    let inputs = func.inputs.iter().map(|v| (*v, RcKind::Read));
    let outputs = func.outputs.iter().map(|v| (*v, RcKind::Write));
    inputs
        .chain(outputs)
        .filter(|(v, _)| vars.is_refcounted(*v))
        .map(|(v, kind)| (model.refcount_key(v), kind))
        .collect()
}

type Counts = FxHashMap<(AliasKey, RcKind), i64>;

struct Simulation<'a> {
    vars: &'a VarTable,
    model: &'a AliasModel,
    unknown_iterations: u64,
    counts: Counts,
    /// Locations owned by a stack declaration or a parameter.
    owned: FxHashSet<AliasKey>,
    placed: NetPlacement,
}

impl Simulation<'_> {
    fn key(&self, v: VarId) -> Option<AliasKey> {
        self.vars
            .is_refcounted(v)
            .then(|| self.model.refcount_key(v))
    }

    fn bump(&mut self, key: AliasKey, kind: RcKind, amount: i64) {
        if amount != 0 {
            *self.counts.entry((key, kind)).or_insert(0) += amount;
        }
    }

    fn place(&mut self, key: AliasKey, kind: RcKind, amount: i64) {
        if amount != 0 {
            *self.placed.entry((key.clone(), kind)).or_insert(0) += amount;
            self.bump(key, kind, amount);
        }
    }

    fn count(&self, key: &AliasKey, kind: RcKind) -> i64 {
        self.counts
            .get(&(key.clone(), kind))
            .copied()
            .unwrap_or(0)
    }

    fn check_alive(&self, key: &AliasKey, block: BlockId) -> Result<(), BalanceViolation> {
        if self.owned.contains(key)
            && self.count(key, RcKind::Read) <= 0
            && self.count(key, RcKind::Write) <= 0
        {
            return Err(BalanceViolation::UseAfterRelease {
                key: key.clone(),
                block,
            });
        }
        Ok(())
    }

    fn run_block(&mut self, block: &Block) -> Result<(), BalanceViolation> {
        ensure_sufficient_stack(|| {
            for decl in &block.variables {
                let Some(key) = self.key(decl.var) else {
                    continue;
                };
                if self.vars.storage(decl.var) == Storage::Stack {
                    self.owned.insert(key.clone());
                }
                for kind in RcKind::ALL {
                    self.place(key.clone(), kind, decl.init.get(kind));
                }
            }
            for stmt in &block.statements {
                match stmt {
                    Statement::Instr(instr) => self.exec(instr, block.id)?,
                    Statement::Cont(cont) => self.exec_cont(cont, block.id)?,
                }
            }
            for instr in &block.cleanups {
                self.exec(instr, block.id)?;
            }
            Ok(())
        })
    }

    fn exec(&mut self, instr: &Instruction, block: BlockId) -> Result<(), BalanceViolation> {
        for (v, _) in instr.sync_uses(self.vars) {
            self.check_alive(&self.model.refcount_key(v), block)?;
        }
        for (v, kind) in instr.consumed_holds(self.vars) {
            let key = self.model.refcount_key(v);
            self.check_alive(&key, block)?;
            self.bump(key, kind, -1);
        }
        for (v, kind, amount) in instr.piggybacked() {
            let Some(key) = self.key(v) else {
                continue;
            };
            if amount > 0 {
                self.check_alive(&key, block)?;
            }
            self.place(key, kind, amount);
        }
        for (v, kind, amount) in instr.produced_holds() {
            if let Some(key) = self.key(v) {
                self.place(key, kind, amount);
            }
        }
        Ok(())
    }

    fn exec_cont(&mut self, cont: &Continuation, block: BlockId) -> Result<(), BalanceViolation> {
        for v in cont.control_inputs() {
            if let Some(key) = self.key(v) {
                self.check_alive(&key, block)?;
            }
        }
        match cont {
            Continuation::If { .. } | Continuation::Switch { .. } => self.exec_branches(cont),
            Continuation::Nested { block } | Continuation::Wait { block, .. } => {
                self.run_block(block)
            }
            Continuation::RangeLoop { block: body, rc, .. }
            | Continuation::Foreach { block: body, rc, .. } => {
                let n = cont.iterations().unwrap_or(self.unknown_iterations);
                let times = i64::try_from(n).unwrap_or(i64::MAX);
                for delta in &rc.start_incrs {
                    if let Some(key) = self.key(delta.var) {
                        self.place(key, delta.kind, delta.amount.saturating_mul(times));
                    }
                }
                for _ in 0..n {
                    self.run_block(body)?;
                    for delta in &rc.end_decrs {
                        if let Some(key) = self.key(delta.var) {
                            self.place(key, delta.kind, delta.amount);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn exec_branches(&mut self, cont: &Continuation) -> Result<(), BalanceViolation> {
        let arms = cont.blocks();
        let first_arm = arms.first().map_or(BlockId::new(0), |b| b.id);
        let counts_before = self.counts.clone();
        let placed_before = self.placed.clone();

        let mut outcomes: Vec<(Counts, NetPlacement)> = Vec::with_capacity(arms.len() + 1);
        for arm in arms {
            self.counts = counts_before.clone();
            self.placed = placed_before.clone();
            self.run_block(arm)?;
            outcomes.push((normalized(&self.counts), self.placed.clone()));
        }
        if !cont.is_exhaustive() {
            outcomes.push((normalized(&counts_before), placed_before));
        }

        let mut outcomes = outcomes.into_iter();
        let Some((counts, placed)) = outcomes.next() else {
            return Ok(());
        };
        if outcomes.any(|(other, _)| other != counts) {
            return Err(BalanceViolation::BranchMismatch { first_arm });
        }
        self.counts = counts;
        self.placed = placed;
        Ok(())
    }
}

fn normalized(counts: &Counts) -> Counts {
    counts
        .iter()
        .filter(|(_, n)| **n != 0)
        .map(|(k, n)| (k.clone(), *n))
        .collect()
}
