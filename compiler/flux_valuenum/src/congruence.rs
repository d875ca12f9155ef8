//! Congruence classes over arguments and computed values.
//!
//! [`CongruenceModel`] keeps one scoped union-find per [`CongruenceKind`].
//! Instructions contribute facts of the form "location `loc` holds
//! computed value `cv`"; the model canonicalizes `cv` and merges it with
//! `loc`. Other passes then ask [`CongruenceModel::replacement_for`]
//! whether a cheaper, equivalent operand is usable at the current point.
//!
//! # Canonicalization
//!
//! 1. Every input is replaced by its class representative (inputs of
//!    identity-sensitive operations only through alias congruence).
//! 2. Copies collapse to their operand.
//! 3. Value congruence only: `x ± c` is rewritten to `x + c'`, then
//!    constant folding is attempted.
//! 4. A future assigned a literal is replaced by the program's global
//!    constant for that literal, if one exists.
//!
//! Every variable input of a canonical computed value is indexed, so that
//! when that variable later loses its representative status, or its
//! contents become known, the value can be recanonicalized.
//!
//! # Merging
//!
//! Merges go through a FIFO queue. Representatives are ranked
//! `constant < global constant < variable < computed value`; on a tie the
//! first operand's representative wins, which keeps the oldest name.
//! A merge whose loser is a variable queues that variable's dependents for
//! recanonicalization, which may queue further merges. Both queues drain
//! to a fixpoint before control returns; each merge removes a class, so
//! the fixpoint is bounded by the number of values created.
//!
//! # Scopes
//!
//! Scopes are pushed and popped in lockstep with the block walk. A parent
//! scope never changes while a child is live, so nothing needs to flow
//! from parent to child beyond the fall-through lookup. Merges flow from
//! child to parent only when the caller replays them with
//! [`CongruenceModel::promote`], or keeps what every arm of a branch
//! agrees on with [`CongruenceModel::unify_arms`].

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use flux_ir::{
    Arg, BuiltinOp, Constant, FunctionSigs, GlobalConstants, Mapped, OpMode, OptFlags, RcKind,
    Storage, Type, VarId, VarTable,
};

use crate::union_find::ScopedUnionFind;
use crate::{algebra, fold, ArgOrCv, CongruenceKind, ComputedValue, InitOracle, Opcode, VnError};

/// A union recorded in a scope, replayable in its parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Merge {
    pub kind: CongruenceKind,
    pub winner: ArgOrCv,
    pub loser: ArgOrCv,
}

/// Per-scope bookkeeping beside the union-find layer.
#[derive(Default)]
struct Layer {
    /// Representatives merged into each winner, oldest first.
    merged_into: FxHashMap<ArgOrCv, Vec<ArgOrCv>>,
    /// Canonicalized values each variable appears in.
    components: FxHashMap<VarId, Vec<ComputedValue>>,
}

struct Sets {
    classes: ScopedUnionFind<ArgOrCv>,
    layers: Vec<Layer>,
}

impl Sets {
    fn new() -> Self {
        Sets {
            classes: ScopedUnionFind::new(),
            layers: vec![Layer::default()],
        }
    }

    fn top(&mut self) -> &mut Layer {
        let last = self.layers.len() - 1;
        &mut self.layers[last]
    }
}

struct Frame {
    declared: FxHashSet<VarId>,
    /// Whether this scope runs on a task of its own.
    async_entry: bool,
}

/// Value and alias congruence for one function walk.
pub struct CongruenceModel<'a> {
    vars: &'a VarTable,
    globals: &'a GlobalConstants,
    sigs: &'a FunctionSigs,
    flags: OptFlags,
    sets: [Sets; 2],
    frames: Vec<Frame>,
    merge_queue: VecDeque<(CongruenceKind, ArgOrCv, ArgOrCv)>,
    recanon_queue: VecDeque<(CongruenceKind, VarId)>,
    merges: usize,
}

impl<'a> CongruenceModel<'a> {
    pub fn new(
        vars: &'a VarTable,
        globals: &'a GlobalConstants,
        sigs: &'a FunctionSigs,
        flags: OptFlags,
    ) -> Self {
        let mut model = CongruenceModel {
            vars,
            globals,
            sigs,
            flags,
            sets: [Sets::new(), Sets::new()],
            frames: vec![Frame {
                declared: FxHashSet::default(),
                async_entry: false,
            }],
            merge_queue: VecDeque::new(),
            recanon_queue: VecDeque::new(),
            merges: 0,
        };
        if flags.contains(OptFlags::SHARED_CONSTANTS) {
            model.seed_globals();
        }
        model
    }

    /// Record what each global constant holds.
    fn seed_globals(&mut self) {
        let mut seeds: Vec<(Constant, VarId)> =
            self.globals.iter().map(|(c, g)| (c.clone(), g)).collect();
        seeds.sort_by_key(|(_, g)| *g);
        let classes = &mut self.sets[CongruenceKind::Value.index()].classes;
        for (value, global) in seeds {
            let assign = ComputedValue::new(Opcode::Assign, [Arg::Const(value.clone())]);
            classes.union(global.into(), assign.into());
            let retrieve = ComputedValue::new(Opcode::Retrieve, [Arg::Var(global)]);
            classes.union(Arg::Const(value).into(), retrieve.into());
        }
    }

    // ── Accessors ───────────────────────────────────────────

    pub fn vars(&self) -> &'a VarTable {
        self.vars
    }

    pub fn sigs(&self) -> &'a FunctionSigs {
        self.sigs
    }

    pub fn flags(&self) -> OptFlags {
        self.flags
    }

    /// Merges performed so far, promotions included.
    pub fn merge_count(&self) -> usize {
        self.merges
    }

    // ── Scopes ──────────────────────────────────────────────

    /// Enter a nested scope. `async_entry` marks a scope that runs on a
    /// task of its own.
    pub fn push_scope(&mut self, async_entry: bool) {
        self.frames.push(Frame {
            declared: FxHashSet::default(),
            async_entry,
        });
        for sets in &mut self.sets {
            sets.classes.push_scope();
            sets.layers.push(Layer::default());
        }
    }

    /// Leave a scope, returning the merges it made.
    pub fn pop_scope(&mut self) -> Vec<Merge> {
        debug_assert!(self.frames.len() > 1, "popping the function scope");
        if self.frames.len() <= 1 {
            return Vec::new();
        }
        self.frames.pop();
        let mut merges = Vec::new();
        for kind in CongruenceKind::ALL {
            let sets = &mut self.sets[kind.index()];
            sets.layers.pop();
            merges.extend(
                sets.classes
                    .pop_scope()
                    .into_iter()
                    .map(|(winner, loser)| Merge {
                        kind,
                        winner,
                        loser,
                    }),
            );
        }
        merges
    }

    /// Replay merges of a scope that certainly ran to completion.
    pub fn promote(&mut self, merges: Vec<Merge>) -> Result<(), VnError> {
        for m in merges {
            self.merge_queue.push_back((m.kind, m.winner, m.loser));
        }
        self.drain()
    }

    /// Promote the congruences every arm of an exhaustive branch agrees on.
    ///
    /// Each arm's merges are replayed in a scratch scope. Pairs of class
    /// members nameable here that stay congruent in every arm are merged
    /// into the current scope. Returns the number of facts promoted.
    pub fn unify_arms(&mut self, arms: &[Vec<Merge>]) -> Result<usize, VnError> {
        let Some((first, rest)) = arms.split_first() else {
            return Ok(0);
        };
        let merges = self.merges;
        let mut shared = self.replay(first, |model| model.arm_pairs())?;
        for arm in rest {
            if shared.is_empty() {
                break;
            }
            let kept = self.replay(arm, |model| {
                shared
                    .iter()
                    .filter(|(kind, a, b)| model.congruent(*kind, a, b))
                    .cloned()
                    .collect::<Vec<_>>()
            })?;
            shared = kept;
        }
        self.merges = merges;

        let mut promoted = Vec::new();
        for (kind, anchor, member) in shared {
            if self.congruent(kind, &anchor, &member) {
                continue;
            }
            let anchor = self.reindexed(kind, anchor);
            let member = self.reindexed(kind, member);
            tracing::trace!(?kind, ?anchor, ?member, "unified across arms");
            promoted.push(Merge {
                kind,
                winner: anchor,
                loser: member,
            });
        }
        let count = promoted.len();
        self.promote(promoted)?;
        Ok(count)
    }

    fn reindexed(&mut self, kind: CongruenceKind, x: ArgOrCv) -> ArgOrCv {
        match x {
            ArgOrCv::Cv(cv) => self.canonicalize(kind, &cv),
            arg @ ArgOrCv::Arg(_) => arg,
        }
    }

    /// Run `query` with `merges` applied in a throwaway scope.
    fn replay<R>(
        &mut self,
        merges: &[Merge],
        query: impl FnOnce(&Self) -> R,
    ) -> Result<R, VnError> {
        self.push_scope(false);
        let replayed = self.promote(merges.to_vec());
        let result = replayed.map(|()| query(self));
        self.pop_scope();
        result
    }

    /// Congruent pairs made in the current scope whose members can both
    /// be named in the parent scope.
    fn arm_pairs(&self) -> Vec<(CongruenceKind, ArgOrCv, ArgOrCv)> {
        let mut pairs = Vec::new();
        let mut seen = FxHashSet::default();
        for kind in CongruenceKind::ALL {
            let classes = &self.sets[kind.index()].classes;
            for (winner, _) in classes.unions_this_scope() {
                let rep = classes.find(winner);
                if !seen.insert((kind, rep.clone())) {
                    continue;
                }
                let mut nameable = classes
                    .members(&rep)
                    .into_iter()
                    .filter(|m| self.nameable_outside(m));
                let Some(anchor) = nameable.next() else {
                    continue;
                };
                pairs.extend(nameable.map(|m| (kind, anchor.clone(), m)));
            }
        }
        pairs
    }

    /// Whether every variable in `x` is accessible one scope out.
    fn nameable_outside(&self, x: &ArgOrCv) -> bool {
        match x {
            ArgOrCv::Arg(Arg::Const(_)) => true,
            ArgOrCv::Arg(Arg::Var(v)) => self.accessible_from(*v, self.frames.len() - 1),
            ArgOrCv::Cv(cv) => cv.inputs.iter().all(|i| self.nameable_outside(i)),
        }
    }

    /// Record that `var` is declared in the current scope.
    pub fn declare(&mut self, var: VarId) {
        if let Some(frame) = self.frames.last_mut() {
            frame.declared.insert(var);
        }
    }

    /// Whether `var` can be named at the current point.
    ///
    /// It must be declared in an enclosing scope, and an unboxed local
    /// value cannot be named across a task boundary.
    pub fn is_accessible(&self, var: VarId) -> bool {
        self.accessible_from(var, self.frames.len())
    }

    /// `is_accessible` as seen from the scope `depth` frames deep.
    fn accessible_from(&self, var: VarId, depth: usize) -> bool {
        let storage = self.vars.storage(var);
        if storage == Storage::GlobalConst {
            return true;
        }
        let mut crossed_task = false;
        for frame in self.frames[..depth].iter().rev() {
            if frame.declared.contains(&var) {
                return !crossed_task || storage != Storage::Local;
            }
            crossed_task |= frame.async_entry;
        }
        false
    }

    // ── Lookup ──────────────────────────────────────────────

    /// Representative of `x`'s class; unseen values are singletons.
    pub fn find_canonical(&self, kind: CongruenceKind, x: &ArgOrCv) -> ArgOrCv {
        self.sets[kind.index()].classes.find(x)
    }

    /// Representative of `x`'s class, if `x` was ever added to one.
    pub fn lookup(&self, kind: CongruenceKind, x: &ArgOrCv) -> Option<ArgOrCv> {
        self.sets[kind.index()].classes.get(x).cloned()
    }

    /// Every member of `x`'s class.
    pub fn members(&self, kind: CongruenceKind, x: &ArgOrCv) -> Vec<ArgOrCv> {
        self.sets[kind.index()].classes.members(x)
    }

    /// Whether `a` and `b` are known congruent.
    pub fn congruent(&self, kind: CongruenceKind, a: &ArgOrCv, b: &ArgOrCv) -> bool {
        self.find_canonical(kind, a) == self.find_canonical(kind, b)
    }

    /// The constant a future is known to hold.
    pub(crate) fn retrieve_result(&self, future: VarId) -> Option<Constant> {
        let kind = CongruenceKind::Value;
        let canon = self.find_canonical(kind, &future.into());
        let rep = canon.var()?;
        let retrieve = ComputedValue::new(Opcode::Retrieve, [Arg::Var(rep)]).into();
        if let Some(ArgOrCv::Arg(Arg::Const(c))) = self.lookup(kind, &retrieve) {
            return Some(c);
        }
        self.members(kind, &canon)
            .iter()
            .find_map(|m| m.cv().and_then(ComputedValue::assigned_constant).cloned())
    }

    // ── Canonicalization ────────────────────────────────────

    /// Canonical form of `cv`, indexing its variable inputs.
    pub fn canonicalize(&mut self, kind: CongruenceKind, cv: &ComputedValue) -> ArgOrCv {
        let canon = self.canonicalize_inputs(kind, cv);
        let simplified = self.simplify(kind, canon);
        if let Some(value) = simplified.cv() {
            let top = self.sets[kind.index()].top();
            for v in value.input_vars() {
                let dependents = top.components.entry(v).or_default();
                if !dependents.contains(value) {
                    dependents.push(value.clone());
                }
            }
        }
        simplified
    }

    fn canonicalize_inputs(&self, kind: CongruenceKind, cv: &ComputedValue) -> ComputedValue {
        let substitute = kind == CongruenceKind::Alias || !cv.op.identity_inputs();
        let mut inputs = cv
            .inputs
            .iter()
            .map(|input| match input {
                ArgOrCv::Arg(_) if substitute => match self.find_canonical(kind, input) {
                    rep @ ArgOrCv::Arg(_) => rep,
                    ArgOrCv::Cv(_) => input.clone(),
                },
                ArgOrCv::Arg(_) => input.clone(),
                ArgOrCv::Cv(inner) => {
                    let inner = self.canonicalize_inputs(kind, inner);
                    self.simplify(kind, inner)
                }
            })
            .collect::<SmallVec<[ArgOrCv; 2]>>();

        if let Opcode::Builtin(op, _) = cv.op {
            let misordered = inputs.len() == 2 && operand_order(&inputs[1], &inputs[0]);
            if op.is_commutative() && misordered {
                inputs.swap(0, 1);
            }
        }
        ComputedValue { op: cv.op, inputs }
    }

    /// Collapse, normalize, fold and share a value whose inputs are canonical.
    fn simplify(&self, kind: CongruenceKind, cv: ComputedValue) -> ArgOrCv {
        match (cv.op, cv.inputs.as_slice()) {
            (Opcode::Copy | Opcode::Builtin(BuiltinOp::CopyValue, OpMode::Local), [input]) => {
                return input.clone();
            }
            (Opcode::Builtin(BuiltinOp::CopyValue, OpMode::Async), [input]) => {
                return match input {
                    ArgOrCv::Arg(Arg::Const(c)) => {
                        let assign = ComputedValue::new(Opcode::Assign, [Arg::Const(c.clone())]);
                        self.share_constant(assign.into())
                    }
                    other => other.clone(),
                };
            }
            _ => {}
        }
        if kind == CongruenceKind::Alias {
            return cv.into();
        }

        let mut cv = cv;
        if self.flags.contains(OptFlags::ALGEBRA) {
            match algebra::normalize(&cv) {
                Some(ArgOrCv::Cv(normal)) => cv = *normal,
                Some(arg) => return arg,
                None => {}
            }
        }
        if self.flags.contains(OptFlags::CONST_FOLD) {
            if let Some(folded) = fold::fold(self, &cv) {
                tracing::trace!(?cv, ?folded, "folded");
                return self.share_constant(folded);
            }
        }
        self.share_constant(cv.into())
    }

    /// Replace a future assigned a literal with the matching global constant.
    fn share_constant(&self, value: ArgOrCv) -> ArgOrCv {
        if !self.flags.contains(OptFlags::SHARED_CONSTANTS) {
            return value;
        }
        let shared = value
            .cv()
            .and_then(ComputedValue::assigned_constant)
            .and_then(|c| self.globals.get(c));
        match shared {
            Some(global) => global.into(),
            None => value,
        }
    }

    // ── Merging ─────────────────────────────────────────────

    /// Record that `loc` holds `value`.
    ///
    /// Alias facts are also value facts.
    pub fn add(
        &mut self,
        kind: CongruenceKind,
        value: &ComputedValue,
        loc: Arg,
    ) -> Result<(), VnError> {
        let canon = self.canonicalize(kind, value);
        let algebra_on = self.flags.contains(OptFlags::ALGEBRA);
        let alternatives = if kind == CongruenceKind::Value && algebra_on {
            algebra::alternatives(self, &canon)
        } else {
            Vec::new()
        };
        self.merge_queue.push_back((kind, canon, loc.clone().into()));
        for alt in alternatives {
            let alt = match alt {
                ArgOrCv::Cv(cv) => self.canonicalize(kind, &cv),
                arg @ ArgOrCv::Arg(_) => arg,
            };
            tracing::trace!(?loc, ?alt, "algebraic equivalent");
            self.merge_queue.push_back((kind, alt, loc.clone().into()));
        }
        self.drain()?;

        if kind == CongruenceKind::Alias {
            self.add(CongruenceKind::Value, value, loc)?;
        }
        Ok(())
    }

    /// Join the classes of `a` and `b`.
    pub fn merge(&mut self, kind: CongruenceKind, a: ArgOrCv, b: ArgOrCv) -> Result<(), VnError> {
        self.merge_queue.push_back((kind, a, b));
        self.drain()
    }

    fn drain(&mut self) -> Result<(), VnError> {
        loop {
            while let Some((kind, a, b)) = self.merge_queue.pop_front() {
                if let Err(e) = self.merge_once(kind, &a, &b) {
                    self.merge_queue.clear();
                    self.recanon_queue.clear();
                    return Err(e);
                }
            }
            match self.recanon_queue.pop_front() {
                Some((kind, var)) => self.recanonicalize_dependents(kind, var),
                None => return Ok(()),
            }
        }
    }

    fn merge_once(
        &mut self,
        kind: CongruenceKind,
        a: &ArgOrCv,
        b: &ArgOrCv,
    ) -> Result<(), VnError> {
        let ra = self.find_canonical(kind, a);
        let rb = self.find_canonical(kind, b);
        if ra == rb {
            return Ok(());
        }
        let (winner, loser) = if self.rank(&rb) < self.rank(&ra) {
            (rb, ra)
        } else {
            (ra, rb)
        };
        self.check_compatible(kind, &winner, &loser)?;

        if let Some(v) = loser.var() {
            self.recanon_queue.push_back((kind, v));
        }
        let sets = &mut self.sets[kind.index()];
        sets.classes.union(winner.clone(), loser.clone());
        sets.top()
            .merged_into
            .entry(winner.clone())
            .or_default()
            .push(loser.clone());
        self.merges += 1;
        tracing::trace!(?kind, ?winner, ?loser, "merged");

        self.watch_class(kind, &winner);
        Ok(())
    }

    /// Queue futures and files whose newly known contents may let
    /// dependent values fold.
    fn watch_class(&mut self, kind: CongruenceKind, rep: &ArgOrCv) {
        if !rep.is_arg() {
            return;
        }
        let is_const = rep.constant().is_some();
        for member in self.members(kind, rep) {
            let Some(cv) = member.cv() else {
                continue;
            };
            match (cv.op, cv.arg(0).and_then(Arg::var)) {
                (Opcode::Retrieve, Some(future)) if is_const => {
                    self.recanon_queue.push_back((kind, future));
                }
                (Opcode::Filename, Some(file)) => {
                    self.recanon_queue.push_back((kind, file));
                }
                _ => {}
            }
        }
    }

    fn recanonicalize_dependents(&mut self, kind: CongruenceKind, var: VarId) {
        let dependents: Vec<ComputedValue> = self.sets[kind.index()]
            .layers
            .iter()
            .rev()
            .filter_map(|l| l.components.get(&var))
            .flatten()
            .cloned()
            .collect();
        for outer in dependents {
            let outer_value = ArgOrCv::from(outer.clone());
            let Some(class) = self.lookup(kind, &outer_value) else {
                continue;
            };
            let updated = self.canonicalize(kind, &outer);
            if updated != outer_value {
                tracing::trace!(?var, ?outer, ?updated, "recanonicalized");
                // An existing class for the updated form predates `class`.
                self.merge_queue.push_back((kind, updated, class));
            }
        }
    }

    fn rank(&self, x: &ArgOrCv) -> u8 {
        match x {
            ArgOrCv::Arg(Arg::Const(_)) => 0,
            ArgOrCv::Arg(Arg::Var(v)) if self.vars.storage(*v) == Storage::GlobalConst => 1,
            ArgOrCv::Arg(Arg::Var(_)) => 2,
            ArgOrCv::Cv(_) => 3,
        }
    }

    fn arg_type(&self, arg: &Arg) -> Type {
        match arg {
            Arg::Const(c) => Type::Value(c.prim_type()),
            Arg::Var(v) => self.vars.ty(*v).clone(),
        }
    }

    fn check_compatible(
        &self,
        kind: CongruenceKind,
        winner: &ArgOrCv,
        loser: &ArgOrCv,
    ) -> Result<(), VnError> {
        let (Some(w), Some(l)) = (winner.arg(), loser.arg()) else {
            return Ok(());
        };
        if let (Arg::Const(first), Arg::Const(second)) = (w, l) {
            return Err(VnError::ConflictingConstants {
                kind,
                first: first.clone(),
                second: second.clone(),
            });
        }
        let (winner_ty, loser_ty) = (self.arg_type(w), self.arg_type(l));
        if winner_ty != loser_ty {
            return Err(VnError::TypeMismatch {
                kind,
                winner: w.clone(),
                winner_ty,
                loser: l.clone(),
                loser_ty,
            });
        }
        Ok(())
    }

    // ── Replacement ─────────────────────────────────────────

    /// Something cheaper than `var` that is usable at the current point.
    ///
    /// Mapped variables have no referential transparency and are never
    /// replaced or offered. A representative that is inaccessible or not
    /// yet initialized is skipped in favour of an older representative of
    /// the same class, found by walking the merge log.
    pub fn replacement_for(
        &self,
        kind: CongruenceKind,
        var: VarId,
        init: &dyn InitOracle,
    ) -> Option<Arg> {
        if self.vars.get(var).mapped != Mapped::No {
            return None;
        }
        let rep = self.find_canonical(kind, &var.into());
        if rep.var() == Some(var) {
            return None;
        }

        let mut stack = vec![rep];
        let mut seen = FxHashSet::default();
        while let Some(candidate) = stack.pop() {
            if !seen.insert(candidate.clone()) {
                continue;
            }
            if let Some(arg) = candidate.arg() {
                if arg.var() != Some(var) && self.usable(kind, arg, init) {
                    return Some(arg.clone());
                }
            }
            for layer in &self.sets[kind.index()].layers {
                if let Some(alts) = layer.merged_into.get(&candidate) {
                    stack.extend(alts.iter().rev().cloned());
                }
            }
        }
        None
    }

    fn usable(&self, kind: CongruenceKind, arg: &Arg, init: &dyn InitOracle) -> bool {
        match arg {
            Arg::Const(_) => kind == CongruenceKind::Value,
            Arg::Var(v) => {
                let perspective = match kind {
                    CongruenceKind::Value => RcKind::Read,
                    CongruenceKind::Alias => RcKind::Write,
                };
                self.vars.get(*v).mapped == Mapped::No
                    && self.is_accessible(*v)
                    && init.is_initialized(*v, perspective)
            }
        }
    }
}

/// Whether `a` sorts before `b` as an operand of a commutative operator:
/// variables by id, then literals.
fn operand_order(a: &ArgOrCv, b: &ArgOrCv) -> bool {
    match (a.var(), b.var()) {
        (Some(x), Some(y)) => x < y,
        (Some(_), None) => b.is_arg(),
        _ => false,
    }
}

#[cfg(test)]
mod tests;
