//! Refcount placement for one function.
//!
//! Turns the implicit hold traffic of a function body into explicit
//! `RefCount` instructions, cleanup entries, loop refcount lists and
//! adjusted piggyback slots, such that every location's read and write
//! counts return to where they started.
//!
//! # Algorithm
//!
//! **Counting** walks the block tree bottom-up. Each block builds a
//! [`RefcountLedger`]:
//!
//! 1. Instructions add one hold per handed-off operand (`consumed_holds`)
//!    and subtract the holds they acquire (`produced_holds`).
//! 2. Continuations fold their bodies in. Asynchronous bodies receive one
//!    hold per captured location, counted in the parent. Loop bodies are
//!    multiplied by a known iteration count or moved to the loop's own
//!    `start_incrs`/`end_decrs`. Exhaustive branch sets hoist the part
//!    common to every arm.
//! 3. Declarations subtract their base holds; captured holds a body was
//!    given are released.
//! 4. Entries are re-canonicalized, increment/decrement pairs cancel, the
//!    block keeps what it owns and offers the rest to its parent, and the
//!    kept part is absorbed by declarations and instructions where possible.
//!
//! **Emission** walks top-down. Whatever each block kept becomes explicit
//! increments at block start (after the definition of an alias declared
//! in the block) and decrements in the block's cleanup list. Loop lists
//! are resolved in the scope that owns the loop.
//!
//! Every optimization is guarded by an [`OptFlags`] knob. With no knobs
//! set, every block emits exactly the changes it causes, in place.
//!
//! # Ownership
//!
//! Function parameters are borrowed: the caller holds them for the
//! duration of the call, and the body must leave their counts unchanged.

use rustc_hash::{FxHashMap, FxHashSet};

use flux_ir::{
    Block, BlockId, Continuation, Function, Instruction, OptFlags, RcDelta, RcDir, RcKind,
    Statement, Storage, StringInterner, VarId, VarTable,
};
use flux_stack::ensure_sufficient_stack;

use crate::alias::Resolved;
use crate::uses::{defines_in_subtree, UseCx};
use crate::{AliasKey, AliasModel, RefcountError, RefcountLedger};

/// Counters describing what placement did.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PlacementStats {
    /// Declarations whose base holds were dropped instead of released.
    pub declaration_piggybacks: usize,
    /// Changes absorbed into existing instruction slots.
    pub instruction_piggybacks: usize,
    /// Increment/decrement pairs cancelled within a block.
    pub cancelled: usize,
    /// Entries hoisted out of run-once blocks or common to every branch.
    pub hoisted: usize,
    /// Entries multiplied by a known iteration count.
    pub batched: usize,
    /// Entries placed in loop refcount lists.
    pub loop_list_entries: usize,
    /// Explicit `RefCount` instructions emitted.
    pub emitted: usize,
    /// Alias variables synthesized to name a location.
    pub synthesized: usize,
}

/// Where a block's pending entries may go once counted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Role {
    /// Everything is placed in this block.
    Keep,
    /// Entries for locations owned elsewhere are offered to the parent.
    Lift,
    /// Only increments for locations owned elsewhere are offered; the body
    /// runs on its own task and must release what it was given.
    LiftIncrements,
}

/// Pending loop list entries, keyed by loop body.
#[derive(Debug, Default)]
struct LoopLedgers {
    start: RefcountLedger,
    end: RefcountLedger,
}

/// Variables visible at the point of emission.
#[derive(Debug, Default)]
struct Scope {
    visible: FxHashSet<VarId>,
    frames: Vec<Vec<VarId>>,
}

impl Scope {
    fn enter(&mut self, vars: impl IntoIterator<Item = VarId>) {
        self.frames.push(Vec::new());
        for v in vars {
            self.add(v);
        }
    }

    fn add(&mut self, var: VarId) {
        if self.visible.insert(var) {
            if let Some(frame) = self.frames.last_mut() {
                frame.push(var);
            }
        }
    }

    fn exit(&mut self) {
        for v in self.frames.pop().unwrap_or_default() {
            self.visible.remove(&v);
        }
    }
}

/// Place refcount operations in `func`.
///
/// Synthesized alias variables are added to `vars` and named through
/// `names`.
pub fn place_refcounts(
    func: &mut Function,
    vars: &mut VarTable,
    names: &mut StringInterner,
    flags: OptFlags,
) -> Result<PlacementStats, RefcountError> {
    let mut engine = PlacementEngine {
        vars,
        names,
        flags,
        model: AliasModel::new(),
        kept: FxHashMap::default(),
        loop_rc: FxHashMap::default(),
        stats: PlacementStats::default(),
    };

    let offer = engine.count_block(&mut func.body, &[], Role::Keep)?;
    debug_assert!(offer.is_empty(), "the function body keeps everything");

    let mut scope = Scope::default();
    scope.enter(func.params());
    engine.emit_block(&mut func.body, &mut scope)?;
    scope.exit();

    let stats = engine.stats;
    tracing::debug!(
        function = engine.names.lookup(func.name),
        emitted = stats.emitted,
        declaration_piggybacks = stats.declaration_piggybacks,
        instruction_piggybacks = stats.instruction_piggybacks,
        cancelled = stats.cancelled,
        hoisted = stats.hoisted,
        batched = stats.batched,
        loop_list_entries = stats.loop_list_entries,
        synthesized = stats.synthesized,
        "placed refcounts"
    );
    Ok(stats)
}

struct PlacementEngine<'a> {
    vars: &'a mut VarTable,
    names: &'a mut StringInterner,
    flags: OptFlags,
    model: AliasModel,
    /// Entries each block places itself, filled by counting.
    kept: FxHashMap<BlockId, RefcountLedger>,
    loop_rc: FxHashMap<BlockId, LoopLedgers>,
    stats: PlacementStats,
}

impl PlacementEngine<'_> {
    fn uses(&self) -> UseCx<'_> {
        UseCx {
            vars: &*self.vars,
            model: &self.model,
        }
    }

    // ── Counting ────────────────────────────────────────────

    /// Count `block`, keep what it places itself, and return the entries
    /// offered to the parent.
    fn count_block(
        &mut self,
        block: &mut Block,
        passed: &[(AliasKey, RcKind)],
        role: Role,
    ) -> Result<RefcountLedger, RefcountError> {
        ensure_sufficient_stack(|| self.count_block_inner(block, passed, role))
    }

    fn count_block_inner(
        &mut self,
        block: &mut Block,
        passed: &[(AliasKey, RcKind)],
        role: Role,
    ) -> Result<RefcountLedger, RefcountError> {
        let mut ledger = RefcountLedger::new();
        for stmt in &mut block.statements {
            match stmt {
                Statement::Instr(instr) => self.count_instr(instr, &mut ledger),
                Statement::Cont(cont) => self.count_cont(cont, &mut ledger)?,
            }
        }

        for decl in &block.variables {
            if self.vars.is_refcounted(decl.var) {
                let key = self.model.refcount_key(decl.var);
                for kind in RcKind::ALL {
                    ledger.adjust(key.clone(), kind, -decl.init.get(kind));
                }
            }
        }
        for (key, kind) in passed {
            ledger.adjust(key.clone(), *kind, -1);
        }
        ledger.canonicalize(&self.model);

        if self.flags.contains(OptFlags::CANCEL) {
            self.cancel_pairs(block, &mut ledger)?;
        }

        let here: &Block = block;
        let liftable = |key: &AliasKey, dir: RcDir| {
            !self.is_local(here, key) && !(dir == RcDir::Incr && self.binds_root(here, key))
        };
        let mut offer = match role {
            Role::Keep => RefcountLedger::new(),
            Role::Lift => ledger.split_off(liftable),
            Role::LiftIncrements => {
                ledger.split_off(|key, dir| dir == RcDir::Incr && liftable(key, dir))
            }
        };

        if self.flags.contains(OptFlags::PIGGYBACK) {
            self.piggyback_declarations(block, &mut ledger)?;
            self.piggyback_decrements(block, &mut ledger)?;
            self.piggyback_increments(block, &mut ledger)?;
        }

        ledger.validate(block.id)?;
        offer.validate(block.id)?;
        offer.canonicalize(&self.model);
        self.kept.entry(block.id).or_default().absorb(ledger);
        Ok(offer)
    }

    fn count_instr(&mut self, instr: &Instruction, ledger: &mut RefcountLedger) {
        self.model.update(instr);
        for (v, kind) in instr.consumed_holds(self.vars) {
            ledger.adjust(self.model.refcount_key(v), kind, 1);
        }
        for (v, kind, n) in instr.produced_holds() {
            if self.vars.is_refcounted(v) {
                ledger.adjust(self.model.refcount_key(v), kind, -n);
            }
        }
        for (v, kind, delta) in instr.piggybacked() {
            if self.vars.is_refcounted(v) {
                ledger.adjust(self.model.refcount_key(v), kind, -delta);
            }
        }
    }

    fn count_cont(
        &mut self,
        cont: &mut Continuation,
        ledger: &mut RefcountLedger,
    ) -> Result<(), RefcountError> {
        let hoist = self.flags.contains(OptFlags::HOIST);
        let batch = self.flags.contains(OptFlags::BATCH);
        let captured = if cont.is_async() {
            self.uses().captured(cont)
        } else {
            Vec::new()
        };
        let iterations = cont.iterations();
        let exhaustive = cont.is_exhaustive();

        match cont {
            Continuation::If { .. } | Continuation::Switch { .. } => {
                let lift = hoist && exhaustive;
                let role = if lift { Role::Lift } else { Role::Keep };
                let mut offers = Vec::new();
                for block in cont.blocks_mut() {
                    let offer = self.count_block(block, &[], role)?;
                    offers.push((block.id, offer));
                }
                if lift {
                    self.intersect_branches(offers, ledger)?;
                }
            }
            Continuation::Nested { block } => {
                let role = if hoist { Role::Lift } else { Role::Keep };
                let offer = self.count_block(block, &[], role)?;
                let hoisted = offer.entries().len();
                if hoisted > 0 {
                    tracing::trace!(block = ?block.id, hoisted, "hoisted out of nested block");
                    self.stats.hoisted += hoisted;
                }
                ledger.absorb(offer);
            }
            Continuation::Wait { block, .. } => {
                for (key, kind) in &captured {
                    ledger.adjust(key.clone(), *kind, 1);
                }
                let offer = self.count_block(block, &captured, Role::Keep)?;
                debug_assert!(offer.is_empty());
            }
            Continuation::RangeLoop { block, spawn, .. }
            | Continuation::Foreach { block, spawn, .. } => {
                let role = match (batch, *spawn) {
                    (false, _) => Role::Keep,
                    (true, false) => Role::Lift,
                    (true, true) => Role::LiftIncrements,
                };
                let body = block.id;
                let mut offer = self.count_block(block, &captured, role)?;

                let mut lists = LoopLedgers::default();
                let mut per_iteration = RefcountLedger::new();
                for (key, kind) in captured {
                    match iterations {
                        Some(_) if batch => per_iteration.adjust(key, kind, 1),
                        _ => lists.start.adjust(key, kind, 1),
                    }
                }
                match iterations {
                    Some(_) => per_iteration.absorb(offer),
                    None => {
                        lists
                            .start
                            .absorb(offer.split_off(|_, dir| dir == RcDir::Incr));
                        lists.end.absorb(offer);
                    }
                }
                if let Some(n) = iterations {
                    match per_iteration.scaled(n) {
                        Ok(total) => {
                            let batched = per_iteration.entries().len();
                            if batched > 0 {
                                tracing::trace!(?body, iterations = n, batched, "batched loop holds");
                                self.stats.batched += batched;
                            }
                            ledger.absorb(total);
                        }
                        // The runtime multiplies start lists by the count it sees.
                        Err(overflow) => {
                            tracing::debug!(?body, %overflow, "batch overflows, using loop lists");
                            lists
                                .start
                                .absorb(per_iteration.split_off(|_, dir| dir == RcDir::Incr));
                            lists.end.absorb(per_iteration);
                        }
                    }
                }
                if !lists.start.is_empty() || !lists.end.is_empty() {
                    self.loop_rc.insert(body, lists);
                }
            }
        }
        Ok(())
    }

    /// Hoist the part of every entry present, with the same sign, in all
    /// arms of an exhaustive branch set. Remainders stay in their arm.
    fn intersect_branches(
        &mut self,
        mut offers: Vec<(BlockId, RefcountLedger)>,
        ledger: &mut RefcountLedger,
    ) -> Result<(), RefcountError> {
        for (_, offer) in &mut offers {
            offer.canonicalize(&self.model);
        }
        if let Some(((_, first), rest)) = offers.split_first() {
            let mut common = Vec::new();
            for entry in first.entries() {
                let Some(dir) = RcDir::of(entry.amount) else {
                    continue;
                };
                let shared = rest.iter().fold(entry.amount, |acc, (_, other)| {
                    let theirs = other.get(&entry.key, entry.kind, dir);
                    match dir {
                        RcDir::Incr => acc.min(theirs),
                        RcDir::Decr => acc.max(theirs),
                    }
                });
                if shared != 0 {
                    common.push((entry.key, entry.kind, shared));
                }
            }
            for (key, kind, shared) in common {
                for (_, offer) in &mut offers {
                    offer.cancel(&key, kind, shared)?;
                }
                tracing::trace!(?key, ?kind, amount = shared, "hoisted across branches");
                ledger.adjust(key, kind, shared);
                self.stats.hoisted += 1;
            }
        }
        for (id, remainder) in offers {
            self.kept.entry(id).or_default().absorb(remainder);
        }
        Ok(())
    }

    /// Whether `block` owns `key`: it declares the root, or a stack
    /// variable stored at that location.
    fn is_local(&self, block: &Block, key: &AliasKey) -> bool {
        block.declares(key.root)
            || self
                .model
                .inhabitants(key)
                .into_iter()
                .any(|v| block.declares(v) && self.vars.storage(v) == Storage::Stack)
    }

    /// Whether `block` gives the alias at the root of `key` its referent.
    /// Before that point the location does not exist, so increments on it
    /// cannot move to the parent.
    fn binds_root(&self, block: &Block, key: &AliasKey) -> bool {
        self.vars.storage(key.root) == Storage::Alias
            && block
                .statements
                .iter()
                .any(|s| defines_in_subtree(s, key.root))
    }

    // ── Placement ───────────────────────────────────────────

    /// Cancel increments against decrements of the same location when the
    /// block's task never touches it synchronously: the held count is
    /// handed straight to the consumer.
    fn cancel_pairs(
        &mut self,
        block: &Block,
        ledger: &mut RefcountLedger,
    ) -> Result<(), RefcountError> {
        let sync = self.uses().sync_uses_in_subtree(block);
        for entry in ledger.entries() {
            if entry.amount <= 0 || sync.contains(&(entry.key.clone(), entry.kind)) {
                continue;
            }
            let pairs = entry
                .amount
                .min(-ledger.get(&entry.key, entry.kind, RcDir::Decr));
            if pairs > 0 {
                ledger.cancel(&entry.key, entry.kind, pairs)?;
                ledger.cancel(&entry.key, entry.kind, -pairs)?;
                tracing::trace!(key = ?entry.key, kind = ?entry.kind, pairs, "cancelled pairs");
                self.stats.cancelled += 1;
            }
        }
        Ok(())
    }

    /// Drop the base holds of stack variables nothing ever touches instead
    /// of releasing them.
    fn piggyback_declarations(
        &mut self,
        block: &mut Block,
        ledger: &mut RefcountLedger,
    ) -> Result<(), RefcountError> {
        let used = self.uses().keys_used_in_block(block);
        let mut absorbed = 0;
        for decl in &mut block.variables {
            if self.vars.storage(decl.var) != Storage::Stack || !self.vars.is_refcounted(decl.var)
            {
                continue;
            }
            let key = self.model.refcount_key(decl.var);
            if used.contains(&key) {
                continue;
            }
            for kind in RcKind::ALL {
                let init = decl.init.get(kind);
                if init > 0
                    && ledger.get(&key, kind, RcDir::Incr) == 0
                    && ledger.get(&key, kind, RcDir::Decr) == -init
                {
                    ledger.cancel(&key, kind, -init)?;
                    *decl.init.get_mut(kind) = 0;
                    absorbed += 1;
                }
            }
            if decl.init.read == 0 && decl.init.write == 0 {
                tracing::trace!(var = ?decl.var, "declared without holds");
            }
        }
        self.stats.declaration_piggybacks += absorbed;
        Ok(())
    }

    /// Move pending decrements onto the last statement touching the
    /// location, when that statement has a slot for them.
    fn piggyback_decrements(
        &mut self,
        block: &mut Block,
        ledger: &mut RefcountLedger,
    ) -> Result<(), RefcountError> {
        let stmt_keys: Vec<FxHashSet<AliasKey>> = {
            let cx = self.uses();
            block.statements.iter().map(|s| cx.keys_used(s)).collect()
        };
        for entry in ledger.entries() {
            if entry.amount >= 0 {
                continue;
            }
            let Some(last) = stmt_keys.iter().rposition(|keys| keys.contains(&entry.key)) else {
                continue;
            };
            let Statement::Instr(instr) = &mut block.statements[last] else {
                continue;
            };
            let slot = instr.piggyback_slots().into_iter().find(|slot| {
                slot.kind == entry.kind && self.model.refcount_key(slot.var) == entry.key
            });
            let Some(slot) = slot else {
                continue;
            };
            let amount = match instr {
                Instruction::LoadRef { acquire, .. } => -acquire.get(entry.kind).min(-entry.amount),
                _ => entry.amount,
            };
            if amount != 0 && instr.absorb(slot.var, entry.kind, amount) {
                ledger.cancel(&entry.key, entry.kind, amount)?;
                tracing::trace!(var = ?slot.var, kind = ?entry.kind, amount, "piggybacked decrement");
                self.stats.instruction_piggybacks += 1;
            }
        }
        Ok(())
    }

    /// Fold pending increments into the acquire count of the `LoadRef`
    /// defining the location, when nothing touches it earlier.
    fn piggyback_increments(
        &mut self,
        block: &mut Block,
        ledger: &mut RefcountLedger,
    ) -> Result<(), RefcountError> {
        let defs: FxHashSet<VarId> = block
            .instructions()
            .filter_map(|i| match i {
                Instruction::LoadRef { dst, .. } => Some(*dst),
                _ => None,
            })
            .collect();
        if defs.is_empty() {
            return Ok(());
        }
        let stmt_keys: Vec<FxHashSet<AliasKey>> = {
            let cx = self.uses();
            block.statements.iter().map(|s| cx.keys_used(s)).collect()
        };
        for kind in RcKind::ALL {
            let mut candidates: Vec<(VarId, i64)> = ledger
                .candidates(kind, RcDir::Incr, |key| {
                    self.model.resolve(key, |v| defs.contains(&v))
                })
                .into_iter()
                .collect();
            candidates.sort();
            for (var, amount) in candidates {
                let key = self.model.refcount_key(var);
                let Some(pos) = block.statements.iter().position(|s| {
                    matches!(s, Statement::Instr(Instruction::LoadRef { dst, .. }) if *dst == var)
                }) else {
                    continue;
                };
                if stmt_keys[..pos].iter().any(|keys| keys.contains(&key)) {
                    continue;
                }
                if let Statement::Instr(instr) = &mut block.statements[pos] {
                    if instr.absorb(var, kind, amount) {
                        ledger.cancel(&key, kind, amount)?;
                        tracing::trace!(?var, ?kind, amount, "piggybacked increment");
                        self.stats.instruction_piggybacks += 1;
                    }
                }
            }
        }
        Ok(())
    }

    // ── Emission ────────────────────────────────────────────

    fn emit_block(&mut self, block: &mut Block, scope: &mut Scope) -> Result<(), RefcountError> {
        ensure_sufficient_stack(|| self.emit_block_inner(block, scope))
    }

    fn emit_block_inner(
        &mut self,
        block: &mut Block,
        scope: &mut Scope,
    ) -> Result<(), RefcountError> {
        scope.enter(block.variables.iter().map(|d| d.var));

        let mut materialize = Vec::new();
        let mut at_start = Vec::new();
        let mut after: Vec<(usize, Instruction)> = Vec::new();

        if let Some(mut ledger) = self.kept.remove(&block.id) {
            ledger.canonicalize(&self.model);
            for entry in ledger.entries() {
                let resolved = self.resolve(&entry.key, block, scope)?;
                materialize.extend(resolved.materialize);
                let rc = Instruction::RefCount {
                    var: resolved.var,
                    kind: entry.kind,
                    amount: entry.amount,
                };
                self.stats.emitted += 1;
                if entry.amount < 0 {
                    block.cleanups.push(rc);
                } else {
                    match self.definition_point(block, resolved.var) {
                        Some(i) => after.push((i, rc)),
                        None => at_start.push(rc),
                    }
                }
            }
        }

        let loops: Vec<(usize, BlockId)> = block
            .statements
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Statement::Cont(cont) if cont.is_loop() => {
                    cont.blocks().first().map(|body| (i, body.id))
                }
                _ => None,
            })
            .collect();
        for (i, body) in loops {
            let Some(lists) = self.loop_rc.remove(&body) else {
                continue;
            };
            let start = self.resolve_deltas(lists.start, block, scope, &mut materialize)?;
            let end = self.resolve_deltas(lists.end, block, scope, &mut materialize)?;
            if let Statement::Cont(cont) = &mut block.statements[i] {
                if let Some(rc) = cont.loop_refcounts_mut() {
                    rc.start_incrs.extend(start);
                    rc.end_decrs.extend(end);
                }
            }
        }

        after.sort_by(|a, b| b.0.cmp(&a.0));
        for (i, rc) in after {
            block.statements.insert(i + 1, Statement::Instr(rc));
        }
        let prefix: Vec<Statement> = materialize
            .into_iter()
            .chain(at_start)
            .map(Statement::Instr)
            .collect();
        block.statements.splice(0..0, prefix);

        for stmt in &mut block.statements {
            if let Statement::Cont(cont) = stmt {
                for child in cont.blocks_mut() {
                    self.emit_block(child, scope)?;
                }
            }
        }

        scope.exit();
        Ok(())
    }

    /// Name `key` with a variable visible in `block`, synthesizing aliases
    /// when only an out-of-scope variable lives there.
    fn resolve(
        &mut self,
        key: &AliasKey,
        block: &mut Block,
        scope: &mut Scope,
    ) -> Result<Resolved, RefcountError> {
        let visible = &scope.visible;
        let resolved = self.model.resolve_or_synthesize(
            key,
            block,
            self.vars,
            self.names,
            |v| visible.contains(&v),
        )?;
        for instr in &resolved.materialize {
            for v in instr.outputs() {
                scope.add(v);
            }
        }
        self.stats.synthesized += resolved.materialize.len();
        Ok(resolved)
    }

    fn resolve_deltas(
        &mut self,
        ledger: RefcountLedger,
        block: &mut Block,
        scope: &mut Scope,
        materialize: &mut Vec<Instruction>,
    ) -> Result<Vec<RcDelta>, RefcountError> {
        let mut out = Vec::new();
        for entry in ledger.entries() {
            let resolved = self.resolve(&entry.key, block, scope)?;
            materialize.extend(resolved.materialize);
            out.push(RcDelta {
                var: resolved.var,
                kind: entry.kind,
                amount: entry.amount,
            });
        }
        self.stats.loop_list_entries += out.len();
        Ok(out)
    }

    /// Index of the statement of `block` that gives alias `var` its
    /// referent, directly or in a nested block. Increments on it must come
    /// after that statement.
    fn definition_point(&self, block: &Block, var: VarId) -> Option<usize> {
        if self.vars.storage(var) != Storage::Alias {
            return None;
        }
        block
            .statements
            .iter()
            .position(|s| defines_in_subtree(s, var))
    }
}
