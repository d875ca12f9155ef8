//! The value-numbering pass.
//!
//! Walks a function body in program order, feeding every instruction's
//! facts into a [`CongruenceModel`] and rewriting what the model proves
//! redundant:
//!
//! - input operands are replaced through [`CongruenceModel::replacement_for`]
//!   (outputs are never touched);
//! - a computation that folds becomes an assignment of the literal;
//! - a recomputation of a value some accessible, initialized variable
//!   already holds becomes a copy of that variable;
//! - range-loop bounds are substituted like operands.
//!
//! Facts learned inside a synchronous `Nested` block are promoted to the
//! enclosing scope when it ends; every other nested scope's facts are
//! discarded with it.

use flux_ir::{
    Arg, Block, BuiltinOp, Constant, Continuation, Function, FunctionSigs, GlobalConstants,
    InputSlot, Instruction, OpMode, OptFlags, Statement, Storage, StringInterner, Type, VarId,
    VarTable,
};
use flux_stack::ensure_sufficient_stack;
use smallvec::SmallVec;

use crate::{
    ArgOrCv, CongruenceKind, CongruenceModel, ComputedValue, InitTracker, Opcode, VnError,
};

/// What value numbering did to one function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VnStats {
    /// Operands replaced by a congruent variable or literal.
    pub substituted: usize,
    /// Computations replaced by a literal.
    pub folded: usize,
    /// Recomputations replaced by a copy.
    pub eliminated: usize,
    /// Classes joined.
    pub merges: usize,
    /// Facts established by every arm of a branch and kept after it.
    pub unified: usize,
}

/// "`loc` holds `value`", as learned from one instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fact {
    pub kind: CongruenceKind,
    pub value: ComputedValue,
    pub loc: Arg,
}

/// Congruence facts established by executing `instr`.
pub fn facts(instr: &Instruction, sigs: &FunctionSigs) -> SmallVec<[Fact; 2]> {
    let value = |op, args: &[Arg], loc: VarId| Fact {
        kind: CongruenceKind::Value,
        value: ComputedValue::new(op, args.iter().cloned()),
        loc: Arg::Var(loc),
    };
    let alias = |op, args: &[Arg], loc: VarId| Fact {
        kind: CongruenceKind::Alias,
        value: ComputedValue::new(op, args.iter().cloned()),
        loc: Arg::Var(loc),
    };

    let mut out = SmallVec::new();
    match instr {
        Instruction::Builtin { op, mode, dst, args } => {
            out.push(value(Opcode::Builtin(*op, *mode), args, *dst));
        }
        Instruction::Store { dst, src, .. } => {
            out.push(value(Opcode::Assign, std::slice::from_ref(src), *dst));
            out.push(Fact {
                kind: CongruenceKind::Value,
                value: ComputedValue::new(Opcode::Retrieve, [Arg::Var(*dst)]),
                loc: src.clone(),
            });
        }
        Instruction::Retrieve { dst, src, .. } => {
            out.push(value(Opcode::Retrieve, &[Arg::Var(*src)], *dst));
        }
        Instruction::Copy { dst, src } => {
            out.push(value(Opcode::Copy, &[Arg::Var(*src)], *dst));
        }
        Instruction::StructAlias { dst, src, field } => {
            out.push(alias(Opcode::StructField(*field), &[Arg::Var(*src)], *dst));
        }
        Instruction::ArrayAlias { dst, array, index } => {
            out.push(alias(Opcode::ArrayMember, &[Arg::Var(*array), index.clone()], *dst));
        }
        Instruction::ArrayInsert {
            array,
            index,
            member,
        } => {
            out.push(alias(Opcode::ArrayMember, &[Arg::Var(*array), index.clone()], *member));
        }
        Instruction::LoadRef { dst, src, .. } => {
            out.push(alias(Opcode::Deref, &[Arg::Var(*src)], *dst));
        }
        Instruction::IsMapped { dst, file } => {
            out.push(value(Opcode::IsMapped, &[Arg::Var(*file)], *dst));
        }
        Instruction::GetFilename { dst, file } => {
            out.push(value(Opcode::GetFilename, &[Arg::Var(*file)], *dst));
        }
        Instruction::SetFilename { file, filename } => out.push(Fact {
            kind: CongruenceKind::Value,
            value: ComputedValue::new(Opcode::Filename, [Arg::Var(*file)]),
            loc: filename.clone(),
        }),
        Instruction::Call {
            func,
            mode,
            outputs,
            inputs,
        } => {
            if let [output] = outputs.as_slice() {
                if sigs.is_pure(*func) {
                    out.push(value(Opcode::Call(*func, *mode), inputs, *output));
                }
            }
        }
        Instruction::RefCount { .. } => {}
    }
    out
}

/// Output and computed value of an instruction that could be replaced by
/// an assignment or a copy.
fn recomputation(instr: &Instruction, sigs: &FunctionSigs) -> Option<(VarId, ComputedValue)> {
    match instr {
        Instruction::Builtin { op, .. } if *op != BuiltinOp::CopyValue => {}
        Instruction::Retrieve { read_decr: 0, .. }
        | Instruction::IsMapped { .. }
        | Instruction::GetFilename { .. }
        | Instruction::Call { .. } => {}
        _ => return None,
    }
    facts(instr, sigs)
        .into_iter()
        .next()
        .and_then(|fact| Some((fact.loc.var()?, fact.value)))
}

/// Number the values of `func`, rewriting it in place.
pub fn number_values(
    func: &mut Function,
    vars: &VarTable,
    sigs: &FunctionSigs,
    globals: &GlobalConstants,
    names: &StringInterner,
    flags: OptFlags,
) -> Result<VnStats, VnError> {
    let mut pass = ValueNumbering {
        model: CongruenceModel::new(vars, globals, sigs, flags),
        init: InitTracker::new(vars),
        vars,
        sigs,
        globals,
        flags,
        stats: VnStats::default(),
    };
    for param in func.params() {
        pass.model.declare(param);
    }
    pass.init.mark_all(func.inputs.iter().copied());
    pass.visit_block(&mut func.body)?;

    pass.stats.merges = pass.model.merge_count();
    let stats = pass.stats;
    tracing::debug!(
        function = names.lookup(func.name),
        substituted = stats.substituted,
        folded = stats.folded,
        eliminated = stats.eliminated,
        unified = stats.unified,
        merges = stats.merges,
        "value numbering complete"
    );
    Ok(stats)
}

struct ValueNumbering<'a> {
    model: CongruenceModel<'a>,
    init: InitTracker<'a>,
    vars: &'a VarTable,
    sigs: &'a FunctionSigs,
    globals: &'a GlobalConstants,
    flags: OptFlags,
    stats: VnStats,
}

impl ValueNumbering<'_> {
    fn visit_block(&mut self, block: &mut Block) -> Result<(), VnError> {
        ensure_sufficient_stack(|| {
            for decl in &block.variables {
                self.model.declare(decl.var);
            }
            for stmt in &mut block.statements {
                match stmt {
                    Statement::Instr(instr) => self.visit_instr(instr)?,
                    Statement::Cont(cont) => self.visit_cont(cont)?,
                }
            }
            Ok(())
        })
    }

    fn visit_instr(&mut self, instr: &mut Instruction) -> Result<(), VnError> {
        if instr.is_refcount() {
            return Ok(());
        }
        if self.flags.contains(OptFlags::MERGE) {
            self.substitute_inputs(instr);
        }
        for fact in facts(instr, self.sigs) {
            self.model.add(fact.kind, &fact.value, fact.loc)?;
        }
        // A rewrite would drop the refcount changes riding on the instruction.
        let carries_counts = !instr.piggybacked().is_empty();
        if let Some(simpler) = (!carries_counts).then(|| self.simplified(instr)).flatten() {
            tracing::trace!(before = ?instr, after = ?simpler, "rewrote instruction");
            *instr = simpler;
        }
        self.init.mark_all(instr.initialized_vars(self.vars));
        Ok(())
    }

    /// Rewrite operands through their congruence classes. Operands that
    /// carry piggybacked refcount changes keep their variable.
    fn substitute_inputs(&mut self, instr: &mut Instruction) {
        let (model, init) = (&self.model, &self.init);
        let carried: SmallVec<[VarId; 2]> =
            instr.piggybacked().iter().map(|(v, _, _)| *v).collect();
        let replace = |kind: CongruenceKind, v: VarId| {
            if carried.contains(&v) {
                None
            } else {
                model.replacement_for(kind, v, init)
            }
        };
        let mut substituted = 0;
        for slot in instr.input_slots_mut() {
            match slot {
                InputSlot::Value(arg) => {
                    if let Some(r) = arg.var().and_then(|v| replace(CongruenceKind::Value, v)) {
                        *arg = r;
                        substituted += 1;
                    }
                }
                InputSlot::FutureArg(arg) => {
                    let r = arg.var().and_then(|v| replace(CongruenceKind::Value, v));
                    if let Some(r @ Arg::Var(_)) = r {
                        *arg = r;
                        substituted += 1;
                    }
                }
                InputSlot::Future(v) => {
                    if let Some(Arg::Var(r)) = replace(CongruenceKind::Value, *v) {
                        *v = r;
                        substituted += 1;
                    }
                }
                InputSlot::Identity(v) => {
                    if let Some(Arg::Var(r)) = replace(CongruenceKind::Alias, *v) {
                        *v = r;
                        substituted += 1;
                    }
                }
            }
        }
        self.stats.substituted += substituted;
    }

    /// A cheaper instruction computing the same output, if there is one.
    fn simplified(&mut self, instr: &Instruction) -> Option<Instruction> {
        let (dst, value) = recomputation(instr, self.sigs)?;
        let canon = self.model.canonicalize(CongruenceKind::Value, &value);
        if let Some(c) = self.constant_of(&canon) {
            self.stats.folded += 1;
            return Some(self.assign_constant(dst, c));
        }
        if !self.flags.contains(OptFlags::MERGE) {
            return None;
        }
        match self
            .model
            .replacement_for(CongruenceKind::Value, dst, &self.init)?
        {
            Arg::Const(c) => {
                self.stats.folded += 1;
                Some(self.assign_constant(dst, c))
            }
            Arg::Var(src) => {
                self.stats.eliminated += 1;
                Some(self.copy_from(dst, src))
            }
        }
    }

    /// The literal a canonical value denotes, directly or as a future.
    fn constant_of(&self, canon: &ArgOrCv) -> Option<Constant> {
        match canon {
            ArgOrCv::Arg(Arg::Const(c)) => Some(c.clone()),
            ArgOrCv::Arg(Arg::Var(v)) if self.vars.storage(*v) == Storage::GlobalConst => {
                self.globals.value_of(*v).cloned()
            }
            ArgOrCv::Arg(Arg::Var(_)) => None,
            ArgOrCv::Cv(cv) => cv.assigned_constant().cloned(),
        }
    }

    fn is_value(&self, var: VarId) -> bool {
        matches!(self.vars.ty(var), Type::Value(_))
    }

    fn assign_constant(&self, dst: VarId, value: Constant) -> Instruction {
        if self.is_value(dst) {
            Instruction::Builtin {
                op: BuiltinOp::CopyValue,
                mode: OpMode::Local,
                dst,
                args: vec![Arg::Const(value)],
            }
        } else {
            Instruction::Store {
                dst,
                src: Arg::Const(value),
                write_decr: 0,
            }
        }
    }

    fn copy_from(&self, dst: VarId, src: VarId) -> Instruction {
        if self.is_value(dst) {
            Instruction::Builtin {
                op: BuiltinOp::CopyValue,
                mode: OpMode::Local,
                dst,
                args: vec![Arg::Var(src)],
            }
        } else {
            Instruction::Copy { dst, src }
        }
    }

    fn visit_cont(&mut self, cont: &mut Continuation) -> Result<(), VnError> {
        if self.flags.contains(OptFlags::MERGE) {
            for arg in cont.control_args_mut() {
                let replacement = arg
                    .var()
                    .and_then(|v| self.model.replacement_for(CongruenceKind::Value, v, &self.init));
                if let Some(r) = replacement {
                    *arg = r;
                    self.stats.substituted += 1;
                }
            }
        }

        let on_task = cont.is_async();
        let bound = cont.bound_vars();
        let promote = matches!(cont, Continuation::Nested { .. });
        let exhaustive = cont.is_exhaustive();
        let mut arms = Vec::new();
        let mut arm_merges = Vec::new();

        for block in cont.blocks_mut() {
            self.model.push_scope(on_task);
            self.init.push();
            self.init.mark_all(bound.iter().copied());
            let visited = self.visit_block(block);
            let merges = self.model.pop_scope();
            let initialized = self.init.pop();
            visited?;

            if promote {
                tracing::trace!(block = ?block.id, merges = merges.len(), "promoted merges");
                self.model.promote(merges)?;
                self.init.mark_all(initialized);
            } else if exhaustive {
                arms.push(initialized);
                arm_merges.push(merges);
            }
        }
        if exhaustive {
            self.init.join_arms(&arms);
            let unified = self.model.unify_arms(&arm_merges)?;
            if unified > 0 {
                tracing::trace!(unified, "facts shared by every arm");
            }
            self.stats.unified += unified;
        }
        Ok(())
    }
}
